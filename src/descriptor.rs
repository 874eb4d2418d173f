//! Module status (`config/Modules/*.xml`) and update tracking
//! (`update_tracking/*.xml`) documents.
//!
//! The module loader reads both files literally, so element order,
//! indentation and line endings are fixed.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ClusterError;
use crate::manifest::dashed;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleStatus {
    pub autoload: bool,
    pub eager: bool,
    pub enabled: Option<bool>,
    pub start_level: Option<i32>,
}

impl ModuleStatus {
    pub fn validate(&self, module_id: &str) -> Result<(), ClusterError> {
        if self.autoload && self.eager {
            return Err(ClusterError::ConflictingLoadStrategy {
                module: module_id.to_string(),
            });
        }
        Ok(())
    }
}

pub fn module_config_xml(module_id: &str, status: &ModuleStatus) -> Result<String, ClusterError> {
    status.validate(module_id)?;

    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <!DOCTYPE module PUBLIC \"-//NetBeans//DTD Module Status 1.0//EN\"\n\
         \x20                       \"http://www.netbeans.org/dtds/module-status-1_0.dtd\">\n",
    );
    xml.push_str(&format!("<module name=\"{}\">\n", escape(module_id)));
    xml.push_str(&format!(
        "    <param name=\"autoload\">{}</param>\n",
        status.autoload
    ));
    if let Some(level) = status.start_level {
        xml.push_str(&format!("    <param name=\"startlevel\">{level}</param>\n"));
    }
    if let Some(enabled) = status.enabled {
        xml.push_str(&format!("    <param name=\"enabled\">{enabled}</param>\n"));
    }
    xml.push_str(&format!("    <param name=\"eager\">{}</param>\n", status.eager));
    xml.push_str(&format!(
        "    <param name=\"jar\">modules/{}.jar</param>\n",
        escape(&dashed(module_id))
    ));
    xml.push_str("    <param name=\"reloadable\">false</param>\n");
    xml.push_str("</module>\n");
    Ok(xml)
}

/// Tracking document for an installed module; `config_crc` and `jar_crc`
/// must be computed from the files as they sit in the cluster.
pub fn update_tracking_xml(
    module_id: &str,
    spec_version: &str,
    install_time_millis: u128,
    config_crc: u32,
    jar_crc: u32,
) -> String {
    let id = escape(module_id);
    let dashed_id = escape(&dashed(module_id));
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <module codename=\"{id}\">\n\
         \x20   <module_version install_time=\"{install_time_millis}\" last=\"true\" origin=\"installer\" specification_version=\"{}\">\n\
         \x20       <file crc=\"{config_crc}\" name=\"config/Modules/{dashed_id}.xml\"/>\n\
         \x20       <file crc=\"{jar_crc}\" name=\"modules/{dashed_id}.jar\"/>\n\
         \x20   </module_version>\n\
         </module>",
        escape(spec_version)
    )
}

pub fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
}

/// CRC-32 over the whole file. A read that comes up short of the size
/// reported by the filesystem is an error, never a partial checksum.
pub fn crc_for_file(path: &Path) -> Result<u32> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let expected = file
        .metadata()
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();

    let mut bytes = Vec::with_capacity(usize::try_from(expected).unwrap_or(0));
    file.read_to_end(&mut bytes)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let actual = bytes.len() as u64;
    if actual != expected {
        return Err(ClusterError::ShortRead {
            path: path.to_path_buf(),
            expected,
            actual,
        }
        .into());
    }
    Ok(crc32fast::hash(&bytes))
}

fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_xml_matches_module_status_dtd_layout() {
        let status = ModuleStatus {
            autoload: false,
            eager: false,
            enabled: Some(true),
            start_level: Some(10),
        };
        let xml = module_config_xml("test_bundle", &status).unwrap();
        assert_eq!(
            xml,
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE module PUBLIC "-//NetBeans//DTD Module Status 1.0//EN"
                        "http://www.netbeans.org/dtds/module-status-1_0.dtd">
<module name="test_bundle">
    <param name="autoload">false</param>
    <param name="startlevel">10</param>
    <param name="enabled">true</param>
    <param name="eager">false</param>
    <param name="jar">modules/test_bundle.jar</param>
    <param name="reloadable">false</param>
</module>
"#
        );
    }

    #[test]
    fn unset_params_are_omitted() {
        let status = ModuleStatus {
            autoload: true,
            eager: false,
            enabled: None,
            start_level: None,
        };
        let xml = module_config_xml("org.foo.bar", &status).unwrap();
        assert!(!xml.contains("startlevel"));
        assert!(!xml.contains("\"enabled\""));
        assert!(xml.contains("<param name=\"jar\">modules/org-foo-bar.jar</param>"));
    }

    #[test]
    fn autoload_and_eager_conflict() {
        let status = ModuleStatus {
            autoload: true,
            eager: true,
            enabled: None,
            start_level: None,
        };
        let err = module_config_xml("org.x", &status).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Bundle org.x cannot be both eager and autoload."
        );
    }

    #[test]
    fn tracking_xml_layout() {
        let xml = update_tracking_xml("org.foo", "1.2", 1234, 11, 22);
        assert_eq!(
            xml,
            r#"<?xml version="1.0" encoding="UTF-8"?>
<module codename="org.foo">
    <module_version install_time="1234" last="true" origin="installer" specification_version="1.2">
        <file crc="11" name="config/Modules/org-foo.xml"/>
        <file crc="22" name="modules/org-foo.jar"/>
    </module_version>
</module>"#
        );
    }

    #[test]
    fn crc_matches_known_value() -> Result<()> {
        let path = std::env::temp_dir().join(format!(
            "nb_cluster_crc_{}_{}",
            std::process::id(),
            now_millis()
        ));
        std::fs::write(&path, b"123456789")?;
        assert_eq!(crc_for_file(&path)?, 0xCBF4_3926);
        std::fs::remove_file(path)?;
        Ok(())
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn size_mismatch_is_an_error_not_a_checksum() {
        // procfs reports a length of zero but yields content.
        let err = crc_for_file(Path::new("/proc/self/status")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ClusterError>(),
            Some(ClusterError::ShortRead { expected: 0, .. })
        ));
    }
}
