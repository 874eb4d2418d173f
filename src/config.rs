use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::cli::Cli;

pub const DEFAULT_CONFIG_FILE: &str = "nb-cluster.json";
pub const DEFAULT_POSTFIX: &str = "app";
pub const DEFAULT_START_LEVEL: i32 = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleOverrides {
    pub autoloads: HashMap<String, bool>,
    pub eagers: HashMap<String, bool>,
    pub enabled: HashMap<String, bool>,
    pub start_levels: HashMap<String, i32>,
    pub default_start_level: Option<i32>,
}

impl ModuleOverrides {
    pub fn default_start_level(&self) -> i32 {
        self.default_start_level.unwrap_or(DEFAULT_START_LEVEL)
    }
}

/// Project settings, read from a JSON file.
///
/// Every path is taken relative to the working directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub branding_token: Option<String>,
    pub postfix: Option<String>,
    pub build_dir: Option<PathBuf>,
    pub netbeans_dir: Option<PathBuf>,
    /// Staging directory for collected module jars; defaults to
    /// `<build_dir>/cluster-jars`.
    pub collect_dir: Option<PathBuf>,
    /// Template for `etc/<branding>.conf`; defaults to
    /// `<netbeans_dir>/harness/etc/app.conf`.
    pub etc_conf_file: Option<PathBuf>,
    /// Verbatim `etc/<branding>.clusters`; generated when unset.
    pub etc_clusters_file: Option<PathBuf>,
    /// Custom launchers; defaults to the harness launchers.
    pub bin_dir: Option<PathBuf>,
    #[serde(flatten)]
    pub overrides: ModuleOverrides,
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(config = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn branding_token(&self) -> Result<&str> {
        self.branding_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .context("branding_token is not configured")
    }

    pub fn postfix(&self) -> &str {
        self.postfix.as_deref().unwrap_or(DEFAULT_POSTFIX)
    }

    pub fn build_dir(&self) -> PathBuf {
        self.build_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("build"))
    }

    pub fn netbeans_dir(&self) -> Result<&Path> {
        self.netbeans_dir
            .as_deref()
            .context("netbeans_dir is not configured")
    }

    pub fn collect_dir(&self) -> PathBuf {
        self.collect_dir
            .clone()
            .unwrap_or_else(|| self.build_dir().join("cluster-jars"))
    }

    pub fn output_dir(&self) -> Result<PathBuf> {
        Ok(self
            .build_dir()
            .join(format!("{}-{}", self.branding_token()?, self.postfix())))
    }

    pub fn platform_modules_dir(&self) -> Option<PathBuf> {
        self.netbeans_dir
            .as_ref()
            .map(|d| d.join("platform").join("modules"))
    }
}

pub fn resolve_config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

pub fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = AppConfig::load(&resolve_config_path(cli))?;
    if let Some(token) = cli.branding.clone() {
        config.branding_token = Some(token);
    }
    if let Some(dir) = cli.netbeans.clone() {
        config.netbeans_dir = Some(dir);
    }
    if let Some(dir) = cli.build_dir.clone() {
        config.build_dir = Some(dir);
    }
    if let Some(dir) = cli.collect_dir.clone() {
        config.collect_dir = Some(dir);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn load_reads_overrides_flattened() -> Result<()> {
        let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
        let path = std::env::temp_dir().join(format!(
            "nb_cluster_config_{}_{}.json",
            std::process::id(),
            nanos
        ));
        std::fs::write(
            &path,
            r#"{
                "branding_token": "myapp",
                "netbeans_dir": "/opt/netbeans",
                "autoloads": { "org-foo": false },
                "start_levels": { "org-bar": 4 },
                "default_start_level": 7
            }"#,
        )?;

        let config = AppConfig::load(&path)?;
        assert_eq!(config.branding_token()?, "myapp");
        assert_eq!(config.postfix(), "app");
        assert_eq!(config.output_dir()?, PathBuf::from("build").join("myapp-app"));
        assert_eq!(config.collect_dir(), PathBuf::from("build").join("cluster-jars"));
        assert_eq!(
            config.platform_modules_dir(),
            Some(PathBuf::from("/opt/netbeans/platform/modules"))
        );
        assert_eq!(config.overrides.autoloads.get("org-foo"), Some(&false));
        assert_eq!(config.overrides.start_levels.get("org-bar"), Some(&4));
        assert_eq!(config.overrides.default_start_level(), 7);

        std::fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn missing_file_gives_defaults() -> Result<()> {
        let config = AppConfig::load(Path::new("/nonexistent/nb-cluster.json"))?;
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.overrides.default_start_level(), DEFAULT_START_LEVEL);
        assert!(config.branding_token().is_err());
        Ok(())
    }
}
