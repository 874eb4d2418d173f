//! Stages the non-platform module jars of a build into one directory, named
//! by dashed module id, ready for cluster assembly.

use anyhow::{Context, Result};
use ignore::WalkBuilder;
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use crate::fsutil;
use crate::gate::{self, IncrementalInputs};
use crate::manifest::dashed;
use crate::registry::ModuleRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CollectOutcome {
    Collected { module: String, target: PathBuf },
    UpToDate { module: String, target: PathBuf },
    PlatformProvided { module: String },
    NotAModule,
    Missing,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectedArtifact {
    pub artifact: PathBuf,
    #[serde(flatten)]
    pub outcome: CollectOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectReport {
    pub collect_dir: PathBuf,
    pub cleared: bool,
    pub artifacts: Vec<CollectedArtifact>,
}

impl CollectReport {
    pub fn collected(&self) -> usize {
        self.artifacts
            .iter()
            .filter(|a| matches!(a.outcome, CollectOutcome::Collected { .. }))
            .count()
    }
}

/// Platform jars by naming convention: `org-openide-*` and `org-netbeans-*`,
/// except the `org-netbeans-modules-*` family.
pub fn is_platform_jar_name(file_name: &str) -> bool {
    !file_name.starts_with("org-netbeans-modules-")
        && (file_name.starts_with("org-openide-") || file_name.starts_with("org-netbeans-"))
}

pub struct JarCollector<'a> {
    registry: &'a ModuleRegistry,
    platform_modules_dir: Option<PathBuf>,
}

impl<'a> JarCollector<'a> {
    /// `platform_modules_dir` is `<netbeans>/platform/modules`; modules
    /// already present there are left out.
    pub fn new(registry: &'a ModuleRegistry, platform_modules_dir: Option<PathBuf>) -> Self {
        Self {
            registry,
            platform_modules_dir,
        }
    }

    pub fn collect(
        &self,
        artifacts: &[PathBuf],
        collect_dir: &Path,
        inputs: &IncrementalInputs,
    ) -> Result<CollectReport> {
        fsutil::ensure_dir(collect_dir)?;

        // Removed inputs cannot be mapped back to their staged names.
        let cleared = !inputs.removed.is_empty();
        if cleared {
            tracing::info!(dir = %collect_dir.display(), "inputs removed, clearing collected jars");
            clear_files(collect_dir)?;
        }

        let artifacts = artifacts
            .par_iter()
            .map(|artifact| {
                Ok(CollectedArtifact {
                    artifact: artifact.clone(),
                    outcome: self.collect_one(artifact, collect_dir, inputs)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(CollectReport {
            collect_dir: collect_dir.to_path_buf(),
            cleared,
            artifacts,
        })
    }

    fn collect_one(
        &self,
        artifact: &Path,
        collect_dir: &Path,
        inputs: &IncrementalInputs,
    ) -> Result<CollectOutcome> {
        if !artifact.is_file() {
            return Ok(CollectOutcome::Missing);
        }

        let info = self
            .registry
            .get_or_add(artifact)
            .with_context(|| format!("Failed to classify {}", artifact.display()))?;
        let descriptor = &info.descriptor;
        let Some(module_id) = descriptor
            .module_id()
            .filter(|_| descriptor.is_cluster_module())
        else {
            tracing::debug!(artifact = %artifact.display(), "skipping (not OSGi or NetBeans module)");
            return Ok(CollectOutcome::NotAModule);
        };

        let module = module_id.to_string();
        let dashed_id = dashed(module_id);
        if self.is_platform_module(&dashed_id, &info.file_name) {
            return Ok(CollectOutcome::PlatformProvided { module });
        }

        let target = collect_dir.join(format!("{dashed_id}.jar"));
        if !gate::target_is_stale(inputs, artifact, &target) {
            return Ok(CollectOutcome::UpToDate { module, target });
        }

        tracing::info!(artifact = %artifact.display(), "installing");
        gate::copy_preserving_mtime(artifact, &target)?;
        Ok(CollectOutcome::Collected { module, target })
    }

    fn is_platform_module(&self, dashed_id: &str, file_name: &str) -> bool {
        let shipped = self
            .platform_modules_dir
            .as_ref()
            .is_some_and(|dir| dir.join(format!("{dashed_id}.jar")).exists());
        shipped || is_platform_jar_name(file_name)
    }
}

pub fn list_jars(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut jars = Vec::new();
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to list {}", dir.display()))?
            .path();
        if path.is_file() && path.extension().is_some_and(|e| e == "jar") {
            jars.push(path);
        }
    }
    jars.sort();
    Ok(jars)
}

pub fn discover_jars(inputs: &[PathBuf]) -> Vec<PathBuf> {
    let mut out = Vec::new();
    for input in inputs {
        if !input.is_dir() {
            out.push(input.clone());
            continue;
        }

        let (tx, rx) = mpsc::channel();
        let walker = WalkBuilder::new(input)
            .hidden(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .build_parallel();
        walker.run(|| {
            let tx = tx.clone();
            Box::new(move |entry| {
                if let Ok(entry) = entry {
                    let path = entry.path();
                    if path.is_file() && path.extension().is_some_and(|e| e == "jar") {
                        let _ = tx.send(path.to_path_buf());
                    }
                }
                ignore::WalkState::Continue
            })
        });
        drop(tx);

        let mut found: Vec<PathBuf> = rx.iter().collect();
        found.sort();
        out.extend(found);
    }
    out
}

fn clear_files(dir: &Path) -> Result<()> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to list {}", dir.display()))?
            .path();
        if path.is_file() {
            std::fs::remove_file(&path)
                .with_context(|| format!("Failed to remove {}", path.display()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::{SystemTime, UNIX_EPOCH};
    use zip::write::FileOptions;

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "nb_cluster_collect_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_jar(path: &Path, manifest: Option<&str>) -> Result<()> {
        let mut zip = zip::ZipWriter::new(std::fs::File::create(path)?);
        if let Some(manifest) = manifest {
            zip.start_file(crate::manifest::MANIFEST_ENTRY, FileOptions::default())?;
            zip.write_all(manifest.as_bytes())?;
        }
        zip.start_file("a/A.class", FileOptions::default())?;
        zip.write_all(b"")?;
        zip.finish()?;
        Ok(())
    }

    #[test]
    fn platform_name_rules() {
        assert!(is_platform_jar_name("org-openide-util.jar"));
        assert!(is_platform_jar_name("org-netbeans-api-progress.jar"));
        assert!(!is_platform_jar_name("org-netbeans-modules-foo.jar"));
        assert!(!is_platform_jar_name("com-acme-tool.jar"));
    }

    #[test]
    fn collects_modules_and_filters_the_rest() -> Result<()> {
        let base = temp_dir("filter");
        let repo = base.join("repo");
        let platform = base.join("platform-modules");
        let out = base.join("cluster-jars");
        std::fs::create_dir_all(&repo)?;
        std::fs::create_dir_all(&platform)?;

        let module = repo.join("acme-core-1.0.jar");
        write_jar(&module, Some("OpenIDE-Module: com.acme.core/1\n"))?;
        let plain = repo.join("commons-lang.jar");
        write_jar(&plain, Some("Extension-Name: commons\n"))?;
        let shipped = repo.join("shipped-1.0.jar");
        write_jar(&shipped, Some("OpenIDE-Module: org.openide.util\n"))?;
        std::fs::write(platform.join("org-openide-util.jar"), b"")?;
        let by_name = repo.join("org-netbeans-api-progress.jar");
        write_jar(&by_name, Some("OpenIDE-Module: org.netbeans.api.progress\n"))?;
        let missing = repo.join("gone.jar");

        let registry = ModuleRegistry::default();
        let collector = JarCollector::new(&registry, Some(platform.clone()));
        let artifacts = vec![module, plain, shipped, by_name, missing];
        let report = collector.collect(&artifacts, &out, &IncrementalInputs::default())?;

        let outcomes: Vec<&CollectOutcome> = report.artifacts.iter().map(|a| &a.outcome).collect();
        assert!(matches!(outcomes[0], CollectOutcome::Collected { module, .. } if module == "com.acme.core"));
        assert_eq!(outcomes[1], &CollectOutcome::NotAModule);
        assert!(matches!(outcomes[2], CollectOutcome::PlatformProvided { .. }));
        assert!(matches!(outcomes[3], CollectOutcome::PlatformProvided { .. }));
        assert_eq!(outcomes[4], &CollectOutcome::Missing);
        assert_eq!(list_jars(&out)?, vec![out.join("com-acme-core.jar")]);

        let again = collector.collect(&artifacts, &out, &IncrementalInputs::default())?;
        assert_eq!(again.collected(), 0);
        assert!(matches!(again.artifacts[0].outcome, CollectOutcome::UpToDate { .. }));

        std::fs::remove_dir_all(base)?;
        Ok(())
    }

    #[test]
    fn discover_expands_directories() -> Result<()> {
        let base = temp_dir("discover");
        let nested = base.join("repo").join("a").join("1.0");
        std::fs::create_dir_all(&nested)?;
        std::fs::write(nested.join("a-1.0.jar"), b"")?;
        std::fs::write(nested.join("a-1.0.pom"), b"")?;
        let loose = base.join("loose.jar");

        let found = discover_jars(&[loose.clone(), base.join("repo")]);
        assert_eq!(found, vec![loose, nested.join("a-1.0.jar")]);
        std::fs::remove_dir_all(base)?;
        Ok(())
    }

    #[test]
    fn removed_inputs_clear_the_staging_dir() -> Result<()> {
        let base = temp_dir("clear");
        let out = base.join("cluster-jars");
        std::fs::create_dir_all(&out)?;
        std::fs::write(out.join("stale-module.jar"), b"old")?;

        let jar = base.join("fresh.jar");
        write_jar(&jar, Some("Bundle-SymbolicName: org.fresh\n"))?;

        let mut inputs = IncrementalInputs::default();
        inputs.removed.insert(base.join("stale.jar"));
        let registry = ModuleRegistry::default();
        let report = JarCollector::new(&registry, None).collect(&[jar], &out, &inputs)?;

        assert!(report.cleared);
        assert_eq!(list_jars(&out)?, vec![out.join("org_fresh.jar")]);
        std::fs::remove_dir_all(base)?;
        Ok(())
    }
}
