//! Cluster assembly: module jars plus their status and tracking documents.
//!
//! ```text
//! <target>/<cluster>/
//!   .lastModified
//!   modules/<dashed-id>.jar
//!   config/Modules/<dashed-id>.xml
//!   update_tracking/<dashed-id>.xml
//! ```
//!
//! Each module's three files are produced together. When any step fails the
//! files already written for that module are removed again, so the missing
//! jar makes the next run regenerate the whole set.
//!
//! The module overrides in effect are recorded in `.overrides.json`; a run
//! with different overrides regenerates every module.

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::config::ModuleOverrides;
use crate::descriptor::{self, ModuleStatus};
use crate::fsutil;
use crate::gate::{self, FreshnessMarker, IncrementalInputs};
use crate::manifest::{ModuleDescriptor, dashed};
use crate::registry::ModuleRegistry;

pub const OVERRIDES_FILE: &str = ".overrides.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ModuleOutcome {
    Installed { module: String },
    UpToDate { module: String },
    Skipped,
    Failed { module: String, error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ModuleReport {
    pub jar: PathBuf,
    #[serde(flatten)]
    pub outcome: ModuleOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssemblyReport {
    pub cluster_dir: PathBuf,
    pub modules: Vec<ModuleReport>,
}

impl AssemblyReport {
    pub fn installed(&self) -> usize {
        self.count(|o| matches!(o, ModuleOutcome::Installed { .. }))
    }

    pub fn up_to_date(&self) -> usize {
        self.count(|o| matches!(o, ModuleOutcome::UpToDate { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ModuleOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&ModuleOutcome) -> bool) -> usize {
        self.modules.iter().filter(|m| pred(&m.outcome)).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleFiles {
    pub jar: PathBuf,
    pub config: PathBuf,
    pub tracking: PathBuf,
}

impl ModuleFiles {
    pub fn new(cluster_dir: &Path, dashed_id: &str) -> Self {
        Self {
            jar: cluster_dir.join("modules").join(format!("{dashed_id}.jar")),
            config: cluster_dir
                .join("config")
                .join("Modules")
                .join(format!("{dashed_id}.xml")),
            tracking: cluster_dir
                .join("update_tracking")
                .join(format!("{dashed_id}.xml")),
        }
    }

    fn create_parents(&self) -> Result<()> {
        for file in [&self.jar, &self.config, &self.tracking] {
            if let Some(parent) = file.parent() {
                fsutil::ensure_dir(parent)?;
            }
        }
        Ok(())
    }

    fn remove_all(&self) {
        for file in [&self.jar, &self.config, &self.tracking] {
            if let Err(e) = fsutil::remove_file_if_exists(file) {
                tracing::warn!(error = %e, "failed to clean up partial module output");
            }
        }
    }
}

pub fn effective_status(
    descriptor: &ModuleDescriptor,
    dashed_id: &str,
    overrides: &ModuleOverrides,
) -> ModuleStatus {
    let autoload = overrides
        .autoloads
        .get(dashed_id)
        .copied()
        .unwrap_or_else(|| descriptor.autoload());
    let eager = overrides.eagers.get(dashed_id).copied().unwrap_or(false);

    let (start_level, enabled) = match descriptor {
        ModuleDescriptor::Osgi(bundle) => {
            let start_level = bundle.start_level.unwrap_or_else(|| {
                overrides
                    .start_levels
                    .get(dashed_id)
                    .copied()
                    .unwrap_or_else(|| overrides.default_start_level())
            });
            let enabled = bundle
                .enabled
                .or_else(|| overrides.enabled.get(dashed_id).copied())
                .or((!autoload).then_some(true));
            (Some(start_level), enabled)
        }
        _ => (None, None),
    };

    ModuleStatus {
        autoload,
        eager,
        enabled,
        start_level,
    }
}

pub struct ClusterAssembler<'a> {
    registry: &'a ModuleRegistry,
    overrides: &'a ModuleOverrides,
}

impl<'a> ClusterAssembler<'a> {
    pub fn new(registry: &'a ModuleRegistry, overrides: &'a ModuleOverrides) -> Self {
        Self {
            registry,
            overrides,
        }
    }

    /// Brings `<target_root>/<cluster_name>` up to date with `candidates`.
    ///
    /// A jar that cannot be classified aborts the run; a module that fails
    /// later is reported as `Failed` and the run continues.
    pub fn assemble(
        &self,
        cluster_name: &str,
        target_root: &Path,
        candidates: &[PathBuf],
        inputs: &IncrementalInputs,
    ) -> Result<AssemblyReport> {
        let cluster_dir = target_root.join(cluster_name);
        let fresh_cluster = !cluster_dir.is_dir();
        fsutil::ensure_dir(&cluster_dir)?;

        let marker = FreshnessMarker::in_dir(&cluster_dir);
        let reference = if fresh_cluster {
            None
        } else {
            marker.modified()
        };

        let fingerprint_path = cluster_dir.join(OVERRIDES_FILE);
        let fingerprint = overrides_fingerprint(self.overrides)?;
        let overrides_changed =
            std::fs::read_to_string(&fingerprint_path).ok().as_deref() != Some(fingerprint.as_str());
        if overrides_changed && !fresh_cluster {
            tracing::info!(cluster = cluster_name, "module overrides changed, regenerating all modules");
        }

        let modules = candidates
            .par_iter()
            .map(|jar| {
                let outcome =
                    self.process(jar, &cluster_dir, reference, overrides_changed, inputs)?;
                Ok(ModuleReport {
                    jar: jar.clone(),
                    outcome,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if overrides_changed {
            fsutil::write_atomic(&fingerprint_path, fingerprint.as_bytes())?;
        }
        marker.touch()?;

        let report = AssemblyReport {
            cluster_dir,
            modules,
        };
        tracing::info!(
            cluster = cluster_name,
            installed = report.installed(),
            up_to_date = report.up_to_date(),
            failed = report.failed(),
            "cluster assembled"
        );
        Ok(report)
    }

    fn process(
        &self,
        jar: &Path,
        cluster_dir: &Path,
        reference: Option<SystemTime>,
        force: bool,
        inputs: &IncrementalInputs,
    ) -> Result<ModuleOutcome> {
        tracing::debug!(jar = %jar.display(), "processing");
        let info = self
            .registry
            .get_or_add(jar)
            .with_context(|| format!("Failed to classify {}", jar.display()))?;
        let descriptor = &info.descriptor;

        let Some(module_id) = descriptor
            .module_id()
            .filter(|_| descriptor.is_cluster_module())
        else {
            tracing::debug!(jar = %jar.display(), "not a module, skipping");
            return Ok(ModuleOutcome::Skipped);
        };
        let module = module_id.to_string();
        let dashed_id = dashed(module_id);
        let files = ModuleFiles::new(cluster_dir, &dashed_id);

        if !force && !gate::needs_regeneration(inputs, jar, &files.jar, reference) {
            return Ok(ModuleOutcome::UpToDate { module });
        }

        let status = effective_status(descriptor, &dashed_id, self.overrides);
        if let Err(e) = status.validate(module_id) {
            tracing::error!(module = %module, error = %e, "invalid module configuration");
            files.remove_all();
            return Ok(ModuleOutcome::Failed {
                module,
                error: e.to_string(),
            });
        }

        match install(jar, module_id, descriptor.spec_version(), &status, &files) {
            Ok(()) => {
                tracing::info!(module = %module, jar = %jar.display(), "installed");
                Ok(ModuleOutcome::Installed { module })
            }
            Err(e) => {
                let error = format!("{e:#}");
                tracing::error!(module = %module, error = %error, "failed to install module");
                files.remove_all();
                Ok(ModuleOutcome::Failed { module, error })
            }
        }
    }
}

fn overrides_fingerprint(overrides: &ModuleOverrides) -> Result<String> {
    let value = serde_json::to_value(overrides).context("Failed to serialize module overrides")?;
    Ok(value.to_string())
}

fn install(
    jar: &Path,
    module_id: &str,
    spec_version: Option<&str>,
    status: &ModuleStatus,
    files: &ModuleFiles,
) -> Result<()> {
    files.create_parents()?;
    gate::copy_preserving_mtime(jar, &files.jar)?;

    let config = descriptor::module_config_xml(module_id, status)?;
    fsutil::write_atomic(&files.config, config.as_bytes())?;

    if spec_version.is_none() {
        tracing::warn!(module = module_id, "no specification version in manifest");
    }
    let tracking = descriptor::update_tracking_xml(
        module_id,
        spec_version.unwrap_or_default(),
        descriptor::now_millis(),
        descriptor::crc_for_file(&files.config)?,
        descriptor::crc_for_file(&files.jar)?,
    );
    fsutil::write_atomic(&files.tracking, tracking.as_bytes())?;
    Ok(())
}
