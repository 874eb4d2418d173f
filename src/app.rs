//! Full application directory: platform cluster, the branded module
//! cluster, `etc/` and `bin/`.

use anyhow::{Context, Result, bail};
use ignore::WalkBuilder;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::cluster::{AssemblyReport, ClusterAssembler};
use crate::collect::list_jars;
use crate::config::AppConfig;
use crate::fsutil;
use crate::gate::{self, FreshnessMarker, IncrementalInputs, MARKER_FILE};
use crate::registry::ModuleRegistry;

pub const BRANDING_PLACEHOLDER: &str = "${branding.token}";

#[derive(Debug, Clone, Serialize)]
pub struct ApplicationReport {
    pub output_dir: PathBuf,
    pub platform_files_copied: usize,
    pub cluster: AssemblyReport,
    pub clusters: Vec<String>,
    pub launchers: Vec<PathBuf>,
}

pub struct ApplicationBuilder<'a> {
    config: &'a AppConfig,
    registry: &'a ModuleRegistry,
}

impl<'a> ApplicationBuilder<'a> {
    pub fn new(config: &'a AppConfig, registry: &'a ModuleRegistry) -> Self {
        Self { config, registry }
    }

    pub fn build(&self, inputs: &IncrementalInputs) -> Result<ApplicationReport> {
        let branding = self.config.branding_token()?;
        let netbeans_dir = self.config.netbeans_dir()?;
        let output_dir = self.config.output_dir()?;
        fsutil::ensure_dir(&output_dir)?;
        FreshnessMarker::in_dir(&output_dir).touch()?;

        let platform_files_copied = copy_platform(netbeans_dir, &output_dir, inputs)?;

        let collect_dir = self.config.collect_dir();
        let candidates = if collect_dir.is_dir() {
            list_jars(&collect_dir)?
        } else {
            tracing::warn!(dir = %collect_dir.display(), "collect dir missing, cluster will be empty");
            Vec::new()
        };
        let cluster = ClusterAssembler::new(self.registry, &self.config.overrides).assemble(
            branding,
            &output_dir,
            &candidates,
            inputs,
        )?;

        let etc_dir = output_dir.join("etc");
        fsutil::ensure_dir(&etc_dir)?;
        let clusters = write_clusters_file(
            &output_dir,
            &etc_dir.join(format!("{branding}.clusters")),
            self.config.etc_clusters_file.as_deref(),
        )?;

        let template = self
            .config
            .etc_conf_file
            .clone()
            .unwrap_or_else(|| netbeans_dir.join("harness").join("etc").join("app.conf"));
        write_conf_file(&template, &etc_dir.join(format!("{branding}.conf")), branding)?;

        let launchers = install_launchers(
            branding,
            &output_dir.join("bin"),
            self.config.bin_dir.as_deref(),
            netbeans_dir,
        )?;

        Ok(ApplicationReport {
            output_dir,
            platform_files_copied,
            cluster,
            clusters,
            launchers,
        })
    }
}

/// Mirrors `<netbeans_dir>/platform` into `<output_dir>/platform`, copying
/// only files that are missing or older than their source.
pub fn copy_platform(
    netbeans_dir: &Path,
    output_dir: &Path,
    inputs: &IncrementalInputs,
) -> Result<usize> {
    let source_root = netbeans_dir.join("platform");
    let target_root = output_dir.join("platform");
    fsutil::ensure_dir(&target_root)?;
    if !source_root.is_dir() {
        bail!("NetBeans platform not found: {}", source_root.display());
    }

    let walker = WalkBuilder::new(&source_root)
        .hidden(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .ignore(false)
        .parents(false)
        .build();

    let mut copied = 0usize;
    for entry in walker {
        let entry = entry.with_context(|| format!("Failed to walk {}", source_root.display()))?;
        let source = entry.path();
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let relative = source
            .strip_prefix(&source_root)
            .with_context(|| format!("Unexpected path outside platform: {}", source.display()))?;
        if relative == Path::new(MARKER_FILE) {
            continue;
        }

        let target = target_root.join(relative);
        if !gate::target_is_stale(inputs, source, &target) {
            continue;
        }
        if let Some(parent) = target.parent() {
            fsutil::ensure_dir(parent)?;
        }
        gate::copy_preserving_mtime(source, &target)?;
        copied += 1;
    }

    FreshnessMarker::in_dir(&target_root).touch()?;
    tracing::info!(copied, platform = %target_root.display(), "platform cluster copied");
    Ok(copied)
}

/// Writes `etc/<branding>.clusters` and returns the listed cluster names.
///
/// A supplied file is copied verbatim; otherwise every child directory of
/// `output_dir` carrying a freshness marker is listed.
pub fn write_clusters_file(
    output_dir: &Path,
    target: &Path,
    supplied: Option<&Path>,
) -> Result<Vec<String>> {
    let content = match supplied {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read clusters file: {}", path.display()))?,
        None => {
            let mut names = Vec::new();
            let entries = std::fs::read_dir(output_dir)
                .with_context(|| format!("Failed to list {}", output_dir.display()))?;
            for entry in entries {
                let path = entry
                    .with_context(|| format!("Failed to list {}", output_dir.display()))?
                    .path();
                if path.is_dir() && path.join(MARKER_FILE).exists() {
                    names.push(path.file_name().unwrap_or_default().to_string_lossy().to_string());
                }
            }
            names.sort();
            names.iter().map(|n| format!("{n}\n")).collect()
        }
    };

    fsutil::write_atomic(target, content.as_bytes())?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

pub fn write_conf_file(template: &Path, target: &Path, branding: &str) -> Result<()> {
    let text = std::fs::read_to_string(template)
        .with_context(|| format!("Failed to read conf template: {}", template.display()))?;
    fsutil::write_atomic(target, text.replace(BRANDING_PLACEHOLDER, branding).as_bytes())
}

/// Copies the launchers into `bin/` under branded names and makes every
/// file there executable.
pub fn install_launchers(
    branding: &str,
    bin_dir: &Path,
    custom_dir: Option<&Path>,
    netbeans_dir: &Path,
) -> Result<Vec<PathBuf>> {
    fsutil::ensure_dir(bin_dir)?;
    let dest_exe64 = bin_dir.join(format!("{branding}64.exe"));
    let dest_sh = bin_dir.join(branding);

    let mut installed = Vec::new();
    match custom_dir {
        Some(dir) => {
            if !dir.is_dir() {
                bail!("Parameter 'bin_dir' has to point to an existing folder: {}", dir.display());
            }
            let entries =
                std::fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))?;
            let mut sources: Vec<PathBuf> = Vec::new();
            for entry in entries {
                let path = entry
                    .with_context(|| format!("Failed to list {}", dir.display()))?
                    .path();
                let name = path.file_name().unwrap_or_default().to_string_lossy();
                if path.is_file() && name.starts_with("app") {
                    sources.push(path.clone());
                }
            }
            sources.sort();
            for source in sources {
                let name = source.file_name().unwrap_or_default().to_string_lossy().to_string();
                let dest = if name.ends_with("64.exe") {
                    &dest_exe64
                } else if !name.contains('.') || name.ends_with(".sh") {
                    &dest_sh
                } else {
                    continue;
                };
                copy_launcher(&source, dest)?;
                installed.push(dest.clone());
            }
        }
        None => {
            let harness = netbeans_dir.join("harness").join("launchers");
            for (source, dest) in [
                (harness.join("app64.exe"), &dest_exe64),
                (harness.join("app.sh"), &dest_sh),
            ] {
                if source.is_file() {
                    copy_launcher(&source, dest)?;
                    installed.push(dest.clone());
                }
            }
        }
    }

    let entries =
        std::fs::read_dir(bin_dir).with_context(|| format!("Failed to list {}", bin_dir.display()))?;
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to list {}", bin_dir.display()))?
            .path();
        if path.is_file() {
            fsutil::make_executable(&path)?;
        }
    }

    installed.dedup();
    Ok(installed)
}

fn copy_launcher(source: &Path, dest: &Path) -> Result<()> {
    std::fs::copy(source, dest).with_context(|| {
        format!("Failed to copy launcher {} -> {}", source.display(), dest.display())
    })?;
    Ok(())
}
