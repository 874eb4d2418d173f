//! Staleness decisions shared by jar collection and cluster assembly.
//!
//! A target is regenerated when it is missing, when the reference time (the
//! target's own mtime or a directory marker's) is older than the source, or
//! when the host build reported the source as out of date.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const MARKER_FILE: &str = ".lastModified";

/// Change report handed over by the host build's incremental tracker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalInputs {
    /// File names (not paths) of inputs that changed since the last run.
    #[serde(default)]
    pub out_of_date: HashSet<String>,
    #[serde(default)]
    pub removed: HashSet<PathBuf>,
}

impl IncrementalInputs {
    pub fn is_out_of_date(&self, source: &Path) -> bool {
        source
            .file_name()
            .is_some_and(|n| self.out_of_date.contains(n.to_string_lossy().as_ref()))
    }
}

pub fn modified(path: &Path) -> Option<SystemTime> {
    path.metadata().and_then(|m| m.modified()).ok()
}

/// `reference` is the time the target was last known to be good; `None`
/// means unknown and always counts as stale.
pub fn needs_regeneration(
    inputs: &IncrementalInputs,
    source: &Path,
    target: &Path,
    reference: Option<SystemTime>,
) -> bool {
    if !target.exists() || inputs.is_out_of_date(source) {
        return true;
    }
    match (reference, modified(source)) {
        (Some(reference), Some(source_time)) => reference < source_time,
        _ => true,
    }
}

pub fn target_is_stale(inputs: &IncrementalInputs, source: &Path, target: &Path) -> bool {
    needs_regeneration(inputs, source, target, modified(target))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessMarker {
    path: PathBuf,
}

impl FreshnessMarker {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            path: dir.join(MARKER_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn modified(&self) -> Option<SystemTime> {
        modified(&self.path)
    }

    /// Creates the marker or bumps its mtime to now. Call only after every
    /// staleness decision of the run has been read.
    pub fn touch(&self) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to create marker: {}", self.path.display()))?;
        file.set_modified(SystemTime::now())
            .with_context(|| format!("Failed to touch marker: {}", self.path.display()))?;
        Ok(())
    }
}

/// Copies `source` to `target` carrying over the source mtime. The copy goes
/// through a temp file and only appears under `target` once the timestamp is
/// in place.
pub fn copy_preserving_mtime(source: &Path, target: &Path) -> Result<()> {
    let tmp = crate::fsutil::temp_sibling(target);
    std::fs::copy(source, &tmp).with_context(|| {
        format!(
            "Failed to copy {} -> {}",
            source.display(),
            tmp.display()
        )
    })?;

    let result = (|| -> Result<()> {
        let mtime = source
            .metadata()
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to stat {}", source.display()))?;
        File::options()
            .write(true)
            .open(&tmp)
            .and_then(|f| f.set_modified(mtime))
            .with_context(|| format!("Failed to set mtime on {}", tmp.display()))?;
        std::fs::rename(&tmp, target)
            .with_context(|| format!("Failed to move copy into place: {}", target.display()))?;
        Ok(())
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}
