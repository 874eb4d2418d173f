use std::path::PathBuf;

/// Failures callers need to tell apart from plain I/O trouble.
///
/// These travel inside `anyhow::Error`; use `downcast_ref::<ClusterError>()`
/// to inspect them.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    #[error("Bundle {module} cannot be both eager and autoload.")]
    ConflictingLoadStrategy { module: String },

    #[error("Cannot fully read {}: expected {expected} bytes, read {actual}", path.display())]
    ShortRead {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("Invalid OpenIDE-Module-StartLevel {value:?} in {}", path.display())]
    InvalidStartLevel { path: PathBuf, value: String },

    #[error("Malformed manifest header at line {line}: {text:?}")]
    MalformedManifest { line: usize, text: String },

    #[error("Could not open {}: {reason}", path.display())]
    UnreadableArtifact { path: PathBuf, reason: String },

    #[error("Artifact is neither a file nor a directory: {}", path.display())]
    NotAnArtifact { path: PathBuf },
}
