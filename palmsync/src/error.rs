//! Errors local to the sync engine and conduit dispatcher, distinct from
//! the wire-protocol taxonomy in `palm_proto::error`.

use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Protocol(#[from] palm_proto::Error),

    #[error("failed to read config {path}: {source}")]
    ConfigRead { path: PathBuf, #[source] source: io::Error },

    #[error("malformed config {path}: {source}")]
    ConfigParse { path: PathBuf, #[source] source: toml::de::Error },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid escaped filename: {0}")]
    BadFilename(String),

    #[error("conduit {path} exited with status {status}")]
    ConduitFailed { path: String, status: u16 },

    #[error("conduit {path} produced a malformed status line: {line:?}")]
    MalformedStatus { path: String, line: String },

    #[error("device identity mismatch: expected {expected}, got {actual}")]
    IdentityMismatch { expected: String, actual: String },
}

pub type Result<T> = std::result::Result<T, SyncError>;
