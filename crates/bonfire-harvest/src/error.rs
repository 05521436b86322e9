//! Run-level error taxonomy.
//!
//! Only failures that abort a whole harvest run are represented here.
//! Transient fetch failures and malformed records are absorbed by the
//! discovery and harvest layers and never surface as a `HarvestError`.

use std::path::PathBuf;

/// Errors that end a harvest run.
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    #[error("browser unavailable: {0}")]
    Browser(String),

    #[error("login failed: {0}")]
    Login(String),

    #[error("failed to write {path}: {source}")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type HarvestResult<T> = Result<T, HarvestError>;
