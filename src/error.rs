use crate::config::ConfigError;
use crate::store::error::StoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that abort a whole command. Per-entity problems never end up here; they
/// are reported through [`crate::RunSummary`].
#[derive(Debug, Error)]
pub enum EtlError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to build HTTP client")]
    HttpClient(#[source] reqwest::Error),

    #[error("Entity {0} is not in the catalog")]
    EntityNotFound(i64),

    #[error("An observation date and forecast-only cannot be combined")]
    ConflictingRunModes,

    #[error("Failed to write raw payload '{0}'")]
    RawDump(PathBuf, #[source] std::io::Error),

    #[error("Failed to serialise raw payload '{0}'")]
    RawDumpJson(PathBuf, #[source] serde_json::Error),
}
