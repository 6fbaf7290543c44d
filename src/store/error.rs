use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to open database '{0}'")]
    Open(PathBuf, #[source] rusqlite::Error),

    #[error("Failed to create database directory '{0}'")]
    CreateDir(PathBuf, #[source] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to serialise forecast structure for entity {entity_id}")]
    Serialise {
        entity_id: i64,
        #[source]
        source: serde_json::Error,
    },

    #[error("Stored JSON for entity {entity_id} is corrupt")]
    CorruptJson {
        entity_id: i64,
        #[source]
        source: serde_json::Error,
    },
}
