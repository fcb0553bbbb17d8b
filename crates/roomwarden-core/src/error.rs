//! Registry error types.

use std::path::PathBuf;

use crate::types::RecordId;
use crate::ids::UserId;

/// Failures surfaced by the registry.
///
/// A failed `commit` leaves both the in-memory state and the file exactly as
/// they were before the call.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to read registry {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write registry {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("registry file is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("room config {0} not found")]
    UnknownRoomConfig(RecordId),

    #[error("creator {creator_id} already owns a room for config {config_id}")]
    DuplicateRoom { config_id: RecordId, creator_id: UserId },

    #[error("invalid record: {0}")]
    Invalid(String),
}
