//! Error types for the ATLAS index engine

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can abort an index computation
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("Invalid threshold curve for field '{field}': {reason}")]
    InvalidThreshold { field: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No weight configured for category '{0}'")]
    MissingWeight(String),

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Chunk {start} .. {end} failed: {source}")]
    ChunkFailed {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        #[source]
        source: Box<IndexError>,
    },
}

impl IndexError {
    /// Configuration errors are fatal for the whole run.
    pub fn is_config_error(&self) -> bool {
        match self {
            IndexError::InvalidThreshold { .. }
            | IndexError::InvalidConfig(_)
            | IndexError::MissingWeight(_)
            | IndexError::ConfigParse(_) => true,
            IndexError::ChunkFailed { source, .. } => source.is_config_error(),
            _ => false,
        }
    }

    /// Storage errors worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, IndexError::Fetch(_) | IndexError::Write(_))
    }

    pub(crate) fn threshold(field: &str, reason: impl Into<String>) -> Self {
        IndexError::InvalidThreshold {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}
