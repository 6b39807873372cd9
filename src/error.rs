//! Unified error type for the index cache.

use thiserror::Error;

/// All errors that can occur while loading, checking or querying cached indexes.
#[derive(Error, Debug)]
pub enum CacheError {
    /// I/O error (file read/write, directory access)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error (bincode)
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Metadata sidecar absent (index never built, or removed out-of-band)
    #[error("Index metadata not found: {path}")]
    MetadataMissing { path: String },

    /// Metadata sidecar present but unreadable as an index record
    #[error("Index metadata is corrupt at {path}: {message}")]
    MetadataCorrupt { path: String, message: String },

    /// Payload could not be opened or mapped
    #[error("Failed to open index {path}: {message}")]
    Open { path: String, message: String },

    /// A multi-handle load failed; the entry was left empty
    #[error("Index unavailable for '{project}': {source}. Reindex required: cidx publish --project {project} --input <records.jsonl>")]
    Load {
        project: String,
        #[source]
        source: Box<CacheError>,
    },

    /// Invalid query request (bad vector dimension, empty terms, etc.)
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Mutually exclusive flags or other argument validation error
    #[error("{0}")]
    InvalidArgs(String),

    /// Publishing a new index generation failed
    #[error("Failed to publish index at {path}: {message}")]
    Publish { path: String, message: String },
}

impl CacheError {
    /// Wrap an open/metadata failure as a load failure for `project`.
    pub fn load(project: impl Into<String>, source: CacheError) -> Self {
        CacheError::Load {
            project: project.into(),
            source: Box::new(source),
        }
    }

    /// Build an [`CacheError::Open`] from a path and any displayable cause.
    pub fn open(path: &std::path::Path, message: impl std::fmt::Display) -> Self {
        CacheError::Open {
            path: path.display().to_string(),
            message: message.to_string(),
        }
    }
}
