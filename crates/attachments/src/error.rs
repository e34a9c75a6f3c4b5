//! Error types for attachment storage.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AttachmentError {
    /// Identical content is already stored under this id
    #[error("Duplicate attachment: {id}")]
    DuplicateAttachment { id: String },

    /// Content exceeds the configured size limit
    #[error("Attachment too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("Storage error: {0}")]
    Storage(#[from] meshid_core::StorageError),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AttachmentResult<T> = Result<T, AttachmentError>;
