//! Content-addressed attachment storage for meshid nodes.
//!
//! Attachments are opaque byte blobs identified by the BLAKE3 hash of their
//! content. Storing the same content twice is rejected with
//! [`AttachmentError::DuplicateAttachment`] unless the caller asks for the
//! existing id instead.

pub mod error;
pub mod storage;

pub use error::{AttachmentError, AttachmentResult};
pub use storage::{
    Attachment, AttachmentId, AttachmentStorage, SqliteAttachmentStorage, ATTACHMENT_TABLE,
};
