//! Attachment storage backed by the meshid SQLite database.

use rusqlite::{params, OptionalExtension};
use std::io::Read;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

use meshid_core::{Database, Tx};
use meshid_crypto::SecureHash;

use crate::error::{AttachmentError, AttachmentResult};

/// Attachments are addressed by the BLAKE3 hash of their content.
pub type AttachmentId = SecureHash;

/// Table holding attachment content and metadata.
pub const ATTACHMENT_TABLE: &str = "attachments";

/// Default upper bound on attachment size (10 MiB).
pub const DEFAULT_MAX_ATTACHMENT_SIZE: u64 = 10 * 1024 * 1024;

/// A stored attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub id: AttachmentId,
    pub content: Vec<u8>,
    pub uploader: String,
    pub filename: Option<String>,
    /// Unix seconds at which the attachment was imported
    pub inserted_at: i64,
}

pub trait AttachmentStorage {
    /// Store `content` and return its id, failing with
    /// [`AttachmentError::DuplicateAttachment`] if it is already present.
    fn import_attachment<R: Read>(
        &self,
        content: R,
        uploader: &str,
        filename: Option<&str>,
    ) -> AttachmentResult<AttachmentId>;

    /// Store `content` unless it is already present; either way return its id.
    fn import_or_get_attachment<R: Read>(
        &self,
        content: R,
        uploader: &str,
        filename: Option<&str>,
    ) -> AttachmentResult<AttachmentId>;

    fn open_attachment(&self, id: &AttachmentId) -> AttachmentResult<Option<Attachment>>;

    fn has_attachment(&self, id: &AttachmentId) -> AttachmentResult<bool>;

    /// Every stored attachment as `(filename, content)`, oldest first.
    fn get_all_attachments(&self) -> AttachmentResult<Vec<(Option<String>, Vec<u8>)>>;
}

/// [`AttachmentStorage`] on a [`Database`].
#[derive(Debug)]
pub struct SqliteAttachmentStorage {
    db: Arc<Database>,
    max_size: u64,
}

impl SqliteAttachmentStorage {
    pub fn open(db: Arc<Database>) -> AttachmentResult<Self> {
        Self::with_max_size(db, DEFAULT_MAX_ATTACHMENT_SIZE)
    }

    pub fn with_max_size(db: Arc<Database>, max_size: u64) -> AttachmentResult<Self> {
        db.transaction(|tx| {
            tx.connection().execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {ATTACHMENT_TABLE} (
                    att_id TEXT PRIMARY KEY NOT NULL,
                    content BLOB NOT NULL,
                    uploader TEXT NOT NULL,
                    filename TEXT,
                    inserted_at INTEGER NOT NULL
                );"
            ))?;
            Ok::<_, AttachmentError>(())
        })?;

        info!(max_size, "Attachment storage opened");
        Ok(Self { db, max_size })
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    fn read_content<R: Read>(&self, reader: R) -> AttachmentResult<Vec<u8>> {
        let mut content = Vec::new();
        reader
            .take(self.max_size.saturating_add(1))
            .read_to_end(&mut content)?;
        let size = content.len() as u64;
        if size > self.max_size {
            return Err(AttachmentError::TooLarge {
                size,
                limit: self.max_size,
            });
        }
        Ok(content)
    }

    fn import<R: Read>(
        &self,
        reader: R,
        uploader: &str,
        filename: Option<&str>,
        allow_existing: bool,
    ) -> AttachmentResult<AttachmentId> {
        let content = self.read_content(reader)?;
        let id = AttachmentId::blake3(&content);

        self.db.transaction(|tx| {
            if exists(tx, &id)? {
                if allow_existing {
                    debug!(attachment_id = %id, "Attachment already stored");
                    return Ok(id);
                }
                return Err(AttachmentError::DuplicateAttachment { id: id.to_hex() });
            }

            tx.connection().execute(
                &format!(
                    "INSERT INTO {ATTACHMENT_TABLE} (att_id, content, uploader, filename, inserted_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)"
                ),
                params![id.to_hex(), content, uploader, filename, unix_now()],
            )?;
            info!(
                attachment_id = %id,
                uploader = %uploader,
                size = content.len(),
                "Attachment imported"
            );
            Ok(id)
        })
    }
}

impl AttachmentStorage for SqliteAttachmentStorage {
    fn import_attachment<R: Read>(
        &self,
        content: R,
        uploader: &str,
        filename: Option<&str>,
    ) -> AttachmentResult<AttachmentId> {
        self.import(content, uploader, filename, false)
    }

    fn import_or_get_attachment<R: Read>(
        &self,
        content: R,
        uploader: &str,
        filename: Option<&str>,
    ) -> AttachmentResult<AttachmentId> {
        self.import(content, uploader, filename, true)
    }

    fn open_attachment(&self, id: &AttachmentId) -> AttachmentResult<Option<Attachment>> {
        self.db.transaction(|tx| {
            let row = tx
                .connection()
                .query_row(
                    &format!(
                        "SELECT content, uploader, filename, inserted_at
                         FROM {ATTACHMENT_TABLE} WHERE att_id = ?1"
                    ),
                    params![id.to_hex()],
                    |row| {
                        Ok(Attachment {
                            id: *id,
                            content: row.get(0)?,
                            uploader: row.get(1)?,
                            filename: row.get(2)?,
                            inserted_at: row.get(3)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    fn has_attachment(&self, id: &AttachmentId) -> AttachmentResult<bool> {
        self.db.transaction(|tx| exists(tx, id))
    }

    fn get_all_attachments(&self) -> AttachmentResult<Vec<(Option<String>, Vec<u8>)>> {
        self.db.transaction(|tx| {
            let mut stmt = tx.connection().prepare(&format!(
                "SELECT filename, content FROM {ATTACHMENT_TABLE}
                 ORDER BY inserted_at ASC, rowid ASC"
            ))?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}

fn exists(tx: &mut Tx<'_>, id: &AttachmentId) -> AttachmentResult<bool> {
    let found: Option<i64> = tx
        .connection()
        .query_row(
            &format!("SELECT 1 FROM {ATTACHMENT_TABLE} WHERE att_id = ?1"),
            params![id.to_hex()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}
