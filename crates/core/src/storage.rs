//! Transactional storage for meshid.
//!
//! This module provides the two storage collaborators the identity service is
//! built on:
//! - [`Database`]: a SQLite connection (WAL mode) whose only access path is
//!   [`Database::transaction`], which begins a transaction, runs one unit of
//!   work, and commits it or rolls it back on error
//! - [`PersistentMap`]: an append-oriented key-value table with an in-memory
//!   read-through cache in front of it
//!
//! # Guarantees
//!
//! - Serialized access: one transaction at a time per database, so
//!   check-then-insert sequences inside a transaction are atomic
//! - Stable snapshots: [`PersistentMap::snapshot_all`] reads inside a single
//!   transaction and never observes writes that begin after it
//! - Cache hygiene: cache entries are only filled by post-commit hooks, so a
//!   rolled-back write never becomes visible through the cache
//! - No deletes: maps expose no removal operation

use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Transaction};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt key in table {table}: {key}")]
    CorruptKey { table: String, key: String },

    #[error("Invalid table name: {0}")]
    InvalidTableName(String),

    #[error("Storage lock poisoned")]
    LockPoisoned,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Transaction counters for a [`Database`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Transactions started
    pub transactions_total: u64,
    /// Transactions rolled back because the unit of work failed
    pub rollbacks_total: u64,
}

#[derive(Debug, Default)]
struct DatabaseCounters {
    transactions: AtomicU64,
    rollbacks: AtomicU64,
}

/// SQLite-backed transactional scope.
pub struct Database {
    conn: Mutex<Connection>,
    label: String,
    counters: DatabaseCounters,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("label", &self.label)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Create or open a database at the specified path.
    ///
    /// Parent directories are created when missing. The database is switched
    /// to WAL journaling for durability.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let path = path.as_ref();

        info!(path = %path.display(), "Opening database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        Ok(Self::from_connection(conn, path.display().to_string()))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::from_connection(conn, ":memory:".to_string()))
    }

    fn from_connection(conn: Connection, label: String) -> Self {
        Self {
            conn: Mutex::new(conn),
            label,
            counters: DatabaseCounters::default(),
        }
    }

    /// Run `work` inside one transaction.
    ///
    /// The transaction commits when `work` returns `Ok` and rolls back when it
    /// returns `Err`. Hooks registered through [`Tx::after_commit`] run only
    /// after a successful commit, while the database is still held.
    ///
    /// Transactions do not nest: calling `transaction` from inside `work`
    /// deadlocks.
    pub fn transaction<T, E, F>(&self, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut Tx<'_>) -> Result<T, E>,
        E: From<StorageError>,
    {
        let mut conn = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        let inner = conn.transaction().map_err(StorageError::from)?;
        self.counters.transactions.fetch_add(1, Ordering::Relaxed);

        let mut tx = Tx {
            inner,
            after_commit: Vec::new(),
        };

        match work(&mut tx) {
            Ok(value) => {
                let Tx {
                    inner,
                    after_commit,
                } = tx;
                inner.commit().map_err(StorageError::from)?;
                for hook in after_commit {
                    hook();
                }
                Ok(value)
            }
            Err(err) => {
                self.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
                if let Err(rollback_err) = tx.inner.rollback() {
                    warn!(
                        database = %self.label,
                        error = %rollback_err,
                        "Rollback failed"
                    );
                }
                debug!(database = %self.label, "Transaction rolled back");
                Err(err)
            }
        }
    }

    /// Transaction counters since the database was opened.
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            transactions_total: self.counters.transactions.load(Ordering::Relaxed),
            rollbacks_total: self.counters.rollbacks.load(Ordering::Relaxed),
        }
    }
}

/// An open transaction handed to a unit of work.
pub struct Tx<'c> {
    inner: Transaction<'c>,
    after_commit: Vec<Box<dyn FnOnce() + 'c>>,
}

impl<'c> Tx<'c> {
    /// The underlying connection, scoped to this transaction.
    pub fn connection(&self) -> &Connection {
        &self.inner
    }

    /// Register a hook that runs once this transaction has committed.
    pub fn after_commit(&mut self, hook: impl FnOnce() + 'c) {
        self.after_commit.push(Box::new(hook));
    }
}

/// Keys usable in a [`PersistentMap`]; stored in their `Display` form.
pub trait MapKey: Clone + Eq + Hash + fmt::Display + FromStr + Send + Sync + 'static {}

impl<T> MapKey for T where T: Clone + Eq + Hash + fmt::Display + FromStr + Send + Sync + 'static {}

/// Result of [`PersistentMap::insert_if_absent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome<V> {
    /// The value was stored
    Inserted,
    /// The key was already present; the stored value is returned unchanged
    Existing(V),
}

/// Counters for a single [`PersistentMap`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MapStats {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub inserts: u64,
    pub duplicate_inserts: u64,
    pub snapshots: u64,
}

#[derive(Debug, Default)]
struct MapCounters {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    inserts: AtomicU64,
    duplicate_inserts: AtomicU64,
    snapshots: AtomicU64,
}

/// Default number of entries a [`PersistentMap`] keeps in memory.
pub const DEFAULT_CACHE_CAPACITY: usize = 1024;

/// A persistent key-value table with a read-through cache.
///
/// Values are stored as JSON text. Every operation takes the [`Tx`] it runs
/// in, so several maps can be updated atomically. The cache holds at most
/// `cache_capacity` entries; when full, an arbitrary entry is evicted to make
/// room, and evicted entries are read back from the table on demand.
pub struct PersistentMap<K, V> {
    table: String,
    cache: Arc<RwLock<HashMap<K, V>>>,
    cache_capacity: usize,
    counters: Arc<MapCounters>,
}

impl<K, V> fmt::Debug for PersistentMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentMap")
            .field("table", &self.table)
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

impl<K, V> PersistentMap<K, V>
where
    K: MapKey,
    V: Serialize + DeserializeOwned + Clone + PartialEq + Send + Sync + 'static,
{
    /// Create the backing table if needed and return a handle to it.
    pub fn create(db: &Database, table: &str) -> StorageResult<Self> {
        if table.is_empty()
            || !table
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return Err(StorageError::InvalidTableName(table.to_string()));
        }

        db.transaction(|tx| {
            tx.connection().execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    map_key TEXT PRIMARY KEY NOT NULL,
                    map_value TEXT NOT NULL
                );"
            ))?;
            Ok::<_, StorageError>(())
        })?;

        Ok(Self {
            table: table.to_string(),
            cache: Arc::new(RwLock::new(HashMap::new())),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            counters: Arc::new(MapCounters::default()),
        })
    }

    /// Bound the cache to `capacity` entries. Zero disables caching.
    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Entries currently held in memory.
    pub fn cached_len(&self) -> usize {
        self.cache.read().map(|cache| cache.len()).unwrap_or_default()
    }

    /// Name of the backing table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Look up a value, consulting the cache first.
    pub fn get(&self, tx: &mut Tx<'_>, key: &K) -> StorageResult<Option<V>> {
        if let Some(value) = self.cached(key)? {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(value));
        }
        self.counters.cache_misses.fetch_add(1, Ordering::Relaxed);

        let raw: Option<String> = tx
            .connection()
            .query_row(
                &format!("SELECT map_value FROM {} WHERE map_key = ?1", self.table),
                params![key.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match raw {
            Some(raw) => {
                let value: V = serde_json::from_str(&raw)?;
                self.cache_on_commit(tx, key.clone(), value.clone());
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Store `value` unless `key` is already present.
    pub fn insert_if_absent(
        &self,
        tx: &mut Tx<'_>,
        key: K,
        value: V,
    ) -> StorageResult<InsertOutcome<V>> {
        if let Some(existing) = self.get(tx, &key)? {
            self.counters
                .duplicate_inserts
                .fetch_add(1, Ordering::Relaxed);
            return Ok(InsertOutcome::Existing(existing));
        }

        let raw = serde_json::to_string(&value)?;
        tx.connection().execute(
            &format!(
                "INSERT INTO {} (map_key, map_value) VALUES (?1, ?2)",
                self.table
            ),
            params![key.to_string(), raw],
        )?;
        self.counters.inserts.fetch_add(1, Ordering::Relaxed);
        self.cache_on_commit(tx, key, value);

        Ok(InsertOutcome::Inserted)
    }

    /// Store `value` unless `key` is already present, tolerating the duplicate.
    ///
    /// The first stored value always wins. Returns `true` when the value was
    /// inserted.
    pub fn insert_allowing_duplicates(
        &self,
        tx: &mut Tx<'_>,
        key: K,
        value: V,
    ) -> StorageResult<bool> {
        let key_text = key.to_string();
        match self.insert_if_absent(tx, key, value.clone())? {
            InsertOutcome::Inserted => Ok(true),
            InsertOutcome::Existing(existing) => {
                if existing != value {
                    warn!(
                        table = %self.table,
                        key = %key_text,
                        "Double insert with a different value, keeping the first"
                    );
                } else {
                    debug!(table = %self.table, key = %key_text, "Double insert ignored");
                }
                Ok(false)
            }
        }
    }

    /// Store `value` unconditionally, replacing any previous value.
    pub fn set(&self, tx: &mut Tx<'_>, key: K, value: V) -> StorageResult<()> {
        let raw = serde_json::to_string(&value)?;
        tx.connection().execute(
            &format!(
                "INSERT OR REPLACE INTO {} (map_key, map_value) VALUES (?1, ?2)",
                self.table
            ),
            params![key.to_string(), raw],
        )?;
        self.counters.inserts.fetch_add(1, Ordering::Relaxed);
        self.cache_on_commit(tx, key, value);
        Ok(())
    }

    /// All entries ordered by key, read inside the caller's transaction.
    pub fn snapshot_all(&self, tx: &mut Tx<'_>) -> StorageResult<Vec<(K, V)>> {
        self.counters.snapshots.fetch_add(1, Ordering::Relaxed);

        let mut stmt = tx.connection().prepare(&format!(
            "SELECT map_key, map_value FROM {} ORDER BY map_key ASC",
            self.table
        ))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(raw_key, raw_value)| {
                let key = raw_key.parse::<K>().map_err(|_| StorageError::CorruptKey {
                    table: self.table.clone(),
                    key: raw_key.clone(),
                })?;
                let value = serde_json::from_str(&raw_value)?;
                Ok((key, value))
            })
            .collect()
    }

    /// Number of stored entries.
    pub fn len(&self, tx: &mut Tx<'_>) -> StorageResult<usize> {
        let count: i64 = tx.connection().query_row(
            &format!("SELECT COUNT(*) FROM {}", self.table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn stats(&self) -> MapStats {
        MapStats {
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.counters.cache_misses.load(Ordering::Relaxed),
            inserts: self.counters.inserts.load(Ordering::Relaxed),
            duplicate_inserts: self.counters.duplicate_inserts.load(Ordering::Relaxed),
            snapshots: self.counters.snapshots.load(Ordering::Relaxed),
        }
    }

    fn cached(&self, key: &K) -> StorageResult<Option<V>> {
        let cache = self.cache.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(cache.get(key).cloned())
    }

    fn cache_on_commit(&self, tx: &mut Tx<'_>, key: K, value: V) {
        let capacity = self.cache_capacity;
        if capacity == 0 {
            return;
        }
        let cache = Arc::clone(&self.cache);
        tx.after_commit(move || {
            if let Ok(mut cache) = cache.write() {
                if cache.len() >= capacity && !cache.contains_key(&key) {
                    if let Some(evicted) = cache.keys().next().cloned() {
                        cache.remove(&evicted);
                    }
                }
                cache.insert(key, value);
            }
        });
    }
}
