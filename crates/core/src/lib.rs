//! Core functionality for the meshid identity service.
//!
//! This crate provides the ambient pieces shared by every other meshid crate:
//! error types, configuration loading, logging initialization, and the
//! transactional storage layer the identity registry persists through.

pub mod config;
pub mod error;
pub mod logging;
pub mod storage;

pub use config::{
    AttachmentsConfig, Config, IdentityConfig, LogFormat, LoggingConfig, NetworkConfig,
    NodeConfig, TrustConfig,
};
pub use error::{CoreError, CoreResult};
pub use storage::{
    Database, DatabaseStats, InsertOutcome, MapKey, MapStats, PersistentMap, StorageError,
    StorageResult, Tx, DEFAULT_CACHE_CAPACITY,
};
