//! Configuration management for meshid.
//!
//! A node is configured from a single TOML file:
//!
//! ```toml
//! [node]
//! legal_name = "O=Alice Corp, L=London, C=GB"
//! data_dir = "./data"
//!
//! [trust]
//! root_certificate = "certs/root.pem"
//! intermediate_certificates = ["certs/intermediate.pem"]
//!
//! [network]
//! notary_identities = ["certs/notary.pem"]
//!
//! [identity]
//! identities = ["certs/alice.pem"]
//! confidential_identities = []
//!
//! [attachments]
//! max_size_bytes = 10485760
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, CoreResult};

/// File name of the identity database inside `data_dir`.
pub const IDENTITY_DB_FILE: &str = "identity.db";

/// File name of the attachment database inside `data_dir`.
pub const ATTACHMENT_DB_FILE: &str = "attachments.db";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub node: NodeConfig,
    pub trust: TrustConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub attachments: AttachmentsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// X.500 legal name this node operates under
    pub legal_name: String,
    /// Directory holding the node's databases
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// PEM file containing the network trust root
    pub root_certificate: PathBuf,
    /// PEM files containing intermediate CA certificates
    #[serde(default)]
    pub intermediate_certificates: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// PEM chain files, one per notary identity
    #[serde(default)]
    pub notary_identities: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    /// PEM chain files of well-known identities loaded at startup
    #[serde(default)]
    pub identities: Vec<PathBuf>,
    /// PEM chain files of confidential identities loaded at startup
    #[serde(default)]
    pub confidential_identities: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachmentsConfig {
    /// Largest attachment accepted, in bytes
    #[serde(default = "default_max_attachment_size")]
    pub max_size_bytes: u64,
}

impl Default for AttachmentsConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_attachment_size(),
        }
    }
}

fn default_max_attachment_size() -> u64 {
    10 * 1024 * 1024
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            node: NodeConfig {
                legal_name: "O=meshid node, L=London, C=GB".to_string(),
                data_dir: PathBuf::from("./data"),
            },
            trust: TrustConfig {
                root_certificate: PathBuf::from("certs/root.pem"),
                intermediate_certificates: Vec::new(),
            },
            network: NetworkConfig::default(),
            identity: IdentityConfig::default(),
            attachments: AttachmentsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Path of the identity registry database.
    pub fn identity_db_path(&self) -> PathBuf {
        self.node.data_dir.join(IDENTITY_DB_FILE)
    }

    /// Path of the attachment store database.
    pub fn attachment_db_path(&self) -> PathBuf {
        self.node.data_dir.join(ATTACHMENT_DB_FILE)
    }

    fn validate(&self) -> CoreResult<()> {
        if self.node.legal_name.trim().is_empty() {
            return Err(CoreError::Config("node.legal_name cannot be empty".to_string()));
        }
        if self.trust.root_certificate.as_os_str().is_empty() {
            return Err(CoreError::Config(
                "trust.root_certificate cannot be empty".to_string(),
            ));
        }
        if self.attachments.max_size_bytes == 0 {
            return Err(CoreError::Config(
                "attachments.max_size_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
