//! meshid node bootstrap.
//!
//! Opens the node's databases, builds the trust context from the configured
//! PEM files, starts the identity registry with the network's notaries and
//! bulk loads the locally trusted identities. Prints a JSON summary of the
//! resulting state on stdout.

use anyhow::{anyhow, bail, Context, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use meshid_attachments::{AttachmentStorage, SqliteAttachmentStorage};
use meshid_core::{logging, Config, Database};
use meshid_identity::{
    Certificate, Identity, IdentityRegistry, LoadSummary, TrustContext, X500Name,
};

const NODE_PROTOCOL_VERSION: u32 = 1;
const NODE_RUNTIME_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    runtime_version: u32,
    protocol_version: u32,
}

#[derive(Debug, Serialize)]
struct NodeSummary {
    legal_name: String,
    trust_root: String,
    notaries: Vec<String>,
    loaded: LoadSummary,
    registered_identities: usize,
    own_identity_registered: bool,
    attachments: usize,
}

#[derive(Debug, Serialize)]
struct IdentityListing {
    name: String,
    fingerprint: String,
    chain_length: usize,
    confidential: bool,
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|arg| arg == "--version-json") {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            runtime_version: NODE_RUNTIME_VERSION,
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    let config_path = parse_config_path(&args)?;
    let config = Config::from_file(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    logging::init_with(&config.logging);

    let legal_name: X500Name = config
        .node
        .legal_name
        .parse()
        .with_context(|| format!("invalid node.legal_name {:?}", config.node.legal_name))?;

    info!(
        legal_name = %legal_name,
        data_dir = %config.node.data_dir.display(),
        "Starting meshid node"
    );

    let registry = open_registry(&config)?;
    let loaded = load_identities(&registry, &config)?;

    let attachment_db = Arc::new(Database::open(config.attachment_db_path())?);
    let attachments = SqliteAttachmentStorage::with_max_size(
        attachment_db,
        config.attachments.max_size_bytes,
    )?;

    let identities = registry.list_all()?;
    let own_identity_registered = registry.lookup_by_name(&legal_name, true)?.is_some();
    if !own_identity_registered {
        warn!(legal_name = %legal_name, "Node legal identity is not registered");
    }

    if args.iter().any(|arg| arg == "--list-identities") {
        let listing: Vec<IdentityListing> = identities.iter().map(listing_entry).collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    let summary = NodeSummary {
        legal_name: legal_name.to_string(),
        trust_root: registry.trust_context()?.trust_anchor().subject().to_string(),
        notaries: registry
            .notaries()?
            .parties()
            .map(|party| party.to_string())
            .collect(),
        loaded,
        registered_identities: identities.len(),
        own_identity_registered,
        attachments: attachments.get_all_attachments()?.len(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);

    let stats = registry.stats();
    info!(
        transactions = stats.database.transactions_total,
        rollbacks = stats.database.rollbacks_total,
        "meshid node bootstrap complete"
    );
    Ok(())
}

fn open_registry(config: &Config) -> Result<IdentityRegistry> {
    let root = read_chain(&config.trust.root_certificate)?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("trust root file is empty"))?;
    let mut intermediates = Vec::new();
    for path in &config.trust.intermediate_certificates {
        intermediates.extend(read_chain(path)?);
    }
    let trust = TrustContext::initialize(root, intermediates)?;

    let mut notaries = Vec::new();
    for path in &config.network.notary_identities {
        let notary = trust
            .verify(&read_chain(path)?)
            .with_context(|| format!("notary identity {} failed verification", path.display()))?;
        notaries.push(notary.party());
    }

    let db = Arc::new(Database::open(config.identity_db_path())?);
    let registry = IdentityRegistry::open(db)?;
    registry.start(trust, notaries)?;
    Ok(registry)
}

fn load_identities(registry: &IdentityRegistry, config: &Config) -> Result<LoadSummary> {
    let identities = read_identities(&config.identity.identities)?;
    let confidential = read_identities(&config.identity.confidential_identities)?;
    Ok(registry.load_identities(&identities, &confidential)?)
}

fn read_identities(paths: &[PathBuf]) -> Result<Vec<Identity>> {
    paths
        .iter()
        .map(|path| {
            Identity::new(read_chain(path)?)
                .with_context(|| format!("building identity from {}", path.display()))
        })
        .collect()
}

fn read_chain(path: &Path) -> Result<Vec<Certificate>> {
    let pem = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Certificate::chain_from_pem(&pem).with_context(|| format!("parsing {}", path.display()))
}

fn listing_entry(identity: &Identity) -> IdentityListing {
    IdentityListing {
        name: identity.name().to_string(),
        fingerprint: identity.fingerprint().to_hex(),
        chain_length: identity.certificates().len(),
        confidential: identity.is_confidential(),
    }
}

fn parse_config_path(args: &[String]) -> Result<PathBuf> {
    let mut args_iter = args.iter();
    while let Some(arg) = args_iter.next() {
        if arg == "--config" {
            if let Some(path) = args_iter.next() {
                return Ok(PathBuf::from(path));
            }
            bail!("--config was provided without a path");
        }
    }

    bail!("missing required --config <path> argument")
}
