//! Identity registry for meshid network participants.
//!
//! This crate maps public keys to verified X.509 certificate chains and legal
//! names, and resolves anonymous keys back to the well-known parties that own
//! them.
//!
//! # Core Concepts
//!
//! - **Identity**: a public key bound to a leaf-first certificate chain and
//!   the legal name of its leaf
//! - **Trust Context**: the trust anchor plus intermediate store every chain
//!   is validated against
//! - **Well-known party**: an identity holding the name index entry for its
//!   legal name
//! - **Confidential identity**: a key registered without a name entry, issued
//!   by a well-known party's certificate
//!
//! # Lifecycle
//!
//! An [`IdentityRegistry`] is opened on a [`meshid_core::Database`] and is
//! inert until [`IdentityRegistry::start`] installs the [`TrustContext`] and
//! the notary parties. From then on it accepts registrations and lookups for
//! the life of the process.

pub mod certificate;
pub mod error;
pub mod identity;
pub mod loader;
pub mod name;
pub mod notary;
pub mod pki;
pub mod registry;

pub use certificate::{CertRole, Certificate, CERT_ROLE_OID};
pub use error::{IdentityError, IdentityResult};
pub use identity::{AnonymousParty, Identity, Party};
pub use loader::LoadSummary;
pub use name::X500Name;
pub use notary::NotaryIdentityCache;
pub use pki::{
    CertPathValidator, CertStore, PathValidationError, TrustContext, X509PathValidator,
    MAX_PATH_LENGTH,
};
pub use registry::{IdentityRegistry, RegistryStats};

// Re-export key types for convenience
pub use meshid_crypto::{Fingerprint, PublicKey};
