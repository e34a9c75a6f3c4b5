//! Cryptographic key and hash primitives for meshid.
//!
//! This crate provides the key material types the identity registry indexes
//! by, and the content hashes the attachment store addresses by.
//!
//! # Core Capabilities
//!
//! - **Public Keys**: opaque SubjectPublicKeyInfo DER encodings as carried in certificates
//! - **Fingerprints**: deterministic BLAKE3 digests of public keys, the registry primary key
//! - **Secure Hashes**: BLAKE3 content digests
//!
//! # Supported Algorithms
//!
//! - **Hashing**: BLAKE3 (exclusively for all integrity checks)
//!
//! Signature algorithms are whatever the certificate hierarchy uses; keys are
//! never interpreted here, only compared and hashed.

pub mod hash;
pub mod keys;

pub use hash::{HashError, SecureHash};
pub use keys::{Fingerprint, PublicKey};
