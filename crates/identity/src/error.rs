//! Error types for meshid identity operations.
//!
//! Verification failures, ownership failures, lifecycle misuse and storage
//! failures all surface through [`IdentityError`]. Lookups never use it to
//! signal absence; they return `Ok(None)` or an empty collection instead.

use thiserror::Error;

/// Errors that can occur in identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// A certificate on the path is past its `notAfter` time
    #[error("Certificate expired: {subject} (not after {not_after})")]
    CertificateExpired { subject: String, not_after: i64 },

    /// A certificate on the path is before its `notBefore` time
    #[error("Certificate not yet valid: {subject} (not before {not_before})")]
    CertificateNotYetValid { subject: String, not_before: i64 },

    /// Broken issuer linkage, bad signature, or illegal algorithm parameters
    #[error("Invalid trust path: {0}")]
    InvalidTrustPath(String),

    /// No well-known identity could be resolved for an anonymous key
    #[error("Unknown anonymous party: {0}")]
    UnknownAnonymousParty(String),

    /// Operation attempted before the trust anchor was set
    #[error("Identity service is not initialized")]
    Uninitialized,

    /// The trust anchor was already set
    #[error("Identity service is already initialized")]
    AlreadyInitialized,

    /// DER or PEM input could not be decoded
    #[error("Certificate parse error: {0}")]
    CertificateParse(String),

    /// The leaf certificate carries no usable legal name
    #[error("Missing legal name: {0}")]
    MissingLegalName(String),

    /// X.500 name syntax or attribute errors
    #[error("Invalid X.500 name: {0}")]
    InvalidName(String),

    /// Storage errors
    #[error("Storage error: {0}")]
    Storage(#[from] meshid_core::StorageError),
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
