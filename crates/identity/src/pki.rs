//! Public Key Infrastructure (PKI) for meshid identity verification.
//!
//! Provides the trust context (anchor plus intermediate store) and the
//! certificate path validation every registered identity must pass.
//!
//! Verification runs in three stages, stopping at the first failure:
//! 1. Structure: the chain is non-empty and each certificate's issuer is the
//!    subject of the next one
//! 2. Time: every certificate in the chain is inside its validity window
//! 3. Path: a [`CertPathValidator`] checks signatures, CA flags and algorithm
//!    parameters up to the trust anchor
//!
//! Only stage 3 touches cryptography, and it does so through the
//! [`CertPathValidator`] trait so the registry never depends on a particular
//! X.509 implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use x509_parser::certificate::X509Certificate;
use x509_parser::prelude::FromDer;

use crate::certificate::Certificate;
use crate::error::{IdentityError, IdentityResult};
use crate::identity::Identity;

/// Longest path the validator will build, anchor excluded.
pub const MAX_PATH_LENGTH: usize = 16;

/// Failures reported by a [`CertPathValidator`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathValidationError {
    #[error("certificate expired: {subject}")]
    Expired { subject: String, not_after: i64 },

    #[error("certificate not yet valid: {subject}")]
    NotYetValid { subject: String, not_before: i64 },

    #[error("invalid path: {0}")]
    InvalidParameters(String),
}

impl From<PathValidationError> for IdentityError {
    fn from(err: PathValidationError) -> Self {
        match err {
            PathValidationError::Expired { subject, not_after } => {
                IdentityError::CertificateExpired { subject, not_after }
            }
            PathValidationError::NotYetValid {
                subject,
                not_before,
            } => IdentityError::CertificateNotYetValid {
                subject,
                not_before,
            },
            PathValidationError::InvalidParameters(reason) => {
                IdentityError::InvalidTrustPath(reason)
            }
        }
    }
}

/// Intermediate and root certificates available for path building.
#[derive(Debug, Clone, Default)]
pub struct CertStore {
    by_subject: HashMap<Vec<u8>, Vec<Certificate>>,
}

impl CertStore {
    pub fn new(certificates: impl IntoIterator<Item = Certificate>) -> Self {
        let mut store = Self::default();
        for certificate in certificates {
            store.add(certificate);
        }
        store
    }

    pub fn add(&mut self, certificate: Certificate) {
        let candidates = self
            .by_subject
            .entry(certificate.subject_raw().to_vec())
            .or_default();
        if !candidates.contains(&certificate) {
            candidates.push(certificate);
        }
    }

    /// Certificates whose subject is `child`'s issuer.
    pub fn issuers_of(&self, child: &Certificate) -> &[Certificate] {
        self.by_subject
            .get(child.issuer_raw())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_subject.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_subject.is_empty()
    }
}

/// Cryptographic path validation up to a trust anchor.
pub trait CertPathValidator: Send + Sync {
    /// Validate `chain` (leaf first) against `anchor` at Unix time `at`,
    /// completing the path from `store` where needed.
    ///
    /// Returns the full validated path, anchor last.
    fn validate(
        &self,
        chain: &[Certificate],
        anchor: &Certificate,
        store: &CertStore,
        at: i64,
    ) -> Result<Vec<Certificate>, PathValidationError>;
}

/// [`CertPathValidator`] backed by `x509-parser` signature verification.
#[derive(Debug, Default, Clone, Copy)]
pub struct X509PathValidator;

impl X509PathValidator {
    fn build_path(
        chain: &[Certificate],
        anchor: &Certificate,
        store: &CertStore,
    ) -> Result<Vec<Certificate>, PathValidationError> {
        let mut path: Vec<Certificate> = chain.to_vec();
        if path.len() > 1 && path.last() == Some(anchor) {
            path.pop();
        }
        if path.len() == 1 && path[0] == *anchor {
            return Ok(path);
        }

        loop {
            let last = path
                .last()
                .ok_or_else(|| PathValidationError::InvalidParameters("empty chain".to_string()))?;
            if last.is_issued_by(anchor) && verify_signed_by(last, anchor).is_ok() {
                path.push(anchor.clone());
                return Ok(path);
            }
            if path.len() >= MAX_PATH_LENGTH {
                return Err(PathValidationError::InvalidParameters(format!(
                    "no path to the trust anchor within {MAX_PATH_LENGTH} certificates"
                )));
            }

            let issuer = store
                .issuers_of(last)
                .iter()
                .find(|candidate| *candidate != anchor && verify_signed_by(last, candidate).is_ok())
                .cloned()
                .ok_or_else(|| {
                    PathValidationError::InvalidParameters(format!(
                        "no trusted issuer found for {}",
                        last.subject()
                    ))
                })?;
            if path.contains(&issuer) {
                return Err(PathValidationError::InvalidParameters(format!(
                    "issuer loop at {}",
                    issuer.subject()
                )));
            }
            path.push(issuer);
        }
    }
}

impl CertPathValidator for X509PathValidator {
    fn validate(
        &self,
        chain: &[Certificate],
        anchor: &Certificate,
        store: &CertStore,
        at: i64,
    ) -> Result<Vec<Certificate>, PathValidationError> {
        let path = Self::build_path(chain, anchor, store)?;

        for certificate in &path {
            check_validity(certificate, at)?;
        }

        for pair in path.windows(2) {
            let (child, issuer) = (&pair[0], &pair[1]);
            if !child.is_issued_by(issuer) {
                return Err(PathValidationError::InvalidParameters(format!(
                    "{} was not issued by {}",
                    child.subject(),
                    issuer.subject()
                )));
            }
            if !issuer.is_ca() {
                return Err(PathValidationError::InvalidParameters(format!(
                    "issuer {} is not a CA",
                    issuer.subject()
                )));
            }
            verify_signed_by(child, issuer).map_err(PathValidationError::InvalidParameters)?;
        }

        // The anchor is trusted by configuration but must still self-verify
        let root = path.last().unwrap_or(anchor);
        verify_signed_by(root, root).map_err(PathValidationError::InvalidParameters)?;

        Ok(path)
    }
}

fn check_validity(certificate: &Certificate, at: i64) -> Result<(), PathValidationError> {
    if at > certificate.not_after() {
        return Err(PathValidationError::Expired {
            subject: certificate.subject().to_string(),
            not_after: certificate.not_after(),
        });
    }
    if at < certificate.not_before() {
        return Err(PathValidationError::NotYetValid {
            subject: certificate.subject().to_string(),
            not_before: certificate.not_before(),
        });
    }
    Ok(())
}

/// Check `child`'s signature with `issuer`'s public key.
///
/// Also rejects certificates whose outer signature algorithm differs from the
/// one declared inside the signed TBS structure.
fn verify_signed_by(child: &Certificate, issuer: &Certificate) -> Result<(), String> {
    let (_, child_x509) = X509Certificate::from_der(child.der())
        .map_err(|e| format!("X.509 parse failure: {e}"))?;
    let (_, issuer_x509) = X509Certificate::from_der(issuer.der())
        .map_err(|e| format!("X.509 parse failure: {e}"))?;

    if child_x509.signature_algorithm.algorithm != child_x509.tbs_certificate.signature.algorithm {
        return Err(format!(
            "signature algorithm mismatch in {}",
            child.subject()
        ));
    }

    child_x509
        .verify_signature(Some(issuer_x509.public_key()))
        .map_err(|e| format!("signature on {} does not verify: {e}", child.subject()))
}

/// The trust anchor and intermediate store every chain is validated against.
#[derive(Clone)]
pub struct TrustContext {
    anchor: Certificate,
    store: CertStore,
    validator: Arc<dyn CertPathValidator>,
}

impl fmt::Debug for TrustContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrustContext")
            .field("anchor", &self.anchor)
            .field("store_size", &self.store.len())
            .finish_non_exhaustive()
    }
}

impl TrustContext {
    /// Set the trust anchor and assemble the certificate store from the
    /// intermediates plus the root.
    pub fn initialize(
        root: Certificate,
        intermediates: Vec<Certificate>,
    ) -> IdentityResult<Self> {
        Self::with_validator(root, intermediates, Arc::new(X509PathValidator))
    }

    /// As [`TrustContext::initialize`], with a specific path validator.
    pub fn with_validator(
        root: Certificate,
        intermediates: Vec<Certificate>,
        validator: Arc<dyn CertPathValidator>,
    ) -> IdentityResult<Self> {
        if !root.is_self_issued() {
            return Err(IdentityError::InvalidTrustPath(format!(
                "trust root {} is not self-issued",
                root.subject()
            )));
        }
        if !root.is_ca() {
            return Err(IdentityError::InvalidTrustPath(format!(
                "trust root {} is not a CA",
                root.subject()
            )));
        }

        let mut store = CertStore::new(intermediates);
        store.add(root.clone());

        info!(
            root = %root.subject(),
            store_size = store.len(),
            "Trust context initialized"
        );

        Ok(Self {
            anchor: root,
            store,
            validator,
        })
    }

    pub fn trust_anchor(&self) -> &Certificate {
        &self.anchor
    }

    pub fn store(&self) -> &CertStore {
        &self.store
    }

    /// Verify `chain` now; see [`TrustContext::verify_at`].
    pub fn verify(&self, chain: &[Certificate]) -> IdentityResult<Identity> {
        self.verify_at(chain, current_timestamp())
    }

    /// Verify a leaf-first chain at Unix time `at` and return the identity it
    /// establishes. Nothing is persisted.
    pub fn verify_at(&self, chain: &[Certificate], at: i64) -> IdentityResult<Identity> {
        if chain.is_empty() {
            return Err(IdentityError::InvalidTrustPath(
                "certificate chain is empty".to_string(),
            ));
        }

        for pair in chain.windows(2) {
            if !pair[0].is_issued_by(&pair[1]) {
                return Err(IdentityError::InvalidTrustPath(format!(
                    "issuer of {} ({}) does not match subject of next certificate ({})",
                    pair[0].subject(),
                    pair[0].issuer(),
                    pair[1].subject()
                )));
            }
        }

        for certificate in chain {
            check_validity(certificate, at)?;
        }

        let path = self
            .validator
            .validate(chain, &self.anchor, &self.store, at)?;
        debug!(
            leaf = %chain[0].subject(),
            path_length = path.len(),
            "Certificate path validated"
        );

        Identity::new(chain.to_vec())
    }

    /// Log a rejected chain root first, indented by depth.
    pub(crate) fn log_rejected_chain(&self, chain: &[Certificate], error: &IdentityError) {
        warn!(
            root = %self.anchor.subject(),
            error = %error,
            "Certificate validation failed against trusted root"
        );
        for (depth, certificate) in chain.iter().rev().enumerate() {
            warn!("{}{}", "   ".repeat(depth), certificate.subject());
        }
    }
}

/// Current Unix time in seconds.
fn current_timestamp() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs() as i64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_map_to_identity_errors() {
        let expired: IdentityError = PathValidationError::Expired {
            subject: "CN=a".to_string(),
            not_after: 10,
        }
        .into();
        assert!(matches!(
            expired,
            IdentityError::CertificateExpired { not_after: 10, .. }
        ));

        let early: IdentityError = PathValidationError::NotYetValid {
            subject: "CN=a".to_string(),
            not_before: 20,
        }
        .into();
        assert!(matches!(early, IdentityError::CertificateNotYetValid { .. }));

        let invalid: IdentityError =
            PathValidationError::InvalidParameters("bad".to_string()).into();
        assert!(matches!(invalid, IdentityError::InvalidTrustPath(_)));
    }

    #[test]
    fn test_empty_store() {
        let store = CertStore::default();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
    }
}
