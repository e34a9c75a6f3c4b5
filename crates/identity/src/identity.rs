//! Identity and party types

use serde::{Deserialize, Serialize};
use std::fmt;

use meshid_crypto::{Fingerprint, PublicKey};

use crate::certificate::{CertRole, Certificate};
use crate::error::{IdentityError, IdentityResult};
use crate::name::X500Name;

/// A public key bound to a certificate chain and the legal name of its leaf.
///
/// The chain runs from the leaf (index 0) towards the root. Identities are
/// immutable once built.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "IdentityRecord", into = "IdentityRecord")]
pub struct Identity {
    certificates: Vec<Certificate>,
    name: X500Name,
    fingerprint: Fingerprint,
}

/// Stored form of an [`Identity`]: the chain alone, everything else is derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IdentityRecord {
    certificates: Vec<Certificate>,
}

impl Identity {
    /// Build an identity from a leaf-first chain.
    pub fn new(certificates: Vec<Certificate>) -> IdentityResult<Self> {
        let leaf = certificates.first().ok_or_else(|| {
            IdentityError::InvalidTrustPath("certificate chain is empty".to_string())
        })?;
        let name = leaf
            .legal_name()
            .cloned()
            .ok_or_else(|| IdentityError::MissingLegalName(leaf.subject().to_string()))?;
        let fingerprint = leaf.public_key().fingerprint();

        Ok(Self {
            certificates,
            name,
            fingerprint,
        })
    }

    pub fn owning_key(&self) -> &PublicKey {
        self.leaf().public_key()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.fingerprint
    }

    pub fn name(&self) -> &X500Name {
        &self.name
    }

    pub fn certificates(&self) -> &[Certificate] {
        &self.certificates
    }

    pub fn leaf(&self) -> &Certificate {
        // Non-empty by construction
        &self.certificates[0]
    }

    pub fn role(&self) -> Option<CertRole> {
        self.leaf().role()
    }

    /// Confidential identities are never entered into the name index.
    pub fn is_confidential(&self) -> bool {
        self.role() == Some(CertRole::ConfidentialLegalIdentity)
    }

    /// Key of the certificate that issued the leaf, if the chain has one.
    pub fn issuer_key(&self) -> Option<&PublicKey> {
        self.certificates.get(1).map(Certificate::public_key)
    }

    /// Keys of every issuing certificate, nearest first.
    pub fn lineage_keys(&self) -> impl Iterator<Item = &PublicKey> {
        self.certificates.iter().skip(1).map(Certificate::public_key)
    }

    /// The identity rooted at the first well-known certificate below the leaf.
    ///
    /// Returns `None` when the leaf itself is well-known or no certificate in
    /// the chain carries a well-known role.
    pub fn well_known_ancestor(&self) -> IdentityResult<Option<Identity>> {
        let position = self
            .certificates
            .iter()
            .position(|cert| cert.role().is_some_and(|role| role.is_well_known()));

        match position {
            Some(index) if index > 0 => {
                Identity::new(self.certificates[index..].to_vec()).map(Some)
            }
            _ => Ok(None),
        }
    }

    pub fn party(&self) -> Party {
        Party::new(self.name.clone(), self.owning_key().clone())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name)
            .field("fingerprint", &self.fingerprint)
            .field("chain_length", &self.certificates.len())
            .finish()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.fingerprint.short())
    }
}

impl TryFrom<IdentityRecord> for Identity {
    type Error = IdentityError;

    fn try_from(record: IdentityRecord) -> Result<Self, Self::Error> {
        Identity::new(record.certificates)
    }
}

impl From<Identity> for IdentityRecord {
    fn from(identity: Identity) -> Self {
        Self {
            certificates: identity.certificates,
        }
    }
}

/// A well-known party: a legal name and the key that speaks for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Party {
    pub name: X500Name,
    pub owning_key: PublicKey,
}

impl Party {
    pub fn new(name: X500Name, owning_key: PublicKey) -> Self {
        Self { name, owning_key }
    }

    pub fn anonymise(&self) -> AnonymousParty {
        AnonymousParty::new(self.owning_key.clone())
    }
}

impl fmt::Display for Party {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.name, f)
    }
}

/// A party known only by its key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AnonymousParty {
    pub owning_key: PublicKey,
}

impl AnonymousParty {
    pub fn new(owning_key: PublicKey) -> Self {
        Self { owning_key }
    }
}

impl fmt::Display for AnonymousParty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Anonymous({})", self.owning_key.to_string_short())
    }
}
