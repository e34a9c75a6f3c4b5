//! Public keys and their fingerprints.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::hash::{decode_digest, HashError, HASH_LEN};

/// Domain separation for key fingerprints.
const FINGERPRINT_CONTEXT: &str = "meshid 2024 public key fingerprint v1";

/// Number of hex characters in the short fingerprint form.
const SHORT_FINGERPRINT_HEX: usize = 16;

/// A public key as its SubjectPublicKeyInfo DER encoding.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn from_der(der: impl Into<Vec<u8>>) -> Self {
        Self(der.into())
    }

    pub fn as_der(&self) -> &[u8] {
        &self.0
    }

    /// Deterministic fingerprint of this key.
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = blake3::Hasher::new_derive_key(FINGERPRINT_CONTEXT);
        hasher.update(&self.0);
        Fingerprint(*hasher.finalize().as_bytes())
    }

    /// Short textual form for logs.
    pub fn to_string_short(&self) -> String {
        self.fingerprint().short()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_string_short())
    }
}

impl TryFrom<String> for PublicKey {
    type Error = HashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        hex::decode(&value)
            .map(Self)
            .map_err(|e| HashError::InvalidHex(e.to_string()))
    }
}

impl From<PublicKey> for String {
    fn from(value: PublicKey) -> Self {
        hex::encode(value.0)
    }
}

/// Fingerprint of a [`PublicKey`]; two keys with the same fingerprint are
/// treated as the same key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint([u8; HASH_LEN]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 16 hex characters.
    pub fn short(&self) -> String {
        let mut text = self.to_hex();
        text.truncate(SHORT_FINGERPRINT_HEX);
        text
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.short())
    }
}

impl FromStr for Fingerprint {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_digest(s).map(Self)
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = HashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.to_hex()
    }
}
