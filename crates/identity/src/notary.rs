//! Notary identity cache
//!
//! Notaries are configured network-wide and resolved on nearly every unit of
//! work, so their parties are held in memory and answered without a storage
//! transaction.

use std::collections::HashMap;

use meshid_crypto::{Fingerprint, PublicKey};

use crate::identity::Party;

/// Pre-trusted notary parties, keyed by the fingerprint of their owning key.
#[derive(Debug, Clone, Default)]
pub struct NotaryIdentityCache {
    parties: HashMap<Fingerprint, Party>,
}

impl NotaryIdentityCache {
    pub fn from_parties(parties: impl IntoIterator<Item = Party>) -> Self {
        let parties = parties
            .into_iter()
            .map(|party| (party.owning_key.fingerprint(), party))
            .collect();
        Self { parties }
    }

    /// The notary owning `key`, if any.
    pub fn get(&self, key: &PublicKey) -> Option<&Party> {
        self.parties.get(&key.fingerprint())
    }

    pub fn contains(&self, party: &Party) -> bool {
        self.get(&party.owning_key) == Some(party)
    }

    pub fn parties(&self) -> impl Iterator<Item = &Party> {
        self.parties.values()
    }

    pub fn len(&self) -> usize {
        self.parties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parties.is_empty()
    }
}
