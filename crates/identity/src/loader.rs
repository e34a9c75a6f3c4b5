//! Bulk loading of trusted identities at startup.

use serde::Serialize;
use tracing::info;

use crate::error::IdentityResult;
use crate::identity::Identity;
use crate::registry::IdentityRegistry;

/// Outcome of [`IdentityRegistry::load_identities`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    /// Identities newly written to the key index
    pub inserted: usize,
    /// Identities whose key was already registered
    pub already_present: usize,
}

impl IdentityRegistry {
    /// Insert pre-validated identities without verifying them.
    ///
    /// `identities` enter both indexes, `confidential` enters the key index
    /// only. Keys that are already registered are left as they are, so the
    /// same set can be loaded on every restart. Runs in one transaction and
    /// does not require the registry to be started.
    pub fn load_identities(
        &self,
        identities: &[Identity],
        confidential: &[Identity],
    ) -> IdentityResult<LoadSummary> {
        let summary = self.db.transaction(|tx| {
            let mut summary = LoadSummary::default();
            for identity in identities {
                let inserted = self.key_index.insert_allowing_duplicates(
                    tx,
                    identity.fingerprint(),
                    identity.clone(),
                )?;
                self.name_index.insert_allowing_duplicates(
                    tx,
                    identity.name().clone(),
                    identity.fingerprint(),
                )?;
                summary.record(inserted);
            }
            for identity in confidential {
                let inserted = self.key_index.insert_allowing_duplicates(
                    tx,
                    identity.fingerprint(),
                    identity.clone(),
                )?;
                summary.record(inserted);
            }
            Ok::<_, crate::error::IdentityError>(summary)
        })?;

        info!(
            inserted = summary.inserted,
            already_present = summary.already_present,
            "Bulk loaded identities"
        );
        Ok(summary)
    }
}

impl LoadSummary {
    fn record(&mut self, inserted: bool) {
        if inserted {
            self.inserted += 1;
        } else {
            self.already_present += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.inserted + self.already_present
    }
}
