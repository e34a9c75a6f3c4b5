//! Identity registry
//!
//! Maps public keys to verified certificate chains and legal names to keys.
//! The two indexes are independent persistent maps with no delete operation,
//! so a name entry always resolves to a live identity.
//!
//! Every public operation runs inside one storage transaction. Registration
//! of a verified chain and of its well-known ancestor commit together or not
//! at all.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use meshid_core::{Database, DatabaseStats, MapStats, PersistentMap, Tx};
use meshid_crypto::{Fingerprint, PublicKey};

use crate::error::{IdentityError, IdentityResult};
use crate::identity::{AnonymousParty, Identity, Party};
use crate::name::X500Name;
use crate::notary::NotaryIdentityCache;
use crate::pki::TrustContext;

/// Table backing the key index.
pub const KEY_INDEX_TABLE: &str = "identity_keys";

/// Table backing the name index.
pub const NAME_INDEX_TABLE: &str = "identity_names";

/// State fixed when the registry starts.
#[derive(Debug)]
struct RegistryContext {
    trust: TrustContext,
    notaries: NotaryIdentityCache,
}

/// Counters describing registry activity since it was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryStats {
    pub database: DatabaseStats,
    pub key_index: MapStats,
    pub name_index: MapStats,
}

/// Dual-indexed registry of verified identities.
pub struct IdentityRegistry {
    pub(crate) db: Arc<Database>,
    pub(crate) key_index: PersistentMap<Fingerprint, Identity>,
    pub(crate) name_index: PersistentMap<X500Name, Fingerprint>,
    context: OnceLock<RegistryContext>,
}

impl std::fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("key_index", &self.key_index)
            .field("name_index", &self.name_index)
            .field("started", &self.is_started())
            .finish()
    }
}

impl IdentityRegistry {
    /// Open the registry tables in `db`. The registry is not usable until
    /// [`IdentityRegistry::start`] has been called.
    pub fn open(db: Arc<Database>) -> IdentityResult<Self> {
        let key_index = PersistentMap::create(&db, KEY_INDEX_TABLE)?;
        let name_index = PersistentMap::create(&db, NAME_INDEX_TABLE)?;

        Ok(Self {
            db,
            key_index,
            name_index,
            context: OnceLock::new(),
        })
    }

    /// Install the trust context and notary parties.
    ///
    /// Succeeds exactly once; later calls fail with
    /// [`IdentityError::AlreadyInitialized`] and leave the first context in
    /// place.
    pub fn start(
        &self,
        trust: TrustContext,
        notary_parties: impl IntoIterator<Item = Party>,
    ) -> IdentityResult<()> {
        let notaries = NotaryIdentityCache::from_parties(notary_parties);
        let notary_count = notaries.len();
        let root = trust.trust_anchor().subject().to_string();

        self.context
            .set(RegistryContext { trust, notaries })
            .map_err(|_| IdentityError::AlreadyInitialized)?;

        info!(root = %root, notaries = notary_count, "Identity registry started");
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.context.get().is_some()
    }

    pub fn trust_context(&self) -> IdentityResult<&TrustContext> {
        Ok(&self.context()?.trust)
    }

    pub fn notaries(&self) -> IdentityResult<&NotaryIdentityCache> {
        Ok(&self.context()?.notaries)
    }

    fn context(&self) -> IdentityResult<&RegistryContext> {
        self.context.get().ok_or(IdentityError::Uninitialized)
    }

    /// Record an already verified identity and return its parent, if the
    /// issuer of its leaf is registered.
    ///
    /// With `is_new_random` the key is assumed freshly generated: the
    /// duplicate check is skipped and only the key index is written.
    pub fn register(
        &self,
        identity: &Identity,
        is_new_random: bool,
    ) -> IdentityResult<Option<Identity>> {
        self.context()?;
        self.db
            .transaction(|tx| self.register_in(tx, identity, is_new_random))
    }

    /// Verify `identity`'s chain against the trust anchor, then register it.
    ///
    /// A well-known ancestor in the chain is registered first, in the same
    /// transaction. Verification failures are returned unchanged and nothing
    /// is written.
    pub fn verify_and_register(
        &self,
        identity: &Identity,
        is_new_random: bool,
    ) -> IdentityResult<Option<Identity>> {
        let context = self.context()?;
        if let Err(err) = context.trust.verify(identity.certificates()) {
            context
                .trust
                .log_rejected_chain(identity.certificates(), &err);
            return Err(err);
        }

        self.db.transaction(|tx| {
            if !is_new_random {
                if let Some(ancestor) = identity.well_known_ancestor()? {
                    self.register_in(tx, &ancestor, false)?;
                }
            }
            self.register_in(tx, identity, is_new_random)
        })
    }

    fn register_in(
        &self,
        tx: &mut Tx<'_>,
        identity: &Identity,
        is_new_random: bool,
    ) -> IdentityResult<Option<Identity>> {
        let fingerprint = identity.fingerprint();

        if is_new_random {
            self.key_index.set(tx, fingerprint, identity.clone())?;
        } else {
            let inserted =
                self.key_index
                    .insert_allowing_duplicates(tx, fingerprint, identity.clone())?;
            if !identity.is_confidential() {
                self.name_index
                    .insert_allowing_duplicates(tx, identity.name().clone(), fingerprint)?;
            }
            if !inserted {
                debug!(fingerprint = %fingerprint.short(), "Identity already registered");
            }
        }

        let parent = match identity.issuer_key() {
            Some(issuer_key) => self.key_index.get(tx, &issuer_key.fingerprint())?,
            None => None,
        };

        debug!(
            name = %identity.name(),
            fingerprint = %fingerprint.short(),
            confidential = identity.is_confidential(),
            new_random = is_new_random,
            has_parent = parent.is_some(),
            "Registered identity"
        );
        Ok(parent)
    }

    pub fn lookup_by_key(&self, key: &PublicKey) -> IdentityResult<Option<Identity>> {
        self.context()?;
        self.db
            .transaction(|tx| Ok(self.key_index.get(tx, &key.fingerprint())?))
    }

    /// Resolve a legal name to its identity.
    ///
    /// Without `exact_match`, a name with no entry of its own falls back to
    /// the first registered name (in name order) of the same organisation,
    /// locality and country.
    pub fn lookup_by_name(
        &self,
        name: &X500Name,
        exact_match: bool,
    ) -> IdentityResult<Option<Identity>> {
        self.context()?;
        self.db.transaction(|tx| {
            if let Some(fingerprint) = self.name_index.get(tx, name)? {
                return Ok(self.key_index.get(tx, &fingerprint)?);
            }
            if exact_match {
                return Ok(None);
            }

            let candidate = self
                .name_index
                .snapshot_all(tx)?
                .into_iter()
                .find(|(registered, _)| registered.matches_organisation(name));
            match candidate {
                Some((_, fingerprint)) => Ok(self.key_index.get(tx, &fingerprint)?),
                None => Ok(None),
            }
        })
    }

    /// Parties whose registered name has a component matching `query`.
    pub fn query_by_name(&self, query: &str, exact_match: bool) -> IdentityResult<BTreeSet<Party>> {
        self.context()?;
        self.db.transaction(|tx| {
            let mut parties = BTreeSet::new();
            for (name, fingerprint) in self.name_index.snapshot_all(tx)? {
                if !name.matches_query(query, exact_match) {
                    continue;
                }
                if let Some(identity) = self.key_index.get(tx, &fingerprint)? {
                    parties.insert(identity.party());
                }
            }
            Ok(parties)
        })
    }

    /// Every registered identity, read in a single transaction.
    pub fn list_all(&self) -> IdentityResult<Vec<Identity>> {
        self.context()?;
        self.db.transaction(|tx| {
            Ok(self
                .key_index
                .snapshot_all(tx)?
                .into_iter()
                .map(|(_, identity)| identity)
                .collect())
        })
    }

    /// The well-known party speaking for `key`.
    ///
    /// Notary keys are answered from memory. Other keys are resolved through
    /// their registered chain: the identity itself, then each issuer in
    /// order, until one holds the name index entry for its own name.
    pub fn resolve_well_known_party(&self, key: &PublicKey) -> IdentityResult<Option<Party>> {
        let context = self.context()?;
        if let Some(notary) = context.notaries.get(key) {
            return Ok(Some(notary.clone()));
        }

        self.db.transaction(|tx| self.resolve_in(tx, key))
    }

    /// As [`IdentityRegistry::resolve_well_known_party`], failing with
    /// [`IdentityError::UnknownAnonymousParty`] when nothing resolves.
    pub fn require_well_known_party(&self, key: &PublicKey) -> IdentityResult<Party> {
        self.resolve_well_known_party(key)?
            .ok_or_else(|| IdentityError::UnknownAnonymousParty(key.to_string_short()))
    }

    fn resolve_in(&self, tx: &mut Tx<'_>, key: &PublicKey) -> IdentityResult<Option<Party>> {
        let Some(identity) = self.key_index.get(tx, &key.fingerprint())? else {
            return Ok(None);
        };
        if self.is_well_known_in(tx, &identity)? {
            return Ok(Some(identity.party()));
        }

        for issuer_key in identity.lineage_keys() {
            if let Some(issuer) = self.key_index.get(tx, &issuer_key.fingerprint())? {
                if self.is_well_known_in(tx, &issuer)? {
                    return Ok(Some(issuer.party()));
                }
            }
        }
        Ok(None)
    }

    fn is_well_known_in(&self, tx: &mut Tx<'_>, identity: &Identity) -> IdentityResult<bool> {
        let named = self.name_index.get(tx, identity.name())?;
        Ok(named == Some(identity.fingerprint()))
    }

    /// Fail unless `anonymous` resolves to exactly `party`.
    pub fn assert_ownership(&self, party: &Party, anonymous: &AnonymousParty) -> IdentityResult<()> {
        match self.resolve_well_known_party(&anonymous.owning_key)? {
            Some(resolved) if resolved == *party => Ok(()),
            Some(resolved) => Err(IdentityError::UnknownAnonymousParty(format!(
                "{} is owned by {}, not {}",
                anonymous, resolved, party
            ))),
            None => Err(IdentityError::UnknownAnonymousParty(format!(
                "{} has no well-known owner",
                anonymous
            ))),
        }
    }

    /// Keep the keys, in input order, whose registered identity carries one
    /// of `our_names`.
    ///
    /// Unregistered keys are dropped as foreign even when they might resolve
    /// later.
    pub fn strip_foreign_keys(
        &self,
        keys: impl IntoIterator<Item = PublicKey>,
        our_names: &HashSet<X500Name>,
    ) -> IdentityResult<Vec<PublicKey>> {
        self.context()?;
        self.db.transaction(|tx| {
            let mut ours = Vec::new();
            for key in keys {
                let owned = self
                    .key_index
                    .get(tx, &key.fingerprint())?
                    .is_some_and(|identity| our_names.contains(identity.name()));
                if owned {
                    ours.push(key);
                }
            }
            Ok(ours)
        })
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            database: self.db.stats(),
            key_index: self.key_index.stats(),
            name_index: self.name_index.stats(),
        }
    }
}
