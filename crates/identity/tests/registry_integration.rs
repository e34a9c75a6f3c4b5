//! Integration tests for the identity registry.
//!
//! These tests drive the registry with real certificate hierarchies:
//! - Verification followed by registration and lookup
//! - Idempotent re-registration
//! - Exact and organisation-level name lookup
//! - Anonymous key resolution, notaries and ownership assertions
//! - Snapshot isolation under concurrent registration

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{open_registry, temp_db_path, TestPki};
use meshid_core::Database;
use meshid_identity::{IdentityError, IdentityRegistry, X500Name};

const ALICE: &str = "O=Alice Corp, L=London, C=GB";
const BOB: &str = "O=Bob Plc, L=Madrid, C=ES";

fn name(text: &str) -> X500Name {
    text.parse().expect("valid name")
}

#[test]
fn test_verify_and_register_then_lookup_by_key() {
    let pki = TestPki::new();
    let registry = pki.started_registry();
    let alice = pki.legal_identity(ALICE).identity();

    let parent = registry
        .verify_and_register(&alice, false)
        .expect("chain verifies");
    assert!(parent.is_none(), "doorman is not a registered identity");

    let found = registry
        .lookup_by_key(alice.owning_key())
        .expect("lookup succeeds")
        .expect("identity registered");
    assert_eq!(found, alice);
    assert_eq!(found.name(), &name(ALICE));
}

#[test]
fn test_register_is_idempotent() {
    let pki = TestPki::new();
    let registry = pki.started_registry();
    let alice = pki.legal_identity(ALICE);
    registry.register(&alice.identity(), false).unwrap();

    let confidential = pki.confidential_identity(&alice);
    let first = registry.register(&confidential, false).unwrap();
    let second = registry.register(&confidential, false).unwrap();

    assert_eq!(first, second);
    assert_eq!(first, Some(alice.identity()));

    let matching = registry
        .list_all()
        .unwrap()
        .into_iter()
        .filter(|identity| identity.fingerprint() == confidential.fingerprint())
        .count();
    assert_eq!(matching, 1);
    assert_eq!(registry.list_all().unwrap().len(), 2);
    assert!(registry.stats().key_index.duplicate_inserts >= 1);
}

#[test]
fn test_confidential_identity_is_not_named() {
    let pki = TestPki::new();
    let registry = pki.started_registry();
    let alice = pki.legal_identity(ALICE);
    let confidential = pki.confidential_identity(&alice);

    registry.verify_and_register(&confidential, false).unwrap();

    // The well-known ancestor is recorded alongside the confidential key
    let by_name = registry.lookup_by_name(&name(ALICE), true).unwrap().unwrap();
    assert_eq!(by_name.fingerprint(), alice.identity().fingerprint());
    assert!(registry
        .lookup_by_key(confidential.owning_key())
        .unwrap()
        .is_some());
}

#[test]
fn test_new_random_identity_skips_name_index() {
    let pki = TestPki::new();
    let registry = pki.started_registry();
    let fresh = pki.legal_identity("O=Fresh Ltd, L=Oslo, C=NO").identity();

    registry.verify_and_register(&fresh, true).unwrap();

    assert!(registry
        .lookup_by_key(fresh.owning_key())
        .unwrap()
        .is_some());
    assert!(registry
        .lookup_by_name(fresh.name(), true)
        .unwrap()
        .is_none());
}

#[test]
fn test_expired_leaf_rejected() {
    let pki = TestPki::new();
    let registry = pki.started_registry();
    let expired = pki.expired_legal_identity(ALICE).identity();

    let err = registry.verify_and_register(&expired, false).unwrap_err();
    assert!(matches!(err, IdentityError::CertificateExpired { .. }));
    assert!(registry.list_all().unwrap().is_empty());
}

#[test]
fn test_not_yet_valid_leaf_rejected() {
    let pki = TestPki::new();
    let registry = pki.started_registry();
    let early = pki.future_legal_identity(ALICE).identity();

    let err = registry.verify_and_register(&early, false).unwrap_err();
    assert!(matches!(err, IdentityError::CertificateNotYetValid { .. }));
}

#[test]
fn test_broken_issuer_link_rejected() {
    let pki = TestPki::new();
    let registry = pki.started_registry();
    let alice = pki.legal_identity(ALICE);

    // Skip the doorman: the leaf's issuer no longer matches the next subject
    let broken = vec![alice.chain[0].clone(), pki.root.chain[0].clone()];
    let identity = meshid_identity::Identity::new(broken).unwrap();

    let err = registry.verify_and_register(&identity, false).unwrap_err();
    assert!(matches!(err, IdentityError::InvalidTrustPath(_)));
    assert!(registry.lookup_by_key(identity.owning_key()).unwrap().is_none());
}

#[test]
fn test_chain_from_foreign_root_rejected() {
    let pki = TestPki::new();
    let impostor = TestPki::new();
    let registry = pki.started_registry();
    let mallory = impostor.legal_identity(ALICE).identity();

    let err = registry.verify_and_register(&mallory, false).unwrap_err();
    assert!(matches!(err, IdentityError::InvalidTrustPath(_)));
    assert!(registry.list_all().unwrap().is_empty());
}

#[test]
fn test_name_keeps_first_key_on_collision() {
    let pki = TestPki::new();
    let registry = pki.started_registry();
    let first = pki.legal_identity(ALICE).identity();
    let second = pki.legal_identity(ALICE).identity();
    assert_ne!(first.fingerprint(), second.fingerprint());

    registry.verify_and_register(&first, false).unwrap();
    registry.verify_and_register(&second, false).unwrap();

    let by_name = registry.lookup_by_name(&name(ALICE), true).unwrap().unwrap();
    assert_eq!(by_name.fingerprint(), first.fingerprint());

    // The second key is registered but never becomes the well-known party
    assert!(registry
        .lookup_by_key(second.owning_key())
        .unwrap()
        .is_some());
    assert_eq!(
        registry
            .resolve_well_known_party(second.owning_key())
            .unwrap(),
        None
    );
    assert_eq!(
        registry
            .resolve_well_known_party(first.owning_key())
            .unwrap(),
        Some(first.party())
    );
    assert_eq!(registry.stats().name_index.duplicate_inserts, 1);
}

#[test]
fn test_lookup_by_name_exact_and_organisation_level() {
    let pki = TestPki::new();
    let registry = pki.started_registry();
    let treasury = pki
        .legal_identity("CN=Treasury, O=Alice Corp, L=London, C=GB")
        .identity();
    registry.verify_and_register(&treasury, false).unwrap();

    assert!(registry
        .lookup_by_name(&name(ALICE), true)
        .unwrap()
        .is_none());

    let loose = registry.lookup_by_name(&name(ALICE), false).unwrap().unwrap();
    assert_eq!(loose, treasury);

    let exact = registry
        .lookup_by_name(treasury.name(), true)
        .unwrap()
        .unwrap();
    assert_eq!(exact, treasury);

    assert!(registry
        .lookup_by_name(&name("O=Alice Corp, L=Leeds, C=GB"), false)
        .unwrap()
        .is_none());
}

#[test]
fn test_query_by_name() {
    let pki = TestPki::new();
    let registry = pki.started_registry();
    let alice = pki.legal_identity(ALICE).identity();
    let bob = pki.legal_identity(BOB).identity();
    registry.verify_and_register(&alice, false).unwrap();
    registry.verify_and_register(&bob, false).unwrap();

    let exact = registry.query_by_name("Madrid", true).unwrap();
    assert_eq!(exact.len(), 1);
    assert!(exact.contains(&bob.party()));

    assert!(registry.query_by_name("Alice", true).unwrap().is_empty());

    let fuzzy = registry.query_by_name("corp", false).unwrap();
    assert_eq!(fuzzy.into_iter().collect::<Vec<_>>(), vec![alice.party()]);
}

#[test]
fn test_resolve_confidential_key_to_well_known_party() {
    let pki = TestPki::new();
    let registry = pki.started_registry();
    let alice = pki.legal_identity(ALICE);
    let confidential = pki.confidential_identity(&alice);
    registry.verify_and_register(&confidential, false).unwrap();

    let resolved = registry
        .resolve_well_known_party(confidential.owning_key())
        .unwrap();
    assert_eq!(resolved, Some(alice.identity().party()));

    let direct = registry
        .resolve_well_known_party(alice.identity().owning_key())
        .unwrap();
    assert_eq!(direct, Some(alice.identity().party()));
}

#[test]
fn test_resolve_unknown_key_is_none() {
    let pki = TestPki::new();
    let registry = pki.started_registry();
    let stranger = pki.legal_identity(BOB).identity();

    assert!(registry
        .resolve_well_known_party(stranger.owning_key())
        .unwrap()
        .is_none());
    assert!(matches!(
        registry.require_well_known_party(stranger.owning_key()),
        Err(IdentityError::UnknownAnonymousParty(_))
    ));
}

#[test]
fn test_notary_resolution_skips_storage() {
    let pki = TestPki::new();
    let registry = open_registry();
    let notary = pki.legal_identity("O=Notary Service, L=Zurich, C=CH").identity();
    registry
        .start(pki.trust_context(), vec![notary.party()])
        .unwrap();

    let before = registry.stats().database.transactions_total;
    let resolved = registry
        .resolve_well_known_party(notary.owning_key())
        .unwrap();
    let after = registry.stats().database.transactions_total;

    assert_eq!(resolved, Some(notary.party()));
    assert_eq!(before, after);
}

#[test]
fn test_assert_ownership() {
    let pki = TestPki::new();
    let registry = pki.started_registry();
    let alice = pki.legal_identity(ALICE);
    let bob = pki.legal_identity(BOB);
    let confidential = pki.confidential_identity(&alice);
    registry.verify_and_register(&confidential, false).unwrap();
    registry.verify_and_register(&bob.identity(), false).unwrap();

    let anonymous = confidential.party().anonymise();
    registry
        .assert_ownership(&alice.identity().party(), &anonymous)
        .expect("alice owns her confidential key");

    assert!(matches!(
        registry.assert_ownership(&bob.identity().party(), &anonymous),
        Err(IdentityError::UnknownAnonymousParty(_))
    ));

    let unregistered = pki.confidential_identity(&bob).party().anonymise();
    assert!(matches!(
        registry.assert_ownership(&bob.identity().party(), &unregistered),
        Err(IdentityError::UnknownAnonymousParty(_))
    ));
}

#[test]
fn test_strip_foreign_keys() {
    let pki = TestPki::new();
    let registry = pki.started_registry();
    let alice = pki.legal_identity(ALICE).identity();
    let bob = pki.legal_identity(BOB).identity();
    let unknown = pki.legal_identity("O=Carol GmbH, L=Berlin, C=DE").identity();
    registry.verify_and_register(&alice, false).unwrap();
    registry.verify_and_register(&bob, false).unwrap();

    let ours: HashSet<X500Name> = [name(ALICE)].into_iter().collect();
    let kept = registry
        .strip_foreign_keys(
            vec![
                bob.owning_key().clone(),
                alice.owning_key().clone(),
                unknown.owning_key().clone(),
            ],
            &ours,
        )
        .unwrap();

    assert_eq!(kept, vec![alice.owning_key().clone()]);
}

#[test]
fn test_operations_require_start() {
    let pki = TestPki::new();
    let registry = open_registry();
    let alice = pki.legal_identity(ALICE).identity();

    assert!(matches!(
        registry.lookup_by_key(alice.owning_key()),
        Err(IdentityError::Uninitialized)
    ));
    assert!(matches!(
        registry.verify_and_register(&alice, false),
        Err(IdentityError::Uninitialized)
    ));
    assert!(matches!(registry.list_all(), Err(IdentityError::Uninitialized)));
    assert!(matches!(
        registry.resolve_well_known_party(alice.owning_key()),
        Err(IdentityError::Uninitialized)
    ));
}

#[test]
fn test_second_start_rejected() {
    let pki = TestPki::new();
    let other = TestPki::new();
    let registry = pki.started_registry();

    assert!(matches!(
        registry.start(other.trust_context(), Vec::new()),
        Err(IdentityError::AlreadyInitialized)
    ));
    assert_eq!(
        registry.trust_context().unwrap().trust_anchor(),
        &pki.root.chain[0]
    );
}

#[test]
fn test_snapshot_isolated_from_later_registration() {
    let pki = TestPki::new();
    let registry = pki.started_registry();
    let alice = pki.legal_identity(ALICE).identity();
    let bob = pki.legal_identity(BOB).identity();
    registry.verify_and_register(&alice, false).unwrap();

    let snapshot = registry.list_all().unwrap();
    registry.verify_and_register(&bob, false).unwrap();

    assert_eq!(snapshot, vec![alice]);
    assert_eq!(registry.list_all().unwrap().len(), 2);
}

#[test]
fn test_concurrent_registration_and_snapshots() {
    let pki = TestPki::new();
    let registry = pki.started_registry();
    let identities: Vec<_> = (0..12)
        .map(|i| {
            pki.legal_identity(&format!("O=Member {i}, L=London, C=GB"))
                .identity()
        })
        .collect();

    std::thread::scope(|scope| {
        for chunk in identities.chunks(4) {
            let registry = &registry;
            scope.spawn(move || {
                for identity in chunk {
                    registry.verify_and_register(identity, false).unwrap();
                    // Racing duplicate of the same key
                    registry.register(identity, false).unwrap();
                }
            });
        }

        let registry = &registry;
        scope.spawn(move || {
            let mut last_len = 0;
            for _ in 0..20 {
                let snapshot = registry.list_all().unwrap();
                assert!(snapshot.len() >= last_len);
                let unique: HashSet<_> = snapshot.iter().map(|i| i.fingerprint()).collect();
                assert_eq!(unique.len(), snapshot.len());
                last_len = snapshot.len();
            }
        });
    });

    assert_eq!(registry.list_all().unwrap().len(), identities.len());
    for identity in &identities {
        let by_name = registry.lookup_by_name(identity.name(), true).unwrap();
        assert_eq!(by_name.as_ref(), Some(identity));
    }
}

#[test]
fn test_bulk_load_survives_restart() {
    let pki = TestPki::new();
    let alice = pki.legal_identity(ALICE);
    let confidential = pki.confidential_identity(&alice);
    let path = temp_db_path();

    {
        let registry = IdentityRegistry::open(Arc::new(Database::open(&path).unwrap())).unwrap();
        let summary = registry
            .load_identities(&[alice.identity()], &[confidential.clone()])
            .unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.already_present, 0);
    }

    let registry = IdentityRegistry::open(Arc::new(Database::open(&path).unwrap())).unwrap();
    let summary = registry
        .load_identities(&[alice.identity()], &[confidential.clone()])
        .unwrap();
    assert_eq!(summary.inserted, 0);
    assert_eq!(summary.already_present, 2);

    registry.start(pki.trust_context(), Vec::new()).unwrap();
    assert_eq!(
        registry
            .resolve_well_known_party(confidential.owning_key())
            .unwrap(),
        Some(alice.identity().party())
    );
    assert!(registry
        .lookup_by_name(confidential.name(), true)
        .unwrap()
        .is_some_and(|found| found.fingerprint() == alice.identity().fingerprint()));

    drop(registry);
    let _ = std::fs::remove_file(&path);
}
