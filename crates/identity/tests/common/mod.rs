//! Certificate hierarchy fixtures built with rcgen.
//!
//! The hierarchy mirrors a network deployment: a self-signed root, a doorman
//! CA issued by the root, legal identities issued by the doorman, and
//! confidential identities issued by a legal identity under the same name.

#![allow(dead_code)]

use std::sync::Arc;

use meshid_core::Database;
use meshid_identity::{
    CertRole, Certificate, Identity, IdentityRegistry, TrustContext, X500Name, CERT_ROLE_OID,
};
use rcgen::{
    BasicConstraints, CertificateParams, CustomExtension, DistinguishedName, DnType, IsCa, KeyPair,
};

/// A certificate together with the key that can issue below it.
pub struct Issuer {
    pub cert: rcgen::Certificate,
    pub key: KeyPair,
    /// Leaf-first chain ending at the root
    pub chain: Vec<Certificate>,
}

impl Issuer {
    pub fn identity(&self) -> Identity {
        Identity::new(self.chain.clone()).expect("fixture chain carries a legal name")
    }

    pub fn name(&self) -> X500Name {
        self.identity().name().clone()
    }
}

pub struct TestPki {
    pub root: Issuer,
    pub doorman: Issuer,
}

impl TestPki {
    pub fn new() -> Self {
        Self::with_root_name("CN=Root CA, O=meshid, L=London, C=GB")
    }

    pub fn with_root_name(root_name: &str) -> Self {
        let key = KeyPair::generate().expect("root key");
        let mut params = base_params(root_name, None);
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).expect("self-signed root");
        let chain = vec![Certificate::from_der(cert.der().to_vec()).expect("root parses")];
        let root = Issuer { cert, key, chain };

        let doorman = issue(
            "CN=Doorman, O=meshid, L=London, C=GB",
            Some(CertRole::DoormanCa),
            true,
            &root,
        );

        Self { root, doorman }
    }

    pub fn trust_context(&self) -> TrustContext {
        TrustContext::initialize(self.root.chain[0].clone(), vec![self.doorman.chain[0].clone()])
            .expect("fixture trust context")
    }

    /// A started registry over a fresh in-memory database.
    pub fn started_registry(&self) -> IdentityRegistry {
        let registry = open_registry();
        registry
            .start(self.trust_context(), Vec::new())
            .expect("registry starts");
        registry
    }

    /// A well-known legal identity issued by the doorman.
    pub fn legal_identity(&self, name: &str) -> Issuer {
        issue(name, Some(CertRole::LegalIdentity), true, &self.doorman)
    }

    /// A legal identity whose validity window ended in 2001.
    pub fn expired_legal_identity(&self, name: &str) -> Issuer {
        let mut params = base_params(name, Some(CertRole::LegalIdentity));
        params.not_before = rcgen::date_time_ymd(2000, 1, 1);
        params.not_after = rcgen::date_time_ymd(2001, 1, 1);
        sign(params, &self.doorman)
    }

    /// A legal identity whose validity window starts in 2200.
    pub fn future_legal_identity(&self, name: &str) -> Issuer {
        let mut params = base_params(name, Some(CertRole::LegalIdentity));
        params.not_before = rcgen::date_time_ymd(2200, 1, 1);
        params.not_after = rcgen::date_time_ymd(2300, 1, 1);
        sign(params, &self.doorman)
    }

    /// A confidential identity owned by `owner`.
    pub fn confidential_identity(&self, owner: &Issuer) -> Identity {
        let name = owner.name().to_string();
        issue(&name, Some(CertRole::ConfidentialLegalIdentity), false, owner).identity()
    }
}

pub fn open_registry() -> IdentityRegistry {
    let db = Database::open_in_memory().expect("in-memory database");
    IdentityRegistry::open(Arc::new(db)).expect("registry opens")
}

/// Path of a fresh database file under the system temp directory.
pub fn temp_db_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("meshid-identity-{}.db", uuid::Uuid::new_v4()))
}

pub fn issue(name: &str, role: Option<CertRole>, is_ca: bool, issuer: &Issuer) -> Issuer {
    let mut params = base_params(name, role);
    if is_ca {
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    }
    sign(params, issuer)
}

fn sign(params: CertificateParams, issuer: &Issuer) -> Issuer {
    let key = KeyPair::generate().expect("leaf key");
    let cert = params
        .signed_by(&key, &issuer.cert, &issuer.key)
        .expect("issued certificate");

    let mut chain = vec![Certificate::from_der(cert.der().to_vec()).expect("issued cert parses")];
    chain.extend(issuer.chain.iter().cloned());
    Issuer { cert, key, chain }
}

fn base_params(name: &str, role: Option<CertRole>) -> CertificateParams {
    let name: X500Name = name.parse().expect("fixture name parses");

    let mut dn = DistinguishedName::new();
    if let Some(cn) = name.common_name() {
        dn.push(DnType::CommonName, cn);
    }
    if let Some(ou) = name.organisation_unit() {
        dn.push(DnType::OrganizationalUnitName, ou);
    }
    dn.push(DnType::OrganizationName, name.organisation());
    dn.push(DnType::LocalityName, name.locality());
    if let Some(state) = name.state() {
        dn.push(DnType::StateOrProvinceName, state);
    }
    dn.push(DnType::CountryName, name.country());

    let mut params = CertificateParams::default();
    params.distinguished_name = dn;
    if let Some(role) = role {
        params
            .custom_extensions
            .push(CustomExtension::from_oid_content(CERT_ROLE_OID, role.to_extension_value()));
    }
    params
}
