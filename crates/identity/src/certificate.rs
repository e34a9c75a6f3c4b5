//! X.509 certificates as the identity service sees them.
//!
//! A [`Certificate`] keeps its DER encoding alongside the handful of fields
//! the registry and verifier need: raw subject and issuer names for linkage,
//! the subject public key, the validity window, the CA flag and the
//! certificate role extension.

use serde::{Deserialize, Serialize};
use std::fmt;
use x509_parser::certificate::X509Certificate;
use x509_parser::pem::Pem;
use x509_parser::prelude::FromDer;
use x509_parser::x509::X509Name;

use meshid_crypto::PublicKey;

use crate::error::{IdentityError, IdentityResult};
use crate::name::{NameParts, X500Name};

/// OID of the certificate role extension (1.3.6.1.4.1.50530.1.1).
pub const CERT_ROLE_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 50530, 1, 1];

const CERT_ROLE_OID_TEXT: &str = "1.3.6.1.4.1.50530.1.1";

/// Role a certificate plays in the network hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CertRole {
    DoormanCa,
    NetworkMap,
    ServiceIdentity,
    NodeCa,
    Tls,
    LegalIdentity,
    ConfidentialLegalIdentity,
    NetworkParameters,
}

impl CertRole {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::DoormanCa),
            2 => Some(Self::NetworkMap),
            3 => Some(Self::ServiceIdentity),
            4 => Some(Self::NodeCa),
            5 => Some(Self::Tls),
            6 => Some(Self::LegalIdentity),
            7 => Some(Self::ConfidentialLegalIdentity),
            8 => Some(Self::NetworkParameters),
            _ => None,
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            Self::DoormanCa => 1,
            Self::NetworkMap => 2,
            Self::ServiceIdentity => 3,
            Self::NodeCa => 4,
            Self::Tls => 5,
            Self::LegalIdentity => 6,
            Self::ConfidentialLegalIdentity => 7,
            Self::NetworkParameters => 8,
        }
    }

    /// Roles whose holders are named, directly resolvable parties.
    pub fn is_well_known(&self) -> bool {
        matches!(self, Self::LegalIdentity | Self::ServiceIdentity)
    }

    /// DER encoding of the extension value (an ASN.1 INTEGER).
    pub fn to_extension_value(&self) -> Vec<u8> {
        vec![0x02, 0x01, self.code()]
    }

    /// Decode the extension value written by [`CertRole::to_extension_value`].
    pub fn from_extension_value(value: &[u8]) -> IdentityResult<Self> {
        let code = read_der_integer(value).map_err(IdentityError::CertificateParse)?;
        Self::from_code(code)
            .ok_or_else(|| IdentityError::CertificateParse(format!("unknown certificate role {code}")))
    }
}

/// A parsed X.509 certificate.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Certificate {
    der: Vec<u8>,
    subject_raw: Vec<u8>,
    issuer_raw: Vec<u8>,
    subject: String,
    issuer: String,
    legal_name: Option<X500Name>,
    public_key: PublicKey,
    serial: String,
    not_before: i64,
    not_after: i64,
    is_ca: bool,
    role: Option<CertRole>,
}

impl Certificate {
    /// Parse a DER-encoded certificate.
    pub fn from_der(der: impl Into<Vec<u8>>) -> IdentityResult<Self> {
        let der = der.into();
        let (rest, x509) = X509Certificate::from_der(&der)
            .map_err(|e| IdentityError::CertificateParse(format!("X.509 parse failure: {e}")))?;
        if !rest.is_empty() {
            return Err(IdentityError::CertificateParse(format!(
                "{} trailing bytes after certificate",
                rest.len()
            )));
        }

        let role = x509
            .extensions()
            .iter()
            .find(|extension| extension.oid.to_id_string() == CERT_ROLE_OID_TEXT)
            .map(|extension| CertRole::from_extension_value(extension.value))
            .transpose()?;

        Ok(Self {
            der: der.clone(),
            subject_raw: x509.subject().as_raw().to_vec(),
            issuer_raw: x509.issuer().as_raw().to_vec(),
            subject: x509.subject().to_string(),
            issuer: x509.issuer().to_string(),
            legal_name: legal_name_from_x509(x509.subject()),
            public_key: PublicKey::from_der(x509.public_key().raw.to_vec()),
            serial: x509.raw_serial_as_string(),
            not_before: x509.validity().not_before.timestamp(),
            not_after: x509.validity().not_after.timestamp(),
            is_ca: x509.is_ca(),
            role,
        })
    }

    /// Parse every `CERTIFICATE` block of a PEM bundle, in order.
    pub fn chain_from_pem(data: &[u8]) -> IdentityResult<Vec<Self>> {
        let mut chain = Vec::new();
        for pem in Pem::iter_from_buffer(data) {
            let pem = pem.map_err(|e| IdentityError::CertificateParse(format!("PEM decode failure: {e}")))?;
            if pem.label != "CERTIFICATE" {
                continue;
            }
            chain.push(Self::from_der(pem.contents)?);
        }
        if chain.is_empty() {
            return Err(IdentityError::CertificateParse(
                "no CERTIFICATE blocks in PEM input".to_string(),
            ));
        }
        Ok(chain)
    }

    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// DER encoding of the subject name.
    pub fn subject_raw(&self) -> &[u8] {
        &self.subject_raw
    }

    /// DER encoding of the issuer name.
    pub fn issuer_raw(&self) -> &[u8] {
        &self.issuer_raw
    }

    /// Subject in RFC 4514 style, for logs and error messages.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Subject as a legal name, when it carries O, L and C.
    pub fn legal_name(&self) -> Option<&X500Name> {
        self.legal_name.as_ref()
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Start of the validity window, Unix seconds.
    pub fn not_before(&self) -> i64 {
        self.not_before
    }

    /// End of the validity window, Unix seconds.
    pub fn not_after(&self) -> i64 {
        self.not_after
    }

    pub fn is_ca(&self) -> bool {
        self.is_ca
    }

    pub fn role(&self) -> Option<CertRole> {
        self.role
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject_raw == self.issuer_raw
    }

    /// Whether `issuer`'s subject is this certificate's issuer name.
    pub fn is_issued_by(&self, issuer: &Certificate) -> bool {
        self.issuer_raw == issuer.subject_raw
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("subject", &self.subject)
            .field("issuer", &self.issuer)
            .field("serial", &self.serial)
            .field("role", &self.role)
            .finish()
    }
}

impl TryFrom<String> for Certificate {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let der = hex::decode(&value)
            .map_err(|e| IdentityError::CertificateParse(format!("invalid hex DER: {e}")))?;
        Self::from_der(der)
    }
}

impl From<Certificate> for String {
    fn from(value: Certificate) -> Self {
        hex::encode(value.der)
    }
}

fn legal_name_from_x509(name: &X509Name<'_>) -> Option<X500Name> {
    let mut parts = NameParts::default();
    let attributes = [
        ("CN", name.iter_common_name().next()),
        ("OU", name.iter_organizational_unit().next()),
        ("O", name.iter_organization().next()),
        ("L", name.iter_locality().next()),
        ("ST", name.iter_state_or_province().next()),
        ("C", name.iter_country().next()),
    ];
    for (label, attribute) in attributes {
        if let Some(attribute) = attribute {
            let value = attribute.as_str().ok()?;
            parts.set(label, value.to_string()).ok()?;
        }
    }
    X500Name::build(parts).ok()
}

fn read_der_integer(input: &[u8]) -> Result<i64, String> {
    if input.len() < 2 {
        return Err("truncated INTEGER".to_string());
    }
    if input[0] != 0x02 {
        return Err("expected INTEGER".to_string());
    }
    let len = usize::from(input[1]);
    if len == 0 || len > 8 {
        return Err("INTEGER length unsupported".to_string());
    }
    let value = input
        .get(2..2 + len)
        .ok_or_else(|| "truncated INTEGER".to_string())?;
    if input.len() != 2 + len {
        return Err("trailing bytes after INTEGER".to_string());
    }
    let mut out: i64 = if value[0] & 0x80 != 0 { -1 } else { 0 };
    for byte in value {
        out = (out << 8) | i64::from(*byte);
    }
    Ok(out)
}
