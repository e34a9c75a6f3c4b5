//! X.500 legal names.
//!
//! Every well-known party is named by an [`X500Name`] with a mandatory
//! organisation, locality and country, plus optional common name,
//! organisational unit and state. The canonical text form lists attributes in
//! the order `CN, OU, O, L, ST, C`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{IdentityError, IdentityResult};

/// Upper bound on any single attribute value.
pub const MAX_ATTRIBUTE_LENGTH: usize = 128;

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct X500Name {
    organisation: String,
    locality: String,
    country: String,
    common_name: Option<String>,
    organisation_unit: Option<String>,
    state: Option<String>,
}

impl X500Name {
    /// Build a name from its mandatory attributes.
    pub fn new(
        organisation: impl Into<String>,
        locality: impl Into<String>,
        country: impl Into<String>,
    ) -> IdentityResult<Self> {
        Self::build(NameParts {
            organisation: Some(organisation.into()),
            locality: Some(locality.into()),
            country: Some(country.into()),
            ..NameParts::default()
        })
    }

    pub fn with_common_name(mut self, common_name: impl Into<String>) -> IdentityResult<Self> {
        let value = common_name.into();
        validate_attribute("CN", &value)?;
        self.common_name = Some(value);
        Ok(self)
    }

    pub fn with_organisation_unit(mut self, unit: impl Into<String>) -> IdentityResult<Self> {
        let value = unit.into();
        validate_attribute("OU", &value)?;
        self.organisation_unit = Some(value);
        Ok(self)
    }

    pub fn with_state(mut self, state: impl Into<String>) -> IdentityResult<Self> {
        let value = state.into();
        validate_attribute("ST", &value)?;
        self.state = Some(value);
        Ok(self)
    }

    pub fn organisation(&self) -> &str {
        &self.organisation
    }

    pub fn locality(&self) -> &str {
        &self.locality
    }

    pub fn country(&self) -> &str {
        &self.country
    }

    pub fn common_name(&self) -> Option<&str> {
        self.common_name.as_deref()
    }

    pub fn organisation_unit(&self) -> Option<&str> {
        self.organisation_unit.as_deref()
    }

    pub fn state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    /// Present attribute values, in canonical order.
    pub fn components(&self) -> Vec<&str> {
        [
            self.common_name.as_deref(),
            self.organisation_unit.as_deref(),
            Some(self.organisation.as_str()),
            Some(self.locality.as_str()),
            self.state.as_deref(),
            Some(self.country.as_str()),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Same legal entity at organisation level: organisation, locality and
    /// country agree, while CN, OU and ST may differ.
    pub fn matches_organisation(&self, other: &X500Name) -> bool {
        self.organisation == other.organisation
            && self.locality == other.locality
            && self.country == other.country
    }

    /// Component query: with `exact_match` some component must equal `query`,
    /// otherwise some component must contain it, ignoring case.
    pub fn matches_query(&self, query: &str, exact_match: bool) -> bool {
        if exact_match {
            self.components().into_iter().any(|c| c == query)
        } else {
            let needle = query.to_lowercase();
            self.components()
                .into_iter()
                .any(|c| c.to_lowercase().contains(&needle))
        }
    }

    pub(crate) fn build(parts: NameParts) -> IdentityResult<Self> {
        let organisation = parts
            .organisation
            .ok_or_else(|| IdentityError::InvalidName("missing organisation (O)".to_string()))?;
        let locality = parts
            .locality
            .ok_or_else(|| IdentityError::InvalidName("missing locality (L)".to_string()))?;
        let country = parts
            .country
            .ok_or_else(|| IdentityError::InvalidName("missing country (C)".to_string()))?;

        validate_attribute("O", &organisation)?;
        validate_attribute("L", &locality)?;
        validate_country(&country)?;
        for (label, value) in [
            ("CN", &parts.common_name),
            ("OU", &parts.organisation_unit),
            ("ST", &parts.state),
        ] {
            if let Some(value) = value {
                validate_attribute(label, value)?;
            }
        }

        Ok(Self {
            organisation,
            locality,
            country,
            common_name: parts.common_name,
            organisation_unit: parts.organisation_unit,
            state: parts.state,
        })
    }
}

/// Attribute values collected before validation.
#[derive(Debug, Default)]
pub(crate) struct NameParts {
    pub common_name: Option<String>,
    pub organisation_unit: Option<String>,
    pub organisation: Option<String>,
    pub locality: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl NameParts {
    /// Record an attribute by its short label; repeated attributes are rejected.
    pub fn set(&mut self, label: &str, value: String) -> IdentityResult<()> {
        let slot = match label {
            "CN" => &mut self.common_name,
            "OU" => &mut self.organisation_unit,
            "O" => &mut self.organisation,
            "L" => &mut self.locality,
            "ST" => &mut self.state,
            "C" => &mut self.country,
            other => {
                return Err(IdentityError::InvalidName(format!(
                    "unsupported attribute {other}"
                )))
            }
        };
        if slot.is_some() {
            return Err(IdentityError::InvalidName(format!(
                "duplicate attribute {label}"
            )));
        }
        *slot = Some(value);
        Ok(())
    }
}

fn validate_attribute(label: &str, value: &str) -> IdentityResult<()> {
    if value.trim().is_empty() {
        return Err(IdentityError::InvalidName(format!("{label} cannot be empty")));
    }
    if value != value.trim() {
        return Err(IdentityError::InvalidName(format!(
            "{label} has surrounding whitespace"
        )));
    }
    if value.len() > MAX_ATTRIBUTE_LENGTH {
        return Err(IdentityError::InvalidName(format!(
            "{label} exceeds {MAX_ATTRIBUTE_LENGTH} bytes"
        )));
    }
    if value.contains([',', '=']) {
        return Err(IdentityError::InvalidName(format!(
            "{label} contains a reserved character"
        )));
    }
    Ok(())
}

fn validate_country(country: &str) -> IdentityResult<()> {
    if country.len() != 2 || !country.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(IdentityError::InvalidName(format!(
            "country must be a two-letter upper-case code, got {country:?}"
        )));
    }
    Ok(())
}

impl fmt::Display for X500Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let attributes = [
            ("CN", self.common_name.as_deref()),
            ("OU", self.organisation_unit.as_deref()),
            ("O", Some(self.organisation.as_str())),
            ("L", Some(self.locality.as_str())),
            ("ST", self.state.as_deref()),
            ("C", Some(self.country.as_str())),
        ];
        let mut first = true;
        for (label, value) in attributes {
            if let Some(value) = value {
                if !first {
                    f.write_str(", ")?;
                }
                write!(f, "{label}={value}")?;
                first = false;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for X500Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "X500Name({self})")
    }
}

impl FromStr for X500Name {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = NameParts::default();
        for attribute in s.split(',') {
            let (label, value) = attribute.split_once('=').ok_or_else(|| {
                IdentityError::InvalidName(format!("malformed attribute {:?}", attribute.trim()))
            })?;
            parts.set(&label.trim().to_ascii_uppercase(), value.trim().to_string())?;
        }
        Self::build(parts)
    }
}

impl TryFrom<String> for X500Name {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<X500Name> for String {
    fn from(value: X500Name) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_canonical_order() {
        let name: X500Name = "C=GB, L=London, O=Alice Corp, CN=Treasury".parse().unwrap();

        assert_eq!(name.organisation(), "Alice Corp");
        assert_eq!(name.common_name(), Some("Treasury"));
        assert_eq!(name.to_string(), "CN=Treasury, O=Alice Corp, L=London, C=GB");
    }

    #[test]
    fn test_lowercase_labels_accepted() {
        let name: X500Name = "o=Bob Ltd,l=Paris,c=FR".parse().unwrap();
        assert_eq!(name.to_string(), "O=Bob Ltd, L=Paris, C=FR");
    }

    #[test]
    fn test_mandatory_attributes() {
        assert!(matches!(
            "O=Alice Corp, L=London".parse::<X500Name>(),
            Err(IdentityError::InvalidName(_))
        ));
        assert!(matches!(
            "L=London, C=GB".parse::<X500Name>(),
            Err(IdentityError::InvalidName(_))
        ));
    }

    #[test]
    fn test_rejects_bad_attributes() {
        for bad in [
            "O=Alice, L=London, C=gb",
            "O=Alice, L=London, C=GBR",
            "O=Alice, O=Other, L=London, C=GB",
            "O=Alice, L=London, C=GB, E=alice@example.com",
            "O=, L=London, C=GB",
            "O Alice, L=London, C=GB",
        ] {
            assert!(bad.parse::<X500Name>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_builder() {
        let name = X500Name::new("Alice Corp", "London", "GB")
            .unwrap()
            .with_organisation_unit("Payments")
            .unwrap()
            .with_state("Greater London")
            .unwrap();
        assert_eq!(
            name.to_string(),
            "OU=Payments, O=Alice Corp, L=London, ST=Greater London, C=GB"
        );
        assert_eq!(name.to_string().parse::<X500Name>().unwrap(), name);
    }

    #[test]
    fn test_matches_organisation_ignores_leaf_details() {
        let base: X500Name = "O=Alice Corp, L=London, C=GB".parse().unwrap();
        let desk: X500Name = "CN=Desk 7, OU=FX, O=Alice Corp, L=London, C=GB"
            .parse()
            .unwrap();
        let elsewhere: X500Name = "O=Alice Corp, L=Leeds, C=GB".parse().unwrap();

        assert!(base.matches_organisation(&desk));
        assert!(!base.matches_organisation(&elsewhere));
    }

    #[test]
    fn test_matches_query() {
        let name: X500Name = "CN=Settlement, O=Alice Corp, L=London, C=GB".parse().unwrap();

        assert!(name.matches_query("London", true));
        assert!(!name.matches_query("Alice", true));
        assert!(name.matches_query("alice", false));
        assert!(name.matches_query("SETTLE", false));
        assert!(!name.matches_query("Bob", false));
    }

    #[test]
    fn test_serde_uses_text_form() {
        let name: X500Name = "O=Alice Corp, L=London, C=GB".parse().unwrap();
        let json = serde_json::to_string(&name).unwrap();
        assert_eq!(json, "\"O=Alice Corp, L=London, C=GB\"");
        assert_eq!(serde_json::from_str::<X500Name>(&json).unwrap(), name);
    }
}
