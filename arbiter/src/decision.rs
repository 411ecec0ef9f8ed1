//! Grouped-grant payloads and the decisions projected from them.
//!
//! A grouped grant arrives as loosely shaped JSON: the wallet uses long field
//! names (`protocolPermissions`, `basketAccess`, ...), older callers use short
//! ones, and individual entries come in several forms. [`GroupedPermissions`]
//! spells out every accepted shape as an untagged enum with an
//! `Unrecognized` branch, and [`project`] folds it into a [`GrantDecision`].
//!
//! Projection is total. Anything that is not understood contributes nothing
//! to the decision; only an explicit wildcard yields [`ProtocolScope::AllowAll`].

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use tracing::debug;

/// A grouped permission request or grant, as the wallet sends it.
///
/// Each section accepts its short key or the wallet's long key, not both.
/// A payload carrying both fails to parse and projects to an empty grant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupedPermissions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        alias = "protocolPermissions",
        skip_serializing_if = "Option::is_none"
    )]
    pub protocols: Option<ProtocolGrants>,
    #[serde(default, alias = "basketAccess", skip_serializing_if = "Option::is_none")]
    pub baskets: Option<Vec<BasketEntry>>,
    #[serde(
        default,
        alias = "certificateAccess",
        skip_serializing_if = "Option::is_none"
    )]
    pub certificates: Option<Vec<CertificateEntry>>,
    #[serde(
        default,
        alias = "spendingAuthorization",
        skip_serializing_if = "Option::is_none"
    )]
    pub spending: Option<SpendingEntry>,
}

/// Protocol section of a grant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProtocolGrants {
    List(Vec<ProtocolEntry>),
    /// `"*"` or `"all"` grants every protocol. Any other string grants nothing.
    Wildcard(String),
    /// `{"all": true}`
    Flag { all: bool },
    Unrecognized(JsonValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProtocolEntry {
    /// `[securityLevel, "name"]`
    Tuple(u64, String),
    Name(String),
    Record {
        #[serde(rename = "protocolID", alias = "protocolId")]
        protocol_id: ProtocolId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        counterparty: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Unrecognized(JsonValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProtocolId {
    Tuple(u64, String),
    Name(String),
}

impl ProtocolId {
    fn name(&self) -> &str {
        match self {
            ProtocolId::Tuple(_, name) | ProtocolId::Name(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BasketEntry {
    Name(String),
    Record {
        basket: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Unrecognized(JsonValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CertificateEntry {
    Record {
        #[serde(rename = "type", alias = "certificateType")]
        cert_type: String,
        /// `None` means any field of this type.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fields: Option<Vec<String>>,
        #[serde(
            default,
            rename = "verifierPublicKey",
            skip_serializing_if = "Option::is_none"
        )]
        verifier: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Unrecognized(JsonValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SpendingEntry {
    Amount(u64),
    Record {
        #[serde(alias = "amount")]
        satoshis: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        description: Option<String>,
    },
    Unrecognized(JsonValue),
}

/// Which protocols a decision authorizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolScope {
    AllowAll,
    Named(BTreeSet<String>),
}

impl Default for ProtocolScope {
    fn default() -> Self {
        ProtocolScope::Named(BTreeSet::new())
    }
}

/// Which fields of a certificate type a decision authorizes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldScope {
    AllowAllFields,
    /// An empty set authorizes no fields.
    Only(BTreeSet<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRule {
    pub cert_type: String,
    pub fields: FieldScope,
}

/// Normalized result of a grouped grant.
///
/// The default value authorizes nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrantDecision {
    pub protocols: ProtocolScope,
    pub baskets: BTreeSet<String>,
    pub certificates: Vec<CertificateRule>,
    /// Satoshis. `None` authorizes no spending.
    pub spending_ceiling: Option<u64>,
}

fn is_wildcard(s: &str) -> bool {
    let s = s.trim();
    s == "*" || s.eq_ignore_ascii_case("all")
}

/// Projects a typed grant into a decision.
pub fn project(granted: &GroupedPermissions) -> GrantDecision {
    let protocols = match &granted.protocols {
        Some(ProtocolGrants::Wildcard(s)) if is_wildcard(s) => ProtocolScope::AllowAll,
        Some(ProtocolGrants::Flag { all: true }) => ProtocolScope::AllowAll,
        Some(ProtocolGrants::List(entries)) => ProtocolScope::Named(
            entries
                .iter()
                .filter_map(|entry| match entry {
                    ProtocolEntry::Tuple(_, name) | ProtocolEntry::Name(name) => {
                        Some(name.clone())
                    }
                    ProtocolEntry::Record { protocol_id, .. } => {
                        Some(protocol_id.name().to_string())
                    }
                    ProtocolEntry::Unrecognized(_) => None,
                })
                .collect(),
        ),
        _ => ProtocolScope::default(),
    };

    let baskets = granted
        .baskets
        .iter()
        .flatten()
        .filter_map(|entry| match entry {
            BasketEntry::Name(name) | BasketEntry::Record { basket: name, .. } => {
                Some(name.clone())
            }
            BasketEntry::Unrecognized(_) => None,
        })
        .collect();

    let certificates = granted
        .certificates
        .iter()
        .flatten()
        .filter_map(|entry| match entry {
            CertificateEntry::Record {
                cert_type, fields, ..
            } => Some(CertificateRule {
                cert_type: cert_type.clone(),
                fields: match fields {
                    None => FieldScope::AllowAllFields,
                    Some(list) => FieldScope::Only(list.iter().cloned().collect()),
                },
            }),
            CertificateEntry::Unrecognized(_) => None,
        })
        .collect();

    let spending_ceiling = match &granted.spending {
        Some(SpendingEntry::Amount(sats)) | Some(SpendingEntry::Record { satoshis: sats, .. }) => {
            Some(*sats)
        }
        _ => None,
    };

    GrantDecision {
        protocols,
        baskets,
        certificates,
        spending_ceiling,
    }
}

/// Projects a raw JSON grant. A payload that does not even parse as an object
/// projects to the empty decision.
pub fn project_value(granted: &JsonValue) -> GrantDecision {
    match serde_json::from_value::<GroupedPermissions>(granted.clone()) {
        Ok(permissions) => project(&permissions),
        Err(e) => {
            debug!("[DecisionProjector] unreadable grant payload, covering nothing: {}", e);
            GrantDecision::default()
        }
    }
}
