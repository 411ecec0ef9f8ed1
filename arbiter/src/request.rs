//! Permission request types
//!
//! One struct per capability kind, plus [`GroupRequest`] for bundled consents.
//! Field names follow the wallet's camelCase event payloads so requests can be
//! deserialized straight from the wallet's callbacks.

use crate::decision::GroupedPermissions;
use crate::error::MalformedRequest;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Anything that carries a correlation id.
pub trait HasId {
    fn id(&self) -> &str;
}

/// The four capability kinds that have their own approval queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Basket,
    Certificate,
    Protocol,
    Spending,
}

impl RequestKind {
    /// Fixed processing order used when vacuuming and releasing.
    pub const ALL: [RequestKind; 4] = [
        RequestKind::Basket,
        RequestKind::Certificate,
        RequestKind::Protocol,
        RequestKind::Spending,
    ];

    pub fn surface(self) -> Surface {
        match self {
            RequestKind::Basket => Surface::Basket,
            RequestKind::Certificate => Surface::Certificate,
            RequestKind::Protocol => Surface::Protocol,
            RequestKind::Spending => Surface::Spending,
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Basket => "basket",
            RequestKind::Certificate => "certificate",
            RequestKind::Protocol => "protocol",
            RequestKind::Spending => "spending",
        };
        f.write_str(name)
    }
}

/// A modal the host can show. Every request kind has one, and grouped
/// permission requests have their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Surface {
    Basket,
    Certificate,
    Protocol,
    Spending,
    Group,
}

impl fmt::Display for Surface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Surface::Basket => RequestKind::Basket.fmt(f),
            Surface::Certificate => RequestKind::Certificate.fmt(f),
            Surface::Protocol => RequestKind::Protocol.fmt(f),
            Surface::Spending => RequestKind::Spending.fmt(f),
            Surface::Group => f.write_str("group"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasketAccessRequest {
    #[serde(default, alias = "requestID")]
    pub id: String,
    #[serde(default)]
    pub basket: Option<String>,
    #[serde(default)]
    pub originator: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub renewal: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAccessRequest {
    #[serde(default, alias = "requestID")]
    pub id: String,
    #[serde(default)]
    pub originator: String,
    #[serde(default)]
    pub certificate_type: Option<String>,
    /// Requested field names. Order is irrelevant to coverage.
    #[serde(default)]
    pub fields: BTreeSet<String>,
    #[serde(default, alias = "verifierPublicKey")]
    pub verifier: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub renewal: Option<bool>,
}

/// What a protocol permission prompt is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolRequestKind {
    Identity,
    Protocol,
    Renewal,
    Basket,
}

impl Default for ProtocolRequestKind {
    fn default() -> Self {
        ProtocolRequestKind::Protocol
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolAccessRequest {
    #[serde(default, alias = "requestID")]
    pub id: String,
    #[serde(default)]
    pub security_level: u8,
    #[serde(default, alias = "protocolID")]
    pub protocol_id: String,
    #[serde(default)]
    pub counterparty: Option<String>,
    #[serde(default)]
    pub originator: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub renewal: Option<bool>,
    #[serde(default, rename = "type", alias = "kind")]
    pub kind: ProtocolRequestKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemKind {
    Input,
    Output,
    Fee,
}

/// One line of a spending breakdown shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    #[serde(rename = "type")]
    pub kind: LineItemKind,
    #[serde(default)]
    pub description: String,
    pub satoshis: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingRequest {
    #[serde(default, alias = "requestID")]
    pub id: String,
    #[serde(default)]
    pub originator: String,
    /// Satoshis.
    #[serde(default)]
    pub authorization_amount: u64,
    #[serde(default)]
    pub line_items: Vec<LineItem>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub renewal: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupRequest {
    #[serde(default, alias = "requestID")]
    pub id: String,
    #[serde(default)]
    pub originator: String,
    #[serde(default)]
    pub permissions: GroupedPermissions,
}

macro_rules! impl_has_id {
    ($($ty:ty),*) => {
        $(impl HasId for $ty {
            fn id(&self) -> &str {
                &self.id
            }
        })*
    };
}

impl_has_id!(
    BasketAccessRequest,
    CertificateAccessRequest,
    ProtocolAccessRequest,
    SpendingRequest,
    GroupRequest
);

/// Any request that can reach the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "request", rename_all = "snake_case")]
pub enum PermissionRequest {
    Basket(BasketAccessRequest),
    Certificate(CertificateAccessRequest),
    Protocol(ProtocolAccessRequest),
    Spending(SpendingRequest),
    Group(GroupRequest),
}

impl PermissionRequest {
    /// Queue kind, or `None` for group requests which are gated separately.
    pub fn kind(&self) -> Option<RequestKind> {
        match self {
            PermissionRequest::Basket(_) => Some(RequestKind::Basket),
            PermissionRequest::Certificate(_) => Some(RequestKind::Certificate),
            PermissionRequest::Protocol(_) => Some(RequestKind::Protocol),
            PermissionRequest::Spending(_) => Some(RequestKind::Spending),
            PermissionRequest::Group(_) => None,
        }
    }

    pub fn surface(&self) -> Surface {
        self.kind().map(RequestKind::surface).unwrap_or(Surface::Group)
    }

    /// Admission check for required fields.
    pub fn validate(&self) -> Result<(), MalformedRequest> {
        if self.id().trim().is_empty() {
            return Err(MalformedRequest::MissingId);
        }
        if let PermissionRequest::Protocol(req) = self {
            if req.protocol_id.trim().is_empty() {
                return Err(MalformedRequest::MissingProtocolId(req.id.clone()));
            }
        }
        Ok(())
    }
}

impl HasId for PermissionRequest {
    fn id(&self) -> &str {
        match self {
            PermissionRequest::Basket(r) => r.id(),
            PermissionRequest::Certificate(r) => r.id(),
            PermissionRequest::Protocol(r) => r.id(),
            PermissionRequest::Spending(r) => r.id(),
            PermissionRequest::Group(r) => r.id(),
        }
    }
}

impl From<BasketAccessRequest> for PermissionRequest {
    fn from(r: BasketAccessRequest) -> Self {
        PermissionRequest::Basket(r)
    }
}

impl From<CertificateAccessRequest> for PermissionRequest {
    fn from(r: CertificateAccessRequest) -> Self {
        PermissionRequest::Certificate(r)
    }
}

impl From<ProtocolAccessRequest> for PermissionRequest {
    fn from(r: ProtocolAccessRequest) -> Self {
        PermissionRequest::Protocol(r)
    }
}

impl From<SpendingRequest> for PermissionRequest {
    fn from(r: SpendingRequest) -> Self {
        PermissionRequest::Spending(r)
    }
}

impl From<GroupRequest> for PermissionRequest {
    fn from(r: GroupRequest) -> Self {
        PermissionRequest::Group(r)
    }
}
