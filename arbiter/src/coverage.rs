//! Coverage: does a grouped grant already authorize a pending request?
//!
//! Pure and deterministic. A missing decision (deny or timeout) covers
//! nothing, and so does any request shape this module does not know how to
//! match.

use crate::decision::{FieldScope, GrantDecision, ProtocolScope};
use crate::request::PermissionRequest;

pub fn covers(decision: Option<&GrantDecision>, request: &PermissionRequest) -> bool {
    let Some(decision) = decision else {
        return false;
    };

    match request {
        PermissionRequest::Basket(req) => match &req.basket {
            Some(basket) => decision.baskets.contains(basket),
            None => false,
        },
        PermissionRequest::Certificate(req) => {
            let Some(cert_type) = &req.certificate_type else {
                return false;
            };
            decision
                .certificates
                .iter()
                .filter(|rule| &rule.cert_type == cert_type)
                .any(|rule| match &rule.fields {
                    FieldScope::AllowAllFields => true,
                    FieldScope::Only(allowed) => req.fields.is_subset(allowed),
                })
        }
        PermissionRequest::Protocol(req) => match &decision.protocols {
            ProtocolScope::AllowAll => true,
            ProtocolScope::Named(names) => names.contains(&req.protocol_id),
        },
        PermissionRequest::Spending(req) => decision
            .spending_ceiling
            .map_or(false, |ceiling| req.authorization_amount <= ceiling),
        PermissionRequest::Group(_) => false,
    }
}
