//! Permission-request arbitration for a wallet host.
//!
//! Untrusted originators ask for baskets, certificates, protocols and
//! spending. Each kind gets its own approval queue and modal; a grouped
//! permission request temporarily gates all four so that one consent can
//! settle many pending prompts at once.
//!
//! # Architecture
//!
//! ```text
//!  wallet callbacks ──▶ ArbitrationEngine (one mutex) ──▶ effect channel ──▶ EffectDriver
//!                         │  LiveQueues x4                                  ├─ FocusCoordinator
//!                         │  group RequestQueue                             └─ ModalPresenter
//!                         │  GroupGate ── DeferredBuffer
//!                         │     └─ release: project() ─▶ covers()
//!                         └─ grace timer (one per pending epoch)
//! ```
//!
//! [`snapshot`] is independent of the engine: it frames the persisted
//! wallet snapshot together with the app configuration.

pub mod config;
pub mod coverage;
pub mod decision;
pub mod engine;
pub mod error;
pub mod focus;
pub mod gate;
pub mod host;
pub mod queue;
pub mod request;
pub mod snapshot;

// Re-export main types for convenience
pub use config::{ArbiterConfig, WalletConfig};
pub use coverage::covers;
pub use decision::{project, project_value, GrantDecision, GroupedPermissions};
pub use engine::{ArbitrationEngine, EngineStatus, PermissionEvent};
pub use error::{ArbiterError, ArbiterResult, MalformedRequest, SnapshotError};
pub use focus::FocusControl;
pub use gate::GatePhase;
pub use host::{ModalPresenter, WalletPermissions};
pub use request::*;
pub use snapshot::SnapshotEnvelope;
