//! Collaborators outside the engine and the driver that talks to them.
//!
//! State transitions never await host I/O. Instead they emit [`HostEffect`]s
//! onto an unbounded channel while still holding the engine lock, which fixes
//! their order; a single driver task then performs them one at a time.

use crate::error::ArbiterResult;
use crate::focus::FocusCoordinator;
use crate::request::Surface;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// The wallet's permission manager.
#[async_trait]
pub trait WalletPermissions: Send + Sync {
    async fn grant_grouped_permission(&self, request_id: &str, granted: &JsonValue)
        -> ArbiterResult<()>;

    async fn deny_grouped_permission(&self, request_id: &str) -> ArbiterResult<()>;

    async fn revoke_permission(&self, token: &JsonValue) -> ArbiterResult<()>;
}

/// UI layer that renders one modal per [`Surface`].
#[async_trait]
pub trait ModalPresenter: Send + Sync {
    async fn open_modal(&self, surface: Surface);

    async fn close_modal(&self, surface: Surface);
}

#[derive(Debug)]
pub enum HostEffect {
    BeginEpisode,
    EndEpisode,
    OpenModal(Surface),
    CloseModal(Surface),
    /// Acknowledged once every earlier effect has run.
    Settle(oneshot::Sender<()>),
}

/// Runs host effects in emission order until every sender is dropped.
pub async fn run_effect_driver(
    mut effects: mpsc::UnboundedReceiver<HostEffect>,
    mut focus: FocusCoordinator,
    modals: Arc<dyn ModalPresenter>,
) {
    while let Some(effect) = effects.recv().await {
        match effect {
            HostEffect::BeginEpisode => {
                focus.begin_episode().await;
            }
            HostEffect::EndEpisode => focus.finish_episode().await,
            HostEffect::OpenModal(surface) => modals.open_modal(surface).await,
            HostEffect::CloseModal(surface) => modals.close_modal(surface).await,
            HostEffect::Settle(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("[EffectDriver] effect channel closed, driver exiting");
}
