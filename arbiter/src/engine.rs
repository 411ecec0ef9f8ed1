//! Arbitration engine
//!
//! Every trigger (the five wallet callbacks, individual resolutions, group
//! grant/deny and the grace timer) mutates one [`EngineState`] behind one
//! async mutex. Transitions never await I/O while holding it: host effects are
//! queued in order on the effect channel, and wallet calls happen before the
//! lock is taken for the follow-up transition.

use crate::config::ArbiterConfig;
use crate::decision::project_value;
use crate::error::{ArbiterError, ArbiterResult, MalformedRequest};
use crate::focus::{EpisodeEdge, EpisodeTracker, FocusControl, FocusCoordinator};
use crate::gate::{GatePhase, GroupGate, ReleaseSignal, Released};
use crate::host::{run_effect_driver, HostEffect, ModalPresenter, WalletPermissions};
use crate::queue::{LiveQueues, QueueTransition, RequestQueue};
use crate::request::{
    BasketAccessRequest, CertificateAccessRequest, GroupRequest, HasId, PermissionRequest,
    ProtocolAccessRequest, RequestKind, SpendingRequest, Surface,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Events delivered by the wallet's permission callbacks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "request", rename_all = "snake_case")]
pub enum PermissionEvent {
    BasketAccessRequested(BasketAccessRequest),
    CertificateAccessRequested(CertificateAccessRequest),
    ProtocolPermissionRequested(ProtocolAccessRequest),
    SpendingAuthorizationRequested(SpendingRequest),
    GroupedPermissionRequested(GroupRequest),
}

impl From<PermissionEvent> for PermissionRequest {
    fn from(event: PermissionEvent) -> Self {
        match event {
            PermissionEvent::BasketAccessRequested(r) => r.into(),
            PermissionEvent::CertificateAccessRequested(r) => r.into(),
            PermissionEvent::ProtocolPermissionRequested(r) => r.into(),
            PermissionEvent::SpendingAuthorizationRequested(r) => r.into(),
            PermissionEvent::GroupedPermissionRequested(r) => r.into(),
        }
    }
}

/// Running totals. `admitted - advanced - discarded` always equals the
/// number of requests held in live queues, the deferred buffer and the
/// group queue together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbiterStats {
    pub admitted: u64,
    pub advanced: u64,
    pub discarded: u64,
    pub dropped_malformed: u64,
}

/// Point-in-time view for UIs and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatus {
    pub phase: GatePhase,
    pub live: BTreeMap<RequestKind, usize>,
    pub deferred: usize,
    pub groups: usize,
    pub stats: ArbiterStats,
}

impl EngineStatus {
    pub fn held(&self) -> usize {
        self.live.values().sum::<usize>() + self.deferred + self.groups
    }
}

struct EngineState {
    live: LiveQueues,
    groups: RequestQueue<GroupRequest>,
    gate: GroupGate,
    episodes: EpisodeTracker,
    in_flight: HashSet<String>,
    /// Group ids whose grant/deny is being delivered to the wallet.
    resolving: HashSet<String>,
    stats: ArbiterStats,
}

impl EngineState {
    fn new() -> Self {
        Self {
            live: LiveQueues::default(),
            groups: RequestQueue::new(Surface::Group),
            gate: GroupGate::new(),
            episodes: EpisodeTracker::default(),
            in_flight: HashSet::new(),
            resolving: HashSet::new(),
            stats: ArbiterStats::default(),
        }
    }
}

/// Collects host effects produced by one transition.
#[derive(Default)]
struct Effects(Vec<HostEffect>);

impl Effects {
    fn open(&mut self, episodes: &mut EpisodeTracker, surface: Surface) {
        if episodes.open(surface) == Some(EpisodeEdge::Began) {
            self.0.push(HostEffect::BeginEpisode);
        }
        self.0.push(HostEffect::OpenModal(surface));
    }

    fn close(&mut self, episodes: &mut EpisodeTracker, surface: Surface) {
        self.0.push(HostEffect::CloseModal(surface));
        if episodes.close(surface) == Some(EpisodeEdge::Ended) {
            self.0.push(HostEffect::EndEpisode);
        }
    }

    fn apply(&mut self, episodes: &mut EpisodeTracker, surface: Surface, transition: QueueTransition) {
        match transition {
            QueueTransition::Opened => self.open(episodes, surface),
            QueueTransition::Closed => self.close(episodes, surface),
            QueueTransition::Unchanged => {}
        }
    }
}

struct Shared {
    state: Mutex<EngineState>,
    effects: mpsc::UnboundedSender<HostEffect>,
    config: ArbiterConfig,
}

impl Shared {
    /// Must be called with the state lock held so effects keep transition order.
    fn emit(&self, effects: Effects) {
        for effect in effects.0 {
            if self.effects.send(effect).is_err() {
                warn!("[ArbitrationEngine] effect driver is gone, dropping host effect");
                return;
            }
        }
    }

    fn finish_release(
        &self,
        state: &mut EngineState,
        released: Released,
        effects: &mut Effects,
    ) {
        for item in &released.covered {
            debug!(
                "[ArbitrationEngine] {} request {} covered by group {}",
                item.surface(),
                item.id(),
                released.trigger
            );
            state.in_flight.remove(item.id());
        }
        state.stats.discarded += released.covered.len() as u64;
        for surface in released.opened {
            effects.open(&mut state.episodes, surface);
        }
    }
}

/// Cloneable handle to the arbitration engine.
#[derive(Clone)]
pub struct ArbitrationEngine {
    shared: Arc<Shared>,
    wallet: Arc<dyn WalletPermissions>,
}

impl ArbitrationEngine {
    /// Creates the engine and spawns its effect driver. Must be called from
    /// within a tokio runtime.
    pub fn new(
        config: ArbiterConfig,
        wallet: Arc<dyn WalletPermissions>,
        focus: Arc<dyn FocusControl>,
        modals: Arc<dyn ModalPresenter>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_effect_driver(rx, FocusCoordinator::new(focus), modals));
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::new()),
                effects: tx,
                config,
            }),
            wallet,
        }
    }

    pub fn config(&self) -> &ArbiterConfig {
        &self.shared.config
    }

    pub async fn on_basket_access_requested(&self, request: BasketAccessRequest) {
        self.admit(request.into()).await
    }

    pub async fn on_certificate_access_requested(&self, request: CertificateAccessRequest) {
        self.admit(request.into()).await
    }

    pub async fn on_protocol_permission_requested(&self, request: ProtocolAccessRequest) {
        self.admit(request.into()).await
    }

    pub async fn on_spending_authorization_requested(&self, request: SpendingRequest) {
        self.admit(request.into()).await
    }

    pub async fn on_grouped_permission_requested(&self, request: GroupRequest) {
        self.admit(request.into()).await
    }

    pub async fn handle_event(&self, event: PermissionEvent) {
        self.admit(event.into()).await
    }

    /// Feeds wallet events into the engine until the channel closes.
    pub fn listen(&self, mut events: mpsc::Receiver<PermissionEvent>) -> JoinHandle<()> {
        let engine = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                engine.handle_event(event).await;
            }
            debug!("[ArbitrationEngine] wallet event channel closed");
        })
    }

    async fn admit(&self, request: PermissionRequest) {
        let mut state = self.shared.state.lock().await;

        let check = request.validate().and_then(|_| {
            if state.in_flight.contains(request.id()) {
                Err(MalformedRequest::DuplicateId(request.id().to_string()))
            } else {
                Ok(())
            }
        });
        if let Err(reason) = check {
            warn!("[ArbitrationEngine] dropping {} request: {}", request.surface(), reason);
            state.stats.dropped_malformed += 1;
            return;
        }

        state.in_flight.insert(request.id().to_string());
        state.stats.admitted += 1;

        let mut effects = Effects::default();
        match request {
            PermissionRequest::Group(group) => self.admit_group(&mut state, group, &mut effects),
            other => {
                let request = match state.gate.defer(other) {
                    Ok(()) => return,
                    Err(request) => request,
                };
                let Some(kind) = request.kind() else {
                    return;
                };
                debug!("[ArbitrationEngine] queued {} request {}", kind, request.id());
                let transition = state.live.get_mut(kind).enqueue(request);
                effects.apply(&mut state.episodes, kind.surface(), transition);
            }
        }
        self.shared.emit(effects);
    }

    fn admit_group(&self, state: &mut EngineState, group: GroupRequest, effects: &mut Effects) {
        let group_id = group.id.clone();
        info!(
            "[ArbitrationEngine] grouped permission request {} from {}",
            group_id, group.originator
        );
        let transition = state.groups.enqueue(group);
        effects.apply(&mut state.episodes, Surface::Group, transition);

        if transition != QueueTransition::Opened || state.gate.is_pending() {
            return;
        }
        let EngineState {
            live,
            gate,
            episodes,
            ..
        } = state;
        if let Some(engaged) = gate.engage(&group_id, live) {
            for surface in engaged.closed {
                effects.close(episodes, surface);
            }
            let timer = self.spawn_grace_timer(engaged.epoch);
            gate.arm_timer(engaged.epoch, timer);
        }
    }

    fn spawn_grace_timer(&self, epoch: u64) -> JoinHandle<()> {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        let grace = self.shared.config.grace_window();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(shared) = shared.upgrade() else {
                return;
            };
            let mut state = shared.state.lock().await;
            let EngineState { live, gate, .. } = &mut *state;
            let Some(released) = gate.release(ReleaseSignal::Timeout { epoch }, None, live) else {
                return;
            };
            info!(
                "[ArbitrationEngine] grace window elapsed for epoch {}, {} request(s) back in queues",
                epoch, released.requeued
            );
            let mut effects = Effects::default();
            shared.finish_release(&mut state, released, &mut effects);
            shared.emit(effects);
        })
    }

    /// Removes the head of `kind`'s queue once the caller has told the wallet
    /// what the user decided. Returns the removed request.
    pub async fn advance(&self, kind: RequestKind) -> Option<PermissionRequest> {
        let mut state = self.shared.state.lock().await;
        let (head, transition) = state.live.get_mut(kind).advance();
        let head = head?;
        state.in_flight.remove(head.id());
        state.stats.advanced += 1;
        debug!("[ArbitrationEngine] advanced {} queue past {}", kind, head.id());

        let mut effects = Effects::default();
        effects.apply(&mut state.episodes, kind.surface(), transition);
        self.shared.emit(effects);
        Some(head)
    }

    /// Grants grouped request `group_id` with the user-approved `granted`
    /// payload, then releases the gate with the projected decision.
    ///
    /// If the wallet rejects the grant, the gate is still released but with
    /// a decision that covers nothing, and the wallet error is returned.
    /// The grace timer keeps running during the wallet call; if it fires
    /// first, the late grant finds the gate idle and covers nothing.
    pub async fn grant_group(&self, group_id: &str, granted: JsonValue) -> ArbiterResult<()> {
        if !self.begin_group_resolution(group_id).await {
            return Ok(());
        }
        let outcome = self.wallet.grant_grouped_permission(group_id, &granted).await;
        let decision = match &outcome {
            Ok(()) => Some(project_value(&granted)),
            Err(e) => {
                warn!("[ArbitrationEngine] wallet rejected grant for {}: {}", group_id, e);
                None
            }
        };
        self.finish_group_resolution(group_id, ReleaseSignal::Granted { group_id }, decision)
            .await;
        outcome
    }

    /// Denies grouped request `group_id`. Deferred requests all go back to
    /// individual approval.
    pub async fn deny_group(&self, group_id: &str) -> ArbiterResult<()> {
        if !self.begin_group_resolution(group_id).await {
            return Ok(());
        }
        let outcome = self.wallet.deny_grouped_permission(group_id).await;
        if let Err(e) = &outcome {
            warn!("[ArbitrationEngine] wallet rejected deny for {}: {}", group_id, e);
        }
        self.finish_group_resolution(group_id, ReleaseSignal::Denied { group_id }, None)
            .await;
        outcome
    }

    /// Forwards a revocation to the wallet.
    pub async fn revoke_permission(&self, token: &JsonValue) -> ArbiterResult<()> {
        self.wallet.revoke_permission(token).await
    }

    /// Claims `group_id` for resolution. Returns false for unknown, already
    /// resolved or concurrently resolving groups.
    async fn begin_group_resolution(&self, group_id: &str) -> bool {
        let mut state = self.shared.state.lock().await;
        if !state.groups.contains(group_id) || !state.resolving.insert(group_id.to_string()) {
            debug!(
                "[ArbitrationEngine] ignoring resolution for unknown or settled group {}",
                group_id
            );
            return false;
        }
        true
    }

    async fn finish_group_resolution(
        &self,
        group_id: &str,
        signal: ReleaseSignal<'_>,
        decision: Option<crate::decision::GrantDecision>,
    ) {
        let mut state = self.shared.state.lock().await;
        state.resolving.remove(group_id);

        let mut effects = Effects::default();
        if let Some((_, transition)) = state.groups.remove(group_id) {
            state.in_flight.remove(group_id);
            state.stats.advanced += 1;
            effects.apply(&mut state.episodes, Surface::Group, transition);
        }

        let EngineState { live, gate, .. } = &mut *state;
        if let Some(released) = gate.release(signal, decision.as_ref(), live) {
            self.shared.finish_release(&mut state, released, &mut effects);
        }
        self.shared.emit(effects);
    }

    /// Live requests of `kind`, head first.
    pub async fn pending(&self, kind: RequestKind) -> Vec<PermissionRequest> {
        self.shared.state.lock().await.live.get(kind).peek_all()
    }

    /// Grouped requests waiting for an answer, head first.
    pub async fn pending_groups(&self) -> Vec<GroupRequest> {
        self.shared.state.lock().await.groups.peek_all()
    }

    pub async fn status(&self) -> EngineStatus {
        let state = self.shared.state.lock().await;
        EngineStatus {
            phase: state.gate.phase(),
            live: RequestKind::ALL
                .into_iter()
                .map(|kind| (kind, state.live.get(kind).len()))
                .collect(),
            deferred: state.gate.deferred().len(),
            groups: state.groups.len(),
            stats: state.stats,
        }
    }

    /// Waits until every host effect issued so far has been performed.
    pub async fn settle(&self) -> ArbiterResult<()> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .effects
            .send(HostEffect::Settle(tx))
            .map_err(|_| ArbiterError::EngineClosed)?;
        rx.await.map_err(|_| ArbiterError::EngineClosed)
    }
}
