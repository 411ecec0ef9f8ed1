//! Group gate: holds individual requests back while a grouped permission
//! request is in front of the user.
//!
//! ```text
//!            group request reaches an empty group queue
//!   ┌──────┐ ─────────────────────────────────────────▶ ┌─────────┐
//!   │ Idle │   vacuum live queues into deferred buffer  │ Pending │ ◀─┐ new requests
//!   └──────┘ ◀───────────────────────────────────────── └─────────┘ ──┘ are deferred
//!              grant / deny / grace timeout:
//!              drop covered items, requeue the rest
//! ```
//!
//! The gate only manipulates state. The engine calls it under its lock and
//! turns the returned [`Engaged`] / [`Released`] reports into host effects.

use crate::coverage::covers;
use crate::decision::GrantDecision;
use crate::queue::{LiveQueues, QueueTransition};
use crate::request::{HasId, PermissionRequest, RequestKind, Surface};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatePhase {
    Idle,
    Pending,
}

/// What ended a pending episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseTrigger {
    Granted,
    Denied,
    Timeout,
}

impl fmt::Display for ReleaseTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseTrigger::Granted => write!(f, "grant"),
            ReleaseTrigger::Denied => write!(f, "deny"),
            ReleaseTrigger::Timeout => write!(f, "timeout"),
        }
    }
}

/// A release signal, tagged with what it applies to so stale signals can be
/// told apart from live ones.
#[derive(Debug, Clone, Copy)]
pub enum ReleaseSignal<'a> {
    Granted { group_id: &'a str },
    Denied { group_id: &'a str },
    Timeout { epoch: u64 },
}

impl ReleaseSignal<'_> {
    fn trigger(&self) -> ReleaseTrigger {
        match self {
            ReleaseSignal::Granted { .. } => ReleaseTrigger::Granted,
            ReleaseSignal::Denied { .. } => ReleaseTrigger::Denied,
            ReleaseSignal::Timeout { .. } => ReleaseTrigger::Timeout,
        }
    }
}

/// Requests held back during a pending episode, in arrival order per kind.
#[derive(Debug, Default)]
pub struct DeferredBuffer {
    lists: BTreeMap<RequestKind, Vec<PermissionRequest>>,
}

impl DeferredBuffer {
    fn push(&mut self, kind: RequestKind, request: PermissionRequest) {
        self.lists.entry(kind).or_default().push(request);
    }

    pub fn get(&self, kind: RequestKind) -> &[PermissionRequest] {
        self.lists.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.lists.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lists.values().flatten().any(|r| r.id() == id)
    }

    fn take(&mut self) -> BTreeMap<RequestKind, Vec<PermissionRequest>> {
        std::mem::take(&mut self.lists)
    }
}

/// Report of an Idle -> Pending transition.
#[derive(Debug)]
pub struct Engaged {
    pub epoch: u64,
    pub vacuumed: usize,
    /// Modals to close, in kind order.
    pub closed: Vec<Surface>,
}

/// Report of a Pending -> Idle transition.
#[derive(Debug)]
pub struct Released {
    pub trigger: ReleaseTrigger,
    /// Deferred items resolved by the grant and dropped.
    pub covered: Vec<PermissionRequest>,
    pub requeued: usize,
    /// Modals to reopen, in kind order.
    pub opened: Vec<Surface>,
}

#[derive(Debug)]
pub struct GroupGate {
    phase: GatePhase,
    deferred: DeferredBuffer,
    epoch: u64,
    group_id: Option<String>,
    timer: Option<JoinHandle<()>>,
}

impl Default for GroupGate {
    fn default() -> Self {
        Self::new()
    }
}

impl GroupGate {
    pub fn new() -> Self {
        Self {
            phase: GatePhase::Idle,
            deferred: DeferredBuffer::default(),
            epoch: 0,
            group_id: None,
            timer: None,
        }
    }

    pub fn phase(&self) -> GatePhase {
        self.phase
    }

    pub fn is_pending(&self) -> bool {
        self.phase == GatePhase::Pending
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Group request that armed the current pending episode.
    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub fn deferred(&self) -> &DeferredBuffer {
        &self.deferred
    }

    /// Idle -> Pending. Moves every live request into the deferred buffer.
    ///
    /// Returns `None` if the gate is already pending.
    pub fn engage(&mut self, group_id: &str, live: &mut LiveQueues) -> Option<Engaged> {
        if self.is_pending() {
            return None;
        }
        self.cancel_timer();

        let mut vacuumed = 0;
        let mut closed = Vec::new();
        for kind in RequestKind::ALL {
            let (items, transition) = live.get_mut(kind).drain();
            vacuumed += items.len();
            for item in items {
                self.deferred.push(kind, item);
            }
            if transition == QueueTransition::Closed {
                closed.push(kind.surface());
            }
        }

        self.epoch += 1;
        self.phase = GatePhase::Pending;
        self.group_id = Some(group_id.to_string());
        info!(
            "[GroupGate] group request {} engaged gate (epoch {}), deferred {} live request(s)",
            group_id, self.epoch, vacuumed
        );

        Some(Engaged {
            epoch: self.epoch,
            vacuumed,
            closed,
        })
    }

    /// Parks a request that arrived while pending. Hands it back when idle.
    pub fn defer(&mut self, request: PermissionRequest) -> Result<(), PermissionRequest> {
        match (self.phase, request.kind()) {
            (GatePhase::Pending, Some(kind)) => {
                debug!("[GroupGate] deferring {} request {}", kind, request.id());
                self.deferred.push(kind, request);
                Ok(())
            }
            _ => Err(request),
        }
    }

    /// Stores the grace timer for `epoch`. A timer for any other epoch is
    /// aborted immediately.
    pub fn arm_timer(&mut self, epoch: u64, timer: JoinHandle<()>) {
        if self.is_pending() && epoch == self.epoch {
            self.cancel_timer();
            self.timer = Some(timer);
        } else {
            timer.abort();
        }
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    /// Pending -> Idle.
    ///
    /// Deferred items covered by `decision` are dropped; the rest go back to
    /// their live queues in order. Signals that do not match the current
    /// episode, or arrive while idle, are ignored and return `None`.
    ///
    /// A timeout release leaves the group request and its modal in place, so
    /// modals reopened here join the focus episode the group modal is still
    /// holding. Grant and deny close the group modal first, so reopened
    /// modals start a new episode.
    pub fn release(
        &mut self,
        signal: ReleaseSignal<'_>,
        decision: Option<&GrantDecision>,
        live: &mut LiveQueues,
    ) -> Option<Released> {
        if !self.is_pending() {
            return None;
        }
        let matches = match signal {
            ReleaseSignal::Granted { group_id } | ReleaseSignal::Denied { group_id } => {
                self.group_id.as_deref() == Some(group_id)
            }
            ReleaseSignal::Timeout { epoch } => epoch == self.epoch,
        };
        if !matches {
            debug!("[GroupGate] ignoring stale {:?}", signal);
            return None;
        }

        match signal.trigger() {
            // Timeout releases run on the timer task itself: detach, never abort.
            ReleaseTrigger::Timeout => {
                self.timer.take();
            }
            _ => self.cancel_timer(),
        }

        let mut covered = Vec::new();
        let mut requeued = 0;
        let mut opened = Vec::new();
        for (kind, items) in self.deferred.take() {
            for item in items {
                if covers(decision, &item) {
                    covered.push(item);
                    continue;
                }
                requeued += 1;
                if live.get_mut(kind).enqueue(item) == QueueTransition::Opened {
                    opened.push(kind.surface());
                }
            }
        }

        self.phase = GatePhase::Idle;
        self.group_id = None;
        let trigger = signal.trigger();
        info!(
            "[GroupGate] released on {} (epoch {}): {} covered, {} requeued",
            trigger,
            self.epoch,
            covered.len(),
            requeued
        );

        Some(Released {
            trigger,
            covered,
            requeued,
            opened,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{BasketAccessRequest, SpendingRequest};
    use std::collections::BTreeSet;

    fn basket(id: &str, name: &str) -> PermissionRequest {
        BasketAccessRequest {
            id: id.to_string(),
            basket: Some(name.to_string()),
            originator: "app.example".to_string(),
            reason: None,
            renewal: None,
        }
        .into()
    }

    fn spending(id: &str, amount: u64) -> PermissionRequest {
        SpendingRequest {
            id: id.to_string(),
            originator: "app.example".to_string(),
            authorization_amount: amount,
            line_items: vec![],
            reason: None,
            renewal: None,
        }
        .into()
    }

    fn ids(requests: &[PermissionRequest]) -> Vec<&str> {
        requests.iter().map(|r| r.id()).collect()
    }

    #[test]
    fn test_engage_vacuums_and_conserves() {
        let mut live = LiveQueues::default();
        live.get_mut(RequestKind::Basket).enqueue(basket("b1", "photos"));
        live.get_mut(RequestKind::Basket).enqueue(basket("b2", "videos"));
        live.get_mut(RequestKind::Spending).enqueue(spending("s1", 10));
        let before = live.total_len();

        let mut gate = GroupGate::new();
        let engaged = gate.engage("g1", &mut live).unwrap();

        assert_eq!(engaged.epoch, 1);
        assert_eq!(engaged.vacuumed, 3);
        assert_eq!(engaged.closed, vec![Surface::Basket, Surface::Spending]);
        assert_eq!(live.total_len(), 0);
        assert_eq!(gate.deferred().len(), before);
        assert_eq!(ids(gate.deferred().get(RequestKind::Basket)), vec!["b1", "b2"]);
        assert!(gate.is_pending());
        assert_eq!(gate.group_id(), Some("g1"));
    }

    #[test]
    fn test_engage_twice_is_rejected() {
        let mut live = LiveQueues::default();
        let mut gate = GroupGate::new();
        assert!(gate.engage("g1", &mut live).is_some());
        assert!(gate.engage("g2", &mut live).is_none());
        assert_eq!(gate.group_id(), Some("g1"));
    }

    #[test]
    fn test_defer_only_while_pending() {
        let mut live = LiveQueues::default();
        let mut gate = GroupGate::new();
        assert!(gate.defer(basket("b1", "photos")).is_err());

        gate.engage("g1", &mut live);
        assert!(gate.defer(basket("b1", "photos")).is_ok());
        assert!(gate.deferred().contains("b1"));
    }

    #[test]
    fn test_release_drops_covered_and_requeues_rest() {
        let mut live = LiveQueues::default();
        let mut gate = GroupGate::new();
        gate.engage("g1", &mut live);
        gate.defer(basket("b1", "photos")).unwrap();
        gate.defer(basket("b2", "videos")).unwrap();
        gate.defer(spending("s1", 500)).unwrap();

        let decision = GrantDecision {
            baskets: BTreeSet::from(["photos".to_string()]),
            spending_ceiling: Some(500),
            ..Default::default()
        };
        let released = gate
            .release(
                ReleaseSignal::Granted { group_id: "g1" },
                Some(&decision),
                &mut live,
            )
            .unwrap();

        assert_eq!(released.trigger, ReleaseTrigger::Granted);
        assert_eq!(ids(&released.covered), vec!["b1", "s1"]);
        assert_eq!(released.requeued, 1);
        assert_eq!(released.opened, vec![Surface::Basket]);
        assert_eq!(live.get(RequestKind::Basket).peek_all()[0].id(), "b2");
        assert!(gate.deferred().is_empty());
        assert_eq!(gate.phase(), GatePhase::Idle);
    }

    #[test]
    fn test_deny_requeues_everything_in_order() {
        let mut live = LiveQueues::default();
        let mut gate = GroupGate::new();
        gate.engage("g1", &mut live);
        for id in ["b1", "b2", "b3"] {
            gate.defer(basket(id, "photos")).unwrap();
        }

        let released = gate
            .release(ReleaseSignal::Denied { group_id: "g1" }, None, &mut live)
            .unwrap();

        assert!(released.covered.is_empty());
        assert_eq!(released.requeued, 3);
        assert_eq!(ids(&live.get(RequestKind::Basket).peek_all()), vec!["b1", "b2", "b3"]);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut live = LiveQueues::default();
        let mut gate = GroupGate::new();
        gate.engage("g1", &mut live);
        gate.defer(basket("b1", "photos")).unwrap();

        assert!(gate
            .release(ReleaseSignal::Timeout { epoch: 1 }, None, &mut live)
            .is_some());
        assert!(gate
            .release(ReleaseSignal::Granted { group_id: "g1" }, None, &mut live)
            .is_none());
        assert!(gate
            .release(ReleaseSignal::Timeout { epoch: 1 }, None, &mut live)
            .is_none());
        assert_eq!(live.total_len(), 1);
    }

    #[test]
    fn test_stale_signals_are_ignored() {
        let mut live = LiveQueues::default();
        let mut gate = GroupGate::new();
        gate.engage("g1", &mut live);
        gate.release(ReleaseSignal::Denied { group_id: "g1" }, None, &mut live);
        gate.engage("g2", &mut live);
        assert_eq!(gate.epoch(), 2);

        assert!(gate
            .release(ReleaseSignal::Timeout { epoch: 1 }, None, &mut live)
            .is_none());
        assert!(gate
            .release(ReleaseSignal::Granted { group_id: "g1" }, None, &mut live)
            .is_none());
        assert!(gate.is_pending());
    }
}
