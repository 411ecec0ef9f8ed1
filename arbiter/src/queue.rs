//! FIFO approval queues.
//!
//! A queue only sequences requests. Approving or denying the head is the
//! caller's business with the wallet; the queue reports when its modal
//! should open (empty -> non-empty) and close (non-empty -> empty).

use crate::request::{HasId, PermissionRequest, RequestKind, Surface};
use std::collections::VecDeque;

/// Visibility change caused by a queue operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueTransition {
    /// The queue went from empty to non-empty: its modal should open.
    Opened,
    /// The queue went from non-empty to empty: its modal should close.
    Closed,
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct RequestQueue<T> {
    surface: Surface,
    items: VecDeque<T>,
}

impl<T: HasId> RequestQueue<T> {
    pub fn new(surface: Surface) -> Self {
        Self {
            surface,
            items: VecDeque::new(),
        }
    }

    pub fn surface(&self) -> Surface {
        self.surface
    }

    pub fn enqueue(&mut self, item: T) -> QueueTransition {
        let was_empty = self.items.is_empty();
        self.items.push_back(item);
        if was_empty {
            QueueTransition::Opened
        } else {
            QueueTransition::Unchanged
        }
    }

    /// Removes the head. Advancing an empty queue does nothing.
    pub fn advance(&mut self) -> (Option<T>, QueueTransition) {
        match self.items.pop_front() {
            Some(item) if self.items.is_empty() => (Some(item), QueueTransition::Closed),
            Some(item) => (Some(item), QueueTransition::Unchanged),
            None => (None, QueueTransition::Unchanged),
        }
    }

    /// Removes a specific request wherever it sits in the queue.
    pub fn remove(&mut self, id: &str) -> Option<(T, QueueTransition)> {
        let pos = self.items.iter().position(|item| item.id() == id)?;
        let item = self.items.remove(pos)?;
        let transition = if self.items.is_empty() {
            QueueTransition::Closed
        } else {
            QueueTransition::Unchanged
        };
        Some((item, transition))
    }

    /// Empties the queue, returning its items in order.
    pub fn drain(&mut self) -> (Vec<T>, QueueTransition) {
        if self.items.is_empty() {
            return (Vec::new(), QueueTransition::Unchanged);
        }
        (self.items.drain(..).collect(), QueueTransition::Closed)
    }

    pub fn head(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.items.iter().any(|item| item.id() == id)
    }

    pub fn peek_all(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// The four per-kind live queues.
#[derive(Debug, Clone)]
pub struct LiveQueues {
    queues: [RequestQueue<PermissionRequest>; 4],
}

impl Default for LiveQueues {
    fn default() -> Self {
        Self {
            queues: RequestKind::ALL.map(|kind| RequestQueue::new(kind.surface())),
        }
    }
}

impl LiveQueues {
    fn slot(kind: RequestKind) -> usize {
        match kind {
            RequestKind::Basket => 0,
            RequestKind::Certificate => 1,
            RequestKind::Protocol => 2,
            RequestKind::Spending => 3,
        }
    }

    pub fn get(&self, kind: RequestKind) -> &RequestQueue<PermissionRequest> {
        &self.queues[Self::slot(kind)]
    }

    pub fn get_mut(&mut self, kind: RequestKind) -> &mut RequestQueue<PermissionRequest> {
        &mut self.queues[Self::slot(kind)]
    }

    pub fn total_len(&self) -> usize {
        self.queues.iter().map(RequestQueue::len).sum()
    }
}
