//! Window focus episodes.
//!
//! Focus is one resource shared by every modal. An episode begins when the
//! first modal of any kind opens and ends when the last one closes. Only the
//! episode boundaries touch the host's focus; modals opening and closing in
//! between do not.
//!
//! The bookkeeping is split in two. [`EpisodeTracker`] runs inside the
//! engine's critical section and only detects boundaries. [`FocusCoordinator`]
//! runs in the effect driver and performs the host calls, remembering whether
//! the window already had focus when the episode began.

use crate::error::ArbiterResult;
use crate::request::Surface;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Host window focus primitives. Calls are idempotent.
#[async_trait]
pub trait FocusControl: Send + Sync {
    async fn is_focused(&self) -> ArbiterResult<bool>;
    async fn request_focus(&self) -> ArbiterResult<()>;
    async fn relinquish_focus(&self) -> ArbiterResult<()>;
}

/// Boundary of a focus episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpisodeEdge {
    Began,
    Ended,
}

/// Tracks which modals are open across all kinds.
#[derive(Debug, Default)]
pub struct EpisodeTracker {
    open: BTreeSet<Surface>,
}

impl EpisodeTracker {
    pub fn open(&mut self, surface: Surface) -> Option<EpisodeEdge> {
        if self.open.insert(surface) && self.open.len() == 1 {
            Some(EpisodeEdge::Began)
        } else {
            None
        }
    }

    pub fn close(&mut self, surface: Surface) -> Option<EpisodeEdge> {
        if self.open.remove(&surface) && self.open.is_empty() {
            Some(EpisodeEdge::Ended)
        } else {
            None
        }
    }

    pub fn is_active(&self) -> bool {
        !self.open.is_empty()
    }

    pub fn is_open(&self, surface: Surface) -> bool {
        self.open.contains(&surface)
    }
}

/// Drives the host's focus at episode boundaries.
pub struct FocusCoordinator {
    host: Arc<dyn FocusControl>,
    /// Whether the window had focus when the current episode began.
    was_focused: Option<bool>,
}

impl FocusCoordinator {
    pub fn new(host: Arc<dyn FocusControl>) -> Self {
        Self {
            host,
            was_focused: None,
        }
    }

    /// Records the window's focus state and grabs focus if it was not held.
    ///
    /// A failed focus query is treated as "already focused" so the episode
    /// never relinquishes focus it cannot prove it took.
    pub async fn begin_episode(&mut self) -> bool {
        let was_focused = match self.host.is_focused().await {
            Ok(focused) => focused,
            Err(e) => {
                warn!("[FocusCoordinator] focus query failed: {}", e);
                true
            }
        };
        if !was_focused {
            debug!("[FocusCoordinator] requesting focus");
            if let Err(e) = self.host.request_focus().await {
                warn!("[FocusCoordinator] focus request failed: {}", e);
            }
        }
        self.was_focused = Some(was_focused);
        was_focused
    }

    /// Gives focus back only if the episode took it.
    pub async fn end_episode(&mut self, was_focused: bool) {
        self.was_focused = None;
        if was_focused {
            return;
        }
        debug!("[FocusCoordinator] relinquishing focus");
        if let Err(e) = self.host.relinquish_focus().await {
            warn!("[FocusCoordinator] focus relinquish failed: {}", e);
        }
    }

    /// Ends the current episode using the state recorded at its start.
    pub async fn finish_episode(&mut self) {
        let was_focused = self.was_focused.unwrap_or(true);
        self.end_episode(was_focused).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeWindow {
        focused: Mutex<bool>,
        calls: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl FocusControl for FakeWindow {
        async fn is_focused(&self) -> ArbiterResult<bool> {
            Ok(*self.focused.lock().unwrap())
        }

        async fn request_focus(&self) -> ArbiterResult<()> {
            *self.focused.lock().unwrap() = true;
            self.calls.lock().unwrap().push("request");
            Ok(())
        }

        async fn relinquish_focus(&self) -> ArbiterResult<()> {
            *self.focused.lock().unwrap() = false;
            self.calls.lock().unwrap().push("relinquish");
            Ok(())
        }
    }

    #[test]
    fn test_tracker_edges_span_all_surfaces() {
        let mut tracker = EpisodeTracker::default();
        assert_eq!(tracker.open(Surface::Basket), Some(EpisodeEdge::Began));
        assert_eq!(tracker.open(Surface::Spending), None);
        assert_eq!(tracker.open(Surface::Basket), None);
        assert_eq!(tracker.close(Surface::Basket), None);
        assert!(tracker.is_active());
        assert_eq!(tracker.close(Surface::Spending), Some(EpisodeEdge::Ended));
        assert_eq!(tracker.close(Surface::Spending), None);
        assert!(!tracker.is_active());
    }

    #[tokio::test]
    async fn test_unfocused_window_is_focused_then_released() {
        let window = Arc::new(FakeWindow::default());
        let mut coordinator = FocusCoordinator::new(window.clone());

        assert!(!coordinator.begin_episode().await);
        coordinator.finish_episode().await;

        assert_eq!(*window.calls.lock().unwrap(), vec!["request", "relinquish"]);
    }

    #[tokio::test]
    async fn test_focused_window_is_left_alone() {
        let window = Arc::new(FakeWindow::default());
        *window.focused.lock().unwrap() = true;
        let mut coordinator = FocusCoordinator::new(window.clone());

        assert!(coordinator.begin_episode().await);
        coordinator.finish_episode().await;

        assert!(window.calls.lock().unwrap().is_empty());
        assert!(*window.focused.lock().unwrap());
    }
}
