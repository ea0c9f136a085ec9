//! Tracking of tool results that are provisional and awaiting an
//! out-of-band correction.
//!
//! Membership is independent of message completion: a message can be
//! complete while one of its tool calls is still pending refresh. The set
//! never expires entries on its own; removal is always caller-driven, so
//! consumers must tolerate long-lived unresolved entries.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::session::types::ToolCallId;

/// Ownership strategy for the pending-refresh set. A session either owns
/// its set ([`OwnedRefreshSet`]) or delegates to one owned by an outer
/// coordinator ([`SharedRefreshSet`]), which lets several independent
/// sessions share one tracker.
pub trait PendingRefreshOwner: Send + Sync {
    /// Inserts `id`. Idempotent; returns false when it was already present.
    fn add(&self, id: ToolCallId) -> bool;

    /// Removes `id`. Idempotent; returns false when it was absent.
    fn remove(&self, id: &ToolCallId) -> bool;

    fn contains(&self, id: &ToolCallId) -> bool;

    fn snapshot(&self) -> HashSet<ToolCallId>;
}

#[derive(Debug, Default)]
pub struct OwnedRefreshSet {
    inner: Mutex<HashSet<ToolCallId>>,
}

impl OwnedRefreshSet {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PendingRefreshOwner for OwnedRefreshSet {
    fn add(&self, id: ToolCallId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id)
    }

    fn remove(&self, id: &ToolCallId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
    }

    fn contains(&self, id: &ToolCallId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    fn snapshot(&self) -> HashSet<ToolCallId> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

type ChangeListener = Arc<dyn Fn(&HashSet<ToolCallId>) + Send + Sync>;

/// Externally owned set for controlled mode. Clones share one underlying
/// set; the outer coordinator keeps its own clone and decides its
/// lifecycle. An optional listener observes every effective mutation.
#[derive(Clone, Default)]
pub struct SharedRefreshSet {
    inner: Arc<Mutex<HashSet<ToolCallId>>>,
    on_change: Option<ChangeListener>,
}

impl SharedRefreshSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(mut self, listener: ChangeListener) -> Self {
        self.on_change = Some(listener);
        self
    }

    fn notify(&self) {
        if let Some(listener) = &self.on_change {
            let current = self
                .inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            listener(&current);
        }
    }
}

impl PendingRefreshOwner for SharedRefreshSet {
    fn add(&self, id: ToolCallId) -> bool {
        let inserted = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id);
        if inserted {
            self.notify();
        }
        inserted
    }

    fn remove(&self, id: &ToolCallId) -> bool {
        let removed = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
        if removed {
            self.notify();
        }
        removed
    }

    fn contains(&self, id: &ToolCallId) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(id)
    }

    fn snapshot(&self) -> HashSet<ToolCallId> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
