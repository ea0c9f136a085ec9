use std::collections::HashSet;
use std::sync::Arc;

use crate::session::message::{ChatMessage, Role};
use crate::session::types::{Generation, ThreadId, ToolCallId};

/// Mutable session state, owned by exactly one actor task. All reads by
/// other tasks go through the published [`SessionSnapshot`].
#[derive(Debug, Clone)]
pub struct SessionState {
    pub thread_id: Option<ThreadId>,
    pub messages: Vec<ChatMessage>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub generation: Generation,
    pub endpoint: String,
    pub event_sequence: u64,
}

impl SessionState {
    pub fn new(thread_id: Option<ThreadId>, endpoint: impl Into<String>) -> Self {
        Self {
            thread_id,
            messages: Vec::new(),
            is_loading: false,
            error: None,
            generation: Generation::initial(),
            endpoint: endpoint.into(),
            event_sequence: 0,
        }
    }

    pub fn advance_generation(&mut self) -> Generation {
        self.generation = self.generation.next();
        self.generation
    }

    pub fn increment_sequence(&mut self) -> u64 {
        self.event_sequence += 1;
        self.event_sequence
    }

    /// Index of the assistant message still receiving stream events. Only
    /// the last message can qualify: earlier messages are terminal.
    pub fn open_assistant_index(&self) -> Option<usize> {
        match self.messages.last() {
            Some(message) if message.role == Role::Assistant && message.status.is_open() => {
                Some(self.messages.len() - 1)
            }
            _ => None,
        }
    }

    pub fn last_user_index(&self) -> Option<usize> {
        self.messages.iter().rposition(|m| m.role == Role::User)
    }
}

/// Immutable view published to subscribers. Every mutation produces one new
/// snapshot; all observers of a given publication see the same value.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub thread_id: Option<ThreadId>,
    pub messages: Arc<Vec<ChatMessage>>,
    pub is_loading: bool,
    pub error: Option<String>,
    pub pending_refresh: HashSet<ToolCallId>,
}

impl SessionSnapshot {
    pub fn capture(state: &SessionState, pending_refresh: HashSet<ToolCallId>) -> Self {
        Self {
            thread_id: state.thread_id.clone(),
            messages: Arc::new(state.messages.clone()),
            is_loading: state.is_loading,
            error: state.error.clone(),
            pending_refresh,
        }
    }

    pub fn is_pending_refresh(&self, id: &ToolCallId) -> bool {
        self.pending_refresh.contains(id)
    }
}
