use std::sync::Arc;

use crate::session::message::{ToolCall, ToolResult};
use crate::session::refresh::PendingRefreshOwner;
use crate::session::types::ThreadId;

pub type ErrorHook = Arc<dyn Fn(&str) + Send + Sync>;
pub type ToolCallHook = Arc<dyn Fn(&ToolCall) + Send + Sync>;
pub type ToolResultHook = Arc<dyn Fn(&ToolResult) + Send + Sync>;

pub const DEFAULT_ENDPOINT: &str = "/api/chat";

/// Construction-time configuration for a session.
///
/// Hooks are the cross-cutting escape hatch (telemetry, coordination);
/// ordinary consumers observe state through the snapshot and event feeds
/// instead. Supplying `pending_refresh` puts the session in controlled
/// mode: the caller owns the set's lifecycle and may share it across
/// sessions.
#[derive(Clone)]
pub struct SessionConfig {
    pub endpoint: String,
    pub thread_id: Option<ThreadId>,
    pub on_error: Option<ErrorHook>,
    pub on_tool_call: Option<ToolCallHook>,
    pub on_tool_result: Option<ToolResultHook>,
    pub pending_refresh: Option<Arc<dyn PendingRefreshOwner>>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            thread_id: None,
            on_error: None,
            on_tool_call: None,
            on_tool_result: None,
            pending_refresh: None,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_thread_id(mut self, thread_id: ThreadId) -> Self {
        self.thread_id = Some(thread_id);
        self
    }

    pub fn with_on_error(mut self, hook: ErrorHook) -> Self {
        self.on_error = Some(hook);
        self
    }

    pub fn with_on_tool_call(mut self, hook: ToolCallHook) -> Self {
        self.on_tool_call = Some(hook);
        self
    }

    pub fn with_on_tool_result(mut self, hook: ToolResultHook) -> Self {
        self.on_tool_result = Some(hook);
        self
    }

    pub fn with_pending_refresh(mut self, owner: Arc<dyn PendingRefreshOwner>) -> Self {
        self.pending_refresh = Some(owner);
        self
    }
}
