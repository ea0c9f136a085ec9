use serde::{Deserialize, Serialize};

use crate::session::message::{ChatMessage, ToolCall, ToolResult};
use crate::session::types::{Generation, MessageId, ThreadId, ToolCallId};

/// Facts emitted for subscribers after state has changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    MessageAdded {
        message: ChatMessage,
    },

    /// A failed assistant attempt was dropped ahead of a retry.
    MessageRemoved {
        message_id: MessageId,
    },

    ContentDelta {
        message_id: MessageId,
        delta: String,
    },

    ToolCallAdded {
        message_id: MessageId,
        tool_call: ToolCall,
    },

    ToolResultAttached {
        message_id: MessageId,
        result: ToolResult,
    },

    /// An out-of-band push replaced a tool result payload in place.
    ToolResultRefreshed {
        result: ToolResult,
    },

    MessageCompleted {
        message_id: MessageId,
    },

    MessageErrored {
        message_id: MessageId,
    },

    TurnStarted {
        generation: Generation,
    },

    TurnCompleted {
        generation: Generation,
    },

    TurnCancelled {
        generation: Generation,
    },

    ThreadSwitched {
        thread_id: Option<ThreadId>,
    },

    MessagesCleared,

    HistoryHydrated {
        message_count: usize,
    },

    Error {
        message: String,
    },
}

impl SessionEvent {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            SessionEvent::Error { .. } | SessionEvent::MessageErrored { .. }
        )
    }

    pub fn tool_call_id(&self) -> Option<&ToolCallId> {
        match self {
            SessionEvent::ToolCallAdded { tool_call, .. } => Some(&tool_call.id),
            SessionEvent::ToolResultAttached { result, .. }
            | SessionEvent::ToolResultRefreshed { result } => Some(&result.tool_call_id),
            _ => None,
        }
    }
}
