use serde_json::Value;

use crate::session::message::ChatMessage;
use crate::session::types::{Generation, MessageId, NonEmptyString, ThreadId, ToolCallId};
use crate::transport::StreamEvent;

/// Everything that can change session state. User-initiated operations and
/// stream-sourced events funnel through the same reducer so their
/// interleaving is serialized in one place.
#[derive(Debug, Clone)]
pub enum Action {
    SendUserMessage {
        message_id: MessageId,
        text: NonEmptyString,
        timestamp: u64,
    },

    RetryLastMessage {
        timestamp: u64,
    },

    ClearMessages,

    SwitchThread {
        thread_id: ThreadId,
    },

    StartNewThread,

    /// Externally loaded history for the active thread, replacing the
    /// message list wholesale.
    HydrateHistory {
        messages: Vec<ChatMessage>,
    },

    /// One event from the stream opened under `generation`.
    StreamEvent {
        generation: Generation,
        event: StreamEvent,
    },

    /// The stream opened under `generation` failed, either at request time
    /// or by ending before a terminal event.
    StreamFailed {
        generation: Generation,
        error: String,
    },

    /// Out-of-band correction for a tool result already in the history.
    RefreshToolResult {
        tool_call_id: ToolCallId,
        payload: Value,
    },
}

impl Action {
    pub fn generation(&self) -> Option<Generation> {
        match self {
            Action::StreamEvent { generation, .. } | Action::StreamFailed { generation, .. } => {
                Some(*generation)
            }
            _ => None,
        }
    }
}
