//! Boundary to the streaming backend.
//!
//! The wire-level framing (SSE, websockets, gRPC) is the collaborator's
//! concern; this crate consumes an already-framed, ordered, finite sequence
//! of [`StreamEvent`]s. A sequence ends at `message-end` or `error` and is
//! not restartable - a new send opens a new sequence.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::session::message::Role;
use crate::session::types::{MessageId, ThreadId, ToolCallId};

pub type EventStream = Pin<Box<dyn Stream<Item = StreamEvent> + Send>>;

#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("request failed: {0}")]
    Request(String),

    #[error("request cancelled")]
    Cancelled,
}

/// One `role` + `content` pair of the history sent upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub endpoint: String,
    pub thread_id: ThreadId,
    pub history: Vec<HistoryEntry>,
}

/// One incremental update for an assistant turn. Serde tags match the wire
/// names: `message-start`, `content-delta`, `tool-call`, `tool-result`,
/// `message-end`, `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StreamEvent {
    MessageStart {
        thread_id: ThreadId,
        message_id: MessageId,
    },
    ContentDelta {
        thread_id: ThreadId,
        delta: String,
    },
    ToolCall {
        thread_id: ThreadId,
        id: ToolCallId,
        name: String,
        arguments: Value,
    },
    ToolResult {
        thread_id: ThreadId,
        tool_call_id: ToolCallId,
        payload: Value,
    },
    MessageEnd {
        thread_id: ThreadId,
    },
    Error {
        thread_id: ThreadId,
        message: String,
    },
}

impl StreamEvent {
    pub fn thread_id(&self) -> &ThreadId {
        match self {
            StreamEvent::MessageStart { thread_id, .. }
            | StreamEvent::ContentDelta { thread_id, .. }
            | StreamEvent::ToolCall { thread_id, .. }
            | StreamEvent::ToolResult { thread_id, .. }
            | StreamEvent::MessageEnd { thread_id }
            | StreamEvent::Error { thread_id, .. } => thread_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::MessageEnd { .. } | StreamEvent::Error { .. }
        )
    }
}

/// Opens one event stream per assistant turn. Implementations should stop
/// producing promptly once `cancel` fires, but the session core stays
/// correct even if the abort is delayed or never happens.
#[async_trait]
pub trait ChatTransport: Send + Sync + 'static {
    async fn open_stream(
        &self,
        request: ChatRequest,
        cancel: CancellationToken,
    ) -> Result<EventStream, TransportError>;
}
