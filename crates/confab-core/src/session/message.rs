//! Message types for conversation representation.
//!
//! A [`ChatMessage`] is append-only except for two sanctioned in-place
//! mutations: the trailing assistant message grows while its stream is
//! open, and a [`ToolResult`] payload may be replaced after the owning
//! message completed (the out-of-band refresh path).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};
use strum_macros::Display;

use crate::session::types::{MessageId, ToolCallId};

/// Role in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Assistant turn acknowledged by the backend, no content yet.
    Pending,
    Streaming,
    Complete,
    Errored,
}

impl MessageStatus {
    /// Whether the message is still receiving stream events.
    pub fn is_open(self) -> bool {
        matches!(self, MessageStatus::Pending | MessageStatus::Streaming)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_open()
    }
}

/// Result returned by a server-executed tool. The payload is replaceable in
/// place; the call id never changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: ToolCallId,
    pub payload: Value,
}

/// A server-side tool invocation surfaced inside an assistant message.
/// `id`, `name` and `arguments` are immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: ToolCallId,
    pub name: String,
    pub arguments: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ToolResult>,
}

impl ToolCall {
    pub fn has_result(&self) -> bool {
        self.result.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    pub status: MessageStatus,
    pub timestamp: u64,
}

impl ChatMessage {
    pub fn user(id: MessageId, content: impl Into<String>, timestamp: u64) -> Self {
        Self {
            id,
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            status: MessageStatus::Complete,
            timestamp,
        }
    }

    pub fn assistant_pending(id: MessageId, timestamp: u64) -> Self {
        Self {
            id,
            role: Role::Assistant,
            content: String::new(),
            tool_calls: Vec::new(),
            status: MessageStatus::Pending,
            timestamp,
        }
    }

    /// Helper to get current timestamp
    pub fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }

    pub fn tool_call(&self, id: &ToolCallId) -> Option<&ToolCall> {
        self.tool_calls.iter().find(|call| &call.id == id)
    }

    pub fn tool_call_mut(&mut self, id: &ToolCallId) -> Option<&mut ToolCall> {
        self.tool_calls.iter_mut().find(|call| &call.id == id)
    }
}
