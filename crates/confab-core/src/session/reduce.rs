//! The pure session state machine.
//!
//! `reduce` applies one [`Action`] to [`SessionState`] and returns the side
//! effects the caller must perform. Stream events are fenced by generation
//! before any transition: a stream opened by a superseded send can never
//! mutate state, no matter how late its events arrive.

use crate::session::action::Action;
use crate::session::effect::Effect;
use crate::session::event::SessionEvent;
use crate::session::message::{ChatMessage, MessageStatus, Role, ToolCall, ToolResult};
use crate::session::state::SessionState;
use crate::session::types::{Generation, MessageId, NonEmptyString, ThreadId, ToolCallId};
use crate::transport::{ChatRequest, HistoryEntry, StreamEvent};

#[derive(Debug, thiserror::Error)]
pub enum ReduceError {
    #[error("a request is already in flight")]
    RequestInFlight,
}

pub fn reduce(state: &mut SessionState, action: Action) -> Result<Vec<Effect>, ReduceError> {
    match action {
        Action::SendUserMessage {
            message_id,
            text,
            timestamp,
        } => handle_send(state, message_id, text, timestamp),

        Action::RetryLastMessage { timestamp } => handle_retry(state, timestamp),

        Action::ClearMessages => Ok(handle_clear(state)),

        Action::SwitchThread { thread_id } => Ok(handle_reset(state, Some(thread_id))),

        Action::StartNewThread => Ok(handle_reset(state, None)),

        Action::HydrateHistory { messages } => Ok(handle_hydrate(state, messages)),

        Action::StreamEvent { generation, event } => {
            Ok(handle_stream_event(state, generation, event))
        }

        Action::StreamFailed { generation, error } => {
            Ok(handle_stream_failed(state, generation, error))
        }

        Action::RefreshToolResult {
            tool_call_id,
            payload,
        } => Ok(handle_refresh(state, tool_call_id, payload)),
    }
}

fn handle_send(
    state: &mut SessionState,
    message_id: MessageId,
    text: NonEmptyString,
    timestamp: u64,
) -> Result<Vec<Effect>, ReduceError> {
    if state.is_loading {
        return Err(ReduceError::RequestInFlight);
    }

    let message = ChatMessage::user(message_id, text.into_string(), timestamp);
    state.messages.push(message.clone());
    state.error = None;
    state.is_loading = true;

    let generation = state.advance_generation();
    let thread_id = ensure_thread(state);

    Ok(vec![
        Effect::EmitEvent {
            event: SessionEvent::MessageAdded { message },
        },
        Effect::EmitEvent {
            event: SessionEvent::TurnStarted { generation },
        },
        open_stream_effect(state, generation, thread_id),
    ])
}

fn handle_retry(state: &mut SessionState, _timestamp: u64) -> Result<Vec<Effect>, ReduceError> {
    if state.is_loading {
        return Err(ReduceError::RequestInFlight);
    }

    if state.last_user_index().is_none() {
        tracing::debug!("retry requested with no prior user message");
        return Ok(Vec::new());
    }

    let mut effects = Vec::new();

    // Drop the previous assistant attempt unless it finished cleanly; the
    // user message it answered stays where it is.
    if let Some(last) = state.messages.last()
        && last.role == Role::Assistant
        && last.status != MessageStatus::Complete
    {
        let message_id = last.id.clone();
        state.messages.pop();
        effects.push(Effect::EmitEvent {
            event: SessionEvent::MessageRemoved { message_id },
        });
    }

    state.error = None;
    state.is_loading = true;

    let generation = state.advance_generation();
    let thread_id = ensure_thread(state);

    effects.push(Effect::EmitEvent {
        event: SessionEvent::TurnStarted { generation },
    });
    effects.push(open_stream_effect(state, generation, thread_id));

    Ok(effects)
}

fn handle_clear(state: &mut SessionState) -> Vec<Effect> {
    let mut effects = cancel_active_turn(state);

    state.messages.clear();
    state.error = None;

    effects.push(Effect::EmitEvent {
        event: SessionEvent::MessagesCleared,
    });

    effects
}

fn handle_reset(state: &mut SessionState, thread_id: Option<ThreadId>) -> Vec<Effect> {
    let mut effects = cancel_active_turn(state);

    state.messages.clear();
    state.error = None;
    state.thread_id = thread_id.clone();

    effects.push(Effect::EmitEvent {
        event: SessionEvent::ThreadSwitched { thread_id },
    });

    effects
}

fn handle_hydrate(state: &mut SessionState, mut messages: Vec<ChatMessage>) -> Vec<Effect> {
    let mut effects = cancel_active_turn(state);

    // Stored history has no live stream attached; an open status in it
    // would violate the single in-flight invariant.
    for message in &mut messages {
        if message.status.is_open() {
            tracing::warn!(message_id = %message.id, "hydrated message was still open, marking errored");
            message.status = MessageStatus::Errored;
        }
    }

    let message_count = messages.len();
    state.messages = messages;
    state.error = None;

    effects.push(Effect::EmitEvent {
        event: SessionEvent::HistoryHydrated { message_count },
    });

    effects
}

fn handle_stream_event(
    state: &mut SessionState,
    generation: Generation,
    event: StreamEvent,
) -> Vec<Effect> {
    if generation != state.generation {
        tracing::debug!(
            %generation,
            current = %state.generation,
            "discarding stream event from superseded turn"
        );
        return Vec::new();
    }

    if !state.is_loading {
        tracing::warn!(%generation, "stream event after the turn already terminated, ignoring");
        return Vec::new();
    }

    match event {
        StreamEvent::MessageStart { message_id, .. } => {
            if state.open_assistant_index().is_some() {
                return fail_turn(
                    state,
                    "protocol violation: message-start while a message is open".to_string(),
                );
            }
            let message =
                ChatMessage::assistant_pending(message_id, ChatMessage::current_timestamp());
            state.messages.push(message.clone());
            vec![Effect::EmitEvent {
                event: SessionEvent::MessageAdded { message },
            }]
        }

        StreamEvent::ContentDelta { delta, .. } => {
            let Some(index) = state.open_assistant_index() else {
                return fail_turn(
                    state,
                    "protocol violation: content-delta without an open message".to_string(),
                );
            };
            let message = &mut state.messages[index];
            if message.status == MessageStatus::Pending {
                message.status = MessageStatus::Streaming;
            }
            message.content.push_str(&delta);
            let message_id = message.id.clone();
            vec![Effect::EmitEvent {
                event: SessionEvent::ContentDelta { message_id, delta },
            }]
        }

        StreamEvent::ToolCall {
            id,
            name,
            arguments,
            ..
        } => {
            let Some(index) = state.open_assistant_index() else {
                return fail_turn(
                    state,
                    "protocol violation: tool-call without an open message".to_string(),
                );
            };
            let message = &mut state.messages[index];
            if message.status == MessageStatus::Pending {
                message.status = MessageStatus::Streaming;
            }
            let tool_call = ToolCall {
                id,
                name,
                arguments,
                result: None,
            };
            message.tool_calls.push(tool_call.clone());
            let message_id = message.id.clone();
            vec![Effect::EmitEvent {
                event: SessionEvent::ToolCallAdded {
                    message_id,
                    tool_call,
                },
            }]
        }

        StreamEvent::ToolResult {
            tool_call_id,
            payload,
            ..
        } => {
            let Some(index) = state.open_assistant_index() else {
                return fail_turn(
                    state,
                    "protocol violation: tool-result without an open message".to_string(),
                );
            };
            let message = &mut state.messages[index];
            let message_id = message.id.clone();
            match message.tool_call_mut(&tool_call_id) {
                Some(call) => {
                    let result = ToolResult {
                        tool_call_id,
                        payload,
                    };
                    call.result = Some(result.clone());
                    vec![Effect::EmitEvent {
                        event: SessionEvent::ToolResultAttached { message_id, result },
                    }]
                }
                None => {
                    tracing::warn!(%tool_call_id, "tool-result for unknown call id, ignoring");
                    Vec::new()
                }
            }
        }

        StreamEvent::MessageEnd { .. } => {
            let Some(index) = state.open_assistant_index() else {
                return fail_turn(
                    state,
                    "protocol violation: message-end without an open message".to_string(),
                );
            };
            let message = &mut state.messages[index];
            message.status = MessageStatus::Complete;
            let message_id = message.id.clone();
            state.is_loading = false;
            vec![
                Effect::EmitEvent {
                    event: SessionEvent::MessageCompleted { message_id },
                },
                Effect::EmitEvent {
                    event: SessionEvent::TurnCompleted { generation },
                },
                Effect::FinishTurn { generation },
            ]
        }

        StreamEvent::Error { message, .. } => fail_turn(state, message),
    }
}

fn handle_stream_failed(
    state: &mut SessionState,
    generation: Generation,
    error: String,
) -> Vec<Effect> {
    if generation != state.generation {
        tracing::debug!(%generation, "discarding failure from superseded turn");
        return Vec::new();
    }
    if !state.is_loading {
        return Vec::new();
    }
    fail_turn(state, error)
}

fn handle_refresh(
    state: &mut SessionState,
    tool_call_id: ToolCallId,
    payload: serde_json::Value,
) -> Vec<Effect> {
    // Newest messages first: a refreshed tool id is most likely from the
    // latest turn.
    let target = state.messages.iter().enumerate().rev().find_map(|(mi, message)| {
        message
            .tool_calls
            .iter()
            .position(|call| call.id == tool_call_id)
            .map(|ci| (mi, ci))
    });

    let Some((message_index, call_index)) = target else {
        tracing::warn!(%tool_call_id, "refresh for unknown tool call id, ignoring");
        return Vec::new();
    };

    let result = ToolResult {
        tool_call_id,
        payload,
    };
    state.messages[message_index].tool_calls[call_index].result = Some(result.clone());

    vec![Effect::EmitEvent {
        event: SessionEvent::ToolResultRefreshed { result },
    }]
}

/// Ends the current turn in failure: the open message (if any) keeps its
/// partial content but is marked errored, and the session error is set.
fn fail_turn(state: &mut SessionState, message: String) -> Vec<Effect> {
    let generation = state.generation;
    let mut effects = Vec::new();

    if let Some(index) = state.open_assistant_index() {
        let open = &mut state.messages[index];
        open.status = MessageStatus::Errored;
        let message_id = open.id.clone();
        effects.push(Effect::EmitEvent {
            event: SessionEvent::MessageErrored { message_id },
        });
    }

    state.error = Some(message.clone());
    state.is_loading = false;

    effects.push(Effect::EmitEvent {
        event: SessionEvent::Error { message },
    });
    effects.push(Effect::EmitEvent {
        event: SessionEvent::TurnCompleted { generation },
    });
    effects.push(Effect::CancelStream { generation });
    effects.push(Effect::FinishTurn { generation });

    effects
}

/// Fences out an in-flight turn, if any: the generation advances so the old
/// stream's remaining events fail the identity check.
fn cancel_active_turn(state: &mut SessionState) -> Vec<Effect> {
    if !state.is_loading {
        return Vec::new();
    }

    let stale = state.generation;
    state.advance_generation();
    state.is_loading = false;

    vec![
        Effect::EmitEvent {
            event: SessionEvent::TurnCancelled { generation: stale },
        },
        Effect::CancelStream { generation: stale },
        Effect::FinishTurn { generation: stale },
    ]
}

fn ensure_thread(state: &mut SessionState) -> ThreadId {
    match &state.thread_id {
        Some(thread_id) => thread_id.clone(),
        None => {
            let thread_id = ThreadId::new();
            state.thread_id = Some(thread_id.clone());
            thread_id
        }
    }
}

fn open_stream_effect(
    state: &SessionState,
    generation: Generation,
    thread_id: ThreadId,
) -> Effect {
    let history = state
        .messages
        .iter()
        .filter(|m| m.status == MessageStatus::Complete)
        .map(|m| HistoryEntry {
            role: m.role,
            content: m.content.clone(),
        })
        .collect();

    Effect::OpenStream {
        generation,
        request: ChatRequest {
            endpoint: state.endpoint.clone(),
            thread_id,
            history,
        },
    }
}
