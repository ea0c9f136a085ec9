use rstest::rstest;
use serde_json::json;

use crate::session::action::Action;
use crate::session::effect::Effect;
use crate::session::event::SessionEvent;
use crate::session::message::{MessageStatus, Role};
use crate::session::reduce::{ReduceError, reduce};
use crate::session::state::SessionState;
use crate::session::types::{MessageId, NonEmptyString, ThreadId, ToolCallId};
use crate::transport::StreamEvent;

fn thread() -> ThreadId {
    ThreadId::from_string("thread-a")
}

fn new_state() -> SessionState {
    SessionState::new(Some(thread()), "/api/chat")
}

fn send(state: &mut SessionState, text: &str) -> Vec<Effect> {
    reduce(
        state,
        Action::SendUserMessage {
            message_id: MessageId::new(),
            text: NonEmptyString::new(text).expect("non-empty"),
            timestamp: 1,
        },
    )
    .expect("send accepted")
}

/// Feeds a stream event tagged with the state's current generation, the way
/// a live stream task would.
fn feed(state: &mut SessionState, event: StreamEvent) -> Vec<Effect> {
    let generation = state.generation;
    reduce(state, Action::StreamEvent { generation, event }).expect("stream events never reject")
}

fn start(state: &mut SessionState, message_id: &str) -> Vec<Effect> {
    feed(
        state,
        StreamEvent::MessageStart {
            thread_id: thread(),
            message_id: MessageId::from_string(message_id),
        },
    )
}

fn delta(state: &mut SessionState, text: &str) -> Vec<Effect> {
    feed(
        state,
        StreamEvent::ContentDelta {
            thread_id: thread(),
            delta: text.to_string(),
        },
    )
}

fn end(state: &mut SessionState) -> Vec<Effect> {
    feed(state, StreamEvent::MessageEnd { thread_id: thread() })
}

#[test]
fn streams_hello_turn_to_completion() {
    let mut state = new_state();

    let effects = send(&mut state, "hello");
    assert!(state.is_loading);
    assert!(
        effects
            .iter()
            .any(|e| matches!(e, Effect::OpenStream { .. }))
    );

    start(&mut state, "asst-1");
    assert_eq!(state.messages[1].status, MessageStatus::Pending);

    delta(&mut state, "Hi");
    assert_eq!(state.messages[1].status, MessageStatus::Streaming);
    delta(&mut state, " there");
    end(&mut state);

    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[0].role, Role::User);
    assert_eq!(state.messages[1].content, "Hi there");
    assert_eq!(state.messages[1].status, MessageStatus::Complete);
    assert!(!state.is_loading);
    assert_eq!(state.error, None);
}

#[test]
fn send_request_carries_complete_history() {
    let mut state = new_state();
    let effects = send(&mut state, "hello");

    let request = effects
        .iter()
        .find_map(|e| match e {
            Effect::OpenStream { request, .. } => Some(request.clone()),
            _ => None,
        })
        .expect("send opens a stream");

    assert_eq!(request.thread_id, thread());
    assert_eq!(request.endpoint, "/api/chat");
    assert_eq!(request.history.len(), 1);
    assert_eq!(request.history[0].content, "hello");
    assert_eq!(request.history[0].role, Role::User);
}

#[test]
fn send_assigns_thread_when_absent() {
    let mut state = SessionState::new(None, "/api/chat");
    let effects = send(&mut state, "hello");

    let request_thread = effects
        .iter()
        .find_map(|e| match e {
            Effect::OpenStream { request, .. } => Some(request.thread_id.clone()),
            _ => None,
        })
        .expect("send opens a stream");

    assert_eq!(state.thread_id.as_ref(), Some(&request_thread));
}

#[test]
fn second_send_while_loading_is_rejected() {
    let mut state = new_state();
    send(&mut state, "first");

    let rejected = reduce(
        &mut state,
        Action::SendUserMessage {
            message_id: MessageId::new(),
            text: NonEmptyString::new("second").expect("non-empty"),
            timestamp: 2,
        },
    );

    assert!(matches!(rejected, Err(ReduceError::RequestInFlight)));
    assert_eq!(state.messages.len(), 1);
}

#[test]
fn events_from_superseded_turn_are_discarded() {
    let mut state = new_state();
    send(&mut state, "hello");
    let stale = state.generation;
    start(&mut state, "asst-1");

    reduce(
        &mut state,
        Action::SwitchThread {
            thread_id: ThreadId::from_string("thread-b"),
        },
    )
    .expect("switch never rejects");
    assert!(state.messages.is_empty());

    // The old stream keeps talking; its delta carries the stale token.
    let effects = reduce(
        &mut state,
        Action::StreamEvent {
            generation: stale,
            event: StreamEvent::ContentDelta {
                thread_id: thread(),
                delta: "late".to_string(),
            },
        },
    )
    .expect("stream events never reject");

    assert!(effects.is_empty());
    assert!(state.messages.is_empty());
    assert_eq!(state.error, None);
    assert_eq!(state.thread_id, Some(ThreadId::from_string("thread-b")));
}

#[test]
fn clear_cancels_and_fences_an_open_turn() {
    let mut state = new_state();
    send(&mut state, "hello");
    let stale = state.generation;
    start(&mut state, "asst-1");
    delta(&mut state, "partial");

    let effects = reduce(&mut state, Action::ClearMessages).expect("clear never rejects");

    assert!(state.messages.is_empty());
    assert!(!state.is_loading);
    assert_eq!(state.error, None);
    assert!(
        effects
            .iter()
            .any(|e| matches!(e, Effect::CancelStream { generation } if *generation == stale))
    );
    assert!(effects.iter().any(|e| matches!(
        e,
        Effect::EmitEvent {
            event: SessionEvent::TurnCancelled { .. }
        }
    )));

    // The cleared turn's stream cannot resurrect its messages.
    let effects = reduce(
        &mut state,
        Action::StreamEvent {
            generation: stale,
            event: StreamEvent::ContentDelta {
                thread_id: thread(),
                delta: "ghost".to_string(),
            },
        },
    )
    .expect("stream events never reject");
    assert!(effects.is_empty());
    assert!(state.messages.is_empty());
}

#[test]
fn retry_replaces_errored_attempt_without_duplicating_user() {
    let mut state = new_state();
    send(&mut state, "question");
    start(&mut state, "asst-1");
    delta(&mut state, "partial");
    feed(
        &mut state,
        StreamEvent::Error {
            thread_id: thread(),
            message: "upstream exploded".to_string(),
        },
    );

    assert_eq!(state.messages[1].status, MessageStatus::Errored);
    assert_eq!(state.messages[1].content, "partial");
    assert_eq!(state.error.as_deref(), Some("upstream exploded"));
    assert!(!state.is_loading);

    let effects = reduce(&mut state, Action::RetryLastMessage { timestamp: 2 })
        .expect("retry accepted");

    assert_eq!(state.messages.len(), 1, "errored attempt dropped");
    assert_eq!(state.messages[0].role, Role::User);
    assert_eq!(state.error, None);
    assert!(state.is_loading);
    assert!(effects.iter().any(|e| matches!(
        e,
        Effect::EmitEvent {
            event: SessionEvent::MessageRemoved { .. }
        }
    )));

    let request = effects
        .iter()
        .find_map(|e| match e {
            Effect::OpenStream { request, .. } => Some(request.clone()),
            _ => None,
        })
        .expect("retry reopens a stream");
    assert_eq!(request.history.len(), 1, "errored attempt is not replayed");

    start(&mut state, "asst-2");
    delta(&mut state, "recovered");
    end(&mut state);

    assert_eq!(state.messages.len(), 2);
    assert_eq!(state.messages[1].content, "recovered");
    assert_eq!(state.messages[1].status, MessageStatus::Complete);
}

#[test]
fn retry_without_user_message_is_noop() {
    let mut state = new_state();
    let effects =
        reduce(&mut state, Action::RetryLastMessage { timestamp: 1 }).expect("retry accepted");
    assert!(effects.is_empty());
    assert!(!state.is_loading);
    assert!(state.messages.is_empty());
}

#[test]
fn tool_results_attach_and_refresh_in_place() {
    let mut state = new_state();
    send(&mut state, "what does ACME trade at?");
    start(&mut state, "asst-1");
    delta(&mut state, "Checking.");
    feed(
        &mut state,
        StreamEvent::ToolCall {
            thread_id: thread(),
            id: ToolCallId::from_string("t1"),
            name: "price_lookup".to_string(),
            arguments: json!({ "symbol": "ACME" }),
        },
    );
    feed(
        &mut state,
        StreamEvent::ToolResult {
            thread_id: thread(),
            tool_call_id: ToolCallId::from_string("t1"),
            payload: json!({ "price": 10 }),
        },
    );
    end(&mut state);

    let t1 = ToolCallId::from_string("t1");
    let before: Vec<_> = state.messages.iter().map(|m| m.id.clone()).collect();
    let call = state.messages[1].tool_call(&t1).expect("call recorded");
    assert_eq!(
        call.result.as_ref().map(|r| r.payload["price"].clone()),
        Some(json!(10))
    );

    // Out-of-band correction lands after the message completed.
    let effects = reduce(
        &mut state,
        Action::RefreshToolResult {
            tool_call_id: t1.clone(),
            payload: json!({ "price": 12 }),
        },
    )
    .expect("refresh never rejects");

    assert!(effects.iter().any(|e| matches!(
        e,
        Effect::EmitEvent {
            event: SessionEvent::ToolResultRefreshed { .. }
        }
    )));
    let after: Vec<_> = state.messages.iter().map(|m| m.id.clone()).collect();
    assert_eq!(before, after, "refresh never reorders messages");

    let call = state.messages[1].tool_call(&t1).expect("call still there");
    let result = call.result.as_ref().expect("result attached");
    assert_eq!(result.payload["price"], 12);
    assert_eq!(result.tool_call_id, t1);
    assert_eq!(state.messages[1].status, MessageStatus::Complete);
}

#[test]
fn refresh_for_unknown_id_is_ignored() {
    let mut state = new_state();
    send(&mut state, "hello");
    start(&mut state, "asst-1");
    end(&mut state);

    let effects = reduce(
        &mut state,
        Action::RefreshToolResult {
            tool_call_id: ToolCallId::from_string("nope"),
            payload: json!({}),
        },
    )
    .expect("refresh never rejects");

    assert!(effects.is_empty());
    assert_eq!(state.error, None);
}

#[rstest]
#[case::content_delta(StreamEvent::ContentDelta {
    thread_id: ThreadId::from_string("thread-a"),
    delta: "x".to_string(),
})]
#[case::tool_call(StreamEvent::ToolCall {
    thread_id: ThreadId::from_string("thread-a"),
    id: ToolCallId::from_string("t1"),
    name: "price_lookup".to_string(),
    arguments: serde_json::json!({}),
})]
#[case::tool_result(StreamEvent::ToolResult {
    thread_id: ThreadId::from_string("thread-a"),
    tool_call_id: ToolCallId::from_string("t1"),
    payload: serde_json::json!({}),
})]
#[case::message_end(StreamEvent::MessageEnd {
    thread_id: ThreadId::from_string("thread-a"),
})]
fn event_without_open_message_fails_the_turn(#[case] event: StreamEvent) {
    let mut state = new_state();
    send(&mut state, "hello");

    feed(&mut state, event);

    assert!(state.error.is_some());
    assert!(!state.is_loading);
    assert_eq!(state.messages.len(), 1, "only the user message remains");
}

#[test]
fn stream_failure_marks_open_message_errored() {
    let mut state = new_state();
    send(&mut state, "hello");
    let generation = state.generation;
    start(&mut state, "asst-1");
    delta(&mut state, "par");

    reduce(
        &mut state,
        Action::StreamFailed {
            generation,
            error: "connection reset".to_string(),
        },
    )
    .expect("failures never reject");

    assert_eq!(state.messages[1].status, MessageStatus::Errored);
    assert_eq!(state.messages[1].content, "par");
    assert_eq!(state.error.as_deref(), Some("connection reset"));
    assert!(!state.is_loading);
}

#[test]
fn stream_failure_after_completion_is_ignored() {
    let mut state = new_state();
    send(&mut state, "hello");
    let generation = state.generation;
    start(&mut state, "asst-1");
    end(&mut state);

    let effects = reduce(
        &mut state,
        Action::StreamFailed {
            generation,
            error: "late failure".to_string(),
        },
    )
    .expect("failures never reject");

    assert!(effects.is_empty());
    assert_eq!(state.error, None);
    assert_eq!(state.messages[1].status, MessageStatus::Complete);
}

#[test]
fn hydrate_replaces_history_and_demotes_open_messages() {
    use crate::session::message::ChatMessage;

    let mut state = new_state();
    send(&mut state, "old");
    start(&mut state, "asst-1");
    end(&mut state);

    let mut imported = vec![
        ChatMessage::user(MessageId::from_string("u1"), "stored question", 1),
        ChatMessage::assistant_pending(MessageId::from_string("a1"), 2),
    ];
    imported[1].content = "stored answer".to_string();
    imported[1].status = MessageStatus::Complete;
    let mut dangling = ChatMessage::assistant_pending(MessageId::from_string("a2"), 3);
    dangling.status = MessageStatus::Streaming;
    imported.push(dangling);

    reduce(&mut state, Action::HydrateHistory { messages: imported })
        .expect("hydrate never rejects");

    assert_eq!(state.messages.len(), 3);
    assert_eq!(state.messages[1].content, "stored answer");
    assert_eq!(
        state.messages[2].status,
        MessageStatus::Errored,
        "open statuses in stored history are demoted"
    );
    assert!(state.messages.iter().all(|m| m.status.is_terminal()));
}

#[test]
fn start_new_thread_resets_to_unestablished_state() {
    let mut state = new_state();
    send(&mut state, "hello");
    start(&mut state, "asst-1");
    end(&mut state);

    reduce(&mut state, Action::StartNewThread).expect("reset never rejects");

    assert_eq!(state.thread_id, None);
    assert!(state.messages.is_empty());
    assert_eq!(state.error, None);
    assert!(!state.is_loading);
}
