//! Single-writer actor owning the session.
//!
//! All mutation funnels through one task: public commands arrive on the
//! command channel, stream tasks feed events back on the internal action
//! channel, and both are serialized by the select loop. Snapshot
//! publication happens inside the same loop turn as the mutation, so
//! observers never see a torn state.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::session::action::Action;
use crate::session::effect::Effect;
use crate::session::event::SessionEvent;
use crate::session::message::ChatMessage;
use crate::session::reduce::{ReduceError, reduce};
use crate::session::refresh::{OwnedRefreshSet, PendingRefreshOwner};
use crate::session::state::{SessionSnapshot, SessionState};
use crate::session::subscription::{EventSubscription, SessionEventEnvelope, UnsubscribeSignal};
use crate::session::types::{Generation, MessageId, NonEmptyString, ThreadId, ToolCallId};
use crate::transport::{ChatRequest, ChatTransport};

const EVENT_BROADCAST_CAPACITY: usize = 256;
const COMMAND_CHANNEL_CAPACITY: usize = 32;
const ACTION_CHANNEL_CAPACITY: usize = 64;

enum SessionCmd {
    SendMessage {
        content: String,
        done: oneshot::Sender<Result<()>>,
    },
    RetryLastMessage {
        done: oneshot::Sender<Result<()>>,
    },
    ClearMessages {
        reply: oneshot::Sender<()>,
    },
    SwitchThread {
        thread_id: ThreadId,
        reply: oneshot::Sender<()>,
    },
    StartNewThread {
        reply: oneshot::Sender<()>,
    },
    HydrateHistory {
        messages: Vec<ChatMessage>,
        reply: oneshot::Sender<()>,
    },
    AddPendingRefresh {
        id: ToolCallId,
        reply: oneshot::Sender<()>,
    },
    RemovePendingRefresh {
        id: ToolCallId,
        reply: oneshot::Sender<()>,
    },
    RefreshToolResult {
        id: ToolCallId,
        payload: Value,
        reply: oneshot::Sender<()>,
    },
    Subscribe {
        reply: oneshot::Sender<EventSubscription>,
    },
    Shutdown,
}

/// Cloneable handle to a running session. Dropping every handle shuts the
/// session down.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<SessionCmd>,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
}

impl SessionHandle {
    /// Starts a session actor on the current tokio runtime.
    pub fn spawn(config: SessionConfig, transport: Arc<dyn ChatTransport>) -> SessionHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let (action_tx, action_rx) = mpsc::channel(ACTION_CHANNEL_CAPACITY);
        let (event_broadcast, _) = broadcast::channel(EVENT_BROADCAST_CAPACITY);
        let (unsubscribe_tx, unsubscribe_rx) = mpsc::unbounded_channel();

        let pending_refresh: Arc<dyn PendingRefreshOwner> = config
            .pending_refresh
            .clone()
            .unwrap_or_else(|| Arc::new(OwnedRefreshSet::new()));

        let state = SessionState::new(config.thread_id.clone(), config.endpoint.clone());
        let initial = SessionSnapshot::capture(&state, pending_refresh.snapshot());
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);

        let actor = SessionActor {
            state,
            config,
            transport,
            pending_refresh,
            active_streams: HashMap::new(),
            turn_waiters: HashMap::new(),
            finished_turns: Vec::new(),
            event_broadcast,
            snapshot_tx,
            subscriber_count: 0,
            unsubscribe_tx,
            unsubscribe_rx,
            action_tx,
            action_rx,
        };

        tokio::spawn(actor.run(cmd_rx));

        SessionHandle {
            cmd_tx,
            snapshot_rx,
        }
    }

    /// Sends one user message and resolves once the assistant turn reaches
    /// a terminal event (or is cancelled by a reset). Stream-level failures
    /// land in the snapshot's `error`, not in the returned result.
    pub async fn send_message(&self, content: impl Into<String>) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send_cmd(SessionCmd::SendMessage {
            content: content.into(),
            done: done_tx,
        })
        .await?;
        done_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Re-issues the last user turn, replacing a failed assistant attempt.
    /// No-op when no user message exists.
    pub async fn retry_last_message(&self) -> Result<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send_cmd(SessionCmd::RetryLastMessage { done: done_tx })
            .await?;
        done_rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Empties the message list for the active thread, cancelling any
    /// in-flight turn.
    pub async fn clear_messages(&self) -> Result<()> {
        self.round_trip(|reply| SessionCmd::ClearMessages { reply })
            .await
    }

    /// Resets to `thread_id`, cancelling any in-flight turn. History for
    /// the new thread arrives via [`SessionHandle::hydrate_history`] or
    /// starts empty.
    pub async fn switch_thread(&self, thread_id: ThreadId) -> Result<()> {
        self.round_trip(|reply| SessionCmd::SwitchThread { thread_id, reply })
            .await
    }

    /// Resets to a fresh, unestablished thread; the next send assigns an
    /// id.
    pub async fn start_new_thread(&self) -> Result<()> {
        self.round_trip(|reply| SessionCmd::StartNewThread { reply })
            .await
    }

    /// Replaces the message list with externally loaded history.
    pub async fn hydrate_history(&self, messages: Vec<ChatMessage>) -> Result<()> {
        self.round_trip(|reply| SessionCmd::HydrateHistory { messages, reply })
            .await
    }

    /// Marks `id` as awaiting an out-of-band correction. Idempotent.
    pub async fn add_pending_refresh(&self, id: ToolCallId) -> Result<()> {
        self.round_trip(|reply| SessionCmd::AddPendingRefresh { id, reply })
            .await
    }

    /// Clears the pending-refresh mark for `id`. Idempotent.
    pub async fn remove_pending_refresh(&self, id: ToolCallId) -> Result<()> {
        self.round_trip(|reply| SessionCmd::RemovePendingRefresh { id, reply })
            .await
    }

    /// Applies an out-of-band correction to the tool result for `id`,
    /// replacing its payload in place. Pending-refresh membership is not
    /// touched; pair with [`SessionHandle::remove_pending_refresh`] once
    /// the correction is final.
    pub async fn apply_tool_refresh(&self, id: ToolCallId, payload: Value) -> Result<()> {
        self.round_trip(|reply| SessionCmd::RefreshToolResult { id, payload, reply })
            .await
    }

    pub async fn subscribe(&self) -> Result<EventSubscription> {
        self.round_trip(|reply| SessionCmd::Subscribe { reply })
            .await
    }

    /// Watch channel carrying one immutable snapshot per state mutation.
    pub fn watch_snapshot(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn shutdown(&self) {
        let _ = self.cmd_tx.try_send(SessionCmd::Shutdown);
    }

    async fn send_cmd(&self, cmd: SessionCmd) -> Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    async fn round_trip<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> SessionCmd) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_cmd(make(reply_tx)).await?;
        reply_rx.await.map_err(|_| Error::ChannelClosed)
    }
}

struct SessionActor {
    state: SessionState,
    config: SessionConfig,
    transport: Arc<dyn ChatTransport>,
    pending_refresh: Arc<dyn PendingRefreshOwner>,
    active_streams: HashMap<Generation, CancellationToken>,
    turn_waiters: HashMap<Generation, oneshot::Sender<Result<()>>>,
    finished_turns: Vec<Generation>,
    event_broadcast: broadcast::Sender<SessionEventEnvelope>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    subscriber_count: usize,
    unsubscribe_tx: mpsc::UnboundedSender<UnsubscribeSignal>,
    unsubscribe_rx: mpsc::UnboundedReceiver<UnsubscribeSignal>,
    action_tx: mpsc::Sender<Action>,
    action_rx: mpsc::Receiver<Action>,
}

impl SessionActor {
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<SessionCmd>) {
        loop {
            tokio::select! {
                biased;

                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(SessionCmd::Shutdown) | None => break,
                        Some(cmd) => {
                            self.handle_cmd(cmd);
                            self.settle();
                        }
                    }
                }

                Some(action) = self.action_rx.recv() => {
                    self.handle_action(action);
                    self.settle();
                }

                Some(UnsubscribeSignal) = self.unsubscribe_rx.recv() => {
                    self.subscriber_count = self.subscriber_count.saturating_sub(1);
                    tracing::debug!(
                        subscriber_count = self.subscriber_count,
                        "subscriber disconnected"
                    );
                }
            }
        }

        for token in self.active_streams.values() {
            token.cancel();
        }
        for (_, done) in self.turn_waiters.drain() {
            let _ = done.send(Err(Error::ShuttingDown));
        }
        tracing::debug!("session actor stopped");
    }

    fn handle_cmd(&mut self, cmd: SessionCmd) {
        match cmd {
            SessionCmd::SendMessage { content, done } => {
                let Some(text) = NonEmptyString::new(content) else {
                    let _ = done.send(Err(Error::EmptyMessage));
                    return;
                };
                let action = Action::SendUserMessage {
                    message_id: MessageId::new(),
                    text,
                    timestamp: ChatMessage::current_timestamp(),
                };
                self.dispatch_turn(action, done);
            }

            SessionCmd::RetryLastMessage { done } => {
                let action = Action::RetryLastMessage {
                    timestamp: ChatMessage::current_timestamp(),
                };
                self.dispatch_turn(action, done);
            }

            SessionCmd::ClearMessages { reply } => {
                self.handle_action(Action::ClearMessages);
                let _ = reply.send(());
            }

            SessionCmd::SwitchThread { thread_id, reply } => {
                self.handle_action(Action::SwitchThread { thread_id });
                let _ = reply.send(());
            }

            SessionCmd::StartNewThread { reply } => {
                self.handle_action(Action::StartNewThread);
                let _ = reply.send(());
            }

            SessionCmd::HydrateHistory { messages, reply } => {
                self.handle_action(Action::HydrateHistory { messages });
                let _ = reply.send(());
            }

            SessionCmd::AddPendingRefresh { id, reply } => {
                if !self.pending_refresh.add(id) {
                    tracing::debug!("pending refresh id was already tracked");
                }
                let _ = reply.send(());
            }

            SessionCmd::RemovePendingRefresh { id, reply } => {
                self.pending_refresh.remove(&id);
                let _ = reply.send(());
            }

            SessionCmd::RefreshToolResult { id, payload, reply } => {
                self.handle_action(Action::RefreshToolResult {
                    tool_call_id: id,
                    payload,
                });
                let _ = reply.send(());
            }

            SessionCmd::Subscribe { reply } => {
                self.subscriber_count += 1;
                let subscription = EventSubscription::new(
                    self.event_broadcast.subscribe(),
                    self.unsubscribe_tx.clone(),
                );
                let _ = reply.send(subscription);
            }

            SessionCmd::Shutdown => {}
        }
    }

    /// Runs a turn-starting action. The waiter resolves when the turn
    /// reaches its terminal, or immediately when the action turned out to
    /// be a no-op.
    fn dispatch_turn(&mut self, action: Action, done: oneshot::Sender<Result<()>>) {
        match reduce(&mut self.state, action) {
            Ok(effects) => {
                let opened = effects.iter().find_map(|effect| match effect {
                    Effect::OpenStream { generation, .. } => Some(*generation),
                    _ => None,
                });
                if let Some(generation) = opened {
                    self.turn_waiters.insert(generation, done);
                    self.apply_effects(effects);
                } else {
                    self.apply_effects(effects);
                    let _ = done.send(Ok(()));
                }
            }
            Err(ReduceError::RequestInFlight) => {
                let _ = done.send(Err(Error::RequestInFlight));
            }
        }
    }

    fn handle_action(&mut self, action: Action) {
        match reduce(&mut self.state, action) {
            Ok(effects) => self.apply_effects(effects),
            Err(error) => tracing::debug!(%error, "action rejected"),
        }
    }

    fn apply_effects(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            self.handle_effect(effect);
        }
    }

    fn handle_effect(&mut self, effect: Effect) {
        match effect {
            Effect::EmitEvent { event } => self.emit_event(event),

            Effect::OpenStream {
                generation,
                request,
            } => self.open_stream(generation, request),

            Effect::CancelStream { generation } => {
                if let Some(token) = self.active_streams.remove(&generation) {
                    token.cancel();
                }
            }

            Effect::FinishTurn { generation } => {
                self.finished_turns.push(generation);
            }
        }
    }

    fn emit_event(&mut self, event: SessionEvent) {
        self.run_hooks(&event);
        let seq = self.state.increment_sequence();
        let _ = self.event_broadcast.send(SessionEventEnvelope { seq, event });
    }

    fn run_hooks(&self, event: &SessionEvent) {
        match event {
            SessionEvent::ToolCallAdded { tool_call, .. } => {
                if let Some(hook) = &self.config.on_tool_call {
                    hook(tool_call);
                }
            }
            SessionEvent::ToolResultAttached { result, .. }
            | SessionEvent::ToolResultRefreshed { result } => {
                if let Some(hook) = &self.config.on_tool_result {
                    hook(result);
                }
            }
            SessionEvent::Error { message } => {
                if let Some(hook) = &self.config.on_error {
                    hook(message);
                }
            }
            _ => {}
        }
    }

    fn open_stream(&mut self, generation: Generation, request: ChatRequest) {
        let cancel = CancellationToken::new();
        self.active_streams.insert(generation, cancel.clone());

        let transport = Arc::clone(&self.transport);
        let action_tx = self.action_tx.clone();

        tokio::spawn(async move {
            let mut stream = match transport.open_stream(request, cancel.clone()).await {
                Ok(stream) => stream,
                Err(error) => {
                    tracing::error!(%generation, %error, "failed to open stream");
                    let _ = action_tx
                        .send(Action::StreamFailed {
                            generation,
                            error: error.to_string(),
                        })
                        .await;
                    return;
                }
            };

            let mut saw_terminal = false;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    item = stream.next() => match item {
                        Some(event) => {
                            saw_terminal = saw_terminal || event.is_terminal();
                            if action_tx
                                .send(Action::StreamEvent { generation, event })
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                        None => break,
                    }
                }
            }

            if !saw_terminal && !cancel.is_cancelled() {
                let _ = action_tx
                    .send(Action::StreamFailed {
                        generation,
                        error: "stream ended before a terminal event".to_string(),
                    })
                    .await;
            }
        });
    }

    /// Publishes the snapshot for whatever just mutated, then releases any
    /// turn waiters. Waiters resolve only after publication so a resumed
    /// caller always observes the terminal state.
    fn settle(&mut self) {
        let snapshot = SessionSnapshot::capture(&self.state, self.pending_refresh.snapshot());
        let _ = self.snapshot_tx.send(snapshot);

        for generation in std::mem::take(&mut self.finished_turns) {
            if let Some(token) = self.active_streams.remove(&generation) {
                token.cancel();
            }
            if let Some(done) = self.turn_waiters.remove(&generation) {
                let _ = done.send(Ok(()));
            }
        }
    }
}
