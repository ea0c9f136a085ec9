pub mod action;
pub mod actor;
pub mod effect;
pub mod event;
pub mod message;
pub mod reduce;
pub mod refresh;
pub mod state;
pub mod subscription;
pub mod types;

#[cfg(test)]
mod tests;

pub use action::Action;
pub use actor::SessionHandle;
pub use effect::Effect;
pub use event::SessionEvent;
pub use message::{ChatMessage, MessageStatus, Role, ToolCall, ToolResult};
pub use reduce::{ReduceError, reduce};
pub use refresh::{OwnedRefreshSet, PendingRefreshOwner, SharedRefreshSet};
pub use state::{SessionSnapshot, SessionState};
pub use subscription::{EventSubscription, SessionEventEnvelope};
pub use types::{Generation, MessageId, NonEmptyString, ThreadId, ToolCallId};
