use crate::session::event::SessionEvent;
use crate::session::types::Generation;
use crate::transport::ChatRequest;

/// Side effects requested by the reducer, interpreted by the actor. The
/// reducer itself never performs I/O.
#[derive(Debug, Clone)]
pub enum Effect {
    EmitEvent {
        event: SessionEvent,
    },

    OpenStream {
        generation: Generation,
        request: ChatRequest,
    },

    CancelStream {
        generation: Generation,
    },

    /// The turn under `generation` reached its end (terminal event,
    /// failure, or cancellation); any caller awaiting it may resume.
    FinishTurn {
        generation: Generation,
    },
}

impl Effect {
    pub fn is_emit_event(&self) -> bool {
        matches!(self, Effect::EmitEvent { .. })
    }

    pub fn into_event(self) -> Option<SessionEvent> {
        match self {
            Effect::EmitEvent { event } => Some(event),
            _ => None,
        }
    }
}
