use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Precondition and lifecycle failures returned across the public API.
/// Stream-level failures are not here on purpose: they surface through the
/// session's error field so UIs can render them inline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("message content is empty")]
    EmptyMessage,

    #[error("a request is already in flight")]
    RequestInFlight,

    #[error("session is shutting down")]
    ShuttingDown,

    #[error("session channel closed")]
    ChannelClosed,
}
