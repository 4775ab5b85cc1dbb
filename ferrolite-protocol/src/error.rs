//! Error types for each component.

use thiserror::Error;

/// Kernel runtime and backend errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum KernelError {
    /// No kernel spec (and therefore no factory) is registered under this name.
    /// Fails the triggering call; never retried.
    #[error("no such kernel spec: {0}")]
    NoSuchKernelSpec(String),

    /// The requested kernel id is not running.
    #[error("kernel not found: {0}")]
    NotFound(String),

    /// The factory failed to produce a kernel instance.
    #[error("kernel failed to start: {0}")]
    Startup(String),

    /// The backend reported a failure while becoming ready or handling a message.
    #[error("backend error: {0}")]
    Backend(String),

    /// The kernel was disposed while the call was in progress.
    #[error("kernel disposed: {0}")]
    Disposed(String),

    /// The stdin round-trip was abandoned before an `input_reply` arrived.
    #[error("stdin closed before a reply arrived")]
    StdinClosed,

    /// A transport-level failure that the caller has to see.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Catch-all. Include context.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Session store errors.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SessionError {
    /// The requested session was not found.
    #[error("session not found: {0}")]
    NotFound(String),

    /// A patch request could not be applied.
    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    /// A kernel error propagated through the session store.
    #[error("kernel error: {0}")]
    Kernel(#[from] KernelError),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Client transport errors.
///
/// Sends to vanished clients are logged and absorbed by the transport;
/// these variants only surface where a caller is waiting on the outcome
/// (a stdin round-trip with nobody to answer it, a send on a dead connection).
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TransportError {
    /// The client is no longer attached.
    #[error("client detached: {0}")]
    Detached(String),

    /// No attached client matches the message's session.
    #[error("no client attached for session {0:?}")]
    NoClient(String),
}
