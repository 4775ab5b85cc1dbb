//! # ferrolite-protocol: vocabulary for the ferrolite kernel runtime
//!
//! This crate defines the types and capability traits shared by every
//! ferrolite component. It holds no live state and owns no tasks.
//!
//! ## The Pieces
//!
//! | Piece | Types | What it does |
//! |-------|-------|-------------|
//! | Identity | [`KernelId`], [`SessionId`], [`ClientId`] | Typed string ids |
//! | Messages | [`Message`], [`Header`], [`Channel`] | Jupyter-shaped envelope |
//! | Kernels | [`KernelSpec`], [`KernelBackend`], [`KernelFactory`], [`KernelContext`] | The capability a compute backend implements |
//! | Lifecycle | [`KernelEvent`], [`KernelObserver`], [`KernelModel`] | Change notification between runtime and session store |
//! | Errors | [`KernelError`], [`SessionError`], [`TransportError`] | Failure taxonomy |
//!
//! ## Backends Are Opaque
//!
//! The runtime never inspects a backend. It waits for [`KernelBackend::ready`],
//! hands it messages one at a time through [`KernelBackend::handle_message`],
//! and disposes it. Everything a backend says goes back out through
//! [`KernelContext::send`], which the runtime routes to attached clients.

#![deny(missing_docs)]

pub mod duration;
pub mod error;
pub mod id;
pub mod kernel;
pub mod lifecycle;
pub mod message;

#[cfg(feature = "test-utils")]
pub mod test_utils;

// Re-exports for convenience
pub use duration::DurationMs;
pub use error::{KernelError, SessionError, TransportError};
pub use id::{ClientId, KernelId, SessionId};
pub use kernel::{
    KernelBackend, KernelChannel, KernelContext, KernelFactory, KernelInstance, KernelSpec,
    KernelSpecsModel, KernelStatus,
};
pub use lifecycle::{KernelEvent, KernelModel, KernelObserver};
pub use message::{Channel, ExecutionState, Header, Message, msg_type};
