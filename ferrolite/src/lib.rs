#![deny(missing_docs)]
//! # ferrolite: umbrella crate
//!
//! A single import surface for the ferrolite kernel and session runtime.
//! Re-exports the protocol and the runtime crates behind feature flags,
//! plus a `prelude` for the happy path.

#[cfg(feature = "core")]
pub use ferrolite_protocol;
#[cfg(feature = "core")]
pub use ferrolite_registry;
#[cfg(feature = "lock")]
pub use ferrolite_lock;
#[cfg(feature = "kernels")]
pub use ferrolite_kernels;
#[cfg(feature = "sessions")]
pub use ferrolite_sessions;

/// Happy-path imports for wiring a ferrolite runtime.
pub mod prelude {
    #[cfg(feature = "core")]
    pub use ferrolite_protocol::{
        Channel, ClientId, DurationMs, ExecutionState, KernelBackend, KernelContext, KernelError,
        KernelEvent, KernelFactory, KernelId, KernelModel, KernelObserver, KernelSpec, KernelStatus,
        Message, SessionError, SessionId, TransportError, msg_type,
    };

    #[cfg(feature = "core")]
    pub use ferrolite_registry::KernelRegistry;

    #[cfg(feature = "lock")]
    pub use ferrolite_lock::{CancelReason, Cancelled, ExecutionLock};

    #[cfg(feature = "kernels")]
    pub use ferrolite_kernels::{ClientConnection, KernelRuntime, RuntimeConfig, StartKernel};

    #[cfg(feature = "sessions")]
    pub use ferrolite_sessions::{
        KernelRef, PatchSession, Session, SessionConfig, SessionStore, StartSession,
    };
}
