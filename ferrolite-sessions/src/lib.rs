#![deny(missing_docs)]
//! Session store for ferrolite.
//!
//! A [`Session`] binds a document path and name to a kernel of a
//! [`KernelRuntime`](ferrolite_kernels::KernelRuntime). Several sessions may
//! share one kernel. The [`SessionStore`] keeps sessions across kernel
//! restarts: a removed kernel whose id comes back within
//! [`SessionConfig::restart_grace`] was restarted, one that stays gone was
//! terminated and its sessions are reaped.

mod config;
mod session;
mod store;

pub use config::SessionConfig;
pub use session::{KernelRef, PatchSession, Session, StartSession, location_for};
pub use store::SessionStore;
