#![deny(missing_docs)]
//! In-process kernel runtime for ferrolite.
//!
//! [`KernelRuntime`] builds kernels from a [`KernelRegistry`](ferrolite_registry::KernelRegistry),
//! keeps the live-kernel map, and gives every kernel a transport that
//! attaches any number of [`ClientConnection`]s.
//!
//! Per kernel, queued shell messages run one at a time in arrival order,
//! guarded by an [`ExecutionLock`](ferrolite_lock::ExecutionLock). Two
//! cancellation paths resolve the queue early:
//!
//! - **Interrupt.** [`KernelRuntime::interrupt`] cancels every queued
//!   request. The first one broadcasts a single `Kernel Interrupt` error;
//!   each one gets an `execute_reply{status: error, cause: interrupt,
//!   execution_count: 0}` followed by an `idle` status.
//! - **Failure.** A backend `execute_reply{status: error}` silently drops
//!   everything queued behind the failing request.
//!
//! `input_reply` and control-channel messages never wait in the queue.

mod config;
mod connection;
mod runtime;
mod synthetic;
mod transport;

pub use config::RuntimeConfig;
pub use connection::ClientConnection;
pub use runtime::{KernelRuntime, StartKernel};
