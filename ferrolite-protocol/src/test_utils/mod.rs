//! In-process implementations for testing.
//!
//! Available behind the `test-utils` feature flag. These are minimal
//! implementations that prove the backend and observer traits are usable.

mod echo_kernel;
mod recording_observer;

pub use echo_kernel::{EchoKernel, EchoKernelFactory, echo_spec};
pub use recording_observer::RecordingObserver;
