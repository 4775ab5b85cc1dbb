//! Lifecycle events: how the kernel runtime tells others what changed.
//!
//! The runtime calls every registered [`KernelObserver`] synchronously, in
//! registration order, at the point of mutation. A restart is reported as
//! `Removed` followed by `Started` for the same id, then `Restarted`.
//! Observers that must tell a restart from a permanent termination watch
//! for the `Started` that follows a `Removed`.

use crate::id::KernelId;
use serde::{Deserialize, Serialize};

/// The `{id, name}` model of a kernel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KernelModel {
    /// Kernel id.
    pub id: KernelId,
    /// Kernel spec name.
    pub name: String,
}

/// A change in the set of live kernels.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KernelEvent {
    /// A kernel was added to the live map.
    Started {
        /// The new kernel.
        model: KernelModel,
    },
    /// A kernel was removed from the live map.
    Removed {
        /// Id of the removed kernel.
        id: KernelId,
    },
    /// A restart finished; the same id is live again.
    Restarted {
        /// The restarted kernel.
        model: KernelModel,
    },
}

/// Receives [`KernelEvent`]s.
///
/// Called with the runtime's state already updated and no lock held.
/// Implementations must not block; spawn if work is asynchronous.
pub trait KernelObserver: Send + Sync {
    /// Observe one event.
    fn on_event(&self, event: &KernelEvent);
}
