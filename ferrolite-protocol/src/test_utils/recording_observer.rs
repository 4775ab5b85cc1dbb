//! RecordingObserver: records every kernel lifecycle event.

use crate::lifecycle::{KernelEvent, KernelObserver};
use std::sync::{Mutex, PoisonError};

/// An observer that records every event it sees.
/// Use `.events()` to inspect what was recorded.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<KernelEvent>>,
}

impl RecordingObserver {
    /// Create an observer with nothing recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all recorded events, oldest first.
    pub fn events(&self) -> Vec<KernelEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl KernelObserver for RecordingObserver {
    fn on_event(&self, event: &KernelEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
