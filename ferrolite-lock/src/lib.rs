#![deny(missing_docs)]
//! Exclusive-execution lock with tagged cancellation.
//!
//! An [`ExecutionLock`] serializes the handling of one kernel's queued
//! messages. It behaves like an async mutex with three extra properties:
//!
//! - **Strict FIFO.** [`ExecutionLock::acquire`] enqueues synchronously, so
//!   the order of `acquire` calls is the order in which holders run.
//! - **Tagged cancellation.** [`ExecutionLock::cancel`] records a
//!   [`CancelReason`] and resolves every not-yet-granted acquisition with
//!   it at once. The current holder is never disturbed; it finishes and
//!   drops its guard as usual.
//! - **Mutable reason.** The recorded reason can be read and moved on
//!   (`interrupt` → `interrupt-subsequent`) by whoever handles the
//!   cancelled work, which is how an interrupt burst yields exactly one
//!   user-visible error.
//!
//! Ownership is handed directly from a releasing guard to the next queued
//! waiter, so a late `acquire` can never overtake the queue.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, oneshot};

/// Why queued acquisitions were cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CancelReason {
    /// A user interrupt; the first cancelled request reports it.
    Interrupt,
    /// A user interrupt that has already been reported once.
    InterruptSubsequent,
    /// An earlier request failed; the rest of the batch is abandoned.
    Error,
}

impl CancelReason {
    /// The wire spelling of this reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Interrupt => "interrupt",
            Self::InterruptSubsequent => "interrupt-subsequent",
            Self::Error => "error",
        }
    }

    /// Whether this reason stems from a user interrupt.
    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupt | Self::InterruptSubsequent)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an acquisition that was cancelled before it was granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("lock acquisition cancelled: {reason}")]
pub struct Cancelled {
    /// The reason recorded by the cancel that resolved this acquisition.
    pub reason: CancelReason,
}

enum Grant {
    Acquired,
    Cancelled(CancelReason),
}

#[derive(Default)]
struct State {
    held: bool,
    waiters: VecDeque<oneshot::Sender<Grant>>,
    reason: Option<CancelReason>,
}

/// FIFO exclusive-execution lock with tagged cancellation. One per kernel.
#[derive(Default)]
pub struct ExecutionLock {
    state: Mutex<State>,
    unlocked: Notify,
}

impl ExecutionLock {
    /// Create an unlocked lock with no recorded cancel reason.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Join the queue.
    ///
    /// The place in line is taken immediately, before the returned
    /// [`Acquire`] is awaited. Dropping the `Acquire` gives the place up.
    pub fn acquire(self: &Arc<Self>) -> Acquire {
        let mut state = self.state();
        if !state.held {
            state.held = true;
            return Acquire {
                lock: Arc::clone(self),
                slot: Slot::Granted,
            };
        }
        let (tx, rx) = oneshot::channel();
        state.waiters.push_back(tx);
        Acquire {
            lock: Arc::clone(self),
            slot: Slot::Queued(rx),
        }
    }

    /// Run `work` while holding the lock.
    pub async fn run_exclusive<F, T>(self: &Arc<Self>, work: F) -> Result<T, Cancelled>
    where
        F: Future<Output = T>,
    {
        let _guard = self.acquire().granted().await?;
        Ok(work.await)
    }

    /// Record `reason` and cancel every queued acquisition with it.
    ///
    /// Returns how many acquisitions were cancelled. The current holder,
    /// if any, keeps the lock.
    pub fn cancel(&self, reason: CancelReason) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state();
            state.reason = Some(reason);
            state.waiters.drain(..).collect()
        };
        let cancelled = drained
            .into_iter()
            .filter(|tx| !tx.is_closed())
            .map(|tx| tx.send(Grant::Cancelled(reason)).is_ok())
            .filter(|delivered| *delivered)
            .count();
        tracing::debug!(%reason, cancelled, "ferrolite.lock.cancel");
        cancelled
    }

    /// The reason recorded by the most recent cancel, if any.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.state().reason
    }

    /// Overwrite the recorded reason.
    pub fn set_cancel_reason(&self, reason: Option<CancelReason>) {
        self.state().reason = reason;
    }

    /// Replace the recorded reason with `to` only if it is currently `from`.
    ///
    /// Returns whether the swap happened.
    pub fn transition_cancel_reason(&self, from: CancelReason, to: CancelReason) -> bool {
        let mut state = self.state();
        if state.reason == Some(from) {
            state.reason = Some(to);
            true
        } else {
            false
        }
    }

    /// Whether someone holds the lock (or has been granted it and not yet
    /// picked it up).
    pub fn is_locked(&self) -> bool {
        self.state().held
    }

    /// Number of acquisitions waiting in line.
    pub fn pending(&self) -> usize {
        self.state().waiters.len()
    }

    /// Resolve once the lock is free with nobody waiting.
    pub async fn wait_for_unlock(&self) {
        loop {
            let notified = self.unlocked.notified();
            if !self.is_locked() {
                return;
            }
            notified.await;
        }
    }

    fn release(&self) {
        let mut state = self.state();
        while let Some(next) = state.waiters.pop_front() {
            if next.send(Grant::Acquired).is_ok() {
                return;
            }
        }
        state.held = false;
        drop(state);
        self.unlocked.notify_waiters();
    }
}

impl fmt::Debug for ExecutionLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("ExecutionLock")
            .field("held", &state.held)
            .field("pending", &state.waiters.len())
            .field("reason", &state.reason)
            .finish()
    }
}

enum Slot {
    Granted,
    Queued(oneshot::Receiver<Grant>),
    Taken,
}

/// A place in an [`ExecutionLock`]'s queue.
#[must_use = "dropping an Acquire gives up its place in the queue"]
pub struct Acquire {
    lock: Arc<ExecutionLock>,
    slot: Slot,
}

impl Acquire {
    /// Whether the lock was free when this place was taken.
    pub fn is_immediate(&self) -> bool {
        matches!(self.slot, Slot::Granted)
    }

    /// Wait for this place to come up, or for a cancel to resolve it.
    pub async fn granted(mut self) -> Result<ExecutionGuard, Cancelled> {
        let grant = match &mut self.slot {
            Slot::Granted => Grant::Acquired,
            Slot::Queued(rx) => match rx.await {
                Ok(grant) => grant,
                // The sender only disappears through a cancel that lost
                // the race with our receive.
                Err(_) => Grant::Cancelled(self.lock.cancel_reason().unwrap_or(CancelReason::Error)),
            },
            Slot::Taken => Grant::Cancelled(CancelReason::Error),
        };
        self.slot = Slot::Taken;
        match grant {
            Grant::Acquired => Ok(ExecutionGuard {
                lock: Arc::clone(&self.lock),
            }),
            Grant::Cancelled(reason) => Err(Cancelled { reason }),
        }
    }
}

impl Drop for Acquire {
    fn drop(&mut self) {
        match std::mem::replace(&mut self.slot, Slot::Taken) {
            Slot::Granted => self.lock.release(),
            Slot::Queued(mut rx) => {
                rx.close();
                if let Ok(Grant::Acquired) = rx.try_recv() {
                    self.lock.release();
                }
            }
            Slot::Taken => {}
        }
    }
}

/// Proof of holding an [`ExecutionLock`]. Dropping it passes the lock on.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ExecutionGuard {
    lock: Arc<ExecutionLock>,
}

impl fmt::Debug for ExecutionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionGuard").finish_non_exhaustive()
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        self.lock.release();
    }
}
