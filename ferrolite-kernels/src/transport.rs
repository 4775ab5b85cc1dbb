//! Per-kernel client transport.
//!
//! Owns the attached clients of one kernel, the kernel's [`ExecutionLock`]
//! and the worker task that feeds queued messages to the backend one at a
//! time. Inbound traffic (client → kernel) is split three ways:
//!
//! - `input_reply` resolves a pending stdin wait, or goes straight to the
//!   backend. It never touches the lock: the execution that asked for
//!   input is the current holder.
//! - `control` messages go straight to the backend.
//! - everything else takes a place in the lock's queue *synchronously*,
//!   then waits in the worker's FIFO.
//!
//! Outbound traffic (kernel → clients) is broadcast on iopub and routed by
//! session on every other channel.

use crate::config::RuntimeConfig;
use crate::synthetic;
use async_trait::async_trait;
use ferrolite_lock::{Acquire, CancelReason, Cancelled, ExecutionLock};
use ferrolite_protocol::error::{KernelError, TransportError};
use ferrolite_protocol::id::{ClientId, KernelId};
use ferrolite_protocol::kernel::{KernelBackend, KernelChannel, KernelStatus};
use ferrolite_protocol::message::{Channel, Message, msg_type};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;

struct Attachment {
    client_id: ClientId,
    serial: u64,
    tx: mpsc::UnboundedSender<Message>,
}

struct StdinWaiter {
    request_id: String,
    tx: oneshot::Sender<Message>,
}

struct Queued {
    msg: Message,
    acquire: Acquire,
}

struct State {
    clients: Vec<Attachment>,
    next_serial: u64,
    backend: Option<Arc<dyn KernelBackend>>,
    queue: Option<mpsc::UnboundedSender<Queued>>,
    worker: Option<AbortHandle>,
    stdin: VecDeque<StdinWaiter>,
    /// msg_id of the queued message that owns the lock, started or not.
    holder: Option<String>,
    /// msg_ids still waiting for the lock, in lock order.
    waiting: VecDeque<String>,
    /// msg_id that held the lock when the last interrupt landed.
    interrupted: Option<String>,
    /// Cancelled msg_ids that carry their burst's interrupt error.
    announce: HashSet<String>,
    status: KernelStatus,
    closed: bool,
}

pub(crate) struct ClientTransport {
    kernel_id: KernelId,
    config: Arc<RuntimeConfig>,
    lock: Arc<ExecutionLock>,
    state: Mutex<State>,
}

impl ClientTransport {
    pub(crate) fn new(kernel_id: KernelId, config: Arc<RuntimeConfig>) -> Arc<Self> {
        Arc::new(Self {
            kernel_id,
            config,
            lock: Arc::new(ExecutionLock::new()),
            state: Mutex::new(State {
                clients: Vec::new(),
                next_serial: 0,
                backend: None,
                queue: None,
                worker: None,
                stdin: VecDeque::new(),
                holder: None,
                waiting: VecDeque::new(),
                interrupted: None,
                announce: HashSet::new(),
                status: KernelStatus::Starting,
                closed: false,
            }),
        })
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn detached(&self) -> TransportError {
        TransportError::Detached(self.kernel_id.to_string())
    }

    /// The backend-facing side of this transport.
    pub(crate) fn channel(self: &Arc<Self>) -> Arc<dyn KernelChannel> {
        Arc::new(TransportChannel {
            kernel_id: self.kernel_id.clone(),
            transport: Arc::downgrade(self),
        })
    }

    pub(crate) fn status(&self) -> KernelStatus {
        self.state().status
    }

    /// Attach the backend and start the worker that drains the queue.
    pub(crate) fn bind(self: &Arc<Self>, backend: Arc<dyn KernelBackend>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        if state.closed {
            return;
        }
        let worker = tokio::spawn(Arc::clone(self).run(Arc::clone(&backend), rx));
        state.backend = Some(backend);
        state.queue = Some(tx);
        state.worker = Some(worker.abort_handle());
        state.status = KernelStatus::Idle;
    }

    /// Tear down: disconnect every client, abandon stdin waits, stop the
    /// worker and drop everything still queued.
    pub(crate) fn close(&self) {
        let (clients, worker) = {
            let mut state = self.state();
            state.closed = true;
            state.status = KernelStatus::Dead;
            state.backend = None;
            state.queue = None;
            state.stdin.clear();
            state.holder = None;
            state.waiting.clear();
            state.announce.clear();
            (std::mem::take(&mut state.clients), state.worker.take())
        };
        if let Some(worker) = worker {
            worker.abort();
        }
        tracing::debug!(
            kernel_id = %self.kernel_id,
            clients = clients.len(),
            "ferrolite.transport.close"
        );
    }

    // --- Clients ---

    pub(crate) fn attach(
        &self,
        client_id: ClientId,
    ) -> Result<(u64, mpsc::UnboundedReceiver<Message>), TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.state();
        if state.closed {
            return Err(self.detached());
        }
        let serial = state.next_serial;
        state.next_serial += 1;

        let replaced = match state.clients.iter_mut().find(|a| a.client_id == client_id) {
            Some(existing) => {
                existing.serial = serial;
                existing.tx = tx;
                true
            }
            None => {
                state.clients.push(Attachment {
                    client_id: client_id.clone(),
                    serial,
                    tx,
                });
                false
            }
        };
        tracing::debug!(
            kernel_id = %self.kernel_id,
            client_id = %client_id,
            replaced,
            "ferrolite.transport.attach"
        );
        Ok((serial, rx))
    }

    /// Remove the attachment made under `serial`. A newer attachment of the
    /// same client is left alone.
    pub(crate) fn detach(&self, client_id: &ClientId, serial: u64) -> bool {
        let mut state = self.state();
        let before = state.clients.len();
        state
            .clients
            .retain(|a| !(a.client_id == *client_id && a.serial == serial));
        let detached = state.clients.len() != before;
        if detached {
            tracing::debug!(
                kernel_id = %self.kernel_id,
                client_id = %client_id,
                "ferrolite.transport.detach"
            );
        }
        detached
    }

    pub(crate) fn clients(&self) -> Vec<ClientId> {
        self.state()
            .clients
            .iter()
            .map(|a| a.client_id.clone())
            .collect()
    }

    // --- Client → kernel ---

    pub(crate) fn deliver(&self, msg: Message) -> Result<(), TransportError> {
        if msg.msg_type() == msg_type::INPUT_REPLY {
            let msg = match self.resolve_stdin(msg) {
                Ok(()) => return Ok(()),
                Err(unclaimed) => unclaimed,
            };
            return self.deliver_direct(msg);
        }
        if msg.channel == Channel::Control {
            return self.deliver_direct(msg);
        }

        // Queue position and lock position are taken together so the
        // worker's FIFO and the lock's FIFO never disagree.
        let mut guard = self.state();
        let state = &mut *guard;
        let queue = state.queue.as_ref().ok_or_else(|| self.detached())?;
        tracing::trace!(
            kernel_id = %self.kernel_id,
            msg_type = %msg.msg_type(),
            "ferrolite.transport.enqueue"
        );
        let msg_id = msg.msg_id().to_string();
        let acquire = self.lock.acquire();
        if acquire.is_immediate() {
            state.holder = Some(msg_id.clone());
        } else {
            state.waiting.push_back(msg_id.clone());
        }
        if queue.send(Queued { msg, acquire }).is_err() {
            state.waiting.retain(|id| *id != msg_id);
            if state.holder.as_deref() == Some(msg_id.as_str()) {
                state.holder = None;
            }
            return Err(self.detached());
        }
        Ok(())
    }

    fn deliver_direct(&self, msg: Message) -> Result<(), TransportError> {
        let backend = self.state().backend.clone().ok_or_else(|| self.detached())?;
        let kernel_id = self.kernel_id.clone();
        tokio::spawn(async move {
            let msg_type = msg.msg_type().to_string();
            if let Err(err) = backend.handle_message(msg).await {
                tracing::warn!(
                    kernel_id = %kernel_id,
                    msg_type = %msg_type,
                    error = %err,
                    "ferrolite.transport.handler_failed"
                );
            }
        });
        Ok(())
    }

    fn resolve_stdin(&self, reply: Message) -> Result<(), Message> {
        let waiter = {
            let mut state = self.state();
            state.stdin.retain(|w| !w.tx.is_closed());
            // A reply naming a prompt nobody waits on is unsolicited.
            match reply.parent_msg_id() {
                Some(id) => state
                    .stdin
                    .iter()
                    .position(|w| w.request_id == id)
                    .and_then(|index| state.stdin.remove(index)),
                None => state.stdin.pop_front(),
            }
        };
        match waiter {
            Some(waiter) => waiter.tx.send(reply),
            None => Err(reply),
        }
    }

    // --- Kernel → clients ---

    pub(crate) fn emit(&self, msg: Message) {
        if msg.is_execute_error() {
            let mut state = self.state();
            let interrupted =
                state.interrupted.is_some() && state.interrupted.as_deref() == msg.parent_msg_id();
            if !interrupted {
                let cancelled = self.lock.cancel(CancelReason::Error);
                state.waiting.clear();
                tracing::debug!(
                    kernel_id = %self.kernel_id,
                    cancelled,
                    "ferrolite.transport.abort_queue"
                );
            }
        }

        match msg.channel {
            Channel::Iopub => self.broadcast(msg),
            _ => {
                if let Err(err) = self.route(msg) {
                    tracing::warn!(
                        kernel_id = %self.kernel_id,
                        error = %err,
                        "ferrolite.transport.drop"
                    );
                }
            }
        }
    }

    fn broadcast(&self, msg: Message) {
        let targets: Vec<_> = self
            .state()
            .clients
            .iter()
            .map(|a| (a.client_id.clone(), a.tx.clone()))
            .collect();
        for (client_id, tx) in targets {
            if tx.send(msg.clone()).is_err() {
                tracing::warn!(
                    kernel_id = %self.kernel_id,
                    client_id = %client_id,
                    msg_type = %msg.msg_type(),
                    "ferrolite.transport.drop"
                );
            }
        }
    }

    fn route(&self, msg: Message) -> Result<(), TransportError> {
        let session = msg.route_session().unwrap_or_default().to_string();
        let tx = self
            .state()
            .clients
            .iter()
            .find(|a| a.client_id == session.as_str())
            .map(|a| a.tx.clone())
            .ok_or_else(|| TransportError::NoClient(session.clone()))?;
        tracing::trace!(
            kernel_id = %self.kernel_id,
            client_id = %session,
            msg_type = %msg.msg_type(),
            "ferrolite.transport.route"
        );
        tx.send(msg)
            .map_err(|_| TransportError::Detached(session))
    }

    /// Route `request` to its client and wait for the matching `input_reply`.
    pub(crate) async fn input(&self, request: Message) -> Result<Message, KernelError> {
        let (tx, rx) = oneshot::channel();
        let request_id = request.msg_id().to_string();
        {
            let mut state = self.state();
            if state.closed {
                return Err(KernelError::Disposed(self.kernel_id.to_string()));
            }
            state.stdin.push_back(StdinWaiter {
                request_id: request_id.clone(),
                tx,
            });
        }
        if let Err(err) = self.route(request) {
            self.state().stdin.retain(|w| w.request_id != request_id);
            return Err(err.into());
        }
        rx.await.map_err(|_| KernelError::StdinClosed)
    }

    // --- Interrupt ---

    /// Cancel every request waiting for the lock.
    ///
    /// The lock holder, started or not, is remembered so its error reply
    /// is not mistaken for a failing cell. The first cancelled request of
    /// this call carries the burst's single error. Returns how many
    /// requests were cancelled.
    pub(crate) fn interrupt(&self) -> usize {
        let mut state = self.state();
        state.interrupted = state.holder.clone();
        let cancelled = self.lock.cancel(CancelReason::Interrupt);
        let drained = std::mem::take(&mut state.waiting);
        if let Some(first) = drained.into_iter().next() {
            state.announce.insert(first);
        }
        cancelled
    }

    // --- Worker ---

    async fn run(
        self: Arc<Self>,
        backend: Arc<dyn KernelBackend>,
        mut rx: mpsc::UnboundedReceiver<Queued>,
    ) {
        while let Some(Queued { msg, acquire }) = rx.recv().await {
            match acquire.granted().await {
                Ok(guard) => {
                    self.handle(&backend, msg).await;
                    // The grant goes to the front waiter as the guard drops.
                    let mut state = self.state();
                    state.holder = state.waiting.pop_front();
                    drop(guard);
                }
                Err(Cancelled {
                    reason: CancelReason::Error,
                }) => {
                    tracing::debug!(
                        kernel_id = %self.kernel_id,
                        msg_type = %msg.msg_type(),
                        "ferrolite.transport.abandoned"
                    );
                }
                Err(Cancelled { .. }) => self.answer_interrupted(&msg),
            }
        }
    }

    async fn handle(&self, backend: &Arc<dyn KernelBackend>, msg: Message) {
        let msg_type = msg.msg_type().to_string();
        self.state().status = KernelStatus::Busy;

        let outcome = match backend.ready().await {
            Ok(()) => backend.handle_message(msg).await,
            Err(err) => Err(err),
        };
        if let Err(err) = outcome {
            tracing::warn!(
                kernel_id = %self.kernel_id,
                msg_type = %msg_type,
                error = %err,
                "ferrolite.transport.handler_failed"
            );
        }

        let mut state = self.state();
        if !state.closed {
            state.status = KernelStatus::Idle;
        }
    }

    /// Stand in for a request whose lock acquisition an interrupt cancelled.
    ///
    /// Only the first such request of a burst broadcasts the error; the
    /// lock's reason then moves to `interrupt-subsequent`.
    fn answer_interrupted(&self, msg: &Message) {
        let first = self.state().announce.remove(msg.msg_id());
        tracing::debug!(
            kernel_id = %self.kernel_id,
            msg_type = %msg.msg_type(),
            first,
            "ferrolite.transport.interrupted"
        );
        if first {
            self.broadcast(synthetic::interrupt_error(&self.config, msg));
        }
        if let Err(err) = self.route(synthetic::interrupt_reply(&self.config, msg)) {
            tracing::warn!(
                kernel_id = %self.kernel_id,
                error = %err,
                "ferrolite.transport.drop"
            );
        }
        self.broadcast(synthetic::idle(&self.config, msg));
        if first {
            self.lock
                .transition_cancel_reason(CancelReason::Interrupt, CancelReason::InterruptSubsequent);
        }
    }
}

/// What a backend holds: a weak handle, so a lingering backend never keeps
/// a torn-down transport alive.
struct TransportChannel {
    kernel_id: KernelId,
    transport: Weak<ClientTransport>,
}

#[async_trait]
impl KernelChannel for TransportChannel {
    fn send(&self, msg: Message) {
        match self.transport.upgrade() {
            Some(transport) => transport.emit(msg),
            None => tracing::debug!(
                kernel_id = %self.kernel_id,
                msg_type = %msg.msg_type(),
                "ferrolite.transport.drop"
            ),
        }
    }

    async fn input(&self, request: Message) -> Result<Message, KernelError> {
        let transport = self
            .transport
            .upgrade()
            .ok_or_else(|| KernelError::Disposed(self.kernel_id.to_string()))?;
        transport.input(request).await
    }
}
