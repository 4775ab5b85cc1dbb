//! One client's attachment to a kernel.

use crate::transport::ClientTransport;
use ferrolite_protocol::error::TransportError;
use ferrolite_protocol::id::{ClientId, KernelId};
use ferrolite_protocol::message::Message;
use std::fmt;
use std::sync::Weak;
use tokio::sync::mpsc;

/// A client attached to a kernel's transport.
///
/// Receives every iopub broadcast plus the shell/stdin messages addressed
/// to its session. Dropping the connection detaches it. When the kernel is
/// disposed (shutdown or restart) [`recv`](Self::recv) returns `None`.
pub struct ClientConnection {
    client_id: ClientId,
    kernel_id: KernelId,
    serial: u64,
    transport: Weak<ClientTransport>,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl ClientConnection {
    pub(crate) fn new(
        client_id: ClientId,
        kernel_id: KernelId,
        serial: u64,
        transport: Weak<ClientTransport>,
        rx: mpsc::UnboundedReceiver<Message>,
    ) -> Self {
        Self {
            client_id,
            kernel_id,
            serial,
            transport,
            rx,
        }
    }

    /// This client's id.
    pub fn client_id(&self) -> &ClientId {
        &self.client_id
    }

    /// The kernel this client is attached to.
    pub fn kernel_id(&self) -> &KernelId {
        &self.kernel_id
    }

    /// Send a message to the kernel.
    ///
    /// An empty `header.session` is filled in with this client's id so
    /// replies find their way back.
    pub fn send(&self, mut msg: Message) -> Result<(), TransportError> {
        if msg.header.session.is_empty() {
            msg.header.session = self.client_id.to_string();
        }
        let transport = self
            .transport
            .upgrade()
            .ok_or_else(|| TransportError::Detached(self.kernel_id.to_string()))?;
        transport.deliver(msg)
    }

    /// Next message from the kernel, or `None` once disconnected.
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Next message if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Detach from the kernel.
    pub fn detach(self) {}
}

impl Drop for ClientConnection {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.upgrade() {
            transport.detach(&self.client_id, self.serial);
        }
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("client_id", &self.client_id)
            .field("kernel_id", &self.kernel_id)
            .finish_non_exhaustive()
    }
}
