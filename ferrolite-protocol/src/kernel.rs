//! The kernel capability: what a compute backend implements.

use crate::error::KernelError;
use crate::id::KernelId;
use crate::lifecycle::KernelModel;
use crate::message::Message;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Immutable descriptor of a kernel type. `name` is the registry key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpec {
    /// Lookup key, e.g. `"python"`.
    pub name: String,
    /// Human-readable name, e.g. `"Python (Pyodide)"`.
    pub display_name: String,
    /// Language of the kernel.
    pub language: String,
    /// Launch arguments. Informational for in-process kernels.
    #[serde(default)]
    pub argv: Vec<String>,
    /// Named resources (logos, ...) as name → URL.
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
}

impl KernelSpec {
    /// Create a spec with empty `argv` and `resources`.
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        language: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            display_name: display_name.into(),
            language: language.into(),
            argv: Vec::new(),
            resources: BTreeMap::new(),
        }
    }

    /// Add a resource.
    pub fn with_resource(mut self, key: impl Into<String>, url: impl Into<String>) -> Self {
        self.resources.insert(key.into(), url.into());
        self
    }
}

/// The kernel-specs listing: the default name plus every registered spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelSpecsModel {
    /// Name of the default kernel spec, empty if nothing is registered.
    pub default: String,
    /// Every registered spec keyed by name.
    pub kernelspecs: BTreeMap<String, KernelSpec>,
}

/// Coarse execution status of a live kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KernelStatus {
    /// The factory is still building the instance.
    Starting,
    /// No queued message is being handled.
    Idle,
    /// A queued message is being handled.
    Busy,
    /// Disposed.
    Dead,
}

/// Snapshot of a live kernel as the runtime sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelInstance {
    /// Unique id.
    pub id: KernelId,
    /// Kernel spec name.
    pub name: String,
    /// Working location (drive prefix plus directory).
    pub location: String,
    /// Current status.
    pub status: KernelStatus,
}

impl KernelInstance {
    /// The `{id, name}` model of this kernel.
    pub fn model(&self) -> KernelModel {
        KernelModel {
            id: self.id.clone(),
            name: self.name.clone(),
        }
    }
}

/// The runtime side of a kernel: where a backend sends what it produces.
///
/// Implemented by the kernel runtime's transport. `send` is synchronous and
/// never blocks: iopub messages are broadcast, shell/stdin/control messages
/// are routed to one client.
#[async_trait]
pub trait KernelChannel: Send + Sync {
    /// Deliver a kernel-originated message to clients.
    fn send(&self, msg: Message);

    /// Route an `input_request` to its client and wait for the `input_reply`.
    async fn input(&self, request: Message) -> Result<Message, KernelError>;
}

/// Everything a factory needs to build one kernel instance.
///
/// Cloning is cheap. The embedded cancellation token is the instance's
/// lifetime: the runtime cancels it on disposal, and a backend that dies on
/// its own cancels it to tell the runtime.
#[derive(Clone)]
pub struct KernelContext {
    id: KernelId,
    name: String,
    location: String,
    channel: Arc<dyn KernelChannel>,
    lifetime: CancellationToken,
}

impl KernelContext {
    /// Assemble a context. Called by the runtime.
    pub fn new(
        id: KernelId,
        name: impl Into<String>,
        location: impl Into<String>,
        channel: Arc<dyn KernelChannel>,
        lifetime: CancellationToken,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            location: location.into(),
            channel,
            lifetime,
        }
    }

    /// Id of the kernel being built.
    pub fn id(&self) -> &KernelId {
        &self.id
    }

    /// Spec name of the kernel being built.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Working location of the kernel.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Send a message to clients.
    pub fn send(&self, msg: Message) {
        self.channel.send(msg);
    }

    /// Ask the client behind `request.parent_header.session` for input.
    pub async fn input(&self, request: Message) -> Result<Message, KernelError> {
        self.channel.input(request).await
    }

    /// Signal that this instance is gone. The runtime tears down its transport.
    pub fn dispose(&self) {
        self.lifetime.cancel();
    }

    /// Whether the instance has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.lifetime.is_cancelled()
    }

    /// A handle on the instance lifetime, cancelled at disposal.
    pub fn lifetime(&self) -> CancellationToken {
        self.lifetime.clone()
    }
}

impl fmt::Debug for KernelContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KernelContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("location", &self.location)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

/// A compute backend. One implementation per kernel type.
///
/// The runtime calls `handle_message` for at most one shell message at a
/// time per instance; control messages and unsolicited `input_reply`
/// messages may arrive concurrently with it.
#[async_trait]
pub trait KernelBackend: Send + Sync {
    /// Resolve once the backend can accept messages.
    async fn ready(&self) -> Result<(), KernelError> {
        Ok(())
    }

    /// Handle one client message. Replies go out through [`KernelContext::send`].
    async fn handle_message(&self, msg: Message) -> Result<(), KernelError>;

    /// Cooperative interrupt hint. The runtime does not wait on the
    /// in-flight `handle_message` call either way.
    async fn interrupt(&self) {}

    /// Release resources. Called once by the runtime.
    async fn dispose(&self) {}
}

/// Builds backend instances of one kernel type.
#[async_trait]
pub trait KernelFactory: Send + Sync {
    /// Create an instance bound to `ctx`.
    async fn create(&self, ctx: KernelContext) -> Result<Arc<dyn KernelBackend>, KernelError>;
}
