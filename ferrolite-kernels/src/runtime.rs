//! The kernel runtime: live-kernel map and lifecycle operations.

use crate::config::RuntimeConfig;
use crate::connection::ClientConnection;
use crate::transport::ClientTransport;
use ferrolite_protocol::error::KernelError;
use ferrolite_protocol::id::{ClientId, KernelId};
use ferrolite_protocol::kernel::{KernelBackend, KernelContext, KernelInstance};
use ferrolite_protocol::lifecycle::{KernelEvent, KernelModel, KernelObserver};
use ferrolite_protocol::message::Message;
use ferrolite_registry::KernelRegistry;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use tokio_util::sync::CancellationToken;

/// Arguments of [`KernelRuntime::start_new`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartKernel {
    /// Reuse this id. Starting an id that is already live returns the live
    /// kernel's model.
    #[serde(default)]
    pub id: Option<KernelId>,
    /// Kernel spec name.
    pub name: String,
    /// Working location (drive prefix plus directory).
    #[serde(default)]
    pub location: String,
}

impl StartKernel {
    /// Start a kernel of type `name` with a fresh id at the root location.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            location: String::new(),
        }
    }

    /// Use a caller-chosen id.
    pub fn with_id(mut self, id: impl Into<KernelId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the working location.
    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }
}

struct LiveKernel {
    name: String,
    location: String,
    generation: u64,
    backend: Arc<dyn KernelBackend>,
    transport: Arc<ClientTransport>,
    lifetime: CancellationToken,
}

/// Owns every live kernel.
///
/// Each kernel gets its own transport and execution lock. Shell messages
/// for one kernel are handled strictly one at a time in arrival order;
/// distinct kernels are independent.
///
/// Dropping the runtime disconnects every client and cancels every kernel
/// lifetime, but does not await backend disposal. Call
/// [`shutdown_all`](Self::shutdown_all) first for an orderly stop.
pub struct KernelRuntime {
    registry: Arc<KernelRegistry>,
    config: Arc<RuntimeConfig>,
    kernels: Mutex<HashMap<KernelId, LiveKernel>>,
    observers: RwLock<Vec<Arc<dyn KernelObserver>>>,
    generation: AtomicU64,
    this: Weak<KernelRuntime>,
}

impl KernelRuntime {
    /// Create a runtime that builds kernels from `registry`.
    pub fn new(registry: Arc<KernelRegistry>) -> Arc<Self> {
        Self::with_config(registry, RuntimeConfig::default())
    }

    /// Create a runtime with explicit settings.
    pub fn with_config(registry: Arc<KernelRegistry>, config: RuntimeConfig) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            registry,
            config: Arc::new(config),
            kernels: Mutex::new(HashMap::new()),
            observers: RwLock::new(Vec::new()),
            generation: AtomicU64::new(0),
            this: this.clone(),
        })
    }

    fn kernels(&self) -> MutexGuard<'_, HashMap<KernelId, LiveKernel>> {
        self.kernels.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The registry kernels are built from.
    pub fn registry(&self) -> &Arc<KernelRegistry> {
        &self.registry
    }

    /// Settings this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Register an observer of kernel lifecycle events.
    pub fn subscribe(&self, observer: Arc<dyn KernelObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    fn notify(&self, event: KernelEvent) {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for observer in observers {
            observer.on_event(&event);
        }
    }

    /// Start a kernel, or return the live one if `request.id` is running.
    pub async fn start_new(&self, request: StartKernel) -> Result<KernelModel, KernelError> {
        let StartKernel { id, name, location } = request;
        if let Some(model) = id.as_ref().and_then(|id| self.model_of(id)) {
            return Ok(model);
        }
        let factory = self
            .registry
            .factory(&name)
            .ok_or_else(|| KernelError::NoSuchKernelSpec(name.clone()))?;
        let id = id.unwrap_or_else(KernelId::generate);

        let transport = ClientTransport::new(id.clone(), Arc::clone(&self.config));
        let lifetime = CancellationToken::new();
        let ctx = KernelContext::new(
            id.clone(),
            name.clone(),
            location.clone(),
            transport.channel(),
            lifetime.clone(),
        );
        let backend = match factory.create(ctx).await {
            Ok(backend) => backend,
            Err(err) => {
                tracing::error!(kernel_id = %id, kernel = %name, error = %err, "ferrolite.kernel.start_failed");
                transport.close();
                return Err(match err {
                    KernelError::Startup(_) => err,
                    other => KernelError::Startup(other.to_string()),
                });
            }
        };

        // A concurrent start of the same id may have won while the factory ran.
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let winner = {
            let mut kernels = self.kernels();
            match kernels.get(&id) {
                Some(existing) => Some(KernelModel {
                    id: id.clone(),
                    name: existing.name.clone(),
                }),
                None => {
                    transport.bind(Arc::clone(&backend));
                    kernels.insert(
                        id.clone(),
                        LiveKernel {
                            name: name.clone(),
                            location: location.clone(),
                            generation,
                            backend: Arc::clone(&backend),
                            transport: Arc::clone(&transport),
                            lifetime: lifetime.clone(),
                        },
                    );
                    None
                }
            }
        };
        if let Some(model) = winner {
            transport.close();
            backend.dispose().await;
            lifetime.cancel();
            return Ok(model);
        }

        self.watch_disposal(id.clone(), generation, lifetime);
        tracing::info!(kernel_id = %id, kernel = %name, location = %location, "ferrolite.kernel.start");
        let model = KernelModel { id, name };
        self.notify(KernelEvent::Started {
            model: model.clone(),
        });
        Ok(model)
    }

    /// Tear the kernel down when its lifetime ends, unless a newer instance
    /// has taken over the id by then.
    fn watch_disposal(&self, id: KernelId, generation: u64, lifetime: CancellationToken) {
        let runtime = self.this.clone();
        tokio::spawn(async move {
            lifetime.cancelled().await;
            let Some(runtime) = runtime.upgrade() else {
                return;
            };
            if let Some(live) = runtime.teardown(&id, Some(generation)) {
                tracing::info!(kernel_id = %id, "ferrolite.kernel.disposed");
                live.backend.dispose().await;
            }
        });
    }

    /// Remove a kernel from the live map and disconnect its clients.
    fn teardown(&self, id: &KernelId, generation: Option<u64>) -> Option<LiveKernel> {
        let live = {
            let mut kernels = self.kernels();
            let current = kernels.get(id)?.generation;
            if generation.is_some_and(|g| g != current) {
                return None;
            }
            kernels.remove(id)?
        };
        live.transport.close();
        self.notify(KernelEvent::Removed { id: id.clone() });
        Some(live)
    }

    /// Dispose a kernel and start a fresh one under the same id, name and
    /// location.
    pub async fn restart(&self, id: &KernelId) -> Result<KernelModel, KernelError> {
        let (name, location) = {
            let kernels = self.kernels();
            let live = kernels
                .get(id)
                .ok_or_else(|| KernelError::NotFound(id.to_string()))?;
            (live.name.clone(), live.location.clone())
        };
        self.shutdown(id).await?;
        let model = self
            .start_new(StartKernel {
                id: Some(id.clone()),
                name,
                location,
            })
            .await?;
        tracing::info!(kernel_id = %id, "ferrolite.kernel.restart");
        self.notify(KernelEvent::Restarted {
            model: model.clone(),
        });
        Ok(model)
    }

    /// Cancel every queued request of a kernel.
    ///
    /// The message being handled right now keeps running; the backend only
    /// gets a cooperative [`interrupt`](KernelBackend::interrupt) hint.
    pub async fn interrupt(&self, id: &KernelId) -> Result<(), KernelError> {
        let (transport, backend) = {
            let kernels = self.kernels();
            let live = kernels
                .get(id)
                .ok_or_else(|| KernelError::NotFound(id.to_string()))?;
            (Arc::clone(&live.transport), Arc::clone(&live.backend))
        };
        let cancelled = transport.interrupt();
        tracing::info!(kernel_id = %id, cancelled, "ferrolite.kernel.interrupt");
        backend.interrupt().await;
        Ok(())
    }

    /// Dispose a kernel.
    pub async fn shutdown(&self, id: &KernelId) -> Result<(), KernelError> {
        let live = self
            .teardown(id, None)
            .ok_or_else(|| KernelError::NotFound(id.to_string()))?;
        tracing::info!(kernel_id = %id, "ferrolite.kernel.shutdown");
        live.backend.dispose().await;
        live.lifetime.cancel();
        Ok(())
    }

    /// Dispose every kernel, oldest first.
    pub async fn shutdown_all(&self) {
        for model in self.list_running() {
            match self.shutdown(&model.id).await {
                Ok(()) | Err(KernelError::NotFound(_)) => {}
                Err(err) => {
                    tracing::warn!(kernel_id = %model.id, error = %err, "ferrolite.kernel.shutdown_failed")
                }
            }
        }
    }

    /// Every live kernel, oldest first.
    pub fn list_running(&self) -> Vec<KernelModel> {
        let kernels = self.kernels();
        let mut live: Vec<_> = kernels.iter().collect();
        live.sort_by_key(|(_, k)| k.generation);
        live.into_iter()
            .map(|(id, k)| KernelModel {
                id: id.clone(),
                name: k.name.clone(),
            })
            .collect()
    }

    fn model_of(&self, id: &KernelId) -> Option<KernelModel> {
        self.kernels().get(id).map(|k| KernelModel {
            id: id.clone(),
            name: k.name.clone(),
        })
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: &KernelId) -> bool {
        self.kernels().contains_key(id)
    }

    /// Snapshot of a live kernel.
    pub fn get_model(&self, id: &KernelId) -> Result<KernelInstance, KernelError> {
        let kernels = self.kernels();
        let live = kernels
            .get(id)
            .ok_or_else(|| KernelError::NotFound(id.to_string()))?;
        Ok(KernelInstance {
            id: id.clone(),
            name: live.name.clone(),
            location: live.location.clone(),
            status: live.transport.status(),
        })
    }

    fn transport(&self, id: &KernelId) -> Result<Arc<ClientTransport>, KernelError> {
        self.kernels()
            .get(id)
            .map(|k| Arc::clone(&k.transport))
            .ok_or_else(|| KernelError::NotFound(id.to_string()))
    }

    /// Attach a client to a kernel.
    ///
    /// Attaching a client id that is already attached replaces the earlier
    /// attachment, keeping its place in broadcast order.
    pub fn connect(
        &self,
        kernel_id: &KernelId,
        client_id: impl Into<ClientId>,
    ) -> Result<ClientConnection, KernelError> {
        let client_id = client_id.into();
        let transport = self.transport(kernel_id)?;
        let (serial, rx) = transport.attach(client_id.clone())?;
        Ok(ClientConnection::new(
            client_id,
            kernel_id.clone(),
            serial,
            Arc::downgrade(&transport),
            rx,
        ))
    }

    /// Attached clients of a kernel in attachment order.
    pub fn clients(&self, kernel_id: &KernelId) -> Result<Vec<ClientId>, KernelError> {
        Ok(self.transport(kernel_id)?.clients())
    }

    /// Send an `input_request` to the client behind
    /// `parent_header.session` and wait for its `input_reply`.
    ///
    /// The reply bypasses the execution lock, so this resolves even while
    /// the requesting execution still holds it.
    pub async fn handle_stdin(
        &self,
        kernel_id: &KernelId,
        request: Message,
    ) -> Result<Message, KernelError> {
        let transport = self.transport(kernel_id)?;
        transport.input(request).await
    }
}

impl Drop for KernelRuntime {
    fn drop(&mut self) {
        let kernels = std::mem::take(
            self.kernels
                .get_mut()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for live in kernels.into_values() {
            live.transport.close();
            live.lifetime.cancel();
        }
    }
}
