//! The session store.

use crate::config::SessionConfig;
use crate::session::{KernelRef, PatchSession, Session, StartSession, location_for};
use ferrolite_kernels::{KernelRuntime, StartKernel};
use ferrolite_protocol::error::{KernelError, SessionError};
use ferrolite_protocol::id::{KernelId, SessionId};
use ferrolite_protocol::lifecycle::{KernelEvent, KernelModel, KernelObserver};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Document sessions bound to kernels of a [`KernelRuntime`].
///
/// The store watches the runtime's lifecycle events. When a bound kernel
/// is removed its sessions are kept for [`SessionConfig::restart_grace`];
/// if the same id comes back in that window (a restart) nothing happens,
/// otherwise the sessions are reaped.
pub struct SessionStore {
    runtime: Arc<KernelRuntime>,
    config: SessionConfig,
    sessions: Mutex<Vec<Session>>,
    /// Kernel ids awaiting reaping, with the generation of their timer.
    pending_restart: Mutex<HashMap<KernelId, u64>>,
    generation: AtomicU64,
    this: Weak<SessionStore>,
}

/// Forwards runtime events without keeping the store alive.
struct RestartWatch(Weak<SessionStore>);

impl KernelObserver for RestartWatch {
    fn on_event(&self, event: &KernelEvent) {
        if let Some(store) = self.0.upgrade() {
            store.on_kernel_event(event);
        }
    }
}

impl SessionStore {
    /// Create a store over `runtime` with default settings.
    pub fn new(runtime: Arc<KernelRuntime>) -> Arc<Self> {
        Self::with_config(runtime, SessionConfig::default())
    }

    /// Create a store with explicit settings.
    pub fn with_config(runtime: Arc<KernelRuntime>, config: SessionConfig) -> Arc<Self> {
        let store = Arc::new_cyclic(|this| Self {
            runtime: Arc::clone(&runtime),
            config,
            sessions: Mutex::new(Vec::new()),
            pending_restart: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            this: this.clone(),
        });
        runtime.subscribe(Arc::new(RestartWatch(Arc::downgrade(&store))));
        store
    }

    fn sessions(&self) -> MutexGuard<'_, Vec<Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn pending(&self) -> MutexGuard<'_, HashMap<KernelId, u64>> {
        self.pending_restart
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// The runtime kernels are started on.
    pub fn runtime(&self) -> &Arc<KernelRuntime> {
        &self.runtime
    }

    /// Settings this store was built with.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Look a session up by id.
    pub fn get(&self, id: &SessionId) -> Result<Session, SessionError> {
        self.sessions()
            .iter()
            .find(|s| s.id == *id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound(id.to_string()))
    }

    /// Every session in creation order.
    pub fn list(&self) -> Vec<Session> {
        self.sessions().clone()
    }

    /// The session for a document path, if any.
    pub fn find_by_path(&self, path: &str) -> Option<Session> {
        self.sessions().iter().find(|s| s.path == path).cloned()
    }

    /// Whether sessions bound to `kernel_id` are waiting out the grace window.
    pub fn is_pending_restart(&self, kernel_id: &KernelId) -> bool {
        self.pending().contains_key(kernel_id)
    }

    /// Start a session, or return the existing one with the same name.
    ///
    /// The kernel runs at the document's [`location_for`]. A `kernel.id`
    /// that is live is shared rather than started again.
    pub async fn start_new(&self, request: StartSession) -> Result<Session, SessionError> {
        let StartSession {
            path,
            name,
            type_,
            kernel,
        } = request;
        let name = if name.is_empty() { path.clone() } else { name };
        if let Some(existing) = self.find_by_name(&name) {
            return Ok(existing);
        }

        let KernelRef {
            id: kernel_id,
            name: kernel_name,
        } = kernel.unwrap_or_default();
        let kernel_name = kernel_name
            .or_else(|| self.runtime.registry().default_name())
            .ok_or_else(|| KernelError::NoSuchKernelSpec(String::new()))?;
        let shared = kernel_id.as_ref().is_some_and(|id| self.runtime.contains(id));
        let model = self
            .runtime
            .start_new(StartKernel {
                id: kernel_id,
                name: kernel_name,
                location: location_for(&path),
            })
            .await?;

        let session = Session {
            id: SessionId::generate(),
            path,
            name,
            type_: type_.unwrap_or_else(|| self.config.default_type.clone()),
            kernel: Some(model.clone()),
        };
        // Another start with the same name may have finished first.
        let winner = {
            let mut sessions = self.sessions();
            match sessions.iter().find(|s| s.name == session.name) {
                Some(existing) => Some(existing.clone()),
                None => {
                    sessions.push(session.clone());
                    None
                }
            }
        };
        if let Some(existing) = winner {
            if !shared {
                self.release_kernel(&model.id).await;
            }
            return Ok(existing);
        }

        tracing::info!(
            session_id = %session.id,
            kernel_id = %model.id,
            path = %session.path,
            "ferrolite.session.start"
        );
        Ok(session)
    }

    fn find_by_name(&self, name: &str) -> Option<Session> {
        self.sessions().iter().find(|s| s.name == name).cloned()
    }

    /// Change a session's path, name, type or kernel.
    ///
    /// `kernel.id` rebinds to a kernel another session already uses, or to
    /// any live kernel; `kernel.name` starts a new kernel at the session's
    /// location. A kernel left with no session is shut down.
    pub async fn patch(&self, request: PatchSession) -> Result<Session, SessionError> {
        let current = self.get(&request.id)?;
        let (new_kernel, started) = match request.kernel {
            None => (None, None),
            Some(KernelRef { id: Some(id), .. }) => (Some(self.resolve_kernel(&id)?), None),
            Some(KernelRef {
                id: None,
                name: Some(name),
            }) => {
                let path = request.path.as_deref().unwrap_or(&current.path);
                let model = self
                    .runtime
                    .start_new(StartKernel {
                        id: Some(KernelId::generate()),
                        name,
                        location: location_for(path),
                    })
                    .await?;
                let started = model.id.clone();
                (Some(model), Some(started))
            }
            Some(KernelRef {
                id: None,
                name: None,
            }) => {
                return Err(SessionError::InvalidPatch(
                    "kernel needs an id or a name".to_string(),
                ));
            }
        };

        let applied = {
            let mut sessions = self.sessions();
            match sessions.iter_mut().find(|s| s.id == request.id) {
                Some(session) => {
                    if let Some(path) = request.path {
                        session.path = path;
                    }
                    if let Some(name) = request.name {
                        session.name = name;
                    }
                    if let Some(type_) = request.type_ {
                        session.type_ = type_;
                    }
                    let replaced = match new_kernel {
                        Some(model) if session.kernel.as_ref() != Some(&model) => {
                            session.kernel.replace(model)
                        }
                        _ => None,
                    };
                    let updated = session.clone();
                    let orphaned = replaced.as_ref().and_then(|old| {
                        let still_used = sessions
                            .iter()
                            .any(|s| s.kernel.as_ref().is_some_and(|k| k.id == old.id));
                        (!still_used).then(|| old.id.clone())
                    });
                    Some((updated, replaced, orphaned))
                }
                None => None,
            }
        };

        let Some((updated, replaced, orphaned)) = applied else {
            // The session went away while the new kernel was starting.
            if let Some(started) = started {
                self.release_kernel(&started).await;
            }
            return Err(SessionError::NotFound(request.id.to_string()));
        };

        // An explicit rebind wins over a pending reap of the old kernel.
        if let Some(old) = &replaced {
            self.pending().remove(&old.id);
            tracing::debug!(
                session_id = %updated.id,
                from = %old.id,
                "ferrolite.session.rebind"
            );
        }
        if let Some(old) = orphaned {
            self.release_kernel(&old).await;
        }
        Ok(updated)
    }

    fn resolve_kernel(&self, id: &KernelId) -> Result<KernelModel, KernelError> {
        let shared = self
            .sessions()
            .iter()
            .filter_map(|s| s.kernel.as_ref())
            .find(|k| k.id == *id)
            .cloned();
        match shared {
            Some(model) => Ok(model),
            None => self.runtime.get_model(id).map(|instance| instance.model()),
        }
    }

    /// Shut down a session's kernel and forget the session.
    pub async fn shutdown(&self, id: &SessionId) -> Result<(), SessionError> {
        let session = {
            let mut sessions = self.sessions();
            let index = sessions
                .iter()
                .position(|s| s.id == *id)
                .ok_or_else(|| SessionError::NotFound(id.to_string()))?;
            sessions.remove(index)
        };
        if let Some(kernel) = &session.kernel {
            match self.runtime.shutdown(&kernel.id).await {
                Ok(()) | Err(KernelError::NotFound(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        tracing::info!(session_id = %id, "ferrolite.session.shutdown");
        Ok(())
    }

    /// Shut down every session.
    pub async fn shutdown_all(&self) {
        let ids: Vec<_> = self.sessions().iter().map(|s| s.id.clone()).collect();
        for id in ids {
            if let Err(err) = self.shutdown(&id).await {
                tracing::warn!(session_id = %id, error = %err, "ferrolite.session.shutdown_failed");
            }
        }
    }

    async fn release_kernel(&self, id: &KernelId) {
        match self.runtime.shutdown(id).await {
            Ok(()) | Err(KernelError::NotFound(_)) => {}
            Err(err) => tracing::warn!(kernel_id = %id, error = %err, "ferrolite.session.release_failed"),
        }
    }

    // --- Restart-aware cleanup ---

    fn on_kernel_event(&self, event: &KernelEvent) {
        match event {
            KernelEvent::Removed { id } => self.schedule_reap(id),
            KernelEvent::Started { model } => {
                if self.pending().remove(&model.id).is_some() {
                    tracing::debug!(kernel_id = %model.id, "ferrolite.session.restart_survived");
                }
            }
            _ => {}
        }
    }

    fn schedule_reap(&self, kernel_id: &KernelId) {
        let bound = self
            .sessions()
            .iter()
            .any(|s| s.kernel.as_ref().is_some_and(|k| k.id == *kernel_id));
        if !bound {
            return;
        }
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending().insert(kernel_id.clone(), generation);

        let store = self.this.clone();
        let kernel_id = kernel_id.clone();
        let grace = self.config.restart_grace.to_std();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if let Some(store) = store.upgrade() {
                store.reap(&kernel_id, generation);
            }
        });
    }

    fn reap(&self, kernel_id: &KernelId, generation: u64) {
        {
            let mut pending = self.pending();
            if pending.get(kernel_id) != Some(&generation) {
                return;
            }
            pending.remove(kernel_id);
        }
        if self.runtime.contains(kernel_id) {
            return;
        }
        let reaped: Vec<SessionId> = {
            let mut sessions = self.sessions();
            let mut reaped = Vec::new();
            sessions.retain(|s| {
                let bound = s.kernel.as_ref().is_some_and(|k| k.id == *kernel_id);
                if bound {
                    reaped.push(s.id.clone());
                }
                !bound
            });
            reaped
        };
        for session_id in reaped {
            tracing::info!(session_id = %session_id, kernel_id = %kernel_id, "ferrolite.session.reaped");
        }
    }
}
