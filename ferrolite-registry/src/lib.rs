#![deny(missing_docs)]
//! Kernel spec registry for ferrolite.
//!
//! The [`KernelRegistry`] maps a kernel type name to its [`KernelSpec`] and
//! the [`KernelFactory`] that builds instances of it. It is pure lookup:
//! no lifecycle, no live instances. Registering a name twice replaces the
//! entry in place and never fails.

use ferrolite_protocol::error::KernelError;
use ferrolite_protocol::kernel::{KernelFactory, KernelSpec, KernelSpecsModel};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

struct Entry {
    spec: KernelSpec,
    factory: Arc<dyn KernelFactory>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Names in first-registration order.
    order: Vec<String>,
    default: Option<String>,
}

/// Registry of kernel types keyed by spec name.
///
/// Shared behind an `Arc` by the kernel runtime and the session store;
/// registration takes `&self` so kernel types can be added at any time.
#[derive(Default)]
pub struct KernelRegistry {
    inner: RwLock<Inner>,
}

impl KernelRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a kernel type, replacing any entry with the same name.
    ///
    /// A replaced entry keeps its position in [`specs`](Self::specs).
    pub fn register(&self, spec: KernelSpec, factory: Arc<dyn KernelFactory>) {
        let name = spec.name.clone();
        let mut inner = self.write();
        let replaced = inner
            .entries
            .insert(name.clone(), Entry { spec, factory })
            .is_some();
        if !replaced {
            inner.order.push(name.clone());
        }
        tracing::debug!(kernel = %name, replaced, "ferrolite.registry.register");
    }

    /// The factory registered under `name`.
    pub fn factory(&self, name: &str) -> Option<Arc<dyn KernelFactory>> {
        self.read()
            .entries
            .get(name)
            .map(|entry| Arc::clone(&entry.factory))
    }

    /// The spec registered under `name`.
    pub fn spec(&self, name: &str) -> Option<KernelSpec> {
        self.read().entries.get(name).map(|entry| entry.spec.clone())
    }

    /// Every registered spec in registration order.
    pub fn specs(&self) -> Vec<KernelSpec> {
        let inner = self.read();
        inner
            .order
            .iter()
            .filter_map(|name| inner.entries.get(name))
            .map(|entry| entry.spec.clone())
            .collect()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.read().entries.contains_key(name)
    }

    /// Number of registered kernel types.
    pub fn len(&self) -> usize {
        self.read().entries.len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.read().entries.is_empty()
    }

    /// Make `name` the default kernel type.
    pub fn set_default(&self, name: &str) -> Result<(), KernelError> {
        let mut inner = self.write();
        if !inner.entries.contains_key(name) {
            return Err(KernelError::NoSuchKernelSpec(name.to_string()));
        }
        inner.default = Some(name.to_string());
        Ok(())
    }

    /// The default kernel type: the explicit default if set, otherwise
    /// the first one registered.
    pub fn default_name(&self) -> Option<String> {
        let inner = self.read();
        inner
            .default
            .clone()
            .or_else(|| inner.order.first().cloned())
    }

    /// The kernel-specs listing model.
    pub fn specs_model(&self) -> KernelSpecsModel {
        KernelSpecsModel {
            default: self.default_name().unwrap_or_default(),
            kernelspecs: self
                .specs()
                .into_iter()
                .map(|spec| (spec.name.clone(), spec))
                .collect(),
        }
    }
}
