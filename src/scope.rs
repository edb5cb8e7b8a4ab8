//! Custom scope support
//!
//! A [`CustomScope`] decides how long instances of a scoped component live.
//! [`ContextScope`] keeps one instance map per explicitly started context
//! (a request, a job, a session) and disposes it when the context ends.

use crate::registry::Disposable;
use crate::value::Instance;
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, warn};

/// Unique scope context identifier.
///
/// Each context gets a unique ID for tracking and debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    /// Generate a new unique context ID.
    #[inline]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    #[inline]
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Default for ScopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "scope-{}", self.0)
    }
}

/// Lifetime policy registered on a container under a scope name.
pub trait CustomScope: Send + Sync {
    /// Return the scoped instance for `name`, creating it with `producer` if absent.
    fn get(&self, name: &str, producer: &mut dyn FnMut() -> Result<Instance>) -> Result<Instance>;

    /// Remove the scoped instance for `name`, dropping its destruction callback.
    fn remove(&self, name: &str) -> Option<Instance>;

    /// Run `callback` when the scoped instance for `name` is destroyed.
    fn register_destruction_callback(&self, name: &str, callback: Box<dyn Disposable>) -> Result<()>;

    /// Identifier of the currently active context, if any
    fn id(&self) -> Option<String> {
        None
    }
}

thread_local! {
    /// Active contexts on this thread, keyed by scope address, innermost last
    static ACTIVE: RefCell<HashMap<usize, Vec<ScopeId>>> = RefCell::new(HashMap::new());
}

#[derive(Default)]
struct ScopeContext {
    instances: HashMap<String, Instance, RandomState>,
    callbacks: Vec<(String, Box<dyn Disposable>)>,
}

/// Scope with explicitly started, thread-bound contexts.
///
/// # Examples
///
/// ```rust
/// use component_container::{ContextScope, CustomScope};
/// use std::sync::Arc;
///
/// let scope = ContextScope::new("request");
/// let id = scope.begin();
/// {
///     let _entered = scope.enter(id);
///     let a = scope.get("id", &mut || Ok(Arc::new(1u32))).unwrap();
///     let b = scope.get("id", &mut || Ok(Arc::new(2u32))).unwrap();
///     assert!(Arc::ptr_eq(&a, &b));
/// }
/// scope.end(id);
/// ```
pub struct ContextScope {
    name: String,
    contexts: DashMap<ScopeId, Arc<Mutex<ScopeContext>>, RandomState>,
}

impl ContextScope {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contexts: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
        }
    }

    /// Scope name used in errors and logs
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn key(&self) -> usize {
        self as *const Self as usize
    }

    /// Start a new context.
    pub fn begin(&self) -> ScopeId {
        let id = ScopeId::new();

        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            scope = %self.name,
            context = %id,
            "Starting scope context"
        );

        self.contexts.insert(id, Arc::new(Mutex::new(ScopeContext::default())));
        id
    }

    /// Bind `id` to the current thread until the guard drops.
    pub fn enter(&self, id: ScopeId) -> EnteredScope<'_> {
        ACTIVE.with(|active| active.borrow_mut().entry(self.key()).or_default().push(id));
        EnteredScope { scope: self }
    }

    /// Context bound to the current thread, if any
    pub fn current(&self) -> Option<ScopeId> {
        ACTIVE.with(|active| active.borrow().get(&self.key()).and_then(|ids| ids.last().copied()))
    }

    /// Number of live contexts
    #[inline]
    pub fn active_contexts(&self) -> usize {
        self.contexts.len()
    }

    /// End a context and run its destruction callbacks in reverse order.
    ///
    /// Callback failures are logged and swallowed.
    pub fn end(&self, id: ScopeId) {
        let Some((_, context)) = self.contexts.remove(&id) else {
            return;
        };
        let callbacks = std::mem::take(&mut context.lock().callbacks);

        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            scope = %self.name,
            context = %id,
            callbacks = callbacks.len(),
            "Ending scope context"
        );

        for (_name, callback) in callbacks.into_iter().rev() {
            if let Err(_err) = callback.dispose() {
                #[cfg(feature = "logging")]
                warn!(
                    target: "component_container",
                    scope = %self.name,
                    name = %_name,
                    error = %_err,
                    "Scoped destruction callback failed"
                );
            }
        }
    }

    fn active_context(&self) -> Result<Arc<Mutex<ScopeContext>>> {
        self.current()
            .and_then(|id| self.contexts.get(&id).map(|c| Arc::clone(&c)))
            .ok_or_else(|| DiError::ScopeNotActive {
                scope: self.name.clone(),
            })
    }
}

impl CustomScope for ContextScope {
    fn get(&self, name: &str, producer: &mut dyn FnMut() -> Result<Instance>) -> Result<Instance> {
        let context = self.active_context()?;
        if let Some(instance) = context.lock().instances.get(name) {
            return Ok(instance.clone());
        }

        // Produce without holding the context lock; creation may re-enter this scope.
        let created = producer()?;
        let mut guard = context.lock();
        Ok(guard
            .instances
            .entry(name.to_string())
            .or_insert(created)
            .clone())
    }

    fn remove(&self, name: &str) -> Option<Instance> {
        let context = self.active_context().ok()?;
        let mut guard = context.lock();
        guard.callbacks.retain(|(n, _)| n != name);
        guard.instances.remove(name)
    }

    fn register_destruction_callback(&self, name: &str, callback: Box<dyn Disposable>) -> Result<()> {
        let context = self.active_context()?;
        context.lock().callbacks.push((name.to_string(), callback));
        Ok(())
    }

    fn id(&self) -> Option<String> {
        self.current().map(|id| id.to_string())
    }
}

impl std::fmt::Debug for ContextScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextScope")
            .field("name", &self.name)
            .field("contexts", &self.contexts.len())
            .finish()
    }
}

/// Keeps a context bound to the current thread.
pub struct EnteredScope<'a> {
    scope: &'a ContextScope,
}

impl Drop for EnteredScope<'_> {
    fn drop(&mut self) {
        let key = self.scope.key();
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(ids) = active.get_mut(&key) {
                ids.pop();
                if ids.is_empty() {
                    active.remove(&key);
                }
            }
        });
    }
}
