//! Shared-instance registry
//!
//! Three tiers keyed by name:
//!
//! - `finished`: fully initialized instances
//! - `early`: early references already handed out during a circular lookup
//! - producers: closures that materialize an early reference on demand
//!
//! Creation is serialized on a single reentrant lock, so a thread that is
//! creating one instance may recursively create others while every other
//! thread waits. Reads of the finished tier never take the lock.

use crate::value::Instance;
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::thread::{self, ThreadId};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

/// Produces an early reference to an instance that is still being created.
pub type Producer = Box<dyn FnOnce() -> Result<Instance> + Send>;

/// Releases resources held by an instance when it is destroyed.
pub trait Disposable: Send + Sync {
    fn dispose(&self) -> Result<()>;
}

impl<F> Disposable for F
where
    F: Fn() -> Result<()> + Send + Sync,
{
    fn dispose(&self) -> Result<()> {
        self()
    }
}

// =============================================================================
// Thread-local creation tracking
// =============================================================================

thread_local! {
    /// Names currently being created on this thread, outermost first
    static CREATION_STACK: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };

    /// Per-request names in creation on this thread, keyed by registry address
    static PROTOTYPES_IN_CREATION: RefCell<HashSet<(usize, String)>> = RefCell::new(HashSet::new());
}

/// Marks a name as being created on this thread for the guard's lifetime.
pub(crate) struct CreationFrame;

impl CreationFrame {
    pub(crate) fn push(name: &str) -> Self {
        CREATION_STACK.with(|stack| stack.borrow_mut().push(name.to_string()));
        Self
    }
}

impl Drop for CreationFrame {
    fn drop(&mut self) {
        CREATION_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Full chain of creations leading back to `name`, e.g. `a -> b -> a`.
pub(crate) fn creation_chain(name: &str) -> Vec<String> {
    CREATION_STACK.with(|stack| {
        let stack = stack.borrow();
        let start = stack.iter().position(|n| n == name).unwrap_or(stack.len());
        let mut chain: Vec<String> = if start == stack.len() {
            stack.clone()
        } else {
            stack[start..].to_vec()
        };
        chain.push(name.to_string());
        chain
    })
}

/// Per-request creation guard; a second entry for the same name on the
/// same thread is always a cycle.
pub(crate) struct PrototypeGuard {
    key: (usize, String),
}

impl PrototypeGuard {
    pub(crate) fn enter(registry: &SingletonRegistry, name: &str) -> Result<Self> {
        let key = (registry as *const SingletonRegistry as usize, name.to_string());
        let fresh = PROTOTYPES_IN_CREATION.with(|set| set.borrow_mut().insert(key.clone()));
        if !fresh {
            return Err(DiError::ReentrantCreation {
                name: name.to_string(),
                chain: creation_chain(name),
            });
        }
        Ok(Self { key })
    }

    /// Whether `name` is a per-request instance in creation on this thread
    pub(crate) fn is_active(registry: &SingletonRegistry, name: &str) -> bool {
        let key = (registry as *const SingletonRegistry as usize, name.to_string());
        PROTOTYPES_IN_CREATION.with(|set| set.borrow().contains(&key))
    }
}

impl Drop for PrototypeGuard {
    fn drop(&mut self) {
        PROTOTYPES_IN_CREATION.with(|set| {
            set.borrow_mut().remove(&self.key);
        });
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
struct RegistryState {
    /// Early-reference producers for instances not yet finished
    producers: HashMap<String, Producer, RandomState>,
    /// Finished names in registration order
    registered: Vec<String>,
    /// Disposal adapters in registration order
    disposables: Vec<(String, Box<dyn Disposable>)>,
    /// name -> names that depend on it
    dependents: HashMap<String, Vec<String>, RandomState>,
    /// name -> names it depends on
    dependencies: HashMap<String, Vec<String>, RandomState>,
    /// containing name -> inner names
    contained: HashMap<String, Vec<String>, RandomState>,
    destroying: bool,
}

/// Removes the creation guard when creation ends, successfully or not.
struct GuardReset<'a> {
    creating: &'a DashMap<String, ThreadId, RandomState>,
    name: &'a str,
}

impl Drop for GuardReset<'_> {
    fn drop(&mut self) {
        self.creating.remove(self.name);
    }
}

/// Tiered cache of shared instances plus the dependency graph used for
/// ordered disposal.
pub struct SingletonRegistry {
    finished: DashMap<String, Instance, RandomState>,
    early: DashMap<String, Instance, RandomState>,
    creating: DashMap<String, ThreadId, RandomState>,
    state: ReentrantMutex<RefCell<RegistryState>>,
}

impl SingletonRegistry {
    pub fn new() -> Self {
        Self {
            finished: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            early: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            creating: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            state: ReentrantMutex::new(RefCell::new(RegistryState::default())),
        }
    }

    /// Finished instance, or an early reference if this thread is creating it.
    ///
    /// With `allow_early`, a pending producer is run (at most once) and its
    /// result cached as the early reference.
    pub fn lookup_early_or_finished(&self, name: &str, allow_early: bool) -> Result<Option<Instance>> {
        if let Some(instance) = self.finished.get(name) {
            #[cfg(feature = "logging")]
            trace!(target: "component_container", name = name, tier = "finished", "Shared instance cache hit");
            return Ok(Some(instance.clone()));
        }
        if !self.is_created_by_current_thread(name) {
            return Ok(None);
        }
        if let Some(instance) = self.early.get(name) {
            #[cfg(feature = "logging")]
            trace!(target: "component_container", name = name, tier = "early", "Shared instance cache hit");
            return Ok(Some(instance.clone()));
        }
        if !allow_early {
            return Ok(None);
        }

        let lock = self.state.lock();
        if let Some(instance) = self.finished.get(name) {
            return Ok(Some(instance.clone()));
        }
        if let Some(instance) = self.early.get(name) {
            return Ok(Some(instance.clone()));
        }
        let producer = lock.borrow_mut().producers.remove(name);
        let Some(producer) = producer else {
            return Ok(None);
        };

        #[cfg(feature = "logging")]
        debug!(target: "component_container", name = name, "Materializing early reference");

        let instance = producer()?;
        self.early.insert(name.to_string(), instance.clone());
        Ok(Some(instance))
    }

    /// Return the finished instance for `name`, creating it with `factory` if needed.
    ///
    /// Fails with `ReentrantCreation` if `name` is already being created. On
    /// failure every partial registration for `name` is rolled back.
    pub fn get_or_create<F>(&self, name: &str, factory: F) -> Result<Instance>
    where
        F: FnOnce() -> Result<Instance>,
    {
        let lock = self.state.lock();
        if let Some(instance) = self.finished.get(name) {
            return Ok(instance.clone());
        }
        if lock.borrow().destroying {
            return Err(DiError::Internal(format!(
                "cannot create '{name}' while shared instances are being destroyed"
            )));
        }
        if self.creating.contains_key(name) {
            return Err(DiError::ReentrantCreation {
                name: name.to_string(),
                chain: creation_chain(name),
            });
        }

        self.creating.insert(name.to_string(), thread::current().id());
        let _reset = GuardReset {
            creating: &self.creating,
            name,
        };

        match factory() {
            Ok(instance) => {
                self.finished.insert(name.to_string(), instance.clone());
                self.early.remove(name);
                let mut state = lock.borrow_mut();
                state.producers.remove(name);
                if !state.registered.iter().any(|n| n == name) {
                    state.registered.push(name.to_string());
                }
                Ok(instance)
            }
            Err(err) => {
                #[cfg(feature = "logging")]
                debug!(
                    target: "component_container",
                    name = name,
                    error = %err,
                    "Shared instance creation failed; rolling back"
                );
                self.destroy_singleton(name);
                Err(err)
            }
        }
    }

    /// Register an early-reference producer for an instance under creation.
    pub fn add_producer(&self, name: &str, producer: Producer) {
        let lock = self.state.lock();
        if self.finished.contains_key(name) {
            return;
        }
        lock.borrow_mut().producers.insert(name.to_string(), producer);
        self.early.remove(name);
    }

    /// Register an externally created instance.
    pub fn register_singleton(&self, name: &str, instance: Instance) -> Result<()> {
        let lock = self.state.lock();
        if self.finished.contains_key(name) {
            return Err(DiError::invalid_definition(
                name,
                "a shared instance is already registered under this name",
            ));
        }

        #[cfg(feature = "logging")]
        debug!(target: "component_container", name = name, "Registering shared instance");

        self.finished.insert(name.to_string(), instance);
        self.early.remove(name);
        let mut state = lock.borrow_mut();
        state.producers.remove(name);
        state.registered.push(name.to_string());
        Ok(())
    }

    #[inline]
    pub fn contains_singleton(&self, name: &str) -> bool {
        self.finished.contains_key(name)
    }

    /// Finished instance without any early lookup
    #[inline]
    pub fn get_finished(&self, name: &str) -> Option<Instance> {
        self.finished.get(name).map(|i| i.clone())
    }

    /// Whether an early reference was materialized for `name`
    #[inline]
    pub fn early_reference(&self, name: &str) -> Option<Instance> {
        self.early.get(name).map(|i| i.clone())
    }

    /// Registered names in registration order
    pub fn singleton_names(&self) -> Vec<String> {
        let lock = self.state.lock();
        let names = lock.borrow().registered.clone();
        names
    }

    #[inline]
    pub fn singleton_count(&self) -> usize {
        self.finished.len()
    }

    /// Whether any thread is creating `name`
    #[inline]
    pub fn is_in_creation(&self, name: &str) -> bool {
        self.creating.contains_key(name)
    }

    /// Whether the current thread is creating `name`
    pub fn is_created_by_current_thread(&self, name: &str) -> bool {
        self.creating
            .get(name)
            .is_some_and(|owner| *owner == thread::current().id())
    }

    /// Whether a producer is waiting for `name`
    pub fn has_producer(&self, name: &str) -> bool {
        let lock = self.state.lock();
        let present = lock.borrow().producers.contains_key(name);
        present
    }

    // -------------------------------------------------------------------------
    // Dependency bookkeeping
    // -------------------------------------------------------------------------

    /// Record that `dependent` depends on `depended_on`.
    pub fn register_dependency(&self, depended_on: &str, dependent: &str) {
        let lock = self.state.lock();
        let mut state = lock.borrow_mut();
        push_unique(state.dependents.entry(depended_on.to_string()).or_default(), dependent);
        push_unique(state.dependencies.entry(dependent.to_string()).or_default(), depended_on);
    }

    /// Whether `dependent` depends on `name`, directly or transitively.
    pub fn is_dependent(&self, name: &str, dependent: &str) -> bool {
        self.dependency_path(name, dependent).is_some()
    }

    /// Path `name <- ... <- dependent` through the dependents graph, if any.
    pub fn dependency_path(&self, name: &str, dependent: &str) -> Option<Vec<String>> {
        let lock = self.state.lock();
        let state = lock.borrow();
        let mut seen = HashSet::new();
        let mut path = vec![name.to_string()];
        if find_path(&state.dependents, name, dependent, &mut seen, &mut path) {
            Some(path)
        } else {
            None
        }
    }

    /// Names that depend on `name`
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        let lock = self.state.lock();
        let dependents = lock.borrow().dependents.get(name).cloned().unwrap_or_default();
        dependents
    }

    /// Names `name` depends on
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        let lock = self.state.lock();
        let dependencies = lock.borrow().dependencies.get(name).cloned().unwrap_or_default();
        dependencies
    }

    /// Record that `contained` is an inner instance of `containing`.
    pub fn register_contained(&self, contained: &str, containing: &str) {
        {
            let lock = self.state.lock();
            let mut state = lock.borrow_mut();
            push_unique(state.contained.entry(containing.to_string()).or_default(), contained);
        }
        self.register_dependency(contained, containing);
    }

    // -------------------------------------------------------------------------
    // Disposal
    // -------------------------------------------------------------------------

    /// Register the adapter that disposes `name`'s instance.
    pub fn register_disposable(&self, name: &str, adapter: Box<dyn Disposable>) {
        let lock = self.state.lock();
        let mut state = lock.borrow_mut();
        state.disposables.retain(|(n, _)| n != name);
        state.disposables.push((name.to_string(), adapter));
    }

    #[inline]
    pub fn has_disposable(&self, name: &str) -> bool {
        let lock = self.state.lock();
        let present = lock.borrow().disposables.iter().any(|(n, _)| n == name);
        present
    }

    /// Destroy `name`: its dependents first, then the instance, then its inner instances.
    ///
    /// Disposal failures are logged and swallowed.
    pub fn destroy_singleton(&self, name: &str) {
        let lock = self.state.lock();

        self.finished.remove(name);
        self.early.remove(name);
        let (adapter, dependents) = {
            let mut state = lock.borrow_mut();
            state.producers.remove(name);
            state.registered.retain(|n| n != name);
            let adapter = state
                .disposables
                .iter()
                .position(|(n, _)| n == name)
                .map(|pos| state.disposables.remove(pos).1);
            let dependents = state.dependents.remove(name).unwrap_or_default();
            (adapter, dependents)
        };

        for dependent in dependents {
            self.destroy_singleton(&dependent);
        }

        if let Some(adapter) = adapter {
            #[cfg(feature = "logging")]
            debug!(target: "component_container", name = name, "Disposing shared instance");

            if let Err(_err) = adapter.dispose() {
                #[cfg(feature = "logging")]
                warn!(
                    target: "component_container",
                    name = name,
                    error = %_err,
                    "Disposal callback failed"
                );
            }
        }

        let contained = lock.borrow_mut().contained.remove(name).unwrap_or_default();
        for inner in contained {
            self.destroy_singleton(&inner);
        }

        let mut state = lock.borrow_mut();
        for list in state.dependents.values_mut() {
            list.retain(|n| n != name);
        }
        state.dependents.retain(|_, list| !list.is_empty());
        state.dependencies.remove(name);
    }

    /// Destroy every disposable instance in reverse registration order, then clear all tiers.
    pub fn destroy_singletons(&self) {
        let lock = self.state.lock();
        let names: Vec<String> = {
            let mut state = lock.borrow_mut();
            state.destroying = true;
            state.disposables.iter().rev().map(|(n, _)| n.clone()).collect()
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            disposables = names.len(),
            "Destroying shared instances"
        );

        for name in names {
            self.destroy_singleton(&name);
        }

        self.finished.clear();
        self.early.clear();
        let mut state = lock.borrow_mut();
        state.producers.clear();
        state.registered.clear();
        state.dependents.clear();
        state.dependencies.clear();
        state.contained.clear();
        state.destroying = false;
    }
}

impl Default for SingletonRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SingletonRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingletonRegistry")
            .field("finished", &self.finished.len())
            .field("early", &self.early.len())
            .field("in_creation", &self.creating.len())
            .finish()
    }
}

fn push_unique(list: &mut Vec<String>, name: &str) {
    if !list.iter().any(|n| n == name) {
        list.push(name.to_string());
    }
}

fn find_path(
    dependents: &HashMap<String, Vec<String>, RandomState>,
    from: &str,
    target: &str,
    seen: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> bool {
    if !seen.insert(from.to_string()) {
        return false;
    }
    let Some(direct) = dependents.get(from) else {
        return false;
    };
    for next in direct {
        path.push(next.clone());
        if next == target || find_path(dependents, next, target, seen, path) {
            return true;
        }
        path.pop();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    fn instance(value: i32) -> Instance {
        Arc::new(value)
    }

    #[test]
    fn test_get_or_create_runs_factory_once() {
        let registry = SingletonRegistry::new();
        let calls = AtomicUsize::new(0);

        let a = registry
            .get_or_create("a", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(instance(1))
            })
            .unwrap();
        let b = registry
            .get_or_create("a", || {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(instance(2))
            })
            .unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.singleton_names(), vec!["a"]);
    }

    #[test]
    fn test_reentrant_creation_rejected() {
        let registry = SingletonRegistry::new();
        let _outer = CreationFrame::push("a");
        let err = registry
            .get_or_create("a", || {
                let _inner = CreationFrame::push("b");
                registry.get_or_create("a", || Ok(instance(0)))
            })
            .unwrap_err();

        match err {
            DiError::ReentrantCreation { chain, .. } => assert_eq!(chain, vec!["a", "b", "a"]),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!registry.contains_singleton("a"));
        assert!(!registry.is_in_creation("a"));
    }

    #[test]
    fn test_producer_runs_once_for_creating_thread() {
        let registry = SingletonRegistry::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let result = registry.get_or_create("a", || {
            let counter = Arc::clone(&calls);
            registry.add_producer(
                "a",
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(instance(7))
                }),
            );
            let first = registry.lookup_early_or_finished("a", true)?.unwrap();
            let second = registry.lookup_early_or_finished("a", true)?.unwrap();
            assert!(Arc::ptr_eq(&first, &second));
            Ok(first)
        });

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(registry.early_reference("a").is_none());
        assert!(!registry.has_producer("a"));
    }

    #[test]
    fn test_early_reference_not_visible_without_allow() {
        let registry = SingletonRegistry::new();
        registry
            .get_or_create("a", || {
                registry.add_producer("a", Box::new(|| Ok(instance(1))));
                assert!(registry.lookup_early_or_finished("a", false)?.is_none());
                Ok(instance(1))
            })
            .unwrap();
    }

    #[test]
    fn test_failure_rolls_back() {
        let registry = SingletonRegistry::new();
        let disposed = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&disposed);
        let result = registry.get_or_create("a", || {
            registry.add_producer("a", Box::new(|| Ok(instance(1))));
            registry.register_disposable(
                "a",
                Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            );
            Err(DiError::Internal("boom".into()))
        });

        assert!(result.is_err());
        assert!(!registry.has_producer("a"));
        assert!(!registry.has_disposable("a"));
        assert!(!registry.contains_singleton("a"));
        assert_eq!(disposed.load(Ordering::SeqCst), 1);

        // Retry succeeds
        assert!(registry.get_or_create("a", || Ok(instance(2))).is_ok());
    }

    #[test]
    fn test_transitive_dependency_path() {
        let registry = SingletonRegistry::new();
        registry.register_dependency("a", "b");
        registry.register_dependency("b", "c");

        assert!(registry.is_dependent("a", "c"));
        assert!(!registry.is_dependent("c", "a"));
        assert_eq!(
            registry.dependency_path("a", "c").unwrap(),
            vec!["a", "b", "c"]
        );
    }

    #[test]
    fn test_destroy_order_dependents_first() {
        let registry = SingletonRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["db", "repo", "service"] {
            registry.register_singleton(name, instance(0)).unwrap();
            let order = Arc::clone(&order);
            let label = name.to_string();
            registry.register_disposable(
                name,
                Box::new(move || {
                    order.lock().unwrap().push(label.clone());
                    Ok(())
                }),
            );
        }
        registry.register_dependency("db", "repo");
        registry.register_dependency("repo", "service");

        registry.destroy_singleton("db");
        assert_eq!(*order.lock().unwrap(), vec!["service", "repo", "db"]);
        assert_eq!(registry.singleton_count(), 0);
    }

    #[test]
    fn test_destroy_singletons_reverse_order_and_swallow_errors() {
        let registry = SingletonRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for name in ["first", "second", "third"] {
            registry.register_singleton(name, instance(0)).unwrap();
            let order = Arc::clone(&order);
            let label = name.to_string();
            registry.register_disposable(
                name,
                Box::new(move || {
                    order.lock().unwrap().push(label.clone());
                    if label == "second" {
                        Err(DiError::Internal("dispose failed".into()))
                    } else {
                        Ok(())
                    }
                }),
            );
        }

        registry.destroy_singletons();
        assert_eq!(*order.lock().unwrap(), vec!["third", "second", "first"]);
        assert_eq!(registry.singleton_count(), 0);
        assert!(registry.singleton_names().is_empty());
    }

    #[test]
    fn test_contained_destroyed_after_container() {
        let registry = SingletonRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for name in ["outer", "outer#inner#0"] {
            registry.register_singleton(name, instance(0)).unwrap();
            let order = Arc::clone(&order);
            let label = name.to_string();
            registry.register_disposable(
                name,
                Box::new(move || {
                    order.lock().unwrap().push(label.clone());
                    Ok(())
                }),
            );
        }
        registry.register_contained("outer#inner#0", "outer");

        registry.destroy_singleton("outer");
        assert_eq!(*order.lock().unwrap(), vec!["outer", "outer#inner#0"]);
    }

    #[test]
    fn test_concurrent_get_or_create_single_instance() {
        let registry = Arc::new(SingletonRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let calls = Arc::clone(&calls);
                std::thread::spawn(move || {
                    registry
                        .get_or_create("shared", || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(5));
                            Ok(instance(1))
                        })
                        .unwrap()
                })
            })
            .collect();

        let results: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
