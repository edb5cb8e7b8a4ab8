//! Target sources
//!
//! A proxy does not hold its target directly; it leases one from a
//! [`TargetSource`] for every call and releases it afterwards.

use crate::component::ComponentType;
use crate::container::Container;
use crate::value::{Instance, instance_addr, same_instance};
use crate::{DiError, Result};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

/// Supplies the object a proxy forwards to.
pub trait TargetSource: Send + Sync {
    /// Type of the targets this source hands out
    fn target_type(&self) -> &Arc<ComponentType>;

    /// Whether every lease returns the same object
    fn is_static(&self) -> bool;

    /// Lease a target for one call.
    fn get_target(&self) -> Result<Instance>;

    /// Return a leased target.
    fn release_target(&self, _target: &Instance) -> Result<()> {
        Ok(())
    }

    /// Whether `other` hands out the same targets
    fn same_source(&self, other: &dyn TargetSource) -> bool;

    /// Stable value consistent with [`same_source`](TargetSource::same_source)
    fn identity(&self) -> usize;

    fn as_any(&self) -> &dyn Any;
}

impl fmt::Debug for dyn TargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetSource")
            .field("target_type", &self.target_type().name())
            .field("static", &self.is_static())
            .finish()
    }
}

// =============================================================================
// Singleton
// =============================================================================

/// Always the same target object.
pub struct SingletonTargetSource {
    target: Instance,
    component_type: Arc<ComponentType>,
}

impl SingletonTargetSource {
    pub fn new(target: Instance, component_type: Arc<ComponentType>) -> Self {
        Self {
            target,
            component_type,
        }
    }

    #[inline]
    pub fn target(&self) -> &Instance {
        &self.target
    }
}

impl TargetSource for SingletonTargetSource {
    fn target_type(&self) -> &Arc<ComponentType> {
        &self.component_type
    }

    fn is_static(&self) -> bool {
        true
    }

    fn get_target(&self) -> Result<Instance> {
        Ok(self.target.clone())
    }

    fn same_source(&self, other: &dyn TargetSource) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| same_instance(&self.target, &other.target))
    }

    fn identity(&self) -> usize {
        instance_addr(&self.target)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// =============================================================================
// Lazy
// =============================================================================

/// Looks the target up in a container on the first lease.
pub struct LazyTargetSource {
    container: Container,
    name: String,
    component_type: Arc<ComponentType>,
    target: OnceCell<Instance>,
}

impl LazyTargetSource {
    pub fn new(container: &Container, name: impl Into<String>, component_type: Arc<ComponentType>) -> Self {
        Self {
            container: container.clone(),
            name: name.into(),
            component_type,
            target: OnceCell::new(),
        }
    }

    /// Whether the target was looked up yet
    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.target.get().is_some()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl TargetSource for LazyTargetSource {
    fn target_type(&self) -> &Arc<ComponentType> {
        &self.component_type
    }

    fn is_static(&self) -> bool {
        false
    }

    fn get_target(&self) -> Result<Instance> {
        self.target
            .get_or_try_init(|| {
                #[cfg(feature = "logging")]
                debug!(target: "component_container", name = %self.name, "Initializing lazy proxy target");

                self.container.get_instance(&self.name)
            })
            .cloned()
    }

    fn same_source(&self, other: &dyn TargetSource) -> bool {
        other.as_any().downcast_ref::<Self>().is_some_and(|other| {
            self.name == other.name && self.container.registry() as *const _ == other.container.registry() as *const _
        })
    }

    fn identity(&self) -> usize {
        self.container.registry() as *const _ as usize
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for LazyTargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyTargetSource")
            .field("name", &self.name)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

// =============================================================================
// Pooled
// =============================================================================

type TargetFactory = dyn Fn() -> Result<Instance> + Send + Sync;

/// Bounded pool of interchangeable targets.
///
/// Each call leases an idle target (creating one while under the bound)
/// and returns it to the pool when the call finishes.
pub struct PooledTargetSource {
    component_type: Arc<ComponentType>,
    factory: Box<TargetFactory>,
    idle: Mutex<Vec<Instance>>,
    active: AtomicUsize,
    max_size: usize,
}

impl PooledTargetSource {
    pub fn new<F>(component_type: Arc<ComponentType>, max_size: usize, factory: F) -> Self
    where
        F: Fn() -> Result<Instance> + Send + Sync + 'static,
    {
        Self {
            component_type,
            factory: Box::new(factory),
            idle: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_size: max_size.max(1),
        }
    }

    /// Pool of per-request instances of `name` from `container`.
    pub fn from_container(container: &Container, name: &str, max_size: usize) -> Result<Self> {
        if !container.is_prototype(name)? {
            return Err(DiError::InvalidProxyConfig(format!(
                "pooled target '{name}' must be a per-request component"
            )));
        }
        let merged = container
            .merged(name)
            .ok_or_else(|| DiError::not_found(name))?;
        let container = container.clone();
        let name = name.to_string();
        Ok(Self::new(
            Arc::clone(merged.component_type()),
            max_size,
            move || container.get_instance(&name),
        ))
    }

    /// Targets currently leased
    #[inline]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Targets waiting in the pool
    #[inline]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max_size
    }
}

impl TargetSource for PooledTargetSource {
    fn target_type(&self) -> &Arc<ComponentType> {
        &self.component_type
    }

    fn is_static(&self) -> bool {
        false
    }

    fn get_target(&self) -> Result<Instance> {
        // Reserve a lease slot before touching the idle list.
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| {
                (active < self.max_size).then_some(active + 1)
            })
            .map_err(|_| {
                DiError::method_failed(
                    "get_target",
                    format!("pool exhausted ({} targets leased)", self.max_size),
                )
            })?;

        let reused = self.idle.lock().pop();
        let target = match reused {
            Some(target) => target,
            // The idle lock is not held here; the factory may re-enter this pool.
            None => match (self.factory)() {
                Ok(target) => target,
                Err(err) => {
                    self.active.fetch_sub(1, Ordering::AcqRel);
                    return Err(err);
                }
            },
        };

        #[cfg(feature = "logging")]
        trace!(
            target: "component_container",
            active = self.active_count(),
            "Leased pooled target"
        );

        Ok(target)
    }

    fn release_target(&self, target: &Instance) -> Result<()> {
        let released = self
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |active| active.checked_sub(1));
        if released.is_err() {
            #[cfg(feature = "logging")]
            warn!(
                target: "component_container",
                component = self.component_type.name(),
                "Released a pooled target that was never leased; ignoring"
            );
            return Ok(());
        }
        self.idle.lock().push(target.clone());
        Ok(())
    }

    fn same_source(&self, other: &dyn TargetSource) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| std::ptr::eq(self, other))
    }

    fn identity(&self) -> usize {
        self as *const Self as usize
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl fmt::Debug for PooledTargetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledTargetSource")
            .field("active", &self.active_count())
            .field("idle", &self.idle_count())
            .field("max_size", &self.max_size)
            .finish()
    }
}

// =============================================================================
// Empty
// =============================================================================

/// No target at all; every call must be answered by advice.
pub struct EmptyTargetSource {
    component_type: Arc<ComponentType>,
}

/// Placeholder type of targetless proxies
#[derive(Debug)]
pub struct NoTarget;

impl EmptyTargetSource {
    pub fn new(component_type: Arc<ComponentType>) -> Self {
        Self { component_type }
    }

    pub fn untyped() -> Self {
        Self::new(ComponentType::builder::<NoTarget>().build())
    }
}

impl TargetSource for EmptyTargetSource {
    fn target_type(&self) -> &Arc<ComponentType> {
        &self.component_type
    }

    fn is_static(&self) -> bool {
        true
    }

    fn get_target(&self) -> Result<Instance> {
        Ok(Arc::new(NoTarget))
    }

    fn same_source(&self, other: &dyn TargetSource) -> bool {
        other
            .as_any()
            .downcast_ref::<Self>()
            .is_some_and(|other| self.component_type == other.component_type)
    }

    fn identity(&self) -> usize {
        Arc::as_ptr(&self.component_type) as usize
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Descriptor;

    #[derive(Default)]
    struct Worker;

    fn worker_type() -> Arc<ComponentType> {
        ComponentType::builder::<Worker>().default_constructor().build()
    }

    #[test]
    fn test_singleton_source() {
        let target: Instance = Arc::new(Worker);
        let a = SingletonTargetSource::new(target.clone(), worker_type());
        let b = SingletonTargetSource::new(target.clone(), worker_type());
        let c = SingletonTargetSource::new(Arc::new(Worker), worker_type());

        assert!(same_instance(&a.get_target().unwrap(), &target));
        assert!(a.same_source(&b));
        assert!(!a.same_source(&c));
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_lazy_source_defers_lookup() {
        let container = Container::new();
        container
            .register_definition("worker", Descriptor::new(worker_type()))
            .unwrap();

        let source = LazyTargetSource::new(&container, "worker", worker_type());
        assert!(!source.is_initialized());
        assert!(!container.contains_singleton("worker"));

        let target = source.get_target().unwrap();
        assert!(source.is_initialized());
        assert!(same_instance(&target, &container.get_instance("worker").unwrap()));
    }

    #[test]
    fn test_pool_leases_and_releases() {
        let pool = PooledTargetSource::new(worker_type(), 2, || Ok(Arc::new(Worker) as Instance));

        let first = pool.get_target().unwrap();
        let second = pool.get_target().unwrap();
        assert_eq!(pool.active_count(), 2);
        assert!(pool.get_target().is_err());

        pool.release_target(&first).unwrap();
        assert_eq!(pool.active_count(), 1);
        assert_eq!(pool.idle_count(), 1);

        let reused = pool.get_target().unwrap();
        assert!(same_instance(&reused, &first));
        pool.release_target(&reused).unwrap();
        pool.release_target(&second).unwrap();
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.idle_count(), 2);
    }

    #[test]
    fn test_pool_usable_while_factory_runs() {
        use std::sync::mpsc;
        use std::time::Duration;

        let (started_tx, started_rx) = mpsc::channel::<()>();
        let (go_tx, go_rx) = mpsc::channel::<()>();
        let go_rx = Mutex::new(go_rx);
        let released_in_time = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let calls = AtomicUsize::new(0);

        let flag = Arc::clone(&released_in_time);
        let pool = Arc::new(PooledTargetSource::new(worker_type(), 2, move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 1 {
                let _ = started_tx.send(());
                if go_rx.lock().recv_timeout(Duration::from_secs(5)).is_ok() {
                    flag.store(true, Ordering::SeqCst);
                }
            }
            Ok(Arc::new(Worker) as Instance)
        }));

        let first = pool.get_target().unwrap();
        let leasing = {
            let pool = Arc::clone(&pool);
            std::thread::spawn(move || pool.get_target())
        };

        started_rx.recv().unwrap();
        assert_eq!(pool.idle_count(), 0);
        pool.release_target(&first).unwrap();
        assert_eq!(pool.idle_count(), 1);
        go_tx.send(()).unwrap();

        assert!(leasing.join().unwrap().is_ok());
        assert!(released_in_time.load(Ordering::SeqCst));
        assert_eq!(pool.active_count(), 1);
    }

    #[test]
    fn test_pool_failed_creation_frees_slot() {
        let calls = AtomicUsize::new(0);
        let pool = PooledTargetSource::new(worker_type(), 1, move || {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(DiError::method_failed("create", "first attempt fails"));
            }
            Ok(Arc::new(Worker) as Instance)
        });

        match pool.get_target() {
            Err(DiError::MethodFailed { method, .. }) => assert_eq!(method, "create"),
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(pool.active_count(), 0);
        assert!(pool.get_target().is_ok());
        assert_eq!(pool.active_count(), 1);
    }

    #[test]
    fn test_pool_ignores_release_without_lease() {
        let pool = PooledTargetSource::new(worker_type(), 1, || Ok(Arc::new(Worker) as Instance));
        let stray: Instance = Arc::new(Worker);

        pool.release_target(&stray).unwrap();
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.idle_count(), 0);

        let target = pool.get_target().unwrap();
        pool.release_target(&target).unwrap();
        pool.release_target(&target).unwrap();
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.idle_count(), 1);
        assert!(pool.get_target().is_ok());
    }

    #[test]
    fn test_pool_from_container_requires_prototype() {
        let container = Container::new();
        container
            .register_definition("shared", Descriptor::new(worker_type()))
            .unwrap();
        container
            .register_definition("worker", Descriptor::new(worker_type()).prototype())
            .unwrap();

        assert!(PooledTargetSource::from_container(&container, "shared", 4).is_err());
        let pool = PooledTargetSource::from_container(&container, "worker", 4).unwrap();
        let target = pool.get_target().unwrap();
        assert!((*target).is::<Worker>());
    }
}
