//! Container-wide behavior checked through the public API only

use component_container::{
    Advice, Advisor, ComponentType, Container, ContainerConfig, Descriptor, DiError, ForwardingProxy,
    Instance, MethodSpec, Param, Pointcut, PooledTargetSource, PostProcessor, ProcessContext,
    ProxyFactory, Result, SingletonTargetSource, Stages, Value, ValueSpec, ValueType, same_instance,
};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;

// =============================================================================
// Fixtures
// =============================================================================

#[derive(Default)]
struct Left {
    right: OnceCell<Instance>,
    ready: AtomicBool,
}

#[derive(Default)]
struct Right {
    left: OnceCell<Instance>,
    ready: AtomicBool,
}

fn left_type() -> Arc<ComponentType> {
    ComponentType::builder::<Left>()
        .default_constructor()
        .property("right", ValueType::component::<Right>(), |left: &Left, value| {
            if let Value::Object(right) = value {
                let _ = left.right.set(right);
            }
            Ok(())
        })
        .after_properties_set(|left: &Left| {
            left.ready.store(true, Ordering::SeqCst);
            Ok(())
        })
        .build()
}

fn right_type() -> Arc<ComponentType> {
    ComponentType::builder::<Right>()
        .default_constructor()
        .property("left", ValueType::component::<Left>(), |right: &Right, value| {
            if let Value::Object(left) = value {
                let _ = right.left.set(left);
            }
            Ok(())
        })
        .after_properties_set(|right: &Right| {
            right.ready.store(true, Ordering::SeqCst);
            Ok(())
        })
        .build()
}

fn setter_cycle(container: &Container, prototype: bool) {
    let mut left = Descriptor::new(left_type()).with_reference("right", "right");
    let mut right = Descriptor::new(right_type()).with_reference("left", "left");
    if prototype {
        left = left.prototype();
        right = right.prototype();
    }
    container.register_definition("left", left).unwrap();
    container.register_definition("right", right).unwrap();
}

struct Ping {
    _pong: Arc<Pong>,
}

struct Pong {
    _ping: Arc<Ping>,
}

fn constructor_cycle(container: &Container) {
    let ping = ComponentType::builder::<Ping>()
        .constructor([Param::component::<Pong>("pong")], |args| {
            Ok(Ping {
                _pong: args.object(0)?,
            })
        })
        .build();
    let pong = ComponentType::builder::<Pong>()
        .constructor([Param::component::<Ping>("ping")], |args| {
            Ok(Pong {
                _ping: args.object(0)?,
            })
        })
        .build();
    container
        .register_definition(
            "ping",
            Descriptor::new(ping).with_arg(ValueSpec::reference("pong")),
        )
        .unwrap();
    container
        .register_definition(
            "pong",
            Descriptor::new(pong).with_arg(ValueSpec::reference("ping")),
        )
        .unwrap();
}

#[derive(Default)]
struct Echo {
    calls: AtomicUsize,
}

fn echo_type() -> Arc<ComponentType> {
    ComponentType::builder::<Echo>()
        .default_constructor()
        .method(
            MethodSpec::new("echo").param(ValueType::Str).returns(ValueType::Str),
            |call| {
                call.this::<Echo>()?.calls.fetch_add(1, Ordering::SeqCst);
                Ok(Value::from(call.args.str(0)?))
            },
        )
        .method(MethodSpec::new("ping").returns(ValueType::Str), |call| {
            call.this::<Echo>()?.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Value::from("pong"))
        })
        .method(MethodSpec::new("itself").returns(ValueType::Any), |call| {
            Ok(call.this_value())
        })
        .method(MethodSpec::new("broken").returns(ValueType::Str), |_| {
            Err(DiError::method_failed("broken", "always fails"))
        })
        .build()
}

fn recording(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> Advisor {
    let log = Arc::clone(log);
    Advisor::with_pointcut(
        Pointcut::names(["echo"]),
        Advice::around(move |inv| {
            log.lock().push(format!("{label}-before"));
            let result = inv.proceed();
            log.lock().push(format!("{label}-after"));
            result
        }),
    )
}

// =============================================================================
// Shared identity
// =============================================================================

#[test]
fn test_shared_identity_is_stable() {
    let container = Container::new();
    container
        .register_definition("echo", Descriptor::new(echo_type()))
        .unwrap();
    container.register_alias("echo", "repeater").unwrap();

    let first = container.get_instance("echo").unwrap();
    for _ in 0..10 {
        assert!(same_instance(&first, &container.get_instance("echo").unwrap()));
    }
    assert!(same_instance(&first, &container.get_instance("repeater").unwrap()));
}

#[test]
fn test_concurrent_callers_share_one_creation() {
    static CREATED: AtomicUsize = AtomicUsize::new(0);

    struct Slow;

    let ty = ComponentType::builder::<Slow>()
        .constructor([], |_| {
            CREATED.fetch_add(1, Ordering::SeqCst);
            thread::sleep(std::time::Duration::from_millis(20));
            Ok(Slow)
        })
        .build();

    let container = Container::new();
    container
        .register_definition("slow", Descriptor::new(ty))
        .unwrap();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let c = container.clone();
            thread::spawn(move || c.get_instance("slow").unwrap())
        })
        .collect();
    let instances: Vec<Instance> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(CREATED.load(Ordering::SeqCst), 1);
    assert!(instances.windows(2).all(|pair| same_instance(&pair[0], &pair[1])));
}

// =============================================================================
// Reference cycles
// =============================================================================

#[test]
fn test_setter_cycle_resolves() {
    let container = Container::new();
    setter_cycle(&container, false);

    let left = container.get_typed::<Left>("left").unwrap();
    let right = container.get_typed::<Right>("right").unwrap();

    let left_instance: Instance = left.clone();
    let right_instance: Instance = right.clone();
    assert!(same_instance(left.right.get().unwrap(), &right_instance));
    assert!(same_instance(right.left.get().unwrap(), &left_instance));
    assert!(left.ready.load(Ordering::SeqCst));
    assert!(right.ready.load(Ordering::SeqCst));
}

#[test]
fn test_setter_cycle_rejected_without_circular_references() {
    let container =
        Container::with_config(ContainerConfig::default().allow_circular_references(false));
    setter_cycle(&container, false);

    let err = container.get_instance("left").unwrap_err();
    assert!(matches!(err.root_cause(), DiError::ReentrantCreation { .. }));
}

#[test]
fn test_constructor_cycle_rejected_without_residue() {
    let container = Container::new();
    constructor_cycle(&container);

    let err = container.get_instance("ping").unwrap_err();
    match err.root_cause() {
        DiError::ReentrantCreation { name, .. } => assert_eq!(name, "ping"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.creation_path().first().copied(), Some("ping"));

    let registry = container.registry();
    for name in ["ping", "pong"] {
        assert!(!registry.contains_singleton(name));
        assert!(registry.early_reference(name).is_none());
        assert!(!registry.has_producer(name));
        assert!(!registry.is_in_creation(name));
    }

    // A failed attempt leaves nothing behind; the next attempt fails the same way
    let again = container.get_instance("pong").unwrap_err();
    assert!(matches!(again.root_cause(), DiError::ReentrantCreation { .. }));
}

#[test]
fn test_prototype_cycle_rejected() {
    let container = Container::new();
    setter_cycle(&container, true);

    let err = container.get_instance("left").unwrap_err();
    assert!(matches!(err.root_cause(), DiError::ReentrantCreation { .. }));
    assert!(!container.contains_singleton("left"));
    assert!(!container.contains_singleton("right"));
}

/// Wraps "left" in a proxy after initialization, without an early proxy.
struct WrapLeft;

impl PostProcessor for WrapLeft {
    fn stages(&self) -> Stages {
        Stages::AFTER_INITIALIZATION
    }

    fn after_initialization(&self, instance: &Instance, ctx: &ProcessContext<'_>) -> Result<Option<Instance>> {
        if ctx.name != "left" {
            return Ok(None);
        }
        let proxy: Instance = ProxyFactory::new()
            .target(instance.clone(), Arc::clone(ctx.component_type()))
            .advice(Advice::around(|inv| inv.proceed()))
            .build()?;
        Ok(Some(proxy))
    }
}

#[test]
fn test_wrapped_cycle_member_rejected_by_default() {
    let container = Container::new();
    container.add_post_processor(Arc::new(WrapLeft));
    setter_cycle(&container, false);

    let err = container.get_instance("left").unwrap_err();
    assert!(matches!(err.root_cause(), DiError::RawReferenceLeak { .. }));
}

#[test]
fn test_wrapped_cycle_member_tolerated_when_allowed() {
    let container = Container::with_config(
        ContainerConfig::default().allow_raw_injection_despite_wrapping(true),
    );
    container.add_post_processor(Arc::new(WrapLeft));
    setter_cycle(&container, false);

    let left = container.get_instance("left").unwrap();
    let wrapper = left.clone().downcast::<ForwardingProxy>().unwrap();
    let registered = container.registry().get_finished("left").unwrap();
    assert!(same_instance(&registered, &left));

    let source = wrapper.config().target_source();
    let raw = source
        .as_any()
        .downcast_ref::<SingletonTargetSource>()
        .unwrap()
        .target()
        .clone();
    assert!(raw.is::<Left>());

    let right = container.get_typed::<Right>("right").unwrap();
    let seen_by_right = right.left.get().unwrap();
    assert!(same_instance(seen_by_right, &raw));
    assert!(!same_instance(seen_by_right, &left));
}

// =============================================================================
// Definitions
// =============================================================================

#[test]
fn test_merge_is_idempotent() {
    let container = Container::new();
    container
        .register_definition(
            "base",
            Descriptor::new(echo_type()).abstract_definition().prototype(),
        )
        .unwrap();
    container
        .register_definition("child", Descriptor::child("base").lazy())
        .unwrap();

    let first = container.merged("child").unwrap();
    let second = container.merged("child").unwrap();
    assert!(first.descriptor() == second.descriptor());
    assert!(first.scope().is_prototype());
    assert!(first.is_lazy());
    assert!(!first.is_abstract());
}

#[test]
fn test_redefinition_changes_next_lookup() {
    let container = Container::new();
    container
        .register_definition("echo", Descriptor::new(echo_type()))
        .unwrap();
    let shared = container.get_instance("echo").unwrap();
    assert!(same_instance(&shared, &container.get_instance("echo").unwrap()));

    container
        .register_definition("echo", Descriptor::new(echo_type()).prototype())
        .unwrap();
    let a = container.get_instance("echo").unwrap();
    let b = container.get_instance("echo").unwrap();
    assert!(!same_instance(&shared, &a));
    assert!(!same_instance(&a, &b));
}

// =============================================================================
// Interception
// =============================================================================

#[test]
fn test_advice_order_and_selectivity() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let echo = Arc::new(Echo::default());

    let proxy = ProxyFactory::new()
        .target(echo.clone(), echo_type())
        .advisor(recording(&log, "x"))
        .advisor(recording(&log, "y"))
        .build()
        .unwrap();

    assert_eq!(
        proxy.invoke("echo", vec![Value::from("hi")]).unwrap(),
        Value::from("hi")
    );
    assert_eq!(
        *log.lock(),
        vec!["x-before", "y-before", "y-after", "x-after"]
    );

    log.lock().clear();
    assert_eq!(proxy.invoke("ping", vec![]).unwrap(), Value::from("pong"));
    assert!(log.lock().is_empty());
    assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
}

#[test]
fn test_self_reference_becomes_proxy() {
    let proxy = ProxyFactory::new()
        .target(Arc::new(Echo::default()), echo_type())
        .advice(Advice::before(|_| Ok(())))
        .build()
        .unwrap();

    let returned = proxy.invoke("itself", vec![]).unwrap();
    let proxy_instance: Instance = proxy.clone();
    assert!(returned.is_instance(&proxy_instance));
}

#[test]
fn test_pooled_lease_released_on_success_and_failure() {
    let container = Container::new();
    container
        .register_definition("echo", Descriptor::new(echo_type()).prototype())
        .unwrap();

    let pool = Arc::new(PooledTargetSource::from_container(&container, "echo", 2).unwrap());
    let proxy = ProxyFactory::new()
        .target_source(pool.clone())
        .advice(Advice::before(|_| Ok(())))
        .build()
        .unwrap();

    assert_eq!(pool.active_count(), 0);
    proxy.invoke("ping", vec![]).unwrap();
    assert_eq!(pool.active_count(), 0);

    assert!(proxy.invoke("broken", vec![]).is_err());
    assert_eq!(pool.active_count(), 0);
    assert_eq!(pool.idle_count(), 1);
}
