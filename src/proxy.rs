//! Forwarding proxies
//!
//! A [`ForwardingProxy`] stands in for a target object and routes every
//! method call through the interceptors of the advisors that match it.
//!
//! # Examples
//!
//! ```rust
//! use component_container::{Advice, Advisor, ComponentType, MethodSpec, Pointcut, ProxyFactory, Value, ValueType};
//! use std::sync::Arc;
//!
//! struct Greeter;
//!
//! let ty = ComponentType::builder::<Greeter>()
//!     .method(MethodSpec::new("greet").returns(ValueType::Str), |_| Ok(Value::from("hello")))
//!     .build();
//!
//! let proxy = ProxyFactory::new()
//!     .target(Arc::new(Greeter), ty)
//!     .advisor(Advisor::with_pointcut(
//!         Pointcut::names(["greet"]),
//!         Advice::around(|inv| {
//!             let value = inv.proceed()?;
//!             Ok(Value::from(format!("{}!", value.as_str().unwrap_or_default())))
//!         }),
//!     ))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(proxy.invoke("greet", vec![]).unwrap(), Value::from("hello!"));
//! ```

use crate::advice::{Advice, Advisor, ChainElement, build_chain};
use crate::component::{Args, CallContext, ComponentType, Method, downcast_target};
use crate::target::{EmptyTargetSource, SingletonTargetSource, TargetSource};
use crate::value::{Instance, TypeKey, Value, ValueType, same_instance};
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::fmt;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

type ChainKey = (String, usize);

// =============================================================================
// Configuration
// =============================================================================

/// Everything a proxy needs to dispatch: target source, advisors, exposed
/// capabilities and flags, plus the per-method chain cache.
pub struct AdvisedConfig {
    target_source: Arc<dyn TargetSource>,
    advisors: RwLock<Vec<Arc<Advisor>>>,
    interfaces: Vec<TypeKey>,
    proxy_target_type: bool,
    expose_proxy: bool,
    opaque: bool,
    pre_filtered: bool,
    frozen: AtomicBool,
    chain_cache: DashMap<ChainKey, Arc<[ChainElement]>, RandomState>,
}

impl AdvisedConfig {
    #[inline]
    pub fn target_source(&self) -> &Arc<dyn TargetSource> {
        &self.target_source
    }

    /// Capabilities the proxy exposes
    #[inline]
    pub fn interfaces(&self) -> &[TypeKey] {
        &self.interfaces
    }

    /// Whether the proxy stands in for the full target type rather than
    /// only its exposed capabilities
    #[inline]
    pub fn is_proxy_target_type(&self) -> bool {
        self.proxy_target_type || self.interfaces.is_empty()
    }

    #[inline]
    pub fn is_expose_proxy(&self) -> bool {
        self.expose_proxy
    }

    #[inline]
    pub fn is_opaque(&self) -> bool {
        self.opaque
    }

    #[inline]
    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// Reject further advisor changes.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn advisor_count(&self) -> usize {
        self.advisors.read().len()
    }

    pub fn advisors(&self) -> Vec<Arc<Advisor>> {
        self.advisors.read().clone()
    }

    /// Append an advisor; cached chains are rebuilt on the next call.
    pub fn add_advisor(&self, advisor: Arc<Advisor>) -> Result<()> {
        self.ensure_mutable()?;
        let mut advisors = self.advisors.write();
        advisors.push(advisor);
        self.chain_cache.clear();

        #[cfg(feature = "logging")]
        debug!(target: "component_container", count = advisors.len(), "Added advisor to proxy");

        Ok(())
    }

    /// Remove an advisor by identity; `Ok(false)` if it was not present.
    pub fn remove_advisor(&self, advisor: &Arc<Advisor>) -> Result<bool> {
        self.ensure_mutable()?;
        let mut advisors = self.advisors.write();
        let before = advisors.len();
        advisors.retain(|a| !Arc::ptr_eq(a, advisor));
        let removed = advisors.len() != before;
        if removed {
            self.chain_cache.clear();
        }
        Ok(removed)
    }

    fn ensure_mutable(&self) -> Result<()> {
        if self.is_frozen() {
            return Err(DiError::InvalidProxyConfig(
                "configuration is frozen; advisors cannot be changed".into(),
            ));
        }
        Ok(())
    }

    /// Interception chain for `method`, built once and cached.
    pub fn chain_for(&self, method: &Method) -> Arc<[ChainElement]> {
        let key = (method.name().to_string(), method.arity());
        if let Some(chain) = self.chain_cache.get(&key) {
            #[cfg(feature = "logging")]
            trace!(target: "component_container", method = method.name(), "Chain cache hit");
            return Arc::clone(chain.value());
        }

        // Held across the insert so a concurrent add_advisor cannot be
        // overwritten by a chain built from the old list.
        let advisors = self.advisors.read();
        let chain: Arc<[ChainElement]> = build_chain(
            &advisors,
            method,
            self.target_source.target_type(),
            self.pre_filtered,
        )
        .into();
        self.chain_cache.insert(key, Arc::clone(&chain));
        chain
    }

    fn identity_hash(&self) -> u64 {
        RandomState::with_seeds(7, 11, 13, 17).hash_one(self)
    }
}

impl PartialEq for AdvisedConfig {
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let (ours, theirs) = (self.advisors.read(), other.advisors.read());
        ours.len() == theirs.len()
            && ours.iter().zip(theirs.iter()).all(|(a, b)| Arc::ptr_eq(a, b))
            && self.interfaces == other.interfaces
            && self.target_source.same_source(other.target_source.as_ref())
    }
}

impl Hash for AdvisedConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for advisor in self.advisors.read().iter() {
            (Arc::as_ptr(advisor) as usize).hash(state);
        }
        self.target_source.identity().hash(state);
    }
}

impl fmt::Debug for AdvisedConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdvisedConfig")
            .field("target_type", &self.target_source.target_type().name())
            .field("advisors", &self.advisor_count())
            .field("interfaces", &self.interfaces)
            .field("proxy_target_type", &self.is_proxy_target_type())
            .field("expose_proxy", &self.expose_proxy)
            .field("frozen", &self.is_frozen())
            .field("opaque", &self.opaque)
            .finish()
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Builder for [`ForwardingProxy`].
#[derive(Default)]
pub struct ProxyFactory {
    target_source: Option<Arc<dyn TargetSource>>,
    target_type: Option<Arc<ComponentType>>,
    advisors: Vec<Arc<Advisor>>,
    interfaces: Vec<TypeKey>,
    proxy_target_type: bool,
    expose_proxy: bool,
    frozen: bool,
    opaque: bool,
    pre_filtered: bool,
}

impl ProxyFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward to a single fixed target
    pub fn target(self, target: Instance, component_type: Arc<ComponentType>) -> Self {
        self.target_source(Arc::new(SingletonTargetSource::new(target, component_type)))
    }

    pub fn target_source(mut self, source: Arc<dyn TargetSource>) -> Self {
        self.target_source = Some(source);
        self
    }

    /// Type whose methods a targetless proxy answers
    pub fn target_type(mut self, component_type: Arc<ComponentType>) -> Self {
        self.target_type = Some(component_type);
        self
    }

    pub fn advisor(mut self, advisor: impl Into<Arc<Advisor>>) -> Self {
        self.advisors.push(advisor.into());
        self
    }

    pub fn advisors(mut self, advisors: impl IntoIterator<Item = Arc<Advisor>>) -> Self {
        self.advisors.extend(advisors);
        self
    }

    /// Advice applied to every method
    pub fn advice(self, advice: Advice) -> Self {
        self.advisor(Advisor::new(advice))
    }

    /// Expose capability `I`
    pub fn interface<I: ?Sized + 'static>(self) -> Self {
        self.interface_key(TypeKey::of::<I>())
    }

    pub fn interface_key(mut self, key: TypeKey) -> Self {
        if !self.interfaces.contains(&key) {
            self.interfaces.push(key);
        }
        self
    }

    /// Stand in for the full target type even when capabilities are exposed
    pub fn proxy_target_type(mut self, enabled: bool) -> Self {
        self.proxy_target_type = enabled;
        self
    }

    /// Make the proxy available to method bodies through [`CallContext`]
    pub fn expose_proxy(mut self, enabled: bool) -> Self {
        self.expose_proxy = enabled;
        self
    }

    pub fn frozen(mut self, enabled: bool) -> Self {
        self.frozen = enabled;
        self
    }

    /// Hide the configuration introspection methods
    pub fn opaque(mut self, enabled: bool) -> Self {
        self.opaque = enabled;
        self
    }

    /// Advisors were already filtered for the target type
    pub fn pre_filtered(mut self, enabled: bool) -> Self {
        self.pre_filtered = enabled;
        self
    }

    pub fn build(self) -> Result<Arc<ForwardingProxy>> {
        let target_source = match self.target_source {
            Some(source) => source,
            None if self.advisors.is_empty() => {
                return Err(DiError::InvalidProxyConfig(
                    "a proxy needs at least one advisor or a target".into(),
                ));
            }
            None => Arc::new(match self.target_type {
                Some(ty) => EmptyTargetSource::new(ty),
                None => EmptyTargetSource::untyped(),
            }),
        };

        let config = AdvisedConfig {
            target_source,
            advisors: RwLock::new(self.advisors),
            interfaces: self.interfaces,
            proxy_target_type: self.proxy_target_type,
            expose_proxy: self.expose_proxy,
            opaque: self.opaque,
            pre_filtered: self.pre_filtered,
            frozen: AtomicBool::new(self.frozen),
            chain_cache: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            target_type = config.target_source.target_type().name(),
            advisors = config.advisor_count(),
            subclass_style = config.is_proxy_target_type(),
            "Creating forwarding proxy"
        );

        Ok(ForwardingProxy::from_config(Arc::new(config)))
    }
}

// =============================================================================
// Proxy
// =============================================================================

/// Stand-in object that dispatches calls through interception chains.
pub struct ForwardingProxy {
    config: Arc<AdvisedConfig>,
    this: Weak<ForwardingProxy>,
}

impl ForwardingProxy {
    pub(crate) fn from_config(config: Arc<AdvisedConfig>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            config,
            this: this.clone(),
        })
    }

    #[inline]
    pub fn config(&self) -> &AdvisedConfig {
        &self.config
    }

    /// Name of the type calls are ultimately forwarded to
    pub fn decorated_type_name(&self) -> String {
        self.config.target_source.target_type().name().to_string()
    }

    /// Distance from the proxy to `key`, or `None` if the proxy cannot
    /// stand in for it.
    pub fn assignable_distance(&self, key: &TypeKey) -> Option<u32> {
        if *key == TypeKey::of::<ForwardingProxy>() {
            return Some(0);
        }
        if self.config.is_proxy_target_type() {
            return self
                .config
                .target_source
                .target_type()
                .assignable_distance(key)
                .map(|d| d + 1);
        }
        self.config
            .interfaces
            .iter()
            .position(|k| k == key)
            .map(|pos| pos as u32 + 1)
    }

    /// Call `method` through the interception chain.
    pub fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value> {
        if let Some(answer) = self.answer_locally(method, &args) {
            return Ok(answer);
        }

        let config = &self.config;
        let target_type = Arc::clone(config.target_source.target_type());
        let target_method = Arc::clone(target_type.find_method(method, args.len()).ok_or_else(|| {
            DiError::method_failed(
                method,
                format!("{} has no method taking {} arguments", target_type.name(), args.len()),
            )
        })?);
        if !config.is_proxy_target_type()
            && !target_method
                .declared_in()
                .is_some_and(|key| config.interfaces.contains(&key))
        {
            return Err(DiError::method_failed(
                method,
                format!("not declared by any capability the proxy of {} exposes", target_type.name()),
            ));
        }

        let proxy = self
            .this
            .upgrade()
            .ok_or_else(|| DiError::Internal("proxy dropped during dispatch".into()))?;
        let context = CallContext::with_proxy(config.expose_proxy.then(|| Arc::clone(&proxy)));
        let lease = Lease::acquire(config.target_source.as_ref())?;
        let chain = config.chain_for(&target_method);
        let args = Args::new(args);

        let result = if chain.is_empty() {
            target_method.call(&lease.target, &args, &context)?
        } else {
            let mut invocation = Invocation {
                proxy: &proxy,
                target: &lease.target,
                method: &target_method,
                component_type: &target_type,
                args,
                context: &context,
                chain: &chain,
                cursor: 0,
            };
            invocation.proceed()?
        };

        let result = match result {
            Value::Object(ref returned)
                if same_instance(returned, &lease.target)
                    && !target_method.is_raw_access_only()
                    && self.can_stand_in_for(target_method.returns()) =>
            {
                Value::Object(proxy)
            }
            other => other,
        };
        target_method.normalize_return(result)
    }

    /// Methods answered by the proxy itself instead of the target.
    fn answer_locally(&self, method: &str, args: &[Value]) -> Option<Value> {
        let config = &self.config;
        let target_type = config.target_source.target_type();
        match (method, args) {
            ("equals", [other]) if !target_type.defines_method("equals") => Some(Value::Bool(
                other
                    .downcast_ref::<ForwardingProxy>()
                    .is_some_and(|other| self == other),
            )),
            ("hash_code", []) if !target_type.defines_method("hash_code") => {
                Some(Value::Int(config.identity_hash() as i64))
            }
            ("decorated_type", []) => Some(Value::Str(self.decorated_type_name())),
            _ if config.opaque || !args.is_empty() => None,
            ("advisor_count", _) => Some(Value::Int(config.advisor_count() as i64)),
            ("is_frozen", _) => Some(Value::Bool(config.is_frozen())),
            ("is_expose_proxy", _) => Some(Value::Bool(config.expose_proxy)),
            ("proxied_types", _) => Some(Value::List(
                config
                    .interfaces
                    .iter()
                    .map(|key| Value::from(key.name()))
                    .collect(),
            )),
            _ => None,
        }
    }

    fn can_stand_in_for(&self, returns: &ValueType) -> bool {
        match returns {
            ValueType::Any => true,
            ValueType::Component(key) => self.assignable_distance(key).is_some(),
            _ => false,
        }
    }
}

impl PartialEq for ForwardingProxy {
    fn eq(&self, other: &Self) -> bool {
        *self.config == *other.config
    }
}

impl Eq for ForwardingProxy {}

impl Hash for ForwardingProxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.config.hash(state);
    }
}

impl fmt::Debug for ForwardingProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForwardingProxy")
            .field("config", &self.config)
            .finish()
    }
}

/// A leased target, released when dropped.
struct Lease<'a> {
    source: &'a dyn TargetSource,
    target: Instance,
}

impl<'a> Lease<'a> {
    fn acquire(source: &'a dyn TargetSource) -> Result<Self> {
        Ok(Self {
            target: source.get_target()?,
            source,
        })
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Err(_err) = self.source.release_target(&self.target) {
            #[cfg(feature = "logging")]
            warn!(target: "component_container", error = %_err, "Failed to release proxy target");
        }
    }
}

// =============================================================================
// Invocation
// =============================================================================

/// One call travelling through an interception chain.
pub struct Invocation<'a> {
    proxy: &'a Arc<ForwardingProxy>,
    target: &'a Instance,
    method: &'a Method,
    component_type: &'a ComponentType,
    args: Args,
    context: &'a CallContext,
    chain: &'a [ChainElement],
    cursor: usize,
}

impl Invocation<'_> {
    /// Run the next interceptor, or the target method once the chain is
    /// exhausted.
    pub fn proceed(&mut self) -> Result<Value> {
        let chain = self.chain;
        while let Some(element) = chain.get(self.cursor) {
            self.cursor += 1;
            if let Some(matcher) = &element.runtime {
                if !matcher.matches_call(self.method, self.component_type, &self.args) {
                    continue;
                }
            }
            return element.interceptor.invoke(self);
        }
        self.method.call(self.target, &self.args, self.context)
    }

    #[inline]
    pub fn method(&self) -> &Method {
        self.method
    }

    #[inline]
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Arguments as seen by the rest of the chain
    #[inline]
    pub fn args_mut(&mut self) -> &mut Vec<Value> {
        self.args.as_mut_vec()
    }

    #[inline]
    pub fn target(&self) -> &Instance {
        self.target
    }

    /// The target downcast to its concrete type
    pub fn this<T: Send + Sync + 'static>(&self) -> Result<&T> {
        downcast_target::<T>(self.target, "invocation target")
    }

    #[inline]
    pub fn proxy(&self) -> &Arc<ForwardingProxy> {
        self.proxy
    }

    #[inline]
    pub fn component_type(&self) -> &ComponentType {
        self.component_type
    }
}

impl fmt::Debug for Invocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("method", &self.method.name())
            .field("args", &self.args)
            .field("cursor", &self.cursor)
            .field("chain_len", &self.chain.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::{ArgumentMatcher, Pointcut};
    use crate::component::MethodSpec;
    use crate::target::PooledTargetSource;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    trait Arithmetic {}

    #[derive(Default)]
    struct Calculator {
        calls: AtomicUsize,
    }

    fn calculator_type() -> Arc<ComponentType> {
        ComponentType::builder::<Calculator>()
            .default_constructor()
            .implements::<dyn Arithmetic>()
            .method(
                MethodSpec::new("add")
                    .param(ValueType::Int)
                    .param(ValueType::Int)
                    .returns(ValueType::Int)
                    .declared_in::<dyn Arithmetic>(),
                |call| {
                    call.this::<Calculator>()?.calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Value::Int(call.args.int(0)? + call.args.int(1)?))
                },
            )
            .method(MethodSpec::new("me").returns(ValueType::Any), |call| Ok(call.this_value()))
            .method(
                MethodSpec::new("raw_me").returns(ValueType::Any).raw_access_only(),
                |call| Ok(call.this_value()),
            )
            .method(MethodSpec::new("fail").returns(ValueType::Int), |_| {
                Err(DiError::method_failed("fail", "always"))
            })
            .method(MethodSpec::new("nothing").returns(ValueType::Int), |_| Ok(Value::Null))
            .method(MethodSpec::new("reset"), |call| {
                call.this::<Calculator>()?.calls.store(0, Ordering::SeqCst);
                Ok(Value::Int(42))
            })
            .method(MethodSpec::new("via_proxy").returns(ValueType::Int), |call| {
                let proxy = call.context.require_proxy()?;
                proxy.invoke("add", vec![Value::Int(1), Value::Int(1)])
            })
            .build()
    }

    fn target() -> (Arc<Calculator>, Instance) {
        let calculator = Arc::new(Calculator::default());
        let instance: Instance = calculator.clone();
        (calculator, instance)
    }

    fn recording(log: &Arc<Mutex<Vec<String>>>, label: &'static str) -> Advice {
        let log = Arc::clone(log);
        Advice::around(move |inv| {
            log.lock().push(format!("{label}-before"));
            let result = inv.proceed();
            log.lock().push(format!("{label}-after"));
            result
        })
    }

    #[test]
    fn test_advice_order_and_selectivity() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (calculator, instance) = target();
        let proxy = ProxyFactory::new()
            .target(instance, calculator_type())
            .advisor(Advisor::with_pointcut(Pointcut::names(["add"]), recording(&log, "x")))
            .advisor(Advisor::with_pointcut(Pointcut::names(["add"]), recording(&log, "y")))
            .build()
            .unwrap();

        assert_eq!(proxy.invoke("add", vec![Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(5));
        assert_eq!(*log.lock(), vec!["x-before", "y-before", "y-after", "x-after"]);

        log.lock().clear();
        proxy.invoke("reset", vec![]).unwrap();
        assert!(log.lock().is_empty());
        assert_eq!(calculator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_interceptor_can_rewrite_arguments() {
        let (_, instance) = target();
        let proxy = ProxyFactory::new()
            .target(instance, calculator_type())
            .advice(Advice::around(|inv| {
                if inv.method().name() == "add" {
                    inv.args_mut()[0] = Value::Int(10);
                }
                inv.proceed()
            }))
            .build()
            .unwrap();

        assert_eq!(proxy.invoke("add", vec![Value::Int(1), Value::Int(2)]).unwrap(), Value::Int(12));
    }

    #[test]
    fn test_runtime_matcher_checks_arguments() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (_, instance) = target();
        let proxy = ProxyFactory::new()
            .target(instance, calculator_type())
            .advisor(Advisor::with_pointcut(
                Pointcut::new(ArgumentMatcher::new("add", |args: &[Value]| {
                    args.first().and_then(Value::as_int).is_some_and(|v| v > 100)
                })),
                recording(&log, "big"),
            ))
            .build()
            .unwrap();

        proxy.invoke("add", vec![Value::Int(1), Value::Int(2)]).unwrap();
        assert!(log.lock().is_empty());
        proxy.invoke("add", vec![Value::Int(500), Value::Int(2)]).unwrap();
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_before_and_after_throwing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (calculator, instance) = target();
        let observed = Arc::clone(&seen);
        let proxy = ProxyFactory::new()
            .target(instance, calculator_type())
            .advisor(Advisor::with_pointcut(
                Pointcut::names(["add"]),
                Advice::before(|inv| match inv.args().first() {
                    Some(Value::Int(v)) if *v < 0 => Err(DiError::method_failed("add", "negative")),
                    _ => Ok(()),
                }),
            ))
            .advisor(Advisor::new(Advice::after_throwing(move |err, inv| {
                observed.lock().push(format!("{}: {err}", inv.method().name()));
            })))
            .build()
            .unwrap();

        assert!(proxy.invoke("add", vec![Value::Int(-1), Value::Int(2)]).is_err());
        assert_eq!(calculator.calls.load(Ordering::SeqCst), 0);

        assert!(proxy.invoke("fail", vec![]).is_err());
        assert_eq!(seen.lock().len(), 1);
        assert!(seen.lock()[0].starts_with("fail:"));
    }

    #[test]
    fn test_self_reference_returns_proxy() {
        let (_, instance) = target();
        let proxy = ProxyFactory::new()
            .target(instance.clone(), calculator_type())
            .advice(Advice::around(|inv| inv.proceed()))
            .build()
            .unwrap();
        let as_instance: Instance = proxy.clone();

        let returned = proxy.invoke("me", vec![]).unwrap();
        assert!(returned.is_instance(&as_instance));

        let raw = proxy.invoke("raw_me", vec![]).unwrap();
        assert!(raw.is_instance(&instance));
    }

    #[test]
    fn test_return_normalization() {
        let (_, instance) = target();
        let proxy = ProxyFactory::new()
            .target(instance, calculator_type())
            .advice(Advice::around(|inv| inv.proceed()))
            .build()
            .unwrap();

        assert_eq!(proxy.invoke("reset", vec![]).unwrap(), Value::Null);
        assert!(matches!(
            proxy.invoke("nothing", vec![]),
            Err(DiError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_exposed_proxy_reaches_advice_on_self_calls() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (_, instance) = target();
        let proxy = ProxyFactory::new()
            .target(instance.clone(), calculator_type())
            .advisor(Advisor::with_pointcut(Pointcut::names(["add"]), recording(&log, "add")))
            .expose_proxy(true)
            .build()
            .unwrap();

        assert_eq!(proxy.invoke("via_proxy", vec![]).unwrap(), Value::Int(2));
        assert_eq!(log.lock().len(), 2);

        let hidden = ProxyFactory::new()
            .target(instance, calculator_type())
            .advice(Advice::around(|inv| inv.proceed()))
            .build()
            .unwrap();
        assert!(hidden.invoke("via_proxy", vec![]).is_err());
    }

    #[test]
    fn test_interface_proxy_only_dispatches_capability_methods() {
        let (_, instance) = target();
        let proxy = ProxyFactory::new()
            .target(instance, calculator_type())
            .interface::<dyn Arithmetic>()
            .advice(Advice::around(|inv| inv.proceed()))
            .build()
            .unwrap();

        assert!(proxy.invoke("add", vec![Value::Int(1), Value::Int(1)]).is_ok());
        assert!(proxy.invoke("reset", vec![]).is_err());
        assert_eq!(proxy.assignable_distance(&TypeKey::of::<dyn Arithmetic>()), Some(1));
        assert_eq!(proxy.assignable_distance(&TypeKey::of::<Calculator>()), None);
    }

    #[test]
    fn test_subclass_proxy_is_assignable_to_target_type() {
        let (_, instance) = target();
        let proxy = ProxyFactory::new()
            .target(instance, calculator_type())
            .interface::<dyn Arithmetic>()
            .proxy_target_type(true)
            .advice(Advice::around(|inv| inv.proceed()))
            .build()
            .unwrap();

        assert!(proxy.assignable_distance(&TypeKey::of::<Calculator>()).is_some());
        assert!(proxy.invoke("reset", vec![]).is_ok());
    }

    #[test]
    fn test_equality_and_hash_follow_configuration() {
        let (_, instance) = target();
        let advisor = Arc::new(Advisor::new(Advice::around(|inv| inv.proceed())));
        let build = |instance: Instance| {
            ProxyFactory::new()
                .target(instance, calculator_type())
                .advisor(Arc::clone(&advisor))
                .build()
                .unwrap()
        };
        let a = build(instance.clone());
        let b = build(instance);
        let c = build(Arc::new(Calculator::default()));

        assert_eq!(*a, *b);
        assert_ne!(*a, *c);
        assert_eq!(
            a.invoke("equals", vec![Value::Object(b.clone())]).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            a.invoke("hash_code", vec![]).unwrap(),
            b.invoke("hash_code", vec![]).unwrap()
        );
    }

    #[test]
    fn test_introspection_and_opaque() {
        let (_, instance) = target();
        let proxy = ProxyFactory::new()
            .target(instance.clone(), calculator_type())
            .interface::<dyn Arithmetic>()
            .advice(Advice::around(|inv| inv.proceed()))
            .build()
            .unwrap();

        assert_eq!(proxy.invoke("advisor_count", vec![]).unwrap(), Value::Int(1));
        assert_eq!(proxy.invoke("is_frozen", vec![]).unwrap(), Value::Bool(false));
        assert_eq!(
            proxy.invoke("decorated_type", vec![]).unwrap(),
            Value::from(std::any::type_name::<Calculator>())
        );
        assert_eq!(proxy.invoke("proxied_types", vec![]).unwrap().as_list().unwrap().len(), 1);

        let opaque = ProxyFactory::new()
            .target(instance, calculator_type())
            .advice(Advice::around(|inv| inv.proceed()))
            .opaque(true)
            .build()
            .unwrap();
        assert!(opaque.invoke("advisor_count", vec![]).is_err());
    }

    #[test]
    fn test_frozen_and_empty_configurations() {
        assert!(matches!(
            ProxyFactory::new().build(),
            Err(DiError::InvalidProxyConfig(_))
        ));

        let (_, instance) = target();
        let proxy = ProxyFactory::new()
            .target(instance, calculator_type())
            .frozen(true)
            .build()
            .unwrap();
        let advisor = Arc::new(Advisor::new(Advice::around(|inv| inv.proceed())));
        assert!(proxy.config().add_advisor(advisor).is_err());
    }

    #[test]
    fn test_advisor_changes_invalidate_chains() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (_, instance) = target();
        let proxy = ProxyFactory::new().target(instance, calculator_type()).build().unwrap();

        proxy.invoke("add", vec![Value::Int(1), Value::Int(1)]).unwrap();
        let advisor = Arc::new(Advisor::new(recording(&log, "late")));
        proxy.config().add_advisor(Arc::clone(&advisor)).unwrap();
        proxy.invoke("add", vec![Value::Int(1), Value::Int(1)]).unwrap();
        assert_eq!(log.lock().len(), 2);

        assert!(proxy.config().remove_advisor(&advisor).unwrap());
        proxy.invoke("add", vec![Value::Int(1), Value::Int(1)]).unwrap();
        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn test_targetless_proxy_answered_by_advice() {
        let proxy = ProxyFactory::new()
            .target_type(calculator_type())
            .advice(Advice::around(|_| Ok(Value::Int(99))))
            .build()
            .unwrap();

        assert_eq!(proxy.invoke("add", vec![Value::Int(1), Value::Int(1)]).unwrap(), Value::Int(99));
    }

    #[test]
    fn test_pooled_lease_released_on_every_path() {
        let pool = Arc::new(PooledTargetSource::new(calculator_type(), 2, || {
            Ok(Arc::new(Calculator::default()) as Instance)
        }));
        let proxy = ProxyFactory::new()
            .target_source(pool.clone())
            .advice(Advice::around(|inv| inv.proceed()))
            .build()
            .unwrap();

        proxy.invoke("add", vec![Value::Int(1), Value::Int(1)]).unwrap();
        assert_eq!(pool.active_count(), 0);
        assert!(proxy.invoke("fail", vec![]).is_err());
        assert_eq!(pool.active_count(), 0);
        assert_eq!(pool.idle_count(), 1);
    }
}
