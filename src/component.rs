//! Component metadata
//!
//! Rust has no runtime reflection, so every managed type is described once
//! by a [`ComponentType`]: its constructors and factory methods, settable
//! properties, callable methods and lifecycle hooks. The container and the
//! proxy dispatcher only ever work through this table.

use crate::proxy::ForwardingProxy;
use crate::value::{Instance, TypeKey, Value, ValueType};
use crate::{DiError, Result};
use ahash::RandomState;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

type CreatorFn = dyn Fn(Option<&Instance>, Args) -> Result<Instance> + Send + Sync;
type SetterFn = dyn Fn(&Instance, Value) -> Result<()> + Send + Sync;
type MethodFn = dyn Fn(&MethodCall<'_>) -> Result<Value> + Send + Sync;
type HookFn = dyn Fn(&Instance) -> Result<()> + Send + Sync;
type NameHookFn = dyn Fn(&Instance, &str) + Send + Sync;

/// Borrow the concrete value behind an instance or report a mismatch.
pub(crate) fn downcast_target<'a, T: Send + Sync + 'static>(
    instance: &'a Instance,
    context: &str,
) -> Result<&'a T> {
    (**instance)
        .downcast_ref::<T>()
        .ok_or_else(|| DiError::type_mismatch(context, std::any::type_name::<T>(), "other type"))
}

// =============================================================================
// Arguments
// =============================================================================

/// Positional arguments handed to constructors, factories and methods.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args(Vec<Value>);

impl Args {
    #[inline]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    fn at(&self, index: usize) -> Result<&Value> {
        self.0.get(index).ok_or_else(|| {
            DiError::type_mismatch(format!("arg {index}"), "argument", "missing argument")
        })
    }

    /// Argument as a managed object of type `T`; `Null` is an error.
    pub fn object<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>> {
        self.at(index)?.downcast::<T>()
    }

    /// Argument as an optional managed object of type `T`.
    pub fn optional<T: Send + Sync + 'static>(&self, index: usize) -> Result<Option<Arc<T>>> {
        match self.at(index)? {
            Value::Null => Ok(None),
            value => value.downcast::<T>().map(Some),
        }
    }

    pub fn int(&self, index: usize) -> Result<i64> {
        let value = self.at(index)?;
        value
            .as_int()
            .ok_or_else(|| DiError::type_mismatch(format!("arg {index}"), "int", value.kind_name()))
    }

    pub fn float(&self, index: usize) -> Result<f64> {
        let value = self.at(index)?;
        value
            .as_float()
            .ok_or_else(|| DiError::type_mismatch(format!("arg {index}"), "float", value.kind_name()))
    }

    pub fn bool(&self, index: usize) -> Result<bool> {
        let value = self.at(index)?;
        value
            .as_bool()
            .ok_or_else(|| DiError::type_mismatch(format!("arg {index}"), "bool", value.kind_name()))
    }

    pub fn str(&self, index: usize) -> Result<&str> {
        let value = self.at(index)?;
        value
            .as_str()
            .ok_or_else(|| DiError::type_mismatch(format!("arg {index}"), "string", value.kind_name()))
    }

    /// Every element of a list argument downcast to `T`.
    pub fn objects<T: Send + Sync + 'static>(&self, index: usize) -> Result<Vec<Arc<T>>> {
        match self.at(index)? {
            Value::List(items) => items.iter().map(Value::downcast::<T>).collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(DiError::type_mismatch(
                format!("arg {index}"),
                "list",
                other.kind_name(),
            )),
        }
    }

    #[inline]
    pub fn as_mut_vec(&mut self) -> &mut Vec<Value> {
        &mut self.0
    }

    #[inline]
    pub fn into_vec(self) -> Vec<Value> {
        self.0
    }
}

impl Deref for Args {
    type Target = [Value];

    fn deref(&self) -> &[Value] {
        &self.0
    }
}

impl From<Vec<Value>> for Args {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}

// =============================================================================
// Creators (constructors and factory methods)
// =============================================================================

/// A named, typed parameter of a constructor or factory method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub ty: ValueType,
}

impl Param {
    #[inline]
    pub fn new(name: impl Into<String>, ty: ValueType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    /// Parameter of component type `T` (concrete type or `dyn Trait`)
    #[inline]
    pub fn component<T: ?Sized + 'static>(name: impl Into<String>) -> Self {
        Self::new(name, ValueType::component::<T>())
    }
}

/// How a creator produces its instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreatorKind {
    /// A constructor of the component type itself
    Constructor,
    /// An associated function that needs no owner instance
    StaticFactory,
    /// A method invoked on a factory owner instance
    InstanceFactory,
}

/// A constructor or factory method.
pub struct Creator {
    name: String,
    params: Vec<Param>,
    public: bool,
    kind: CreatorKind,
    returns: TypeKey,
    body: Box<CreatorFn>,
}

impl Creator {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    #[inline]
    pub fn is_public(&self) -> bool {
        self.public
    }

    #[inline]
    pub fn kind(&self) -> CreatorKind {
        self.kind
    }

    /// Type of the produced instance
    #[inline]
    pub fn returns(&self) -> TypeKey {
        self.returns
    }

    /// `name(int, string)` style signature for diagnostics
    pub fn signature(&self) -> String {
        let params: Vec<String> = self.params.iter().map(|p| p.ty.display_name()).collect();
        format!("{}({})", self.name, params.join(", "))
    }

    /// Run the creator. `owner` is required for instance factories.
    pub fn invoke(&self, owner: Option<&Instance>, args: Vec<Value>) -> Result<Instance> {
        if self.kind == CreatorKind::InstanceFactory && owner.is_none() {
            return Err(DiError::method_failed(
                &self.name,
                "factory method requires an owner instance",
            ));
        }
        (self.body)(owner, Args(args))
    }
}

impl fmt::Debug for Creator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Creator")
            .field("signature", &self.signature())
            .field("public", &self.public)
            .field("kind", &self.kind)
            .finish()
    }
}

// =============================================================================
// Properties
// =============================================================================

/// A settable property.
pub struct Property {
    name: String,
    ty: ValueType,
    required: bool,
    autowired: bool,
    setter: Box<SetterFn>,
}

impl Property {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn ty(&self) -> &ValueType {
        &self.ty
    }

    /// Autowiring by type fails hard when no unique match exists
    #[inline]
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Filled by the autowired-property processor regardless of autowire mode
    #[inline]
    pub fn is_autowired(&self) -> bool {
        self.autowired
    }

    /// Assign an already converted value.
    #[inline]
    pub fn set(&self, target: &Instance, value: Value) -> Result<()> {
        (self.setter)(target, value)
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Property")
            .field("name", &self.name)
            .field("ty", &self.ty)
            .field("required", &self.required)
            .field("autowired", &self.autowired)
            .finish()
    }
}

// =============================================================================
// Methods
// =============================================================================

/// Per-call context handed to method bodies.
///
/// Carries the forwarding proxy when the proxy was configured to expose
/// itself, so a method can call back through its own advice.
#[derive(Clone, Default)]
pub struct CallContext {
    proxy: Option<Arc<ForwardingProxy>>,
}

impl CallContext {
    #[inline]
    pub(crate) fn with_proxy(proxy: Option<Arc<ForwardingProxy>>) -> Self {
        Self { proxy }
    }

    /// The proxy currently dispatching this call, if exposed
    #[inline]
    pub fn current_proxy(&self) -> Option<&Arc<ForwardingProxy>> {
        self.proxy.as_ref()
    }

    /// Like [`current_proxy`](Self::current_proxy) but an error when not exposed
    pub fn require_proxy(&self) -> Result<&Arc<ForwardingProxy>> {
        self.proxy.as_ref().ok_or_else(|| {
            DiError::InvalidProxyConfig(
                "current proxy is not available; enable expose_proxy".into(),
            )
        })
    }
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("proxy_exposed", &self.proxy.is_some())
            .finish()
    }
}

/// One call of a component method.
pub struct MethodCall<'a> {
    pub target: &'a Instance,
    pub args: &'a Args,
    pub context: &'a CallContext,
}

impl MethodCall<'_> {
    /// The target downcast to its concrete type
    #[inline]
    pub fn this<T: Send + Sync + 'static>(&self) -> Result<&T> {
        downcast_target::<T>(self.target, "method target")
    }

    /// `Value` that refers to the target itself
    #[inline]
    pub fn this_value(&self) -> Value {
        Value::Object(Arc::clone(self.target))
    }
}

/// Signature of a callable method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSpec {
    name: String,
    params: Vec<ValueType>,
    returns: ValueType,
    declared_in: Option<TypeKey>,
    raw_access_only: bool,
}

impl MethodSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            returns: ValueType::Unit,
            declared_in: None,
            raw_access_only: false,
        }
    }

    pub fn param(mut self, ty: ValueType) -> Self {
        self.params.push(ty);
        self
    }

    pub fn returns(mut self, ty: ValueType) -> Self {
        self.returns = ty;
        self
    }

    /// Declare the method as part of capability `I`
    pub fn declared_in<I: ?Sized + 'static>(mut self) -> Self {
        self.declared_in = Some(TypeKey::of::<I>());
        self
    }

    /// Returned self-references are never swapped for the proxy
    pub fn raw_access_only(mut self) -> Self {
        self.raw_access_only = true;
        self
    }
}

/// A callable method of a component type.
pub struct Method {
    spec: MethodSpec,
    body: Box<MethodFn>,
}

impl Method {
    #[inline]
    pub fn name(&self) -> &str {
        &self.spec.name
    }

    #[inline]
    pub fn params(&self) -> &[ValueType] {
        &self.spec.params
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.spec.params.len()
    }

    #[inline]
    pub fn returns(&self) -> &ValueType {
        &self.spec.returns
    }

    /// Capability that declares this method, if any
    #[inline]
    pub fn declared_in(&self) -> Option<TypeKey> {
        self.spec.declared_in
    }

    #[inline]
    pub fn is_raw_access_only(&self) -> bool {
        self.spec.raw_access_only
    }

    /// Call the method body directly on `target`.
    pub fn call(&self, target: &Instance, args: &Args, context: &CallContext) -> Result<Value> {
        (self.body)(&MethodCall {
            target,
            args,
            context,
        })
    }

    /// Apply the declared return type: `Unit` drops the value, and a
    /// primitive return must be present.
    pub(crate) fn normalize_return(&self, value: Value) -> Result<Value> {
        match self.returns() {
            ValueType::Unit => Ok(Value::Null),
            ty if ty.is_primitive() && value.is_null() => Err(DiError::type_mismatch(
                format!("return value of {}", self.name()),
                ty.display_name(),
                "null",
            )),
            _ => Ok(value),
        }
    }
}

impl fmt::Debug for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Method").field("spec", &self.spec).finish()
    }
}

// =============================================================================
// Component type
// =============================================================================

/// Metadata of a managed type.
///
/// # Examples
///
/// ```rust
/// use component_container::{ComponentType, Param, ValueType};
///
/// struct Greeter { greeting: String }
///
/// let ty = ComponentType::builder::<Greeter>()
///     .constructor([Param::new("greeting", ValueType::Str)], |args| {
///         Ok(Greeter { greeting: args.str(0)?.to_string() })
///     })
///     .build();
///
/// assert_eq!(ty.constructors().len(), 1);
/// ```
pub struct ComponentType {
    key: TypeKey,
    assignable: Vec<TypeKey>,
    constructors: Vec<Arc<Creator>>,
    factory_methods: Vec<Arc<Creator>>,
    properties: Vec<Arc<Property>>,
    methods: Vec<Arc<Method>>,
    name_aware: Option<Box<NameHookFn>>,
    after_properties_set: Option<Box<HookFn>>,
    dispose: Option<Box<HookFn>>,
    callbacks: HashMap<String, Box<HookFn>, RandomState>,
    infrastructure: bool,
}

impl ComponentType {
    /// Start describing type `T`
    #[inline]
    pub fn builder<T: Send + Sync + 'static>() -> ComponentTypeBuilder<T> {
        ComponentTypeBuilder::new()
    }

    #[inline]
    pub fn key(&self) -> TypeKey {
        self.key
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.key.name()
    }

    /// Capabilities this type is assignable to, closest first
    #[inline]
    pub fn assignable_types(&self) -> &[TypeKey] {
        &self.assignable
    }

    #[inline]
    pub fn constructors(&self) -> &[Arc<Creator>] {
        &self.constructors
    }

    #[inline]
    pub fn factory_methods(&self) -> &[Arc<Creator>] {
        &self.factory_methods
    }

    /// Factory methods with the given name and kind
    pub fn factory_methods_named(&self, name: &str, kind: CreatorKind) -> Vec<Arc<Creator>> {
        self.factory_methods
            .iter()
            .filter(|c| c.name == name && c.kind == kind)
            .cloned()
            .collect()
    }

    #[inline]
    pub fn properties(&self) -> &[Arc<Property>] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&Arc<Property>> {
        self.properties.iter().find(|p| p.name == name)
    }

    #[inline]
    pub fn methods(&self) -> &[Arc<Method>] {
        &self.methods
    }

    /// Method by name and arity
    pub fn find_method(&self, name: &str, arity: usize) -> Option<&Arc<Method>> {
        self.methods
            .iter()
            .find(|m| m.name() == name && m.arity() == arity)
    }

    /// True if any arity of `name` is declared
    pub fn defines_method(&self, name: &str) -> bool {
        self.methods.iter().any(|m| m.name() == name)
    }

    /// 0 for the type itself, `1 + position` for a declared capability
    pub fn assignable_distance(&self, key: &TypeKey) -> Option<u32> {
        if self.key == *key {
            return Some(0);
        }
        self.assignable
            .iter()
            .position(|k| k == key)
            .map(|pos| pos as u32 + 1)
    }

    #[inline]
    pub fn is_assignable_to(&self, key: &TypeKey) -> bool {
        self.assignable_distance(key).is_some()
    }

    #[inline]
    pub fn is_name_aware(&self) -> bool {
        self.name_aware.is_some()
    }

    #[inline]
    pub fn has_after_properties_set(&self) -> bool {
        self.after_properties_set.is_some()
    }

    #[inline]
    pub fn is_disposable(&self) -> bool {
        self.dispose.is_some()
    }

    #[inline]
    pub fn has_callback(&self, name: &str) -> bool {
        self.callbacks.contains_key(name)
    }

    /// Part of the interception machinery; never auto-proxied
    #[inline]
    pub fn is_infrastructure(&self) -> bool {
        self.infrastructure
    }

    pub(crate) fn notify_name(&self, instance: &Instance, name: &str) {
        if let Some(hook) = &self.name_aware {
            hook(instance, name);
        }
    }

    pub(crate) fn run_after_properties_set(&self, instance: &Instance) -> Result<()> {
        match &self.after_properties_set {
            Some(hook) => hook(instance),
            None => Ok(()),
        }
    }

    pub(crate) fn run_dispose(&self, instance: &Instance) -> Result<()> {
        match &self.dispose {
            Some(hook) => hook(instance),
            None => Ok(()),
        }
    }

    /// Run a named callback; `Ok(false)` if the type has none by that name.
    pub(crate) fn run_callback(&self, name: &str, instance: &Instance) -> Result<bool> {
        match self.callbacks.get(name) {
            Some(callback) => callback(instance).map(|()| true),
            None => Ok(false),
        }
    }
}

impl PartialEq for ComponentType {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl fmt::Debug for ComponentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentType")
            .field("key", &self.key)
            .field("assignable", &self.assignable)
            .field("constructors", &self.constructors.len())
            .field("factory_methods", &self.factory_methods.len())
            .field("properties", &self.properties)
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// Builder for [`ComponentType`].
pub struct ComponentTypeBuilder<T> {
    inner: ComponentType,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> ComponentTypeBuilder<T> {
    fn new() -> Self {
        Self {
            inner: ComponentType {
                key: TypeKey::of::<T>(),
                assignable: Vec::new(),
                constructors: Vec::new(),
                factory_methods: Vec::new(),
                properties: Vec::new(),
                methods: Vec::new(),
                name_aware: None,
                after_properties_set: None,
                dispose: None,
                callbacks: HashMap::default(),
                infrastructure: false,
            },
            _marker: PhantomData,
        }
    }

    fn push_constructor<F>(mut self, params: Vec<Param>, public: bool, body: F) -> Self
    where
        F: Fn(Args) -> Result<T> + Send + Sync + 'static,
    {
        let name = self.inner.key.short_name().to_string();
        self.inner.constructors.push(Arc::new(Creator {
            name,
            params,
            public,
            kind: CreatorKind::Constructor,
            returns: TypeKey::of::<T>(),
            body: Box::new(move |_, args| body(args).map(|t| Arc::new(t) as Instance)),
        }));
        self
    }

    /// A public constructor
    pub fn constructor<F>(self, params: impl IntoIterator<Item = Param>, body: F) -> Self
    where
        F: Fn(Args) -> Result<T> + Send + Sync + 'static,
    {
        self.push_constructor(params.into_iter().collect(), true, body)
    }

    /// A non-public constructor; only visible when non-public access is allowed
    pub fn hidden_constructor<F>(self, params: impl IntoIterator<Item = Param>, body: F) -> Self
    where
        F: Fn(Args) -> Result<T> + Send + Sync + 'static,
    {
        self.push_constructor(params.into_iter().collect(), false, body)
    }

    /// A public zero-argument constructor using `Default`
    pub fn default_constructor(self) -> Self
    where
        T: Default,
    {
        self.push_constructor(Vec::new(), true, |_| Ok(T::default()))
    }

    /// An associated factory function producing `R`
    pub fn static_factory<R, F>(
        mut self,
        name: impl Into<String>,
        params: impl IntoIterator<Item = Param>,
        body: F,
    ) -> Self
    where
        R: Send + Sync + 'static,
        F: Fn(Args) -> Result<R> + Send + Sync + 'static,
    {
        self.inner.factory_methods.push(Arc::new(Creator {
            name: name.into(),
            params: params.into_iter().collect(),
            public: true,
            kind: CreatorKind::StaticFactory,
            returns: TypeKey::of::<R>(),
            body: Box::new(move |_, args| body(args).map(|r| Arc::new(r) as Instance)),
        }));
        self
    }

    /// A factory method called on an instance of `T`, producing `R`
    pub fn instance_factory<R, F>(
        mut self,
        name: impl Into<String>,
        params: impl IntoIterator<Item = Param>,
        body: F,
    ) -> Self
    where
        R: Send + Sync + 'static,
        F: Fn(&T, Args) -> Result<R> + Send + Sync + 'static,
    {
        let name = name.into();
        let context = format!("factory owner of {name}");
        self.inner.factory_methods.push(Arc::new(Creator {
            name,
            params: params.into_iter().collect(),
            public: true,
            kind: CreatorKind::InstanceFactory,
            returns: TypeKey::of::<R>(),
            body: Box::new(move |owner, args| {
                let owner = owner.ok_or_else(|| DiError::Internal("missing factory owner".into()))?;
                let owner = downcast_target::<T>(owner, &context)?;
                body(owner, args).map(|r| Arc::new(r) as Instance)
            }),
        }));
        self
    }

    fn push_property<F>(mut self, name: &str, ty: ValueType, required: bool, autowired: bool, setter: F) -> Self
    where
        F: Fn(&T, Value) -> Result<()> + Send + Sync + 'static,
    {
        let context = format!("{}.{}", self.inner.key.short_name(), name);
        self.inner.properties.push(Arc::new(Property {
            name: name.to_string(),
            ty,
            required,
            autowired,
            setter: Box::new(move |target, value| setter(downcast_target::<T>(target, &context)?, value)),
        }));
        self
    }

    /// An optional settable property
    pub fn property<F>(self, name: &str, ty: ValueType, setter: F) -> Self
    where
        F: Fn(&T, Value) -> Result<()> + Send + Sync + 'static,
    {
        self.push_property(name, ty, false, false, setter)
    }

    /// A property that must be satisfied when autowired by type
    pub fn required_property<F>(self, name: &str, ty: ValueType, setter: F) -> Self
    where
        F: Fn(&T, Value) -> Result<()> + Send + Sync + 'static,
    {
        self.push_property(name, ty, true, false, setter)
    }

    /// A property injected by type whatever the descriptor's autowire mode
    pub fn autowired_property<F>(self, name: &str, ty: ValueType, required: bool, setter: F) -> Self
    where
        F: Fn(&T, Value) -> Result<()> + Send + Sync + 'static,
    {
        self.push_property(name, ty, required, true, setter)
    }

    /// A callable method
    pub fn method<F>(mut self, spec: MethodSpec, body: F) -> Self
    where
        F: Fn(&MethodCall<'_>) -> Result<Value> + Send + Sync + 'static,
    {
        self.inner.methods.push(Arc::new(Method {
            spec,
            body: Box::new(body),
        }));
        self
    }

    /// Declare `T` assignable to capability `I`
    pub fn implements<I: ?Sized + 'static>(mut self) -> Self {
        let key = TypeKey::of::<I>();
        if key != self.inner.key && !self.inner.assignable.contains(&key) {
            self.inner.assignable.push(key);
        }
        self
    }

    /// Told its registered name before initialization
    pub fn on_name<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T, &str) + Send + Sync + 'static,
    {
        self.inner.name_aware = Some(Box::new(move |target, name| {
            if let Some(target) = (**target).downcast_ref::<T>() {
                hook(target, name);
            }
        }));
        self
    }

    /// Runs after every property is bound
    pub fn after_properties_set<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.after_properties_set = Some(erase_hook(hook, "after_properties_set"));
        self
    }

    /// Runs when the container disposes the instance
    pub fn on_dispose<F>(mut self, hook: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.dispose = Some(erase_hook(hook, "dispose"));
        self
    }

    /// A named callback, usable as a descriptor's init or destroy method
    pub fn callback<F>(mut self, name: &str, hook: F) -> Self
    where
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.inner
            .callbacks
            .insert(name.to_string(), erase_hook(hook, name));
        self
    }

    /// Mark the type as interception infrastructure
    pub fn infrastructure(mut self) -> Self {
        self.inner.infrastructure = true;
        self
    }

    pub fn build(self) -> Arc<ComponentType> {
        Arc::new(self.inner)
    }
}

fn erase_hook<T, F>(hook: F, name: &str) -> Box<HookFn>
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> Result<()> + Send + Sync + 'static,
{
    let context = name.to_string();
    Box::new(move |target| hook(downcast_target::<T>(target, &context)?))
}
