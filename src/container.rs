//! Component container
//!
//! The `Container` ties the definition store, the shared-instance registry,
//! the post-processor pipeline and registered scopes together behind one
//! lookup API.

use crate::component::{Args, CallContext, ComponentType};
use crate::descriptor::{Descriptor, MergedDescriptor, ScopeKind};
use crate::inject::{AutowiredPropertyProcessor, determine_candidate};
use crate::lifecycle::Orchestrator;
use crate::processor::{Pipeline, PostProcessor};
use crate::proxy::ForwardingProxy;
use crate::registry::{PrototypeGuard, SingletonRegistry, creation_chain};
use crate::scope::CustomScope;
use crate::storage::DefinitionStore;
use crate::value::{Instance, TypeConverter, TypeKey, TypeLookup, Value, instance_type_id};
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

// =============================================================================
// Configuration
// =============================================================================

/// Container behavior switches.
///
/// # Examples
///
/// ```rust
/// use component_container::{Container, ContainerConfig};
///
/// let container = Container::with_config(
///     ContainerConfig::default()
///         .allow_circular_references(false)
///         .lenient_constructor_resolution(false),
/// );
/// assert!(!container.config().allow_circular_references);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Resolve setter cycles between shared components through early references
    pub allow_circular_references: bool,
    /// Keep a wrapped final instance even though dependents received the raw one
    pub allow_raw_injection_despite_wrapping: bool,
    /// Weigh candidates by type distance instead of failing on ties
    pub lenient_constructor_resolution: bool,
    /// Consider non-public constructors and factory methods
    pub allow_non_public_access: bool,
    /// Let a registration replace an existing definition of the same name
    pub allow_definition_overriding: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            allow_circular_references: true,
            allow_raw_injection_despite_wrapping: false,
            lenient_constructor_resolution: true,
            allow_non_public_access: true,
            allow_definition_overriding: true,
        }
    }
}

impl ContainerConfig {
    pub fn allow_circular_references(mut self, allow: bool) -> Self {
        self.allow_circular_references = allow;
        self
    }

    pub fn allow_raw_injection_despite_wrapping(mut self, allow: bool) -> Self {
        self.allow_raw_injection_despite_wrapping = allow;
        self
    }

    pub fn lenient_constructor_resolution(mut self, lenient: bool) -> Self {
        self.lenient_constructor_resolution = lenient;
        self
    }

    pub fn allow_non_public_access(mut self, allow: bool) -> Self {
        self.allow_non_public_access = allow;
        self
    }

    pub fn allow_definition_overriding(mut self, allow: bool) -> Self {
        self.allow_definition_overriding = allow;
        self
    }
}

// =============================================================================
// Container
// =============================================================================

struct Inner {
    store: Arc<DefinitionStore>,
    registry: SingletonRegistry,
    pipeline: Pipeline,
    scopes: DashMap<String, Arc<dyn CustomScope>, RandomState>,
    types: DashMap<TypeId, Arc<ComponentType>, RandomState>,
    config: ContainerConfig,
    parent: Option<Container>,
    depth: u32,
    locked: AtomicBool,
    inner_ids: AtomicU64,
}

/// Managed-object container.
///
/// Cheap to clone; clones share all state.
///
/// # Examples
///
/// ```rust
/// use component_container::{ComponentType, Container, Descriptor};
///
/// #[derive(Default)]
/// struct Clock;
///
/// let container = Container::new();
/// container
///     .register_definition("clock", Descriptor::new(ComponentType::builder::<Clock>().default_constructor().build()))
///     .unwrap();
///
/// let a = container.get_typed::<Clock>("clock").unwrap();
/// let b = container.get_typed::<Clock>("clock").unwrap();
/// assert!(std::sync::Arc::ptr_eq(&a, &b));
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<Inner>,
}

impl Container {
    /// Create a root container with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ContainerConfig::default())
    }

    /// Create a root container.
    pub fn with_config(config: ContainerConfig) -> Self {
        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            depth = 0,
            config = ?config,
            "Creating root container"
        );

        let store = Arc::new(DefinitionStore::new(config.allow_definition_overriding));
        Self::build(store, config, None, 0)
    }

    fn build(store: Arc<DefinitionStore>, config: ContainerConfig, parent: Option<Container>, depth: u32) -> Self {
        let pipeline = Pipeline::new();
        pipeline.add(Arc::new(AutowiredPropertyProcessor));
        Self {
            inner: Arc::new(Inner {
                store,
                registry: SingletonRegistry::new(),
                pipeline,
                scopes: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
                types: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
                config,
                parent,
                depth,
                locked: AtomicBool::new(false),
                inner_ids: AtomicU64::new(0),
            }),
        }
    }

    /// Create a child container; names it does not define resolve in `self`.
    ///
    /// The child has its own shared instances and post-processors.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use component_container::{ComponentType, Container, Descriptor};
    ///
    /// #[derive(Default)]
    /// struct Settings;
    ///
    /// let root = Container::new();
    /// root.register_definition("settings", Descriptor::new(ComponentType::builder::<Settings>().default_constructor().build()))
    ///     .unwrap();
    ///
    /// let child = root.scope();
    /// assert!(child.contains("settings"));
    /// assert_eq!(child.depth(), 1);
    /// ```
    pub fn scope(&self) -> Self {
        let depth = self.inner.depth + 1;

        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            parent_depth = self.inner.depth,
            child_depth = depth,
            parent_definitions = self.inner.store.len(),
            "Creating child container"
        );

        let store = Arc::new(DefinitionStore::with_parent(
            Arc::clone(&self.inner.store),
            self.inner.config.allow_definition_overriding,
        ));
        Self::build(store, self.inner.config.clone(), Some(self.clone()), depth)
    }

    /// Nesting depth (0 = root)
    #[inline]
    pub fn depth(&self) -> u32 {
        self.inner.depth
    }

    #[inline]
    pub fn parent(&self) -> Option<&Container> {
        self.inner.parent.as_ref()
    }

    #[inline]
    pub fn config(&self) -> &ContainerConfig {
        &self.inner.config
    }

    /// Definitions registered at this level
    #[inline]
    pub fn store(&self) -> &DefinitionStore {
        &self.inner.store
    }

    /// Shared instances of this level
    #[inline]
    pub fn registry(&self) -> &SingletonRegistry {
        &self.inner.registry
    }

    #[inline]
    pub(crate) fn pipeline(&self) -> &Pipeline {
        &self.inner.pipeline
    }

    /// Converter backed by this container's type knowledge
    #[inline]
    pub fn converter(&self) -> TypeConverter<'_> {
        TypeConverter::new(self)
    }

    pub(crate) fn next_inner_id(&self) -> u64 {
        self.inner.inner_ids.fetch_add(1, Ordering::Relaxed)
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Reject further registrations.
    pub fn lock(&self) {
        self.inner.locked.store(true, Ordering::Release);

        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            depth = self.inner.depth,
            definitions = self.inner.store.len(),
            "Container locked - no further registrations allowed"
        );
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.inner.locked.load(Ordering::Acquire)
    }

    fn check_not_locked(&self, name: &str) -> Result<()> {
        if self.is_locked() {
            return Err(DiError::invalid_definition(name, "container is locked"));
        }
        Ok(())
    }

    /// Register (or replace) a definition.
    ///
    /// Replacing a definition destroys the shared instance created from it.
    pub fn register_definition(&self, name: &str, descriptor: Descriptor) -> Result<()> {
        self.check_not_locked(name)?;
        let component_type = descriptor.component_type.clone();
        let replaced = self.inner.store.register(name, descriptor)?;
        if let Some(component_type) = component_type {
            self.register_type(component_type);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            name = name,
            replaced = replaced.is_some(),
            "Registered component definition"
        );

        if replaced.is_some() || self.inner.registry.contains_singleton(name) {
            self.inner.registry.destroy_singleton(name);
        }
        Ok(())
    }

    /// Make a component type known for type queries on its instances.
    pub fn register_type(&self, component_type: Arc<ComponentType>) {
        self.inner.types.insert(component_type.key().id(), component_type);
    }

    pub fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
        self.check_not_locked(alias)?;
        self.inner.store.register_alias(name, alias)
    }

    /// Register an externally created shared instance.
    pub fn register_singleton(&self, name: &str, instance: Instance) -> Result<()> {
        self.check_not_locked(name)?;
        self.inner.registry.register_singleton(name, instance)
    }

    /// Convenience for [`register_singleton`](Self::register_singleton) with a plain value
    pub fn register_instance<T: Send + Sync + 'static>(&self, name: &str, value: T) -> Result<()> {
        self.register_singleton(name, Arc::new(value))
    }

    /// Register a custom scope under `name`.
    pub fn register_scope(&self, name: &str, scope: Arc<dyn CustomScope>) -> Result<()> {
        if matches!(ScopeKind::parse(name), ScopeKind::Singleton | ScopeKind::Prototype) {
            return Err(DiError::invalid_definition(
                name,
                "built-in scopes cannot be replaced",
            ));
        }

        #[cfg(feature = "logging")]
        debug!(target: "component_container", scope = name, "Registered custom scope");

        self.inner.scopes.insert(name.to_string(), scope);
        Ok(())
    }

    pub(crate) fn custom_scope(&self, name: &str) -> Result<Arc<dyn CustomScope>> {
        if let Some(scope) = self.inner.scopes.get(name) {
            return Ok(Arc::clone(&scope));
        }
        match &self.inner.parent {
            Some(parent) => parent.custom_scope(name),
            None => Err(DiError::invalid_definition(
                name,
                "no custom scope is registered under this name",
            )),
        }
    }

    /// Append a post-processor; handlers run in registration order.
    pub fn add_post_processor(&self, processor: Arc<dyn PostProcessor>) {
        self.inner.pipeline.add(processor);
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Instance registered under `name` (or an alias).
    pub fn get_instance(&self, name: &str) -> Result<Instance> {
        self.do_get(name, None)
    }

    /// Per-request instance created with explicit constructor arguments.
    pub fn get_instance_with_args(&self, name: &str, args: Vec<Value>) -> Result<Instance> {
        self.do_get(name, Some(args))
    }

    /// Instance for `name`, checked to be assignable to `key`.
    pub fn get_instance_of(&self, name: &str, key: &TypeKey) -> Result<Instance> {
        let instance = self.get_instance(name)?;
        if self.assignable_distance(&instance, key).is_none() {
            return Err(DiError::type_mismatch(
                name,
                key.name(),
                self.type_name_of(&instance),
            ));
        }
        Ok(instance)
    }

    /// Instance for `name` downcast to its concrete type.
    pub fn get_typed<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>> {
        let instance = self.get_instance(name)?;
        instance.downcast::<T>().map_err(|instance| {
            DiError::type_mismatch(name, std::any::type_name::<T>(), self.type_name_of(&instance))
        })
    }

    /// The single instance assignable to `key`; a primary definition breaks ties.
    pub fn get_by_type(&self, key: &TypeKey) -> Result<Instance> {
        let names = self.names_for_type(key);
        let chosen = match names.len() {
            0 => return Err(DiError::not_found(key.name())),
            1 => names[0].clone(),
            _ => determine_candidate(self, &names, None).ok_or_else(|| DiError::NoUniqueInstance {
                type_name: key.name().to_string(),
                candidates: names.clone(),
            })?,
        };
        self.get_instance(&chosen)
    }

    /// [`get_by_type`](Self::get_by_type) for a concrete type
    pub fn get_unique<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let key = TypeKey::of::<T>();
        let instance = self.get_by_type(&key)?;
        instance.downcast::<T>().map_err(|instance| {
            DiError::type_mismatch(key.name(), key.name(), self.type_name_of(&instance))
        })
    }

    fn do_get(&self, name: &str, args: Option<Vec<Value>>) -> Result<Instance> {
        let canonical = self.local_canonical(name)?;
        let registry = &self.inner.registry;

        if args.is_none() {
            if let Some(instance) =
                registry.lookup_early_or_finished(&canonical, self.inner.config.allow_circular_references)?
            {
                return Ok(instance);
            }
        }

        if PrototypeGuard::is_active(registry, &canonical) {
            return Err(DiError::ReentrantCreation {
                name: canonical.clone(),
                chain: creation_chain(&canonical),
            });
        }

        if !self.inner.store.contains(&canonical) {
            return match &self.inner.parent {
                Some(parent) => {
                    #[cfg(feature = "logging")]
                    trace!(target: "component_container", name = name, "Delegating lookup to parent container");
                    parent.do_get(name, args)
                }
                None => Err(DiError::not_found(name)),
            };
        }

        let merged = self.inner.store.resolve(&canonical)?;
        if merged.is_abstract() {
            return Err(DiError::invalid_definition(
                &canonical,
                "abstract definitions cannot be instantiated",
            ));
        }

        match merged.scope() {
            ScopeKind::Singleton => {
                if args.is_some() {
                    return Err(DiError::invalid_definition(
                        &canonical,
                        "explicit arguments are only allowed for per-request components",
                    ));
                }
                registry.get_or_create(&canonical, || Orchestrator::new(self).create(&canonical, &merged, None))
            }
            ScopeKind::Prototype => {
                let _guard = PrototypeGuard::enter(registry, &canonical)?;
                Orchestrator::new(self).create(&canonical, &merged, args)
            }
            ScopeKind::Custom(scope_name) => {
                let scope = self.custom_scope(scope_name)?;
                let mut producer = || {
                    let _guard = PrototypeGuard::enter(registry, &canonical)?;
                    Orchestrator::new(self).create(&canonical, &merged, args.clone())
                };
                scope.get(&canonical, &mut producer)
            }
        }
    }

    /// Whether `name` is defined or registered here or in an ancestor
    pub fn contains(&self, name: &str) -> bool {
        let canonical = self.canonical_name(name);
        self.inner.store.contains(&canonical)
            || self.inner.registry.contains_singleton(&canonical)
            || self.inner.parent.as_ref().is_some_and(|p| p.contains(name))
    }

    /// Whether a finished shared instance exists for `name` at this level
    pub fn contains_singleton(&self, name: &str) -> bool {
        self.inner.registry.contains_singleton(&self.canonical_name(name))
    }

    /// Whether lookups of `name` return one shared instance.
    pub fn is_singleton(&self, name: &str) -> Result<bool> {
        self.scope_of(name).map(|scope| scope.is_singleton())
    }

    /// Whether every lookup of `name` creates a new instance.
    pub fn is_prototype(&self, name: &str) -> Result<bool> {
        self.scope_of(name).map(|scope| scope.is_prototype())
    }

    fn scope_of(&self, name: &str) -> Result<ScopeKind> {
        let canonical = self.local_canonical(name)?;
        if self.inner.store.contains(&canonical) {
            return Ok(self.inner.store.resolve(&canonical)?.scope().clone());
        }
        if self.inner.registry.contains_singleton(&canonical) {
            return Ok(ScopeKind::Singleton);
        }
        match &self.inner.parent {
            Some(parent) => parent.scope_of(name),
            None => Err(DiError::not_found(name)),
        }
    }

    /// Type lookups of `name` produce, without creating anything.
    pub fn type_of(&self, name: &str) -> Result<TypeKey> {
        let canonical = self.local_canonical(name)?;
        if let Some(instance) = self.inner.registry.get_finished(&canonical) {
            if instance.is::<ForwardingProxy>() {
                return Ok(TypeKey::of::<ForwardingProxy>());
            }
            if let Some(component_type) = self.type_for_instance(&instance) {
                return Ok(component_type.key());
            }
        }
        if self.inner.store.contains(&canonical) {
            return Ok(self.inner.store.resolve(&canonical)?.target_type());
        }
        match &self.inner.parent {
            Some(parent) => parent.type_of(name),
            None => Err(DiError::not_found(name)),
        }
    }

    /// Call `method` on the instance for `name`, through its proxy if it has one.
    pub fn invoke(&self, name: &str, method: &str, args: Vec<Value>) -> Result<Value> {
        let instance = self.get_instance(name)?;
        if let Ok(proxy) = instance.clone().downcast::<ForwardingProxy>() {
            return proxy.invoke(method, args);
        }

        let component_type = self.type_for_instance(&instance).ok_or_else(|| {
            DiError::method_failed(method, format!("'{name}' has no registered component type"))
        })?;
        let target = component_type
            .find_method(method, args.len())
            .ok_or_else(|| {
                DiError::method_failed(
                    method,
                    format!("{} has no method taking {} arguments", component_type.name(), args.len()),
                )
            })?;
        let result = target.call(&instance, &Args::new(args), &CallContext::default())?;
        target.normalize_return(result)
    }

    // =========================================================================
    // Type queries
    // =========================================================================

    /// Names whose instances are assignable to `key`, in registration order.
    ///
    /// Matches against finished instances when present and against
    /// definition metadata otherwise; nothing is created.
    pub fn names_for_type(&self, key: &TypeKey) -> Vec<String> {
        let mut names = Vec::new();
        for name in self.inner.store.names() {
            let Ok(merged) = self.inner.store.resolve(&name) else {
                continue;
            };
            if !merged.is_abstract() && self.is_type_match(&name, key) {
                names.push(name);
            }
        }
        for name in self.inner.registry.singleton_names() {
            if !self.inner.store.contains(&name) && !names.contains(&name) && self.is_type_match(&name, key) {
                names.push(name);
            }
        }
        if let Some(parent) = &self.inner.parent {
            for name in parent.names_for_type(key) {
                if !names.contains(&name) && !self.inner.store.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Whether `name` yields an instance assignable to `key`.
    pub fn is_type_match(&self, name: &str, key: &TypeKey) -> bool {
        let canonical = self.canonical_name(name);
        if let Some(instance) = self.inner.registry.get_finished(&canonical) {
            return self.assignable_distance(&instance, key).is_some();
        }
        if self.inner.store.contains(&canonical) {
            let Ok(merged) = self.inner.store.resolve(&canonical) else {
                return false;
            };
            let target = merged.target_type();
            if target == *key {
                return true;
            }
            if target == merged.component_type().key() {
                return merged.component_type().is_assignable_to(key);
            }
            return self
                .inner
                .types
                .get(&target.id())
                .is_some_and(|ty| ty.is_assignable_to(key));
        }
        self.inner
            .parent
            .as_ref()
            .is_some_and(|parent| parent.is_type_match(name, key))
    }

    /// Component type of a live instance, searching ancestors too
    pub fn type_for_instance(&self, instance: &Instance) -> Option<Arc<ComponentType>> {
        let id = instance_type_id(instance);
        if let Some(component_type) = self.inner.types.get(&id) {
            return Some(Arc::clone(&component_type));
        }
        self.inner.parent.as_ref()?.type_for_instance(instance)
    }

    /// Merged view of `name`, searching ancestors too
    pub fn merged(&self, name: &str) -> Option<Arc<MergedDescriptor>> {
        let canonical = self.canonical_name(name);
        if self.inner.store.contains(&canonical) {
            return self.inner.store.resolve(&canonical).ok();
        }
        self.inner.parent.as_ref()?.merged(name)
    }

    pub(crate) fn is_primary(&self, name: &str) -> bool {
        self.merged(name).is_some_and(|m| m.is_primary())
    }

    // =========================================================================
    // Names
    // =========================================================================

    fn local_canonical(&self, name: &str) -> Result<String> {
        self.inner.store.canonical_name(name)
    }

    /// Registered name behind `name`, following aliases here and in ancestors.
    pub fn canonical_name(&self, name: &str) -> String {
        let canonical = self
            .inner
            .store
            .canonical_name(name)
            .unwrap_or_else(|_| name.to_string());
        if self.inner.store.contains(&canonical) || self.inner.registry.contains_singleton(&canonical) {
            return canonical;
        }
        match &self.inner.parent {
            Some(parent) => parent.canonical_name(&canonical),
            None => canonical,
        }
    }

    /// Whether two names refer to the same component
    pub(crate) fn is_same_name(&self, a: &str, b: &str) -> bool {
        a == b || self.canonical_name(a) == self.canonical_name(b)
    }

    /// Definition names at this level in registration order
    pub fn definition_names(&self) -> Vec<String> {
        self.inner.store.names()
    }

    /// Names that depend on `name`
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.inner.registry.dependents_of(&self.canonical_name(name))
    }

    /// Names `name` depends on
    pub fn dependencies_of(&self, name: &str) -> Vec<String> {
        self.inner.registry.dependencies_of(&self.canonical_name(name))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create every non-lazy, non-abstract shared component now.
    pub fn preinstantiate_singletons(&self) -> Result<()> {
        let names = self.inner.store.names();

        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            definitions = names.len(),
            "Pre-instantiating shared components"
        );

        for name in names {
            let merged = self.inner.store.resolve(&name)?;
            if !merged.is_abstract() && merged.scope().is_singleton() && !merged.is_lazy() {
                self.get_instance(&name)?;
            }
        }
        Ok(())
    }

    /// Dispose every shared instance in reverse registration order.
    ///
    /// Safe to call more than once.
    pub fn shutdown(&self) {
        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            depth = self.inner.depth,
            instances = self.inner.registry.singleton_count(),
            "Shutting down container"
        );

        self.inner.registry.destroy_singletons();
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeLookup for Container {
    fn assignable_distance(&self, instance: &Instance, key: &TypeKey) -> Option<u32> {
        if instance_type_id(instance) == key.id() {
            return Some(0);
        }
        if let Some(proxy) = (**instance).downcast_ref::<ForwardingProxy>() {
            return proxy.assignable_distance(key);
        }
        self.type_for_instance(instance)?.assignable_distance(key)
    }

    fn type_name_of(&self, instance: &Instance) -> String {
        if let Some(proxy) = (**instance).downcast_ref::<ForwardingProxy>() {
            return format!("proxy of {}", proxy.decorated_type_name());
        }
        self.type_for_instance(instance)
            .map(|ty| ty.name().to_string())
            .unwrap_or_else(|| "unregistered type".to_string())
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("depth", &self.inner.depth)
            .field("definitions", &self.inner.store.len())
            .field("instances", &self.inner.registry.singleton_count())
            .field("post_processors", &self.inner.pipeline.len())
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{MethodSpec, Param};
    use crate::descriptor::ValueSpec;
    use crate::scope::ContextScope;
    use crate::value::ValueType;
    use std::sync::atomic::AtomicUsize;

    trait Greeter: Send + Sync {}

    #[derive(Default)]
    struct English;
    impl Greeter for English {}

    fn english_type() -> Arc<ComponentType> {
        ComponentType::builder::<English>()
            .default_constructor()
            .implements::<dyn Greeter>()
            .method(
                MethodSpec::new("greet").param(ValueType::Str).returns(ValueType::Str),
                |call| Ok(Value::Str(format!("Hello, {}", call.args.str(0)?))),
            )
            .build()
    }

    #[test]
    fn test_singleton_identity() {
        let container = Container::new();
        container
            .register_definition("english", Descriptor::new(english_type()))
            .unwrap();

        let a = container.get_instance("english").unwrap();
        let b = container.get_instance("english").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(container.is_singleton("english").unwrap());
    }

    #[test]
    fn test_prototype_creates_new_instances() {
        let container = Container::new();
        container
            .register_definition("english", Descriptor::new(english_type()).prototype())
            .unwrap();

        let a = container.get_instance("english").unwrap();
        let b = container.get_instance("english").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert!(container.is_prototype("english").unwrap());
        assert!(!container.contains_singleton("english"));
    }

    #[test]
    fn test_not_found() {
        let container = Container::new();
        assert!(matches!(
            container.get_instance("missing"),
            Err(DiError::DefinitionNotFound { .. })
        ));
        assert!(!container.contains("missing"));
    }

    #[test]
    fn test_alias_lookup() {
        let container = Container::new();
        container
            .register_definition("english", Descriptor::new(english_type()))
            .unwrap();
        container.register_alias("english", "greeter").unwrap();

        let a = container.get_instance("english").unwrap();
        let b = container.get_instance("greeter").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_get_by_type_and_names_for_type() {
        let container = Container::new();
        container
            .register_definition("english", Descriptor::new(english_type()))
            .unwrap();
        let key = TypeKey::of::<dyn Greeter>();

        assert_eq!(container.names_for_type(&key), vec!["english"]);
        assert!(container.get_by_type(&key).is_ok());
        assert!(container.get_unique::<English>().is_ok());

        container
            .register_definition("other", Descriptor::new(english_type()))
            .unwrap();
        assert!(matches!(
            container.get_by_type(&key),
            Err(DiError::NoUniqueInstance { .. })
        ));
    }

    #[test]
    fn test_get_instance_of_checks_type() {
        let container = Container::new();
        container
            .register_definition("english", Descriptor::new(english_type()))
            .unwrap();

        assert!(container.get_instance_of("english", &TypeKey::of::<dyn Greeter>()).is_ok());
        assert!(matches!(
            container.get_instance_of("english", &TypeKey::of::<String>()),
            Err(DiError::TypeMismatch { .. })
        ));
        assert!(container.get_typed::<String>("english").is_err());
    }

    #[test]
    fn test_invoke_method() {
        let container = Container::new();
        container
            .register_definition("english", Descriptor::new(english_type()))
            .unwrap();

        let greeting = container
            .invoke("english", "greet", vec![Value::from("Ada")])
            .unwrap();
        assert_eq!(greeting, Value::Str("Hello, Ada".into()));
        assert!(container.invoke("english", "shout", vec![]).is_err());
    }

    #[test]
    fn test_abstract_definition_rejected() {
        let container = Container::new();
        container
            .register_definition("base", Descriptor::new(english_type()).abstract_definition())
            .unwrap();

        assert!(matches!(
            container.get_instance("base"),
            Err(DiError::DefinitionMerge { .. })
        ));
        assert!(container.names_for_type(&TypeKey::of::<English>()).is_empty());
    }

    #[test]
    fn test_redefinition_destroys_shared_instance() {
        let container = Container::new();
        container
            .register_definition("english", Descriptor::new(english_type()))
            .unwrap();
        let first = container.get_instance("english").unwrap();

        container
            .register_definition("english", Descriptor::new(english_type()))
            .unwrap();
        let second = container.get_instance("english").unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_overriding_disabled() {
        let container = Container::with_config(ContainerConfig::default().allow_definition_overriding(false));
        container
            .register_definition("english", Descriptor::new(english_type()))
            .unwrap();
        assert!(container
            .register_definition("english", Descriptor::new(english_type()))
            .is_err());
    }

    #[test]
    fn test_locked_container_rejects_registration() {
        let container = Container::new();
        container.lock();
        assert!(container.is_locked());
        assert!(container
            .register_definition("english", Descriptor::new(english_type()))
            .is_err());
    }

    #[test]
    fn test_child_container_falls_back_to_parent() {
        let root = Container::new();
        root.register_definition("english", Descriptor::new(english_type()))
            .unwrap();

        let child = root.scope();
        let from_child = child.get_instance("english").unwrap();
        let from_root = root.get_instance("english").unwrap();
        assert!(Arc::ptr_eq(&from_child, &from_root));
        assert_eq!(child.names_for_type(&TypeKey::of::<English>()), vec!["english"]);

        // a child definition shadows the parent's
        child
            .register_definition("english", Descriptor::new(english_type()))
            .unwrap();
        let shadowed = child.get_instance("english").unwrap();
        assert!(!Arc::ptr_eq(&shadowed, &from_root));
    }

    #[test]
    fn test_registered_instance() {
        let container = Container::new();
        container.register_instance("answer", 42u32).unwrap();

        assert_eq!(*container.get_typed::<u32>("answer").unwrap(), 42);
        assert!(container.is_singleton("answer").unwrap());
        assert!(container.register_instance("answer", 7u32).is_err());
    }

    #[test]
    fn test_preinstantiate_skips_lazy() {
        static CREATED: AtomicUsize = AtomicUsize::new(0);

        struct Counted;
        let ty = ComponentType::builder::<Counted>()
            .constructor([], |_| {
                CREATED.fetch_add(1, Ordering::SeqCst);
                Ok(Counted)
            })
            .build();

        let container = Container::new();
        container
            .register_definition("eager", Descriptor::new(Arc::clone(&ty)))
            .unwrap();
        container
            .register_definition("lazy", Descriptor::new(Arc::clone(&ty)).lazy())
            .unwrap();
        container
            .register_definition("request", Descriptor::new(ty).prototype())
            .unwrap();

        container.preinstantiate_singletons().unwrap();
        assert_eq!(CREATED.load(Ordering::SeqCst), 1);
        assert!(container.contains_singleton("eager"));
        assert!(!container.contains_singleton("lazy"));
    }

    #[test]
    fn test_custom_scope() {
        let container = Container::new();
        let scope = Arc::new(ContextScope::new("request"));
        container.register_scope("request", scope.clone()).unwrap();
        container
            .register_definition(
                "english",
                Descriptor::new(english_type()).with_scope(ScopeKind::parse("request")),
            )
            .unwrap();

        assert!(matches!(
            container.get_instance("english").unwrap_err().root_cause(),
            DiError::ScopeNotActive { .. }
        ));

        let id = scope.begin();
        let _entered = scope.enter(id);
        let a = container.get_instance("english").unwrap();
        let b = container.get_instance("english").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_unknown_scope() {
        let container = Container::new();
        container
            .register_definition(
                "english",
                Descriptor::new(english_type()).with_scope(ScopeKind::parse("conversation")),
            )
            .unwrap();
        assert!(matches!(
            container.get_instance("english"),
            Err(DiError::DefinitionMerge { .. })
        ));
        assert!(container.register_scope("singleton", Arc::new(ContextScope::new("x"))).is_err());
    }

    #[test]
    fn test_type_of_without_creation() {
        struct Wrapper {
            inner: String,
        }
        let ty = ComponentType::builder::<Wrapper>()
            .constructor([Param::new("inner", ValueType::Str)], |args| {
                Ok(Wrapper {
                    inner: args.str(0)?.to_string(),
                })
            })
            .build();

        let container = Container::new();
        container
            .register_definition("wrapper", Descriptor::new(ty).with_arg_at(0, ValueSpec::value("x")))
            .unwrap();

        assert_eq!(container.type_of("wrapper").unwrap(), TypeKey::of::<Wrapper>());
        assert!(!container.contains_singleton("wrapper"));
        assert_eq!(container.get_typed::<Wrapper>("wrapper").unwrap().inner, "x");
    }
}
