//! Component descriptors
//!
//! A [`Descriptor`] is the declarative recipe for one named component. The
//! definition store flattens parent chains into a [`MergedDescriptor`],
//! which also carries the resolver's per-definition caches.

use crate::component::{ComponentType, Creator, Param};
use crate::value::{TypeKey, Value, ValueType};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Lifetime policy of a component.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// One shared instance per container
    #[default]
    Singleton,
    /// A fresh instance per request
    Prototype,
    /// Delegated to a registered custom scope
    Custom(String),
}

impl ScopeKind {
    /// Parse a scope name; anything but `singleton`/`prototype` is custom.
    pub fn parse(name: &str) -> Self {
        match name {
            "singleton" | "" => Self::Singleton,
            "prototype" => Self::Prototype,
            other => Self::Custom(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Singleton => "singleton",
            Self::Prototype => "prototype",
            Self::Custom(name) => name,
        }
    }

    #[inline]
    pub fn is_singleton(&self) -> bool {
        matches!(self, Self::Singleton)
    }

    #[inline]
    pub fn is_prototype(&self) -> bool {
        matches!(self, Self::Prototype)
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How unspecified dependencies are filled in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AutowireMode {
    #[default]
    No,
    /// Properties take the instance registered under the property's name
    ByName,
    /// Properties take the unique instance of their declared type
    ByType,
    /// Constructor parameters are resolved by type
    Constructor,
}

/// A declared value for a constructor argument or property.
#[derive(Clone, Debug, PartialEq)]
pub enum ValueSpec {
    /// A literal, converted to the declared type on binding
    Value(Value),
    /// Another component, by name
    Reference(String),
    /// An anonymous component created for this slot only
    Inner(Box<Descriptor>),
    /// A list of specs
    List(Vec<ValueSpec>),
}

impl ValueSpec {
    #[inline]
    pub fn value(value: impl Into<Value>) -> Self {
        Self::Value(value.into())
    }

    #[inline]
    pub fn reference(name: impl Into<String>) -> Self {
        Self::Reference(name.into())
    }

    #[inline]
    pub fn inner(descriptor: Descriptor) -> Self {
        Self::Inner(Box::new(descriptor))
    }

    /// True when the spec holds only literals
    pub fn is_literal(&self) -> bool {
        match self {
            Self::Value(_) => true,
            Self::List(items) => items.iter().all(Self::is_literal),
            Self::Reference(_) | Self::Inner(_) => false,
        }
    }
}

impl<T: Into<Value>> From<T> for ValueSpec {
    fn from(value: T) -> Self {
        Self::Value(value.into())
    }
}

/// A constructor argument with optional type and name hints.
#[derive(Clone, Debug, PartialEq)]
pub struct ArgSpec {
    pub value: ValueSpec,
    pub ty: Option<ValueType>,
    pub name: Option<String>,
}

impl ArgSpec {
    pub fn new(value: impl Into<ValueSpec>) -> Self {
        Self {
            value: value.into(),
            ty: None,
            name: None,
        }
    }

    /// Only bind to parameters of this declared type
    pub fn typed(mut self, ty: ValueType) -> Self {
        self.ty = Some(ty);
        self
    }

    /// Only bind to parameters of this name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Whether the hints allow binding to `param`
    pub fn fits(&self, param: &Param) -> bool {
        self.ty.as_ref().is_none_or(|ty| *ty == param.ty)
            && self.name.as_deref().is_none_or(|name| name == param.name)
    }
}

/// Declared constructor arguments: indexed and generic.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConstructorArgs {
    indexed: BTreeMap<usize, ArgSpec>,
    generic: Vec<ArgSpec>,
}

impl ConstructorArgs {
    pub fn add_indexed(&mut self, index: usize, spec: ArgSpec) {
        self.indexed.insert(index, spec);
    }

    pub fn add_generic(&mut self, spec: ArgSpec) {
        if !self.generic.contains(&spec) {
            self.generic.push(spec);
        }
    }

    #[inline]
    pub fn indexed(&self, index: usize) -> Option<&ArgSpec> {
        self.indexed.get(&index)
    }

    #[inline]
    pub fn indexed_args(&self) -> &BTreeMap<usize, ArgSpec> {
        &self.indexed
    }

    #[inline]
    pub fn generic(&self) -> &[ArgSpec] {
        &self.generic
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indexed.is_empty() && self.generic.is_empty()
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.indexed.len() + self.generic.len()
    }

    /// Fewest parameters a candidate may have to accept every declared argument
    pub fn min_arg_count(&self) -> usize {
        let highest = self.indexed.keys().next_back().map_or(0, |i| i + 1);
        highest.max(self.count())
    }

    /// Overlay `other` onto `self`: indexed entries replace, generic ones append.
    pub fn merge(&mut self, other: &ConstructorArgs) {
        for (index, spec) in &other.indexed {
            self.indexed.insert(*index, spec.clone());
        }
        for spec in &other.generic {
            self.add_generic(spec.clone());
        }
    }
}

/// Declared property values in declaration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PropertyValues {
    entries: Vec<(String, ValueSpec)>,
}

impl PropertyValues {
    /// Add or replace the value for `name`
    pub fn add(&mut self, name: impl Into<String>, spec: ValueSpec) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = spec,
            None => self.entries.push((name, spec)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ValueSpec> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ValueSpec)> {
        self.entries.iter().map(|(n, s)| (n.as_str(), s))
    }

    pub fn merge(&mut self, other: &PropertyValues) {
        for (name, spec) in &other.entries {
            self.add(name.clone(), spec.clone());
        }
    }
}

/// Declarative description of one component.
///
/// # Examples
///
/// ```rust
/// use component_container::{ComponentType, Descriptor, ScopeKind, ValueSpec};
///
/// #[derive(Default)]
/// struct Mailer;
///
/// let ty = ComponentType::builder::<Mailer>().default_constructor().build();
/// let descriptor = Descriptor::new(ty)
///     .with_scope(ScopeKind::Prototype)
///     .with_depends_on(["config"])
///     .lazy();
///
/// assert!(descriptor.lazy == Some(true));
/// ```
#[derive(Clone, Default, PartialEq)]
pub struct Descriptor {
    pub component_type: Option<Arc<ComponentType>>,
    pub scope: Option<ScopeKind>,
    pub lazy: Option<bool>,
    pub is_abstract: bool,
    pub primary: bool,
    pub autowire: Option<AutowireMode>,
    pub dependency_check: bool,
    pub parent: Option<String>,
    pub constructor_args: ConstructorArgs,
    pub properties: PropertyValues,
    pub depends_on: Vec<String>,
    pub init_method: Option<String>,
    pub destroy_method: Option<String>,
    pub enforce_init_method: bool,
    pub enforce_destroy_method: bool,
    pub factory_bean: Option<String>,
    pub factory_method: Option<String>,
}

impl Descriptor {
    /// Descriptor for a component of the given type
    pub fn new(component_type: Arc<ComponentType>) -> Self {
        Self {
            component_type: Some(component_type),
            ..Self::blank()
        }
    }

    /// Descriptor that inherits everything unset from `parent`
    pub fn child(parent: impl Into<String>) -> Self {
        Self {
            parent: Some(parent.into()),
            ..Self::blank()
        }
    }

    fn blank() -> Self {
        Self {
            enforce_init_method: true,
            enforce_destroy_method: true,
            ..Self::default()
        }
    }

    pub fn with_type(mut self, component_type: Arc<ComponentType>) -> Self {
        self.component_type = Some(component_type);
        self
    }

    pub fn with_scope(mut self, scope: ScopeKind) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn prototype(self) -> Self {
        self.with_scope(ScopeKind::Prototype)
    }

    pub fn lazy(mut self) -> Self {
        self.lazy = Some(true);
        self
    }

    pub fn abstract_definition(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    pub fn with_autowire(mut self, mode: AutowireMode) -> Self {
        self.autowire = Some(mode);
        self
    }

    pub fn with_dependency_check(mut self) -> Self {
        self.dependency_check = true;
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Constructor argument at a fixed position
    pub fn with_arg_at(mut self, index: usize, spec: impl Into<ArgSpec>) -> Self {
        self.constructor_args.add_indexed(index, spec.into());
        self
    }

    /// Constructor argument matched to any parameter it fits
    pub fn with_arg(mut self, spec: impl Into<ArgSpec>) -> Self {
        self.constructor_args.add_generic(spec.into());
        self
    }

    pub fn with_property(mut self, name: impl Into<String>, spec: impl Into<ValueSpec>) -> Self {
        self.properties.add(name, spec.into());
        self
    }

    /// Property referring to another component by name
    pub fn with_reference(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.properties.add(name, ValueSpec::Reference(target.into()));
        self
    }

    pub fn with_depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn with_init_method(mut self, name: impl Into<String>) -> Self {
        self.init_method = Some(name.into());
        self
    }

    pub fn with_destroy_method(mut self, name: impl Into<String>) -> Self {
        self.destroy_method = Some(name.into());
        self
    }

    /// A missing init method is skipped instead of failing creation
    pub fn lenient_init_method(mut self) -> Self {
        self.enforce_init_method = false;
        self
    }

    /// A missing destroy method is skipped instead of failing creation
    pub fn lenient_destroy_method(mut self) -> Self {
        self.enforce_destroy_method = false;
        self
    }

    /// Produce the instance with a static factory method on the component type
    pub fn with_factory_method(mut self, method: impl Into<String>) -> Self {
        self.factory_method = Some(method.into());
        self
    }

    /// Produce the instance by calling `method` on the component named `owner`
    pub fn with_factory(mut self, owner: impl Into<String>, method: impl Into<String>) -> Self {
        self.factory_bean = Some(owner.into());
        self.factory_method = Some(method.into());
        self
    }

    /// Overlay the settings `child` defines onto `self`.
    pub fn override_from(&mut self, child: &Descriptor) {
        if child.component_type.is_some() {
            self.component_type.clone_from(&child.component_type);
        }
        if child.scope.is_some() {
            self.scope.clone_from(&child.scope);
        }
        if child.lazy.is_some() {
            self.lazy = child.lazy;
        }
        if child.autowire.is_some() {
            self.autowire = child.autowire;
        }
        if child.factory_bean.is_some() {
            self.factory_bean.clone_from(&child.factory_bean);
        }
        if child.factory_method.is_some() {
            self.factory_method.clone_from(&child.factory_method);
        }
        if child.init_method.is_some() {
            self.init_method.clone_from(&child.init_method);
            self.enforce_init_method = child.enforce_init_method;
        }
        if child.destroy_method.is_some() {
            self.destroy_method.clone_from(&child.destroy_method);
            self.enforce_destroy_method = child.enforce_destroy_method;
        }
        self.is_abstract = child.is_abstract;
        self.primary = child.primary;
        self.dependency_check = child.dependency_check;
        self.constructor_args.merge(&child.constructor_args);
        self.properties.merge(&child.properties);
        if !child.depends_on.is_empty() {
            self.depends_on.clone_from(&child.depends_on);
        }
        self.parent = None;
    }

    /// Short type description for errors and logs
    pub fn type_name(&self) -> &'static str {
        self.component_type.as_ref().map_or("<unset>", |t| t.name())
    }
}

impl fmt::Debug for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Descriptor")
            .field("type", &self.type_name())
            .field("scope", &self.scope)
            .field("lazy", &self.lazy)
            .field("abstract", &self.is_abstract)
            .field("primary", &self.primary)
            .field("autowire", &self.autowire)
            .field("parent", &self.parent)
            .field("constructor_args", &self.constructor_args.count())
            .field("properties", &self.properties.len())
            .field("depends_on", &self.depends_on)
            .field("factory_bean", &self.factory_bean)
            .field("factory_method", &self.factory_method)
            .finish()
    }
}

impl From<ValueSpec> for ArgSpec {
    fn from(value: ValueSpec) -> Self {
        Self::new(value)
    }
}

impl From<Value> for ArgSpec {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

impl From<&str> for ArgSpec {
    fn from(value: &str) -> Self {
        Self::new(Value::from(value))
    }
}

impl From<i64> for ArgSpec {
    fn from(value: i64) -> Self {
        Self::new(Value::Int(value))
    }
}

// =============================================================================
// Merged view and resolution caches
// =============================================================================

/// How one constructor argument is produced on a cached creation.
#[derive(Clone, Debug)]
pub(crate) enum ArgRecipe {
    /// A literal already converted to the parameter type
    Ready(Value),
    /// A reference or inner component, resolved anew each time
    Spec(ValueSpec, ValueType),
    /// Autowired by type
    Autowired(Param),
}

/// The chosen creator and how to rebuild its arguments.
#[derive(Clone, Debug)]
pub(crate) struct ResolvedCreator {
    pub(crate) creator: Arc<Creator>,
    pub(crate) recipe: Vec<ArgRecipe>,
}

/// A flattened descriptor plus per-definition resolution caches.
pub struct MergedDescriptor {
    name: String,
    def: Descriptor,
    component_type: Arc<ComponentType>,
    scope: ScopeKind,
    autowire: AutowireMode,
    lazy: bool,
    stale: AtomicBool,
    post_processed: AtomicBool,
    pub(crate) resolved: Mutex<Option<ResolvedCreator>>,
    pub(crate) target_type_hint: Mutex<Option<TypeKey>>,
    pub(crate) factory_hint: Mutex<Option<Arc<Creator>>>,
}

impl MergedDescriptor {
    pub(crate) fn new(name: &str, def: Descriptor, component_type: Arc<ComponentType>) -> Self {
        let scope = def.scope.clone().unwrap_or_default();
        let autowire = def.autowire.unwrap_or_default();
        let lazy = def.lazy.unwrap_or(false);
        Self {
            name: name.to_string(),
            def,
            component_type,
            scope,
            autowire,
            lazy,
            stale: AtomicBool::new(false),
            post_processed: AtomicBool::new(false),
            resolved: Mutex::new(None),
            target_type_hint: Mutex::new(None),
            factory_hint: Mutex::new(None),
        }
    }

    /// Carry type hints over from a stale merge of the same component type.
    pub(crate) fn inherit_hints(&self, previous: &MergedDescriptor) {
        if !Arc::ptr_eq(&self.component_type, &previous.component_type) {
            return;
        }
        *self.target_type_hint.lock() = *previous.target_type_hint.lock();
        *self.factory_hint.lock() = previous.factory_hint.lock().clone();
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The flattened descriptor
    #[inline]
    pub fn descriptor(&self) -> &Descriptor {
        &self.def
    }

    #[inline]
    pub fn component_type(&self) -> &Arc<ComponentType> {
        &self.component_type
    }

    #[inline]
    pub fn scope(&self) -> &ScopeKind {
        &self.scope
    }

    #[inline]
    pub fn autowire(&self) -> AutowireMode {
        self.autowire
    }

    #[inline]
    pub fn is_lazy(&self) -> bool {
        self.lazy
    }

    #[inline]
    pub fn is_abstract(&self) -> bool {
        self.def.is_abstract
    }

    #[inline]
    pub fn is_primary(&self) -> bool {
        self.def.primary
    }

    #[inline]
    pub fn is_stale(&self) -> bool {
        self.stale.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    /// Set once the merged-definition post-processing ran
    #[inline]
    pub fn is_post_processed(&self) -> bool {
        self.post_processed.load(Ordering::Acquire)
    }

    #[inline]
    pub(crate) fn set_post_processed(&self) {
        self.post_processed.store(true, Ordering::Release);
    }

    /// Type the instance will have: the factory's product or the component type
    pub fn target_type(&self) -> TypeKey {
        (*self.target_type_hint.lock()).unwrap_or_else(|| self.component_type.key())
    }

    pub(crate) fn cached_resolution(&self) -> Option<ResolvedCreator> {
        self.resolved.lock().clone()
    }

    pub(crate) fn cache_resolution(&self, resolved: ResolvedCreator) {
        *self.target_type_hint.lock() = Some(resolved.creator.returns());
        if self.def.factory_method.is_some() {
            *self.factory_hint.lock() = Some(Arc::clone(&resolved.creator));
        }
        *self.resolved.lock() = Some(resolved);
    }
}

impl PartialEq for MergedDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.def == other.def
            && self.scope == other.scope
            && self.autowire == other.autowire
            && self.lazy == other.lazy
    }
}

impl fmt::Debug for MergedDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MergedDescriptor")
            .field("name", &self.name)
            .field("type", &self.component_type.name())
            .field("scope", &self.scope)
            .field("autowire", &self.autowire)
            .field("lazy", &self.lazy)
            .field("stale", &self.is_stale())
            .finish()
    }
}
