//! Dependency resolution and property injection
//!
//! Shared by the constructor resolver (parameters) and the property
//! injector (setters): resolving declared value specs, finding the unique
//! instance of a type, and binding converted values to properties.

use crate::component::{Param, Property};
use crate::container::Container;
use crate::descriptor::{AutowireMode, MergedDescriptor, PropertyValues, ValueSpec};
use crate::lifecycle::Orchestrator;
use crate::processor::{PostProcessor, ProcessContext, Stages};
use crate::value::{Instance, TypeKey, Value, ValueType};
use crate::{DiError, Result};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// What a parameter or property needs from the container.
#[derive(Clone, Debug)]
pub struct DependencyDescriptor {
    /// Declared type
    pub ty: ValueType,
    /// Parameter or property name; breaks ties between candidates
    pub name: Option<String>,
    /// Absence or ambiguity is an error
    pub required: bool,
    /// A `List` with no matches resolves to an empty list
    pub empty_collection_fallback: bool,
    /// Slot description for error messages
    pub target: String,
}

impl DependencyDescriptor {
    /// Constructor or factory parameter at `index`
    pub fn for_param(index: usize, param: &Param) -> Self {
        Self {
            ty: param.ty.clone(),
            name: Some(param.name.clone()),
            required: true,
            empty_collection_fallback: true,
            target: format!("parameter {index} '{}'", param.name),
        }
    }

    /// Settable property
    pub fn for_property(property: &Property, required: bool) -> Self {
        Self {
            ty: property.ty().clone(),
            name: Some(property.name().to_string()),
            required,
            empty_collection_fallback: false,
            target: format!("property '{}'", property.name()),
        }
    }
}

/// Resolve `dependency` for the component `requester`.
///
/// Returns the value and the names it was resolved from, or `None` when
/// nothing qualifies and the dependency is optional. `List` types collect
/// every match in registration order.
pub(crate) fn resolve_dependency(
    container: &Container,
    requester: &str,
    dependency: &DependencyDescriptor,
) -> Result<Option<(Value, Vec<String>)>> {
    match &dependency.ty {
        ValueType::List(element) => {
            let ValueType::Component(key) = element.as_ref() else {
                return Ok(None);
            };
            let names = candidates(container, requester, key);
            if names.is_empty() {
                if dependency.empty_collection_fallback {
                    return Ok(Some((Value::List(Vec::new()), Vec::new())));
                }
                return no_match(requester, dependency, key);
            }
            let values = names
                .iter()
                .map(|n| container.get_instance(n).map(Value::Object))
                .collect::<Result<Vec<_>>>()?;
            Ok(Some((Value::List(values), names)))
        }
        ValueType::Component(key) => {
            let names = candidates(container, requester, key);
            let chosen = match names.len() {
                0 => return no_match(requester, dependency, key),
                1 => names[0].clone(),
                _ => match determine_candidate(container, &names, dependency.name.as_deref()) {
                    Some(chosen) => chosen,
                    None if dependency.required => {
                        return Err(DiError::NoUniqueInstance {
                            type_name: key.name().to_string(),
                            candidates: names,
                        });
                    }
                    None => return Ok(None),
                },
            };

            #[cfg(feature = "logging")]
            trace!(
                target: "component_container",
                requester = requester,
                dependency = %dependency.target,
                resolved = %chosen,
                "Resolved dependency by type"
            );

            let instance = container.get_instance(&chosen)?;
            Ok(Some((Value::Object(instance), vec![chosen])))
        }
        _ => Ok(None),
    }
}

fn no_match<T>(requester: &str, dependency: &DependencyDescriptor, key: &TypeKey) -> Result<Option<T>> {
    if dependency.required {
        Err(DiError::unsatisfied(
            requester,
            &dependency.target,
            format!("no component of type {key} is registered"),
        ))
    } else {
        Ok(None)
    }
}

/// Names matching `key`, excluding the requester unless it is the only match.
fn candidates(container: &Container, requester: &str, key: &TypeKey) -> Vec<String> {
    let all = container.names_for_type(key);
    let others: Vec<String> = all
        .iter()
        .filter(|n| !container.is_same_name(n, requester))
        .cloned()
        .collect();
    if others.is_empty() { all } else { others }
}

/// Pick one of several candidates: the single primary, else the one named `preferred`.
pub(crate) fn determine_candidate(
    container: &Container,
    names: &[String],
    preferred: Option<&str>,
) -> Option<String> {
    let primaries: Vec<&String> = names.iter().filter(|n| container.is_primary(n)).collect();
    if primaries.len() == 1 {
        return Some(primaries[0].clone());
    }
    let preferred = preferred?;
    names
        .iter()
        .find(|n| container.is_same_name(n, preferred))
        .cloned()
}

// =============================================================================
// Declared values
// =============================================================================

/// Turns declared [`ValueSpec`]s into values for one owning component.
pub(crate) struct ValueResolver<'a> {
    container: &'a Container,
    owner: &'a str,
    merged: &'a MergedDescriptor,
}

impl<'a> ValueResolver<'a> {
    pub(crate) fn new(container: &'a Container, owner: &'a str, merged: &'a MergedDescriptor) -> Self {
        Self {
            container,
            owner,
            merged,
        }
    }

    /// Resolve `spec` for a slot of type `ty`; the result is not yet converted.
    pub(crate) fn resolve(&self, spec: &ValueSpec, ty: &ValueType, context: &str) -> Result<Value> {
        match spec {
            ValueSpec::Value(value) => Ok(value.clone()),
            ValueSpec::Reference(name) => {
                let instance = self.container.get_instance(name)?;
                let canonical = self.container.canonical_name(name);
                self.container
                    .registry()
                    .register_dependency(&canonical, self.owner);
                Ok(Value::Object(instance))
            }
            ValueSpec::Inner(descriptor) => {
                let inner_name = format!("{}#inner#{}", self.owner, self.container.next_inner_id());
                let merged = self
                    .container
                    .store()
                    .merge_inner(self.merged, &inner_name, descriptor)?;

                #[cfg(feature = "logging")]
                debug!(
                    target: "component_container",
                    owner = self.owner,
                    inner = %inner_name,
                    context = context,
                    "Creating inner component"
                );

                let instance = Orchestrator::new(self.container).create(&inner_name, &merged, None)?;
                if merged.scope().is_singleton() {
                    self.container
                        .registry()
                        .register_contained(&inner_name, self.owner);
                }
                Ok(Value::Object(instance))
            }
            ValueSpec::List(items) => {
                let element = match ty {
                    ValueType::List(element) => element.as_ref().clone(),
                    _ => ValueType::Any,
                };
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| self.resolve(item, &element, &format!("{context}[{i}]")))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::List)
            }
        }
    }

    /// Resolve and convert in one step.
    pub(crate) fn resolve_converted(&self, spec: &ValueSpec, ty: &ValueType, context: &str) -> Result<Value> {
        let raw = self.resolve(spec, ty, context)?;
        self.container.converter().convert(raw, ty, context)
    }
}

// =============================================================================
// Property injection
// =============================================================================

/// Binds property values to a freshly constructed instance.
pub(crate) struct PropertyInjector<'a> {
    container: &'a Container,
}

impl<'a> PropertyInjector<'a> {
    pub(crate) fn new(container: &'a Container) -> Self {
        Self { container }
    }

    /// Autowire, run the properties stage, check, convert and assign.
    pub(crate) fn populate(&self, name: &str, merged: &Arc<MergedDescriptor>, instance: &Instance) -> Result<()> {
        let pipeline = self.container.pipeline();
        let ctx = ProcessContext {
            name,
            merged,
            container: self.container,
        };

        if pipeline.has(Stages::AFTER_INSTANTIATION) && !pipeline.apply_after_instantiation(instance, &ctx)? {
            return Ok(());
        }

        let mut properties = merged.descriptor().properties.clone();
        match merged.autowire() {
            AutowireMode::ByName => self.autowire_by_name(name, merged, &mut properties)?,
            AutowireMode::ByType => self.autowire_by_type(name, merged, &mut properties)?,
            AutowireMode::No | AutowireMode::Constructor => {}
        }

        if pipeline.has(Stages::PROPERTIES) {
            properties = pipeline.apply_properties(instance, properties, &ctx)?;
        }

        if merged.descriptor().dependency_check {
            self.check_dependencies(name, merged, &properties)?;
        }

        self.apply(name, merged, instance, &properties)
    }

    /// Properties eligible for autowiring: not simple and not declared.
    fn unsatisfied<'m>(merged: &'m MergedDescriptor, properties: &PropertyValues) -> Vec<&'m Arc<Property>> {
        merged
            .component_type()
            .properties()
            .iter()
            .filter(|p| !p.ty().is_simple() && !properties.contains(p.name()))
            .collect()
    }

    fn autowire_by_name(&self, name: &str, merged: &MergedDescriptor, properties: &mut PropertyValues) -> Result<()> {
        for property in Self::unsatisfied(merged, properties) {
            if !self.container.contains(property.name()) {
                #[cfg(feature = "logging")]
                trace!(
                    target: "component_container",
                    name = name,
                    property = property.name(),
                    "No component matches property name; skipping"
                );
                continue;
            }
            let instance = self.container.get_instance(property.name())?;
            let canonical = self.container.canonical_name(property.name());
            self.container.registry().register_dependency(&canonical, name);

            #[cfg(feature = "logging")]
            debug!(
                target: "component_container",
                name = name,
                property = property.name(),
                "Autowired property by name"
            );

            properties.add(property.name(), ValueSpec::Value(Value::Object(instance)));
        }
        Ok(())
    }

    fn autowire_by_type(&self, name: &str, merged: &MergedDescriptor, properties: &mut PropertyValues) -> Result<()> {
        for property in Self::unsatisfied(merged, properties) {
            if property.ty() == &ValueType::Any {
                continue;
            }
            let dependency = DependencyDescriptor::for_property(property, property.is_required());
            if let Some((value, names)) = resolve_dependency(self.container, name, &dependency)? {
                for dependency_name in &names {
                    self.container.registry().register_dependency(dependency_name, name);
                }

                #[cfg(feature = "logging")]
                debug!(
                    target: "component_container",
                    name = name,
                    property = property.name(),
                    resolved = ?names,
                    "Autowired property by type"
                );

                properties.add(property.name(), ValueSpec::Value(value));
            }
        }
        Ok(())
    }

    fn check_dependencies(&self, name: &str, merged: &MergedDescriptor, properties: &PropertyValues) -> Result<()> {
        for property in merged.component_type().properties() {
            if !property.ty().is_primitive() && !properties.contains(property.name()) {
                return Err(DiError::unsatisfied(
                    name,
                    format!("property '{}'", property.name()),
                    "set this property value or disable dependency checking",
                ));
            }
        }
        Ok(())
    }

    fn apply(&self, name: &str, merged: &MergedDescriptor, instance: &Instance, properties: &PropertyValues) -> Result<()> {
        let component_type = merged.component_type();
        let values = ValueResolver::new(self.container, name, merged);
        for (property_name, spec) in properties.iter() {
            let property = component_type
                .property(property_name)
                .ok_or_else(|| DiError::UnknownProperty {
                    name: name.to_string(),
                    property: property_name.to_string(),
                })?;
            let context = format!("{name}.{property_name}");
            let value = values.resolve_converted(spec, property.ty(), &context)?;
            property.set(instance, value)?;
        }
        Ok(())
    }
}

// =============================================================================
// Metadata-driven autowiring
// =============================================================================

/// Properties stage handler that fills properties declared `autowired` on
/// the component type, whatever the descriptor's autowire mode.
#[derive(Debug, Default)]
pub struct AutowiredPropertyProcessor;

impl PostProcessor for AutowiredPropertyProcessor {
    fn name(&self) -> &str {
        "AutowiredPropertyProcessor"
    }

    fn stages(&self) -> Stages {
        Stages::PROPERTIES
    }

    fn process_properties(
        &self,
        _instance: &Instance,
        mut properties: PropertyValues,
        ctx: &ProcessContext<'_>,
    ) -> Result<PropertyValues> {
        for property in ctx.component_type().properties() {
            if !property.is_autowired() || properties.contains(property.name()) {
                continue;
            }
            let dependency = DependencyDescriptor::for_property(property, property.is_required());
            if let Some((value, names)) = resolve_dependency(ctx.container, ctx.name, &dependency)? {
                for dependency_name in &names {
                    ctx.container.registry().register_dependency(dependency_name, ctx.name);
                }
                properties.add(property.name(), ValueSpec::Value(value));
            }
        }
        Ok(properties)
    }
}
