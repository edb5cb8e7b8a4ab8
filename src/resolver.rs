//! Constructor and factory method selection
//!
//! Picks the creator a component is instantiated with, binds its
//! arguments from declared values, explicit arguments or the container,
//! and caches the choice on the merged descriptor.

use crate::component::{Creator, CreatorKind, Param};
use crate::container::Container;
use crate::descriptor::{ArgRecipe, ArgSpec, AutowireMode, MergedDescriptor, ResolvedCreator, ValueSpec};
use crate::inject::{DependencyDescriptor, ValueResolver, resolve_dependency};
use crate::value::{Instance, Value, ValueType};
use crate::{DiError, Result};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Offset that makes a candidate matched on raw values beat one that needed conversion.
const RAW_MATCH_BONUS: i64 = 1024;

/// Weight of a candidate whose arguments are not assignable.
const NOT_ASSIGNABLE: i64 = i64::MAX;

/// A bound candidate
struct Binding {
    creator: Arc<Creator>,
    args: Vec<Value>,
    recipe: Vec<ArgRecipe>,
    weight: i64,
}

/// Raw and converted arguments of one candidate
struct BoundArgs {
    raw: Vec<Value>,
    converted: Vec<Value>,
    recipe: Vec<ArgRecipe>,
    autowired: Vec<String>,
}

pub(crate) struct ConstructorResolver<'a> {
    container: &'a Container,
}

impl<'a> ConstructorResolver<'a> {
    pub(crate) fn new(container: &'a Container) -> Self {
        Self { container }
    }

    /// Create the raw instance for `name`.
    pub(crate) fn instantiate(
        &self,
        name: &str,
        merged: &Arc<MergedDescriptor>,
        explicit: Option<Vec<Value>>,
    ) -> Result<Instance> {
        if merged.descriptor().factory_method.is_some() {
            self.instantiate_with_factory(name, merged, explicit)
        } else {
            self.autowire_constructor(name, merged, explicit)
        }
    }

    fn autowire_constructor(
        &self,
        name: &str,
        merged: &Arc<MergedDescriptor>,
        explicit: Option<Vec<Value>>,
    ) -> Result<Instance> {
        if explicit.is_none() {
            if let Some(resolved) = merged.cached_resolution() {
                let args = self.realize(name, merged, &resolved.recipe)?;
                return resolved.creator.invoke(None, args);
            }
        }

        let candidates = merged.component_type().constructors().to_vec();
        let autowiring = explicit.is_none()
            && (merged.autowire() == AutowireMode::Constructor || merged.descriptor().constructor_args.is_empty());
        let binding = self.select(name, merged, candidates, explicit.as_deref(), autowiring, "constructor")?;
        binding.creator.invoke(None, binding.args)
    }

    fn instantiate_with_factory(
        &self,
        name: &str,
        merged: &Arc<MergedDescriptor>,
        explicit: Option<Vec<Value>>,
    ) -> Result<Instance> {
        let def = merged.descriptor();
        let method = def.factory_method.as_deref().unwrap_or_default();

        let (owner, mut candidates) = match &def.factory_bean {
            Some(factory_bean) => {
                if self.container.is_same_name(factory_bean, name) {
                    return Err(DiError::invalid_definition(
                        name,
                        "factory owner reference points back to the same definition",
                    ));
                }
                let owner = self.container.get_instance(factory_bean)?;
                let canonical = self.container.canonical_name(factory_bean);
                self.container.registry().register_dependency(&canonical, name);
                let owner_type = self
                    .container
                    .type_for_instance(&owner)
                    .or_else(|| self.container.merged(factory_bean).map(|m| Arc::clone(m.component_type())))
                    .ok_or_else(|| {
                        DiError::invalid_definition(name, format!("factory owner '{factory_bean}' has no known type"))
                    })?;
                (Some(owner), owner_type.factory_methods_named(method, CreatorKind::InstanceFactory))
            }
            None => (
                None,
                merged
                    .component_type()
                    .factory_methods_named(method, CreatorKind::StaticFactory),
            ),
        };

        if explicit.is_none() {
            if let Some(resolved) = merged.cached_resolution() {
                let args = self.realize(name, merged, &resolved.recipe)?;
                return resolved.creator.invoke(owner.as_ref(), args);
            }
            let hint = merged.factory_hint.lock().clone();
            if let Some(hint) = hint {
                if candidates.iter().any(|c| Arc::ptr_eq(c, &hint)) {
                    candidates = vec![hint];
                }
            }
        }

        if candidates.is_empty() {
            return Err(DiError::invalid_definition(
                name,
                format!("no factory method named '{method}'"),
            ));
        }

        let autowiring = merged.autowire() == AutowireMode::Constructor;
        let binding = self.select(name, merged, candidates, explicit.as_deref(), autowiring, "factory method")?;
        binding.creator.invoke(owner.as_ref(), binding.args)
    }

    /// Choose among `candidates` and bind their arguments.
    fn select(
        &self,
        name: &str,
        merged: &Arc<MergedDescriptor>,
        candidates: Vec<Arc<Creator>>,
        explicit: Option<&[Value]>,
        autowiring: bool,
        what: &str,
    ) -> Result<Binding> {
        let config = self.container.config();
        let mut candidates: Vec<Arc<Creator>> = candidates
            .into_iter()
            .filter(|c| c.is_public() || config.allow_non_public_access)
            .collect();

        if candidates.is_empty() {
            return Err(DiError::invalid_definition(name, format!("no accessible {what}")));
        }

        let declared = &merged.descriptor().constructor_args;
        if candidates.len() == 1 && explicit.is_none() && declared.is_empty() && candidates[0].params().is_empty() {
            let creator = candidates.remove(0);
            merged.cache_resolution(ResolvedCreator {
                creator: Arc::clone(&creator),
                recipe: Vec::new(),
            });
            return Ok(Binding {
                creator,
                args: Vec::new(),
                recipe: Vec::new(),
                weight: 0,
            });
        }

        let min_args = explicit.map_or_else(|| declared.min_arg_count(), <[Value]>::len);
        candidates.sort_by(|a, b| {
            b.is_public()
                .cmp(&a.is_public())
                .then(b.params().len().cmp(&a.params().len()))
        });

        let lenient = config.lenient_constructor_resolution;
        let mut best: Option<Binding> = None;
        let mut ambiguous: Vec<String> = Vec::new();
        let mut last_error: Option<DiError> = None;

        for candidate in candidates {
            let count = candidate.params().len();
            if let Some(best) = &best {
                if best.creator.params().len() > count {
                    break;
                }
            }
            if count < min_args {
                continue;
            }

            let bound = match explicit {
                Some(values) if values.len() != count => continue,
                Some(values) => self.bind_explicit(name, &candidate, values),
                None => self.bind(name, merged, &candidate, autowiring),
            };
            let bound = match bound {
                Ok(bound) => bound,
                Err(err) => {
                    #[cfg(feature = "logging")]
                    trace!(
                        target: "component_container",
                        name = name,
                        candidate = %candidate.signature(),
                        error = %err,
                        "Skipping candidate"
                    );
                    last_error = Some(err);
                    continue;
                }
            };

            let weight = if lenient {
                self.lenient_weight(candidate.params(), &bound)
            } else {
                self.strict_weight(candidate.params(), &bound)
            };

            match &best {
                Some(current) if weight > current.weight => {}
                Some(current) if weight == current.weight => {
                    if current.creator.params().len() == count && current.creator.signature() != candidate.signature() {
                        ambiguous.push(candidate.signature());
                    }
                }
                _ => {
                    for autowired in &bound.autowired {
                        self.container.registry().register_dependency(autowired, name);
                    }
                    ambiguous.clear();
                    best = Some(Binding {
                        creator: candidate,
                        args: bound.converted,
                        recipe: bound.recipe,
                        weight,
                    });
                }
            }
        }

        let Some(best) = best else {
            return Err(last_error.unwrap_or_else(|| {
                DiError::invalid_definition(
                    name,
                    format!("no {what} accepts {min_args} or more arguments"),
                )
            }));
        };

        if !ambiguous.is_empty() && !lenient {
            let mut names = vec![best.creator.signature()];
            names.extend(ambiguous);
            return Err(DiError::AmbiguousConstructor {
                name: name.to_string(),
                candidates: names,
            });
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            name = name,
            creator = %best.creator.signature(),
            "Selected {}", what
        );

        if explicit.is_none() {
            merged.cache_resolution(ResolvedCreator {
                creator: Arc::clone(&best.creator),
                recipe: best.recipe.clone(),
            });
        }
        Ok(best)
    }

    /// Bind caller-supplied arguments positionally.
    fn bind_explicit(&self, name: &str, creator: &Creator, values: &[Value]) -> Result<BoundArgs> {
        let converter = self.container.converter();
        let mut converted = Vec::with_capacity(values.len());
        for (i, (param, value)) in creator.params().iter().zip(values).enumerate() {
            converted.push(converter.convert(value.clone(), &param.ty, &format!("{name}[arg {i}]"))?);
        }
        Ok(BoundArgs {
            raw: values.to_vec(),
            converted,
            recipe: Vec::new(),
            autowired: Vec::new(),
        })
    }

    /// Bind declared arguments, then autowire the rest.
    fn bind(&self, name: &str, merged: &MergedDescriptor, creator: &Creator, autowiring: bool) -> Result<BoundArgs> {
        let declared = &merged.descriptor().constructor_args;
        let values = ValueResolver::new(self.container, name, merged);
        let converter = self.container.converter();
        let params = creator.params();
        let mut used = vec![false; declared.generic().len()];
        let mut bound = BoundArgs {
            raw: Vec::with_capacity(params.len()),
            converted: Vec::with_capacity(params.len()),
            recipe: Vec::with_capacity(params.len()),
            autowired: Vec::new(),
        };

        for (i, param) in params.iter().enumerate() {
            let context = format!("{name}[arg {i}]");
            let spec = declared
                .indexed(i)
                .filter(|spec| self.fits(spec, param))
                .or_else(|| self.take_generic(declared.generic(), &mut used, param, autowiring, params.len(), declared.count()));

            if let Some(spec) = spec {
                let raw = values.resolve(&spec.value, &param.ty, &context)?;
                let converted = converter.convert(raw.clone(), &param.ty, &context)?;
                let recipe = if spec.value.is_literal() {
                    ArgRecipe::Ready(converted.clone())
                } else {
                    ArgRecipe::Spec(spec.value.clone(), param.ty.clone())
                };
                bound.raw.push(raw);
                bound.converted.push(converted);
                bound.recipe.push(recipe);
                continue;
            }

            if !autowiring {
                return Err(DiError::unsatisfied(
                    name,
                    format!("parameter {i} '{}'", param.name),
                    "no argument declared and constructor autowiring is off",
                ));
            }

            let dependency = DependencyDescriptor::for_param(i, param);
            match resolve_dependency(self.container, name, &dependency)? {
                Some((value, names)) => {
                    bound.autowired.extend(names);
                    bound.raw.push(value.clone());
                    bound.converted.push(converter.convert(value, &param.ty, &context)?);
                    bound.recipe.push(ArgRecipe::Autowired(param.clone()));
                }
                None => {
                    return Err(DiError::unsatisfied(
                        name,
                        dependency.target,
                        format!("no value of type {} can be resolved", param.ty),
                    ));
                }
            }
        }
        Ok(bound)
    }

    /// First unused generic argument fitting `param`, with a positional fallback.
    fn take_generic<'s>(
        &self,
        generic: &'s [ArgSpec],
        used: &mut [bool],
        param: &Param,
        autowiring: bool,
        param_count: usize,
        declared_count: usize,
    ) -> Option<&'s ArgSpec> {
        let fitting = generic
            .iter()
            .enumerate()
            .find(|(i, spec)| !used[*i] && self.fits(spec, param))
            .map(|(i, _)| i);
        let index = fitting.or_else(|| {
            if autowiring && param_count != declared_count {
                return None;
            }
            generic
                .iter()
                .enumerate()
                .find(|(i, spec)| !used[*i] && spec.ty.is_none() && spec.name.is_none())
                .map(|(i, _)| i)
        })?;
        used[index] = true;
        Some(&generic[index])
    }

    /// Whether a declared argument can plausibly bind to `param`.
    fn fits(&self, spec: &ArgSpec, param: &Param) -> bool {
        if !spec.fits(param) {
            return false;
        }
        self.spec_fits(&spec.value, &param.ty)
    }

    fn spec_fits(&self, spec: &ValueSpec, ty: &ValueType) -> bool {
        match (spec, ty) {
            (_, ValueType::Any) => true,
            (ValueSpec::Value(value), ty) => self.container.converter().convert(value.clone(), ty, "").is_ok(),
            (ValueSpec::Reference(target), ValueType::Component(key)) => self.container.is_type_match(target, key),
            (ValueSpec::Inner(inner), ValueType::Component(key)) => inner
                .component_type
                .as_ref()
                .is_none_or(|ty| ty.is_assignable_to(key)),
            (ValueSpec::List(_), ValueType::List(_)) => true,
            (single, ValueType::List(element)) => self.spec_fits(single, element),
            _ => false,
        }
    }

    /// Rebuild arguments from a cached recipe.
    fn realize(&self, name: &str, merged: &MergedDescriptor, recipe: &[ArgRecipe]) -> Result<Vec<Value>> {
        let values = ValueResolver::new(self.container, name, merged);
        recipe
            .iter()
            .enumerate()
            .map(|(i, step)| match step {
                ArgRecipe::Ready(value) => Ok(value.clone()),
                ArgRecipe::Spec(spec, ty) => values.resolve_converted(spec, ty, &format!("{name}[arg {i}]")),
                ArgRecipe::Autowired(param) => {
                    let dependency = DependencyDescriptor::for_param(i, param);
                    let (value, names) = resolve_dependency(self.container, name, &dependency)?.ok_or_else(|| {
                        DiError::unsatisfied(name, &dependency.target, "dependency is no longer available")
                    })?;
                    for dependency_name in &names {
                        self.container.registry().register_dependency(dependency_name, name);
                    }
                    self.container
                        .converter()
                        .convert(value, &param.ty, &format!("{name}[arg {i}]"))
                }
            })
            .collect()
    }

    fn type_weight(&self, params: &[Param], args: &[Value]) -> i64 {
        let converter = self.container.converter();
        let mut total: i64 = 0;
        for (param, arg) in params.iter().zip(args) {
            match converter.type_distance(arg, &param.ty) {
                Some(distance) => total += i64::from(distance),
                None => return NOT_ASSIGNABLE,
            }
        }
        total
    }

    /// Closest type match wins; a match on raw values beats a converted one.
    fn lenient_weight(&self, params: &[Param], bound: &BoundArgs) -> i64 {
        let converted = self.type_weight(params, &bound.converted);
        let raw = self.type_weight(params, &bound.raw).saturating_sub(RAW_MATCH_BONUS);
        raw.min(converted)
    }

    /// Only assignability counts; candidates that all fit tie.
    fn strict_weight(&self, params: &[Param], bound: &BoundArgs) -> i64 {
        if self.type_weight(params, &bound.converted) == NOT_ASSIGNABLE {
            return NOT_ASSIGNABLE;
        }
        if self.type_weight(params, &bound.raw) == NOT_ASSIGNABLE {
            return NOT_ASSIGNABLE - 512;
        }
        NOT_ASSIGNABLE - RAW_MATCH_BONUS
    }
}
