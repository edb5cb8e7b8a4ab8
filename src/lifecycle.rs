//! Creation lifecycle
//!
//! Drives one instance from a resolved descriptor to a ready object:
//!
//! ```text
//! DescriptorResolved -> DependenciesSatisfied -> Instantiated -> EarlyRefRegistered
//!     -> PropertiesBound -> Initialized -> PostProcessed -> DisposalRegistered -> Ready
//! ```
//!
//! Any failure moves to `Aborted`; the error is tagged with the component
//! name and the last state reached.

use crate::component::ComponentType;
use crate::container::Container;
use crate::descriptor::{MergedDescriptor, ScopeKind};
use crate::inject::PropertyInjector;
use crate::processor::{PostProcessor, ProcessContext, Stages};
use crate::registry::{CreationFrame, Disposable};
use crate::resolver::ConstructorResolver;
use crate::value::{Instance, Value, same_instance};
use crate::{DiError, Result};
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

/// Lifecycle states of one creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreationState {
    DescriptorResolved,
    DependenciesSatisfied,
    Instantiated,
    EarlyRefRegistered,
    PropertiesBound,
    Initialized,
    PostProcessed,
    DisposalRegistered,
    Ready,
    Aborted,
}

impl fmt::Display for CreationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DescriptorResolved => "descriptor resolved",
            Self::DependenciesSatisfied => "dependencies satisfied",
            Self::Instantiated => "instantiated",
            Self::EarlyRefRegistered => "early reference registered",
            Self::PropertiesBound => "properties bound",
            Self::Initialized => "initialized",
            Self::PostProcessed => "post-processed",
            Self::DisposalRegistered => "disposal registered",
            Self::Ready => "ready",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Runs the creation state machine for one container.
pub(crate) struct Orchestrator<'a> {
    container: &'a Container,
}

impl<'a> Orchestrator<'a> {
    pub(crate) fn new(container: &'a Container) -> Self {
        Self { container }
    }

    /// Create the exposed instance for `name`.
    pub(crate) fn create(
        &self,
        name: &str,
        merged: &Arc<MergedDescriptor>,
        args: Option<Vec<Value>>,
    ) -> Result<Instance> {
        let _frame = CreationFrame::push(name);
        let mut state = CreationState::DescriptorResolved;

        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            name = name,
            component_type = merged.component_type().name(),
            scope = %merged.scope(),
            "Creating component"
        );

        match self.run(name, merged, args, &mut state) {
            Ok(instance) => {
                #[cfg(feature = "logging")]
                trace!(target: "component_container", name = name, state = %CreationState::Ready, "Component ready");
                Ok(instance)
            }
            Err(err) => {
                #[cfg(feature = "logging")]
                debug!(
                    target: "component_container",
                    name = name,
                    reached = %state,
                    state = %CreationState::Aborted,
                    error = %err,
                    "Component creation aborted"
                );
                Err(err.tag(name, state))
            }
        }
    }

    fn run(
        &self,
        name: &str,
        merged: &Arc<MergedDescriptor>,
        args: Option<Vec<Value>>,
        state: &mut CreationState,
    ) -> Result<Instance> {
        let container = self.container;
        let pipeline = container.pipeline();
        let ctx = ProcessContext {
            name,
            merged,
            container,
        };

        self.satisfy_depends_on(name, merged)?;
        *state = CreationState::DependenciesSatisfied;

        if pipeline.has(Stages::BEFORE_INSTANTIATION) {
            if let Some(substitute) = pipeline.apply_before_instantiation(&ctx)? {
                *state = CreationState::Instantiated;
                let exposed = pipeline.apply_after_initialization(substitute, &ctx)?;
                *state = CreationState::PostProcessed;
                return Ok(exposed);
            }
        }

        let raw = ConstructorResolver::new(container).instantiate(name, merged, args)?;
        *state = CreationState::Instantiated;

        let registry = container.registry();
        let early_exposure = merged.scope().is_singleton()
            && container.config().allow_circular_references
            && registry.is_in_creation(name);
        if early_exposure {
            let owner = container.clone();
            let producer_name = name.to_string();
            let producer_merged = Arc::clone(merged);
            let producer_raw = raw.clone();
            registry.add_producer(
                name,
                Box::new(move || {
                    let ctx = ProcessContext {
                        name: &producer_name,
                        merged: &producer_merged,
                        container: &owner,
                    };
                    owner.pipeline().apply_early_reference(producer_raw, &ctx)
                }),
            );
            *state = CreationState::EarlyRefRegistered;
        }

        PropertyInjector::new(container).populate(name, merged, &raw)?;
        *state = CreationState::PropertiesBound;

        let mut exposed = self.initialize(name, merged, &raw, &ctx, state)?;

        if early_exposure {
            if let Some(early) = registry.early_reference(name) {
                if same_instance(&exposed, &raw) {
                    exposed = early;
                } else {
                    let dependents = registry.dependents_of(name);
                    if !dependents.is_empty() {
                        if !container.config().allow_raw_injection_despite_wrapping {
                            return Err(DiError::RawReferenceLeak {
                                name: name.to_string(),
                                dependents,
                            });
                        }

                        #[cfg(feature = "logging")]
                        warn!(
                            target: "component_container",
                            name = name,
                            dependents = ?dependents,
                            "Raw instance was injected before wrapping; dependents keep the raw object"
                        );
                    }
                }
            }
        }

        self.register_disposal(name, merged, &raw)?;
        *state = CreationState::DisposalRegistered;

        *state = CreationState::Ready;
        Ok(exposed)
    }

    /// Create every explicitly declared dependency first.
    fn satisfy_depends_on(&self, name: &str, merged: &MergedDescriptor) -> Result<()> {
        let registry = self.container.registry();
        for dependency in &merged.descriptor().depends_on {
            let dependency = self.container.canonical_name(dependency);
            if let Some(path) = registry.dependency_path(name, &dependency) {
                let mut chain = vec![name.to_string()];
                chain.extend(path.into_iter().skip(1).rev());
                chain.push(name.to_string());
                return Err(DiError::CircularDependsOn { chain });
            }
            registry.register_dependency(&dependency, name);
            self.container.get_instance(&dependency)?;
        }
        Ok(())
    }

    /// Name notification, init callbacks and the initialization stages.
    fn initialize(
        &self,
        name: &str,
        merged: &MergedDescriptor,
        raw: &Instance,
        ctx: &ProcessContext<'_>,
        state: &mut CreationState,
    ) -> Result<Instance> {
        let component_type = merged.component_type();
        let pipeline = self.container.pipeline();

        component_type.notify_name(raw, name);
        let exposed = pipeline.apply_before_initialization(raw.clone(), ctx)?;

        // Callbacks always run on the raw object; `exposed` may be a substitute of another type.
        component_type.run_after_properties_set(raw)?;
        let def = merged.descriptor();
        if let Some(init) = &def.init_method {
            let ran = component_type.run_callback(init, raw)?;
            if !ran && def.enforce_init_method {
                return Err(DiError::invalid_definition(
                    name,
                    format!("no init method named '{init}' on {}", component_type.name()),
                ));
            }
        }
        *state = CreationState::Initialized;

        let exposed = pipeline.apply_after_initialization(exposed, ctx)?;
        *state = CreationState::PostProcessed;
        Ok(exposed)
    }

    /// Register disposal with the registry or the owning custom scope.
    fn register_disposal(&self, name: &str, merged: &MergedDescriptor, raw: &Instance) -> Result<()> {
        let scope = merged.scope();
        if scope.is_prototype() {
            return Ok(());
        }

        let component_type = merged.component_type();
        let def = merged.descriptor();
        let destroy_method = match &def.destroy_method {
            Some(method) if component_type.has_callback(method) => Some(method.clone()),
            Some(method) if def.enforce_destroy_method => {
                return Err(DiError::invalid_definition(
                    name,
                    format!("no destroy method named '{method}' on {}", component_type.name()),
                ));
            }
            _ => None,
        };
        let handlers = self.container.pipeline().destruction_handlers(raw);
        if !component_type.is_disposable() && destroy_method.is_none() && handlers.is_empty() {
            return Ok(());
        }

        let adapter = Box::new(DisposalAdapter {
            name: name.to_string(),
            instance: raw.clone(),
            component_type: Arc::clone(component_type),
            destroy_method,
            handlers,
        });

        match scope {
            ScopeKind::Singleton => {
                self.container.registry().register_disposable(name, adapter);
                Ok(())
            }
            ScopeKind::Custom(scope_name) => self
                .container
                .custom_scope(scope_name)?
                .register_destruction_callback(name, adapter),
            ScopeKind::Prototype => Ok(()),
        }
    }
}

/// Disposes one instance: destruction handlers, then the type's dispose
/// hook, then the descriptor's destroy method.
struct DisposalAdapter {
    name: String,
    instance: Instance,
    component_type: Arc<ComponentType>,
    destroy_method: Option<String>,
    handlers: Vec<Arc<dyn PostProcessor>>,
}

impl Disposable for DisposalAdapter {
    fn dispose(&self) -> Result<()> {
        let mut first_error = None;
        for handler in &self.handlers {
            if let Err(err) = handler.before_destruction(&self.instance, &self.name) {
                first_error.get_or_insert(err);
            }
        }
        if let Err(err) = self.component_type.run_dispose(&self.instance) {
            first_error.get_or_insert(err);
        }
        if let Some(method) = &self.destroy_method {
            if let Err(err) = self.component_type.run_callback(method, &self.instance) {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
