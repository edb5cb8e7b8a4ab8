//! Post-processor pipeline
//!
//! Extension seams around instance creation. Each handler declares the
//! [`Stages`] it participates in and the pipeline keeps one list per stage,
//! so a stage with no handlers costs nothing.

use crate::container::Container;
use crate::component::ComponentType;
use crate::descriptor::{MergedDescriptor, PropertyValues};
use crate::value::Instance;
use crate::Result;
use parking_lot::RwLock;
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Set of pipeline stages a handler participates in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Stages(u8);

impl Stages {
    pub const NONE: Stages = Stages(0);
    pub const BEFORE_INSTANTIATION: Stages = Stages(1);
    pub const AFTER_INSTANTIATION: Stages = Stages(1 << 1);
    pub const PROPERTIES: Stages = Stages(1 << 2);
    pub const BEFORE_INITIALIZATION: Stages = Stages(1 << 3);
    pub const AFTER_INITIALIZATION: Stages = Stages(1 << 4);
    pub const EARLY_REFERENCE: Stages = Stages(1 << 5);
    pub const DESTRUCTION: Stages = Stages(1 << 6);
    pub const ALL: Stages = Stages(0x7f);

    const COUNT: usize = 7;

    #[inline]
    pub fn contains(self, other: Stages) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    fn index(self) -> usize {
        self.0.trailing_zeros() as usize
    }
}

impl BitOr for Stages {
    type Output = Stages;

    fn bitor(self, rhs: Stages) -> Stages {
        Stages(self.0 | rhs.0)
    }
}

impl fmt::Debug for Stages {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [&str; Stages::COUNT] = [
            "BEFORE_INSTANTIATION",
            "AFTER_INSTANTIATION",
            "PROPERTIES",
            "BEFORE_INITIALIZATION",
            "AFTER_INITIALIZATION",
            "EARLY_REFERENCE",
            "DESTRUCTION",
        ];
        let set: Vec<&str> = (0..Stages::COUNT)
            .filter(|bit| self.0 & (1 << bit) != 0)
            .map(|bit| NAMES[bit])
            .collect();
        write!(f, "Stages({})", set.join(" | "))
    }
}

/// What a handler knows about the instance being processed.
pub struct ProcessContext<'a> {
    pub name: &'a str,
    pub merged: &'a MergedDescriptor,
    pub container: &'a Container,
}

impl ProcessContext<'_> {
    #[inline]
    pub fn component_type(&self) -> &Arc<ComponentType> {
        self.merged.component_type()
    }
}

/// A handler in the creation pipeline.
///
/// Every method has a no-op default; override the ones named in
/// [`stages`](PostProcessor::stages).
pub trait PostProcessor: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Stages this handler participates in
    fn stages(&self) -> Stages;

    /// Supply a substitute instance; creation then skips straight to
    /// after-initialization.
    fn before_instantiation(&self, _ctx: &ProcessContext<'_>) -> Result<Option<Instance>> {
        Ok(None)
    }

    /// Return `false` to skip property binding.
    fn after_instantiation(&self, _instance: &Instance, _ctx: &ProcessContext<'_>) -> Result<bool> {
        Ok(true)
    }

    /// Adjust the property values about to be bound.
    fn process_properties(
        &self,
        _instance: &Instance,
        properties: PropertyValues,
        _ctx: &ProcessContext<'_>,
    ) -> Result<PropertyValues> {
        Ok(properties)
    }

    /// Object handed out as the early reference of a circular lookup.
    fn early_reference(&self, instance: Instance, _ctx: &ProcessContext<'_>) -> Result<Instance> {
        Ok(instance)
    }

    /// Replace the instance before init callbacks; `None` keeps the current one.
    fn before_initialization(
        &self,
        _instance: &Instance,
        _ctx: &ProcessContext<'_>,
    ) -> Result<Option<Instance>> {
        Ok(None)
    }

    /// Replace the instance after init callbacks; `None` keeps the current one.
    fn after_initialization(
        &self,
        _instance: &Instance,
        _ctx: &ProcessContext<'_>,
    ) -> Result<Option<Instance>> {
        Ok(None)
    }

    /// Called before the instance's own disposal.
    fn before_destruction(&self, _instance: &Instance, _name: &str) -> Result<()> {
        Ok(())
    }

    /// Whether [`before_destruction`](PostProcessor::before_destruction) applies to `instance`.
    fn requires_destruction(&self, _instance: &Instance) -> bool {
        true
    }
}

type Handlers = Vec<Arc<dyn PostProcessor>>;

/// Ordered post-processors with per-stage lists.
#[derive(Default)]
pub struct Pipeline {
    all: RwLock<Handlers>,
    by_stage: RwLock<[Handlers; Stages::COUNT]>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler; re-adding the same handler moves it to the end.
    pub fn add(&self, processor: Arc<dyn PostProcessor>) {
        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            processor = processor.name(),
            stages = ?processor.stages(),
            "Adding post-processor"
        );

        let mut all = self.all.write();
        all.retain(|p| !Arc::ptr_eq(p, &processor));
        all.push(processor);

        let mut by_stage: [Handlers; Stages::COUNT] = Default::default();
        for handler in all.iter() {
            let stages = handler.stages();
            for (bit, list) in by_stage.iter_mut().enumerate() {
                if stages.contains(Stages(1 << bit)) {
                    list.push(Arc::clone(handler));
                }
            }
        }
        *self.by_stage.write() = by_stage;
    }

    /// Whether any handler participates in `stage`
    #[inline]
    pub fn has(&self, stage: Stages) -> bool {
        !self.by_stage.read()[stage.index()].is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.all.read().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.all.read().is_empty()
    }

    /// Snapshot of the handlers for `stage`, in registration order
    fn handlers(&self, stage: Stages) -> Handlers {
        self.by_stage.read()[stage.index()].clone()
    }

    pub fn apply_before_instantiation(&self, ctx: &ProcessContext<'_>) -> Result<Option<Instance>> {
        for handler in self.handlers(Stages::BEFORE_INSTANTIATION) {
            if let Some(instance) = handler.before_instantiation(ctx)? {
                #[cfg(feature = "logging")]
                debug!(
                    target: "component_container",
                    name = ctx.name,
                    processor = handler.name(),
                    "Instantiation short-circuited by post-processor"
                );
                return Ok(Some(instance));
            }
        }
        Ok(None)
    }

    pub fn apply_after_instantiation(&self, instance: &Instance, ctx: &ProcessContext<'_>) -> Result<bool> {
        for handler in self.handlers(Stages::AFTER_INSTANTIATION) {
            if !handler.after_instantiation(instance, ctx)? {
                #[cfg(feature = "logging")]
                trace!(
                    target: "component_container",
                    name = ctx.name,
                    processor = handler.name(),
                    "Property binding vetoed"
                );
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn apply_properties(
        &self,
        instance: &Instance,
        mut properties: PropertyValues,
        ctx: &ProcessContext<'_>,
    ) -> Result<PropertyValues> {
        for handler in self.handlers(Stages::PROPERTIES) {
            properties = handler.process_properties(instance, properties, ctx)?;
        }
        Ok(properties)
    }

    pub fn apply_early_reference(&self, instance: Instance, ctx: &ProcessContext<'_>) -> Result<Instance> {
        let mut current = instance;
        for handler in self.handlers(Stages::EARLY_REFERENCE) {
            current = handler.early_reference(current, ctx)?;
        }
        Ok(current)
    }

    pub fn apply_before_initialization(&self, instance: Instance, ctx: &ProcessContext<'_>) -> Result<Instance> {
        let mut current = instance;
        for handler in self.handlers(Stages::BEFORE_INITIALIZATION) {
            if let Some(next) = handler.before_initialization(&current, ctx)? {
                current = next;
            }
        }
        Ok(current)
    }

    pub fn apply_after_initialization(&self, instance: Instance, ctx: &ProcessContext<'_>) -> Result<Instance> {
        let mut current = instance;
        for handler in self.handlers(Stages::AFTER_INITIALIZATION) {
            if let Some(next) = handler.after_initialization(&current, ctx)? {
                current = next;
            }
        }
        Ok(current)
    }

    /// Destruction-aware handlers that apply to `instance`
    pub fn destruction_handlers(&self, instance: &Instance) -> Handlers {
        self.handlers(Stages::DESTRUCTION)
            .into_iter()
            .filter(|h| h.requires_destruction(instance))
            .collect()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.all.read().iter().map(|p| p.name().to_string()).collect();
        f.debug_struct("Pipeline").field("processors", &names).finish()
    }
}
