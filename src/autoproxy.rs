//! Automatic proxying of container-managed components
//!
//! [`AutoProxyCreator`] is a post-processor that wraps every component some
//! advisor applies to in a [`ForwardingProxy`]. When a component is handed
//! out early to break a reference cycle, the proxy is created at that point
//! and the later after-initialization pass leaves the instance alone.

use crate::advice::Advisor;
use crate::component::ComponentType;
use crate::container::Container;
use crate::processor::{PostProcessor, ProcessContext, Stages};
use crate::proxy::{ForwardingProxy, ProxyFactory};
use crate::value::{Instance, TypeKey, instance_addr};
use crate::Result;
use ahash::RandomState;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Post-processor that proxies every component with applicable advisors.
///
/// Advisors come from the creator itself and, unless disabled, from
/// `Advisor` components registered in the container.
pub struct AutoProxyCreator {
    advisors: Vec<Arc<Advisor>>,
    discover: bool,
    proxy_target_type: bool,
    expose_proxy: bool,
    /// Names whose proxy was already created as an early reference,
    /// mapped to the address of the raw instance
    early_refs: DashMap<String, usize, RandomState>,
}

impl AutoProxyCreator {
    pub fn new() -> Self {
        Self {
            advisors: Vec::new(),
            discover: true,
            proxy_target_type: false,
            expose_proxy: false,
            early_refs: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
        }
    }

    pub fn advisor(mut self, advisor: impl Into<Arc<Advisor>>) -> Self {
        self.advisors.push(advisor.into());
        self
    }

    /// Whether `Advisor` components in the container are picked up too
    pub fn discover_advisors(mut self, enabled: bool) -> Self {
        self.discover = enabled;
        self
    }

    /// Proxy the full component type instead of its capabilities
    pub fn proxy_target_type(mut self, enabled: bool) -> Self {
        self.proxy_target_type = enabled;
        self
    }

    pub fn expose_proxy(mut self, enabled: bool) -> Self {
        self.expose_proxy = enabled;
        self
    }

    /// Advisors that apply to `component_type`.
    fn advisors_for(&self, component_type: &ComponentType, ctx: &ProcessContext<'_>) -> Result<Vec<Arc<Advisor>>> {
        let mut eligible: Vec<Arc<Advisor>> = self
            .advisors
            .iter()
            .filter(|advisor| advisor.can_apply(component_type))
            .cloned()
            .collect();
        if self.discover {
            for advisor in self.discover_in(ctx.container, ctx.name)? {
                if advisor.can_apply(component_type) && !eligible.iter().any(|a| Arc::ptr_eq(a, &advisor)) {
                    eligible.push(advisor);
                }
            }
        }
        Ok(eligible)
    }

    fn discover_in(&self, container: &Container, requester: &str) -> Result<Vec<Arc<Advisor>>> {
        let mut found = Vec::new();
        for name in container.names_for_type(&TypeKey::of::<Advisor>()) {
            if name == requester || container.registry().is_in_creation(&name) {
                #[cfg(feature = "logging")]
                trace!(target: "component_container", advisor = %name, "Skipping advisor still in creation");
                continue;
            }
            let instance = container.get_instance(&name)?;
            if let Ok(advisor) = instance.downcast::<Advisor>() {
                found.push(advisor);
            }
        }
        Ok(found)
    }

    fn wrap_if_necessary(&self, instance: Instance, ctx: &ProcessContext<'_>) -> Result<Instance> {
        if instance.is::<ForwardingProxy>() || instance.is::<Advisor>() {
            return Ok(instance);
        }
        let component_type = ctx
            .container
            .type_for_instance(&instance)
            .unwrap_or_else(|| Arc::clone(ctx.component_type()));
        if component_type.is_infrastructure() {
            return Ok(instance);
        }

        let advisors = self.advisors_for(&component_type, ctx)?;
        if advisors.is_empty() {
            return Ok(instance);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            name = ctx.name,
            advisors = advisors.len(),
            "Creating automatic proxy"
        );

        let mut factory = ProxyFactory::new()
            .target(instance, Arc::clone(&component_type))
            .advisors(advisors)
            .pre_filtered(true)
            .proxy_target_type(self.proxy_target_type)
            .expose_proxy(self.expose_proxy);
        if !self.proxy_target_type {
            for key in component_type.assignable_types() {
                factory = factory.interface_key(*key);
            }
        }
        let proxy: Instance = factory.build()?;
        Ok(proxy)
    }
}

impl Default for AutoProxyCreator {
    fn default() -> Self {
        Self::new()
    }
}

impl PostProcessor for AutoProxyCreator {
    fn name(&self) -> &str {
        "AutoProxyCreator"
    }

    fn stages(&self) -> Stages {
        Stages::EARLY_REFERENCE | Stages::AFTER_INITIALIZATION
    }

    fn early_reference(&self, instance: Instance, ctx: &ProcessContext<'_>) -> Result<Instance> {
        self.early_refs
            .insert(ctx.name.to_string(), instance_addr(&instance));
        self.wrap_if_necessary(instance, ctx)
    }

    fn after_initialization(&self, instance: &Instance, ctx: &ProcessContext<'_>) -> Result<Option<Instance>> {
        if let Some((_, early)) = self.early_refs.remove(ctx.name) {
            if early == instance_addr(instance) {
                return Ok(None);
            }
        }
        let wrapped = self.wrap_if_necessary(instance.clone(), ctx)?;
        Ok((!Arc::ptr_eq(&wrapped, instance)).then_some(wrapped))
    }
}

impl fmt::Debug for AutoProxyCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AutoProxyCreator")
            .field("advisors", &self.advisors.len())
            .field("discover", &self.discover)
            .field("proxy_target_type", &self.proxy_target_type)
            .field("expose_proxy", &self.expose_proxy)
            .finish()
    }
}
