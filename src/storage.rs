//! Definition storage for the container
//!
//! Holds raw descriptors and aliases in `DashMap`s and flattens parent
//! chains into cached [`MergedDescriptor`]s.

use crate::descriptor::{Descriptor, MergedDescriptor};
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Longest alias chain followed before assuming a cycle
const MAX_ALIAS_DEPTH: usize = 64;

/// Thread-safe store of component descriptors.
///
/// Uses `DashMap` with `ahash` for concurrent reads. An optional parent
/// store backs definitions that name themselves as their own parent.
pub struct DefinitionStore {
    /// Raw descriptors by canonical name
    definitions: DashMap<String, Arc<Descriptor>, RandomState>,
    /// alias -> name
    aliases: DashMap<String, String, RandomState>,
    /// Merged (flattened) descriptors by canonical name
    merged: DashMap<String, Arc<MergedDescriptor>, RandomState>,
    /// Registration order
    order: RwLock<Vec<String>>,
    /// Whether a name may be registered twice
    allow_overriding: bool,
    /// Store of the enclosing container level
    parent: Option<Arc<DefinitionStore>>,
}

impl DefinitionStore {
    /// Create an empty store.
    ///
    /// Uses 8 shards; containers rarely hold more than a few dozen definitions.
    #[inline]
    pub fn new(allow_overriding: bool) -> Self {
        Self {
            definitions: DashMap::with_capacity_and_hasher_and_shard_amount(
                0,
                RandomState::new(),
                8,
            ),
            aliases: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            merged: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
            order: RwLock::new(Vec::new()),
            allow_overriding,
            parent: None,
        }
    }

    /// Create a child store backed by `parent`.
    #[inline]
    pub fn with_parent(parent: Arc<DefinitionStore>, allow_overriding: bool) -> Self {
        Self {
            parent: Some(parent),
            ..Self::new(allow_overriding)
        }
    }

    /// Store of the enclosing level, if any
    #[inline]
    pub fn parent(&self) -> Option<&Arc<DefinitionStore>> {
        self.parent.as_ref()
    }

    /// Register a descriptor, returning the one it replaced.
    pub fn register(&self, name: &str, descriptor: Descriptor) -> Result<Option<Arc<Descriptor>>> {
        if name.is_empty() {
            return Err(DiError::invalid_definition(name, "name must not be empty"));
        }
        if descriptor.component_type.is_none() && descriptor.parent.is_none() {
            return Err(DiError::invalid_definition(
                name,
                "descriptor has neither a component type nor a parent",
            ));
        }
        if descriptor.factory_bean.is_some() && descriptor.factory_method.is_none() {
            return Err(DiError::invalid_definition(
                name,
                "factory owner given without a factory method",
            ));
        }

        let existing = self.definitions.get(name).map(|d| Arc::clone(&d));
        if existing.is_some() && !self.allow_overriding {
            return Err(DiError::invalid_definition(
                name,
                "a definition with this name already exists and overriding is disabled",
            ));
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            name = name,
            component = descriptor.type_name(),
            replaces = existing.is_some(),
            "Registering component definition"
        );

        if self.aliases.remove(name).is_some() {
            #[cfg(feature = "logging")]
            debug!(
                target: "component_container",
                name = name,
                "Definition name shadowed an alias; alias removed"
            );
        }

        self.definitions.insert(name.to_string(), Arc::new(descriptor));
        if existing.is_some() {
            self.reset(name);
        } else {
            self.order.write().push(name.to_string());
        }
        Ok(existing)
    }

    /// Remove a descriptor; every merge that used it becomes stale.
    pub fn remove(&self, name: &str) -> Result<Arc<Descriptor>> {
        let name = self.canonical_name(name)?;
        let (_, removed) = self
            .definitions
            .remove(&name)
            .ok_or_else(|| DiError::not_found(&name))?;
        self.order.write().retain(|n| *n != name);
        self.reset(&name);
        self.merged.remove(&name);
        Ok(removed)
    }

    /// Mark `name` and every definition inheriting from it stale.
    fn reset(&self, name: &str) {
        self.mark_stale(name);
        let children: Vec<String> = self
            .definitions
            .iter()
            .filter(|entry| entry.value().parent.as_deref() == Some(name) && entry.key() != name)
            .map(|entry| entry.key().clone())
            .collect();
        for child in children {
            self.reset(&child);
        }
    }

    /// Force the next `resolve(name)` to re-merge.
    pub fn mark_stale(&self, name: &str) {
        if let Some(merged) = self.merged.get(name) {
            merged.mark_stale();
        }
    }

    /// Register `alias` for `name`.
    pub fn register_alias(&self, name: &str, alias: &str) -> Result<()> {
        if alias == name {
            self.aliases.remove(alias);
            return Ok(());
        }
        if self.definitions.contains_key(alias) {
            return Err(DiError::invalid_definition(
                alias,
                format!("cannot alias '{name}': a definition already uses this name"),
            ));
        }
        if let Some(existing) = self.aliases.get(alias).map(|t| t.clone()) {
            if existing == name {
                return Ok(());
            }
            if !self.allow_overriding {
                return Err(DiError::invalid_definition(
                    alias,
                    format!("alias already points at '{existing}'"),
                ));
            }
        }
        if self.resolves_to(name, alias) {
            return Err(DiError::invalid_definition(
                alias,
                format!("alias cycle through '{name}'"),
            ));
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            name = name,
            alias = alias,
            "Registering alias"
        );

        self.aliases.insert(alias.to_string(), name.to_string());
        Ok(())
    }

    fn resolves_to(&self, start: &str, target: &str) -> bool {
        let mut current = start.to_string();
        for _ in 0..MAX_ALIAS_DEPTH {
            if current == target {
                return true;
            }
            match self.aliases.get(&current) {
                Some(next) => current = next.clone(),
                None => return false,
            }
        }
        true
    }

    /// Follow aliases to the registered name.
    pub fn canonical_name(&self, name: &str) -> Result<String> {
        let mut current = name.to_string();
        for _ in 0..MAX_ALIAS_DEPTH {
            match self.aliases.get(&current) {
                Some(next) => current = next.clone(),
                None => return Ok(current),
            }
        }
        Err(DiError::invalid_definition(name, "alias chain does not terminate"))
    }

    /// Aliases that resolve directly to `name`
    pub fn aliases_of(&self, name: &str) -> Vec<String> {
        self.aliases
            .iter()
            .filter(|entry| entry.value() == name)
            .map(|entry| entry.key().clone())
            .collect()
    }

    #[inline]
    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    /// Raw descriptor for `name` (aliases followed)
    pub fn get(&self, name: &str) -> Option<Arc<Descriptor>> {
        let name = self.canonical_name(name).ok()?;
        self.definitions.get(&name).map(|d| Arc::clone(&d))
    }

    /// Whether `name` (or an alias of it) is defined at this level
    pub fn contains(&self, name: &str) -> bool {
        self.canonical_name(name)
            .map(|n| self.definitions.contains_key(&n))
            .unwrap_or(false)
    }

    /// Definition names in registration order
    pub fn names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// The merged view of `name`, computed once and cached until stale.
    pub fn resolve(&self, name: &str) -> Result<Arc<MergedDescriptor>> {
        let name = self.canonical_name(name)?;
        self.resolve_chain(&name, &mut Vec::new())
    }

    fn resolve_chain(&self, name: &str, chain: &mut Vec<String>) -> Result<Arc<MergedDescriptor>> {
        let previous = self.merged.get(name).map(|m| Arc::clone(&m));
        if let Some(merged) = &previous {
            if !merged.is_stale() {
                #[cfg(feature = "logging")]
                trace!(
                    target: "component_container",
                    name = name,
                    "Merged definition cache hit"
                );
                return Ok(Arc::clone(merged));
            }
        }

        let descriptor = self
            .definitions
            .get(name)
            .map(|d| Arc::clone(&d))
            .ok_or_else(|| DiError::not_found(name))?;

        if chain.iter().any(|n| n == name) {
            chain.push(name.to_string());
            return Err(DiError::invalid_definition(
                name,
                format!("parent chain is circular: {}", chain.join(" -> ")),
            ));
        }
        chain.push(name.to_string());
        let flattened = self.flatten(name, &descriptor, chain)?;
        chain.pop();

        let merged = Arc::new(build_merged(name, flattened)?);
        if let Some(previous) = previous {
            merged.inherit_hints(&previous);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "component_container",
            name = name,
            scope = %merged.scope(),
            component = merged.component_type().name(),
            "Merged component definition"
        );

        self.merged.insert(name.to_string(), Arc::clone(&merged));
        Ok(merged)
    }

    /// Deep-copy the parent's merged view and overlay `descriptor`.
    fn flatten(&self, name: &str, descriptor: &Descriptor, chain: &mut Vec<String>) -> Result<Descriptor> {
        let Some(parent_name) = &descriptor.parent else {
            return Ok(descriptor.clone());
        };
        let parent_name = self.canonical_name(parent_name)?;

        let parent = if parent_name != name && self.definitions.contains_key(&parent_name) {
            self.resolve_chain(&parent_name, chain)?
        } else if parent_name == name {
            match &self.parent {
                Some(store) => store.resolve(&parent_name)?,
                None => {
                    return Err(DiError::invalid_definition(
                        name,
                        "parent name equals the definition's own name and there is no enclosing container",
                    ));
                }
            }
        } else {
            match &self.parent {
                Some(store) if store.contains(&parent_name) => store.resolve(&parent_name)?,
                _ => return Err(DiError::not_found(parent_name)),
            }
        };

        let mut flattened = parent.descriptor().clone();
        flattened.override_from(descriptor);
        Ok(flattened)
    }

    /// Merge a descriptor nested inside another component's definition.
    ///
    /// A shared-scope inner descriptor of a non-shared owner takes the owner's scope.
    pub fn merge_inner(
        &self,
        containing: &MergedDescriptor,
        name: &str,
        descriptor: &Descriptor,
    ) -> Result<Arc<MergedDescriptor>> {
        let mut flattened = self.flatten(name, descriptor, &mut Vec::new())?;
        let inner_scope = flattened.scope.clone().unwrap_or_default();
        if !containing.scope().is_singleton() && inner_scope.is_singleton() {
            flattened.scope = Some(containing.scope().clone());
        }
        build_merged(name, flattened).map(Arc::new)
    }

    /// Cached merged view without re-merging
    pub fn cached_merge(&self, name: &str) -> Option<Arc<MergedDescriptor>> {
        self.merged.get(name).map(|m| Arc::clone(&m))
    }
}

fn build_merged(name: &str, descriptor: Descriptor) -> Result<MergedDescriptor> {
    let component_type = descriptor.component_type.clone().ok_or_else(|| {
        DiError::invalid_definition(name, "no component type after merging parent chain")
    })?;
    Ok(MergedDescriptor::new(name, descriptor, component_type))
}

impl std::fmt::Debug for DefinitionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefinitionStore")
            .field("definitions", &self.definitions.len())
            .field("aliases", &self.aliases.len())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
