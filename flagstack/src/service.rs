//! Request/response facade over the engine.
//!
//! One method per operation an HTTP or CLI front end exposes. Contexts are
//! plain [`ContextRef`]s looked up in a [`ContextTree`]; errors carry
//! [`FlagError::status_code`] for the transport to use.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audit::{AuditLogEntry, AuditQuery};
use crate::context::{ContextHierarchy, ContextNode, ContextRef, ContextTree};
use crate::error::{FlagError, FlagResult};
use crate::events::SharedEventBus;
use crate::flag::{FlagRecord, FlagState};
use crate::mutation::FlagMutator;
use crate::registry::{AppliesTo, FeatureDefinition, FeatureRegistry};
use crate::resolver::{CacheStats, FlagResolver, ResolveOptions, ResolvedFlag};
use crate::state::SharedFlagStore;
use crate::transition::{
    Actor, DefaultTransitionPolicy, TransitionPolicy, TransitionTable, TransitionValidator,
};

pub const DEFAULT_PER_PAGE: usize = 50;
pub const MAX_PER_PAGE: usize = 100;

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    #[serde(default = "default_page")]
    pub page: usize,
    #[serde(default = "default_per_page")]
    pub per_page: usize,
}

fn default_page() -> usize {
    1
}

fn default_per_page() -> usize {
    DEFAULT_PER_PAGE
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: default_page(),
            per_page: default_per_page(),
        }
    }
}

impl PageRequest {
    pub fn new(page: usize, per_page: usize) -> Self {
        Self { page, per_page }.normalized()
    }

    /// Page at least 1, page size clamped to `1..=MAX_PER_PAGE`.
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            per_page: self.per_page.clamp(1, MAX_PER_PAGE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}

impl<T> Page<T> {
    pub fn from_items(items: Vec<T>, request: PageRequest) -> Self {
        let request = request.normalized();
        let total = items.len();
        let start = (request.page - 1).saturating_mul(request.per_page);
        let items = items
            .into_iter()
            .skip(start)
            .take(request.per_page)
            .collect();
        Self {
            items,
            page: request.page,
            per_page: request.per_page,
            total,
        }
    }

    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.per_page.max(1))
    }

    pub fn has_next(&self) -> bool {
        self.page < self.total_pages()
    }
}

/// One row of a feature listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureListing {
    pub feature: String,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub applies_to: AppliesTo,
    pub beta: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes_url: Option<String>,
    pub autoexpand: bool,
    pub feature_flag: ResolvedFlag,
}

impl FeatureListing {
    fn new(def: &FeatureDefinition, flag: ResolvedFlag) -> Self {
        Self {
            feature: def.name.clone(),
            display_name: def.display_name.clone(),
            description: def.description.clone(),
            applies_to: def.applies_to,
            beta: def.beta,
            release_notes_url: def.release_notes_url.clone(),
            autoexpand: def.autoexpand,
            feature_flag: flag,
        }
    }
}

/// The engine wired together: registry, store, hierarchy, cache, policy and
/// event bus.
#[derive(Clone)]
pub struct FeatureFlagService {
    tree: Arc<ContextTree>,
    resolver: FlagResolver,
    policy: Arc<dyn TransitionPolicy>,
    events: Option<SharedEventBus>,
    mutator: FlagMutator,
}

impl FeatureFlagService {
    pub fn new(
        registry: Arc<FeatureRegistry>,
        store: SharedFlagStore,
        tree: Arc<ContextTree>,
    ) -> Self {
        let resolver = FlagResolver::new(registry, store);
        let policy: Arc<dyn TransitionPolicy> = Arc::new(DefaultTransitionPolicy);
        let mutator = FlagMutator::new(TransitionValidator::new(resolver.clone(), policy.clone()));
        Self {
            tree,
            resolver,
            policy,
            events: None,
            mutator,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn TransitionPolicy>) -> Self {
        self.policy = policy;
        self.rebuild_mutator();
        self
    }

    pub fn with_event_bus(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self.rebuild_mutator();
        self
    }

    fn rebuild_mutator(&mut self) {
        let validator = TransitionValidator::new(self.resolver.clone(), self.policy.clone());
        let mut mutator = FlagMutator::new(validator);
        if let Some(events) = &self.events {
            mutator = mutator.with_event_bus(events.clone());
        }
        self.mutator = mutator;
    }

    pub fn resolver(&self) -> &FlagResolver {
        &self.resolver
    }

    pub fn mutator(&self) -> &FlagMutator {
        &self.mutator
    }

    pub fn tree(&self) -> &Arc<ContextTree> {
        &self.tree
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.resolver.cache().stats()
    }

    fn node(&self, ctx: ContextRef) -> FlagResult<ContextNode> {
        Ok(self.tree.node(ctx)?)
    }

    /// Features that apply to `ctx`, with their flags.
    ///
    /// Flags forced on from above are left out. Managers also see hidden
    /// features and always read fresh state.
    pub fn list_features(
        &self,
        ctx: ContextRef,
        can_manage: bool,
        page: PageRequest,
    ) -> FlagResult<Page<FeatureListing>> {
        let node = self.node(ctx)?;
        let options = ResolveOptions {
            skip_cache: can_manage,
            override_hidden: can_manage,
            hide_inherited_enabled: true,
        };

        let mut listings = Vec::new();
        for def in self.resolver.registry().applicable_to(node.context().kind) {
            if let Some(flag) = self.resolver.resolve(&def.name, &node, options)? {
                listings.push(FeatureListing::new(def, flag));
            }
        }
        debug!(context = %ctx, can_manage, total = listings.len(), "Listed features");

        Ok(Page::from_items(listings, page))
    }

    /// Names of the features enabled at `ctx`.
    pub fn enabled_features(&self, ctx: ContextRef) -> FlagResult<Vec<String>> {
        let node = self.node(ctx)?;
        let mut enabled = Vec::new();
        for def in self.resolver.registry().applicable_to(node.context().kind) {
            if self.resolver.is_enabled(&def.name, &node)? {
                enabled.push(def.name.clone());
            }
        }
        Ok(enabled)
    }

    /// Effective flag; hidden features nobody has overridden are not found.
    pub fn get_flag(&self, name: &str, ctx: ContextRef) -> FlagResult<ResolvedFlag> {
        let node = self.node(ctx)?;
        self.resolver
            .resolve(name, &node, ResolveOptions::default())?
            .ok_or_else(|| FlagError::not_found(name, ctx))
    }

    pub fn set_flag(
        &self,
        name: &str,
        ctx: ContextRef,
        actor: &Actor,
        state: &str,
    ) -> FlagResult<ResolvedFlag> {
        let state: FlagState = state.parse()?;
        let node = self.node(ctx)?;
        self.mutator.set(name, &node, actor, state)
    }

    /// Remove the override at `ctx`; returns it as it was.
    pub fn unset_flag(&self, name: &str, ctx: ContextRef, actor: &Actor) -> FlagResult<FlagRecord> {
        let node = self.node(ctx)?;
        self.mutator.unset(name, &node, actor)
    }

    pub fn transitions(
        &self,
        name: &str,
        ctx: ContextRef,
        actor: &Actor,
    ) -> FlagResult<TransitionTable> {
        let node = self.node(ctx)?;
        self.mutator.validator().transitions_for(name, &node, actor)
    }

    /// Every stored override of a feature, across all contexts.
    pub fn overrides(&self, name: &str) -> FlagResult<Vec<FlagRecord>> {
        self.resolver.registry().get(name)?;
        Ok(self.resolver.store().records_for_feature(name)?)
    }

    pub fn audit(&self, query: &AuditQuery) -> FlagResult<Vec<AuditLogEntry>> {
        Ok(self.resolver.store().entries(query)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_request_normalization() {
        assert_eq!(PageRequest::new(0, 0), PageRequest { page: 1, per_page: 1 });
        assert_eq!(PageRequest::new(3, 500).per_page, MAX_PER_PAGE);
        assert_eq!(PageRequest::default().per_page, DEFAULT_PER_PAGE);
    }

    #[test]
    fn test_page_slicing() {
        let page = Page::from_items((1..=7).collect::<Vec<_>>(), PageRequest::new(2, 3));
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages(), 3);
        assert!(page.has_next());

        let past_end = Page::from_items(vec![1, 2], PageRequest::new(5, 3));
        assert!(past_end.items.is_empty());
        assert!(!past_end.has_next());
    }
}
