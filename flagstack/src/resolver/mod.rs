//! Flag resolution through a context hierarchy.
//!
//! # Algorithm
//!
//! All records of the feature on the requested chain are read in one
//! consistent [`FlagStore::snapshot_chain`] call, then walked from the root
//! account down:
//!
//! 1. An `off` or `on` record terminates the walk. Since the walk starts at
//!    the root, the least specific absolute record wins and descendants
//!    cannot contradict it. The result is locked unless that record sits at
//!    the requested context.
//! 2. `allowed`/`allowed_on` records do not terminate; the last one seen
//!    (the most specific) wins, unlocked.
//! 3. With no record at all the definition default applies, unlocked. A
//!    `root_opt_in` feature whose default is `allowed` resolves to `off` at a
//!    root account until that account opts in.
//!
//! Visibility filters ([`ResolveOptions`]) are applied to the winner
//! afterward and may turn it into `None`.

pub mod cache;

pub use cache::{CacheKey, CacheStats, ResolutionCache};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context::{ContextHierarchy, ContextKind, ContextRef};
use crate::error::FlagResult;
use crate::flag::{FlagRecord, FlagState};
use crate::registry::{FeatureDefinition, FeatureRegistry};
use crate::state::{FlagStore, SharedFlagStore};

/// Per-call resolution switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResolveOptions {
    /// Read the store even if a cached result exists, and do not cache.
    #[serde(default)]
    pub skip_cache: bool,
    /// Return hidden features that nobody has overridden yet.
    #[serde(default)]
    pub override_hidden: bool,
    /// Return `None` for features forced on by an ancestor or the default.
    #[serde(default)]
    pub hide_inherited_enabled: bool,
}

impl ResolveOptions {
    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn override_hidden(mut self) -> Self {
        self.override_hidden = true;
        self
    }

    pub fn hide_inherited_enabled(mut self) -> Self {
        self.hide_inherited_enabled = true;
        self
    }
}

/// Where a resolved state came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagOrigin {
    /// A persisted override on the chain.
    Record,
    /// The definition default.
    GlobalDefault,
    /// Synthetic `off` for a root account that has not opted in.
    RootOptIn,
}

/// Effective flag for one feature at one context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedFlag {
    /// Winning record. Synthetic unless `origin` is [`FlagOrigin::Record`].
    pub flag: FlagRecord,
    /// The requested context may not change this state.
    pub locked: bool,
    pub origin: FlagOrigin,
    /// Context the caller asked about.
    pub requested: ContextRef,
}

impl ResolvedFlag {
    pub fn state(&self) -> FlagState {
        self.flag.state
    }

    pub fn is_enabled(&self) -> bool {
        self.flag.state.is_enabled()
    }

    /// Anything but `off`.
    pub fn is_allowed(&self) -> bool {
        self.flag.state != FlagState::Off
    }

    pub fn is_persisted(&self) -> bool {
        self.origin == FlagOrigin::Record
    }

    /// Whether the winning record sits at the requested context.
    pub fn is_local(&self) -> bool {
        self.is_persisted() && self.flag.is_at(&self.requested)
    }
}

/// Resolves flags against a registry and a store, through a shared cache.
#[derive(Clone)]
pub struct FlagResolver {
    registry: Arc<FeatureRegistry>,
    store: SharedFlagStore,
    cache: Arc<ResolutionCache>,
}

impl FlagResolver {
    pub fn new(registry: Arc<FeatureRegistry>, store: SharedFlagStore) -> Self {
        Self::with_cache(registry, store, Arc::new(ResolutionCache::new()))
    }

    pub fn with_cache(
        registry: Arc<FeatureRegistry>,
        store: SharedFlagStore,
        cache: Arc<ResolutionCache>,
    ) -> Self {
        Self {
            registry,
            store,
            cache,
        }
    }

    pub fn registry(&self) -> &Arc<FeatureRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &SharedFlagStore {
        &self.store
    }

    pub fn cache(&self) -> &Arc<ResolutionCache> {
        &self.cache
    }

    /// Resolve `feature` at `hierarchy.context()`.
    ///
    /// `Ok(None)` means the feature is hidden from this caller by one of the
    /// visibility options. Unknown features are an error.
    pub fn resolve(
        &self,
        feature: &str,
        hierarchy: &dyn ContextHierarchy,
        options: ResolveOptions,
    ) -> FlagResult<Option<ResolvedFlag>> {
        let def = self.registry.get(feature)?;
        let requested = hierarchy.context();
        let key = CacheKey::new(feature, requested, options);

        if !options.skip_cache {
            if let Some(hit) = self.cache.get(&key) {
                debug!(feature, context = %requested, "Resolved from cache");
                return Ok(hit);
            }
        }

        let generation = self.cache.generation(feature);
        let effective = effective_flag(def, self.store.as_ref(), hierarchy)?;
        let visible = apply_visibility(def, effective, options);

        debug!(
            feature,
            context = %requested,
            state = ?visible.as_ref().map(|r| r.state()),
            locked = visible.as_ref().map(|r| r.locked).unwrap_or(false),
            "Resolved flag"
        );

        if !options.skip_cache {
            self.cache.fill(key, generation, visible.clone());
        }
        Ok(visible)
    }

    /// Uncached effective flag, ignoring every visibility filter.
    pub fn resolve_effective(
        &self,
        feature: &str,
        hierarchy: &dyn ContextHierarchy,
    ) -> FlagResult<ResolvedFlag> {
        let def = self.registry.get(feature)?;
        effective_flag(def, self.store.as_ref(), hierarchy)
    }

    /// Whether `feature` is turned on at the context. Hidden features nobody
    /// has overridden count as off.
    pub fn is_enabled(&self, feature: &str, hierarchy: &dyn ContextHierarchy) -> FlagResult<bool> {
        Ok(self
            .resolve(feature, hierarchy, ResolveOptions::default())?
            .map(|r| r.is_enabled())
            .unwrap_or(false))
    }

    /// Whether `feature` is anything but `off` at the context.
    pub fn is_allowed(&self, feature: &str, hierarchy: &dyn ContextHierarchy) -> FlagResult<bool> {
        Ok(self
            .resolve(feature, hierarchy, ResolveOptions::default())?
            .map(|r| r.is_allowed())
            .unwrap_or(false))
    }
}

fn effective_flag(
    def: &FeatureDefinition,
    store: &dyn FlagStore,
    hierarchy: &dyn ContextHierarchy,
) -> FlagResult<ResolvedFlag> {
    let requested = hierarchy.context();
    let records = store.snapshot_chain(&def.name, &hierarchy.chain())?;

    let mut winner = None;
    for record in records.iter().rev() {
        winner = Some(record);
        if record.state.is_terminal() {
            break;
        }
    }

    Ok(match winner {
        Some(record) => ResolvedFlag {
            locked: record.locks(&requested),
            flag: record.clone(),
            origin: FlagOrigin::Record,
            requested,
        },
        None => default_flag(def, requested),
    })
}

fn default_flag(def: &FeatureDefinition, requested: ContextRef) -> ResolvedFlag {
    if def.root_opt_in
        && def.default_state == FlagState::Allowed
        && requested.kind == ContextKind::RootAccount
    {
        return ResolvedFlag {
            flag: FlagRecord::new(&def.name, requested, FlagState::Off),
            locked: false,
            origin: FlagOrigin::RootOptIn,
            requested,
        };
    }

    ResolvedFlag {
        flag: def.default_flag(),
        locked: false,
        origin: FlagOrigin::GlobalDefault,
        requested,
    }
}

fn apply_visibility(
    def: &FeatureDefinition,
    resolved: ResolvedFlag,
    options: ResolveOptions,
) -> Option<ResolvedFlag> {
    if options.hide_inherited_enabled
        && resolved.state() == FlagState::On
        && !resolved.flag.is_at(&resolved.requested)
    {
        return None;
    }
    if def.hidden && !resolved.is_persisted() && !options.override_hidden {
        return None;
    }
    Some(resolved)
}
