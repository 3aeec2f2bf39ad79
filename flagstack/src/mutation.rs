//! Audited create, update and delete of flag overrides.
//!
//! Every committed change goes through the same sequence:
//!
//! 1. validate against fresh resolution
//! 2. commit record + audit entry atomically
//! 3. invalidate the feature's cached resolutions
//! 4. publish a [`FlagEvent`]
//! 5. run the definition's `on_transition` hook if the effective state moved
//!
//! Create-or-update relies on the store's uniqueness check. A commit that
//! loses a race re-reads and tries once more; a second loss is reported as
//! [`FlagError::PersistenceConflict`].

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::audit::{AuditAction, AuditLogEntry};
use crate::context::{ContextHierarchy, ContextRef};
use crate::error::{FlagError, FlagResult};
use crate::events::{FlagEvent, SharedEventBus};
use crate::flag::{FlagKey, FlagRecord, FlagState};
use crate::registry::FeatureDefinition;
use crate::resolver::{FlagResolver, ResolvedFlag};
use crate::state::{FlagChange, FlagWrite, StoreError};
use crate::transition::{Actor, TransitionValidator};

/// Initial attempt plus one retry.
const MAX_WRITE_ATTEMPTS: u32 = 2;

#[derive(Clone)]
pub struct FlagMutator {
    validator: TransitionValidator,
    events: Option<SharedEventBus>,
}

impl FlagMutator {
    pub fn new(validator: TransitionValidator) -> Self {
        Self {
            validator,
            events: None,
        }
    }

    pub fn with_event_bus(mut self, events: SharedEventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn validator(&self) -> &TransitionValidator {
        &self.validator
    }

    fn resolver(&self) -> &FlagResolver {
        self.validator.resolver()
    }

    /// Set `feature` to `state` at exactly `hierarchy.context()`.
    ///
    /// Setting the state a context already holds writes nothing and records
    /// no audit entry. Returns the effective flag after the change.
    pub fn set(
        &self,
        feature: &str,
        hierarchy: &dyn ContextHierarchy,
        actor: &Actor,
        state: FlagState,
    ) -> FlagResult<ResolvedFlag> {
        let resolver = self.resolver();
        let def = resolver.registry().get(feature)?;
        let context = hierarchy.context();

        if !def.applies_to_context(&context) {
            return Err(FlagError::InvalidContextForFeature {
                feature: feature.to_string(),
                context,
                applies_to: def.applies_to,
            });
        }

        self.validator
            .validate(feature, hierarchy, actor, state)?
            .into_result(feature, context, state)?;

        let prior = resolver.resolve_effective(feature, hierarchy)?;
        if !self.write_with_retry(feature, context, actor, state)? {
            debug!(feature, context = %context, state = %state, "Flag already in requested state");
            return resolver.resolve_effective(feature, hierarchy);
        }

        resolver.cache().invalidate_feature(feature);
        let current = resolver.resolve_effective(feature, hierarchy)?;
        info!(
            feature,
            context = %context,
            actor = actor.id,
            prior = %prior.state(),
            state = %current.state(),
            locked = current.locked,
            "Flag set"
        );

        let event = FlagEvent::FlagSet {
            feature: feature.to_string(),
            context,
            actor_id: actor.id,
            prior_state: prior.state(),
            new_state: current.state(),
            timestamp: Utc::now(),
        };
        let moved = event.changes_effective_state();
        self.publish(event);
        if moved {
            run_hook(def, actor, &context, prior.state(), current.state());
        }

        Ok(current)
    }

    /// Remove the override at exactly `hierarchy.context()`. Returns the
    /// record as it was before deletion.
    pub fn unset(
        &self,
        feature: &str,
        hierarchy: &dyn ContextHierarchy,
        actor: &Actor,
    ) -> FlagResult<FlagRecord> {
        let resolver = self.resolver();
        let def = resolver.registry().get(feature)?;
        let context = hierarchy.context();
        let store = resolver.store();

        let existing = store
            .find(feature, &context)?
            .ok_or_else(|| FlagError::not_found(feature, context))?;

        let prior = resolver.resolve_effective(feature, hierarchy)?;
        if prior.locked {
            warn!(feature, context = %context, actor = actor.id, "Unset denied: locked by ancestor");
            return Err(FlagError::LockedByAncestor {
                feature: feature.to_string(),
                context,
            });
        }

        let audit = AuditLogEntry::new(
            feature,
            context,
            actor.id,
            AuditAction::Deleted,
            Some(existing.state),
            def.default_state,
        );
        let change = FlagChange::new(FlagWrite::Delete(FlagKey::new(feature, &context)), audit);
        let removed = match store.commit(change) {
            Ok(previous) => previous.unwrap_or(existing),
            Err(StoreError::NotFound(_)) => return Err(FlagError::not_found(feature, context)),
            Err(e) => return Err(e.into()),
        };

        resolver.cache().invalidate_feature(feature);
        let current = resolver.resolve_effective(feature, hierarchy)?;
        info!(
            feature,
            context = %context,
            actor = actor.id,
            removed = %removed.state,
            state = %current.state(),
            "Flag unset"
        );

        let event = FlagEvent::FlagUnset {
            feature: feature.to_string(),
            context,
            actor_id: actor.id,
            prior_state: prior.state(),
            new_state: current.state(),
            timestamp: Utc::now(),
        };
        let moved = event.changes_effective_state();
        self.publish(event);
        if moved {
            run_hook(def, actor, &context, prior.state(), current.state());
        }

        Ok(removed)
    }

    /// Create or update the record. `Ok(false)` when it already holds `state`.
    fn write_with_retry(
        &self,
        feature: &str,
        context: ContextRef,
        actor: &Actor,
        state: FlagState,
    ) -> FlagResult<bool> {
        let store = self.resolver().store();

        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            let record = FlagRecord::new(feature, context, state);
            let change = match store.find(feature, &context)? {
                Some(existing) if existing.state == state => return Ok(false),
                Some(existing) => FlagChange::new(
                    FlagWrite::Update(record),
                    AuditLogEntry::new(
                        feature,
                        context,
                        actor.id,
                        AuditAction::Updated,
                        Some(existing.state),
                        state,
                    ),
                ),
                None => FlagChange::new(
                    FlagWrite::Insert(record),
                    AuditLogEntry::new(feature, context, actor.id, AuditAction::Created, None, state),
                ),
            };

            match store.commit(change) {
                Ok(_) => return Ok(true),
                Err(StoreError::UniqueViolation(_) | StoreError::NotFound(_)) => {
                    warn!(feature, context = %context, attempt, "Concurrent flag write, re-reading");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(FlagError::PersistenceConflict {
            feature: feature.to_string(),
            context,
        })
    }

    fn publish(&self, event: FlagEvent) {
        if let Some(bus) = &self.events {
            bus.publish(event);
        }
    }
}

fn run_hook(
    def: &FeatureDefinition,
    actor: &Actor,
    context: &ContextRef,
    prior: FlagState,
    current: FlagState,
) {
    if let Some(hook) = &def.on_transition {
        debug!(feature = %def.name, context = %context, %prior, %current, "Running transition hook");
        hook(actor, context, prior, current);
    }
}
