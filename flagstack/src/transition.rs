//! Transition validation: whether an actor may move a feature to a new
//! state at a context.
//!
//! Checks run in a fixed order and stop at the first denial:
//!
//! ```text
//! locked by ancestor → hidden & not elevated → transition table → allowed
//! ```
//!
//! Authorization beyond that is not this crate's concern. [`TransitionPolicy`]
//! is the seam where a host application decides who counts as elevated and
//! which states are on offer at a context.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::context::{ContextHierarchy, ContextRef};
use crate::error::{FlagError, FlagResult};
use crate::flag::FlagState;
use crate::registry::FeatureDefinition;
use crate::resolver::FlagResolver;

/// Who is asking for a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub id: u64,
    #[serde(default)]
    pub site_admin: bool,
}

impl Actor {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            site_admin: false,
        }
    }

    pub fn site_admin(id: u64) -> Self {
        Self {
            id,
            site_admin: true,
        }
    }
}

/// Whether one target state is on offer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub locked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TransitionRule {
    pub fn permitted() -> Self {
        Self::default()
    }

    pub fn locked(message: impl Into<String>) -> Self {
        Self {
            locked: true,
            message: Some(message.into()),
        }
    }
}

/// Target state → rule. States without an entry are permitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransitionTable {
    rules: BTreeMap<FlagState, TransitionRule>,
}

impl TransitionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every state present and permitted.
    pub fn all_permitted() -> Self {
        let mut table = Self::new();
        for state in FlagState::ALL {
            table.permit(state);
        }
        table
    }

    pub fn permit(&mut self, state: FlagState) -> &mut Self {
        self.rules.insert(state, TransitionRule::permitted());
        self
    }

    pub fn lock(&mut self, state: FlagState, message: impl Into<String>) -> &mut Self {
        self.rules.insert(state, TransitionRule::locked(message));
        self
    }

    pub fn remove(&mut self, state: FlagState) -> Option<TransitionRule> {
        self.rules.remove(&state)
    }

    pub fn get(&self, state: FlagState) -> Option<&TransitionRule> {
        self.rules.get(&state)
    }

    pub fn is_permitted(&self, state: FlagState) -> bool {
        self.rules.get(&state).map(|r| !r.locked).unwrap_or(true)
    }

    /// States that are listed and not locked.
    pub fn permitted_states(&self) -> Vec<FlagState> {
        self.rules
            .iter()
            .filter(|(_, rule)| !rule.locked)
            .map(|(state, _)| *state)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&FlagState, &TransitionRule)> {
        self.rules.iter()
    }
}

/// Why a transition was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DenialReason {
    LockedByAncestor,
    RequiresElevatedPrivilege,
    StateChangeNotAllowed { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "denial", rename_all = "snake_case")]
pub enum TransitionDecision {
    Allowed,
    Denied(DenialReason),
}

impl TransitionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    /// Convert a denial into the matching [`FlagError`].
    pub fn into_result(
        self,
        feature: &str,
        context: ContextRef,
        state: FlagState,
    ) -> FlagResult<()> {
        match self {
            Self::Allowed => Ok(()),
            Self::Denied(DenialReason::LockedByAncestor) => Err(FlagError::LockedByAncestor {
                feature: feature.to_string(),
                context,
            }),
            Self::Denied(DenialReason::RequiresElevatedPrivilege) => {
                Err(FlagError::RequiresElevatedPrivilege {
                    feature: feature.to_string(),
                })
            }
            Self::Denied(DenialReason::StateChangeNotAllowed { message }) => {
                Err(FlagError::StateChangeNotAllowed {
                    feature: feature.to_string(),
                    state,
                    message,
                })
            }
        }
    }
}

/// Host-supplied authorization hooks.
pub trait TransitionPolicy: Send + Sync {
    /// Whether `actor` may create the first override of a hidden feature.
    fn is_elevated(&self, actor: &Actor) -> bool;

    /// States on offer for `def` at `context`, whose effective state is
    /// `current`.
    fn transitions(
        &self,
        def: &FeatureDefinition,
        actor: &Actor,
        context: &ContextRef,
        current: FlagState,
    ) -> TransitionTable;
}

/// Accounts may take any state. Courses and users only decide for
/// themselves (`off`/`on`): there is nothing below them to delegate to.
/// Site admins are elevated. The definition's `custom_transition` hook
/// gets the last word.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultTransitionPolicy;

impl TransitionPolicy for DefaultTransitionPolicy {
    fn is_elevated(&self, actor: &Actor) -> bool {
        actor.site_admin
    }

    fn transitions(
        &self,
        def: &FeatureDefinition,
        actor: &Actor,
        context: &ContextRef,
        current: FlagState,
    ) -> TransitionTable {
        let mut table = TransitionTable::all_permitted();
        if !context.kind.is_account() {
            table
                .lock(FlagState::Allowed, "state is not valid in context")
                .lock(FlagState::AllowedOn, "state is not valid in context");
        }

        if let Some(hook) = &def.custom_transition {
            hook(actor, context, current, &mut table);
        }
        table
    }
}

/// Runs the transition checks against fresh (uncached) resolution.
#[derive(Clone)]
pub struct TransitionValidator {
    resolver: FlagResolver,
    policy: Arc<dyn TransitionPolicy>,
}

impl TransitionValidator {
    pub fn new(resolver: FlagResolver, policy: Arc<dyn TransitionPolicy>) -> Self {
        Self { resolver, policy }
    }

    pub fn with_default_policy(resolver: FlagResolver) -> Self {
        Self::new(resolver, Arc::new(DefaultTransitionPolicy))
    }

    pub fn resolver(&self) -> &FlagResolver {
        &self.resolver
    }

    pub fn policy(&self) -> &Arc<dyn TransitionPolicy> {
        &self.policy
    }

    pub fn validate(
        &self,
        feature: &str,
        hierarchy: &dyn ContextHierarchy,
        actor: &Actor,
        requested: FlagState,
    ) -> FlagResult<TransitionDecision> {
        let def = self.resolver.registry().get(feature)?;
        let context = hierarchy.context();
        let current = self.resolver.resolve_effective(feature, hierarchy)?;

        let decision = if current.locked {
            TransitionDecision::Denied(DenialReason::LockedByAncestor)
        } else if def.hidden && !current.is_persisted() && !self.policy.is_elevated(actor) {
            TransitionDecision::Denied(DenialReason::RequiresElevatedPrivilege)
        } else {
            let table = self
                .policy
                .transitions(def, actor, &context, current.state());
            match table.get(requested) {
                Some(rule) if rule.locked => {
                    let message = rule
                        .message
                        .clone()
                        .unwrap_or_else(|| format!("transition to {} is not permitted", requested));
                    TransitionDecision::Denied(DenialReason::StateChangeNotAllowed { message })
                }
                _ => TransitionDecision::Allowed,
            }
        };

        if let TransitionDecision::Denied(reason) = &decision {
            warn!(
                feature,
                context = %context,
                actor = actor.id,
                requested = %requested,
                ?reason,
                "Transition denied"
            );
        }
        Ok(decision)
    }

    /// The table an actor would be offered at this context, with every
    /// state locked when the flag is locked by an ancestor.
    pub fn transitions_for(
        &self,
        feature: &str,
        hierarchy: &dyn ContextHierarchy,
        actor: &Actor,
    ) -> FlagResult<TransitionTable> {
        let def = self.resolver.registry().get(feature)?;
        let context = hierarchy.context();
        let current = self.resolver.resolve_effective(feature, hierarchy)?;

        if current.locked {
            let mut table = TransitionTable::new();
            for state in FlagState::ALL {
                table.lock(state, "locked by an ancestor");
            }
            return Ok(table);
        }
        Ok(self
            .policy
            .transitions(def, actor, &context, current.state()))
    }
}
