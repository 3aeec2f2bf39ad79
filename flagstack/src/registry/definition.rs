//! Static description of one feature.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::{ContextKind, ContextRef};
use crate::flag::{FlagRecord, FlagState};
use crate::transition::{Actor, TransitionTable};

/// Callback run after a committed change of effective state:
/// `(actor, context, prior_state, new_state)`.
pub type StateChangeHook = Arc<dyn Fn(&Actor, &ContextRef, FlagState, FlagState) + Send + Sync>;

/// Per-feature adjustment of the transition table offered to an actor at a
/// context whose effective state is the third argument.
pub type TransitionHook =
    Arc<dyn Fn(&Actor, &ContextRef, FlagState, &mut TransitionTable) + Send + Sync>;

/// Wrap a closure as a [`StateChangeHook`].
pub fn state_change_hook<F>(f: F) -> StateChangeHook
where
    F: Fn(&Actor, &ContextRef, FlagState, FlagState) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Wrap a closure as a [`TransitionHook`].
pub fn transition_hook<F>(f: F) -> TransitionHook
where
    F: Fn(&Actor, &ContextRef, FlagState, &mut TransitionTable) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Which kind of context may hold overrides for a feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppliesTo {
    RootAccount,
    Account,
    Course,
    User,
}

impl AppliesTo {
    /// Whether a context of `kind` may hold an override.
    ///
    /// Accounts may carry course-level features for their courses, and root
    /// accounts may carry user-level features for their users.
    pub fn allows(self, kind: ContextKind) -> bool {
        match self {
            Self::RootAccount => kind == ContextKind::RootAccount,
            Self::Account => kind.is_account(),
            Self::Course => kind == ContextKind::Course || kind.is_account(),
            Self::User => kind == ContextKind::User || kind == ContextKind::RootAccount,
        }
    }
}

impl std::fmt::Display for AppliesTo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RootAccount => write!(f, "RootAccount"),
            Self::Account => write!(f, "Account"),
            Self::Course => write!(f, "Course"),
            Self::User => write!(f, "User"),
        }
    }
}

/// Registry entry for one feature. Immutable once registered.
#[derive(Clone)]
pub struct FeatureDefinition {
    pub name: String,
    pub display_name: String,
    pub description: String,
    pub applies_to: AppliesTo,
    pub default_state: FlagState,
    /// Only elevated actors may create the first override.
    pub hidden: bool,
    pub beta: bool,
    pub release_notes_url: Option<String>,
    pub autoexpand: bool,
    /// Root accounts observe `off` until they opt in explicitly.
    pub root_opt_in: bool,
    pub on_transition: Option<StateChangeHook>,
    pub custom_transition: Option<TransitionHook>,
}

impl FeatureDefinition {
    pub fn new(name: impl Into<String>, applies_to: AppliesTo, default_state: FlagState) -> Self {
        let name = name.into();
        Self {
            display_name: name.clone(),
            name,
            description: String::new(),
            applies_to,
            default_state,
            hidden: false,
            beta: false,
            release_notes_url: None,
            autoexpand: false,
            root_opt_in: false,
            on_transition: None,
            custom_transition: None,
        }
    }

    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = display_name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn beta(mut self) -> Self {
        self.beta = true;
        self
    }

    pub fn root_opt_in(mut self) -> Self {
        self.root_opt_in = true;
        self
    }

    pub fn with_release_notes(mut self, url: impl Into<String>) -> Self {
        self.release_notes_url = Some(url.into());
        self
    }

    pub fn on_transition(mut self, hook: StateChangeHook) -> Self {
        self.on_transition = Some(hook);
        self
    }

    pub fn custom_transition(mut self, hook: TransitionHook) -> Self {
        self.custom_transition = Some(hook);
        self
    }

    /// Whether `context` may hold an override of this feature.
    pub fn applies_to_context(&self, context: &ContextRef) -> bool {
        self.applies_to.allows(context.kind)
    }

    /// The synthetic global-default record.
    pub fn default_flag(&self) -> FlagRecord {
        FlagRecord::global_default(&self.name, self.default_state)
    }
}

impl std::fmt::Debug for FeatureDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureDefinition")
            .field("name", &self.name)
            .field("applies_to", &self.applies_to)
            .field("default_state", &self.default_state)
            .field("hidden", &self.hidden)
            .field("beta", &self.beta)
            .field("root_opt_in", &self.root_opt_in)
            .field("on_transition", &self.on_transition.is_some())
            .field("custom_transition", &self.custom_transition.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applies_to_matrix() {
        use ContextKind::*;

        assert!(AppliesTo::RootAccount.allows(RootAccount));
        assert!(!AppliesTo::RootAccount.allows(Account));
        assert!(!AppliesTo::RootAccount.allows(Course));

        assert!(AppliesTo::Account.allows(RootAccount));
        assert!(AppliesTo::Account.allows(Account));
        assert!(!AppliesTo::Account.allows(Course));

        assert!(AppliesTo::Course.allows(Course));
        assert!(AppliesTo::Course.allows(Account));
        assert!(!AppliesTo::Course.allows(User));

        assert!(AppliesTo::User.allows(User));
        assert!(AppliesTo::User.allows(RootAccount));
        assert!(!AppliesTo::User.allows(Account));
        assert!(!AppliesTo::User.allows(Course));
    }

    #[test]
    fn test_builder_flags() {
        let def = FeatureDefinition::new("fancy_wickets", AppliesTo::Course, FlagState::Allowed)
            .root_opt_in()
            .hidden()
            .with_display_name("Fancy Wickets");

        assert!(def.root_opt_in);
        assert!(def.hidden);
        assert!(!def.beta);
        assert_eq!(def.display_name, "Fancy Wickets");
        assert_eq!(def.default_flag().state, FlagState::Allowed);
        assert!(def.default_flag().is_global_default());
    }

    #[test]
    fn test_debug_does_not_require_hook_debug() {
        let def = FeatureDefinition::new("x", AppliesTo::User, FlagState::Off)
            .on_transition(state_change_hook(|_, _, _, _| {}));
        let debug = format!("{:?}", def);
        assert!(debug.contains("on_transition: true"));
    }
}
