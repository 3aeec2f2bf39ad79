//! Flag engine error types
//!
//! Every public operation returns [`FlagResult`]. Caller errors (unknown
//! feature, bad state string, denied transition) map to 4xx status codes;
//! only store failures and exhausted write retries map to 5xx.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::{ContextRef, HierarchyError};
use crate::flag::FlagState;
use crate::registry::{AppliesTo, RegistryError};
use crate::state::StoreError;

/// Result type alias for flag operations
pub type FlagResult<T> = Result<T, FlagError>;

/// Machine-readable error shape for callers that cannot match on Rust types
/// (the CLI, JSON consumers).
///
/// ```json
/// {
///   "code": "LOCKED_BY_ANCESTOR",
///   "message": "feature 'fancy_wickets' is locked above course:40",
///   "recovery_action": "Change the flag at the locking ancestor instead",
///   "context": { "feature": "fancy_wickets", "context": "course:40" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredError {
    pub code: String,
    pub message: String,
    pub recovery_action: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,
    /// Whether repeating the same call may succeed
    #[serde(default)]
    pub retryable: bool,
}

impl StructuredError {
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        recovery_action: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            recovery_action: recovery_action.into(),
            context: HashMap::new(),
            retryable: false,
        }
    }

    pub fn with_context(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for StructuredError {}

/// Errors produced by resolution, validation and mutation.
#[derive(Error, Debug)]
pub enum FlagError {
    #[error("unknown feature '{feature}'")]
    UnknownFeature { feature: String },

    #[error("feature '{feature}' applies to {applies_to} and cannot be set on {context}")]
    InvalidContextForFeature {
        feature: String,
        context: ContextRef,
        applies_to: AppliesTo,
    },

    #[error("invalid flag state '{value}' (expected off, allowed, allowed_on or on)")]
    InvalidState { value: String },

    #[error("feature '{feature}' is locked by an ancestor of {context}")]
    LockedByAncestor { feature: String, context: ContextRef },

    #[error("feature '{feature}' is hidden; only elevated actors may create the first override")]
    RequiresElevatedPrivilege { feature: String },

    #[error("feature '{feature}' cannot change to {state}: {message}")]
    StateChangeNotAllowed {
        feature: String,
        state: FlagState,
        message: String,
    },

    #[error("no flag for '{feature}' at {context}")]
    NotFound { feature: String, context: ContextRef },

    #[error("concurrent write to '{feature}' at {context} did not settle after retry")]
    PersistenceConflict { feature: String, context: ContextRef },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl FlagError {
    pub fn unknown_feature(feature: impl Into<String>) -> Self {
        Self::UnknownFeature {
            feature: feature.into(),
        }
    }

    pub fn not_found(feature: impl Into<String>, context: ContextRef) -> Self {
        Self::NotFound {
            feature: feature.into(),
            context,
        }
    }

    /// HTTP-style status for the facade and CLI.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::UnknownFeature { .. } | Self::NotFound { .. } => 404,
            Self::InvalidContextForFeature { .. } | Self::InvalidState { .. } => 400,
            Self::LockedByAncestor { .. }
            | Self::RequiresElevatedPrivilege { .. }
            | Self::StateChangeNotAllowed { .. } => 403,
            Self::Hierarchy(HierarchyError::UnknownContext(_)) => 404,
            Self::Hierarchy(_) | Self::Registry(_) => 400,
            Self::PersistenceConflict { .. } | Self::Store(_) => 500,
        }
    }

    /// Stable machine-readable code.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnknownFeature { .. } => "UNKNOWN_FEATURE",
            Self::InvalidContextForFeature { .. } => "INVALID_CONTEXT_FOR_FEATURE",
            Self::InvalidState { .. } => "INVALID_STATE",
            Self::LockedByAncestor { .. } => "LOCKED_BY_ANCESTOR",
            Self::RequiresElevatedPrivilege { .. } => "REQUIRES_ELEVATED_PRIVILEGE",
            Self::StateChangeNotAllowed { .. } => "STATE_CHANGE_NOT_ALLOWED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::PersistenceConflict { .. } => "PERSISTENCE_CONFLICT",
            Self::Store(_) => "STORE_ERROR",
            Self::Hierarchy(_) => "HIERARCHY_ERROR",
            Self::Registry(_) => "REGISTRY_ERROR",
        }
    }

    /// Whether repeating the call may succeed without any other change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::PersistenceConflict { .. } | Self::Store(_))
    }

    fn recovery_action(&self) -> &'static str {
        match self {
            Self::UnknownFeature { .. } => "Check the feature name against the registry listing",
            Self::InvalidContextForFeature { .. } => {
                "Set the flag on a context kind the feature applies to"
            }
            Self::InvalidState { .. } => "Use one of: off, allowed, allowed_on, on",
            Self::LockedByAncestor { .. } => "Change the flag at the locking ancestor instead",
            Self::RequiresElevatedPrivilege { .. } => {
                "Ask a site administrator to create the first override"
            }
            Self::StateChangeNotAllowed { .. } => {
                "List the permitted transitions for this context and pick one of them"
            }
            Self::NotFound { .. } => "Nothing to remove; the context has no override",
            Self::PersistenceConflict { .. } => "Retry the request",
            Self::Store(_) => "Check the store backend and retry",
            Self::Hierarchy(_) => "Check the context reference against the context tree",
            Self::Registry(_) => "Fix the feature definition file",
        }
    }

    /// Convert to the structured, serializable error shape.
    pub fn to_structured(&self) -> StructuredError {
        let mut err = StructuredError::new(
            self.error_code(),
            self.to_string(),
            self.recovery_action(),
        );

        match self {
            Self::UnknownFeature { feature } | Self::RequiresElevatedPrivilege { feature } => {
                err = err.with_context("feature", feature.clone());
            }
            Self::InvalidContextForFeature {
                feature,
                context,
                applies_to,
            } => {
                err = err
                    .with_context("feature", feature.clone())
                    .with_context("context", context.to_string())
                    .with_context("applies_to", applies_to.to_string());
            }
            Self::LockedByAncestor { feature, context }
            | Self::NotFound { feature, context }
            | Self::PersistenceConflict { feature, context } => {
                err = err
                    .with_context("feature", feature.clone())
                    .with_context("context", context.to_string());
            }
            Self::StateChangeNotAllowed { feature, state, .. } => {
                err = err
                    .with_context("feature", feature.clone())
                    .with_context("state", state.as_str());
            }
            Self::InvalidState { value } => {
                err = err.with_context("value", value.clone());
            }
            Self::Store(_) | Self::Hierarchy(_) | Self::Registry(_) => {}
        }

        if self.is_retryable() {
            err = err.retryable();
        }
        err
    }
}
