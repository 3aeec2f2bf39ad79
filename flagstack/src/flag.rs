//! Flag states and persisted override records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::ContextRef;
use crate::error::FlagError;

/// State a feature can be in at a context.
///
/// `Off` and `On` are absolute: once set at a context, every descendant
/// observes them. `Allowed` and `AllowedOn` leave the decision to more
/// specific contexts (`AllowedOn` defaults to enabled, `Allowed` to disabled).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagState {
    Off,
    Allowed,
    AllowedOn,
    On,
}

impl FlagState {
    /// All four states, in declaration order.
    pub const ALL: [FlagState; 4] = [Self::Off, Self::Allowed, Self::AllowedOn, Self::On];

    /// Whether a context observing this state has the feature turned on.
    pub fn is_enabled(self) -> bool {
        matches!(self, Self::On | Self::AllowedOn)
    }

    /// Whether more specific contexts may still override this state.
    pub fn can_override(self) -> bool {
        matches!(self, Self::Allowed | Self::AllowedOn)
    }

    /// Whether this state terminates resolution (`off` / `on`).
    pub fn is_terminal(self) -> bool {
        !self.can_override()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Allowed => "allowed",
            Self::AllowedOn => "allowed_on",
            Self::On => "on",
        }
    }
}

impl std::fmt::Display for FlagState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FlagState {
    type Err = FlagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "allowed" => Ok(Self::Allowed),
            "allowed_on" => Ok(Self::AllowedOn),
            "on" => Ok(Self::On),
            other => Err(FlagError::InvalidState {
                value: other.to_string(),
            }),
        }
    }
}

/// Unique key of a persisted override: `(feature, context_type, context_id)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FlagKey {
    pub feature: String,
    pub context_type: String,
    pub context_id: u64,
}

impl FlagKey {
    pub fn new(feature: &str, context: &ContextRef) -> Self {
        Self {
            feature: feature.to_string(),
            context_type: context.context_type().to_string(),
            context_id: context.id,
        }
    }
}

impl std::fmt::Display for FlagKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}:{}", self.feature, self.context_type, self.context_id)
    }
}

/// A single flag override, or the synthetic global default when `context`
/// is `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRecord {
    /// Feature name, references a registered definition.
    pub feature: String,
    /// Owning context; `None` for the global default sentinel.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextRef>,
    pub state: FlagState,
    /// Legacy column. Always `None` on write and ignored everywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locking_account_id: Option<u64>,
    pub updated_at: DateTime<Utc>,
}

impl FlagRecord {
    /// New override owned by `context`.
    pub fn new(feature: &str, context: ContextRef, state: FlagState) -> Self {
        Self {
            feature: feature.to_string(),
            context: Some(context),
            state,
            locking_account_id: None,
            updated_at: Utc::now(),
        }
    }

    /// Synthetic record carrying a definition's default.
    pub fn global_default(feature: &str, state: FlagState) -> Self {
        Self {
            feature: feature.to_string(),
            context: None,
            state,
            locking_account_id: None,
            updated_at: Utc::now(),
        }
    }

    /// Store key, or `None` for the global default.
    pub fn key(&self) -> Option<FlagKey> {
        self.context.map(|ctx| FlagKey::new(&self.feature, &ctx))
    }

    pub fn is_global_default(&self) -> bool {
        self.context.is_none()
    }

    /// Whether this record is owned by exactly `context`.
    pub fn is_at(&self, context: &ContextRef) -> bool {
        self.context
            .map(|own| own.same_target(context))
            .unwrap_or(false)
    }

    /// Whether this record pins the state for `query`: an absolute state set
    /// somewhere other than `query` itself.
    pub fn locks(&self, query: &ContextRef) -> bool {
        self.state.is_terminal() && !self.is_at(query)
    }
}
