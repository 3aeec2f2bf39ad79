//! Append-only log of flag changes.
//!
//! Entries are written in the same atomic commit as the record change they
//! describe (see [`FlagStore::commit`](crate::state::FlagStore::commit)) and
//! are never read by the resolver.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::ContextRef;
use crate::flag::FlagState;
use crate::state::StoreResult;

/// What happened to the persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Created,
    Updated,
    Deleted,
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Deleted => write!(f, "deleted"),
        }
    }
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub feature: String,
    pub context: ContextRef,
    pub actor_id: u64,
    pub action: AuditAction,
    /// State of the exact-context record before the change, `None` on create.
    pub prior_state: Option<FlagState>,
    /// State after the change. For deletes this is the definition default.
    pub new_state: FlagState,
    pub timestamp: DateTime<Utc>,
}

impl AuditLogEntry {
    pub fn new(
        feature: &str,
        context: ContextRef,
        actor_id: u64,
        action: AuditAction,
        prior_state: Option<FlagState>,
        new_state: FlagState,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            feature: feature.to_string(),
            context,
            actor_id,
            action,
            prior_state,
            new_state,
            timestamp: Utc::now(),
        }
    }
}

/// Filter for [`AuditLog::entries`]. Empty query matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_id: Option<u64>,
    /// Keep only the newest `limit` entries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn feature(mut self, feature: impl Into<String>) -> Self {
        self.feature = Some(feature.into());
        self
    }

    pub fn context(mut self, context: ContextRef) -> Self {
        self.context = Some(context);
        self
    }

    pub fn actor(mut self, actor_id: u64) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(feature) = &self.feature {
            if &entry.feature != feature {
                return false;
            }
        }
        if let Some(context) = &self.context {
            if !entry.context.same_target(context) {
                return false;
            }
        }
        if let Some(actor_id) = self.actor_id {
            if entry.actor_id != actor_id {
                return false;
            }
        }
        true
    }

    /// Filter `entries` (already in chronological order) and apply `limit`.
    pub fn apply<'a>(&self, entries: impl IntoIterator<Item = &'a AuditLogEntry>) -> Vec<AuditLogEntry> {
        let mut matched: Vec<AuditLogEntry> = entries
            .into_iter()
            .filter(|e| self.matches(e))
            .cloned()
            .collect();
        if let Some(limit) = self.limit {
            let skip = matched.len().saturating_sub(limit);
            matched.drain(..skip);
        }
        matched
    }
}

/// Read access to the audit trail.
///
/// Entries are written only by
/// [`FlagStore::commit`](crate::state::FlagStore::commit), together with the
/// record change they describe.
pub trait AuditLog: Send + Sync {
    /// Matching entries, oldest first.
    fn entries(&self, query: &AuditQuery) -> StoreResult<Vec<AuditLogEntry>>;
}
