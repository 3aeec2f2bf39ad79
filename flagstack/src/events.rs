//! Change notifications for other cache layers and observers
//!
//! Mutations publish a [`FlagEvent`] after their commit and after the local
//! resolution cache has been invalidated. Publishing never fails: an event
//! with no subscribers is simply dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::context::ContextRef;
use crate::flag::FlagState;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to FlagEventBus
pub type SharedEventBus = Arc<FlagEventBus>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlagEvent {
    /// A record was created or updated
    FlagSet {
        feature: String,
        context: ContextRef,
        actor_id: u64,
        prior_state: FlagState,
        new_state: FlagState,
        timestamp: DateTime<Utc>,
    },

    /// A record was deleted
    FlagUnset {
        feature: String,
        context: ContextRef,
        actor_id: u64,
        prior_state: FlagState,
        new_state: FlagState,
        timestamp: DateTime<Utc>,
    },
}

impl FlagEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::FlagSet { .. } => "flag_set",
            Self::FlagUnset { .. } => "flag_unset",
        }
    }

    pub fn feature(&self) -> &str {
        match self {
            Self::FlagSet { feature, .. } | Self::FlagUnset { feature, .. } => feature,
        }
    }

    pub fn context(&self) -> ContextRef {
        match self {
            Self::FlagSet { context, .. } | Self::FlagUnset { context, .. } => *context,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::FlagSet { timestamp, .. } | Self::FlagUnset { timestamp, .. } => *timestamp,
        }
    }

    /// Effective state changed at the event's context.
    pub fn changes_effective_state(&self) -> bool {
        match self {
            Self::FlagSet {
                prior_state,
                new_state,
                ..
            }
            | Self::FlagUnset {
                prior_state,
                new_state,
                ..
            } => prior_state != new_state,
        }
    }
}

/// Broadcast bus for flag change events
pub struct FlagEventBus {
    sender: broadcast::Sender<FlagEvent>,
}

impl FlagEventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish to all subscribers. Returns how many received it.
    pub fn publish(&self, event: FlagEvent) -> usize {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(event_type, receivers = count, "Event published");
                count
            }
            Err(_) => {
                debug!(event_type, "Event published (no receivers)");
                0
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlagEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for FlagEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for FlagEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlagEventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
