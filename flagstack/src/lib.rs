//! Hierarchical Feature Flag Library
//!
//! This library provides:
//! - A registry of feature definitions loaded from YAML/TOML or built in code
//! - Resolution of a feature's effective state through an
//!   account → sub-account → course/user hierarchy, with locking
//! - Transition validation with a pluggable authorization policy
//! - Audited, race-safe create/update/delete of overrides
//! - In-memory and RocksDB stores, a resolution cache and a change event bus
//!
//! # States
//!
//! | State        | Enabled | Descendants may override |
//! |--------------|---------|--------------------------|
//! | `off`        | no      | no                       |
//! | `allowed`    | no      | yes                      |
//! | `allowed_on` | yes     | yes                      |
//! | `on`         | yes     | no                       |
//!
//! # Usage
//!
//! ```rust,ignore
//! use flagstack::{Actor, ContextRef, ContextTree, FeatureFlagService, MemoryFlagStore};
//!
//! let service = FeatureFlagService::new(registry, MemoryFlagStore::new().shared(), tree);
//! service.set_flag("fancy_wickets", ContextRef::account(2), &Actor::new(7), "on")?;
//! assert!(service.get_flag("fancy_wickets", ContextRef::course(40))?.is_enabled());
//! ```
//!
//! # Features
//!
//! - `rocksdb-store`: durable [`state::RocksFlagStore`]

#![allow(clippy::uninlined_format_args)]

pub mod audit;
pub mod context;
pub mod error;
pub mod events;
pub mod flag;
pub mod mutation;
pub mod registry;
pub mod resolver;
pub mod service;
pub mod state;
pub mod transition;

// Re-export core data types
pub use context::{ContextHierarchy, ContextKind, ContextNode, ContextRef, ContextTree, TreeConfig};
pub use error::{FlagError, FlagResult, StructuredError};
pub use flag::{FlagKey, FlagRecord, FlagState};

// Re-export registry types
pub use registry::{AppliesTo, FeatureDefinition, FeatureRegistry, FeatureRegistryBuilder};

// Re-export engine types
pub use mutation::FlagMutator;
pub use resolver::{FlagOrigin, FlagResolver, ResolutionCache, ResolveOptions, ResolvedFlag};
pub use transition::{
    Actor, DefaultTransitionPolicy, DenialReason, TransitionDecision, TransitionPolicy,
    TransitionTable, TransitionValidator,
};

// Re-export persistence and audit types
pub use audit::{AuditAction, AuditLog, AuditLogEntry, AuditQuery};
#[cfg(feature = "rocksdb-store")]
pub use state::RocksFlagStore;
pub use state::{FlagStore, MemoryFlagStore, SharedFlagStore, StoreError, StoreSnapshot};

// Re-export facade types
pub use events::{FlagEvent, FlagEventBus, SharedEventBus};
pub use service::{FeatureFlagService, FeatureListing, Page, PageRequest};
