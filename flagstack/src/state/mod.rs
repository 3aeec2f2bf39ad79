//! Persistence for flag overrides and their audit trail
//!
//! [`FlagStore`] is the seam between the engine and storage. Two backends
//! ship with the crate:
//!
//! - [`MemoryFlagStore`]: `RwLock`-guarded maps, snapshot/restore to a
//!   serializable [`StoreSnapshot`]
//! - `RocksFlagStore` (feature `rocksdb-store`): column families `flags` and
//!   `audit`, see [`schema`]
//!
//! # Usage
//!
//! ```ignore
//! use flagstack::state::{FlagChange, FlagStore, FlagWrite, MemoryFlagStore};
//!
//! let store = MemoryFlagStore::new().shared();
//! let record = FlagRecord::new("fancy_wickets", ContextRef::course(1), FlagState::On);
//! store.commit(FlagChange::new(FlagWrite::Insert(record), audit_entry))?;
//! ```

pub mod memory;
#[cfg(feature = "rocksdb-store")]
pub mod rocks;
pub mod schema;
pub mod store;

pub use memory::{MemoryFlagStore, StoreSnapshot};
#[cfg(feature = "rocksdb-store")]
pub use rocks::RocksFlagStore;
pub use store::{FlagChange, FlagStore, FlagWrite, SharedFlagStore, StoreError, StoreResult};
