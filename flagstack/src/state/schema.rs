//! Column family definitions for the RocksDB flag store
//!
//! Records and audit entries live in separate column families of one
//! database so a single `WriteBatch` can update both atomically.

use crate::flag::FlagKey;

/// Column family for flag override records
pub const CF_FLAGS: &str = "flags";

/// Column family for audit entries
pub const CF_AUDIT: &str = "audit";

/// All column family names
pub const ALL_CFS: &[&str] = &[CF_FLAGS, CF_AUDIT];

/// Key prefixes for compound keys
pub mod keys {
    use super::FlagKey;

    /// Record key. Feature names are snake_case, so `:` never occurs inside one.
    pub fn flag(key: &FlagKey) -> String {
        format!(
            "flag:{}:{}:{:020}",
            key.feature, key.context_type, key.context_id
        )
    }

    /// Prefix shared by every record of one feature
    pub fn feature_prefix(feature: &str) -> String {
        format!("flag:{}:", feature)
    }

    /// Audit key (timestamp-based for ordering)
    pub fn audit(timestamp_nanos: i64, entry_id: &str) -> String {
        format!("audit:{:020}:{}", timestamp_nanos, entry_id)
    }

    /// Parse audit timestamp from key
    pub fn parse_audit_timestamp(key: &str) -> Option<i64> {
        let mut parts = key.split(':');
        match (parts.next(), parts.next()) {
            (Some("audit"), Some(ts)) => ts.parse().ok(),
            _ => None,
        }
    }
}
