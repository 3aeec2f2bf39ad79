//! Contexts that can hold flag overrides, and the hierarchy they resolve through.
//!
//! A context is an explicit tagged reference ([`ContextRef`]) rather than a
//! polymorphic object. Anything that can enumerate a context plus its
//! ancestors implements [`ContextHierarchy`]; [`ContextTree`] is the
//! in-memory implementation used by the service layer and the CLI.
//!
//! # Resolution Order
//!
//! ```text
//! course:40 → account:3 → root_account:1 → (global default)
//! user:7    → root_account:1            → (global default)
//! ```
//!
//! The global default lives beyond the root account boundary and is never
//! part of a chain.

pub mod tree;

pub use tree::{AccountEntry, ContextTree, HierarchyError, MemberEntry, TreeConfig};

use serde::{Deserialize, Serialize};

/// Discriminant of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    RootAccount,
    Account,
    Course,
    User,
}

impl ContextKind {
    /// Storage type name. Root and sub-accounts share the `Account` table.
    pub fn context_type(self) -> &'static str {
        match self {
            Self::RootAccount | Self::Account => "Account",
            Self::Course => "Course",
            Self::User => "User",
        }
    }

    pub fn is_account(self) -> bool {
        matches!(self, Self::RootAccount | Self::Account)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RootAccount => "root_account",
            Self::Account => "account",
            Self::Course => "course",
            Self::User => "user",
        }
    }
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to one context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextRef {
    pub kind: ContextKind,
    pub id: u64,
}

impl ContextRef {
    pub fn new(kind: ContextKind, id: u64) -> Self {
        Self { kind, id }
    }

    pub fn root_account(id: u64) -> Self {
        Self::new(ContextKind::RootAccount, id)
    }

    pub fn account(id: u64) -> Self {
        Self::new(ContextKind::Account, id)
    }

    pub fn course(id: u64) -> Self {
        Self::new(ContextKind::Course, id)
    }

    pub fn user(id: u64) -> Self {
        Self::new(ContextKind::User, id)
    }

    pub fn context_type(&self) -> &'static str {
        self.kind.context_type()
    }

    /// Whether both references address the same stored context.
    ///
    /// `root_account:1` and `account:1` are the same row.
    pub fn same_target(&self, other: &ContextRef) -> bool {
        self.id == other.id && self.context_type() == other.context_type()
    }
}

impl std::fmt::Display for ContextRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// Error parsing a `kind:id` context reference.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid context reference '{0}' (expected root_account:<id>, account:<id>, course:<id> or user:<id>)")]
pub struct ParseContextError(pub String);

impl std::str::FromStr for ContextRef {
    type Err = ParseContextError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| ParseContextError(s.to_string()))?;
        let kind = match kind.trim() {
            "root_account" => ContextKind::RootAccount,
            "account" => ContextKind::Account,
            "course" => ContextKind::Course,
            "user" => ContextKind::User,
            _ => return Err(ParseContextError(s.to_string())),
        };
        let id = id
            .trim()
            .parse::<u64>()
            .map_err(|_| ParseContextError(s.to_string()))?;
        Ok(Self::new(kind, id))
    }
}

/// Capability a context must provide to take part in flag resolution.
pub trait ContextHierarchy {
    /// The context a caller asked about.
    fn context(&self) -> ContextRef;

    /// The context itself followed by every ancestor, most specific first.
    fn chain(&self) -> Vec<ContextRef>;

    /// The root account at the end of the chain, if the chain reaches one.
    fn root_account(&self) -> Option<ContextRef> {
        self.chain()
            .into_iter()
            .rev()
            .find(|ctx| ctx.kind == ContextKind::RootAccount)
    }
}

/// A materialized chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextNode {
    chain: Vec<ContextRef>,
}

impl ContextNode {
    /// Build from an explicit chain. Returns `None` for an empty chain.
    pub fn from_chain(chain: Vec<ContextRef>) -> Option<Self> {
        if chain.is_empty() {
            None
        } else {
            Some(Self { chain })
        }
    }

    /// A lone root account, which is its own chain.
    pub fn root(id: u64) -> Self {
        Self {
            chain: vec![ContextRef::root_account(id)],
        }
    }
}

impl ContextHierarchy for ContextNode {
    fn context(&self) -> ContextRef {
        self.chain[0]
    }

    fn chain(&self) -> Vec<ContextRef> {
        self.chain.clone()
    }
}
