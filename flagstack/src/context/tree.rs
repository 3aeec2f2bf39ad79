//! In-memory context hierarchy: accounts with parents, plus courses and users
//! owned by an account.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::{ContextKind, ContextNode, ContextRef};

/// Errors building or walking a context tree.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HierarchyError {
    #[error("unknown context: {0}")]
    UnknownContext(ContextRef),

    #[error("{context} references unknown account {parent}")]
    UnknownParent { context: ContextRef, parent: u64 },

    #[error("context already registered: {0}")]
    Duplicate(ContextRef),

    #[error("cycle detected in account chain at {0}")]
    Cycle(ContextRef),
}

/// Serialized account entry. An account without a parent is a root account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountEntry {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<u64>,
}

/// Serialized course or user entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberEntry {
    pub id: u64,
    pub account: u64,
}

/// Serialized form of a [`ContextTree`], as it appears in config files.
///
/// ```toml
/// [[accounts]]
/// id = 1
///
/// [[accounts]]
/// id = 2
/// parent = 1
///
/// [[courses]]
/// id = 10
/// account = 2
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeConfig {
    #[serde(default)]
    pub accounts: Vec<AccountEntry>,
    #[serde(default)]
    pub courses: Vec<MemberEntry>,
    #[serde(default)]
    pub users: Vec<MemberEntry>,
}

/// Account/course/user hierarchy.
#[derive(Debug, Clone, Default)]
pub struct ContextTree {
    /// account id → parent account id (`None` for root accounts)
    accounts: BTreeMap<u64, Option<u64>>,
    /// course id → owning account id
    courses: BTreeMap<u64, u64>,
    /// user id → owning account id
    users: BTreeMap<u64, u64>,
}

impl ContextTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from config. Accounts may be listed in any order; parents are
    /// checked once every account is known.
    pub fn from_config(config: &TreeConfig) -> Result<Self, HierarchyError> {
        let mut tree = Self::new();

        for entry in &config.accounts {
            let ctx = account_ref(entry.id, entry.parent);
            if tree.accounts.insert(entry.id, entry.parent).is_some() {
                return Err(HierarchyError::Duplicate(ctx));
            }
        }
        for entry in &config.accounts {
            if let Some(parent) = entry.parent {
                if !tree.accounts.contains_key(&parent) {
                    return Err(HierarchyError::UnknownParent {
                        context: ContextRef::account(entry.id),
                        parent,
                    });
                }
            }
        }
        // Reject cycles up front rather than on first lookup.
        for entry in &config.accounts {
            tree.account_chain(entry.id)?;
        }

        for entry in &config.courses {
            tree.add_course(entry.id, entry.account)?;
        }
        for entry in &config.users {
            tree.add_user(entry.id, entry.account)?;
        }

        Ok(tree)
    }

    pub fn add_root_account(&mut self, id: u64) -> Result<ContextRef, HierarchyError> {
        let ctx = ContextRef::root_account(id);
        if self.accounts.contains_key(&id) {
            return Err(HierarchyError::Duplicate(ctx));
        }
        self.accounts.insert(id, None);
        Ok(ctx)
    }

    pub fn add_account(&mut self, id: u64, parent: u64) -> Result<ContextRef, HierarchyError> {
        let ctx = ContextRef::account(id);
        if self.accounts.contains_key(&id) {
            return Err(HierarchyError::Duplicate(ctx));
        }
        if !self.accounts.contains_key(&parent) {
            return Err(HierarchyError::UnknownParent {
                context: ctx,
                parent,
            });
        }
        self.accounts.insert(id, Some(parent));
        Ok(ctx)
    }

    pub fn add_course(&mut self, id: u64, account: u64) -> Result<ContextRef, HierarchyError> {
        let ctx = ContextRef::course(id);
        if self.courses.contains_key(&id) {
            return Err(HierarchyError::Duplicate(ctx));
        }
        if !self.accounts.contains_key(&account) {
            return Err(HierarchyError::UnknownParent {
                context: ctx,
                parent: account,
            });
        }
        self.courses.insert(id, account);
        Ok(ctx)
    }

    pub fn add_user(&mut self, id: u64, account: u64) -> Result<ContextRef, HierarchyError> {
        let ctx = ContextRef::user(id);
        if self.users.contains_key(&id) {
            return Err(HierarchyError::Duplicate(ctx));
        }
        if !self.accounts.contains_key(&account) {
            return Err(HierarchyError::UnknownParent {
                context: ctx,
                parent: account,
            });
        }
        self.users.insert(id, account);
        Ok(ctx)
    }

    /// Canonical reference for `ctx`: accounts get their kind from the tree,
    /// so `account:1` and `root_account:1` normalize to the same value.
    pub fn canonical(&self, ctx: ContextRef) -> Result<ContextRef, HierarchyError> {
        match ctx.kind {
            ContextKind::RootAccount | ContextKind::Account => self
                .accounts
                .get(&ctx.id)
                .map(|parent| account_ref(ctx.id, *parent))
                .ok_or(HierarchyError::UnknownContext(ctx)),
            ContextKind::Course if self.courses.contains_key(&ctx.id) => Ok(ctx),
            ContextKind::User if self.users.contains_key(&ctx.id) => Ok(ctx),
            _ => Err(HierarchyError::UnknownContext(ctx)),
        }
    }

    /// Resolution chain for `ctx`, most specific first.
    pub fn node(&self, ctx: ContextRef) -> Result<ContextNode, HierarchyError> {
        let chain = match ctx.kind {
            ContextKind::RootAccount | ContextKind::Account => {
                if !self.accounts.contains_key(&ctx.id) {
                    return Err(HierarchyError::UnknownContext(ctx));
                }
                self.account_chain(ctx.id)?
            }
            ContextKind::Course => {
                let account = self
                    .courses
                    .get(&ctx.id)
                    .ok_or(HierarchyError::UnknownContext(ctx))?;
                let mut chain = vec![ctx];
                chain.extend(self.account_chain(*account)?);
                chain
            }
            ContextKind::User => {
                let account = self
                    .users
                    .get(&ctx.id)
                    .ok_or(HierarchyError::UnknownContext(ctx))?;
                let mut chain = vec![ctx];
                chain.extend(self.account_chain(*account)?);
                chain
            }
        };

        ContextNode::from_chain(chain).ok_or(HierarchyError::UnknownContext(ctx))
    }

    fn account_chain(&self, start: u64) -> Result<Vec<ContextRef>, HierarchyError> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = Some(start);

        while let Some(id) = current {
            let parent = *self
                .accounts
                .get(&id)
                .ok_or(HierarchyError::UnknownContext(ContextRef::account(id)))?;
            if !seen.insert(id) {
                return Err(HierarchyError::Cycle(ContextRef::account(id)));
            }
            chain.push(account_ref(id, parent));
            current = parent;
        }

        Ok(chain)
    }
}

fn account_ref(id: u64, parent: Option<u64>) -> ContextRef {
    if parent.is_some() {
        ContextRef::account(id)
    } else {
        ContextRef::root_account(id)
    }
}
