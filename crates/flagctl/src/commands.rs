//! Command-line surface and its execution against a [`FeatureFlagService`].

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use flagstack::service::DEFAULT_PER_PAGE;
use flagstack::{
    Actor, AuditQuery, ContextRef, ContextTree, FeatureFlagService, FeatureRegistry,
    MemoryFlagStore, PageRequest, SharedFlagStore,
};
use serde_json::{json, Value};
use tracing::info;

use crate::config::FlagctlConfig;
use crate::state_file::StateFile;

/// Inspect and change hierarchical feature flags
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (overrides FLAGCTL_CONFIG)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// State file (overrides FLAGCTL_STATE and the config file)
    #[arg(id = "state_file", long = "state", value_name = "STATE", global = true)]
    pub state: Option<PathBuf>,

    /// Id of the user performing the command
    #[arg(long, global = true, default_value_t = 0)]
    pub actor: u64,

    /// Act as a site admin (may reveal hidden features)
    #[arg(long, global = true, default_value_t = false)]
    pub site_admin: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn actor(&self) -> Actor {
        if self.site_admin {
            Actor::site_admin(self.actor)
        } else {
            Actor::new(self.actor)
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Features that apply to a context, with their effective flags
    List {
        /// Context as kind:id, e.g. course:40
        context: ContextRef,
        /// Show hidden and inherited-on features as a manager would
        #[arg(long, default_value_t = false)]
        manage: bool,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = DEFAULT_PER_PAGE)]
        per_page: usize,
    },

    /// Names of the features enabled at a context
    Enabled { context: ContextRef },

    /// Effective flag of one feature
    Get { feature: String, context: ContextRef },

    /// Set a feature's state at a context
    Set {
        feature: String,
        context: ContextRef,
        /// off, allowed, allowed_on or on
        state: String,
    },

    /// Remove the override at a context
    Unset { feature: String, context: ContextRef },

    /// States the actor may choose at a context
    Transitions { feature: String, context: ContextRef },

    /// Stored overrides of one feature across all contexts
    Overrides { feature: String },

    /// Audit log, oldest first
    Audit {
        #[arg(long)]
        feature: Option<String>,
        #[arg(long)]
        context: Option<ContextRef>,
        /// Only changes made by this user
        #[arg(long = "by")]
        by: Option<u64>,
        /// Keep only the newest N entries
        #[arg(long)]
        limit: Option<usize>,
    },
}

impl Command {
    fn mutates(&self) -> bool {
        matches!(self, Self::Set { .. } | Self::Unset { .. })
    }
}

/// Definitions and hierarchy from the config, state from the JSON file.
///
/// Every command reads the state file afresh. Mutating commands hold the
/// state lock from that read until the result is saved.
pub struct App {
    registry: Arc<FeatureRegistry>,
    tree: Arc<ContextTree>,
    state_file: StateFile,
}

impl App {
    pub fn open(config: &FlagctlConfig) -> Result<Self> {
        let registry = Arc::new(config.build_registry()?);
        let tree = Arc::new(config.build_tree()?);
        let state_file = StateFile::new(&config.state_path);
        let records = state_file.load()?.len();

        info!(
            features = registry.len(),
            records,
            state = %config.state_path.display(),
            "flagctl ready"
        );

        Ok(Self {
            registry,
            tree,
            state_file,
        })
    }

    fn service(&self, store: Arc<MemoryFlagStore>) -> FeatureFlagService {
        let shared: SharedFlagStore = store;
        FeatureFlagService::new(self.registry.clone(), shared, self.tree.clone())
    }

    /// Run one command. Changes are written back to the state file before
    /// returning.
    pub fn execute(&self, command: &Command, actor: &Actor) -> Result<Value> {
        if !command.mutates() {
            let store = Arc::new(self.state_file.load()?);
            return Self::dispatch(&self.service(store), command, actor);
        }

        let _lock = self.state_file.lock()?;
        let store = Arc::new(self.state_file.load()?);
        let output = Self::dispatch(&self.service(store.clone()), command, actor)?;
        self.state_file.save(&store)?;
        Ok(output)
    }

    fn dispatch(svc: &FeatureFlagService, command: &Command, actor: &Actor) -> Result<Value> {
        let value = match command {
            Command::List {
                context,
                manage,
                page,
                per_page,
            } => {
                let request = PageRequest::new(*page, *per_page);
                let page = svc.list_features(*context, *manage, request)?;
                let has_next = page.has_next();
                json!({
                    "features": page.items,
                    "page": page.page,
                    "per_page": page.per_page,
                    "total": page.total,
                    "has_next": has_next,
                })
            }
            Command::Enabled { context } => json!(svc.enabled_features(*context)?),
            Command::Get { feature, context } => {
                serde_json::to_value(svc.get_flag(feature, *context)?)?
            }
            Command::Set {
                feature,
                context,
                state,
            } => serde_json::to_value(svc.set_flag(feature, *context, actor, state)?)?,
            Command::Unset { feature, context } => {
                serde_json::to_value(svc.unset_flag(feature, *context, actor)?)?
            }
            Command::Transitions { feature, context } => {
                serde_json::to_value(svc.transitions(feature, *context, actor)?)?
            }
            Command::Overrides { feature } => serde_json::to_value(svc.overrides(feature)?)?,
            Command::Audit {
                feature,
                context,
                by,
                limit,
            } => {
                let mut query = AuditQuery::all();
                if let Some(feature) = feature {
                    query = query.feature(feature.clone());
                }
                if let Some(context) = context {
                    query = query.context(*context);
                }
                if let Some(by) = by {
                    query = query.actor(*by);
                }
                if let Some(limit) = limit {
                    query = query.limit(*limit);
                }
                serde_json::to_value(svc.audit(&query)?)?
            }
        };
        Ok(value)
    }
}
