//! flagctl configuration.
//!
//! Resolution order for each setting: built-in default, then environment
//! (`FLAGCTL_CONFIG`, `FLAGCTL_STATE`), then command-line flags.
//!
//! ```toml
//! definitions = "features.yml"
//! state_path = "flags.json"
//!
//! [[accounts]]
//! id = 1
//!
//! [[accounts]]
//! id = 2
//! parent = 1
//!
//! [[courses]]
//! id = 40
//! account = 2
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flagstack::{ContextTree, FeatureRegistry, TreeConfig};
use serde::{Deserialize, Serialize};

pub const CONFIG_ENV: &str = "FLAGCTL_CONFIG";
pub const STATE_ENV: &str = "FLAGCTL_STATE";
pub const DEFAULT_CONFIG_PATH: &str = "flagctl.toml";
pub const DEFAULT_STATE_PATH: &str = "flags.json";

fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagctlConfig {
    /// YAML or TOML feature definition file.
    pub definitions: PathBuf,
    /// JSON file holding overrides and the audit log.
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(flatten)]
    pub tree: TreeConfig,
}

impl FlagctlConfig {
    /// Parse a config body. Relative paths are resolved against `base_dir`.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self> {
        let mut config: Self = toml::from_str(text).context("invalid flagctl config")?;
        config.resolve_paths(base_dir);
        Ok(config)
    }

    /// Read the config file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&text, base_dir).with_context(|| format!("in {}", path.display()))
    }

    /// Locate and load the config, then apply environment and flag
    /// overrides for the state file.
    pub fn resolve(cli_config: Option<PathBuf>, cli_state: Option<PathBuf>) -> Result<Self> {
        let path = config_path(cli_config, std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        let mut config = Self::load(&path)?;
        let env_state = std::env::var_os(STATE_ENV).map(PathBuf::from);
        if let Some(state) = state_override(cli_state, env_state) {
            config.state_path = state;
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base_dir: &Path) {
        if self.definitions.is_relative() {
            self.definitions = base_dir.join(&self.definitions);
        }
        if self.state_path.is_relative() {
            self.state_path = base_dir.join(&self.state_path);
        }
    }

    pub fn build_registry(&self) -> Result<FeatureRegistry> {
        let mut builder = FeatureRegistry::builder();
        builder.load_file(&self.definitions).with_context(|| {
            format!("failed to load definitions from {}", self.definitions.display())
        })?;
        Ok(builder.build())
    }

    pub fn build_tree(&self) -> Result<ContextTree> {
        ContextTree::from_config(&self.tree).context("invalid context hierarchy")
    }
}

/// Flag beats environment beats the default file name.
pub fn config_path(cli: Option<PathBuf>, env: Option<PathBuf>) -> PathBuf {
    cli.or(env).unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// State file override, flag first.
pub fn state_override(cli: Option<PathBuf>, env: Option<PathBuf>) -> Option<PathBuf> {
    cli.or(env)
}
