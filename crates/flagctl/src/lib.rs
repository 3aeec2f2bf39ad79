//! `flagctl`: operator CLI for hierarchical feature flags.
//!
//! Loads feature definitions and a context tree from a TOML config, keeps
//! overrides and the audit log in a JSON state file, and runs one command
//! per invocation through [`flagstack::FeatureFlagService`].

pub mod commands;
pub mod config;
pub mod state_file;

pub use commands::{App, Cli, Command};
pub use config::FlagctlConfig;
pub use state_file::StateFile;
