//! Feature registry: the immutable set of known features.
//!
//! Built once at process start with [`FeatureRegistryBuilder`] and shared by
//! `Arc` afterwards. There is no way to add or change a definition once
//! [`FeatureRegistryBuilder::build`] has run.
//!
//! # Usage
//!
//! ```rust,ignore
//! use flagstack::registry::{AppliesTo, FeatureDefinition, FeatureRegistry};
//! use flagstack::FlagState;
//!
//! let mut builder = FeatureRegistry::builder();
//! builder.load_file("config/features.yml".as_ref())?;
//! builder.register(FeatureDefinition::new("new_gradebook", AppliesTo::Course, FlagState::Allowed))?;
//! builder.with_hook("new_gradebook", state_change_hook(|actor, ctx, from, to| { /* ... */ }))?;
//! let registry = Arc::new(builder.build());
//! ```

pub mod definition;
pub mod manifest;

pub use definition::{
    state_change_hook, transition_hook, AppliesTo, FeatureDefinition, StateChangeHook,
    TransitionHook,
};

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::context::ContextKind;
use crate::error::{FlagError, FlagResult};

/// Errors while assembling a registry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("feature '{0}' is already registered")]
    Duplicate(String),

    #[error("invalid feature name '{0}' (expected lowercase snake_case)")]
    InvalidName(String),

    #[error("cannot attach hook: feature '{0}' is not registered")]
    UnknownFeature(String),

    #[error("definition file error{}: {detail}", path_suffix(.source_path))]
    Parse {
        source_path: Option<String>,
        detail: String,
    },
}

fn path_suffix(path: &Option<String>) -> String {
    path.as_deref()
        .map(|p| format!(" in {}", p))
        .unwrap_or_default()
}

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").expect("static regex"))
}

/// Immutable registry of feature definitions, ordered by name.
#[derive(Debug, Default)]
pub struct FeatureRegistry {
    definitions: BTreeMap<String, FeatureDefinition>,
}

impl FeatureRegistry {
    pub fn builder() -> FeatureRegistryBuilder {
        FeatureRegistryBuilder::default()
    }

    /// Build directly from a list of definitions.
    pub fn from_definitions(
        definitions: impl IntoIterator<Item = FeatureDefinition>,
    ) -> Result<Self, RegistryError> {
        let mut builder = Self::builder();
        for def in definitions {
            builder.register(def)?;
        }
        Ok(builder.build())
    }

    /// Look up a definition. Unknown names are a caller error.
    pub fn get(&self, name: &str) -> FlagResult<&FeatureDefinition> {
        self.definitions
            .get(name)
            .ok_or_else(|| FlagError::UnknownFeature {
                feature: name.to_string(),
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.definitions.contains_key(name)
    }

    /// All definitions, ordered by name.
    pub fn iter(&self) -> impl Iterator<Item = &FeatureDefinition> {
        self.definitions.values()
    }

    /// Definitions that a context of `kind` may hold overrides for.
    pub fn applicable_to(&self, kind: ContextKind) -> impl Iterator<Item = &FeatureDefinition> {
        self.definitions
            .values()
            .filter(move |def| def.applies_to.allows(kind))
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.definitions.keys().map(|k| k.as_str()).collect()
    }
}

/// Mutable staging area for a [`FeatureRegistry`].
#[derive(Debug, Default)]
pub struct FeatureRegistryBuilder {
    definitions: BTreeMap<String, FeatureDefinition>,
}

impl FeatureRegistryBuilder {
    /// Add one definition. Names must be unique snake_case identifiers.
    pub fn register(&mut self, def: FeatureDefinition) -> Result<&mut Self, RegistryError> {
        if !name_pattern().is_match(&def.name) {
            return Err(RegistryError::InvalidName(def.name));
        }
        if self.definitions.contains_key(&def.name) {
            return Err(RegistryError::Duplicate(def.name));
        }
        self.definitions.insert(def.name.clone(), def);
        Ok(self)
    }

    /// Register every definition in a YAML or TOML definition file.
    pub fn load_file(&mut self, path: &Path) -> Result<usize, RegistryError> {
        let defs = manifest::load_file(path)?;
        let count = defs.len();
        for def in defs {
            self.register(def)?;
        }
        tracing::debug!(path = %path.display(), count, "Loaded feature definitions");
        Ok(count)
    }

    /// Attach a state-change hook to an already staged definition.
    pub fn with_hook(
        &mut self,
        name: &str,
        hook: StateChangeHook,
    ) -> Result<&mut Self, RegistryError> {
        let def = self
            .definitions
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownFeature(name.to_string()))?;
        def.on_transition = Some(hook);
        Ok(self)
    }

    /// Attach a custom transition hook to an already staged definition.
    pub fn with_transition_hook(
        &mut self,
        name: &str,
        hook: TransitionHook,
    ) -> Result<&mut Self, RegistryError> {
        let def = self
            .definitions
            .get_mut(name)
            .ok_or_else(|| RegistryError::UnknownFeature(name.to_string()))?;
        def.custom_transition = Some(hook);
        Ok(self)
    }

    /// Freeze the staged definitions.
    pub fn build(self) -> FeatureRegistry {
        FeatureRegistry {
            definitions: self.definitions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flag::FlagState;

    #[test]
    fn test_register_and_get() {
        let registry = FeatureRegistry::from_definitions([
            FeatureDefinition::new("b_feature", AppliesTo::Course, FlagState::Allowed),
            FeatureDefinition::new("a_feature", AppliesTo::Account, FlagState::On),
        ])
        .unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names(), vec!["a_feature", "b_feature"]);
        assert_eq!(registry.get("a_feature").unwrap().default_state, FlagState::On);
    }

    #[test]
    fn test_unknown_feature_fails() {
        let registry = FeatureRegistry::default();
        let err = registry.get("nope").unwrap_err();
        assert!(matches!(err, FlagError::UnknownFeature { feature } if feature == "nope"));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut builder = FeatureRegistry::builder();
        builder
            .register(FeatureDefinition::new("dup", AppliesTo::Course, FlagState::Off))
            .unwrap();
        let err = builder
            .register(FeatureDefinition::new("dup", AppliesTo::User, FlagState::On))
            .unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("dup".to_string()));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut builder = FeatureRegistry::builder();
        for bad in ["", "Upper", "has-dash", "9lives", "colon:name"] {
            let err = builder
                .register(FeatureDefinition::new(bad, AppliesTo::Course, FlagState::Off))
                .unwrap_err();
            assert_eq!(err, RegistryError::InvalidName(bad.to_string()));
        }
    }

    #[test]
    fn test_hooks_attach_by_name() {
        let mut builder = FeatureRegistry::builder();
        builder
            .register(FeatureDefinition::new("hooked", AppliesTo::Course, FlagState::Allowed))
            .unwrap();
        builder
            .with_hook("hooked", state_change_hook(|_, _, _, _| {}))
            .unwrap();
        assert!(matches!(
            builder.with_hook("missing", state_change_hook(|_, _, _, _| {})),
            Err(RegistryError::UnknownFeature(_))
        ));

        let registry = builder.build();
        assert!(registry.get("hooked").unwrap().on_transition.is_some());
    }

    #[test]
    fn test_applicable_to_kind() {
        let registry = FeatureRegistry::from_definitions([
            FeatureDefinition::new("root_only", AppliesTo::RootAccount, FlagState::Allowed),
            FeatureDefinition::new("course_level", AppliesTo::Course, FlagState::Allowed),
            FeatureDefinition::new("user_level", AppliesTo::User, FlagState::Allowed),
        ])
        .unwrap();

        let course: Vec<&str> = registry
            .applicable_to(ContextKind::Course)
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(course, vec!["course_level"]);

        let root: Vec<&str> = registry
            .applicable_to(ContextKind::RootAccount)
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(root, vec!["course_level", "root_only", "user_level"]);
    }
}
