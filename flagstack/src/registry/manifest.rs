//! Definition files: a map of feature name → definition, in YAML or TOML.
//!
//! ```yaml
//! fancy_wickets:
//!   display_name: Fancy Wickets
//!   applies_to: Course
//!   state: allowed
//!   root_opt_in: true
//! ```
//!
//! Hooks cannot be expressed in a file; attach them in code with
//! [`FeatureRegistryBuilder::with_hook`](super::FeatureRegistryBuilder::with_hook).

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::definition::{AppliesTo, FeatureDefinition};
use super::RegistryError;
use crate::flag::FlagState;

/// One entry of a definition file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefinitionEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: String,
    pub applies_to: AppliesTo,
    #[serde(alias = "state")]
    pub default_state: FlagState,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub beta: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_notes_url: Option<String>,
    #[serde(default)]
    pub autoexpand: bool,
    #[serde(default)]
    pub root_opt_in: bool,
}

impl DefinitionEntry {
    pub fn into_definition(self, name: &str) -> FeatureDefinition {
        let mut def = FeatureDefinition::new(name, self.applies_to, self.default_state)
            .with_description(self.description);
        if let Some(display_name) = self.display_name {
            def = def.with_display_name(display_name);
        }
        def.hidden = self.hidden;
        def.beta = self.beta;
        def.release_notes_url = self.release_notes_url;
        def.autoexpand = self.autoexpand;
        def.root_opt_in = self.root_opt_in;
        def
    }
}

/// Parse a YAML definition file body.
pub fn parse_yaml(yaml: &str) -> Result<Vec<FeatureDefinition>, RegistryError> {
    let entries: BTreeMap<String, DefinitionEntry> =
        serde_yaml::from_str(yaml).map_err(|e| RegistryError::Parse {
            source_path: None,
            detail: format!("YAML parse error: {}", e),
        })?;
    Ok(into_definitions(entries))
}

/// Parse a TOML definition file body.
pub fn parse_toml(text: &str) -> Result<Vec<FeatureDefinition>, RegistryError> {
    let entries: BTreeMap<String, DefinitionEntry> =
        toml::from_str(text).map_err(|e| RegistryError::Parse {
            source_path: None,
            detail: format!("TOML parse error: {}", e),
        })?;
    Ok(into_definitions(entries))
}

/// Load a definition file, picking the format from its extension
/// (`.yml`/`.yaml` or `.toml`).
pub fn load_file(path: &Path) -> Result<Vec<FeatureDefinition>, RegistryError> {
    let content = std::fs::read_to_string(path).map_err(|e| RegistryError::Parse {
        source_path: Some(path.display().to_string()),
        detail: format!("Failed to read file: {}", e),
    })?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let parsed = match ext {
        "yml" | "yaml" => parse_yaml(&content),
        "toml" => parse_toml(&content),
        other => {
            return Err(RegistryError::Parse {
                source_path: Some(path.display().to_string()),
                detail: format!("unsupported definition file extension '{}'", other),
            })
        }
    };

    parsed.map_err(|e| match e {
        RegistryError::Parse { detail, .. } => RegistryError::Parse {
            source_path: Some(path.display().to_string()),
            detail,
        },
        other => other,
    })
}

fn into_definitions(entries: BTreeMap<String, DefinitionEntry>) -> Vec<FeatureDefinition> {
    entries
        .into_iter()
        .map(|(name, entry)| entry.into_definition(&name))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
fancy_wickets:
  display_name: Fancy Wickets
  applies_to: Course
  state: allowed
  root_opt_in: true
secret_sauce:
  applies_to: Account
  default_state: allowed_on
  hidden: true
  release_notes_url: https://example.test/notes
"#;

    #[test]
    fn test_parse_yaml() {
        let defs = parse_yaml(YAML).unwrap();
        assert_eq!(defs.len(), 2);

        let wickets = &defs[0];
        assert_eq!(wickets.name, "fancy_wickets");
        assert_eq!(wickets.display_name, "Fancy Wickets");
        assert_eq!(wickets.default_state, FlagState::Allowed);
        assert!(wickets.root_opt_in);

        let sauce = &defs[1];
        assert_eq!(sauce.display_name, "secret_sauce");
        assert!(sauce.hidden);
        assert_eq!(sauce.release_notes_url.as_deref(), Some("https://example.test/notes"));
    }

    #[test]
    fn test_parse_toml() {
        let defs = parse_toml(
            r#"
            [student_planner]
            applies_to = "User"
            state = "on"
            beta = true
            "#,
        )
        .unwrap();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].applies_to, AppliesTo::User);
        assert!(defs[0].beta);
    }

    #[test]
    fn test_bad_state_is_parse_error() {
        let err = parse_yaml("x:\n  applies_to: Course\n  state: enabled\n").unwrap_err();
        assert!(matches!(err, RegistryError::Parse { .. }));
    }

    #[test]
    fn test_load_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml_path = dir.path().join("features.yml");
        std::fs::write(&yaml_path, YAML).unwrap();
        assert_eq!(load_file(&yaml_path).unwrap().len(), 2);

        let json_path = dir.path().join("features.json");
        std::fs::write(&json_path, "{}").unwrap();
        let err = load_file(&json_path).unwrap_err();
        assert!(err.to_string().contains("unsupported"));
    }
}
