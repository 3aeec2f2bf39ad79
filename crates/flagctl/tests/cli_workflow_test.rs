//! End-to-end flagctl workflow over a temp directory: config, definitions,
//! state file persistence and error payloads.

use std::path::Path;

use flagctl::{App, Command, FlagctlConfig};
use flagstack::{Actor, ContextRef, FlagError};

const DEFINITIONS: &str = r#"
fancy_wickets:
  display_name: Fancy Wickets
  applies_to: Course
  state: allowed
  root_opt_in: true
gradebook:
  applies_to: Course
  state: allowed_on
secret_sauce:
  applies_to: Course
  state: allowed
  hidden: true
"#;

const CONFIG: &str = r#"
definitions = "features.yml"
state_path = "state/flags.json"

[[accounts]]
id = 1

[[accounts]]
id = 2
parent = 1

[[courses]]
id = 40
account = 2
"#;

fn write_fixture(dir: &Path) -> FlagctlConfig {
    std::fs::write(dir.join("features.yml"), DEFINITIONS).unwrap();
    let config_path = dir.join("flagctl.toml");
    std::fs::write(&config_path, CONFIG).unwrap();
    FlagctlConfig::load(&config_path).unwrap()
}

fn set(feature: &str, context: ContextRef, state: &str) -> Command {
    Command::Set {
        feature: feature.to_string(),
        context,
        state: state.to_string(),
    }
}

fn get(feature: &str, context: ContextRef) -> Command {
    Command::Get {
        feature: feature.to_string(),
        context,
    }
}

// ── Workflow ─────────────────────────────────────────────────────────

#[test]
fn cli_set_persists_across_runs() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path());
    let admin = Actor::new(3);

    {
        let app = App::open(&config).unwrap();
        let out = app
            .execute(&set("fancy_wickets", ContextRef::account(2), "on"), &admin)
            .unwrap();
        assert_eq!(out["flag"]["state"], "on");
        assert_eq!(out["locked"], false);
    }
    assert!(config.state_path.exists());

    let app = App::open(&config).unwrap();
    let out = app
        .execute(&get("fancy_wickets", ContextRef::course(40)), &admin)
        .unwrap();
    assert_eq!(out["flag"]["state"], "on");
    assert_eq!(out["locked"], true);

    let root = app
        .execute(&get("fancy_wickets", ContextRef::root_account(1)), &admin)
        .unwrap();
    assert_eq!(root["flag"]["state"], "off");
    assert_eq!(root["origin"], "root_opt_in");
}

#[test]
fn cli_list_and_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path());
    let app = App::open(&config).unwrap();
    let actor = Actor::new(3);

    let listing = app
        .execute(
            &Command::List {
                context: ContextRef::course(40),
                manage: false,
                page: 1,
                per_page: 50,
            },
            &actor,
        )
        .unwrap();
    assert_eq!(listing["total"], 2);
    assert_eq!(listing["features"][0]["display_name"], "Fancy Wickets");

    let enabled = app
        .execute(
            &Command::Enabled {
                context: ContextRef::course(40),
            },
            &actor,
        )
        .unwrap();
    assert_eq!(enabled, serde_json::json!(["gradebook"]));
}

#[test]
fn cli_unset_and_audit() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path());
    let app = App::open(&config).unwrap();
    let actor = Actor::new(3);

    app.execute(&set("gradebook", ContextRef::course(40), "off"), &actor)
        .unwrap();
    let removed = app
        .execute(
            &Command::Unset {
                feature: "gradebook".to_string(),
                context: ContextRef::course(40),
            },
            &actor,
        )
        .unwrap();
    assert_eq!(removed["state"], "off");

    let audit = app
        .execute(
            &Command::Audit {
                feature: Some("gradebook".to_string()),
                context: None,
                by: Some(3),
                limit: None,
            },
            &actor,
        )
        .unwrap();
    let actions: Vec<_> = audit
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["action"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(actions, vec!["created", "deleted"]);

    // The deletion is on disk too.
    let reopened = App::open(&config).unwrap();
    let flag = reopened
        .execute(&get("gradebook", ContextRef::course(40)), &actor)
        .unwrap();
    assert_eq!(flag["origin"], "global_default");
}

#[test]
fn cli_transitions_reflect_context() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path());
    let app = App::open(&config).unwrap();

    let table = app
        .execute(
            &Command::Transitions {
                feature: "gradebook".to_string(),
                context: ContextRef::course(40),
            },
            &Actor::new(3),
        )
        .unwrap();
    assert_eq!(table["on"]["locked"], false);
    assert_eq!(table["allowed"]["locked"], true);
}

#[test]
fn cli_overrides_reports_stored_records() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path());
    let app = App::open(&config).unwrap();
    let actor = Actor::new(3);

    app.execute(&set("gradebook", ContextRef::account(2), "allowed"), &actor)
        .unwrap();
    app.execute(&set("gradebook", ContextRef::course(40), "on"), &actor)
        .unwrap();

    let overrides = app
        .execute(
            &Command::Overrides {
                feature: "gradebook".to_string(),
            },
            &actor,
        )
        .unwrap();
    assert_eq!(overrides.as_array().unwrap().len(), 2);
}

// ── Concurrent runs ──────────────────────────────────────────────────

#[test]
fn cli_overlapping_runs_keep_both_writes() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path());
    let actor = Actor::new(3);

    // Both opened before either writes.
    let first = App::open(&config).unwrap();
    let second = App::open(&config).unwrap();

    first
        .execute(&set("gradebook", ContextRef::course(40), "off"), &actor)
        .unwrap();
    second
        .execute(&set("fancy_wickets", ContextRef::course(40), "on"), &actor)
        .unwrap();

    let reopened = App::open(&config).unwrap();
    let gradebook = reopened
        .execute(&get("gradebook", ContextRef::course(40)), &actor)
        .unwrap();
    assert_eq!(gradebook["flag"]["state"], "off");
    let wickets = reopened
        .execute(&get("fancy_wickets", ContextRef::course(40)), &actor)
        .unwrap();
    assert_eq!(wickets["flag"]["state"], "on");

    let audit = reopened
        .execute(
            &Command::Audit {
                feature: None,
                context: Some(ContextRef::course(40)),
                by: None,
                limit: None,
            },
            &actor,
        )
        .unwrap();
    assert_eq!(audit.as_array().unwrap().len(), 2);
}

#[test]
fn cli_parallel_runs_serialize_on_state_lock() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path());
    let writes = [
        ("gradebook", ContextRef::course(40), "off"),
        ("fancy_wickets", ContextRef::course(40), "on"),
        ("secret_sauce", ContextRef::course(40), "on"),
        ("gradebook", ContextRef::account(2), "allowed"),
    ];

    std::thread::scope(|s| {
        for (feature, context, state) in writes {
            let config = config.clone();
            s.spawn(move || {
                let app = App::open(&config).unwrap();
                app.execute(&set(feature, context, state), &Actor::site_admin(1))
                    .unwrap();
            });
        }
    });

    let app = App::open(&config).unwrap();
    let audit = app
        .execute(
            &Command::Audit {
                feature: None,
                context: None,
                by: None,
                limit: None,
            },
            &Actor::new(3),
        )
        .unwrap();
    assert_eq!(audit.as_array().unwrap().len(), writes.len());

    for (feature, context, state) in writes {
        let flag = app
            .execute(&get(feature, context), &Actor::site_admin(1))
            .unwrap();
        assert_eq!(flag["flag"]["state"], state, "{feature} at {context}");
    }
}

// ── Errors ───────────────────────────────────────────────────────────

#[test]
fn cli_denials_surface_as_flag_errors() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path());
    let app = App::open(&config).unwrap();

    let err = app
        .execute(&set("secret_sauce", ContextRef::course(40), "on"), &Actor::new(3))
        .unwrap_err();
    let flag_err = err.downcast_ref::<FlagError>().unwrap();
    assert_eq!(flag_err.status_code(), 403);
    assert_eq!(flag_err.to_structured().code, "REQUIRES_ELEVATED_PRIVILEGE");

    // Failed commands leave no state file behind.
    assert!(!config.state_path.exists());

    app.execute(
        &set("secret_sauce", ContextRef::course(40), "on"),
        &Actor::site_admin(1),
    )
    .unwrap();
    assert!(config.state_path.exists());
}

#[test]
fn cli_bad_definitions_fail_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path());
    std::fs::write(&config.definitions, "not_a_map").unwrap();

    assert!(App::open(&config).is_err());
}
