//! Resolution properties through the full engine.
//!
//! Every test builds the same hierarchy:
//!
//! ```text
//! root_account:1
//! ├── account:2
//! │   ├── account:3
//! │   │   └── course:40
//! │   └── course:41
//! └── user:7
//! ```

use std::sync::Arc;

use flagstack::{
    Actor, AppliesTo, ContextRef, ContextTree, FeatureDefinition, FeatureFlagService,
    FeatureRegistry, FlagOrigin, FlagState, MemoryFlagStore, ResolveOptions,
};

fn tree() -> ContextTree {
    let mut tree = ContextTree::new();
    tree.add_root_account(1).unwrap();
    tree.add_account(2, 1).unwrap();
    tree.add_account(3, 2).unwrap();
    tree.add_course(40, 3).unwrap();
    tree.add_course(41, 2).unwrap();
    tree.add_user(7, 1).unwrap();
    tree
}

fn service() -> FeatureFlagService {
    let registry = FeatureRegistry::from_definitions([
        FeatureDefinition::new("fancy_wickets", AppliesTo::Course, FlagState::Allowed)
            .root_opt_in(),
        FeatureDefinition::new("gradebook", AppliesTo::Course, FlagState::AllowedOn),
        FeatureDefinition::new("new_ui", AppliesTo::Course, FlagState::Allowed),
        FeatureDefinition::new("dark_mode", AppliesTo::User, FlagState::Off),
        FeatureDefinition::new("analytics", AppliesTo::RootAccount, FlagState::On),
    ])
    .unwrap();
    FeatureFlagService::new(
        Arc::new(registry),
        MemoryFlagStore::new().shared(),
        Arc::new(tree()),
    )
}

fn admin() -> Actor {
    Actor::new(99)
}

// ── Defaults ─────────────────────────────────────────────────────────

#[test]
fn resolution_without_records_returns_default() {
    let svc = service();
    for ctx in [
        ContextRef::root_account(1),
        ContextRef::account(3),
        ContextRef::course(40),
    ] {
        let flag = svc.get_flag("gradebook", ctx).unwrap();
        assert_eq!(flag.state(), FlagState::AllowedOn, "at {ctx}");
        assert_eq!(flag.origin, FlagOrigin::GlobalDefault);
        assert!(!flag.locked);
    }
    assert_eq!(
        svc.get_flag("dark_mode", ContextRef::user(7)).unwrap().state(),
        FlagState::Off
    );
}

#[test]
fn resolution_root_opt_in_is_off_only_at_root() {
    let svc = service();

    let root = svc
        .get_flag("fancy_wickets", ContextRef::root_account(1))
        .unwrap();
    assert_eq!(root.state(), FlagState::Off);
    assert_eq!(root.origin, FlagOrigin::RootOptIn);
    assert!(!root.locked);

    let sub = svc.get_flag("fancy_wickets", ContextRef::account(2)).unwrap();
    assert_eq!(sub.state(), FlagState::Allowed);
    assert_eq!(sub.origin, FlagOrigin::GlobalDefault);
}

#[test]
fn resolution_root_opt_in_cleared_by_explicit_record() {
    let svc = service();
    svc.set_flag("fancy_wickets", ContextRef::root_account(1), &admin(), "allowed")
        .unwrap();

    let root = svc
        .get_flag("fancy_wickets", ContextRef::root_account(1))
        .unwrap();
    assert_eq!(root.state(), FlagState::Allowed);
    assert!(root.is_local());
}

// ── Absolute states lock descendants ─────────────────────────────────

#[test]
fn resolution_off_at_account_locks_every_descendant() {
    let svc = service();
    svc.set_flag("gradebook", ContextRef::account(2), &admin(), "off")
        .unwrap();

    for ctx in [ContextRef::account(3), ContextRef::course(40), ContextRef::course(41)] {
        let flag = svc.get_flag("gradebook", ctx).unwrap();
        assert_eq!(flag.state(), FlagState::Off, "at {ctx}");
        assert!(flag.locked, "at {ctx}");
        assert_eq!(flag.flag.context, Some(ContextRef::account(2)));
    }

    let own = svc.get_flag("gradebook", ContextRef::account(2)).unwrap();
    assert!(!own.locked);
}

#[test]
fn resolution_on_at_account_locks_every_descendant() {
    let svc = service();
    svc.set_flag("new_ui", ContextRef::account(2), &admin(), "on")
        .unwrap();

    for ctx in [ContextRef::account(3), ContextRef::course(40), ContextRef::course(41)] {
        let flag = svc.get_flag("new_ui", ctx).unwrap();
        assert_eq!(flag.state(), FlagState::On, "at {ctx}");
        assert!(flag.locked, "at {ctx}");
    }
}

#[test]
fn resolution_least_specific_absolute_record_wins() {
    let svc = service();
    svc.set_flag("new_ui", ContextRef::course(40), &admin(), "on")
        .unwrap();
    svc.set_flag("new_ui", ContextRef::account(2), &admin(), "off")
        .unwrap();

    let course = svc.get_flag("new_ui", ContextRef::course(40)).unwrap();
    assert_eq!(course.state(), FlagState::Off);
    assert!(course.locked);
}

#[test]
fn resolution_ancestor_on_does_not_touch_siblings() {
    let svc = service();
    svc.set_flag("new_ui", ContextRef::account(3), &admin(), "on")
        .unwrap();

    let sibling = svc.get_flag("new_ui", ContextRef::course(41)).unwrap();
    assert_eq!(sibling.state(), FlagState::Allowed);
    assert!(!sibling.locked);
}

// ── Allowed-type records ─────────────────────────────────────────────

#[test]
fn resolution_allowed_account_lets_course_turn_on_unlocked() {
    let svc = service();
    svc.set_flag("new_ui", ContextRef::account(2), &admin(), "allowed")
        .unwrap();
    svc.set_flag("new_ui", ContextRef::course(41), &admin(), "on")
        .unwrap();

    let course = svc.get_flag("new_ui", ContextRef::course(41)).unwrap();
    assert_eq!(course.state(), FlagState::On);
    assert!(!course.locked);
    assert!(course.is_local());
}

#[test]
fn resolution_most_specific_allowed_record_wins() {
    let svc = service();
    svc.set_flag("new_ui", ContextRef::account(2), &admin(), "allowed_on")
        .unwrap();
    svc.set_flag("new_ui", ContextRef::account(3), &admin(), "allowed")
        .unwrap();

    let course = svc.get_flag("new_ui", ContextRef::course(40)).unwrap();
    assert_eq!(course.state(), FlagState::Allowed);
    assert_eq!(course.flag.context, Some(ContextRef::account(3)));
    assert!(!course.locked);
}

// ── Unset ────────────────────────────────────────────────────────────

#[test]
fn resolution_unset_restores_previous_inheritance() {
    let svc = service();
    svc.set_flag("gradebook", ContextRef::account(3), &admin(), "allowed")
        .unwrap();
    let before = svc.get_flag("gradebook", ContextRef::course(40)).unwrap();

    svc.set_flag("gradebook", ContextRef::course(40), &admin(), "off")
        .unwrap();
    let removed = svc
        .unset_flag("gradebook", ContextRef::course(40), &admin())
        .unwrap();
    assert_eq!(removed.state, FlagState::Off);

    let after = svc.get_flag("gradebook", ContextRef::course(40)).unwrap();
    assert_eq!(after.state(), before.state());
    assert_eq!(after.flag.context, before.flag.context);
    assert_eq!(after.origin, before.origin);
}

#[test]
fn resolution_unset_falls_back_to_default() {
    let svc = service();
    svc.set_flag("gradebook", ContextRef::course(41), &admin(), "off")
        .unwrap();
    svc.unset_flag("gradebook", ContextRef::course(41), &admin())
        .unwrap();

    let flag = svc.get_flag("gradebook", ContextRef::course(41)).unwrap();
    assert_eq!(flag.state(), FlagState::AllowedOn);
    assert_eq!(flag.origin, FlagOrigin::GlobalDefault);
}

// ── Scenario: opt-in feature turned on below the root ────────────────

#[test]
fn resolution_fancy_wickets_scenario() {
    let svc = service();

    let root = svc
        .get_flag("fancy_wickets", ContextRef::root_account(1))
        .unwrap();
    assert_eq!(root.state(), FlagState::Off);

    let sub = svc
        .set_flag("fancy_wickets", ContextRef::account(2), &admin(), "on")
        .unwrap();
    assert_eq!(sub.state(), FlagState::On);
    assert!(!sub.locked);

    let course = svc
        .get_flag("fancy_wickets", ContextRef::course(41))
        .unwrap();
    assert_eq!(course.state(), FlagState::On);
    assert!(course.is_enabled());
    assert_eq!(course.flag.context, Some(ContextRef::account(2)));
    // Pinned by the sub-account, like any other absolute state.
    assert!(course.locked);

    // The root account itself still has not opted in.
    let root = svc
        .get_flag("fancy_wickets", ContextRef::root_account(1))
        .unwrap();
    assert_eq!(root.state(), FlagState::Off);
}

// ── Caching ──────────────────────────────────────────────────────────

#[test]
fn resolution_cached_result_is_refreshed_by_mutation() {
    let svc = service();
    let node = svc.tree().node(ContextRef::course(40)).unwrap();

    assert!(!svc.resolver().is_enabled("new_ui", &node).unwrap());
    assert!(!svc.resolver().is_enabled("new_ui", &node).unwrap());
    assert!(svc.cache_stats().hits >= 1);

    svc.set_flag("new_ui", ContextRef::account(3), &admin(), "on")
        .unwrap();
    assert!(svc.resolver().is_enabled("new_ui", &node).unwrap());
}

#[test]
fn resolution_hide_inherited_enabled_filters_ancestor_on() {
    let svc = service();
    svc.set_flag("new_ui", ContextRef::account(2), &admin(), "on")
        .unwrap();
    let node = svc.tree().node(ContextRef::course(41)).unwrap();

    let hidden = svc
        .resolver()
        .resolve("new_ui", &node, ResolveOptions::default().hide_inherited_enabled())
        .unwrap();
    assert!(hidden.is_none());

    let plain = svc
        .resolver()
        .resolve("new_ui", &node, ResolveOptions::default())
        .unwrap();
    assert_eq!(plain.map(|f| f.state()), Some(FlagState::On));
}

#[test]
fn resolution_unknown_context_is_not_found() {
    let svc = service();
    let err = svc.get_flag("new_ui", ContextRef::course(999)).unwrap_err();
    assert_eq!(err.status_code(), 404);
}
