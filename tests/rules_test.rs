mod common;

use std::collections::BTreeSet;

use common::*;
use grc_acl::config::PropagationConfig;
use grc_acl::db;
use grc_acl::errors::PropagationError;
use grc_acl::propagation::{Permission, Propagator, RuleSetSpec};
use grc_acl::store::AclStore;

#[tokio::test]
async fn test_default_rules_validate_against_seed_roles() {
    let store = seeded_store().await;
    let propagator = propagator(&store, db::DEFAULT_RULES).await;
    let rules = propagator.rules();
    assert_eq!(rules.len(), 5);

    let managers = rules.lookup("Program", "Program Managers").unwrap();
    assert!(managers.mentions_type("Audit"));
    assert!(managers.mentions_type("Control"));
    assert!(!managers.mentions_type("Relationship"));

    let path = [
        role(&store, "Program Managers", "Program").await,
        role(&store, "Program Managers", "Audit").await,
    ];
    let expected: BTreeSet<Permission> = [Permission::Read, Permission::Update, Permission::Delete].into();
    assert_eq!(rules.grants_at(&path), Some(&expected));
    assert!(rules.lookup("Program", "Nobody").is_none());
}

#[tokio::test]
async fn test_seed_covers_every_role() {
    let store = seeded_store().await;
    let roles = store.roles().await.unwrap();
    assert_eq!(roles.len(), db::default_roles().unwrap().len());
    assert!(roles.iter().any(|r| r.name == "Admin" && r.object_type == "Control" && r.mandatory));
}

#[tokio::test]
async fn test_unknown_role_is_a_configuration_error() {
    let store = store_with_roles(&[("Admin", "Program")]).await;
    let spec = RuleSetSpec::from_json(FAN_OUT_RULES).unwrap();
    let result = Propagator::load(store, &spec, PropagationConfig::default()).await;
    match result {
        Err(PropagationError::Configuration(msg)) => assert!(msg.contains("Audit"), "{msg}"),
        Err(other) => panic!("expected configuration error, got {other}"),
        Ok(_) => panic!("rules referencing a missing role must not load"),
    }
}

#[tokio::test]
async fn test_rule_files_merge_by_feature_area() {
    let store = store_with_roles(&[
        ("Admin", "Program"),
        ("Admin", "Audit"),
        ("Admin", "Control"),
    ])
    .await;
    let mut spec = RuleSetSpec::from_json(FAN_OUT_RULES).unwrap();
    spec.merge(RuleSetSpec::from_json(r#"{"Program": {"Admin": {"Control R": {}}}}"#).unwrap());
    let propagator = Propagator::load(store.clone(), &spec, PropagationConfig::default())
        .await
        .unwrap();

    let admin = role(&store, "Admin", "Program").await;
    store.grant(admin, &program(1)).await;
    store.relate(&program(1), &audit(1)).await;
    store
        .relate(&program(1), &grc_acl::models::acl::ObjectRef::new("Control", 1))
        .await;

    let report = propagator.propagate_all().await.unwrap();
    assert_eq!(report.inserted, 2);
}

#[test]
fn test_malformed_rule_json_is_rejected() {
    assert!(matches!(
        RuleSetSpec::from_json("{\"Program\": [1, 2]}"),
        Err(PropagationError::Rules(_))
    ));
    assert!(matches!(
        RuleSetSpec::from_json(r#"{"Program": {"Admin": {"Audit XYZ": {}}}}"#),
        Err(PropagationError::Configuration(_))
    ));
}
