//! Shared fixtures for propagation tests.
//!
//! Everything runs against `MemoryStore`, so no database is needed.
//! - `store_with_roles()` - bare store with the given (name, object type) roles
//! - `seeded_store()` - store with the built-in role seed
//! - `propagator()` - propagator over a store handle with a JSON rule set

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, HashSet};

use grc_acl::config::PropagationConfig;
use grc_acl::db;
use grc_acl::models::acl::{AccessControlEntry, ObjectRef};
use grc_acl::propagation::{Propagator, RuleSetSpec};
use grc_acl::store::MemoryStore;

// ============================================================================
// RULE SETS
// ============================================================================

pub const FAN_OUT_RULES: &str = r#"{"Program": {"Admin": {"Relationship RUD": {"Audit RUD": {}}}}}"#;

pub const FAN_OUT_ROLES: &[(&str, &str)] = &[("Admin", "Program"), ("Admin", "Audit")];

/// Program -> Audit -> Assessment, all under the "Admin" role.
pub const CHAIN_RULES: &str = r#"{
    "Program": {
        "Admin": {
            "Relationship R": {
                "Audit RUD": {
                    "Relationship R": { "Assessment RU": {} }
                }
            }
        }
    }
}"#;

pub const CHAIN_ROLES: &[(&str, &str)] = &[
    ("Admin", "Program"),
    ("Admin", "Audit"),
    ("Admin", "Assessment"),
];

// ============================================================================
// OBJECTS
// ============================================================================

pub fn program(id: i64) -> ObjectRef {
    ObjectRef::new("Program", id)
}

pub fn audit(id: i64) -> ObjectRef {
    ObjectRef::new("Audit", id)
}

pub fn assessment(id: i64) -> ObjectRef {
    ObjectRef::new("Assessment", id)
}

pub fn comment(id: i64) -> ObjectRef {
    ObjectRef::new("Comment", id)
}

pub fn evidence(id: i64) -> ObjectRef {
    ObjectRef::new("Evidence", id)
}

// ============================================================================
// SETUP
// ============================================================================

pub async fn store_with_roles(roles: &[(&str, &str)]) -> MemoryStore {
    let store = MemoryStore::new();
    for (name, object_type) in roles {
        store.add_role(grc_acl::models::role::NewRole::new(*name, *object_type)).await;
    }
    store
}

/// Store holding the built-in role seed.
pub async fn seeded_store() -> MemoryStore {
    let store = MemoryStore::new();
    for role in db::default_roles().expect("role seed should parse") {
        store.add_role(role).await;
    }
    store
}

pub async fn propagator(store: &MemoryStore, rules: &str) -> Propagator<MemoryStore> {
    propagator_with(store, rules, PropagationConfig::default()).await
}

pub async fn propagator_with(
    store: &MemoryStore,
    rules: &str,
    config: PropagationConfig,
) -> Propagator<MemoryStore> {
    let spec = RuleSetSpec::from_json(rules).expect("rules should parse");
    Propagator::load(store.clone(), &spec, config)
        .await
        .expect("rules should validate")
}

pub async fn role(store: &MemoryStore, name: &str, object_type: &str) -> i64 {
    store
        .role_id(name, object_type)
        .await
        .unwrap_or_else(|| panic!("role {name} on {object_type} should exist"))
}

// ============================================================================
// ASSERTIONS
// ============================================================================

/// Propagated rows described without ids: (role, object, parent's (role, object),
/// root's (role, object)). Comparable across stores.
pub type Signature = BTreeSet<(i64, ObjectRef, (i64, ObjectRef), (i64, ObjectRef))>;

pub async fn signature(store: &MemoryStore) -> Signature {
    let acls = store.acls().await;
    let by_id: HashMap<i64, &AccessControlEntry> = acls.iter().map(|a| (a.id, a)).collect();
    let describe = |id: Option<i64>| -> (i64, ObjectRef) {
        let acl = by_id[&id.expect("propagated rows have a parent and base")];
        (acl.ac_role_id, acl.object())
    };
    acls.iter()
        .filter(|a| a.is_propagated())
        .map(|a| (a.ac_role_id, a.object(), describe(a.parent_id), describe(a.base_id)))
        .collect()
}

pub async fn assert_no_duplicates(store: &MemoryStore) {
    let acls = store.acls().await;
    let keys: HashSet<_> = acls.iter().map(|a| a.key()).collect();
    assert_eq!(keys.len(), acls.len(), "duplicate (role, object, parent) rows");
}

/// Propagated rows on `object`.
pub async fn propagated_on(store: &MemoryStore, object: &ObjectRef) -> Vec<AccessControlEntry> {
    store
        .acls_on(object)
        .await
        .into_iter()
        .filter(|a| a.is_propagated())
        .collect()
}
