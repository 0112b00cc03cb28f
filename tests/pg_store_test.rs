//! Postgres-backed tests. Require a disposable database:
//! DATABASE_URL=postgres://localhost/grc_acl_test cargo test --test pg_store_test -- --ignored

mod common;

use common::*;
use grc_acl::config::PropagationConfig;
use grc_acl::db;
use grc_acl::models::{acl, person, relationship, role};
use grc_acl::propagation::{AclChange, Propagator, RelationshipChange, RuleSetSpec};
use grc_acl::store::{AclStore, PgStore};
use sqlx::PgPool;

async fn setup() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must point at a test database");
    let pool = db::init_pool(&url, 4).await.expect("Failed to connect");
    db::run_migrations(&pool).await.expect("Failed to migrate");
    db::seed_roles(&pool).await.expect("Failed to seed roles");
    pool
}

/// Object ids unique to one test run, so runs do not see each other's rows.
fn fresh_id() -> i64 {
    chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default() / 1_000
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn test_fan_out_and_relationship_delete_on_postgres() {
    let pool = setup().await;
    let managers = role::queries::find_by_name(&pool, "Program Managers", "Program")
        .await
        .unwrap()
        .expect("seeded role");
    let managers_audit = role::queries::find_by_name(&pool, "Program Managers", "Audit")
        .await
        .unwrap()
        .expect("seeded role");

    let base = fresh_id();
    let prog = program(base);
    let root = acl::queries::create_root(&pool, managers.id, &prog, None).await.unwrap();
    person::queries::assign(&pool, root.id, 77).await.unwrap();
    let first = relationship::queries::create(&pool, &prog, &audit(base + 1)).await.unwrap();
    relationship::queries::create(&pool, &audit(base + 2), &prog).await.unwrap();

    let store = PgStore::new(pool.clone());
    let spec = RuleSetSpec::from_json(db::DEFAULT_RULES).unwrap();
    let propagator = Propagator::load(store.clone(), &spec, PropagationConfig::default())
        .await
        .unwrap();

    let work = propagator.on_acl_change(&root, AclChange::Created).await.unwrap();
    let report = propagator.run(work).await.unwrap();
    assert_eq!(report.inserted, 2);

    // Idempotent second pass.
    let work = propagator.on_acl_change(&root, AclChange::Created).await.unwrap();
    assert_eq!(propagator.run(work).await.unwrap().inserted, 0);

    let on_audit = acl::queries::find_by_object(&pool, &audit(base + 1)).await.unwrap();
    assert_eq!(on_audit.len(), 1);
    assert_eq!(on_audit[0].ac_role_id, managers_audit.id);
    assert_eq!(on_audit[0].parent_id, Some(root.id));
    assert_eq!(on_audit[0].base_id, Some(root.id));

    let holders = person::queries::effective_holders(&pool, &audit(base + 2)).await.unwrap();
    assert_eq!(holders.len(), 1);
    assert_eq!(holders[0].person_id, 77);

    let removed = relationship::queries::delete(&pool, first.id).await.unwrap().unwrap();
    let work = propagator
        .on_relationship_change(&removed, RelationshipChange::Deleted)
        .await
        .unwrap();
    assert_eq!(propagator.run(work).await.unwrap().deleted, 1);
    assert!(acl::queries::find_by_object(&pool, &audit(base + 1)).await.unwrap().is_empty());
    assert_eq!(acl::queries::find_by_object(&pool, &audit(base + 2)).await.unwrap().len(), 1);

    // Deleting the root cascades in the database as well.
    acl::queries::delete(&pool, root.id).await.unwrap();
    assert!(store.acl_ids_by_base(&[root.id]).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore] // Requires running Postgres
async fn test_chunk_insert_returns_ids_of_existing_rows() {
    let pool = setup().await;
    let readers = role::queries::find_by_name(&pool, "Program Readers", "Program")
        .await
        .unwrap()
        .expect("seeded role");
    let readers_audit = role::queries::find_by_name(&pool, "Program Readers", "Audit")
        .await
        .unwrap()
        .expect("seeded role");

    let base = fresh_id();
    let root = acl::queries::create_root(&pool, readers.id, &program(base), None).await.unwrap();
    let rows: Vec<_> = (1..=3)
        .map(|n| acl::PropagatedAclRow {
            ac_role_id: readers_audit.id,
            object: audit(base + n),
            parent_id: root.id,
            base_id: root.id,
            modified_by_id: Some(1),
            stamped_at: chrono::Utc::now(),
        })
        .collect();

    let first = acl::queries::insert_propagated_chunk(&pool, &rows[..2]).await.unwrap();
    assert_eq!(first.inserted, 2);
    let second = acl::queries::insert_propagated_chunk(&pool, &rows).await.unwrap();
    assert_eq!(second.inserted, 1);
    assert_eq!(second.ids.len(), 3);
    assert_eq!(&second.ids[..2], &first.ids[..]);

    acl::queries::delete(&pool, root.id).await.unwrap();
}
