mod common;

use common::*;
use grc_acl::config::PropagationConfig;
use grc_acl::errors::{PropagationError, StoreError};
use grc_acl::propagation::{AclChange, RelationshipChange, RetryPolicy};

#[tokio::test]
async fn test_nine_conflicts_then_success() {
    let store = store_with_roles(FAN_OUT_ROLES).await;
    let admin = role(&store, "Admin", "Program").await;
    let root = store.grant(admin, &program(1)).await;
    store.relate(&program(1), &audit(1)).await;
    store.relate(&program(1), &audit(2)).await;
    let propagator = propagator(&store, FAN_OUT_RULES).await;

    store.fail_next_inserts(9).await;
    let work = propagator.on_acl_change(&root, AclChange::Created).await.unwrap();
    let report = propagator.run(work).await.unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(store.insert_attempts().await, 10);
    assert_eq!(store.propagated().await.len(), 2);
}

#[tokio::test]
async fn test_ten_conflicts_exhaust_the_budget() {
    let store = store_with_roles(FAN_OUT_ROLES).await;
    let admin = role(&store, "Admin", "Program").await;
    let root = store.grant(admin, &program(1)).await;
    store.relate(&program(1), &audit(1)).await;
    let propagator = propagator(&store, FAN_OUT_RULES)
        .await
        .with_retry_policy(RetryPolicy::new(10));

    store.fail_next_inserts(10).await;
    let work = propagator.on_acl_change(&root, AclChange::Created).await.unwrap();
    match propagator.run(work).await {
        Err(PropagationError::Exhausted { attempts, last_error, .. }) => {
            assert_eq!(attempts, 10);
            assert!(matches!(last_error, StoreError::Conflict(_)));
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
    assert!(store.propagated().await.is_empty());

    // A later re-run completes the propagation.
    let work = propagator.on_acl_change(&root, AclChange::Created).await.unwrap();
    let report = propagator.run(work).await.unwrap();
    assert_eq!(report.inserted, 1);
}

#[tokio::test]
async fn test_committed_chunks_survive_a_later_failure() {
    let store = store_with_roles(FAN_OUT_ROLES).await;
    let admin = role(&store, "Admin", "Program").await;
    store.grant(admin, &program(1)).await;
    for id in 1..=3 {
        store.relate(&program(1), &audit(id)).await;
    }
    let config = PropagationConfig {
        chunk_size: 1,
        max_attempts: 2,
        actor_id: Some(9),
    };
    let propagator = propagator_with(&store, FAN_OUT_RULES, config).await;

    let report = propagator.propagate_all().await.unwrap();
    assert_eq!(report.chunks, 3);
    assert!(store.propagated().await.iter().all(|a| a.modified_by_id == Some(9)));

    // Wipe the rows, then let the first chunk through and fail the second.
    let ids: Vec<i64> = store.propagated().await.iter().map(|a| a.id).collect();
    for id in ids {
        store.revoke(id).await;
    }
    store.fail_inserts_after(1, 2).await;
    let err = propagator.propagate_all().await.unwrap_err();
    assert!(matches!(err, PropagationError::Exhausted { attempts: 2, .. }));
    let survivors = store.propagated().await;
    assert_eq!(survivors.len(), 1);
    assert_eq!(survivors[0].object(), audit(1));

    // Re-running resumes without duplicates.
    let report = propagator.propagate_all().await.unwrap();
    assert_eq!(report.planned, 3);
    assert_eq!(report.inserted, 2);
    assert_no_duplicates(&store).await;
}

#[tokio::test]
async fn test_deletes_are_retried() {
    let store = store_with_roles(FAN_OUT_ROLES).await;
    let admin = role(&store, "Admin", "Program").await;
    store.grant(admin, &program(1)).await;
    let rel = store.relate(&program(1), &audit(1)).await;
    let propagator = propagator(&store, FAN_OUT_RULES).await;
    propagator.propagate_all().await.unwrap();

    store.unrelate(rel.id).await.unwrap();
    store.fail_next_deletes(3).await;
    let work = propagator
        .on_relationship_change(&rel, RelationshipChange::Deleted)
        .await
        .unwrap();
    let report = propagator.run(work).await.unwrap();
    assert_eq!(report.deleted, 1);
    assert!(store.propagated().await.is_empty());
}

#[tokio::test]
async fn test_invalid_rows_fail_without_retry() {
    let store = store_with_roles(FAN_OUT_ROLES).await;
    let admin = role(&store, "Admin", "Program").await;
    let root = store.grant(admin, &program(1)).await;
    store.relate(&program(1), &audit(1)).await;
    let propagator = propagator(&store, FAN_OUT_RULES).await;

    // An anchor pointing at a row the store has never seen.
    let work = propagator.on_acl_change(&root, AclChange::Created).await.unwrap();
    let mut anchor = work.anchors[0].clone();
    anchor.acl.id = 9_999;

    let engine = grc_acl::propagation::ExpansionEngine::new(propagator.rules(), &store);
    let expansion = engine.expand(&[anchor]).await.unwrap();
    assert_eq!(expansion.len(), 1);

    let retry = RetryPolicy::default();
    let writer = grc_acl::propagation::BatchWriter::new(&store, &retry, 100, None);
    let err = writer.persist(&expansion).await.unwrap_err();
    assert!(matches!(err, PropagationError::Store(StoreError::Invalid(_))));
    assert_eq!(store.insert_attempts().await, 1);
}
