use std::collections::HashMap;

use chrono::Utc;
use sqlx::PgPool;

use crate::errors::StoreError;

use super::types::{AccessControlEntry, InsertOutcome, ObjectRef, PropagatedAclRow};

const ACL_COLUMNS: &str = "id, ac_role_id, object_id, object_type, parent_id, base_id, \
     created_at, updated_at, modified_by_id";

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<AccessControlEntry>, sqlx::Error> {
    sqlx::query_as::<_, AccessControlEntry>(&format!(
        "SELECT {ACL_COLUMNS} FROM access_control_list WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_ids(pool: &PgPool, ids: &[i64]) -> Result<Vec<AccessControlEntry>, sqlx::Error> {
    sqlx::query_as::<_, AccessControlEntry>(&format!(
        "SELECT {ACL_COLUMNS} FROM access_control_list WHERE id = ANY($1) ORDER BY id"
    ))
    .bind(ids)
    .fetch_all(pool)
    .await
}

/// All rows (direct and propagated) on objects of one type.
pub async fn find_by_objects(
    pool: &PgPool,
    object_type: &str,
    object_ids: &[i64],
) -> Result<Vec<AccessControlEntry>, sqlx::Error> {
    sqlx::query_as::<_, AccessControlEntry>(&format!(
        "SELECT {ACL_COLUMNS} FROM access_control_list \
         WHERE object_type = $1 AND object_id = ANY($2) ORDER BY id"
    ))
    .bind(object_type)
    .bind(object_ids)
    .fetch_all(pool)
    .await
}

pub async fn find_by_object(
    pool: &PgPool,
    object: &ObjectRef,
) -> Result<Vec<AccessControlEntry>, sqlx::Error> {
    find_by_objects(pool, &object.object_type, &[object.id]).await
}

/// Directly assigned grants (rows without a parent).
pub async fn find_roots(pool: &PgPool) -> Result<Vec<AccessControlEntry>, sqlx::Error> {
    sqlx::query_as::<_, AccessControlEntry>(&format!(
        "SELECT {ACL_COLUMNS} FROM access_control_list WHERE parent_id IS NULL ORDER BY id"
    ))
    .fetch_all(pool)
    .await
}

pub async fn child_ids(pool: &PgPool, parent_ids: &[i64]) -> Result<Vec<i64>, sqlx::Error> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM access_control_list WHERE parent_id = ANY($1) ORDER BY id",
    )
    .bind(parent_ids)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// Every propagated row whose chain starts at one of `base_ids`.
pub async fn ids_by_base(pool: &PgPool, base_ids: &[i64]) -> Result<Vec<i64>, sqlx::Error> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM access_control_list WHERE base_id = ANY($1) ORDER BY id",
    )
    .bind(base_ids)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

pub async fn propagated_ids(pool: &PgPool) -> Result<Vec<i64>, sqlx::Error> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        "SELECT id FROM access_control_list WHERE parent_id IS NOT NULL ORDER BY id",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|r| r.0).collect())
}

/// Create a directly assigned grant. Re-granting an existing (role, object)
/// pair returns the existing row.
pub async fn create_root(
    pool: &PgPool,
    ac_role_id: i64,
    object: &ObjectRef,
    modified_by_id: Option<i64>,
) -> Result<AccessControlEntry, sqlx::Error> {
    sqlx::query(
        "INSERT INTO access_control_list (ac_role_id, object_id, object_type, modified_by_id) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT ON CONSTRAINT uq_access_control_list DO NOTHING",
    )
    .bind(ac_role_id)
    .bind(object.id)
    .bind(&object.object_type)
    .bind(modified_by_id)
    .execute(pool)
    .await?;

    sqlx::query_as::<_, AccessControlEntry>(&format!(
        "SELECT {ACL_COLUMNS} FROM access_control_list \
         WHERE ac_role_id = $1 AND object_id = $2 AND object_type = $3 AND parent_id IS NULL"
    ))
    .bind(ac_role_id)
    .bind(object.id)
    .bind(&object.object_type)
    .fetch_one(pool)
    .await
}

/// Point a grant at a different role. Callers re-propagate afterwards.
pub async fn update_role(
    pool: &PgPool,
    id: i64,
    ac_role_id: i64,
    modified_by_id: Option<i64>,
) -> Result<Option<AccessControlEntry>, sqlx::Error> {
    sqlx::query_as::<_, AccessControlEntry>(&format!(
        "UPDATE access_control_list \
         SET ac_role_id = $2, modified_by_id = $3, updated_at = now() \
         WHERE id = $1 RETURNING {ACL_COLUMNS}"
    ))
    .bind(id)
    .bind(ac_role_id)
    .bind(modified_by_id)
    .fetch_optional(pool)
    .await
}

/// Insert one chunk of propagated rows in its own transaction, ignoring rows
/// that already exist, and return the id of every requested row.
///
/// A row skipped as existing can be deleted by a concurrent purge before its
/// id is read back. That is reported as a `Conflict`, so a retry inserts it
/// again.
pub async fn insert_propagated_chunk(
    pool: &PgPool,
    rows: &[PropagatedAclRow],
) -> Result<InsertOutcome, StoreError> {
    if rows.is_empty() {
        return Ok(InsertOutcome::default());
    }

    let role_ids: Vec<i64> = rows.iter().map(|r| r.ac_role_id).collect();
    let object_ids: Vec<i64> = rows.iter().map(|r| r.object.id).collect();
    let object_types: Vec<String> = rows.iter().map(|r| r.object.object_type.clone()).collect();
    let stamps: Vec<chrono::DateTime<Utc>> = rows.iter().map(|r| r.stamped_at).collect();
    let modified_by: Vec<Option<i64>> = rows.iter().map(|r| r.modified_by_id).collect();
    let parent_ids: Vec<i64> = rows.iter().map(|r| r.parent_id).collect();
    let base_ids: Vec<i64> = rows.iter().map(|r| r.base_id).collect();

    let mut tx = pool.begin().await?;

    let inserted = sqlx::query(
        "INSERT INTO access_control_list \
         (ac_role_id, object_id, object_type, created_at, modified_by_id, updated_at, parent_id, base_id) \
         SELECT * FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::TEXT[], $4::TIMESTAMPTZ[], \
                              $5::BIGINT[], $4::TIMESTAMPTZ[], $6::BIGINT[], $7::BIGINT[]) \
         ON CONFLICT ON CONSTRAINT uq_access_control_list DO NOTHING",
    )
    .bind(&role_ids)
    .bind(&object_ids)
    .bind(&object_types)
    .bind(&stamps)
    .bind(&modified_by)
    .bind(&parent_ids)
    .bind(&base_ids)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    let found: Vec<(i64, i64)> = sqlx::query_as(
        "SELECT acl.id, k.ord \
         FROM UNNEST($1::BIGINT[], $2::BIGINT[], $3::TEXT[], $4::BIGINT[]) \
              WITH ORDINALITY AS k(ac_role_id, object_id, object_type, parent_id, ord) \
         JOIN access_control_list acl \
           ON acl.ac_role_id = k.ac_role_id \
          AND acl.object_id = k.object_id \
          AND acl.object_type = k.object_type \
          AND acl.parent_id_nn = k.parent_id",
    )
    .bind(&role_ids)
    .bind(&object_ids)
    .bind(&object_types)
    .bind(&parent_ids)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    let ids = ids_in_request_order(found, rows.len())?;
    Ok(InsertOutcome { ids, inserted })
}

/// Order `(id, ordinal)` pairs by their 1-based ordinal. A missing ordinal means
/// the row vanished between insert and lookup.
fn ids_in_request_order(found: Vec<(i64, i64)>, len: usize) -> Result<Vec<i64>, StoreError> {
    let by_ordinal: HashMap<i64, i64> = found.into_iter().map(|(id, ord)| (ord, id)).collect();
    (1..=len as i64)
        .map(|ord| {
            by_ordinal.get(&ord).copied().ok_or_else(|| {
                StoreError::Conflict(format!("row {ord} of {len} was deleted concurrently"))
            })
        })
        .collect()
}

/// Delete rows by id in one statement. Children go with them via the
/// `parent_id` / `base_id` cascades.
pub async fn delete_by_ids(pool: &PgPool, ids: &[i64]) -> Result<u64, sqlx::Error> {
    if ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query("DELETE FROM access_control_list WHERE id = ANY($1)")
        .bind(ids)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn delete(pool: &PgPool, id: i64) -> Result<Option<AccessControlEntry>, sqlx::Error> {
    sqlx::query_as::<_, AccessControlEntry>(&format!(
        "DELETE FROM access_control_list WHERE id = $1 RETURNING {ACL_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}
