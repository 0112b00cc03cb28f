use sqlx::PgPool;

use super::types::Relationship;
use crate::models::acl::ObjectRef;

const RELATIONSHIP_COLUMNS: &str =
    "id, source_id, source_type, destination_id, destination_type, created_at, updated_at";

pub async fn create(
    pool: &PgPool,
    source: &ObjectRef,
    destination: &ObjectRef,
) -> Result<Relationship, sqlx::Error> {
    sqlx::query_as::<_, Relationship>(&format!(
        "INSERT INTO relationships (source_id, source_type, destination_id, destination_type) \
         VALUES ($1, $2, $3, $4) RETURNING {RELATIONSHIP_COLUMNS}"
    ))
    .bind(source.id)
    .bind(&source.object_type)
    .bind(destination.id)
    .bind(&destination.object_type)
    .fetch_one(pool)
    .await
}

/// Delete a relationship, returning the removed row.
pub async fn delete(pool: &PgPool, id: i64) -> Result<Option<Relationship>, sqlx::Error> {
    sqlx::query_as::<_, Relationship>(&format!(
        "DELETE FROM relationships WHERE id = $1 RETURNING {RELATIONSHIP_COLUMNS}"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_id(pool: &PgPool, id: i64) -> Result<Option<Relationship>, sqlx::Error> {
    sqlx::query_as::<_, Relationship>(&format!(
        "SELECT {RELATIONSHIP_COLUMNS} FROM relationships WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await
}

pub async fn find_by_ids(pool: &PgPool, ids: &[i64]) -> Result<Vec<Relationship>, sqlx::Error> {
    sqlx::query_as::<_, Relationship>(&format!(
        "SELECT {RELATIONSHIP_COLUMNS} FROM relationships WHERE id = ANY($1) ORDER BY id"
    ))
    .bind(ids)
    .fetch_all(pool)
    .await
}

/// Relationships with one end among `object_ids` of `object_type`, in either
/// direction. With `other_type` set, only edges whose opposite end has that type.
pub async fn touching(
    pool: &PgPool,
    object_type: &str,
    object_ids: &[i64],
    other_type: Option<&str>,
) -> Result<Vec<Relationship>, sqlx::Error> {
    sqlx::query_as::<_, Relationship>(&format!(
        "SELECT {RELATIONSHIP_COLUMNS} FROM relationships \
         WHERE source_type = $1 AND source_id = ANY($2) \
           AND ($3::TEXT IS NULL OR destination_type = $3) \
         UNION \
         SELECT {RELATIONSHIP_COLUMNS} FROM relationships \
         WHERE destination_type = $1 AND destination_id = ANY($2) \
           AND ($3::TEXT IS NULL OR source_type = $3) \
         ORDER BY id"
    ))
    .bind(object_type)
    .bind(object_ids)
    .bind(other_type)
    .fetch_all(pool)
    .await
}
