use sqlx::PgPool;

use super::types::{AccessControlPerson, EffectiveHolder};
use crate::models::acl::ObjectRef;

/// Attach a person to an ACL row. Returns the existing link if already present.
pub async fn assign(pool: &PgPool, ac_list_id: i64, person_id: i64) -> Result<i64, sqlx::Error> {
    let (id,): (i64,) = sqlx::query_as(
        "INSERT INTO access_control_people (ac_list_id, person_id) VALUES ($1, $2) \
         ON CONFLICT ON CONSTRAINT uq_access_control_people \
         DO UPDATE SET person_id = EXCLUDED.person_id \
         RETURNING id",
    )
    .bind(ac_list_id)
    .bind(person_id)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

pub async fn find_by_acl(pool: &PgPool, ac_list_id: i64) -> Result<Vec<AccessControlPerson>, sqlx::Error> {
    sqlx::query_as::<_, AccessControlPerson>(
        "SELECT id, ac_list_id, person_id FROM access_control_people \
         WHERE ac_list_id = $1 ORDER BY person_id",
    )
    .bind(ac_list_id)
    .fetch_all(pool)
    .await
}

/// Everyone holding a role on `object`. People are attached to root rows only,
/// so propagated rows resolve their holders through `base_id`.
pub async fn effective_holders(pool: &PgPool, object: &ObjectRef) -> Result<Vec<EffectiveHolder>, sqlx::Error> {
    sqlx::query_as::<_, EffectiveHolder>(
        "SELECT DISTINCT acp.person_id, acl.ac_role_id, acl.id AS ac_list_id \
         FROM access_control_list acl \
         JOIN access_control_people acp ON acp.ac_list_id = COALESCE(acl.base_id, acl.id) \
         WHERE acl.object_type = $1 AND acl.object_id = $2 \
         ORDER BY acp.person_id, acl.ac_role_id, acl.id",
    )
    .bind(&object.object_type)
    .bind(object.id)
    .fetch_all(pool)
    .await
}
