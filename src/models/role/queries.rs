use sqlx::PgPool;

use super::types::{AccessControlRole, NewRole};

const ROLE_COLUMNS: &str =
    "id, name, object_type, mandatory, non_editable, default_to_current_user";

/// All roles, ordered by object type then name.
pub async fn find_all(pool: &PgPool) -> Result<Vec<AccessControlRole>, sqlx::Error> {
    sqlx::query_as::<_, AccessControlRole>(&format!(
        "SELECT {ROLE_COLUMNS} FROM access_control_roles ORDER BY object_type, name"
    ))
    .fetch_all(pool)
    .await
}

/// Roles defined for one object type.
pub async fn find_by_object_type(
    pool: &PgPool,
    object_type: &str,
) -> Result<Vec<AccessControlRole>, sqlx::Error> {
    sqlx::query_as::<_, AccessControlRole>(&format!(
        "SELECT {ROLE_COLUMNS} FROM access_control_roles WHERE object_type = $1 ORDER BY name"
    ))
    .bind(object_type)
    .fetch_all(pool)
    .await
}

/// Find a role by its (name, object_type) pair.
pub async fn find_by_name(
    pool: &PgPool,
    name: &str,
    object_type: &str,
) -> Result<Option<AccessControlRole>, sqlx::Error> {
    sqlx::query_as::<_, AccessControlRole>(&format!(
        "SELECT {ROLE_COLUMNS} FROM access_control_roles WHERE name = $1 AND object_type = $2"
    ))
    .bind(name)
    .bind(object_type)
    .fetch_optional(pool)
    .await
}

/// Create a role, returning its id. An existing (name, object_type) pair is left
/// untouched and its id returned.
pub async fn create(pool: &PgPool, role: &NewRole) -> Result<i64, sqlx::Error> {
    let inserted: Option<(i64,)> = sqlx::query_as(
        "INSERT INTO access_control_roles \
         (name, object_type, mandatory, non_editable, default_to_current_user) \
         VALUES ($1, $2, $3, $4, $5) \
         ON CONFLICT ON CONSTRAINT uq_access_control_roles DO NOTHING \
         RETURNING id",
    )
    .bind(&role.name)
    .bind(&role.object_type)
    .bind(role.mandatory)
    .bind(role.non_editable)
    .bind(role.default_to_current_user)
    .fetch_optional(pool)
    .await?;

    match inserted {
        Some((id,)) => Ok(id),
        None => {
            let (id,): (i64,) = sqlx::query_as(
                "SELECT id FROM access_control_roles WHERE name = $1 AND object_type = $2",
            )
            .bind(&role.name)
            .bind(&role.object_type)
            .fetch_one(pool)
            .await?;
            Ok(id)
        }
    }
}

pub async fn count(pool: &PgPool) -> Result<i64, sqlx::Error> {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM access_control_roles")
        .fetch_one(pool)
        .await?;
    Ok(n)
}
