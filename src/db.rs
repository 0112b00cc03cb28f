use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::errors::PropagationError;
use crate::models::role::{self, NewRole};

const ROLE_SEED: &str = include_str!("../data/seed/roles.json");

/// Built-in rule set, used when no rule file is configured.
pub const DEFAULT_RULES: &str = include_str!("../data/rules/default.json");

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    log::info!("Database migrations complete");
    Ok(())
}

pub fn parse_role_seed(json: &str) -> Result<Vec<NewRole>, PropagationError> {
    Ok(serde_json::from_str(json)?)
}

/// Built-in role definitions.
pub fn default_roles() -> Result<Vec<NewRole>, PropagationError> {
    parse_role_seed(ROLE_SEED)
}

/// Insert the built-in roles if the role table is empty. Returns how many were created.
pub async fn seed_roles(pool: &PgPool) -> Result<usize, PropagationError> {
    if role::queries::count(pool).await? > 0 {
        log::info!("Roles already present, skipping seed");
        return Ok(0);
    }
    let roles = default_roles()?;
    for r in &roles {
        role::queries::create(pool, r).await?;
    }
    log::info!("Seeded {} access control roles", roles.len());
    Ok(roles.len())
}
