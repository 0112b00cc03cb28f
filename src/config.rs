use std::path::PathBuf;
use std::str::FromStr;

use crate::errors::PropagationError;
use crate::propagation::persist::DEFAULT_CHUNK_SIZE;
use crate::propagation::retry::DEFAULT_MAX_ATTEMPTS;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 8;

/// Knobs for one [`Propagator`](crate::propagation::Propagator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationConfig {
    /// Rows per insert or delete chunk.
    pub chunk_size: usize,
    /// Attempts per chunk before giving up.
    pub max_attempts: u32,
    /// Written to `modified_by_id` on propagated rows.
    pub actor_id: Option<i64>,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        PropagationConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            actor_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub max_connections: u32,
    /// `None` means the built-in rule set.
    pub rules_path: Option<PathBuf>,
    pub propagation: PropagationConfig,
}

impl AppConfig {
    /// Read configuration from the process environment. Call
    /// `dotenvy::dotenv()` first to pick up a `.env` file.
    pub fn from_env() -> Result<Self, PropagationError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, PropagationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let database_url = lookup("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| PropagationError::Configuration("DATABASE_URL is not set".to_string()))?;

        let defaults = PropagationConfig::default();
        Ok(AppConfig {
            database_url,
            max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            rules_path: lookup("ACL_RULES_PATH")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            propagation: PropagationConfig {
                chunk_size: parse_or(&lookup, "ACL_CHUNK_SIZE", defaults.chunk_size)?,
                max_attempts: parse_or(&lookup, "ACL_MAX_ATTEMPTS", defaults.max_attempts)?,
                actor_id: match lookup("ACL_ACTOR_ID").filter(|v| !v.trim().is_empty()) {
                    Some(raw) => Some(parse_value("ACL_ACTOR_ID", &raw)?),
                    None => None,
                },
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, PropagationError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key).filter(|v| !v.trim().is_empty()) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, PropagationError> {
    raw.trim()
        .parse()
        .map_err(|_| PropagationError::Configuration(format!("{key} has an invalid value: '{raw}'")))
}
