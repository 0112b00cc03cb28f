use std::fmt;

/// Failure reported by a backing store.
#[derive(Debug)]
pub enum StoreError {
    /// Lock or deadlock contention reported by a backend that classifies its own errors.
    Conflict(String),
    Db(sqlx::Error),
    /// A row the store refused as malformed. Never retried.
    Invalid(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Conflict(e) => write!(f, "Write conflict: {e}"),
            StoreError::Db(e) => write!(f, "Database error: {e}"),
            StoreError::Invalid(e) => write!(f, "Invalid row: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Db(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Db(e)
    }
}

#[derive(Debug)]
pub enum PropagationError {
    /// The rule set references a role that does not exist. Fatal at load time.
    Configuration(String),
    /// A chunk kept failing with transient conflicts until the retry budget ran out.
    Exhausted {
        operation: String,
        attempts: u32,
        last_error: StoreError,
    },
    Store(StoreError),
    Rules(serde_json::Error),
    Migration(sqlx::migrate::MigrateError),
}

impl fmt::Display for PropagationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropagationError::Configuration(e) => write!(f, "Configuration error: {e}"),
            PropagationError::Exhausted { operation, attempts, last_error } => write!(
                f,
                "Propagation exhausted: {operation} failed after {attempts} attempts (last error: {last_error})"
            ),
            PropagationError::Store(e) => write!(f, "{e}"),
            PropagationError::Rules(e) => write!(f, "Rule set parse error: {e}"),
            PropagationError::Migration(e) => write!(f, "Migration error: {e}"),
        }
    }
}

impl std::error::Error for PropagationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PropagationError::Exhausted { last_error, .. } => Some(last_error),
            PropagationError::Store(e) => Some(e),
            PropagationError::Rules(e) => Some(e),
            PropagationError::Migration(e) => Some(e),
            PropagationError::Configuration(_) => None,
        }
    }
}

impl From<StoreError> for PropagationError {
    fn from(e: StoreError) -> Self {
        PropagationError::Store(e)
    }
}

impl From<sqlx::Error> for PropagationError {
    fn from(e: sqlx::Error) -> Self {
        PropagationError::Store(StoreError::Db(e))
    }
}

impl From<serde_json::Error> for PropagationError {
    fn from(e: serde_json::Error) -> Self {
        PropagationError::Rules(e)
    }
}

impl From<sqlx::migrate::MigrateError> for PropagationError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        PropagationError::Migration(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migration_failure_is_not_a_configuration_error() {
        let err = PropagationError::from(sqlx::migrate::MigrateError::VersionMissing(20260101000001));
        assert!(matches!(err, PropagationError::Migration(_)));
        assert!(err.to_string().starts_with("Migration error:"), "{err}");
        assert!(std::error::Error::source(&err).is_some());
    }
}
