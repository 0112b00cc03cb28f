//! Retry policy for chunked writes.
//!
//! A chunk that fails with a transient conflict is retried immediately, with no
//! backoff, until the attempt budget is spent. Anything the classifier calls
//! fatal is returned on the first failure.

use std::future::Future;

use crate::errors::{PropagationError, StoreError};

/// Attempt budget per chunk.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// SQLSTATEs worth retrying: serialization failure, deadlock, lock not available.
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01", "55P03"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Transient,
    Fatal,
}

pub type Classifier = fn(&StoreError) -> Disposition;

/// Default classifier: explicit conflicts and lock-related SQLSTATEs are transient.
pub fn classify_store_error(err: &StoreError) -> Disposition {
    match err {
        StoreError::Conflict(_) => Disposition::Transient,
        StoreError::Invalid(_) => Disposition::Fatal,
        StoreError::Db(sqlx::Error::PoolTimedOut) => Disposition::Transient,
        StoreError::Db(e) => {
            let code = e.as_database_error().and_then(|d| d.code());
            match code {
                Some(code) if TRANSIENT_SQLSTATES.iter().any(|c| code == *c) => Disposition::Transient,
                _ => Disposition::Fatal,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    classify: Classifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl RetryPolicy {
    /// A budget of zero still makes one attempt.
    pub fn new(max_attempts: u32) -> Self {
        RetryPolicy {
            max_attempts: max_attempts.max(1),
            classify: classify_store_error,
        }
    }

    pub fn with_classifier(mut self, classify: Classifier) -> Self {
        self.classify = classify;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn classify(&self, err: &StoreError) -> Disposition {
        (self.classify)(err)
    }

    /// Run `op` until it succeeds, fails fatally, or the budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, PropagationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => match self.classify(&err) {
                    Disposition::Fatal => return Err(PropagationError::Store(err)),
                    Disposition::Transient if attempt >= self.max_attempts => {
                        log::error!(
                            "{operation}: giving up after {attempt} attempts, last error: {err}"
                        );
                        return Err(PropagationError::Exhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            last_error: err,
                        });
                    }
                    Disposition::Transient => {
                        log::warn!(
                            "{operation}: attempt {attempt}/{} failed, retrying: {err}",
                            self.max_attempts
                        );
                    }
                },
            }
        }
    }
}
