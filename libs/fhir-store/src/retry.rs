//! Bounded retry for transient lookup failures.
//!
//! Only reads are retried. Conditional writes and transactions pass through
//! untouched: their preconditions make blind re-submission unsafe, and the
//! callers own the reload-and-retry loop for those.

use crate::error::Result;
use crate::store::{
    ConditionalWrite, FhirStore, SearchPage, SearchQuery, TranslateOutcome, Versioned,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 200,
        }
    }
}

/// Store decorator that re-issues transient-failed lookups.
pub struct TransientRetry<S> {
    inner: S,
    policy: RetryPolicy,
}

impl<S> TransientRetry<S> {
    pub fn new(inner: S) -> Self {
        Self::with_policy(inner, RetryPolicy::default())
    }

    pub fn with_policy(inner: S, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    tracing::warn!(
                        operation = what,
                        attempt,
                        error = %e,
                        "transient store failure, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(self.policy.delay_ms)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<S: FhirStore> FhirStore for TransientRetry<S> {
    async fn get_with_version(&self, kind: &str, id: &str) -> Result<Option<Versioned<JsonValue>>> {
        self.run("get", || self.inner.get_with_version(kind, id))
            .await
    }

    async fn conditional_put(&self, write: ConditionalWrite) -> Result<i32> {
        self.inner.conditional_put(write).await
    }

    async fn commit_transaction(&self, writes: Vec<ConditionalWrite>) -> Result<()> {
        self.inner.commit_transaction(writes).await
    }

    async fn search(&self, kind: &str, query: &SearchQuery) -> Result<SearchPage> {
        self.run("search", || self.inner.search(kind, query)).await
    }

    async fn translate(
        &self,
        table_id: &str,
        code: &str,
        system: &str,
    ) -> Result<TranslateOutcome> {
        self.run("translate", || self.inner.translate(table_id, code, system))
            .await
    }
}
