//! The backing-store contract consumed by the mapping engine.
//!
//! The store is expected to behave like a FHIR REST endpoint: resources are
//! addressed by `(kind, id)`, every read carries a version token, and every
//! write is conditional on either a previously read version or on the
//! resource not existing yet. A transaction applies a set of conditional
//! writes all-or-nothing.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A system/code/display triple as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coding {
    pub system: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            code: code.into(),
            display: None,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }
}

/// A resource value paired with the version token it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: i32,
}

impl<T> Versioned<T> {
    pub fn new(value: T, version: i32) -> Self {
        Self { value, version }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Versioned<U> {
        Versioned {
            value: f(self.value),
            version: self.version,
        }
    }
}

/// Write guard: either "the version I read is still current" or
/// "nothing with this id exists yet".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Precondition {
    IfVersion(i32),
    IfAbsent,
}

/// One conditional write inside a `conditional_put` or a transaction.
#[derive(Debug, Clone)]
pub struct ConditionalWrite {
    pub kind: String,
    pub id: String,
    pub value: JsonValue,
    pub precondition: Precondition,
}

impl ConditionalWrite {
    pub fn new(
        kind: impl Into<String>,
        id: impl Into<String>,
        value: JsonValue,
        precondition: Precondition,
    ) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
            value,
            precondition,
        }
    }
}

/// Search inputs. Matching semantics beyond `kind` are backend-specific;
/// callers that need finer filtering do it on the returned page.
#[derive(Debug, Clone, Default)]
pub struct SearchQuery {
    pub params: Vec<(String, String)>,
    pub count: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    pub resources: Vec<JsonValue>,
    pub total: usize,
}

/// Result of the server-side `$translate` lookup on a concept map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslateOutcome {
    pub matched: bool,
    pub coding: Option<Coding>,
}

impl TranslateOutcome {
    pub fn miss() -> Self {
        Self {
            matched: false,
            coding: None,
        }
    }

    pub fn hit(coding: Coding) -> Self {
        Self {
            matched: true,
            coding: Some(coding),
        }
    }
}

#[async_trait]
pub trait FhirStore: Send + Sync {
    /// Read a resource together with its current version token.
    /// Absence is `Ok(None)`, not an error.
    async fn get_with_version(&self, kind: &str, id: &str) -> Result<Option<Versioned<JsonValue>>>;

    /// Apply a single conditional write. Returns the new version on success;
    /// a failed precondition surfaces as `Error::PreconditionFailed`.
    async fn conditional_put(&self, write: ConditionalWrite) -> Result<i32>;

    /// Apply every write or none. Any failed precondition aborts the whole
    /// set with `Error::PreconditionFailed`.
    async fn commit_transaction(&self, writes: Vec<ConditionalWrite>) -> Result<()>;

    async fn search(&self, kind: &str, query: &SearchQuery) -> Result<SearchPage>;

    /// `$translate` against the concept map `table_id`: does `code` in
    /// `system` have a mapping, and if so to which target coding.
    async fn translate(&self, table_id: &str, code: &str, system: &str)
        -> Result<TranslateOutcome>;
}
