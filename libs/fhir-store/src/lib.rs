#![forbid(unsafe_code)]

//! Backing-store abstraction for the Conflux mapping engine.
//!
//! Everything the engine persists lives behind [`FhirStore`]: a FHIR-style
//! resource store with version tokens on every read, conditional writes
//! (compare-and-swap or create-if-absent), all-or-nothing transactions, and
//! the ConceptMap `$translate` lookup. [`TransientRetry`] adds bounded
//! retries for transient lookup failures; [`MemoryStore`] is the in-memory
//! backend used by tests and local development.

mod error;
mod memory;
mod retry;
mod store;

pub use error::{Error, Result};
pub use memory::MemoryStore;
pub use retry::{RetryPolicy, TransientRetry};
pub use store::{
    Coding, ConditionalWrite, FhirStore, Precondition, SearchPage, SearchQuery, TranslateOutcome,
    Versioned,
};
