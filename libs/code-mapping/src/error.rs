//! Error types for the mapping engine.
//!
//! Unmapped codes are not failures of the conversion; they fold into a
//! blocked result at the pipeline boundary. Everything else here is either a
//! business error reported to the caller as a value, or a backing-store
//! error propagated untouched.

use thiserror::Error;

use crate::model::{SenderContext, UnmappedCode};
use crate::registry::MappingType;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The source value carried no coding system at all. The input is
    /// unusable, not merely unmapped; nothing is deferred to a task.
    #[error("source value for {mapping_type} from {sender} has no coding system (code {local_code:?})")]
    MissingSourceSystem {
        sender: SenderContext,
        mapping_type: MappingType,
        local_code: Option<String>,
    },

    /// Resolvable later by a human; carries everything a task needs.
    #[error("no mapping for '{code}' in system '{system}' ({mapping_type} from {sender})",
        code = .0.local_code, system = .0.local_system,
        mapping_type = .0.mapping_type, sender = .0.sender)]
    Unmapped(UnmappedCode),

    #[error("invalid resolution value '{code}' for {mapping_type}: {reason}")]
    InvalidResolution {
        mapping_type: MappingType,
        code: String,
        reason: String,
    },

    #[error("task {id} is already completed")]
    TaskAlreadyCompleted { id: String },

    /// A conditional write lost the race. Transient: reload and retry the
    /// whole operation.
    #[error("concurrent modification of {kind}/{id}")]
    ConcurrentModification { kind: String, id: String },

    #[error("entry '{local_code}' ({local_system}) already exists in table {table_id}")]
    DuplicateEntry {
        table_id: String,
        local_code: String,
        local_system: String,
    },

    #[error("not found: {kind}/{id}")]
    NotFound { kind: String, id: String },

    #[error("cannot derive a task id: {field} is empty")]
    EmptyTaskKey { field: &'static str },

    #[error("unknown mapping type: {0}")]
    UnknownMappingType(String),

    #[error("task {id} carries unknown classification code '{code}'")]
    UnknownTaskCode { id: String, code: String },

    #[error("store error: {0}")]
    Store(#[from] conflux_store::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Map a store-level failure onto the engine taxonomy for a specific
    /// resource: precondition losses become `ConcurrentModification`,
    /// everything else passes through.
    pub(crate) fn from_store_for(kind: &str, id: &str, e: conflux_store::Error) -> Error {
        match e {
            conflux_store::Error::PreconditionFailed { .. }
            | conflux_store::Error::TransactionAborted(_) => Error::ConcurrentModification {
                kind: kind.to_string(),
                id: id.to_string(),
            },
            other => Error::Store(other),
        }
    }
}
