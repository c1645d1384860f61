#![forbid(unsafe_code)]

//! Terminology mapping and task resolution for HL7v2 ingestion.
//!
//! Partner messages arrive with local codes; the governed FHIR resources we
//! produce need codes from a small set of target systems (LOINC plus a few
//! closed vocabularies). This crate resolves local codes through per-sender
//! crosswalk tables, defers anything unresolvable to a durable task queue,
//! and applies a human resolution as one atomic write that completes the
//! task and extends the crosswalk, then unblocks whatever messages were
//! waiting on it.
//!
//! The conversion pipeline calls [`CodeResolver::resolve`] per coded field
//! and [`build_blocked_result`] when codes were unmapped; the administrative
//! surface drives [`ConceptMapStore`] and [`ResolutionCoordinator`]. All
//! persistence goes through the [`conflux_store::FhirStore`] seam, and all
//! writes are conditional: a lost race is a `ConcurrentModification`, never
//! a silent overwrite.

mod concept_map;
mod coordinator;
mod error;
mod messages;
mod model;
mod registry;
mod resolver;
mod tasks;
mod validator;

pub use concept_map::{
    move_element, remove_element, upsert_element, ConceptMapStore, EntryKey, EntryPage,
    EntryUpdate, MappingEntry, MappingTableSummary, NewEntry, ENTRY_PAGE_SIZE,
};
pub use coordinator::ResolutionCoordinator;
pub use error::{Error, Result};
pub use messages::{MessageRecord, MessageStatus, MessageStore};
pub use model::{
    table_identity, ConceptMap, ConceptMapGroup, ElementTarget, GroupKey, MapElement, MapStatus,
    MappingTask, SenderContext, TaskStatus, UnmappedCode, UnmappedCodeRef, UnmappedReason,
    EQUIVALENCE_EQUIVALENT, KIND_CONCEPT_MAP, KIND_TASK,
};
pub use registry::{known_target_systems, MappingType, ValueSetPolicy};
pub use resolver::{CodeResolver, ResolvedCode, SourceCoding, SourceValue};
pub use tasks::{
    build_blocked_result, compose, compute_task_id, dedupe, mapping_type_of, mark_completed,
    BlockedConversion, TaskQueue,
};
pub use validator::validate;
