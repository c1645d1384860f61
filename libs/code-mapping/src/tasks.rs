//! Task identity, creation, and completion.
//!
//! Task ids are a pure derivation of `(table identity, local system, local
//! code)`, so the same unresolved code always lands on the same task no
//! matter how many messages carry it.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use conflux_store::{Coding, ConditionalWrite, FhirStore, Precondition, Versioned};

use crate::error::{Error, Result};
use crate::messages::MessageStatus;
use crate::model::{
    table_identity, MappingTask, SenderContext, TaskStatus, UnmappedCode, UnmappedCodeRef,
    KIND_TASK,
};
use crate::registry::MappingType;

/// Stable 8-hex-char digest of one id segment.
fn hash_segment(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..8].to_string()
}

/// Deterministic task id: `map-<table>-<h(system)>-<h(code)>`.
///
/// Fails fast on empty inputs: an id derived from blanks would collide
/// every blank-coded message onto one task.
pub fn compute_task_id(
    table_identity: &str,
    local_system: &str,
    local_code: &str,
) -> Result<String> {
    if local_system.trim().is_empty() {
        return Err(Error::EmptyTaskKey {
            field: "localSystem",
        });
    }
    if local_code.trim().is_empty() {
        return Err(Error::EmptyTaskKey { field: "localCode" });
    }
    Ok(format!(
        "map-{}-{}-{}",
        table_identity,
        hash_segment(local_system.trim()),
        hash_segment(local_code.trim())
    ))
}

/// Build the task for one unresolved code. Pure; nothing is persisted.
pub fn compose(unmapped: &UnmappedCode) -> Result<MappingTask> {
    let table = table_identity(&unmapped.sender, unmapped.mapping_type);
    let id = compute_task_id(&table, &unmapped.local_system, &unmapped.local_code)?;
    let now = Utc::now();
    Ok(MappingTask {
        resource_type: KIND_TASK.to_string(),
        id,
        status: TaskStatus::Requested,
        code: unmapped.mapping_type.task_code().to_string(),
        sending_application: unmapped.sender.sending_application.clone(),
        sending_facility: unmapped.sender.sending_facility.clone(),
        local_code: unmapped.local_code.trim().to_string(),
        local_display: unmapped.local_display.clone(),
        local_system: unmapped.local_system.trim().to_string(),
        resolved: None,
        authored_on: now,
        last_modified: now,
        extensions: HashMap::new(),
    })
}

/// Collapse the unresolved codes of one conversion attempt into unique
/// tasks. First-seen labels win: a later occurrence of the same code never
/// overwrites the display already captured.
pub fn dedupe(unmapped: &[UnmappedCode]) -> Result<Vec<MappingTask>> {
    let mut seen = HashSet::new();
    let mut tasks = Vec::new();
    for u in unmapped {
        let task = compose(u)?;
        if seen.insert(task.id.clone()) {
            tasks.push(task);
        }
    }
    Ok(tasks)
}

/// Transition `Requested → Completed`. Terminal: resolving a completed task
/// again is an error, never a reopen.
pub fn mark_completed(task: &MappingTask, code: &str, display: Option<&str>) -> Result<MappingTask> {
    if task.is_completed() {
        return Err(Error::TaskAlreadyCompleted {
            id: task.id.clone(),
        });
    }
    let mapping_type = mapping_type_of(task)?;
    let mut resolved = Coding::new(mapping_type.target_system(), code);
    if let Some(d) = display {
        resolved = resolved.with_display(d);
    }
    let mut completed = task.clone();
    completed.status = TaskStatus::Completed;
    completed.resolved = Some(resolved);
    completed.last_modified = Utc::now();
    Ok(completed)
}

/// Reverse-map the stored classification code, tolerating codes written by
/// earlier releases.
pub fn mapping_type_of(task: &MappingTask) -> Result<MappingType> {
    MappingType::from_task_code(&task.code).ok_or_else(|| Error::UnknownTaskCode {
        id: task.id.clone(),
        code: task.code.clone(),
    })
}

/// What the conversion pipeline records when a message cannot ship yet.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockedConversion {
    pub status: MessageStatus,
    pub tasks: Vec<MappingTask>,
    pub unmapped_code_refs: Vec<UnmappedCodeRef>,
}

/// Fold the unresolved codes of one conversion attempt into the blocked
/// outcome handed back to the pipeline: deduplicated tasks plus one ref per
/// task for the message record.
pub fn build_blocked_result(
    sender: &SenderContext,
    unmapped: &[UnmappedCode],
) -> Result<BlockedConversion> {
    debug_assert!(unmapped.iter().all(|u| &u.sender == sender));
    let tasks = dedupe(unmapped)?;
    let refs = tasks
        .iter()
        .map(|t| UnmappedCodeRef {
            local_code: t.local_code.clone(),
            local_display: t.local_display.clone(),
            local_system: t.local_system.clone(),
            task_reference: t.id.clone(),
        })
        .collect();
    Ok(BlockedConversion {
        status: MessageStatus::BlockedOnMapping,
        tasks,
        unmapped_code_refs: refs,
    })
}

/// Durable task queue over the backing store.
///
/// Enqueueing is idempotent per task id: a task already raised by an
/// earlier conversion attempt, or already completed, is left untouched.
#[derive(Clone)]
pub struct TaskQueue {
    store: Arc<dyn FhirStore>,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn FhirStore>) -> Self {
        Self { store }
    }

    /// Persist any of `tasks` not yet in the store. Returns how many were
    /// newly created.
    pub async fn enqueue(&self, tasks: &[MappingTask]) -> Result<usize> {
        let mut created = 0;
        for task in tasks {
            let write = ConditionalWrite::new(
                KIND_TASK,
                &task.id,
                serde_json::to_value(task).map_err(conflux_store::Error::Json)?,
                Precondition::IfAbsent,
            );
            match self.store.conditional_put(write).await {
                Ok(_) => created += 1,
                Err(conflux_store::Error::PreconditionFailed { .. }) => {
                    tracing::debug!(task_id = %task.id, "task already queued");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(created)
    }

    pub async fn get(&self, task_id: &str) -> Result<Option<Versioned<MappingTask>>> {
        let Some(raw) = self.store.get_with_version(KIND_TASK, task_id).await? else {
            return Ok(None);
        };
        let task: MappingTask = serde_json::from_value(raw.value)
            .map_err(|e| Error::Store(conflux_store::Error::Json(e)))?;
        Ok(Some(Versioned::new(task, raw.version)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UnmappedReason;

    fn sender() -> SenderContext {
        SenderContext::new("ACME_LAB", "ACME_HOSP")
    }

    fn unmapped(code: &str, system: &str, mapping_type: MappingType) -> UnmappedCode {
        UnmappedCode {
            reason: UnmappedReason::NoMapping,
            sender: sender(),
            mapping_type,
            local_code: code.to_string(),
            local_display: Some(format!("{code} first label")),
            local_system: system.to_string(),
        }
    }

    #[test]
    fn id_is_pure_and_input_sensitive() {
        let table = "hl7v2-acme-lab-acme-hosp-observation-code-loinc";
        let a = compute_task_id(table, "ACME-LAB-CODES", "K_SERUM").unwrap();
        let b = compute_task_id(table, "ACME-LAB-CODES", "K_SERUM").unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("map-hl7v2-acme-lab-acme-hosp-observation-code-loinc-"));

        let other_code = compute_task_id(table, "ACME-LAB-CODES", "NA_SERUM").unwrap();
        let other_system = compute_task_id(table, "OTHER-CODES", "K_SERUM").unwrap();
        assert_ne!(a, other_code);
        assert_ne!(a, other_system);
    }

    #[test]
    fn empty_key_fields_fail_fast() {
        assert!(matches!(
            compute_task_id("t", "", "K_SERUM"),
            Err(Error::EmptyTaskKey {
                field: "localSystem"
            })
        ));
        assert!(matches!(
            compute_task_id("t", "ACME-LAB-CODES", "   "),
            Err(Error::EmptyTaskKey { field: "localCode" })
        ));
    }

    #[test]
    fn dedupe_collapses_identical_keys_first_seen_wins() {
        let mut second = unmapped("K_SERUM", "ACME-LAB-CODES", MappingType::ObservationCodeLoinc);
        second.local_display = Some("K_SERUM second label".into());
        let errors = vec![
            unmapped("K_SERUM", "ACME-LAB-CODES", MappingType::ObservationCodeLoinc),
            second,
            unmapped("K_SERUM", "ACME-LAB-CODES", MappingType::ObservationCodeLoinc),
        ];
        let tasks = dedupe(&errors).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(
            tasks[0].local_display.as_deref(),
            Some("K_SERUM first label")
        );
    }

    #[test]
    fn same_code_different_type_produces_two_tasks() {
        let errors = vec![
            unmapped("X", "ACME-CODES", MappingType::ObservationCodeLoinc),
            unmapped("X", "ACME-CODES", MappingType::AbnormalFlag),
        ];
        let tasks = dedupe(&errors).unwrap();
        assert_eq!(tasks.len(), 2);
    }

    #[test]
    fn compose_stamps_classification_and_status() {
        let task = compose(&unmapped(
            "K_SERUM",
            "ACME-LAB-CODES",
            MappingType::ObservationCodeLoinc,
        ))
        .unwrap();
        assert_eq!(task.status, TaskStatus::Requested);
        assert_eq!(task.code, "unmapped-observation-code");
        assert_eq!(task.sending_application, "ACME_LAB");
        assert_eq!(mapping_type_of(&task).unwrap(), MappingType::ObservationCodeLoinc);
    }

    #[test]
    fn legacy_classification_codes_still_resolve() {
        let mut task = compose(&unmapped(
            "K_SERUM",
            "ACME-LAB-CODES",
            MappingType::ObservationCodeLoinc,
        ))
        .unwrap();
        task.code = "loinc-mapping".to_string();
        assert_eq!(mapping_type_of(&task).unwrap(), MappingType::ObservationCodeLoinc);

        task.code = "no-such-code".to_string();
        assert!(matches!(
            mapping_type_of(&task),
            Err(Error::UnknownTaskCode { .. })
        ));
    }

    #[test]
    fn mark_completed_is_terminal() {
        let task = compose(&unmapped(
            "K_SERUM",
            "ACME-LAB-CODES",
            MappingType::ObservationCodeLoinc,
        ))
        .unwrap();
        let done = mark_completed(&task, "2823-3", Some("Potassium")).unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        let resolved = done.resolved.as_ref().unwrap();
        assert_eq!(resolved.system, "http://loinc.org");
        assert_eq!(resolved.code, "2823-3");

        let err = mark_completed(&done, "2823-3", None).unwrap_err();
        assert!(matches!(err, Error::TaskAlreadyCompleted { .. }));
    }

    #[test]
    fn blocked_result_carries_tasks_and_refs() {
        let errors = vec![
            unmapped("K_SERUM", "ACME-LAB-CODES", MappingType::ObservationCodeLoinc),
            unmapped("NA_SERUM", "ACME-LAB-CODES", MappingType::ObservationCodeLoinc),
            unmapped("K_SERUM", "ACME-LAB-CODES", MappingType::ObservationCodeLoinc),
        ];
        let blocked = build_blocked_result(&sender(), &errors).unwrap();
        assert_eq!(blocked.status, MessageStatus::BlockedOnMapping);
        assert_eq!(blocked.tasks.len(), 2);
        assert_eq!(blocked.unmapped_code_refs.len(), 2);
        for (task, r) in blocked.tasks.iter().zip(&blocked.unmapped_code_refs) {
            assert_eq!(task.id, r.task_reference);
            assert_eq!(task.local_code, r.local_code);
        }
    }
}
