//! Atomic task resolution.
//!
//! Completing a task and recording its mapping are one transactional unit;
//! unblocking the messages that waited on the task is deliberately not.
//! Once the transaction lands, the task and the crosswalk agree durably;
//! the unblock pass can fail, be skipped, or run twice without breaking
//! anything, so its failures are logged and swallowed.

use std::sync::Arc;

use conflux_store::{ConditionalWrite, FhirStore, Precondition, Versioned};

use crate::error::{Error, Result};
use crate::messages::{MessageStatus, MessageStore};
use crate::model::{
    table_identity, ConceptMap, GroupKey, MapElement, MappingTask, KIND_CONCEPT_MAP, KIND_TASK,
};
use crate::{concept_map, tasks, validator};

#[derive(Clone)]
pub struct ResolutionCoordinator {
    store: Arc<dyn FhirStore>,
    messages: Arc<dyn MessageStore>,
}

impl ResolutionCoordinator {
    pub fn new(store: Arc<dyn FhirStore>, messages: Arc<dyn MessageStore>) -> Self {
        Self { store, messages }
    }

    /// Apply a human resolution: complete the task and upsert the mapping
    /// into the sender's crosswalk as one all-or-nothing write, then
    /// best-effort unblock dependent messages.
    ///
    /// `ConcurrentModification` means a racing write got there first.
    /// Call again so every step runs against fresh reads.
    pub async fn resolve_and_apply(
        &self,
        task_id: &str,
        resolved_code: &str,
        resolved_display: Option<&str>,
    ) -> Result<MappingTask> {
        // Step 1: load the task at its current version.
        let task = self.load_task(task_id).await?;
        if task.value.is_completed() {
            return Err(Error::TaskAlreadyCompleted {
                id: task_id.to_string(),
            });
        }

        // Step 2: everything else derives from the task itself.
        let mapping_type = tasks::mapping_type_of(&task.value)?;
        let sender = task.value.sender();

        // Step 3: nothing is mutated on an invalid value.
        validator::validate(mapping_type, resolved_code)?;

        // Step 4: load or virtually create the crosswalk table.
        let table_id = table_identity(&sender, mapping_type);
        let existing = self.load_table(&table_id).await?;
        let (table, table_precondition) = match existing {
            Some(versioned) => {
                let precondition = Precondition::IfVersion(versioned.version);
                (versioned.value, precondition)
            }
            None => (ConceptMap::empty(&sender, mapping_type), Precondition::IfAbsent),
        };

        // Step 5: pure upsert of the new mapping.
        let group = GroupKey::new(&task.value.local_system, mapping_type.target_system());
        let element = MapElement::new(
            task.value.local_code.clone(),
            task.value.local_display.clone(),
            resolved_code,
            resolved_display.map(str::to_string),
        );
        let updated_table = concept_map::upsert_element(table, &group, element);

        // Step 6: one transaction. Either precondition failing aborts both
        // writes.
        let completed = tasks::mark_completed(&task.value, resolved_code, resolved_display)?;
        let writes = vec![
            ConditionalWrite::new(
                KIND_TASK,
                task_id,
                serde_json::to_value(&completed).map_err(conflux_store::Error::Json)?,
                Precondition::IfVersion(task.version),
            ),
            ConditionalWrite::new(
                KIND_CONCEPT_MAP,
                &table_id,
                serde_json::to_value(&updated_table).map_err(conflux_store::Error::Json)?,
                table_precondition,
            ),
        ];
        self.store
            .commit_transaction(writes)
            .await
            .map_err(|e| Self::commit_error(task_id, e))?;

        tracing::debug!(
            task_id,
            table_id = %table_id,
            code = resolved_code,
            "task resolved and crosswalk updated"
        );

        // Step 7: decoupled by design; the core invariant is already
        // durable.
        if let Err(e) = self.unblock(task_id).await {
            tracing::warn!(task_id, error = %e, "failed to unblock dependent messages");
        }

        Ok(completed)
    }

    async fn load_task(&self, task_id: &str) -> Result<Versioned<MappingTask>> {
        let Some(raw) = self.store.get_with_version(KIND_TASK, task_id).await? else {
            return Err(Error::NotFound {
                kind: KIND_TASK.to_string(),
                id: task_id.to_string(),
            });
        };
        let task: MappingTask = serde_json::from_value(raw.value)
            .map_err(|e| Error::Store(conflux_store::Error::Json(e)))?;
        Ok(Versioned::new(task, raw.version))
    }

    async fn load_table(&self, table_id: &str) -> Result<Option<Versioned<ConceptMap>>> {
        let Some(raw) = self
            .store
            .get_with_version(KIND_CONCEPT_MAP, table_id)
            .await?
        else {
            return Ok(None);
        };
        let map: ConceptMap = serde_json::from_value(raw.value)
            .map_err(|e| Error::Store(conflux_store::Error::Json(e)))?;
        Ok(Some(Versioned::new(map, raw.version)))
    }

    fn commit_error(task_id: &str, e: conflux_store::Error) -> Error {
        match e {
            conflux_store::Error::PreconditionFailed { kind, id, .. } => {
                Error::ConcurrentModification { kind, id }
            }
            conflux_store::Error::TransactionAborted(_) => Error::ConcurrentModification {
                kind: KIND_TASK.to_string(),
                id: task_id.to_string(),
            },
            other => Error::Store(other),
        }
    }

    /// Drop this task's refs from every blocked message; a message with no
    /// refs left becomes retry-eligible. Idempotent.
    async fn unblock(&self, task_id: &str) -> Result<()> {
        let blocked = self.messages.find_blocked_on(task_id).await?;
        for mut message in blocked {
            let before = message.unmapped_code_refs.len();
            message
                .unmapped_code_refs
                .retain(|r| r.task_reference != task_id);
            if message.unmapped_code_refs.len() == before {
                continue;
            }
            if message.unmapped_code_refs.is_empty() {
                message.status = MessageStatus::Ready;
            }
            let message_id = message.id.clone();
            if let Err(e) = self.messages.put(message).await {
                tracing::warn!(
                    task_id,
                    message_id = %message_id,
                    error = %e,
                    "failed to update blocked message"
                );
            }
        }
        Ok(())
    }
}
