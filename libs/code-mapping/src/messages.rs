//! Message-pipeline collaborator.
//!
//! The pipeline owns message records; this engine only reads the unmapped
//! code refs of messages blocked on a task and flips them to `ready` once
//! every ref is resolved.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::Result;
use crate::model::UnmappedCodeRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageStatus {
    BlockedOnMapping,
    Ready,
}

/// The slice of a message record this engine touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: String,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmapped_code_refs: Vec<UnmappedCodeRef>,
    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Every message holding an unmapped-code ref to `task_id`.
    async fn find_blocked_on(&self, task_id: &str) -> Result<Vec<MessageRecord>>;

    async fn put(&self, record: MessageRecord) -> Result<()>;
}
