//! Persisted resource models: crosswalk tables, mapping tasks, and the
//! identifiers that tie them together.
//!
//! Tables are FHIR-ConceptMap-shaped, tasks are FHIR-Task-shaped; both are
//! stored as plain JSON resources and round-trip through serde. Unknown
//! fields written by other services survive in `extensions`.

use chrono::{DateTime, Utc};
use conflux_store::Coding;
use heck::ToKebabCase;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::registry::MappingType;

pub const KIND_CONCEPT_MAP: &str = "ConceptMap";
pub const KIND_TASK: &str = "Task";

/// Every crosswalk entry is an exact-match translation.
pub const EQUIVALENCE_EQUIVALENT: &str = "equivalent";

/// Sending application/facility pair from MSH-3/MSH-4. Scopes which
/// crosswalk applies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderContext {
    pub sending_application: String,
    pub sending_facility: String,
}

impl SenderContext {
    pub fn new(application: impl Into<String>, facility: impl Into<String>) -> Self {
        Self {
            sending_application: application.into(),
            sending_facility: facility.into(),
        }
    }

    /// URL-safe identifier stem: `hl7v2-<app>-<facility>`, kebab-cased.
    pub fn slug(&self) -> String {
        format!(
            "hl7v2-{}-{}",
            self.sending_application.to_kebab_case(),
            self.sending_facility.to_kebab_case()
        )
    }

    /// Synthetic coding-system URI for codes local to this sender.
    pub fn source_uri(&self) -> String {
        format!("urn:hl7v2:{}", self.slug())
    }
}

impl std::fmt::Display for SenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.sending_application, self.sending_facility)
    }
}

/// Deterministic crosswalk table id for a sender and mapping type.
pub fn table_identity(sender: &SenderContext, mapping_type: MappingType) -> String {
    format!("{}-{}", sender.slug(), mapping_type.id_suffix())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MapStatus {
    Draft,
    Active,
}

/// One local-to-target crosswalk table for a sender + mapping type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMap {
    #[serde(default = "default_concept_map_type")]
    pub resource_type: String,

    pub id: String,

    pub status: MapStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Synthetic URI for the sender's local vocabulary.
    pub source_uri: String,

    /// Primary governed target system for this table.
    pub target_uri: String,

    /// Groups keyed by `(source, target)` coding system. A table can carry
    /// more than one target system for the same local vocabulary.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group: Vec<ConceptMapGroup>,

    /// Additional content written by other services.
    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

fn default_concept_map_type() -> String {
    KIND_CONCEPT_MAP.to_string()
}

impl ConceptMap {
    /// Empty table for a sender + type, as created lazily on first use.
    pub fn empty(sender: &SenderContext, mapping_type: MappingType) -> Self {
        Self {
            resource_type: default_concept_map_type(),
            id: table_identity(sender, mapping_type),
            status: MapStatus::Active,
            title: Some(format!("{} · {}", mapping_type.display_title(), sender)),
            source_uri: sender.source_uri(),
            target_uri: mapping_type.target_system().to_string(),
            group: Vec::new(),
            extensions: HashMap::new(),
        }
    }

    pub fn find_group(&self, key: &GroupKey) -> Option<&ConceptMapGroup> {
        self.group
            .iter()
            .find(|g| g.source == key.source && g.target == key.target)
    }

    /// Total number of mapping entries across all groups.
    pub fn entry_count(&self) -> usize {
        self.group.iter().map(|g| g.element.len()).sum()
    }
}

/// Composite group key: which local vocabulary maps into which target
/// system.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub source: String,
    pub target: String,
}

impl GroupKey {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConceptMapGroup {
    /// Local coding system the elements translate from.
    pub source: String,
    /// Target coding system the elements translate into.
    pub target: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub element: Vec<MapElement>,
}

impl ConceptMapGroup {
    pub fn key(&self) -> GroupKey {
        GroupKey::new(self.source.clone(), self.target.clone())
    }
}

/// One local code and its single equivalent target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapElement {
    /// Local code, unique within its group.
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    /// Exactly one target; kept as a list for wire compatibility.
    pub target: Vec<ElementTarget>,
}

impl MapElement {
    pub fn new(
        local_code: impl Into<String>,
        local_display: Option<String>,
        target_code: impl Into<String>,
        target_display: Option<String>,
    ) -> Self {
        Self {
            code: local_code.into(),
            display: local_display,
            target: vec![ElementTarget {
                code: target_code.into(),
                display: target_display,
                equivalence: EQUIVALENCE_EQUIVALENT.to_string(),
            }],
        }
    }

    pub fn primary_target(&self) -> Option<&ElementTarget> {
        self.target.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementTarget {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    pub equivalence: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Requested,
    Completed,
}

/// Durable record of one unresolved local code awaiting human resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingTask {
    #[serde(default = "default_task_type")]
    pub resource_type: String,

    pub id: String,

    pub status: TaskStatus,

    /// Task classification code; see `MappingType::task_code`.
    pub code: String,

    pub sending_application: String,
    pub sending_facility: String,

    pub local_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_display: Option<String>,
    pub local_system: String,

    /// Present once the task is completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<Coding>,

    pub authored_on: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,

    #[serde(flatten)]
    pub extensions: HashMap<String, Value>,
}

fn default_task_type() -> String {
    KIND_TASK.to_string()
}

impl MappingTask {
    pub fn sender(&self) -> SenderContext {
        SenderContext::new(&self.sending_application, &self.sending_facility)
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }
}

/// Pointer from a blocked message to the task holding it up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmappedCodeRef {
    pub local_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_display: Option<String>,
    pub local_system: String,
    pub task_reference: String,
}

/// Why a code failed to resolve. Both branches defer to a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmappedReason {
    /// No crosswalk table exists yet for the sender + type.
    TableNotFound,
    /// The table exists but holds no entry for the code.
    NoMapping,
}

/// Everything needed to build a task for an unresolved code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnmappedCode {
    pub reason: UnmappedReason,
    pub sender: SenderContext,
    pub mapping_type: MappingType,
    pub local_code: String,
    pub local_display: Option<String>,
    pub local_system: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_is_url_safe_and_deterministic() {
        let sender = SenderContext::new("ACME_LAB", "ACME_HOSP");
        assert_eq!(sender.slug(), "hl7v2-acme-lab-acme-hosp");
        assert_eq!(sender.source_uri(), "urn:hl7v2:hl7v2-acme-lab-acme-hosp");
        assert_eq!(
            table_identity(&sender, MappingType::ObservationCodeLoinc),
            "hl7v2-acme-lab-acme-hosp-observation-code-loinc"
        );
    }

    #[test]
    fn concept_map_round_trips_through_json() {
        let sender = SenderContext::new("ACME_LAB", "ACME_HOSP");
        let mut map = ConceptMap::empty(&sender, MappingType::ObservationCodeLoinc);
        map.group.push(ConceptMapGroup {
            source: "ACME-LAB-CODES".into(),
            target: "http://loinc.org".into(),
            element: vec![MapElement::new(
                "K_SERUM",
                Some("Serum potassium".into()),
                "2823-3",
                Some("Potassium".into()),
            )],
        });

        let json = serde_json::to_value(&map).unwrap();
        assert_eq!(json["resourceType"], "ConceptMap");
        assert_eq!(json["group"][0]["element"][0]["code"], "K_SERUM");
        assert_eq!(
            json["group"][0]["element"][0]["target"][0]["equivalence"],
            "equivalent"
        );

        let back: ConceptMap = serde_json::from_value(json).unwrap();
        assert_eq!(back, map);
    }

    #[test]
    fn empty_groups_are_not_serialized() {
        let sender = SenderContext::new("A", "B");
        let map = ConceptMap::empty(&sender, MappingType::PatientClass);
        let json = serde_json::to_value(&map).unwrap();
        assert!(json.get("group").is_none());
    }

    #[test]
    fn task_serializes_camel_case() {
        let task = MappingTask {
            resource_type: KIND_TASK.into(),
            id: "map-x-1-2".into(),
            status: TaskStatus::Requested,
            code: "unmapped-observation-code".into(),
            sending_application: "ACME_LAB".into(),
            sending_facility: "ACME_HOSP".into(),
            local_code: "K_SERUM".into(),
            local_display: None,
            local_system: "ACME-LAB-CODES".into(),
            resolved: None,
            authored_on: Utc::now(),
            last_modified: Utc::now(),
            extensions: HashMap::new(),
        };
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["status"], "requested");
        assert_eq!(json["sendingApplication"], "ACME_LAB");
        assert_eq!(json["localCode"], "K_SERUM");
        assert!(json.get("resolved").is_none());
        assert!(json.get("localDisplay").is_none());
    }
}
