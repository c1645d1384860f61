//! Crosswalk table CRUD and lookup.
//!
//! The transforms in this module are pure value-to-value functions; only
//! [`ConceptMapStore`] talks to the backing store, and every write it makes
//! is conditional on the version the caller read. A lost race surfaces as
//! [`Error::ConcurrentModification`], never a silent overwrite.

use std::sync::Arc;

use conflux_store::{ConditionalWrite, FhirStore, Precondition, SearchQuery, Versioned};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    table_identity, ConceptMap, ConceptMapGroup, GroupKey, MapElement, SenderContext,
    KIND_CONCEPT_MAP,
};
use crate::registry::{known_target_systems, MappingType};
use crate::validator;

/// Fixed page size for entry listings.
pub const ENTRY_PAGE_SIZE: usize = 20;

/// Addresses one entry: the local vocabulary plus the code within it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryKey {
    pub local_system: String,
    pub local_code: String,
}

impl EntryKey {
    pub fn new(local_system: impl Into<String>, local_code: impl Into<String>) -> Self {
        Self {
            local_system: local_system.into(),
            local_code: local_code.into(),
        }
    }
}

/// Replace-or-append `element` in the `(source, target)` group, creating the
/// group if needed. Returns the updated table; persistence is the caller's
/// concern.
pub fn upsert_element(mut map: ConceptMap, key: &GroupKey, element: MapElement) -> ConceptMap {
    if let Some(group) = map
        .group
        .iter_mut()
        .find(|g| g.source == key.source && g.target == key.target)
    {
        if let Some(existing) = group.element.iter_mut().find(|e| e.code == element.code) {
            *existing = element;
        } else {
            group.element.push(element);
        }
    } else {
        map.group.push(ConceptMapGroup {
            source: key.source.clone(),
            target: key.target.clone(),
            element: vec![element],
        });
    }
    map
}

/// Remove the entry addressed by `key` from every group with a matching
/// source system. Emptied groups are pruned; returns whether anything was
/// removed.
pub fn remove_element(map: ConceptMap, key: &EntryKey) -> (ConceptMap, bool) {
    let mut removed = false;
    let mut map = map;
    for group in &mut map.group {
        if group.source != key.local_system {
            continue;
        }
        let before = group.element.len();
        group.element.retain(|e| e.code != key.local_code);
        removed |= group.element.len() != before;
    }
    map.group.retain(|g| !g.element.is_empty());
    (map, removed)
}

/// Relocate an entry whose target system changed: remove it from `old`,
/// insert it into `new`, prune the emptied group. The element itself is
/// preserved as-is apart from the group it lives in.
pub fn move_element(
    mut map: ConceptMap,
    key: &EntryKey,
    old: &GroupKey,
    new: &GroupKey,
) -> ConceptMap {
    let mut moved: Option<MapElement> = None;
    for group in &mut map.group {
        if group.source == old.source && group.target == old.target {
            if let Some(pos) = group.element.iter().position(|e| e.code == key.local_code) {
                moved = Some(group.element.remove(pos));
            }
        }
    }
    map.group.retain(|g| !g.element.is_empty());
    match moved {
        Some(element) => upsert_element(map, new, element),
        None => map,
    }
}

/// Inputs for a manual entry addition.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub local_code: String,
    pub local_display: Option<String>,
    pub local_system: String,
    pub target_code: String,
    pub target_display: Option<String>,
    /// Defaults to the table's primary target system.
    pub target_system: Option<String>,
}

/// Inputs for a manual entry edit. The local display of the existing entry
/// is preserved.
#[derive(Debug, Clone)]
pub struct EntryUpdate {
    pub local_code: String,
    pub local_system: String,
    pub target_code: String,
    pub target_display: Option<String>,
    /// A differing target system moves the entry to another group.
    pub target_system: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingTableSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub source_uri: String,
    pub target_uri: String,
    pub mapping_type: String,
    pub entry_count: usize,
}

/// One flattened crosswalk entry, as shown to the admin surface.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingEntry {
    pub local_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_display: Option<String>,
    pub local_system: String,
    pub target_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_display: Option<String>,
    pub target_system: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryPage {
    pub entries: Vec<MappingEntry>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

/// CRUD and lookup over per-sender crosswalk tables.
#[derive(Clone)]
pub struct ConceptMapStore {
    store: Arc<dyn FhirStore>,
}

impl ConceptMapStore {
    pub fn new(store: Arc<dyn FhirStore>) -> Self {
        Self { store }
    }

    pub async fn get_by_identity(&self, id: &str) -> Result<Option<Versioned<ConceptMap>>> {
        let Some(raw) = self.store.get_with_version(KIND_CONCEPT_MAP, id).await? else {
            return Ok(None);
        };
        let map: ConceptMap = serde_json::from_value(raw.value)
            .map_err(|e| Error::Store(conflux_store::Error::Json(e)))?;
        Ok(Some(Versioned::new(map, raw.version)))
    }

    /// Idempotent create-if-absent. Losing a concurrent first create is not
    /// an error: the winner's table is re-read and returned.
    pub async fn create(
        &self,
        sender: &SenderContext,
        mapping_type: MappingType,
    ) -> Result<Versioned<ConceptMap>> {
        let id = table_identity(sender, mapping_type);
        if let Some(existing) = self.get_by_identity(&id).await? {
            return Ok(existing);
        }

        let map = ConceptMap::empty(sender, mapping_type);
        let write = ConditionalWrite::new(
            KIND_CONCEPT_MAP,
            &id,
            serde_json::to_value(&map).map_err(conflux_store::Error::Json)?,
            Precondition::IfAbsent,
        );
        match self.store.conditional_put(write).await {
            Ok(version) => Ok(Versioned::new(map, version)),
            Err(conflux_store::Error::PreconditionFailed { .. }) => self
                .get_by_identity(&id)
                .await?
                .ok_or_else(|| Error::NotFound {
                    kind: KIND_CONCEPT_MAP.to_string(),
                    id,
                }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn add_entry(&self, table_id: &str, entry: NewEntry) -> Result<Versioned<ConceptMap>> {
        let current = self.require(table_id).await?;
        let key = EntryKey::new(&entry.local_system, &entry.local_code);
        if find_entry(&current.value, &key).is_some() {
            return Err(Error::DuplicateEntry {
                table_id: table_id.to_string(),
                local_code: entry.local_code,
                local_system: entry.local_system,
            });
        }

        let target_system = entry
            .target_system
            .unwrap_or_else(|| current.value.target_uri.clone());
        self.validate_target(&target_system, &entry.target_code)?;

        let group = GroupKey::new(&entry.local_system, target_system);
        let element = MapElement::new(
            entry.local_code,
            entry.local_display,
            entry.target_code,
            entry.target_display,
        );
        let updated = upsert_element(current.value, &group, element);
        self.put(table_id, &updated, current.version).await
    }

    pub async fn update_entry(
        &self,
        table_id: &str,
        update: EntryUpdate,
    ) -> Result<Versioned<ConceptMap>> {
        let current = self.require(table_id).await?;
        let key = EntryKey::new(&update.local_system, &update.local_code);
        let Some((old_group, existing)) = find_entry(&current.value, &key) else {
            return Err(Error::NotFound {
                kind: "MappingEntry".to_string(),
                id: format!("{}/{}|{}", table_id, key.local_system, key.local_code),
            });
        };

        let target_system = update
            .target_system
            .clone()
            .unwrap_or_else(|| old_group.target.clone());
        self.validate_target(&target_system, &update.target_code)?;

        let new_group = GroupKey::new(&update.local_system, &target_system);
        let element = MapElement::new(
            update.local_code,
            existing.display.clone(),
            update.target_code,
            update.target_display,
        );

        let map = if new_group == old_group {
            current.value
        } else {
            // Changing the target system relocates the entry between groups.
            move_element(current.value, &key, &old_group, &new_group)
        };
        let updated = upsert_element(map, &new_group, element);
        self.put(table_id, &updated, current.version).await
    }

    pub async fn delete_entry(&self, table_id: &str, key: &EntryKey) -> Result<()> {
        let current = self.require(table_id).await?;
        let (updated, removed) = remove_element(current.value, key);
        if !removed {
            return Err(Error::NotFound {
                kind: "MappingEntry".to_string(),
                id: format!("{}/{}|{}", table_id, key.local_system, key.local_code),
            });
        }
        self.put(table_id, &updated, current.version).await?;
        Ok(())
    }

    /// Summaries of every table whose target system this engine owns.
    pub async fn list(
        &self,
        type_filter: Option<MappingType>,
    ) -> Result<Vec<MappingTableSummary>> {
        let page = self
            .store
            .search(KIND_CONCEPT_MAP, &SearchQuery::default())
            .await?;

        let owned = known_target_systems();
        let mut out = Vec::new();
        for raw in page.resources {
            // Tables written by other services may not conform; skip them.
            let Ok(map) = serde_json::from_value::<ConceptMap>(raw) else {
                continue;
            };
            if !owned.contains(&map.target_uri.as_str()) {
                continue;
            }
            let Some(mapping_type) = MappingType::from_target_system(&map.target_uri) else {
                continue;
            };
            if let Some(filter) = type_filter {
                if mapping_type != filter {
                    continue;
                }
            }
            out.push(MappingTableSummary {
                id: map.id.clone(),
                title: map.title.clone(),
                source_uri: map.source_uri.clone(),
                target_uri: map.target_uri.clone(),
                mapping_type: mapping_type.name().to_string(),
                entry_count: map.entry_count(),
            });
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    /// Fixed-size page of flattened entries, optionally substring-filtered
    /// over local/target code and display (case-insensitive).
    pub async fn find_entries(
        &self,
        table_id: &str,
        page: usize,
        search_text: Option<&str>,
    ) -> Result<EntryPage> {
        let current = self.require(table_id).await?;

        let needle = search_text
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_lowercase);

        let mut entries: Vec<MappingEntry> = Vec::new();
        for group in &current.value.group {
            for element in &group.element {
                let Some(target) = element.primary_target() else {
                    continue;
                };
                entries.push(MappingEntry {
                    local_code: element.code.clone(),
                    local_display: element.display.clone(),
                    local_system: group.source.clone(),
                    target_code: target.code.clone(),
                    target_display: target.display.clone(),
                    target_system: group.target.clone(),
                });
            }
        }

        if let Some(needle) = &needle {
            entries.retain(|e| {
                let haystacks = [
                    Some(e.local_code.as_str()),
                    e.local_display.as_deref(),
                    Some(e.target_code.as_str()),
                    e.target_display.as_deref(),
                ];
                haystacks
                    .into_iter()
                    .flatten()
                    .any(|h| h.to_lowercase().contains(needle))
            });
        }

        let total = entries.len();
        let entries = entries
            .into_iter()
            .skip(page * ENTRY_PAGE_SIZE)
            .take(ENTRY_PAGE_SIZE)
            .collect();
        Ok(EntryPage {
            entries,
            total,
            page,
            page_size: ENTRY_PAGE_SIZE,
        })
    }

    async fn require(&self, table_id: &str) -> Result<Versioned<ConceptMap>> {
        self.get_by_identity(table_id)
            .await?
            .ok_or_else(|| Error::NotFound {
                kind: KIND_CONCEPT_MAP.to_string(),
                id: table_id.to_string(),
            })
    }

    fn validate_target(&self, target_system: &str, code: &str) -> Result<()> {
        match MappingType::from_target_system(target_system) {
            Some(mapping_type) => validator::validate(mapping_type, code),
            None => Err(Error::UnknownMappingType(target_system.to_string())),
        }
    }

    async fn put(
        &self,
        table_id: &str,
        map: &ConceptMap,
        read_version: i32,
    ) -> Result<Versioned<ConceptMap>> {
        let write = ConditionalWrite::new(
            KIND_CONCEPT_MAP,
            table_id,
            serde_json::to_value(map).map_err(conflux_store::Error::Json)?,
            Precondition::IfVersion(read_version),
        );
        let version = self
            .store
            .conditional_put(write)
            .await
            .map_err(|e| Error::from_store_for(KIND_CONCEPT_MAP, table_id, e))?;
        Ok(Versioned::new(map.clone(), version))
    }
}

/// Locate an entry by source system + code; returns its group key and the
/// element.
fn find_entry<'a>(map: &'a ConceptMap, key: &EntryKey) -> Option<(GroupKey, &'a MapElement)> {
    for group in &map.group {
        if group.source != key.local_system {
            continue;
        }
        if let Some(element) = group.element.iter().find(|e| e.code == key.local_code) {
            return Some((group.key(), element));
        }
    }
    None
}
