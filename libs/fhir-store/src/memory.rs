//! In-memory `FhirStore` used by tests and local development.
//!
//! Faithful to the contract the engine relies on: version tokens increase
//! monotonically per resource, preconditions are checked before any write
//! lands, and a transaction applies nothing unless every write passes.

use crate::error::{Error, Result};
use crate::store::{
    Coding, ConditionalWrite, FhirStore, Precondition, SearchPage, SearchQuery, TranslateOutcome,
    Versioned,
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryStore {
    data: Mutex<HashMap<(String, String), Versioned<JsonValue>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every resource of a kind, for test assertions.
    pub fn all_of_kind(&self, kind: &str) -> Vec<JsonValue> {
        let data = self.data.lock().unwrap();
        let mut out: Vec<(String, JsonValue)> = data
            .iter()
            .filter(|((k, _), _)| k == kind)
            .map(|((_, id), v)| (id.clone(), v.value.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out.into_iter().map(|(_, v)| v).collect()
    }

    fn check_precondition(
        data: &HashMap<(String, String), Versioned<JsonValue>>,
        write: &ConditionalWrite,
    ) -> Result<i32> {
        let key = (write.kind.clone(), write.id.clone());
        let current = data.get(&key);
        match (write.precondition, current) {
            (Precondition::IfAbsent, None) => Ok(1),
            (Precondition::IfAbsent, Some(existing)) => Err(Error::PreconditionFailed {
                kind: write.kind.clone(),
                id: write.id.clone(),
                reason: format!("already exists at version {}", existing.version),
            }),
            (Precondition::IfVersion(v), Some(existing)) if existing.version == v => Ok(v + 1),
            (Precondition::IfVersion(v), Some(existing)) => Err(Error::PreconditionFailed {
                kind: write.kind.clone(),
                id: write.id.clone(),
                reason: format!("expected version {}, current is {}", v, existing.version),
            }),
            (Precondition::IfVersion(v), None) => Err(Error::PreconditionFailed {
                kind: write.kind.clone(),
                id: write.id.clone(),
                reason: format!("expected version {}, resource does not exist", v),
            }),
        }
    }
}

#[async_trait]
impl FhirStore for MemoryStore {
    async fn get_with_version(&self, kind: &str, id: &str) -> Result<Option<Versioned<JsonValue>>> {
        let data = self.data.lock().unwrap();
        Ok(data.get(&(kind.to_string(), id.to_string())).cloned())
    }

    async fn conditional_put(&self, write: ConditionalWrite) -> Result<i32> {
        let mut data = self.data.lock().unwrap();
        let next = Self::check_precondition(&data, &write)?;
        data.insert(
            (write.kind, write.id),
            Versioned::new(write.value, next),
        );
        Ok(next)
    }

    async fn commit_transaction(&self, writes: Vec<ConditionalWrite>) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        // Validate the full set before touching anything.
        let mut staged = Vec::with_capacity(writes.len());
        for write in &writes {
            let next = Self::check_precondition(&data, write)?;
            staged.push(next);
        }
        for (write, next) in writes.into_iter().zip(staged) {
            data.insert(
                (write.kind, write.id),
                Versioned::new(write.value, next),
            );
        }
        Ok(())
    }

    async fn search(&self, kind: &str, query: &SearchQuery) -> Result<SearchPage> {
        let data = self.data.lock().unwrap();
        let mut matches: Vec<(String, JsonValue)> = data
            .iter()
            .filter(|((k, _), _)| k == kind)
            .filter(|(_, v)| {
                query.params.iter().all(|(name, expected)| {
                    v.value.get(name).and_then(|f| f.as_str()) == Some(expected.as_str())
                })
            })
            .map(|((_, id), v)| (id.clone(), v.value.clone()))
            .collect();
        matches.sort_by(|a, b| a.0.cmp(&b.0));

        let total = matches.len();
        let resources = matches
            .into_iter()
            .map(|(_, v)| v)
            .skip(query.offset)
            .take(query.count.unwrap_or(usize::MAX))
            .collect();
        Ok(SearchPage { resources, total })
    }

    async fn translate(
        &self,
        table_id: &str,
        code: &str,
        system: &str,
    ) -> Result<TranslateOutcome> {
        let map = {
            let data = self.data.lock().unwrap();
            data.get(&("ConceptMap".to_string(), table_id.to_string()))
                .map(|v| v.value.clone())
        };
        let Some(map) = map else {
            return Err(Error::NotFound {
                kind: "ConceptMap".to_string(),
                id: table_id.to_string(),
            });
        };
        Ok(translate_in_map(&map, code, system))
    }
}

/// Walk a ConceptMap's groups for a source `system`/`code` pair and return
/// the first target coding.
fn translate_in_map(map: &JsonValue, code: &str, system: &str) -> TranslateOutcome {
    let Some(groups) = map.get("group").and_then(|v| v.as_array()) else {
        return TranslateOutcome::miss();
    };

    for group in groups {
        let source = group.get("source").and_then(|v| v.as_str()).unwrap_or("");
        if source != system {
            continue;
        }
        let target = group.get("target").and_then(|v| v.as_str()).unwrap_or("");

        let Some(elements) = group.get("element").and_then(|v| v.as_array()) else {
            continue;
        };
        for element in elements {
            let src_code = element.get("code").and_then(|v| v.as_str()).unwrap_or("");
            if src_code != code {
                continue;
            }
            let Some(targets) = element.get("target").and_then(|v| v.as_array()) else {
                continue;
            };
            for t in targets {
                let t_code = t.get("code").and_then(|v| v.as_str()).unwrap_or("");
                if t_code.is_empty() {
                    continue;
                }
                let mut coding = Coding::new(target, t_code);
                if let Some(display) = t.get("display").and_then(|v| v.as_str()) {
                    coding = coding.with_display(display);
                }
                return TranslateOutcome::hit(coding);
            }
        }
    }

    TranslateOutcome::miss()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn write(id: &str, value: JsonValue, precondition: Precondition) -> ConditionalWrite {
        ConditionalWrite::new("ConceptMap", id, value, precondition)
    }

    #[tokio::test]
    async fn create_then_update_bumps_version() {
        let store = MemoryStore::new();
        let v1 = store
            .conditional_put(write("m1", json!({"a": 1}), Precondition::IfAbsent))
            .await
            .unwrap();
        assert_eq!(v1, 1);

        let v2 = store
            .conditional_put(write("m1", json!({"a": 2}), Precondition::IfVersion(1)))
            .await
            .unwrap();
        assert_eq!(v2, 2);

        let got = store.get_with_version("ConceptMap", "m1").await.unwrap().unwrap();
        assert_eq!(got.version, 2);
        assert_eq!(got.value["a"], 2);
    }

    #[tokio::test]
    async fn stale_version_and_absent_guard_both_fail() {
        let store = MemoryStore::new();
        store
            .conditional_put(write("m1", json!({}), Precondition::IfAbsent))
            .await
            .unwrap();

        let stale = store
            .conditional_put(write("m1", json!({}), Precondition::IfVersion(9)))
            .await
            .unwrap_err();
        assert!(matches!(stale, Error::PreconditionFailed { .. }));

        let clobber = store
            .conditional_put(write("m1", json!({}), Precondition::IfAbsent))
            .await
            .unwrap_err();
        assert!(matches!(clobber, Error::PreconditionFailed { .. }));
    }

    #[tokio::test]
    async fn transaction_applies_nothing_on_any_failed_precondition() {
        let store = MemoryStore::new();
        store
            .conditional_put(write("existing", json!({"v": "old"}), Precondition::IfAbsent))
            .await
            .unwrap();

        let err = store
            .commit_transaction(vec![
                write("fresh", json!({"v": "new"}), Precondition::IfAbsent),
                write("existing", json!({"v": "new"}), Precondition::IfVersion(7)),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PreconditionFailed { .. }));

        assert!(store
            .get_with_version("ConceptMap", "fresh")
            .await
            .unwrap()
            .is_none());
        let existing = store
            .get_with_version("ConceptMap", "existing")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(existing.value["v"], "old");
        assert_eq!(existing.version, 1);
    }

    #[tokio::test]
    async fn transaction_commits_all_writes() {
        let store = MemoryStore::new();
        store
            .commit_transaction(vec![
                write("a", json!({"n": 1}), Precondition::IfAbsent),
                ConditionalWrite::new("Task", "t", json!({"n": 2}), Precondition::IfAbsent),
            ])
            .await
            .unwrap();
        assert!(store.get_with_version("ConceptMap", "a").await.unwrap().is_some());
        assert!(store.get_with_version("Task", "t").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn translate_walks_groups() {
        let store = MemoryStore::new();
        let map = json!({
            "resourceType": "ConceptMap",
            "group": [{
                "source": "ACME-LAB-CODES",
                "target": "http://loinc.org",
                "element": [{
                    "code": "K_SERUM",
                    "target": [{"code": "2823-3", "display": "Potassium", "equivalence": "equivalent"}]
                }]
            }]
        });
        store
            .conditional_put(write("t1", map, Precondition::IfAbsent))
            .await
            .unwrap();

        let hit = store
            .translate("t1", "K_SERUM", "ACME-LAB-CODES")
            .await
            .unwrap();
        assert!(hit.matched);
        let coding = hit.coding.unwrap();
        assert_eq!(coding.system, "http://loinc.org");
        assert_eq!(coding.code, "2823-3");
        assert_eq!(coding.display.as_deref(), Some("Potassium"));

        let miss = store
            .translate("t1", "NA_SERUM", "ACME-LAB-CODES")
            .await
            .unwrap();
        assert!(!miss.matched);
        assert!(miss.coding.is_none());

        let wrong_system = store.translate("t1", "K_SERUM", "OTHER").await.unwrap();
        assert!(!wrong_system.matched);

        let absent = store.translate("nope", "K_SERUM", "ACME-LAB-CODES").await;
        assert!(matches!(absent, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn search_filters_by_kind_and_params() {
        let store = MemoryStore::new();
        store
            .conditional_put(write("m1", json!({"status": "active"}), Precondition::IfAbsent))
            .await
            .unwrap();
        store
            .conditional_put(write("m2", json!({"status": "draft"}), Precondition::IfAbsent))
            .await
            .unwrap();
        store
            .conditional_put(ConditionalWrite::new(
                "Task",
                "t1",
                json!({"status": "active"}),
                Precondition::IfAbsent,
            ))
            .await
            .unwrap();

        let all = store
            .search("ConceptMap", &SearchQuery::default())
            .await
            .unwrap();
        assert_eq!(all.total, 2);

        let active = store
            .search(
                "ConceptMap",
                &SearchQuery {
                    params: vec![("status".to_string(), "active".to_string())],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(active.total, 1);
    }
}
