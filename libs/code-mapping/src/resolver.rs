//! Inline-vs-lookup code resolution.
//!
//! The converter pipeline hands us one coded field at a time. If the field
//! already carries a coding in the governed target system we take it as-is;
//! otherwise the sender's crosswalk table is consulted through the store's
//! `$translate` operation. Unmapped outcomes carry the full local context so
//! a task can be raised without re-parsing the message.

use std::sync::Arc;

use conflux_store::{Coding, FhirStore};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{table_identity, SenderContext, UnmappedCode, UnmappedReason};
use crate::registry::MappingType;

/// One coding as parsed from an HL7v2 coded field (CWE/CE). The coding
/// system tag is whatever the sender put in the third component, if
/// anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceCoding {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl SourceCoding {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            display: None,
            system: None,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    fn tagged_system(&self) -> Option<&str> {
        self.system.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

/// A coded field value: primary coding plus any alternates, in wire order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceValue {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codings: Vec<SourceCoding>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl SourceValue {
    pub fn from_codings(codings: Vec<SourceCoding>) -> Self {
        Self {
            codings,
            text: None,
        }
    }
}

/// Successful resolution: the governed target coding, and the original
/// local coding when one was present, kept for traceability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCode {
    pub target: Coding,
    pub local: Option<Coding>,
}

#[derive(Clone)]
pub struct CodeResolver {
    store: Arc<dyn FhirStore>,
}

impl CodeResolver {
    pub fn new(store: Arc<dyn FhirStore>) -> Self {
        Self { store }
    }

    pub async fn resolve(
        &self,
        value: &SourceValue,
        sender: &SenderContext,
        mapping_type: MappingType,
    ) -> Result<ResolvedCode> {
        let target_system = mapping_type.target_system();

        // Inline fast path: the field already carries a target-system
        // coding, so the crosswalk is never consulted.
        let inline_at = value
            .codings
            .iter()
            .position(|c| c.tagged_system() == Some(target_system) && !c.code.trim().is_empty());
        if let Some(idx) = inline_at {
            let inline = &value.codings[idx];
            let local = value
                .codings
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != idx)
                .find_map(|(_, c)| {
                    let system = c.tagged_system()?;
                    if c.code.trim().is_empty() {
                        return None;
                    }
                    let mut coding = Coding::new(system, c.code.trim());
                    if let Some(d) = &c.display {
                        coding = coding.with_display(d.clone());
                    }
                    Some(coding)
                });
            let mut target = Coding::new(target_system, inline.code.trim());
            if let Some(d) = &inline.display {
                target = target.with_display(d.clone());
            }
            tracing::debug!(
                code = %target.code,
                system = target_system,
                "inline target coding accepted, no lookup"
            );
            return Ok(ResolvedCode { target, local });
        }

        let Some(primary) = value.codings.iter().find(|c| !c.code.trim().is_empty()) else {
            return Err(Error::MissingSourceSystem {
                sender: sender.clone(),
                mapping_type,
                local_code: None,
            });
        };

        // A local code without a coding-system tag is unusable: there is no
        // vocabulary to map it from, so this is not deferrable.
        let Some(local_system) = primary.tagged_system() else {
            return Err(Error::MissingSourceSystem {
                sender: sender.clone(),
                mapping_type,
                local_code: Some(primary.code.clone()),
            });
        };

        let local_code = primary.code.trim();
        let table_id = table_identity(sender, mapping_type);
        let outcome = match self.store.translate(&table_id, local_code, local_system).await {
            Ok(outcome) => outcome,
            Err(conflux_store::Error::NotFound { .. }) => {
                return Err(Error::Unmapped(self.unmapped(
                    UnmappedReason::TableNotFound,
                    sender,
                    mapping_type,
                    primary,
                    local_system,
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let Some(target) = outcome.coding.filter(|_| outcome.matched) else {
            return Err(Error::Unmapped(self.unmapped(
                UnmappedReason::NoMapping,
                sender,
                mapping_type,
                primary,
                local_system,
            )));
        };

        let mut local = Coding::new(local_system, local_code);
        if let Some(d) = &primary.display {
            local = local.with_display(d.clone());
        }
        Ok(ResolvedCode {
            target,
            local: Some(local),
        })
    }

    fn unmapped(
        &self,
        reason: UnmappedReason,
        sender: &SenderContext,
        mapping_type: MappingType,
        primary: &SourceCoding,
        local_system: &str,
    ) -> UnmappedCode {
        UnmappedCode {
            reason,
            sender: sender.clone(),
            mapping_type,
            local_code: primary.code.trim().to_string(),
            local_display: primary.display.clone(),
            local_system: local_system.to_string(),
        }
    }
}
