//! Resolution-value validation against a mapping type's value-set policy.

use crate::error::{Error, Result};
use crate::registry::{MappingType, ValueSetPolicy};

/// Check a proposed resolution code against the type's allowed values.
///
/// Closed types are case-sensitive set membership; the error lists every
/// accepted code so the reviewer can correct without a second round-trip.
/// Open types accept any non-empty trimmed string; whether the code really
/// exists in the remote vocabulary is checked elsewhere.
pub fn validate(mapping_type: MappingType, candidate: &str) -> Result<()> {
    match mapping_type.policy() {
        ValueSetPolicy::Open => {
            if candidate.trim().is_empty() {
                return Err(Error::InvalidResolution {
                    mapping_type,
                    code: candidate.to_string(),
                    reason: "code must not be empty".to_string(),
                });
            }
            Ok(())
        }
        ValueSetPolicy::Closed(allowed) => {
            if allowed.contains(&candidate) {
                Ok(())
            } else {
                Err(Error::InvalidResolution {
                    mapping_type,
                    code: candidate.to_string(),
                    reason: format!("accepted values: {}", allowed.join(", ")),
                })
            }
        }
    }
}
