//! Evidence validation and idempotent registration.

use chrono::Utc;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::{Arc, OnceLock};

use super::{Evidence, EvidenceDescriptor, EvidenceId, EvidenceKind};
use crate::error::{OrchestratorError, Result};
use crate::store::OrchestratorStore;

fn checksum_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(?:(md5|sha1|sha256):)?([0-9a-fA-F]+)$").expect("checksum regex is valid")
    })
}

/// Validate a checksum and return its normalised (lowercase) form.
///
/// Accepted: 32, 40 or 64 hex digits, optionally prefixed with the matching
/// algorithm name.
pub fn normalize_checksum(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let caps = checksum_pattern().captures(raw).ok_or_else(|| {
        OrchestratorError::Validation(format!("malformed checksum '{}'", raw))
    })?;
    let digest = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    let expected_len = match caps.get(1).map(|m| m.as_str()) {
        Some("md5") => Some(32),
        Some("sha1") => Some(40),
        Some("sha256") => Some(64),
        _ => None,
    };
    let valid = match expected_len {
        Some(len) => digest.len() == len,
        None => matches!(digest.len(), 32 | 40 | 64),
    };
    if !valid {
        return Err(OrchestratorError::Validation(format!(
            "malformed checksum '{}': unexpected digest length {}",
            raw,
            digest.len()
        )));
    }
    Ok(raw.to_ascii_lowercase())
}

/// Derive the content address of a validated descriptor.
fn content_id(kind: EvidenceKind, locator: &str, checksum: Option<&str>) -> EvidenceId {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(locator.as_bytes());
    hasher.update([0u8]);
    hasher.update(checksum.unwrap_or_default().as_bytes());
    let digest = hex::encode(hasher.finalize());
    EvidenceId::from(digest[..32].to_string())
}

/// Validates and records evidence descriptors.
#[derive(Clone)]
pub struct EvidenceRegistry {
    store: Arc<dyn OrchestratorStore>,
}

impl EvidenceRegistry {
    pub fn new(store: Arc<dyn OrchestratorStore>) -> Self {
        Self { store }
    }

    /// Check a descriptor without recording it.
    pub fn validate(&self, descriptor: &EvidenceDescriptor) -> Result<Evidence> {
        let kind: EvidenceKind = descriptor
            .kind
            .parse()
            .map_err(OrchestratorError::Validation)?;

        let locator = descriptor.source_locator.trim();
        if locator.is_empty() {
            return Err(OrchestratorError::Validation(
                "source_locator must not be empty".to_string(),
            ));
        }

        let checksum = match descriptor.checksum.as_deref() {
            Some(raw) if !raw.trim().is_empty() => Some(normalize_checksum(raw)?),
            _ => None,
        };

        for attribute in kind.required_attributes() {
            let present = descriptor
                .attributes
                .get(*attribute)
                .is_some_and(|v| !v.trim().is_empty());
            if !present {
                return Err(OrchestratorError::Validation(format!(
                    "evidence kind {} requires attribute '{}'",
                    kind, attribute
                )));
            }
        }

        Ok(Evidence {
            id: content_id(kind, locator, checksum.as_deref()),
            kind,
            source_locator: locator.to_string(),
            checksum,
            name: descriptor.name.clone().filter(|n| !n.trim().is_empty()),
            attributes: descriptor.attributes.clone(),
            created_at: Utc::now(),
        })
    }

    /// Validate and persist a descriptor, returning the stored record.
    ///
    /// Registering an identical descriptor again returns the existing record.
    pub async fn register(&self, descriptor: &EvidenceDescriptor) -> Result<Evidence> {
        let candidate = self.validate(descriptor)?;
        let stored = self
            .store
            .insert_evidence(&candidate)
            .await
            .map_err(OrchestratorError::Store)?;
        if stored.created_at == candidate.created_at {
            tracing::info!(
                evidence_id = %stored.id,
                kind = %stored.kind,
                "Registered evidence {}",
                stored.display_name()
            );
        } else {
            tracing::debug!(evidence_id = %stored.id, "Evidence already registered");
        }
        Ok(stored)
    }

    pub async fn lookup(&self, id: &EvidenceId) -> Result<Evidence> {
        self.store
            .get_evidence(id)
            .await
            .map_err(OrchestratorError::Store)?
            .ok_or_else(|| OrchestratorError::not_found("Evidence", id))
    }

    pub fn list_kinds(&self) -> Vec<EvidenceKind> {
        EvidenceKind::ALL.to_vec()
    }
}
