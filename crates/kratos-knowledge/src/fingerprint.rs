//! Incident fingerprinting for similarity matching
//!
//! Two incidents share a fingerprint when they have the same kind, hit the
//! same sort of resource in the same namespace with the same labels, and
//! carry messages that collapse to the same pattern once the variable parts
//! (ids, timestamps, addresses, pod suffixes) are masked out.

use kratos_common::{Incident, IncidentType, KubernetesResource};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use sha2::{Digest, Sha256};

static UUID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}").unwrap()
});
static TIMESTAMP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}[T ]\d{2}:\d{2}:\d{2}").unwrap());
static IP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}").unwrap());
static NUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{3,}").unwrap());
static POD_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"-[a-z0-9]{5,10}(-[a-z0-9]{5})?").unwrap());

/// Unique fingerprint for incident similarity matching
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentFingerprint {
    pub incident_type: IncidentType,
    pub resource_kind: String,
    pub namespace: String,
    /// Hash of the sorted label set
    pub label_hash: String,
    /// Normalized error message pattern
    pub error_pattern: String,
}

impl IncidentFingerprint {
    /// Compute the fingerprint for an incident. Incidents without a resource
    /// fall back to an unknown resource in the default namespace.
    pub fn of(incident: &Incident) -> Self {
        let fallback = KubernetesResource::new("Unknown", "", "default");
        let resource = incident.resource.as_ref().unwrap_or(&fallback);

        let mut label_items: Vec<(&String, &String)> = resource.labels.iter().collect();
        label_items.sort();
        let label_str = label_items
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("|");
        let label_hash = format!("{:x}", md5::compute(label_str.as_bytes()));

        IncidentFingerprint {
            incident_type: incident.kind,
            resource_kind: resource.kind.clone(),
            namespace: resource.namespace.clone(),
            label_hash: label_hash[..8].to_string(),
            error_pattern: normalize_message(&incident.message),
        }
    }

    /// Stable 16-character hex hash of this fingerprint
    pub fn to_hash(&self) -> String {
        let content = format!(
            "{}:{}:{}:{}:{}",
            self.incident_type.as_str(),
            self.resource_kind,
            self.namespace,
            self.label_hash,
            self.error_pattern
        );
        let digest = Sha256::digest(content.as_bytes());
        format!("{digest:x}")[..16].to_string()
    }
}

/// Normalize an error message to a pattern by masking the variable parts.
///
/// Replacement order matters: UUIDs before bare numbers, addresses before
/// numbers, numbers before pod suffixes. The result is lowercased and
/// trimmed, and normalization is idempotent.
pub fn normalize_message(message: &str) -> String {
    let normalized = UUID_RE.replace_all(message, "<UUID>");
    let normalized = TIMESTAMP_RE.replace_all(&normalized, "<TIMESTAMP>");
    let normalized = IP_RE.replace_all(&normalized, "<IP>").into_owned();

    // Mask digit runs of length >= 3 unless they abut an uppercase letter
    // (keeps error codes like E404 intact).
    let masked = NUM_RE.replace_all(&normalized, |caps: &Captures| {
        let m = caps.get(0).unwrap();
        let before_upper = normalized[..m.start()]
            .chars()
            .next_back()
            .map(|c| c.is_ascii_uppercase())
            .unwrap_or(false);
        let after_upper = normalized[m.end()..]
            .chars()
            .next()
            .map(|c| c.is_ascii_uppercase())
            .unwrap_or(false);
        if before_upper || after_upper {
            m.as_str().to_string()
        } else {
            "<NUM>".to_string()
        }
    });

    let masked = POD_SUFFIX_RE.replace_all(&masked, "-<POD_SUFFIX>");

    masked.to_lowercase().trim().to_string()
}
