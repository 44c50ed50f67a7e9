//! Central knowledge store
//!
//! Owns the incident corpus, the similarity indexes, induced patterns and
//! per-(kind, action) outcome statistics. Every incident recorded here feeds
//! pattern induction; every remediation outcome updates the empirical
//! success rates future recommendations are ranked by.

use crate::fingerprint::IncidentFingerprint;
use crate::persistence::Persistence;
use chrono::{Duration, Utc};
use kratos_common::{
    ComponentHealth, Incident, IncidentSeverity, IncidentType, KnowledgeConfig, Pattern,
    Remediation, RemediationAction, RemediationOutcome,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{error, info, warn};

/// Exponential moving average rate for pattern success updates
const PATTERN_EMA_ALPHA: f64 = 0.1;
/// Occurrences at which pattern confidence saturates
const PATTERN_CONFIDENCE_SATURATION: f64 = 10.0;

/// Knowledge base statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct KnowledgeStats {
    pub total_incidents: usize,
    pub total_patterns: usize,
    pub total_remediations: usize,
    pub incidents_by_type: HashMap<String, usize>,
    pub top_patterns: Vec<PatternSummary>,
    /// True when the storage directory was unwritable at startup
    pub memory_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternSummary {
    pub name: String,
    pub occurrences: usize,
    pub success_rate: f64,
}

struct State {
    incidents: HashMap<String, Incident>,
    patterns: HashMap<String, Pattern>,
    remediations: HashMap<String, Remediation>,
    by_type: HashMap<IncidentType, Vec<String>>,
    by_resource: HashMap<String, Vec<String>>,
    by_fingerprint: HashMap<String, Vec<String>>,
    outcome_stats: HashMap<(IncidentType, RemediationAction), Vec<bool>>,
    memory_only: bool,
}

impl State {
    fn index_incident(&mut self, incident: Incident) {
        let id = incident.id.clone();

        self.by_type.entry(incident.kind).or_default().push(id.clone());

        if let Some(resource) = &incident.resource {
            self.by_resource
                .entry(resource.resource_key())
                .or_default()
                .push(id.clone());
        }

        let hash = IncidentFingerprint::of(&incident).to_hash();
        self.by_fingerprint.entry(hash).or_default().push(id.clone());

        self.incidents.insert(id, incident);
    }

    /// Induce or refresh a pattern once a fingerprint bucket is large enough.
    /// Returns true when the pattern set changed.
    fn detect_patterns(&mut self, incident: &Incident, min_occurrences: usize) -> bool {
        let hash = IncidentFingerprint::of(incident).to_hash();
        let bucket = match self.by_fingerprint.get(&hash) {
            Some(bucket) if bucket.len() >= min_occurrences => bucket.clone(),
            _ => return false,
        };

        let pattern_name = format!("{}_{}", incident.kind.as_str(), hash);
        let occurrences = bucket.len();

        if let Some(existing) = self.patterns.values_mut().find(|p| p.name == pattern_name) {
            existing.occurrence_count = occurrences;
            existing.last_seen = Some(Utc::now());
            existing.confidence =
                (occurrences as f64 / PATTERN_CONFIDENCE_SATURATION).min(1.0);
            return true;
        }

        let members: Vec<&Incident> = bucket
            .iter()
            .filter_map(|id| self.incidents.get(id))
            .collect();
        let pattern = Pattern {
            id: uuid::Uuid::new_v4().to_string(),
            name: pattern_name.clone(),
            description: format!("Auto-detected pattern for {} incidents", incident.kind),
            incident_types: vec![incident.kind],
            indicators: extract_indicators(&members),
            recommended_actions: default_actions_for(incident.kind),
            success_rate: 0.5,
            occurrence_count: occurrences,
            last_seen: Some(Utc::now()),
            confidence: occurrences as f64 / PATTERN_CONFIDENCE_SATURATION,
        };

        info!("Detected new pattern: {}", pattern.name);
        self.patterns.insert(pattern.id.clone(), pattern);
        true
    }
}

/// Central knowledge store for the Kratos core.
///
/// Stores incidents, patterns and remediation history, and learns from every
/// outcome to improve future recommendations.
pub struct KnowledgeBase {
    config: KnowledgeConfig,
    persistence: Persistence,
    state: RwLock<State>,
}

impl KnowledgeBase {
    /// Open (or create) the knowledge store under the configured directory.
    ///
    /// An unwritable directory is logged and the store continues memory-only;
    /// that fact is surfaced through [`KnowledgeBase::stats`].
    pub fn new(config: KnowledgeConfig) -> Self {
        let persistence = Persistence::new(config.storage_path.clone());

        let memory_only = match std::fs::create_dir_all(persistence.root()) {
            Ok(()) => false,
            Err(e) => {
                error!(
                    "Knowledge storage {} is unwritable ({}), continuing memory-only",
                    persistence.root().display(),
                    e
                );
                true
            }
        };

        let (incidents, patterns) = if memory_only {
            (Vec::new(), Vec::new())
        } else {
            persistence.load()
        };

        let mut state = State {
            incidents: HashMap::new(),
            patterns: patterns.into_iter().map(|p| (p.id.clone(), p)).collect(),
            remediations: HashMap::new(),
            by_type: HashMap::new(),
            by_resource: HashMap::new(),
            by_fingerprint: HashMap::new(),
            outcome_stats: HashMap::new(),
            memory_only,
        };
        for incident in incidents {
            state.index_incident(incident);
        }

        KnowledgeBase {
            config,
            persistence,
            state: RwLock::new(state),
        }
    }

    /// Record a new incident: append it to the durable log, update all
    /// indexes and trigger pattern induction. Returns the incident id.
    pub fn record_incident(&self, incident: Incident) -> String {
        let id = incident.id.clone();
        let message_head: String = incident.message.chars().take(50).collect();
        let kind = incident.kind;

        let (patterns_changed, memory_only) = {
            let mut state = self.state.write();
            state.index_incident(incident.clone());
            let changed = state.detect_patterns(&incident, self.config.min_occurrences_for_pattern);
            (changed, state.memory_only)
        };

        if !memory_only {
            if let Err(e) = self.persistence.append_incident(&incident) {
                warn!("Failed to persist incident {}: {}", id, e);
            }
            if patterns_changed {
                self.save_patterns();
            }
        }

        info!("Recorded incident {}: {} - {}", id, kind, message_head);
        id
    }

    /// Record a remediation and its outcome for learning.
    ///
    /// When the remediation references a known incident, the outcome feeds
    /// the (kind, action) statistics and nudges matching patterns' success
    /// rates by exponential moving average.
    pub fn record_remediation(&self, remediation: Remediation) {
        let (patterns_changed, memory_only) = {
            let mut state = self.state.write();

            let incident_kind = remediation
                .incident_id
                .as_ref()
                .and_then(|id| state.incidents.get(id))
                .map(|incident| incident.kind);

            let mut changed = false;
            if let Some(kind) = incident_kind {
                let success = matches!(
                    remediation.outcome,
                    RemediationOutcome::Success | RemediationOutcome::PartialSuccess
                );
                state
                    .outcome_stats
                    .entry((kind, remediation.action))
                    .or_default()
                    .push(success);

                let observed = if success { 1.0 } else { 0.0 };
                for pattern in state.patterns.values_mut() {
                    if pattern.incident_types.contains(&kind)
                        && pattern.recommended_actions.contains(&remediation.action)
                    {
                        pattern.success_rate = PATTERN_EMA_ALPHA * observed
                            + (1.0 - PATTERN_EMA_ALPHA) * pattern.success_rate;
                        changed = true;
                    }
                }
            }

            info!(
                "Recorded remediation {}: {} -> {:?}",
                remediation.id, remediation.action, remediation.outcome
            );
            state.remediations.insert(remediation.id.clone(), remediation);
            (changed, state.memory_only)
        };

        if patterns_changed && !memory_only {
            self.save_patterns();
        }
    }

    /// Find incidents sharing this incident's fingerprint, newest first.
    /// The incident itself and anything older than `max_age_days` is
    /// excluded.
    pub fn find_similar_incidents(
        &self,
        incident: &Incident,
        max_results: usize,
        max_age_days: i64,
    ) -> Vec<Incident> {
        let hash = IncidentFingerprint::of(incident).to_hash();
        let cutoff = Utc::now() - Duration::days(max_age_days);

        let state = self.state.read();
        let mut similar: Vec<Incident> = state
            .by_fingerprint
            .get(&hash)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|id| **id != incident.id)
                    .filter_map(|id| state.incidents.get(id))
                    .filter(|found| found.occurred_at >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        similar.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        similar.truncate(max_results);
        similar
    }

    /// Recommended actions for an incident kind, ordered by success rate
    /// descending (ties broken by action declaration order).
    ///
    /// Empirical rates require at least two observations; pattern-declared
    /// actions fill in with the pattern's success rate when unseen
    /// empirically.
    pub fn get_recommended_actions(
        &self,
        incident_type: IncidentType,
    ) -> Vec<(RemediationAction, f64)> {
        let state = self.state.read();
        let mut recommendations: Vec<(RemediationAction, f64)> = Vec::new();

        for ((kind, action), outcomes) in &state.outcome_stats {
            if *kind == incident_type && outcomes.len() >= 2 {
                let successes = outcomes.iter().filter(|s| **s).count();
                recommendations.push((*action, successes as f64 / outcomes.len() as f64));
            }
        }

        for pattern in state.patterns.values() {
            if pattern.incident_types.contains(&incident_type) {
                for action in &pattern.recommended_actions {
                    if !recommendations.iter().any(|(a, _)| a == action) {
                        recommendations.push((*action, pattern.success_rate));
                    }
                }
            }
        }

        recommendations.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        recommendations
    }

    /// Snapshot of store counters and top patterns
    pub fn stats(&self) -> KnowledgeStats {
        let state = self.state.read();

        let mut top_patterns: Vec<&Pattern> = state.patterns.values().collect();
        top_patterns.sort_by(|a, b| b.occurrence_count.cmp(&a.occurrence_count));

        KnowledgeStats {
            total_incidents: state.incidents.len(),
            total_patterns: state.patterns.len(),
            total_remediations: state.remediations.len(),
            incidents_by_type: state
                .by_type
                .iter()
                .map(|(kind, ids)| (kind.as_str().to_string(), ids.len()))
                .collect(),
            top_patterns: top_patterns
                .into_iter()
                .take(5)
                .map(|p| PatternSummary {
                    name: p.name.clone(),
                    occurrences: p.occurrence_count,
                    success_rate: p.success_rate,
                })
                .collect(),
            memory_only: state.memory_only,
        }
    }

    /// Component health for status surfaces
    pub fn health(&self) -> ComponentHealth {
        let stats = self.stats();
        let mut health = if stats.memory_only {
            ComponentHealth::degraded("Knowledge storage unwritable, running memory-only")
        } else {
            ComponentHealth::healthy("Knowledge store persistent and indexed")
        };
        health.metrics.insert("incidents".to_string(), stats.total_incidents as f64);
        health.metrics.insert("patterns".to_string(), stats.total_patterns as f64);
        health
            .metrics
            .insert("remediations".to_string(), stats.total_remediations as f64);
        health
    }

    pub fn incident(&self, id: &str) -> Option<Incident> {
        self.state.read().incidents.get(id).cloned()
    }

    pub fn remediation(&self, id: &str) -> Option<Remediation> {
        self.state.read().remediations.get(id).cloned()
    }

    pub fn patterns(&self) -> Vec<Pattern> {
        self.state.read().patterns.values().cloned().collect()
    }

    fn save_patterns(&self) {
        let snapshot: Vec<Pattern> = {
            let state = self.state.read();
            state.patterns.values().cloned().collect()
        };
        if let Err(e) = self.persistence.save_patterns(&snapshot) {
            warn!("Failed to persist patterns: {}", e);
        }
    }
}

/// Default remediation actions per incident kind, used to seed new patterns
pub fn default_actions_for(incident_type: IncidentType) -> Vec<RemediationAction> {
    match incident_type {
        IncidentType::OomKill => vec![
            RemediationAction::ScaleMemoryUp,
            RemediationAction::RestartPod,
        ],
        IncidentType::CrashLoop => vec![
            RemediationAction::RestartPod,
            RemediationAction::RollbackDeployment,
        ],
        // Usually needs a registry or manifest fix, not automation
        IncidentType::ImagePullFail => vec![RemediationAction::NoAction],
        IncidentType::ReadinessFail | IncidentType::LivenessFail => {
            vec![RemediationAction::RestartPod]
        }
        IncidentType::NodeNotReady => vec![
            RemediationAction::CordonNode,
            RemediationAction::DrainNode,
        ],
        IncidentType::NodeMemoryPressure | IncidentType::NodeDiskPressure => {
            vec![RemediationAction::DrainNode]
        }
        IncidentType::ResourceExhaustion => vec![
            RemediationAction::ScaleReplicasUp,
            RemediationAction::ScaleCpuUp,
        ],
        IncidentType::Eviction => vec![RemediationAction::ScaleMemoryUp],
        IncidentType::PendingPod => vec![RemediationAction::ScaleReplicasDown],
        IncidentType::ScalingIssue => vec![RemediationAction::ScaleReplicasUp],
        IncidentType::DeploymentFail => vec![RemediationAction::RollbackDeployment],
        _ => vec![RemediationAction::NotifyOnly],
    }
}

/// Extract shared indicators from a set of fingerprint-equal incidents
fn extract_indicators(incidents: &[&Incident]) -> HashMap<String, serde_json::Value> {
    let mut indicators = HashMap::new();
    if incidents.is_empty() {
        return indicators;
    }

    let namespaces: Vec<&str> = incidents
        .iter()
        .filter_map(|i| i.resource.as_ref())
        .map(|r| r.namespace.as_str())
        .collect();
    if !namespaces.is_empty() && namespaces.iter().all(|ns| *ns == namespaces[0]) {
        indicators.insert(
            "common_namespace".to_string(),
            serde_json::json!(namespaces[0]),
        );
    }

    let label_sets: Vec<&HashMap<String, String>> = incidents
        .iter()
        .filter_map(|i| i.resource.as_ref())
        .map(|r| &r.labels)
        .collect();
    if !label_sets.is_empty() {
        let mut common_labels = serde_json::Map::new();
        for (key, value) in label_sets[0] {
            if label_sets.iter().all(|labels| labels.get(key) == Some(value)) {
                common_labels.insert(key.clone(), serde_json::json!(value));
            }
        }
        indicators.insert(
            "common_labels".to_string(),
            serde_json::Value::Object(common_labels),
        );
    }

    let mut severity_counts: HashMap<IncidentSeverity, usize> = HashMap::new();
    for incident in incidents {
        *severity_counts.entry(incident.severity).or_insert(0) += 1;
    }
    if let Some((severity, _)) = severity_counts.into_iter().max_by_key(|(_, count)| *count) {
        indicators.insert(
            "typical_severity".to_string(),
            serde_json::json!(severity.as_str()),
        );
    }

    let durations: Vec<f64> = incidents.iter().filter_map(|i| i.duration_seconds()).collect();
    if !durations.is_empty() {
        indicators.insert(
            "avg_duration_seconds".to_string(),
            serde_json::json!(durations.iter().sum::<f64>() / durations.len() as f64),
        );
    }

    let mut cause_counts: HashMap<&str, usize> = HashMap::new();
    for incident in incidents {
        if let Some(cause) = &incident.root_cause {
            *cause_counts.entry(cause.as_str()).or_insert(0) += 1;
        }
    }
    if !cause_counts.is_empty() {
        let mut causes: Vec<(&str, usize)> = cause_counts.into_iter().collect();
        causes.sort_by(|a, b| b.1.cmp(&a.1));
        let top: Vec<&str> = causes.into_iter().take(3).map(|(cause, _)| cause).collect();
        indicators.insert("common_root_causes".to_string(), serde_json::json!(top));
    }

    indicators
}
