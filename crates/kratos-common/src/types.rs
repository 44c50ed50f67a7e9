//! Common types for the Kratos self-healing core

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Severity levels for incidents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum IncidentSeverity {
    /// Service down, data loss risk
    Critical,
    /// Degraded performance, partial outage
    High,
    /// Potential issues, proactive intervention needed
    Medium,
    /// Minor issues, informational
    Low,
    /// Normal observations, learning data
    Info,
}

impl IncidentSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentSeverity::Critical => "critical",
            IncidentSeverity::High => "high",
            IncidentSeverity::Medium => "medium",
            IncidentSeverity::Low => "low",
            IncidentSeverity::Info => "info",
        }
    }
}

impl std::fmt::Display for IncidentSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kinds of Kubernetes incidents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    OomKill,
    CrashLoop,
    ImagePullFail,
    ReadinessFail,
    LivenessFail,
    NodeNotReady,
    NodeMemoryPressure,
    NodeDiskPressure,
    NodePidPressure,
    ResourceExhaustion,
    Eviction,
    PendingPod,
    NetworkIssue,
    VolumeIssue,
    ConfigError,
    ScalingIssue,
    DeploymentFail,
    Unknown,
}

impl IncidentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentType::OomKill => "oom_kill",
            IncidentType::CrashLoop => "crash_loop",
            IncidentType::ImagePullFail => "image_pull_fail",
            IncidentType::ReadinessFail => "readiness_fail",
            IncidentType::LivenessFail => "liveness_fail",
            IncidentType::NodeNotReady => "node_not_ready",
            IncidentType::NodeMemoryPressure => "node_memory_pressure",
            IncidentType::NodeDiskPressure => "node_disk_pressure",
            IncidentType::NodePidPressure => "node_pid_pressure",
            IncidentType::ResourceExhaustion => "resource_exhaustion",
            IncidentType::Eviction => "eviction",
            IncidentType::PendingPod => "pending_pod",
            IncidentType::NetworkIssue => "network_issue",
            IncidentType::VolumeIssue => "volume_issue",
            IncidentType::ConfigError => "config_error",
            IncidentType::ScalingIssue => "scaling_issue",
            IncidentType::DeploymentFail => "deployment_fail",
            IncidentType::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Confidence buckets for predictions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PredictionConfidence {
    VeryHigh,
    High,
    Medium,
    Low,
    Uncertain,
}

impl PredictionConfidence {
    /// Bucket a raw probability into a confidence level
    pub fn from_probability(probability: f64) -> Self {
        if probability >= 0.9 {
            PredictionConfidence::VeryHigh
        } else if probability >= 0.8 {
            PredictionConfidence::High
        } else if probability >= 0.7 {
            PredictionConfidence::Medium
        } else if probability >= 0.5 {
            PredictionConfidence::Low
        } else {
            PredictionConfidence::Uncertain
        }
    }
}

/// Remediation actions the engine can plan and execute.
///
/// Declaration order is the tie-break order when recommendations share a
/// success rate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum RemediationAction {
    // Resource adjustments
    ScaleMemoryUp,
    ScaleMemoryDown,
    ScaleCpuUp,
    ScaleCpuDown,
    ScaleReplicasUp,
    ScaleReplicasDown,
    // Pod operations
    RestartPod,
    DeletePod,
    CordonNode,
    DrainNode,
    // Deployment operations
    RollbackDeployment,
    PauseDeployment,
    // Network operations
    ResetNetworkPolicy,
    UpdateService,
    // Configuration
    UpdateConfigMap,
    UpdateSecret,
    UpdateResourceQuota,
    // Scheduling
    AddNodeAffinity,
    RemoveNodeAffinity,
    UpdatePriorityClass,
    // Custom
    CustomScript,
    NotifyOnly,
    NoAction,
}

impl RemediationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationAction::ScaleMemoryUp => "scale_memory_up",
            RemediationAction::ScaleMemoryDown => "scale_memory_down",
            RemediationAction::ScaleCpuUp => "scale_cpu_up",
            RemediationAction::ScaleCpuDown => "scale_cpu_down",
            RemediationAction::ScaleReplicasUp => "scale_replicas_up",
            RemediationAction::ScaleReplicasDown => "scale_replicas_down",
            RemediationAction::RestartPod => "restart_pod",
            RemediationAction::DeletePod => "delete_pod",
            RemediationAction::CordonNode => "cordon_node",
            RemediationAction::DrainNode => "drain_node",
            RemediationAction::RollbackDeployment => "rollback_deployment",
            RemediationAction::PauseDeployment => "pause_deployment",
            RemediationAction::ResetNetworkPolicy => "reset_network_policy",
            RemediationAction::UpdateService => "update_service",
            RemediationAction::UpdateConfigMap => "update_config_map",
            RemediationAction::UpdateSecret => "update_secret",
            RemediationAction::UpdateResourceQuota => "update_resource_quota",
            RemediationAction::AddNodeAffinity => "add_node_affinity",
            RemediationAction::RemoveNodeAffinity => "remove_node_affinity",
            RemediationAction::UpdatePriorityClass => "update_priority_class",
            RemediationAction::CustomScript => "custom_script",
            RemediationAction::NotifyOnly => "notify_only",
            RemediationAction::NoAction => "no_action",
        }
    }

    /// The inverse action used when rolling back, if one exists
    pub fn inverse(&self) -> Option<RemediationAction> {
        match self {
            RemediationAction::ScaleMemoryUp => Some(RemediationAction::ScaleMemoryDown),
            RemediationAction::ScaleMemoryDown => Some(RemediationAction::ScaleMemoryUp),
            RemediationAction::ScaleCpuUp => Some(RemediationAction::ScaleCpuDown),
            RemediationAction::ScaleCpuDown => Some(RemediationAction::ScaleCpuUp),
            RemediationAction::ScaleReplicasUp => Some(RemediationAction::ScaleReplicasDown),
            RemediationAction::ScaleReplicasDown => Some(RemediationAction::ScaleReplicasUp),
            _ => None,
        }
    }
}

impl std::fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State of a remediation as it advances through its lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RemediationOutcome {
    /// Planned, not yet gated or executed
    Created,
    PendingApproval,
    Executing,
    Success,
    PartialSuccess,
    Failed,
    RolledBack,
    Skipped,
    DryRun,
}

impl RemediationOutcome {
    /// Terminal states; a remediation is immutable once it reaches one
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RemediationOutcome::Success
                | RemediationOutcome::PartialSuccess
                | RemediationOutcome::Failed
                | RemediationOutcome::RolledBack
                | RemediationOutcome::Skipped
                | RemediationOutcome::DryRun
        )
    }
}

/// Resource usage metrics snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceMetrics {
    pub cpu_usage_cores: f64,
    pub cpu_limit_cores: f64,
    pub cpu_request_cores: f64,
    pub memory_usage_bytes: u64,
    pub memory_limit_bytes: u64,
    pub memory_request_bytes: u64,
    #[serde(default)]
    pub network_rx_bytes: u64,
    #[serde(default)]
    pub network_tx_bytes: u64,
    #[serde(default)]
    pub storage_usage_bytes: u64,
    #[serde(default)]
    pub storage_limit_bytes: u64,
    pub timestamp: DateTime<Utc>,
}

impl ResourceMetrics {
    pub fn new(
        cpu_usage_cores: f64,
        cpu_limit_cores: f64,
        cpu_request_cores: f64,
        memory_usage_bytes: u64,
        memory_limit_bytes: u64,
        memory_request_bytes: u64,
    ) -> Self {
        ResourceMetrics {
            cpu_usage_cores,
            cpu_limit_cores,
            cpu_request_cores,
            memory_usage_bytes,
            memory_limit_bytes,
            memory_request_bytes,
            network_rx_bytes: 0,
            network_tx_bytes: 0,
            storage_usage_bytes: 0,
            storage_limit_bytes: 0,
            timestamp: Utc::now(),
        }
    }

    /// CPU utilization as a percentage of the limit; 0 when no limit is set
    pub fn cpu_utilization(&self) -> f64 {
        if self.cpu_limit_cores == 0.0 {
            return 0.0;
        }
        (self.cpu_usage_cores / self.cpu_limit_cores) * 100.0
    }

    /// Memory utilization as a percentage of the limit; 0 when no limit is set
    pub fn memory_utilization(&self) -> f64 {
        if self.memory_limit_bytes == 0 {
            return 0.0;
        }
        (self.memory_usage_bytes as f64 / self.memory_limit_bytes as f64) * 100.0
    }
}

/// A Kubernetes resource descriptor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KubernetesResource {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub annotations: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl KubernetesResource {
    pub fn new(
        kind: impl Into<String>,
        name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        KubernetesResource {
            kind: kind.into(),
            name: name.into(),
            namespace: namespace.into(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
            uid: String::new(),
            created_at: None,
        }
    }

    pub fn with_labels(mut self, labels: HashMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Stable `kind/namespace/name` key used by indexes and cooldown tracking
    pub fn resource_key(&self) -> String {
        format!("{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// An observed undesirable state of a workload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: IncidentType,
    pub severity: IncidentSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<KubernetesResource>,
    pub message: String,
    #[serde(default)]
    pub details: HashMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_snapshot: Option<ResourceMetrics>,
    pub occurred_at: DateTime<Utc>,
    pub detected_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_incidents: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Incident {
    pub fn new(kind: IncidentType, severity: IncidentSeverity, message: impl Into<String>) -> Self {
        let now = Utc::now();
        Incident {
            id: Uuid::new_v4().to_string(),
            kind,
            severity,
            resource: None,
            message: message.into(),
            details: HashMap::new(),
            metrics_snapshot: None,
            occurred_at: now,
            detected_at: now,
            resolved_at: None,
            root_cause: None,
            related_incidents: Vec::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_resource(mut self, resource: KubernetesResource) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn with_metrics(mut self, metrics: ResourceMetrics) -> Self {
        self.metrics_snapshot = Some(metrics);
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }

    /// Seconds from occurrence to resolution, if resolved
    pub fn duration_seconds(&self) -> Option<f64> {
        self.resolved_at.map(|resolved| {
            (resolved - self.occurred_at).num_milliseconds() as f64 / 1000.0
        })
    }
}

/// A forward-looking assertion that an incident kind is likely for a resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub id: String,
    pub incident_type: IncidentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_resource: Option<KubernetesResource>,
    pub probability: f64,
    pub confidence: PredictionConfidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_seconds: Option<f64>,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub similar_incidents: Vec<String>,
    pub model_name: String,
    pub model_version: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Prediction {
    pub fn eta_minutes(&self) -> Option<f64> {
        self.eta_seconds.map(|s| s / 60.0)
    }

    /// Whether the prediction has passed its expiry, if one is set
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|e| e <= now).unwrap_or(false)
    }
}

/// A single step in an explanation chain
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplanationStep {
    pub step_number: u32,
    /// observation, analysis, decision, action or outcome
    pub category: String,
    pub content: String,
    #[serde(default)]
    pub evidence: Vec<String>,
    #[serde(default = "default_step_confidence")]
    pub confidence: f64,
}

fn default_step_confidence() -> f64 {
    1.0
}

impl ExplanationStep {
    pub fn new(step_number: u32, category: impl Into<String>, content: impl Into<String>) -> Self {
        ExplanationStep {
            step_number,
            category: category.into(),
            content: content.into(),
            evidence: Vec::new(),
            confidence: 1.0,
        }
    }

    pub fn with_evidence(mut self, evidence: Vec<String>) -> Self {
        self.evidence = evidence;
        self
    }
}

/// Full explanation chain for a remediation action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Explanation {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub steps: Vec<ExplanationStep>,
    #[serde(default)]
    pub risk_assessment: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternative_actions: Vec<String>,
    #[serde(default)]
    pub rollback_plan: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Explanation {
    pub fn new(summary: impl Into<String>) -> Self {
        Explanation {
            id: Uuid::new_v4().to_string(),
            summary: summary.into(),
            steps: Vec::new(),
            risk_assessment: String::new(),
            alternative_actions: Vec::new(),
            rollback_plan: String::new(),
            references: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// Render the chain as operator-readable text
    pub fn to_human_readable(&self) -> String {
        let mut lines = vec![format!("Summary: {}", self.summary), String::new()];

        let mut steps: Vec<&ExplanationStep> = self.steps.iter().collect();
        steps.sort_by_key(|s| s.step_number);

        for step in steps {
            lines.push(format!(
                "{}. [{}] {}",
                step.step_number,
                step.category.to_uppercase(),
                step.content
            ));
            for ev in &step.evidence {
                lines.push(format!("   - Evidence: {ev}"));
            }
        }

        if !self.risk_assessment.is_empty() {
            lines.push(String::new());
            lines.push(format!("Risk Assessment: {}", self.risk_assessment));
        }

        if !self.rollback_plan.is_empty() {
            lines.push(String::new());
            lines.push(format!("Rollback Plan: {}", self.rollback_plan));
        }

        lines.join("\n")
    }
}

/// A corrective action taken or planned
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Remediation {
    pub id: String,
    pub action: RemediationAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_resource: Option<KubernetesResource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction_id: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, serde_json::Value>,
    pub outcome: RemediationOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Explanation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback_remediation_id: Option<String>,
}

impl Remediation {
    pub fn new(action: RemediationAction) -> Self {
        Remediation {
            id: Uuid::new_v4().to_string(),
            action,
            target_resource: None,
            incident_id: None,
            prediction_id: None,
            parameters: HashMap::new(),
            outcome: RemediationOutcome::Created,
            explanation: None,
            executed_at: None,
            completed_at: None,
            error_message: None,
            dry_run: false,
            requires_approval: false,
            approved_by: None,
            rollback_remediation_id: None,
        }
    }

    pub fn is_executed(&self) -> bool {
        self.executed_at.is_some()
    }

    /// Success for rollback purposes covers dry runs as well
    pub fn is_successful(&self) -> bool {
        matches!(
            self.outcome,
            RemediationOutcome::Success | RemediationOutcome::DryRun
        )
    }
}

/// A learned pattern of recurring incidents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub incident_types: Vec<IncidentType>,
    #[serde(default)]
    pub indicators: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub recommended_actions: Vec<RemediationAction>,
    pub success_rate: f64,
    pub occurrence_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    pub confidence: f64,
}
