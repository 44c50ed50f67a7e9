//! Remediation engine: plan, gate, execute, learn
//!
//! Every action flows through the same path: select an action from the
//! incident or prediction, generate parameters and an explanation chain,
//! validate safety, then execute (or park for approval). Outcomes feed back
//! into the knowledge base and the validator's rate-limit state.

use crate::actions::{ActionLibrary, OrchestratorClient};
use crate::safety::{ClusterSnapshot, SafetyValidation, SafetyValidator};
use chrono::{DateTime, Duration, Utc};
use kratos_common::{
    Error, Explanation, ExplanationStep, Incident, IncidentType, KubernetesResource, Prediction,
    Remediation, RemediationAction, RemediationConfig, RemediationOutcome, Result,
};
use kratos_knowledge::KnowledgeBase;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

const DEFAULT_MEMORY_BYTES: u64 = 512 * 1024 * 1024;
const MAX_MEMORY_BYTES: u64 = 4 * 1024 * 1024 * 1024;
/// Knowledge-base recommendations below this success rate fall back to the
/// static table
const RECOMMENDATION_THRESHOLD: f64 = 0.6;
/// Floor for handler timeouts
const MIN_HANDLER_TIMEOUT_SECONDS: u64 = 30;

/// A planned remediation with full context, reviewable before execution
#[derive(Debug, Clone)]
pub struct RemediationPlan {
    pub remediation: Remediation,
    pub safety_validation: SafetyValidation,
    pub estimated_impact: String,
    pub estimated_duration_seconds: u64,
    pub can_rollback: bool,
    pub rollback_plan: Option<String>,
    pub planned_at: DateTime<Utc>,
}

struct History {
    order: Vec<String>,
    entries: HashMap<String, Remediation>,
}

impl History {
    fn push(&mut self, remediation: Remediation) {
        if !self.entries.contains_key(&remediation.id) {
            self.order.push(remediation.id.clone());
        }
        self.entries.insert(remediation.id.clone(), remediation);
    }
}

/// Intelligent remediation engine with explainability, safety gating,
/// approval flow and rollback pairing.
pub struct RemediationEngine {
    knowledge_base: Option<Arc<KnowledgeBase>>,
    actions: ActionLibrary,
    safety_validator: SafetyValidator,
    dry_run: bool,
    pending_ttl_seconds: u64,
    history: Mutex<History>,
    pending_approvals: Mutex<HashMap<String, RemediationPlan>>,
    cluster: Mutex<Option<ClusterSnapshot>>,
}

impl RemediationEngine {
    pub fn new(
        client: Arc<dyn OrchestratorClient>,
        knowledge_base: Option<Arc<KnowledgeBase>>,
        config: RemediationConfig,
    ) -> Self {
        RemediationEngine {
            knowledge_base,
            actions: ActionLibrary::new(client),
            safety_validator: SafetyValidator::new(config.safety.clone()),
            dry_run: config.dry_run,
            pending_ttl_seconds: config.safety.pending_approval_ttl_seconds,
            history: Mutex::new(History {
                order: Vec::new(),
                entries: HashMap::new(),
            }),
            pending_approvals: Mutex::new(HashMap::new()),
            cluster: Mutex::new(None),
        }
    }

    /// Latest cluster totals, used for blast-radius checks
    pub fn set_cluster_snapshot(&self, snapshot: ClusterSnapshot) {
        *self.cluster.lock() = Some(snapshot);
    }

    pub fn safety_validator(&self) -> &SafetyValidator {
        &self.safety_validator
    }

    /// Plan a remediation with full safety analysis.
    ///
    /// At least one of `incident`/`prediction` must be given; supplying
    /// neither is a caller contract violation.
    pub fn plan_remediation(
        &self,
        incident: Option<&Incident>,
        prediction: Option<&Prediction>,
        suggested_action: Option<RemediationAction>,
    ) -> Result<RemediationPlan> {
        if incident.is_none() && prediction.is_none() {
            return Err(Error::Remediation(
                "Either incident or prediction must be provided".to_string(),
            ));
        }

        let target_resource = incident
            .and_then(|i| i.resource.clone())
            .or_else(|| prediction.and_then(|p| p.target_resource.clone()));

        let action = suggested_action.unwrap_or_else(|| match (incident, prediction) {
            (Some(incident), _) => self.select_action_for_incident(incident),
            (None, Some(prediction)) => select_action_for_prediction(prediction),
            (None, None) => RemediationAction::NotifyOnly,
        });

        let parameters = generate_parameters(action, incident);
        let explanation = self.generate_explanation(action, incident, prediction, &parameters);
        let rollback_plan_text = explanation.rollback_plan.clone();

        let mut remediation = Remediation::new(action);
        remediation.target_resource = target_resource.clone();
        remediation.incident_id = incident.map(|i| i.id.clone());
        remediation.prediction_id = prediction.map(|p| p.id.clone());
        remediation.parameters = parameters.clone();
        remediation.explanation = Some(explanation);
        remediation.dry_run = self.dry_run;

        let validate_target = target_resource
            .unwrap_or_else(|| KubernetesResource::new("Unknown", "unknown", "default"));
        let cluster = *self.cluster.lock();
        let safety_validation =
            self.safety_validator
                .validate(action, &validate_target, &parameters, cluster.as_ref());

        if safety_validation.requires_approval {
            remediation.requires_approval = true;
            remediation.outcome = RemediationOutcome::PendingApproval;
        }

        let plan = RemediationPlan {
            estimated_impact: estimate_impact(action),
            estimated_duration_seconds: estimate_duration(action),
            can_rollback: action.inverse().is_some(),
            rollback_plan: (!rollback_plan_text.is_empty()).then_some(rollback_plan_text),
            remediation,
            safety_validation,
            planned_at: Utc::now(),
        };

        if plan.safety_validation.requires_approval {
            self.pending_approvals
                .lock()
                .insert(plan.remediation.id.clone(), plan.clone());
        }

        Ok(plan)
    }

    /// Execute a remediation plan through the safety gate.
    ///
    /// Blocking safety failures yield SKIPPED; approval-gated plans without
    /// an approver stay PENDING_APPROVAL in the registry. Handlers run under
    /// a timeout of twice the estimated duration (floor 30s).
    pub async fn execute(&self, plan: RemediationPlan, approved_by: Option<&str>) -> Remediation {
        let mut remediation = plan.remediation.clone();

        if !plan.safety_validation.safe {
            remediation.outcome = RemediationOutcome::Skipped;
            remediation.error_message = Some(plan.safety_validation.summary());
            remediation.completed_at = Some(Utc::now());
            warn!(
                "Remediation {} blocked by safety: {}",
                remediation.id,
                plan.safety_validation.summary()
            );
            self.history.lock().push(remediation.clone());
            return remediation;
        }

        if plan.safety_validation.requires_approval && approved_by.is_none() {
            remediation.outcome = RemediationOutcome::PendingApproval;
            remediation.requires_approval = true;
            info!(
                "Remediation {} requires approval: {}",
                remediation.id,
                plan.safety_validation
                    .approval_reason
                    .as_deref()
                    .unwrap_or("unspecified")
            );
            let mut retained = plan.clone();
            retained.remediation = remediation.clone();
            self.pending_approvals
                .lock()
                .insert(remediation.id.clone(), retained);
            return remediation;
        }

        // an approved plan leaves the registry
        self.pending_approvals.lock().remove(&remediation.id);
        if let Some(approver) = approved_by {
            remediation.approved_by = Some(approver.to_string());
        }

        remediation.executed_at = Some(Utc::now());
        remediation.outcome = RemediationOutcome::Executing;

        if remediation.dry_run {
            info!("[DRY RUN] Would execute: {}", remediation.action);
            remediation.outcome = RemediationOutcome::DryRun;
        } else if !ActionLibrary::supports(remediation.action) {
            warn!("No handler for action: {}", remediation.action);
            remediation.outcome = RemediationOutcome::Skipped;
        } else {
            let timeout_seconds =
                (plan.estimated_duration_seconds * 2).max(MIN_HANDLER_TIMEOUT_SECONDS);
            let handler = self.actions.execute(&remediation);
            match tokio::time::timeout(std::time::Duration::from_secs(timeout_seconds), handler)
                .await
            {
                Ok(Ok(true)) => remediation.outcome = RemediationOutcome::Success,
                Ok(Ok(false)) => remediation.outcome = RemediationOutcome::Failed,
                Ok(Err(e)) => {
                    remediation.outcome = RemediationOutcome::Failed;
                    remediation.error_message = Some(e.to_string());
                    error!("Remediation {} failed: {}", remediation.id, e);
                }
                Err(_) => {
                    remediation.outcome = RemediationOutcome::Failed;
                    remediation.error_message = Some("timeout".to_string());
                    error!(
                        "Remediation {} timed out after {}s",
                        remediation.id, timeout_seconds
                    );
                }
            }
        }

        remediation.completed_at = Some(Utc::now());
        self.history.lock().push(remediation.clone());

        if let Some(kb) = &self.knowledge_base {
            kb.record_remediation(remediation.clone());
        }

        // dispatched remediations consume rate-limit budget; handler-less
        // skips do not
        if matches!(
            remediation.outcome,
            RemediationOutcome::Success
                | RemediationOutcome::PartialSuccess
                | RemediationOutcome::Failed
                | RemediationOutcome::DryRun
        ) {
            if let Some(target) = &remediation.target_resource {
                self.safety_validator.record_action(target);
            }
        }

        info!(
            "Remediation {} completed: {:?}",
            remediation.id, remediation.outcome
        );
        remediation
    }

    /// Approve a pending remediation and execute it
    pub async fn approve(&self, remediation_id: &str, approver: &str) -> Result<Remediation> {
        let plan = self
            .pending_approvals
            .lock()
            .remove(remediation_id)
            .ok_or_else(|| {
                Error::Remediation(format!("No pending approval for {remediation_id}"))
            })?;
        info!("Remediation {} approved by {}", remediation_id, approver);
        Ok(self.execute(plan, Some(approver)).await)
    }

    /// Deny a pending remediation; it lands in history as SKIPPED
    pub fn deny(&self, remediation_id: &str, denied_by: &str) -> Result<Remediation> {
        let plan = self
            .pending_approvals
            .lock()
            .remove(remediation_id)
            .ok_or_else(|| {
                Error::Remediation(format!("No pending approval for {remediation_id}"))
            })?;

        let mut remediation = plan.remediation;
        remediation.outcome = RemediationOutcome::Skipped;
        remediation.error_message = Some(format!("Denied by {denied_by}"));
        remediation.completed_at = Some(Utc::now());

        info!("Remediation {} denied by {}", remediation.id, denied_by);
        self.history.lock().push(remediation.clone());
        Ok(remediation)
    }

    /// Expire pending approvals older than the configured TTL
    pub fn purge_expired(&self) -> Vec<Remediation> {
        let cutoff = Utc::now() - Duration::seconds(self.pending_ttl_seconds as i64);

        let expired_plans: Vec<RemediationPlan> = {
            let mut pending = self.pending_approvals.lock();
            let expired_ids: Vec<String> = pending
                .iter()
                .filter(|(_, plan)| plan.planned_at < cutoff)
                .map(|(id, _)| id.clone())
                .collect();
            expired_ids
                .into_iter()
                .filter_map(|id| pending.remove(&id))
                .collect()
        };

        let mut expired = Vec::new();
        for plan in expired_plans {
            let mut remediation = plan.remediation;
            remediation.outcome = RemediationOutcome::Skipped;
            remediation.error_message = Some("Approval expired".to_string());
            remediation.completed_at = Some(Utc::now());
            warn!("Pending remediation {} expired", remediation.id);
            self.history.lock().push(remediation.clone());
            expired.push(remediation);
        }
        expired
    }

    /// Roll back a previously executed remediation.
    ///
    /// Only the scale up/down pairs are reversible; the rollback runs
    /// through the same safety gate with the system as approver, and on
    /// success the two remediations reference each other.
    pub async fn rollback(&self, remediation_id: &str) -> Result<Remediation> {
        let original = self
            .history
            .lock()
            .entries
            .get(remediation_id)
            .cloned()
            .ok_or_else(|| {
                Error::Remediation(format!("Cannot find remediation {remediation_id} for rollback"))
            })?;

        if !original.is_successful() {
            return Err(Error::Remediation(format!(
                "Cannot rollback unsuccessful remediation {remediation_id}"
            )));
        }

        let rollback_action = original.action.inverse().ok_or_else(|| {
            Error::Remediation(format!("No rollback available for {}", original.action))
        })?;

        let parameters = swap_old_new_parameters(&original.parameters);

        let mut remediation = Remediation::new(rollback_action);
        remediation.target_resource = original.target_resource.clone();
        remediation.parameters = parameters.clone();
        remediation.dry_run = self.dry_run;
        let mut explanation = Explanation::new(format!("Rolling back remediation {remediation_id}"));
        explanation.rollback_plan = "This is a rollback action".to_string();
        remediation.explanation = Some(explanation);

        let validate_target = remediation
            .target_resource
            .clone()
            .unwrap_or_else(|| KubernetesResource::new("Unknown", "unknown", "default"));
        let cluster = *self.cluster.lock();
        let safety_validation = self.safety_validator.validate(
            rollback_action,
            &validate_target,
            &parameters,
            cluster.as_ref(),
        );

        let plan = RemediationPlan {
            remediation,
            safety_validation,
            estimated_impact: "Reverting previous change".to_string(),
            estimated_duration_seconds: 30,
            can_rollback: false,
            rollback_plan: None,
            planned_at: Utc::now(),
        };

        let mut result = self.execute(plan, Some("system_rollback")).await;

        if result.is_successful() {
            result.rollback_remediation_id = Some(remediation_id.to_string());
            let mut history = self.history.lock();
            if let Some(original) = history.entries.get_mut(remediation_id) {
                original.rollback_remediation_id = Some(result.id.clone());
            }
            if let Some(stored) = history.entries.get_mut(&result.id) {
                stored.rollback_remediation_id = Some(remediation_id.to_string());
            }
        }

        Ok(result)
    }

    pub fn remediation(&self, id: &str) -> Option<Remediation> {
        self.history.lock().entries.get(id).cloned()
    }

    /// Remediation history in execution order
    pub fn history(&self) -> Vec<Remediation> {
        let history = self.history.lock();
        history
            .order
            .iter()
            .filter_map(|id| history.entries.get(id))
            .cloned()
            .collect()
    }

    pub fn pending_plans(&self) -> Vec<RemediationPlan> {
        self.pending_approvals.lock().values().cloned().collect()
    }

    pub fn pending_count(&self) -> usize {
        self.pending_approvals.lock().len()
    }

    fn select_action_for_incident(&self, incident: &Incident) -> RemediationAction {
        if let Some(kb) = &self.knowledge_base {
            let recommendations = kb.get_recommended_actions(incident.kind);
            if let Some((action, success_rate)) = recommendations.first() {
                if *success_rate > RECOMMENDATION_THRESHOLD {
                    return *action;
                }
            }
        }

        match incident.kind {
            IncidentType::OomKill => RemediationAction::ScaleMemoryUp,
            IncidentType::CrashLoop | IncidentType::ReadinessFail | IncidentType::LivenessFail => {
                RemediationAction::RestartPod
            }
            IncidentType::NodeNotReady => RemediationAction::CordonNode,
            IncidentType::NodeMemoryPressure => RemediationAction::NotifyOnly,
            IncidentType::ResourceExhaustion => RemediationAction::ScaleReplicasUp,
            IncidentType::Eviction => RemediationAction::ScaleMemoryUp,
            IncidentType::DeploymentFail => RemediationAction::RollbackDeployment,
            _ => RemediationAction::NotifyOnly,
        }
    }

    fn generate_explanation(
        &self,
        action: RemediationAction,
        incident: Option<&Incident>,
        prediction: Option<&Prediction>,
        parameters: &HashMap<String, serde_json::Value>,
    ) -> Explanation {
        let mut steps = Vec::new();
        let mut step_number = 1;

        if let Some(incident) = incident {
            steps.push(
                ExplanationStep::new(
                    step_number,
                    "observation",
                    format!("Detected {} incident: {}", incident.kind, incident.message),
                )
                .with_evidence(vec![
                    format!("Incident ID: {}", incident.id),
                    format!("Severity: {}", incident.severity),
                ]),
            );
        } else if let Some(prediction) = prediction {
            steps.push(
                ExplanationStep::new(
                    step_number,
                    "observation",
                    format!(
                        "Predicted {} with {:.0}% probability",
                        prediction.incident_type,
                        prediction.probability * 100.0
                    ),
                )
                .with_evidence(prediction.evidence.clone()),
            );
        }
        step_number += 1;

        steps.push(ExplanationStep::new(
            step_number,
            "analysis",
            generate_analysis(incident, prediction),
        ));
        step_number += 1;

        let mut decision = format!("Selected action: {action}");
        if let Some(kb) = &self.knowledge_base {
            let kind = incident
                .map(|i| i.kind)
                .or_else(|| prediction.map(|p| p.incident_type));
            if let Some(kind) = kind {
                if let Some((_, success_rate)) = kb.get_recommended_actions(kind).first() {
                    decision.push_str(&format!(
                        " (historically {:.0}% successful)",
                        success_rate * 100.0
                    ));
                }
            }
        }
        steps.push(ExplanationStep::new(step_number, "decision", decision));
        step_number += 1;

        steps.push(ExplanationStep::new(
            step_number,
            "action",
            describe_action(action, parameters),
        ));

        let subject = incident
            .map(|i| i.kind)
            .or_else(|| prediction.map(|p| p.incident_type))
            .unwrap_or(IncidentType::Unknown);
        let verb = if incident.is_some() { "resolve" } else { "prevent" };

        let mut explanation = Explanation::new(format!("{action} to {verb} {subject}"));
        explanation.steps = steps;
        explanation.risk_assessment = assess_risk(action).to_string();
        explanation.rollback_plan = rollback_plan_text(action, parameters);
        explanation
    }
}

fn select_action_for_prediction(prediction: &Prediction) -> RemediationAction {
    match prediction.incident_type {
        IncidentType::OomKill => RemediationAction::ScaleMemoryUp,
        IncidentType::ResourceExhaustion => RemediationAction::ScaleReplicasUp,
        _ => RemediationAction::NotifyOnly,
    }
}

fn generate_parameters(
    action: RemediationAction,
    incident: Option<&Incident>,
) -> HashMap<String, serde_json::Value> {
    let mut parameters = HashMap::new();

    match action {
        RemediationAction::ScaleMemoryUp => {
            let current_memory = incident
                .and_then(|i| i.metrics_snapshot.as_ref())
                .map(|m| m.memory_limit_bytes)
                .unwrap_or(DEFAULT_MEMORY_BYTES);
            parameters.insert(
                "old_memory_bytes".to_string(),
                serde_json::json!(current_memory),
            );
            // grow by half, floored
            parameters.insert(
                "new_memory_bytes".to_string(),
                serde_json::json!(current_memory + current_memory / 2),
            );
            parameters.insert(
                "max_allowed_memory_bytes".to_string(),
                serde_json::json!(MAX_MEMORY_BYTES),
            );
        }
        RemediationAction::ScaleReplicasUp => {
            parameters.insert("increase_by".to_string(), serde_json::json!(1));
            parameters.insert("max_replicas".to_string(), serde_json::json!(10));
        }
        RemediationAction::ScaleReplicasDown => {
            parameters.insert("decrease_by".to_string(), serde_json::json!(1));
            parameters.insert("min_replicas".to_string(), serde_json::json!(1));
        }
        _ => {}
    }

    parameters
}

fn generate_analysis(incident: Option<&Incident>, prediction: Option<&Prediction>) -> String {
    if let Some(metrics) = incident.and_then(|i| i.metrics_snapshot.as_ref()) {
        return format!(
            "Current resource utilization: CPU {:.1}%, Memory {:.1}%",
            metrics.cpu_utilization(),
            metrics.memory_utilization()
        );
    }
    if let Some(prediction) = prediction {
        if let Some(eta_minutes) = prediction.eta_minutes() {
            return format!(
                "Predicted failure in approximately {:.0} minutes based on {} signals",
                eta_minutes,
                prediction.evidence.len()
            );
        }
    }
    "Analyzing situation based on available data".to_string()
}

fn describe_action(
    action: RemediationAction,
    parameters: &HashMap<String, serde_json::Value>,
) -> String {
    let param_u64 = |key: &str| parameters.get(key).and_then(serde_json::Value::as_u64);

    match action {
        RemediationAction::ScaleMemoryUp => {
            let old_mb = param_u64("old_memory_bytes").unwrap_or(0) / (1 << 20);
            let new_mb = param_u64("new_memory_bytes").unwrap_or(0) / (1 << 20);
            format!("Increase memory limit from {old_mb}Mi to {new_mb}Mi")
        }
        RemediationAction::ScaleReplicasUp => {
            format!("Increase replicas by {}", param_u64("increase_by").unwrap_or(1))
        }
        RemediationAction::RestartPod => {
            "Delete pod to trigger restart (managed by ReplicaSet/Deployment)".to_string()
        }
        RemediationAction::RollbackDeployment => {
            "Rollback deployment to previous revision".to_string()
        }
        other => format!("Execute {other}"),
    }
}

fn assess_risk(action: RemediationAction) -> &'static str {
    match action {
        RemediationAction::NotifyOnly
        | RemediationAction::ScaleMemoryUp
        | RemediationAction::ScaleCpuUp => "LOW - No service disruption expected",
        RemediationAction::RestartPod
        | RemediationAction::ScaleReplicasUp
        | RemediationAction::ScaleReplicasDown => {
            "MEDIUM - Brief disruption possible, automatic recovery"
        }
        RemediationAction::DeletePod
        | RemediationAction::RollbackDeployment
        | RemediationAction::CordonNode
        | RemediationAction::DrainNode => {
            "HIGH - Service disruption likely, manual verification recommended"
        }
        _ => "UNKNOWN - Review action carefully",
    }
}

fn rollback_plan_text(
    action: RemediationAction,
    parameters: &HashMap<String, serde_json::Value>,
) -> String {
    let param_u64 = |key: &str| parameters.get(key).and_then(serde_json::Value::as_u64);

    match action {
        RemediationAction::ScaleMemoryUp => {
            let old_mb = param_u64("old_memory_bytes").unwrap_or(0) / (1 << 20);
            format!("Revert memory limit to {old_mb}Mi")
        }
        RemediationAction::ScaleReplicasUp => {
            format!("Reduce replicas by {}", param_u64("increase_by").unwrap_or(1))
        }
        RemediationAction::RollbackDeployment => "Roll forward to current revision".to_string(),
        _ => "Manual intervention may be required".to_string(),
    }
}

fn estimate_impact(action: RemediationAction) -> String {
    match action {
        RemediationAction::NotifyOnly => "No impact - notification only".to_string(),
        RemediationAction::ScaleMemoryUp | RemediationAction::ScaleCpuUp => {
            "Minimal - pod restart required to apply new limits".to_string()
        }
        RemediationAction::RestartPod => "Brief - single pod restart (~30 seconds)".to_string(),
        RemediationAction::DrainNode => {
            "Significant - all pods on node will be evicted".to_string()
        }
        _ => "Unknown - review action impact".to_string(),
    }
}

fn estimate_duration(action: RemediationAction) -> u64 {
    match action {
        RemediationAction::NotifyOnly => 1,
        RemediationAction::ScaleMemoryUp | RemediationAction::ScaleCpuUp => 60,
        RemediationAction::ScaleReplicasUp => 120,
        RemediationAction::RestartPod => 30,
        RemediationAction::RollbackDeployment => 180,
        RemediationAction::DrainNode => 300,
        _ => 60,
    }
}

/// Swap every `old_*`/`new_*` parameter pair for a rollback
fn swap_old_new_parameters(
    parameters: &HashMap<String, serde_json::Value>,
) -> HashMap<String, serde_json::Value> {
    let mut swapped = parameters.clone();
    let old_keys: Vec<String> = parameters
        .keys()
        .filter(|k| k.starts_with("old_"))
        .cloned()
        .collect();

    for old_key in old_keys {
        let new_key = format!("new_{}", &old_key["old_".len()..]);
        if let (Some(old_value), Some(new_value)) =
            (parameters.get(&old_key), parameters.get(&new_key))
        {
            swapped.insert(old_key, new_value.clone());
            swapped.insert(new_key, old_value.clone());
        }
    }
    swapped
}
