//! Integration tests for the remediation engine

use async_trait::async_trait;
use kratos_common::{
    Error, Incident, IncidentSeverity, IncidentType, KubernetesResource, RemediationAction,
    RemediationConfig, RemediationOutcome, ResourceMetrics, Result, SafetyConfig,
};
use kratos_remediation::{
    DeploymentPatch, NullOrchestrator, OrchestratorClient, RemediationEngine,
};
use std::sync::Arc;

const MIB: u64 = 1024 * 1024;

fn engine_with(config: RemediationConfig) -> RemediationEngine {
    RemediationEngine::new(Arc::new(NullOrchestrator), None, config)
}

fn no_cooldown_config() -> RemediationConfig {
    RemediationConfig {
        dry_run: false,
        safety: SafetyConfig {
            cooldown_seconds: 0,
            ..SafetyConfig::default()
        },
    }
}

fn oom_incident(namespace: &str, name: &str) -> Incident {
    let labels = [("app".to_string(), "api-server".to_string())]
        .into_iter()
        .collect();
    let mut metrics = ResourceMetrics::new(0.8, 1.0, 0.5, 900 * MIB, 1024 * MIB, 512 * MIB);
    metrics.timestamp = chrono::Utc::now();
    Incident::new(
        IncidentType::OomKill,
        IncidentSeverity::High,
        "Container killed due to OOM",
    )
    .with_resource(KubernetesResource::new("Pod", name, namespace).with_labels(labels))
    .with_metrics(metrics)
}

#[tokio::test]
async fn oom_plan_scales_memory_and_passes_the_gate() {
    let engine = engine_with(RemediationConfig::default());
    let incident = oom_incident("production", "api-server-abc123");

    let plan = engine.plan_remediation(Some(&incident), None, None).unwrap();

    assert_eq!(plan.remediation.action, RemediationAction::ScaleMemoryUp);
    assert_eq!(
        plan.remediation.parameters["old_memory_bytes"],
        serde_json::json!(1024 * MIB)
    );
    assert_eq!(
        plan.remediation.parameters["new_memory_bytes"],
        serde_json::json!(1536 * MIB)
    );
    assert!(plan.safety_validation.safe);
    assert!(!plan.safety_validation.requires_approval);
    assert!(plan.can_rollback);

    let executed = engine.execute(plan, None).await;
    assert_eq!(executed.outcome, RemediationOutcome::Success);
    assert!(executed.is_executed());
    assert!(executed.completed_at.is_some());
}

#[tokio::test]
async fn plans_carry_a_full_explanation_chain() {
    let engine = engine_with(RemediationConfig::default());
    let incident = oom_incident("production", "api-server-abc123");

    let plan = engine.plan_remediation(Some(&incident), None, None).unwrap();
    let explanation = plan.remediation.explanation.as_ref().unwrap();

    let categories: Vec<&str> = explanation
        .steps
        .iter()
        .map(|s| s.category.as_str())
        .collect();
    assert_eq!(categories, ["observation", "analysis", "decision", "action"]);
    assert!(explanation.summary.contains("scale_memory_up"));
    assert!(!explanation.rollback_plan.is_empty());

    let rendered = explanation.to_human_readable();
    assert!(rendered.contains("Summary:"));
    assert!(rendered.contains("[OBSERVATION]"));
    assert!(rendered.contains("Rollback Plan:"));
}

#[tokio::test]
async fn protected_namespace_parks_the_plan_for_approval() {
    let engine = engine_with(RemediationConfig::default());
    let incident = oom_incident("kube-system", "kube-proxy-x1");

    let plan = engine.plan_remediation(Some(&incident), None, None).unwrap();
    assert_eq!(plan.remediation.action, RemediationAction::ScaleMemoryUp);
    assert!(plan.safety_validation.requires_approval);
    assert!(plan
        .safety_validation
        .approval_reason
        .as_deref()
        .unwrap()
        .contains("protected namespace"));

    let remediation_id = plan.remediation.id.clone();
    let executed = engine.execute(plan, None).await;
    assert_eq!(executed.outcome, RemediationOutcome::PendingApproval);
    assert!(executed.completed_at.is_none());
    assert!(engine
        .pending_plans()
        .iter()
        .any(|p| p.remediation.id == remediation_id));
}

#[tokio::test]
async fn approval_executes_the_parked_plan() {
    let engine = engine_with(RemediationConfig::default());
    let incident = oom_incident("kube-system", "kube-proxy-x1");

    let plan = engine.plan_remediation(Some(&incident), None, None).unwrap();
    let remediation_id = plan.remediation.id.clone();
    engine.execute(plan, None).await;

    let approved = engine.approve(&remediation_id, "oncall@example.com").await.unwrap();
    assert_eq!(approved.outcome, RemediationOutcome::Success);
    assert_eq!(approved.approved_by.as_deref(), Some("oncall@example.com"));
    assert_eq!(engine.pending_count(), 0);
}

#[tokio::test]
async fn denied_plans_are_skipped_and_leave_the_registry() {
    let engine = engine_with(RemediationConfig::default());
    let incident = oom_incident("kube-system", "kube-proxy-x1");

    let plan = engine.plan_remediation(Some(&incident), None, None).unwrap();
    let remediation_id = plan.remediation.id.clone();
    engine.execute(plan, None).await;

    let denied = engine.deny(&remediation_id, "oncall@example.com").unwrap();
    assert_eq!(denied.outcome, RemediationOutcome::Skipped);
    assert!(denied.completed_at.is_some());
    assert_eq!(engine.pending_count(), 0);

    // denying twice is an error
    assert!(engine.deny(&remediation_id, "oncall@example.com").is_err());
}

#[tokio::test]
async fn rate_limit_skips_the_twenty_first_action() {
    let engine = engine_with(no_cooldown_config());

    for i in 0..20 {
        let incident = oom_incident("production", &format!("api-server-{i}"));
        let plan = engine.plan_remediation(Some(&incident), None, None).unwrap();
        let executed = engine.execute(plan, None).await;
        assert_eq!(executed.outcome, RemediationOutcome::Success);
    }

    let incident = oom_incident("production", "api-server-final");
    let plan = engine.plan_remediation(Some(&incident), None, None).unwrap();
    assert!(!plan.safety_validation.safe);

    let skipped = engine.execute(plan, None).await;
    assert_eq!(skipped.outcome, RemediationOutcome::Skipped);
    let error = skipped.error_message.as_deref().unwrap();
    assert!(error.contains("rate_limit"), "unexpected error: {error}");
    assert!(skipped.completed_at.is_some());
}

#[tokio::test]
async fn cooldown_blocks_back_to_back_actions_on_one_target() {
    let engine = engine_with(RemediationConfig::default());

    let incident = oom_incident("production", "api-server-abc123");
    let plan = engine.plan_remediation(Some(&incident), None, None).unwrap();
    assert_eq!(
        engine.execute(plan, None).await.outcome,
        RemediationOutcome::Success
    );

    let retry = engine.plan_remediation(Some(&incident), None, None).unwrap();
    let blocked = engine.execute(retry, None).await;
    assert_eq!(blocked.outcome, RemediationOutcome::Skipped);
    assert!(blocked
        .error_message
        .as_deref()
        .unwrap()
        .contains("cooldown"));
}

#[tokio::test]
async fn rollback_pairs_remediations_bidirectionally() {
    let engine = engine_with(no_cooldown_config());

    let mut incident = oom_incident("production", "api-server-abc123");
    // old 512Mi so the scaled value lands on 768Mi
    incident.metrics_snapshot.as_mut().unwrap().memory_limit_bytes = 512 * MIB;

    let plan = engine.plan_remediation(Some(&incident), None, None).unwrap();
    let original = engine.execute(plan, None).await;
    assert_eq!(original.outcome, RemediationOutcome::Success);
    assert_eq!(
        original.parameters["new_memory_bytes"],
        serde_json::json!(768 * MIB)
    );

    let rollback = engine.rollback(&original.id).await.unwrap();
    assert_eq!(rollback.action, RemediationAction::ScaleMemoryDown);
    assert_eq!(rollback.outcome, RemediationOutcome::Success);
    assert_eq!(
        rollback.parameters["old_memory_bytes"],
        serde_json::json!(768 * MIB)
    );
    assert_eq!(
        rollback.parameters["new_memory_bytes"],
        serde_json::json!(512 * MIB)
    );
    assert_eq!(rollback.approved_by.as_deref(), Some("system_rollback"));
    assert_eq!(rollback.rollback_remediation_id.as_deref(), Some(original.id.as_str()));

    let stored_original = engine.remediation(&original.id).unwrap();
    assert_eq!(
        stored_original.rollback_remediation_id.as_deref(),
        Some(rollback.id.as_str())
    );
}

#[tokio::test]
async fn unsuccessful_remediations_cannot_roll_back() {
    let engine = engine_with(RemediationConfig::default());
    let incident = oom_incident("kube-system", "kube-proxy-x1");

    let plan = engine.plan_remediation(Some(&incident), None, None).unwrap();
    let pending = engine.execute(plan, None).await;
    assert_eq!(pending.outcome, RemediationOutcome::PendingApproval);

    assert!(engine.rollback(&pending.id).await.is_err());
}

#[tokio::test]
async fn restart_has_no_rollback() {
    let engine = engine_with(no_cooldown_config());
    let incident = Incident::new(
        IncidentType::CrashLoop,
        IncidentSeverity::High,
        "CrashLoopBackOff",
    )
    .with_resource(KubernetesResource::new("Pod", "worker-1", "production"));

    let plan = engine.plan_remediation(Some(&incident), None, None).unwrap();
    assert_eq!(plan.remediation.action, RemediationAction::RestartPod);
    assert!(!plan.can_rollback);

    let executed = engine.execute(plan, None).await;
    assert_eq!(executed.outcome, RemediationOutcome::Success);
    assert!(engine.rollback(&executed.id).await.is_err());
}

#[tokio::test]
async fn dry_run_skips_handlers() {
    let config = RemediationConfig {
        dry_run: true,
        ..RemediationConfig::default()
    };
    let engine = engine_with(config);
    let incident = oom_incident("production", "api-server-abc123");

    let plan = engine.plan_remediation(Some(&incident), None, None).unwrap();
    assert!(plan.remediation.dry_run);

    let executed = engine.execute(plan, None).await;
    assert_eq!(executed.outcome, RemediationOutcome::DryRun);
    assert!(executed.completed_at.is_some());
}

#[tokio::test]
async fn unhandled_actions_are_skipped() {
    let engine = engine_with(RemediationConfig::default());
    let incident = Incident::new(
        IncidentType::NodeMemoryPressure,
        IncidentSeverity::Medium,
        "Node under memory pressure",
    )
    .with_resource(KubernetesResource::new("Node", "node-1", "default"));

    // drain has no registered handler
    let plan = engine
        .plan_remediation(Some(&incident), None, Some(RemediationAction::DrainNode))
        .unwrap();
    let executed = engine.execute(plan, Some("oncall@example.com")).await;
    assert_eq!(executed.outcome, RemediationOutcome::Skipped);
    assert!(executed.completed_at.is_some());
}

struct FailingOrchestrator;

#[async_trait]
impl OrchestratorClient for FailingOrchestrator {
    async fn delete_pod(&self, _: &str, _: &str, _: i64) -> Result<()> {
        Err(Error::Orchestrator("connection refused".to_string()))
    }

    async fn patch_deployment(&self, _: &str, _: &str, _: DeploymentPatch) -> Result<()> {
        Err(Error::Orchestrator("connection refused".to_string()))
    }

    async fn set_node_schedulable(&self, _: &str, _: bool) -> Result<()> {
        Err(Error::Orchestrator("connection refused".to_string()))
    }
}

#[tokio::test]
async fn handler_errors_capture_the_message() {
    let engine = RemediationEngine::new(
        Arc::new(FailingOrchestrator),
        None,
        RemediationConfig::default(),
    );
    let incident = oom_incident("production", "api-server-abc123");

    let plan = engine.plan_remediation(Some(&incident), None, None).unwrap();
    let executed = engine.execute(plan, None).await;

    assert_eq!(executed.outcome, RemediationOutcome::Failed);
    assert!(executed
        .error_message
        .as_deref()
        .unwrap()
        .contains("connection refused"));
    assert!(executed.completed_at.is_some());
}

#[test]
fn planning_without_input_is_rejected() {
    let engine = engine_with(RemediationConfig::default());
    let err = engine.plan_remediation(None, None, None).unwrap_err();
    assert_matches::assert_matches!(err, Error::Remediation(_));
}

#[tokio::test]
async fn terminal_outcomes_always_carry_completion_times() {
    let engine = engine_with(no_cooldown_config());

    for i in 0..5 {
        let incident = oom_incident("production", &format!("api-{i}"));
        let plan = engine.plan_remediation(Some(&incident), None, None).unwrap();
        engine.execute(plan, None).await;
    }

    for remediation in engine.history() {
        assert_eq!(
            remediation.outcome.is_terminal(),
            remediation.completed_at.is_some(),
            "outcome {:?} and completed_at disagree",
            remediation.outcome
        );
    }
}
