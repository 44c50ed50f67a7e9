//! Integration tests for the brain: end-to-end pipeline and mode gating

use async_trait::async_trait;
use chrono::{Duration, Utc};
use kratos_brain::{
    ClusterObservation, ClusterSource, ClusterState, KratosBrain, KratosMode, MetricsSource,
    StaticMetricsSource,
};
use kratos_common::{
    Incident, IncidentSeverity, IncidentType, KnowledgeConfig, KratosConfig, KubernetesResource,
    RemediationAction, RemediationOutcome, ResourceMetrics, Result,
};
use kratos_predictors::TrainingSample;
use kratos_remediation::NullOrchestrator;
use parking_lot::Mutex;
use std::sync::Arc;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

fn test_config(dir: &tempfile::TempDir) -> KratosConfig {
    KratosConfig {
        knowledge: KnowledgeConfig {
            storage_path: dir.path().join("knowledge"),
            ..KnowledgeConfig::default()
        },
        ..KratosConfig::default()
    }
}

fn api_server_resource() -> KubernetesResource {
    let labels = [("app".to_string(), "api-server".to_string())]
        .into_iter()
        .collect();
    KubernetesResource::new("Pod", "api-server-abc123", "production").with_labels(labels)
}

fn api_server_metrics() -> ResourceMetrics {
    ResourceMetrics::new(0.8, 1.0, 0.5, 900 * MIB, GIB, 512 * MIB)
}

struct ScriptedClusterSource {
    incidents: Mutex<Vec<Incident>>,
}

#[async_trait]
impl ClusterSource for ScriptedClusterSource {
    async fn observe(&self) -> Result<ClusterObservation> {
        Ok(ClusterObservation {
            state: ClusterState {
                total_nodes: 3,
                ready_nodes: 3,
                total_pods: 50,
                running_pods: 45,
                pending_pods: 3,
                failed_pods: 2,
                namespaces: vec!["default".to_string(), "production".to_string()],
                timestamp: Utc::now(),
            },
            incidents: self.incidents.lock().drain(..).collect(),
        })
    }
}

fn brain_with_mode(
    mode: KratosMode,
    dir: &tempfile::TempDir,
    incidents: Vec<Incident>,
) -> Arc<KratosBrain> {
    Arc::new(KratosBrain::new(
        mode,
        test_config(dir),
        Arc::new(NullOrchestrator),
        Arc::new(ScriptedClusterSource {
            incidents: Mutex::new(incidents),
        }),
        Arc::new(StaticMetricsSource),
    ))
}

fn oom_incident() -> Incident {
    Incident::new(
        IncidentType::OomKill,
        IncidentSeverity::High,
        "Container killed due to OOM",
    )
    .with_resource(api_server_resource())
    .with_metrics(api_server_metrics())
}

/// Feed the ensemble a history of exponential memory growth so both the
/// anomaly and forecast signals fire on the next prediction.
fn train_towards_oom(brain: &KratosBrain) {
    let samples: Vec<TrainingSample> = (0..50)
        .map(|i| {
            // memory approaching 900Mi along an exponential curve
            let memory = 900.0 * MIB as f64 * (-0.2 * (49 - i) as f64).exp();
            let features = [
                ("cpu_usage_cores".to_string(), 0.8),
                ("cpu_limit_cores".to_string(), 1.0),
                ("memory_usage_bytes".to_string(), memory),
                ("memory_limit_bytes".to_string(), GIB as f64),
            ]
            .into_iter()
            .collect();
            TrainingSample::new(Utc::now() - Duration::seconds((50 - i) as i64 * 30), features)
        })
        .collect();
    brain.train_predictors(&samples);
}

#[tokio::test]
async fn oom_is_predicted_and_the_plan_passes_the_gate() {
    let dir = tempfile::tempdir().unwrap();
    let brain = brain_with_mode(KratosMode::Recommend, &dir, Vec::new());
    train_towards_oom(&brain);

    let resource = api_server_resource();
    let metrics = api_server_metrics();
    let prediction = brain.predict_for_resource(&resource, &metrics);

    assert!(
        prediction.probability > 0.5,
        "probability {} with evidence {:?}",
        prediction.probability,
        prediction.evidence
    );
    assert_eq!(prediction.incident_type, IncidentType::OomKill);
    assert!(prediction.expires_at.is_some());

    // the observation side turns the actual OOM into an incident with the
    // same metrics snapshot; plan from it
    let plan = brain
        .remediation_engine()
        .plan_remediation(Some(&oom_incident()), None, None)
        .unwrap();

    assert_eq!(plan.remediation.action, RemediationAction::ScaleMemoryUp);
    assert_eq!(
        plan.remediation.parameters["old_memory_bytes"],
        serde_json::json!(GIB)
    );
    assert_eq!(
        plan.remediation.parameters["new_memory_bytes"],
        serde_json::json!(GIB + GIB / 2)
    );
    assert!(plan.safety_validation.safe);
    assert!(!plan.safety_validation.requires_approval);
}

#[tokio::test]
async fn auto_mode_executes_safe_plans() {
    let dir = tempfile::tempdir().unwrap();
    let brain = brain_with_mode(KratosMode::Auto, &dir, vec![oom_incident()]);

    let executed = Arc::new(Mutex::new(Vec::new()));
    let seen = executed.clone();
    brain.subscribe_remediation("test", move |r| seen.lock().push(r.outcome));

    brain.observe_cluster().await.unwrap();

    let history = brain.remediation_engine().history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, RemediationOutcome::Success);
    assert_eq!(history[0].approved_by.as_deref(), Some("auto"));
    assert_eq!(*executed.lock(), vec![RemediationOutcome::Success]);

    let status = brain.status();
    assert!(status.last_incident_at.is_some());
    assert!(status.last_remediation_at.is_some());
    assert_eq!(status.knowledge.total_incidents, 1);
}

#[tokio::test]
async fn recommend_mode_plans_but_does_not_execute() {
    let dir = tempfile::tempdir().unwrap();
    let brain = brain_with_mode(KratosMode::Recommend, &dir, vec![oom_incident()]);

    brain.observe_cluster().await.unwrap();

    assert!(brain.remediation_engine().history().is_empty());
    assert_eq!(brain.status().knowledge.total_incidents, 1);
}

#[tokio::test]
async fn observe_mode_only_records() {
    let dir = tempfile::tempdir().unwrap();
    let brain = brain_with_mode(KratosMode::Observe, &dir, vec![oom_incident()]);

    brain.observe_cluster().await.unwrap();

    assert!(brain.remediation_engine().history().is_empty());
    assert_eq!(brain.remediation_engine().pending_count(), 0);
    assert_eq!(brain.status().knowledge.total_incidents, 1);

    // anything pushed through the engine by hand stays a dry run
    let plan = brain
        .remediation_engine()
        .plan_remediation(Some(&oom_incident()), None, None)
        .unwrap();
    assert!(plan.remediation.dry_run);
    let executed = brain.remediation_engine().execute(plan, None).await;
    assert_eq!(executed.outcome, RemediationOutcome::DryRun);
}

#[tokio::test]
async fn protected_incident_lands_in_pending_not_history() {
    let dir = tempfile::tempdir().unwrap();
    let incident = Incident::new(
        IncidentType::OomKill,
        IncidentSeverity::High,
        "Container killed due to OOM",
    )
    .with_resource(KubernetesResource::new("Pod", "coredns-x", "kube-system"))
    .with_metrics(api_server_metrics());
    let brain = brain_with_mode(KratosMode::Auto, &dir, vec![incident]);

    brain.observe_cluster().await.unwrap();

    // approval-gated plans are parked, never auto-executed
    assert!(brain.remediation_engine().history().is_empty());
    assert_eq!(brain.remediation_engine().pending_count(), 1);
    assert_eq!(brain.status().pending_remediations, 1);
}

#[tokio::test]
async fn incident_subscribers_fire_in_insertion_order() {
    let dir = tempfile::tempdir().unwrap();
    let brain = brain_with_mode(KratosMode::Observe, &dir, Vec::new());

    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second", "third"] {
        let order = order.clone();
        brain.subscribe_incident(name, move |_| order.lock().push(name));
    }
    assert!(brain.unsubscribe_incident("second"));
    assert!(!brain.unsubscribe_incident("second"));

    brain.handle_incident(oom_incident()).await;
    assert_eq!(*order.lock(), vec!["first", "third"]);
}

#[tokio::test]
async fn expired_predictions_are_pruned() {
    let dir = tempfile::tempdir().unwrap();
    let brain = brain_with_mode(KratosMode::Predict, &dir, Vec::new());

    let resource = api_server_resource();
    let mut prediction = brain.predict_for_resource(&resource, &api_server_metrics());
    prediction.expires_at = Some(Utc::now() - Duration::seconds(1));

    // simulate a stored prediction that has since expired
    let fresh = brain.predict_for_resource(&resource, &api_server_metrics());
    assert!(!fresh.is_expired(Utc::now()));
    assert!(prediction.is_expired(Utc::now()));

    assert!(brain.get_active_predictions().is_empty());
}

#[tokio::test]
async fn prediction_loop_is_quiet_on_healthy_metrics() {
    struct HealthyMetrics;
    #[async_trait]
    impl MetricsSource for HealthyMetrics {
        async fn sample(&self) -> Result<Vec<(KubernetesResource, ResourceMetrics)>> {
            Ok(vec![(
                KubernetesResource::new("Pod", "quiet-1", "production"),
                ResourceMetrics::new(0.1, 1.0, 0.1, 100 * MIB, GIB, 100 * MIB),
            )])
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let brain = Arc::new(KratosBrain::new(
        KratosMode::Auto,
        test_config(&dir),
        Arc::new(NullOrchestrator),
        Arc::new(ScriptedClusterSource {
            incidents: Mutex::new(Vec::new()),
        }),
        Arc::new(HealthyMetrics),
    ));

    brain.run_predictions().await.unwrap();
    assert!(brain.get_active_predictions().is_empty());
    assert!(brain.remediation_engine().history().is_empty());
}

#[tokio::test]
async fn start_and_stop_toggle_the_running_flag() {
    let dir = tempfile::tempdir().unwrap();
    let brain = brain_with_mode(KratosMode::Observe, &dir, Vec::new());

    assert!(!brain.is_running());
    brain.clone().start();
    assert!(brain.is_running());
    // double start is a no-op
    brain.clone().start();
    assert!(brain.is_running());

    brain.stop();
    assert!(!brain.is_running());
}

#[tokio::test]
async fn mode_table_matches_the_contract() {
    assert!(!KratosMode::Observe.predicts());
    assert!(KratosMode::Predict.predicts());
    assert!(!KratosMode::Predict.plans());
    assert!(KratosMode::Recommend.plans());
    assert!(!KratosMode::Recommend.auto_executes());
    assert!(KratosMode::SemiAuto.auto_executes());
    assert!(KratosMode::Auto.auto_executes());
}
