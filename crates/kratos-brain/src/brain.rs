//! The Kratos brain: owns every component and runs the control loops

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use kratos_common::{
    Incident, KratosConfig, KubernetesResource, Prediction, PredictionConfidence, Remediation,
    RemediationConfig, ResourceMetrics, Result,
};
use kratos_knowledge::{KnowledgeBase, KnowledgeStats};
use kratos_predictors::{FailurePredictor, FeatureMap, Predictor, TrainingSample};
use kratos_remediation::{
    ClusterSnapshot, OrchestratorClient, RemediationEngine, RemediationPlan,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Autonomy level controlling plan generation and auto-execution
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KratosMode {
    Observe,
    Predict,
    Recommend,
    SemiAuto,
    Auto,
}

impl KratosMode {
    /// Whether the prediction loop runs in this mode
    pub fn predicts(&self) -> bool {
        !matches!(self, KratosMode::Observe)
    }

    /// Whether incident/prediction plans are generated
    pub fn plans(&self) -> bool {
        matches!(
            self,
            KratosMode::Recommend | KratosMode::SemiAuto | KratosMode::Auto
        )
    }

    /// Whether safe, approval-free plans execute without an operator
    pub fn auto_executes(&self) -> bool {
        matches!(self, KratosMode::SemiAuto | KratosMode::Auto)
    }
}

/// Point-in-time cluster totals from the observation adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterState {
    pub total_nodes: usize,
    pub ready_nodes: usize,
    pub total_pods: usize,
    pub running_pods: usize,
    pub pending_pods: usize,
    pub failed_pods: usize,
    pub namespaces: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// One observation cycle: cluster totals plus freshly detected incidents
#[derive(Debug, Clone)]
pub struct ClusterObservation {
    pub state: ClusterState,
    pub incidents: Vec<Incident>,
}

/// Observation adapter over the orchestrator's read surface
#[async_trait]
pub trait ClusterSource: Send + Sync {
    async fn observe(&self) -> Result<ClusterObservation>;
}

/// Metric feed for the prediction loop; scraping happens elsewhere
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn sample(&self) -> Result<Vec<(KubernetesResource, ResourceMetrics)>>;
}

/// Brain status snapshot
#[derive(Debug, Clone, Serialize)]
pub struct BrainStatus {
    pub mode: KratosMode,
    pub is_running: bool,
    pub knowledge: KnowledgeStats,
    pub active_predictions: usize,
    pub pending_remediations: usize,
    pub last_incident_at: Option<DateTime<Utc>>,
    pub last_remediation_at: Option<DateTime<Utc>>,
    pub uptime_seconds: f64,
}

type Subscriber<T> = Box<dyn Fn(&T) + Send + Sync>;

/// Identifier-keyed subscriber list; notification follows insertion order
struct Subscribers<T> {
    entries: Mutex<Vec<(String, Subscriber<T>)>>,
}

impl<T> Subscribers<T> {
    fn new() -> Self {
        Subscribers {
            entries: Mutex::new(Vec::new()),
        }
    }

    fn add(&self, id: impl Into<String>, subscriber: Subscriber<T>) {
        let id = id.into();
        let mut entries = self.entries.lock();
        if let Some(existing) = entries.iter_mut().find(|(key, _)| *key == id) {
            existing.1 = subscriber;
        } else {
            entries.push((id, subscriber));
        }
    }

    fn remove(&self, id: &str) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(key, _)| key != id);
        entries.len() != before
    }

    fn notify(&self, value: &T) {
        for (_, subscriber) in self.entries.lock().iter() {
            subscriber(value);
        }
    }
}

/// The central intelligence hub.
///
/// Owns the knowledge base, the prediction ensemble and the remediation
/// engine, and drives the observation and prediction loops under the
/// configured autonomy mode.
pub struct KratosBrain {
    mode: KratosMode,
    config: KratosConfig,
    knowledge_base: Arc<KnowledgeBase>,
    failure_predictor: Mutex<FailurePredictor>,
    remediation_engine: Arc<RemediationEngine>,
    cluster_source: Arc<dyn ClusterSource>,
    metrics_source: Arc<dyn MetricsSource>,
    is_running: AtomicBool,
    started_at: Mutex<Option<DateTime<Utc>>>,
    cluster_state: Mutex<Option<ClusterState>>,
    /// Active predictions keyed by target resource
    active_predictions: Mutex<HashMap<String, Prediction>>,
    last_incident_at: Mutex<Option<DateTime<Utc>>>,
    last_remediation_at: Mutex<Option<DateTime<Utc>>>,
    on_incident: Subscribers<Incident>,
    on_prediction: Subscribers<Prediction>,
    on_remediation: Subscribers<Remediation>,
}

impl KratosBrain {
    pub fn new(
        mode: KratosMode,
        config: KratosConfig,
        orchestrator: Arc<dyn OrchestratorClient>,
        cluster_source: Arc<dyn ClusterSource>,
        metrics_source: Arc<dyn MetricsSource>,
    ) -> Self {
        let knowledge_base = Arc::new(KnowledgeBase::new(config.knowledge.clone()));
        let failure_predictor = FailurePredictor::new(Some(knowledge_base.clone()));

        // observe mode never mutates the cluster
        let remediation_config = RemediationConfig {
            dry_run: config.remediation.dry_run || mode == KratosMode::Observe,
            ..config.remediation.clone()
        };
        let remediation_engine = Arc::new(RemediationEngine::new(
            orchestrator,
            Some(knowledge_base.clone()),
            remediation_config,
        ));

        info!("Kratos brain initialized in {:?} mode", mode);

        KratosBrain {
            mode,
            config,
            knowledge_base,
            failure_predictor: Mutex::new(failure_predictor),
            remediation_engine,
            cluster_source,
            metrics_source,
            is_running: AtomicBool::new(false),
            started_at: Mutex::new(None),
            cluster_state: Mutex::new(None),
            active_predictions: Mutex::new(HashMap::new()),
            last_incident_at: Mutex::new(None),
            last_remediation_at: Mutex::new(None),
            on_incident: Subscribers::new(),
            on_prediction: Subscribers::new(),
            on_remediation: Subscribers::new(),
        }
    }

    pub fn mode(&self) -> KratosMode {
        self.mode
    }

    pub fn knowledge_base(&self) -> &Arc<KnowledgeBase> {
        &self.knowledge_base
    }

    pub fn remediation_engine(&self) -> &Arc<RemediationEngine> {
        &self.remediation_engine
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Start the observation loop, and the prediction loop in predicting
    /// modes. Idempotent while running; callers keep their own `Arc` and
    /// pass a clone in.
    pub fn start(self: Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.started_at.lock() = Some(Utc::now());

        let brain = self.clone();
        tokio::spawn(async move { brain.observation_loop().await });

        if self.mode.predicts() {
            let brain = self.clone();
            tokio::spawn(async move { brain.prediction_loop().await });
        }

        info!("Kratos brain started");
    }

    /// Signal both loops to stop at their next wake. In-flight work runs to
    /// completion.
    pub fn stop(&self) {
        self.is_running.store(false, Ordering::SeqCst);
        info!("Kratos brain stopped");
    }

    pub fn status(&self) -> BrainStatus {
        let uptime_seconds = match *self.started_at.lock() {
            Some(started) => (Utc::now() - started).num_milliseconds() as f64 / 1000.0,
            None => 0.0,
        };

        BrainStatus {
            mode: self.mode,
            is_running: self.is_running(),
            knowledge: self.knowledge_base.stats(),
            active_predictions: self.get_active_predictions().len(),
            pending_remediations: self.remediation_engine.pending_count(),
            last_incident_at: *self.last_incident_at.lock(),
            last_remediation_at: *self.last_remediation_at.lock(),
            uptime_seconds,
        }
    }

    async fn observation_loop(self: Arc<Self>) {
        let interval = std::time::Duration::from_secs(self.config.observe_interval_seconds);
        while self.is_running() {
            match self.observe_cluster().await {
                Ok(()) => tokio::time::sleep(interval).await,
                Err(e) => {
                    error!("Observation error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                }
            }
        }
    }

    async fn prediction_loop(self: Arc<Self>) {
        let interval = std::time::Duration::from_secs(self.config.predict_interval_seconds);
        while self.is_running() {
            match self.run_predictions().await {
                Ok(()) => tokio::time::sleep(interval).await,
                Err(e) => {
                    error!("Prediction error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
                }
            }
        }
    }

    /// One observation cycle: refresh cluster state, then feed each detected
    /// incident through the pipeline strictly in order.
    pub async fn observe_cluster(&self) -> Result<()> {
        let observation = self.cluster_source.observe().await?;

        self.remediation_engine.set_cluster_snapshot(ClusterSnapshot {
            total_pods: observation.state.total_pods,
            total_nodes: observation.state.total_nodes,
        });
        *self.cluster_state.lock() = Some(observation.state);

        for expired in self.remediation_engine.purge_expired() {
            self.on_remediation.notify(&expired);
        }

        for incident in observation.incidents {
            self.handle_incident(incident).await;
        }
        Ok(())
    }

    /// Record an incident and, in planning modes, drive it to a remediation
    /// plan.
    pub async fn handle_incident(&self, incident: Incident) {
        info!("Incident: {} - {}", incident.kind, incident.message);
        *self.last_incident_at.lock() = Some(Utc::now());

        self.knowledge_base.record_incident(incident.clone());
        self.on_incident.notify(&incident);

        if self.mode.plans() {
            match self
                .remediation_engine
                .plan_remediation(Some(&incident), None, None)
            {
                Ok(plan) => self.handle_remediation_plan(plan, true).await,
                Err(e) => error!("Failed to plan remediation: {}", e),
            }
        }
    }

    /// One prediction cycle over the metric feed
    pub async fn run_predictions(&self) -> Result<()> {
        let samples = self.metrics_source.sample().await?;

        for (resource, metrics) in samples {
            let prediction = self.predict_for_resource(&resource, &metrics);

            if prediction.probability >= self.config.prediction_threshold {
                info!(
                    "Prediction: {} for {} (p={:.2})",
                    prediction.incident_type,
                    resource.resource_key(),
                    prediction.probability
                );
                self.active_predictions
                    .lock()
                    .insert(resource.resource_key(), prediction.clone());
                self.on_prediction.notify(&prediction);

                if self.mode.plans() {
                    let auto_allowed =
                        prediction.probability >= self.config.auto_remediate_threshold;
                    match self
                        .remediation_engine
                        .plan_remediation(None, Some(&prediction), None)
                    {
                        Ok(plan) => self.handle_remediation_plan(plan, auto_allowed).await,
                        Err(e) => error!("Failed to plan preemptive remediation: {}", e),
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_remediation_plan(&self, plan: RemediationPlan, auto_allowed: bool) {
        info!(
            "Remediation plan: {} ({})",
            plan.remediation.action, plan.estimated_impact
        );

        let should_execute = auto_allowed
            && self.mode.auto_executes()
            && plan.safety_validation.safe
            && !plan.safety_validation.requires_approval;

        if should_execute {
            let remediation = self.remediation_engine.execute(plan, Some("auto")).await;
            *self.last_remediation_at.lock() = Some(Utc::now());
            self.on_remediation.notify(&remediation);
        }
    }

    /// Run the ensemble over one resource's metrics and wrap the signal as a
    /// prediction. The prediction expires after two prediction intervals.
    pub fn predict_for_resource(
        &self,
        resource: &KubernetesResource,
        metrics: &ResourceMetrics,
    ) -> Prediction {
        let features: FeatureMap = [
            ("cpu_usage_cores".to_string(), metrics.cpu_usage_cores),
            ("cpu_limit_cores".to_string(), metrics.cpu_limit_cores),
            (
                "memory_usage_bytes".to_string(),
                metrics.memory_usage_bytes as f64,
            ),
            (
                "memory_limit_bytes".to_string(),
                metrics.memory_limit_bytes as f64,
            ),
        ]
        .into_iter()
        .collect();

        let signal = self.failure_predictor.lock().predict(&features);

        let incident_type = if metrics.memory_utilization() > metrics.cpu_utilization() {
            kratos_common::IncidentType::OomKill
        } else {
            kratos_common::IncidentType::ResourceExhaustion
        };

        let now = Utc::now();
        Prediction {
            id: uuid::Uuid::new_v4().to_string(),
            incident_type,
            target_resource: Some(resource.clone()),
            probability: signal.probability,
            confidence: PredictionConfidence::from_probability(signal.probability),
            eta_seconds: signal.eta_seconds,
            evidence: signal.evidence,
            similar_incidents: Vec::new(),
            model_name: signal.model_name,
            model_version: signal.model_version,
            created_at: now,
            expires_at: Some(
                now + Duration::seconds(2 * self.config.predict_interval_seconds as i64),
            ),
        }
    }

    /// Plan a preemptive remediation for a prediction
    pub fn get_recommendations(&self, prediction: &Prediction) -> Result<RemediationPlan> {
        self.remediation_engine
            .plan_remediation(None, Some(prediction), None)
    }

    /// Execute a reviewed plan on behalf of an operator
    pub async fn execute_remediation(
        &self,
        plan: RemediationPlan,
        approved_by: &str,
    ) -> Remediation {
        let remediation = self.remediation_engine.execute(plan, Some(approved_by)).await;
        *self.last_remediation_at.lock() = Some(Utc::now());
        self.on_remediation.notify(&remediation);
        remediation
    }

    pub fn get_similar_incidents(&self, incident: &Incident) -> Vec<Incident> {
        self.knowledge_base
            .find_similar_incidents(incident, 10, self.config.knowledge.max_age_days)
    }

    /// Active predictions with expired entries pruned
    pub fn get_active_predictions(&self) -> Vec<Prediction> {
        let now = Utc::now();
        let mut predictions = self.active_predictions.lock();
        predictions.retain(|_, p| !p.is_expired(now));
        predictions.values().cloned().collect()
    }

    pub fn cluster_state(&self) -> Option<ClusterState> {
        self.cluster_state.lock().clone()
    }

    /// Bulk-train the prediction ensemble on historical samples
    pub fn train_predictors(&self, samples: &[TrainingSample]) {
        self.failure_predictor.lock().train(samples);
    }

    pub fn subscribe_incident(&self, id: impl Into<String>, f: impl Fn(&Incident) + Send + Sync + 'static) {
        self.on_incident.add(id, Box::new(f));
    }

    pub fn unsubscribe_incident(&self, id: &str) -> bool {
        self.on_incident.remove(id)
    }

    pub fn subscribe_prediction(&self, id: impl Into<String>, f: impl Fn(&Prediction) + Send + Sync + 'static) {
        self.on_prediction.add(id, Box::new(f));
    }

    pub fn unsubscribe_prediction(&self, id: &str) -> bool {
        self.on_prediction.remove(id)
    }

    pub fn subscribe_remediation(&self, id: impl Into<String>, f: impl Fn(&Remediation) + Send + Sync + 'static) {
        self.on_remediation.add(id, Box::new(f));
    }

    pub fn unsubscribe_remediation(&self, id: &str) -> bool {
        self.on_remediation.remove(id)
    }
}

/// Cluster source that reports an empty, healthy cluster. Useful for wiring
/// the brain before a real orchestrator adapter is attached.
pub struct StaticClusterSource;

#[async_trait]
impl ClusterSource for StaticClusterSource {
    async fn observe(&self) -> Result<ClusterObservation> {
        Ok(ClusterObservation {
            state: ClusterState {
                total_nodes: 0,
                ready_nodes: 0,
                total_pods: 0,
                running_pods: 0,
                pending_pods: 0,
                failed_pods: 0,
                namespaces: Vec::new(),
                timestamp: Utc::now(),
            },
            incidents: Vec::new(),
        })
    }
}

/// Metrics source with nothing to report
pub struct StaticMetricsSource;

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn sample(&self) -> Result<Vec<(KubernetesResource, ResourceMetrics)>> {
        Ok(Vec::new())
    }
}
