//! Safety validation for remediation actions
//!
//! Every plan passes through these checks before execution: rate limiting,
//! per-target cooldown, protected namespaces and workloads, high-risk action
//! gating, blast radius and resource bounds. Blocking failures make the plan
//! unsafe; non-blocking failures escalate to operator approval.

use chrono::{DateTime, Duration, Utc};
use kratos_common::{KubernetesResource, RemediationAction, SafetyConfig};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::info;

const DEFAULT_MAX_MEMORY_BYTES: u64 = 4 * 1024 * 1024 * 1024;
const DEFAULT_MAX_REPLICAS: u64 = 50;

/// Risk levels for remediation actions, ordered from none to critical
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

/// Result of a single safety check
#[derive(Debug, Clone, Serialize)]
pub struct SafetyCheck {
    pub name: &'static str,
    pub passed: bool,
    pub risk_level: RiskLevel,
    pub message: String,
    /// A failed blocking check makes the whole validation unsafe
    pub blocking: bool,
}

/// Complete safety validation result
#[derive(Debug, Clone, Serialize)]
pub struct SafetyValidation {
    pub safe: bool,
    pub overall_risk: RiskLevel,
    pub checks: Vec<SafetyCheck>,
    pub warnings: Vec<String>,
    pub requires_approval: bool,
    pub approval_reason: Option<String>,
}

impl SafetyValidation {
    /// Operator-facing one-liner; used as the error message on SKIPPED
    /// outcomes
    pub fn summary(&self) -> String {
        let passed = self.checks.iter().filter(|c| c.passed).count();
        let total = self.checks.len();

        if self.safe {
            format!(
                "SAFE ({passed}/{total} checks passed, risk: {})",
                self.overall_risk.as_str()
            )
        } else {
            let failed: Vec<&str> = self
                .checks
                .iter()
                .filter(|c| !c.passed && c.blocking)
                .map(|c| c.name)
                .collect();
            format!("BLOCKED by: {}", failed.join(", "))
        }
    }
}

/// Pod and node totals used for blast-radius arithmetic
#[derive(Debug, Clone, Copy)]
pub struct ClusterSnapshot {
    pub total_pods: usize,
    pub total_nodes: usize,
}

impl Default for ClusterSnapshot {
    fn default() -> Self {
        ClusterSnapshot {
            total_pods: 100,
            total_nodes: 3,
        }
    }
}

struct RateState {
    action_history: Vec<DateTime<Utc>>,
    recent_targets: HashMap<String, DateTime<Utc>>,
}

/// Validates remediation actions for safety before execution.
///
/// Enforces blast radius limits, rate limiting and approval gates.
pub struct SafetyValidator {
    config: SafetyConfig,
    high_risk_actions: HashSet<RemediationAction>,
    protected_namespaces: HashSet<&'static str>,
    protected_labels: HashMap<&'static str, HashSet<&'static str>>,
    state: Mutex<RateState>,
}

impl SafetyValidator {
    pub fn new(config: SafetyConfig) -> Self {
        let high_risk_actions = [
            RemediationAction::DrainNode,
            RemediationAction::RollbackDeployment,
            RemediationAction::DeletePod,
            RemediationAction::UpdateSecret,
            RemediationAction::CordonNode,
        ]
        .into_iter()
        .collect();

        let protected_namespaces = [
            "kube-system",
            "kube-public",
            "kube-node-lease",
            "monitoring",
            "istio-system",
        ]
        .into_iter()
        .collect();

        let mut protected_labels: HashMap<&'static str, HashSet<&'static str>> = HashMap::new();
        protected_labels.insert(
            "app",
            ["database", "postgres", "mysql", "redis", "elasticsearch"]
                .into_iter()
                .collect(),
        );
        protected_labels.insert("tier", ["data", "database"].into_iter().collect());
        protected_labels.insert("critical", ["true", "yes"].into_iter().collect());

        SafetyValidator {
            config,
            high_risk_actions,
            protected_namespaces,
            protected_labels,
            state: Mutex::new(RateState {
                action_history: Vec::new(),
                recent_targets: HashMap::new(),
            }),
        }
    }

    /// Validate a remediation action against all safety checks
    pub fn validate(
        &self,
        action: RemediationAction,
        target: &KubernetesResource,
        parameters: &HashMap<String, serde_json::Value>,
        cluster: Option<&ClusterSnapshot>,
    ) -> SafetyValidation {
        let mut checks = Vec::new();
        let mut warnings = Vec::new();
        let mut requires_approval = false;
        // the first approval-triggering check names the reason
        let mut approval_reason: Option<String> = None;

        checks.push(self.check_rate_limit());
        checks.push(self.check_cooldown(target));

        let namespace_check = self.check_protected_namespace(target);
        if !namespace_check.passed {
            requires_approval = true;
            approval_reason.get_or_insert_with(|| {
                format!("Target is in protected namespace: {}", target.namespace)
            });
        }
        checks.push(namespace_check);

        let workload_check = self.check_protected_workload(target);
        if !workload_check.passed {
            requires_approval = true;
            approval_reason.get_or_insert_with(|| workload_check.message.clone());
        }
        checks.push(workload_check);

        if self.high_risk_actions.contains(&action) {
            checks.push(SafetyCheck {
                name: "high_risk_action",
                passed: true,
                risk_level: RiskLevel::High,
                message: format!("Action {action} is classified as high-risk"),
                blocking: false,
            });
            requires_approval = true;
            approval_reason.get_or_insert_with(|| format!("High-risk action: {action}"));
        }

        if let Some(snapshot) = cluster {
            let blast_check = self.check_blast_radius(action, snapshot);
            if !blast_check.passed && !blast_check.blocking {
                requires_approval = true;
                approval_reason.get_or_insert_with(|| blast_check.message.clone());
            }
            checks.push(blast_check);
        }

        let resource_check = self.check_resource_limits(action, parameters);
        if resource_check.risk_level >= RiskLevel::Medium {
            warnings.push(resource_check.message.clone());
        }
        checks.push(resource_check);

        let safe = !checks.iter().any(|c| !c.passed && c.blocking);
        let overall_risk = checks
            .iter()
            .map(|c| c.risk_level)
            .max()
            .unwrap_or(RiskLevel::None);

        SafetyValidation {
            safe,
            overall_risk,
            checks,
            warnings,
            requires_approval,
            approval_reason,
        }
    }

    fn check_rate_limit(&self) -> SafetyCheck {
        let mut state = self.state.lock();
        let hour_ago = Utc::now() - Duration::hours(1);
        state.action_history.retain(|t| *t > hour_ago);

        let recent = state.action_history.len();
        if recent >= self.config.max_actions_per_hour {
            return SafetyCheck {
                name: "rate_limit",
                passed: false,
                risk_level: RiskLevel::High,
                message: format!(
                    "Rate limit exceeded: {recent}/{} actions in last hour",
                    self.config.max_actions_per_hour
                ),
                blocking: true,
            };
        }

        SafetyCheck {
            name: "rate_limit",
            passed: true,
            risk_level: RiskLevel::None,
            message: format!("Rate limit OK: {recent}/{}", self.config.max_actions_per_hour),
            blocking: false,
        }
    }

    fn check_cooldown(&self, target: &KubernetesResource) -> SafetyCheck {
        let state = self.state.lock();
        if let Some(last_action) = state.recent_targets.get(&target.resource_key()) {
            let elapsed = (Utc::now() - *last_action).num_seconds();
            if elapsed < self.config.cooldown_seconds as i64 {
                let remaining = self.config.cooldown_seconds as i64 - elapsed;
                return SafetyCheck {
                    name: "cooldown",
                    passed: false,
                    risk_level: RiskLevel::Medium,
                    message: format!("Target in cooldown period, {remaining}s remaining"),
                    blocking: true,
                };
            }
        }

        SafetyCheck {
            name: "cooldown",
            passed: true,
            risk_level: RiskLevel::None,
            message: "No cooldown in effect".to_string(),
            blocking: false,
        }
    }

    fn check_protected_namespace(&self, target: &KubernetesResource) -> SafetyCheck {
        if self.protected_namespaces.contains(target.namespace.as_str()) {
            return SafetyCheck {
                name: "protected_namespace",
                passed: false,
                risk_level: RiskLevel::High,
                message: format!(
                    "Namespace {} is protected - requires approval",
                    target.namespace
                ),
                blocking: false,
            };
        }

        SafetyCheck {
            name: "protected_namespace",
            passed: true,
            risk_level: RiskLevel::None,
            message: "Namespace is not protected".to_string(),
            blocking: false,
        }
    }

    fn check_protected_workload(&self, target: &KubernetesResource) -> SafetyCheck {
        for (label_key, protected_values) in &self.protected_labels {
            if let Some(value) = target.labels.get(*label_key) {
                let value = value.to_lowercase();
                if protected_values.contains(value.as_str()) {
                    return SafetyCheck {
                        name: "protected_workload",
                        passed: false,
                        risk_level: RiskLevel::High,
                        message: format!("Workload has protected label: {label_key}={value}"),
                        blocking: false,
                    };
                }
            }
        }

        SafetyCheck {
            name: "protected_workload",
            passed: true,
            risk_level: RiskLevel::None,
            message: "Workload is not protected".to_string(),
            blocking: false,
        }
    }

    fn check_blast_radius(
        &self,
        action: RemediationAction,
        snapshot: &ClusterSnapshot,
    ) -> SafetyCheck {
        let (affected_pods, affected_nodes) = match action {
            RemediationAction::DrainNode | RemediationAction::CordonNode => {
                let pods_per_node = if snapshot.total_nodes > 0 {
                    snapshot.total_pods / snapshot.total_nodes
                } else {
                    snapshot.total_pods
                };
                (pods_per_node, 1usize)
            }
            _ => (1usize, 0usize),
        };

        let pod_percent = if snapshot.total_pods > 0 {
            affected_pods as f64 / snapshot.total_pods as f64 * 100.0
        } else {
            0.0
        };
        let node_percent = if snapshot.total_nodes > 0 {
            affected_nodes as f64 / snapshot.total_nodes as f64 * 100.0
        } else {
            0.0
        };

        if pod_percent > self.config.max_pods_affected_percent {
            return SafetyCheck {
                name: "blast_radius",
                passed: false,
                risk_level: RiskLevel::Critical,
                message: format!(
                    "Blast radius too high: {pod_percent:.1}% of pods affected (max {}%)",
                    self.config.max_pods_affected_percent
                ),
                blocking: true,
            };
        }

        if node_percent > self.config.max_nodes_affected_percent {
            return SafetyCheck {
                name: "blast_radius",
                passed: false,
                risk_level: RiskLevel::High,
                message: format!(
                    "Would affect {node_percent:.1}% of nodes (max {}%)",
                    self.config.max_nodes_affected_percent
                ),
                blocking: false,
            };
        }

        SafetyCheck {
            name: "blast_radius",
            passed: true,
            risk_level: if pod_percent > 5.0 {
                RiskLevel::Low
            } else {
                RiskLevel::None
            },
            message: format!("Blast radius acceptable: ~{pod_percent:.1}% pods"),
            blocking: false,
        }
    }

    fn check_resource_limits(
        &self,
        action: RemediationAction,
        parameters: &HashMap<String, serde_json::Value>,
    ) -> SafetyCheck {
        let param_u64 =
            |key: &str| parameters.get(key).and_then(serde_json::Value::as_u64);

        if action == RemediationAction::ScaleMemoryUp {
            let new_memory = param_u64("new_memory_bytes").unwrap_or(0);
            let max_memory =
                param_u64("max_allowed_memory_bytes").unwrap_or(DEFAULT_MAX_MEMORY_BYTES);
            if new_memory > max_memory {
                return SafetyCheck {
                    name: "resource_limits",
                    passed: false,
                    risk_level: RiskLevel::Medium,
                    message: format!(
                        "Requested memory {:.1}GB exceeds maximum {:.1}GB",
                        new_memory as f64 / (1u64 << 30) as f64,
                        max_memory as f64 / (1u64 << 30) as f64
                    ),
                    blocking: true,
                };
            }
        }

        if action == RemediationAction::ScaleReplicasUp {
            let new_replicas = param_u64("new_replicas").unwrap_or(0);
            let max_replicas = param_u64("max_replicas").unwrap_or(DEFAULT_MAX_REPLICAS);
            if new_replicas > max_replicas {
                return SafetyCheck {
                    name: "resource_limits",
                    passed: false,
                    risk_level: RiskLevel::Medium,
                    message: format!(
                        "Requested replicas {new_replicas} exceeds maximum {max_replicas}"
                    ),
                    blocking: true,
                };
            }
        }

        SafetyCheck {
            name: "resource_limits",
            passed: true,
            risk_level: RiskLevel::None,
            message: "Resource parameters within limits".to_string(),
            blocking: false,
        }
    }

    /// Record an executed action for rate limiting and cooldown tracking.
    /// Must be invoked exactly once per executed remediation.
    pub fn record_action(&self, target: &KubernetesResource) {
        let now = Utc::now();
        let key = target.resource_key();

        let mut state = self.state.lock();
        state.action_history.push(now);
        state.recent_targets.insert(key.clone(), now);

        info!("Recorded action on {}", key);
    }

    /// Actions recorded within the sliding hour window
    pub fn recent_action_count(&self) -> usize {
        let hour_ago = Utc::now() - Duration::hours(1);
        self.state
            .lock()
            .action_history
            .iter()
            .filter(|t| **t > hour_ago)
            .count()
    }
}
