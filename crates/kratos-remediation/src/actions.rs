//! Action library: translates remediations into orchestrator operations
//!
//! The orchestrator client is an injected interface; the platform supplies a
//! real implementation, tests supply doubles, and the [`NullOrchestrator`]
//! succeeds without side effects when no cluster is attached.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kratos_common::{Error, Remediation, RemediationAction, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// A single mutation applied to a deployment
#[derive(Debug, Clone, PartialEq)]
pub enum DeploymentPatch {
    MemoryLimitBytes(u64),
    CpuLimitCores(f64),
    ReplicasDelta(i64),
    /// Bump the pod template restart annotation to roll the deployment back
    RestartTemplate { at: DateTime<Utc> },
}

/// The mutating subset of the orchestrator API the engine depends on.
/// Listing/watching lives on the observation side.
#[async_trait]
pub trait OrchestratorClient: Send + Sync {
    async fn delete_pod(&self, namespace: &str, name: &str, grace_period_seconds: i64)
        -> Result<()>;

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: DeploymentPatch,
    ) -> Result<()>;

    async fn set_node_schedulable(&self, node_name: &str, schedulable: bool) -> Result<()>;
}

/// Orchestrator stand-in that accepts every operation without touching a
/// cluster
pub struct NullOrchestrator;

#[async_trait]
impl OrchestratorClient for NullOrchestrator {
    async fn delete_pod(
        &self,
        namespace: &str,
        name: &str,
        _grace_period_seconds: i64,
    ) -> Result<()> {
        debug!("No orchestrator attached; delete_pod {}/{} accepted", namespace, name);
        Ok(())
    }

    async fn patch_deployment(
        &self,
        namespace: &str,
        name: &str,
        patch: DeploymentPatch,
    ) -> Result<()> {
        debug!(
            "No orchestrator attached; patch_deployment {}/{} {:?} accepted",
            namespace, name, patch
        );
        Ok(())
    }

    async fn set_node_schedulable(&self, node_name: &str, schedulable: bool) -> Result<()> {
        debug!(
            "No orchestrator attached; set_node_schedulable {} -> {} accepted",
            node_name, schedulable
        );
        Ok(())
    }
}

/// Dispatches remediation actions to the orchestrator client.
///
/// One executor, one match on the action tag; handlers share the uniform
/// `(remediation) -> bool` contract.
pub struct ActionLibrary {
    client: Arc<dyn OrchestratorClient>,
}

impl ActionLibrary {
    pub fn new(client: Arc<dyn OrchestratorClient>) -> Self {
        ActionLibrary { client }
    }

    /// Whether a handler exists for this action
    pub fn supports(action: RemediationAction) -> bool {
        matches!(
            action,
            RemediationAction::ScaleMemoryUp
                | RemediationAction::ScaleMemoryDown
                | RemediationAction::ScaleCpuUp
                | RemediationAction::ScaleCpuDown
                | RemediationAction::ScaleReplicasUp
                | RemediationAction::ScaleReplicasDown
                | RemediationAction::RestartPod
                | RemediationAction::DeletePod
                | RemediationAction::RollbackDeployment
                | RemediationAction::CordonNode
                | RemediationAction::NotifyOnly
        )
    }

    /// Execute the remediation's action. Returns whether the handler
    /// considered the operation successful.
    pub async fn execute(&self, remediation: &Remediation) -> Result<bool> {
        if remediation.action == RemediationAction::NotifyOnly {
            let summary = remediation
                .explanation
                .as_ref()
                .map(|e| e.summary.as_str())
                .unwrap_or("Alert");
            info!("Notification: {}", summary);
            return Ok(true);
        }

        let target = remediation.target_resource.as_ref().ok_or_else(|| {
            Error::Remediation(format!(
                "Action {} has no target resource",
                remediation.action
            ))
        })?;

        let param_u64 = |key: &str| {
            remediation
                .parameters
                .get(key)
                .and_then(serde_json::Value::as_u64)
        };

        match remediation.action {
            RemediationAction::ScaleMemoryUp | RemediationAction::ScaleMemoryDown => {
                let new_memory = param_u64("new_memory_bytes").ok_or_else(|| {
                    Error::Remediation("Missing parameter new_memory_bytes".to_string())
                })?;
                info!(
                    "Scaling memory for {} to {}Mi",
                    target.resource_key(),
                    new_memory / (1 << 20)
                );
                self.client
                    .patch_deployment(
                        &target.namespace,
                        &target.name,
                        DeploymentPatch::MemoryLimitBytes(new_memory),
                    )
                    .await?;
            }
            RemediationAction::ScaleCpuUp | RemediationAction::ScaleCpuDown => {
                let new_cpu = remediation
                    .parameters
                    .get("new_cpu_cores")
                    .and_then(serde_json::Value::as_f64)
                    .ok_or_else(|| {
                        Error::Remediation("Missing parameter new_cpu_cores".to_string())
                    })?;
                self.client
                    .patch_deployment(
                        &target.namespace,
                        &target.name,
                        DeploymentPatch::CpuLimitCores(new_cpu),
                    )
                    .await?;
            }
            RemediationAction::ScaleReplicasUp => {
                let delta = param_u64("increase_by").unwrap_or(1) as i64;
                self.client
                    .patch_deployment(
                        &target.namespace,
                        &target.name,
                        DeploymentPatch::ReplicasDelta(delta),
                    )
                    .await?;
            }
            RemediationAction::ScaleReplicasDown => {
                let delta = param_u64("decrease_by").unwrap_or(1) as i64;
                self.client
                    .patch_deployment(
                        &target.namespace,
                        &target.name,
                        DeploymentPatch::ReplicasDelta(-delta),
                    )
                    .await?;
            }
            RemediationAction::RestartPod => {
                // delete and let the owning controller reschedule
                self.client
                    .delete_pod(&target.namespace, &target.name, 30)
                    .await?;
            }
            RemediationAction::DeletePod => {
                self.client
                    .delete_pod(&target.namespace, &target.name, 30)
                    .await?;
            }
            RemediationAction::RollbackDeployment => {
                self.client
                    .patch_deployment(
                        &target.namespace,
                        &target.name,
                        DeploymentPatch::RestartTemplate { at: Utc::now() },
                    )
                    .await?;
            }
            RemediationAction::CordonNode => {
                self.client.set_node_schedulable(&target.name, false).await?;
            }
            other => {
                return Err(Error::Remediation(format!("No handler for action {other}")));
            }
        }

        Ok(true)
    }
}
