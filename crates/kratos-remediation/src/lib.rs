//! Remediation engine and safety validation for the Kratos core
//!
//! Plans corrective actions from incidents and predictions, gates every
//! plan through the safety validator, executes through the orchestrator
//! client, and pairs reversible actions with their rollbacks.

pub mod actions;
pub mod engine;
pub mod safety;

pub use actions::{ActionLibrary, DeploymentPatch, NullOrchestrator, OrchestratorClient};
pub use engine::{RemediationEngine, RemediationPlan};
pub use safety::{ClusterSnapshot, RiskLevel, SafetyCheck, SafetyValidation, SafetyValidator};
