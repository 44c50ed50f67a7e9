//! Configuration for the Kratos core

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KratosConfig {
    /// Seconds between observation loop cycles
    pub observe_interval_seconds: u64,
    /// Seconds between prediction loop cycles
    pub predict_interval_seconds: u64,
    /// Minimum ensemble probability before a prediction becomes active
    pub prediction_threshold: f64,
    /// Minimum ensemble probability before a preemptive plan may auto-execute
    pub auto_remediate_threshold: f64,
    pub knowledge: KnowledgeConfig,
    pub remediation: RemediationConfig,
}

impl Default for KratosConfig {
    fn default() -> Self {
        KratosConfig {
            observe_interval_seconds: 30,
            predict_interval_seconds: 60,
            prediction_threshold: 0.7,
            auto_remediate_threshold: 0.85,
            knowledge: KnowledgeConfig::default(),
            remediation: RemediationConfig::default(),
        }
    }
}

impl KratosConfig {
    /// Parse configuration from a TOML document; loading the file is the
    /// caller's responsibility
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Configuration(e.to_string()))
    }
}

/// Knowledge base configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    /// Directory holding incidents.jsonl and patterns.json
    pub storage_path: PathBuf,
    /// Fingerprint bucket size that triggers pattern induction
    pub min_occurrences_for_pattern: usize,
    /// Similarity lookups ignore incidents older than this
    pub max_age_days: i64,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        KnowledgeConfig {
            storage_path: PathBuf::from("/var/lib/kratos-ai/knowledge"),
            min_occurrences_for_pattern: 3,
            max_age_days: 90,
        }
    }
}

/// Remediation engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediationConfig {
    /// Skip all handlers and record DRY_RUN outcomes
    pub dry_run: bool,
    pub safety: SafetyConfig,
}

impl Default for RemediationConfig {
    fn default() -> Self {
        RemediationConfig {
            dry_run: false,
            safety: SafetyConfig::default(),
        }
    }
}

/// Safety validator limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub max_pods_affected_percent: f64,
    pub max_nodes_affected_percent: f64,
    pub max_actions_per_hour: usize,
    pub cooldown_seconds: u64,
    /// Pending approvals older than this are expired to SKIPPED
    pub pending_approval_ttl_seconds: u64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        SafetyConfig {
            max_pods_affected_percent: 25.0,
            max_nodes_affected_percent: 10.0,
            max_actions_per_hour: 20,
            cooldown_seconds: 60,
            pending_approval_ttl_seconds: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let config = KratosConfig::default();
        assert_eq!(config.observe_interval_seconds, 30);
        assert_eq!(config.predict_interval_seconds, 60);
        assert_eq!(config.prediction_threshold, 0.7);
        assert_eq!(config.auto_remediate_threshold, 0.85);
        assert_eq!(config.remediation.safety.max_actions_per_hour, 20);
        assert_eq!(config.remediation.safety.cooldown_seconds, 60);
        assert_eq!(config.knowledge.min_occurrences_for_pattern, 3);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let raw = r#"
            observe_interval_seconds = 10

            [remediation.safety]
            max_actions_per_hour = 5
        "#;
        let config = KratosConfig::from_toml_str(raw).unwrap();
        assert_eq!(config.observe_interval_seconds, 10);
        assert_eq!(config.remediation.safety.max_actions_per_hour, 5);
        // untouched keys keep their defaults
        assert_eq!(config.predict_interval_seconds, 60);
        assert_eq!(config.remediation.safety.cooldown_seconds, 60);
    }

    #[test]
    fn invalid_toml_is_a_configuration_error() {
        let err = KratosConfig::from_toml_str("not = [valid").unwrap_err();
        assert_matches::assert_matches!(err, Error::Configuration(_));
        assert_eq!(err.category(), "configuration");
    }
}
