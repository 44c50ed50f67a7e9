//! Component health reporting

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Health levels for components
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Critical,
    Unknown,
}

/// Point-in-time health snapshot for a single component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthLevel,
    pub message: String,
    pub last_check: DateTime<Utc>,
    pub metrics: HashMap<String, f64>,
}

impl ComponentHealth {
    pub fn healthy(message: impl Into<String>) -> Self {
        ComponentHealth {
            status: HealthLevel::Healthy,
            message: message.into(),
            last_check: Utc::now(),
            metrics: HashMap::new(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        ComponentHealth {
            status: HealthLevel::Degraded,
            message: message.into(),
            last_check: Utc::now(),
            metrics: HashMap::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: HashMap<String, f64>) -> Self {
        self.metrics = metrics;
        self
    }
}
