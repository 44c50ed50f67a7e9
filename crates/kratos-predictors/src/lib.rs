//! Failure prediction models for the Kratos core
//!
//! Three signals feed the decision pipeline: a rolling-window anomaly
//! detector, a Holt linear-trend forecaster, and a knowledge-base pattern
//! signal. The [`FailurePredictor`] ensemble combines them with calibrated
//! weights.

pub mod anomaly;
pub mod ensemble;
pub mod forecast;

pub use anomaly::AnomalyDetector;
pub use ensemble::{EnsembleWeights, FailurePredictor};
pub use forecast::TimeSeriesForecaster;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Numeric feature snapshot fed into the predictors
pub type FeatureMap = HashMap<String, f64>;

/// A timestamped feature snapshot used for bulk training
#[derive(Debug, Clone)]
pub struct TrainingSample {
    pub timestamp: DateTime<Utc>,
    pub features: FeatureMap,
}

impl TrainingSample {
    pub fn new(timestamp: DateTime<Utc>, features: FeatureMap) -> Self {
        TrainingSample {
            timestamp,
            features,
        }
    }
}

/// Result from a prediction model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionSignal {
    /// Whether an incident is predicted
    pub predicted: bool,
    /// Probability of an incident, 0 to 1
    pub probability: f64,
    /// Estimated seconds until the incident, when one is predicted
    pub eta_seconds: Option<f64>,
    /// Model confidence in this signal, 0 to 1
    pub confidence: f64,
    /// Evidence supporting the signal
    pub evidence: Vec<String>,
    pub model_name: String,
    pub model_version: String,
    pub computed_at: DateTime<Utc>,
}

/// Model metadata snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub version: String,
    pub is_trained: bool,
    pub last_trained_at: Option<DateTime<Utc>>,
    pub training_samples: usize,
}

/// Common surface for all prediction models
pub trait Predictor {
    /// Ingest historical samples
    fn train(&mut self, samples: &[TrainingSample]);

    /// Produce a signal from the current features, updating rolling state
    fn predict(&mut self, features: &FeatureMap) -> PredictionSignal;

    /// Model metadata
    fn info(&self) -> ModelInfo;
}
