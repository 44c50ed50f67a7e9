//! Ensemble failure predictor
//!
//! Combines the anomaly detector, the time-series forecaster and the
//! knowledge-base pattern signal with calibrated weights. Agreement between
//! signals boosts the combined probability.

use crate::{
    AnomalyDetector, FeatureMap, ModelInfo, PredictionSignal, Predictor, TimeSeriesForecaster,
    TrainingSample,
};
use chrono::Utc;
use kratos_knowledge::KnowledgeBase;
use std::sync::Arc;
use tracing::info;

const MODEL_NAME: &str = "failure_predictor";
const MODEL_VERSION: &str = "1.0.0";

/// Threshold above which the pattern signal counts as triggered
const PATTERN_TRIGGER_THRESHOLD: f64 = 0.5;
/// Probability multiplier when at least two signals agree
const AGREEMENT_BOOST: f64 = 1.3;
/// Ceiling applied after the agreement boost
const BOOSTED_PROBABILITY_CAP: f64 = 0.98;

/// Static ensemble weights over the three signals. They must sum to 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleWeights {
    pub anomaly: f64,
    pub time_series: f64,
    pub pattern: f64,
}

impl EnsembleWeights {
    pub fn sum(&self) -> f64 {
        self.anomaly + self.time_series + self.pattern
    }
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        EnsembleWeights {
            anomaly: 0.3,
            time_series: 0.4,
            pattern: 0.3,
        }
    }
}

/// Main failure prediction model combining multiple signals
pub struct FailurePredictor {
    anomaly_detector: AnomalyDetector,
    forecaster: TimeSeriesForecaster,
    knowledge_base: Option<Arc<KnowledgeBase>>,
    weights: EnsembleWeights,
    is_trained: bool,
    last_trained_at: Option<chrono::DateTime<Utc>>,
    training_samples: usize,
}

impl FailurePredictor {
    pub fn new(knowledge_base: Option<Arc<KnowledgeBase>>) -> Self {
        let weights = EnsembleWeights::default();
        assert!(
            (weights.sum() - 1.0).abs() < 1e-9,
            "ensemble weights must sum to 1"
        );
        FailurePredictor {
            anomaly_detector: AnomalyDetector::new(),
            forecaster: TimeSeriesForecaster::new(),
            knowledge_base,
            weights,
            is_trained: false,
            last_trained_at: None,
            training_samples: 0,
        }
    }

    pub fn weights(&self) -> EnsembleWeights {
        self.weights
    }

    /// Pattern signal from the knowledge base.
    ///
    /// Feature-level pattern matching has no defined contract yet, so the
    /// signal stays neutral; the weighted term is kept so the combination is
    /// ready once matching lands.
    fn check_patterns(&self, _features: &FeatureMap) -> (f64, Vec<String>) {
        if self.knowledge_base.is_none() {
            return (0.0, Vec::new());
        }
        (0.0, Vec::new())
    }
}

impl Predictor for FailurePredictor {
    fn train(&mut self, samples: &[TrainingSample]) {
        self.anomaly_detector.train(samples);
        self.forecaster.train(samples);

        self.is_trained = true;
        self.last_trained_at = Some(Utc::now());
        self.training_samples = samples.len();

        info!("FailurePredictor ensemble trained on {} samples", samples.len());
    }

    fn predict(&mut self, features: &FeatureMap) -> PredictionSignal {
        let mut evidence = Vec::new();

        let anomaly_result = self.anomaly_detector.predict(features);
        evidence.extend(anomaly_result.evidence.iter().map(|e| format!("[Anomaly] {e}")));

        let forecast_result = self.forecaster.predict(features);
        evidence.extend(forecast_result.evidence.iter().map(|e| format!("[Forecast] {e}")));

        let (pattern_probability, pattern_evidence) = self.check_patterns(features);
        evidence.extend(pattern_evidence.iter().map(|e| format!("[Pattern] {e}")));

        let mut weighted_probability = self.weights.anomaly * anomaly_result.probability
            + self.weights.time_series * forecast_result.probability
            + self.weights.pattern * pattern_probability;

        let signals_triggered = [
            anomaly_result.predicted,
            forecast_result.predicted,
            pattern_probability > PATTERN_TRIGGER_THRESHOLD,
        ]
        .iter()
        .filter(|triggered| **triggered)
        .count();

        if signals_triggered >= 2 {
            weighted_probability = (weighted_probability * AGREEMENT_BOOST).min(BOOSTED_PROBABILITY_CAP);
            evidence.push(format!(
                "[Ensemble] {signals_triggered}/3 predictors agree - high confidence"
            ));
        }

        let mut eta = forecast_result.eta_seconds;
        if let Some(anomaly_eta) = anomaly_result.eta_seconds {
            if eta.map(|e| anomaly_eta < e).unwrap_or(true) {
                eta = Some(anomaly_eta);
            }
        }

        PredictionSignal {
            predicted: weighted_probability > 0.5,
            probability: weighted_probability,
            eta_seconds: eta,
            confidence: anomaly_result.confidence.min(forecast_result.confidence),
            evidence,
            model_name: MODEL_NAME.to_string(),
            model_version: MODEL_VERSION.to_string(),
            computed_at: Utc::now(),
        }
    }

    fn info(&self) -> ModelInfo {
        ModelInfo {
            name: MODEL_NAME.to_string(),
            version: MODEL_VERSION.to_string(),
            is_trained: self.is_trained,
            last_trained_at: self.last_trained_at,
            training_samples: self.training_samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_one() {
        let predictor = FailurePredictor::new(None);
        assert!((predictor.weights().sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn quiet_features_stay_below_threshold() {
        let mut predictor = FailurePredictor::new(None);
        let features: FeatureMap = [
            ("cpu_usage_cores".to_string(), 0.2),
            ("cpu_limit_cores".to_string(), 1.0),
            ("memory_usage_bytes".to_string(), 1e8),
            ("memory_limit_bytes".to_string(), 1e9),
        ]
        .into_iter()
        .collect();

        for _ in 0..30 {
            predictor.predict(&features);
        }
        let signal = predictor.predict(&features);
        assert!(!signal.predicted);
        assert!(signal.probability < 0.5);
    }

    #[test]
    fn pattern_signal_is_neutral() {
        let predictor = FailurePredictor::new(None);
        let (probability, evidence) = predictor.check_patterns(&FeatureMap::new());
        assert_eq!(probability, 0.0);
        assert!(evidence.is_empty());
    }
}
