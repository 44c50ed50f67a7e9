//! Statistical anomaly detection over rolling metric windows

use crate::{FeatureMap, ModelInfo, PredictionSignal, Predictor, TrainingSample};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use tracing::info;

const MODEL_NAME: &str = "anomaly_detector";
const MODEL_VERSION: &str = "1.0.0";

const WINDOW_SIZE: usize = 100;
const MIN_SAMPLES_FOR_STATS: usize = 5;
const MIN_SAMPLES_FOR_SCORING: usize = 10;
/// Z-score at which a feature counts as anomalous
const ANOMALY_THRESHOLD: f64 = 3.0;
/// Z-score at which a feature is merely elevated
const WARNING_THRESHOLD: f64 = 2.0;
/// Default warning horizon once an anomaly fires
const ANOMALY_ETA_SECONDS: f64 = 300.0;

#[derive(Debug, Clone)]
struct MetricStats {
    mean: f64,
    std: f64,
    samples: usize,
}

/// Detects unusual metric values by z-score against a rolling window of the
/// last 100 observations per feature.
pub struct AnomalyDetector {
    windows: HashMap<String, VecDeque<f64>>,
    stats: HashMap<String, MetricStats>,
    is_trained: bool,
    last_trained_at: Option<DateTime<Utc>>,
    training_samples: usize,
}

impl AnomalyDetector {
    pub fn new() -> Self {
        AnomalyDetector {
            windows: HashMap::new(),
            stats: HashMap::new(),
            is_trained: false,
            last_trained_at: None,
            training_samples: 0,
        }
    }

    fn update_stats(&mut self, metric_name: &str, value: f64) {
        let window = self
            .windows
            .entry(metric_name.to_string())
            .or_insert_with(|| VecDeque::with_capacity(WINDOW_SIZE));
        if window.len() == WINDOW_SIZE {
            window.pop_front();
        }
        window.push_back(value);

        if window.len() >= MIN_SAMPLES_FOR_STATS {
            let n = window.len() as f64;
            let mean = window.iter().sum::<f64>() / n;
            let variance = window.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            // floor the deviation so z-scores stay finite on flat series
            let std = variance.sqrt().max(0.001);
            self.stats.insert(
                metric_name.to_string(),
                MetricStats {
                    mean,
                    std,
                    samples: window.len(),
                },
            );
        }
    }
}

impl Default for AnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl Predictor for AnomalyDetector {
    fn train(&mut self, samples: &[TrainingSample]) {
        for sample in samples {
            let mut names: Vec<&String> = sample.features.keys().collect();
            names.sort();
            for name in names {
                self.update_stats(name, sample.features[name]);
            }
        }

        self.is_trained = true;
        self.last_trained_at = Some(Utc::now());
        self.training_samples = samples.len();

        info!(
            "AnomalyDetector trained on {} samples, {} metrics",
            samples.len(),
            self.stats.len()
        );
    }

    fn predict(&mut self, features: &FeatureMap) -> PredictionSignal {
        let mut anomalies = 0usize;
        let mut max_z_score: f64 = 0.0;
        let mut evidence = Vec::new();

        let mut names: Vec<&String> = features.keys().collect();
        names.sort();

        for name in names {
            let value = features[name];
            self.update_stats(name, value);

            let stats = match self.stats.get(name.as_str()) {
                Some(stats) if stats.samples >= MIN_SAMPLES_FOR_SCORING => stats,
                _ => continue,
            };

            let z_score = (value - stats.mean).abs() / stats.std;
            max_z_score = max_z_score.max(z_score);

            if z_score >= ANOMALY_THRESHOLD {
                anomalies += 1;
                evidence.push(format!(
                    "{}={:.2} is {:.1}σ from mean {:.2}",
                    name, value, z_score, stats.mean
                ));
            } else if z_score >= WARNING_THRESHOLD {
                evidence.push(format!(
                    "{}={:.2} is elevated ({:.1}σ from normal)",
                    name, value, z_score
                ));
            }
        }

        let is_anomaly = anomalies > 0;
        let probability = if max_z_score >= ANOMALY_THRESHOLD {
            (0.5 + (max_z_score - ANOMALY_THRESHOLD) * 0.15).min(0.95)
        } else if max_z_score >= WARNING_THRESHOLD {
            0.3 + (max_z_score - WARNING_THRESHOLD) * 0.2
        } else {
            max_z_score * 0.15
        };

        PredictionSignal {
            predicted: is_anomaly,
            probability,
            eta_seconds: is_anomaly.then_some(ANOMALY_ETA_SECONDS),
            confidence: (self.training_samples as f64 / 100.0).min(1.0),
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

    fn features(value: f64) -> FeatureMap {
        [("cpu_usage_cores".to_string(), value)].into_iter().collect()
    }

    fn steady_samples(count: usize, value: f64) -> Vec<TrainingSample> {
        (0..count)
            .map(|_| TrainingSample::new(Utc::now(), features(value)))
            .collect()
    }

    #[test]
    fn steady_metrics_are_not_anomalous() {
        let mut detector = AnomalyDetector::new();
        detector.train(&steady_samples(50, 0.5));

        let signal = detector.predict(&features(0.5));
        assert!(!signal.predicted);
        assert!(signal.probability < 0.3);
        assert!(signal.eta_seconds.is_none());
    }

    #[test]
    fn large_deviation_fires_with_high_probability() {
        let mut detector = AnomalyDetector::new();
        // alternate slightly so the window has nonzero spread
        let samples: Vec<TrainingSample> = (0..60)
            .map(|i| TrainingSample::new(Utc::now(), features(0.5 + (i % 2) as f64 * 0.01)))
            .collect();
        detector.train(&samples);

        let signal = detector.predict(&features(5.0));
        assert!(signal.predicted);
        assert!(signal.probability >= 0.5);
        assert!(signal.probability <= 0.95);
        assert_eq!(signal.eta_seconds, Some(300.0));
        assert!(!signal.evidence.is_empty());
    }

    #[test]
    fn too_few_samples_yield_no_score() {
        let mut detector = AnomalyDetector::new();
        detector.train(&steady_samples(4, 0.5));

        let signal = detector.predict(&features(100.0));
        assert!(!signal.predicted);
        assert_eq!(signal.probability, 0.0);
    }

    #[test]
    fn confidence_grows_with_training_volume() {
        let mut detector = AnomalyDetector::new();
        detector.train(&steady_samples(25, 1.0));
        assert_eq!(detector.predict(&features(1.0)).confidence, 0.25);

        detector.train(&steady_samples(200, 1.0));
        assert_eq!(detector.predict(&features(1.0)).confidence, 1.0);
    }

    #[test]
    fn window_is_bounded() {
        let mut detector = AnomalyDetector::new();
        detector.train(&steady_samples(300, 1.0));
        assert_eq!(detector.windows["cpu_usage_cores"].len(), WINDOW_SIZE);
    }
}
