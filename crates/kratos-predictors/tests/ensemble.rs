//! Integration tests for the prediction ensemble

use chrono::{Duration, Utc};
use kratos_predictors::{FailurePredictor, FeatureMap, Predictor, TrainingSample};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

fn sample(memory_usage: f64, restart_count: f64, offset_seconds: i64) -> TrainingSample {
    let features: FeatureMap = [
        ("cpu_usage_cores".to_string(), 0.3),
        ("cpu_limit_cores".to_string(), 1.0),
        ("memory_usage_bytes".to_string(), memory_usage),
        ("memory_limit_bytes".to_string(), GIB),
        ("restart_count".to_string(), restart_count),
    ]
    .into_iter()
    .collect();
    TrainingSample::new(Utc::now() - Duration::seconds(offset_seconds), features)
}

#[test]
fn agreement_between_signals_boosts_probability() {
    let mut predictor = FailurePredictor::new(None);

    // 50 samples, 30s apart: restart count flat, memory climbing steadily
    // toward ~93% of the limit.
    let samples: Vec<TrainingSample> = (0..50)
        .map(|i| {
            let memory = 0.895 * GIB + i as f64 * 0.00075 * GIB;
            sample(memory, 1.0, (50 - i) as i64 * 30)
        })
        .collect();
    predictor.train(&samples);

    // Final observation: memory keeps the trend, restart count spikes.
    let mut features = samples[samples.len() - 1].features.clone();
    features.insert(
        "memory_usage_bytes".to_string(),
        0.895 * GIB + 50.0 * 0.00075 * GIB,
    );
    features.insert("restart_count".to_string(), 5.0);

    let signal = predictor.predict(&features);

    assert!(signal.predicted, "evidence: {:?}", signal.evidence);
    // weighted floor from the scenario: (0.3*0.55 + 0.4*0.7 + 0.3*0) * 1.3
    assert!(
        signal.probability >= 0.57,
        "probability {} too low; evidence: {:?}",
        signal.probability,
        signal.evidence
    );
    assert!(signal.probability <= 0.98);
    assert!(signal.eta_seconds.is_some());
    assert!(signal
        .evidence
        .iter()
        .any(|e| e.starts_with("[Ensemble]") && e.contains("agree")));
    assert!(signal.evidence.iter().any(|e| e.starts_with("[Anomaly]")));
    assert!(signal.evidence.iter().any(|e| e.starts_with("[Forecast]")));
}

#[test]
fn single_signal_is_not_boosted() {
    let mut predictor = FailurePredictor::new(None);

    // Flat, healthy history: no forecast breach, no anomaly.
    let samples: Vec<TrainingSample> = (0..50)
        .map(|i| sample(0.4 * GIB, 1.0, (50 - i) as i64 * 30))
        .collect();
    predictor.train(&samples);

    // Spike only the restart count; memory stays far from its limit.
    let mut features = samples[samples.len() - 1].features.clone();
    features.insert("restart_count".to_string(), 5.0);

    let signal = predictor.predict(&features);

    // anomaly alone contributes at most 0.3 * 0.95
    assert!(signal.probability <= 0.3 * 0.95 + 0.4 * 0.1 + 1e-9);
    assert!(!signal
        .evidence
        .iter()
        .any(|e| e.starts_with("[Ensemble]")));
}

#[test]
fn ensemble_eta_is_the_minimum_across_signals() {
    let mut predictor = FailurePredictor::new(None);

    let samples: Vec<TrainingSample> = (0..50)
        .map(|i| {
            let memory = 0.895 * GIB + i as f64 * 0.00075 * GIB;
            sample(memory, 1.0, (50 - i) as i64 * 30)
        })
        .collect();
    predictor.train(&samples);

    let mut features = samples[samples.len() - 1].features.clone();
    features.insert("restart_count".to_string(), 5.0);

    let signal = predictor.predict(&features);
    // anomaly ETA (300s) undercuts the slow memory breach estimate
    assert_eq!(signal.eta_seconds, Some(300.0));
}
