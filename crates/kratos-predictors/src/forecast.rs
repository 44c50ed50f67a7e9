//! Time-series forecasting for resource breach prediction

use crate::{FeatureMap, ModelInfo, PredictionSignal, Predictor, TrainingSample};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::info;

const MODEL_NAME: &str = "time_series_forecaster";
const MODEL_VERSION: &str = "1.0.0";

/// Level smoothing factor
const ALPHA: f64 = 0.3;
/// Trend smoothing factor
const BETA: f64 = 0.1;
const MAX_HISTORY_POINTS: usize = 500;
const MIN_POINTS_FOR_FORECAST: usize = 10;
/// How far ahead breach checks look
const FORECAST_HORIZON_SECONDS: f64 = 1800.0;
/// Fallback spacing when a series carries no usable interval
const DEFAULT_INTERVAL_SECONDS: f64 = 60.0;

/// Predicts future resource usage with Holt linear trend smoothing and
/// estimates when configured limits will be breached.
pub struct TimeSeriesForecaster {
    series: HashMap<String, Vec<(DateTime<Utc>, f64)>>,
    is_trained: bool,
    last_trained_at: Option<DateTime<Utc>>,
    training_samples: usize,
}

impl TimeSeriesForecaster {
    pub fn new() -> Self {
        TimeSeriesForecaster {
            series: HashMap::new(),
            is_trained: false,
            last_trained_at: None,
            training_samples: 0,
        }
    }

    fn add_datapoint(&mut self, metric_name: &str, timestamp: DateTime<Utc>, value: f64) {
        let series = self.series.entry(metric_name.to_string()).or_default();
        series.push((timestamp, value));
        if series.len() > MAX_HISTORY_POINTS {
            let excess = series.len() - MAX_HISTORY_POINTS;
            series.drain(..excess);
        }
    }

    fn average_interval(data: &[(DateTime<Utc>, f64)]) -> f64 {
        if data.len() >= 2 {
            let total_seconds = (data[data.len() - 1].0 - data[0].0).num_milliseconds() as f64
                / 1000.0;
            total_seconds / (data.len() - 1) as f64
        } else {
            DEFAULT_INTERVAL_SECONDS
        }
    }

    /// Forecast a metric at the given horizon using Holt linear trend.
    ///
    /// Returns `(predicted, lower, upper)`. A series with fewer than 10
    /// points returns the last observed value with zero spread.
    pub fn forecast(&self, metric_name: &str, horizon_seconds: f64) -> (f64, f64, f64) {
        let data = match self.series.get(metric_name) {
            Some(data) => data,
            None => return (0.0, 0.0, 0.0),
        };
        if data.len() < MIN_POINTS_FOR_FORECAST {
            let last = data.last().map(|(_, v)| *v).unwrap_or(0.0);
            return (last, last, last);
        }

        let values: Vec<f64> = data.iter().map(|(_, v)| *v).collect();

        let mut level = values[0];
        let mut trend = (values[values.len() - 1] - values[0]) / values.len() as f64;
        for value in &values {
            let prev_level = level;
            level = ALPHA * value + (1.0 - ALPHA) * (level + trend);
            trend = BETA * (level - prev_level) + (1.0 - BETA) * trend;
        }

        let avg_interval = Self::average_interval(data);
        let steps = if avg_interval > 0.0 {
            horizon_seconds / avg_interval
        } else {
            1.0
        };
        let forecast = level + trend * steps;

        let tail_start = data.len().saturating_sub(20);
        let residuals: Vec<f64> = data[tail_start..]
            .iter()
            .enumerate()
            .map(|(i, (_, v))| (v - (level + trend * i as f64)).abs())
            .collect();
        if residuals.is_empty() {
            (forecast, forecast * 0.9, forecast * 1.1)
        } else {
            let std_error = residuals.iter().sum::<f64>() / residuals.len() as f64;
            (
                forecast,
                forecast - 1.96 * std_error,
                forecast + 1.96 * std_error,
            )
        }
    }

    /// Estimate seconds until a metric crosses `limit`.
    ///
    /// Uses the linear growth rate over the last 10 points; returns `None`
    /// when the metric is not growing and `Some(0)` when already breached.
    pub fn estimate_breach_time(&self, metric_name: &str, limit: f64) -> Option<f64> {
        let data = self.series.get(metric_name)?;
        if data.len() < 2 {
            return None;
        }

        let tail_start = data.len().saturating_sub(10);
        let values: Vec<f64> = data[tail_start..].iter().map(|(_, v)| *v).collect();
        if values.len() < 2 {
            return None;
        }

        let growth_rate = (values[values.len() - 1] - values[0]) / values.len() as f64;
        if growth_rate <= 0.0 {
            return None;
        }

        let current = values[values.len() - 1];
        let remaining = limit - current;
        if remaining <= 0.0 {
            return Some(0.0);
        }

        let intervals_to_breach = remaining / growth_rate;
        Some(intervals_to_breach * Self::average_interval(data))
    }
}

impl Default for TimeSeriesForecaster {
    fn default() -> Self {
        Self::new()
    }
}

struct BreachPrediction {
    probability: f64,
    eta_seconds: Option<f64>,
}

impl Predictor for TimeSeriesForecaster {
    fn train(&mut self, samples: &[TrainingSample]) {
        for sample in samples {
            let mut names: Vec<&String> = sample.features.keys().collect();
            names.sort();
            for name in names {
                self.add_datapoint(name, sample.timestamp, sample.features[name]);
            }
        }

        self.is_trained = true;
        self.last_trained_at = Some(Utc::now());
        self.training_samples = samples.len();

        info!("TimeSeriesForecaster trained on {} samples", samples.len());
    }

    fn predict(&mut self, features: &FeatureMap) -> PredictionSignal {
        let now = Utc::now();
        let mut names: Vec<&String> = features.keys().collect();
        names.sort();
        for name in names {
            self.add_datapoint(name, now, features[name]);
        }

        let mut evidence = Vec::new();
        let mut breaches: Vec<BreachPrediction> = Vec::new();

        let memory_usage = features.get("memory_usage_bytes").copied().unwrap_or(0.0);
        let memory_limit = features.get("memory_limit_bytes").copied().unwrap_or(0.0);
        if memory_limit > 0.0 {
            let (forecast, _, _) = self.forecast("memory_usage_bytes", FORECAST_HORIZON_SECONDS);
            let utilization_forecast = (forecast / memory_limit) * 100.0;
            if utilization_forecast >= 95.0 {
                breaches.push(BreachPrediction {
                    probability: ((utilization_forecast - 90.0) / 10.0).min(0.95),
                    eta_seconds: self.estimate_breach_time("memory_usage_bytes", memory_limit),
                });
                evidence.push(format!(
                    "Memory forecast: {:.1}% in 30min (currently {:.1}%)",
                    utilization_forecast,
                    (memory_usage / memory_limit) * 100.0
                ));
            }
        }

        let cpu_usage = features.get("cpu_usage_cores").copied().unwrap_or(0.0);
        let cpu_limit = features.get("cpu_limit_cores").copied().unwrap_or(0.0);
        if cpu_limit > 0.0 {
            let (forecast, _, _) = self.forecast("cpu_usage_cores", FORECAST_HORIZON_SECONDS);
            let utilization_forecast = (forecast / cpu_limit) * 100.0;
            if utilization_forecast >= 90.0 {
                breaches.push(BreachPrediction {
                    probability: ((utilization_forecast - 85.0) / 15.0).min(0.9),
                    eta_seconds: self.estimate_breach_time("cpu_usage_cores", cpu_limit),
                });
                evidence.push(format!(
                    "CPU forecast: {:.1}% in 30min (currently {:.1}%)",
                    utilization_forecast,
                    (cpu_usage / cpu_limit) * 100.0
                ));
            }
        }

        if let Some(worst) = breaches
            .into_iter()
            .max_by(|a, b| a.probability.total_cmp(&b.probability))
        {
            let memory_points = self
                .series
                .get("memory_usage_bytes")
                .map(|s| s.len())
                .unwrap_or(0);
            return PredictionSignal {
                predicted: true,
                probability: worst.probability,
                eta_seconds: worst.eta_seconds,
                confidence: (memory_points as f64 / 50.0).min(1.0),
                evidence,
                model_name: MODEL_NAME.to_string(),
                model_version: MODEL_VERSION.to_string(),
                computed_at: now,
            };
        }

        PredictionSignal {
            predicted: false,
            probability: 0.1,
            eta_seconds: None,
            confidence: 0.8,
            evidence: vec!["No resource breach predicted in next 30 minutes".to_string()],
            model_name: MODEL_NAME.to_string(),
            model_version: MODEL_VERSION.to_string(),
            computed_at: now,
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
