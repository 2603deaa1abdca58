use crate::detect::{DetectError, Severity};

/// Baseline windows required before any anomaly decision is made.
pub const MIN_BASELINE_SAMPLES: usize = 24;

/// Default standard-deviation multiple for the threshold.
pub const DEFAULT_THRESHOLD_MULTIPLIER: f64 = 2.0;

/// Observations beyond `threshold * HIGH_SEVERITY_FACTOR` are high severity.
pub const HIGH_SEVERITY_FACTOR: f64 = 1.5;

/// A simple time series for statistical analysis.
pub struct TimeSeries {
    values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn mean(&self) -> f64 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f64>() / self.values.len() as f64
    }

    /// Sample variance (n - 1). Zero for fewer than two points.
    pub fn variance(&self) -> f64 {
        if self.values.len() < 2 {
            return 0.0;
        }
        let mean = self.mean();
        let sum_sq_diff: f64 = self
            .values
            .iter()
            .map(|&x| (x - mean).powi(2))
            .sum();
        sum_sq_diff / (self.values.len() - 1) as f64
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// `mean + multiplier * std_dev`, once the series has `min_samples` points.
    pub fn threshold(&self, multiplier: f64, min_samples: usize) -> Result<f64, DetectError> {
        if self.values.len() < min_samples {
            return Err(DetectError::InsufficientBaseline {
                needed: min_samples,
                have: self.values.len(),
            });
        }
        Ok(self.mean() + multiplier * self.std_dev())
    }
}

/// Outcome of comparing one observation against a baseline.
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    InsufficientData { have: usize, needed: usize },
    WithinThreshold { mean: f64, threshold: f64 },
    Exceeded { mean: f64, threshold: f64, severity: Severity },
}

/// Decide whether `current` is anomalous relative to `baseline`.
pub fn evaluate(baseline: &[f64], current: f64, multiplier: f64, min_samples: usize) -> Evaluation {
    let series = TimeSeries::new(baseline.to_vec());
    let threshold = match series.threshold(multiplier, min_samples) {
        Ok(t) => t,
        Err(DetectError::InsufficientBaseline { needed, have }) => {
            return Evaluation::InsufficientData { have, needed };
        }
    };
    let mean = series.mean();

    if current > threshold {
        let severity = if current > threshold * HIGH_SEVERITY_FACTOR {
            Severity::High
        } else {
            Severity::Medium
        };
        Evaluation::Exceeded {
            mean,
            threshold,
            severity,
        }
    } else {
        Evaluation::WithinThreshold { mean, threshold }
    }
}
