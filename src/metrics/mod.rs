//! Usage metrics: window aggregates and the sources that provide them.

pub mod http;
pub mod sqlite;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::warn;

/// Breakdown key for datapoints recorded without a model id.
pub const UNATTRIBUTED_MODEL: &str = "unattributed";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("metric endpoint request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("metric endpoint returned HTTP {status}")]
    Status { status: u16 },

    #[error("metric store query failed: {0}")]
    Storage(#[from] anyhow::Error),
}

/// One raw datapoint as recorded by the invocation pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Datapoint {
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub invocations: f64,
    #[serde(default)]
    pub errors: f64,
    #[serde(default)]
    pub input_tokens: f64,
    #[serde(default)]
    pub output_tokens: f64,
    /// Average invocation latency across this datapoint, in ms.
    #[serde(default)]
    pub duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    /// Caller identity, used only for distinct-user counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Datapoint {
    fn model_key(&self) -> &str {
        self.model_id.as_deref().unwrap_or(UNATTRIBUTED_MODEL)
    }
}

/// Aggregate usage for one `[start, end)` window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub invocations: f64,
    pub errors: f64,
    pub input_tokens: f64,
    pub output_tokens: f64,
    pub avg_duration_ms: f64,
    /// Distinct non-empty user ids seen in the window.
    #[serde(default)]
    pub unique_users: u64,
}

impl WindowMetrics {
    /// Sum the counters and average the per-datapoint durations.
    pub fn from_datapoints(points: &[Datapoint]) -> Self {
        if points.is_empty() {
            return Self::default();
        }
        let mut m = Self::default();
        let mut duration_sum = 0.0;
        let mut users = BTreeSet::new();
        for p in points {
            m.invocations += p.invocations;
            m.errors += p.errors;
            m.input_tokens += p.input_tokens;
            m.output_tokens += p.output_tokens;
            duration_sum += p.duration_ms;
            if let Some(user) = p.user_id.as_deref().filter(|u| !u.is_empty()) {
                users.insert(user);
            }
        }
        m.avg_duration_ms = duration_sum / points.len() as f64;
        m.unique_users = users.len() as u64;
        m
    }

    /// Aggregate per model id. Datapoints without one land under [`UNATTRIBUTED_MODEL`].
    pub fn by_model(points: &[Datapoint]) -> BTreeMap<String, WindowMetrics> {
        let mut grouped: BTreeMap<&str, Vec<Datapoint>> = BTreeMap::new();
        for p in points {
            grouped.entry(p.model_key()).or_default().push(p.clone());
        }
        grouped
            .into_iter()
            .map(|(model, pts)| (model.to_string(), Self::from_datapoints(&pts)))
            .collect()
    }

    pub fn total_tokens(&self) -> f64 {
        self.input_tokens + self.output_tokens
    }

    /// Percentage of successful invocations, `None` without traffic.
    pub fn success_rate(&self) -> Option<f64> {
        if self.invocations > 0.0 {
            Some((self.invocations - self.errors) / self.invocations * 100.0)
        } else {
            None
        }
    }

    /// Percentage of failed invocations, `None` without traffic.
    pub fn error_rate(&self) -> Option<f64> {
        if self.invocations > 0.0 {
            Some(self.errors / self.invocations * 100.0)
        } else {
            None
        }
    }
}

/// Anything that can answer "what happened between `start` and `end`".
#[async_trait::async_trait]
pub trait MetricSource: Send + Sync {
    async fn fetch_window_metrics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WindowMetrics, SourceError>;

    /// Per-model totals for the window. Sources without a model dimension report none.
    async fn fetch_model_breakdown(
        &self,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
    ) -> Result<BTreeMap<String, WindowMetrics>, SourceError> {
        Ok(BTreeMap::new())
    }

    fn name(&self) -> &str;
}

/// Result of looking at one window: data, or an explicit gap.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    Observed(WindowMetrics),
    Missing { reason: String },
}

impl Observation {
    pub fn metrics(&self) -> Option<&WindowMetrics> {
        match self {
            Observation::Observed(m) => Some(m),
            Observation::Missing { .. } => None,
        }
    }

    /// Collapse a gap into an empty window for callers that only report totals.
    pub fn or_empty(&self) -> WindowMetrics {
        self.metrics().copied().unwrap_or_default()
    }
}

/// Fetch a window, turning any source failure into `Observation::Missing`.
pub async fn observe(
    source: &dyn MetricSource,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Observation {
    match source.fetch_window_metrics(start, end).await {
        Ok(m) => Observation::Observed(m),
        Err(e) => {
            warn!(
                source = source.name(),
                %start,
                %end,
                error = %e,
                "Metric fetch failed, treating window as missing"
            );
            Observation::Missing {
                reason: e.to_string(),
            }
        }
    }
}

/// Per-model breakdown for a window. A failed fetch yields an empty breakdown.
pub async fn observe_by_model(
    source: &dyn MetricSource,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> BTreeMap<String, WindowMetrics> {
    match source.fetch_model_breakdown(start, end).await {
        Ok(models) => models,
        Err(e) => {
            warn!(
                source = source.name(),
                %start,
                %end,
                error = %e,
                "Model breakdown fetch failed"
            );
            BTreeMap::new()
        }
    }
}
