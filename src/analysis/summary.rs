//! Executive summary: headline metrics, period-over-period trends and
//! recommendations for a reporting period.
//!
//! Every figure degrades gracefully: a window the source could not serve is
//! treated as empty, and trends that lack a comparison point report
//! `InsufficientData` instead of guessing.

use crate::analysis::cost::{self, CostAnalysis, CostReport};
use crate::config::ModelPrice;
use crate::metrics::{self, MetricSource, WindowMetrics, UNATTRIBUTED_MODEL};
use crate::window::{self, WindowError};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Cost change (percent) beyond which the cost trend is no longer stable.
const COST_TREND_BAND_PCT: f64 = 10.0;

/// Models listed in the summary.
const TOP_MODELS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorTrend {
    Improving,
    Worsening,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CostTrend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportingPeriod {
    pub start_date: String,
    pub end_date: String,
    pub days: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyMetrics {
    pub total_api_calls: f64,
    pub success_rate: f64,
    pub unique_users: u64,
    pub total_tokens_processed: f64,
    pub average_response_time_secs: f64,
    pub estimated_cost: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Trends {
    pub usage_growth_pct: f64,
    pub error_trend: ErrorTrend,
    pub cost_trend: CostTrend,
}

/// One model's share of the period's invocations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelShare {
    pub model_id: String,
    pub invocations: f64,
    pub share_pct: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutiveSummary {
    pub reporting_period: ReportingPeriod,
    pub key_metrics: KeyMetrics,
    pub trends: Trends,
    pub top_models: Vec<ModelShare>,
    pub cost: CostReport,
    pub recommendations: Vec<String>,
}

/// Summarise the `days` days ending at `now`.
pub async fn build_summary(
    source: &dyn MetricSource,
    pricing: &BTreeMap<String, ModelPrice>,
    days: u32,
    now: DateTime<Utc>,
) -> Result<ExecutiveSummary, WindowError> {
    let start = window::days_before(now, days)?;
    let previous_start = window::days_before(start, days)?;

    let current = metrics::observe(source, start, now).await.or_empty();
    let previous = metrics::observe(source, previous_start, start).await.or_empty();
    let current_models = metrics::observe_by_model(source, start, now).await;
    let previous_models = metrics::observe_by_model(source, previous_start, start).await;

    let current_cost = cost::build_report(&current, &current_models, pricing);
    let previous_cost = cost::build_report(&previous, &previous_models, pricing);
    let top_models = top_models(&current_models, current.invocations);

    // Daily error rates, most recent day first
    let mut daily_rates = Vec::new();
    for i in 0..i64::from(days) {
        let day_end = now - Duration::days(i);
        let day = metrics::observe(source, day_end - Duration::days(1), day_end).await;
        if let Some(rate) = day.metrics().and_then(WindowMetrics::error_rate) {
            daily_rates.push(rate);
        }
    }

    Ok(ExecutiveSummary {
        reporting_period: ReportingPeriod {
            start_date: start.format("%Y-%m-%d").to_string(),
            end_date: now.format("%Y-%m-%d").to_string(),
            days,
        },
        key_metrics: KeyMetrics {
            total_api_calls: current.invocations,
            success_rate: current.success_rate().unwrap_or(0.0),
            unique_users: current.unique_users,
            total_tokens_processed: current.total_tokens(),
            average_response_time_secs: current.avg_duration_ms / 1000.0,
            estimated_cost: current_cost.total.total_estimated_cost,
        },
        trends: Trends {
            usage_growth_pct: usage_growth(current.invocations, previous.invocations),
            error_trend: error_trend(&daily_rates),
            cost_trend: cost_trend(
                current_cost.total.total_estimated_cost,
                previous_cost.total.total_estimated_cost,
            ),
        },
        recommendations: recommendations(&current, &current_cost.total, &top_models),
        top_models,
        cost: current_cost,
    })
}

/// Attributed models with traffic, busiest first, capped at five.
pub fn top_models(models: &BTreeMap<String, WindowMetrics>, total_invocations: f64) -> Vec<ModelShare> {
    let mut shares: Vec<ModelShare> = models
        .iter()
        .filter(|(model, m)| model.as_str() != UNATTRIBUTED_MODEL && m.invocations > 0.0)
        .map(|(model, m)| ModelShare {
            model_id: model.clone(),
            invocations: m.invocations,
            share_pct: if total_invocations > 0.0 {
                (m.invocations / total_invocations * 100.0 * 100.0).round() / 100.0
            } else {
                0.0
            },
        })
        .collect();
    // BTreeMap order breaks ties by model id
    shares.sort_by(|a, b| b.invocations.total_cmp(&a.invocations));
    shares.truncate(TOP_MODELS);
    shares
}

/// Percent change in invocations, rounded to two decimals. Zero without a previous period.
pub fn usage_growth(current: f64, previous: f64) -> f64 {
    if previous > 0.0 {
        ((current - previous) / previous * 100.0 * 100.0).round() / 100.0
    } else {
        0.0
    }
}

/// Compare the most recent daily error rate (first) with the oldest (last).
pub fn error_trend(daily_rates: &[f64]) -> ErrorTrend {
    match (daily_rates.first(), daily_rates.last()) {
        (Some(recent), Some(oldest)) if daily_rates.len() >= 2 => {
            if recent < oldest {
                ErrorTrend::Improving
            } else if recent > oldest {
                ErrorTrend::Worsening
            } else {
                ErrorTrend::Stable
            }
        }
        _ => ErrorTrend::InsufficientData,
    }
}

/// Compare against the previous period of the same length. Halving the cost of
/// a doubled window would fold the current period into its own comparison.
pub fn cost_trend(current: f64, previous: f64) -> CostTrend {
    if previous <= 0.0 {
        return CostTrend::InsufficientData;
    }
    let change = (current - previous) / previous * 100.0;
    if change > COST_TREND_BAND_PCT {
        CostTrend::Increasing
    } else if change < -COST_TREND_BAND_PCT {
        CostTrend::Decreasing
    } else {
        CostTrend::Stable
    }
}

pub fn recommendations(m: &WindowMetrics, cost: &CostAnalysis, top_models: &[ModelShare]) -> Vec<String> {
    let mut out = Vec::new();

    if m.success_rate().is_some_and(|r| r < 95.0) {
        out.push("Investigate error patterns - success rate below 95%".to_string());
    }
    if m.invocations > 10_000.0 {
        out.push("Consider implementing caching to reduce API calls".to_string());
    }
    if cost.total_estimated_cost > 1000.0 {
        out.push("Review token usage patterns for cost optimization opportunities".to_string());
    }
    if top_models.len() == 1 {
        out.push("Consider diversifying model usage for better resilience".to_string());
    }
    if m.avg_duration_ms > 30_000.0 {
        out.push("Investigate high response times - consider request optimization".to_string());
    }

    if out.is_empty() {
        out.push("System performing well - continue monitoring".to_string());
    }
    out
}
