use crate::config::ModelPrice;
use crate::metrics::{self, MetricSource, WindowMetrics};
use crate::window::{self, WindowError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Estimated token spend for a period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CostAnalysis {
    pub input_tokens: f64,
    pub output_tokens: f64,
    pub input_token_cost: f64,
    pub output_token_cost: f64,
    pub total_estimated_cost: f64,
}

impl CostAnalysis {
    fn add(&mut self, other: &CostAnalysis) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.input_token_cost += other.input_token_cost;
        self.output_token_cost += other.output_token_cost;
        self.total_estimated_cost += other.total_estimated_cost;
    }
}

/// Period cost with the per-model split when the source provides one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostReport {
    #[serde(flatten)]
    pub total: CostAnalysis,
    pub cost_by_model: BTreeMap<String, CostAnalysis>,
}

/// Mean input and output price across the table.
fn mean_price(pricing: &BTreeMap<String, ModelPrice>) -> Option<ModelPrice> {
    if pricing.is_empty() {
        return None;
    }
    let n = pricing.len() as f64;
    Some(ModelPrice {
        input: pricing.values().map(|p| p.input).sum::<f64>() / n,
        output: pricing.values().map(|p| p.output).sum::<f64>() / n,
    })
}

/// The model's own price, or the table mean for models not listed.
pub fn price_for(model_id: &str, pricing: &BTreeMap<String, ModelPrice>) -> Option<ModelPrice> {
    pricing.get(model_id).copied().or_else(|| mean_price(pricing))
}

fn priced(metrics: &WindowMetrics, price: Option<ModelPrice>) -> CostAnalysis {
    let Some(price) = price else {
        return CostAnalysis {
            input_tokens: metrics.input_tokens,
            output_tokens: metrics.output_tokens,
            ..Default::default()
        };
    };

    let input_token_cost = metrics.input_tokens * price.input;
    let output_token_cost = metrics.output_tokens * price.output;

    CostAnalysis {
        input_tokens: metrics.input_tokens,
        output_tokens: metrics.output_tokens,
        input_token_cost,
        output_token_cost,
        total_estimated_cost: input_token_cost + output_token_cost,
    }
}

/// Estimate cost using the mean input and output price across the pricing table.
pub fn estimate_cost(metrics: &WindowMetrics, pricing: &BTreeMap<String, ModelPrice>) -> CostAnalysis {
    priced(metrics, mean_price(pricing))
}

/// Cost per model, each priced by [`price_for`].
pub fn cost_by_model(
    models: &BTreeMap<String, WindowMetrics>,
    pricing: &BTreeMap<String, ModelPrice>,
) -> BTreeMap<String, CostAnalysis> {
    models
        .iter()
        .map(|(model, m)| (model.clone(), priced(m, price_for(model, pricing))))
        .collect()
}

/// Combine totals and the per-model breakdown. With a breakdown the total is the
/// sum of model costs; without one every token is priced at the table mean.
pub fn build_report(
    totals: &WindowMetrics,
    models: &BTreeMap<String, WindowMetrics>,
    pricing: &BTreeMap<String, ModelPrice>,
) -> CostReport {
    if models.is_empty() {
        return CostReport {
            total: estimate_cost(totals, pricing),
            cost_by_model: BTreeMap::new(),
        };
    }

    let cost_by_model = cost_by_model(models, pricing);
    let mut total = CostAnalysis::default();
    for c in cost_by_model.values() {
        total.add(c);
    }
    CostReport { total, cost_by_model }
}

/// Cost over the `days` days ending at `now`. A missing window costs nothing.
pub async fn analyze_period(
    source: &dyn MetricSource,
    pricing: &BTreeMap<String, ModelPrice>,
    days: u32,
    now: DateTime<Utc>,
) -> Result<CostReport, WindowError> {
    let start = window::days_before(now, days)?;
    let totals = metrics::observe(source, start, now).await.or_empty();
    let models = metrics::observe_by_model(source, start, now).await;
    Ok(build_report(&totals, &models, pricing))
}
