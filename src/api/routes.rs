//! API route definitions.

use super::error::ApiError;
use super::state::AppState;
use crate::analysis::{cost, summary};
use crate::metrics;
use crate::window;
use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(window_metrics))
        .route("/detect", post(detect))
        .route("/cost", get(cost_analysis))
        .route("/summary", get(executive_summary))
}

pub(super) fn meta() -> Value {
    json!({
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

#[derive(Debug, Deserialize)]
struct HoursQuery {
    #[serde(default = "default_hours")]
    hours: u32,
}

fn default_hours() -> u32 {
    24
}

#[derive(Debug, Deserialize)]
struct DaysQuery {
    #[serde(default = "default_days")]
    days: u32,
}

fn default_days() -> u32 {
    7
}

#[derive(Debug, Deserialize)]
struct DetectQuery {
    /// Forward anomalies to the alert sink.
    #[serde(default)]
    alert: bool,
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "environment": state.config.environment,
            "source": state.source.name(),
        },
        "meta": meta()
    }))
}

async fn window_metrics(
    State(state): State<AppState>,
    Query(q): Query<HoursQuery>,
) -> Result<Json<Value>, ApiError> {
    let end = Utc::now();
    let start = window::hours_before(end, q.hours)?;
    let data = match metrics::observe(state.source.as_ref(), start, end).await {
        metrics::Observation::Observed(m) => json!({
            "start": start.to_rfc3339(),
            "end": end.to_rfc3339(),
            "metrics": m,
            "success_rate": m.success_rate(),
        }),
        metrics::Observation::Missing { reason } => json!({
            "start": start.to_rfc3339(),
            "end": end.to_rfc3339(),
            "metrics": null,
            "missing": reason,
        }),
    };
    Ok(Json(json!({ "data": data, "meta": meta() })))
}

/// Detection for the current hour. Alerts are only sent with `?alert=true`.
async fn detect(State(state): State<AppState>, Query(q): Query<DetectQuery>) -> Json<Value> {
    let report = if q.alert {
        state.engine.run().await
    } else {
        state.engine.detect_at(Utc::now()).await
    };
    Json(json!({ "data": report, "meta": meta() }))
}

async fn cost_analysis(
    State(state): State<AppState>,
    Query(q): Query<DaysQuery>,
) -> Result<Json<Value>, ApiError> {
    let analysis = cost::analyze_period(state.source.as_ref(), &state.config.pricing, q.days, Utc::now()).await?;
    Ok(Json(json!({ "data": analysis, "meta": meta() })))
}

async fn executive_summary(
    State(state): State<AppState>,
    Query(q): Query<DaysQuery>,
) -> Result<Json<Value>, ApiError> {
    let s = summary::build_summary(state.source.as_ref(), &state.config.pricing, q.days, Utc::now()).await?;
    Ok(Json(json!({ "data": s, "meta": meta() })))
}
