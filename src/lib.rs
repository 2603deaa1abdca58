//! invokewatch -- usage monitoring and anomaly detection for model invocation traffic.
//!
//! This crate collects per-window usage metrics from a pluggable source,
//! flags hourly usage and error-rate anomalies against a rolling baseline,
//! forwards alerts to a pluggable sink, and summarises cost and trends.

pub mod alert;
pub mod analysis;
pub mod api;
pub mod config;
pub mod detect;
pub mod metrics;
pub mod scheduler;
pub mod storage;
pub mod window;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::alert::{AlertSink, LogSink, WebhookSink};
use crate::config::{Config, SourceKind};
use crate::detect::engine::AnomalyEngine;
use crate::metrics::{http::HttpSource, sqlite::SqliteSource, MetricSource};

/// A metric source built from configuration, with the pool when it is the local store.
pub struct SourceHandle {
    pub source: Arc<dyn MetricSource>,
    pub pool: Option<storage::Pool>,
}

pub fn build_source(config: &Config) -> Result<SourceHandle> {
    match config.source.kind {
        SourceKind::Sqlite => {
            let path = config.storage.database_path.to_string_lossy();
            tracing::info!(db_path = %path, "Initializing database");
            let pool = storage::open_pool(&path)?;
            Ok(SourceHandle {
                source: Arc::new(SqliteSource::new(pool.clone())),
                pool: Some(pool),
            })
        }
        SourceKind::Http => {
            let endpoint = config
                .source
                .endpoint
                .as_deref()
                .context("source.endpoint is required for the http metric source")?;
            let source = HttpSource::new(endpoint, Duration::from_secs(config.source.timeout_secs))?;
            Ok(SourceHandle {
                source: Arc::new(source),
                pool: None,
            })
        }
    }
}

/// Webhook sink when configured, otherwise alerts go to the log.
pub fn build_sink(config: &Config) -> Result<Arc<dyn AlertSink>> {
    match config.alerts.webhook_url.as_deref() {
        Some(url) => {
            let headers: HashMap<String, String> = config.alerts.webhook_headers.clone();
            let sink = WebhookSink::new(url, headers, Duration::from_secs(config.alerts.timeout_secs))?
                .with_recipient(config.alerts.email.clone());
            Ok(Arc::new(sink))
        }
        None => {
            tracing::warn!("No alert webhook configured, alerts will be logged only");
            Ok(Arc::new(LogSink))
        }
    }
}

pub fn build_engine(config: &Config, source: Arc<dyn MetricSource>) -> Result<AnomalyEngine> {
    let sink = build_sink(config)?;
    Ok(AnomalyEngine::new(source, sink, config.detection_settings()))
}

/// Start the invokewatch daemon: API server plus scheduled detection.
pub async fn serve(config: Config) -> Result<()> {
    let handle = build_source(&config)?;
    let engine = Arc::new(build_engine(&config, handle.source.clone())?);

    let schedule = scheduler::DetectionSchedule::parse(&config.schedule.detection_cron)?;
    let retention = handle.pool.clone().map(|pool| scheduler::Retention {
        pool,
        days: config.storage.retention_days,
    });
    let scheduled = engine.clone();
    tokio::spawn(async move {
        scheduler::run_detection_loop(scheduled, schedule, retention).await;
    });

    let addr: std::net::SocketAddr = config
        .api
        .bind
        .parse()
        .with_context(|| format!("invalid bind address: {}", config.api.bind))?;
    let state = api::state::AppState {
        config: Arc::new(config),
        source: handle.source,
        engine,
    };
    let app = api::router(state);

    tracing::info!(%addr, "invokewatch listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
