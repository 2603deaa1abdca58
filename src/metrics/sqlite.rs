use super::{MetricSource, SourceError, WindowMetrics};
use crate::storage::{self, Pool};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Metric source backed by the local datapoint store.
#[derive(Clone)]
pub struct SqliteSource {
    pool: Pool,
}

impl SqliteSource {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl MetricSource for SqliteSource {
    async fn fetch_window_metrics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WindowMetrics, SourceError> {
        let pool = self.pool.clone();
        let metrics = tokio::task::spawn_blocking(move || storage::aggregate_window(&pool, start, end))
            .await
            .map_err(|e| SourceError::Storage(e.into()))??;
        Ok(metrics)
    }

    async fn fetch_model_breakdown(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeMap<String, WindowMetrics>, SourceError> {
        let pool = self.pool.clone();
        let models = tokio::task::spawn_blocking(move || storage::aggregate_by_model(&pool, start, end))
            .await
            .map_err(|e| SourceError::Storage(e.into()))??;
        Ok(models)
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
