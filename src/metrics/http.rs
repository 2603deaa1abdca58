use super::{Datapoint, MetricSource, SourceError, WindowMetrics};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

/// Metric source that pulls raw datapoints from an HTTP endpoint.
///
/// The endpoint answers `GET {base}/datapoints?start=..&end=..` with a JSON
/// array of [`Datapoint`]s covering the half-open window. Datapoints may carry
/// `model_id` and `user_id` for per-model and distinct-user figures.
pub struct HttpSource {
    client: Client,
    endpoint: String,
}

impl HttpSource {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    async fn fetch_datapoints(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<Datapoint>, SourceError> {
        let url = format!("{}/datapoints", self.endpoint);
        let resp = self
            .client
            .get(&url)
            .query(&[
                ("start", start.to_rfc3339_opts(SecondsFormat::Secs, true)),
                ("end", end.to_rfc3339_opts(SecondsFormat::Secs, true)),
            ])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(SourceError::Status {
                status: resp.status().as_u16(),
            });
        }

        let points: Vec<Datapoint> = resp.json().await?;
        debug!(%url, count = points.len(), "Fetched datapoints");
        Ok(points)
    }
}

#[async_trait::async_trait]
impl MetricSource for HttpSource {
    async fn fetch_window_metrics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<WindowMetrics, SourceError> {
        let points = self.fetch_datapoints(start, end).await?;
        Ok(WindowMetrics::from_datapoints(&points))
    }

    async fn fetch_model_breakdown(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<BTreeMap<String, WindowMetrics>, SourceError> {
        let points = self.fetch_datapoints(start, end).await?;
        Ok(WindowMetrics::by_model(&points))
    }

    fn name(&self) -> &str {
        "http"
    }
}
