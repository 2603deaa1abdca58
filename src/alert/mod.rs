//! Alert delivery: the notification sink seam and message formatting.

pub mod webhook;

use crate::detect::Anomaly;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{error, info, warn};

pub use webhook::WebhookSink;

/// Subject used when anomalies are forwarded.
pub const ANOMALY_SUBJECT: &str = "Model Usage Anomaly Detected";

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert delivery failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("alert endpoint returned HTTP {status}")]
    Status { status: u16 },
}

/// A free-text alert.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub subject: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Destination for alerts.
#[async_trait::async_trait]
pub trait AlertSink: Send + Sync {
    async fn publish(&self, alert: &Alert) -> Result<(), AlertError>;

    fn name(&self) -> &str;
}

/// Send an alert, logging the outcome. Delivery failure is never an error for the caller.
pub async fn publish_alert(sink: &dyn AlertSink, message: &str, subject: &str) -> bool {
    let alert = Alert::new(subject, message);
    match sink.publish(&alert).await {
        Ok(()) => {
            info!(sink = sink.name(), %subject, "Alert sent");
            true
        }
        Err(e) => {
            error!(sink = sink.name(), %subject, error = %e, "Failed to send alert");
            false
        }
    }
}

/// Fallback sink: writes the alert to the log.
pub struct LogSink;

#[async_trait::async_trait]
impl AlertSink for LogSink {
    async fn publish(&self, alert: &Alert) -> Result<(), AlertError> {
        warn!(subject = %alert.subject, "{}", alert.message);
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Render the alert body for a set of anomalies.
pub fn format_alert(anomalies: &[Anomaly]) -> String {
    let mut msg = format!("Detected {} anomalies in model usage:\n\n", anomalies.len());
    for a in anomalies {
        let _ = writeln!(
            msg,
            "- {}: Current value {}, Threshold: {:.2}, Severity: {}",
            a.kind, a.observed_value, a.threshold, a.severity
        );
    }
    msg
}
