use crate::alert::{self, AlertSink};
use crate::detect::anomaly::{self, Evaluation};
use crate::detect::{Anomaly, AnomalyKind};
use crate::metrics::{self, MetricSource, Observation};
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Knobs for a detection run.
#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub threshold_multiplier: f64,
    pub min_baseline_samples: usize,
    /// Number of complete hours before the current one used as baseline.
    pub baseline_hours: u32,
    /// Error rates at or below this percentage are never reported.
    pub error_rate_floor_pct: f64,
    pub alert_subject: String,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            threshold_multiplier: anomaly::DEFAULT_THRESHOLD_MULTIPLIER,
            min_baseline_samples: anomaly::MIN_BASELINE_SAMPLES,
            baseline_hours: 168,
            error_rate_floor_pct: 5.0,
            alert_subject: alert::ANOMALY_SUBJECT.to_string(),
        }
    }
}

/// What one check concluded.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CheckOutcome {
    /// Not enough baseline windows to decide anything.
    InsufficientData { have: usize, needed: usize },
    /// The check did not apply to this run.
    Skipped { reason: String },
    Normal {
        observed: f64,
        baseline_mean: f64,
        threshold: f64,
    },
    Anomalous(Anomaly),
}

impl CheckOutcome {
    pub fn anomaly(&self) -> Option<&Anomaly> {
        match self {
            CheckOutcome::Anomalous(a) => Some(a),
            _ => None,
        }
    }
}

/// Result of one detection run.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionReport {
    pub run_id: Uuid,
    pub window_start: DateTime<Utc>,
    pub baseline_windows: usize,
    pub missing_windows: usize,
    pub usage: CheckOutcome,
    pub error_rate: CheckOutcome,
    pub anomalies: Vec<Anomaly>,
    /// `None` when there was nothing to send.
    pub alert_delivered: Option<bool>,
}

/// Runs usage and error-rate checks against an injected source and sink.
///
/// Runs are serialized: a scheduled run and an API-triggered one never overlap.
pub struct AnomalyEngine {
    source: Arc<dyn MetricSource>,
    sink: Arc<dyn AlertSink>,
    settings: DetectionSettings,
    run_lock: Mutex<()>,
}

impl AnomalyEngine {
    pub fn new(source: Arc<dyn MetricSource>, sink: Arc<dyn AlertSink>, settings: DetectionSettings) -> Self {
        Self {
            source,
            sink,
            settings,
            run_lock: Mutex::new(()),
        }
    }

    /// Detect and alert for the hour containing the current time.
    pub async fn run(&self) -> DetectionReport {
        self.run_at(Utc::now()).await
    }

    /// Detect for the hour containing `now` and forward any anomalies to the sink.
    pub async fn run_at(&self, now: DateTime<Utc>) -> DetectionReport {
        let _guard = self.run_lock.lock().await;
        let mut report = self.detect(now).await;

        if !report.anomalies.is_empty() {
            let message = alert::format_alert(&report.anomalies);
            let delivered =
                alert::publish_alert(self.sink.as_ref(), &message, &self.settings.alert_subject).await;
            report.alert_delivered = Some(delivered);
        }

        report
    }

    /// Detection only; no alert is sent.
    pub async fn detect_at(&self, now: DateTime<Utc>) -> DetectionReport {
        let _guard = self.run_lock.lock().await;
        self.detect(now).await
    }

    async fn detect(&self, now: DateTime<Utc>) -> DetectionReport {
        let window_start = hour_start(now);
        let hour = Duration::hours(1);
        info!(%window_start, source = self.source.name(), "Running anomaly detection");

        // Baseline: the complete hours before the current one, oldest first
        let mut baseline = Vec::new();
        let mut missing_windows = 0;
        for i in (1..=i64::from(self.settings.baseline_hours)).rev() {
            let Some(start) = window_start.checked_sub_signed(Duration::hours(i)) else {
                missing_windows += 1;
                continue;
            };
            match metrics::observe(self.source.as_ref(), start, start + hour).await {
                Observation::Observed(m) => baseline.push(m),
                Observation::Missing { .. } => missing_windows += 1,
            }
        }

        let current = metrics::observe(self.source.as_ref(), window_start, window_start + hour).await;

        let (usage, error_rate) = match current.metrics() {
            Some(current) => {
                let usage_series: Vec<f64> = baseline.iter().map(|m| m.invocations).collect();
                let usage = self.check(
                    AnomalyKind::HighUsage,
                    &usage_series,
                    current.invocations,
                    window_start,
                    None,
                );

                let error_rate = match current.error_rate() {
                    Some(rate) => {
                        // Windows without traffic have no error rate and are left out
                        let rate_series: Vec<f64> = baseline.iter().filter_map(|m| m.error_rate()).collect();
                        self.check(
                            AnomalyKind::HighErrorRate,
                            &rate_series,
                            rate,
                            window_start,
                            Some(self.settings.error_rate_floor_pct),
                        )
                    }
                    None => CheckOutcome::Skipped {
                        reason: "no invocations in current window".to_string(),
                    },
                };
                (usage, error_rate)
            }
            None => {
                warn!(%window_start, "Current window unavailable, skipping detection");
                let skipped = CheckOutcome::Skipped {
                    reason: "current window unavailable".to_string(),
                };
                (skipped.clone(), skipped)
            }
        };

        let anomalies: Vec<Anomaly> = [&usage, &error_rate]
            .into_iter()
            .filter_map(|o| o.anomaly().cloned())
            .collect();

        for a in &anomalies {
            warn!(
                kind = %a.kind,
                observed = a.observed_value,
                threshold = a.threshold,
                baseline_mean = a.baseline_mean,
                severity = %a.severity,
                "Anomaly detected"
            );
        }
        info!(
            baseline_windows = baseline.len(),
            missing_windows,
            anomalies = anomalies.len(),
            "Detection finished"
        );

        DetectionReport {
            run_id: Uuid::new_v4(),
            window_start,
            baseline_windows: baseline.len(),
            missing_windows,
            usage,
            error_rate,
            anomalies,
            alert_delivered: None,
        }
    }

    fn check(
        &self,
        kind: AnomalyKind,
        series: &[f64],
        observed: f64,
        timestamp: DateTime<Utc>,
        floor: Option<f64>,
    ) -> CheckOutcome {
        match anomaly::evaluate(
            series,
            observed,
            self.settings.threshold_multiplier,
            self.settings.min_baseline_samples,
        ) {
            Evaluation::InsufficientData { have, needed } => {
                warn!(%kind, have, needed, "Insufficient data for anomaly detection");
                CheckOutcome::InsufficientData { have, needed }
            }
            Evaluation::WithinThreshold { mean, threshold } => CheckOutcome::Normal {
                observed,
                baseline_mean: mean,
                threshold,
            },
            Evaluation::Exceeded {
                mean,
                threshold,
                severity,
            } => {
                if floor.is_some_and(|f| observed <= f) {
                    return CheckOutcome::Normal {
                        observed,
                        baseline_mean: mean,
                        threshold,
                    };
                }
                CheckOutcome::Anomalous(Anomaly {
                    kind,
                    observed_value: observed,
                    threshold,
                    baseline_mean: mean,
                    timestamp,
                    severity,
                })
            }
        }
    }
}

/// Start of the UTC hour containing `t`.
pub fn hour_start(t: DateTime<Utc>) -> DateTime<Utc> {
    t.with_minute(0)
        .and_then(|t| t.with_second(0))
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{Alert, AlertError};
    use crate::detect::Severity;
    use crate::metrics::{SourceError, WindowMetrics};
    use chrono::TimeZone;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory source keyed by window start. Unknown windows are empty.
    #[derive(Default)]
    struct FakeSource {
        windows: HashMap<DateTime<Utc>, WindowMetrics>,
        failing: HashSet<DateTime<Utc>>,
    }

    #[async_trait::async_trait]
    impl MetricSource for FakeSource {
        async fn fetch_window_metrics(
            &self,
            start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<WindowMetrics, SourceError> {
            if self.failing.contains(&start) {
                return Err(SourceError::Status { status: 500 });
            }
            Ok(self.windows.get(&start).copied().unwrap_or_default())
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        fail: bool,
        sent: Mutex<Vec<Alert>>,
    }

    #[async_trait::async_trait]
    impl AlertSink for RecordingSink {
        async fn publish(&self, alert: &Alert) -> Result<(), AlertError> {
            self.sent.lock().unwrap().push(alert.clone());
            if self.fail {
                Err(AlertError::Status { status: 502 })
            } else {
                Ok(())
            }
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 8, 12, 34, 56).unwrap()
    }

    fn current_hour() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 8, 12, 0, 0).unwrap()
    }

    fn window(invocations: f64, errors: f64) -> WindowMetrics {
        WindowMetrics {
            invocations,
            errors,
            ..Default::default()
        }
    }

    /// `hours` baseline windows of the same shape followed by the current window.
    fn source(hours: i64, baseline: WindowMetrics, current: WindowMetrics) -> FakeSource {
        let mut fake = FakeSource::default();
        for i in 1..=hours {
            fake.windows.insert(current_hour() - Duration::hours(i), baseline);
        }
        fake.windows.insert(current_hour(), current);
        fake
    }

    fn engine(source: FakeSource, sink: Arc<RecordingSink>, baseline_hours: u32) -> AnomalyEngine {
        let settings = DetectionSettings {
            baseline_hours,
            ..Default::default()
        };
        AnomalyEngine::new(Arc::new(source), sink, settings)
    }

    #[test]
    fn test_hour_start() {
        assert_eq!(hour_start(now()), current_hour());
        assert_eq!(hour_start(current_hour()), current_hour());
    }

    #[tokio::test]
    async fn test_short_baseline_reports_insufficient_data() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(source(10, window(10.0, 0.0), window(10_000.0, 0.0)), sink.clone(), 10);
        let report = engine.run_at(now()).await;

        assert_eq!(report.usage, CheckOutcome::InsufficientData { have: 10, needed: 24 });
        assert!(report.anomalies.is_empty());
        assert_eq!(report.alert_delivered, None);
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_current_equal_to_mean_is_normal() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(source(24, window(10.0, 0.0), window(10.0, 0.0)), sink, 24);
        let report = engine.run_at(now()).await;

        assert!(matches!(report.usage, CheckOutcome::Normal { .. }));
        assert!(report.anomalies.is_empty());
    }

    #[tokio::test]
    async fn test_usage_spike_is_high_and_alerted() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(source(24, window(10.0, 0.0), window(31.0, 0.0)), sink.clone(), 24);
        let report = engine.run_at(now()).await;

        assert_eq!(report.anomalies.len(), 1);
        let a = &report.anomalies[0];
        assert_eq!(a.kind, AnomalyKind::HighUsage);
        assert_eq!(a.severity, Severity::High);
        assert_eq!(a.threshold, 10.0);
        assert_eq!(a.baseline_mean, 10.0);
        assert_eq!(a.timestamp, current_hour());
        assert_eq!(report.alert_delivered, Some(true));

        let sent = sink.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Model Usage Anomaly Detected");
        assert!(sent[0].message.contains("high_usage"));
    }

    #[tokio::test]
    async fn test_zero_traffic_skips_error_rate() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(source(48, window(0.0, 0.0), window(0.0, 0.0)), sink, 48);
        let report = engine.run_at(now()).await;

        assert!(matches!(report.error_rate, CheckOutcome::Skipped { .. }));
        assert!(matches!(report.usage, CheckOutcome::Normal { .. }));
        assert!(report.anomalies.is_empty());
    }

    #[tokio::test]
    async fn test_zero_traffic_baseline_is_insufficient_for_error_rate() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(source(48, window(0.0, 0.0), window(100.0, 50.0)), sink, 48);
        let report = engine.run_at(now()).await;

        assert_eq!(
            report.error_rate,
            CheckOutcome::InsufficientData { have: 0, needed: 24 }
        );
    }

    #[tokio::test]
    async fn test_error_rate_below_floor_is_not_reported() {
        // Baseline 1% errors, current 2%: statistically anomalous but under 5%
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(source(24, window(100.0, 1.0), window(100.0, 2.0)), sink, 24);
        let report = engine.run_at(now()).await;

        assert!(matches!(report.error_rate, CheckOutcome::Normal { .. }));
        assert!(report.anomalies.is_empty());
    }

    #[tokio::test]
    async fn test_error_rate_above_floor_within_threshold_is_normal() {
        // Baseline alternates 8% and 12%: mean 10, threshold ~14.1
        let mut fake = FakeSource::default();
        for i in 1..=24 {
            let errors = if i % 2 == 0 { 8.0 } else { 12.0 };
            fake.windows.insert(current_hour() - Duration::hours(i), window(100.0, errors));
        }
        fake.windows.insert(current_hour(), window(100.0, 10.0));
        let report = engine(fake, Arc::new(RecordingSink::default()), 24).run_at(now()).await;

        match report.error_rate {
            CheckOutcome::Normal {
                observed,
                baseline_mean,
                threshold,
            } => {
                assert_eq!(observed, 10.0);
                assert!((baseline_mean - 10.0).abs() < 1e-9);
                assert!(threshold > 14.0 && threshold < 14.2);
            }
            other => panic!("expected normal error rate, got {:?}", other),
        }
        assert!(report.anomalies.is_empty());
    }

    #[tokio::test]
    async fn test_error_rate_above_floor_is_reported() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(source(24, window(100.0, 1.0), window(100.0, 6.0)), sink, 24);
        let report = engine.run_at(now()).await;

        let a = report.error_rate.anomaly().expect("error-rate anomaly");
        assert_eq!(a.kind, AnomalyKind::HighErrorRate);
        assert_eq!(a.observed_value, 6.0);
        assert_eq!(a.severity, Severity::High);
        assert_eq!(report.anomalies.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_windows_shrink_baseline() {
        let sink = Arc::new(RecordingSink::default());
        let mut fake = source(30, window(10.0, 0.0), window(31.0, 0.0));
        for i in 1..=10 {
            fake.failing.insert(current_hour() - Duration::hours(i));
        }
        let engine = engine(fake, sink, 30);
        let report = engine.run_at(now()).await;

        assert_eq!(report.missing_windows, 10);
        assert_eq!(report.baseline_windows, 20);
        // Failed windows are dropped, not counted as zero
        assert_eq!(report.usage, CheckOutcome::InsufficientData { have: 20, needed: 24 });
    }

    #[tokio::test]
    async fn test_missing_current_window_skips_both_checks() {
        let sink = Arc::new(RecordingSink::default());
        let mut fake = source(24, window(10.0, 0.0), window(31.0, 0.0));
        fake.failing.insert(current_hour());
        let report = engine(fake, sink, 24).run_at(now()).await;

        assert!(matches!(report.usage, CheckOutcome::Skipped { .. }));
        assert!(matches!(report.error_rate, CheckOutcome::Skipped { .. }));
        assert!(report.anomalies.is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_keeps_anomalies() {
        let sink = Arc::new(RecordingSink {
            fail: true,
            ..Default::default()
        });
        let engine = engine(source(24, window(10.0, 0.0), window(31.0, 0.0)), sink, 24);
        let report = engine.run_at(now()).await;

        assert_eq!(report.anomalies.len(), 1);
        assert_eq!(report.alert_delivered, Some(false));
    }

    #[tokio::test]
    async fn test_detection_is_idempotent() {
        let sink = Arc::new(RecordingSink::default());
        let engine = engine(source(24, window(10.0, 1.0), window(31.0, 9.0)), sink, 24);
        let first = engine.detect_at(now()).await;
        let second = engine.detect_at(now()).await;

        assert_eq!(first.anomalies, second.anomalies);
        assert_eq!(first.usage, second.usage);
        assert_eq!(first.error_rate, second.error_rate);
    }

    /// Tracks how many fetches are in flight at once.
    #[derive(Default)]
    struct SlowSource {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MetricSource for SlowSource {
        async fn fetch_window_metrics(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<WindowMetrics, SourceError> {
            let active = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(window(10.0, 0.0))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_concurrent_runs_do_not_overlap() {
        let source = Arc::new(SlowSource::default());
        let settings = DetectionSettings {
            baseline_hours: 3,
            ..Default::default()
        };
        let engine = AnomalyEngine::new(source.clone(), Arc::new(RecordingSink::default()), settings);

        tokio::join!(engine.run_at(now()), engine.detect_at(now()), engine.run_at(now()));
        assert_eq!(source.peak.load(Ordering::SeqCst), 1);
    }
}
