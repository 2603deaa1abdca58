//! TOML configuration for invokewatch.
//!
//! Layered lookup: an explicit path, the `INVOKEWATCH_CONFIG` environment
//! variable, the system location, then compiled-in defaults. Every field has a
//! default so partial files are valid.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::detect::engine::DetectionSettings;

/// Environment variable holding an explicit config path.
pub const CONFIG_ENV: &str = "INVOKEWATCH_CONFIG";

/// Standard system location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/invokewatch/invokewatch.toml";

/// Placeholder address shipped in sample configs.
const PLACEHOLDER_EMAIL: &str = "admin@company.com";

const KNOWN_ENVIRONMENTS: [&str; 3] = ["dev", "staging", "prod"];

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Deployment environment label (`dev`, `staging`, `prod`).
    pub environment: String,
    pub detection: DetectionConfig,
    pub source: SourceConfig,
    pub alerts: AlertConfig,
    pub storage: StorageConfig,
    pub schedule: ScheduleConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
    /// Per-token prices keyed by model id.
    pub pricing: BTreeMap<String, ModelPrice>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "prod".to_string(),
            detection: DetectionConfig::default(),
            source: SourceConfig::default(),
            alerts: AlertConfig::default(),
            storage: StorageConfig::default(),
            schedule: ScheduleConfig::default(),
            api: ApiConfig::default(),
            logging: LoggingConfig::default(),
            pricing: default_pricing(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse config file: {}", path.display()))?;
        info!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Try, in order: `INVOKEWATCH_CONFIG`, the system path, defaults.
    pub fn load_or_default() -> Self {
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            let path = Path::new(&env_path);
            match Self::load(path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "INVOKEWATCH_CONFIG set but file could not be loaded, trying fallback"
                    );
                }
            }
        }

        let system_path = Path::new(SYSTEM_CONFIG_PATH);
        if system_path.exists() {
            match Self::load(system_path) {
                Ok(cfg) => return cfg,
                Err(e) => {
                    warn!(
                        path = %system_path.display(),
                        error = %e,
                        "system config file exists but could not be loaded, using defaults"
                    );
                }
            }
        }

        debug!("no config file found, using compiled-in defaults");
        Self::default()
    }

    /// An explicit path must load; without one fall back to the layered lookup.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => Self::load(path),
            None => Ok(Self::load_or_default()),
        }
    }

    pub fn detection_settings(&self) -> DetectionSettings {
        DetectionSettings {
            threshold_multiplier: self.detection.threshold_multiplier,
            min_baseline_samples: self.detection.min_baseline_samples,
            baseline_hours: self.detection.baseline_hours.min(crate::window::MAX_HOURS),
            error_rate_floor_pct: self.detection.error_rate_floor_pct,
            alert_subject: self.alerts.subject.clone(),
        }
    }

    /// Check the configuration before deployment.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if KNOWN_ENVIRONMENTS.contains(&self.environment.as_str()) {
            report.pass(format!("Environment: {}", self.environment));
        } else {
            report.warn(format!("Unusual environment value: {}", self.environment));
        }

        // Detection
        let d = &self.detection;
        if d.threshold_multiplier > 0.0 && d.threshold_multiplier.is_finite() {
            report.pass(format!("Threshold multiplier: {}", d.threshold_multiplier));
        } else {
            report.error(format!(
                "Invalid threshold multiplier: {} (must be a positive number)",
                d.threshold_multiplier
            ));
        }
        if d.min_baseline_samples < 2 {
            report.error(format!(
                "Invalid minimum baseline samples: {} (need at least 2 for a standard deviation)",
                d.min_baseline_samples
            ));
        }
        if d.baseline_hours > crate::window::MAX_HOURS {
            report.error(format!(
                "Invalid baseline hours: {} (must be at most {})",
                d.baseline_hours,
                crate::window::MAX_HOURS
            ));
        } else if (d.baseline_hours as usize) < d.min_baseline_samples {
            report.warn(format!(
                "Baseline of {} hours can never reach {} samples; detection will always report insufficient data",
                d.baseline_hours, d.min_baseline_samples
            ));
        }
        if d.error_rate_floor_pct < 0.0 || d.error_rate_floor_pct > 100.0 {
            report.error(format!(
                "Invalid error rate floor: {}% (must be within 0..=100)",
                d.error_rate_floor_pct
            ));
        }

        // Source
        match self.source.kind {
            SourceKind::Sqlite => report.pass("Metric source: local SQLite store"),
            SourceKind::Http => match self.source.endpoint.as_deref() {
                None | Some("") => report.error("HTTP metric source requires source.endpoint"),
                Some(url) => match reqwest::Url::parse(url) {
                    Ok(_) => report.pass(format!("Metric source: {}", url)),
                    Err(e) => report.error(format!("Invalid metric source endpoint {}: {}", url, e)),
                },
            },
        }

        // Alerts
        if let Some(email) = self.alerts.email.as_deref() {
            if !is_valid_email(email) {
                report.error(format!("Invalid email format: {}", email));
            } else if email == PLACEHOLDER_EMAIL {
                report.warn("Using default email address. Update with your actual email.");
            } else {
                report.pass(format!("Valid email configured: {}", email));
            }
        }
        match self.alerts.webhook_url.as_deref() {
            Some(url) => match reqwest::Url::parse(url) {
                Ok(_) => report.pass("Alert webhook configured"),
                Err(e) => report.error(format!("Invalid alert webhook URL {}: {}", url, e)),
            },
            None => report.warn("No alert webhook configured; alerts will only be logged"),
        }
        if self.alerts.email.is_some() && self.alerts.webhook_url.is_none() {
            report.warn("alerts.email is only delivered through alerts.webhook_url");
        }

        // Storage
        let days = self.storage.retention_days;
        if days == 0 {
            report.error("Invalid retention days value: 0");
        } else if days > 3653 {
            report.warn(format!("Unusual retention period: {} days", days));
        }

        // Schedule
        match cron::Schedule::from_str(&self.schedule.detection_cron) {
            Ok(_) => report.pass(format!("Detection schedule: {}", self.schedule.detection_cron)),
            Err(e) => report.error(format!(
                "Invalid cron expression '{}': {}",
                self.schedule.detection_cron, e
            )),
        }

        report
    }
}

fn is_valid_email(email: &str) -> bool {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
        .map(|re| re.is_match(email))
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Standard-deviation multiple added to the baseline mean.
    pub threshold_multiplier: f64,
    /// Baseline windows required before anything is flagged.
    pub min_baseline_samples: usize,
    /// Hourly windows in the rolling baseline.
    pub baseline_hours: u32,
    /// Absolute error-rate floor, in percent.
    pub error_rate_floor_pct: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let d = DetectionSettings::default();
        Self {
            threshold_multiplier: d.threshold_multiplier,
            min_baseline_samples: d.min_baseline_samples,
            baseline_hours: d.baseline_hours,
            error_rate_floor_pct: d.error_rate_floor_pct,
        }
    }
}

// ---------------------------------------------------------------------------
// Metric source
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Sqlite,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Base URL for the HTTP source.
    pub endpoint: Option<String>,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::Sqlite,
            endpoint: None,
            timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub webhook_url: Option<String>,
    pub webhook_headers: HashMap<String, String>,
    /// Recipient address, forwarded in the webhook payload.
    pub email: Option<String>,
    pub subject: String,
    pub timeout_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_headers: HashMap::new(),
            email: None,
            subject: crate::alert::ANOMALY_SUBJECT.to_string(),
            timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// Storage / schedule / api / logging
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    /// Datapoints older than this are pruned by the daemon.
    pub retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("data/invokewatch.db"),
            retention_days: 90,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// 6-field cron expression (with seconds) for detection runs.
    pub detection_cron: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            detection_cron: "0 55 * * * *".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum tracing level when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Pricing
// ---------------------------------------------------------------------------

/// Price per token, in dollars.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPrice {
    pub input: f64,
    pub output: f64,
}

pub fn default_pricing() -> BTreeMap<String, ModelPrice> {
    BTreeMap::from([
        (
            "anthropic.claude-v2".to_string(),
            ModelPrice {
                input: 0.000_011_02,
                output: 0.000_032_68,
            },
        ),
        (
            "amazon.titan-text-express-v1".to_string(),
            ModelPrice {
                input: 0.000_000_8,
                output: 0.000_001_6,
            },
        ),
        (
            "ai21.j2-ultra-v1".to_string(),
            ModelPrice {
                input: 0.000_015,
                output: 0.000_015,
            },
        ),
        (
            "cohere.command-text-v14".to_string(),
            ModelPrice {
                input: 0.000_015,
                output: 0.000_015,
            },
        ),
    ])
}

// ---------------------------------------------------------------------------
// Validation report
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub passed: Vec<String>,
}

impl ValidationReport {
    fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    fn pass(&mut self, msg: impl Into<String>) {
        self.passed.push(msg.into());
    }

    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Remedies for the errors found.
    pub fn fix_suggestions(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        for e in &self.errors {
            let hint = if e.contains("email") {
                "Update alerts.email with a valid email address"
            } else if e.contains("webhook") {
                "Set alerts.webhook_url to a full URL, e.g. https://hooks.example.com/usage"
            } else if e.contains("source.endpoint") || e.contains("metric source endpoint") {
                "Set source.endpoint to the base URL of the datapoint service"
            } else if e.contains("cron") {
                "Use a 6-field cron expression with seconds, e.g. \"0 55 * * * *\""
            } else if e.contains("retention") {
                "Set storage.retention_days to a positive number of days"
            } else {
                "Review the [detection] section values"
            };
            if !out.contains(&hint) {
                out.push(hint);
            }
        }
        out
    }
}
