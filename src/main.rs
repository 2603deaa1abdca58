use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use invokewatch::config::{Config, LoggingConfig, SourceKind};
use invokewatch::detect::engine::CheckOutcome;
use invokewatch::metrics::{Datapoint, Observation};

#[derive(Parser)]
#[command(
    name = "invokewatch",
    about = "Usage monitoring and anomaly detection for model invocation traffic",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file (default: $INVOKEWATCH_CONFIG, then /etc/invokewatch/invokewatch.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + scheduled detection)
    Serve {
        /// Bind address, overrides api.bind
        #[arg(long)]
        bind: Option<String>,
    },

    /// Run one anomaly detection pass for the current hour
    Detect {
        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,

        /// Standard-deviation multiple, overrides detection.threshold_multiplier
        #[arg(long)]
        threshold: Option<f64>,

        /// Do not forward anomalies to the alert sink
        #[arg(long)]
        no_alert: bool,
    },

    /// Show aggregate usage metrics for the last N hours
    Metrics {
        #[arg(long, default_value = "24")]
        hours: u32,
    },

    /// Estimate token cost for the last N days
    Cost {
        #[arg(long, default_value = "30")]
        days: u32,
    },

    /// Executive summary with trends and recommendations
    Summary {
        #[arg(long, default_value = "7")]
        days: u32,
    },

    /// Record a datapoint in the local store
    Record {
        #[arg(long)]
        invocations: f64,

        #[arg(long, default_value = "0")]
        errors: f64,

        #[arg(long, default_value = "0")]
        input_tokens: f64,

        #[arg(long, default_value = "0")]
        output_tokens: f64,

        #[arg(long, default_value = "0")]
        duration_ms: f64,

        /// Model id the invocations were served by
        #[arg(long)]
        model: Option<String>,

        /// Caller identity, for distinct-user counts
        #[arg(long)]
        user: Option<String>,

        /// RFC 3339 timestamp (default: now)
        #[arg(long)]
        at: Option<String>,
    },

    /// Validate configuration before deployment
    ValidateConfig,

    /// Inspect the detection schedule
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Preview what will run in the next N hours
    DryRun {
        /// Hours to preview
        #[arg(long, default_value = "24")]
        hours: u32,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    // Logs go to stderr so report output on stdout stays parseable
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn outcome_line(name: &str, outcome: &CheckOutcome) -> String {
    match outcome {
        CheckOutcome::InsufficientData { have, needed } => {
            format!("{:<12} | insufficient data ({} of {} baseline windows)", name, have, needed)
        }
        CheckOutcome::Skipped { reason } => format!("{:<12} | skipped: {}", name, reason),
        CheckOutcome::Normal {
            observed,
            baseline_mean,
            threshold,
        } => format!(
            "{:<12} | normal: {:.2} (mean {:.2}, threshold {:.2})",
            name, observed, baseline_mean, threshold
        ),
        CheckOutcome::Anomalous(a) => format!(
            "{:<12} | ANOMALY [{}]: {:.2} (mean {:.2}, threshold {:.2})",
            name, a.severity, a.observed_value, a.baseline_mean, a.threshold
        ),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::resolve(cli.config.as_deref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind } => {
            let mut config = config;
            if let Some(bind) = bind {
                config.api.bind = bind;
            }
            tracing::info!(bind = %config.api.bind, "Starting invokewatch daemon");
            invokewatch::serve(config).await?;
        }
        Commands::Detect {
            json,
            threshold,
            no_alert,
        } => {
            let mut config = config;
            if let Some(t) = threshold {
                config.detection.threshold_multiplier = t;
            }
            let handle = invokewatch::build_source(&config)?;
            let engine = invokewatch::build_engine(&config, handle.source)?;
            let report = if no_alert {
                engine.detect_at(Utc::now()).await
            } else {
                engine.run().await
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("\ninvokewatch Anomaly Detection");
                println!("Window:   {} (+1h)", report.window_start.to_rfc3339());
                println!(
                    "Baseline: {} windows ({} missing)",
                    report.baseline_windows, report.missing_windows
                );
                println!("{}", outcome_line("usage", &report.usage));
                println!("{}", outcome_line("error rate", &report.error_rate));
                if report.anomalies.is_empty() {
                    println!("\nNo anomalies detected.");
                } else {
                    println!("\n{}", invokewatch::alert::format_alert(&report.anomalies));
                    match report.alert_delivered {
                        Some(true) => println!("Alert delivered."),
                        Some(false) => println!("Alert delivery FAILED (see log)."),
                        None => println!("Alert not sent (--no-alert)."),
                    }
                }
                println!();
            }
        }
        Commands::Metrics { hours } => {
            let end = Utc::now();
            let start = invokewatch::window::hours_before(end, hours)?;
            let handle = invokewatch::build_source(&config)?;
            match invokewatch::metrics::observe(handle.source.as_ref(), start, end).await {
                Observation::Observed(m) => println!("{}", serde_json::to_string_pretty(&m)?),
                Observation::Missing { reason } => {
                    anyhow::bail!("metrics unavailable for the last {} hours: {}", hours, reason)
                }
            }
        }
        Commands::Cost { days } => {
            let handle = invokewatch::build_source(&config)?;
            let analysis =
                invokewatch::analysis::cost::analyze_period(handle.source.as_ref(), &config.pricing, days, Utc::now())
                    .await?;
            println!("{}", serde_json::to_string_pretty(&analysis)?);
        }
        Commands::Summary { days } => {
            let handle = invokewatch::build_source(&config)?;
            let summary = invokewatch::analysis::summary::build_summary(
                handle.source.as_ref(),
                &config.pricing,
                days,
                Utc::now(),
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Record {
            invocations,
            errors,
            input_tokens,
            output_tokens,
            duration_ms,
            model,
            user,
            at,
        } => {
            if config.source.kind != SourceKind::Sqlite {
                anyhow::bail!("record writes to the local store; source.kind is not 'sqlite'");
            }
            let timestamp = match at {
                Some(s) => DateTime::parse_from_rfc3339(&s)
                    .with_context(|| format!("invalid timestamp: {}", s))?
                    .with_timezone(&Utc),
                None => Utc::now(),
            };
            let pool = invokewatch::storage::open_pool(&config.storage.database_path.to_string_lossy())?;
            invokewatch::storage::record_datapoint(
                &pool,
                &Datapoint {
                    timestamp,
                    invocations,
                    errors,
                    input_tokens,
                    output_tokens,
                    duration_ms,
                    model_id: model,
                    user_id: user,
                },
            )?;
            println!("Datapoint recorded at {}.", timestamp.to_rfc3339());
        }
        Commands::ValidateConfig => {
            let report = config.validate();
            println!("\ninvokewatch Configuration Validation");
            if !report.errors.is_empty() {
                println!("\nERRORS (must be fixed before deployment):");
                for e in &report.errors {
                    println!("   {}", e);
                }
            }
            if !report.warnings.is_empty() {
                println!("\nWARNINGS (recommended to address):");
                for w in &report.warnings {
                    println!("   {}", w);
                }
            }
            if !report.passed.is_empty() {
                println!("\nOK:");
                for p in &report.passed {
                    println!("   {}", p);
                }
            }

            if report.is_valid() {
                println!("\nVALIDATION PASSED ({} warning(s))", report.warnings.len());
            } else {
                println!("\nVALIDATION FAILED: {} error(s) found", report.errors.len());
                println!("\nSuggested fixes:");
                for (i, hint) in report.fix_suggestions().iter().enumerate() {
                    println!("   {}. {}", i + 1, hint);
                }
                std::process::exit(1);
            }
        }
        Commands::Schedule { action } => match action {
            ScheduleAction::DryRun { hours } => {
                let schedule = invokewatch::scheduler::DetectionSchedule::parse(&config.schedule.detection_cron)?;
                let preview = schedule.preview(Utc::now(), hours)?;
                if preview.is_empty() {
                    println!("No runs scheduled in next {} hours.", hours);
                } else {
                    println!("Upcoming detection runs (next {} hours, cron '{}'):", hours, schedule.expr());
                    for t in preview {
                        println!("{}", t.to_rfc3339());
                    }
                }
            }
        },
    }

    Ok(())
}
