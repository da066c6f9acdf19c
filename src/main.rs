#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use loadpulse::config::{OutputConfig, ShapeConfig};
use loadpulse::export::{self, ExportConfig, MetricsExporter, MlflowClient};
use loadpulse::shape::{LoadShape, Tick};
use loadpulse::traces::{CorrelatorConfig, TempoClient, TraceCorrelator};

#[derive(Parser)]
#[command(name = "loadpulse")]
#[command(version, about = "Load shapes, trace correlation and metrics export for load tests", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print when the configured shape changes its target, through the stop
    Plan,

    /// Correlate traces from the test window and write trace_metrics.json
    Traces {
        /// Directory holding the test_start_epoch/test_end_epoch files
        #[arg(long, env = "LOCUST_OUTPUT_DIR")]
        results_dir: Option<PathBuf>,

        /// Tempo query endpoint, e.g. http://tempo:3200
        #[arg(long, env = "TEMPO_ENDPOINT")]
        tempo_endpoint: String,

        #[arg(long, default_value = "llamastack")]
        service_name: String,

        /// Seconds added to both ends of the test window
        #[arg(long, default_value = "120")]
        search_window_buffer: u64,

        #[arg(long, default_value = "1000")]
        max_traces: usize,

        /// Seconds to wait for the tracing pipeline to flush before searching
        #[arg(long, default_value = "15")]
        flush_wait_secs: u64,
    },

    /// Merge every result file and log it to MLflow
    Export {
        #[arg(long, env = "LOCUST_OUTPUT_DIR")]
        results_dir: Option<PathBuf>,

        #[arg(long, default_value = "llamastack-benchmarks")]
        experiment: String,

        #[arg(long, default_value = "tekton")]
        run_name_prefix: String,

        /// Run parameter as key=value; repeatable
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Also log the load shape configured in the environment
        #[arg(long)]
        shape_params: bool,

        /// MLflow tracking server; falls back to MLFLOW_URL
        #[arg(long, env = "MLFLOW_TRACKING_URI")]
        tracking_uri: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loadpulse=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Plan => print_plan(&LoadShape::from_config(&ShapeConfig::from_env())),
        Commands::Traces {
            results_dir,
            tempo_endpoint,
            service_name,
            search_window_buffer,
            max_traces,
            flush_wait_secs,
        } => {
            let results_dir = results_dir.unwrap_or_else(|| OutputConfig::from_env().results_dir);
            let config = CorrelatorConfig {
                service_name,
                search_window_buffer: Duration::from_secs(search_window_buffer),
                max_traces,
                flush_wait: Duration::from_secs(flush_wait_secs),
                ..CorrelatorConfig::default()
            };
            let store = TempoClient::new(&tempo_endpoint, config.fetch_timeout)
                .context("building Tempo client")?;
            info!("Tempo endpoint: {}", store.endpoint());

            let correlator = TraceCorrelator::new(Arc::new(store), config);
            correlator
                .run(&results_dir)
                .await
                .with_context(|| format!("writing trace metrics to {}", results_dir.display()))?;
        }
        Commands::Export {
            results_dir,
            experiment,
            run_name_prefix,
            params,
            shape_params,
            tracking_uri,
        } => {
            let results_dir = results_dir.unwrap_or_else(|| OutputConfig::from_env().results_dir);
            let tracking_uri = tracking_uri
                .or_else(|| std::env::var("MLFLOW_URL").ok())
                .filter(|uri| !uri.is_empty());
            let Some(tracking_uri) = tracking_uri else {
                error!("No MLflow tracking server configured (set MLFLOW_TRACKING_URI or MLFLOW_URL)");
                return Ok(());
            };

            let mut raw = Vec::new();
            if shape_params {
                raw.extend(ShapeConfig::from_env().as_params());
            }
            raw.extend(params);
            let params = export::parse_params(&raw);

            info!("Connecting to MLflow: {}", tracking_uri);
            let backend = MlflowClient::new(&tracking_uri, MlflowClient::DEFAULT_TIMEOUT)
                .context("building MLflow client")?
                .with_token(std::env::var("MLFLOW_TRACKING_TOKEN").ok());
            let exporter = MetricsExporter::new(
                Arc::new(backend),
                ExportConfig {
                    experiment,
                    run_name_prefix,
                },
            );

            let report = exporter
                .run(&results_dir, params)
                .await
                .context("exporting metrics to MLflow")?;
            info!(
                points = report.points,
                chunks = report.chunks_sent,
                failed = report.chunks_failed,
                "MLflow logging complete! Run: {}",
                report.run_name
            );
        }
    }

    Ok(())
}

/// Prints every second at which the decision changes, through the first stop.
fn print_plan(shape: &LoadShape) {
    if let Some(problem) = shape.configuration_warning() {
        println!("{} shape is misconfigured: {}", shape.name(), problem);
    }
    println!("Load shape: {}", shape.name());
    println!("{:>8}  {:>6}  {:>10}", "second", "users", "spawn_rate");

    for (second, tick) in shape.plan() {
        match tick {
            Tick::Run(target) => println!("{:>8}  {:>6}  {:>10}", second, target.users, target.spawn_rate),
            Tick::Stop => println!("{:>8}  STOP", second),
        }
    }
}
