// lakeflow - ingestion-to-warehouse data lake pipeline
//
// `serve` runs the full pipeline behind one HTTP server. The other
// subcommands run a single stage once against the configured storage
// backend, for operators and cron jobs.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lakeflow_config::RuntimeConfig;
use lakeflow_server::AppState;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "lakeflow", about = "ingestion-to-warehouse data lake pipeline")]
struct Cli {
    /// Config file path. Falls back to LAKEFLOW_CONFIG, then
    /// ./lakeflow.toml, then built-in defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server with all background schedulers (default)
    Serve,
    /// Transform one raw source into the processed zone and exit
    Transform {
        #[arg(long)]
        source: String,
    },
    /// Refresh the schema snapshot for a zone and exit
    Refresh {
        #[arg(long)]
        zone: String,
    },
    /// Plan and execute one query
    Query {
        #[arg(long)]
        sql: String,
    },
    /// Bulk load a source into a warehouse dataset
    Load {
        #[arg(long, default_value = "processed")]
        zone: String,
        #[arg(long)]
        source: String,
        #[arg(long)]
        dataset: String,
    },
    /// Plan tier transitions for aged raw objects and collect stale
    /// temp objects
    Lifecycle,
}

fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json_logs = std::env::var("LAKEFLOW_LOG_FORMAT")
        .map(|f| f == "json")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);
    if json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => RuntimeConfig::load_from_path(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => RuntimeConfig::load()?,
    };

    let state = AppState::from_config(config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => lakeflow_server::serve(state).await,
        Command::Transform { source } => {
            let report = state.transform.run(&source).await?;
            println!(
                "{}",
                serde_json::json!({
                    "source": source,
                    "objects_seen": report.objects_seen,
                    "objects_transformed": report.objects_transformed,
                    "partitions_written": report.partitions_written,
                    "records_out": report.records_out,
                    "records_dropped": report.records_dropped,
                })
            );
            Ok(())
        }
        Command::Refresh { zone } => {
            let zone = zone.parse()?;
            let snapshot = state.catalog.refresh(zone).await?;
            println!(
                "{}",
                serde_json::json!({
                    "zone": zone.as_str(),
                    "columns": snapshot.columns,
                    "scanned_objects": snapshot.scanned_objects,
                    "skipped_objects": snapshot.skipped_objects,
                })
            );
            Ok(())
        }
        Command::Query { sql } => {
            let result = state.query.run(&sql).await?;
            for row in &result.rows {
                println!("{}", row);
            }
            tracing::info!(
                rows = result.rows.len(),
                bytes_scanned = result.bytes_scanned,
                "query complete"
            );
            Ok(())
        }
        Command::Lifecycle => {
            use lakeflow_storage::lifecycle::LifecyclePolicy;

            let policy = LifecyclePolicy::from_config(&state.config.lifecycle);
            let now = chrono::Utc::now();
            let objects = state.store.list_raw("raw/").await?;
            let transitions = policy.plan_transitions(&objects, now);
            let collected = policy.collect_stale_temp(&state.store, now).await?;
            println!(
                "{}",
                serde_json::json!({
                    "transitions": transitions,
                    "stale_temp_collected": collected,
                })
            );
            Ok(())
        }
        Command::Load {
            zone,
            source,
            dataset,
        } => {
            let zone = zone.parse()?;
            let report = state.loader.load(zone, &source, &dataset).await?;
            println!(
                "{}",
                serde_json::json!({
                    "dataset": report.dataset,
                    "load_id": report.load_id,
                    "objects": report.objects,
                    "bytes": report.bytes,
                })
            );
            Ok(())
        }
    }
}
