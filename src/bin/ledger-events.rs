//! ledger-events CLI: operator interface to the event store.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use ledger_events::config::Config;
use ledger_events::config::secrets::ExposeSecret;
use ledger_events::db::Db;
use ledger_events::model::Event;
use ledger_events::telemetry::{TelemetryConfig, init_telemetry};
use ledger_events::worker::EventWorker;

#[derive(Parser)]
#[command(name = "ledger-events", about = "Expense ledger event log")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create or update the events table
    Migrate,
    /// Log one event through the worker and wait for it to be persisted
    Emit {
        /// Event category (e.g. "user.logged_in")
        category: String,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
        /// Tag as key=value; repeatable
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,
    },
    /// List events of a category, newest first
    List {
        /// Event category
        category: String,
        /// Maximum events to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "ledger-events".to_string(),
        log_level: config.log_level.clone(),
    })?;

    let db = Db::connect(config.database_url.expose_secret()).await?;
    db.migrate().await?;

    let result = match cli.command {
        Command::Migrate => {
            println!("Migrations applied.");
            Ok(())
        }
        Command::Emit {
            category,
            payload,
            tags,
        } => cmd_emit(db, &config, category, payload, tags).await,
        Command::List { category, limit } => cmd_list(&db, &category, limit).await,
    };

    guard.force_flush();
    result
}

async fn cmd_emit(
    db: Db,
    config: &Config,
    category: String,
    payload: Option<String>,
    tags: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let payload: serde_json::Value = match payload {
        Some(json) => serde_json::from_str(&json)?,
        None => serde_json::json!({}),
    };
    let event = Event::with_tags(category, payload, tags);
    let id = event.id();

    let mut worker = EventWorker::new(Arc::new(db), config.worker_config());
    worker.start()?;
    worker.log(event);
    let stats = worker.shutdown().await?;

    if stats.persisted == 1 {
        println!("Persisted: {id}");
    } else {
        anyhow::bail!(
            "event {id} not persisted (accepted {}, dropped {}, failed {})",
            stats.accepted,
            stats.dropped,
            stats.failed
        );
    }
    Ok(())
}

async fn cmd_list(db: &Db, category: &str, limit: i64) -> anyhow::Result<()> {
    let events = db.recent_events_by_category(category, limit).await?;

    if events.is_empty() {
        println!("No events found.");
        return Ok(());
    }

    println!("{:<36}  {:<19}  {:<30}  DATA", "ID", "CREATED", "TAGS");
    println!("{}", "-".repeat(110));

    for event in &events {
        let tags = event
            .tags()
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        println!(
            "{:<36}  {:<19}  {:<30}  {}",
            event.id(),
            event.created_at().format("%Y-%m-%d %H:%M:%S"),
            if tags.is_empty() { "-" } else { tags.as_str() },
            serde_json::to_string(event.payload())?
        );
    }

    println!("\n{} event(s)", events.len());
    Ok(())
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))
}
