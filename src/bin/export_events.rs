//! export_events - dump stored detection events as JSON lines

use anyhow::{anyhow, Result};
use clap::Parser;
use std::io::Write;

use region_watch::{EventKind, EventQuery, SqliteEventStore};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the events database.
    #[arg(long, env = "REGION_WATCH_EVENTS_DB", default_value = "region_watch.db")]
    db_path: String,
    /// Maximum number of (most recent) matching events to export.
    #[arg(long, default_value_t = 1000)]
    limit: usize,
    /// Only export this kind (sos_gesture|violence).
    #[arg(long, value_name = "KIND")]
    kind: Option<String>,
    /// Only export events for this location.
    #[arg(long)]
    location: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let kind = match args.kind.as_deref() {
        None => None,
        Some("sos_gesture") => Some(EventKind::SosGesture),
        Some("violence") => Some(EventKind::Violence),
        Some(other) => {
            return Err(anyhow!(
                "unknown event kind '{}' (expected sos_gesture or violence)",
                other
            ))
        }
    };

    let store = SqliteEventStore::open(&args.db_path)?;
    let events = store.query(&EventQuery {
        kind,
        location: args.location.clone(),
        limit: args.limit,
    })?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for event in &events {
        writeln!(out, "{}", serde_json::to_string(event)?)?;
    }
    log::info!("exported {} event(s) from {}", events.len(), args.db_path);
    Ok(())
}
