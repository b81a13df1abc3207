//! region_watch - multi-region SOS gesture and violence monitor
//!
//! This daemon:
//! 1. Loads the monitor config (file, env, then command-line overrides)
//! 2. Registers the configured regions
//! 3. Runs a gesture and a violence task per region on the worker pool
//! 4. Feeds annotated frames to the display sink
//! 5. Records SOS alerts and violence incidents to the event sink
//! 6. Stops on Ctrl-C, display request, or after `--run-secs`

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use region_watch::{DetectorRegistry, DisplayMode, Monitor, MonitorConfig, RegionSpec};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension).
    #[arg(long, env = "REGION_WATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Region to monitor as "x,y,width,height@Location". Repeatable.
    #[arg(long = "region", value_name = "SPEC")]
    regions: Vec<String>,
    /// Frame source: stub://<name> or a desktop snapshot image path.
    #[arg(long)]
    source: Option<String>,
    /// Write the latest frame per tracker into this directory.
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,
    /// Gesture backend name.
    #[arg(long)]
    gesture: Option<String>,
    /// Violence backend name.
    #[arg(long)]
    violence: Option<String>,
    /// Worker pool sizing policy (fixed|per_task).
    #[arg(long, value_name = "POLICY")]
    pool_sizing: Option<String>,
    /// SQLite database for detection events.
    #[arg(long)]
    events_db: Option<String>,
    /// Save an evidence PNG per detection under <DIR>/<location>/<kind>/.
    #[arg(long, value_name = "DIR")]
    evidence_dir: Option<PathBuf>,
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    run_secs: Option<u64>,
    /// Print the available detector backends and exit.
    #[arg(long)]
    list_backends: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = MonitorConfig::load_from(args.config.as_deref())?;
    apply_args(&mut cfg, &args)?;
    cfg.validate()?;

    if args.list_backends {
        let registry = DetectorRegistry::with_builtin(&cfg.detectors)?;
        println!("gesture: {}", registry.gesture_backends().join(", "));
        println!("violence: {}", registry.violence_backends().join(", "));
        return Ok(());
    }

    let mut monitor = Monitor::from_config(cfg)?;
    if monitor.registry().is_empty() {
        return Err(anyhow!(
            "no regions configured (use --region x,y,w,h@Location or REGION_WATCH_REGIONS)"
        ));
    }
    for region in monitor.registry().list() {
        log::info!(
            "region {}: {} -> {}",
            region.id,
            region.capture_rect(),
            region.location
        );
    }

    monitor.start()?;
    let cancel = monitor.cancel_handle();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel())
            .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;
    }

    match args.run_secs {
        Some(secs) => {
            log::info!("region_watch running for {}s", secs);
            if !cancel.wait_timeout(Duration::from_secs(secs)) {
                cancel.cancel();
            }
        }
        None => {
            log::info!("region_watch running; Ctrl-C to stop");
            monitor.wait();
        }
    }

    log::info!("shutdown requested, stopping monitor...");
    let stats = monitor.stats();
    monitor.quit()?;
    println!("{}", serde_json::to_string(&stats)?);
    Ok(())
}

fn apply_args(cfg: &mut MonitorConfig, args: &Args) -> Result<()> {
    if let Some(source) = &args.source {
        cfg.source = source.clone();
    }
    if !args.regions.is_empty() {
        cfg.regions = args
            .regions
            .iter()
            .map(|spec| spec.parse::<RegionSpec>())
            .collect::<Result<_>>()?;
    }
    if let Some(dir) = &args.snapshot_dir {
        cfg.display.mode = DisplayMode::Snapshot;
        cfg.display.snapshot_dir = Some(dir.clone());
    }
    if let Some(gesture) = &args.gesture {
        cfg.detectors.gesture = gesture.clone();
    }
    if let Some(violence) = &args.violence {
        cfg.detectors.violence = violence.clone();
    }
    if let Some(sizing) = &args.pool_sizing {
        cfg.pool.sizing = sizing.parse()?;
    }
    if let Some(db) = &args.events_db {
        cfg.events.db_path = Some(db.clone());
    }
    if let Some(dir) = &args.evidence_dir {
        cfg.events.evidence_dir = Some(dir.clone());
    }
    Ok(())
}
