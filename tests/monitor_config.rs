use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use region_watch::config::{DisplayMode, MonitorConfig, PoolSizing};
use region_watch::Rect;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "REGION_WATCH_CONFIG",
        "REGION_WATCH_SOURCE",
        "REGION_WATCH_REGIONS",
        "REGION_WATCH_POOL_SIZE",
        "REGION_WATCH_POOL_SIZING",
        "REGION_WATCH_EVENTS_DB",
        "REGION_WATCH_SOS_THRESHOLD",
        "REGION_WATCH_SOS_TIMEFRAME_SECS",
        "REGION_WATCH_SNAPSHOT_DIR",
        "REGION_WATCH_EVIDENCE_DIR",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_config_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let cfg = MonitorConfig::load().expect("load defaults");
    assert_eq!(cfg.source, "stub://desktop");
    assert!(cfg.regions.is_empty());
    assert_eq!(cfg.queue.capacity, 20);
    assert_eq!(cfg.queue.enqueue_timeout, Duration::from_millis(100));
    assert_eq!(cfg.pool.size, 4);
    assert_eq!(cfg.pool.sizing, PoolSizing::PerTask);
    assert_eq!(cfg.display.mode, DisplayMode::Headless);
    assert_eq!(cfg.events.db_path, None);
    assert_eq!(cfg.detectors.gesture, "skin");
    assert_eq!(cfg.detectors.violence, "motion");
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "source": "stub://lobby",
        "working_resolution": [320, 240],
        "regions": [
            { "rect": [0, 0, 200, 150], "location": "Gate" },
            { "rect": [400, 300, -100, -80] }
        ],
        "sos": { "threshold_count": 4, "timeframe_secs": 15 },
        "queue": { "capacity": 8, "enqueue_timeout_ms": 50 },
        "pool": { "sizing": "fixed", "size": 6 },
        "events": {
            "db_path": "events_prod.db",
            "retention_secs": 3600,
            "evidence_dir": "evidence"
        },
        "detectors": {
            "gesture": "stub",
            "motion_threshold": 12.5,
            "incident_cooldown_ms": 750,
            "gesture_threshold": 0.7
        }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("REGION_WATCH_CONFIG", file.path());
    std::env::set_var("REGION_WATCH_POOL_SIZE", "8");
    std::env::set_var("REGION_WATCH_SOS_TIMEFRAME_SECS", "20");

    let cfg = MonitorConfig::load().expect("load config");

    assert_eq!(cfg.source, "stub://lobby");
    assert_eq!((cfg.working_width, cfg.working_height), (320, 240));
    assert_eq!(cfg.detectors.input_width, 320);
    assert_eq!(cfg.regions.len(), 2);
    assert_eq!(cfg.regions[0].location.as_deref(), Some("Gate"));
    assert_eq!(cfg.regions[1].rect, Rect::new(400, 300, -100, -80));
    assert_eq!(cfg.regions[1].location, None);
    assert_eq!(cfg.sos.threshold_count, 4);
    assert_eq!(cfg.sos.timeframe, Duration::from_secs(20));
    assert_eq!(cfg.queue.capacity, 8);
    assert_eq!(cfg.queue.enqueue_timeout, Duration::from_millis(50));
    assert_eq!(cfg.queue.dequeue_timeout, Duration::from_millis(100));
    assert_eq!(cfg.pool.sizing, PoolSizing::Fixed);
    assert_eq!(cfg.pool.size, 8);
    assert_eq!(cfg.events.db_path.as_deref(), Some("events_prod.db"));
    assert_eq!(cfg.events.retention, Duration::from_secs(3600));
    assert_eq!(cfg.detectors.gesture, "stub");
    assert_eq!(cfg.detectors.violence, "motion");
    assert!((cfg.detectors.motion_threshold - 12.5).abs() < f32::EPSILON);
    assert_eq!(cfg.detectors.incident_cooldown, Duration::from_millis(750));
    assert!((cfg.detectors.gesture_threshold - 0.7).abs() < f32::EPSILON);
    assert_eq!(
        cfg.events.evidence_dir.as_deref(),
        Some(std::path::Path::new("evidence"))
    );

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
source = "stub://toml"

[[regions]]
rect = [10, 10, 50, 50]
location = "Dock"

[display]
mode = "snapshot"
snapshot_dir = "snaps"
interval_ms = 250
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    std::env::set_var("REGION_WATCH_CONFIG", file.path());

    let cfg = MonitorConfig::load().expect("load toml config");
    assert_eq!(cfg.source, "stub://toml");
    assert_eq!(cfg.regions[0].location.as_deref(), Some("Dock"));
    assert_eq!(cfg.display.mode, DisplayMode::Snapshot);
    assert_eq!(cfg.display.interval, Duration::from_millis(250));

    clear_env();
}

#[test]
fn env_regions_and_snapshot_dir() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    std::env::set_var("REGION_WATCH_REGIONS", "0,0,100,100@Gate;50,50,-20,30@Lobby");
    std::env::set_var("REGION_WATCH_SNAPSHOT_DIR", "/tmp/region-watch-snaps");
    std::env::set_var("REGION_WATCH_POOL_SIZING", "per_task");
    std::env::set_var("REGION_WATCH_EVIDENCE_DIR", "/tmp/region-watch-evidence");

    let cfg = MonitorConfig::load().expect("load env config");
    assert_eq!(cfg.regions.len(), 2);
    assert_eq!(cfg.regions[1].rect.normalize(), Rect::new(30, 50, 20, 30));
    assert_eq!(cfg.display.mode, DisplayMode::Snapshot);
    assert_eq!(cfg.pool.sizing, PoolSizing::PerTask);
    assert_eq!(
        cfg.events.evidence_dir.as_deref(),
        Some(std::path::Path::new("/tmp/region-watch-evidence"))
    );

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_env();

    std::env::set_var("REGION_WATCH_SOS_THRESHOLD", "0");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    std::env::set_var("REGION_WATCH_POOL_SIZE", "many");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    std::env::set_var("REGION_WATCH_REGIONS", "0,0,0,100@Nowhere");
    assert!(MonitorConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "queue": { "capacity": 0 } }"#)
        .expect("write config");
    std::env::set_var("REGION_WATCH_CONFIG", file.path());
    assert!(MonitorConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(
        &mut file,
        br#"{ "events": { "retention_secs": 18446744073709551615 } }"#,
    )
    .expect("write config");
    std::env::set_var("REGION_WATCH_CONFIG", file.path());
    assert!(MonitorConfig::load().is_err());

    clear_env();
}
