use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::detect::{MotionViolenceDetector, SkinToneGestureDetector};
use crate::gesture::{SosPolicy, SOS_THRESHOLD_COUNT, SOS_TIMEFRAME};
use crate::queue::{QUEUE_CAPACITY, QUEUE_TIMEOUT};
use crate::region::{Rect, RegionSpec};

/// Worker count used by the `fixed` sizing policy.
pub const WORKER_POOL_SIZE: usize = 4;

const DEFAULT_SOURCE: &str = "stub://desktop";
const DEFAULT_WORKING_WIDTH: u32 = 640;
const DEFAULT_WORKING_HEIGHT: u32 = 480;
const DEFAULT_GESTURE_BACKEND: &str = "skin";
const DEFAULT_VIOLENCE_BACKEND: &str = "motion";
const DEFAULT_GESTURE_THRESHOLD: f32 = 0.5;
const DEFAULT_SNAPSHOT_INTERVAL_MS: u64 = 500;
const DEFAULT_RETENTION_SECS: u64 = 60 * 60 * 24 * 30;
const DEFAULT_CAPTURE_BACKOFF_MS: u64 = 250;
const DEFAULT_SHUTDOWN_TIMEOUT_MS: u64 = 5_000;
/// Event timestamps are stored as signed seconds.
const MAX_RETENTION_SECS: u64 = i64::MAX as u64;

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    source: Option<String>,
    working_resolution: Option<[u32; 2]>,
    regions: Option<Vec<RegionConfigFile>>,
    sos: Option<SosConfigFile>,
    queue: Option<QueueConfigFile>,
    pool: Option<PoolConfigFile>,
    display: Option<DisplayConfigFile>,
    events: Option<EventsConfigFile>,
    detectors: Option<DetectorsConfigFile>,
    capture_backoff_ms: Option<u64>,
    shutdown_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct RegionConfigFile {
    rect: [i32; 4],
    location: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct SosConfigFile {
    threshold_count: Option<u32>,
    timeframe_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct QueueConfigFile {
    capacity: Option<usize>,
    enqueue_timeout_ms: Option<u64>,
    dequeue_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct PoolConfigFile {
    sizing: Option<String>,
    size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    mode: Option<String>,
    snapshot_dir: Option<PathBuf>,
    interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct EventsConfigFile {
    db_path: Option<String>,
    retention_secs: Option<u64>,
    evidence_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorsConfigFile {
    gesture: Option<String>,
    violence: Option<String>,
    skin_min_coverage: Option<f32>,
    motion_threshold: Option<f32>,
    incident_cooldown_ms: Option<u64>,
    gesture_model: Option<PathBuf>,
    gesture_threshold: Option<f32>,
}

/// How many workers the pool gets for a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PoolSizing {
    /// Exactly `PoolSettings::size` workers. Every task holds a worker for its
    /// whole life, so only `size / 2` regions are serviced.
    Fixed,
    /// One worker per task: `2 x region count`.
    PerTask,
}

impl FromStr for PoolSizing {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed" => Ok(PoolSizing::Fixed),
            "per_task" | "per-task" => Ok(PoolSizing::PerTask),
            other => Err(anyhow!(
                "pool sizing must be 'fixed' or 'per_task', got '{}'",
                other
            )),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DisplayMode {
    Headless,
    Snapshot,
}

impl FromStr for DisplayMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "headless" => Ok(DisplayMode::Headless),
            "snapshot" => Ok(DisplayMode::Snapshot),
            other => Err(anyhow!(
                "display mode must be 'headless' or 'snapshot', got '{}'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub source: String,
    pub working_width: u32,
    pub working_height: u32,
    pub regions: Vec<RegionSpec>,
    pub sos: SosPolicy,
    pub queue: QueueSettings,
    pub pool: PoolSettings,
    pub display: DisplaySettings,
    pub events: EventSettings,
    pub detectors: DetectorSettings,
    pub capture_backoff: Duration,
    pub shutdown_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub capacity: usize,
    pub enqueue_timeout: Duration,
    pub dequeue_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub sizing: PoolSizing,
    pub size: usize,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub mode: DisplayMode,
    pub snapshot_dir: Option<PathBuf>,
    pub interval: Duration,
}

#[derive(Debug, Clone)]
pub struct EventSettings {
    /// SQLite database for detection events. `None` logs events only.
    pub db_path: Option<String>,
    pub retention: Duration,
    /// Root for evidence PNGs. `None` records events without images.
    pub evidence_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub gesture: String,
    pub violence: String,
    pub skin_min_coverage: f32,
    pub motion_threshold: f32,
    /// Minimum gap between two motion incidents at one location.
    pub incident_cooldown: Duration,
    pub gesture_model: Option<PathBuf>,
    /// Open-hand confidence the ONNX classifier must reach.
    pub gesture_threshold: f32,
    pub input_width: u32,
    pub input_height: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            gesture: DEFAULT_GESTURE_BACKEND.to_string(),
            violence: DEFAULT_VIOLENCE_BACKEND.to_string(),
            skin_min_coverage: SkinToneGestureDetector::DEFAULT_MIN_COVERAGE,
            motion_threshold: MotionViolenceDetector::DEFAULT_THRESHOLD,
            incident_cooldown: MotionViolenceDetector::DEFAULT_COOLDOWN,
            gesture_model: None,
            gesture_threshold: DEFAULT_GESTURE_THRESHOLD,
            input_width: DEFAULT_WORKING_WIDTH,
            input_height: DEFAULT_WORKING_HEIGHT,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            working_width: DEFAULT_WORKING_WIDTH,
            working_height: DEFAULT_WORKING_HEIGHT,
            regions: Vec::new(),
            sos: SosPolicy::default(),
            queue: QueueSettings {
                capacity: QUEUE_CAPACITY,
                enqueue_timeout: QUEUE_TIMEOUT,
                dequeue_timeout: QUEUE_TIMEOUT,
            },
            pool: PoolSettings {
                sizing: PoolSizing::PerTask,
                size: WORKER_POOL_SIZE,
            },
            display: DisplaySettings {
                mode: DisplayMode::Headless,
                snapshot_dir: None,
                interval: Duration::from_millis(DEFAULT_SNAPSHOT_INTERVAL_MS),
            },
            events: EventSettings {
                db_path: None,
                retention: Duration::from_secs(DEFAULT_RETENTION_SECS),
                evidence_dir: None,
            },
            detectors: DetectorSettings::default(),
            capture_backoff: Duration::from_millis(DEFAULT_CAPTURE_BACKOFF_MS),
            shutdown_timeout: Duration::from_millis(DEFAULT_SHUTDOWN_TIMEOUT_MS),
        }
    }
}

impl MonitorConfig {
    /// Load the file named by `REGION_WATCH_CONFIG` (if any), then apply env
    /// overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("REGION_WATCH_CONFIG")
            .ok()
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Same as `load`, with an explicit config file instead of the env var.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(source) = file.source {
            cfg.source = source;
        }
        if let Some([width, height]) = file.working_resolution {
            cfg.working_width = width;
            cfg.working_height = height;
        }
        if let Some(regions) = file.regions {
            cfg.regions = regions
                .into_iter()
                .map(|r| RegionSpec {
                    rect: Rect::new(r.rect[0], r.rect[1], r.rect[2], r.rect[3]),
                    location: r.location.filter(|l| !l.trim().is_empty()),
                })
                .collect();
        }
        if let Some(sos) = file.sos {
            cfg.sos = SosPolicy {
                threshold_count: sos.threshold_count.unwrap_or(SOS_THRESHOLD_COUNT),
                timeframe: sos
                    .timeframe_secs
                    .map(Duration::from_secs)
                    .unwrap_or(SOS_TIMEFRAME),
            };
        }
        if let Some(queue) = file.queue {
            if let Some(capacity) = queue.capacity {
                cfg.queue.capacity = capacity;
            }
            if let Some(ms) = queue.enqueue_timeout_ms {
                cfg.queue.enqueue_timeout = Duration::from_millis(ms);
            }
            if let Some(ms) = queue.dequeue_timeout_ms {
                cfg.queue.dequeue_timeout = Duration::from_millis(ms);
            }
        }
        if let Some(pool) = file.pool {
            if let Some(sizing) = pool.sizing {
                cfg.pool.sizing = sizing.parse()?;
            }
            if let Some(size) = pool.size {
                cfg.pool.size = size;
            }
        }
        if let Some(display) = file.display {
            if let Some(mode) = display.mode {
                cfg.display.mode = mode.parse()?;
            }
            cfg.display.snapshot_dir = display.snapshot_dir;
            if let Some(ms) = display.interval_ms {
                cfg.display.interval = Duration::from_millis(ms);
            }
        }
        if let Some(events) = file.events {
            cfg.events.db_path = events.db_path;
            if let Some(secs) = events.retention_secs {
                cfg.events.retention = Duration::from_secs(secs);
            }
            cfg.events.evidence_dir = events.evidence_dir;
        }
        if let Some(detectors) = file.detectors {
            if let Some(gesture) = detectors.gesture {
                cfg.detectors.gesture = gesture;
            }
            if let Some(violence) = detectors.violence {
                cfg.detectors.violence = violence;
            }
            if let Some(coverage) = detectors.skin_min_coverage {
                cfg.detectors.skin_min_coverage = coverage;
            }
            if let Some(threshold) = detectors.motion_threshold {
                cfg.detectors.motion_threshold = threshold;
            }
            if let Some(ms) = detectors.incident_cooldown_ms {
                cfg.detectors.incident_cooldown = Duration::from_millis(ms);
            }
            cfg.detectors.gesture_model = detectors.gesture_model;
            if let Some(threshold) = detectors.gesture_threshold {
                cfg.detectors.gesture_threshold = threshold;
            }
        }
        if let Some(ms) = file.capture_backoff_ms {
            cfg.capture_backoff = Duration::from_millis(ms);
        }
        if let Some(ms) = file.shutdown_timeout_ms {
            cfg.shutdown_timeout = Duration::from_millis(ms);
        }
        cfg.detectors.input_width = cfg.working_width;
        cfg.detectors.input_height = cfg.working_height;
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("REGION_WATCH_SOURCE") {
            if !source.trim().is_empty() {
                self.source = source;
            }
        }
        if let Ok(regions) = std::env::var("REGION_WATCH_REGIONS") {
            let parsed = parse_region_list(&regions)?;
            if !parsed.is_empty() {
                self.regions = parsed;
            }
        }
        if let Ok(size) = std::env::var("REGION_WATCH_POOL_SIZE") {
            self.pool.size = size
                .trim()
                .parse()
                .map_err(|_| anyhow!("REGION_WATCH_POOL_SIZE must be a positive integer"))?;
        }
        if let Ok(sizing) = std::env::var("REGION_WATCH_POOL_SIZING") {
            if !sizing.trim().is_empty() {
                self.pool.sizing = sizing.parse()?;
            }
        }
        if let Ok(path) = std::env::var("REGION_WATCH_EVENTS_DB") {
            if !path.trim().is_empty() {
                self.events.db_path = Some(path);
            }
        }
        if let Ok(dir) = std::env::var("REGION_WATCH_EVIDENCE_DIR") {
            if !dir.trim().is_empty() {
                self.events.evidence_dir = Some(PathBuf::from(dir));
            }
        }
        if let Ok(threshold) = std::env::var("REGION_WATCH_SOS_THRESHOLD") {
            self.sos.threshold_count = threshold
                .trim()
                .parse()
                .map_err(|_| anyhow!("REGION_WATCH_SOS_THRESHOLD must be an integer"))?;
        }
        if let Ok(secs) = std::env::var("REGION_WATCH_SOS_TIMEFRAME_SECS") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                anyhow!("REGION_WATCH_SOS_TIMEFRAME_SECS must be an integer number of seconds")
            })?;
            self.sos.timeframe = Duration::from_secs(secs);
        }
        if let Ok(dir) = std::env::var("REGION_WATCH_SNAPSHOT_DIR") {
            if !dir.trim().is_empty() {
                self.display.mode = DisplayMode::Snapshot;
                self.display.snapshot_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.trim().is_empty() {
            return Err(anyhow!("source must not be empty"));
        }
        if self.working_width == 0 || self.working_height == 0 {
            return Err(anyhow!("working resolution must be non-zero"));
        }
        if self.sos.threshold_count == 0 {
            return Err(anyhow!("sos threshold must be at least 1"));
        }
        if self.sos.timeframe.is_zero() {
            return Err(anyhow!("sos timeframe must be greater than zero"));
        }
        if self.queue.capacity == 0 {
            return Err(anyhow!("queue capacity must be at least 1"));
        }
        if self.queue.enqueue_timeout.is_zero() || self.queue.dequeue_timeout.is_zero() {
            return Err(anyhow!("queue timeouts must be greater than zero"));
        }
        if self.pool.size == 0 {
            return Err(anyhow!("pool size must be at least 1"));
        }
        if self.display.mode == DisplayMode::Snapshot && self.display.snapshot_dir.is_none() {
            return Err(anyhow!("snapshot display requires display.snapshot_dir"));
        }
        if self.events.retention.is_zero() {
            return Err(anyhow!("event retention must be greater than zero"));
        }
        if self.events.retention.as_secs() > MAX_RETENTION_SECS {
            return Err(anyhow!(
                "event retention must be at most {} seconds",
                MAX_RETENTION_SECS
            ));
        }
        if !(0.0..=1.0).contains(&self.detectors.skin_min_coverage) {
            return Err(anyhow!("skin_min_coverage must be within 0..=1"));
        }
        if !(0.0..=1.0).contains(&self.detectors.gesture_threshold) {
            return Err(anyhow!("gesture_threshold must be within 0..=1"));
        }
        if self.shutdown_timeout.is_zero() {
            return Err(anyhow!("shutdown timeout must be greater than zero"));
        }
        for spec in &self.regions {
            if spec.rect.normalize().area() == 0 {
                return Err(anyhow!("region {} has zero area", spec.rect));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// Parse `"x,y,w,h@Loc;x,y,w,h@Loc"`. Empty entries are skipped.
pub fn parse_region_list(value: &str) -> Result<Vec<RegionSpec>> {
    value
        .split(';')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.parse())
        .collect()
}
