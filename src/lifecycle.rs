//! Start/stop/quit for a monitoring session.
//!
//! `Monitor` is driven from one controlling thread. A session owns the cancel
//! token, the worker pool running the detection tasks, the display thread and
//! the frame queue between them. `stop()` tears all of that down and leaves
//! the region registry intact for the next `start()`.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::{DisplayMode, MonitorConfig, PoolSizing};
use crate::detect::DetectorRegistry;
use crate::display::{run_display_loop, DisplaySink, HeadlessDisplay, SnapshotDisplay};
use crate::error::WatchError;
use crate::events::{EventSink, EvidenceWriter, LogEventSink, SqliteEventStore};
use crate::ingest::{open_source, FrameSource};
use crate::pool::WorkerPool;
use crate::queue::FrameQueue;
use crate::region::{Rect, Region, RegionRegistry};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::task::{DetectionTask, TaskContext};

const WAIT_POLL: Duration = Duration::from_millis(250);

type DisplayFactory = Box<dyn FnMut() -> Result<Box<dyn DisplaySink>> + Send>;

/// Worker pool occupancy for the running session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolStatus {
    pub capacity: usize,
    pub running: usize,
    pub queued: usize,
}

struct Session {
    cancel: CancelToken,
    pool: WorkerPool,
    display: Option<JoinHandle<()>>,
    queue: FrameQueue,
}

pub struct Monitor {
    config: MonitorConfig,
    registry: RegionRegistry,
    detectors: DetectorRegistry,
    source: Arc<dyn FrameSource>,
    events: Arc<dyn EventSink>,
    evidence: Option<Arc<EvidenceWriter>>,
    display_factory: DisplayFactory,
    stats: Arc<PipelineStats>,
    cancel: CancelToken,
    session: Option<Session>,
}

impl Monitor {
    /// Monitor over `source` with built-in detectors, a logging event sink
    /// and the display configured in `config`.
    pub fn new(config: MonitorConfig, source: Arc<dyn FrameSource>) -> Result<Self> {
        config.validate()?;
        let detectors = DetectorRegistry::with_builtin(&config.detectors)?;
        let display_factory = configured_display(&config);
        let evidence = match &config.events.evidence_dir {
            Some(dir) => Some(Arc::new(EvidenceWriter::new(dir)?)),
            None => None,
        };

        let mut registry = RegionRegistry::new();
        for spec in &config.regions {
            registry.add_spec(spec);
        }

        Ok(Self {
            config,
            registry,
            detectors,
            source,
            events: Arc::new(LogEventSink),
            evidence,
            display_factory,
            stats: Arc::new(PipelineStats::new()),
            cancel: CancelToken::new(),
            session: None,
        })
    }

    /// Fully wired monitor: source, detectors, event store and display all
    /// come from `config`.
    pub fn from_config(config: MonitorConfig) -> Result<Self> {
        let source = open_source(&config.source)?;
        let events: Arc<dyn EventSink> = match &config.events.db_path {
            Some(path) => {
                let store = SqliteEventStore::open(path)?;
                store.prune_older_than(config.events.retention)?;
                log::info!("detection events stored in {}", path);
                Arc::new(store)
            }
            None => Arc::new(LogEventSink),
        };
        Ok(Self::new(config, source)?.with_event_sink(events))
    }

    pub fn with_detectors(mut self, detectors: DetectorRegistry) -> Self {
        self.detectors = detectors;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Replace the display. `factory` runs once per `start()`.
    pub fn with_display<F>(mut self, factory: F) -> Self
    where
        F: FnMut() -> Result<Box<dyn DisplaySink>> + Send + 'static,
    {
        self.display_factory = Box::new(factory);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn registry(&self) -> &RegionRegistry {
        &self.registry
    }

    /// Register a region. Takes effect at the next `start()`.
    pub fn add_region(&mut self, rect: Rect, location: impl Into<String>) -> Option<Region> {
        self.registry.add(rect, location)
    }

    /// Relabel a region. Running tasks keep the label they started with.
    pub fn set_location(&mut self, id: u32, location: impl Into<String>) -> Result<()> {
        self.registry.set_location(id, location)
    }

    /// Forget every region and restart ids at 1. Only allowed while stopped.
    pub fn reset_regions(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Err(WatchError::Running.into());
        }
        self.registry.reset();
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| !s.cancel.is_cancelled())
            .unwrap_or(false)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn pool_status(&self) -> Option<PoolStatus> {
        self.session.as_ref().map(|s| PoolStatus {
            capacity: s.pool.capacity(),
            running: s.pool.running(),
            queued: s.pool.queued(),
        })
    }

    /// Token of the current session, or of the next one while stopped.
    ///
    /// A token only ever cancels one session. `stop()` replaces it, so take a
    /// new handle after every `stop()` or reaped session.
    pub fn cancel_handle(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Start monitoring every registered region.
    pub fn start(&mut self) -> Result<()> {
        if let Some(session) = &self.session {
            if !session.cancel.is_cancelled() {
                log::info!("monitor already running; start ignored");
                return Ok(());
            }
            // Cancelled from outside (display, signal); reap it first.
            if let Err(e) = self.stop() {
                log::warn!("previous session did not stop cleanly: {}", e);
            }
        }
        if self.registry.is_empty() {
            return Err(WatchError::NoRegions.into());
        }
        if self.cancel.is_cancelled() {
            self.cancel = CancelToken::new();
        }
        let cancel = self.cancel.clone();

        let region_count = self.registry.len();
        let task_count = region_count * 2;
        let pool_size = match self.config.pool.sizing {
            PoolSizing::Fixed => {
                let size = self.config.pool.size;
                if task_count > size {
                    log::warn!(
                        "fixed pool of {} workers services only {} of {} region(s); \
                         remaining tasks stay queued",
                        size,
                        size / 2,
                        region_count
                    );
                }
                size
            }
            PoolSizing::PerTask => task_count,
        };

        let queue = FrameQueue::new(self.config.queue.capacity)?;
        let ctx = TaskContext {
            source: self.source.clone(),
            queue: queue.clone(),
            events: self.events.clone(),
            evidence: self.evidence.clone(),
            stats: self.stats.clone(),
            cancel: cancel.clone(),
            working_width: self.config.working_width,
            working_height: self.config.working_height,
            enqueue_timeout: self.config.queue.enqueue_timeout,
            capture_backoff: self.config.capture_backoff,
        };

        // Build everything fallible before any thread exists.
        let mut tasks = Vec::with_capacity(task_count);
        for region in self.registry.list() {
            let gesture = self.detectors.build_gesture(region)?;
            let violence = self.detectors.build_violence(region)?;
            tasks.push(DetectionTask::gesture(
                region.clone(),
                gesture,
                self.config.sos,
                ctx.clone(),
            ));
            tasks.push(DetectionTask::violence(region.clone(), violence, ctx.clone()));
        }
        let sink = (self.display_factory)()?;

        let mut pool = WorkerPool::new(pool_size)?;
        for task in tasks {
            if let Err(e) = pool.submit(move || task.run()) {
                cancel.cancel();
                let _ = pool.shutdown(self.config.shutdown_timeout);
                return Err(e);
            }
        }

        let display = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            let stats = self.stats.clone();
            let poll = self.config.queue.dequeue_timeout;
            std::thread::Builder::new()
                .name("watch-display".to_string())
                .spawn(move || run_display_loop(queue, sink, cancel, stats, poll))
        };
        let display = match display {
            Ok(handle) => handle,
            Err(e) => {
                cancel.cancel();
                let _ = pool.shutdown(self.config.shutdown_timeout);
                return Err(anyhow!("failed to spawn display thread: {}", e));
            }
        };

        log::info!(
            "monitor started: {} region(s), {} task(s), {} worker(s), source={}",
            region_count,
            task_count,
            pool_size,
            self.source.name()
        );
        self.session = Some(Session {
            cancel,
            pool,
            display: Some(display),
            queue,
        });
        Ok(())
    }

    /// Cancel the session and wait (bounded) for tasks and display to finish.
    /// A no-op when nothing is running.
    pub fn stop(&mut self) -> Result<()> {
        let Some(mut session) = self.session.take() else {
            log::debug!("monitor not running; stop ignored");
            return Ok(());
        };
        session.cancel.cancel();
        self.cancel = CancelToken::new();
        let pool_result = session.pool.shutdown(self.config.shutdown_timeout);

        if let Some(display) = session.display.take() {
            if display.join().is_err() {
                log::error!("display thread panicked");
            }
        }
        let snapshot = self.stats.snapshot();
        log::info!(
            "source {} healthy={} frames={}",
            self.source.name(),
            self.source.is_healthy(),
            self.source.frames_captured()
        );
        log::info!(
            "monitor stopped: captured={} displayed={} dropped={} sos={} incidents={} (queue left {})",
            snapshot.frames_captured,
            snapshot.frames_displayed,
            snapshot.frames_dropped,
            snapshot.sos_alerts,
            snapshot.violence_incidents,
            session.queue.len()
        );
        pool_result
    }

    /// Stop and flush the event sink. The monitor may still be restarted.
    pub fn quit(&mut self) -> Result<()> {
        let stopped = self.stop();
        self.events.flush()?;
        log::info!("monitor quit");
        stopped
    }

    /// Block until the current session is cancelled by the display, a signal
    /// handler or `cancel_handle().cancel()`. Returns at once when stopped.
    pub fn wait(&self) {
        let Some(session) = &self.session else {
            return;
        };
        while !session.cancel.wait_timeout(WAIT_POLL) {}
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::warn!("monitor dropped while running: {}", e);
        }
    }
}

fn configured_display(config: &MonitorConfig) -> DisplayFactory {
    let mode = config.display.mode;
    let dir = config.display.snapshot_dir.clone();
    let interval = config.display.interval;
    Box::new(move || -> Result<Box<dyn DisplaySink>> {
        match (mode, &dir) {
            (DisplayMode::Snapshot, Some(dir)) => Ok(Box::new(SnapshotDisplay::new(dir, interval)?)),
            (DisplayMode::Snapshot, None) => Err(anyhow!("snapshot display requires a directory")),
            (DisplayMode::Headless, _) => Ok(Box::new(HeadlessDisplay::new())),
        }
    })
}
