//! Region Watch
//!
//! Monitors several screen regions at once, each bound to a physical
//! location, and runs two detection pipelines per region: open-hand SOS
//! gesture counting and violence detection. Annotated frames flow to a single
//! display consumer through a bounded queue.
//!
//! # Architecture
//!
//! The pipeline holds these guarantees by construction:
//!
//! 1. **Bounded memory**: the display queue has a fixed capacity; producers
//!    that cannot enqueue within their timeout drop the frame.
//! 2. **No blocking producers**: enqueue and dequeue waits are short and double
//!    as cancellation polls.
//! 3. **Cooperative shutdown**: one `CancelToken` per session reaches every
//!    task and the display loop; `stop()` waits a bounded time.
//! 4. **Debounced alerts**: the gesture state machine emits at most one SOS
//!    alert per counting window.
//!
//! # Module Structure
//!
//! - `region`: rectangles, normalization and the region registry
//! - `ingest`: frame sources (synthetic desktop, snapshot file)
//! - `detect`: gesture/violence detector traits, backends and registry
//! - `gesture`: SOS gesture state machine
//! - `queue`, `pool`, `task`: frame distribution and per-region workers
//! - `display`: display sinks and the consumer loop
//! - `events`: detection event sinks (log, memory, SQLite) and evidence images
//! - `lifecycle`: the `Monitor` start/stop/quit controller

pub mod cancel;
pub mod config;
pub mod detect;
pub mod display;
pub mod error;
pub mod events;
pub mod frame;
pub mod gesture;
pub mod ingest;
pub mod lifecycle;
pub mod pool;
pub mod queue;
pub mod region;
pub mod stats;
pub mod task;

pub use cancel::CancelToken;
pub use config::{DetectorSettings, DisplayMode, MonitorConfig, PoolSizing, WORKER_POOL_SIZE};
pub use detect::{
    DetectorRegistry, GestureDetector, Incident, ViolenceAnalysis, ViolenceDetector,
};
pub use display::{run_display_loop, DisplaySink, HeadlessDisplay, SnapshotDisplay};
pub use error::WatchError;
pub use events::{
    DetectionEvent, EventKind, EventQuery, EventSink, EvidenceWriter, InMemoryEventStore,
    LogEventSink, SqliteEventStore,
};
pub use frame::Frame;
pub use gesture::{
    GestureState, GestureStateMachine, SosAlert, SosPolicy, SOS_THRESHOLD_COUNT, SOS_TIMEFRAME,
};
pub use ingest::{open_source, FrameSource, SnapshotSource, SyntheticSource};
pub use lifecycle::{Monitor, PoolStatus};
pub use pool::WorkerPool;
pub use queue::{FrameMessage, FrameQueue, QUEUE_CAPACITY, QUEUE_TIMEOUT};
pub use region::{Rect, Region, RegionRegistry, RegionSpec, UNKNOWN_LOCATION};
pub use stats::{PipelineStats, StatsSnapshot};
pub use task::{DetectionTask, StepOutcome, TaskContext, TaskKind};
