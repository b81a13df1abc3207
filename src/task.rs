//! Per-region detection loops.
//!
//! A `DetectionTask` is bound to one (region, kind) pair and runs
//! capture -> resize -> detect -> publish until the session's cancel token
//! fires. Capture and detector failures are logged and counted; the loop
//! keeps going after a short, cancellable back-off.

use anyhow::Result;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::detect::{GestureDetector, ViolenceDetector};
use crate::error::WatchError;
use crate::events::{DetectionEvent, EventKind, EventSink, EvidenceWriter};
use crate::frame::Frame;
use crate::gesture::{GestureStateMachine, SosPolicy};
use crate::ingest::FrameSource;
use crate::queue::{FrameMessage, FrameQueue};
use crate::region::Region;
use crate::stats::PipelineStats;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Gesture,
    Violence,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Gesture => "gesture",
            TaskKind::Violence => "violence",
        }
    }

    /// Display label for frames produced by this kind of task on `region`.
    pub fn label(&self, region: &Region) -> String {
        let tracker = match self {
            TaskKind::Gesture => "Gesture Tracker",
            TaskKind::Violence => "Violence Tracker",
        };
        format!("{} - Region {} - {}", tracker, region.id, region.location)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session-wide collaborators every task shares.
#[derive(Clone)]
pub struct TaskContext {
    pub source: Arc<dyn FrameSource>,
    pub queue: FrameQueue,
    pub events: Arc<dyn EventSink>,
    pub evidence: Option<Arc<EvidenceWriter>>,
    pub stats: Arc<PipelineStats>,
    pub cancel: CancelToken,
    pub working_width: u32,
    pub working_height: u32,
    pub enqueue_timeout: Duration,
    pub capture_backoff: Duration,
}

/// What one iteration produced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StepOutcome {
    pub enqueued: bool,
    pub alerted: bool,
}

enum Analyzer {
    Gesture {
        detector: Box<dyn GestureDetector>,
        machine: GestureStateMachine,
    },
    Violence(Box<dyn ViolenceDetector>),
}

pub struct DetectionTask {
    region: Region,
    kind: TaskKind,
    label: String,
    analyzer: Analyzer,
    ctx: TaskContext,
}

impl DetectionTask {
    pub fn gesture(
        region: Region,
        detector: Box<dyn GestureDetector>,
        policy: SosPolicy,
        ctx: TaskContext,
    ) -> Self {
        let machine = GestureStateMachine::new(region.location.clone(), policy);
        Self {
            label: TaskKind::Gesture.label(&region),
            kind: TaskKind::Gesture,
            region,
            analyzer: Analyzer::Gesture { detector, machine },
            ctx,
        }
    }

    pub fn violence(region: Region, detector: Box<dyn ViolenceDetector>, ctx: TaskContext) -> Self {
        Self {
            label: TaskKind::Violence.label(&region),
            kind: TaskKind::Violence,
            region,
            analyzer: Analyzer::Violence(detector),
            ctx,
        }
    }

    /// Loop until cancelled. Cancellation is checked at the head of every
    /// iteration, so shutdown waits for at most one capture plus detection.
    pub fn run(mut self) {
        log::info!("{} started", self.label);
        let warm = match &mut self.analyzer {
            Analyzer::Gesture { detector, .. } => detector.warm_up(),
            Analyzer::Violence(detector) => detector.warm_up(),
        };
        if let Err(e) = warm {
            log::warn!("{}: detector warm-up failed: {}", self.label, e);
        }

        while !self.ctx.cancel.is_cancelled() {
            if let Err(e) = self.run_once() {
                log::warn!("{}: {}", self.label, e);
                if self.ctx.cancel.wait_timeout(self.ctx.capture_backoff) {
                    break;
                }
            }
        }
        log::info!("{} stopped", self.label);
    }

    /// One capture -> detect -> publish pass.
    pub fn run_once(&mut self) -> Result<StepOutcome> {
        let rect = self.region.capture_rect();
        let frame = match self.ctx.source.capture(rect) {
            Ok(frame) => frame,
            Err(e) => {
                self.ctx.stats.record_capture_failure();
                return Err(WatchError::CaptureFailure {
                    region_id: self.region.id,
                    reason: format!("{:#}", e),
                }
                .into());
            }
        };
        self.ctx.stats.record_capture();
        let frame = frame.resized(self.ctx.working_width, self.ctx.working_height);

        let mut outcome = StepOutcome::default();
        let annotated = match &mut self.analyzer {
            Analyzer::Gesture { detector, machine } => {
                let is_open = detector
                    .classify_open_hand(&frame)
                    .map_err(|e| detector_failure(&self.ctx.stats, self.kind, self.region.id, e))?;
                let (annotated, alert) = machine.step(frame, is_open, Instant::now());
                if let Some(alert) = alert {
                    outcome.alerted = true;
                    self.ctx.stats.record_sos();
                    log::warn!(
                        "SOS gesture detected at {} (region {}, {} gestures)",
                        alert.location,
                        self.region.id,
                        alert.gesture_count
                    );
                    self.publish_event(
                        EventKind::SosGesture,
                        format!("{} open-hand gestures", alert.gesture_count),
                        &annotated,
                    );
                }
                annotated
            }
            Analyzer::Violence(detector) => {
                let analysis = detector
                    .process(frame, &self.region.location)
                    .map_err(|e| detector_failure(&self.ctx.stats, self.kind, self.region.id, e))?;
                if let Some(incident) = &analysis.incident {
                    outcome.alerted = true;
                    self.ctx.stats.record_incident();
                    log::warn!(
                        "violence detected at {} (region {}): {} score={:.1}",
                        self.region.location,
                        self.region.id,
                        incident.action,
                        incident.score
                    );
                    self.publish_event(
                        EventKind::Violence,
                        format!("{} score={:.1}", incident.action, incident.score),
                        &analysis.frame,
                    );
                }
                analysis.frame
            }
        };

        let msg = FrameMessage::new(self.label.clone(), annotated);
        outcome.enqueued = self.ctx.queue.try_enqueue(msg, self.ctx.enqueue_timeout);
        self.ctx.stats.record_enqueue(outcome.enqueued);
        if !outcome.enqueued {
            log::debug!("{}: display queue full, frame dropped", self.label);
        }
        Ok(outcome)
    }

    fn publish_event(&self, kind: EventKind, detail: String, frame: &Frame) {
        let mut event = match DetectionEvent::now(
            kind,
            self.region.id,
            self.region.location.clone(),
            self.label.clone(),
            detail,
        ) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("{}: event dropped: {}", self.label, e);
                return;
            }
        };
        if let Some(writer) = &self.ctx.evidence {
            match writer.save(&event, frame) {
                Ok(path) => event.evidence = Some(path),
                Err(e) => log::warn!("{}: evidence not saved: {}", self.label, e),
            }
        }
        if let Err(e) = self.ctx.events.record(&event) {
            log::warn!("{}: event sink failed: {}", self.label, e);
        }
    }
}

fn detector_failure(
    stats: &PipelineStats,
    kind: TaskKind,
    region_id: u32,
    e: anyhow::Error,
) -> anyhow::Error {
    stats.record_detector_failure();
    WatchError::DetectorFailure {
        kind: kind.as_str(),
        region_id,
        reason: format!("{:#}", e),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{StubGestureDetector, StubViolenceDetector};
    use crate::events::InMemoryEventStore;
    use crate::ingest::SyntheticSource;
    use crate::region::Rect;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct Scripted {
        answers: Vec<bool>,
        next: usize,
    }

    impl GestureDetector for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn classify_open_hand(&mut self, _frame: &Frame) -> Result<bool> {
            let answer = self.answers.get(self.next).copied().unwrap_or(false);
            self.next += 1;
            Ok(answer)
        }
    }

    struct Broken;

    impl GestureDetector for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn classify_open_hand(&mut self, _frame: &Frame) -> Result<bool> {
            Err(anyhow!("model unavailable"))
        }
    }

    /// Fails its first `failures` calls, then reports a closed hand.
    struct Flaky {
        failures: u32,
    }

    impl GestureDetector for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        fn classify_open_hand(&mut self, _frame: &Frame) -> Result<bool> {
            if self.failures > 0 {
                self.failures -= 1;
                return Err(anyhow!("inference timed out"));
            }
            Ok(false)
        }
    }

    /// Every other capture fails.
    struct Stuttering {
        calls: AtomicU64,
    }

    impl FrameSource for Stuttering {
        fn name(&self) -> &str {
            "stuttering"
        }

        fn capture(&self, rect: Rect) -> Result<Frame> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call % 2 == 0 {
                return Err(anyhow!("display busy"));
            }
            Ok(Frame::filled(rect.width as u32, rect.height as u32, [30, 30, 30]))
        }

        fn frames_captured(&self) -> u64 {
            self.calls.load(Ordering::SeqCst) / 2
        }
    }

    fn region() -> Region {
        Region {
            id: 7,
            rect: Rect::new(100, 80, -60, -40),
            location: "Gate".to_string(),
        }
    }

    fn context(events: Arc<InMemoryEventStore>) -> TaskContext {
        TaskContext {
            source: Arc::new(SyntheticSource::new("desktop", 320, 240)),
            queue: FrameQueue::new(8).unwrap(),
            events,
            evidence: None,
            stats: Arc::new(PipelineStats::new()),
            cancel: CancelToken::new(),
            working_width: 64,
            working_height: 48,
            enqueue_timeout: Duration::from_millis(10),
            capture_backoff: Duration::from_millis(10),
        }
    }

    #[test]
    fn labels_follow_tracker_format() {
        assert_eq!(
            TaskKind::Gesture.label(&region()),
            "Gesture Tracker - Region 7 - Gate"
        );
        assert_eq!(
            TaskKind::Violence.label(&region()),
            "Violence Tracker - Region 7 - Gate"
        );
    }

    #[test]
    fn gesture_task_publishes_resized_frames_and_sos_event() {
        let events = Arc::new(InMemoryEventStore::new());
        let ctx = context(events.clone());
        let queue = ctx.queue.clone();
        let stats = ctx.stats.clone();
        let detector = Box::new(Scripted {
            answers: vec![true, false, true, false, true],
            next: 0,
        });
        let mut task = DetectionTask::gesture(region(), detector, SosPolicy::default(), ctx);

        let mut alerts = 0;
        for _ in 0..5 {
            let outcome = task.run_once().unwrap();
            assert!(outcome.enqueued);
            alerts += outcome.alerted as u32;
        }
        assert_eq!(alerts, 1);

        let msg = queue.dequeue(Duration::from_millis(10)).unwrap();
        assert_eq!(msg.label, "Gesture Tracker - Region 7 - Gate");
        assert_eq!((msg.frame.width(), msg.frame.height()), (64, 48));

        let recorded = events.events();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].kind, EventKind::SosGesture);
        assert_eq!(recorded[0].region_id, 7);
        assert_eq!(recorded[0].location, "Gate");

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.frames_captured, 5);
        assert_eq!(snapshot.sos_alerts, 1);
    }

    #[test]
    fn detector_failure_is_reported_and_counted() {
        let events = Arc::new(InMemoryEventStore::new());
        let ctx = context(events);
        let stats = ctx.stats.clone();
        let mut task = DetectionTask::gesture(region(), Box::new(Broken), SosPolicy::default(), ctx);
        let err = task.run_once().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WatchError>(),
            Some(WatchError::DetectorFailure { region_id: 7, .. })
        ));
        assert_eq!(stats.snapshot().detector_failures, 1);
    }

    #[test]
    fn capture_outside_source_is_a_capture_failure() {
        let events = Arc::new(InMemoryEventStore::new());
        let ctx = context(events);
        let stats = ctx.stats.clone();
        let offscreen = Region {
            id: 2,
            rect: Rect::new(5_000, 5_000, 10, 10),
            location: "Roof".to_string(),
        };
        let mut task = DetectionTask::violence(offscreen, Box::new(StubViolenceDetector::new()), ctx);
        let err = task.run_once().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WatchError>(),
            Some(WatchError::CaptureFailure { region_id: 2, .. })
        ));
        assert_eq!(stats.snapshot().capture_failures, 1);
    }

    #[test]
    fn full_queue_drops_instead_of_blocking() {
        let events = Arc::new(InMemoryEventStore::new());
        let mut ctx = context(events);
        ctx.queue = FrameQueue::new(1).unwrap();
        let stats = ctx.stats.clone();
        let mut task = DetectionTask::gesture(
            region(),
            Box::new(StubGestureDetector::new(false)),
            SosPolicy::default(),
            ctx,
        );
        assert!(task.run_once().unwrap().enqueued);
        assert!(!task.run_once().unwrap().enqueued);
        assert_eq!(stats.snapshot().frames_dropped, 1);
    }

    #[test]
    fn run_returns_after_cancel() {
        let events = Arc::new(InMemoryEventStore::new());
        let ctx = context(events);
        let cancel = ctx.cancel.clone();
        let task = DetectionTask::violence(region(), Box::new(StubViolenceDetector::new()), ctx);
        let handle = std::thread::spawn(move || task.run());
        std::thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        handle.join().unwrap();
    }

    fn dequeue_within(queue: &FrameQueue, count: usize) -> usize {
        let deadline = Instant::now() + Duration::from_secs(5);
        let mut got = 0;
        while got < count && Instant::now() < deadline {
            if queue.dequeue(Duration::from_millis(20)).is_some() {
                got += 1;
            }
        }
        got
    }

    #[test]
    fn run_keeps_going_after_detector_failures() {
        let events = Arc::new(InMemoryEventStore::new());
        let ctx = context(events);
        let (queue, stats, cancel) = (ctx.queue.clone(), ctx.stats.clone(), ctx.cancel.clone());
        let task = DetectionTask::gesture(
            region(),
            Box::new(Flaky { failures: 3 }),
            SosPolicy::default(),
            ctx,
        );
        let handle = std::thread::spawn(move || task.run());

        assert_eq!(dequeue_within(&queue, 5), 5);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.detector_failures, 3);
        assert!(snapshot.frames_enqueued >= 5);

        cancel.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn run_keeps_going_after_capture_failures() {
        let events = Arc::new(InMemoryEventStore::new());
        let mut ctx = context(events);
        ctx.source = Arc::new(Stuttering {
            calls: AtomicU64::new(0),
        });
        let (queue, stats, cancel) = (ctx.queue.clone(), ctx.stats.clone(), ctx.cancel.clone());
        let task = DetectionTask::violence(region(), Box::new(StubViolenceDetector::new()), ctx);
        let handle = std::thread::spawn(move || task.run());

        assert_eq!(dequeue_within(&queue, 4), 4);
        let snapshot = stats.snapshot();
        assert!(snapshot.capture_failures >= 4);
        assert!(snapshot.frames_captured >= 4);

        cancel.cancel();
        handle.join().unwrap();
    }

    #[test]
    fn alerts_save_evidence_frames() {
        let dir = tempfile::tempdir().unwrap();
        let events = Arc::new(InMemoryEventStore::new());
        let mut ctx = context(events.clone());
        let writer = EvidenceWriter::new(dir.path()).unwrap();
        ctx.evidence = Some(Arc::new(writer));
        let policy = SosPolicy {
            threshold_count: 1,
            ..SosPolicy::default()
        };
        let mut task = DetectionTask::gesture(
            region(),
            Box::new(StubGestureDetector::new(true)),
            policy,
            ctx,
        );

        assert!(task.run_once().unwrap().alerted);
        let recorded = events.events();
        let path = recorded[0].evidence.clone().expect("evidence path");
        assert!(path.starts_with(dir.path().join("Gate").join("sos_gesture")));
        let saved = image::open(&path).unwrap().to_rgb8();
        assert_eq!(saved.dimensions(), (64, 48));
    }
}
