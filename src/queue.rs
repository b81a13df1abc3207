//! Bounded display queue.
//!
//! Many detection tasks publish annotated frames; one display loop consumes
//! them. Producers never block past their enqueue timeout: a frame that cannot
//! be placed in time is dropped and counted. Per-producer FIFO order is kept,
//! there is no ordering across producers.

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::frame::Frame;

/// Default queue capacity.
pub const QUEUE_CAPACITY: usize = 20;

/// Default producer/consumer wait. Also the cancellation poll interval.
pub const QUEUE_TIMEOUT: Duration = Duration::from_millis(100);

/// Labeled frame on its way to the display sink. Never mutated after creation.
#[derive(Clone, Debug)]
pub struct FrameMessage {
    pub label: String,
    pub frame: Frame,
    pub enqueued_at: Instant,
}

impl FrameMessage {
    pub fn new(label: impl Into<String>, frame: Frame) -> Self {
        Self {
            label: label.into(),
            frame,
            enqueued_at: Instant::now(),
        }
    }
}

/// Cheaply clonable handle; every clone refers to the same channel.
#[derive(Clone)]
pub struct FrameQueue {
    tx: Sender<FrameMessage>,
    rx: Receiver<FrameMessage>,
    capacity: usize,
    dropped: Arc<AtomicU64>,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("frame queue capacity must be at least 1"));
        }
        let (tx, rx) = bounded(capacity);
        Ok(Self {
            tx,
            rx,
            capacity,
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Try to publish `msg`, waiting at most `timeout` for space.
    /// Returns `false` when the frame was dropped.
    pub fn try_enqueue(&self, msg: FrameMessage, timeout: Duration) -> bool {
        match self.tx.send_timeout(msg, timeout) {
            Ok(()) => true,
            Err(SendTimeoutError::Timeout(_)) | Err(SendTimeoutError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Wait at most `timeout` for the next frame.
    pub fn dequeue(&self, timeout: Duration) -> Option<FrameMessage> {
        match self.rx.recv_timeout(timeout) {
            Ok(msg) => Some(msg),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames dropped because the queue stayed full for the whole timeout.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(label: &str) -> FrameMessage {
        FrameMessage::new(label, Frame::filled(2, 2, [0, 0, 0]))
    }

    #[test]
    fn rejects_zero_capacity() {
        assert!(FrameQueue::new(0).is_err());
    }

    #[test]
    fn full_queue_drops_after_timeout() {
        let queue = FrameQueue::new(2).unwrap();
        assert!(queue.try_enqueue(msg("a"), QUEUE_TIMEOUT));
        assert!(queue.try_enqueue(msg("a"), QUEUE_TIMEOUT));

        let timeout = Duration::from_millis(50);
        let start = Instant::now();
        assert!(!queue.try_enqueue(msg("a"), timeout));
        let waited = start.elapsed();
        assert!(waited >= timeout);
        assert!(waited < Duration::from_secs(2));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dropped(), 1);
    }

    #[test]
    fn dequeue_on_empty_returns_none() {
        let queue = FrameQueue::new(1).unwrap();
        assert!(queue.dequeue(Duration::from_millis(10)).is_none());
    }

    #[test]
    fn many_producers_never_exceed_capacity() {
        let queue = FrameQueue::new(QUEUE_CAPACITY).unwrap();
        let producers: Vec<_> = (0..8)
            .map(|p| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        queue.try_enqueue(msg(&format!("p{p}")), Duration::from_millis(1));
                        assert!(queue.len() <= QUEUE_CAPACITY);
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        assert!(queue.len() <= QUEUE_CAPACITY);
        assert_eq!(queue.len() as u64 + queue.dropped(), 400);
    }

    #[test]
    fn single_producer_order_is_preserved() {
        let queue = FrameQueue::new(4).unwrap();
        let producer = {
            let queue = queue.clone();
            std::thread::spawn(move || {
                for i in 0..30 {
                    while !queue.try_enqueue(msg(&format!("m{i}")), QUEUE_TIMEOUT) {}
                }
            })
        };
        let mut seen = Vec::new();
        while seen.len() < 30 {
            if let Some(m) = queue.dequeue(QUEUE_TIMEOUT) {
                seen.push(m.label);
            }
        }
        producer.join().unwrap();
        let expected: Vec<String> = (0..30).map(|i| format!("m{i}")).collect();
        assert_eq!(seen, expected);
    }
}
