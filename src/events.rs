//! Detection event sinks.
//!
//! SOS alerts and violence incidents leave the pipeline as `DetectionEvent`
//! records. Sinks are shared by every task of a session, so `record` takes
//! `&self` and implementations synchronise internally.
//!
//! Events MUST NOT carry frame pixels. When an evidence directory is
//! configured, `EvidenceWriter` saves the annotated frame as a PNG and the
//! event only records its path.

use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::display::file_stem;
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SosGesture,
    Violence,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SosGesture => "sos_gesture",
            EventKind::Violence => "violence",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionEvent {
    pub kind: EventKind,
    pub region_id: u32,
    pub location: String,
    pub label: String,
    pub detail: String,
    pub unix_secs: u64,
    /// Saved evidence image, when an `EvidenceWriter` is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<PathBuf>,
}

impl DetectionEvent {
    /// Event stamped with the current wall-clock time.
    pub fn now(
        kind: EventKind,
        region_id: u32,
        location: impl Into<String>,
        label: impl Into<String>,
        detail: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            kind,
            region_id,
            location: location.into(),
            label: label.into(),
            detail: detail.into(),
            unix_secs: now_s()?,
            evidence: None,
        })
    }
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: &DetectionEvent) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn now_s() -> Result<u64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| anyhow!("system clock before unix epoch"))?
        .as_secs())
}

// ----------------------------------------------------------------------------
// Evidence images
// ----------------------------------------------------------------------------

/// Saves the annotated frame behind an event as
/// `<root>/<location>/<kind>/<unix_secs>.png`.
///
/// A second event for the same location and kind within one second gets a
/// `-<n>` suffix instead of overwriting the first image.
#[derive(Debug)]
pub struct EvidenceWriter {
    root: PathBuf,
}

impl EvidenceWriter {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)
            .map_err(|e| anyhow!("failed to create evidence dir {}: {}", root.display(), e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `frame` for `event` and return the path it was saved under.
    pub fn save(&self, event: &DetectionEvent, frame: &Frame) -> Result<PathBuf> {
        let dir = self
            .root
            .join(file_stem(&event.location))
            .join(event.kind.as_str());
        std::fs::create_dir_all(&dir)
            .map_err(|e| anyhow!("failed to create evidence dir {}: {}", dir.display(), e))?;

        let mut path = dir.join(format!("{}.png", event.unix_secs));
        let mut n = 1u32;
        while path.exists() {
            path = dir.join(format!("{}-{}.png", event.unix_secs, n));
            n += 1;
        }
        frame
            .image()
            .save(&path)
            .map_err(|e| anyhow!("failed to write evidence {}: {}", path.display(), e))?;
        Ok(path)
    }
}

// ----------------------------------------------------------------------------
// Log sink
// ----------------------------------------------------------------------------

/// Writes every event to the `log` facade and keeps nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn record(&self, event: &DetectionEvent) -> Result<()> {
        match &event.evidence {
            Some(path) => log::warn!(
                "{} region={} location={} detail={} evidence={}",
                event.kind.as_str(),
                event.region_id,
                event.location,
                event.detail,
                path.display()
            ),
            None => log::warn!(
                "{} region={} location={} detail={}",
                event.kind.as_str(),
                event.region_id,
                event.location,
                event.detail
            ),
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// In-memory store
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    events: Mutex<Vec<DetectionEvent>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far, oldest first.
    pub fn events(&self) -> Vec<DetectionEvent> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<DetectionEvent>> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EventSink for InMemoryEventStore {
    fn record(&self, event: &DetectionEvent) -> Result<()> {
        self.lock().push(event.clone());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// SQLite store
// ----------------------------------------------------------------------------

/// Filter for `SqliteEventStore::query`. `None` fields match everything.
#[derive(Clone, Debug, Default)]
pub struct EventQuery {
    pub kind: Option<EventKind>,
    pub location: Option<String>,
    pub limit: usize,
}

pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| anyhow!("failed to open event db {}: {}", db_path, e))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS detection_events (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              created_at INTEGER NOT NULL,
              kind TEXT NOT NULL,
              region_id INTEGER NOT NULL,
              location TEXT NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_detection_created ON detection_events(created_at);
            CREATE INDEX IF NOT EXISTS idx_detection_location ON detection_events(location);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("event db connection lock poisoned"))
    }

    /// The `limit` most recent events, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<DetectionEvent>> {
        self.query(&EventQuery {
            limit,
            ..EventQuery::default()
        })
    }

    /// The `query.limit` most recent matching events, oldest first.
    pub fn query(&self, query: &EventQuery) -> Result<Vec<DetectionEvent>> {
        let limit = i64::try_from(query.limit).unwrap_or(i64::MAX);
        let payloads = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                r#"
                SELECT payload_json FROM detection_events
                WHERE (?1 IS NULL OR kind = ?1) AND (?2 IS NULL OR location = ?2)
                ORDER BY id DESC
                LIMIT ?3
                "#,
            )?;
            let kind = query.kind.map(|k| k.as_str());
            let mut rows = stmt.query(params![kind, query.location.as_deref(), limit])?;
            let mut payloads = Vec::new();
            while let Some(row) = rows.next()? {
                let payload: String = row.get(0)?;
                payloads.push(payload);
            }
            payloads
        };

        let mut out = Vec::with_capacity(payloads.len());
        for payload in payloads.into_iter().rev() {
            out.push(serde_json::from_str(&payload)?);
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<u64> {
        let count: i64 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM detection_events", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Delete events older than `retention`. Returns the number removed.
    ///
    /// A retention reaching back before the unix epoch removes nothing.
    pub fn prune_older_than(&self, retention: Duration) -> Result<usize> {
        let now = i64::try_from(now_s()?).map_err(|_| anyhow!("clock exceeds i64 range"))?;
        let cutoff = i64::try_from(retention.as_secs())
            .ok()
            .and_then(|retention| now.checked_sub(retention))
            .filter(|cutoff| *cutoff > 0);
        let Some(cutoff) = cutoff else {
            log::debug!("retention {:?} reaches before the epoch; nothing pruned", retention);
            return Ok(0);
        };
        let removed = self.conn()?.execute(
            "DELETE FROM detection_events WHERE created_at < ?1",
            params![cutoff],
        )?;
        if removed > 0 {
            log::info!("pruned {} detection event(s) past retention", removed);
        }
        Ok(removed)
    }
}

impl EventSink for SqliteEventStore {
    fn record(&self, event: &DetectionEvent) -> Result<()> {
        let created_at = i64::try_from(event.unix_secs)
            .map_err(|_| anyhow!("event timestamp exceeds i64 range"))?;
        let kind = event.kind.as_str();
        let payload_json = serde_json::to_string(event)?;
        self.conn()?.execute(
            r#"
            INSERT INTO detection_events(created_at, kind, region_id, location, payload_json)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                created_at,
                kind,
                event.region_id as i64,
                event.location,
                payload_json
            ],
        )?;
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.conn()?
            .execute_batch("PRAGMA wal_checkpoint(PASSIVE);")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind, location: &str, unix_secs: u64) -> DetectionEvent {
        DetectionEvent {
            kind,
            region_id: 1,
            location: location.to_string(),
            label: format!("Gesture Tracker - Region 1 - {location}"),
            detail: "3 gestures".to_string(),
            unix_secs,
            evidence: None,
        }
    }

    #[test]
    fn in_memory_store_keeps_order() {
        let store = InMemoryEventStore::new();
        store.record(&event(EventKind::SosGesture, "Gate", 1)).unwrap();
        store.record(&event(EventKind::Violence, "Lobby", 2)).unwrap();
        let events = store.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].location, "Gate");
        assert_eq!(events[1].kind, EventKind::Violence);
    }

    #[test]
    fn sqlite_store_recent_and_prune() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let store = SqliteEventStore::open(path.to_str().unwrap()).unwrap();

        let now = now_s().unwrap();
        store.record(&event(EventKind::SosGesture, "Old", now - 7_200)).unwrap();
        store.record(&event(EventKind::SosGesture, "Gate", now)).unwrap();
        store.record(&event(EventKind::Violence, "Lobby", now)).unwrap();
        assert_eq!(store.count().unwrap(), 3);

        let recent = store.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].location, "Gate");
        assert_eq!(recent[1].location, "Lobby");

        let removed = store.prune_older_than(Duration::from_secs(3_600)).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().unwrap(), 2);
        store.flush().unwrap();
    }

    #[test]
    fn sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let path = path.to_str().unwrap();
        {
            let store = SqliteEventStore::open(path).unwrap();
            store.record(&event(EventKind::SosGesture, "Gate", 10)).unwrap();
        }
        let store = SqliteEventStore::open(path).unwrap();
        assert_eq!(store.recent(10).unwrap()[0].location, "Gate");
    }

    #[test]
    fn prune_with_huge_retention_keeps_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let store = SqliteEventStore::open(path.to_str().unwrap()).unwrap();
        store.record(&event(EventKind::SosGesture, "Gate", now_s().unwrap())).unwrap();

        assert_eq!(store.prune_older_than(Duration::from_secs(u64::MAX)).unwrap(), 0);
        assert_eq!(store.prune_older_than(Duration::from_secs(1 << 63)).unwrap(), 0);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn query_filters_before_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let store = SqliteEventStore::open(path.to_str().unwrap()).unwrap();

        store.record(&event(EventKind::Violence, "Gate", 1)).unwrap();
        for t in 2..12 {
            store.record(&event(EventKind::SosGesture, "Lobby", t)).unwrap();
        }

        let violence = store
            .query(&EventQuery {
                kind: Some(EventKind::Violence),
                limit: 5,
                ..EventQuery::default()
            })
            .unwrap();
        assert_eq!(violence.len(), 1);
        assert_eq!(violence[0].location, "Gate");

        let lobby = store
            .query(&EventQuery {
                kind: Some(EventKind::SosGesture),
                location: Some("Lobby".to_string()),
                limit: 3,
            })
            .unwrap();
        let stamps: Vec<u64> = lobby.iter().map(|ev| ev.unix_secs).collect();
        assert_eq!(stamps, vec![9, 10, 11]);

        let none = store
            .query(&EventQuery {
                location: Some("Roof".to_string()),
                limit: 10,
                ..EventQuery::default()
            })
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn evidence_is_saved_per_location_and_kind() {
        let dir = tempfile::tempdir().unwrap();
        let writer = EvidenceWriter::new(dir.path().join("evidence")).unwrap();
        let frame = Frame::filled(8, 6, [200, 10, 10]);
        let ev = event(EventKind::Violence, "Main Gate", 1_700_000_000);

        let first = writer.save(&ev, &frame).unwrap();
        assert_eq!(
            first,
            writer
                .root()
                .join("Main_Gate")
                .join("violence")
                .join("1700000000.png")
        );
        let second = writer.save(&ev, &frame).unwrap();
        assert!(second.ends_with("1700000000-1.png"));

        let saved = image::open(&first).unwrap().to_rgb8();
        assert_eq!(saved.dimensions(), (8, 6));
        assert_eq!(saved.get_pixel(0, 0).0, [200, 10, 10]);
    }

    #[test]
    fn evidence_path_travels_in_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");
        let store = SqliteEventStore::open(path.to_str().unwrap()).unwrap();

        let mut ev = event(EventKind::SosGesture, "Gate", 5);
        ev.evidence = Some(PathBuf::from("/evidence/Gate/sos_gesture/5.png"));
        store.record(&ev).unwrap();
        store.record(&event(EventKind::SosGesture, "Gate", 6)).unwrap();

        let recent = store.recent(2).unwrap();
        assert_eq!(recent[0].evidence, ev.evidence);
        assert_eq!(recent[1].evidence, None);
    }
}
