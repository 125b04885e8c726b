//! Durable event store and query layer
//!
//! An append-mostly SQLite log of events with indexed retrieval by
//! recency, severity, and trigger flag, plus on-demand aggregate
//! statistics. The full serialized event is kept in `event_data`, so rows
//! round-trip back into `SecurityEvent` without lossy column mapping. A
//! server-side `created_at` insertion timestamp, distinct from the event's
//! own timestamp, makes ingestion lag observable.

use crate::error::StoreError;
use crate::events::{SecurityEvent, Severity};
use log::info;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;

/// Aggregate statistics over the stored events, computed per call
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EventStats {
    pub total: i64,
    pub by_severity: BTreeMap<String, i64>,
    pub rules_triggered: i64,
}

/// Sink interface the bridge writes through; lets tests inject failures
pub trait EventSink: Send {
    fn persist(&self, event: &SecurityEvent) -> Result<(), StoreError>;
}

/// SQLite-backed event store
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the store at the given path
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        info!("Event store opened at {}", path.display());
        Ok(db)
    }

    /// In-memory store for tests
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY NOT NULL,
                timestamp TEXT NOT NULL,
                severity TEXT NOT NULL,
                event_type TEXT NOT NULL,
                event_data TEXT NOT NULL,
                hostname TEXT NOT NULL,
                tags TEXT NOT NULL,
                rule_triggered INTEGER NOT NULL DEFAULT 0,
                rule_name TEXT,
                created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp DESC);
            CREATE INDEX IF NOT EXISTS idx_events_severity ON events(severity);
            CREATE INDEX IF NOT EXISTS idx_events_rule_triggered ON events(rule_triggered);
            "#,
        )?;
        Ok(())
    }

    /// Insert one event; replaying an id already present is a no-op
    ///
    /// Returns whether a new row was created.
    pub fn insert_event(&self, event: &SecurityEvent) -> Result<bool, StoreError> {
        let event_data = event.to_json()?;
        let tags = serde_json::to_string(&event.tags)?;

        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            r#"
            INSERT OR IGNORE INTO events
                (id, timestamp, severity, event_type, event_data, hostname, tags, rule_triggered, rule_name)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                event.id.to_string(),
                event.timestamp.to_rfc3339(),
                event.severity.as_str(),
                event.kind.label(),
                event_data,
                event.hostname,
                tags,
                event.rule_triggered as i32,
                event.rule_name,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Fetch the most recent events in descending time order
    pub fn recent_events(&self, limit: i64) -> Result<Vec<SecurityEvent>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT event_data FROM events ORDER BY timestamp DESC, created_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |row| row.get::<_, String>(0))?;

        let mut events = Vec::new();
        for row in rows {
            events.push(SecurityEvent::from_json(&row?)?);
        }
        Ok(events)
    }

    /// Substring search across the searchable fields with optional minimum
    /// severity and limit/offset pagination
    ///
    /// # Errors
    ///
    /// Returns `StoreError::InvalidSeverity` for an unknown severity token;
    /// invalid parameters never crash the store.
    pub fn search_events(
        &self,
        query: &str,
        min_severity: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SecurityEvent>, StoreError> {
        let mut sql = String::from(
            "SELECT event_data FROM events \
             WHERE (event_data LIKE ?1 OR hostname LIKE ?1 OR tags LIKE ?1 \
                    OR COALESCE(rule_name, '') LIKE ?1)",
        );

        if let Some(token) = min_severity {
            let floor: Severity = token
                .parse()
                .map_err(StoreError::InvalidSeverity)?;
            // The IN-list is built from the fixed severity constants, never
            // from caller input
            let admitted: Vec<String> = Severity::ALL
                .iter()
                .filter(|s| **s >= floor)
                .map(|s| format!("'{}'", s.as_str()))
                .collect();
            sql.push_str(&format!(" AND severity IN ({})", admitted.join(", ")));
        }

        sql.push_str(" ORDER BY timestamp DESC, created_at DESC LIMIT ?2 OFFSET ?3");

        let pattern = format!("%{}%", query);
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![pattern, limit, offset], |row| {
            row.get::<_, String>(0)
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(SecurityEvent::from_json(&row?)?);
        }
        Ok(events)
    }

    /// Aggregate statistics reflecting the store's state at call time
    pub fn stats(&self) -> Result<EventStats, StoreError> {
        let conn = self.conn.lock().unwrap();

        let total: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;

        let mut by_severity = BTreeMap::new();
        let mut stmt =
            conn.prepare("SELECT severity, COUNT(*) FROM events GROUP BY severity")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (severity, count) = row?;
            by_severity.insert(severity, count);
        }

        let rules_triggered: i64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE rule_triggered = 1",
            [],
            |row| row.get(0),
        )?;

        Ok(EventStats {
            total,
            by_severity,
            rules_triggered,
        })
    }

    /// Server-side insertion timestamp for one event id (None if absent)
    pub fn insertion_timestamp(&self, id: &str) -> Result<Option<String>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT created_at FROM events WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}

impl EventSink for Database {
    fn persist(&self, event: &SecurityEvent) -> Result<(), StoreError> {
        self.insert_event(event).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventKind, FileOperation};
    use chrono::{Duration as ChronoDuration, Utc};

    fn file_event(path: &str, severity: Severity) -> SecurityEvent {
        SecurityEvent::new(
            severity,
            EventKind::FileIntegrity {
                path: path.to_string(),
                operation: FileOperation::Modified,
                content_hash: None,
            },
            "localhost".to_string(),
        )
    }

    fn log_event(message: &str, severity: Severity) -> SecurityEvent {
        SecurityEvent::new(
            severity,
            EventKind::SystemLogLine {
                source: "testd".to_string(),
                level: "info".to_string(),
                message: message.to_string(),
            },
            "localhost".to_string(),
        )
    }

    #[test]
    fn test_insert_and_fetch_round_trip() {
        let db = Database::open_in_memory().unwrap();
        let event = file_event("/etc/hosts", Severity::Medium).with_tag("file_monitor");

        assert!(db.insert_event(&event).unwrap());
        let fetched = db.recent_events(10).unwrap();
        assert_eq!(fetched, vec![event]);
    }

    #[test]
    fn test_idempotent_insert() {
        let db = Database::open_in_memory().unwrap();
        let event = file_event("/etc/hosts", Severity::Low);

        assert!(db.insert_event(&event).unwrap());
        assert!(!db.insert_event(&event).unwrap());
        assert_eq!(db.stats().unwrap().total, 1);
    }

    #[test]
    fn test_recent_events_descending() {
        let db = Database::open_in_memory().unwrap();

        let mut older = file_event("/tmp/old", Severity::Low);
        older.timestamp = Utc::now() - ChronoDuration::seconds(60);
        let newer = file_event("/tmp/new", Severity::Low);

        db.insert_event(&older).unwrap();
        db.insert_event(&newer).unwrap();

        let events = db.recent_events(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].id, newer.id);
        assert_eq!(events[1].id, older.id);

        let limited = db.recent_events(1).unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].id, newer.id);
    }

    #[test]
    fn test_search_substring_and_min_severity() {
        let db = Database::open_in_memory().unwrap();
        db.insert_event(&log_event("disk failure imminent", Severity::High))
            .unwrap();
        db.insert_event(&log_event("disk check passed", Severity::Info))
            .unwrap();
        db.insert_event(&log_event("network flap", Severity::Critical))
            .unwrap();

        let all_disk = db.search_events("disk", None, 10, 0).unwrap();
        assert_eq!(all_disk.len(), 2);

        let high_disk = db.search_events("disk", Some("HIGH"), 10, 0).unwrap();
        assert_eq!(high_disk.len(), 1);
        assert_eq!(high_disk[0].severity, Severity::High);

        // Minimum severity admits everything above the floor too
        let medium_up = db.search_events("", Some("medium"), 10, 0).unwrap();
        assert_eq!(medium_up.len(), 2);
    }

    #[test]
    fn test_search_pagination() {
        let db = Database::open_in_memory().unwrap();
        for i in 0..5 {
            let mut event = log_event(&format!("paged message {}", i), Severity::Info);
            event.timestamp = Utc::now() - ChronoDuration::seconds(i);
            db.insert_event(&event).unwrap();
        }

        let first = db.search_events("paged", None, 2, 0).unwrap();
        let second = db.search_events("paged", None, 2, 2).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        assert!(first.iter().all(|e| !second.iter().any(|s| s.id == e.id)));
    }

    #[test]
    fn test_search_rejects_unknown_severity() {
        let db = Database::open_in_memory().unwrap();
        let result = db.search_events("x", Some("EXTREME"), 10, 0);
        assert!(matches!(result, Err(StoreError::InvalidSeverity(_))));
    }

    #[test]
    fn test_stats() {
        let db = Database::open_in_memory().unwrap();
        db.insert_event(&log_event("a", Severity::Info)).unwrap();
        db.insert_event(&log_event("b", Severity::Info)).unwrap();
        db.insert_event(&log_event("c", Severity::High).with_rule("high_severity_alert"))
            .unwrap();

        let stats = db.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_severity.get("INFO"), Some(&2));
        assert_eq!(stats.by_severity.get("HIGH"), Some(&1));
        assert_eq!(stats.rules_triggered, 1);
    }

    #[test]
    fn test_server_side_insertion_timestamp() {
        let db = Database::open_in_memory().unwrap();
        let mut event = log_event("lagged", Severity::Info);
        // Event created well before it reaches the store
        event.timestamp = Utc::now() - ChronoDuration::hours(1);
        db.insert_event(&event).unwrap();

        let created_at = db
            .insertion_timestamp(&event.id.to_string())
            .unwrap()
            .unwrap();
        assert_ne!(created_at, event.timestamp.to_rfc3339());
        assert!(db.insertion_timestamp("missing-id").unwrap().is_none());
    }
}
