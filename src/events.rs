//! Core event model shared by every pipeline stage
//!
//! This module defines the event schema that producers create, the rule
//! engine annotates, the collector serializes, and the bridge and store
//! treat as an immutable record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type for consistent time handling across the application
pub type Timestamp = DateTime<Utc>;

/// Severity levels for security events
///
/// Ordering is total and used for threshold rules and store filters:
/// `Info < Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All severities in ascending order
    pub const ALL: [Severity; 5] = [
        Severity::Info,
        Severity::Low,
        Severity::Medium,
        Severity::High,
        Severity::Critical,
    ];

    /// The wire/storage token for this severity
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(Severity::Info),
            "LOW" => Ok(Severity::Low),
            "MEDIUM" => Ok(Severity::Medium),
            "HIGH" => Ok(Severity::High),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(other.to_string()),
        }
    }
}

/// File operations reported by the integrity watcher
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FileOperation {
    Created,
    Modified,
    Deleted,
    Renamed,
}

/// The observation carried by an event, exactly one variant per event
///
/// The variant never changes after creation. Every consumer (rule engine,
/// serialization, store mapping) matches exhaustively, so adding an
/// observation type is a compile-time-checked change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Filesystem integrity change under the watched root
    FileIntegrity {
        path: String,
        operation: FileOperation,
        content_hash: Option<String>,
    },
    /// Per-process (or synthetic aggregate) resource sample
    ProcessSample {
        pid: u32,
        name: String,
        cpu_percent: f32,
        memory_bytes: u64,
    },
    /// Socket appearance, state transition, or closure
    NetworkSocket {
        local_addr: String,
        remote_addr: Option<String>,
        protocol: String,
        state: String,
    },
    /// One line from the host's log source
    SystemLogLine {
        source: String,
        level: String,
        message: String,
    },
}

impl EventKind {
    /// The discriminant token, as written to the store's `event_type` column
    pub fn label(&self) -> &'static str {
        match self {
            EventKind::FileIntegrity { .. } => "file_integrity",
            EventKind::ProcessSample { .. } => "process_sample",
            EventKind::NetworkSocket { .. } => "network_socket",
            EventKind::SystemLogLine { .. } => "system_log_line",
        }
    }
}

/// One classified observation flowing through the pipeline
///
/// Constructed exactly once by a producer, annotated at most once by the
/// rule engine, serialized exactly once by the collector, and immutable
/// from the bridge onward. Hand-offs move the owned value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SecurityEvent {
    /// Unique identifier, assigned at creation
    pub id: Uuid,

    /// Creation instant, UTC
    pub timestamp: Timestamp,

    /// Severity assigned by the producer
    pub severity: Severity,

    /// The observation payload
    #[serde(flatten)]
    pub kind: EventKind,

    /// Observing host's identity
    pub hostname: String,

    /// Free-form labels from the producer, appendable by the rule engine
    #[serde(default)]
    pub tags: Vec<String>,

    /// Whether a rule matched this event
    #[serde(default)]
    pub rule_triggered: bool,

    /// Name of the first matching rule, present iff `rule_triggered`
    #[serde(default)]
    pub rule_name: Option<String>,
}

impl SecurityEvent {
    /// Create a new event with a fresh id and the current time
    pub fn new(severity: Severity, kind: EventKind, hostname: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            severity,
            kind,
            hostname,
            tags: Vec::new(),
            rule_triggered: false,
            rule_name: None,
        }
    }

    /// Append a tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Mark this event as having triggered the named rule
    ///
    /// Sets `rule_triggered` and `rule_name` together, preserving the
    /// invariant that one implies the other.
    pub fn with_rule(mut self, rule_name: impl Into<String>) -> Self {
        self.rule_triggered = true;
        self.rule_name = Some(rule_name.into());
        self
    }

    /// Serialize to a single JSON line for the wire format
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse one wire-format line back into an event
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn sample_event(kind: EventKind) -> SecurityEvent {
        SecurityEvent::new(Severity::Medium, kind, "testhost".to_string())
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::Low > Severity::Info);
    }

    #[quickcheck]
    fn prop_severity_order_matches_rank(a: u8, b: u8) -> bool {
        let a = Severity::ALL[(a as usize) % Severity::ALL.len()];
        let b = Severity::ALL[(b as usize) % Severity::ALL.len()];
        let rank = |s: Severity| Severity::ALL.iter().position(|x| *x == s).unwrap();
        (a < b) == (rank(a) < rank(b)) && (a == b) == (rank(a) == rank(b))
    }

    #[test]
    fn test_severity_round_trip_tokens() {
        for severity in Severity::ALL {
            let parsed: Severity = severity.as_str().parse().unwrap();
            assert_eq!(parsed, severity);
            assert_eq!(
                serde_json::to_string(&severity).unwrap(),
                format!("\"{}\"", severity.as_str())
            );
        }
        assert!("bogus".parse::<Severity>().is_err());
    }

    #[test]
    fn test_file_event_round_trip() {
        let event = sample_event(EventKind::FileIntegrity {
            path: "/etc/passwd".to_string(),
            operation: FileOperation::Modified,
            content_hash: Some("abc123".to_string()),
        })
        .with_tag("file_monitor");

        let json = event.to_json().unwrap();
        let parsed = SecurityEvent::from_json(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn test_network_event_round_trip() {
        let event = sample_event(EventKind::NetworkSocket {
            local_addr: "127.0.0.1:8080".to_string(),
            remote_addr: None,
            protocol: "tcp".to_string(),
            state: "LISTEN".to_string(),
        });

        let parsed = SecurityEvent::from_json(&event.to_json().unwrap()).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn test_process_and_log_round_trip() {
        let process = sample_event(EventKind::ProcessSample {
            pid: 4242,
            name: "cargo".to_string(),
            cpu_percent: 12.5,
            memory_bytes: 1024 * 1024,
        });
        let log = sample_event(EventKind::SystemLogLine {
            source: "kernel".to_string(),
            level: "warn".to_string(),
            message: "spurious interrupt".to_string(),
        })
        .with_rule("high_severity_alert");

        for event in [process, log] {
            let parsed = SecurityEvent::from_json(&event.to_json().unwrap()).unwrap();
            assert_eq!(event, parsed);
        }
    }

    #[test]
    fn test_kind_discriminant_on_wire() {
        let event = sample_event(EventKind::SystemLogLine {
            source: "sshd".to_string(),
            level: "info".to_string(),
            message: "session opened".to_string(),
        });

        let value: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "system_log_line");
        assert_eq!(value["severity"], "MEDIUM");
        assert_eq!(event.kind.label(), "system_log_line");
    }

    #[test]
    fn test_with_rule_sets_both_fields() {
        let event = sample_event(EventKind::ProcessSample {
            pid: 1,
            name: "init".to_string(),
            cpu_percent: 0.0,
            memory_bytes: 0,
        });
        assert!(!event.rule_triggered);
        assert!(event.rule_name.is_none());

        let event = event.with_rule("suspicious_network");
        assert!(event.rule_triggered);
        assert_eq!(event.rule_name.as_deref(), Some("suspicious_network"));
    }
}
