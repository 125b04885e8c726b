//! Rule engine for classifying events as security-relevant
//!
//! Rules are an ordered list of named predicates assembled once at startup.
//! Evaluation is a pure function of the event and the rule set: the first
//! matching rule wins and later matches are never recorded, so it is safe
//! to run synchronously in the collector's hot path.

use crate::events::{EventKind, SecurityEvent, Severity};

/// Paths whose modification is always security-relevant
const SENSITIVE_PATHS: &[&str] = &[
    "/etc/passwd",
    "/etc/shadow",
    "/etc/sudoers",
    ".ssh/authorized_keys",
];

/// Ports associated with common backdoor/C2 listeners
const SUSPICIOUS_PORTS: &[u16] = &[4444, 31337, 1337, 6667];

/// CPU percentage above which a process sample is flagged
const CPU_ABUSE_THRESHOLD: f32 = 90.0;

/// A named predicate over an event
pub struct Rule {
    name: String,
    matcher: Box<dyn Fn(&SecurityEvent) -> bool + Send + Sync>,
}

/// Ordered, first-match-wins rule evaluator
///
/// Read-only after startup; the collector holds a shared reference and no
/// locking is required.
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl RuleEngine {
    /// Create a rule engine with the built-in rules in their fixed order
    pub fn new() -> Self {
        let mut engine = Self { rules: Vec::new() };
        engine.load_default_rules();
        engine
    }

    /// Create an empty engine (used by tests building custom orders)
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Built-in rules; the order here is the evaluation order
    fn load_default_rules(&mut self) {
        // Rule 1: any operation on a sensitive path, regardless of severity
        self.add_rule(
            "critical_file_modification",
            Box::new(|event| {
                matches!(
                    &event.kind,
                    EventKind::FileIntegrity { path, .. }
                        if SENSITIVE_PATHS.iter().any(|p| path.contains(p))
                )
            }),
        );

        // Rule 2: severity threshold
        self.add_rule(
            "high_severity_alert",
            Box::new(|event| event.severity >= Severity::High),
        );

        // Rule 3: suspicious local or remote port
        self.add_rule(
            "suspicious_network",
            Box::new(|event| {
                matches!(
                    &event.kind,
                    EventKind::NetworkSocket { local_addr, remote_addr, .. }
                        if addr_port_suspicious(local_addr)
                            || remote_addr.as_deref().is_some_and(addr_port_suspicious)
                )
            }),
        );

        // Rule 4: resource abuse
        self.add_rule(
            "high_cpu_usage",
            Box::new(|event| {
                matches!(
                    &event.kind,
                    EventKind::ProcessSample { cpu_percent, .. }
                        if *cpu_percent > CPU_ABUSE_THRESHOLD
                )
            }),
        );
    }

    /// Append a rule; evaluation order is insertion order
    pub fn add_rule(
        &mut self,
        name: impl Into<String>,
        matcher: Box<dyn Fn(&SecurityEvent) -> bool + Send + Sync>,
    ) {
        self.rules.push(Rule {
            name: name.into(),
            matcher,
        });
    }

    /// Return the name of the first matching rule, if any
    pub fn evaluate(&self, event: &SecurityEvent) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| (rule.matcher)(event))
            .map(|rule| rule.name.as_str())
    }

    /// Evaluate and annotate: consumes the event, returns it with
    /// `rule_triggered`/`rule_name` set iff a rule matched
    pub fn annotate(&self, event: SecurityEvent) -> SecurityEvent {
        match self.evaluate(&event) {
            Some(name) => {
                let name = name.to_string();
                event.with_rule(name)
            }
            None => event,
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the trailing `:port` of an address and check the suspicious set
fn addr_port_suspicious(addr: &str) -> bool {
    match addr.rsplit_once(':') {
        Some((_, port)) => port
            .parse::<u16>()
            .map(|p| SUSPICIOUS_PORTS.contains(&p))
            .unwrap_or(false),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::FileOperation;

    fn event(severity: Severity, kind: EventKind) -> SecurityEvent {
        SecurityEvent::new(severity, kind, "localhost".to_string())
    }

    #[test]
    fn test_sensitive_path_fires_regardless_of_severity() {
        let engine = RuleEngine::new();
        let e = event(
            Severity::Medium,
            EventKind::FileIntegrity {
                path: "/etc/passwd".to_string(),
                operation: FileOperation::Modified,
                content_hash: None,
            },
        );
        assert_eq!(engine.evaluate(&e), Some("critical_file_modification"));

        let annotated = engine.annotate(e);
        assert!(annotated.rule_triggered);
        assert_eq!(
            annotated.rule_name.as_deref(),
            Some("critical_file_modification")
        );
    }

    #[test]
    fn test_first_match_wins_over_severity_rule() {
        // A CRITICAL event on a sensitive path matches rule 1 and rule 2;
        // only the first is recorded.
        let engine = RuleEngine::new();
        let e = event(
            Severity::Critical,
            EventKind::FileIntegrity {
                path: "/etc/shadow".to_string(),
                operation: FileOperation::Deleted,
                content_hash: None,
            },
        );
        assert_eq!(engine.evaluate(&e), Some("critical_file_modification"));
    }

    #[test]
    fn test_severity_threshold() {
        let engine = RuleEngine::new();
        let e = event(
            Severity::Critical,
            EventKind::SystemLogLine {
                source: "kernel".to_string(),
                level: "error".to_string(),
                message: "oops".to_string(),
            },
        );
        assert_eq!(engine.evaluate(&e), Some("high_severity_alert"));

        let e = event(
            Severity::Medium,
            EventKind::SystemLogLine {
                source: "kernel".to_string(),
                level: "warn".to_string(),
                message: "noise".to_string(),
            },
        );
        assert_eq!(engine.evaluate(&e), None);
    }

    #[test]
    fn test_suspicious_remote_port() {
        let engine = RuleEngine::new();
        let e = event(
            Severity::Low,
            EventKind::NetworkSocket {
                local_addr: "10.0.0.5:51234".to_string(),
                remote_addr: Some("203.0.113.9:31337".to_string()),
                protocol: "tcp".to_string(),
                state: "ESTABLISHED".to_string(),
            },
        );
        assert_eq!(engine.evaluate(&e), Some("suspicious_network"));
    }

    #[test]
    fn test_suspicious_local_port() {
        let engine = RuleEngine::new();
        let e = event(
            Severity::Low,
            EventKind::NetworkSocket {
                local_addr: "0.0.0.0:4444".to_string(),
                remote_addr: None,
                protocol: "tcp".to_string(),
                state: "LISTEN".to_string(),
            },
        );
        assert_eq!(engine.evaluate(&e), Some("suspicious_network"));
    }

    #[test]
    fn test_benign_socket_does_not_fire() {
        let engine = RuleEngine::new();
        let e = event(
            Severity::Low,
            EventKind::NetworkSocket {
                local_addr: "127.0.0.1:8080".to_string(),
                remote_addr: Some("127.0.0.1:54321".to_string()),
                protocol: "tcp".to_string(),
                state: "ESTABLISHED".to_string(),
            },
        );
        assert_eq!(engine.evaluate(&e), None);
    }

    #[test]
    fn test_high_cpu_usage() {
        let engine = RuleEngine::new();
        let e = event(
            Severity::Info,
            EventKind::ProcessSample {
                pid: 999,
                name: "miner".to_string(),
                cpu_percent: 95.0,
                memory_bytes: 0,
            },
        );
        assert_eq!(engine.evaluate(&e), Some("high_cpu_usage"));
    }

    #[test]
    fn test_quiet_log_line_matches_nothing() {
        let engine = RuleEngine::new();
        let e = event(
            Severity::Info,
            EventKind::SystemLogLine {
                source: "cron".to_string(),
                level: "info".to_string(),
                message: "session opened for user root".to_string(),
            },
        );
        let annotated = engine.annotate(e);
        assert!(!annotated.rule_triggered);
        assert!(annotated.rule_name.is_none());
    }

    #[test]
    fn test_custom_rule_order_is_insertion_order() {
        let mut engine = RuleEngine::empty();
        engine.add_rule("first", Box::new(|_| true));
        engine.add_rule("second", Box::new(|_| true));
        let e = event(
            Severity::Info,
            EventKind::ProcessSample {
                pid: 1,
                name: "init".to_string(),
                cpu_percent: 0.0,
                memory_bytes: 0,
            },
        );
        assert_eq!(engine.evaluate(&e), Some("first"));
        assert_eq!(engine.rule_count(), 2);
    }
}
