//! Behavioral threat rules over per-person access history.
//!
//! Rules are independent: each one inspects "now + history + incoming
//! event" and yields zero or one alert. All applicable rules fire on
//! every event; there is no suppression or precedence between them.
//! History is bounded: entries older than the largest configured window
//! are pruned on every append.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Timelike, Utc};
use doorwatch_core::AccessOutcome;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ordered alert severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Which rule produced an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreatKind {
    RepeatedFailedAccess,
    ProlongedInactivity,
    UnusualAccessTime,
    AccessFrequencySpike,
}

/// Rule-specific measurements attached to an alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertDetail {
    FailedAttempts { count: usize },
    Inactivity {
        hours: f64,
        last_activity: DateTime<Utc>,
    },
    AccessHour { hour: u32 },
    AccessRate { count: usize, window_minutes: i64 },
}

/// A triggered behavioral alert.
///
/// The `resolved` flag belongs to the persistence store; the rule
/// engine always emits alerts unresolved and never mutates them after
/// creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatAlert {
    pub id: Uuid,
    pub kind: ThreatKind,
    pub severity: Severity,
    pub person_id: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    pub detail: AlertDetail,
}

/// Rule thresholds and windows, fixed at construction.
#[derive(Debug, Clone)]
pub struct RuleConfig {
    /// Failed attempts within the window needed to trigger (>=).
    pub failed_attempt_threshold: usize,
    pub failed_attempt_window: Duration,
    /// Inactivity longer than this triggers (strictly greater).
    pub inactivity_threshold: Duration,
    /// Hours of day (0-23) considered unusual for access.
    pub unusual_hours: HashSet<u32>,
    /// Successful accesses within the window must strictly exceed this.
    pub spike_threshold: usize,
    pub spike_window: Duration,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            failed_attempt_threshold: 3,
            failed_attempt_window: Duration::minutes(10),
            inactivity_threshold: Duration::hours(24),
            // 10 PM - 5 AM
            unusual_hours: [22, 23, 0, 1, 2, 3, 4, 5].into_iter().collect(),
            spike_threshold: 10,
            spike_window: Duration::minutes(60),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RuleStats {
    pub total_failed_attempts: usize,
    pub total_logged_attempts: usize,
    pub tracked_persons: usize,
}

#[derive(Debug, Clone)]
struct HistoryEntry {
    at: DateTime<Utc>,
    person_id: String,
    outcome: AccessOutcome,
}

#[derive(Default)]
struct RuleState {
    history: VecDeque<HistoryEntry>,
    last_activity: HashMap<String, DateTime<Utc>>,
    total_logged: usize,
    total_failed: usize,
}

/// Evaluates behavioral rules against bounded per-person history.
///
/// One mutex serializes history writers against rule evaluation so a
/// shared engine can be driven from concurrent pipeline invocations.
pub struct ThreatRuleEngine {
    config: RuleConfig,
    state: Mutex<RuleState>,
}

impl ThreatRuleEngine {
    pub fn new(config: RuleConfig) -> Self {
        Self {
            config,
            state: Mutex::new(RuleState::default()),
        }
    }

    /// Append an access attempt to history and prune entries that have
    /// fallen out of every rule window. Does not advance the
    /// last-activity marker; see [`process`](Self::process).
    pub fn log_access_attempt(&self, person_id: &str, success: bool, at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.append(&mut state, person_id, success, at);
    }

    /// Evaluate all rules for a person at the given instant, against
    /// history as currently logged. The last-activity marker is read
    /// as-is, so callers that want "prior occurrence" semantics must
    /// evaluate before marking (what [`process`](Self::process) does).
    pub fn evaluate(&self, person_id: &str, at: DateTime<Utc>) -> Vec<ThreatAlert> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.evaluate_locked(&state, person_id, at)
    }

    /// Atomically log an attempt, evaluate every rule, then advance the
    /// person's activity marker.
    ///
    /// Ordering matters: the incoming failure is already in history when
    /// failed-attempt counting runs (it counts as one of the attempts),
    /// while inactivity is judged against the activity marker from
    /// before this event.
    pub fn process(&self, person_id: &str, success: bool, at: DateTime<Utc>) -> Vec<ThreatAlert> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.append(&mut state, person_id, success, at);
        let alerts = self.evaluate_locked(&state, person_id, at);
        state.last_activity.insert(person_id.to_string(), at);
        alerts
    }

    /// Timestamp of the person's most recent logged activity.
    pub fn last_seen(&self, person_id: &str) -> Option<DateTime<Utc>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.last_activity.get(person_id).copied()
    }

    /// Record activity without running rules (e.g. seeding history from
    /// a replay).
    pub fn mark_activity(&self, person_id: &str, at: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.last_activity.insert(person_id.to_string(), at);
    }

    pub fn stats(&self) -> RuleStats {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        RuleStats {
            total_failed_attempts: state.total_failed,
            total_logged_attempts: state.total_logged,
            tracked_persons: state.last_activity.len(),
        }
    }

    // --- Individual rules, each evaluable on its own ---

    /// Repeated failed access: failed count in the trailing window
    /// reaches the threshold. Count == threshold fires.
    pub fn check_failed_attempts(&self, person_id: &str, at: DateTime<Utc>) -> Option<ThreatAlert> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.failed_attempts_alert(&state, person_id, at)
    }

    /// Prolonged inactivity: elapsed time strictly greater than the
    /// threshold. Exactly at the threshold does not fire.
    pub fn check_inactivity(&self, person_id: &str, at: DateTime<Utc>) -> Option<ThreatAlert> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.inactivity_alert(&state, person_id, at)
    }

    /// Unusual access time: the event hour is in the configured set.
    pub fn check_unusual_hour(&self, person_id: &str, at: DateTime<Utc>) -> Option<ThreatAlert> {
        self.unusual_hour_alert(person_id, at)
    }

    /// Access frequency spike: successful count in the trailing window
    /// strictly exceeds the threshold.
    pub fn check_frequency_spike(&self, person_id: &str, at: DateTime<Utc>) -> Option<ThreatAlert> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.frequency_spike_alert(&state, person_id, at)
    }

    // --- Internals ---

    fn append(&self, state: &mut RuleState, person_id: &str, success: bool, at: DateTime<Utc>) {
        state.history.push_back(HistoryEntry {
            at,
            person_id: person_id.to_string(),
            outcome: if success {
                AccessOutcome::Success
            } else {
                AccessOutcome::Failed
            },
        });
        state.total_logged += 1;
        if !success {
            state.total_failed += 1;
        }

        // Entries older than every window are invisible to all rules.
        let horizon = at - self.config.failed_attempt_window.max(self.config.spike_window);
        while let Some(front) = state.history.front() {
            if front.at <= horizon {
                state.history.pop_front();
            } else {
                break;
            }
        }
    }

    fn evaluate_locked(
        &self,
        state: &RuleState,
        person_id: &str,
        at: DateTime<Utc>,
    ) -> Vec<ThreatAlert> {
        let mut alerts = Vec::new();
        alerts.extend(self.failed_attempts_alert(state, person_id, at));
        alerts.extend(self.inactivity_alert(state, person_id, at));
        alerts.extend(self.unusual_hour_alert(person_id, at));
        alerts.extend(self.frequency_spike_alert(state, person_id, at));
        alerts
    }

    fn count_in_window(
        state: &RuleState,
        person_id: &str,
        window_start: DateTime<Utc>,
        outcome: AccessOutcome,
    ) -> usize {
        state
            .history
            .iter()
            .filter(|e| e.at > window_start && e.person_id == person_id && e.outcome == outcome)
            .count()
    }

    fn failed_attempts_alert(
        &self,
        state: &RuleState,
        person_id: &str,
        at: DateTime<Utc>,
    ) -> Option<ThreatAlert> {
        let window_start = at - self.config.failed_attempt_window;
        let count = Self::count_in_window(state, person_id, window_start, AccessOutcome::Failed);
        if count < self.config.failed_attempt_threshold {
            return None;
        }

        let alert = ThreatAlert {
            id: Uuid::new_v4(),
            kind: ThreatKind::RepeatedFailedAccess,
            severity: Severity::High,
            person_id: person_id.to_string(),
            message: format!("Multiple failed access attempts ({count}) detected"),
            timestamp: at,
            resolved: false,
            detail: AlertDetail::FailedAttempts { count },
        };
        tracing::warn!(person_id, count, "repeated failed access");
        Some(alert)
    }

    fn inactivity_alert(
        &self,
        state: &RuleState,
        person_id: &str,
        at: DateTime<Utc>,
    ) -> Option<ThreatAlert> {
        let last = *state.last_activity.get(person_id)?;
        let gap = at - last;
        if gap <= self.config.inactivity_threshold {
            return None;
        }

        let hours = gap.num_seconds() as f64 / 3600.0;
        let alert = ThreatAlert {
            id: Uuid::new_v4(),
            kind: ThreatKind::ProlongedInactivity,
            severity: Severity::Critical,
            person_id: person_id.to_string(),
            message: format!("No door activity for {hours:.1} hours"),
            timestamp: at,
            resolved: false,
            detail: AlertDetail::Inactivity {
                hours,
                last_activity: last,
            },
        };
        tracing::error!(person_id, hours, "prolonged inactivity");
        Some(alert)
    }

    fn unusual_hour_alert(&self, person_id: &str, at: DateTime<Utc>) -> Option<ThreatAlert> {
        let hour = at.hour();
        if !self.config.unusual_hours.contains(&hour) {
            return None;
        }

        let alert = ThreatAlert {
            id: Uuid::new_v4(),
            kind: ThreatKind::UnusualAccessTime,
            severity: Severity::Medium,
            person_id: person_id.to_string(),
            message: format!("Access at unusual time: {}", at.format("%H:%M")),
            timestamp: at,
            resolved: false,
            detail: AlertDetail::AccessHour { hour },
        };
        tracing::warn!(person_id, hour, "unusual access time");
        Some(alert)
    }

    fn frequency_spike_alert(
        &self,
        state: &RuleState,
        person_id: &str,
        at: DateTime<Utc>,
    ) -> Option<ThreatAlert> {
        let window_start = at - self.config.spike_window;
        let count = Self::count_in_window(state, person_id, window_start, AccessOutcome::Success);
        if count <= self.config.spike_threshold {
            return None;
        }

        let window_minutes = self.config.spike_window.num_minutes();
        let alert = ThreatAlert {
            id: Uuid::new_v4(),
            kind: ThreatKind::AccessFrequencySpike,
            severity: Severity::Medium,
            person_id: person_id.to_string(),
            message: format!("High access frequency: {count} accesses in {window_minutes} minutes"),
            timestamp: at,
            resolved: false,
            detail: AlertDetail::AccessRate {
                count,
                window_minutes,
            },
        };
        tracing::warn!(person_id, count, "access frequency spike");
        Some(alert)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// A fixed instant at 14:00 UTC, outside the default unusual hours.
    fn afternoon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 14, 0, 0).unwrap()
    }

    /// A fixed instant at 02:00 UTC, inside the default unusual hours.
    fn small_hours() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 10, 2, 0, 0).unwrap()
    }

    fn kinds(alerts: &[ThreatAlert]) -> Vec<ThreatKind> {
        alerts.iter().map(|a| a.kind).collect()
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_three_failures_fire_exactly_one_high_alert() {
        let engine = ThreatRuleEngine::new(RuleConfig::default());
        let base = afternoon();

        // 3 failures within 2 minutes for an unknown probe.
        engine.process("unknown_001", false, base);
        engine.process("unknown_001", false, base + Duration::minutes(1));
        let alerts = engine.process("unknown_001", false, base + Duration::minutes(2));

        let failed: Vec<_> = alerts
            .iter()
            .filter(|a| a.kind == ThreatKind::RepeatedFailedAccess)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].severity, Severity::High);
        assert_eq!(failed[0].detail, AlertDetail::FailedAttempts { count: 3 });
    }

    #[test]
    fn test_two_failures_do_not_fire() {
        let engine = ThreatRuleEngine::new(RuleConfig::default());
        let base = afternoon();

        engine.process("unknown_001", false, base);
        let alerts = engine.process("unknown_001", false, base + Duration::minutes(1));
        assert!(!kinds(&alerts).contains(&ThreatKind::RepeatedFailedAccess));
    }

    #[test]
    fn test_failures_outside_window_ignored() {
        let engine = ThreatRuleEngine::new(RuleConfig::default());
        let base = afternoon();

        engine.process("p", false, base - Duration::minutes(15));
        engine.process("p", false, base - Duration::minutes(12));
        engine.process("p", false, base);
        let alerts = engine.process("p", false, base + Duration::minutes(1));
        // Only 2 failures inside the 10-minute window.
        assert!(!kinds(&alerts).contains(&ThreatKind::RepeatedFailedAccess));
    }

    #[test]
    fn test_failures_scoped_per_person() {
        let engine = ThreatRuleEngine::new(RuleConfig::default());
        let base = afternoon();

        engine.process("a", false, base);
        engine.process("b", false, base);
        let alerts = engine.process("c", false, base + Duration::minutes(1));
        assert!(!kinds(&alerts).contains(&ThreatKind::RepeatedFailedAccess));
    }

    #[test]
    fn test_inactivity_strict_boundary() {
        let engine = ThreatRuleEngine::new(RuleConfig::default());
        let base = afternoon();
        engine.mark_activity("resident_001", base);

        // Exactly 24.0 hours later: does not fire.
        let at_boundary = engine.check_inactivity("resident_001", base + Duration::hours(24));
        assert!(at_boundary.is_none());

        // One second past the boundary: fires CRITICAL.
        let past = engine
            .check_inactivity(
                "resident_001",
                base + Duration::hours(24) + Duration::seconds(1),
            )
            .expect("should fire past the threshold");
        assert_eq!(past.severity, Severity::Critical);
        assert_eq!(past.kind, ThreatKind::ProlongedInactivity);
    }

    #[test]
    fn test_inactivity_without_marker_is_silent() {
        let engine = ThreatRuleEngine::new(RuleConfig::default());
        assert!(engine.check_inactivity("never_seen", afternoon()).is_none());
    }

    #[test]
    fn test_inactivity_uses_prior_marker_during_process() {
        let engine = ThreatRuleEngine::new(RuleConfig::default());
        let base = afternoon();
        engine.mark_activity("resident_001", base);

        // The event 30 hours later is judged against the old marker,
        // not against itself.
        let alerts = engine.process("resident_001", true, base + Duration::hours(30));
        assert!(kinds(&alerts).contains(&ThreatKind::ProlongedInactivity));

        // The marker has now advanced, so an immediate follow-up is quiet.
        let alerts = engine.process(
            "resident_001",
            true,
            base + Duration::hours(30) + Duration::minutes(5),
        );
        assert!(!kinds(&alerts).contains(&ThreatKind::ProlongedInactivity));
    }

    #[test]
    fn test_unusual_hour_fires_at_2am() {
        let engine = ThreatRuleEngine::new(RuleConfig::default());
        let alert = engine
            .check_unusual_hour("resident_001", small_hours())
            .expect("2 AM is unusual");
        assert_eq!(alert.severity, Severity::Medium);
        assert_eq!(alert.detail, AlertDetail::AccessHour { hour: 2 });
    }

    #[test]
    fn test_usual_hour_is_quiet_at_2pm() {
        let engine = ThreatRuleEngine::new(RuleConfig::default());
        assert!(engine.check_unusual_hour("resident_001", afternoon()).is_none());
    }

    #[test]
    fn test_unusual_hours_overridable() {
        let config = RuleConfig {
            unusual_hours: [14].into_iter().collect(),
            ..RuleConfig::default()
        };
        let engine = ThreatRuleEngine::new(config);
        assert!(engine.check_unusual_hour("p", afternoon()).is_some());
        assert!(engine.check_unusual_hour("p", small_hours()).is_none());
    }

    #[test]
    fn test_frequency_spike_strictly_exceeds() {
        let config = RuleConfig {
            spike_threshold: 3,
            ..RuleConfig::default()
        };
        let engine = ThreatRuleEngine::new(config);
        let base = afternoon();

        for i in 0..3 {
            let alerts = engine.process("p", true, base + Duration::minutes(i));
            assert!(
                !kinds(&alerts).contains(&ThreatKind::AccessFrequencySpike),
                "count {} must not fire",
                i + 1
            );
        }
        // Fourth success strictly exceeds the threshold of 3.
        let alerts = engine.process("p", true, base + Duration::minutes(3));
        assert!(kinds(&alerts).contains(&ThreatKind::AccessFrequencySpike));
    }

    #[test]
    fn test_frequency_spike_ignores_failures() {
        let config = RuleConfig {
            spike_threshold: 2,
            ..RuleConfig::default()
        };
        let engine = ThreatRuleEngine::new(config);
        let base = afternoon();

        for i in 0..6 {
            let alerts = engine.process("p", false, base + Duration::minutes(i));
            assert!(!kinds(&alerts).contains(&ThreatKind::AccessFrequencySpike));
        }
    }

    #[test]
    fn test_multiple_rules_fire_together() {
        // 3 failures at 2 AM: both RepeatedFailedAccess and
        // UnusualAccessTime surface; neither suppresses the other.
        let engine = ThreatRuleEngine::new(RuleConfig::default());
        let base = small_hours();

        engine.process("unknown_001", false, base);
        engine.process("unknown_001", false, base + Duration::minutes(1));
        let alerts = engine.process("unknown_001", false, base + Duration::minutes(2));

        let kinds = kinds(&alerts);
        assert!(kinds.contains(&ThreatKind::RepeatedFailedAccess));
        assert!(kinds.contains(&ThreatKind::UnusualAccessTime));
    }

    #[test]
    fn test_history_is_pruned() {
        let engine = ThreatRuleEngine::new(RuleConfig::default());
        let base = afternoon();

        for i in 0..500 {
            engine.log_access_attempt("p", true, base + Duration::seconds(i));
        }
        // Jump far past every window; old entries must be gone.
        engine.log_access_attempt("p", true, base + Duration::hours(5));

        let state = engine.state.lock().unwrap();
        assert_eq!(state.history.len(), 1);
        // Lifetime counters are unaffected by pruning.
        drop(state);
        assert_eq!(engine.stats().total_logged_attempts, 501);
    }

    #[test]
    fn test_stats_counts() {
        let engine = ThreatRuleEngine::new(RuleConfig::default());
        let base = afternoon();
        engine.process("a", true, base);
        engine.process("a", false, base + Duration::minutes(1));
        engine.process("b", false, base + Duration::minutes(2));

        let stats = engine.stats();
        assert_eq!(stats.total_logged_attempts, 3);
        assert_eq!(stats.total_failed_attempts, 2);
        assert_eq!(stats.tracked_persons, 2);
    }
}
