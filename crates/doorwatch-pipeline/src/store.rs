//! Persistence seam for access, threat, and anomaly records.
//!
//! The pipeline writes through the [`AccessStore`] trait; deployments
//! pick the backend. [`MemoryStore`] is the reference implementation
//! and the test double: every write also lands in the audit trail.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use doorwatch_analytics::{Severity, ThreatAlert};
use doorwatch_core::{AccessOutcome, AccessType};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store backend unavailable: {0}")]
    Unavailable(String),
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A persisted access attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AccessRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub person_id: String,
    pub access_type: AccessType,
    pub confidence: f32,
    pub outcome: AccessOutcome,
}

/// A persisted anomaly observation.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub person_id: String,
    pub kind: String,
    pub score: f64,
    pub description: String,
}

/// One audit-trail line; every store write appends one.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub person_id: String,
    pub detail: String,
}

/// Storage operations the pipeline depends on.
pub trait AccessStore: Send + Sync {
    fn log_access(
        &self,
        person_id: &str,
        access_type: AccessType,
        confidence: f32,
        outcome: AccessOutcome,
    ) -> Result<(), StoreError>;

    fn log_threat(&self, alert: &ThreatAlert) -> Result<(), StoreError>;

    fn log_anomaly(
        &self,
        person_id: &str,
        kind: &str,
        score: f64,
        description: &str,
    ) -> Result<(), StoreError>;

    /// Unresolved threats, optionally filtered to one exact severity.
    fn active_threats(&self, severity: Option<Severity>) -> Result<Vec<ThreatAlert>, StoreError>;

    /// Access records, newest first, optionally scoped to one person.
    fn access_logs(
        &self,
        person_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AccessRecord>, StoreError>;

    /// Audit trail, newest first.
    fn audit_logs(&self, limit: usize, offset: usize) -> Result<Vec<AuditRecord>, StoreError>;
}

#[derive(Default)]
struct MemoryStoreState {
    access: Vec<AccessRecord>,
    threats: Vec<ThreatAlert>,
    anomalies: Vec<AnomalyRecord>,
    audit: Vec<AuditRecord>,
}

/// In-memory store. Suited to tests and single-process deployments
/// that accept losing history on restart.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryStoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn anomaly_records(&self) -> Vec<AnomalyRecord> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.anomalies.clone()
    }
}

fn audit(state: &mut MemoryStoreState, action: &str, person_id: &str, detail: String) {
    state.audit.push(AuditRecord {
        timestamp: Utc::now(),
        action: action.to_string(),
        person_id: person_id.to_string(),
        detail,
    });
}

impl AccessStore for MemoryStore {
    fn log_access(
        &self,
        person_id: &str,
        access_type: AccessType,
        confidence: f32,
        outcome: AccessOutcome,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.access.push(AccessRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            person_id: person_id.to_string(),
            access_type,
            confidence,
            outcome,
        });
        audit(
            &mut state,
            "access",
            person_id,
            format!("{access_type:?}/{outcome:?} confidence {confidence:.2}"),
        );
        Ok(())
    }

    fn log_threat(&self, alert: &ThreatAlert) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        audit(
            &mut state,
            "threat",
            &alert.person_id,
            alert.message.clone(),
        );
        state.threats.push(alert.clone());
        Ok(())
    }

    fn log_anomaly(
        &self,
        person_id: &str,
        kind: &str,
        score: f64,
        description: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.anomalies.push(AnomalyRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            person_id: person_id.to_string(),
            kind: kind.to_string(),
            score,
            description: description.to_string(),
        });
        audit(
            &mut state,
            "anomaly",
            person_id,
            format!("{kind} score {score:.3}"),
        );
        Ok(())
    }

    fn active_threats(&self, severity: Option<Severity>) -> Result<Vec<ThreatAlert>, StoreError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .threats
            .iter()
            .filter(|t| !t.resolved)
            .filter(|t| severity.map_or(true, |s| t.severity == s))
            .cloned()
            .collect())
    }

    fn access_logs(
        &self,
        person_id: Option<&str>,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<AccessRecord>, StoreError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .access
            .iter()
            .rev()
            .filter(|r| person_id.map_or(true, |p| r.person_id == p))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    fn audit_logs(&self, limit: usize, offset: usize) -> Result<Vec<AuditRecord>, StoreError> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .audit
            .iter()
            .rev()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }
}
