//! End-to-end event orchestration.
//!
//! One [`EventPipeline::process`] call takes an incoming access attempt
//! through descriptor extraction, identity matching, the grant
//! decision, behavioral rules, anomaly scoring, and persistence. The
//! engines never see each other; this module owns the ordering between
//! them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use doorwatch_analytics::{
    AnomalyError, AnomalyScorer, AnomalyVerdict, EventFeatures, ThreatAlert, ThreatRuleEngine,
};
use doorwatch_core::{
    AccessEvent, AccessOutcome, AccessType, FaceCrop, FeatureExtractor, IdentityMatcher,
    RecognitionResult, UNKNOWN_PERSON,
};

use crate::store::{AccessStore, StoreError};

/// Default minimum match confidence required to grant access. Applied
/// on top of the matcher's own distance threshold; the two knobs are
/// independent.
pub const DEFAULT_MIN_CONFIDENCE: f32 = 0.6;

/// Model label recorded with persisted anomaly observations.
const ANOMALY_MODEL_LABEL: &str = "isolation_forest";

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("descriptor extraction failed: crop yields no features")]
    ExtractionFailed,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Anomaly(#[from] AnomalyError),
}

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    /// Match confidence below this denies access even when the matcher
    /// resolved an identity.
    pub min_confidence: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

/// An incoming access attempt before any decision has been made.
///
/// `person_id` is the asserted identity (badge, keypad code); it is
/// ignored whenever a face crop is present, because the matcher's
/// verdict wins over any assertion.
#[derive(Debug, Clone)]
pub struct AccessRequest {
    pub timestamp: DateTime<Utc>,
    pub person_id: Option<String>,
    pub access_type: AccessType,
    /// Outcome asserted by the upstream device for crop-less requests.
    pub asserted_outcome: AccessOutcome,
}

impl AccessRequest {
    pub fn now(access_type: AccessType) -> Self {
        Self {
            timestamp: Utc::now(),
            person_id: None,
            access_type,
            asserted_outcome: AccessOutcome::Failed,
        }
    }
}

/// Everything one pipeline pass decided.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutcome {
    pub recognition: RecognitionResult,
    pub access_granted: bool,
    pub event: AccessEvent,
    pub alerts: Vec<ThreatAlert>,
    pub anomaly: AnomalyVerdict,
}

/// Wires the engines together and owns the processing order.
pub struct EventPipeline {
    config: PipelineConfig,
    extractor: FeatureExtractor,
    matcher: Arc<IdentityMatcher>,
    rules: Arc<ThreatRuleEngine>,
    scorer: Arc<AnomalyScorer>,
    store: Arc<dyn AccessStore>,
}

impl EventPipeline {
    pub fn new(
        config: PipelineConfig,
        matcher: Arc<IdentityMatcher>,
        rules: Arc<ThreatRuleEngine>,
        scorer: Arc<AnomalyScorer>,
        store: Arc<dyn AccessStore>,
    ) -> Self {
        Self {
            config,
            extractor: FeatureExtractor::new(),
            matcher,
            rules,
            scorer,
            store,
        }
    }

    /// Enroll a face crop under a person id.
    pub fn enroll(&self, person_id: &str, name: &str, crop: &FaceCrop) -> Result<(), PipelineError> {
        let vector = self
            .extractor
            .extract(crop)
            .ok_or(PipelineError::ExtractionFailed)?;
        self.matcher.register(person_id, name, vector);
        Ok(())
    }

    /// Run one access attempt through the full decision flow.
    ///
    /// Persistence failures are logged and swallowed: a dead store must
    /// not turn into a door that neither opens nor alarms.
    pub fn process(&self, request: &AccessRequest, crop: Option<&FaceCrop>) -> PipelineOutcome {
        let (recognition, access_granted, event) = match crop {
            Some(crop) => self.decide_from_crop(request, crop),
            None => self.decide_from_assertion(request),
        };
        let person_id = event.person_id().to_string();

        // Prior activity must be read before the rules advance it, so
        // the anomaly gap feature sees the previous event, not this one.
        let prior = self.rules.last_seen(&person_id);
        let alerts = self.rules.process(
            &person_id,
            event.outcome() == AccessOutcome::Success,
            event.timestamp(),
        );

        let features = EventFeatures::from_event(&event, prior);
        let anomaly = self.scorer.predict(&features);

        self.persist(&event, &alerts, &anomaly);

        tracing::info!(
            person_id,
            access_granted,
            alerts = alerts.len(),
            anomaly = anomaly.is_anomaly,
            "access attempt processed"
        );

        PipelineOutcome {
            recognition,
            access_granted,
            event,
            alerts,
            anomaly,
        }
    }

    fn decide_from_crop(
        &self,
        request: &AccessRequest,
        crop: &FaceCrop,
    ) -> (RecognitionResult, bool, AccessEvent) {
        let recognition = match self.extractor.extract(crop) {
            Some(vector) => self.matcher.identify(&vector),
            None => RecognitionResult::unknown(request.timestamp),
        };

        let matched = recognition.person_id.is_some();
        let access_granted = matched && recognition.confidence >= self.config.min_confidence;
        let person_id = recognition
            .person_id
            .clone()
            .unwrap_or_else(|| UNKNOWN_PERSON.to_string());
        let outcome = if access_granted {
            AccessOutcome::Success
        } else {
            AccessOutcome::Failed
        };

        let event = AccessEvent::new(
            request.timestamp,
            person_id,
            request.access_type,
            recognition.confidence,
            outcome,
        );
        (recognition, access_granted, event)
    }

    fn decide_from_assertion(&self, request: &AccessRequest) -> (RecognitionResult, bool, AccessEvent) {
        let person_id = request
            .person_id
            .clone()
            .unwrap_or_else(|| UNKNOWN_PERSON.to_string());
        let name = self
            .matcher
            .display_name(&person_id)
            .unwrap_or_else(|| "Unknown".to_string());

        // No biometric evidence, so the asserted outcome stands and
        // recognition confidence is undefined (reported as 0).
        let recognition = RecognitionResult {
            person_id: (person_id != UNKNOWN_PERSON).then(|| person_id.clone()),
            name,
            confidence: 0.0,
            timestamp: request.timestamp,
        };
        let access_granted = request.asserted_outcome == AccessOutcome::Success;

        let event = AccessEvent::new(
            request.timestamp,
            person_id,
            request.access_type,
            0.0,
            request.asserted_outcome,
        );
        (recognition, access_granted, event)
    }

    fn persist(&self, event: &AccessEvent, alerts: &[ThreatAlert], anomaly: &AnomalyVerdict) {
        if let Err(err) = self.store.log_access(
            event.person_id(),
            event.access_type(),
            event.confidence(),
            event.outcome(),
        ) {
            tracing::warn!(error = %err, "failed to persist access record");
        }
        for alert in alerts {
            if let Err(err) = self.store.log_threat(alert) {
                tracing::warn!(error = %err, kind = ?alert.kind, "failed to persist threat alert");
            }
        }
        if anomaly.is_anomaly {
            if let Err(err) = self.store.log_anomaly(
                event.person_id(),
                ANOMALY_MODEL_LABEL,
                anomaly.score,
                &anomaly.reason,
            ) {
                tracing::warn!(error = %err, "failed to persist anomaly record");
            }
        }
    }

    /// Retrain the anomaly model from persisted access history.
    ///
    /// Records are replayed oldest first so each event's gap feature is
    /// computed against that person's true previous event.
    pub fn train_anomaly_model(&self, history_limit: usize) -> Result<usize, PipelineError> {
        let mut records = self.store.access_logs(None, history_limit, 0)?;
        records.reverse();

        let mut priors: std::collections::HashMap<String, DateTime<Utc>> =
            std::collections::HashMap::new();
        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            let event = AccessEvent::new(
                record.timestamp,
                record.person_id.clone(),
                record.access_type,
                record.confidence,
                record.outcome,
            );
            let prior = priors.get(record.person_id.as_str()).copied();
            rows.push(EventFeatures::from_event(&event, prior));
            priors.insert(record.person_id.clone(), record.timestamp);
        }

        self.scorer.train(&rows)?;
        Ok(rows.len())
    }

    pub fn store(&self) -> &Arc<dyn AccessStore> {
        &self.store
    }

    pub fn matcher(&self) -> &Arc<IdentityMatcher> {
        &self.matcher
    }

    pub fn scorer(&self) -> &Arc<AnomalyScorer> {
        &self.scorer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::TimeZone;
    use doorwatch_analytics::{ForestConfig, RuleConfig, ThreatKind};
    use doorwatch_core::MatcherConfig;

    fn pipeline_with_store() -> (EventPipeline, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let pipeline = EventPipeline::new(
            PipelineConfig::default(),
            Arc::new(IdentityMatcher::new(MatcherConfig::default())),
            Arc::new(ThreatRuleEngine::new(RuleConfig::default())),
            Arc::new(AnomalyScorer::new(ForestConfig::default())),
            Arc::clone(&store) as Arc<dyn AccessStore>,
        );
        (pipeline, store)
    }

    /// A synthetic face-like crop with enough structure for extraction.
    fn textured_crop() -> FaceCrop {
        let mut data = vec![0u8; 64 * 64];
        for y in 0..64usize {
            for x in 0..64usize {
                data[y * 64 + x] = ((x * 3 + y * 5) % 256) as u8;
            }
        }
        FaceCrop::new(data, 64, 64).unwrap()
    }

    fn afternoon_request() -> AccessRequest {
        AccessRequest {
            timestamp: Utc.with_ymd_and_hms(2025, 6, 10, 14, 0, 0).unwrap(),
            person_id: None,
            access_type: AccessType::Entry,
            asserted_outcome: AccessOutcome::Failed,
        }
    }

    #[test]
    fn test_enrolled_face_is_granted() {
        let (pipeline, _) = pipeline_with_store();
        let crop = textured_crop();
        pipeline.enroll("resident_001", "Alice", &crop).unwrap();

        let outcome = pipeline.process(&afternoon_request(), Some(&crop));
        assert!(outcome.access_granted);
        assert_eq!(outcome.recognition.person_id.as_deref(), Some("resident_001"));
        assert_eq!(outcome.event.outcome(), AccessOutcome::Success);
        assert_eq!(outcome.event.person_id(), "resident_001");
    }

    #[test]
    fn test_unenrolled_face_is_denied_as_unknown() {
        let (pipeline, _) = pipeline_with_store();

        let outcome = pipeline.process(&afternoon_request(), Some(&textured_crop()));
        assert!(!outcome.access_granted);
        assert!(outcome.recognition.person_id.is_none());
        assert_eq!(outcome.event.person_id(), UNKNOWN_PERSON);
        assert_eq!(outcome.event.outcome(), AccessOutcome::Failed);
    }

    #[test]
    fn test_identity_decisions_are_independent_per_probe() {
        let (pipeline, _) = pipeline_with_store();
        let enrolled = textured_crop();
        pipeline.enroll("resident_001", "Alice", &enrolled).unwrap();

        // Same pipeline, two probes: the enrolled crop resolves, the
        // structureless one does not ride along on its result.
        let known = pipeline.process(&afternoon_request(), Some(&enrolled));
        let flat = FaceCrop::new(vec![128u8; 64 * 64], 64, 64).unwrap();
        let unknown = pipeline.process(&afternoon_request(), Some(&flat));

        assert!(known.access_granted);
        assert!(!unknown.access_granted);
        assert!(unknown.recognition.person_id.is_none());
    }

    #[test]
    fn test_min_confidence_gate_denies_matched_identity() {
        let store = Arc::new(MemoryStore::new());
        let pipeline = EventPipeline::new(
            // Unreachable bar: even a perfect match is denied.
            PipelineConfig {
                min_confidence: 1.01,
            },
            Arc::new(IdentityMatcher::new(MatcherConfig::default())),
            Arc::new(ThreatRuleEngine::new(RuleConfig::default())),
            Arc::new(AnomalyScorer::new(ForestConfig::default())),
            store as Arc<dyn AccessStore>,
        );
        let crop = textured_crop();
        pipeline.enroll("resident_001", "Alice", &crop).unwrap();

        let outcome = pipeline.process(&afternoon_request(), Some(&crop));
        assert_eq!(outcome.recognition.person_id.as_deref(), Some("resident_001"));
        assert!(!outcome.access_granted);
        assert_eq!(outcome.event.outcome(), AccessOutcome::Failed);
    }

    #[test]
    fn test_degenerate_crop_treated_as_unknown() {
        let (pipeline, _) = pipeline_with_store();
        let empty = FaceCrop::new(vec![], 0, 0).unwrap();

        let outcome = pipeline.process(&afternoon_request(), Some(&empty));
        assert!(!outcome.access_granted);
        assert_eq!(outcome.event.person_id(), UNKNOWN_PERSON);
    }

    #[test]
    fn test_enroll_rejects_degenerate_crop() {
        let (pipeline, _) = pipeline_with_store();
        let empty = FaceCrop::new(vec![], 0, 0).unwrap();
        assert!(matches!(
            pipeline.enroll("p", "P", &empty),
            Err(PipelineError::ExtractionFailed)
        ));
    }

    #[test]
    fn test_cropless_request_uses_asserted_outcome() {
        let (pipeline, _) = pipeline_with_store();
        let request = AccessRequest {
            person_id: Some("resident_002".to_string()),
            asserted_outcome: AccessOutcome::Success,
            ..afternoon_request()
        };

        let outcome = pipeline.process(&request, None);
        assert!(outcome.access_granted);
        assert_eq!(outcome.event.person_id(), "resident_002");
        assert_eq!(outcome.recognition.name, "Unknown");
    }

    #[test]
    fn test_repeated_failures_raise_and_persist_alert() {
        let (pipeline, store) = pipeline_with_store();
        let crop = textured_crop();
        let base = afternoon_request();

        // Three failed probes inside the window; no one is enrolled.
        let mut last = pipeline.process(&base, Some(&crop));
        for i in 1..3 {
            let request = AccessRequest {
                timestamp: base.timestamp + chrono::Duration::minutes(i),
                ..base.clone()
            };
            last = pipeline.process(&request, Some(&crop));
        }

        assert!(last
            .alerts
            .iter()
            .any(|a| a.kind == ThreatKind::RepeatedFailedAccess));
        let threats = store.active_threats(None).unwrap();
        assert!(!threats.is_empty());
    }

    #[test]
    fn test_untrained_scorer_yields_neutral_verdict() {
        let (pipeline, store) = pipeline_with_store();
        let outcome = pipeline.process(&afternoon_request(), Some(&textured_crop()));
        assert!(!outcome.anomaly.is_anomaly);
        assert_eq!(outcome.anomaly.reason, "model not trained");
        // Neutral verdicts are not persisted as anomalies.
        assert!(store.anomaly_records().is_empty());
    }

    #[test]
    fn test_access_is_persisted() {
        let (pipeline, store) = pipeline_with_store();
        pipeline.process(&afternoon_request(), Some(&textured_crop()));

        let logs = store.access_logs(None, 10, 0).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].person_id, UNKNOWN_PERSON);
        assert_eq!(logs[0].outcome, AccessOutcome::Failed);
    }

    #[test]
    fn test_train_from_history() {
        let (pipeline, store) = pipeline_with_store();

        // Seed a routine directly into the store.
        for _ in 0..20 {
            store
                .log_access("resident_001", AccessType::Entry, 0.9, AccessOutcome::Success)
                .unwrap();
        }

        let trained = pipeline.train_anomaly_model(100).unwrap();
        assert_eq!(trained, 20);
        assert!(pipeline.scorer().is_trained());
    }

    #[test]
    fn test_train_from_empty_history_fails() {
        let (pipeline, _) = pipeline_with_store();
        assert!(pipeline.train_anomaly_model(100).is_err());
        assert!(!pipeline.scorer().is_trained());
    }
}
