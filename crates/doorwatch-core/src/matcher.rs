//! Identity matching against the enrollment registry.
//!
//! Flat nearest-neighbor search: a probe descriptor is compared to every
//! enrolled vector of every person, and the single global minimum
//! distance decides the outcome.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use serde::Serialize;

use crate::types::{FeatureVector, IdentityRecord, RecognitionResult};

/// Default distance below which a match is declared. Distances live in
/// the same normalized space as the descriptors (both sides unit-norm).
pub const DEFAULT_DISTANCE_THRESHOLD: f32 = 0.7;

/// Role assigned to enrollments that do not specify one.
const DEFAULT_ROLE: &str = "resident";

/// Read-only matcher configuration; thresholds are never mutated at
/// runtime.
#[derive(Debug, Clone, Copy)]
pub struct MatcherConfig {
    /// A match is declared only if the winning distance is strictly
    /// below this value.
    pub distance_threshold: f32,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            distance_threshold: DEFAULT_DISTANCE_THRESHOLD,
        }
    }
}

/// Registry statistics for boundary-layer reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MatcherStats {
    pub total_persons: usize,
    pub total_vectors: usize,
    pub distance_threshold: f32,
}

/// Owns the enrollment registry and turns descriptors into identity
/// decisions.
///
/// Interior mutability lets one shared matcher serve concurrent
/// enrollment and identification calls; writers are serialized against
/// readers by the registry lock.
pub struct IdentityMatcher {
    config: MatcherConfig,
    registry: RwLock<HashMap<String, IdentityRecord>>,
}

impl IdentityMatcher {
    pub fn new(config: MatcherConfig) -> Self {
        Self {
            config,
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Enroll a descriptor for a person. Repeated registrations append;
    /// duplicates are kept as-is.
    pub fn register(&self, person_id: &str, name: &str, vector: FeatureVector) {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        match registry.get_mut(person_id) {
            Some(record) => record.push_vector(vector),
            None => {
                registry.insert(
                    person_id.to_string(),
                    IdentityRecord::new(person_id, name, DEFAULT_ROLE, vector),
                );
            }
        }
        tracing::info!(person_id, name, "face registered");
    }

    /// Resolve a probe descriptor to an identity decision.
    ///
    /// The search visits every enrolled vector across all persons and
    /// keeps the global minimum distance; no per-person shortcutting,
    /// and no dependence on registry iteration order. Confidence is
    /// `max(0, 1 - distance)` and is reported even when the threshold
    /// rejects the match. An empty registry always yields unknown with
    /// confidence 0.
    pub fn identify(&self, probe: &FeatureVector) -> RecognitionResult {
        let now = Utc::now();
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());

        let mut best_distance = f32::INFINITY;
        let mut best_person: Option<&IdentityRecord> = None;

        for record in registry.values() {
            for enrolled in record.vectors() {
                let distance = probe.euclidean_distance(enrolled);
                if distance < best_distance {
                    best_distance = distance;
                    best_person = Some(record);
                }
            }
        }

        let Some(record) = best_person else {
            return RecognitionResult::unknown(now);
        };

        let confidence = (1.0 - best_distance).max(0.0);
        if best_distance < self.config.distance_threshold {
            tracing::info!(
                person_id = record.person_id(),
                name = record.name(),
                confidence,
                "face recognized"
            );
            RecognitionResult {
                person_id: Some(record.person_id().to_string()),
                name: record.name().to_string(),
                confidence,
                timestamp: now,
            }
        } else {
            tracing::info!(confidence, "unknown face");
            RecognitionResult {
                person_id: None,
                name: "Unknown".to_string(),
                confidence,
                timestamp: now,
            }
        }
    }

    /// Display name for an already-asserted identity, if enrolled.
    pub fn display_name(&self, person_id: &str) -> Option<String> {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        registry.get(person_id).map(|r| r.name().to_string())
    }

    pub fn stats(&self) -> MatcherStats {
        let registry = self.registry.read().unwrap_or_else(|e| e.into_inner());
        MatcherStats {
            total_persons: registry.len(),
            total_vectors: registry.values().map(|r| r.vectors().len()).sum(),
            distance_threshold: self.config.distance_threshold,
        }
    }
}
