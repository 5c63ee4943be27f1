//! Anomaly scoring over access-event feature vectors.
//!
//! Wraps a fitted [`IsolationForest`] behind a scorer that encodes
//! access events into fixed feature rows, normalizes raw forest output
//! into a stable 0..1 score, and explains each verdict in plain text.
//! An untrained scorer never blocks the pipeline: it returns a neutral
//! verdict instead of an error.

use std::str::FromStr;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use doorwatch_core::{AccessEvent, AccessType};

use crate::forest::{ForestConfig, ForestError, IsolationForest};

/// Steepness of the sigmoid mapping raw score deviation to 0..1.
const SIGMOID_GAIN: f64 = 8.0;

/// Number of features per encoded event.
pub const FEATURE_COUNT: usize = 5;

#[derive(Error, Debug)]
pub enum AnomalyError {
    #[error("unsupported model kind: {0}")]
    UnsupportedModel(String),
    #[error(transparent)]
    Forest(#[from] ForestError),
    #[error("model serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("model blob store error: {0}")]
    Blob(#[from] BlobError),
}

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("no model blob stored")]
    NotFound,
    #[error("blob io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence seam for serialized model blobs.
pub trait ModelBlobStore: Send + Sync {
    fn save(&self, blob: &[u8]) -> Result<(), BlobError>;
    fn load(&self) -> Result<Vec<u8>, BlobError>;
}

/// In-memory blob store for tests and ephemeral deployments.
#[derive(Default)]
pub struct MemoryBlobStore {
    blob: Mutex<Option<Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ModelBlobStore for MemoryBlobStore {
    fn save(&self, blob: &[u8]) -> Result<(), BlobError> {
        let mut slot = self.blob.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(blob.to_vec());
        Ok(())
    }

    fn load(&self) -> Result<Vec<u8>, BlobError> {
        let slot = self.blob.lock().unwrap_or_else(|e| e.into_inner());
        slot.clone().ok_or(BlobError::NotFound)
    }
}

/// Supported model families. Only the isolation forest is implemented;
/// the enum exists so configuration can reject anything else up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    IsolationForest,
}

impl FromStr for ModelKind {
    type Err = AnomalyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "isolation_forest" => Ok(Self::IsolationForest),
            other => Err(AnomalyError::UnsupportedModel(other.to_string())),
        }
    }
}

/// Encoded feature row for one access event.
///
/// Layout: hour of day, weekday (Monday = 0), direction (entry = 1),
/// match confidence, and hours since the person's previous event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventFeatures {
    values: [f64; FEATURE_COUNT],
}

impl EventFeatures {
    /// Encode an event. `prior` is the timestamp of the same person's
    /// previous event, if any; absent history encodes a zero gap.
    pub fn from_event(event: &AccessEvent, prior: Option<DateTime<Utc>>) -> Self {
        let ts = event.timestamp();
        let gap_hours = prior
            .map(|p| (ts - p).num_seconds().max(0) as f64 / 3600.0)
            .unwrap_or(0.0);
        let direction = match event.access_type() {
            AccessType::Entry => 1.0,
            AccessType::Exit => 0.0,
        };
        Self {
            values: [
                ts.hour() as f64,
                ts.weekday().num_days_from_monday() as f64,
                direction,
                event.confidence() as f64,
                gap_hours,
            ],
        }
    }

    pub fn as_row(&self) -> &[f64] {
        &self.values
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.values.to_vec()
    }
}

/// Outcome of scoring one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyVerdict {
    pub is_anomaly: bool,
    /// Normalized score in 0..1; 0.5 is the decision boundary.
    pub score: f64,
    /// Distance of the raw score from the model offset.
    pub confidence: f64,
    pub reason: String,
}

impl AnomalyVerdict {
    /// Verdict produced when no model has been trained yet. Never a
    /// computed score.
    fn untrained() -> Self {
        Self {
            is_anomaly: false,
            score: 0.0,
            confidence: 0.0,
            reason: "model not trained".to_string(),
        }
    }
}

/// Scorer statistics for boundary-layer reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ScorerStats {
    pub trained: bool,
    pub trees: usize,
    pub contamination: f64,
    pub training_samples: usize,
}

/// Scores access events against a fitted isolation forest.
///
/// One shared scorer serves concurrent predictions; training swaps the
/// model atomically under the write half of the lock.
pub struct AnomalyScorer {
    config: ForestConfig,
    model: RwLock<Option<IsolationForest>>,
    training_samples: Mutex<usize>,
}

impl AnomalyScorer {
    pub fn new(config: ForestConfig) -> Self {
        Self {
            config,
            model: RwLock::new(None),
            training_samples: Mutex::new(0),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.model
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Fit a fresh forest to the given feature rows, replacing any
    /// previous model.
    pub fn train(&self, rows: &[EventFeatures]) -> Result<(), AnomalyError> {
        let matrix: Vec<Vec<f64>> = rows.iter().map(|f| f.to_vec()).collect();
        let forest = IsolationForest::fit(&self.config, &matrix)?;

        let mut model = self.model.write().unwrap_or_else(|e| e.into_inner());
        *model = Some(forest);
        drop(model);
        *self
            .training_samples
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = rows.len();

        tracing::info!(samples = rows.len(), "anomaly model trained");
        Ok(())
    }

    /// Score a single event.
    pub fn predict(&self, features: &EventFeatures) -> AnomalyVerdict {
        let model = self.model.read().unwrap_or_else(|e| e.into_inner());
        let Some(forest) = model.as_ref() else {
            return AnomalyVerdict::untrained();
        };
        verdict_for(forest, features)
    }

    /// Score a batch of events under one lock acquisition.
    pub fn batch_predict(&self, batch: &[EventFeatures]) -> Vec<AnomalyVerdict> {
        let model = self.model.read().unwrap_or_else(|e| e.into_inner());
        match model.as_ref() {
            Some(forest) => batch.iter().map(|f| verdict_for(forest, f)).collect(),
            None => batch.iter().map(|_| AnomalyVerdict::untrained()).collect(),
        }
    }

    /// Serialize the fitted model into the blob store.
    pub fn save(&self, store: &dyn ModelBlobStore) -> Result<(), AnomalyError> {
        let model = self.model.read().unwrap_or_else(|e| e.into_inner());
        let Some(forest) = model.as_ref() else {
            return Err(AnomalyError::Blob(BlobError::NotFound));
        };
        let blob = serde_json::to_vec(forest)?;
        store.save(&blob)?;
        tracing::info!(bytes = blob.len(), "anomaly model saved");
        Ok(())
    }

    /// Restore a previously saved model from the blob store.
    pub fn load(&self, store: &dyn ModelBlobStore) -> Result<(), AnomalyError> {
        let blob = store.load()?;
        let forest: IsolationForest = serde_json::from_slice(&blob)?;
        let mut model = self.model.write().unwrap_or_else(|e| e.into_inner());
        *model = Some(forest);
        tracing::info!(bytes = blob.len(), "anomaly model loaded");
        Ok(())
    }

    pub fn stats(&self) -> ScorerStats {
        ScorerStats {
            trained: self.is_trained(),
            trees: self.config.trees,
            contamination: self.config.contamination,
            training_samples: *self
                .training_samples
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        }
    }
}

fn verdict_for(forest: &IsolationForest, features: &EventFeatures) -> AnomalyVerdict {
    let raw = forest.score(features.as_row());
    let deviation = raw - forest.offset();
    // Sigmoid centers the decision boundary at 0.5.
    let score = 1.0 / (1.0 + (-deviation * SIGMOID_GAIN).exp());
    let is_anomaly = raw > forest.offset();
    let reason = if is_anomaly {
        format!("isolation score {raw:.3} above model offset {:.3}", forest.offset())
    } else {
        "within learned behavior".to_string()
    };
    AnomalyVerdict {
        is_anomaly,
        score,
        confidence: deviation.abs(),
        reason,
    }
}
