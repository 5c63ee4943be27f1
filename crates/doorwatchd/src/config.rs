use std::collections::HashSet;
use std::path::PathBuf;

use chrono::Duration;
use doorwatch_analytics::{ForestConfig, RuleConfig};
use doorwatch_core::MatcherConfig;
use doorwatch_pipeline::PipelineConfig;

/// Daemon configuration, loaded from environment variables.
pub struct Config {
    /// Distance below which a probe matches an enrolled face.
    pub distance_threshold: f32,
    /// Match confidence required to actually grant access.
    pub min_confidence: f32,
    /// Failed attempts within the window that trigger an alert.
    pub failed_attempt_threshold: usize,
    pub failed_window_minutes: i64,
    /// Hours without activity before the inactivity alert.
    pub inactivity_hours: i64,
    /// Hours of day (0-23) treated as unusual for access.
    pub unusual_hours: HashSet<u32>,
    /// Successful accesses per window that count as a spike.
    pub spike_threshold: usize,
    pub spike_window_minutes: i64,
    /// Anomaly model family; only "isolation_forest" is supported.
    pub model_kind: String,
    pub contamination: f64,
    pub trees: usize,
    /// Where the serialized anomaly model lives on disk.
    pub model_path: PathBuf,
}

impl Config {
    /// Load configuration from `DOORWATCH_*` environment variables with
    /// defaults.
    pub fn from_env() -> Self {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("doorwatch");

        let model_path = std::env::var("DOORWATCH_MODEL_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("anomaly_model.json"));

        Self {
            distance_threshold: env_f32("DOORWATCH_DISTANCE_THRESHOLD", 0.7),
            min_confidence: env_f32("DOORWATCH_MIN_CONFIDENCE", 0.6),
            failed_attempt_threshold: env_usize("DOORWATCH_FAILED_ATTEMPT_THRESHOLD", 3),
            failed_window_minutes: env_i64("DOORWATCH_FAILED_WINDOW_MINUTES", 10),
            inactivity_hours: env_i64("DOORWATCH_INACTIVITY_HOURS", 24),
            unusual_hours: env_hours("DOORWATCH_UNUSUAL_HOURS", &[22, 23, 0, 1, 2, 3, 4, 5]),
            spike_threshold: env_usize("DOORWATCH_SPIKE_THRESHOLD", 10),
            spike_window_minutes: env_i64("DOORWATCH_SPIKE_WINDOW_MINUTES", 60),
            model_kind: std::env::var("DOORWATCH_MODEL_KIND")
                .unwrap_or_else(|_| "isolation_forest".to_string()),
            contamination: env_f64("DOORWATCH_CONTAMINATION", 0.1),
            trees: env_usize("DOORWATCH_TREES", 100),
            model_path,
        }
    }

    pub fn matcher_config(&self) -> MatcherConfig {
        MatcherConfig {
            distance_threshold: self.distance_threshold,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            min_confidence: self.min_confidence,
        }
    }

    pub fn rule_config(&self) -> RuleConfig {
        RuleConfig {
            failed_attempt_threshold: self.failed_attempt_threshold,
            failed_attempt_window: Duration::minutes(self.failed_window_minutes),
            inactivity_threshold: Duration::hours(self.inactivity_hours),
            unusual_hours: self.unusual_hours.clone(),
            spike_threshold: self.spike_threshold,
            spike_window: Duration::minutes(self.spike_window_minutes),
        }
    }

    pub fn forest_config(&self) -> ForestConfig {
        ForestConfig {
            trees: self.trees,
            contamination: self.contamination,
            ..ForestConfig::default()
        }
    }
}

fn env_f32(key: &str, default: f32) -> f32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse a comma-separated hour list, e.g. "22,23,0,1".
fn env_hours(key: &str, default: &[u32]) -> HashSet<u32> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .filter(|h| *h < 24)
            .collect(),
        Err(_) => default.iter().copied().collect(),
    }
}
