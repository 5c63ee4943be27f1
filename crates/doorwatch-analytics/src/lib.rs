//! Behavioral threat rules and anomaly scoring.
//!
//! Two complementary engines over the same access-event stream: a
//! deterministic rule engine that raises typed threat alerts, and an
//! isolation-forest scorer that flags statistical outliers in learned
//! access patterns.

pub mod anomaly;
pub mod forest;
pub mod rules;

pub use anomaly::{
    AnomalyError, AnomalyScorer, AnomalyVerdict, BlobError, EventFeatures, MemoryBlobStore,
    ModelBlobStore, ModelKind, ScorerStats,
};
pub use forest::{ForestConfig, ForestError, IsolationForest};
pub use rules::{
    AlertDetail, RuleConfig, RuleStats, Severity, ThreatAlert, ThreatKind, ThreatRuleEngine,
};
