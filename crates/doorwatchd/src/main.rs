use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use doorwatch_analytics::{AnomalyScorer, BlobError, ModelKind, ThreatRuleEngine};
use doorwatch_core::IdentityMatcher;
use doorwatch_pipeline::{AccessStore, EventPipeline, MemoryStore};

mod blob;
mod config;

use blob::FileBlobStore;
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("doorwatchd starting");

    let config = Config::from_env();
    let model_kind: ModelKind = config.model_kind.parse()?;
    tracing::info!(
        ?model_kind,
        distance_threshold = config.distance_threshold,
        min_confidence = config.min_confidence,
        "configuration loaded"
    );

    let matcher = Arc::new(IdentityMatcher::new(config.matcher_config()));
    let rules = Arc::new(ThreatRuleEngine::new(config.rule_config()));
    let scorer = Arc::new(AnomalyScorer::new(config.forest_config()));
    let store = Arc::new(MemoryStore::new());

    let blob_store = FileBlobStore::new(config.model_path.clone());
    match scorer.load(&blob_store) {
        Ok(()) => tracing::info!(path = %config.model_path.display(), "anomaly model loaded"),
        Err(doorwatch_analytics::AnomalyError::Blob(BlobError::NotFound)) => {
            tracing::info!("no saved anomaly model, scoring stays neutral until trained");
        }
        Err(err) => tracing::warn!(error = %err, "could not load anomaly model"),
    }

    let pipeline = EventPipeline::new(
        config.pipeline_config(),
        matcher,
        rules,
        scorer,
        Arc::clone(&store) as Arc<dyn AccessStore>,
    );

    tracing::info!("doorwatchd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("doorwatchd shutting down");

    if pipeline.scorer().is_trained() {
        if let Err(err) = pipeline.scorer().save(&blob_store) {
            tracing::warn!(error = %err, "could not persist anomaly model");
        }
    }

    Ok(())
}
