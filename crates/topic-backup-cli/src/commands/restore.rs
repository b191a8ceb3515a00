use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use topic_backup_core::{ChecksumRegistry, KafkaCluster, RestoreEngine};
use tracing::info;

pub async fn run(topic: &str, location: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = super::load_config(config_path)?;

    let cluster = KafkaCluster::connect(config.kafka.clone()).await?;
    let engine = RestoreEngine::new(
        Arc::new(cluster),
        Arc::new(ChecksumRegistry::with_defaults()),
        config.restore.clone(),
    )?;

    let report = engine.restore(location, topic).await?;

    info!(
        "Restore completed successfully: {} records into {} from a {} backup",
        report.total_records(),
        report.target_topic,
        report.version
    );
    Ok(())
}
