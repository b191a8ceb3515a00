use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use topic_backup_core::{BackupEngine, ChecksumRegistry, KafkaCluster};
use tracing::info;

pub async fn run(
    topic: &str,
    location: &Path,
    use_format_v3: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let config = super::load_config(config_path)?;

    let cluster = KafkaCluster::connect(config.kafka.clone()).await?;
    let engine = BackupEngine::new(
        Arc::new(cluster),
        Arc::new(ChecksumRegistry::with_defaults()),
        config.backup.clone(),
    );

    let report = if use_format_v3 {
        engine.backup(topic, location).await?
    } else {
        engine.backup_legacy(topic, location).await?
    };

    info!(
        "Backup completed successfully: {} records from {} partitions written to {} ({})",
        report.records,
        report.partitions_backed_up,
        report.location.display(),
        report.version
    );
    Ok(())
}
