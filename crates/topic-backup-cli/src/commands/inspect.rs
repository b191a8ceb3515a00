use std::path::Path;

use anyhow::Result;
use topic_backup_core::{inspect, ChecksumRegistry};

pub fn run(location: &Path) -> Result<()> {
    let registry = ChecksumRegistry::with_defaults();
    let inspection = inspect(location, &registry)?;

    for warning in &inspection.warnings {
        eprintln!("{}", warning);
    }
    println!("{}", inspection.to_json()?);
    Ok(())
}
