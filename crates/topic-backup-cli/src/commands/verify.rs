use std::path::Path;

use anyhow::Result;
use topic_backup_core::{ChecksumRegistry, Error, Verifier, VerifyLevel};

pub fn run(location: &Path, level: &str, unknown_as_failure: bool) -> Result<()> {
    let level: VerifyLevel = level.parse()?;
    let registry = ChecksumRegistry::with_defaults();

    let report = match Verifier::new(&registry).verify_location(location, level) {
        Ok(report) => report,
        Err(e @ Error::UnsupportedLegacyOperation { .. }) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
        Err(e) => return Err(e.into()),
    };

    print!("{}", report.render(unknown_as_failure));
    if !report.is_success(unknown_as_failure) {
        std::process::exit(1);
    }
    Ok(())
}
