pub mod get;
pub mod inspect;
pub mod restore;
pub mod verify;

use std::path::Path;

use anyhow::Result;
use topic_backup_core::Config;
use tracing::info;

/// Load the configuration file, or defaults when none is given
pub(crate) fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(Config::from_file(path)?)
        }
        None => {
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }
}
