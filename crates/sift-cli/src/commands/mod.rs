pub mod account;
pub mod daemon;
pub mod search;
pub mod sync;

use anyhow::Result;
use sift_core::{Core, SiftConfig, SiftPaths};

use crate::ui;

/// Open the store and indexes under the configured data directory.
pub async fn open_core() -> Result<Core> {
    let paths = SiftPaths::from_env();
    let config = SiftConfig::load_with_env(&paths.config_path)?;
    Core::init(&paths, config).await
}

pub fn config(init: bool) -> Result<()> {
    let paths = SiftPaths::from_env();
    if init && !paths.config_path.exists() {
        SiftConfig::default().save(&paths.config_path)?;
        ui::success(&format!("Wrote {}", paths.config_path.display()));
    }
    let config = SiftConfig::load_with_env(&paths.config_path)?;
    println!("{}", ui::dim(&format!("# {}", paths.config_path.display())));
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
