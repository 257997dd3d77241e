use anyhow::Result;
use tracing::info;

use crate::commands::open_core;
use crate::commands::sync::cancel_on_interrupt;
use crate::ui;

pub async fn run() -> Result<()> {
    let core = open_core().await?;
    if !core.config().scheduler.enabled {
        ui::info("Scheduler is disabled in config.toml.");
        return Ok(());
    }

    let cancel = cancel_on_interrupt();
    ui::success(&format!(
        "Syncing every {}s. Press Ctrl-C to stop.",
        core.config().scheduler.interval_secs
    ));
    core.run_scheduler(&cancel).await?;
    info!("daemon exiting");
    Ok(())
}
