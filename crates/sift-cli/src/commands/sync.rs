use anyhow::{anyhow, Result};
use sift_core::{Core, SyncError, SyncSummary};
use tokio_util::sync::CancellationToken;

use crate::commands::open_core;
use crate::ui;

/// Cancel `cancel` on Ctrl-C.
pub fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });
    cancel
}

pub async fn initial(account: &str) -> Result<()> {
    let core = open_core().await?;
    let cancel = cancel_on_interrupt();

    let pb = ui::spinner(&format!("Syncing {account}"));
    let result = core.initial_sync(account, &cancel).await;
    pb.finish_and_clear();
    report(account, result)
}

pub async fn run(accounts: Vec<String>) -> Result<()> {
    let core = open_core().await?;
    let cancel = cancel_on_interrupt();

    let accounts = if accounts.is_empty() {
        synced_accounts(&core).await?
    } else {
        accounts
    };
    if accounts.is_empty() {
        ui::info("No synced accounts. Start with:");
        println!("    sift init-sync <account>");
        return Ok(());
    }

    let mut failed = 0;
    for account in &accounts {
        let pb = ui::spinner(&format!("Syncing {account}"));
        let result = core.sync_account(account, &cancel).await;
        pb.finish_and_clear();
        if report(account, result).is_err() {
            failed += 1;
        }
        if cancel.is_cancelled() {
            break;
        }
    }

    if failed > 0 {
        return Err(anyhow!("{failed} of {} accounts failed to sync", accounts.len()));
    }
    Ok(())
}

async fn synced_accounts(core: &Core) -> Result<Vec<String>> {
    Ok(core
        .list_accounts()
        .await?
        .into_iter()
        .filter(|a| a.next_delta_token.is_some())
        .map(|a| a.id)
        .collect())
}

fn report(account: &str, result: Result<SyncSummary, SyncError>) -> Result<()> {
    match result {
        Ok(summary) => {
            ui::success(&format!(
                "{}: {} messages synced ({} pages)",
                account, summary.messages, summary.pages
            ));
            Ok(())
        }
        Err(err) => {
            ui::error(&format!("{account}: {err}"));
            if err.is_retryable() {
                ui::info(&ui::dim("The cursor was not advanced; the next sync will retry."));
            }
            Err(err.into())
        }
    }
}
