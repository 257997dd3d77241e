use anyhow::{bail, Result};

use crate::commands::open_core;
use crate::ui;

pub async fn add(id: &str, token: Option<String>) -> Result<()> {
    let token = match token {
        Some(token) => token,
        None => ui::prompt_token(&format!("Access token for {id}"))?,
    };
    if token.trim().is_empty() {
        bail!("token must not be empty");
    }

    let core = open_core().await?;
    core.add_account(id, token.trim()).await?;
    // Create the empty index now so the first search doesn't have to.
    core.index(id).await?;

    ui::success(&format!("Added {id}"));
    ui::info(&format!("Run `sift init-sync {id}` to fetch recent mail."));
    Ok(())
}

pub async fn list(json: bool) -> Result<()> {
    let core = open_core().await?;
    let accounts = core.list_accounts().await?;

    if json {
        let rows: Vec<serde_json::Value> = accounts
            .iter()
            .map(|a| {
                serde_json::json!({
                    "id": a.id,
                    "synced": a.next_delta_token.is_some(),
                    "updated_at": a.updated_at.to_rfc3339(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if accounts.is_empty() {
        ui::info("No accounts yet. Add one with:");
        println!("    sift account add <id>");
        return Ok(());
    }

    for account in accounts {
        let messages = core.store().email_count(&account.id).await?;
        let state = if account.next_delta_token.is_some() {
            format!("{messages} messages")
        } else {
            "not synced".to_string()
        };
        println!(
            "  {}  {}  {}",
            account.id,
            state,
            ui::dim(&account.updated_at.format("%Y-%m-%d %H:%M").to_string())
        );
    }
    Ok(())
}

pub async fn remove(id: &str) -> Result<()> {
    let core = open_core().await?;
    if core.store().remove_account(id).await? {
        ui::success(&format!("Removed {id}"));
    } else {
        ui::error(&format!("No account named {id}"));
    }
    Ok(())
}
