use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sift_index::SnapshotStore;
use sift_remote::EmailMessage;
use sqlx::{sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions, SqlitePool};
use tracing::{debug, instrument};

/// A connected mailbox. The index snapshot is stored alongside but loaded
/// separately through [`SnapshotStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub token: String,
    pub next_delta_token: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Summary columns kept for every synced message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEmail {
    pub id: String,
    pub account_id: String,
    pub thread_id: String,
    pub subject: String,
    pub from: String,
    pub sent_at: DateTime<Utc>,
    pub snippet: Option<String>,
}

#[derive(Clone)]
pub struct MailStore {
    pool: SqlitePool,
}

impl MailStore {
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::from_str("sqlite:")?
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open {}", db_path.display()))?;
        Self::from_pool(pool).await
    }

    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    #[instrument(skip_all)]
    async fn init_schema(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS accounts (\
                id TEXT PRIMARY KEY,\
                token TEXT NOT NULL,\
                next_delta_token TEXT,\
                index_snapshot BLOB,\
                updated_at TEXT NOT NULL\
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS emails (\
                id TEXT NOT NULL,\
                account_id TEXT NOT NULL REFERENCES accounts(id),\
                thread_id TEXT NOT NULL,\
                subject TEXT NOT NULL,\
                sender TEXT NOT NULL,\
                recipients TEXT NOT NULL,\
                sent_at TEXT NOT NULL,\
                snippet TEXT,\
                payload TEXT NOT NULL,\
                updated_at TEXT NOT NULL,\
                PRIMARY KEY (account_id, id)\
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS emails_account ON emails(account_id, sent_at)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Create the account, or replace its token if it already exists.
    /// The cursor and snapshot are left alone.
    #[instrument(skip(self, token))]
    pub async fn upsert_account(&self, id: &str, token: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO accounts (id, token, updated_at) VALUES (?1, ?2, ?3)\
            ON CONFLICT(id) DO UPDATE SET token=excluded.token, updated_at=excluded.updated_at",
        )
        .bind(id)
        .bind(token)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_account(&self, id: &str) -> Result<Option<Account>> {
        let row = sqlx::query_as::<_, (String, String, Option<String>, String)>(
            "SELECT id, token, next_delta_token, updated_at FROM accounts WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(account_from_row))
    }

    pub async fn list_accounts(&self) -> Result<Vec<Account>> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>, String)>(
            "SELECT id, token, next_delta_token, updated_at FROM accounts ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(account_from_row).collect())
    }

    /// Delete the account and every message stored for it.
    pub async fn remove_account(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM emails WHERE account_id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let removed = sqlx::query("DELETE FROM accounts WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed > 0)
    }

    pub async fn get_delta_token(&self, account_id: &str) -> Result<Option<String>> {
        let row = sqlx::query_as::<_, (Option<String>,)>(
            "SELECT next_delta_token FROM accounts WHERE id = ?1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some((token,)) => Ok(token.filter(|t| !t.is_empty())),
            None => Err(anyhow!("unknown account {}", account_id)),
        }
    }

    #[instrument(skip(self, token))]
    pub async fn set_delta_token(&self, account_id: &str, token: &str) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE accounts SET next_delta_token = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(account_id)
        .bind(token)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(anyhow!("unknown account {}", account_id));
        }
        Ok(())
    }

    pub async fn upsert_email(&self, account_id: &str, message: &EmailMessage) -> Result<()> {
        self.upsert_emails(account_id, std::slice::from_ref(message))
            .await
            .map(|_| ())
    }

    /// Store a batch of messages in one transaction. Re-delivered messages
    /// overwrite their earlier row for the same account; message ids are
    /// only unique within an account.
    #[instrument(skip(self, messages), fields(count = messages.len()))]
    pub async fn upsert_emails(&self, account_id: &str, messages: &[EmailMessage]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().to_rfc3339();
        for message in messages {
            let recipients: Vec<String> = message.recipients().map(|a| a.address.clone()).collect();
            sqlx::query(
                "INSERT INTO emails (id, account_id, thread_id, subject, sender, recipients, sent_at, snippet, payload, updated_at) \
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                ON CONFLICT(account_id, id) DO UPDATE SET \
                    thread_id=excluded.thread_id, \
                    subject=excluded.subject, \
                    sender=excluded.sender, \
                    recipients=excluded.recipients, \
                    sent_at=excluded.sent_at, \
                    snippet=excluded.snippet, \
                    payload=excluded.payload, \
                    updated_at=excluded.updated_at",
            )
            .bind(&message.id)
            .bind(account_id)
            .bind(&message.thread_id)
            .bind(&message.subject)
            .bind(&message.from.address)
            .bind(serde_json::to_string(&recipients)?)
            .bind(message.sent_at.to_rfc3339())
            .bind(&message.body_snippet)
            .bind(serde_json::to_string(message)?)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!("stored {} messages for {}", messages.len(), account_id);
        Ok(messages.len())
    }

    pub async fn email_count(&self, account_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM emails WHERE account_id = ?1")
            .bind(account_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// The full message as it was delivered.
    pub async fn get_email(&self, account_id: &str, id: &str) -> Result<Option<EmailMessage>> {
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT payload FROM emails WHERE account_id = ?1 AND id = ?2",
        )
        .bind(account_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some((payload,)) => Ok(Some(
                serde_json::from_str(&payload).context("stored message payload is corrupt")?,
            )),
            None => Ok(None),
        }
    }

    /// Most recent messages for an account, newest first.
    pub async fn recent_emails(&self, account_id: &str, limit: usize) -> Result<Vec<StoredEmail>> {
        let rows = sqlx::query_as::<_, (String, String, String, String, String, String, Option<String>)>(
            "SELECT id, account_id, thread_id, subject, sender, sent_at, snippet FROM emails \
            WHERE account_id = ?1 ORDER BY sent_at DESC LIMIT ?2",
        )
        .bind(account_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(id, account_id, thread_id, subject, from, sent_at, snippet)| StoredEmail {
                id,
                account_id,
                thread_id,
                subject,
                from,
                sent_at: parse_time(&sent_at),
                snippet,
            })
            .collect())
    }
}

fn account_from_row(
    (id, token, next_delta_token, updated_at): (String, String, Option<String>, String),
) -> Account {
    Account {
        id,
        token,
        next_delta_token: next_delta_token.filter(|t| !t.is_empty()),
        updated_at: parse_time(&updated_at),
    }
}

fn parse_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[async_trait]
impl SnapshotStore for MailStore {
    async fn load_snapshot(&self, account_id: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query_as::<_, (Option<Vec<u8>>,)>(
            "SELECT index_snapshot FROM accounts WHERE id = ?1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some((snapshot,)) => Ok(snapshot),
            None => Err(anyhow!("unknown account {}", account_id)),
        }
    }

    async fn save_snapshot(&self, account_id: &str, snapshot: &[u8]) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE accounts SET index_snapshot = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(account_id)
        .bind(snapshot)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?
        .rows_affected();
        if updated == 0 {
            return Err(anyhow!("unknown account {}", account_id));
        }
        Ok(())
    }
}
