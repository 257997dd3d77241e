//! Periodic incremental sync scheduling.
//!
//! Every account is due once per interval. At most one sync per account is
//! in flight. Retryable failures are re-queued with exponential backoff
//! until `max_attempts` runs have failed, after which the account waits for
//! its next interval.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between incremental syncs of one account.
    pub interval_secs: u64,

    /// Failed runs allowed per interval before giving up.
    pub max_attempts: u32,

    /// Delay before the first retry. Doubles for each further attempt.
    pub retry_backoff_secs: u64,

    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 5 * 60,
            max_attempts: 3,
            retry_backoff_secs: 30,
            enabled: true,
        }
    }
}

impl SchedulerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Wait before running `attempt` (2 for the first retry). Never longer
    /// than one interval.
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2).min(16);
        let secs = self.retry_backoff_secs.saturating_mul(1u64 << exponent);
        Duration::from_secs(secs).min(self.interval())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledSync {
    pub account_id: String,

    /// 1 for the first run of an interval, incremented on retry.
    pub attempt: u32,

    pub scheduled_at: DateTime<Utc>,

    /// Not handed out by `next_sync` before this instant.
    pub not_before: Instant,
}

impl ScheduledSync {
    fn new(account_id: &str, attempt: u32) -> Self {
        Self::delayed(account_id, attempt, Duration::ZERO)
    }

    fn delayed(account_id: &str, attempt: u32, delay: Duration) -> Self {
        Self {
            account_id: account_id.to_string(),
            attempt,
            scheduled_at: Utc::now(),
            not_before: Instant::now() + delay,
        }
    }
}

pub struct SyncScheduler {
    config: SchedulerConfig,

    last_sync: HashMap<String, Instant>,

    /// Consecutive failed runs in the current interval.
    failures: HashMap<String, u32>,

    pending: Vec<ScheduledSync>,

    in_progress: HashSet<String>,
}

impl SyncScheduler {
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self {
            config,
            last_sync: HashMap::new(),
            failures: HashMap::new(),
            pending: Vec::new(),
            in_progress: HashSet::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Queue every account whose interval has elapsed. Returns what was queued.
    pub fn schedule_due<'a>(&mut self, accounts: impl IntoIterator<Item = &'a str>) -> Vec<ScheduledSync> {
        if !self.config.enabled {
            return Vec::new();
        }
        let now = Instant::now();
        let mut scheduled = Vec::new();
        for account in accounts {
            if self.is_due(account, now) && !self.is_duplicate(account) {
                debug!("queueing sync for {}", account);
                let sync = ScheduledSync::new(account, 1);
                scheduled.push(sync.clone());
                self.pending.push(sync);
            }
        }
        scheduled
    }

    fn is_due(&self, account: &str, now: Instant) -> bool {
        match self.last_sync.get(account) {
            Some(last) => now.duration_since(*last) >= self.config.interval(),
            None => true,
        }
    }

    fn is_duplicate(&self, account: &str) -> bool {
        self.in_progress.contains(account) || self.pending.iter().any(|p| p.account_id == account)
    }

    /// Next sync that is ready to run, marking its account in flight.
    /// Retries still backing off are skipped.
    pub fn next_sync(&mut self) -> Option<ScheduledSync> {
        if !self.config.enabled {
            return None;
        }
        let now = Instant::now();
        let idx = self
            .pending
            .iter()
            .position(|s| s.not_before <= now && !self.in_progress.contains(&s.account_id))?;
        let sync = self.pending.remove(idx);
        self.in_progress.insert(sync.account_id.clone());
        Some(sync)
    }

    pub fn complete_sync(&mut self, account: &str, messages: usize) {
        self.in_progress.remove(account);
        self.failures.remove(account);
        self.last_sync.insert(account.to_string(), Instant::now());
        info!("sync completed for {} ({} messages)", account, messages);
    }

    /// Record a failed run. Returns true when the account was re-queued.
    pub fn fail_sync(&mut self, account: &str, retryable: bool) -> bool {
        self.in_progress.remove(account);
        let failures = self.failures.entry(account.to_string()).or_insert(0);
        *failures += 1;
        let attempt = *failures;

        if retryable && attempt < self.config.max_attempts {
            let delay = self.config.retry_delay(attempt + 1);
            warn!(
                "sync failed for {} (attempt {}), retrying in {}s",
                account,
                attempt,
                delay.as_secs()
            );
            self.pending
                .push(ScheduledSync::delayed(account, attempt + 1, delay));
            return true;
        }

        warn!("sync failed for {} after {} attempts, waiting for next interval", account, attempt);
        self.failures.remove(account);
        self.last_sync.insert(account.to_string(), Instant::now());
        false
    }

    /// Queue a sync ahead of everything else.
    pub fn queue_on_demand(&mut self, account: &str) {
        if self.is_duplicate(account) {
            return;
        }
        info!("queueing on-demand sync for {}", account);
        self.pending.insert(0, ScheduledSync::new(account, 1));
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn in_progress_count(&self) -> usize {
        self.in_progress.len()
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            pending: self.pending.len(),
            in_progress: self.in_progress.len(),
            last_sync_secs: self
                .last_sync
                .iter()
                .map(|(account, t)| (account.clone(), t.elapsed().as_secs()))
                .collect(),
        }
    }
}

impl Default for SyncScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerStats {
    pub pending: usize,
    pub in_progress: usize,
    /// Seconds since each account last finished a run.
    pub last_sync_secs: Vec<(String, u64)>,
}
