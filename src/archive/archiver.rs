//! Archiver: pulls new history for every registered channel.
//!
//! Per channel, a run reads the stored cursor, then alternates between
//! fetching one page after the cursor and applying it through the store until
//! upstream reports the end, the page budget is spent, the run is cancelled or
//! something fails. A failed channel keeps its last committed cursor, so the
//! next run resumes without skipping anything.
//!
//! Only one run executes at a time. The upstream rate limit belongs to the
//! credential, so channels are processed sequentially.

use crate::archive::store::ArchiveStore;
use crate::archive::types::{Channel, Position};
use crate::error::{ArchiveError, FetchError, Result};
use crate::fetcher::{FetcherDyn, Page};

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Paging, retry and rate-limit knobs for archiving runs.
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    /// Maximum messages requested per upstream call.
    pub page_size: u16,
    /// Pages a single channel may consume in one run before yielding.
    pub max_pages_per_run: u32,
    /// Wait after a rate-limit response that carries no retry hint.
    pub rate_limit_wait: Duration,
    /// Consecutive rate-limit responses tolerated for one page.
    pub max_rate_limit_waits: u32,
    /// Retries for transient upstream failures on one page.
    pub max_retries: u32,
    /// First retry backoff; doubles per attempt.
    pub retry_backoff: Duration,
    pub max_retry_backoff: Duration,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            page_size: 50,
            max_pages_per_run: 20,
            rate_limit_wait: Duration::from_secs(60),
            max_rate_limit_waits: 10,
            max_retries: 3,
            retry_backoff: Duration::from_secs(2),
            max_retry_backoff: Duration::from_secs(60),
        }
    }
}

impl ArchiverConfig {
    fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_backoff
            .saturating_mul(factor)
            .min(self.max_retry_backoff)
    }
}

/// Terminal state of one channel within a run.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FinalState {
    Done,
    Error,
    Cancelled,
}

impl std::fmt::Display for FinalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FinalState::Done => write!(f, "done"),
            FinalState::Error => write!(f, "error"),
            FinalState::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelOutcome {
    pub channel_id: String,
    pub messages_added: u64,
    pub pages_fetched: u32,
    pub final_state: FinalState,
    /// The page budget ran out before upstream reported the end.
    pub budget_exhausted: bool,
    /// Cursor after the run; unchanged from the start on failure.
    pub cursor: Option<Position>,
    pub error: Option<String>,
}

impl ChannelOutcome {
    fn new(channel_id: &str, cursor: Option<Position>) -> Self {
        Self {
            channel_id: channel_id.to_string(),
            messages_added: 0,
            pages_fetched: 0,
            final_state: FinalState::Done,
            budget_exhausted: false,
            cursor,
            error: None,
        }
    }

    fn not_started(channel: &Channel) -> Self {
        Self {
            final_state: FinalState::Cancelled,
            ..Self::new(&channel.channel_id, channel.cursor.clone())
        }
    }
}

/// Result of one `archive_all` invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: uuid::Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub channels: BTreeMap<String, ChannelOutcome>,
}

impl RunSummary {
    pub fn messages_added(&self) -> u64 {
        self.channels
            .values()
            .map(|outcome| outcome.messages_added)
            .sum()
    }

    pub fn failed_channels(&self) -> impl Iterator<Item = &ChannelOutcome> {
        self.channels
            .values()
            .filter(|outcome| outcome.final_state == FinalState::Error)
    }
}

pub struct Archiver {
    store: ArchiveStore,
    fetcher: Arc<dyn FetcherDyn>,
    config: ArchiverConfig,
    /// Single-flight guard for runs.
    run_lock: Mutex<()>,
}

impl std::fmt::Debug for Archiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Archiver")
            .field("fetcher", &self.fetcher.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Archiver {
    pub fn new(store: ArchiveStore, fetcher: Arc<dyn FetcherDyn>, config: ArchiverConfig) -> Self {
        Self {
            store,
            fetcher,
            config,
            run_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Register a channel for archiving. Without an explicit display name the
    /// name is looked up upstream. Re-registering keeps archiving progress.
    pub async fn register_channel(
        &self,
        channel_id: &str,
        display_name: Option<&str>,
    ) -> Result<Channel> {
        let display_name = match display_name {
            Some(name) => name.to_string(),
            None => {
                self.fetcher
                    .resolve_channel(channel_id)
                    .await?
                    .display_name
            }
        };

        Ok(self.store.register_channel(channel_id, &display_name).await?)
    }

    /// Archive every registered channel, one after another.
    ///
    /// Individual channel failures are reported in the summary. Only failing
    /// to enumerate channels, or another run being in progress, is an error.
    pub async fn archive_all(&self, cancel: &CancellationToken) -> Result<RunSummary> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| ArchiveError::AlreadyRunning)?;

        let run_id = uuid::Uuid::new_v4();
        let started_at = Utc::now();
        let channels = self.store.list_channels().await?;

        tracing::info!(%run_id, channel_count = channels.len(), "archiving run started");

        let mut outcomes = BTreeMap::new();
        for channel in &channels {
            let outcome = if cancel.is_cancelled() {
                ChannelOutcome::not_started(channel)
            } else {
                self.run_channel(&channel.channel_id, channel.cursor.clone(), cancel)
                    .await
            };
            outcomes.insert(channel.channel_id.clone(), outcome);
        }

        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            cancelled: cancel.is_cancelled(),
            channels: outcomes,
        };

        tracing::info!(
            %run_id,
            messages_added = summary.messages_added(),
            failed = summary.failed_channels().count(),
            cancelled = summary.cancelled,
            "archiving run finished"
        );

        Ok(summary)
    }

    /// Archive a single registered channel under the same single-flight guard
    /// as `archive_all`.
    pub async fn archive_channel(
        &self,
        channel_id: &str,
        cancel: &CancellationToken,
    ) -> Result<ChannelOutcome> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| ArchiveError::AlreadyRunning)?;

        let cursor = self.store.get_cursor(channel_id).await?;
        Ok(self.run_channel(channel_id, cursor, cancel).await)
    }

    async fn run_channel(
        &self,
        channel_id: &str,
        mut cursor: Option<Position>,
        cancel: &CancellationToken,
    ) -> ChannelOutcome {
        let mut outcome = ChannelOutcome::new(channel_id, cursor.clone());

        tracing::debug!(channel_id, cursor = ?cursor, "channel archiving started");

        loop {
            if cancel.is_cancelled() {
                outcome.final_state = FinalState::Cancelled;
                break;
            }
            if outcome.pages_fetched >= self.config.max_pages_per_run {
                outcome.budget_exhausted = true;
                break;
            }

            let mut page = match self.fetch_with_retry(channel_id, cursor.as_ref(), cancel).await {
                Ok(Some(page)) => page,
                Ok(None) => {
                    outcome.final_state = FinalState::Cancelled;
                    break;
                }
                Err(error) => {
                    tracing::warn!(channel_id, %error, "fetch failed, channel keeps its cursor");
                    outcome.final_state = FinalState::Error;
                    outcome.error = Some(error.to_string());
                    break;
                }
            };
            outcome.pages_fetched += 1;

            let stale = page.retain_after(cursor.as_ref());
            let Some(new_cursor) = page.last_position().cloned() else {
                if stale > 0 && !page.reached_end {
                    tracing::warn!(
                        channel_id,
                        stale,
                        cursor = ?cursor,
                        "upstream page held only messages at or before the cursor, stopping channel"
                    );
                }
                break;
            };
            if stale > 0 {
                tracing::debug!(channel_id, stale, "dropped messages at or before cursor");
            }

            match self
                .store
                .upsert_messages_and_advance_cursor(channel_id, &page.messages, &new_cursor)
                .await
            {
                Ok(inserted) => {
                    outcome.messages_added += inserted;
                    cursor = Some(new_cursor);
                }
                Err(error) => {
                    tracing::warn!(channel_id, %error, "applying page failed, batch rolled back");
                    outcome.final_state = FinalState::Error;
                    outcome.error = Some(error.to_string());
                    break;
                }
            }

            if page.reached_end {
                break;
            }
        }

        outcome.cursor = cursor;

        tracing::info!(
            channel_id,
            state = %outcome.final_state,
            messages_added = outcome.messages_added,
            pages = outcome.pages_fetched,
            budget_exhausted = outcome.budget_exhausted,
            "channel archiving finished"
        );

        outcome
    }

    /// Fetch one page, waiting out rate limits and retrying transient failures.
    /// Returns `Ok(None)` when cancelled while waiting.
    async fn fetch_with_retry(
        &self,
        channel_id: &str,
        since: Option<&Position>,
        cancel: &CancellationToken,
    ) -> std::result::Result<Option<Page>, FetchError> {
        let mut rate_limit_waits = 0;
        let mut failures = 0;

        loop {
            match self
                .fetcher
                .fetch_page(channel_id, since, self.config.page_size)
                .await
            {
                Ok(page) => return Ok(Some(page)),
                Err(FetchError::RateLimited { retry_after }) => {
                    rate_limit_waits += 1;
                    if rate_limit_waits > self.config.max_rate_limit_waits {
                        return Err(FetchError::RateLimited { retry_after });
                    }
                    let wait = retry_after.unwrap_or(self.config.rate_limit_wait);
                    tracing::info!(
                        channel_id,
                        wait_ms = wait.as_millis() as u64,
                        "rate limited, waiting before retrying page"
                    );
                    if !wait_or_cancel(wait, cancel).await {
                        return Ok(None);
                    }
                }
                Err(FetchError::UpstreamUnavailable(reason)) => {
                    failures += 1;
                    if failures > self.config.max_retries {
                        return Err(FetchError::UpstreamUnavailable(reason));
                    }
                    let backoff = self.config.backoff_for(failures);
                    tracing::warn!(
                        channel_id,
                        attempt = failures,
                        backoff_ms = backoff.as_millis() as u64,
                        %reason,
                        "upstream unavailable, backing off"
                    );
                    if !wait_or_cancel(backoff, cancel).await {
                        return Ok(None);
                    }
                }
                Err(error) => return Err(error),
            }
        }
    }
}

/// Sleep for `duration`; false if cancelled first.
async fn wait_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}
