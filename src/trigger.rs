//! Periodic trigger: runs `archive_all` on a fixed interval.
//!
//! The archiver's single-flight guard decides overlap; a tick that lands while
//! a run is in progress (for example one started from the API) is skipped.

use crate::archive::Archiver;
use crate::error::{ArchiveError, Error};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct TriggerConfig {
    pub interval: Duration,
    /// Run once immediately instead of waiting a full interval.
    pub run_on_start: bool,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            run_on_start: true,
        }
    }
}

pub struct ArchiveTrigger {
    archiver: Arc<Archiver>,
    config: TriggerConfig,
}

impl ArchiveTrigger {
    pub fn new(archiver: Arc<Archiver>, config: TriggerConfig) -> Self {
        Self { archiver, config }
    }

    /// Start the timer loop. Cancelling `shutdown` stops the loop and any run
    /// it has in flight.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let first_tick = if self.config.run_on_start {
                tokio::time::Instant::now()
            } else {
                tokio::time::Instant::now() + self.config.interval
            };
            let mut ticker = tokio::time::interval_at(first_tick, self.config.interval);
            // Skip catch-up ticks if a run overruns the interval.
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            tracing::info!(
                interval_secs = self.config.interval.as_secs(),
                run_on_start = self.config.run_on_start,
                "archive trigger started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.cancelled() => break,
                }

                match self.archiver.archive_all(&shutdown).await {
                    Ok(summary) => {
                        for outcome in summary.failed_channels() {
                            tracing::warn!(
                                run_id = %summary.run_id,
                                channel_id = %outcome.channel_id,
                                error = outcome.error.as_deref().unwrap_or("unknown"),
                                "channel failed during scheduled run"
                            );
                        }
                    }
                    Err(Error::Archive(ArchiveError::AlreadyRunning)) => {
                        tracing::debug!("previous archiving run still in progress, skipping tick");
                    }
                    Err(error) => {
                        tracing::error!(%error, "scheduled archiving run failed");
                    }
                }
            }

            tracing::info!("archive trigger stopped");
        })
    }
}
