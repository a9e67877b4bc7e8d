//! Per-source flood detection with temporary bans.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::DdosSettings;

/// Longest reset period the timer accepts.
const MAX_RESET_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Counts requests per source over a fixed reset interval and bans sources
/// that exceed the threshold.
///
/// Counters are coarse: they all drop to zero together on every tick of the
/// reset task rather than sliding per source.
#[derive(Debug)]
pub struct DdosGuard {
    settings: DdosSettings,
    /// Requests seen per source since the last reset
    counts: DashMap<String, AtomicU64>,
    /// Ban expiry per source, epoch milliseconds
    bans: DashMap<String, i64>,
    #[cfg(test)]
    fail_next_tick: std::sync::atomic::AtomicBool,
}

impl DdosGuard {
    pub fn new(settings: DdosSettings) -> Self {
        Self {
            settings,
            counts: DashMap::new(),
            bans: DashMap::new(),
            #[cfg(test)]
            fail_next_tick: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &DdosSettings {
        &self.settings
    }

    /// Record one request from `source`.
    ///
    /// Returns false when the source is already banned, in which case nothing
    /// is counted, or when this request pushed it over the threshold and it
    /// was banned just now.
    pub fn track(&self, source: &str, now_ms: i64) -> bool {
        if self.is_banned(source, now_ms) {
            debug!(source = %source, "Request from banned source");
            return false;
        }
        self.count_request(source, now_ms)
    }

    /// Count a request from a source that was not banned when it arrived.
    fn count_request(&self, source: &str, now_ms: i64) -> bool {
        let count = {
            let counter = self
                .counts
                .entry(source.to_string())
                .or_insert_with(|| AtomicU64::new(0));
            counter.fetch_add(1, Ordering::AcqRel) + 1
        };

        // A concurrent ban inserts the ban before clearing the counter, so a
        // counter re-created after that clear is caught here
        if self.is_banned(source, now_ms) {
            self.counts.remove(source);
            debug!(source = %source, "Source banned while request was counted");
            return false;
        }

        if count > self.settings.threshold {
            warn!(
                source = %source,
                count = count,
                threshold = self.settings.threshold,
                "Possible DDoS attack detected"
            );
            self.ban(source, self.settings.ban_duration_seconds, now_ms);
            return false;
        }
        true
    }

    /// Whether `source` is banned at `now_ms`. An expired ban is removed.
    pub fn is_banned(&self, source: &str, now_ms: i64) -> bool {
        let expires_at = match self.bans.get(source) {
            Some(expires_at) => *expires_at,
            None => return false,
        };
        if now_ms < expires_at {
            return true;
        }
        if self
            .bans
            .remove_if(source, |_, expires_at| now_ms >= *expires_at)
            .is_some()
        {
            info!(source = %source, "Ban expired");
        }
        false
    }

    /// Ban `source` for `duration_seconds` starting at `now_ms`. The source's
    /// request counter starts over.
    pub fn ban(&self, source: &str, duration_seconds: u64, now_ms: i64) {
        let duration_ms = i64::try_from(duration_seconds.saturating_mul(1000)).unwrap_or(i64::MAX);
        let expires_at = now_ms.saturating_add(duration_ms);
        self.bans.insert(source.to_string(), expires_at);
        self.counts.remove(source);
        info!(
            source = %source,
            duration_seconds = duration_seconds,
            expires_at = expires_at,
            "Source banned"
        );
    }

    /// Lift a ban early.
    pub fn unban(&self, source: &str) -> bool {
        self.bans.remove(source).is_some()
    }

    /// Requests counted for `source` in the current interval.
    pub fn request_count(&self, source: &str) -> u64 {
        self.counts
            .get(source)
            .map_or(0, |c| c.load(Ordering::Acquire))
    }

    pub fn banned_count(&self) -> usize {
        self.bans.len()
    }

    /// Zero every counter and return the total that was cleared. Sources
    /// that were already at zero are dropped.
    pub fn reset_counts(&self) -> u64 {
        let mut cleared = 0;
        self.counts.retain(|_, count| {
            let seen = count.swap(0, Ordering::AcqRel);
            cleared += seen;
            seen > 0
        });
        cleared
    }

    /// Drop every ban that has expired by `now_ms`.
    pub fn purge_expired_bans(&self, now_ms: i64) {
        self.bans.retain(|_, expires_at| now_ms < *expires_at);
    }

    fn tick(&self, now_ms: i64) {
        #[cfg(test)]
        if self.fail_next_tick.swap(false, Ordering::AcqRel) {
            panic!("reset tick failure");
        }

        self.reset_counts();
        self.purge_expired_bans(now_ms);
        debug!(
            tracked_sources = self.counts.len(),
            banned_sources = self.bans.len(),
            "DDoS counters reset"
        );
    }

    /// Start the periodic reset on the current Tokio runtime. The task runs
    /// until [`ResetTask::stop`] is called or the handle is dropped.
    pub fn spawn_reset_task(self: &Arc<Self>, clock: Arc<dyn Clock>) -> ResetTask {
        let period = Duration::from_secs(self.settings.reset_interval_seconds.max(1))
            .min(MAX_RESET_INTERVAL);
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let guard = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_seconds = period.as_secs(), "DDoS reset task started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let now_ms = clock.now_millis();
                        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| guard.tick(now_ms)));
                        if outcome.is_err() {
                            error!("DDoS reset tick panicked, continuing");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("DDoS reset task stopped");
        });

        ResetTask {
            shutdown: shutdown_tx,
            handle,
        }
    }
}

/// Handle to a running reset task.
#[derive(Debug)]
pub struct ResetTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ResetTask {
    /// Signal the task to stop and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "DDoS reset task ended abnormally");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
