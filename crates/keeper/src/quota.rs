//! Daily reset of the rebalance counter at UTC midnight

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::{KeeperError, KeeperResult};
use crate::run_state::RebalanceRunState;

/// sec min hour day-of-month month day-of-week year
const MIDNIGHT_UTC: &str = "0 0 0 * * * *";

const FALLBACK_PERIOD: Duration = Duration::from_secs(24 * 60 * 60);

/// Resets `rebalance_count_today` at every midnight boundary.
///
/// Each arm recomputes the wait from the wall clock, so a restart or a
/// suspended host never skips or doubles a reset.
pub struct DailyQuotaClock {
    inner: Arc<QuotaInner>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct QuotaInner {
    run_state: Arc<RebalanceRunState>,
    clock: Arc<dyn Clock>,
    schedule: Schedule,
}

impl DailyQuotaClock {
    pub fn new(run_state: Arc<RebalanceRunState>, clock: Arc<dyn Clock>) -> KeeperResult<Self> {
        let schedule = Schedule::from_str(MIDNIGHT_UTC)
            .map_err(|e| KeeperError::InvalidConfig(format!("Invalid reset schedule: {}", e)))?;

        Ok(Self {
            inner: Arc::new(QuotaInner {
                run_state,
                clock,
                schedule,
            }),
            task: Mutex::new(None),
        })
    }

    /// First boundary strictly after `now`
    pub fn next_reset_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.inner.next_reset_after(now)
    }

    pub fn duration_until_next_reset(&self, now: DateTime<Utc>) -> Duration {
        self.inner.duration_until_next_reset(now)
    }

    /// Reset the counter if a boundary passed since the last reset
    pub async fn reset_if_stale(&self) -> bool {
        self.inner.reset_if_stale().await
    }

    /// Arm the recurring reset; a stale counter is reset first
    pub async fn start(&self) {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!("Quota clock already running");
            return;
        }

        self.inner.reset_if_stale().await;

        let inner = self.inner.clone();
        *task = Some(tokio::spawn(async move {
            loop {
                inner.reset_if_stale().await;
                let wait = inner.duration_until_next_reset(inner.clock.now());
                debug!(wait_secs = wait.as_secs(), "Next daily quota reset scheduled");
                tokio::time::sleep(wait).await;
            }
        }));
    }

    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
        }
    }

    pub async fn is_active(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl QuotaInner {
    fn next_reset_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&now).next()
    }

    fn duration_until_next_reset(&self, now: DateTime<Utc>) -> Duration {
        self.next_reset_after(now)
            .and_then(|next| (next - now).to_std().ok())
            .unwrap_or(FALLBACK_PERIOD)
    }

    async fn reset_if_stale(&self) -> bool {
        let now = self.clock.now();
        let mut counters = self.run_state.counters().await;

        let due = self
            .next_reset_after(counters.count_reset_at)
            .is_some_and(|boundary| boundary <= now);
        if !due {
            return false;
        }

        info!(
            previous_count = counters.rebalance_count_today,
            last_reset = %counters.count_reset_at,
            "Resetting daily rebalance count"
        );
        counters.rebalance_count_today = 0;
        counters.count_reset_at = now;
        true
    }
}
