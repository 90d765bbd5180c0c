//! Process-local rebalance counters and the in-progress flag

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

/// Counters consulted by the decision gates and advanced by the executor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunCounters {
    pub last_rebalance_at: Option<DateTime<Utc>>,
    pub rebalance_count_today: u32,
    pub count_reset_at: DateTime<Utc>,
    pub out_of_range_since: Option<DateTime<Utc>>,
    /// Failed attempts since the last success
    pub consecutive_failures: u32,
}

impl RunCounters {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            last_rebalance_at: None,
            rebalance_count_today: 0,
            count_reset_at: now,
            out_of_range_since: None,
            consecutive_failures: 0,
        }
    }
}

/// Shared between the decision engine, executor and quota clock
pub struct RebalanceRunState {
    in_progress: AtomicBool,
    counters: Mutex<RunCounters>,
}

impl RebalanceRunState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            in_progress: AtomicBool::new(false),
            counters: Mutex::new(RunCounters::new(now)),
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Claim the execution slot. `None` if another execution holds it.
    pub fn try_begin(&self) -> Option<InProgressGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InProgressGuard { flag: &self.in_progress })
    }

    pub async fn counters(&self) -> MutexGuard<'_, RunCounters> {
        self.counters.lock().await
    }

    pub async fn snapshot(&self) -> RunCounters {
        self.counters.lock().await.clone()
    }
}

/// Releases the execution slot when dropped, on every exit path
#[must_use = "dropping the guard releases the execution slot"]
pub struct InProgressGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InProgressGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}
