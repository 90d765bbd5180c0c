//! Recurring poll of pool and position state
//!
//! Each pass refreshes the tracker, evaluates the range and appends a
//! snapshot. Pass errors are logged and the schedule keeps going; the loop
//! only ends on `stop()` or when no position is tracked any more.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use range_types::{InvariantError, PoolState, PositionRecord, PositionSnapshot, RangeStatus};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::chain::ChainGateway;
use crate::clock::Clock;
use crate::error::{KeeperError, KeeperResult};
use crate::persistence::PersistenceStore;
use crate::tracker::PositionStateTracker;

/// What one pass saw, after the tracker was refreshed
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub pool: PoolState,
    pub status: RangeStatus,
    pub record: PositionRecord,
    pub observed_at: DateTime<Utc>,
}

/// Called at the end of every successful pass
#[async_trait]
pub trait PassObserver: Send + Sync {
    async fn on_observation(&self, observation: &Observation);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassControl {
    Continue,
    Stop,
}

/// Operator view of the monitor
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorStatus {
    pub active: bool,
    pub interval_ms: u64,
    pub passes: u64,
    pub failed_passes: u64,
    pub last_observation_at: Option<DateTime<Utc>>,
}

struct MonitorInner {
    gateway: ChainGateway,
    tracker: Arc<PositionStateTracker>,
    store: Arc<dyn PersistenceStore>,
    clock: Arc<dyn Clock>,
    observer: Option<Arc<dyn PassObserver>>,
    passes: AtomicU64,
    failed_passes: AtomicU64,
    last_observation_at: Mutex<Option<DateTime<Utc>>>,
}

pub struct PositionMonitor {
    inner: Arc<MonitorInner>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PositionMonitor {
    pub fn new(
        gateway: ChainGateway,
        tracker: Arc<PositionStateTracker>,
        store: Arc<dyn PersistenceStore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        observer: Option<Arc<dyn PassObserver>>,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                gateway,
                tracker,
                store,
                clock,
                observer,
                passes: AtomicU64::new(0),
                failed_passes: AtomicU64::new(0),
                last_observation_at: Mutex::new(None),
            }),
            interval,
            task: Mutex::new(None),
        }
    }

    /// Run one pass now, then every interval.
    ///
    /// Fails if already running or if no position is tracked.
    pub async fn start(&self) -> KeeperResult<()> {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(KeeperError::MonitorAlreadyRunning);
        }
        if !self.inner.tracker.has_active().await {
            return Err(InvariantError::NoActivePosition.into());
        }

        info!(interval_ms = self.interval.as_millis() as u64, "Starting position monitor");

        if self.inner.run_pass().await == PassControl::Stop {
            *task = None;
            return Ok(());
        }

        let inner = self.inner.clone();
        let period = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if inner.run_pass().await == PassControl::Stop {
                    break;
                }
            }
            info!("Position monitor stopped");
        }));

        Ok(())
    }

    /// Cancel the schedule. Fails if not running.
    pub async fn stop(&self) -> KeeperResult<()> {
        let mut task = self.task.lock().await;
        match task.take() {
            Some(handle) if !handle.is_finished() => {
                handle.abort();
                info!("Position monitor stopped");
                Ok(())
            }
            _ => Err(KeeperError::MonitorNotRunning),
        }
    }

    pub async fn is_active(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub async fn status(&self) -> MonitorStatus {
        MonitorStatus {
            active: self.is_active().await,
            interval_ms: self.interval.as_millis() as u64,
            passes: self.inner.passes.load(Ordering::Relaxed),
            failed_passes: self.inner.failed_passes.load(Ordering::Relaxed),
            last_observation_at: *self.inner.last_observation_at.lock().await,
        }
    }
}

impl MonitorInner {
    async fn run_pass(&self) -> PassControl {
        let Some(record) = self.tracker.get().await else {
            warn!("No active position, stopping monitor");
            return PassControl::Stop;
        };

        self.passes.fetch_add(1, Ordering::Relaxed);
        match self.observe(&record).await {
            Ok(Some(observation)) => {
                *self.last_observation_at.lock().await = Some(observation.observed_at);
                if let Some(observer) = &self.observer {
                    observer.on_observation(&observation).await;
                }
            }
            Ok(None) => {}
            Err(err) => {
                self.failed_passes.fetch_add(1, Ordering::Relaxed);
                error!(
                    position = %record.position_id,
                    category = err.category(),
                    error = %err,
                    "Monitoring pass failed"
                );
            }
        }
        PassControl::Continue
    }

    /// `None` when the tracked position was replaced mid-pass
    async fn observe(&self, record: &PositionRecord) -> KeeperResult<Option<Observation>> {
        let pool = self.gateway.fetch_pool_state(&record.pool_id).await?;
        let state = self.gateway.fetch_position_state(&record.position_id).await?;

        if state.pool_id != record.pool_id {
            warn!(
                position = %record.position_id,
                tracked_pool = %record.pool_id,
                chain_pool = %state.pool_id,
                "Position reports a different pool"
            );
        }

        let refreshed = self
            .tracker
            .update_liquidity_and_fees_if(&record.position_id, state.liquidity, state.fee_owed_a, state.fee_owed_b)
            .await?;
        if !refreshed {
            return Ok(None);
        }

        if (state.tick_lower, state.tick_upper) != (record.tick_lower, record.tick_upper) {
            warn!(
                position = %record.position_id,
                tracked = ?(record.tick_lower, record.tick_upper),
                chain = ?(state.tick_lower, state.tick_upper),
                "Tracked bounds differ from chain, reconciling"
            );
            self.tracker.update_bounds(state.tick_lower, state.tick_upper).await?;
        }

        let current = self.tracker.get().await.ok_or(InvariantError::NoActivePosition)?;
        if current.position_id != record.position_id {
            return Ok(None);
        }

        let status = current.range_status(pool.current_tick);
        let observed_at = self.clock.now();
        debug!(
            position = %current.position_id,
            tick = pool.current_tick,
            price = pool.current_price,
            status = %status,
            liquidity = %current.liquidity,
            "Observed position"
        );

        let snapshot = PositionSnapshot::from_record(&current, pool.current_tick, status, observed_at);
        if let Err(err) = self.store.save_snapshot(&snapshot).await {
            warn!(position = %current.position_id, error = %err, "Failed to persist snapshot");
        }

        Ok(Some(Observation {
            pool,
            status,
            record: current,
            observed_at,
        }))
    }
}
