use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use range_types::{ChainError, InvariantError, PositionRecord, RebalanceSummary};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::chain::{ChainClient, ChainGateway};
use crate::clock::Clock;
use crate::config::KeeperConfig;
use crate::decision::{RebalanceDecisionEngine, RebalanceStats};
use crate::error::{KeeperError, KeeperResult};
use crate::executor::{RebalanceExecutor, RebalanceOutcome};
use crate::fees::{NetworkFeeGate, PriorityFeeSource};
use crate::monitor::{MonitorStatus, Observation, PassObserver, PositionMonitor};
use crate::persistence::PersistenceStore;
use crate::quota::DailyQuotaClock;
use crate::run_state::RebalanceRunState;
use crate::tracker::PositionStateTracker;

/// Consecutive failed rebalances after which the health check warns
const FAILURE_WARNING_THRESHOLD: u32 = 3;

/// Verbs accepted by [`RangeKeeper::manage_rebalancing`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalancingAction {
    Status,
    Enable,
    Disable,
}

impl FromStr for RebalancingAction {
    type Err = KeeperError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "status" => Ok(Self::Status),
            "enable" => Ok(Self::Enable),
            "disable" => Ok(Self::Disable),
            other => Err(KeeperError::invalid_parameter("action", other, "one of status, enable, disable")),
        }
    }
}

impl fmt::Display for RebalancingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verb = match self {
            Self::Status => "status",
            Self::Enable => "enable",
            Self::Disable => "disable",
        };
        f.write_str(verb)
    }
}

/// Everything an operator dashboard needs in one read
#[derive(Debug, Clone, Serialize)]
pub struct KeeperStats {
    pub position: Option<PositionRecord>,
    pub monitor: MonitorStatus,
    pub rebalance: RebalanceStats,
    pub history: RebalanceSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub monitor_active: bool,
    pub current_tick: i32,
    pub warnings: Vec<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Decision engine and executor, driven by monitor observations
struct Rebalancer {
    engine: RebalanceDecisionEngine,
    executor: Arc<RebalanceExecutor>,
    pending: Mutex<Option<JoinHandle<RebalanceOutcome>>>,
}

#[async_trait]
impl PassObserver for Rebalancer {
    async fn on_observation(&self, observation: &Observation) {
        let decision = self
            .engine
            .evaluate(observation.pool.current_tick, &observation.record, observation.pool.current_price)
            .await;
        if !decision.should_rebalance() {
            return;
        }

        // Execution runs off the monitor schedule so slow confirmations never delay a pass
        let executor = self.executor.clone();
        let record = observation.record.clone();
        let price = observation.pool.current_price;
        let handle = tokio::spawn(async move { executor.execute(&record, price).await });

        let mut pending = self.pending.lock().await;
        if let Some(previous) = pending.replace(handle) {
            if !previous.is_finished() {
                debug!("Previous rebalance task still running");
            }
        }
    }
}

impl Rebalancer {
    async fn wait_for_pending(&self) -> Option<RebalanceOutcome> {
        let handle = self.pending.lock().await.take()?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                error!(error = %e, "Rebalance task did not complete");
                None
            }
        }
    }
}

/// Wires the tracker, monitor, decision engine, executor and quota clock
/// around one managed position.
pub struct RangeKeeper {
    config: KeeperConfig,
    clock: Arc<dyn Clock>,
    gateway: ChainGateway,
    tracker: Arc<PositionStateTracker>,
    store: Arc<dyn PersistenceStore>,
    rebalancer: Arc<Rebalancer>,
    monitor: PositionMonitor,
    quota: DailyQuotaClock,
}

impl RangeKeeper {
    pub fn new(
        config: KeeperConfig,
        client: Arc<dyn ChainClient>,
        store: Arc<dyn PersistenceStore>,
        fee_source: Option<Arc<dyn PriorityFeeSource>>,
        clock: Arc<dyn Clock>,
    ) -> KeeperResult<Self> {
        config.validate()?;

        let gateway = ChainGateway::new(client, config.retry.clone(), config.timeouts.clone());
        let tracker = Arc::new(PositionStateTracker::new(clock.clone()));
        let run_state = Arc::new(RebalanceRunState::new(clock.now()));

        let fee_gate = NetworkFeeGate::new(fee_source, config.rebalance.max_priority_fee_micro_lamports);
        let engine = RebalanceDecisionEngine::new(config.rebalance.clone(), run_state.clone(), clock.clone(), fee_gate);
        let executor = Arc::new(RebalanceExecutor::new(
            gateway.clone(),
            tracker.clone(),
            run_state.clone(),
            store.clone(),
            clock.clone(),
            config.rebalance.clone(),
        ));
        let rebalancer = Arc::new(Rebalancer {
            engine,
            executor,
            pending: Mutex::new(None),
        });

        let monitor = PositionMonitor::new(
            gateway.clone(),
            tracker.clone(),
            store.clone(),
            clock.clone(),
            config.monitor.interval(),
            Some(rebalancer.clone() as Arc<dyn PassObserver>),
        );
        let quota = DailyQuotaClock::new(run_state, clock.clone())?;

        Ok(Self {
            config,
            clock,
            gateway,
            tracker,
            store,
            rebalancer,
            monitor,
            quota,
        })
    }

    pub fn tracker(&self) -> &Arc<PositionStateTracker> {
        &self.tracker
    }

    pub fn monitor(&self) -> &PositionMonitor {
        &self.monitor
    }

    pub fn decision_engine(&self) -> &RebalanceDecisionEngine {
        &self.rebalancer.engine
    }

    pub fn executor(&self) -> &RebalanceExecutor {
        &self.rebalancer.executor
    }

    pub fn quota_clock(&self) -> &DailyQuotaClock {
        &self.quota
    }

    /// Load the configured position from the chain and start tracking it
    pub async fn adopt_position(&self) -> KeeperResult<PositionRecord> {
        let position = &self.config.position;
        let state = self.gateway.fetch_position_state(&position.position_id).await?;

        if state.pool_id != position.pool_id {
            return Err(ChainError::invalid_account(
                position.position_id,
                &format!("belongs to pool {}, expected {}", state.pool_id, position.pool_id),
            )
            .into());
        }

        let mut record = PositionRecord::new(
            position.position_id,
            position.owner_token_id,
            state.pool_id,
            state.tick_lower,
            state.tick_upper,
            state.liquidity,
            self.clock.now(),
        )?;
        record.fee_owed_a = state.fee_owed_a;
        record.fee_owed_b = state.fee_owed_b;

        self.tracker.set(record.clone()).await;
        Ok(record)
    }

    /// Start the quota clock and the monitor, adopting the configured position if none is tracked
    pub async fn start(&self) -> KeeperResult<()> {
        if !self.tracker.has_active().await {
            let record = self.adopt_position().await?;
            info!(
                position = %record.position_id,
                tick_lower = record.tick_lower,
                tick_upper = record.tick_upper,
                "Adopted position"
            );
        }

        // The first pass must see today's count; the reset task is armed only once the monitor runs
        self.quota.reset_if_stale().await;
        self.monitor.start().await?;
        self.quota.start().await;

        info!(
            auto_rebalance = self.rebalancer.engine.is_enabled(),
            interval_ms = self.config.monitor.interval_ms,
            "Range keeper started"
        );
        Ok(())
    }

    /// Stop scheduling and let an in-flight rebalance finish
    pub async fn stop(&self) -> Option<RebalanceOutcome> {
        if let Err(e) = self.monitor.stop().await {
            debug!(error = %e, "Monitor was not running");
        }
        self.quota.stop().await;

        let outcome = self.rebalancer.wait_for_pending().await;
        info!("Range keeper stopped");
        outcome
    }

    /// Wait for the most recently spawned rebalance, if any
    pub async fn wait_for_pending_rebalance(&self) -> Option<RebalanceOutcome> {
        self.rebalancer.wait_for_pending().await
    }

    /// Runtime enable/disable of auto-rebalancing; every verb returns the current stats
    pub async fn manage_rebalancing(&self, action: RebalancingAction) -> RebalanceStats {
        match action {
            RebalancingAction::Enable => self.rebalancer.engine.enable(),
            RebalancingAction::Disable => self.rebalancer.engine.disable(),
            RebalancingAction::Status => {}
        }
        self.rebalancer.engine.stats().await
    }

    pub async fn stats(&self) -> KeeperStats {
        let history = match self.store.get_rebalance_metrics().await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Failed to read rebalance metrics");
                RebalanceSummary::default()
            }
        };

        KeeperStats {
            position: self.tracker.get().await,
            monitor: self.monitor.status().await,
            rebalance: self.rebalancer.engine.stats().await,
            history,
        }
    }

    /// Check the pool is reachable and report conditions an operator should look at
    pub async fn health_check(&self) -> KeeperResult<HealthReport> {
        let record = self
            .tracker
            .get()
            .await
            .ok_or(InvariantError::NoActivePosition)?;
        let pool = self.gateway.fetch_pool_state(&record.pool_id).await?;

        let monitor_active = self.monitor.is_active().await;
        let stats = self.rebalancer.engine.stats().await;
        let mut warnings = Vec::new();

        if !monitor_active {
            warnings.push("position monitor is not running".to_string());
        }
        if stats.consecutive_failures >= FAILURE_WARNING_THRESHOLD {
            warnings.push(format!("{} consecutive rebalance failures", stats.consecutive_failures));
        }
        if stats.enabled && stats.rebalance_count_today >= stats.max_daily_rebalances {
            warnings.push("daily rebalance quota exhausted".to_string());
        }
        let status = record.range_status(pool.current_tick);
        if !status.is_in_range() {
            warnings.push(format!("position is {}", status));
        }

        if warnings.is_empty() {
            debug!(tick = pool.current_tick, "Health check passed");
        } else {
            warn!(tick = pool.current_tick, ?warnings, "Health check warnings");
        }

        Ok(HealthReport {
            monitor_active,
            current_tick: pool.current_tick,
            warnings,
        })
    }
}
