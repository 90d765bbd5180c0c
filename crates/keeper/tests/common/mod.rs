//! Shared fixtures for the keeper integration tests

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use range_keeper::{
    ChainClient, ChainGateway, Clock, KeeperConfig, KeeperResult, PersistenceStore, PositionConfig, RebalanceConfig,
    RetryConfig,
};
use range_types::{
    price_to_tick, tick_to_price, ChainError, ChainOperation, ChainResult, OpenedPosition, PoolState, PositionRecord,
    PositionSnapshot, PositionState, RebalanceHistoryEntry, RebalanceSummary, TransactionReceipt,
};
use solana_sdk::pubkey::Pubkey;

pub const TICK_LOWER: i32 = -39_104;
pub const TICK_UPPER: i32 = -22_976;

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
}

// ============================================================================
// Clocks
// ============================================================================

/// Wall clock that advances with tokio's (possibly paused) time
pub struct TokioClock {
    origin_wall: DateTime<Utc>,
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new(origin_wall: DateTime<Utc>) -> Self {
        Self {
            origin_wall,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = tokio::time::Instant::now() - self.origin;
        self.origin_wall + chrono::Duration::from_std(elapsed).unwrap()
    }
}

// ============================================================================
// Scripted chain client
// ============================================================================

#[derive(Default)]
struct MockState {
    pool: Option<PoolState>,
    positions: HashMap<Pubkey, PositionState>,
    pool_failures: VecDeque<ChainError>,
    submit_failures: HashMap<&'static str, ChainError>,
    confirm_failures: HashMap<&'static str, ChainError>,
    submitted: Vec<ChainOperation>,
    pool_reads: u32,
}

/// Chain client whose pool price, positions and failures are set by the test
pub struct MockChainClient {
    pool_id: Pubkey,
    state: Mutex<MockState>,
    submit_delay: Mutex<Option<Duration>>,
    hang_confirmations: Mutex<bool>,
}

impl MockChainClient {
    pub fn new(pool_id: Pubkey) -> Self {
        Self {
            pool_id,
            state: Mutex::new(MockState::default()),
            submit_delay: Mutex::new(None),
            hang_confirmations: Mutex::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn pool_id(&self) -> Pubkey {
        self.pool_id
    }

    /// Move the pool to `tick`, priced without decimal scaling
    pub fn set_tick(&self, tick: i32) {
        self.set_pool(tick, tick_to_price(tick, 0));
    }

    pub fn set_pool(&self, current_tick: i32, current_price: f64) {
        self.lock().pool = Some(PoolState {
            current_tick,
            current_price,
        });
    }

    pub fn add_position(&self, position_id: Pubkey, tick_lower: i32, tick_upper: i32, liquidity: u128) {
        self.lock().positions.insert(
            position_id,
            PositionState {
                pool_id: self.pool_id,
                tick_lower,
                tick_upper,
                liquidity,
                fee_owed_a: 0,
                fee_owed_b: 0,
            },
        );
    }

    pub fn set_fees(&self, position_id: &Pubkey, fee_owed_a: u128, fee_owed_b: u128) {
        if let Some(position) = self.lock().positions.get_mut(position_id) {
            position.fee_owed_a = fee_owed_a;
            position.fee_owed_b = fee_owed_b;
        }
    }

    pub fn position(&self, position_id: &Pubkey) -> Option<PositionState> {
        self.lock().positions.get(position_id).cloned()
    }

    pub fn fail_pool_reads(&self, errors: impl IntoIterator<Item = ChainError>) {
        self.lock().pool_failures.extend(errors);
    }

    /// Fail the next submission of `operation` (by name, e.g. "open_position")
    pub fn fail_submission(&self, operation: &'static str, error: ChainError) {
        self.lock().submit_failures.insert(operation, error);
    }

    /// Land the next `operation` but report it failed when confirming
    pub fn fail_confirmation(&self, operation: &'static str, error: ChainError) {
        self.lock().confirm_failures.insert(operation, error);
    }

    pub fn set_submit_delay(&self, delay: Duration) {
        *self.submit_delay.lock().unwrap() = Some(delay);
    }

    pub fn hang_confirmations(&self) {
        *self.hang_confirmations.lock().unwrap() = true;
    }

    pub fn submitted(&self) -> Vec<ChainOperation> {
        self.lock().submitted.clone()
    }

    pub fn submitted_names(&self) -> Vec<&'static str> {
        self.lock().submitted.iter().map(ChainOperation::name).collect()
    }

    pub fn pool_reads(&self) -> u32 {
        self.lock().pool_reads
    }

    fn apply(&self, operation: &ChainOperation) -> ChainResult<Option<OpenedPosition>> {
        let mut state = self.lock();
        if let Some(err) = state.submit_failures.remove(operation.name()) {
            return Err(err);
        }

        let opened = match operation {
            ChainOperation::OpenPosition {
                price_lower,
                price_upper,
                ..
            } => {
                let tick_lower = price_to_tick(*price_lower, 0)
                    .ok_or_else(|| ChainError::rpc_error("bad lower price", None))?;
                let tick_upper = price_to_tick(*price_upper, 0)
                    .ok_or_else(|| ChainError::rpc_error("bad upper price", None))?
                    + 1;
                let opened = OpenedPosition {
                    position_id: Pubkey::new_unique(),
                    position_owner_token_id: Pubkey::new_unique(),
                    tick_lower,
                    tick_upper,
                };
                state.positions.insert(
                    opened.position_id,
                    PositionState {
                        pool_id: self.pool_id,
                        tick_lower,
                        tick_upper,
                        liquidity: 0,
                        fee_owed_a: 0,
                        fee_owed_b: 0,
                    },
                );
                Some(opened)
            }
            ChainOperation::AddLiquidity { position_id, liquidity } => {
                let position = state
                    .positions
                    .get_mut(position_id)
                    .ok_or_else(|| ChainError::invalid_account(*position_id, "not found"))?;
                position.liquidity += liquidity;
                None
            }
            ChainOperation::RemoveLiquidity { position_id, liquidity } => {
                let position = state
                    .positions
                    .get_mut(position_id)
                    .ok_or_else(|| ChainError::invalid_account(*position_id, "not found"))?;
                position.liquidity = position.liquidity.saturating_sub(*liquidity);
                None
            }
            ChainOperation::ClaimFees { position_id } => {
                let position = state
                    .positions
                    .get_mut(position_id)
                    .ok_or_else(|| ChainError::invalid_account(*position_id, "not found"))?;
                position.fee_owed_a = 0;
                position.fee_owed_b = 0;
                None
            }
            ChainOperation::ClosePosition { position_id } => {
                state.positions.remove(position_id);
                None
            }
        };

        state.submitted.push(operation.clone());
        Ok(opened)
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn get_pool_state(&self, _pool_id: &Pubkey) -> ChainResult<PoolState> {
        let mut state = self.lock();
        state.pool_reads += 1;
        if let Some(err) = state.pool_failures.pop_front() {
            return Err(err);
        }
        state.pool.ok_or_else(|| ChainError::connection("pool not initialised"))
    }

    async fn get_position_state(&self, position_id: &Pubkey) -> ChainResult<PositionState> {
        self.position(position_id)
            .ok_or_else(|| ChainError::invalid_account(*position_id, "not found"))
    }

    async fn build_and_submit(&self, operation: &ChainOperation) -> ChainResult<TransactionReceipt> {
        let delay = *self.submit_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let opened = self.apply(operation)?;
        let transaction_id = format!("tx-{}-{}", operation.name(), self.lock().submitted.len());
        Ok(match opened {
            Some(opened) => TransactionReceipt::with_opened(transaction_id, opened),
            None => TransactionReceipt::new(transaction_id),
        })
    }

    async fn confirm(&self, transaction_id: &str, _timeout: Duration) -> ChainResult<()> {
        {
            let mut state = self.lock();
            let failed = state
                .confirm_failures
                .keys()
                .copied()
                .find(|name| transaction_id.starts_with(&format!("tx-{}-", name)));
            if let Some(err) = failed.and_then(|name| state.confirm_failures.remove(name)) {
                return Err(err);
            }
        }

        let hang = *self.hang_confirmations.lock().unwrap();
        if hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

// ============================================================================
// Stores
// ============================================================================

/// Store whose every call fails
pub struct FailingStore;

#[async_trait]
impl PersistenceStore for FailingStore {
    async fn save_snapshot(&self, _snapshot: &PositionSnapshot) -> KeeperResult<()> {
        Err(range_keeper::KeeperError::Persistence("disk full".into()))
    }

    async fn save_rebalance_history(&self, _entry: &RebalanceHistoryEntry) -> KeeperResult<()> {
        Err(range_keeper::KeeperError::Persistence("disk full".into()))
    }

    async fn get_recent_snapshots(&self, _position_id: &Pubkey, _limit: usize) -> KeeperResult<Vec<PositionSnapshot>> {
        Err(range_keeper::KeeperError::Persistence("disk full".into()))
    }

    async fn get_rebalance_history(
        &self,
        _position_id: &Pubkey,
        _limit: usize,
    ) -> KeeperResult<Vec<RebalanceHistoryEntry>> {
        Err(range_keeper::KeeperError::Persistence("disk full".into()))
    }

    async fn get_rebalance_metrics(&self) -> KeeperResult<RebalanceSummary> {
        Err(range_keeper::KeeperError::Persistence("disk full".into()))
    }
}

// ============================================================================
// Config and records
// ============================================================================

pub fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        base_delay_ms: 10,
        max_delay_ms: 100,
        backoff_multiplier: 2.0,
    }
}

pub fn rebalance_config() -> RebalanceConfig {
    RebalanceConfig {
        enabled: true,
        ..RebalanceConfig::default()
    }
}

pub fn keeper_config(pool_id: Pubkey, position_id: Pubkey, owner_token_id: Pubkey) -> KeeperConfig {
    KeeperConfig {
        position: PositionConfig {
            pool_id,
            position_id,
            owner_token_id,
        },
        rebalance: rebalance_config(),
        retry: fast_retry(),
        ..KeeperConfig::default()
    }
}

pub fn gateway(client: Arc<MockChainClient>) -> ChainGateway {
    ChainGateway::new(client, fast_retry(), Default::default())
}

/// Record matching a position seeded into `client` with the reference bounds
pub fn seeded_record(client: &MockChainClient, liquidity: u128, now: DateTime<Utc>) -> PositionRecord {
    let position_id = Pubkey::new_unique();
    client.add_position(position_id, TICK_LOWER, TICK_UPPER, liquidity);
    PositionRecord::new(
        position_id,
        Pubkey::new_unique(),
        client.pool_id(),
        TICK_LOWER,
        TICK_UPPER,
        liquidity,
        now,
    )
    .unwrap()
}
