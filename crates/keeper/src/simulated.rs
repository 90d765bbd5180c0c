//! In-process pool used for paper trading
//!
//! The pool tick takes a bounded random step on every pool read, and every
//! position whose range covers the new tick accrues a fixed fee.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use range_types::{
    price_to_tick, tick_to_price, ChainError, ChainOperation, ChainResult, InvariantError, OpenedPosition, PoolState,
    PositionRecord, PositionState, RangeStatus, TransactionReceipt, MAX_TICK, MIN_TICK,
};
use solana_sdk::pubkey::Pubkey;
use tracing::debug;

use crate::chain::ChainClient;
use crate::config::SimulationConfig;

#[derive(Debug, Clone)]
struct SimPosition {
    pool_id: Pubkey,
    tick_lower: i32,
    tick_upper: i32,
    liquidity: u128,
    fee_owed_a: u128,
    fee_owed_b: u128,
}

struct SimState {
    rng: StdRng,
    tick: i32,
    positions: HashMap<Pubkey, SimPosition>,
    submitted: u64,
}

pub struct SimulatedChainClient {
    pool_id: Pubkey,
    tick_volatility: i32,
    fee_per_read: u128,
    decimal_shift: i32,
    state: Mutex<SimState>,
}

impl SimulatedChainClient {
    pub fn new(config: &SimulationConfig, pool_id: Pubkey, decimal_shift: i32) -> Self {
        Self {
            pool_id,
            tick_volatility: config.tick_volatility.min(i32::MAX as u32) as i32,
            fee_per_read: config.fee_per_read as u128,
            decimal_shift,
            state: Mutex::new(SimState {
                rng: StdRng::seed_from_u64(config.seed),
                tick: config.initial_tick.clamp(MIN_TICK, MAX_TICK),
                positions: HashMap::new(),
                submitted: 0,
            }),
        }
    }

    /// Place an existing position in the pool, e.g. the one named in config
    pub fn seed_position(&self, position_id: Pubkey, tick_lower: i32, tick_upper: i32, liquidity: u128) {
        self.lock().positions.insert(
            position_id,
            SimPosition {
                pool_id: self.pool_id,
                tick_lower,
                tick_upper,
                liquidity,
                fee_owed_a: 0,
                fee_owed_b: 0,
            },
        );
    }

    /// Open the configured position around the current tick and return its record
    pub fn seed_configured_position(
        &self,
        config: &SimulationConfig,
        position_id: Pubkey,
        owner_token_id: Pubkey,
        created_at: DateTime<Utc>,
    ) -> Result<PositionRecord, InvariantError> {
        let half_width = config.initial_half_width_ticks.max(1);
        let center = self.current_tick();
        let tick_lower = center.saturating_sub(half_width).max(MIN_TICK);
        let tick_upper = center.saturating_add(half_width).min(MAX_TICK);

        let record = PositionRecord::new(
            position_id,
            owner_token_id,
            self.pool_id,
            tick_lower,
            tick_upper,
            config.initial_liquidity as u128,
            created_at,
        )?;
        self.seed_position(position_id, tick_lower, tick_upper, record.liquidity);
        Ok(record)
    }

    /// Force the pool to a tick
    pub fn set_tick(&self, tick: i32) {
        self.lock().tick = tick.clamp(MIN_TICK, MAX_TICK);
    }

    pub fn current_tick(&self) -> i32 {
        self.lock().tick
    }

    pub fn open_positions(&self) -> usize {
        self.lock().positions.len()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn apply(&self, state: &mut SimState, operation: &ChainOperation) -> ChainResult<Option<OpenedPosition>> {
        match operation {
            ChainOperation::OpenPosition {
                pool_id,
                price_lower,
                price_upper,
            } => {
                if *pool_id != self.pool_id {
                    return Err(ChainError::invalid_account(*pool_id, "unknown pool"));
                }
                let (Some(tick_lower), Some(tick_upper)) = (
                    price_to_tick(*price_lower, self.decimal_shift),
                    price_to_tick(*price_upper, self.decimal_shift),
                ) else {
                    return Err(ChainError::MalformedRequest {
                        message: format!("prices {} / {} out of tick range", price_lower, price_upper),
                    });
                };
                // Round the upper bound up so a narrow range keeps one tick
                let tick_upper = tick_upper.max(tick_lower + 1).min(MAX_TICK);
                if tick_lower >= tick_upper {
                    return Err(ChainError::MalformedRequest {
                        message: format!("empty range [{}, {})", tick_lower, tick_upper),
                    });
                }

                let opened = OpenedPosition {
                    position_id: Pubkey::new_unique(),
                    position_owner_token_id: Pubkey::new_unique(),
                    tick_lower,
                    tick_upper,
                };
                state.positions.insert(
                    opened.position_id,
                    SimPosition {
                        pool_id: *pool_id,
                        tick_lower,
                        tick_upper,
                        liquidity: 0,
                        fee_owed_a: 0,
                        fee_owed_b: 0,
                    },
                );
                Ok(Some(opened))
            }
            ChainOperation::AddLiquidity { position_id, liquidity } => {
                let position = position_mut(state, position_id)?;
                position.liquidity = position.liquidity.saturating_add(*liquidity);
                Ok(None)
            }
            ChainOperation::RemoveLiquidity { position_id, liquidity } => {
                let position = position_mut(state, position_id)?;
                if *liquidity > position.liquidity {
                    return Err(ChainError::LiquidityTooSmall {
                        message: format!("withdraw {} exceeds liquidity {}", liquidity, position.liquidity),
                    });
                }
                position.liquidity -= liquidity;
                Ok(None)
            }
            ChainOperation::ClaimFees { position_id } => {
                let position = position_mut(state, position_id)?;
                position.fee_owed_a = 0;
                position.fee_owed_b = 0;
                Ok(None)
            }
            ChainOperation::ClosePosition { position_id } => {
                let position = position_mut(state, position_id)?;
                if position.liquidity > 0 {
                    return Err(ChainError::invalid_account(*position_id, "position still holds liquidity"));
                }
                state.positions.remove(position_id);
                Ok(None)
            }
        }
    }
}

fn position_mut<'a>(state: &'a mut SimState, position_id: &Pubkey) -> ChainResult<&'a mut SimPosition> {
    state
        .positions
        .get_mut(position_id)
        .ok_or_else(|| ChainError::invalid_account(*position_id, "position not found"))
}

#[async_trait]
impl ChainClient for SimulatedChainClient {
    async fn get_pool_state(&self, pool_id: &Pubkey) -> ChainResult<PoolState> {
        if *pool_id != self.pool_id {
            return Err(ChainError::invalid_account(*pool_id, "unknown pool"));
        }

        let mut state = self.lock();
        let step = if self.tick_volatility > 0 {
            state.rng.gen_range(-self.tick_volatility..=self.tick_volatility)
        } else {
            0
        };
        state.tick = state.tick.saturating_add(step).clamp(MIN_TICK, MAX_TICK);

        let tick = state.tick;
        for position in state.positions.values_mut() {
            let in_range = RangeStatus::evaluate(tick, position.tick_lower, position.tick_upper).is_in_range();
            if position.liquidity > 0 && in_range {
                position.fee_owed_a = position.fee_owed_a.saturating_add(self.fee_per_read);
                position.fee_owed_b = position.fee_owed_b.saturating_add(self.fee_per_read);
            }
        }

        Ok(PoolState {
            current_tick: tick,
            current_price: tick_to_price(tick, self.decimal_shift),
        })
    }

    async fn get_position_state(&self, position_id: &Pubkey) -> ChainResult<PositionState> {
        let state = self.lock();
        let position = state
            .positions
            .get(position_id)
            .ok_or_else(|| ChainError::invalid_account(*position_id, "position not found"))?;

        Ok(PositionState {
            pool_id: position.pool_id,
            tick_lower: position.tick_lower,
            tick_upper: position.tick_upper,
            liquidity: position.liquidity,
            fee_owed_a: position.fee_owed_a,
            fee_owed_b: position.fee_owed_b,
        })
    }

    async fn build_and_submit(&self, operation: &ChainOperation) -> ChainResult<TransactionReceipt> {
        let mut state = self.lock();
        let opened = self.apply(&mut state, operation)?;
        state.submitted += 1;
        let transaction_id = format!("sim-{:08x}", state.submitted);
        debug!(operation = %operation, transaction = %transaction_id, "Simulated submission");

        Ok(match opened {
            Some(opened) => TransactionReceipt::with_opened(transaction_id, opened),
            None => TransactionReceipt::new(transaction_id),
        })
    }

    async fn confirm(&self, _transaction_id: &str, _timeout: Duration) -> ChainResult<()> {
        Ok(())
    }
}
