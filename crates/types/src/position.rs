//! The agent's belief about its single active position

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::constants::{MAX_TICK, MIN_TICK};
use crate::errors::InvariantError;
use crate::range::RangeStatus;
use crate::serde_helpers::pubkey_serde;

/// Mutable record of the currently held position.
///
/// Only the keeper's state tracker owns one of these; every other component
/// works on a copy scoped to a single operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionRecord {
    /// Position account
    #[serde(with = "pubkey_serde")]
    pub position_id: Pubkey,

    /// Mint of the token that proves ownership of the position
    #[serde(with = "pubkey_serde")]
    pub position_owner_token_id: Pubkey,

    /// Pool the position belongs to
    #[serde(with = "pubkey_serde")]
    pub pool_id: Pubkey,

    /// Active range, lower < upper
    pub tick_lower: i32,
    pub tick_upper: i32,

    /// Liquidity currently deposited
    pub liquidity: u128,

    /// Accrued but unclaimed fees in each pool asset
    pub fee_owed_a: u128,
    pub fee_owed_b: u128,

    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl PositionRecord {
    /// Create a record for a freshly opened or adopted position
    pub fn new(
        position_id: Pubkey,
        position_owner_token_id: Pubkey,
        pool_id: Pubkey,
        tick_lower: i32,
        tick_upper: i32,
        liquidity: u128,
        now: DateTime<Utc>,
    ) -> Result<Self, InvariantError> {
        validate_ticks(tick_lower, tick_upper)?;

        Ok(Self {
            position_id,
            position_owner_token_id,
            pool_id,
            tick_lower,
            tick_upper,
            liquidity,
            fee_owed_a: 0,
            fee_owed_b: 0,
            created_at: now,
            last_updated_at: now,
        })
    }

    /// Classify a pool tick against this position's bounds
    pub fn range_status(&self, current_tick: i32) -> RangeStatus {
        RangeStatus::evaluate(current_tick, self.tick_lower, self.tick_upper)
    }

    /// Width of the range in ticks
    pub fn width_ticks(&self) -> u32 {
        self.tick_upper.abs_diff(self.tick_lower)
    }

    pub fn has_unclaimed_fees(&self) -> bool {
        self.fee_owed_a > 0 || self.fee_owed_b > 0
    }
}

/// Check the `lower < upper` invariant and the protocol tick bounds
pub fn validate_ticks(tick_lower: i32, tick_upper: i32) -> Result<(), InvariantError> {
    for tick in [tick_lower, tick_upper] {
        if !(MIN_TICK..=MAX_TICK).contains(&tick) {
            return Err(InvariantError::TickOutOfBounds {
                tick,
                min_tick: MIN_TICK,
                max_tick: MAX_TICK,
            });
        }
    }
    if tick_lower >= tick_upper {
        return Err(InvariantError::InvalidTickRange {
            lower: tick_lower,
            upper: tick_upper,
        });
    }
    Ok(())
}
