//! Single source of truth for the active position

use std::sync::Arc;

use range_types::{validate_ticks, InvariantError, PositionRecord};
use solana_sdk::pubkey::Pubkey;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::error::KeeperResult;

/// Holds at most one active [`PositionRecord`].
///
/// Each operation takes the lock once, so a liquidity/fee refresh and a
/// bounds update never interleave within a record. Readers get a copy.
pub struct PositionStateTracker {
    clock: Arc<dyn Clock>,
    active: RwLock<Option<PositionRecord>>,
}

impl PositionStateTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            active: RwLock::new(None),
        }
    }

    /// Replace the active record
    pub async fn set(&self, mut record: PositionRecord) {
        let now = self.clock.now();
        record.last_updated_at = now.max(record.created_at);

        info!(
            position = %record.position_id,
            pool = %record.pool_id,
            tick_lower = record.tick_lower,
            tick_upper = record.tick_upper,
            liquidity = %record.liquidity,
            "Tracking position"
        );
        *self.active.write().await = Some(record);
    }

    pub async fn get(&self) -> Option<PositionRecord> {
        self.active.read().await.clone()
    }

    pub async fn has_active(&self) -> bool {
        self.active.read().await.is_some()
    }

    /// Forget the active record. Safe to call with nothing tracked.
    pub async fn clear(&self) {
        if let Some(previous) = self.active.write().await.take() {
            info!(position = %previous.position_id, "Stopped tracking position");
        }
    }

    /// Refresh liquidity and fees of the active record
    pub async fn update_liquidity_and_fees(
        &self,
        liquidity: u128,
        fee_owed_a: u128,
        fee_owed_b: u128,
    ) -> KeeperResult<()> {
        let mut guard = self.active.write().await;
        let record = guard.as_mut().ok_or(InvariantError::NoActivePosition)?;
        self.apply_refresh(record, liquidity, fee_owed_a, fee_owed_b);
        Ok(())
    }

    /// Refresh liquidity and fees only if `position_id` is still the active record.
    ///
    /// Returns `false` when the record was replaced since the caller read it.
    pub async fn update_liquidity_and_fees_if(
        &self,
        position_id: &Pubkey,
        liquidity: u128,
        fee_owed_a: u128,
        fee_owed_b: u128,
    ) -> KeeperResult<bool> {
        let mut guard = self.active.write().await;
        let record = guard.as_mut().ok_or(InvariantError::NoActivePosition)?;
        if record.position_id != *position_id {
            debug!(
                polled = %position_id,
                active = %record.position_id,
                "Skipping refresh for a replaced position"
            );
            return Ok(false);
        }
        self.apply_refresh(record, liquidity, fee_owed_a, fee_owed_b);
        Ok(true)
    }

    /// Move the active record to new bounds
    pub async fn update_bounds(&self, tick_lower: i32, tick_upper: i32) -> KeeperResult<()> {
        validate_ticks(tick_lower, tick_upper)?;

        let mut guard = self.active.write().await;
        let record = guard.as_mut().ok_or(InvariantError::NoActivePosition)?;
        record.tick_lower = tick_lower;
        record.tick_upper = tick_upper;
        record.last_updated_at = self.clock.now().max(record.created_at);
        Ok(())
    }

    fn apply_refresh(&self, record: &mut PositionRecord, liquidity: u128, fee_owed_a: u128, fee_owed_b: u128) {
        record.liquidity = liquidity;
        record.fee_owed_a = fee_owed_a;
        record.fee_owed_b = fee_owed_b;
        record.last_updated_at = self.clock.now().max(record.created_at);
    }
}
