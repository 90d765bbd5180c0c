//! Append-only records written to persistence

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::position::PositionRecord;
use crate::range::RangeStatus;
use crate::serde_helpers::pubkey_serde;

// ============================================================================
// Position Snapshots
// ============================================================================

/// One monitor observation; written once per pass and never mutated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    #[serde(with = "pubkey_serde")]
    pub position_id: Pubkey,
    #[serde(with = "pubkey_serde")]
    pub pool_id: Pubkey,
    pub current_tick: i32,
    pub range_status: RangeStatus,
    pub liquidity: u128,
    pub fee_owed_a: u128,
    pub fee_owed_b: u128,
    pub timestamp: DateTime<Utc>,
}

impl PositionSnapshot {
    pub fn from_record(
        record: &PositionRecord,
        current_tick: i32,
        range_status: RangeStatus,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            position_id: record.position_id,
            pool_id: record.pool_id,
            current_tick,
            range_status,
            liquidity: record.liquidity,
            fee_owed_a: record.fee_owed_a,
            fee_owed_b: record.fee_owed_b,
            timestamp,
        }
    }
}

// ============================================================================
// Rebalance History
// ============================================================================

/// Tick bounds of a position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickRange {
    pub tick_lower: i32,
    pub tick_upper: i32,
}

/// Economics of a completed rebalance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceMetrics {
    pub fees_collected_a: u128,
    pub fees_collected_b: u128,
    pub old_range: TickRange,
    pub new_range: Option<TickRange>,
    pub price_at_rebalance: f64,
    /// Fraction of value lost versus holding, measured from the old range's midpoint
    pub estimated_impermanent_loss: Option<f64>,
}

/// One rebalance attempt, successful or not; never mutated after insertion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RebalanceHistoryEntry {
    #[serde(with = "pubkey_serde")]
    pub position_id: Pubkey,
    pub timestamp: DateTime<Utc>,
    /// Transactions produced during the attempt, in submission order
    pub transaction_ids: Vec<String>,
    pub success: bool,
    pub error: Option<String>,
    pub metrics: Option<RebalanceMetrics>,
}

/// Aggregate view over the rebalance history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RebalanceSummary {
    pub total_attempts: u64,
    pub successful: u64,
    pub failed: u64,
    pub total_fees_collected_a: u128,
    pub total_fees_collected_b: u128,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl RebalanceSummary {
    /// Fold a history into totals
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a RebalanceHistoryEntry>) -> Self {
        entries.into_iter().fold(Self::default(), |mut summary, entry| {
            summary.total_attempts += 1;
            if entry.success {
                summary.successful += 1;
                summary.last_success_at = summary.last_success_at.max(Some(entry.timestamp));
            } else {
                summary.failed += 1;
            }
            if let Some(metrics) = &entry.metrics {
                summary.total_fees_collected_a =
                    summary.total_fees_collected_a.saturating_add(metrics.fees_collected_a);
                summary.total_fees_collected_b =
                    summary.total_fees_collected_b.saturating_add(metrics.fees_collected_b);
            }
            summary
        })
    }

    pub fn success_rate(&self) -> Option<f64> {
        if self.total_attempts == 0 {
            return None;
        }
        Some(self.successful as f64 / self.total_attempts as f64)
    }
}
