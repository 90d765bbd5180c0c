//! Multi-step rebalance: claim, withdraw, open a centered range, redeposit
//!
//! Every attempt that gets past the in-progress check is recorded in the
//! rebalance history. Only a completed sequence advances the counters.

use std::sync::Arc;

use range_types::{
    centered_price_range, estimate_impermanent_loss, percent_of, price_to_tick, range_mid_price, validate_ticks,
    ChainError, ChainOperation, OpenedPosition, PositionRecord, PriceRange, RebalanceHistoryEntry, RebalanceMetrics,
    TickRange,
};
use serde::Serialize;
use solana_sdk::pubkey::Pubkey;
use tracing::{error, info, warn};

use crate::chain::{ChainGateway, Confirmation};
use crate::clock::Clock;
use crate::config::RebalanceConfig;
use crate::error::{KeeperError, KeeperResult};
use crate::persistence::PersistenceStore;
use crate::run_state::RebalanceRunState;
use crate::tracker::PositionStateTracker;

/// Result of one call to [`RebalanceExecutor::execute`]
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceOutcome {
    pub success: bool,
    /// True when another execution held the slot and nothing was attempted
    pub skipped: bool,
    /// Transactions produced, in submission order
    pub transaction_ids: Vec<String>,
    pub error: Option<String>,
    pub new_position: Option<PositionRecord>,
}

impl RebalanceOutcome {
    fn skipped() -> Self {
        Self {
            success: false,
            skipped: true,
            transaction_ids: Vec::new(),
            error: Some("rebalance already in progress".to_string()),
            new_position: None,
        }
    }
}

/// What a completed sequence produced
struct Completed {
    record: PositionRecord,
    metrics: RebalanceMetrics,
}

pub struct RebalanceExecutor {
    gateway: ChainGateway,
    tracker: Arc<PositionStateTracker>,
    run_state: Arc<RebalanceRunState>,
    store: Arc<dyn PersistenceStore>,
    clock: Arc<dyn Clock>,
    config: RebalanceConfig,
}

impl RebalanceExecutor {
    pub fn new(
        gateway: ChainGateway,
        tracker: Arc<PositionStateTracker>,
        run_state: Arc<RebalanceRunState>,
        store: Arc<dyn PersistenceStore>,
        clock: Arc<dyn Clock>,
        config: RebalanceConfig,
    ) -> Self {
        Self {
            gateway,
            tracker,
            run_state,
            store,
            clock,
            config,
        }
    }

    /// Move `position` to a range centered on `current_price`.
    ///
    /// Returns immediately, without touching the chain or the history, if
    /// another execution is running.
    pub async fn execute(&self, position: &PositionRecord, current_price: f64) -> RebalanceOutcome {
        let Some(_slot) = self.run_state.try_begin() else {
            warn!(position = %position.position_id, "Rebalance already in progress, skipping");
            return RebalanceOutcome::skipped();
        };

        info!(
            position = %position.position_id,
            tick_lower = position.tick_lower,
            tick_upper = position.tick_upper,
            price = current_price,
            "Starting rebalance"
        );

        let mut transaction_ids = Vec::new();
        let result = self.run_sequence(position, current_price, &mut transaction_ids).await;
        let now = self.clock.now();

        match result {
            Ok(completed) => {
                self.tracker.set(completed.record.clone()).await;
                {
                    let mut counters = self.run_state.counters().await;
                    counters.last_rebalance_at = Some(now);
                    counters.rebalance_count_today += 1;
                    counters.out_of_range_since = None;
                    counters.consecutive_failures = 0;
                }

                info!(
                    old_position = %position.position_id,
                    new_position = %completed.record.position_id,
                    tick_lower = completed.record.tick_lower,
                    tick_upper = completed.record.tick_upper,
                    transactions = transaction_ids.len(),
                    "Rebalance completed"
                );

                self.record_history(RebalanceHistoryEntry {
                    position_id: position.position_id,
                    timestamp: now,
                    transaction_ids: transaction_ids.clone(),
                    success: true,
                    error: None,
                    metrics: Some(completed.metrics),
                })
                .await;

                RebalanceOutcome {
                    success: true,
                    skipped: false,
                    transaction_ids,
                    error: None,
                    new_position: Some(completed.record),
                }
            }
            Err(err) => {
                let failures = {
                    let mut counters = self.run_state.counters().await;
                    counters.consecutive_failures += 1;
                    counters.consecutive_failures
                };
                let message = format!("[{}] {}", err.category(), err);

                error!(
                    position = %position.position_id,
                    category = err.category(),
                    consecutive_failures = failures,
                    transactions = ?transaction_ids,
                    error = %err,
                    "Rebalance failed"
                );

                self.record_history(RebalanceHistoryEntry {
                    position_id: position.position_id,
                    timestamp: now,
                    transaction_ids: transaction_ids.clone(),
                    success: false,
                    error: Some(message.clone()),
                    metrics: None,
                })
                .await;

                RebalanceOutcome {
                    success: false,
                    skipped: false,
                    transaction_ids,
                    error: Some(message),
                    new_position: None,
                }
            }
        }
    }

    async fn run_sequence(
        &self,
        position: &PositionRecord,
        current_price: f64,
        transaction_ids: &mut Vec<String>,
    ) -> KeeperResult<Completed> {
        // Fail before any I/O if the target range is unusable
        let target = self.target_range(current_price)?;

        // 1. Claim
        self.submit(
            ChainOperation::ClaimFees {
                position_id: position.position_id,
            },
            transaction_ids,
        )
        .await?;
        let mut remaining = position.liquidity;
        self.tracker
            .update_liquidity_and_fees_if(&position.position_id, remaining, 0, 0)
            .await?;

        // 2. Withdraw
        let withdraw = if self.config.close_previous_position {
            remaining
        } else {
            percent_of(remaining, self.config.withdraw_percent)
        };
        if withdraw > 0 {
            self.submit(
                ChainOperation::RemoveLiquidity {
                    position_id: position.position_id,
                    liquidity: withdraw,
                },
                transaction_ids,
            )
            .await?;
            remaining -= withdraw;
            self.tracker
                .update_liquidity_and_fees_if(&position.position_id, remaining, 0, 0)
                .await?;
        } else {
            warn!(position = %position.position_id, "No liquidity to withdraw");
        }

        // 3-4. Open the centered range
        let receipt = self
            .submit(
                ChainOperation::OpenPosition {
                    pool_id: position.pool_id,
                    price_lower: target.lower,
                    price_upper: target.upper,
                },
                transaction_ids,
            )
            .await?;
        let opened = receipt.ok_or_else(|| {
            ChainError::transaction_failed(
                "open_position did not report the new position",
                transaction_ids.last().map(String::as_str),
            )
        })?;

        // 5. Deposit
        let deposit = self.config.redeposit_liquidity.map(u128::from).unwrap_or(withdraw);
        if deposit > 0 {
            self.submit(
                ChainOperation::AddLiquidity {
                    position_id: opened.position_id,
                    liquidity: deposit,
                },
                transaction_ids,
            )
            .await?;
        } else {
            warn!(position = %opened.position_id, "Nothing to deposit into new position");
        }

        if self.config.close_previous_position {
            self.close_previous(&position.position_id, transaction_ids).await;
        }

        let now = self.clock.now();
        let record = PositionRecord::new(
            opened.position_id,
            opened.position_owner_token_id,
            position.pool_id,
            opened.tick_lower,
            opened.tick_upper,
            deposit,
            now,
        )?;

        let entry_price = range_mid_price(position.tick_lower, position.tick_upper, self.config.decimal_shift);
        let metrics = RebalanceMetrics {
            fees_collected_a: position.fee_owed_a,
            fees_collected_b: position.fee_owed_b,
            old_range: TickRange {
                tick_lower: position.tick_lower,
                tick_upper: position.tick_upper,
            },
            new_range: Some(TickRange {
                tick_lower: opened.tick_lower,
                tick_upper: opened.tick_upper,
            }),
            price_at_rebalance: current_price,
            estimated_impermanent_loss: estimate_impermanent_loss(entry_price, current_price),
        };

        Ok(Completed { record, metrics })
    }

    /// Centered price bounds, checked to map onto a valid tick range
    fn target_range(&self, current_price: f64) -> KeeperResult<PriceRange> {
        let range = centered_price_range(current_price, self.config.position_width_percent);
        let shift = self.config.decimal_shift;

        match (price_to_tick(range.lower, shift), price_to_tick(range.upper, shift)) {
            (Some(lower), Some(upper)) => {
                validate_ticks(lower, upper)?;
                Ok(range)
            }
            _ => Err(KeeperError::InvalidPrice { price: current_price }),
        }
    }

    /// Submit one step and record its transaction id
    async fn submit(
        &self,
        operation: ChainOperation,
        transaction_ids: &mut Vec<String>,
    ) -> KeeperResult<Option<OpenedPosition>> {
        let submitted = self.gateway.submit_and_confirm(&operation).await?;
        transaction_ids.push(submitted.receipt.transaction_id.clone());

        match submitted.confirmation {
            Confirmation::Confirmed => {
                info!(operation = %operation, transaction = %submitted.receipt.transaction_id, "Step confirmed")
            }
            Confirmation::Unknown => warn!(
                operation = %operation,
                transaction = %submitted.receipt.transaction_id,
                "Step confirmation unknown, continuing"
            ),
            Confirmation::Failed(err) => return Err(err.into()),
        }

        Ok(submitted.receipt.opened)
    }

    /// Best-effort close of the drained previous position
    async fn close_previous(&self, position_id: &Pubkey, transaction_ids: &mut Vec<String>) {
        let operation = ChainOperation::ClosePosition {
            position_id: *position_id,
        };
        if let Err(err) = self.submit(operation, transaction_ids).await {
            warn!(position = %position_id, error = %err, "Failed to close previous position, leaving it open");
        }
    }

    async fn record_history(&self, entry: RebalanceHistoryEntry) {
        if let Err(err) = self.store.save_rebalance_history(&entry).await {
            warn!(position = %entry.position_id, error = %err, "Failed to persist rebalance history");
        }
    }
}
