//! Rebalance gating
//!
//! Gates run in a fixed order and stop at the first that says no:
//!
//! 1. runtime enable flag
//! 2. an execution already in progress
//! 3. daily quota
//! 4. position back in range (clears the out-of-range clock)
//! 5. first pass of an excursion (starts the out-of-range clock)
//! 6. minimum time out of range
//! 7. minimum spacing since the last rebalance
//! 8. price beyond the threshold past the crossed bound
//! 9. network priority fees under the ceiling
//!
//! The engine never returns an error; anything it cannot judge is a "no".

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use range_types::{lower_threshold_price, tick_to_price, upper_threshold_price, PositionRecord, RangeStatus};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::RebalanceConfig;
use crate::fees::{FeeCheck, NetworkFeeGate};
use crate::run_state::RebalanceRunState;

/// Why a pass did not rebalance
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SkipReason {
    Disabled,
    InProgress,
    DailyLimitReached { count: u32, max: u32 },
    InRange,
    JustLeftRange,
    OutOfRangeTooShort { minutes: i64 },
    CooldownActive { minutes_since_last: i64 },
    BelowThreshold { current_price: f64, threshold_price: f64 },
    FeesTooHigh { mean: f64, ceiling: u64 },
    InvalidPrice,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Disabled => write!(f, "auto-rebalance disabled"),
            SkipReason::InProgress => write!(f, "rebalance already in progress"),
            SkipReason::DailyLimitReached { count, max } => write!(f, "daily limit reached ({}/{})", count, max),
            SkipReason::InRange => write!(f, "position in range"),
            SkipReason::JustLeftRange => write!(f, "position just left range"),
            SkipReason::OutOfRangeTooShort { minutes } => write!(f, "out of range for only {} min", minutes),
            SkipReason::CooldownActive { minutes_since_last } => {
                write!(f, "last rebalance {} min ago", minutes_since_last)
            }
            SkipReason::BelowThreshold {
                current_price,
                threshold_price,
            } => write!(
                f,
                "price {:.6} has not crossed threshold {:.6}",
                current_price, threshold_price
            ),
            SkipReason::FeesTooHigh { mean, ceiling } => {
                write!(f, "mean priority fee {:.0} above ceiling {}", mean, ceiling)
            }
            SkipReason::InvalidPrice => write!(f, "price unusable"),
        }
    }
}

/// Outcome of one evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Rebalance,
    Skip(SkipReason),
}

impl Decision {
    pub fn should_rebalance(&self) -> bool {
        matches!(self, Decision::Rebalance)
    }
}

/// Counters exposed to operators
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RebalanceStats {
    pub enabled: bool,
    pub in_progress: bool,
    pub last_rebalance_at: Option<DateTime<Utc>>,
    pub rebalance_count_today: u32,
    pub max_daily_rebalances: u32,
    pub count_reset_at: DateTime<Utc>,
    pub out_of_range_since: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

pub struct RebalanceDecisionEngine {
    config: RebalanceConfig,
    enabled: AtomicBool,
    run_state: Arc<RebalanceRunState>,
    clock: Arc<dyn Clock>,
    fee_gate: NetworkFeeGate,
}

impl RebalanceDecisionEngine {
    pub fn new(
        config: RebalanceConfig,
        run_state: Arc<RebalanceRunState>,
        clock: Arc<dyn Clock>,
        fee_gate: NetworkFeeGate,
    ) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            config,
            run_state,
            clock,
            fee_gate,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn enable(&self) {
        if !self.enabled.swap(true, Ordering::AcqRel) {
            info!("Auto-rebalance enabled");
        }
    }

    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::AcqRel) {
            info!("Auto-rebalance disabled");
        }
    }

    /// Whether to rebalance `position` given one pool reading
    pub async fn should_rebalance(&self, current_tick: i32, position: &PositionRecord, current_price: f64) -> bool {
        self.evaluate(current_tick, position, current_price)
            .await
            .should_rebalance()
    }

    /// Run the gates and report which one stopped the pass
    pub async fn evaluate(&self, current_tick: i32, position: &PositionRecord, current_price: f64) -> Decision {
        let decision = self.run_gates(current_tick, position, current_price).await;
        match decision {
            Decision::Rebalance => info!(
                position = %position.position_id,
                tick = current_tick,
                price = current_price,
                "Rebalance warranted"
            ),
            Decision::Skip(reason) => debug!(
                position = %position.position_id,
                tick = current_tick,
                %reason,
                "Rebalance skipped"
            ),
        }
        decision
    }

    async fn run_gates(&self, current_tick: i32, position: &PositionRecord, current_price: f64) -> Decision {
        if !self.is_enabled() {
            return Decision::Skip(SkipReason::Disabled);
        }

        if self.run_state.is_in_progress() {
            return Decision::Skip(SkipReason::InProgress);
        }

        let now = self.clock.now();
        {
            let mut counters = self.run_state.counters().await;

            if counters.rebalance_count_today >= self.config.max_daily_rebalances {
                return Decision::Skip(SkipReason::DailyLimitReached {
                    count: counters.rebalance_count_today,
                    max: self.config.max_daily_rebalances,
                });
            }

            let status = position.range_status(current_tick);
            if status.is_in_range() {
                if counters.out_of_range_since.take().is_some() {
                    info!(position = %position.position_id, tick = current_tick, "Position back in range");
                }
                return Decision::Skip(SkipReason::InRange);
            }

            let Some(since) = counters.out_of_range_since else {
                counters.out_of_range_since = Some(now);
                info!(
                    position = %position.position_id,
                    tick = current_tick,
                    status = %status,
                    "Position left range"
                );
                return Decision::Skip(SkipReason::JustLeftRange);
            };

            let out_of_range_for = now - since;
            if out_of_range_for < self.config.min_out_of_range() {
                return Decision::Skip(SkipReason::OutOfRangeTooShort {
                    minutes: out_of_range_for.num_minutes(),
                });
            }

            if let Some(last) = counters.last_rebalance_at {
                let since_last = now - last;
                if since_last < self.config.min_rebalance_interval() {
                    return Decision::Skip(SkipReason::CooldownActive {
                        minutes_since_last: since_last.num_minutes(),
                    });
                }
            }

            if let Some(reason) = self.threshold_gate(status, position, current_price) {
                return Decision::Skip(reason);
            }
        }

        match self.fee_gate.check().await {
            FeeCheck::TooHigh { mean, ceiling } => {
                warn!(mean, ceiling, "Network priority fees too high, deferring rebalance");
                Decision::Skip(SkipReason::FeesTooHigh { mean, ceiling })
            }
            FeeCheck::Acceptable { .. } | FeeCheck::Unavailable => Decision::Rebalance,
        }
    }

    fn threshold_gate(&self, status: RangeStatus, position: &PositionRecord, current_price: f64) -> Option<SkipReason> {
        if !current_price.is_finite() || current_price <= 0.0 {
            return Some(SkipReason::InvalidPrice);
        }

        let shift = self.config.decimal_shift;
        let (crossed, threshold_price) = match status {
            RangeStatus::BelowRange => {
                let threshold =
                    lower_threshold_price(tick_to_price(position.tick_lower, shift), self.config.threshold_percent);
                (current_price < threshold, threshold)
            }
            RangeStatus::AboveRange => {
                let threshold =
                    upper_threshold_price(tick_to_price(position.tick_upper, shift), self.config.threshold_percent);
                (current_price > threshold, threshold)
            }
            RangeStatus::InRange => return Some(SkipReason::InRange),
        };

        (!crossed).then_some(SkipReason::BelowThreshold {
            current_price,
            threshold_price,
        })
    }

    pub async fn stats(&self) -> RebalanceStats {
        let counters = self.run_state.snapshot().await;
        RebalanceStats {
            enabled: self.is_enabled(),
            in_progress: self.run_state.is_in_progress(),
            last_rebalance_at: counters.last_rebalance_at,
            rebalance_count_today: counters.rebalance_count_today,
            max_daily_rebalances: self.config.max_daily_rebalances,
            count_reset_at: counters.count_reset_at,
            out_of_range_since: counters.out_of_range_since,
            consecutive_failures: counters.consecutive_failures,
        }
    }
}
