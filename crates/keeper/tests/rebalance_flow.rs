//! Decision and execution of rebalances against a scripted chain

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Duration as ChronoDuration;
use range_keeper::{
    Clock, InMemoryStore, ManualClock, NetworkFeeGate, PersistenceStore, PositionStateTracker, RebalanceConfig,
    RebalanceDecisionEngine, RebalanceExecutor, RebalanceRunState,
};
use range_types::{tick_to_price, ChainError, ChainOperation, PositionRecord, RangeStatus};
use solana_sdk::pubkey::Pubkey;

use common::*;

struct Fixture {
    clock: Arc<ManualClock>,
    client: Arc<MockChainClient>,
    tracker: Arc<PositionStateTracker>,
    run_state: Arc<RebalanceRunState>,
    store: Arc<InMemoryStore>,
    executor: RebalanceExecutor,
    engine: RebalanceDecisionEngine,
    record: PositionRecord,
}

impl Fixture {
    async fn new(config: RebalanceConfig) -> Self {
        let clock = Arc::new(ManualClock::new(start_time()));
        let client = Arc::new(MockChainClient::new(Pubkey::new_unique()));
        let tracker = Arc::new(PositionStateTracker::new(clock.clone()));
        let run_state = Arc::new(RebalanceRunState::new(clock.now()));
        let store = Arc::new(InMemoryStore::new());

        let executor = RebalanceExecutor::new(
            gateway(client.clone()),
            tracker.clone(),
            run_state.clone(),
            store.clone(),
            clock.clone(),
            config.clone(),
        );
        let fee_gate = NetworkFeeGate::new(None, 0);
        let engine = RebalanceDecisionEngine::new(config, run_state.clone(), clock.clone(), fee_gate);

        let mut record = seeded_record(&client, 1_000_000, clock.now());
        record.fee_owed_a = 500;
        record.fee_owed_b = 700;
        client.set_fees(&record.position_id, 500, 700);
        tracker.set(record.clone()).await;

        Self {
            clock,
            client,
            tracker,
            run_state,
            store,
            executor,
            engine,
            record,
        }
    }
}

fn above_range_price() -> f64 {
    tick_to_price(-20_000, 0)
}

#[tokio::test]
async fn test_successful_rebalance_moves_position() -> Result<()> {
    let f = Fixture::new(rebalance_config()).await;
    f.run_state.counters().await.out_of_range_since = Some(f.clock.now());
    f.clock.advance(ChronoDuration::minutes(20));

    let outcome = f.executor.execute(&f.record, above_range_price()).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert!(!outcome.skipped);
    assert_eq!(
        f.client.submitted_names(),
        vec!["claim_fees", "remove_liquidity", "open_position", "add_liquidity"]
    );
    assert_eq!(outcome.transaction_ids.len(), 4);

    // 90% withdrawn and redeposited, 10% left behind
    let submitted = f.client.submitted();
    assert!(matches!(submitted[1], ChainOperation::RemoveLiquidity { liquidity: 900_000, .. }));
    assert!(matches!(submitted[3], ChainOperation::AddLiquidity { liquidity: 900_000, .. }));
    assert_eq!(f.client.position(&f.record.position_id).unwrap().liquidity, 100_000);

    let active = f.tracker.get().await.unwrap();
    assert_ne!(active.position_id, f.record.position_id);
    assert_eq!(Some(&active), outcome.new_position.as_ref());
    assert_eq!(active.liquidity, 900_000);
    assert_eq!(active.range_status(-20_000), RangeStatus::InRange);

    let counters = f.run_state.snapshot().await;
    assert_eq!(counters.rebalance_count_today, 1);
    assert_eq!(counters.last_rebalance_at, Some(f.clock.now()));
    assert!(counters.out_of_range_since.is_none());
    assert!(!f.run_state.is_in_progress());

    let history = f.store.get_rebalance_history(&f.record.position_id, 10).await?;
    assert_eq!(history.len(), 1);
    assert!(history[0].success);
    assert_eq!(history[0].transaction_ids, outcome.transaction_ids);
    let metrics = history[0].metrics.as_ref().unwrap();
    assert_eq!((metrics.fees_collected_a, metrics.fees_collected_b), (500, 700));
    assert_eq!(metrics.old_range.tick_lower, TICK_LOWER);
    assert_eq!(metrics.new_range.unwrap().tick_lower, active.tick_lower);
    assert!(metrics.estimated_impermanent_loss.unwrap() < 0.0);

    Ok(())
}

/// A failed attempt is recorded but does not consume the daily quota or reset the cooldown
#[tokio::test]
async fn test_failed_step_does_not_consume_quota() -> Result<()> {
    let f = Fixture::new(rebalance_config()).await;
    let previous = f.clock.now() - ChronoDuration::hours(3);
    let since = f.clock.now() - ChronoDuration::minutes(30);
    {
        let mut counters = f.run_state.counters().await;
        counters.rebalance_count_today = 2;
        counters.last_rebalance_at = Some(previous);
        counters.out_of_range_since = Some(since);
    }
    f.client.fail_submission(
        "open_position",
        ChainError::InsufficientBalance {
            message: "insufficient lamports".into(),
        },
    );

    let outcome = f.executor.execute(&f.record, above_range_price()).await;

    assert!(!outcome.success);
    let error = outcome.error.unwrap();
    assert!(error.contains("insufficient_balance"), "{}", error);
    // Claim and withdraw landed before the failure
    assert_eq!(outcome.transaction_ids.len(), 2);

    let counters = f.run_state.snapshot().await;
    assert_eq!(counters.rebalance_count_today, 2);
    assert_eq!(counters.last_rebalance_at, Some(previous));
    assert_eq!(counters.out_of_range_since, Some(since));
    assert_eq!(counters.consecutive_failures, 1);

    // Tracker reflects the steps that completed
    let active = f.tracker.get().await.unwrap();
    assert_eq!(active.position_id, f.record.position_id);
    assert_eq!(active.liquidity, 100_000);
    assert_eq!((active.fee_owed_a, active.fee_owed_b), (0, 0));

    let history = f.store.get_rebalance_history(&f.record.position_id, 10).await?;
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
    assert!(history[0].error.as_deref().unwrap().contains("Insufficient balance"));
    assert!(history[0].metrics.is_none());

    let summary = f.store.get_rebalance_metrics().await?;
    assert_eq!((summary.total_attempts, summary.failed), (1, 1));

    Ok(())
}

#[tokio::test]
async fn test_liquidity_too_small_is_classified() {
    let f = Fixture::new(rebalance_config()).await;
    f.client.fail_submission(
        "remove_liquidity",
        ChainError::classify("Program log: Error: LiquidityTooSmall"),
    );

    let outcome = f.executor.execute(&f.record, above_range_price()).await;

    assert!(!outcome.success);
    assert!(outcome.error.unwrap().starts_with("[liquidity_too_small]"));
    assert_eq!(f.client.submitted_names(), vec!["claim_fees"]);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_executions_short_circuit() {
    let f = Fixture::new(rebalance_config()).await;
    f.client.set_submit_delay(Duration::from_secs(1));

    let price = above_range_price();
    let (first, second) = tokio::join!(
        f.executor.execute(&f.record, price),
        f.executor.execute(&f.record, price)
    );

    assert!(first.success);
    assert!(second.skipped);
    assert!(second.transaction_ids.is_empty());

    // Only one transaction set was produced and only one attempt recorded
    assert_eq!(f.client.submitted().len(), 4);
    assert_eq!(f.store.get_rebalance_metrics().await.unwrap().total_attempts, 1);
    assert_eq!(f.run_state.snapshot().await.rebalance_count_today, 1);
    assert!(!f.run_state.is_in_progress());
}

#[tokio::test(start_paused = true)]
async fn test_confirmation_timeout_is_not_a_failure() {
    let f = Fixture::new(rebalance_config()).await;
    f.client.hang_confirmations();

    let outcome = f.executor.execute(&f.record, above_range_price()).await;

    assert!(outcome.success, "{:?}", outcome.error);
    assert_eq!(outcome.transaction_ids.len(), 4);
}

/// A transaction that was sent but failed on chain still shows up in the outcome and history
#[tokio::test]
async fn test_failed_confirmation_keeps_transaction_id() -> Result<()> {
    let f = Fixture::new(rebalance_config()).await;
    f.client.fail_confirmation(
        "remove_liquidity",
        ChainError::transaction_failed("custom program error: 0x1771", None),
    );

    let outcome = f.executor.execute(&f.record, above_range_price()).await;

    assert!(!outcome.success);
    assert!(outcome.error.as_deref().unwrap().starts_with("[chain_rejected]"));
    assert_eq!(f.client.submitted_names(), vec!["claim_fees", "remove_liquidity"]);
    assert_eq!(outcome.transaction_ids.len(), f.client.submitted().len());
    assert!(outcome.transaction_ids[1].starts_with("tx-remove_liquidity-"));

    let history = f.store.get_rebalance_history(&f.record.position_id, 10).await?;
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
    assert_eq!(history[0].transaction_ids, outcome.transaction_ids);

    let counters = f.run_state.snapshot().await;
    assert_eq!(counters.rebalance_count_today, 0);
    assert_eq!(counters.consecutive_failures, 1);
    assert!(!f.run_state.is_in_progress());

    Ok(())
}

#[tokio::test]
async fn test_close_previous_position_drains_and_closes() {
    let f = Fixture::new(RebalanceConfig {
        close_previous_position: true,
        ..rebalance_config()
    })
    .await;

    let outcome = f.executor.execute(&f.record, above_range_price()).await;

    assert!(outcome.success);
    assert_eq!(
        f.client.submitted_names(),
        vec!["claim_fees", "remove_liquidity", "open_position", "add_liquidity", "close_position"]
    );
    assert!(f.client.position(&f.record.position_id).is_none());
    assert_eq!(f.tracker.get().await.unwrap().liquidity, 1_000_000);
}

#[tokio::test]
async fn test_failed_close_does_not_fail_rebalance() {
    let f = Fixture::new(RebalanceConfig {
        close_previous_position: true,
        ..rebalance_config()
    })
    .await;
    f.client
        .fail_submission("close_position", ChainError::invalid_account(f.record.position_id, "busy"));

    let outcome = f.executor.execute(&f.record, above_range_price()).await;

    assert!(outcome.success);
    assert_eq!(outcome.transaction_ids.len(), 4);
}

#[tokio::test]
async fn test_configured_redeposit_amount() {
    let f = Fixture::new(RebalanceConfig {
        redeposit_liquidity: Some(250_000),
        ..rebalance_config()
    })
    .await;

    let outcome = f.executor.execute(&f.record, above_range_price()).await;

    assert!(outcome.success);
    let submitted = f.client.submitted();
    assert!(matches!(submitted[3], ChainOperation::AddLiquidity { liquidity: 250_000, .. }));
    assert_eq!(f.tracker.get().await.unwrap().liquidity, 250_000);
}

#[tokio::test]
async fn test_unusable_price_fails_before_any_transaction() {
    let f = Fixture::new(rebalance_config()).await;

    let outcome = f.executor.execute(&f.record, 0.0).await;

    assert!(!outcome.success);
    assert!(f.client.submitted().is_empty());
    assert_eq!(f.run_state.snapshot().await.consecutive_failures, 1);
    assert_eq!(f.store.get_rebalance_metrics().await.unwrap().failed, 1);
}

/// Reference bounds with a decimal-scaled price: upper bound ~0.0100, threshold ~0.0106, price 0.063
#[tokio::test]
async fn test_reference_scenario_above_range() {
    let f = Fixture::new(RebalanceConfig {
        decimal_shift: -1,
        ..rebalance_config()
    })
    .await;

    // Excursion begins: clock starts, no action on the same pass
    assert!(!f.engine.should_rebalance(-20_000, &f.record, 0.063).await);
    assert_eq!(f.run_state.snapshot().await.out_of_range_since, Some(f.clock.now()));

    f.clock.advance(ChronoDuration::minutes(10));
    assert!(!f.engine.should_rebalance(-20_000, &f.record, 0.063).await);

    f.clock.advance(ChronoDuration::minutes(5));
    assert!(f.engine.should_rebalance(-20_000, &f.record, 0.063).await);
}

#[tokio::test]
async fn test_reference_scenario_in_range() {
    let f = Fixture::new(rebalance_config()).await;
    f.run_state.counters().await.out_of_range_since = Some(f.clock.now());

    assert_eq!(f.record.range_status(-30_000), RangeStatus::InRange);
    assert!(!f.engine.should_rebalance(-30_000, &f.record, tick_to_price(-30_000, 0)).await);
    assert!(f.run_state.snapshot().await.out_of_range_since.is_none());
}

#[tokio::test]
async fn test_quota_exhausted_after_max_daily() {
    let f = Fixture::new(RebalanceConfig {
        max_daily_rebalances: 1,
        min_rebalance_interval_minutes: 0,
        ..rebalance_config()
    })
    .await;

    let outcome = f.executor.execute(&f.record, above_range_price()).await;
    let moved = outcome.new_position.unwrap();

    // Far below the new range, long enough to pass every other gate
    let far_below = moved.tick_lower - 5_000;
    let price = tick_to_price(far_below, 0);
    f.engine.should_rebalance(far_below, &moved, price).await;
    f.clock.advance(ChronoDuration::hours(2));

    assert!(!f.engine.should_rebalance(far_below, &moved, price).await);
    let stats = f.engine.stats().await;
    assert_eq!(stats.rebalance_count_today, stats.max_daily_rebalances);
}
