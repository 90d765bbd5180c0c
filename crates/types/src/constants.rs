//! Constants shared by the keeper and its collaborators

// ============================================================================
// Tick and Price Constants
// ============================================================================

/// Price ratio between two adjacent ticks: price = TICK_BASE^tick
pub const TICK_BASE: f64 = 1.0001;

/// Minimum tick value
pub const MIN_TICK: i32 = -443_636;

/// Maximum tick value
pub const MAX_TICK: i32 = 443_636;

// ============================================================================
// Rebalance Defaults
// ============================================================================

/// Price deviation beyond the range bound required to act (percent)
pub const DEFAULT_REBALANCE_THRESHOLD_PERCENT: f64 = 5.0;

/// Minimum spacing between two successful rebalances (minutes)
pub const DEFAULT_MIN_REBALANCE_INTERVAL_MINUTES: i64 = 60;

/// Minimum continuous out-of-range time before acting (minutes)
pub const DEFAULT_MIN_OUT_OF_RANGE_MINUTES: i64 = 15;

/// Width of a freshly opened range around the current price (percent)
pub const DEFAULT_POSITION_WIDTH_PERCENT: f64 = 20.0;

/// Daily quota of successful rebalances
pub const DEFAULT_MAX_DAILY_REBALANCES: u32 = 6;

/// Share of the old position's liquidity withdrawn during a rebalance (percent)
pub const DEFAULT_WITHDRAW_PERCENT: u32 = 90;

/// Ceiling on the mean recent priority fee (micro-lamports per compute unit)
pub const DEFAULT_MAX_PRIORITY_FEE_MICRO_LAMPORTS: u64 = 100_000;

// ============================================================================
// Scheduling Defaults
// ============================================================================

/// Monitor polling interval (milliseconds)
pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 60_000;

/// Absolute timeout for a single read RPC attempt (seconds)
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 20;

/// Absolute timeout for a transaction submission (seconds)
pub const DEFAULT_SUBMIT_TIMEOUT_SECS: u64 = 30;

/// Absolute timeout for a confirmation wait (seconds)
pub const DEFAULT_CONFIRM_TIMEOUT_SECS: u64 = 30;

/// Percentage denominator
pub const PERCENT_DENOMINATOR: u32 = 100;
