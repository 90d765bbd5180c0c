use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use range_types::constants::*;
use range_types::serde_helpers::pubkey_serde;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;

use crate::error::{KeeperError, KeeperResult};

/// Prefix for environment overrides, e.g. `RANGE_KEEPER__REBALANCE__ENABLED=false`
pub const ENV_PREFIX: &str = "RANGE_KEEPER";

/// Keeper configuration loaded from TOML file and environment
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct KeeperConfig {
    /// Solana cluster name, for logging
    pub cluster: String,

    /// JSON-RPC endpoint used to sample priority fees
    pub rpc_url: Option<String>,

    /// Position to manage at startup
    pub position: PositionConfig,

    /// Auto-rebalance policy
    pub rebalance: RebalanceConfig,

    /// Monitor cadence
    pub monitor: MonitorConfig,

    /// Retry configuration for read RPCs
    pub retry: RetryConfig,

    /// Absolute deadlines for RPCs and transactions
    pub timeouts: TimeoutConfig,

    /// Snapshot and history storage
    pub storage: StorageConfig,

    /// Log output
    pub logging: LoggingConfig,

    /// Paper-trading chain used by the binary
    pub simulation: SimulationConfig,
}

/// Identity of the managed position
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PositionConfig {
    #[serde(with = "pubkey_serde")]
    pub pool_id: Pubkey,

    #[serde(with = "pubkey_serde")]
    pub position_id: Pubkey,

    #[serde(with = "pubkey_serde")]
    pub owner_token_id: Pubkey,
}

/// Auto-rebalance policy
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RebalanceConfig {
    /// Initial state of the runtime enable flag
    pub enabled: bool,

    /// Required price deviation beyond the crossed bound (percent)
    pub threshold_percent: f64,

    /// Minimum time between successful rebalances
    pub min_rebalance_interval_minutes: i64,

    /// Minimum continuous time out of range before acting
    pub min_out_of_range_minutes: i64,

    /// Width of the new range around the current price (percent)
    pub position_width_percent: f64,

    /// Successful rebalances allowed per UTC day
    pub max_daily_rebalances: u32,

    /// Share of liquidity pulled from the old position (percent)
    pub withdraw_percent: u32,

    /// Liquidity deposited into the new position; defaults to the withdrawn amount.
    ///
    /// TOML and environment integers are signed 64-bit, so a configured amount
    /// tops out at `i64::MAX`; the executor widens it to `u128`. Amounts beyond
    /// that are only reachable through the default (redeposit what was withdrawn).
    pub redeposit_liquidity: Option<u64>,

    /// Withdraw everything and close the old position after redepositing
    pub close_previous_position: bool,

    /// Ceiling on the mean recent priority fee (micro-lamports per CU)
    pub max_priority_fee_micro_lamports: u64,

    /// Decimal scaling applied to tick prices (decimals_a - decimals_b)
    pub decimal_shift: i32,
}

/// Monitor cadence
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Interval between monitoring passes in milliseconds
    pub interval_ms: u64,
}

/// Retry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries for failed operations
    pub max_retries: u32,

    /// Base delay between retries in milliseconds
    pub base_delay_ms: u64,

    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,

    /// Exponential backoff multiplier
    pub backoff_multiplier: f64,
}

/// Absolute deadlines
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub rpc_timeout_secs: u64,
    pub submit_timeout_secs: u64,
    pub confirm_timeout_secs: u64,
}

/// Snapshot and history storage
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for JSON-lines files; in-memory when unset
    pub data_dir: Option<PathBuf>,
}

/// Log output
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

/// Random-walk pool used in paper mode
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub initial_tick: i32,
    /// Maximum tick move per pool read
    pub tick_volatility: u32,
    /// Half-width of the initial position in ticks
    pub initial_half_width_ticks: i32,
    pub initial_liquidity: u64,
    /// Fee accrued per pool read while in range
    pub fee_per_read: u64,
    pub seed: u64,
}

impl KeeperConfig {
    /// Load configuration from an optional TOML file layered under environment overrides
    pub fn load(path: &str) -> KeeperResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::new(path, config::FileFormat::Toml).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: KeeperConfig = settings.try_deserialize()?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save(&self, path: &str) -> KeeperResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| KeeperError::Serialization(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> KeeperResult<()> {
        self.position.validate()?;
        self.rebalance.validate()?;

        if self.monitor.interval_ms == 0 {
            return Err(KeeperError::invalid_parameter("monitor.interval_ms", "0", "greater than 0"));
        }

        self.retry.validate()?;
        self.timeouts.validate()?;

        Ok(())
    }
}

impl PositionConfig {
    fn validate(&self) -> KeeperResult<()> {
        for (name, key) in [
            ("position.pool_id", &self.pool_id),
            ("position.position_id", &self.position_id),
            ("position.owner_token_id", &self.owner_token_id),
        ] {
            if *key == Pubkey::default() {
                return Err(KeeperError::invalid_parameter(name, &key.to_string(), "a non-default pubkey"));
            }
        }
        Ok(())
    }
}

impl RebalanceConfig {
    fn validate(&self) -> KeeperResult<()> {
        if !(self.threshold_percent >= 0.0 && self.threshold_percent < 100.0) {
            return Err(KeeperError::invalid_parameter(
                "rebalance.threshold_percent",
                &self.threshold_percent.to_string(),
                "in [0, 100)",
            ));
        }

        // Lower edge is price * (1 - w/200) and must stay positive
        if !(self.position_width_percent > 0.0 && self.position_width_percent < 200.0) {
            return Err(KeeperError::invalid_parameter(
                "rebalance.position_width_percent",
                &self.position_width_percent.to_string(),
                "in (0, 200)",
            ));
        }

        if self.min_rebalance_interval_minutes < 0 {
            return Err(KeeperError::invalid_parameter(
                "rebalance.min_rebalance_interval_minutes",
                &self.min_rebalance_interval_minutes.to_string(),
                "non-negative",
            ));
        }

        if self.min_out_of_range_minutes < 0 {
            return Err(KeeperError::invalid_parameter(
                "rebalance.min_out_of_range_minutes",
                &self.min_out_of_range_minutes.to_string(),
                "non-negative",
            ));
        }

        if self.max_daily_rebalances == 0 {
            return Err(KeeperError::invalid_parameter("rebalance.max_daily_rebalances", "0", "greater than 0"));
        }

        if self.withdraw_percent == 0 || self.withdraw_percent > PERCENT_DENOMINATOR {
            return Err(KeeperError::invalid_parameter(
                "rebalance.withdraw_percent",
                &self.withdraw_percent.to_string(),
                "in [1, 100]",
            ));
        }

        if self.redeposit_liquidity == Some(0) {
            return Err(KeeperError::invalid_parameter("rebalance.redeposit_liquidity", "0", "greater than 0 or unset"));
        }

        Ok(())
    }

    pub fn min_rebalance_interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.min_rebalance_interval_minutes)
    }

    pub fn min_out_of_range(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.min_out_of_range_minutes)
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl RetryConfig {
    /// Validate retry configuration
    fn validate(&self) -> KeeperResult<()> {
        if self.max_retries == 0 {
            return Err(KeeperError::invalid_parameter("max_retries", "0", "greater than 0"));
        }

        if self.base_delay_ms == 0 {
            return Err(KeeperError::invalid_parameter("base_delay_ms", "0", "greater than 0"));
        }

        if self.max_delay_ms < self.base_delay_ms {
            return Err(KeeperError::invalid_parameter(
                "max_delay_ms",
                &self.max_delay_ms.to_string(),
                &format!("greater than or equal to base_delay_ms ({})", self.base_delay_ms),
            ));
        }

        if self.backoff_multiplier <= 1.0 {
            return Err(KeeperError::invalid_parameter(
                "backoff_multiplier",
                &self.backoff_multiplier.to_string(),
                "greater than 1.0",
            ));
        }

        Ok(())
    }

    /// Calculate delay for retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        if attempt == 0 {
            return self.base_delay_ms;
        }

        let exponential_delay = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        (exponential_delay as u64).min(self.max_delay_ms)
    }
}

impl TimeoutConfig {
    fn validate(&self) -> KeeperResult<()> {
        for (name, value) in [
            ("timeouts.rpc_timeout_secs", self.rpc_timeout_secs),
            ("timeouts.submit_timeout_secs", self.submit_timeout_secs),
            ("timeouts.confirm_timeout_secs", self.confirm_timeout_secs),
        ] {
            if value == 0 {
                return Err(KeeperError::invalid_parameter(name, "0", "greater than 0"));
            }
        }
        Ok(())
    }

    pub fn rpc(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn submit(&self) -> Duration {
        Duration::from_secs(self.submit_timeout_secs)
    }

    pub fn confirm(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            cluster: "mainnet".to_string(),
            rpc_url: None,
            position: PositionConfig::default(),
            rebalance: RebalanceConfig::default(),
            monitor: MonitorConfig::default(),
            retry: RetryConfig::default(),
            timeouts: TimeoutConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold_percent: DEFAULT_REBALANCE_THRESHOLD_PERCENT,
            min_rebalance_interval_minutes: DEFAULT_MIN_REBALANCE_INTERVAL_MINUTES,
            min_out_of_range_minutes: DEFAULT_MIN_OUT_OF_RANGE_MINUTES,
            position_width_percent: DEFAULT_POSITION_WIDTH_PERCENT,
            max_daily_rebalances: DEFAULT_MAX_DAILY_REBALANCES,
            withdraw_percent: DEFAULT_WITHDRAW_PERCENT,
            redeposit_liquidity: None,
            close_previous_position: false,
            max_priority_fee_micro_lamports: DEFAULT_MAX_PRIORITY_FEE_MICRO_LAMPORTS,
            decimal_shift: 0,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: DEFAULT_MONITOR_INTERVAL_MS,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            rpc_timeout_secs: DEFAULT_RPC_TIMEOUT_SECS,
            submit_timeout_secs: DEFAULT_SUBMIT_TIMEOUT_SECS,
            confirm_timeout_secs: DEFAULT_CONFIRM_TIMEOUT_SECS,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            initial_tick: -30_000,
            tick_volatility: 150,
            initial_half_width_ticks: 1_000,
            initial_liquidity: 1_000_000,
            fee_per_read: 25,
            seed: 7,
        }
    }
}

/// Create example configuration file
pub fn create_example_config(path: &str) -> KeeperResult<()> {
    let parse = |s: &str| {
        Pubkey::from_str(s).map_err(|e| KeeperError::InvalidConfig(format!("bad example pubkey {}: {}", s, e)))
    };

    let example_config = KeeperConfig {
        cluster: "devnet".to_string(),
        rpc_url: Some("https://api.devnet.solana.com".to_string()),
        position: PositionConfig {
            pool_id: parse("11111111111111111111111111111112")?,
            position_id: parse("11111111111111111111111111111113")?,
            owner_token_id: parse("11111111111111111111111111111114")?,
        },
        rebalance: RebalanceConfig {
            enabled: true,
            ..RebalanceConfig::default()
        },
        monitor: MonitorConfig { interval_ms: 10_000 },
        storage: StorageConfig {
            data_dir: Some(PathBuf::from("./data")),
        },
        ..KeeperConfig::default()
    };

    example_config.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> KeeperConfig {
        KeeperConfig {
            position: PositionConfig {
                pool_id: Pubkey::new_unique(),
                position_id: Pubkey::new_unique(),
                owner_token_id: Pubkey::new_unique(),
            },
            ..KeeperConfig::default()
        }
    }

    #[test]
    fn test_defaults_match_documented_policy() {
        let rebalance = RebalanceConfig::default();
        assert!(!rebalance.enabled);
        assert_eq!(rebalance.threshold_percent, 5.0);
        assert_eq!(rebalance.min_rebalance_interval_minutes, 60);
        assert_eq!(rebalance.min_out_of_range_minutes, 15);
        assert_eq!(rebalance.position_width_percent, 20.0);
        assert_eq!(rebalance.max_daily_rebalances, 6);
        assert_eq!(rebalance.withdraw_percent, 90);
        assert_eq!(MonitorConfig::default().interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_config_validation() {
        let mut config = valid_config();
        assert!(config.validate().is_ok());

        // Missing position identity
        config.position.pool_id = Pubkey::default();
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.rebalance.position_width_percent = 200.0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.rebalance.withdraw_percent = 101;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.monitor.interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_delay_calculation() {
        let retry_config = RetryConfig::default();

        assert_eq!(retry_config.delay_for_attempt(0), 1000);
        assert_eq!(retry_config.delay_for_attempt(1), 2000);
        assert_eq!(retry_config.delay_for_attempt(2), 4000);

        // Should cap at max_delay_ms
        assert_eq!(retry_config.delay_for_attempt(10), 30_000);
    }

    #[test]
    fn test_example_config_round_trips_through_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keeper.toml");
        let path = path.to_str().unwrap();

        create_example_config(path).unwrap();
        let loaded = KeeperConfig::load(path).unwrap();

        assert_eq!(loaded.cluster, "devnet");
        assert!(loaded.rebalance.enabled);
        assert_eq!(loaded.monitor.interval_ms, 10_000);
        assert_eq!(loaded.position.position_id.to_string(), "11111111111111111111111111111113");
    }

    #[test]
    fn test_partial_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        let toml = format!(
            concat!(
                "[position]\npool_id = \"{}\"\nposition_id = \"{}\"\nowner_token_id = \"{}\"\n\n",
                "[rebalance]\nthreshold_percent = 7\n",
            ),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique()
        );
        std::fs::write(&path, toml).unwrap();

        let loaded = KeeperConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.rebalance.threshold_percent, 7.0);
        assert_eq!(loaded.rebalance.max_daily_rebalances, 6);
        assert_eq!(loaded.retry.max_retries, 3);
    }

    #[test]
    fn test_redeposit_liquidity_accepts_largest_file_integer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("redeposit.toml");
        let toml = format!(
            concat!(
                "[position]\npool_id = \"{}\"\nposition_id = \"{}\"\nowner_token_id = \"{}\"\n\n",
                "[rebalance]\nredeposit_liquidity = {}\n",
            ),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            Pubkey::new_unique(),
            i64::MAX
        );
        std::fs::write(&path, toml).unwrap();

        let loaded = KeeperConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.rebalance.redeposit_liquidity, Some(i64::MAX as u64));
        assert!(loaded.validate().is_ok());
    }
}
