pub mod chain;
pub mod clock;
pub mod config;
pub mod decision;
pub mod error;
pub mod executor;
pub mod fees;
pub mod keeper;
pub mod monitor;
pub mod persistence;
pub mod quota;
pub mod retry;
pub mod run_state;
pub mod simulated;
pub mod tracker;

pub use chain::{ChainClient, ChainGateway, Confirmation, SubmittedOperation};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{KeeperConfig, MonitorConfig, PositionConfig, RebalanceConfig, RetryConfig, TimeoutConfig};
pub use decision::{Decision, RebalanceDecisionEngine, RebalanceStats, SkipReason};
pub use error::{KeeperError, KeeperResult};
pub use executor::{RebalanceExecutor, RebalanceOutcome};
pub use fees::{FeeCheck, NetworkFeeGate, PriorityFeeSource, RpcPriorityFeeSource};
pub use keeper::{HealthReport, KeeperStats, RangeKeeper, RebalancingAction};
pub use monitor::{MonitorStatus, Observation, PassObserver, PositionMonitor};
pub use persistence::{InMemoryStore, JsonFileStore, PersistenceStore};
pub use quota::DailyQuotaClock;
pub use run_state::{RebalanceRunState, RunCounters};
pub use simulated::SimulatedChainClient;
pub use tracker::PositionStateTracker;
