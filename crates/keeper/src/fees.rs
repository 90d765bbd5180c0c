//! Network priority fee sampling for the rebalance fee gate

use std::sync::Arc;

use async_trait::async_trait;
use range_types::{ChainError, ChainResult};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

/// Source of recent prioritization fees (micro-lamports per compute unit)
#[async_trait]
pub trait PriorityFeeSource: Send + Sync {
    async fn recent_priority_fees(&self) -> ChainResult<Vec<u64>>;
}

/// Samples `getRecentPrioritizationFees` for the accounts a rebalance writes
pub struct RpcPriorityFeeSource {
    rpc_client: Arc<RpcClient>,
    accounts: Vec<Pubkey>,
}

impl RpcPriorityFeeSource {
    pub fn new(rpc_url: String, accounts: Vec<Pubkey>) -> Self {
        Self {
            rpc_client: Arc::new(RpcClient::new(rpc_url)),
            accounts,
        }
    }
}

#[async_trait]
impl PriorityFeeSource for RpcPriorityFeeSource {
    async fn recent_priority_fees(&self) -> ChainResult<Vec<u64>> {
        let fees = self
            .rpc_client
            .get_recent_prioritization_fees(&self.accounts)
            .await
            .map_err(|e| ChainError::classify(&e.to_string()))?;

        Ok(fees.into_iter().map(|fee| fee.prioritization_fee).collect())
    }
}

/// Verdict of the network fee check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FeeCheck {
    Acceptable { mean: f64 },
    TooHigh { mean: f64, ceiling: u64 },
    /// No data; treated as acceptable
    Unavailable,
}

impl FeeCheck {
    pub fn is_acceptable(&self) -> bool {
        !matches!(self, FeeCheck::TooHigh { .. })
    }
}

/// Compares the mean recent priority fee to a fixed ceiling
pub struct NetworkFeeGate {
    source: Option<Arc<dyn PriorityFeeSource>>,
    ceiling: u64,
}

impl NetworkFeeGate {
    pub fn new(source: Option<Arc<dyn PriorityFeeSource>>, ceiling: u64) -> Self {
        Self { source, ceiling }
    }

    pub async fn check(&self) -> FeeCheck {
        let Some(source) = &self.source else {
            return FeeCheck::Unavailable;
        };

        match source.recent_priority_fees().await {
            Ok(samples) => self.evaluate(&samples),
            Err(e) => {
                warn!(error = %e, "Priority fee sample unavailable, treating as acceptable");
                FeeCheck::Unavailable
            }
        }
    }

    /// Judge a sample without touching the network
    pub fn evaluate(&self, samples: &[u64]) -> FeeCheck {
        if samples.is_empty() {
            return FeeCheck::Unavailable;
        }

        let mean = samples.iter().map(|&fee| fee as f64).sum::<f64>() / samples.len() as f64;
        debug!(mean, ceiling = self.ceiling, samples = samples.len(), "Sampled priority fees");

        if mean > self.ceiling as f64 {
            FeeCheck::TooHigh {
                mean,
                ceiling: self.ceiling,
            }
        } else {
            FeeCheck::Acceptable { mean }
        }
    }
}
