//! Port to the pool/transaction client and the retry/timeout policy around it

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use range_types::{ChainError, ChainOperation, ChainResult, PoolState, PositionState, TransactionReceipt};
use solana_sdk::pubkey::Pubkey;
use tracing::{debug, warn};

use crate::config::{RetryConfig, TimeoutConfig};
use crate::retry::{with_retry, with_timeout};

/// Pool and position client. Key management, tick rounding and instruction
/// construction live behind this trait.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current tick and price of a pool
    async fn get_pool_state(&self, pool_id: &Pubkey) -> ChainResult<PoolState>;

    /// Current liquidity, fees and bounds of a position
    async fn get_position_state(&self, position_id: &Pubkey) -> ChainResult<PositionState>;

    /// Build, sign and send one operation
    async fn build_and_submit(&self, operation: &ChainOperation) -> ChainResult<TransactionReceipt>;

    /// Wait for a submitted transaction to be confirmed
    async fn confirm(&self, transaction_id: &str, timeout: Duration) -> ChainResult<()>;
}

/// Whether a submitted transaction was seen confirmed
#[derive(Debug, Clone, PartialEq)]
pub enum Confirmation {
    Confirmed,
    /// Deadline passed; the transaction may still land
    Unknown,
    /// Sent, then rejected or failed on chain
    Failed(ChainError),
}

/// A submitted operation and what is known about its confirmation
#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedOperation {
    pub receipt: TransactionReceipt,
    pub confirmation: Confirmation,
}

/// Chain client wrapped with the keeper's retry and deadline policy
#[derive(Clone)]
pub struct ChainGateway {
    client: Arc<dyn ChainClient>,
    retry: RetryConfig,
    timeouts: TimeoutConfig,
}

impl ChainGateway {
    pub fn new(client: Arc<dyn ChainClient>, retry: RetryConfig, timeouts: TimeoutConfig) -> Self {
        Self {
            client,
            retry,
            timeouts,
        }
    }

    /// Fetch pool state with per-attempt deadline and backoff
    pub async fn fetch_pool_state(&self, pool_id: &Pubkey) -> ChainResult<PoolState> {
        let deadline = self.timeouts.rpc();
        with_retry(&self.retry, "get_pool_state", || {
            with_timeout(deadline, self.client.get_pool_state(pool_id))
        })
        .await
    }

    /// Fetch position state with per-attempt deadline and backoff
    pub async fn fetch_position_state(&self, position_id: &Pubkey) -> ChainResult<PositionState> {
        let deadline = self.timeouts.rpc();
        with_retry(&self.retry, "get_position_state", || {
            with_timeout(deadline, self.client.get_position_state(position_id))
        })
        .await
    }

    /// Submit one operation and wait for confirmation.
    ///
    /// Submission is never retried: a timed-out send may still have landed.
    /// Once the transaction is sent its receipt is always returned: a
    /// confirmation timeout is `Confirmation::Unknown`, any other confirmation
    /// error is `Confirmation::Failed`.
    pub async fn submit_and_confirm(&self, operation: &ChainOperation) -> ChainResult<SubmittedOperation> {
        let receipt = with_timeout(self.timeouts.submit(), self.client.build_and_submit(operation)).await?;
        debug!(operation = %operation, transaction = %receipt.transaction_id, "Submitted");

        let confirm_timeout = self.timeouts.confirm();
        let confirmation = match with_timeout(
            confirm_timeout,
            self.client.confirm(&receipt.transaction_id, confirm_timeout),
        )
        .await
        {
            Ok(()) => Confirmation::Confirmed,
            Err(ChainError::Timeout { .. }) | Err(ChainError::ConfirmationTimeout { .. }) => {
                let ambiguous = ChainError::ConfirmationTimeout {
                    transaction_id: receipt.transaction_id.clone(),
                    timeout_ms: confirm_timeout.as_millis() as u64,
                };
                warn!(operation = %operation, transaction = %receipt.transaction_id, "{}", ambiguous);
                Confirmation::Unknown
            }
            Err(err) => {
                warn!(
                    operation = %operation,
                    transaction = %receipt.transaction_id,
                    error = %err,
                    "Confirmation failed"
                );
                Confirmation::Failed(err)
            }
        };

        Ok(SubmittedOperation { receipt, confirmation })
    }
}
