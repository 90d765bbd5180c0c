use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

// ============================================================================
// Chain Errors
// ============================================================================

/// Classified failure reported by the pool/transaction client.
///
/// The classification drives the retry policy: transient variants are
/// retried with backoff, terminal variants surface immediately, and
/// `ConfirmationTimeout` is ambiguous (the transaction may still land).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChainError {
    // ========================================================================
    // Transient I/O
    // ========================================================================

    /// Endpoint throttled the request
    #[error("Rate limited: {message}")]
    RateLimited { message: String },

    /// Connection refused, reset or dropped
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Request did not complete before its deadline
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    // ========================================================================
    // Terminal on-chain
    // ========================================================================

    /// Account missing or in an unexpected state
    #[error("Invalid account {account}: {reason}")]
    InvalidAccount { account: Pubkey, reason: String },

    /// Request rejected as malformed
    #[error("Malformed request: {message}")]
    MalformedRequest { message: String },

    /// Liquidity or token amount below the program minimum
    #[error("Liquidity too small: {message}")]
    LiquidityTooSmall { message: String },

    /// Wallet cannot fund the operation
    #[error("Insufficient balance: {message}")]
    InsufficientBalance { message: String },

    /// Transaction landed but failed
    #[error("Transaction failed ({transaction_id:?}): {error}")]
    TransactionFailed { error: String, transaction_id: Option<String> },

    /// Unclassified RPC error
    #[error("RPC error (code {code:?}): {message}")]
    Rpc { message: String, code: Option<i32> },

    // ========================================================================
    // Ambiguous
    // ========================================================================

    /// Submitted, but confirmation did not arrive in time
    #[error("Confirmation of {transaction_id} timed out after {timeout_ms}ms; check the transaction manually")]
    ConfirmationTimeout { transaction_id: String, timeout_ms: u64 },
}

impl ChainError {
    /// Whether the failure is worth retrying with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }

    /// Whether the outcome of a submitted transaction is unknown
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::ConfirmationTimeout { .. })
    }

    /// Map a raw RPC or program message onto the error taxonomy
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();
        let message = message.to_string();

        if lower.contains("429") || lower.contains("too many requests") || lower.contains("rate limit") {
            Self::RateLimited { message }
        } else if lower.contains("econnreset")
            || lower.contains("econnrefused")
            || lower.contains("connection reset")
            || lower.contains("connection refused")
            || lower.contains("socket hang up")
            || lower.contains("network error")
            || lower.contains("timed out")
            || lower.contains("503")
            || lower.contains("502")
        {
            Self::Connection { message }
        } else if lower.contains("insufficient funds")
            || lower.contains("insufficient balance")
            || lower.contains("insufficient lamports")
        {
            Self::InsufficientBalance { message }
        } else if lower.contains("liquiditytoosmall")
            || lower.contains("liquidity too small")
            || lower.contains("amount too small")
            || lower.contains("zero liquidity")
        {
            Self::LiquidityTooSmall { message }
        } else if lower.contains("invalid params") || lower.contains("invalid request") || lower.contains("malformed") {
            Self::MalformedRequest { message }
        } else {
            Self::Rpc { message, code: None }
        }
    }

    /// Create a connection error
    pub fn connection(message: &str) -> Self {
        Self::Connection {
            message: message.to_string(),
        }
    }

    /// Create an RPC error
    pub fn rpc_error(message: &str, code: Option<i32>) -> Self {
        Self::Rpc {
            message: message.to_string(),
            code,
        }
    }

    /// Create an invalid account error
    pub fn invalid_account(account: Pubkey, reason: &str) -> Self {
        Self::InvalidAccount {
            account,
            reason: reason.to_string(),
        }
    }

    /// Create a failed transaction error
    pub fn transaction_failed(error: &str, transaction_id: Option<&str>) -> Self {
        Self::TransactionFailed {
            error: error.to_string(),
            transaction_id: transaction_id.map(|s| s.to_string()),
        }
    }
}

// ============================================================================
// Invariant Errors
// ============================================================================

/// Programming invariant violations; never retried
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantError {
    #[error("No active position is tracked")]
    NoActivePosition,

    #[error("Invalid tick range: lower {lower} must be below upper {upper}")]
    InvalidTickRange { lower: i32, upper: i32 },

    #[error("Tick {tick} outside [{min_tick}, {max_tick}]")]
    TickOutOfBounds { tick: i32, min_tick: i32, max_tick: i32 },
}
