//! Typed views of pool/position state and the operations the keeper submits

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::fmt;

use crate::serde_helpers::pubkey_serde;

// ============================================================================
// Read Results
// ============================================================================

/// Current pool price as reported by the chain client
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PoolState {
    pub current_tick: i32,
    pub current_price: f64,
}

/// Current on-chain state of one position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    #[serde(with = "pubkey_serde")]
    pub pool_id: Pubkey,
    pub tick_lower: i32,
    pub tick_upper: i32,
    pub liquidity: u128,
    pub fee_owed_a: u128,
    pub fee_owed_b: u128,
}

// ============================================================================
// Operations
// ============================================================================

/// One on-chain operation with its parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainOperation {
    /// Open a position whose bounds the client rounds to valid ticks
    OpenPosition {
        #[serde(with = "pubkey_serde")]
        pool_id: Pubkey,
        price_lower: f64,
        price_upper: f64,
    },
    AddLiquidity {
        #[serde(with = "pubkey_serde")]
        position_id: Pubkey,
        liquidity: u128,
    },
    RemoveLiquidity {
        #[serde(with = "pubkey_serde")]
        position_id: Pubkey,
        liquidity: u128,
    },
    ClaimFees {
        #[serde(with = "pubkey_serde")]
        position_id: Pubkey,
    },
    ClosePosition {
        #[serde(with = "pubkey_serde")]
        position_id: Pubkey,
    },
}

impl ChainOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenPosition { .. } => "open_position",
            Self::AddLiquidity { .. } => "add_liquidity",
            Self::RemoveLiquidity { .. } => "remove_liquidity",
            Self::ClaimFees { .. } => "claim_fees",
            Self::ClosePosition { .. } => "close_position",
        }
    }
}

impl fmt::Display for ChainOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Submission Results
// ============================================================================

/// Accounts created by an `open_position` transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenedPosition {
    #[serde(with = "pubkey_serde")]
    pub position_id: Pubkey,
    #[serde(with = "pubkey_serde")]
    pub position_owner_token_id: Pubkey,
    pub tick_lower: i32,
    pub tick_upper: i32,
}

/// Result of a submitted transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_id: String,
    /// Present only for `open_position`
    pub opened: Option<OpenedPosition>,
}

impl TransactionReceipt {
    pub fn new(transaction_id: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            opened: None,
        }
    }

    pub fn with_opened(transaction_id: impl Into<String>, opened: OpenedPosition) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            opened: Some(opened),
        }
    }
}
