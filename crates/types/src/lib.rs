//! Shared types for the range keeper
//!
//! Data model, classified errors and tick/price helpers used by the
//! keeper service and by the chain and persistence adapters it talks to.

pub mod chain;
pub mod constants;
pub mod errors;
pub mod math;
pub mod position;
pub mod range;
pub mod records;
pub mod serde_helpers;

// Re-export all public types
pub use chain::*;
pub use constants::*;
pub use errors::*;
pub use math::*;
pub use position::*;
pub use range::*;
pub use records::*;

/// Result type alias for chain-facing operations
pub type ChainResult<T> = std::result::Result<T, ChainError>;
