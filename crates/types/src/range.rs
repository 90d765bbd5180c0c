use serde::{Deserialize, Serialize};
use std::fmt;

/// Where the pool's current tick sits relative to a position's bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeStatus {
    BelowRange,
    InRange,
    AboveRange,
}

impl RangeStatus {
    /// Classify `current_tick` against `[tick_lower, tick_upper)`.
    ///
    /// The lower bound is inclusive and the upper bound exclusive, so a tick
    /// sitting exactly on `tick_upper` is already above range.
    pub fn evaluate(current_tick: i32, tick_lower: i32, tick_upper: i32) -> Self {
        if current_tick < tick_lower {
            Self::BelowRange
        } else if current_tick >= tick_upper {
            Self::AboveRange
        } else {
            Self::InRange
        }
    }

    pub fn is_in_range(&self) -> bool {
        matches!(self, Self::InRange)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BelowRange => "below_range",
            Self::InRange => "in_range",
            Self::AboveRange => "above_range",
        }
    }
}

impl fmt::Display for RangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
