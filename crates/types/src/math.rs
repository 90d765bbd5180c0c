//! Tick and price conversions used by the keeper
//!
//! The keeper only needs floating-point prices for decisions; exact
//! tick rounding for instructions is left to the chain client.

use crate::constants::*;

// ============================================================================
// Tick <-> Price
// ============================================================================

/// Convert a tick index to a price: TICK_BASE^tick, scaled by 10^decimal_shift
pub fn tick_to_price(tick: i32, decimal_shift: i32) -> f64 {
    TICK_BASE.powi(tick) * 10f64.powi(decimal_shift)
}

/// Convert a price back to the tick at or below it
pub fn price_to_tick(price: f64, decimal_shift: i32) -> Option<i32> {
    if !price.is_finite() || price <= 0.0 {
        return None;
    }

    let unscaled = price / 10f64.powi(decimal_shift);
    let tick = (unscaled.ln() / TICK_BASE.ln()).floor();
    if tick < MIN_TICK as f64 || tick > MAX_TICK as f64 {
        return None;
    }
    Some(tick as i32)
}

// ============================================================================
// Range Construction
// ============================================================================

/// Linear price bounds of a new range
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceRange {
    pub lower: f64,
    pub upper: f64,
}

/// Symmetric range `[price*(1-w/2), price*(1+w/2)]` for a width of `w` percent
pub fn centered_price_range(price: f64, width_percent: f64) -> PriceRange {
    let half_width = width_percent / 100.0 / 2.0;
    PriceRange {
        lower: price * (1.0 - half_width),
        upper: price * (1.0 + half_width),
    }
}

/// Price below which a below-range position is worth moving
pub fn lower_threshold_price(lower_bound_price: f64, threshold_percent: f64) -> f64 {
    lower_bound_price * (1.0 - threshold_percent / 100.0)
}

/// Price above which an above-range position is worth moving
pub fn upper_threshold_price(upper_bound_price: f64, threshold_percent: f64) -> f64 {
    upper_bound_price * (1.0 + threshold_percent / 100.0)
}

// ============================================================================
// Analytics
// ============================================================================

/// Impermanent loss of a 50/50 exposure when price moves from `entry_price`
/// to `current_price`, as a (non-positive) fraction of the held value
pub fn estimate_impermanent_loss(entry_price: f64, current_price: f64) -> Option<f64> {
    if entry_price <= 0.0 || current_price <= 0.0 {
        return None;
    }
    let ratio = current_price / entry_price;
    Some(2.0 * ratio.sqrt() / (1.0 + ratio) - 1.0)
}

/// Geometric midpoint of a tick range, in price terms
pub fn range_mid_price(tick_lower: i32, tick_upper: i32, decimal_shift: i32) -> f64 {
    (tick_to_price(tick_lower, decimal_shift) * tick_to_price(tick_upper, decimal_shift)).sqrt()
}

/// Apply a whole-number percentage to a liquidity amount without overflow
pub fn percent_of(amount: u128, percent: u32) -> u128 {
    let percent = percent.min(PERCENT_DENOMINATOR) as u128;
    amount / PERCENT_DENOMINATOR as u128 * percent
        + amount % PERCENT_DENOMINATOR as u128 * percent / PERCENT_DENOMINATOR as u128
}
