//! # Engine Configuration
//!
//! Tunables for the reservation engine, constructed once at startup and
//! injected into the [`Engine`](crate::Engine). There is no module-level
//! mutable state anywhere in the engine; everything flows through this
//! struct and the service object that owns it.

use std::time::Duration;

use soko_core::{DEFAULT_RESERVATION_TTL_MINUTES, MAX_CART_ITEMS};

/// Engine configuration.
///
/// ## Example
/// ```rust,ignore
/// let config = EngineConfig::default()
///     .reservation_ttl(chrono::Duration::minutes(15))
///     .sweep_interval(Duration::from_secs(30));
/// let engine = Engine::new(db, config);
/// ```
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a reservation holds stock before the sweeper reclaims it.
    pub reservation_ttl: chrono::Duration,

    /// How often the background sweeper scans for expired holds.
    pub sweep_interval: Duration,

    /// Maximum reservations/carts processed per sweep cycle.
    pub sweep_batch: i64,

    /// Bounded wait for a per-key stock lock before LockTimeout.
    pub lock_wait: Duration,

    /// Global minimum order value (cents); zero disables the check.
    pub min_order_cents: i64,

    /// Global maximum order value (cents); None disables the check.
    pub max_order_cents: Option<i64>,

    /// Global maximum distinct line items per cart.
    pub max_cart_items: usize,
}

impl EngineConfig {
    /// Sets the reservation TTL.
    pub fn reservation_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.reservation_ttl = ttl;
        self
    }

    /// Sets the sweep interval.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Sets the per-key lock wait bound.
    pub fn lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    /// Sets the global order value bounds.
    pub fn order_bounds(mut self, min_cents: i64, max_cents: Option<i64>) -> Self {
        self.min_order_cents = min_cents;
        self.max_order_cents = max_cents;
        self
    }

    /// Sets the maximum distinct line items per cart.
    pub fn max_cart_items(mut self, max: usize) -> Self {
        self.max_cart_items = max;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            reservation_ttl: chrono::Duration::minutes(DEFAULT_RESERVATION_TTL_MINUTES),
            sweep_interval: Duration::from_secs(60),
            sweep_batch: 500,
            lock_wait: Duration::from_secs(5),
            min_order_cents: 0,
            max_order_cents: None,
            max_cart_items: MAX_CART_ITEMS,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.reservation_ttl, chrono::Duration::minutes(30));
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.max_cart_items, 100);
    }

    #[test]
    fn test_builder() {
        let config = EngineConfig::default()
            .reservation_ttl(chrono::Duration::minutes(10))
            .order_bounds(500, Some(1_000_000));

        assert_eq!(config.reservation_ttl, chrono::Duration::minutes(10));
        assert_eq!(config.min_order_cents, 500);
        assert_eq!(config.max_order_cents, Some(1_000_000));
    }
}
