// src/engine/vwap.rs - VWAP Calculation and Child Order Sizing
//! Trade-aware VWAP calculator advising the execution scheduler
//!
//! The calculator consumes every executed trade on its symbol and maintains
//! two views: the volume-weighted mean over the full period, and a rolling
//! VWAP over the most recent window (5 minutes by default). From these it
//! derives the limit price and size of the next child order for a VWAP
//! parent, and a gate deciding whether placing one now is worthwhile.

use std::{
    collections::VecDeque,
    time::{Duration, Instant},
};
use tracing::debug;

use crate::constants::{MIN_CHILD_ORDER_INTERVAL_SECS, MIN_CHILD_REPRICE_FRACTION};
use crate::core::{
    order::{Order, OrderSide},
    types::{Price, Quantity},
};

/// One recorded trade in the rolling window
#[derive(Debug, Clone, Copy)]
struct RecordedTrade {
    price: Price,
    volume: Quantity,
    timestamp: Instant,
}

/// Advised parameters for the next child order
#[derive(Debug, Clone, Copy, Default)]
pub struct ChildOrderParams {
    /// Limit price for the child order
    pub limit_price: Price,
    /// Child order quantity
    pub quantity: Quantity,
    /// Whether a child order should be placed at all
    pub should_place: bool,
}

/// Per-symbol trade-aware VWAP calculator
pub struct VwapCalculator {
    start_time: Instant,
    end_time: Instant,
    rolling_window: Duration,

    vwap_accumulator: f64,
    volume_accumulator: f64,
    current_vwap: Price,

    rolling_trades: VecDeque<RecordedTrade>,
    rolling_vwap_accumulator: f64,
    rolling_volume_accumulator: f64,
}

impl VwapCalculator {
    /// Calculator for the given execution window with the default 5-minute
    /// rolling window
    pub fn new(start_time: Instant, end_time: Instant) -> Self {
        Self::with_rolling_window(
            start_time,
            end_time,
            Duration::from_secs(crate::constants::VWAP_ROLLING_WINDOW_SECS),
        )
    }

    /// Calculator with an explicit rolling window length
    pub fn with_rolling_window(
        start_time: Instant,
        end_time: Instant,
        rolling_window: Duration,
    ) -> Self {
        Self {
            start_time,
            end_time,
            rolling_window,
            vwap_accumulator: 0.0,
            volume_accumulator: 0.0,
            current_vwap: 0.0,
            rolling_trades: VecDeque::new(),
            rolling_vwap_accumulator: 0.0,
            rolling_volume_accumulator: 0.0,
        }
    }

    /// Record an executed trade. Non-positive inputs are ignored. Every trade
    /// feeds the full-period VWAP; only trades inside the execution window
    /// enter the rolling accumulators.
    pub fn add_trade(&mut self, price: Price, volume: Quantity) {
        if price <= 0.0 || volume <= 0.0 {
            return;
        }
        let now = Instant::now();

        self.vwap_accumulator += price * volume;
        self.volume_accumulator += volume;
        self.current_vwap = if self.volume_accumulator > 0.0 {
            self.vwap_accumulator / self.volume_accumulator
        } else {
            0.0
        };

        if now >= self.start_time && now <= self.end_time {
            self.rolling_trades.push_back(RecordedTrade {
                price,
                volume,
                timestamp: now,
            });
            self.rolling_vwap_accumulator += price * volume;
            self.rolling_volume_accumulator += volume;
            self.evict_stale(now);
        }
    }

    /// Full-period VWAP, 0 before the first trade
    pub fn current_vwap(&self) -> Price {
        self.current_vwap
    }

    /// Rolling-window VWAP, 0 when the window holds no volume
    pub fn rolling_vwap(&self) -> Price {
        if self.rolling_volume_accumulator > 0.0 {
            self.rolling_vwap_accumulator / self.rolling_volume_accumulator
        } else {
            0.0
        }
    }

    /// Traded volume currently inside the rolling window
    pub fn rolling_volume(&self) -> Quantity {
        self.rolling_volume_accumulator
    }

    /// Drop rolling entries older than the window, subtracting their
    /// contribution from the accumulators
    fn evict_stale(&mut self, now: Instant) {
        let cutoff = now.checked_sub(self.rolling_window);
        let Some(cutoff) = cutoff else {
            return;
        };
        while let Some(front) = self.rolling_trades.front() {
            if front.timestamp >= cutoff {
                break;
            }
            self.rolling_vwap_accumulator -= front.price * front.volume;
            self.rolling_volume_accumulator -= front.volume;
            self.rolling_trades.pop_front();
        }
    }

    /// Compute the next child order for a VWAP parent.
    ///
    /// Sizing: the per-minute share of the remaining quantity, scaled by a
    /// rolling-volume factor clamped to [0.5, 2.0] and boosted 1.5x when the
    /// market VWAP has drifted more than 1% from target.
    ///
    /// Pricing: quote at target while the market VWAP is on the favorable
    /// side; nudge 0.1% past target while it is within 1% on the adverse
    /// side; stand aside entirely beyond that.
    ///
    /// Gate: place only when 30 s have passed since the last child or the
    /// advised price moved at least 0.1% of target.
    pub fn calculate_child_order_params(
        &self,
        vwap_order: &Order,
        remaining_quantity: Quantity,
        target_vwap: Price,
    ) -> ChildOrderParams {
        let mut params = ChildOrderParams::default();
        let now = Instant::now();

        if remaining_quantity <= 0.0 || target_vwap <= 0.0 {
            return params;
        }
        let Some(state) = vwap_order.vwap_state() else {
            return params;
        };

        if now < state.start_time || now > state.end_time {
            return params;
        }
        let time_remaining = state.end_time.saturating_duration_since(now).as_secs_f64();
        if time_remaining <= 0.0 {
            return params;
        }

        params.quantity = self.optimal_quantity(remaining_quantity, time_remaining, target_vwap);

        let deviation = self.deviation(target_vwap);
        match vwap_order.side {
            OrderSide::Buy => {
                if self.current_vwap <= target_vwap {
                    params.limit_price = target_vwap;
                } else if deviation <= 0.01 {
                    // within 1% above target: shade just below to chase fills
                    params.limit_price = target_vwap * 0.999;
                } else {
                    return params;
                }
            }
            OrderSide::Sell => {
                if self.current_vwap >= target_vwap {
                    params.limit_price = target_vwap;
                } else if deviation >= -0.01 {
                    params.limit_price = target_vwap * 1.001;
                } else {
                    return params;
                }
            }
        }

        let elapsed_since_last = state
            .last_child_order_time
            .map(|t| now.saturating_duration_since(t).as_secs_f64())
            .unwrap_or(f64::INFINITY);
        let price_change_pct =
            (params.limit_price - state.last_child_order_price).abs() / target_vwap;

        params.should_place = elapsed_since_last >= MIN_CHILD_ORDER_INTERVAL_SECS as f64
            || price_change_pct >= MIN_CHILD_REPRICE_FRACTION;

        debug!(
            order_id = vwap_order.id,
            limit_price = params.limit_price,
            quantity = params.quantity,
            should_place = params.should_place,
            current_vwap = self.current_vwap,
            "child order params computed"
        );

        params
    }

    fn deviation(&self, target_vwap: Price) -> f64 {
        (self.current_vwap - target_vwap) / target_vwap
    }

    fn optimal_quantity(
        &self,
        remaining_quantity: Quantity,
        time_remaining_secs: f64,
        target_vwap: Price,
    ) -> Quantity {
        let base_quantity = remaining_quantity / (time_remaining_secs / 60.0);
        let volume_factor = (self.rolling_volume_accumulator / 1000.0).clamp(0.5, 2.0);
        let deviation_factor = if self.deviation(target_vwap).abs() > 0.01 {
            1.5
        } else {
            1.0
        };
        remaining_quantity.min(base_quantity * volume_factor * deviation_factor)
    }
}
