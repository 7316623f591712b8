// src/core/events.rs - Trade Events
//! Trade notification events emitted by order books
//!
//! Every executed trade produces one [`TradeTick`] delivered through the
//! book's trade callback. The callback runs while the book lock is held, so
//! implementations must stay cheap and must never take the engine lock; the
//! engine satisfies this by routing ticks into the per-symbol VWAP calculator
//! registry, which is independently locked.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::core::types::{Price, Quantity, Symbol};

/// A single executed trade
#[derive(Debug, Clone, Serialize)]
pub struct TradeTick {
    /// Symbol the trade printed on
    pub symbol: Symbol,
    /// Execution price
    pub price: Price,
    /// Executed quantity
    pub quantity: Quantity,
    /// Wall-clock execution time
    pub timestamp: DateTime<Utc>,
}

impl TradeTick {
    /// Create a tick stamped with the current time
    pub fn new(symbol: impl Into<Symbol>, price: Price, quantity: Quantity) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            quantity,
            timestamp: Utc::now(),
        }
    }

    /// Notional value of the trade
    pub fn notional(&self) -> f64 {
        self.price * self.quantity
    }
}

/// Hook invoked by a book after each executed trade
pub type TradeCallback = Arc<dyn Fn(&TradeTick) + Send + Sync>;
