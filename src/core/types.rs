// src/core/types.rs - Core Type Definitions
//! Core type definitions used throughout the venue
//!
//! This module defines the fundamental types used across all modules to ensure
//! type safety and consistency throughout the system.

use serde::Serialize;

use crate::core::order::{OrderSide, OrderStatus};

/// Engine-assigned order identifier, monotonic from 1; 0 is reserved for
/// rejected submissions
pub type OrderId = u64;

/// Type alias for trading symbols
pub type Symbol = String;

/// Type alias for client identifiers
pub type ClientId = String;

/// Type alias for prices - using f64 exactly as the wire protocol does.
/// Note: in production systems, consider a decimal type for exact precision
pub type Price = f64;

/// Type alias for quantities
pub type Quantity = f64;

/// Top-of-book snapshot returned by the BOOK query
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BookSnapshot {
    /// Best bid price, 0 when the bid side is empty
    pub best_bid: Price,
    /// Best ask price, 0 when the ask side is empty
    pub best_ask: Price,
    /// Last trade price, 0 until the first trade
    pub last_price: Price,
}

/// Snapshot of one active VWAP parent, used by the VWAP_STATUS query
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct VwapOrderSnapshot {
    /// Parent order id
    pub id: OrderId,
    /// Parent side
    pub side: OrderSide,
    /// Target VWAP price
    pub target_vwap: Price,
    /// Quantity filled so far across completed children
    pub filled_quantity: Quantity,
    /// Total parent quantity
    pub quantity: Quantity,
    /// Current parent status
    pub status: OrderStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_book_snapshot_defaults() {
        let snap = BookSnapshot {
            best_bid: 0.0,
            best_ask: 0.0,
            last_price: 0.0,
        };
        assert_eq!(snap.best_bid, 0.0);
        assert_eq!(snap.best_ask, 0.0);
    }

    #[test]
    fn test_vwap_snapshot_fields() {
        let snap = VwapOrderSnapshot {
            id: 7,
            side: OrderSide::Buy,
            target_vwap: 100.0,
            filled_quantity: 25.0,
            quantity: 100.0,
            status: OrderStatus::PartialFilled,
        };
        assert_eq!(snap.id, 7);
        assert_eq!(snap.status.wire_code(), 2);
    }
}
