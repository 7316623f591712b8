// src/core/order.rs - Order Domain Models and Business Logic
//! Core order domain model, tag-dispatched order kinds, and state transitions
//!
//! Every order carries one [`OrderKind`] variant holding exactly the data that
//! kind needs. Conditional kinds are retyped in place when they trigger:
//!
//! ```text
//! StopLoss ─────trigger────► Market  (sweeps the opposite side)
//! TrailingStop ─trigger────► Market  (sweeps the opposite side)
//! StopLimit ────trigger────► Limit   (rests at limit_price)
//! ```
//!
//! Statuses map onto the numeric wire codes used by the status query:
//! Pending=0, Filled=1, PartialFilled=2, Cancelled=3, Rejected=4.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fmt::{self, Display},
    str::FromStr,
    time::Instant,
};

use crate::core::types::{ClientId, OrderId, Price, Quantity, Symbol};
use crate::VenueError;

/// Order side - Buy or Sell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    /// Buy order - bids for shares
    Buy,
    /// Sell order - offers shares
    Sell,
}

impl OrderSide {
    /// The side this order trades against
    pub fn opposite(self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for OrderSide {
    type Err = VenueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" | "B" => Ok(Self::Buy),
            "SELL" | "S" => Ok(Self::Sell),
            _ => Err(VenueError::Protocol(format!("Invalid order side: {}", s))),
        }
    }
}

/// Order status over its lifetime
///
/// The discriminants are the numeric codes reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OrderStatus {
    /// Order is live: resting, conditional, or working a schedule
    Pending = 0,
    /// Order has been completely filled
    Filled = 1,
    /// Order executed partially; the remainder was dropped
    PartialFilled = 2,
    /// Order was cancelled by its owner
    Cancelled = 3,
    /// Order was rejected (validation failure or no liquidity)
    Rejected = 4,
}

impl OrderStatus {
    /// Numeric code used by the status query
    pub fn wire_code(self) -> u8 {
        self as u8
    }

    /// Terminal statuses never change again
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Filled => write!(f, "FILLED"),
            Self::PartialFilled => write!(f, "PARTIAL_FILLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// Execution state of a VWAP parent order
#[derive(Debug, Clone)]
pub struct VwapState {
    /// Target VWAP price the schedule works toward
    pub target_vwap: Price,
    /// Start of the execution window
    pub start_time: Instant,
    /// End of the execution window
    pub end_time: Instant,
    /// Ids of every child limit order placed so far
    pub child_order_ids: Vec<OrderId>,
    /// Last known cumulative fill per child; progress accumulates deltas
    /// against this map so a child touched twice is never double counted
    pub child_fills: HashMap<OrderId, Quantity>,
    /// Limit price of the most recent child order
    pub last_child_order_price: Price,
    /// Placement time of the most recent child order
    pub last_child_order_time: Option<Instant>,
}

impl VwapState {
    /// Fresh execution state for the given window
    pub fn new(target_vwap: Price, start_time: Instant, end_time: Instant) -> Self {
        Self {
            target_vwap,
            start_time,
            end_time,
            child_order_ids: Vec::new(),
            child_fills: HashMap::new(),
            last_child_order_price: 0.0,
            last_child_order_time: None,
        }
    }
}

/// Order kind, one data shape per type
#[derive(Debug, Clone)]
pub enum OrderKind {
    /// Execute immediately against the best available prices
    Market,
    /// Rest in the book at the given price
    Limit {
        /// Limit price
        price: Price,
    },
    /// Becomes a market order when the last trade crosses the stop level
    StopLoss {
        /// Current trigger level
        stop_price: Price,
    },
    /// Becomes a limit order at `limit_price` when the stop level is crossed
    StopLimit {
        /// Current trigger level
        stop_price: Price,
        /// Price the converted limit order will rest at
        limit_price: Price,
    },
    /// Stop level trails the most favorable observed trade price
    TrailingStop {
        /// Current trigger level, moved as the market runs favorably
        stop_price: Price,
        /// Absolute distance maintained between watermark and stop level
        trailing_amount: Price,
        /// Highest observed trade price (sell-side watermark)
        highest_price: Price,
        /// Lowest observed trade price (buy-side watermark), 0 = uninitialised
        lowest_price: Price,
    },
    /// Parent order worked by the VWAP scheduler
    Vwap(VwapState),
}

impl OrderKind {
    /// Trailing stop with side-appropriate initial trigger level: a sell
    /// trailing stop starts at 0 and a buy trailing stop at +inf, so neither
    /// can fire before the first watermark update
    pub fn trailing_stop(side: OrderSide, trailing_amount: Price) -> Self {
        let stop_price = match side {
            OrderSide::Sell => 0.0,
            OrderSide::Buy => f64::INFINITY,
        };
        Self::TrailingStop {
            stop_price,
            trailing_amount,
            highest_price: 0.0,
            lowest_price: 0.0,
        }
    }

    /// VWAP parent kind for the given target and execution window
    pub fn vwap(target_vwap: Price, start_time: Instant, end_time: Instant) -> Self {
        Self::Vwap(VwapState::new(target_vwap, start_time, end_time))
    }

    /// Wire token for this kind
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Market => "MARKET",
            Self::Limit { .. } => "LIMIT",
            Self::StopLoss { .. } => "STOP_LOSS",
            Self::StopLimit { .. } => "STOP_LIMIT",
            Self::TrailingStop { .. } => "TRAILING_STOP",
            Self::Vwap(_) => "VWAP",
        }
    }
}

impl Display for OrderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Main order structure
#[derive(Debug, Clone)]
pub struct Order {
    /// Engine-assigned order id
    pub id: OrderId,
    /// Trading symbol
    pub symbol: Symbol,
    /// Order side
    pub side: OrderSide,
    /// Order kind with kind-specific data
    pub kind: OrderKind,
    /// Total order quantity
    pub quantity: Quantity,
    /// Quantity filled so far, `0 <= filled_quantity <= quantity`
    pub filled_quantity: Quantity,
    /// Current status
    pub status: OrderStatus,
    /// Owning client
    pub client_id: ClientId,
    /// Monotonic submission time, the price-time priority tie-breaker
    pub timestamp: Instant,
    /// Wall-clock creation time for reporting
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Create a new pending order
    pub fn new(
        id: OrderId,
        symbol: impl Into<Symbol>,
        side: OrderSide,
        kind: OrderKind,
        quantity: Quantity,
        client_id: impl Into<ClientId>,
    ) -> Self {
        Self {
            id,
            symbol: symbol.into(),
            side,
            kind,
            quantity,
            filled_quantity: 0.0,
            status: OrderStatus::Pending,
            client_id: client_id.into(),
            timestamp: Instant::now(),
            created_at: Utc::now(),
        }
    }

    /// Quantity still open
    pub fn remaining_quantity(&self) -> Quantity {
        self.quantity - self.filled_quantity
    }

    /// Record a fill; marks the order [`OrderStatus::Filled`] once saturated
    pub fn apply_fill(&mut self, fill_quantity: Quantity) {
        self.filled_quantity += fill_quantity;
        if self.filled_quantity >= self.quantity {
            self.status = OrderStatus::Filled;
        }
    }

    /// True for the conditional kinds held in a book's stop list
    pub fn is_conditional(&self) -> bool {
        matches!(
            self.kind,
            OrderKind::StopLoss { .. } | OrderKind::StopLimit { .. } | OrderKind::TrailingStop { .. }
        )
    }

    /// True for market orders
    pub fn is_market(&self) -> bool {
        matches!(self.kind, OrderKind::Market)
    }

    /// True for VWAP parent orders
    pub fn is_vwap(&self) -> bool {
        matches!(self.kind, OrderKind::Vwap(_))
    }

    /// Resting price for limit orders, `None` otherwise
    pub fn limit_price(&self) -> Option<Price> {
        match self.kind {
            OrderKind::Limit { price } => Some(price),
            _ => None,
        }
    }

    /// Current trigger level for conditional orders, `None` otherwise
    pub fn trigger_price(&self) -> Option<Price> {
        match self.kind {
            OrderKind::StopLoss { stop_price }
            | OrderKind::StopLimit { stop_price, .. }
            | OrderKind::TrailingStop { stop_price, .. } => Some(stop_price),
            _ => None,
        }
    }

    /// Target VWAP for parent orders, `None` otherwise
    pub fn target_vwap(&self) -> Option<Price> {
        match &self.kind {
            OrderKind::Vwap(state) => Some(state.target_vwap),
            _ => None,
        }
    }

    /// VWAP execution state for parent orders
    pub fn vwap_state(&self) -> Option<&VwapState> {
        match &self.kind {
            OrderKind::Vwap(state) => Some(state),
            _ => None,
        }
    }

    /// Mutable VWAP execution state for parent orders
    pub fn vwap_state_mut(&mut self) -> Option<&mut VwapState> {
        match &mut self.kind {
            OrderKind::Vwap(state) => Some(state),
            _ => None,
        }
    }

    /// Whether a conditional order should fire against the given last trade
    /// price. A non-positive last price suppresses all evaluation.
    pub fn should_trigger(&self, last_trade_price: Price) -> bool {
        if last_trade_price <= 0.0 {
            return false;
        }
        let Some(stop_price) = self.trigger_price() else {
            return false;
        };
        match self.side {
            OrderSide::Sell => last_trade_price <= stop_price,
            OrderSide::Buy => last_trade_price >= stop_price,
        }
    }

    /// Move a trailing stop's watermark and trigger level toward a favorable
    /// last trade price. Sells track the highest trade and keep the stop
    /// `trailing_amount` below it; buys track the lowest trade and keep the
    /// stop `trailing_amount` above it.
    pub fn update_trailing_stop(&mut self, last_trade_price: Price) {
        let side = self.side;
        let id = self.id;
        let OrderKind::TrailingStop {
            stop_price,
            trailing_amount,
            highest_price,
            lowest_price,
        } = &mut self.kind
        else {
            return;
        };
        match side {
            OrderSide::Sell => {
                if last_trade_price > *highest_price {
                    *highest_price = last_trade_price;
                    *stop_price = last_trade_price - *trailing_amount;
                    tracing::debug!(
                        order_id = id,
                        highest = *highest_price,
                        stop = *stop_price,
                        "trailing stop updated"
                    );
                }
            }
            OrderSide::Buy => {
                if last_trade_price < *lowest_price || *lowest_price == 0.0 {
                    *lowest_price = last_trade_price;
                    *stop_price = last_trade_price + *trailing_amount;
                    tracing::debug!(
                        order_id = id,
                        lowest = *lowest_price,
                        stop = *stop_price,
                        "trailing stop updated"
                    );
                }
            }
        }
    }

    /// Retype a triggered stop-loss or trailing stop into a market order
    pub fn convert_to_market(&mut self) {
        self.kind = OrderKind::Market;
    }

    /// Retype a triggered stop-limit into a limit order at its limit price.
    /// Returns false when the order is not a stop-limit.
    pub fn convert_to_limit(&mut self) -> bool {
        match self.kind {
            OrderKind::StopLimit { limit_price, .. } => {
                self.kind = OrderKind::Limit { price: limit_price };
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limit_order(id: OrderId, side: OrderSide, price: Price, quantity: Quantity) -> Order {
        Order::new(id, "AAPL", side, OrderKind::Limit { price }, quantity, "C1")
    }

    #[test]
    fn test_side_conversions() {
        assert_eq!("BUY".parse::<OrderSide>().unwrap(), OrderSide::Buy);
        assert_eq!("sell".parse::<OrderSide>().unwrap(), OrderSide::Sell);
        assert!("HOLD".parse::<OrderSide>().is_err());
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.to_string(), "SELL");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(OrderStatus::Pending.wire_code(), 0);
        assert_eq!(OrderStatus::Filled.wire_code(), 1);
        assert_eq!(OrderStatus::PartialFilled.wire_code(), 2);
        assert_eq!(OrderStatus::Cancelled.wire_code(), 3);
        assert_eq!(OrderStatus::Rejected.wire_code(), 4);
        assert!(OrderStatus::Filled.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
    }

    #[test]
    fn test_fills_saturate_status() {
        let mut order = limit_order(1, OrderSide::Buy, 150.0, 100.0);
        order.apply_fill(30.0);
        assert_eq!(order.filled_quantity, 30.0);
        assert_eq!(order.remaining_quantity(), 70.0);
        assert_eq!(order.status, OrderStatus::Pending);

        order.apply_fill(70.0);
        assert_eq!(order.remaining_quantity(), 0.0);
        assert_eq!(order.status, OrderStatus::Filled);
    }

    #[test]
    fn test_stop_loss_trigger_levels() {
        let sell_stop = Order::new(
            1,
            "AAPL",
            OrderSide::Sell,
            OrderKind::StopLoss { stop_price: 140.0 },
            10.0,
            "C1",
        );
        assert!(!sell_stop.should_trigger(0.0));
        assert!(!sell_stop.should_trigger(141.0));
        assert!(sell_stop.should_trigger(140.0));
        assert!(sell_stop.should_trigger(139.0));

        let buy_stop = Order::new(
            2,
            "AAPL",
            OrderSide::Buy,
            OrderKind::StopLoss { stop_price: 160.0 },
            10.0,
            "C1",
        );
        assert!(!buy_stop.should_trigger(159.0));
        assert!(buy_stop.should_trigger(160.0));
        assert!(buy_stop.should_trigger(161.0));
    }

    #[test]
    fn test_trailing_stop_sell_watermark() {
        let mut order = Order::new(
            1,
            "AAPL",
            OrderSide::Sell,
            OrderKind::trailing_stop(OrderSide::Sell, 5.0),
            10.0,
            "C1",
        );
        // fresh sell trailing stop cannot trigger
        assert!(!order.should_trigger(100.0));

        order.update_trailing_stop(100.0);
        assert_eq!(order.trigger_price(), Some(95.0));

        // market runs up, stop follows
        order.update_trailing_stop(110.0);
        assert_eq!(order.trigger_price(), Some(105.0));

        // market falls back, stop holds
        order.update_trailing_stop(107.0);
        assert_eq!(order.trigger_price(), Some(105.0));
        assert!(order.should_trigger(104.0));
        assert!(!order.should_trigger(106.0));
    }

    #[test]
    fn test_trailing_stop_buy_watermark() {
        let mut order = Order::new(
            1,
            "AAPL",
            OrderSide::Buy,
            OrderKind::trailing_stop(OrderSide::Buy, 2.0),
            10.0,
            "C1",
        );
        assert!(!order.should_trigger(50.0));

        order.update_trailing_stop(50.0);
        assert_eq!(order.trigger_price(), Some(52.0));

        order.update_trailing_stop(48.0);
        assert_eq!(order.trigger_price(), Some(50.0));

        order.update_trailing_stop(49.0);
        assert_eq!(order.trigger_price(), Some(50.0));
        assert!(order.should_trigger(50.0));
        assert!(!order.should_trigger(49.5));
    }

    #[test]
    fn test_stop_limit_conversion() {
        let mut order = Order::new(
            1,
            "AAPL",
            OrderSide::Sell,
            OrderKind::StopLimit {
                stop_price: 410.0,
                limit_price: 405.0,
            },
            30.0,
            "C1",
        );
        assert!(order.convert_to_limit());
        assert_eq!(order.limit_price(), Some(405.0));
        assert!(!order.is_conditional());

        let mut market = limit_order(2, OrderSide::Buy, 100.0, 1.0);
        assert!(!market.convert_to_limit());
    }

    #[test]
    fn test_vwap_state_accessors() {
        let now = Instant::now();
        let mut order = Order::new(
            1,
            "AAPL",
            OrderSide::Buy,
            OrderKind::vwap(100.0, now, now + std::time::Duration::from_secs(600)),
            500.0,
            "C1",
        );
        assert_eq!(order.target_vwap(), Some(100.0));
        assert!(order.is_vwap());

        let state = order.vwap_state_mut().unwrap();
        state.child_order_ids.push(9);
        state.child_fills.insert(9, 10.0);
        assert_eq!(order.vwap_state().unwrap().child_order_ids, vec![9]);
    }
}
