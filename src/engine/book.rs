// src/engine/book.rs - Per-Symbol Limit Order Book
//! Price-time priority order book with conditional-order triggering
//!
//! The book owns every resting and conditional order in an id-keyed arena;
//! price levels and the conditional list hold order ids only, so an order is
//! reachable from exactly one place and status/fill updates happen in one
//! spot. Removing the id removes the order.
//!
//! ```text
//! Ask (Sell) Side                    Bid (Buy) Side
//! Price  | Orders (FIFO)             Price  | Orders (FIFO)
//! -------|--------------             -------|--------------
//! 150.05 | #12 #17                   149.95 | #9 #14
//! 150.03 | #15            <---->     149.92 | #3
//! 150.00 | #4    Best Ask/Bid        149.90 | #21 #22 #25
//! ```
//!
//! Matching takes the best bid against the best ask until the book no longer
//! crosses. Among equal prices the earlier order fills first; when both sides
//! are limit orders the older order's price wins (maker price). A crossing
//! pair from the same client never trades: the older order is evicted.

use parking_lot::Mutex;
use std::{
    cmp::Ordering as CmpOrdering,
    collections::{BTreeMap, HashMap, VecDeque},
};
use tracing::{debug, info, warn};

use crate::core::{
    events::{TradeCallback, TradeTick},
    order::{Order, OrderKind, OrderSide, OrderStatus},
    types::{BookSnapshot, OrderId, Price, Quantity, Symbol},
};

/// Wrapper for Price to enable total ordering as a BTreeMap key
#[derive(Debug, Clone, Copy, PartialEq)]
struct OrderedPrice(Price);

impl Eq for OrderedPrice {}

impl PartialOrd for OrderedPrice {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedPrice {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.0.partial_cmp(&other.0).unwrap_or(CmpOrdering::Equal)
    }
}

/// Order book for a single symbol
pub struct OrderBook {
    symbol: Symbol,
    inner: Mutex<BookInner>,
}

/// Book state guarded by the book lock
struct BookInner {
    symbol: Symbol,
    /// Authoritative order storage, keyed by id
    orders: HashMap<OrderId, Order>,
    /// Bid price levels; iterated highest-first for matching
    bids: BTreeMap<OrderedPrice, VecDeque<OrderId>>,
    /// Ask price levels; iterated lowest-first for matching
    asks: BTreeMap<OrderedPrice, VecDeque<OrderId>>,
    /// Conditional orders in insertion order
    stops: Vec<OrderId>,
    /// Price of the most recent execution, 0 until the first trade
    last_trade_price: Price,
    /// Hook invoked after every executed trade
    trade_callback: Option<TradeCallback>,
}

impl OrderBook {
    /// Create an empty book
    pub fn new(symbol: impl Into<Symbol>) -> Self {
        let symbol = symbol.into();
        Self {
            symbol: symbol.clone(),
            inner: Mutex::new(BookInner {
                symbol,
                orders: HashMap::new(),
                bids: BTreeMap::new(),
                asks: BTreeMap::new(),
                stops: Vec::new(),
                last_trade_price: 0.0,
                trade_callback: None,
            }),
        }
    }

    /// Symbol this book trades
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Install the hook called after each executed trade. The hook runs under
    /// the book lock and must not take the engine lock.
    pub fn set_trade_callback(&self, callback: TradeCallback) {
        self.inner.lock().trade_callback = Some(callback);
    }

    /// Add an order to the book.
    ///
    /// Conditional orders that already trigger against the last trade price
    /// execute immediately; otherwise they join the conditional list. Limit
    /// orders rest at their price level. Market orders do not rest and are
    /// not accepted here; they flow through [`Self::execute_market_order`].
    pub fn add_order(&self, order: Order) {
        self.inner.lock().add_order(order);
    }

    /// Cancel by id. Searches bids, asks, then the conditional list; silent
    /// no-op when the id is unknown.
    pub fn cancel_order(&self, order_id: OrderId) {
        self.inner.lock().cancel(order_id);
    }

    /// Run the matching loop, returning clones of every order that traded
    pub fn match_orders(&self) -> Vec<Order> {
        self.inner.lock().match_orders()
    }

    /// Evaluate the conditional list against the last trade price, updating
    /// trailing stops first and executing any order that triggers
    pub fn check_stop_orders(&self) {
        self.inner.lock().check_stop_orders();
    }

    /// Sweep the opposite side with a market order for at most `max_quantity`.
    /// Returns the executed quantity.
    pub fn execute_market_order(
        &self,
        market_order: &mut Order,
        opposite_side: OrderSide,
        max_quantity: Quantity,
    ) -> Quantity {
        self.inner
            .lock()
            .execute_market_order_internal(market_order, opposite_side, max_quantity)
    }

    /// Best bid price, 0 when the bid side is empty
    pub fn best_bid(&self) -> Price {
        self.inner.lock().best_price(OrderSide::Buy)
    }

    /// Best ask price, 0 when the ask side is empty
    pub fn best_ask(&self) -> Price {
        self.inner.lock().best_price(OrderSide::Sell)
    }

    /// Last trade price, 0 until the first trade
    pub fn last_price(&self) -> Price {
        self.inner.lock().last_trade_price
    }

    /// Top-of-book snapshot for the BOOK query
    pub fn snapshot(&self) -> BookSnapshot {
        let inner = self.inner.lock();
        BookSnapshot {
            best_bid: inner.best_price(OrderSide::Buy),
            best_ask: inner.best_price(OrderSide::Sell),
            last_price: inner.last_trade_price,
        }
    }

    /// Whether an order is still held by the book (resting or conditional)
    pub fn contains_order(&self, order_id: OrderId) -> bool {
        self.inner.lock().orders.contains_key(&order_id)
    }

    /// Number of orders waiting on the conditional list
    pub fn stop_order_count(&self) -> usize {
        self.inner.lock().stops.len()
    }
}

impl BookInner {
    fn add_order(&mut self, order: Order) {
        if order.is_conditional() {
            if order.should_trigger(self.last_trade_price) {
                self.execute_stop_order(order, "immediately");
                return;
            }
            let order_id = order.id;
            self.orders.insert(order_id, order);
            self.stops.push(order_id);
            return;
        }

        match order.kind {
            OrderKind::Limit { .. } => self.insert_resting(order),
            _ => warn!(
                order_id = order.id,
                kind = %order.kind,
                "order kind cannot rest in the book; dropped"
            ),
        }
    }

    fn insert_resting(&mut self, order: Order) {
        let Some(price) = order.limit_price() else {
            warn!(order_id = order.id, "resting order without a price; dropped");
            return;
        };
        let order_id = order.id;
        let level = match order.side {
            OrderSide::Buy => self.bids.entry(OrderedPrice(price)).or_default(),
            OrderSide::Sell => self.asks.entry(OrderedPrice(price)).or_default(),
        };
        level.push_back(order_id);
        self.orders.insert(order_id, order);
        debug!(order_id, price, "order resting");
    }

    fn cancel(&mut self, order_id: OrderId) {
        let (side, resting_price, conditional) = {
            let Some(order) = self.orders.get_mut(&order_id) else {
                return;
            };
            order.status = OrderStatus::Cancelled;
            (order.side, order.limit_price(), order.is_conditional())
        };

        if let Some(price) = resting_price {
            self.remove_resting(side, price, order_id);
        } else if conditional {
            self.stops.retain(|&id| id != order_id);
            self.orders.remove(&order_id);
        } else {
            self.orders.remove(&order_id);
        }
        debug!(order_id, "order cancelled");
    }

    /// Best non-empty level on a side without mutating the book
    fn best_price(&self, side: OrderSide) -> Price {
        let found = match side {
            OrderSide::Buy => self
                .bids
                .iter()
                .rev()
                .find(|(_, queue)| !queue.is_empty())
                .map(|(key, _)| key.0),
            OrderSide::Sell => self
                .asks
                .iter()
                .find(|(_, queue)| !queue.is_empty())
                .map(|(key, _)| key.0),
        };
        found.unwrap_or(0.0)
    }

    /// Best price level and front order id on a side, discarding any empty
    /// levels encountered on the way
    fn best_entry(&mut self, side: OrderSide) -> Option<(Price, OrderId)> {
        loop {
            let levels = match side {
                OrderSide::Buy => &mut self.bids,
                OrderSide::Sell => &mut self.asks,
            };
            let key = match side {
                OrderSide::Buy => levels.iter().next_back().map(|(key, _)| *key),
                OrderSide::Sell => levels.iter().next().map(|(key, _)| *key),
            }?;
            match levels.get(&key).and_then(|queue| queue.front()) {
                Some(&order_id) => return Some((key.0, order_id)),
                None => {
                    levels.remove(&key);
                }
            }
        }
    }

    fn remove_resting(&mut self, side: OrderSide, price: Price, order_id: OrderId) {
        let levels = match side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        };
        let key = OrderedPrice(price);
        if let Some(queue) = levels.get_mut(&key) {
            if let Some(pos) = queue.iter().position(|&id| id == order_id) {
                queue.remove(pos);
            }
            if queue.is_empty() {
                levels.remove(&key);
            }
        }
        self.orders.remove(&order_id);
    }

    fn match_orders(&mut self) -> Vec<Order> {
        let mut touched = Vec::new();

        loop {
            let Some((bid_price, buy_id)) = self.best_entry(OrderSide::Buy) else {
                break;
            };
            let Some((ask_price, sell_id)) = self.best_entry(OrderSide::Sell) else {
                break;
            };
            if bid_price < ask_price {
                break;
            }

            let Some((buy_client, buy_ts)) = self
                .orders
                .get(&buy_id)
                .map(|o| (o.client_id.clone(), o.timestamp))
            else {
                self.remove_resting(OrderSide::Buy, bid_price, buy_id);
                continue;
            };
            let Some((sell_client, sell_ts)) = self
                .orders
                .get(&sell_id)
                .map(|o| (o.client_id.clone(), o.timestamp))
            else {
                self.remove_resting(OrderSide::Sell, ask_price, sell_id);
                continue;
            };

            // Same client on both sides: evict the maker, no trade
            if buy_client == sell_client {
                if buy_ts < sell_ts {
                    debug!(order_id = buy_id, "self-trade prevented; older buy evicted");
                    self.remove_resting(OrderSide::Buy, bid_price, buy_id);
                } else {
                    debug!(order_id = sell_id, "self-trade prevented; older sell evicted");
                    self.remove_resting(OrderSide::Sell, ask_price, sell_id);
                }
                continue;
            }

            let traded = self.execute_pair(buy_id, sell_id);
            if traded {
                if let Some(order) = self.orders.get(&buy_id) {
                    touched.push(order.clone());
                }
                if let Some(order) = self.orders.get(&sell_id) {
                    touched.push(order.clone());
                }
            }

            let buy_done = self
                .orders
                .get(&buy_id)
                .map_or(true, |o| o.remaining_quantity() <= 0.0);
            if buy_done {
                self.remove_resting(OrderSide::Buy, bid_price, buy_id);
            }
            let sell_done = self
                .orders
                .get(&sell_id)
                .map_or(true, |o| o.remaining_quantity() <= 0.0);
            if sell_done {
                self.remove_resting(OrderSide::Sell, ask_price, sell_id);
            }
        }

        touched
    }

    fn execute_pair(&mut self, buy_id: OrderId, sell_id: OrderId) -> bool {
        let Some(mut buy) = self.orders.remove(&buy_id) else {
            return false;
        };
        let traded = match self.orders.get_mut(&sell_id) {
            Some(sell) => execute_trade(
                &self.symbol,
                &mut buy,
                sell,
                &mut self.last_trade_price,
                self.trade_callback.as_ref(),
            ),
            None => false,
        };
        self.orders.insert(buy_id, buy);
        traded
    }

    /// Sweep the opposite side best-first. Resting orders owned by the same
    /// client as the aggressor are removed rather than traded against.
    /// Assumes the book lock is already held.
    fn execute_market_order_internal(
        &mut self,
        market_order: &mut Order,
        opposite_side: OrderSide,
        max_quantity: Quantity,
    ) -> Quantity {
        let mut total_executed = 0.0;

        while total_executed < max_quantity {
            let Some((price, opposite_id)) = self.best_entry(opposite_side) else {
                break;
            };

            let same_client = self
                .orders
                .get(&opposite_id)
                .map_or(true, |o| o.client_id == market_order.client_id);
            if same_client {
                self.remove_resting(opposite_side, price, opposite_id);
                continue;
            }

            let available = self
                .orders
                .get(&opposite_id)
                .map_or(0.0, Order::remaining_quantity);
            let trade_quantity = available.min(max_quantity - total_executed);
            if trade_quantity <= 0.0 {
                break;
            }

            let Some(mut resting) = self.orders.remove(&opposite_id) else {
                break;
            };
            let traded = match market_order.side {
                OrderSide::Buy => execute_trade(
                    &self.symbol,
                    market_order,
                    &mut resting,
                    &mut self.last_trade_price,
                    self.trade_callback.as_ref(),
                ),
                OrderSide::Sell => execute_trade(
                    &self.symbol,
                    &mut resting,
                    market_order,
                    &mut self.last_trade_price,
                    self.trade_callback.as_ref(),
                ),
            };
            self.orders.insert(opposite_id, resting);
            if !traded {
                break;
            }
            total_executed += trade_quantity;

            let resting_done = self
                .orders
                .get(&opposite_id)
                .map_or(true, |o| o.remaining_quantity() <= 0.0);
            if resting_done {
                self.remove_resting(opposite_side, price, opposite_id);
            }
        }

        total_executed
    }

    fn check_stop_orders(&mut self) {
        if self.last_trade_price <= 0.0 {
            return;
        }

        let pending: Vec<OrderId> = self.stops.clone();
        for order_id in pending {
            // earlier triggers in this pass move the last trade price
            let last = self.last_trade_price;
            let triggered = {
                let Some(order) = self.orders.get_mut(&order_id) else {
                    continue;
                };
                if matches!(order.kind, OrderKind::TrailingStop { .. }) {
                    order.update_trailing_stop(last);
                }
                order.should_trigger(last)
            };
            if triggered {
                self.stops.retain(|&id| id != order_id);
                if let Some(order) = self.orders.remove(&order_id) {
                    self.execute_stop_order(order, "after price movement");
                }
            }
        }
    }

    /// Execute a triggered conditional order: stop-loss and trailing stops
    /// sweep as market orders; stop-limits convert to resting limits and are
    /// left for the normal matcher.
    fn execute_stop_order(&mut self, mut order: Order, context: &str) {
        info!(
            order_id = order.id,
            kind = %order.kind,
            last_price = self.last_trade_price,
            "stop order triggered {}",
            context
        );

        match order.kind {
            OrderKind::StopLimit { .. } => {
                if order.convert_to_limit() {
                    info!(
                        order_id = order.id,
                        price = order.limit_price().unwrap_or(0.0),
                        "stop limit converted to resting limit order"
                    );
                    self.insert_resting(order);
                }
            }
            OrderKind::StopLoss { .. } | OrderKind::TrailingStop { .. } => {
                order.convert_to_market();
                let opposite = order.side.opposite();
                let max_quantity = order.quantity;
                let executed = self.execute_market_order_internal(&mut order, opposite, max_quantity);

                if executed >= max_quantity {
                    order.status = OrderStatus::Filled;
                    info!(order_id = order.id, executed, "stop order fully executed");
                } else if executed > 0.0 {
                    order.status = OrderStatus::PartialFilled;
                    info!(
                        order_id = order.id,
                        executed,
                        quantity = order.quantity,
                        "stop order partially executed; remainder dropped"
                    );
                } else {
                    order.status = OrderStatus::Rejected;
                    warn!(order_id = order.id, "stop order rejected: no liquidity");
                }
            }
            _ => {}
        }
    }
}

/// Execute one trade between a buy and a sell order.
///
/// Price selection: a market aggressor trades at the resting order's price;
/// between two limit orders the older order's price wins (maker price).
/// Returns false when there is no overlapping quantity.
fn execute_trade(
    symbol: &str,
    buy: &mut Order,
    sell: &mut Order,
    last_trade_price: &mut Price,
    callback: Option<&TradeCallback>,
) -> bool {
    let trade_quantity = buy.remaining_quantity().min(sell.remaining_quantity());
    if trade_quantity <= 0.0 {
        return false;
    }

    let trade_price = if buy.is_market() {
        sell.limit_price().unwrap_or(*last_trade_price)
    } else if sell.is_market() {
        buy.limit_price().unwrap_or(*last_trade_price)
    } else if buy.timestamp < sell.timestamp {
        buy.limit_price().unwrap_or(*last_trade_price)
    } else {
        sell.limit_price().unwrap_or(*last_trade_price)
    };

    buy.apply_fill(trade_quantity);
    sell.apply_fill(trade_quantity);
    *last_trade_price = trade_price;

    if let Some(callback) = callback {
        callback(&TradeTick::new(symbol, trade_price, trade_quantity));
    }

    info!(
        symbol,
        price = trade_price,
        quantity = trade_quantity,
        buyer = %buy.client_id,
        seller = %sell.client_id,
        "trade executed"
    );

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    };

    fn limit(id: OrderId, side: OrderSide, price: Price, quantity: Quantity, client: &str) -> Order {
        Order::new(id, "TEST", side, OrderKind::Limit { price }, quantity, client)
    }

    fn market(id: OrderId, side: OrderSide, quantity: Quantity, client: &str) -> Order {
        Order::new(id, "TEST", side, OrderKind::Market, quantity, client)
    }

    #[test]
    fn test_best_prices_empty_book() {
        let book = OrderBook::new("TEST");
        assert_eq!(book.best_bid(), 0.0);
        assert_eq!(book.best_ask(), 0.0);
        assert_eq!(book.last_price(), 0.0);
    }

    #[test]
    fn test_resting_and_best_prices() {
        let book = OrderBook::new("TEST");
        book.add_order(limit(1, OrderSide::Buy, 149.99, 100.0, "C1"));
        book.add_order(limit(2, OrderSide::Buy, 150.01, 200.0, "C2"));
        book.add_order(limit(3, OrderSide::Sell, 150.05, 150.0, "C3"));
        book.add_order(limit(4, OrderSide::Sell, 150.03, 100.0, "C4"));

        assert_eq!(book.best_bid(), 150.01);
        assert_eq!(book.best_ask(), 150.03);
    }

    #[test]
    fn test_cancel_restores_book() {
        let book = OrderBook::new("TEST");
        book.add_order(limit(1, OrderSide::Buy, 100.0, 10.0, "C1"));
        assert_eq!(book.best_bid(), 100.0);
        assert!(book.contains_order(1));

        book.cancel_order(1);
        assert_eq!(book.best_bid(), 0.0);
        assert!(!book.contains_order(1));

        // unknown id is a silent no-op
        book.cancel_order(42);
    }

    #[test]
    fn test_simple_cross_full_fill() {
        let book = OrderBook::new("TEST");
        book.add_order(limit(1, OrderSide::Buy, 100.0, 10.0, "C1"));
        book.add_order(limit(2, OrderSide::Sell, 100.0, 10.0, "C2"));

        let touched = book.match_orders();
        assert_eq!(touched.len(), 2);
        assert!(touched.iter().all(|o| o.status == OrderStatus::Filled));
        assert_eq!(book.last_price(), 100.0);
        assert_eq!(book.best_bid(), 0.0);
        assert_eq!(book.best_ask(), 0.0);
    }

    #[test]
    fn test_no_cross_no_trade() {
        let book = OrderBook::new("TEST");
        book.add_order(limit(1, OrderSide::Buy, 99.0, 10.0, "C1"));
        book.add_order(limit(2, OrderSide::Sell, 101.0, 10.0, "C2"));

        assert!(book.match_orders().is_empty());
        assert_eq!(book.best_bid(), 99.0);
        assert_eq!(book.best_ask(), 101.0);
    }

    #[test]
    fn test_maker_price_wins() {
        let book = OrderBook::new("TEST");
        // resting (older) sell at 100, aggressive buy at 102
        book.add_order(limit(1, OrderSide::Sell, 100.0, 10.0, "C1"));
        book.add_order(limit(2, OrderSide::Buy, 102.0, 10.0, "C2"));

        let touched = book.match_orders();
        assert_eq!(touched.len(), 2);
        assert_eq!(book.last_price(), 100.0);
    }

    #[test]
    fn test_time_priority_within_level() {
        let book = OrderBook::new("TEST");
        book.add_order(limit(1, OrderSide::Buy, 200.0, 50.0, "C1"));
        book.add_order(limit(2, OrderSide::Buy, 200.0, 30.0, "C2"));
        book.add_order(limit(3, OrderSide::Buy, 200.0, 20.0, "C3"));
        book.add_order(limit(4, OrderSide::Sell, 200.0, 60.0, "C4"));

        let touched = book.match_orders();
        // first order fills completely, second partially
        let first = touched.iter().find(|o| o.id == 1).unwrap();
        assert_eq!(first.status, OrderStatus::Filled);
        let second = touched.iter().filter(|o| o.id == 2).last().unwrap();
        assert_eq!(second.filled_quantity, 10.0);
        assert!(book.contains_order(2));
        assert!(book.contains_order(3));
    }

    #[test]
    fn test_partial_fill_stays_resting() {
        let book = OrderBook::new("TEST");
        book.add_order(limit(1, OrderSide::Sell, 100.0, 50.0, "C1"));
        book.add_order(limit(2, OrderSide::Buy, 100.0, 20.0, "C2"));

        book.match_orders();
        assert_eq!(book.best_ask(), 100.0);
        assert!(book.contains_order(1));
        assert!(!book.contains_order(2));
    }

    #[test]
    fn test_self_trade_evicts_older_order() {
        let book = OrderBook::new("TEST");
        book.add_order(limit(1, OrderSide::Buy, 100.0, 10.0, "C1"));
        book.add_order(limit(2, OrderSide::Sell, 100.0, 10.0, "C1"));

        let touched = book.match_orders();
        assert!(touched.is_empty());
        assert_eq!(book.best_bid(), 0.0);
        assert_eq!(book.best_ask(), 100.0);
        assert!(!book.contains_order(1));
        assert!(book.contains_order(2));
    }

    #[test]
    fn test_market_sweep_across_levels() {
        let book = OrderBook::new("TEST");
        book.add_order(limit(1, OrderSide::Sell, 100.0, 30.0, "C1"));
        book.add_order(limit(2, OrderSide::Sell, 101.0, 30.0, "C2"));

        let mut aggressor = market(3, OrderSide::Buy, 50.0, "C3");
        let executed = book.execute_market_order(&mut aggressor, OrderSide::Sell, 50.0);

        assert_eq!(executed, 50.0);
        assert_eq!(aggressor.filled_quantity, 50.0);
        assert_eq!(book.best_ask(), 101.0);
        assert_eq!(book.last_price(), 101.0);
    }

    #[test]
    fn test_market_sweep_skips_own_resting_orders() {
        let book = OrderBook::new("TEST");
        book.add_order(limit(1, OrderSide::Sell, 100.0, 30.0, "C1"));
        book.add_order(limit(2, OrderSide::Sell, 101.0, 30.0, "C2"));

        let mut aggressor = market(3, OrderSide::Buy, 30.0, "C1");
        let executed = book.execute_market_order(&mut aggressor, OrderSide::Sell, 30.0);

        // own order at 100 is removed, trade happens at 101
        assert_eq!(executed, 30.0);
        assert!(!book.contains_order(1));
        assert_eq!(book.last_price(), 101.0);
        assert_eq!(book.best_ask(), 0.0);
    }

    #[test]
    fn test_market_sweep_no_liquidity() {
        let book = OrderBook::new("TEST");
        let mut aggressor = market(1, OrderSide::Sell, 10.0, "C1");
        let executed = book.execute_market_order(&mut aggressor, OrderSide::Buy, 10.0);
        assert_eq!(executed, 0.0);
    }

    #[test]
    fn test_stop_loss_waits_then_triggers() {
        let book = OrderBook::new("TEST");
        book.add_order(limit(1, OrderSide::Buy, 800.0, 100.0, "C1"));
        book.add_order(limit(2, OrderSide::Sell, 810.0, 100.0, "C2"));

        let stop = Order::new(
            3,
            "TEST",
            OrderSide::Sell,
            OrderKind::StopLoss { stop_price: 805.0 },
            25.0,
            "C3",
        );
        // no last trade yet, so the stop rests
        book.add_order(stop);
        assert_eq!(book.stop_order_count(), 1);

        // cross a small pair at 805 to move the last price
        book.add_order(limit(4, OrderSide::Buy, 805.0, 5.0, "C4"));
        book.add_order(limit(5, OrderSide::Sell, 805.0, 5.0, "C5"));
        book.match_orders();
        assert_eq!(book.last_price(), 805.0);

        book.check_stop_orders();
        // the stop swept the best bid at 800
        assert_eq!(book.stop_order_count(), 0);
        assert_eq!(book.last_price(), 800.0);
        assert_eq!(book.best_bid(), 800.0);
        assert_eq!(book.best_ask(), 810.0);
    }

    #[test]
    fn test_stop_limit_converts_to_resting_limit() {
        let book = OrderBook::new("TEST");
        book.add_order(limit(1, OrderSide::Buy, 400.0, 100.0, "C1"));
        book.add_order(limit(2, OrderSide::Sell, 420.0, 100.0, "C2"));

        let stop_limit = Order::new(
            3,
            "TEST",
            OrderSide::Sell,
            OrderKind::StopLimit {
                stop_price: 410.0,
                limit_price: 405.0,
            },
            30.0,
            "C3",
        );
        book.add_order(stop_limit);

        book.add_order(limit(4, OrderSide::Buy, 410.0, 5.0, "C4"));
        book.add_order(limit(5, OrderSide::Sell, 410.0, 5.0, "C5"));
        book.match_orders();
        book.check_stop_orders();

        assert_eq!(book.best_ask(), 405.0);
        assert_eq!(book.best_bid(), 400.0);
        assert!(book.contains_order(3));
    }

    #[test]
    fn test_stop_triggers_immediately_at_submission() {
        let book = OrderBook::new("TEST");
        book.add_order(limit(1, OrderSide::Buy, 500.0, 10.0, "C1"));
        book.add_order(limit(2, OrderSide::Sell, 500.0, 10.0, "C2"));
        book.match_orders();
        assert_eq!(book.last_price(), 500.0);

        book.add_order(limit(3, OrderSide::Buy, 495.0, 50.0, "C3"));
        // sell stop at 505 already triggers against last=500 and sweeps the bid
        let stop = Order::new(
            4,
            "TEST",
            OrderSide::Sell,
            OrderKind::StopLoss { stop_price: 505.0 },
            20.0,
            "C4",
        );
        book.add_order(stop);

        assert_eq!(book.stop_order_count(), 0);
        assert_eq!(book.last_price(), 495.0);
        assert!(book.contains_order(3)); // 30 remaining of the 50 bid
    }

    #[test]
    fn test_trailing_stop_follows_market_up_then_fires() {
        let book = OrderBook::new("TEST");

        let trailing = Order::new(
            1,
            "TEST",
            OrderSide::Sell,
            OrderKind::trailing_stop(OrderSide::Sell, 5.0),
            10.0,
            "C_trail",
        );
        book.add_order(trailing);

        // trade at 100: watermark 100, stop 95
        book.add_order(limit(2, OrderSide::Buy, 100.0, 5.0, "C1"));
        book.add_order(limit(3, OrderSide::Sell, 100.0, 5.0, "C2"));
        book.match_orders();
        book.check_stop_orders();
        assert_eq!(book.stop_order_count(), 1);

        // trade at 110: watermark 110, stop 105
        book.add_order(limit(4, OrderSide::Buy, 110.0, 5.0, "C1"));
        book.add_order(limit(5, OrderSide::Sell, 110.0, 5.0, "C2"));
        book.match_orders();
        book.check_stop_orders();
        assert_eq!(book.stop_order_count(), 1);

        // liquidity for the sweep, then a print at 104 fires the stop
        book.add_order(limit(6, OrderSide::Buy, 104.0, 20.0, "C_liq"));
        book.add_order(limit(7, OrderSide::Buy, 104.0, 5.0, "C1"));
        book.add_order(limit(8, OrderSide::Sell, 104.0, 5.0, "C2"));
        book.match_orders();
        book.check_stop_orders();

        assert_eq!(book.stop_order_count(), 0);
        assert_eq!(book.last_price(), 104.0);
    }

    #[test]
    fn test_trade_callback_receives_every_fill() {
        let book = OrderBook::new("TEST");
        let volume = Arc::new(AtomicU64::new(0));
        let volume_in_cb = Arc::clone(&volume);
        book.set_trade_callback(Arc::new(move |tick: &TradeTick| {
            volume_in_cb.fetch_add(tick.quantity as u64, Ordering::Relaxed);
        }));

        book.add_order(limit(1, OrderSide::Buy, 100.0, 30.0, "C1"));
        book.add_order(limit(2, OrderSide::Sell, 100.0, 10.0, "C2"));
        book.add_order(limit(3, OrderSide::Sell, 100.0, 20.0, "C3"));
        book.match_orders();

        assert_eq!(volume.load(Ordering::Relaxed), 30);
    }

    #[test]
    fn test_bid_ask_never_cross_after_matching() {
        let book = OrderBook::new("TEST");
        book.add_order(limit(1, OrderSide::Buy, 101.0, 10.0, "C1"));
        book.add_order(limit(2, OrderSide::Buy, 100.0, 10.0, "C2"));
        book.add_order(limit(3, OrderSide::Sell, 99.0, 15.0, "C3"));
        book.add_order(limit(4, OrderSide::Sell, 102.0, 10.0, "C4"));

        book.match_orders();
        let bid = book.best_bid();
        let ask = book.best_ask();
        assert!(bid == 0.0 || ask == 0.0 || bid < ask);
    }

    #[test]
    fn test_filled_volume_balances_across_sides() {
        let book = OrderBook::new("TEST");
        book.add_order(limit(1, OrderSide::Buy, 100.0, 25.0, "C1"));
        book.add_order(limit(2, OrderSide::Buy, 99.0, 25.0, "C2"));
        book.add_order(limit(3, OrderSide::Sell, 99.0, 40.0, "C3"));

        let touched = book.match_orders();
        let bought: f64 = touched
            .iter()
            .filter(|o| o.side == OrderSide::Buy)
            .map(|o| o.id)
            .collect::<std::collections::HashSet<_>>()
            .iter()
            .map(|id| {
                touched
                    .iter()
                    .filter(|o| o.id == *id && o.side == OrderSide::Buy)
                    .last()
                    .map_or(0.0, |o| o.filled_quantity)
            })
            .sum();
        let sold: f64 = touched
            .iter()
            .filter(|o| o.side == OrderSide::Sell)
            .last()
            .map_or(0.0, |o| o.filled_quantity);
        assert_eq!(bought, sold);
        assert_eq!(sold, 40.0);
    }
}
