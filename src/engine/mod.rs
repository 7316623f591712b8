// src/engine/mod.rs - Matching Engine
//! # Matching Engine
//!
//! The public surface of the venue. Owns every order book and VWAP
//! calculator, issues order ids, validates submissions, routes each order to
//! its execution path, and drives matching passes and VWAP scheduler steps
//! on the worker pool.
//!
//! ## Locking
//!
//! The engine mutex guards the book map, client order index, and VWAP parent
//! registry. Each book carries its own lock. Lock order is always engine
//! first, book second. Trade callbacks fire under the book lock and reach the
//! VWAP calculators through a concurrent registry, never through the engine
//! mutex.

pub mod book;
pub mod vwap;
pub mod workers;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    core::{
        events::TradeTick,
        order::{Order, OrderKind, OrderSide, OrderStatus},
        types::{BookSnapshot, ClientId, OrderId, Price, Quantity, Symbol, VwapOrderSnapshot},
    },
    utils, VenueError, VenueResult,
};
use book::OrderBook;
use vwap::VwapCalculator;
use workers::{EngineTask, ScheduledStep};

/// Engine configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Number of worker tasks draining the engine task queue
    pub worker_threads: usize,
    /// Seconds between scheduler steps for each live VWAP parent
    pub vwap_check_interval_secs: u64,
    /// Length of the rolling VWAP window in seconds
    pub vwap_rolling_window_secs: u64,
    /// Longest accepted VWAP execution duration in minutes
    pub max_vwap_duration_minutes: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_threads: 4,
            vwap_check_interval_secs: crate::constants::VWAP_CHECK_INTERVAL_SECS,
            vwap_rolling_window_secs: crate::constants::VWAP_ROLLING_WINDOW_SECS,
            max_vwap_duration_minutes: crate::constants::MAX_VWAP_DURATION_MINUTES,
        }
    }
}

/// Engine statistics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    /// Submissions accepted
    pub orders_accepted: u64,
    /// Submissions rejected at validation
    pub orders_rejected: u64,
    /// Successful cancellations
    pub orders_cancelled: u64,
    /// Trades executed across all books
    pub trades_executed: u64,
    /// Total traded volume
    pub total_volume: f64,
    /// Number of symbols with a live book
    pub active_symbols: usize,
    /// Number of live VWAP parents
    pub active_vwap_orders: usize,
    /// Seconds since engine construction
    pub uptime_secs: u64,
}

/// Atomic counters backing [`EngineStats`]
struct EngineMetrics {
    orders_accepted: AtomicU64,
    orders_rejected: AtomicU64,
    orders_cancelled: AtomicU64,
    trades_executed: AtomicU64,
    total_volume: RwLock<f64>,
    started_at: Instant,
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self {
            orders_accepted: AtomicU64::new(0),
            orders_rejected: AtomicU64::new(0),
            orders_cancelled: AtomicU64::new(0),
            trades_executed: AtomicU64::new(0),
            total_volume: RwLock::new(0.0),
            started_at: Instant::now(),
        }
    }
}

/// State guarded by the engine mutex
struct EngineState {
    /// Book per symbol
    books: HashMap<Symbol, Arc<OrderBook>>,
    /// Order ids per owning client
    client_orders: HashMap<ClientId, Vec<OrderId>>,
    /// Live VWAP parent orders
    vwap_orders: HashMap<OrderId, Order>,
}

/// Routing decision derived from an order's kind before it is moved
enum Route {
    Market,
    Conditional,
    Limit,
    Vwap { start_time: Instant, end_time: Instant },
}

/// Main matching engine
#[derive(Clone)]
pub struct MatchingEngine {
    config: EngineConfig,
    next_order_id: Arc<AtomicU64>,
    state: Arc<Mutex<EngineState>>,
    /// Per-symbol VWAP calculators, reachable from trade callbacks without
    /// the engine mutex
    calculators: Arc<DashMap<Symbol, Arc<Mutex<VwapCalculator>>>>,
    metrics: Arc<EngineMetrics>,
    task_tx: mpsc::UnboundedSender<EngineTask>,
    task_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<EngineTask>>>>,
    sched_tx: mpsc::UnboundedSender<ScheduledStep>,
    sched_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<ScheduledStep>>>>,
}

impl MatchingEngine {
    /// Create a new engine. Call [`Self::start`] from inside a tokio runtime
    /// to launch the worker pool and scheduler.
    pub fn new(config: EngineConfig) -> Self {
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (sched_tx, sched_rx) = mpsc::unbounded_channel();

        Self {
            config,
            next_order_id: Arc::new(AtomicU64::new(1)),
            state: Arc::new(Mutex::new(EngineState {
                books: HashMap::new(),
                client_orders: HashMap::new(),
                vwap_orders: HashMap::new(),
            })),
            calculators: Arc::new(DashMap::new()),
            metrics: Arc::new(EngineMetrics::default()),
            task_tx,
            task_rx: Arc::new(Mutex::new(Some(task_rx))),
            sched_tx,
            sched_rx: Arc::new(Mutex::new(Some(sched_rx))),
        }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Launch the worker pool and the VWAP scheduler. Idempotent; the second
    /// call is a no-op.
    pub fn start(&self) {
        let Some(task_rx) = self.task_rx.lock().take() else {
            warn!("engine already started");
            return;
        };
        let Some(sched_rx) = self.sched_rx.lock().take() else {
            return;
        };
        workers::spawn_workers(self.clone(), task_rx, self.config.worker_threads);
        workers::spawn_scheduler(sched_rx, self.task_tx.clone());

        let engine = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                interval.tick().await;
                debug!(stats = ?engine.stats(), "engine stats");
            }
        });

        info!(workers = self.config.worker_threads, "matching engine started");
    }

    /// Execute one unit of pool work
    pub(crate) fn run_task(&self, task: EngineTask) {
        match task {
            EngineTask::MatchSymbol(symbol) => self.process_matching(&symbol),
            EngineTask::VwapStep { symbol, order_id } => {
                self.process_vwap_order(&symbol, order_id)
            }
        }
    }

    /// Submit an order. Returns the assigned id, or a validation error that
    /// maps to the reserved id 0 on the wire. Market orders execute before
    /// this returns; limit orders enqueue a matching pass; conditional orders
    /// may trigger immediately; VWAP parents register with the scheduler.
    pub fn submit_order(
        &self,
        symbol: &str,
        kind: OrderKind,
        side: OrderSide,
        quantity: Quantity,
        client_id: &str,
    ) -> VenueResult<OrderId> {
        if let Err(err) = self.validate_submission(symbol, &kind, side, quantity, client_id) {
            self.metrics.orders_rejected.fetch_add(1, Ordering::Relaxed);
            warn!(symbol, %side, quantity, client_id, error = %err, "submission rejected");
            return Err(err);
        }

        let order_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
        let route = match &kind {
            OrderKind::Market => Route::Market,
            OrderKind::Limit { .. } => Route::Limit,
            OrderKind::StopLoss { .. }
            | OrderKind::StopLimit { .. }
            | OrderKind::TrailingStop { .. } => Route::Conditional,
            OrderKind::Vwap(state) => Route::Vwap {
                start_time: state.start_time,
                end_time: state.end_time,
            },
        };
        let order = Order::new(order_id, symbol, side, kind, quantity, client_id);

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let book = self.ensure_book(state, symbol);
        state
            .client_orders
            .entry(client_id.to_string())
            .or_default()
            .push(order_id);

        match route {
            Route::Market => {
                let mut order = order;
                self.execute_market(&book, &mut order);
            }
            Route::Conditional => {
                book.add_order(order);
                book.check_stop_orders();
            }
            Route::Limit => {
                book.add_order(order);
                self.enqueue(EngineTask::MatchSymbol(symbol.to_string()));
            }
            Route::Vwap {
                start_time,
                end_time,
            } => {
                let rolling = Duration::from_secs(self.config.vwap_rolling_window_secs);
                self.calculators
                    .entry(symbol.to_string())
                    .or_insert_with(|| {
                        Arc::new(Mutex::new(VwapCalculator::with_rolling_window(
                            start_time, end_time, rolling,
                        )))
                    });
                state.vwap_orders.insert(order_id, order);
                self.enqueue(EngineTask::VwapStep {
                    symbol: symbol.to_string(),
                    order_id,
                });
            }
        }

        self.metrics.orders_accepted.fetch_add(1, Ordering::Relaxed);
        info!(order_id, symbol, %side, quantity, client_id, "order accepted");
        Ok(order_id)
    }

    /// Submit a stop-limit order: triggers at `stop_price` and then rests at
    /// `limit_price`
    pub fn submit_stop_limit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        stop_price: Price,
        limit_price: Price,
        quantity: Quantity,
        client_id: &str,
    ) -> VenueResult<OrderId> {
        self.submit_order(
            symbol,
            OrderKind::StopLimit {
                stop_price,
                limit_price,
            },
            side,
            quantity,
            client_id,
        )
    }

    /// Submit a trailing stop that follows favorable trades at a fixed
    /// absolute distance
    pub fn submit_trailing_stop_order(
        &self,
        symbol: &str,
        side: OrderSide,
        trailing_amount: Price,
        quantity: Quantity,
        client_id: &str,
    ) -> VenueResult<OrderId> {
        self.submit_order(
            symbol,
            OrderKind::trailing_stop(side, trailing_amount),
            side,
            quantity,
            client_id,
        )
    }

    /// Submit a VWAP parent worked across `[start_time, end_time]`
    #[allow(clippy::too_many_arguments)]
    pub fn submit_vwap_order(
        &self,
        symbol: &str,
        side: OrderSide,
        target_vwap: Price,
        quantity: Quantity,
        start_time: Instant,
        end_time: Instant,
        client_id: &str,
    ) -> VenueResult<OrderId> {
        self.submit_order(
            symbol,
            OrderKind::vwap(target_vwap, start_time, end_time),
            side,
            quantity,
            client_id,
        )
    }

    /// Cancel an order owned by `client_id`. Cancelling a VWAP parent also
    /// cancels all of its live children. Returns false when the id is unknown
    /// or owned by a different client.
    pub fn cancel_order(&self, order_id: OrderId, client_id: &str) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(owned) = state.client_orders.get_mut(client_id) else {
            warn!(order_id, client_id, "cancel failed: unknown client");
            return false;
        };
        let Some(pos) = owned.iter().position(|&id| id == order_id) else {
            warn!(order_id, client_id, "cancel failed: not owner");
            return false;
        };

        if let Some(mut parent) = state.vwap_orders.remove(&order_id) {
            let child_ids = parent
                .vwap_state()
                .map(|s| s.child_order_ids.clone())
                .unwrap_or_default();
            for child_id in &child_ids {
                for book in state.books.values() {
                    book.cancel_order(*child_id);
                }
            }
            parent.status = OrderStatus::Cancelled;
            info!(
                order_id,
                children = child_ids.len(),
                "vwap order cancelled with children"
            );
        } else {
            for book in state.books.values() {
                book.cancel_order(order_id);
            }
            info!(order_id, client_id, "order cancelled");
        }

        owned.remove(pos);
        self.metrics.orders_cancelled.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Book for a symbol, if one exists
    pub fn get_order_book(&self, symbol: &str) -> Option<Arc<OrderBook>> {
        self.state.lock().books.get(symbol).cloned()
    }

    /// Top-of-book snapshot for the BOOK query
    pub fn book_snapshot(&self, symbol: &str) -> Option<BookSnapshot> {
        self.get_order_book(symbol).map(|book| book.snapshot())
    }

    /// Snapshot of one live VWAP parent
    pub fn get_vwap_order(&self, order_id: OrderId) -> Option<VwapOrderSnapshot> {
        self.state
            .lock()
            .vwap_orders
            .get(&order_id)
            .map(vwap_snapshot)
    }

    /// Live VWAP parents for one client on one symbol, in submission order
    pub fn active_vwap_orders(&self, symbol: &str, client_id: &str) -> Vec<VwapOrderSnapshot> {
        let state = self.state.lock();
        let mut snapshots: Vec<VwapOrderSnapshot> = state
            .vwap_orders
            .values()
            .filter(|order| order.symbol == symbol && order.client_id == client_id)
            .map(vwap_snapshot)
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }

    /// Current statistics
    pub fn stats(&self) -> EngineStats {
        let state = self.state.lock();
        EngineStats {
            orders_accepted: self.metrics.orders_accepted.load(Ordering::Relaxed),
            orders_rejected: self.metrics.orders_rejected.load(Ordering::Relaxed),
            orders_cancelled: self.metrics.orders_cancelled.load(Ordering::Relaxed),
            trades_executed: self.metrics.trades_executed.load(Ordering::Relaxed),
            total_volume: *self.metrics.total_volume.read(),
            active_symbols: state.books.len(),
            active_vwap_orders: state.vwap_orders.len(),
            uptime_secs: self.metrics.started_at.elapsed().as_secs(),
        }
    }

    /// Run a matching pass for one symbol. Trades can move the last price,
    /// so the conditional list is re-checked, and fills on VWAP children are
    /// folded into their parents.
    pub fn process_matching(&self, symbol: &str) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let Some(book) = state.books.get(symbol).cloned() else {
            return;
        };

        let touched = book.match_orders();
        if touched.is_empty() {
            return;
        }

        book.check_stop_orders();
        Self::update_vwap_progress(state, &touched);

        for order in &touched {
            debug!(
                order_id = order.id,
                status = %order.status,
                filled = order.filled_quantity,
                "order touched by matching pass"
            );
        }
    }

    /// One scheduler step for a VWAP parent: advance or complete it, place a
    /// child order when the calculator advises one, and re-arm the timer
    /// while the parent stays active.
    pub fn process_vwap_order(&self, symbol: &str, order_id: OrderId) {
        let interval = Duration::from_secs(self.config.vwap_check_interval_secs);
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let (side, client_id, target, remaining, complete) = {
            let Some(parent) = state.vwap_orders.get_mut(&order_id) else {
                // cancelled or completed; the schedule dies with it
                return;
            };
            let remaining = parent.quantity - parent.filled_quantity;
            if remaining <= 0.0 {
                parent.status = OrderStatus::Filled;
            }
            (
                parent.side,
                parent.client_id.clone(),
                parent.target_vwap().unwrap_or(0.0),
                remaining,
                remaining <= 0.0,
            )
        };
        if complete {
            state.vwap_orders.remove(&order_id);
            info!(order_id, "vwap order completed");
            return;
        }

        let Some(book) = state.books.get(symbol).cloned() else {
            return;
        };
        let params = {
            let Some(calculator) = self.calculators.get(symbol) else {
                return;
            };
            let Some(parent) = state.vwap_orders.get(&order_id) else {
                return;
            };
            let result = calculator
                .lock()
                .calculate_child_order_params(parent, remaining, target);
            result
        };

        if params.should_place && params.quantity > 0.0 {
            let child_id = self.next_order_id.fetch_add(1, Ordering::SeqCst);
            let child = Order::new(
                child_id,
                symbol,
                side,
                OrderKind::Limit {
                    price: params.limit_price,
                },
                params.quantity,
                client_id,
            );
            book.add_order(child);

            if let Some(parent) = state.vwap_orders.get_mut(&order_id) {
                if let Some(vwap_state) = parent.vwap_state_mut() {
                    vwap_state.child_order_ids.push(child_id);
                    vwap_state.last_child_order_price = params.limit_price;
                    vwap_state.last_child_order_time = Some(Instant::now());
                }
            }
            info!(
                parent_id = order_id,
                child_id,
                price = params.limit_price,
                quantity = params.quantity,
                "vwap child order placed"
            );
            self.enqueue(EngineTask::MatchSymbol(symbol.to_string()));
        }

        self.schedule_vwap_step(symbol, order_id, Instant::now() + interval);
    }

    fn enqueue(&self, task: EngineTask) {
        if self.task_tx.send(task).is_err() {
            warn!("engine task queue closed");
        }
    }

    fn schedule_vwap_step(&self, symbol: &str, order_id: OrderId, wake_at: Instant) {
        let step = ScheduledStep {
            wake_at,
            order_id,
            symbol: symbol.to_string(),
        };
        let _ = self.sched_tx.send(step);
    }

    /// Get or create the book for a symbol, installing the trade callback
    /// that feeds the calculator registry and trade metrics
    fn ensure_book(&self, state: &mut EngineState, symbol: &str) -> Arc<OrderBook> {
        if let Some(book) = state.books.get(symbol) {
            return Arc::clone(book);
        }

        let book = Arc::new(OrderBook::new(symbol));
        let calculators = Arc::clone(&self.calculators);
        let metrics = Arc::clone(&self.metrics);
        book.set_trade_callback(Arc::new(move |tick: &TradeTick| {
            metrics.trades_executed.fetch_add(1, Ordering::Relaxed);
            *metrics.total_volume.write() += tick.quantity;
            if let Some(calculator) = calculators.get(&tick.symbol) {
                calculator.lock().add_trade(tick.price, tick.quantity);
            }
        }));

        state.books.insert(symbol.to_string(), Arc::clone(&book));
        info!(symbol, "order book created");
        book
    }

    /// Sweep the book with a market order and assign its terminal status.
    /// The unexecuted remainder of a partial sweep is dropped, not rested.
    fn execute_market(&self, book: &OrderBook, order: &mut Order) {
        let executed = book.execute_market_order(order, order.side.opposite(), order.quantity);

        if executed >= order.quantity {
            order.status = OrderStatus::Filled;
            info!(order_id = order.id, executed, "market order fully filled");
        } else if executed > 0.0 {
            order.status = OrderStatus::PartialFilled;
            info!(
                order_id = order.id,
                executed,
                quantity = order.quantity,
                "market order partially filled; remainder dropped"
            );
        } else {
            order.status = OrderStatus::Rejected;
            warn!(order_id = order.id, "market order rejected: no liquidity");
        }
        book.check_stop_orders();
    }

    fn validate_submission(
        &self,
        symbol: &str,
        kind: &OrderKind,
        side: OrderSide,
        quantity: Quantity,
        client_id: &str,
    ) -> VenueResult<()> {
        utils::validate_symbol(symbol)?;
        utils::validate_client_id(client_id)?;
        utils::validate_quantity(quantity)?;

        match kind {
            OrderKind::Market | OrderKind::StopLoss { .. } => Ok(()),
            OrderKind::Limit { price } => utils::validate_price(*price),
            OrderKind::StopLimit {
                stop_price,
                limit_price,
            } => {
                utils::validate_price(*stop_price)?;
                utils::validate_price(*limit_price)?;
                match side {
                    OrderSide::Sell if stop_price < limit_price => Err(VenueError::Validation(
                        "Sell stop limit requires stop price at or above limit price".to_string(),
                    )),
                    OrderSide::Buy if stop_price > limit_price => Err(VenueError::Validation(
                        "Buy stop limit requires stop price at or below limit price".to_string(),
                    )),
                    _ => Ok(()),
                }
            }
            OrderKind::TrailingStop {
                trailing_amount, ..
            } => {
                if !trailing_amount.is_finite() || *trailing_amount <= 0.0 {
                    return Err(VenueError::Validation(
                        "Trailing amount must be positive".to_string(),
                    ));
                }
                Ok(())
            }
            OrderKind::Vwap(state) => {
                utils::validate_price(state.target_vwap)?;
                if state.start_time >= state.end_time {
                    return Err(VenueError::Validation(
                        "VWAP start time must precede end time".to_string(),
                    ));
                }
                if state.end_time <= Instant::now() {
                    return Err(VenueError::Validation(
                        "VWAP end time must be in the future".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }

    /// Fold fills on touched child orders into their VWAP parents. Each
    /// parent remembers the last cumulative fill per child and accumulates
    /// only the delta, so a child touched by several passes counts once.
    fn update_vwap_progress(state: &mut EngineState, touched: &[Order]) {
        for child in touched {
            let mut completed: Option<OrderId> = None;
            for (&parent_id, parent) in state.vwap_orders.iter_mut() {
                let quantity = parent.quantity;
                let Some(vwap_state) = parent.vwap_state_mut() else {
                    continue;
                };
                if !vwap_state.child_order_ids.contains(&child.id) {
                    continue;
                }

                let cumulative = child.filled_quantity.min(child.quantity);
                let previous = vwap_state.child_fills.get(&child.id).copied().unwrap_or(0.0);
                let delta = cumulative - previous;
                if delta > 0.0 {
                    vwap_state.child_fills.insert(child.id, cumulative);
                    parent.filled_quantity = (parent.filled_quantity + delta).min(quantity);
                    info!(
                        parent_id,
                        child_id = child.id,
                        delta,
                        filled = parent.filled_quantity,
                        quantity = parent.quantity,
                        "vwap order progress"
                    );
                    if parent.filled_quantity >= parent.quantity {
                        parent.status = OrderStatus::Filled;
                        info!(parent_id, "vwap order completed");
                        completed = Some(parent_id);
                    }
                }
                break;
            }
            if let Some(parent_id) = completed {
                state.vwap_orders.remove(&parent_id);
            }
        }
    }
}

fn vwap_snapshot(order: &Order) -> VwapOrderSnapshot {
    VwapOrderSnapshot {
        id: order.id,
        side: order.side,
        target_vwap: order.target_vwap().unwrap_or(0.0),
        filled_quantity: order.filled_quantity,
        quantity: order.quantity,
        status: order.status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> MatchingEngine {
        MatchingEngine::new(EngineConfig::default())
    }

    fn submit_limit(
        engine: &MatchingEngine,
        symbol: &str,
        side: OrderSide,
        price: Price,
        quantity: Quantity,
        client: &str,
    ) -> OrderId {
        engine
            .submit_order(symbol, OrderKind::Limit { price }, side, quantity, client)
            .expect("limit submission should pass validation")
    }

    #[test]
    fn test_order_ids_strictly_increase() {
        let engine = engine();
        let a = submit_limit(&engine, "AAPL", OrderSide::Buy, 100.0, 10.0, "C1");
        let b = submit_limit(&engine, "MSFT", OrderSide::Sell, 200.0, 10.0, "C2");
        let c = submit_limit(&engine, "AAPL", OrderSide::Buy, 101.0, 10.0, "C1");
        assert!(a >= 1);
        assert!(b > a);
        assert!(c > b);
    }

    #[test]
    fn test_validation_rejections() {
        let engine = engine();

        // common rules
        assert!(engine
            .submit_order("", OrderKind::Market, OrderSide::Buy, 10.0, "C1")
            .is_err());
        assert!(engine
            .submit_order("AAPL", OrderKind::Market, OrderSide::Buy, 10.0, "")
            .is_err());
        assert!(engine
            .submit_order("AAPL", OrderKind::Market, OrderSide::Buy, 0.0, "C1")
            .is_err());

        // limit price must be positive; market price is not consulted
        assert!(engine
            .submit_order(
                "AAPL",
                OrderKind::Limit { price: 0.0 },
                OrderSide::Buy,
                10.0,
                "C1"
            )
            .is_err());
        assert!(engine
            .submit_order("AAPL", OrderKind::Market, OrderSide::Sell, 10.0, "C1")
            .is_ok());

        // stop-limit side consistency
        assert!(engine
            .submit_stop_limit_order("AAPL", OrderSide::Sell, 100.0, 105.0, 10.0, "C1")
            .is_err());
        assert!(engine
            .submit_stop_limit_order("AAPL", OrderSide::Sell, 105.0, 100.0, 10.0, "C1")
            .is_ok());
        assert!(engine
            .submit_stop_limit_order("AAPL", OrderSide::Buy, 105.0, 100.0, 10.0, "C1")
            .is_err());
        assert!(engine
            .submit_stop_limit_order("AAPL", OrderSide::Buy, 100.0, 105.0, 10.0, "C1")
            .is_ok());

        // trailing amount must be positive
        assert!(engine
            .submit_trailing_stop_order("AAPL", OrderSide::Sell, 0.0, 10.0, "C1")
            .is_err());

        // vwap window must be ordered and end in the future
        let now = Instant::now();
        assert!(engine
            .submit_vwap_order(
                "AAPL",
                OrderSide::Buy,
                100.0,
                10.0,
                now + Duration::from_secs(60),
                now + Duration::from_secs(30),
                "C1"
            )
            .is_err());
        assert!(engine
            .submit_vwap_order("AAPL", OrderSide::Buy, 0.0, 10.0, now, now + Duration::from_secs(60), "C1")
            .is_err());

        let stats = engine.stats();
        assert!(stats.orders_rejected >= 8);
    }

    #[test]
    fn test_scenario_simple_cross() {
        let engine = engine();
        submit_limit(&engine, "AAPL", OrderSide::Sell, 150.0, 50.0, "C2");
        engine
            .submit_order("AAPL", OrderKind::Market, OrderSide::Buy, 100.0, "C1")
            .unwrap();

        let book = engine.get_order_book("AAPL").unwrap();
        assert_eq!(book.best_ask(), 0.0);
        assert_eq!(book.last_price(), 150.0);
    }

    #[test]
    fn test_scenario_price_time_priority() {
        let engine = engine();
        submit_limit(&engine, "MSFT", OrderSide::Buy, 200.0, 50.0, "C1");
        submit_limit(&engine, "MSFT", OrderSide::Buy, 200.0, 30.0, "C2");
        submit_limit(&engine, "MSFT", OrderSide::Buy, 200.0, 20.0, "C3");
        submit_limit(&engine, "MSFT", OrderSide::Sell, 200.0, 100.0, "C4");
        submit_limit(&engine, "MSFT", OrderSide::Sell, 201.0, 50.0, "C5");
        engine.process_matching("MSFT");

        let book = engine.get_order_book("MSFT").unwrap();
        assert_eq!(book.best_bid(), 0.0);
        assert_eq!(book.best_ask(), 201.0);
        assert!(book.last_price() > 0.0);
    }

    #[test]
    fn test_scenario_stop_loss_trigger() {
        let engine = engine();
        submit_limit(&engine, "GOOG", OrderSide::Buy, 800.0, 100.0, "C_bid");
        submit_limit(&engine, "GOOG", OrderSide::Sell, 810.0, 100.0, "C_ask");
        engine.process_matching("GOOG");

        engine
            .submit_order(
                "GOOG",
                OrderKind::StopLoss { stop_price: 805.0 },
                OrderSide::Sell,
                25.0,
                "C_stop",
            )
            .unwrap();

        // print a trade at 805 to cross the stop level
        submit_limit(&engine, "GOOG", OrderSide::Buy, 805.0, 5.0, "C4");
        submit_limit(&engine, "GOOG", OrderSide::Sell, 805.0, 5.0, "C5");
        engine.process_matching("GOOG");

        let book = engine.get_order_book("GOOG").unwrap();
        assert_eq!(book.last_price(), 800.0);
        assert_eq!(book.best_bid(), 800.0);
        assert_eq!(book.best_ask(), 810.0);
    }

    #[test]
    fn test_scenario_stop_limit_conversion() {
        let engine = engine();
        submit_limit(&engine, "TSLA", OrderSide::Buy, 400.0, 100.0, "C_bid");
        submit_limit(&engine, "TSLA", OrderSide::Sell, 420.0, 100.0, "C_ask");
        engine.process_matching("TSLA");

        engine
            .submit_stop_limit_order("TSLA", OrderSide::Sell, 410.0, 405.0, 30.0, "C_stop")
            .unwrap();

        submit_limit(&engine, "TSLA", OrderSide::Buy, 410.0, 5.0, "C4");
        submit_limit(&engine, "TSLA", OrderSide::Sell, 410.0, 5.0, "C5");
        engine.process_matching("TSLA");

        let book = engine.get_order_book("TSLA").unwrap();
        assert_eq!(book.best_ask(), 405.0);
        assert_eq!(book.best_bid(), 400.0);
    }

    #[test]
    fn test_scenario_self_trade_eviction() {
        let engine = engine();
        submit_limit(&engine, "NVDA", OrderSide::Buy, 100.0, 10.0, "C1");
        submit_limit(&engine, "NVDA", OrderSide::Sell, 100.0, 10.0, "C1");
        engine.process_matching("NVDA");

        let book = engine.get_order_book("NVDA").unwrap();
        assert_eq!(book.best_bid(), 0.0);
        assert_eq!(book.best_ask(), 100.0);
        assert_eq!(book.last_price(), 0.0);
    }

    #[test]
    fn test_scenario_vwap_child_then_cancel() {
        let engine = engine();
        let now = Instant::now();
        let parent_id = engine
            .submit_vwap_order(
                "AMZN",
                OrderSide::Buy,
                100.0,
                100.0,
                now,
                now + Duration::from_secs(600),
                "C_v",
            )
            .unwrap();

        // market trades drag the running vwap to 99
        submit_limit(&engine, "AMZN", OrderSide::Buy, 99.0, 10.0, "C1");
        submit_limit(&engine, "AMZN", OrderSide::Sell, 99.0, 10.0, "C2");
        engine.process_matching("AMZN");

        engine.process_vwap_order("AMZN", parent_id);
        let book = engine.get_order_book("AMZN").unwrap();
        assert_eq!(book.best_bid(), 100.0);

        let snapshot = engine.get_vwap_order(parent_id).unwrap();
        assert_eq!(snapshot.filled_quantity, 0.0);

        assert!(engine.cancel_order(parent_id, "C_v"));
        assert_eq!(book.best_bid(), 0.0);
        assert!(engine.get_vwap_order(parent_id).is_none());

        // a late scheduler step for the cancelled parent is a no-op
        engine.process_vwap_order("AMZN", parent_id);
    }

    #[test]
    fn test_vwap_progress_counts_delta_fills_once() {
        let engine = engine();
        let now = Instant::now();
        let parent_id = engine
            .submit_vwap_order(
                "META",
                OrderSide::Buy,
                100.0,
                10.0,
                now,
                now + Duration::from_secs(600),
                "C_v",
            )
            .unwrap();

        submit_limit(&engine, "META", OrderSide::Buy, 99.0, 10.0, "C1");
        submit_limit(&engine, "META", OrderSide::Sell, 99.0, 10.0, "C2");
        engine.process_matching("META");

        engine.process_vwap_order("META", parent_id);
        // child rests at 100 for 0.5 (10 remaining over 10 minutes, 0.5 floor)
        let book = engine.get_order_book("META").unwrap();
        assert_eq!(book.best_bid(), 100.0);

        // two partial executions against the same child
        submit_limit(&engine, "META", OrderSide::Sell, 100.0, 0.3, "C9");
        engine.process_matching("META");
        let snapshot = engine.get_vwap_order(parent_id).unwrap();
        assert!((snapshot.filled_quantity - 0.3).abs() < 1e-9);

        submit_limit(&engine, "META", OrderSide::Sell, 100.0, 0.2, "C9");
        engine.process_matching("META");
        let snapshot = engine.get_vwap_order(parent_id).unwrap();
        assert!((snapshot.filled_quantity - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_cancel_requires_ownership() {
        let engine = engine();
        let id = submit_limit(&engine, "AAPL", OrderSide::Buy, 100.0, 10.0, "C1");

        assert!(!engine.cancel_order(id, "C2"));
        assert!(!engine.cancel_order(9999, "C1"));
        assert!(engine.cancel_order(id, "C1"));
        // second cancel of the same id misses
        assert!(!engine.cancel_order(id, "C1"));
    }

    #[test]
    fn test_submit_then_cancel_restores_book() {
        let engine = engine();
        submit_limit(&engine, "AAPL", OrderSide::Buy, 99.0, 5.0, "C0");
        let book = engine.get_order_book("AAPL").unwrap();
        let before = book.snapshot();

        let id = submit_limit(&engine, "AAPL", OrderSide::Buy, 100.0, 10.0, "C1");
        assert!(engine.cancel_order(id, "C1"));

        let after = book.snapshot();
        assert_eq!(before, after);
    }

    #[test]
    fn test_market_order_without_liquidity_rejected() {
        let engine = engine();
        let id = engine
            .submit_order("EMPTY", OrderKind::Market, OrderSide::Buy, 10.0, "C1")
            .unwrap();
        assert!(id > 0);
        let book = engine.get_order_book("EMPTY").unwrap();
        assert_eq!(book.last_price(), 0.0);
    }

    #[test]
    fn test_vwap_status_listing() {
        let engine = engine();
        let now = Instant::now();
        let end = now + Duration::from_secs(600);
        let a = engine
            .submit_vwap_order("AAPL", OrderSide::Buy, 100.0, 50.0, now, end, "C1")
            .unwrap();
        let b = engine
            .submit_vwap_order("AAPL", OrderSide::Sell, 101.0, 25.0, now, end, "C1")
            .unwrap();
        engine
            .submit_vwap_order("AAPL", OrderSide::Buy, 100.0, 10.0, now, end, "C2")
            .unwrap();
        engine
            .submit_vwap_order("MSFT", OrderSide::Buy, 50.0, 10.0, now, end, "C1")
            .unwrap();

        let listed = engine.active_vwap_orders("AAPL", "C1");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, a);
        assert_eq!(listed[1].id, b);
        assert!(engine.active_vwap_orders("AAPL", "C3").is_empty());
    }

    #[tokio::test]
    async fn test_worker_pool_runs_matching() {
        let engine = engine();
        engine.start();

        submit_limit(&engine, "AAPL", OrderSide::Sell, 150.0, 50.0, "C2");
        submit_limit(&engine, "AAPL", OrderSide::Buy, 150.0, 50.0, "C1");

        // matching pass was enqueued on submission; give the pool a moment
        tokio::time::sleep(Duration::from_millis(100)).await;

        let book = engine.get_order_book("AAPL").unwrap();
        assert_eq!(book.last_price(), 150.0);
        assert_eq!(book.best_bid(), 0.0);
        assert_eq!(book.best_ask(), 0.0);
    }

    #[test]
    fn test_stats_track_submissions() {
        let engine = engine();
        submit_limit(&engine, "AAPL", OrderSide::Buy, 100.0, 10.0, "C1");
        submit_limit(&engine, "AAPL", OrderSide::Sell, 100.0, 10.0, "C2");
        engine.process_matching("AAPL");

        let stats = engine.stats();
        assert_eq!(stats.orders_accepted, 2);
        assert_eq!(stats.active_symbols, 1);
        assert_eq!(stats.trades_executed, 1);
        assert_eq!(stats.total_volume, 10.0);
    }
}
