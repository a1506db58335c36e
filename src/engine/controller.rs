//! Position controller
//!
//! Owns the single position of the managed symbol and merges the three feeds
//! (closed candles, mark price ticks, order fills) plus periodic
//! reconciliation into one consistent view of it.
//!
//! # Serialization
//!
//! Every read and write of position state goes through one `tokio::sync::Mutex`
//! ([`Core`]). The lock is held across exchange calls, so no two order
//! submissions for the symbol are ever in flight together and a close that
//! started always finishes before anyone else looks at the position.
//!
//! # At-most-once close
//!
//! The protective-fill path and the trailing-stop path can both decide to
//! close the same position. Whichever takes the lock first closes it, writes
//! the trade record and clears the position. The other finds either no
//! position, a position with a different generation, or a fill for an order
//! that does not guard the current position, and does nothing.
//!
//! # Trailing tracker
//!
//! Each position gets its own tracker task, tagged with the position's
//! generation. It re-evaluates the trailing stop on every new mark price and
//! on a periodic resweep, and is cancelled on every path that clears the
//! position.

use chrono::Utc;
use futures_util::FutureExt;
use rust_decimal::Decimal;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::candles::{CandleWindow, PushOutcome};
use super::feeds::{run_periodic, shutdown_signalled, timeframe_duration, FeedLoop, ReconnectPolicy};
use super::position::{ControllerState, Position, ProtectiveOrders};
use super::trailing::{self, TrailingAction, TrailingParams, TrailingState};
use crate::common::errors::{BotError, ErrorKind, Result};
use crate::common::traits::{AuditSink, ExchangeClient, MarketFeeds};
use crate::common::types::{
    CandleClosed, MarkPrice, OrderFill, PositionSide, Precision, ProtectedEntry, Signal,
    TradeRecord, TradeStatus, UserEvent,
};
use crate::config::types::{AppSettings, TradingConfig};
use crate::strategy::SignalSource;

/// Point-in-time view of the controller for status consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BotStatus {
    pub running: bool,
    pub state: ControllerState,
    pub symbol: Option<String>,
    pub side: Option<PositionSide>,
    pub entry_price: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub trailing_armed: bool,
    pub last_signal: Option<Signal>,
    /// Latest terminal outcome in readable form
    pub status_message: String,
}

/// Entry size: `order_size * leverage / price`, floored to the quantity step
pub fn entry_quantity(
    order_size_usdt: Decimal,
    leverage: u32,
    price: Decimal,
    precision: &Precision,
) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    precision.floor_quantity(order_size_usdt * Decimal::from(leverage) / price)
}

/// What ended a position
#[derive(Debug, Clone)]
enum ExitTrigger {
    /// A stop or take-profit order guarding the position filled
    ProtectiveFill(OrderFill),
    /// The trailing stop was breached at this mark price
    TrailingStop { mark: Decimal },
    /// An opposing signal arrived
    Flip,
    /// Reconciliation found the exchange already flat
    External,
}

struct TrackerHandle {
    generation: u64,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TrackerHandle {
    /// Signal the tracker to stop without waiting for it
    fn cancel(self) -> JoinHandle<()> {
        let _ = self.cancel.send(true);
        self.task
    }
}

/// State guarded by the controller lock
struct Core {
    state: ControllerState,
    symbol: Option<String>,
    position: Option<Position>,
    window: CandleWindow,
    precision: Option<Precision>,
    next_generation: u64,
    tracker: Option<TrackerHandle>,
    last_signal: Option<Signal>,
    status_message: String,
    /// An entry failed without a clear answer and the exchange may still
    /// hold an untracked position from it
    unconfirmed_entry: bool,
}

impl Core {
    fn transition(&mut self, next: ControllerState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(BotError::StateInconsistency(format!(
                "illegal transition {} -> {}",
                self.state, next
            )));
        }
        debug!(from = %self.state, to = %next, "State transition");
        self.state = next;
        Ok(())
    }

    fn is_for(&self, symbol: &str) -> bool {
        self.symbol.as_deref() == Some(symbol)
    }

    /// Cancel the tracker of the current position, if any
    fn cancel_tracker(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            debug!(generation = tracker.generation, "Cancelling trailing tracker");
            drop(tracker.cancel());
        }
    }
}

struct RunHandles {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

struct Inner {
    exchange: Arc<dyn ExchangeClient>,
    feeds: Arc<dyn MarketFeeds>,
    signal: Arc<dyn SignalSource>,
    audit: Arc<dyn AuditSink>,
    trading: TradingConfig,
    settings: AppSettings,
    core: Mutex<Core>,
    running: AtomicBool,
    lifecycle: Mutex<Option<RunHandles>>,
    mark: watch::Sender<Option<Decimal>>,
}

/// Controller for one symbol on one account
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct PositionController {
    inner: Arc<Inner>,
}

impl PositionController {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        feeds: Arc<dyn MarketFeeds>,
        signal: Arc<dyn SignalSource>,
        audit: Arc<dyn AuditSink>,
        trading: TradingConfig,
        settings: AppSettings,
    ) -> Self {
        let window = CandleWindow::new(trading.candle_history_limit);
        let (mark, _) = watch::channel(None);
        Self {
            inner: Arc::new(Inner {
                exchange,
                feeds,
                signal,
                audit,
                trading,
                settings,
                core: Mutex::new(Core {
                    state: ControllerState::Flat,
                    symbol: None,
                    position: None,
                    window,
                    precision: None,
                    next_generation: 0,
                    tracker: None,
                    last_signal: None,
                    status_message: "Not started".to_string(),
                    unconfirmed_entry: false,
                }),
                running: AtomicBool::new(false),
                lifecycle: Mutex::new(None),
                mark,
            }),
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Start trading `symbol`; a no-op when already running
    ///
    /// Loads symbol precision, sets leverage, seeds the candle window and
    /// starts the feed loops. A position still held from a previous run gets
    /// its trailing tracker back.
    pub async fn start(&self, symbol: &str) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.is_some() {
            debug!(symbol, "Controller already running");
            return Ok(());
        }

        let symbol = symbol.trim().to_uppercase();
        info!(symbol = %symbol, timeframe = %self.inner.trading.timeframe, "Starting controller");

        if let Err(e) = self.bootstrap(&symbol).await {
            error!(symbol = %symbol, error = %e, "Controller failed to start");
            self.inner.core.lock().await.status_message = format!("Start failed: {}", e);
            return Err(e);
        }

        *lifecycle = Some(self.spawn_loops(&symbol));
        self.inner.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Stop the feeds and the tracker; an open position is left in place
    pub async fn stop(&self) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        let Some(handles) = lifecycle.take() else {
            debug!("Controller not running");
            return;
        };

        info!("Stopping controller");
        let _ = handles.shutdown.send(true);
        for task in handles.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "Feed task ended abnormally");
            }
        }

        let tracker = self.inner.core.lock().await.tracker.take();
        if let Some(tracker) = tracker {
            if let Err(e) = tracker.cancel().await {
                error!(error = %e, "Trailing tracker ended abnormally");
            }
        }

        self.inner.running.store(false, Ordering::SeqCst);
        let mut core = self.inner.core.lock().await;
        core.status_message = match &core.position {
            Some(position) => format!(
                "Stopped; {} {} position left open",
                position.symbol, position.side
            ),
            None => "Stopped".to_string(),
        };
        info!(state = %core.state, "Controller stopped");
    }

    pub async fn get_status(&self) -> BotStatus {
        let core = self.inner.core.lock().await;
        let position = core.position.as_ref();
        BotStatus {
            running: self.is_running(),
            state: core.state,
            symbol: core.symbol.clone(),
            side: position.map(|p| p.side),
            entry_price: position.map(|p| p.entry_price),
            quantity: position.map(|p| p.quantity),
            trailing_armed: position.map(|p| p.trailing_armed).unwrap_or(false),
            last_signal: core.last_signal,
            status_message: core.status_message.clone(),
        }
    }

    async fn bootstrap(&self, symbol: &str) -> Result<()> {
        let exchange = &self.inner.exchange;
        let trading = &self.inner.trading;

        let precision = exchange.get_symbol_precision(symbol).await?;
        debug!(symbol, quantity_step = %precision.quantity_step, price_step = %precision.price_step, "Loaded precision");

        if !exchange.set_leverage(symbol, trading.leverage).await? {
            return Err(BotError::rejected(format!(
                "leverage {}x not accepted for {}",
                trading.leverage, symbol
            )));
        }

        let history = exchange
            .get_historical_candles(symbol, &trading.timeframe, trading.candle_history_limit)
            .await?;
        if history.is_empty() {
            return Err(BotError::DataUnavailable(format!(
                "no historical candles for {}",
                symbol
            )));
        }

        let mut core = self.inner.core.lock().await;
        if let Some(position) = &core.position {
            if position.symbol != symbol {
                return Err(BotError::StateInconsistency(format!(
                    "holding a {} position, cannot start on {}",
                    position.symbol, symbol
                )));
            }
        }

        core.symbol = Some(symbol.to_string());
        core.precision = Some(precision);
        core.window = CandleWindow::seeded(trading.candle_history_limit, history);
        core.status_message = format!("Waiting for signal on {} ({})", symbol, trading.timeframe);

        if core.position.is_some() {
            info!(symbol, "Resuming trailing stop for open position");
            self.spawn_tracker(&mut core);
        }
        Ok(())
    }

    fn spawn_loops(&self, symbol: &str) -> RunHandles {
        let settings = &self.inner.settings;
        let (shutdown, shutdown_rx) = watch::channel(false);
        let policy = ReconnectPolicy::from_settings(settings);
        let cooldown = Duration::from_secs(settings.error_cooldown_seconds);
        let timeframe = self.inner.trading.timeframe.clone();

        let candles = {
            let feeds = self.inner.feeds.clone();
            let controller = self.clone();
            let symbol = symbol.to_string();
            let timeframe = timeframe.clone();
            FeedLoop::new("candles", shutdown_rx.clone())
                .with_policy(policy)
                .with_cooldown(cooldown)
                .with_watchdog(timeframe_duration(&timeframe).map(|d| d * 2))
                .run(
                    move || {
                        let feeds = feeds.clone();
                        let symbol = symbol.clone();
                        let timeframe = timeframe.clone();
                        async move { feeds.subscribe_candles(&symbol, &timeframe).await }
                    },
                    move |event| {
                        let controller = controller.clone();
                        async move { controller.on_candle_closed(event).await }
                    },
                )
        };

        let marks = {
            let feeds = self.inner.feeds.clone();
            let controller = self.clone();
            let symbol = symbol.to_string();
            FeedLoop::new("mark_price", shutdown_rx.clone())
                .with_policy(policy)
                .with_cooldown(cooldown)
                .with_watchdog(Some(Duration::from_secs(settings.watchdog_timeout_seconds)))
                .run(
                    move || {
                        let feeds = feeds.clone();
                        let symbol = symbol.clone();
                        async move { feeds.subscribe_mark_price(&symbol).await }
                    },
                    move |event| {
                        let controller = controller.clone();
                        async move { controller.on_mark_price(event).await }
                    },
                )
        };

        let users = {
            let feeds = self.inner.feeds.clone();
            let controller = self.clone();
            FeedLoop::new("user_events", shutdown_rx.clone())
                .with_policy(policy)
                .with_cooldown(cooldown)
                .run(
                    move || {
                        let feeds = feeds.clone();
                        async move { feeds.subscribe_user_events().await }
                    },
                    move |event| {
                        let controller = controller.clone();
                        async move { controller.on_user_event(event).await }
                    },
                )
        };

        let reconciliation = {
            let controller = self.clone();
            run_periodic(
                "reconciliation",
                Duration::from_secs(settings.reconciliation_interval_seconds.max(1)),
                cooldown,
                shutdown_rx,
                move || {
                    let controller = controller.clone();
                    async move { controller.reconcile().await }
                },
            )
        };

        RunHandles {
            shutdown,
            tasks: vec![
                tokio::spawn(candles),
                tokio::spawn(marks),
                tokio::spawn(users),
                tokio::spawn(reconciliation),
            ],
        }
    }

    /// Handle a closed candle: update the window, ask the signal source, act
    pub async fn on_candle_closed(&self, event: CandleClosed) -> Result<()> {
        let settle = self.inner.trading.settle_delay();
        if !settle.is_zero() {
            sleep(settle).await;
        }

        let mut core = self.inner.core.lock().await;
        if !core.is_for(&event.symbol) {
            debug!(symbol = %event.symbol, "Ignoring candle for another symbol");
            return Ok(());
        }
        let open_time = event.candle.open_time;
        match core.window.push(event.candle) {
            PushOutcome::Appended => {}
            PushOutcome::Replaced => {
                debug!(
                    symbol = %event.symbol,
                    open_time = %open_time,
                    "Candle already evaluated, window refreshed"
                );
                return Ok(());
            }
            PushOutcome::Stale => {
                debug!(symbol = %event.symbol, open_time = %open_time, "Ignoring stale candle");
                return Ok(());
            }
        }

        let signal = self.inner.signal.evaluate(&core.window);
        core.last_signal = Some(signal);
        info!(
            symbol = %event.symbol,
            source = self.inner.signal.name(),
            signal = %signal,
            state = %core.state,
            "Candle closed"
        );

        let Some(wanted) = signal.side() else {
            return Ok(());
        };

        match (core.state, core.position.as_ref().map(|p| p.side)) {
            (ControllerState::Flat, _) => self.enter(&mut core, wanted).await,
            (ControllerState::InPosition, Some(held)) if held == wanted => {
                debug!(side = %held, "Signal matches open position, nothing to do");
                Ok(())
            }
            (ControllerState::InPosition, Some(held)) => {
                info!(from = %held, to = %wanted, "Opposing signal, flipping position");
                self.close_position(&mut core, ExitTrigger::Flip).await?;
                sleep(self.inner.trading.flip_delay()).await;
                self.enter(&mut core, wanted).await
            }
            (state, _) => {
                warn!(state = %state, "Signal arrived in a transient state, ignoring");
                Ok(())
            }
        }
    }

    /// Publish a mark price tick to the trailing tracker
    pub async fn on_mark_price(&self, event: MarkPrice) -> Result<()> {
        {
            let core = self.inner.core.lock().await;
            if !core.is_for(&event.symbol) {
                return Ok(());
            }
        }
        self.inner.mark.send_replace(Some(event.price));
        Ok(())
    }

    /// Handle an account order event
    pub async fn on_user_event(&self, event: UserEvent) -> Result<()> {
        match event {
            UserEvent::OrderFilled(fill) => {
                let mut core = self.inner.core.lock().await;
                if !core.is_for(&fill.symbol) {
                    return Ok(());
                }
                let Some(position) = core.position.as_ref() else {
                    debug!(order_id = %fill.order_id, "Fill while flat, ignoring");
                    return Ok(());
                };
                if !position.protective_orders.owns(&fill.order_id) {
                    debug!(
                        order_id = %fill.order_id,
                        kind = ?fill.kind,
                        "Fill for an order not guarding the current position"
                    );
                    return Ok(());
                }
                info!(
                    symbol = %fill.symbol,
                    order_id = %fill.order_id,
                    price = %fill.avg_price,
                    "Protective order filled"
                );
                self.close_position(&mut core, ExitTrigger::ProtectiveFill(fill))
                    .await
            }
            UserEvent::OrderCanceled { symbol, order_id } => {
                let core = self.inner.core.lock().await;
                if let Some(position) = core.position.as_ref().filter(|_| core.is_for(&symbol)) {
                    if position.protective_orders.stop.as_deref() == Some(order_id.as_str()) {
                        warn!(
                            symbol = %symbol,
                            order_id = %order_id,
                            "Fixed stop was cancelled outside the bot"
                        );
                    }
                }
                Ok(())
            }
            UserEvent::Other(kind) => {
                debug!(event = %kind, "Ignoring user event");
                Ok(())
            }
        }
    }

    /// Compare local state with the exchange and reset when it went flat
    ///
    /// While flat, only a position left behind by a failed entry is looked
    /// for; it is flattened rather than adopted.
    pub async fn reconcile(&self) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        let Some(symbol) = core.symbol.clone() else {
            return Ok(());
        };
        if core.state == ControllerState::Flat && core.unconfirmed_entry {
            core.unconfirmed_entry = !self.flatten_untracked(&symbol).await;
            return Ok(());
        }
        if core.state != ControllerState::InPosition {
            return Ok(());
        }

        let positions = self.inner.exchange.get_open_positions(Some(&symbol)).await?;
        if positions.iter().any(|p| p.symbol == symbol && p.is_open()) {
            debug!(symbol = %symbol, "Reconciliation: position confirmed");
            return Ok(());
        }

        warn!(symbol = %symbol, "Exchange reports no position, resetting to flat");
        self.close_position(&mut core, ExitTrigger::External).await
    }

    async fn enter(&self, core: &mut Core, side: PositionSide) -> Result<()> {
        let Some(symbol) = core.symbol.clone() else {
            return Err(BotError::StateInconsistency("no symbol configured".into()));
        };
        let Some(precision) = core.precision else {
            return Err(BotError::StateInconsistency(
                "symbol precision not loaded".into(),
            ));
        };
        let exchange = &self.inner.exchange;
        let trading = &self.inner.trading;

        core.transition(ControllerState::Entering)?;
        core.status_message = format!("{} signal received", side);

        if core.unconfirmed_entry {
            core.unconfirmed_entry = !self.flatten_untracked(&symbol).await;
            if core.unconfirmed_entry {
                return self.abort_entry(
                    core,
                    "Exchange position from a failed entry is still unresolved".to_string(),
                );
            }
        }

        if let Err(e) = exchange.cancel_all_open_orders(&symbol).await {
            warn!(symbol = %symbol, error = %e, "Could not clear open orders before entry");
        }
        sleep(trading.flip_delay()).await;

        let price = match exchange.get_market_price(&symbol).await {
            Ok(price) if price > Decimal::ZERO => price,
            Ok(price) => {
                return self.abort_entry(core, format!("Invalid market price {}", price));
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Price unavailable, skipping entry");
                return self.abort_entry(core, "Could not fetch price for entry".to_string());
            }
        };

        let quantity = entry_quantity(trading.order_size_usdt, trading.leverage, price, &precision);
        info!(symbol = %symbol, side = %side, price = %price, quantity = %quantity, "Computed entry size");
        if quantity <= Decimal::ZERO {
            return self.abort_entry(core, "Computed quantity too small".to_string());
        }

        let entry = ProtectedEntry {
            symbol: symbol.clone(),
            side,
            quantity,
            entry_price: price,
            stop_pct: trading.stop_loss_pct,
            take_profit_pct: trading.take_profit_pct,
            price_step: precision.price_step,
        };

        let order = match exchange.submit_market_order_with_protections(&entry).await {
            Ok(order) => order,
            Err(e) if e.kind() == ErrorKind::ExchangeRejection => {
                warn!(symbol = %symbol, error = %e, "Entry rejected");
                return self.abort_entry(core, format!("Entry rejected: {}", e));
            }
            Err(e) => {
                // The market order may have filled before the failure
                warn!(symbol = %symbol, error = %e, "Entry outcome unknown, checking the exchange");
                core.unconfirmed_entry = !self.flatten_untracked(&symbol).await;
                self.abort_entry(core, format!("Entry failed: {}", e))?;
                return Err(e);
            }
        };

        let entry_price = order.avg_price.filter(|p| *p > Decimal::ZERO).unwrap_or(price);
        let quantity = if order.executed_quantity > Decimal::ZERO {
            order.executed_quantity
        } else {
            quantity
        };
        let protective = ProtectiveOrders::from_orders(&order.protective_orders);
        if protective.is_empty() {
            error!(symbol = %symbol, "Entry reported without any protective order");
        } else if protective.stop.is_none() {
            warn!(symbol = %symbol, "Entry reported without a fixed stop order");
        }

        core.next_generation += 1;
        let position = Position::open(
            core.next_generation,
            &symbol,
            side,
            entry_price,
            quantity,
            protective,
        );
        core.position = Some(position);
        core.transition(ControllerState::InPosition)?;
        core.status_message = format!("{} position opened at {}", side, entry_price);
        info!(
            symbol = %symbol,
            side = %side,
            entry_price = %entry_price,
            quantity = %quantity,
            order_id = %order.order_id,
            "Position opened"
        );

        self.spawn_tracker(core);
        Ok(())
    }

    /// Close any exchange position the controller does not track
    ///
    /// Returns true once the exchange is known to be flat.
    async fn flatten_untracked(&self, symbol: &str) -> bool {
        let exchange = &self.inner.exchange;
        let positions = match exchange.get_open_positions(Some(symbol)).await {
            Ok(positions) => positions,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Could not check for an untracked position");
                return false;
            }
        };
        if !positions.iter().any(|p| p.symbol == symbol && p.is_open()) {
            return true;
        }

        let inconsistency =
            BotError::StateInconsistency(format!("untracked {} position after a failed entry", symbol));
        error!(symbol = %symbol, error = %inconsistency, "Flattening untracked position");

        if let Err(e) = exchange.close_open_position(symbol).await {
            error!(symbol = %symbol, error = %e, "Could not flatten untracked position");
            return false;
        }
        if let Err(e) = exchange.cancel_all_open_orders(symbol).await {
            warn!(symbol = %symbol, error = %e, "Could not cancel orders of untracked position");
        }
        true
    }

    fn abort_entry(&self, core: &mut Core, message: String) -> Result<()> {
        core.transition(ControllerState::Flat)?;
        info!(reason = %message, "Entry abandoned");
        core.status_message = message;
        Ok(())
    }

    /// Close the current position and write its trade record
    ///
    /// Must be called with the lock held and a position present. On error the
    /// position is left untouched so the next trigger can retry.
    async fn close_position(&self, core: &mut Core, trigger: ExitTrigger) -> Result<()> {
        let Some(position) = core.position.clone() else {
            return Ok(());
        };
        let exchange = &self.inner.exchange;
        let symbol = position.symbol.clone();

        let mut exit_price = None;
        if matches!(trigger, ExitTrigger::TrailingStop { .. } | ExitTrigger::Flip) {
            let closed = exchange.close_open_position(&symbol).await?;
            if !closed.closed {
                debug!(symbol = %symbol, "Exchange already flat when closing");
            }
            exit_price = closed
                .order
                .and_then(|o| o.avg_price)
                .filter(|p| *p > Decimal::ZERO);
        }

        core.transition(ControllerState::Exiting)?;
        core.cancel_tracker();

        debug!(
            symbol = %symbol,
            orders = ?position.protective_orders.live_ids(),
            "Cancelling remaining protective orders"
        );
        if let Err(e) = exchange.cancel_all_open_orders(&symbol).await {
            warn!(symbol = %symbol, error = %e, "Could not cancel remaining protective orders");
        }

        let last_mark = *self.inner.mark.borrow();
        let (status, exit_price, pnl) = match &trigger {
            ExitTrigger::ProtectiveFill(fill) => {
                let status = if position.protective_orders.take_profit.as_deref()
                    == Some(fill.order_id.as_str())
                {
                    TradeStatus::ClosedByTakeProfit
                } else {
                    TradeStatus::ClosedByStop
                };
                (status, fill.avg_price, fill.realized_pnl)
            }
            ExitTrigger::TrailingStop { mark } => {
                let exit = exit_price.unwrap_or(*mark);
                let pnl = self.realized_pnl(&position, exit).await;
                (TradeStatus::ClosedByTrailingStop, exit, pnl)
            }
            ExitTrigger::Flip => {
                let exit = exit_price.or(last_mark).unwrap_or(position.entry_price);
                let pnl = self.realized_pnl(&position, exit).await;
                (TradeStatus::ClosedByFlip, exit, pnl)
            }
            ExitTrigger::External => {
                let exit = last_mark.unwrap_or(position.entry_price);
                let pnl = self.realized_pnl(&position, exit).await;
                (TradeStatus::ClosedExternally, exit, pnl)
            }
        };

        let record = TradeRecord {
            symbol: symbol.clone(),
            side: position.side,
            entry_price: position.entry_price,
            exit_price,
            quantity: position.quantity,
            status,
            pnl,
            timestamp: Utc::now(),
        };

        core.position = None;
        core.transition(ControllerState::Flat)?;
        core.status_message = format!("{} {} closed: {} (pnl {})", symbol, position.side, status, pnl);
        info!(
            symbol = %symbol,
            side = %position.side,
            status = %status,
            entry_price = %position.entry_price,
            exit_price = %exit_price,
            pnl = %pnl,
            "Position closed"
        );

        self.emit_record(record);
        Ok(())
    }

    async fn realized_pnl(&self, position: &Position, exit_price: Decimal) -> Decimal {
        match self
            .inner
            .exchange
            .get_last_realized_pnl(&position.symbol)
            .await
        {
            Ok(pnl) => pnl,
            Err(e) => {
                warn!(symbol = %position.symbol, error = %e, "Realized PnL unavailable, using mark estimate");
                position.pnl_at(exit_price)
            }
        }
    }

    fn emit_record(&self, record: TradeRecord) {
        let audit = self.inner.audit.clone();
        tokio::spawn(async move {
            if let Err(e) = audit.record_trade(&record).await {
                error!(symbol = %record.symbol, status = %record.status, error = %e, "Failed to record trade");
            }
        });
    }

    fn spawn_tracker(&self, core: &mut Core) {
        let Some(generation) = core.position.as_ref().map(|p| p.generation) else {
            return;
        };
        core.cancel_tracker();

        let (cancel, cancel_rx) = watch::channel(false);
        let prices = self.inner.mark.subscribe();
        let task = tokio::spawn(self.clone().track(generation, cancel_rx, prices));
        core.tracker = Some(TrackerHandle {
            generation,
            cancel,
            task,
        });
    }

    async fn track(
        self,
        generation: u64,
        mut cancel: watch::Receiver<bool>,
        mut prices: watch::Receiver<Option<Decimal>>,
    ) {
        let resweep = Duration::from_secs(self.inner.settings.trailing_resweep_seconds.max(1));
        let cooldown = Duration::from_secs(self.inner.settings.error_cooldown_seconds);
        let mut ticker = interval(resweep);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        debug!(generation, "Trailing tracker started");
        loop {
            let price = tokio::select! {
                _ = shutdown_signalled(&mut cancel) => break,
                changed = prices.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    *prices.borrow_and_update()
                }
                _ = ticker.tick() => *prices.borrow(),
            };
            let Some(price) = price else {
                continue;
            };

            let step = AssertUnwindSafe(self.evaluate_trailing(generation, price))
                .catch_unwind()
                .await;
            match step {
                Ok(Ok(true)) => {}
                Ok(Ok(false)) => break,
                Ok(Err(e)) => {
                    error!(generation, error = %e, "Trailing evaluation failed, cooling down");
                    tokio::select! {
                        _ = shutdown_signalled(&mut cancel) => break,
                        _ = sleep(cooldown) => {}
                    }
                }
                Err(_) => {
                    error!(generation, "Trailing evaluation panicked, cooling down");
                    tokio::select! {
                        _ = shutdown_signalled(&mut cancel) => break,
                        _ = sleep(cooldown) => {}
                    }
                }
            }
        }
        debug!(generation, "Trailing tracker stopped");
    }

    /// One trailing-stop step; `Ok(false)` once the position is gone
    async fn evaluate_trailing(&self, generation: u64, price: Decimal) -> Result<bool> {
        let mut core = self.inner.core.lock().await;
        if core.state != ControllerState::InPosition {
            return Ok(false);
        }
        let Some(position) = core.position.as_mut().filter(|p| p.generation == generation) else {
            return Ok(false);
        };

        let params = TrailingParams {
            activation_pct: self.inner.trading.trailing_activation_pct,
            distance_pct: self.inner.trading.trailing_distance_pct,
        };
        let state = TrailingState {
            armed: position.trailing_armed,
            high_water_mark: position.high_water_mark,
            low_water_mark: position.low_water_mark,
        };
        let outcome = trailing::evaluate(position.side, position.entry_price, state, price, &params);
        position.trailing_armed = outcome.state.armed;
        position.high_water_mark = outcome.state.high_water_mark;
        position.low_water_mark = outcome.state.low_water_mark;
        if let Some(stop_price) = outcome.action.stop_price() {
            debug!(generation, price = %price, stop_price = %stop_price, "Trailing stop evaluated");
        }

        match outcome.action {
            TrailingAction::Inactive => Ok(true),
            TrailingAction::Armed { stop_price } => {
                info!(
                    symbol = %position.symbol,
                    side = %position.side,
                    price = %price,
                    stop_price = %stop_price,
                    "Trailing stop armed"
                );
                core.status_message = format!("Trailing stop armed at {}", stop_price);
                self.cancel_take_profit(&mut core).await;
                Ok(true)
            }
            TrailingAction::Holding { .. } => {
                self.cancel_take_profit(&mut core).await;
                Ok(true)
            }
            TrailingAction::Close { stop_price } => {
                info!(
                    symbol = %position.symbol,
                    price = %price,
                    stop_price = %stop_price,
                    "Trailing stop hit"
                );
                self.close_position(&mut core, ExitTrigger::TrailingStop { mark: price })
                    .await?;
                Ok(false)
            }
        }
    }

    /// Pull the take-profit order once trailing has taken over
    async fn cancel_take_profit(&self, core: &mut Core) {
        let Some(position) = core.position.as_mut() else {
            return;
        };
        let orders = &mut position.protective_orders;
        let Some(order_id) = orders.take_profit.clone().filter(|_| !orders.take_profit_cancelled)
        else {
            return;
        };

        match self
            .inner
            .exchange
            .cancel_order(&position.symbol, &order_id)
            .await
        {
            Ok(()) => {
                orders.take_profit_cancelled = true;
                debug!(order_id = %order_id, "Take-profit cancelled, trailing stop in charge");
            }
            Err(e) => {
                warn!(order_id = %order_id, error = %e, "Could not cancel take-profit, will retry");
            }
        }
    }
}
