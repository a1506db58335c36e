//! Common test utilities and fixtures
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use perp_trader::audit::InMemoryAuditSink;
use perp_trader::common::channels::create_feed_channel_with_size;
use perp_trader::common::errors::{BotError, Result};
use perp_trader::common::traits::{ExchangeClient, MarketFeeds};
use perp_trader::common::types::{
    Candle, CandleClosed, CloseResult, ExchangePosition, MarkPrice, OrderFill, OrderKind,
    OrderResult, PositionSide, Precision, ProtectedEntry, ProtectiveOrder, Side, Signal,
    UserEvent,
};
use perp_trader::config::types::{AppSettings, TradingConfig};
use perp_trader::engine::{CandleWindow, PositionController};
use perp_trader::strategy::SignalSource;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::{BTreeSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const SYMBOL: &str = "BTCUSDT";

// ============================================================================
// Fixtures
// ============================================================================

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// One-minute candle opening `minute` minutes after the base time
pub fn candle(minute: i64, close: Decimal) -> Candle {
    let open_time = base_time() + ChronoDuration::minutes(minute);
    Candle {
        open_time,
        close_time: open_time + ChronoDuration::seconds(59),
        open: close,
        high: close,
        low: close,
        close,
        volume: dec!(10),
        taker_buy_volume: dec!(5),
    }
}

pub fn candle_closed(minute: i64, close: Decimal) -> CandleClosed {
    CandleClosed {
        symbol: SYMBOL.to_string(),
        candle: candle(minute, close),
    }
}

pub fn mark(price: Decimal) -> MarkPrice {
    MarkPrice {
        symbol: SYMBOL.to_string(),
        price,
        timestamp: Utc::now(),
    }
}

pub fn fill(order_id: &str, kind: OrderKind, avg_price: Decimal, realized_pnl: Decimal) -> UserEvent {
    UserEvent::OrderFilled(OrderFill {
        symbol: SYMBOL.to_string(),
        order_id: order_id.to_string(),
        kind,
        side: Side::Sell,
        avg_price,
        filled_quantity: dec!(2.5),
        realized_pnl,
        timestamp: Utc::now(),
    })
}

pub fn trading_config() -> TradingConfig {
    TradingConfig {
        symbol: SYMBOL.to_string(),
        timeframe: "1m".to_string(),
        order_size_usdt: dec!(50),
        leverage: 5,
        stop_loss_pct: dec!(0.0053),
        take_profit_pct: dec!(0.0053),
        trailing_activation_pct: dec!(0.003),
        trailing_distance_pct: dec!(0.001),
        candle_history_limit: 10,
        settle_delay_ms: 0,
        flip_delay_ms: 0,
    }
}

pub fn fast_settings() -> AppSettings {
    AppSettings {
        reconnect_delay_ms: 10,
        max_reconnect_delay_ms: 100,
        reconciliation_interval_seconds: 3600,
        error_cooldown_seconds: 0,
        trailing_resweep_seconds: 1,
        ..Default::default()
    }
}

/// Poll `check` until it holds or roughly two seconds passed
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// ============================================================================
// Fake exchange
// ============================================================================

/// Calls received by [`FakeExchange`], in order
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Precision,
    Leverage(u32),
    Candles,
    Price,
    Market { side: Side, quantity: Decimal },
    ProtectedEntry { side: PositionSide, quantity: Decimal },
    CancelOrder(String),
    CancelAll,
    ClosePosition,
    RealizedPnl,
    OpenPositions,
}

/// In-memory exchange that fills every market order at the configured price
pub struct FakeExchange {
    calls: Mutex<Vec<Call>>,
    price: Mutex<Decimal>,
    precision: Precision,
    history: Vec<Candle>,
    positions: Mutex<Vec<ExchangePosition>>,
    realized_pnl: Mutex<Decimal>,
    protective: Mutex<Vec<ProtectiveOrder>>,
    open_orders: Mutex<BTreeSet<String>>,
    open_orders_at_entry: Mutex<Vec<Vec<String>>>,
    next_order_id: AtomicU64,
    reject_entries: AtomicBool,
    time_out_entries: AtomicBool,
    fail_closes: AtomicBool,
    accept_leverage: AtomicBool,
}

impl FakeExchange {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            price: Mutex::new(dec!(100)),
            precision: Precision {
                quantity_step: dec!(0.001),
                price_step: dec!(0.01),
            },
            history: (0..3).map(|m| candle(m, dec!(100))).collect(),
            positions: Mutex::new(Vec::new()),
            realized_pnl: Mutex::new(dec!(0.75)),
            protective: Mutex::new(Vec::new()),
            open_orders: Mutex::new(BTreeSet::new()),
            open_orders_at_entry: Mutex::new(Vec::new()),
            next_order_id: AtomicU64::new(1),
            reject_entries: AtomicBool::new(false),
            time_out_entries: AtomicBool::new(false),
            fail_closes: AtomicBool::new(false),
            accept_leverage: AtomicBool::new(true),
        }
    }

    pub fn with_history(mut self, history: Vec<Candle>) -> Self {
        self.history = history;
        self
    }

    pub fn set_price(&self, price: Decimal) {
        *self.price.lock().unwrap() = price;
    }

    pub fn set_realized_pnl(&self, pnl: Decimal) {
        *self.realized_pnl.lock().unwrap() = pnl;
    }

    pub fn reject_entries(&self, reject: bool) {
        self.reject_entries.store(reject, Ordering::SeqCst);
    }

    /// Fill entry market orders but time out before protecting them
    pub fn time_out_entries(&self, time_out: bool) {
        self.time_out_entries.store(time_out, Ordering::SeqCst);
    }

    pub fn fail_closes(&self, fail: bool) {
        self.fail_closes.store(fail, Ordering::SeqCst);
    }

    pub fn reject_leverage(&self) {
        self.accept_leverage.store(false, Ordering::SeqCst);
    }

    /// Simulate the position being closed outside the bot
    pub fn go_flat(&self) {
        self.positions.lock().unwrap().clear();
    }

    pub fn has_position(&self) -> bool {
        !self.positions.lock().unwrap().is_empty()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, matches: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| matches(c)).count()
    }

    /// Order id of the most recent protective order of `kind`
    pub fn protective_id(&self, kind: OrderKind) -> Option<String> {
        self.protective
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|o| o.kind == kind)
            .map(|o| o.order_id.clone())
    }

    /// Ids of orders resting on the book, in id order
    pub fn open_order_ids(&self) -> Vec<String> {
        self.open_orders.lock().unwrap().iter().cloned().collect()
    }

    /// Resting orders seen by each protected entry when it was submitted
    pub fn open_orders_at_entry(&self) -> Vec<Vec<String>> {
        self.open_orders_at_entry.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn order_id(&self) -> String {
        self.next_order_id.fetch_add(1, Ordering::SeqCst).to_string()
    }

    fn current_price(&self) -> Decimal {
        *self.price.lock().unwrap()
    }
}

#[async_trait]
impl ExchangeClient for FakeExchange {
    async fn get_symbol_precision(&self, _symbol: &str) -> Result<Precision> {
        self.record(Call::Precision);
        Ok(self.precision)
    }

    async fn set_leverage(&self, _symbol: &str, leverage: u32) -> Result<bool> {
        self.record(Call::Leverage(leverage));
        Ok(self.accept_leverage.load(Ordering::SeqCst))
    }

    async fn get_historical_candles(
        &self,
        _symbol: &str,
        _timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.record(Call::Candles);
        let skip = self.history.len().saturating_sub(limit);
        Ok(self.history[skip..].to_vec())
    }

    async fn get_market_price(&self, _symbol: &str) -> Result<Decimal> {
        self.record(Call::Price);
        Ok(self.current_price())
    }

    async fn submit_market_order(
        &self,
        _symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderResult> {
        self.record(Call::Market { side, quantity });
        Ok(OrderResult {
            order_id: self.order_id(),
            avg_price: Some(self.current_price()),
            executed_quantity: quantity,
            protective_orders: Vec::new(),
        })
    }

    async fn submit_market_order_with_protections(
        &self,
        entry: &ProtectedEntry,
    ) -> Result<OrderResult> {
        self.record(Call::ProtectedEntry {
            side: entry.side,
            quantity: entry.quantity,
        });
        let resting = self.open_order_ids();
        self.open_orders_at_entry.lock().unwrap().push(resting);
        if self.reject_entries.load(Ordering::SeqCst) {
            return Err(BotError::ExchangeRejection {
                code: -2019,
                message: "Margin is insufficient.".into(),
            });
        }

        let price = self.current_price();
        let position = ExchangePosition {
            symbol: entry.symbol.clone(),
            amount: entry.quantity * entry.side.sign(),
            entry_price: price,
            unrealized_pnl: Decimal::ZERO,
        };
        if self.time_out_entries.load(Ordering::SeqCst) {
            *self.positions.lock().unwrap() = vec![position];
            return Err(BotError::Timeout("order response not received".into()));
        }

        let order_id = self.order_id();
        let protective_orders = vec![
            ProtectiveOrder {
                order_id: self.order_id(),
                kind: OrderKind::Stop,
            },
            ProtectiveOrder {
                order_id: self.order_id(),
                kind: OrderKind::TakeProfit,
            },
        ];
        self.protective
            .lock()
            .unwrap()
            .extend(protective_orders.iter().cloned());
        self.open_orders
            .lock()
            .unwrap()
            .extend(protective_orders.iter().map(|o| o.order_id.clone()));
        *self.positions.lock().unwrap() = vec![position];

        Ok(OrderResult {
            order_id,
            avg_price: Some(price),
            executed_quantity: entry.quantity,
            protective_orders,
        })
    }

    async fn cancel_order(&self, _symbol: &str, order_id: &str) -> Result<()> {
        self.record(Call::CancelOrder(order_id.to_string()));
        self.open_orders.lock().unwrap().remove(order_id);
        Ok(())
    }

    async fn cancel_all_open_orders(&self, _symbol: &str) -> Result<()> {
        self.record(Call::CancelAll);
        self.open_orders.lock().unwrap().clear();
        Ok(())
    }

    async fn close_open_position(&self, symbol: &str) -> Result<CloseResult> {
        self.record(Call::ClosePosition);
        if self.fail_closes.load(Ordering::SeqCst) {
            return Err(BotError::Transport("connection reset".into()));
        }
        let mut positions = self.positions.lock().unwrap();
        let Some(index) = positions.iter().position(|p| p.symbol == symbol) else {
            return Ok(CloseResult {
                closed: false,
                order: None,
            });
        };
        let position = positions.remove(index);
        drop(positions);

        Ok(CloseResult {
            closed: true,
            order: Some(OrderResult {
                order_id: self.order_id(),
                avg_price: Some(self.current_price()),
                executed_quantity: position.amount.abs(),
                protective_orders: Vec::new(),
            }),
        })
    }

    async fn get_last_realized_pnl(&self, _symbol: &str) -> Result<Decimal> {
        self.record(Call::RealizedPnl);
        Ok(*self.realized_pnl.lock().unwrap())
    }

    async fn get_open_positions(&self, symbol: Option<&str>) -> Result<Vec<ExchangePosition>> {
        self.record(Call::OpenPositions);
        Ok(self
            .positions
            .lock()
            .unwrap()
            .iter()
            .filter(|p| symbol.map_or(true, |s| p.symbol == s))
            .cloned()
            .collect())
    }
}

// ============================================================================
// Fake feeds
// ============================================================================

/// Feeds whose senders stay with the test
#[derive(Default)]
pub struct FakeFeeds {
    candles: Mutex<Option<mpsc::Sender<CandleClosed>>>,
    marks: Mutex<Option<mpsc::Sender<MarkPrice>>>,
    users: Mutex<Option<mpsc::Sender<UserEvent>>>,
    candle_subscriptions: AtomicUsize,
    mark_subscriptions: AtomicUsize,
    user_subscriptions: AtomicUsize,
}

impl FakeFeeds {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn candle_subscriptions(&self) -> usize {
        self.candle_subscriptions.load(Ordering::SeqCst)
    }

    pub fn mark_subscriptions(&self) -> usize {
        self.mark_subscriptions.load(Ordering::SeqCst)
    }

    pub fn user_subscriptions(&self) -> usize {
        self.user_subscriptions.load(Ordering::SeqCst)
    }

    pub async fn send_candle(&self, event: CandleClosed) -> bool {
        let sender = self.candles.lock().unwrap().clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn send_mark(&self, event: MarkPrice) -> bool {
        let sender = self.marks.lock().unwrap().clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn send_user_event(&self, event: UserEvent) -> bool {
        let sender = self.users.lock().unwrap().clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    /// Close the candle stream as if the connection dropped
    pub fn drop_candle_stream(&self) {
        self.candles.lock().unwrap().take();
    }
}

#[async_trait]
impl MarketFeeds for FakeFeeds {
    async fn subscribe_candles(
        &self,
        _symbol: &str,
        _timeframe: &str,
    ) -> Result<mpsc::Receiver<CandleClosed>> {
        let (sender, receiver) = create_feed_channel_with_size(16);
        *self.candles.lock().unwrap() = Some(sender);
        self.candle_subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(receiver)
    }

    async fn subscribe_mark_price(&self, _symbol: &str) -> Result<mpsc::Receiver<MarkPrice>> {
        let (sender, receiver) = create_feed_channel_with_size(16);
        *self.marks.lock().unwrap() = Some(sender);
        self.mark_subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(receiver)
    }

    async fn subscribe_user_events(&self) -> Result<mpsc::Receiver<UserEvent>> {
        let (sender, receiver) = create_feed_channel_with_size(16);
        *self.users.lock().unwrap() = Some(sender);
        self.user_subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(receiver)
    }
}

// ============================================================================
// Scripted signal source
// ============================================================================

/// Answers from a queue, then HOLD
#[derive(Default)]
pub struct ScriptedSignal {
    script: Mutex<VecDeque<Signal>>,
}

impl ScriptedSignal {
    pub fn new(signals: impl IntoIterator<Item = Signal>) -> Self {
        Self {
            script: Mutex::new(signals.into_iter().collect()),
        }
    }

    pub fn push(&self, signal: Signal) {
        self.script.lock().unwrap().push_back(signal);
    }
}

impl SignalSource for ScriptedSignal {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn min_candles(&self) -> usize {
        1
    }

    fn evaluate(&self, _window: &CandleWindow) -> Signal {
        self.script.lock().unwrap().pop_front().unwrap_or(Signal::Hold)
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub exchange: Arc<FakeExchange>,
    pub feeds: Arc<FakeFeeds>,
    pub signal: Arc<ScriptedSignal>,
    pub audit: Arc<InMemoryAuditSink>,
    pub controller: PositionController,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_exchange(FakeExchange::new())
    }

    pub fn with_exchange(exchange: FakeExchange) -> Self {
        let exchange = Arc::new(exchange);
        let feeds = Arc::new(FakeFeeds::new());
        let signal = Arc::new(ScriptedSignal::default());
        let audit = Arc::new(InMemoryAuditSink::new());
        let controller = PositionController::new(
            exchange.clone(),
            feeds.clone(),
            signal.clone(),
            audit.clone(),
            trading_config(),
            fast_settings(),
        );
        Self {
            exchange,
            feeds,
            signal,
            audit,
            controller,
        }
    }

    /// Start the controller and wait until every feed is subscribed
    pub async fn start(&self) {
        self.controller.start(SYMBOL).await.unwrap();
        let feeds = self.feeds.clone();
        assert!(
            eventually(|| {
                let feeds = feeds.clone();
                async move {
                    feeds.candle_subscriptions() > 0
                        && feeds.mark_subscriptions() > 0
                        && feeds.user_subscriptions() > 0
                }
            })
            .await,
            "feeds were never subscribed"
        );
    }

    /// Open a position of `side` at the exchange's current price
    pub async fn open(&self, side: PositionSide, minute: i64) {
        self.signal.push(match side {
            PositionSide::Long => Signal::Long,
            PositionSide::Short => Signal::Short,
        });
        self.controller
            .on_candle_closed(candle_closed(minute, dec!(100)))
            .await
            .unwrap();
        let status = self.controller.get_status().await;
        assert_eq!(status.side, Some(side), "entry did not open: {:?}", status);
    }

    pub async fn wait_for_records(&self, count: usize) -> bool {
        let audit = self.audit.clone();
        eventually(|| {
            let audit = audit.clone();
            async move { audit.len().await >= count }
        })
        .await
    }
}
