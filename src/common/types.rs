//! Unified types shared by the controller, the exchange client and the feeds

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Order side (buy or sell)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Direction of an open position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Order side that opens a position in this direction
    pub fn entry_side(self) -> Side {
        match self {
            PositionSide::Long => Side::Buy,
            PositionSide::Short => Side::Sell,
        }
    }

    /// Order side that closes a position in this direction
    pub fn exit_side(self) -> Side {
        self.entry_side().opposite()
    }

    pub fn opposite(self) -> Self {
        match self {
            PositionSide::Long => PositionSide::Short,
            PositionSide::Short => PositionSide::Long,
        }
    }

    /// +1 for long, -1 for short
    pub fn sign(self) -> Decimal {
        match self {
            PositionSide::Long => Decimal::ONE,
            PositionSide::Short => Decimal::NEGATIVE_ONE,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "LONG"),
            PositionSide::Short => write!(f, "SHORT"),
        }
    }
}

/// Output of a signal source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Long,
    Short,
    Hold,
}

impl Signal {
    /// The position direction this signal asks for, if any
    pub fn side(self) -> Option<PositionSide> {
        match self {
            Signal::Long => Some(PositionSide::Long),
            Signal::Short => Some(PositionSide::Short),
            Signal::Hold => None,
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Signal::Long => write!(f, "LONG"),
            Signal::Short => write!(f, "SHORT"),
            Signal::Hold => write!(f, "HOLD"),
        }
    }
}

/// A closed OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    /// Total traded base volume
    pub volume: Decimal,
    /// Base volume initiated by market buys
    pub taker_buy_volume: Decimal,
}

impl Candle {
    /// Base volume initiated by market sells
    pub fn taker_sell_volume(&self) -> Decimal {
        self.volume - self.taker_buy_volume
    }

    pub fn is_green(&self) -> bool {
        self.close > self.open
    }

    pub fn is_red(&self) -> bool {
        self.close < self.open
    }
}

/// Candle close event from the market feed
#[derive(Debug, Clone, PartialEq)]
pub struct CandleClosed {
    pub symbol: String,
    pub candle: Candle,
}

/// Mark price tick
#[derive(Debug, Clone, PartialEq)]
pub struct MarkPrice {
    pub symbol: String,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Kind of order the bot submits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderKind {
    Market,
    TakeProfit,
    Stop,
}

/// An order the controller wants placed
#[derive(Debug, Clone, PartialEq)]
pub struct OrderIntent {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub kind: OrderKind,
    /// Trigger price for stop / take-profit orders
    pub trigger_price: Option<Decimal>,
}

impl OrderIntent {
    pub fn market(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            kind: OrderKind::Market,
            trigger_price: None,
        }
    }

    pub fn protective(
        symbol: impl Into<String>,
        side: Side,
        quantity: Decimal,
        kind: OrderKind,
        trigger_price: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            quantity,
            kind,
            trigger_price: Some(trigger_price),
        }
    }
}

/// Parameters of an entry with attached stop and take-profit orders
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectedEntry {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: Decimal,
    /// Reference price the protective triggers are derived from
    pub entry_price: Decimal,
    pub stop_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub price_step: Decimal,
}

impl ProtectedEntry {
    /// Stop trigger, rounded to the price step
    pub fn stop_price(&self) -> Decimal {
        let raw = match self.side {
            PositionSide::Long => self.entry_price * (Decimal::ONE - self.stop_pct),
            PositionSide::Short => self.entry_price * (Decimal::ONE + self.stop_pct),
        };
        round_to_step(raw, self.price_step)
    }

    /// Take-profit trigger, rounded to the price step
    pub fn take_profit_price(&self) -> Decimal {
        let raw = match self.side {
            PositionSide::Long => self.entry_price * (Decimal::ONE + self.take_profit_pct),
            PositionSide::Short => self.entry_price * (Decimal::ONE - self.take_profit_pct),
        };
        round_to_step(raw, self.price_step)
    }

    /// Entry, stop and take-profit orders in submission order
    pub fn intents(&self) -> [OrderIntent; 3] {
        let exit = self.side.exit_side();
        [
            OrderIntent::market(&self.symbol, self.side.entry_side(), self.quantity),
            OrderIntent::protective(
                &self.symbol,
                exit,
                self.quantity,
                OrderKind::Stop,
                self.stop_price(),
            ),
            OrderIntent::protective(
                &self.symbol,
                exit,
                self.quantity,
                OrderKind::TakeProfit,
                self.take_profit_price(),
            ),
        ]
    }
}

/// A protective order attached to a position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectiveOrder {
    pub order_id: String,
    pub kind: OrderKind,
}

/// Result of a submitted order
#[derive(Debug, Clone, PartialEq)]
pub struct OrderResult {
    pub order_id: String,
    /// Average fill price, when the exchange reports it
    pub avg_price: Option<Decimal>,
    pub executed_quantity: Decimal,
    /// Stop / take-profit orders placed alongside the entry
    pub protective_orders: Vec<ProtectiveOrder>,
}

/// Outcome of closing whatever position the exchange reports
#[derive(Debug, Clone, PartialEq)]
pub struct CloseResult {
    /// False when the exchange already had no position
    pub closed: bool,
    pub order: Option<OrderResult>,
}

/// A position as reported by the exchange
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangePosition {
    pub symbol: String,
    /// Signed amount: positive long, negative short
    pub amount: Decimal,
    pub entry_price: Decimal,
    pub unrealized_pnl: Decimal,
}

impl ExchangePosition {
    pub fn is_open(&self) -> bool {
        !self.amount.is_zero()
    }
}

/// Order-state events from the account's user stream
#[derive(Debug, Clone, PartialEq)]
pub enum UserEvent {
    OrderFilled(OrderFill),
    OrderCanceled { symbol: String, order_id: String },
    /// Anything the controller does not act on
    Other(String),
}

/// Payload of an order fill
#[derive(Debug, Clone, PartialEq)]
pub struct OrderFill {
    pub symbol: String,
    pub order_id: String,
    pub kind: OrderKind,
    pub side: Side,
    pub avg_price: Decimal,
    pub filled_quantity: Decimal,
    pub realized_pnl: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Symbol precision from exchange metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Precision {
    pub quantity_step: Decimal,
    pub price_step: Decimal,
}

impl Precision {
    pub fn floor_quantity(&self, quantity: Decimal) -> Decimal {
        floor_to_step(quantity, self.quantity_step)
    }

    pub fn round_price(&self, price: Decimal) -> Decimal {
        round_to_step(price, self.price_step)
    }
}

/// Round down to a multiple of `step`; a non-positive step leaves the value untouched
pub fn floor_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).floor() * step).normalize()
}

/// Round to the nearest multiple of `step`
pub fn round_to_step(value: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return value;
    }
    ((value / step).round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero) * step)
        .normalize()
}

/// How a position ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    #[serde(rename = "CLOSED_BY_TAKE_PROFIT_MARKET")]
    ClosedByTakeProfit,
    #[serde(rename = "CLOSED_BY_STOP_MARKET")]
    ClosedByStop,
    ClosedByTrailingStop,
    ClosedByFlip,
    ClosedExternally,
}

impl TradeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeStatus::ClosedByTakeProfit => "CLOSED_BY_TAKE_PROFIT_MARKET",
            TradeStatus::ClosedByStop => "CLOSED_BY_STOP_MARKET",
            TradeStatus::ClosedByTrailingStop => "CLOSED_BY_TRAILING_STOP",
            TradeStatus::ClosedByFlip => "CLOSED_BY_FLIP",
            TradeStatus::ClosedExternally => "CLOSED_EXTERNALLY",
        }
    }
}

impl std::fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of a closed position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub symbol: String,
    pub side: PositionSide,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub status: TradeStatus,
    pub pnl: Decimal,
    pub timestamp: DateTime<Utc>,
}
