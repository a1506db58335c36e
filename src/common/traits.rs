//! Trait definitions for the controller's collaborators

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::mpsc;

use super::errors::Result;
use super::types::{
    Candle, CandleClosed, CloseResult, ExchangePosition, MarkPrice, OrderResult, Precision,
    ProtectedEntry, Side, TradeRecord, UserEvent,
};

/// Order and account operations against a futures exchange
///
/// All calls are awaited serially by the controller; implementations do not
/// need to guard against concurrent submissions for the same symbol.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Quantity and price steps for a symbol
    async fn get_symbol_precision(&self, symbol: &str) -> Result<Precision>;

    /// Set leverage; `Ok(false)` means the exchange kept a different value
    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<bool>;

    /// Most recent closed candles, oldest first
    async fn get_historical_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>>;

    /// Last traded price
    async fn get_market_price(&self, symbol: &str) -> Result<Decimal>;

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderResult>;

    /// Market entry followed by stop and take-profit orders
    ///
    /// Fails without leaving a position behind if the protective orders
    /// cannot be placed.
    async fn submit_market_order_with_protections(
        &self,
        entry: &ProtectedEntry,
    ) -> Result<OrderResult>;

    /// Cancel one order; cancelling an order that no longer exists succeeds
    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()>;

    /// Cancel every open order on the symbol; a no-op when none exist
    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<()>;

    /// Flatten whatever position the exchange holds for the symbol
    async fn close_open_position(&self, symbol: &str) -> Result<CloseResult>;

    /// Realized PnL of the most recent closing fill
    async fn get_last_realized_pnl(&self, symbol: &str) -> Result<Decimal>;

    /// Open positions, optionally restricted to one symbol
    async fn get_open_positions(&self, symbol: Option<&str>) -> Result<Vec<ExchangePosition>>;
}

/// Subscriptions to the exchange's event streams
///
/// Each call opens one connection. The returned receiver yields events until
/// that connection ends, then closes; reconnecting is the caller's job.
#[async_trait]
pub trait MarketFeeds: Send + Sync {
    async fn subscribe_candles(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> Result<mpsc::Receiver<CandleClosed>>;

    async fn subscribe_mark_price(&self, symbol: &str) -> Result<mpsc::Receiver<MarkPrice>>;

    /// Order events for the whole account
    async fn subscribe_user_events(&self) -> Result<mpsc::Receiver<UserEvent>>;
}

/// Destination for closed-trade records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record_trade(&self, record: &TradeRecord) -> Result<()>;
}
