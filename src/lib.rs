//! perp_trader Library
//!
//! A perpetual-futures trading bot for one symbol on one account. Closed
//! candles drive entries, mark price ticks drive a trailing stop, and order
//! fills from the account stream close positions when a protective order
//! triggers.

pub mod audit;
pub mod binance;
pub mod common;
pub mod config;
pub mod engine;
pub mod strategy;

// Re-export commonly used types
pub use audit::{InMemoryAuditSink, JsonlAuditSink, PostgresAuditSink};
pub use binance::BinanceClient;
pub use common::errors::{BotError, ErrorKind, Result};
pub use common::traits::{AuditSink, ExchangeClient, MarketFeeds};
pub use common::types::{
    Candle, CandleClosed, MarkPrice, OrderKind, PositionSide, Precision, Side, Signal,
    TradeRecord, TradeStatus, UserEvent,
};
pub use config::types::AppConfig;
pub use engine::{BotStatus, ControllerState, PositionController};
pub use strategy::{BoxedSignalSource, SignalSource};
