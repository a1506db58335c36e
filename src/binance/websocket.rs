//! WebSocket streams for Binance USDT-M futures
//!
//! Each subscription is one connection with one reader task. The reader
//! parses frames into typed events and forwards them until the connection
//! drops, the stream goes silent past its watchdog, or the consumer goes
//! away. The event channel then closes and the caller decides whether to
//! reconnect.

use futures_util::StreamExt;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, instrument, warn};

use super::messages::*;
use super::rest::{millis_to_datetime, parse_decimal};
use crate::common::errors::{BotError, Result};
use crate::common::types::{
    Candle, CandleClosed, MarkPrice, OrderFill, OrderKind, Side, UserEvent,
};

/// Outcome of parsing one text frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<T> {
    /// Forward to the consumer
    Event(T),
    /// Valid but uninteresting
    Ignore,
    /// The server ended the stream
    End(String),
}

/// Frame parser for one stream type
pub type FrameParser<T> = fn(&str) -> Result<Frame<T>>;

/// Stream URL for a raw market stream, e.g. `btcusdt@kline_5m`
pub fn stream_url(base_url: &str, stream: &str) -> String {
    format!("{}/ws/{}", base_url.trim_end_matches('/'), stream)
}

pub fn kline_stream(symbol: &str, interval: &str) -> String {
    format!("{}@kline_{}", symbol.to_lowercase(), interval)
}

pub fn mark_price_stream(symbol: &str) -> String {
    format!("{}@markPrice@1s", symbol.to_lowercase())
}

/// Connect to `url` and spawn the reader task
///
/// Returns once the handshake succeeded. The returned handle finishes when
/// the reader stops.
#[instrument(skip(sender, parse))]
pub async fn connect_stream<T: Send + 'static>(
    url: &str,
    watchdog: Option<Duration>,
    sender: mpsc::Sender<T>,
    parse: FrameParser<T>,
) -> Result<JoinHandle<()>> {
    info!("Connecting to Binance WebSocket: {}", url);
    let (mut ws_stream, _response) = connect_async(url)
        .await
        .map_err(|e| BotError::Transport(format!("connect {}: {}", url, e)))?;
    info!("WebSocket connection established");

    let url = url.to_string();
    let task = tokio::spawn(async move {
        loop {
            let next = tokio::select! {
                _ = sender.closed() => {
                    debug!(url = %url, "Consumer dropped, closing stream");
                    break;
                }
                next = read_with_watchdog(&mut ws_stream, watchdog) => next,
            };

            let Some(message) = next else {
                warn!(url = %url, silence = ?watchdog, "Stream silent past watchdog");
                break;
            };

            match message {
                Some(Ok(Message::Text(text))) => match parse(&text) {
                    Ok(Frame::Event(event)) => {
                        if sender.send(event).await.is_err() {
                            debug!(url = %url, "Consumer dropped, closing stream");
                            break;
                        }
                    }
                    Ok(Frame::Ignore) => {}
                    Ok(Frame::End(reason)) => {
                        info!(url = %url, reason = %reason, "Stream ended by server");
                        break;
                    }
                    Err(e) => warn!("Failed to parse message: {} - {}", e, text),
                },
                Some(Ok(Message::Ping(_))) => {
                    // tungstenite queues the pong and flushes it on the next read
                    debug!("Received Ping");
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(url = %url, "WebSocket closed: {:?}", frame);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(url = %url, error = %e, "WebSocket error");
                    break;
                }
                None => {
                    info!(url = %url, "WebSocket stream ended");
                    break;
                }
            }
        }

        let _ = ws_stream.close(None).await;
    });

    Ok(task)
}

/// `None` when the watchdog fired
async fn read_with_watchdog<S>(stream: &mut S, watchdog: Option<Duration>) -> Option<Option<S::Item>>
where
    S: StreamExt + Unpin,
{
    match watchdog {
        Some(window) => timeout(window, stream.next()).await.ok(),
        None => Some(stream.next().await),
    }
}

/// Closed klines only; updates of the forming kline are ignored
pub fn parse_kline(text: &str) -> Result<Frame<CandleClosed>> {
    let event: KlineEvent = serde_json::from_str(text)?;
    if !event.kline.is_closed {
        return Ok(Frame::Ignore);
    }
    let k = event.kline;
    Ok(Frame::Event(CandleClosed {
        symbol: event.symbol,
        candle: Candle {
            open_time: millis_to_datetime(k.open_time)?,
            close_time: millis_to_datetime(k.close_time)?,
            open: parse_decimal(&k.open)?,
            high: parse_decimal(&k.high)?,
            low: parse_decimal(&k.low)?,
            close: parse_decimal(&k.close)?,
            volume: parse_decimal(&k.volume)?,
            taker_buy_volume: parse_decimal(&k.taker_buy_volume)?,
        },
    }))
}

pub fn parse_mark_price(text: &str) -> Result<Frame<MarkPrice>> {
    let event: MarkPriceEvent = serde_json::from_str(text)?;
    Ok(Frame::Event(MarkPrice {
        symbol: event.symbol,
        price: parse_decimal(&event.mark_price)?,
        timestamp: millis_to_datetime(event.event_time)?,
    }))
}

pub fn parse_user_event(text: &str) -> Result<Frame<UserEvent>> {
    let event: UserStreamEvent = serde_json::from_str(text)?;
    match event {
        UserStreamEvent::OrderTradeUpdate { order, .. } => Ok(Frame::Event(convert_order_update(order)?)),
        UserStreamEvent::ListenKeyExpired { .. } => Ok(Frame::End("listen key expired".into())),
        UserStreamEvent::Other => Ok(Frame::Ignore),
    }
}

fn convert_order_update(order: OrderUpdate) -> Result<UserEvent> {
    match order.status.as_str() {
        "FILLED" => {
            let kind = order_kind(order.original_type.as_deref().unwrap_or(&order.order_type));
            let side = match order.side.as_str() {
                "BUY" => Side::Buy,
                _ => Side::Sell,
            };
            let avg_price = parse_decimal(&order.avg_price)?;
            let avg_price = if avg_price.is_zero() {
                parse_decimal(&order.last_price)?
            } else {
                avg_price
            };
            let realized_pnl = match order.realized_profit.as_deref() {
                Some(rp) => parse_decimal(rp)?,
                None => Decimal::ZERO,
            };

            Ok(UserEvent::OrderFilled(OrderFill {
                symbol: order.symbol,
                order_id: order.order_id.to_string(),
                kind,
                side,
                avg_price,
                filled_quantity: parse_decimal(&order.filled_quantity)?,
                realized_pnl,
                timestamp: millis_to_datetime(order.trade_time)?,
            }))
        }
        "CANCELED" | "EXPIRED" => Ok(UserEvent::OrderCanceled {
            symbol: order.symbol,
            order_id: order.order_id.to_string(),
        }),
        status => Ok(UserEvent::Other(format!(
            "ORDER_TRADE_UPDATE {} {}",
            order.order_id, status
        ))),
    }
}

fn order_kind(order_type: &str) -> OrderKind {
    match order_type {
        "STOP_MARKET" | "STOP" => OrderKind::Stop,
        "TAKE_PROFIT_MARKET" | "TAKE_PROFIT" => OrderKind::TakeProfit,
        _ => OrderKind::Market,
    }
}
