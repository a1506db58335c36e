//! Binance client combining REST trading and WebSocket streams

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use super::rest::{parse_decimal, BinanceRestClient, OrderOptions};
use super::websocket::{
    connect_stream, kline_stream, mark_price_stream, parse_kline, parse_mark_price,
    parse_user_event, stream_url,
};
use crate::common::channels::create_feed_channel;
use crate::common::errors::{BotError, Result};
use crate::common::traits::{ExchangeClient, MarketFeeds};
use crate::common::types::{
    Candle, CandleClosed, CloseResult, ExchangePosition, MarkPrice, OrderIntent, OrderResult,
    Precision, ProtectedEntry, ProtectiveOrder, Side, UserEvent,
};
use crate::config::types::{ApiCredentials, AppSettings, ExchangeConfig};

/// Listen keys expire after 60 minutes without a keepalive
const LISTEN_KEY_KEEPALIVE: Duration = Duration::from_secs(30 * 60);

/// Binance USDT-M futures client
#[derive(Debug, Clone)]
pub struct BinanceClient {
    /// REST API client
    rest: BinanceRestClient,
    /// Base URL for streams
    websocket_url: String,
    /// Raw-frame silence limit for market streams
    stream_watchdog: Option<Duration>,
}

impl BinanceClient {
    /// Create a new client from configuration
    pub fn new(config: &ExchangeConfig, settings: &AppSettings) -> Result<Self> {
        let rest = BinanceRestClient::with_timeout(
            &config.rest_url,
            Duration::from_secs(settings.request_timeout_seconds),
        )?
        .with_recv_window(config.recv_window_ms);

        let rest = match (&config.api_key, &config.api_secret) {
            (Some(key), Some(secret)) => {
                rest.with_credentials(ApiCredentials::new(key.clone(), secret.clone()))
            }
            _ => {
                warn!("No API credentials configured; trading endpoints will fail");
                rest
            }
        };

        Ok(Self {
            rest,
            websocket_url: config.websocket_url.clone(),
            stream_watchdog: Some(Duration::from_secs(settings.watchdog_timeout_seconds)),
        })
    }

    /// Get a reference to the REST client
    pub fn rest(&self) -> &BinanceRestClient {
        &self.rest
    }

    fn to_order_result(response: super::messages::OrderResponse) -> Result<OrderResult> {
        let avg_price = match response.avg_price.as_deref() {
            Some(price) => Some(parse_decimal(price)?).filter(|p| !p.is_zero()),
            None => None,
        };
        let executed_quantity = match response.executed_qty.as_deref() {
            Some(qty) => parse_decimal(qty)?,
            None => Decimal::ZERO,
        };
        Ok(OrderResult {
            order_id: response.order_id.to_string(),
            avg_price,
            executed_quantity,
            protective_orders: Vec::new(),
        })
    }

    /// Flatten after a failed protected entry; failures here are only logged
    async fn unwind_entry(&self, symbol: &str) {
        if let Err(e) = self.cancel_all_open_orders(symbol).await {
            error!(symbol, error = %e, "Failed to cancel orders while unwinding entry");
        }
        match self.close_open_position(symbol).await {
            Ok(result) if result.closed => info!(symbol, "Unprotected entry closed"),
            Ok(_) => {}
            Err(e) => error!(symbol, error = %e, "Failed to close unprotected entry"),
        }
    }
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn get_symbol_precision(&self, symbol: &str) -> Result<Precision> {
        self.rest.get_symbol_precision(symbol).await
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<bool> {
        let response = self.rest.set_leverage(symbol, leverage).await?;
        Ok(response.leverage == leverage)
    }

    async fn get_historical_candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        self.rest.get_klines(symbol, timeframe, limit).await
    }

    async fn get_market_price(&self, symbol: &str) -> Result<Decimal> {
        self.rest.get_ticker_price(symbol).await.map_err(|e| match e {
            BotError::HttpRequest(e) => BotError::DataUnavailable(e.to_string()),
            other => other,
        })
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> Result<OrderResult> {
        let intent = OrderIntent::market(symbol, side, quantity);
        let response = self.rest.place_order(&intent, OrderOptions::default()).await?;
        Self::to_order_result(response)
    }

    #[instrument(skip(self))]
    async fn submit_market_order_with_protections(
        &self,
        entry: &ProtectedEntry,
    ) -> Result<OrderResult> {
        let [open, stop, take_profit] = entry.intents();

        let response = self.rest.place_order(&open, OrderOptions::default()).await?;
        let mut result = Self::to_order_result(response)?;
        info!(
            symbol = %entry.symbol,
            order_id = %result.order_id,
            avg_price = ?result.avg_price,
            "Entry order filled"
        );

        for intent in [stop, take_profit] {
            match self.rest.place_order(&intent, OrderOptions::default()).await {
                Ok(response) => {
                    debug!(kind = ?intent.kind, order_id = response.order_id, trigger = ?intent.trigger_price, "Protective order placed");
                    result.protective_orders.push(ProtectiveOrder {
                        order_id: response.order_id.to_string(),
                        kind: intent.kind,
                    });
                }
                Err(e) => {
                    error!(
                        symbol = %entry.symbol,
                        kind = ?intent.kind,
                        error = %e,
                        "Protective order failed, unwinding entry"
                    );
                    self.unwind_entry(&entry.symbol).await;
                    return Err(match e {
                        BotError::ExchangeRejection { code, message } => BotError::ExchangeRejection {
                            code,
                            message: format!("protective {:?} order: {}", intent.kind, message),
                        },
                        other => other,
                    });
                }
            }
        }

        Ok(result)
    }

    async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        self.rest.cancel_order(symbol, order_id).await
    }

    async fn cancel_all_open_orders(&self, symbol: &str) -> Result<()> {
        self.rest.cancel_all_open_orders(symbol).await
    }

    #[instrument(skip(self))]
    async fn close_open_position(&self, symbol: &str) -> Result<CloseResult> {
        let positions = self.get_open_positions(Some(symbol)).await?;
        let Some(position) = positions.into_iter().find(|p| p.is_open()) else {
            return Ok(CloseResult {
                closed: false,
                order: None,
            });
        };

        let side = if position.amount > Decimal::ZERO {
            Side::Sell
        } else {
            Side::Buy
        };
        let intent = OrderIntent::market(symbol, side, position.amount.abs());
        let response = self
            .rest
            .place_order(&intent, OrderOptions { reduce_only: true })
            .await?;
        let order = Self::to_order_result(response)?;
        info!(symbol, side = %side, quantity = %position.amount.abs(), "Position closed at market");

        Ok(CloseResult {
            closed: true,
            order: Some(order),
        })
    }

    async fn get_last_realized_pnl(&self, symbol: &str) -> Result<Decimal> {
        self.rest.get_last_realized_pnl(symbol).await
    }

    async fn get_open_positions(&self, symbol: Option<&str>) -> Result<Vec<ExchangePosition>> {
        let risks = self.rest.get_position_risk(symbol).await?;
        let mut positions = Vec::new();
        for risk in risks {
            let position = ExchangePosition {
                amount: parse_decimal(&risk.position_amt)?,
                entry_price: parse_decimal(&risk.entry_price)?,
                unrealized_pnl: parse_decimal(&risk.unrealized_profit)?,
                symbol: risk.symbol,
            };
            if position.is_open() {
                positions.push(position);
            }
        }
        Ok(positions)
    }
}

#[async_trait]
impl MarketFeeds for BinanceClient {
    async fn subscribe_candles(
        &self,
        symbol: &str,
        timeframe: &str,
    ) -> Result<mpsc::Receiver<CandleClosed>> {
        let (sender, receiver) = create_feed_channel();
        let url = stream_url(&self.websocket_url, &kline_stream(symbol, timeframe));
        connect_stream(&url, self.stream_watchdog, sender, parse_kline).await?;
        Ok(receiver)
    }

    async fn subscribe_mark_price(&self, symbol: &str) -> Result<mpsc::Receiver<MarkPrice>> {
        let (sender, receiver) = create_feed_channel();
        let url = stream_url(&self.websocket_url, &mark_price_stream(symbol));
        connect_stream(&url, self.stream_watchdog, sender, parse_mark_price).await?;
        Ok(receiver)
    }

    async fn subscribe_user_events(&self) -> Result<mpsc::Receiver<UserEvent>> {
        let listen_key = self.rest.create_listen_key().await?;
        let (sender, receiver) = create_feed_channel();
        let url = stream_url(&self.websocket_url, &listen_key);
        // The account stream can stay quiet for hours; no watchdog.
        let mut reader = connect_stream(&url, None, sender, parse_user_event).await?;

        let rest = self.rest.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut reader => break,
                    _ = sleep(LISTEN_KEY_KEEPALIVE) => {
                        match rest.keepalive_listen_key().await {
                            Ok(()) => debug!("Listen key kept alive"),
                            Err(e) => warn!(error = %e, "Listen key keepalive failed"),
                        }
                    }
                }
            }
            debug!("User stream keepalive stopped");
        });

        Ok(receiver)
    }
}
