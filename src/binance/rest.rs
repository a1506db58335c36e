//! REST API client for Binance USDT-M futures

use chrono::{TimeZone, Utc};
use reqwest::{Client, Method, Response, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, instrument, warn};

use super::auth::{signed_query, API_KEY_HEADER};
use super::messages::*;
use crate::common::errors::{BotError, Result};
use crate::common::types::{Candle, OrderIntent, OrderKind, Precision};
use crate::config::types::ApiCredentials;

/// Error code for cancelling an order that no longer exists
const UNKNOWN_ORDER: i64 = -2011;

/// How many income rows to scan for the latest realized PnL
const INCOME_LOOKBACK: u32 = 20;

/// Extra order flags on top of an [`OrderIntent`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderOptions {
    /// Only reduce an existing position
    pub reduce_only: bool,
}

/// REST API client for Binance USDT-M futures
#[derive(Debug, Clone)]
pub struct BinanceRestClient {
    /// HTTP client
    client: Client,
    /// Base URL, e.g. https://fapi.binance.com
    base_url: String,
    /// Credentials for signed endpoints
    credentials: Option<ApiCredentials>,
    /// Signed request validity window
    recv_window_ms: u64,
}

impl BinanceRestClient {
    /// Create a new REST client (public endpoints only)
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    /// Create a new REST client with custom timeout
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BotError::Internal(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials: None,
            recv_window_ms: 5000,
        })
    }

    /// Set API credentials for signed requests
    pub fn with_credentials(mut self, credentials: ApiCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_recv_window(mut self, recv_window_ms: u64) -> Self {
        self.recv_window_ms = recv_window_ms;
        self
    }

    fn credentials(&self) -> Result<&ApiCredentials> {
        self.credentials
            .as_ref()
            .ok_or_else(|| BotError::Authentication("API credentials not configured".into()))
    }

    async fn get_public<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);
        let response = self.client.get(&url).query(params).send().await?;
        Self::parse_response(response).await
    }

    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<T> {
        let credentials = self.credentials()?;
        let query = signed_query(
            &credentials.api_secret,
            params,
            self.recv_window_ms,
            Utc::now().timestamp_millis(),
        )?;
        let url = format!("{}{}?{}", self.base_url, path, query);
        debug!("{} {}{}", method, self.base_url, path);

        let response = self
            .client
            .request(method, &url)
            .header(API_KEY_HEADER, &credentials.api_key)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    /// Requests that only need the API key header (listen key management)
    async fn send_keyed<T: DeserializeOwned>(&self, method: Method, path: &str) -> Result<T> {
        let credentials = self.credentials()?;
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .request(method, &url)
            .header(API_KEY_HEADER, &credentials.api_key)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    async fn parse_response<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let body = response.text().await.unwrap_or_default();
        if let Ok(error) = serde_json::from_str::<ApiErrorResponse>(&body) {
            return Err(BotError::ExchangeRejection {
                code: error.code,
                message: error.msg,
            });
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(BotError::DataUnavailable(format!(
                "Server returned status {}: {}",
                status, body
            )));
        }
        Err(BotError::InvalidResponse(format!(
            "Server returned status {}: {}",
            status, body
        )))
    }

    // ========================================================================
    // Market Data
    // ========================================================================

    /// Quantity and price steps of a symbol
    #[instrument(skip(self))]
    pub async fn get_symbol_precision(&self, symbol: &str) -> Result<Precision> {
        let info: ExchangeInfoResponse = self.get_public("/fapi/v1/exchangeInfo", &[]).await?;
        let symbol_info = info
            .symbols
            .into_iter()
            .find(|s| s.symbol.eq_ignore_ascii_case(symbol))
            .ok_or_else(|| BotError::InvalidResponse(format!("Unknown symbol: {}", symbol)))?;

        let mut quantity_step = None;
        let mut price_step = None;
        for filter in symbol_info.filters {
            match filter {
                SymbolFilter::LotSize { step_size } => quantity_step = Some(parse_decimal(&step_size)?),
                SymbolFilter::Price { tick_size } => price_step = Some(parse_decimal(&tick_size)?),
                SymbolFilter::Other => {}
            }
        }

        match (quantity_step, price_step) {
            (Some(quantity_step), Some(price_step)) => Ok(Precision {
                quantity_step: quantity_step.normalize(),
                price_step: price_step.normalize(),
            }),
            _ => Err(BotError::InvalidResponse(format!(
                "Missing LOT_SIZE or PRICE_FILTER for {}",
                symbol
            ))),
        }
    }

    /// Closed klines, oldest first; the still-forming kline is dropped
    #[instrument(skip(self))]
    pub async fn get_klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Candle>> {
        let rows: Vec<KlineRow> = self
            .get_public(
                "/fapi/v1/klines",
                &[
                    ("symbol", symbol.to_uppercase()),
                    ("interval", interval.to_string()),
                    ("limit", (limit + 1).to_string()),
                ],
            )
            .await?;

        let now = Utc::now();
        let mut candles = rows
            .into_iter()
            .map(kline_row_to_candle)
            .collect::<Result<Vec<_>>>()?;
        candles.retain(|c| c.close_time < now);
        if candles.len() > limit {
            candles.drain(..candles.len() - limit);
        }
        Ok(candles)
    }

    /// Last traded price
    #[instrument(skip(self))]
    pub async fn get_ticker_price(&self, symbol: &str) -> Result<Decimal> {
        let ticker: TickerPriceResponse = self
            .get_public("/fapi/v1/ticker/price", &[("symbol", symbol.to_uppercase())])
            .await?;
        parse_decimal(&ticker.price)
    }

    // ========================================================================
    // Account / Trading (Signed)
    // ========================================================================

    #[instrument(skip(self))]
    pub async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<LeverageResponse> {
        self.send_signed(
            Method::POST,
            "/fapi/v1/leverage",
            &[
                ("symbol", symbol.to_uppercase()),
                ("leverage", leverage.to_string()),
            ],
        )
        .await
    }

    /// Place one order
    ///
    /// Stop and take-profit intents are sent as `closePosition` orders
    /// triggered on the mark price, so they always flatten the whole position.
    #[instrument(skip(self))]
    pub async fn place_order(
        &self,
        intent: &OrderIntent,
        options: OrderOptions,
    ) -> Result<OrderResponse> {
        let mut params = vec![
            ("symbol", intent.symbol.to_uppercase()),
            ("side", intent.side.to_string()),
        ];

        match intent.kind {
            OrderKind::Market => {
                params.push(("type", "MARKET".to_string()));
                params.push(("quantity", intent.quantity.normalize().to_string()));
                params.push(("newOrderRespType", "RESULT".to_string()));
                if options.reduce_only {
                    params.push(("reduceOnly", "true".to_string()));
                }
            }
            OrderKind::Stop | OrderKind::TakeProfit => {
                let trigger = intent.trigger_price.ok_or_else(|| {
                    BotError::Internal(format!("{:?} order without trigger price", intent.kind))
                })?;
                let order_type = if intent.kind == OrderKind::Stop {
                    "STOP_MARKET"
                } else {
                    "TAKE_PROFIT_MARKET"
                };
                params.push(("type", order_type.to_string()));
                params.push(("stopPrice", trigger.normalize().to_string()));
                params.push(("closePosition", "true".to_string()));
                params.push(("workingType", "MARK_PRICE".to_string()));
            }
        }

        self.send_signed(Method::POST, "/fapi/v1/order", &params).await
    }

    /// Cancel one order; an order that is already gone counts as cancelled
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, symbol: &str, order_id: &str) -> Result<()> {
        let result: Result<OrderResponse> = self
            .send_signed(
                Method::DELETE,
                "/fapi/v1/order",
                &[
                    ("symbol", symbol.to_uppercase()),
                    ("orderId", order_id.to_string()),
                ],
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(BotError::ExchangeRejection { code, .. }) if code == UNKNOWN_ORDER => {
                debug!(order_id, "Order already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self))]
    pub async fn cancel_all_open_orders(&self, symbol: &str) -> Result<()> {
        let _: serde_json::Value = self
            .send_signed(
                Method::DELETE,
                "/fapi/v1/allOpenOrders",
                &[("symbol", symbol.to_uppercase())],
            )
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_position_risk(&self, symbol: Option<&str>) -> Result<Vec<PositionRiskResponse>> {
        let params: Vec<(&str, String)> = symbol
            .map(|s| vec![("symbol", s.to_uppercase())])
            .unwrap_or_default();
        self.send_signed(Method::GET, "/fapi/v2/positionRisk", &params)
            .await
    }

    /// Realized PnL of the most recent close
    ///
    /// A close filled in several parts books several income rows with the
    /// same timestamp; they are summed.
    #[instrument(skip(self))]
    pub async fn get_last_realized_pnl(&self, symbol: &str) -> Result<Decimal> {
        let records: Vec<IncomeRecord> = self
            .send_signed(
                Method::GET,
                "/fapi/v1/income",
                &[
                    ("symbol", symbol.to_uppercase()),
                    ("incomeType", "REALIZED_PNL".to_string()),
                    ("limit", INCOME_LOOKBACK.to_string()),
                ],
            )
            .await?;

        let Some(latest) = records.iter().map(|r| r.time).max() else {
            warn!(symbol, "No realized PnL records found");
            return Err(BotError::DataUnavailable(format!(
                "no realized PnL for {}",
                symbol
            )));
        };

        records
            .iter()
            .filter(|r| r.time == latest)
            .map(|r| parse_decimal(&r.income))
            .sum()
    }

    // ========================================================================
    // User Data Stream
    // ========================================================================

    #[instrument(skip(self))]
    pub async fn create_listen_key(&self) -> Result<String> {
        let response: ListenKeyResponse = self
            .send_keyed(Method::POST, "/fapi/v1/listenKey")
            .await?;
        Ok(response.listen_key)
    }

    #[instrument(skip(self))]
    pub async fn keepalive_listen_key(&self) -> Result<()> {
        let _: serde_json::Value = self.send_keyed(Method::PUT, "/fapi/v1/listenKey").await?;
        Ok(())
    }
}

pub(crate) fn parse_decimal(value: &str) -> Result<Decimal> {
    Decimal::from_str(value)
        .map_err(|e| BotError::InvalidResponse(format!("Invalid decimal '{}': {}", value, e)))
}

pub(crate) fn millis_to_datetime(ms: i64) -> Result<chrono::DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| BotError::InvalidResponse(format!("Invalid timestamp: {}", ms)))
}

fn kline_row_to_candle(row: KlineRow) -> Result<Candle> {
    Ok(Candle {
        open_time: millis_to_datetime(row.0)?,
        close_time: millis_to_datetime(row.6)?,
        open: parse_decimal(&row.1)?,
        high: parse_decimal(&row.2)?,
        low: parse_decimal(&row.3)?,
        close: parse_decimal(&row.4)?,
        volume: parse_decimal(&row.5)?,
        taker_buy_volume: parse_decimal(&row.9)?,
    })
}
