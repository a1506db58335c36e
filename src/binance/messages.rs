//! Binance USDT-M futures message types

use serde::{Deserialize, Serialize};

// ============================================================================
// REST Responses
// ============================================================================

/// Error body returned with non-2xx responses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    pub code: i64,
    pub msg: String,
}

/// `GET /fapi/v1/exchangeInfo`
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfoResponse {
    pub symbols: Vec<SymbolInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

/// Symbol trading rules; only the two the bot needs are decoded
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "PRICE_FILTER")]
    Price {
        #[serde(rename = "tickSize")]
        tick_size: String,
    },
    #[serde(rename = "LOT_SIZE")]
    LotSize {
        #[serde(rename = "stepSize")]
        step_size: String,
    },
    #[serde(other)]
    Other,
}

/// `POST /fapi/v1/leverage`
#[derive(Debug, Clone, Deserialize)]
pub struct LeverageResponse {
    pub symbol: String,
    pub leverage: u32,
}

/// One row of `GET /fapi/v1/klines`
///
/// Binance returns klines as positional arrays.
#[derive(Debug, Clone, Deserialize)]
pub struct KlineRow(
    pub i64,               // open time
    pub String,            // open
    pub String,            // high
    pub String,            // low
    pub String,            // close
    pub String,            // volume
    pub i64,               // close time
    pub String,            // quote asset volume
    pub u64,               // number of trades
    pub String,            // taker buy base volume
    pub String,            // taker buy quote volume
    pub serde_json::Value, // unused
);

/// `GET /fapi/v1/ticker/price`
#[derive(Debug, Clone, Deserialize)]
pub struct TickerPriceResponse {
    pub symbol: String,
    pub price: String,
}

/// `POST /fapi/v1/order` and `DELETE /fapi/v1/order`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: i64,
    pub symbol: String,
    pub status: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub side: String,
    #[serde(default)]
    pub avg_price: Option<String>,
    #[serde(default)]
    pub executed_qty: Option<String>,
    #[serde(default)]
    pub stop_price: Option<String>,
}

/// `GET /fapi/v2/positionRisk`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionRiskResponse {
    pub symbol: String,
    pub position_amt: String,
    pub entry_price: String,
    #[serde(rename = "unRealizedProfit")]
    pub unrealized_profit: String,
}

/// `GET /fapi/v1/income`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeRecord {
    pub symbol: String,
    pub income_type: String,
    pub income: String,
    pub time: i64,
    #[serde(default)]
    pub trade_id: Option<String>,
}

/// `POST /fapi/v1/listenKey`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenKeyResponse {
    pub listen_key: String,
}

// ============================================================================
// Stream Events
// ============================================================================

/// `<symbol>@kline_<interval>` payload
#[derive(Debug, Clone, Deserialize)]
pub struct KlineEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: KlineData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KlineData {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "i")]
    pub interval: String,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "V")]
    pub taker_buy_volume: String,
    /// Whether this kline is closed
    #[serde(rename = "x")]
    pub is_closed: bool,
}

/// `<symbol>@markPrice@1s` payload
#[derive(Debug, Clone, Deserialize)]
pub struct MarkPriceEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "p")]
    pub mark_price: String,
}

/// User data stream events, keyed by `e`
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "e")]
pub enum UserStreamEvent {
    #[serde(rename = "ORDER_TRADE_UPDATE")]
    OrderTradeUpdate {
        #[serde(rename = "E")]
        event_time: i64,
        #[serde(rename = "o")]
        order: OrderUpdate,
    },
    #[serde(rename = "listenKeyExpired")]
    ListenKeyExpired {
        #[serde(rename = "E")]
        event_time: i64,
    },
    #[serde(other)]
    Other,
}

/// `o` object of an `ORDER_TRADE_UPDATE`
#[derive(Debug, Clone, Deserialize)]
pub struct OrderUpdate {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "S")]
    pub side: String,
    /// Current order type; a triggered stop reports `MARKET` here
    #[serde(rename = "o")]
    pub order_type: String,
    /// Type the order was placed with
    #[serde(rename = "ot", default)]
    pub original_type: Option<String>,
    #[serde(rename = "X")]
    pub status: String,
    #[serde(rename = "i")]
    pub order_id: i64,
    #[serde(rename = "ap")]
    pub avg_price: String,
    #[serde(rename = "L")]
    pub last_price: String,
    #[serde(rename = "z")]
    pub filled_quantity: String,
    #[serde(rename = "rp", default)]
    pub realized_profit: Option<String>,
    #[serde(rename = "T")]
    pub trade_time: i64,
}
