//! Configuration types

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::common::errors::{BotError, Result};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Exchange connectivity
    #[serde(default)]
    pub exchange: ExchangeConfig,
    /// Position sizing and protection parameters
    #[serde(default)]
    pub trading: TradingConfig,
    /// Signal source selection
    #[serde(default)]
    pub strategy: StrategyConfig,
    /// Where closed trades are written
    #[serde(default)]
    pub audit: AuditConfig,
    /// Database configuration (optional, enables the Postgres audit trail)
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// General application settings
    #[serde(default)]
    pub settings: AppSettings,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.trading.validate()?;
        self.strategy.validate(self.trading.candle_history_limit)
    }
}

/// Binance USDT-M futures configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// API key for signed requests
    #[serde(default)]
    pub api_key: Option<String>,
    /// API secret for HMAC signing
    #[serde(default)]
    pub api_secret: Option<String>,
    /// Base URL for the REST API
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    /// Base URL for market and user streams
    #[serde(default = "default_ws_url")]
    pub websocket_url: String,
    /// Signed request validity window in milliseconds
    #[serde(default = "default_recv_window")]
    pub recv_window_ms: u64,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_secret: None,
            rest_url: default_rest_url(),
            websocket_url: default_ws_url(),
            recv_window_ms: default_recv_window(),
        }
    }
}

fn default_rest_url() -> String {
    "https://fapi.binance.com".to_string()
}

fn default_ws_url() -> String {
    "wss://fstream.binance.com".to_string()
}

fn default_recv_window() -> u64 {
    5000
}

/// Trading parameters for the managed symbol
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Symbol to trade, e.g. BTCUSDT
    #[serde(default = "default_symbol")]
    pub symbol: String,
    /// Candle interval, e.g. 5m
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Margin committed per entry, in USDT
    #[serde(default = "default_order_size")]
    pub order_size_usdt: Decimal,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    /// Fixed stop distance from entry (fraction)
    #[serde(default = "default_protective_pct")]
    pub stop_loss_pct: Decimal,
    /// Fixed take-profit distance from entry (fraction)
    #[serde(default = "default_protective_pct")]
    pub take_profit_pct: Decimal,
    /// Favorable move that arms the trailing stop (fraction)
    #[serde(default = "default_activation_pct")]
    pub trailing_activation_pct: Decimal,
    /// Distance of the trailing stop from the water mark (fraction)
    #[serde(default = "default_distance_pct")]
    pub trailing_distance_pct: Decimal,
    /// Number of candles kept for signal evaluation
    #[serde(default = "default_history_limit")]
    pub candle_history_limit: usize,
    /// Wait between a candle close and the decision
    #[serde(default)]
    pub settle_delay_ms: u64,
    /// Pause between cancelling orders and submitting a new entry
    #[serde(default = "default_flip_delay")]
    pub flip_delay_ms: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            timeframe: default_timeframe(),
            order_size_usdt: default_order_size(),
            leverage: default_leverage(),
            stop_loss_pct: default_protective_pct(),
            take_profit_pct: default_protective_pct(),
            trailing_activation_pct: default_activation_pct(),
            trailing_distance_pct: default_distance_pct(),
            candle_history_limit: default_history_limit(),
            settle_delay_ms: 0,
            flip_delay_ms: default_flip_delay(),
        }
    }
}

impl TradingConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn flip_delay(&self) -> Duration {
        Duration::from_millis(self.flip_delay_ms)
    }

    /// Reject values that would make the bot trade nonsense
    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            return Err(BotError::Configuration("symbol must not be empty".into()));
        }
        crate::engine::feeds::timeframe_duration(&self.timeframe).ok_or_else(|| {
            BotError::Configuration(format!("unsupported timeframe: {}", self.timeframe))
        })?;
        if self.leverage == 0 {
            return Err(BotError::Configuration("leverage must be at least 1".into()));
        }
        if self.order_size_usdt <= Decimal::ZERO {
            return Err(BotError::Configuration(
                "order_size_usdt must be positive".into(),
            ));
        }
        let fractions = [
            ("stop_loss_pct", self.stop_loss_pct),
            ("take_profit_pct", self.take_profit_pct),
            ("trailing_activation_pct", self.trailing_activation_pct),
            ("trailing_distance_pct", self.trailing_distance_pct),
        ];
        for (name, value) in fractions {
            if value <= Decimal::ZERO || value >= Decimal::ONE {
                return Err(BotError::Configuration(format!(
                    "{} must be between 0 and 1, got {}",
                    name, value
                )));
            }
        }
        if self.candle_history_limit < 2 {
            return Err(BotError::Configuration(
                "candle_history_limit must be at least 2".into(),
            ));
        }
        Ok(())
    }
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_timeframe() -> String {
    "5m".to_string()
}

fn default_order_size() -> Decimal {
    dec!(30)
}

fn default_leverage() -> u32 {
    5
}

fn default_protective_pct() -> Decimal {
    dec!(0.0053)
}

fn default_activation_pct() -> Decimal {
    dec!(0.003)
}

fn default_distance_pct() -> Decimal {
    dec!(0.001)
}

fn default_history_limit() -> usize {
    50
}

fn default_flip_delay() -> u64 {
    200
}

/// Signal source selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// Fast/slow EMA crossover on closes
    EmaCrossover {
        #[serde(default = "default_fast_period")]
        fast_period: usize,
        #[serde(default = "default_slow_period")]
        slow_period: usize,
    },
    /// Taker buy vs sell volume, optionally filtered by an EMA trend
    VolumeDominance {
        #[serde(default = "default_trend_period")]
        trend_ema_period: Option<usize>,
    },
    /// Run of same-colored candles
    CandleMomentum {
        #[serde(default = "default_momentum_count")]
        count: usize,
    },
}

impl Default for StrategyConfig {
    fn default() -> Self {
        StrategyConfig::VolumeDominance {
            trend_ema_period: default_trend_period(),
        }
    }
}

impl StrategyConfig {
    /// Check the parameters against the candle window size
    pub fn validate(&self, window: usize) -> Result<()> {
        let required = match self {
            StrategyConfig::EmaCrossover {
                fast_period,
                slow_period,
            } => {
                if fast_period == &0 || fast_period >= slow_period {
                    return Err(BotError::Configuration(format!(
                        "ema_crossover needs 0 < fast_period < slow_period, got {} / {}",
                        fast_period, slow_period
                    )));
                }
                slow_period + 1
            }
            StrategyConfig::VolumeDominance { trend_ema_period } => {
                trend_ema_period.unwrap_or(1)
            }
            StrategyConfig::CandleMomentum { count } => {
                if *count == 0 {
                    return Err(BotError::Configuration(
                        "candle_momentum count must be at least 1".into(),
                    ));
                }
                *count
            }
        };
        if required > window {
            return Err(BotError::Configuration(format!(
                "strategy needs {} candles but candle_history_limit is {}",
                required, window
            )));
        }
        Ok(())
    }
}

fn default_fast_period() -> usize {
    9
}

fn default_slow_period() -> usize {
    21
}

fn default_trend_period() -> Option<usize> {
    Some(50)
}

fn default_momentum_count() -> usize {
    3
}

/// Trade log destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// JSON-lines file used when no database is configured
    #[serde(default = "default_trade_log_path")]
    pub trade_log_path: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            trade_log_path: default_trade_log_path(),
        }
    }
}

fn default_trade_log_path() -> String {
    "trades.jsonl".to_string()
}

/// Database configuration for the audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
}

fn default_max_connections() -> u32 {
    5
}

fn default_connection_timeout() -> u64 {
    30
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// First delay between reconnection attempts in milliseconds
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    /// Upper bound for the reconnection backoff in milliseconds
    #[serde(default = "default_max_reconnect_delay")]
    pub max_reconnect_delay_ms: u64,
    /// Silence after which a stream is considered stale, in seconds
    #[serde(default = "default_watchdog_timeout")]
    pub watchdog_timeout_seconds: u64,
    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Interval between position checks against the exchange
    #[serde(default = "default_reconciliation_interval")]
    pub reconciliation_interval_seconds: u64,
    /// Pause after a failed decision cycle
    #[serde(default = "default_error_cooldown")]
    pub error_cooldown_seconds: u64,
    /// Trailing stop re-evaluation period when no new tick arrives
    #[serde(default = "default_trailing_resweep")]
    pub trailing_resweep_seconds: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_delay_ms: default_max_reconnect_delay(),
            watchdog_timeout_seconds: default_watchdog_timeout(),
            request_timeout_seconds: default_request_timeout(),
            reconciliation_interval_seconds: default_reconciliation_interval(),
            error_cooldown_seconds: default_error_cooldown(),
            trailing_resweep_seconds: default_trailing_resweep(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_reconnect_delay() -> u64 {
    1000
}

fn default_max_reconnect_delay() -> u64 {
    60_000
}

fn default_watchdog_timeout() -> u64 {
    60
}

fn default_request_timeout() -> u64 {
    30
}

fn default_reconciliation_interval() -> u64 {
    60
}

fn default_error_cooldown() -> u64 {
    5
}

fn default_trailing_resweep() -> u64 {
    5
}

/// API credentials for signed requests
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    pub api_secret: String,
}

impl ApiCredentials {
    pub fn new(api_key: String, api_secret: String) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_trading_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.trading.leverage, 5);
        assert_eq!(config.trading.flip_delay(), Duration::from_millis(200));
    }

    #[test]
    fn test_rejects_out_of_range_fraction() {
        let trading = TradingConfig {
            trailing_distance_pct: dec!(1.5),
            ..Default::default()
        };
        let err = trading.validate().unwrap_err();
        assert!(err.to_string().contains("trailing_distance_pct"));
    }

    #[test]
    fn test_rejects_zero_leverage_and_bad_timeframe() {
        let trading = TradingConfig {
            leverage: 0,
            ..Default::default()
        };
        assert!(trading.validate().is_err());

        let trading = TradingConfig {
            timeframe: "7x".into(),
            ..Default::default()
        };
        assert!(trading.validate().is_err());
    }

    #[test]
    fn test_strategy_window_requirement() {
        let strategy = StrategyConfig::EmaCrossover {
            fast_period: 9,
            slow_period: 60,
        };
        assert!(strategy.validate(50).is_err());
        assert!(strategy.validate(61).is_ok());

        let inverted = StrategyConfig::EmaCrossover {
            fast_period: 21,
            slow_period: 9,
        };
        assert!(inverted.validate(50).is_err());
    }
}
