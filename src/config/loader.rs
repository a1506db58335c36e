//! Configuration loader

use config::{Config, Environment, File, FileFormat};
use std::path::Path;

use super::types::AppConfig;
use crate::common::errors::{BotError, Result};

/// Load configuration from file and environment variables
///
/// Priority (highest to lowest):
/// 1. `BINANCE_API_KEY` / `BINANCE_API_SECRET`
/// 2. Environment variables (prefixed with APP__)
/// 3. Configuration file (TOML format)
/// 4. Default values
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    dotenvy::dotenv().ok();

    let mut builder = Config::builder();

    if let Some(path) = config_path {
        if Path::new(path).exists() {
            builder = builder.add_source(File::with_name(path).required(false));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("APP")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder
        .build()
        .map_err(|e| BotError::Configuration(e.to_string()))?;

    let mut app: AppConfig = config
        .try_deserialize()
        .map_err(|e| BotError::Configuration(e.to_string()))?;

    apply_credential_env(&mut app);
    app.validate()?;
    Ok(app)
}

/// Build configuration from an in-memory TOML document
pub fn load_config_from_str(toml: &str) -> Result<AppConfig> {
    let config = Config::builder()
        .add_source(File::from_str(toml, FileFormat::Toml))
        .build()
        .map_err(|e| BotError::Configuration(e.to_string()))?;

    let app: AppConfig = config
        .try_deserialize()
        .map_err(|e| BotError::Configuration(e.to_string()))?;

    app.validate()?;
    Ok(app)
}

fn apply_credential_env(app: &mut AppConfig) {
    if let Ok(key) = std::env::var("BINANCE_API_KEY") {
        app.exchange.api_key = Some(key);
    }
    if let Ok(secret) = std::env::var("BINANCE_API_SECRET") {
        app.exchange.api_secret = Some(secret);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::StrategyConfig;
    use rust_decimal_macros::dec;

    #[test]
    fn test_load_from_toml_string() {
        let toml = r#"
            [trading]
            symbol = "ETHUSDT"
            timeframe = "1m"
            order_size_usdt = 50
            leverage = 10
            trailing_activation_pct = "0.004"

            [strategy]
            kind = "ema_crossover"
            fast_period = 5
            slow_period = 13

            [settings]
            reconnect_delay_ms = 250
        "#;

        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.trading.symbol, "ETHUSDT");
        assert_eq!(config.trading.leverage, 10);
        assert_eq!(config.trading.order_size_usdt, dec!(50));
        assert_eq!(config.trading.trailing_activation_pct, dec!(0.004));
        assert_eq!(config.trading.trailing_distance_pct, dec!(0.001));
        assert_eq!(
            config.strategy,
            StrategyConfig::EmaCrossover {
                fast_period: 5,
                slow_period: 13
            }
        );
        assert_eq!(config.settings.reconnect_delay_ms, 250);
        assert_eq!(config.settings.max_reconnect_delay_ms, 60_000);
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.trading.timeframe, "5m");
        assert!(config.database.is_none());
        assert_eq!(config.exchange.rest_url, "https://fapi.binance.com");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let toml = r#"
            [trading]
            leverage = 0
        "#;
        let err = load_config_from_str(toml).unwrap_err();
        assert!(matches!(err, BotError::Configuration(_)));
    }
}
