//! perp_trader - Main Entry Point
//!
//! Runs the position controller for one symbol against Binance USDT-M
//! futures until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use perp_trader::config::{load_config, AppConfig};
use perp_trader::{
    strategy, AuditSink, BinanceClient, JsonlAuditSink, PositionController, PostgresAuditSink,
};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    /// Symbol to trade, overrides the configuration file
    #[arg(long, env = "BOT_SYMBOL")]
    symbol: Option<String>,
}

fn init_logging(level: &str, json: bool) -> Result<()> {
    let level = match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));

    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        tracing::subscriber::set_global_default(builder.json().finish())?;
    } else {
        tracing::subscriber::set_global_default(builder.finish())?;
    }
    Ok(())
}

async fn build_audit_sink(config: &AppConfig) -> Result<Arc<dyn AuditSink>> {
    if let Some(database) = &config.database {
        let sink = PostgresAuditSink::connect(database)
            .await
            .context("connecting the Postgres audit trail")?;
        return Ok(Arc::new(sink));
    }
    info!(path = %config.audit.trade_log_path, "Recording trades to JSON lines file");
    Ok(Arc::new(JsonlAuditSink::new(&config.audit.trade_log_path)))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let mut config = load_config(Some(&args.config)).context("loading configuration")?;
    if let Some(symbol) = &args.symbol {
        config.trading.symbol = symbol.trim().to_uppercase();
    }

    let level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.settings.log_level.clone());
    init_logging(&level, args.json_logs)?;

    info!("Starting perp_trader");
    info!("Configuration file: {}", args.config);

    let client = Arc::new(
        BinanceClient::new(&config.exchange, &config.settings)
            .context("building the Binance client")?,
    );
    let signal = strategy::build(&config.strategy);
    info!(
        source = signal.name(),
        min_candles = signal.min_candles(),
        "Signal source selected"
    );
    let audit = build_audit_sink(&config).await?;

    let controller = PositionController::new(
        client.clone(),
        client,
        Arc::from(signal),
        audit,
        config.trading.clone(),
        config.settings.clone(),
    );

    controller
        .start(&config.trading.symbol)
        .await
        .with_context(|| format!("starting controller for {}", config.trading.symbol))?;

    info!("Controller running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Received shutdown signal, cleaning up...");

    controller.stop().await;

    let status = controller.get_status().await;
    if status.side.is_some() {
        warn!(
            symbol = ?status.symbol,
            side = ?status.side,
            entry_price = ?status.entry_price,
            "Exiting with an open position; its stop order stays on the exchange"
        );
    }
    match serde_json::to_string(&status) {
        Ok(json) => info!(status = %json, "Final status"),
        Err(e) => warn!(error = %e, "Could not serialize final status"),
    }

    Ok(())
}
