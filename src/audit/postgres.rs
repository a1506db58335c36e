use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool};
use std::time::Duration;
use tracing::{debug, info};

use crate::common::errors::Result;
use crate::common::traits::AuditSink;
use crate::common::types::TradeRecord;
use crate::config::types::DatabaseConfig;

const CREATE_TRADES_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS trades (
        id BIGSERIAL PRIMARY KEY,
        symbol TEXT NOT NULL,
        side TEXT NOT NULL,
        entry_price NUMERIC NOT NULL,
        exit_price NUMERIC NOT NULL,
        quantity NUMERIC NOT NULL,
        status TEXT NOT NULL,
        pnl NUMERIC NOT NULL,
        closed_at TIMESTAMPTZ NOT NULL,
        recorded_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
"#;

/// Writes trade records to the `trades` table
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    /// Connect and make sure the `trades` table exists
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect(&config.url)
            .await?;

        sqlx::query(CREATE_TRADES_TABLE).execute(&pool).await?;
        info!("Connected to Postgres audit trail");

        Ok(Self { pool })
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    async fn record_trade(&self, record: &TradeRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trades (
                symbol, side, entry_price, exit_price, quantity, status, pnl, closed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&record.symbol)
        .bind(record.side.to_string())
        .bind(record.entry_price)
        .bind(record.exit_price)
        .bind(record.quantity)
        .bind(record.status.as_str())
        .bind(record.pnl)
        .bind(record.timestamp)
        .execute(&self.pool)
        .await?;

        debug!(symbol = %record.symbol, status = %record.status, "Trade saved to Postgres");
        Ok(())
    }
}
