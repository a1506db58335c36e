//! Trade audit trail
//!
//! Every closed position produces exactly one [`TradeRecord`](crate::common::types::TradeRecord).
//! The controller hands it to an [`AuditSink`](crate::common::traits::AuditSink)
//! on a background task, so a slow or failing sink never holds up trading.

pub mod jsonl;
pub mod memory;
pub mod postgres;

pub use jsonl::JsonlAuditSink;
pub use memory::InMemoryAuditSink;
pub use postgres::PostgresAuditSink;
