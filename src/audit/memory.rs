use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::common::errors::Result;
use crate::common::traits::AuditSink;
use crate::common::types::TradeRecord;

/// Keeps records in memory; used for dry runs and tests
#[derive(Debug, Default)]
pub struct InMemoryAuditSink {
    records: RwLock<Vec<TradeRecord>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far, oldest first
    pub async fn records(&self) -> Vec<TradeRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record_trade(&self, record: &TradeRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }
}
