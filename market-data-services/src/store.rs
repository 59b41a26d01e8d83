//! Analysis history collaborator.

use std::collections::VecDeque;

use async_trait::async_trait;
use market_core::{AnalysisDocument, AnalysisType, TimestampMS};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::StoreError;

const DEFAULT_CAPACITY: usize = 1_000;

/// One stored analysis run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub id: Uuid,
    pub symbol: String,
    pub analysis_type: AnalysisType,
    pub input: serde_json::Value,
    pub output: AnalysisDocument,
    pub confidence: Option<f64>,
    pub source: String,
    pub processing_time_ms: u64,
    pub created_at: TimestampMS,
}

/// Everything needed to store a record; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewAnalysis {
    pub symbol: String,
    pub input: serde_json::Value,
    pub output: AnalysisDocument,
    pub confidence: Option<f64>,
    pub source: String,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub symbol: Option<String>,
    pub analysis_type: Option<AnalysisType>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    fn matches(&self, record: &AnalysisRecord) -> bool {
        let symbol_ok = self
            .symbol
            .as_deref()
            .map(|s| record.symbol.eq_ignore_ascii_case(s))
            .unwrap_or(true);
        let type_ok = self
            .analysis_type
            .map(|t| record.analysis_type == t)
            .unwrap_or(true);
        symbol_ok && type_ok
    }
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn store_analysis(&self, analysis: NewAnalysis) -> Result<Uuid, StoreError>;

    /// Newest first.
    async fn analysis_history(&self, filter: &HistoryFilter)
        -> Result<Vec<AnalysisRecord>, StoreError>;
}

/// Bounded in-memory history. The oldest record is dropped once `capacity`
/// is reached.
pub struct InMemoryAnalysisStore {
    capacity: usize,
    records: RwLock<VecDeque<AnalysisRecord>>,
}

impl InMemoryAnalysisStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            records: RwLock::new(VecDeque::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}

impl Default for InMemoryAnalysisStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalysisStore for InMemoryAnalysisStore {
    async fn store_analysis(&self, analysis: NewAnalysis) -> Result<Uuid, StoreError> {
        analysis.output.validate()?;

        let record = AnalysisRecord {
            id: Uuid::new_v4(),
            symbol: analysis.symbol.to_ascii_uppercase(),
            analysis_type: analysis.output.analysis_type,
            input: analysis.input,
            output: analysis.output,
            confidence: analysis.confidence,
            source: analysis.source,
            processing_time_ms: analysis.processing_time_ms,
            created_at: chrono::Utc::now().timestamp_millis(),
        };
        let id = record.id;

        let mut records = self.records.write().await;
        if records.len() == self.capacity {
            records.pop_back();
        }
        records.push_front(record);

        tracing::debug!("Stored analysis {} ({} records)", id, records.len());
        Ok(id)
    }

    async fn analysis_history(
        &self,
        filter: &HistoryFilter,
    ) -> Result<Vec<AnalysisRecord>, StoreError> {
        let records = self.records.read().await;
        let limit = filter.limit.unwrap_or(usize::MAX);
        Ok(records
            .iter()
            .filter(|r| filter.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quote_analysis(symbol: &str, price: f64) -> NewAnalysis {
        NewAnalysis {
            symbol: symbol.to_string(),
            input: json!({ "symbol": symbol }),
            output: AnalysisDocument::new(AnalysisType::Quote).with_field("price", price),
            confidence: None,
            source: "yahoo".to_string(),
            processing_time_ms: 12,
        }
    }

    #[tokio::test]
    async fn test_history_newest_first_with_filters() {
        let store = InMemoryAnalysisStore::new();
        store.store_analysis(quote_analysis("AAPL", 1.0)).await.unwrap();
        store.store_analysis(quote_analysis("MSFT", 2.0)).await.unwrap();
        store.store_analysis(quote_analysis("aapl", 3.0)).await.unwrap();

        let all = store.analysis_history(&HistoryFilter::default()).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].output.get("price"), Some(&json!(3.0)));

        let aapl = store
            .analysis_history(&HistoryFilter {
                symbol: Some("AAPL".to_string()),
                limit: Some(1),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(aapl.len(), 1);
        assert_eq!(aapl[0].symbol, "AAPL");

        let technical = store
            .analysis_history(&HistoryFilter {
                analysis_type: Some(AnalysisType::Technical),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(technical.is_empty());
    }

    #[tokio::test]
    async fn test_rejects_incomplete_document() {
        let store = InMemoryAnalysisStore::new();
        let mut analysis = quote_analysis("AAPL", 1.0);
        analysis.output = AnalysisDocument::new(AnalysisType::Quote);
        assert!(matches!(
            store.store_analysis(analysis).await,
            Err(StoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let store = InMemoryAnalysisStore::with_capacity(2);
        for i in 0..5 {
            store.store_analysis(quote_analysis("AAPL", i as f64)).await.unwrap();
        }
        assert_eq!(store.len().await, 2);
        let history = store.analysis_history(&HistoryFilter::default()).await.unwrap();
        assert_eq!(history[1].output.get("price"), Some(&json!(3.0)));
    }
}
