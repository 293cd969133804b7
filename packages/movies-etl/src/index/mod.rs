//! Search index port
//!
//! Two operations: a bulk create-or-replace keyed by document id, and the
//! destructive recreate used once at startup.

pub mod elasticsearch;
pub mod memory;

pub use elasticsearch::ElasticsearchIndex;
pub use memory::InMemoryIndex;

use crate::error::{EtlError, Result};
use async_trait::async_trait;
use std::collections::HashSet;

/// One `(id, document)` pair of a bulk request
#[derive(Debug, Clone, PartialEq)]
pub struct IndexDocument {
    pub id: String,
    pub source: serde_json::Value,
}

/// Outcome of one bulk item
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItem {
    pub id: String,
    pub status: u16,
    pub error: Option<String>,
}

impl BulkItem {
    pub fn ok(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: 200,
            error: None,
        }
    }

    pub fn failed(id: impl Into<String>, status: u16, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            error: Some(error.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && (200..300).contains(&self.status)
    }
}

/// Bulk response as reported by the index
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkReport {
    /// Top-level `errors` flag
    pub errors: bool,
    pub items: Vec<BulkItem>,
}

impl BulkReport {
    /// Fail unless every document of `batch` is confirmed applied
    ///
    /// The rejected ids are the failed items, plus any batch id the response
    /// does not mention. A raised `errors` flag with no identifiable culprit
    /// rejects the whole batch.
    pub fn ensure_applied(&self, batch: &[IndexDocument]) -> Result<()> {
        let mut failed: Vec<String> = self
            .items
            .iter()
            .filter(|item| !item.is_success())
            .map(|item| item.id.clone())
            .collect();

        let acknowledged: HashSet<&str> = self.items.iter().map(|i| i.id.as_str()).collect();
        failed.extend(
            batch
                .iter()
                .filter(|doc| !acknowledged.contains(doc.id.as_str()))
                .map(|doc| doc.id.clone()),
        );

        if failed.is_empty() && (self.errors || self.items.len() != batch.len()) {
            failed = batch.iter().map(|doc| doc.id.clone()).collect();
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(EtlError::PartialWrite {
                total: batch.len(),
                failed,
            })
        }
    }
}

#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create or replace every document of `documents` by id
    async fn bulk_upsert(&self, documents: &[IndexDocument]) -> Result<BulkReport>;

    /// Drop the index if present and create it from `schema`
    async fn recreate(&self, schema: &serde_json::Value) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn batch(ids: &[&str]) -> Vec<IndexDocument> {
        ids.iter()
            .map(|id| IndexDocument {
                id: id.to_string(),
                source: json!({ "id": id }),
            })
            .collect()
    }

    #[test]
    fn test_full_success() {
        let report = BulkReport {
            errors: false,
            items: vec![BulkItem::ok("f1"), BulkItem::ok("f2")],
        };
        assert!(report.ensure_applied(&batch(&["f1", "f2"])).is_ok());
    }

    #[test]
    fn test_one_rejected_item() {
        let report = BulkReport {
            errors: true,
            items: vec![
                BulkItem::ok("f1"),
                BulkItem::failed("f2", 400, "mapper_parsing_exception"),
                BulkItem::ok("f3"),
            ],
        };
        match report.ensure_applied(&batch(&["f1", "f2", "f3"])) {
            Err(EtlError::PartialWrite { total, failed }) => {
                assert_eq!(total, 3);
                assert_eq!(failed, vec!["f2".to_string()]);
            }
            other => panic!("expected partial write, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_items_count_as_failed() {
        let report = BulkReport {
            errors: false,
            items: vec![BulkItem::ok("f1")],
        };
        match report.ensure_applied(&batch(&["f1", "f2"])) {
            Err(EtlError::PartialWrite { failed, .. }) => assert_eq!(failed, vec!["f2".to_string()]),
            other => panic!("expected partial write, got {:?}", other),
        }
    }

    #[test]
    fn test_errors_flag_without_culprit_fails_batch() {
        let report = BulkReport {
            errors: true,
            items: vec![BulkItem::ok("f1")],
        };
        assert!(report.ensure_applied(&batch(&["f1"])).is_err());
    }
}
