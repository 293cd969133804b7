//! In-memory index with failure injection (test tooling)

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use super::{BulkItem, BulkReport, IndexDocument, SearchIndex};
use crate::error::{EtlError, Result};

#[derive(Default)]
pub struct InMemoryIndex {
    documents: Mutex<BTreeMap<String, serde_json::Value>>,
    /// Ids of every bulk request, in call order
    bulk_calls: Mutex<Vec<Vec<String>>>,
    schema: Mutex<Option<serde_json::Value>>,
    rejected_ids: Mutex<HashSet<String>>,
    failing_bulks: AtomicU32,
    failing_recreates: AtomicU32,
    recreates: AtomicUsize,
}

fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report these ids as rejected (status 400) until cleared
    pub fn reject_ids<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rejected_ids
            .lock()
            .extend(ids.into_iter().map(Into::into));
    }

    pub fn clear_rejections(&self) {
        self.rejected_ids.lock().clear();
    }

    /// Make the next `count` bulk requests fail before reaching the index
    pub fn fail_next_bulks(&self, count: u32) {
        self.failing_bulks.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` recreate calls fail
    pub fn fail_next_recreates(&self, count: u32) {
        self.failing_recreates.store(count, Ordering::SeqCst);
    }

    pub fn document(&self, id: &str) -> Option<serde_json::Value> {
        self.documents.lock().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.lock().is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.documents.lock().keys().cloned().collect()
    }

    pub fn bulk_calls(&self) -> Vec<Vec<String>> {
        self.bulk_calls.lock().clone()
    }

    pub fn recreate_count(&self) -> usize {
        self.recreates.load(Ordering::SeqCst)
    }

    pub fn schema(&self) -> Option<serde_json::Value> {
        self.schema.lock().clone()
    }
}

#[async_trait]
impl SearchIndex for InMemoryIndex {
    async fn bulk_upsert(&self, documents: &[IndexDocument]) -> Result<BulkReport> {
        self.bulk_calls
            .lock()
            .push(documents.iter().map(|d| d.id.clone()).collect());

        if take_failure(&self.failing_bulks) {
            return Err(EtlError::IndexRejected("index unavailable".to_string()));
        }

        let rejected = self.rejected_ids.lock().clone();
        let mut stored = self.documents.lock();
        let mut report = BulkReport::default();

        for doc in documents {
            if rejected.contains(&doc.id) {
                report.errors = true;
                report
                    .items
                    .push(BulkItem::failed(&doc.id, 400, "document rejected"));
            } else {
                stored.insert(doc.id.clone(), doc.source.clone());
                report.items.push(BulkItem::ok(&doc.id));
            }
        }
        Ok(report)
    }

    async fn recreate(&self, schema: &serde_json::Value) -> Result<()> {
        if take_failure(&self.failing_recreates) {
            return Err(EtlError::IndexRejected("cluster unavailable".to_string()));
        }
        self.documents.lock().clear();
        *self.schema.lock() = Some(schema.clone());
        self.recreates.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
