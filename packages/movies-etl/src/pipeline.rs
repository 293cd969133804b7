//! Per-pivot pipeline
//!
//! ```text
//! Checkpoint → MultiHopResolver → AggregateAssembler → TransformStage → IndexSink
//!                 (film ids)          (rows)               (documents)
//! ```
//!
//! The chain is built sink-first for every run; each stage owns its
//! downstream and pushes batches into it before returning.
//!
//! The watermark only moves on `seal`: the resolver seals a changed-since
//! page once every film work it reaches has been written, so a failure
//! anywhere inside a page leaves the whole page to the next run.

use crate::config::EtlConfig;
use crate::error::Result;
use crate::index::SearchIndex;
use crate::pivot::PivotConfig;
use crate::retry::RetryPolicy;
use crate::source::{SessionEnd, Source, SourceSession};
use crate::stages::{AggregateAssembler, IndexSink, MultiHopResolver, TransformRules, TransformStage};
use async_trait::async_trait;
use etl_state::{Checkpoint, WatermarkStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// One step of the push chain
#[async_trait]
pub trait Stage<In: Send + 'static>: Send {
    /// Consume one batch, pushing zero or more batches downstream
    async fn accept(&mut self, batch: In) -> Result<()>;

    /// Every change up to `through` has been pushed through this stage
    ///
    /// Stages that hold a downstream forward it; the sink turns it into a
    /// watermark write.
    async fn seal(&mut self, through: Checkpoint) -> Result<()> {
        let _ = through;
        Ok(())
    }
}

/// Counters shared by the stages of one run
#[derive(Debug, Default)]
pub struct RunStats {
    pub changed_rows: AtomicUsize,
    pub ids_resolved: AtomicUsize,
    pub rows_assembled: AtomicUsize,
    pub documents_written: AtomicUsize,
    pub batches_written: AtomicUsize,
    committed: Mutex<Option<Checkpoint>>,
}

impl RunStats {
    pub fn add(counter: &AtomicUsize, n: usize) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_commit(&self, checkpoint: Checkpoint) {
        *self.committed.lock() = Some(checkpoint);
    }

    pub fn last_commit(&self) -> Option<Checkpoint> {
        *self.committed.lock()
    }
}

/// Summary of one successful run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub pivot: String,
    pub checkpoint_before: Checkpoint,
    pub checkpoint_after: Checkpoint,
    pub changed_rows: usize,
    pub ids_resolved: usize,
    pub rows_assembled: usize,
    pub documents_written: usize,
    pub batches_written: usize,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn advanced(&self) -> bool {
        self.checkpoint_after > self.checkpoint_before
    }
}

pub struct PipelineRunner {
    source: Arc<dyn Source>,
    index: Arc<dyn SearchIndex>,
    watermarks: Arc<dyn WatermarkStore>,
    retry: RetryPolicy,
    rules: TransformRules,
    fetch_size: usize,
}

impl PipelineRunner {
    pub fn new(
        source: Arc<dyn Source>,
        index: Arc<dyn SearchIndex>,
        watermarks: Arc<dyn WatermarkStore>,
    ) -> Self {
        Self {
            source,
            index,
            watermarks,
            retry: RetryPolicy::default(),
            rules: TransformRules::default(),
            fetch_size: 100,
        }
    }

    pub fn from_config(
        config: &EtlConfig,
        source: Arc<dyn Source>,
        index: Arc<dyn SearchIndex>,
        watermarks: Arc<dyn WatermarkStore>,
    ) -> Self {
        Self::new(source, index, watermarks)
            .with_retry(RetryPolicy::from(&config.backoff))
            .with_rules(TransformRules {
                uppercase_titles: config.sync.uppercase_titles,
            })
            .with_fetch_size(config.sync.fetch_size)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_rules(mut self, rules: TransformRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_fetch_size(mut self, fetch_size: usize) -> Self {
        self.fetch_size = fetch_size.max(1);
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn index(&self) -> &Arc<dyn SearchIndex> {
        &self.index
    }

    /// Run one pivot to completion, retrying the whole run on transient errors
    pub async fn run(&self, pivot: &PivotConfig) -> Result<RunReport> {
        let operation = format!("pipeline:{}", pivot.name);
        self.retry
            .run(&operation, move |_| self.run_once(pivot))
            .await
    }

    /// Single attempt: read the watermark, open a session, drive the chain
    ///
    /// The session is released on every path, committed after a clean run
    /// and rolled back otherwise.
    pub async fn run_once(&self, pivot: &PivotConfig) -> Result<RunReport> {
        let started = Instant::now();
        let before = self.watermarks.get_or_floor(pivot.watermark_key).await?;
        info!("Pipeline {}: starting from {}", pivot.name, before);

        let stats = RunStats::default();
        let session = self.source.open(self.fetch_size).await?;
        let outcome = self.drive(pivot, session.as_ref(), before, &stats).await;

        let end = if outcome.is_ok() {
            SessionEnd::Commit
        } else {
            SessionEnd::Rollback
        };
        let released = session.release(end).await;

        match (outcome, released) {
            (Err(e), released) => {
                if let Err(release_error) = released {
                    warn!(
                        "Pipeline {}: releasing source session failed: {}",
                        pivot.name, release_error
                    );
                }
                return Err(e);
            }
            (Ok(()), Err(e)) => return Err(e),
            (Ok(()), Ok(())) => {}
        }

        let report = RunReport {
            pivot: pivot.name.to_string(),
            checkpoint_before: before,
            checkpoint_after: stats.last_commit().unwrap_or(before),
            changed_rows: stats.changed_rows.load(Ordering::Relaxed),
            ids_resolved: stats.ids_resolved.load(Ordering::Relaxed),
            rows_assembled: stats.rows_assembled.load(Ordering::Relaxed),
            documents_written: stats.documents_written.load(Ordering::Relaxed),
            batches_written: stats.batches_written.load(Ordering::Relaxed),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            "Pipeline {}: {} changed rows, {} film works, {} documents in {} batches, checkpoint {} ({}ms)",
            report.pivot,
            report.changed_rows,
            report.ids_resolved,
            report.documents_written,
            report.batches_written,
            report.checkpoint_after,
            report.duration_ms
        );
        Ok(report)
    }

    async fn drive(
        &self,
        pivot: &PivotConfig,
        session: &dyn SourceSession,
        since: Checkpoint,
        stats: &RunStats,
    ) -> Result<()> {
        let sink = IndexSink::new(
            self.index.as_ref(),
            self.watermarks.as_ref(),
            pivot.watermark_key,
            since,
            stats,
        );
        let transform = TransformStage::new(self.rules.clone(), sink);
        let assembler = AggregateAssembler::new(session, *pivot, self.fetch_size, transform, stats);
        let mut resolver = MultiHopResolver::new(session, *pivot, assembler, stats);

        resolver.accept(since).await
    }
}
