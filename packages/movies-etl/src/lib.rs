/*
 * Movies ETL - Incremental Postgres → Elasticsearch Synchronizer
 *
 * Polls the movie catalogue for rows changed since a per-pivot watermark,
 * resolves them to the film works they affect, reassembles those film works
 * and upserts them into the search index.
 *
 * Architecture:
 * - Watermark Store (etl-state, JSON file)
 * - Multi-Hop Resolver (server-side cursors)
 * - Aggregate Assembler → Transform → Index Sink
 * - Pipeline Runner (bounded retry per run)
 * - Sync Orchestrator (provision once, then cycle the pivots)
 */

// Public modules
pub mod config;
pub mod error;
pub mod index;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod pivot;
pub mod retry;
pub mod source;
pub mod stages;

// Re-exports
pub use config::{BackoffSettings, ElasticsearchSettings, EtlConfig, PostgresSettings, SyncSettings};
pub use error::{ErrorCategory, EtlError, Result};
pub use index::{BulkItem, BulkReport, ElasticsearchIndex, InMemoryIndex, IndexDocument, SearchIndex};
pub use model::{
    AggregateRow, ChangedRow, ChangedSet, FilmWork, IdBatch, JoinRow, PersonRef, PersonRole,
};
pub use orchestrator::{SyncOrchestrator, SyncState};
pub use pipeline::{PipelineRunner, RunReport, RunStats, Stage};
pub use pivot::{JoinHop, PivotConfig, SourceTable};
pub use retry::{RetryAttempt, RetryPolicy};
pub use source::{
    BoxCursor, FilmWorkRecord, MemorySource, PageCursor, PostgresSource, SessionEnd, Source,
    SourceSession,
};
pub use stages::{
    AggregateAssembler, IndexSink, MultiHopResolver, RowFolder, TransformRules, TransformStage,
};

pub use etl_state::{Checkpoint, WatermarkStore};
