//! Relational source port
//!
//! A [`Source`] opens one [`SourceSession`] per pipeline run. The session
//! hands out paged cursors; nothing here ever materializes a whole result
//! set. Sessions must be released with [`SourceSession::release`] on both the
//! success and the failure path.

pub mod memory;
pub mod postgres;

pub use memory::{FilmWorkRecord, MemorySource};
pub use postgres::PostgresSource;

use crate::error::Result;
use crate::model::{ChangedRow, JoinRow};
use crate::pivot::{JoinHop, SourceTable};
use async_trait::async_trait;
use etl_state::Checkpoint;
use uuid::Uuid;

/// Forward-only page cursor; an empty page means exhausted
#[async_trait]
pub trait PageCursor<T: Send + 'static>: Send {
    async fn next_page(&mut self) -> Result<Vec<T>>;
}

pub type BoxCursor<T> = Box<dyn PageCursor<T>>;

/// How a session ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    Commit,
    Rollback,
}

#[async_trait]
pub trait SourceSession: Send + Sync {
    /// Rows of `table` with `modified > since`, ascending by `modified`
    async fn changed_since(&self, table: SourceTable, since: Checkpoint)
        -> Result<BoxCursor<ChangedRow>>;

    /// Distinct ids reached from `ids` through `hop`
    async fn resolve(&self, hop: JoinHop, ids: &[Uuid]) -> Result<BoxCursor<Uuid>>;

    /// Flat join rows of the given film works, grouped by film-work id
    async fn join_rows(&self, film_work_ids: &[Uuid]) -> Result<BoxCursor<JoinRow>>;

    /// End the session and give its connection back
    async fn release(self: Box<Self>, end: SessionEnd) -> Result<()>;
}

#[async_trait]
pub trait Source: Send + Sync {
    /// Open a session whose cursors fetch `page_size` rows at a time
    async fn open(&self, page_size: usize) -> Result<Box<dyn SourceSession>>;
}
