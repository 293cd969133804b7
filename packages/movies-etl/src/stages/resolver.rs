use crate::error::Result;
use crate::model::{ChangedRow, ChangedSet, IdBatch};
use crate::pipeline::{RunStats, Stage};
use crate::pivot::PivotConfig;
use crate::source::SourceSession;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use etl_state::Checkpoint;
use futures::future::{BoxFuture, FutureExt};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Head stage: checkpoint in, pages of affected film-work ids out
///
/// Each page of the changed-since scan is walked through the pivot's hops
/// and forwarded as soon as it resolves; no id set outlives its page. Once a
/// page is fully delivered it is sealed downstream.
pub struct MultiHopResolver<'a, D> {
    session: &'a dyn SourceSession,
    pivot: PivotConfig,
    downstream: D,
    stats: &'a RunStats,
}

/// Timestamps of one delivered scan page that a seal may use
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageBounds {
    last: DateTime<Utc>,
    below_last: Option<DateTime<Utc>>,
}

impl PageBounds {
    fn of(page: &[ChangedRow]) -> Option<Self> {
        let last = page.iter().map(|row| row.modified).max()?;
        let below_last = page
            .iter()
            .map(|row| row.modified)
            .filter(|modified| *modified < last)
            .max();
        Some(Self { last, below_last })
    }

    /// Highest checkpoint covered once this page is delivered
    ///
    /// Rows of the next page sharing `last` are not delivered yet, and the
    /// next scan is strictly after the checkpoint, so the seal stops below them.
    fn sealable(&self, next: Option<&ChangedRow>) -> Option<Checkpoint> {
        match next {
            Some(row) if row.modified <= self.last => self.below_last.map(Checkpoint::new),
            _ => Some(Checkpoint::new(self.last)),
        }
    }
}

impl<'a, D> MultiHopResolver<'a, D>
where
    D: Stage<IdBatch>,
{
    pub fn new(
        session: &'a dyn SourceSession,
        pivot: PivotConfig,
        downstream: D,
        stats: &'a RunStats,
    ) -> Self {
        Self {
            session,
            pivot,
            downstream,
            stats,
        }
    }

    /// Resolve `ids` from hop `depth` on, forwarding every final page
    fn walk(
        &mut self,
        ids: Vec<Uuid>,
        depth: usize,
        changed: Arc<ChangedSet>,
    ) -> BoxFuture<'_, Result<()>> {
        async move {
            if ids.is_empty() {
                return Ok(());
            }

            let hop = match self.pivot.hops.get(depth) {
                Some(hop) => *hop,
                None => {
                    let mut ids = ids;
                    ids.sort_unstable();
                    ids.dedup();
                    RunStats::add(&self.stats.ids_resolved, ids.len());
                    debug!("Resolver {}: forwarding {} film works", self.pivot.name, ids.len());
                    return self.downstream.accept(IdBatch::new(ids, changed)).await;
                }
            };

            let mut cursor = self.session.resolve(hop, &ids).await?;
            loop {
                let page = cursor.next_page().await?;
                if page.is_empty() {
                    break;
                }
                debug!(
                    "Resolver {}: {} {} ids → {}",
                    self.pivot.name,
                    ids.len(),
                    hop.as_str(),
                    page.len()
                );
                self.walk(page, depth + 1, Arc::clone(&changed)).await?;
            }
            Ok(())
        }
        .boxed()
    }
}

#[async_trait]
impl<'a, D> Stage<Checkpoint> for MultiHopResolver<'a, D>
where
    D: Stage<IdBatch>,
{
    async fn accept(&mut self, since: Checkpoint) -> Result<()> {
        let mut scan = self.session.changed_since(self.pivot.table, since).await?;
        let mut pages = 0usize;
        let mut delivered: Option<PageBounds> = None;

        loop {
            let page = scan.next_page().await?;
            if let Some(through) = delivered.take().and_then(|b| b.sealable(page.first())) {
                self.downstream.seal(through).await?;
            }
            if page.is_empty() {
                break;
            }
            pages += 1;
            RunStats::add(&self.stats.changed_rows, page.len());
            info!(
                "Resolver {}: page {} with {} changed rows",
                self.pivot.name,
                pages,
                page.len()
            );

            let bounds = PageBounds::of(&page);
            let changed: ChangedSet = page.iter().map(|row| (row.id, row.modified)).collect();
            let ids = page.iter().map(|row| row.id).collect();
            self.walk(ids, 0, Arc::new(changed)).await?;
            delivered = bounds;
        }

        if pages == 0 {
            info!("Resolver {}: nothing changed since {}", self.pivot.name, since);
        }
        Ok(())
    }
}
