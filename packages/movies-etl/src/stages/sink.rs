use crate::error::{EtlError, Result};
use crate::index::{IndexDocument, SearchIndex};
use crate::model::FilmWork;
use crate::pipeline::{RunStats, Stage};
use async_trait::async_trait;
use etl_state::{Checkpoint, WatermarkStore};
use tracing::info;

/// Terminal stage: bulk upsert, then advance the watermark on seal
///
/// Batches are confirmed in full or fail the run. The watermark is written
/// only when upstream seals a checkpoint, and never backwards.
pub struct IndexSink<'a> {
    index: &'a dyn SearchIndex,
    watermarks: &'a dyn WatermarkStore,
    key: &'static str,
    committed: Checkpoint,
    stats: &'a RunStats,
}

impl<'a> IndexSink<'a> {
    pub fn new(
        index: &'a dyn SearchIndex,
        watermarks: &'a dyn WatermarkStore,
        key: &'static str,
        committed: Checkpoint,
        stats: &'a RunStats,
    ) -> Self {
        Self {
            index,
            watermarks,
            key,
            committed,
            stats,
        }
    }

    pub fn committed(&self) -> Checkpoint {
        self.committed
    }
}

fn to_documents(batch: &[FilmWork]) -> Result<Vec<IndexDocument>> {
    batch
        .iter()
        .map(|film| {
            Ok(IndexDocument {
                id: film.id.to_string(),
                source: serde_json::to_value(film).map_err(EtlError::serialization)?,
            })
        })
        .collect()
}

#[async_trait]
impl<'a> Stage<Vec<FilmWork>> for IndexSink<'a> {
    async fn accept(&mut self, batch: Vec<FilmWork>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let documents = to_documents(&batch)?;
        let report = self.index.bulk_upsert(&documents).await?;
        report.ensure_applied(&documents)?;

        RunStats::add(&self.stats.documents_written, documents.len());
        RunStats::add(&self.stats.batches_written, 1);
        info!("Sink: saved {} documents", documents.len());
        Ok(())
    }

    async fn seal(&mut self, through: Checkpoint) -> Result<()> {
        if through <= self.committed {
            return Ok(());
        }

        self.watermarks.set(self.key, through).await?;
        self.committed = through;
        self.stats.record_commit(through);
        info!("Sink: {} = {}", self.key, through);
        Ok(())
    }
}
