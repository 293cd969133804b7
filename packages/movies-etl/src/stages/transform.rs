use crate::error::{EtlError, Result};
use crate::model::{AggregateRow, FilmWork};
use crate::pipeline::Stage;
use async_trait::async_trait;
use etl_state::Checkpoint;
use serde::{Deserialize, Serialize};

/// Normalization rules applied to every assembled row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformRules {
    /// Store titles uppercased
    pub uppercase_titles: bool,
}

impl Default for TransformRules {
    fn default() -> Self {
        Self {
            uppercase_titles: true,
        }
    }
}

impl TransformRules {
    /// Turn one assembled row into an index document
    ///
    /// A missing or blank title is a malformed row: the error is permanent,
    /// so the run aborts instead of retrying or skipping it.
    pub fn apply(&self, row: AggregateRow) -> Result<FilmWork> {
        let title = match row.title {
            Some(title) if !title.trim().is_empty() => title,
            _ => {
                return Err(EtlError::malformed(format!(
                    "film work {} has no title",
                    row.id
                )))
            }
        };
        let title = if self.uppercase_titles {
            title.to_uppercase()
        } else {
            title
        };

        Ok(FilmWork {
            id: row.id,
            imdb_rating: row.imdb_rating,
            genre: row.genre,
            title,
            description: row.description,
            director: row.director,
            actors_names: row.actors_names,
            writers_names: row.writers_names,
            actors: row.actors,
            writers: row.writers,
            modified: row.modified,
        })
    }
}

pub struct TransformStage<D> {
    rules: TransformRules,
    downstream: D,
}

impl<D> TransformStage<D>
where
    D: Stage<Vec<FilmWork>>,
{
    pub fn new(rules: TransformRules, downstream: D) -> Self {
        Self { rules, downstream }
    }
}

#[async_trait]
impl<D> Stage<Vec<AggregateRow>> for TransformStage<D>
where
    D: Stage<Vec<FilmWork>>,
{
    async fn accept(&mut self, rows: Vec<AggregateRow>) -> Result<()> {
        let documents = rows
            .into_iter()
            .map(|row| self.rules.apply(row))
            .collect::<Result<Vec<_>>>()?;
        self.downstream.accept(documents).await
    }

    async fn seal(&mut self, through: Checkpoint) -> Result<()> {
        self.downstream.seal(through).await
    }
}
