use crate::error::Result;
use crate::model::{AggregateRow, ChangedSet, IdBatch, JoinRow, PersonRef, PersonRole};
use crate::pipeline::{RunStats, Stage};
use crate::pivot::{PivotConfig, SourceTable};
use crate::source::SourceSession;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use etl_state::Checkpoint;
use std::collections::BTreeSet;
use tracing::info;
use uuid::Uuid;

/// Folds the flat join rows of one film work into an aggregate
#[derive(Debug)]
struct FilmAccumulator {
    id: Uuid,
    title: Option<String>,
    description: Option<String>,
    rating: Option<f64>,
    film_modified: DateTime<Utc>,
    /// Max `modified` of the pivot rows that caused the match
    pivot_modified: Option<DateTime<Utc>>,
    genres: BTreeSet<String>,
    directors: BTreeSet<String>,
    actors_names: BTreeSet<String>,
    writers_names: BTreeSet<String>,
    actors: BTreeSet<PersonRef>,
    writers: BTreeSet<PersonRef>,
}

impl FilmAccumulator {
    fn new(row: &JoinRow) -> Self {
        Self {
            id: row.film_work_id,
            title: row.title.clone(),
            description: row.description.clone(),
            rating: row.rating,
            film_modified: row.modified,
            pivot_modified: None,
            genres: BTreeSet::new(),
            directors: BTreeSet::new(),
            actors_names: BTreeSet::new(),
            writers_names: BTreeSet::new(),
            actors: BTreeSet::new(),
            writers: BTreeSet::new(),
        }
    }

    fn bump(&mut self, modified: DateTime<Utc>) {
        self.pivot_modified = Some(match self.pivot_modified {
            Some(current) => current.max(modified),
            None => modified,
        });
    }

    fn absorb(&mut self, row: JoinRow, relevance: SourceTable, changed: &ChangedSet) {
        if let Some(genre) = row.genre {
            if relevance == SourceTable::Genre && changed.contains_key(&genre.id) {
                self.bump(genre.modified);
            }
            self.genres.insert(genre.name);
        }

        let Some(person) = row.person else {
            return;
        };
        if relevance == SourceTable::Person {
            if let (Some(id), Some(modified)) = (person.id, person.modified) {
                if changed.contains_key(&id) {
                    self.bump(modified);
                }
            }
        }

        let role = person.role.as_deref().and_then(PersonRole::parse);
        let (Some(role), Some(name)) = (role, person.name) else {
            return;
        };
        let structured = person.id.map(|id| PersonRef {
            id,
            name: name.clone(),
        });

        match role {
            PersonRole::Director => {
                self.directors.insert(name);
            }
            PersonRole::Actor => {
                self.actors_names.insert(name);
                self.actors.extend(structured);
            }
            PersonRole::Writer => {
                self.writers_names.insert(name);
                self.writers.extend(structured);
            }
        }
    }

    fn finish(self, relevance: SourceTable) -> AggregateRow {
        let modified = match relevance {
            SourceTable::FilmWork => self.film_modified,
            SourceTable::Person | SourceTable::Genre => {
                self.pivot_modified.unwrap_or(self.film_modified)
            }
        };

        AggregateRow {
            id: self.id,
            imdb_rating: self.rating,
            title: self.title,
            description: self.description,
            genre: self.genres.into_iter().collect(),
            director: self.directors.into_iter().collect(),
            actors_names: self.actors_names.into_iter().collect(),
            writers_names: self.writers_names.into_iter().collect(),
            actors: self.actors.into_iter().collect(),
            writers: self.writers.into_iter().collect(),
            modified,
        }
    }
}

/// Streaming fold over join rows grouped by film-work id
///
/// Holds one film at a time: `push` returns the previous film's aggregate as
/// soon as a row of the next film arrives.
pub struct RowFolder<'c> {
    relevance: SourceTable,
    changed: &'c ChangedSet,
    current: Option<FilmAccumulator>,
}

impl<'c> RowFolder<'c> {
    pub fn new(relevance: SourceTable, changed: &'c ChangedSet) -> Self {
        Self {
            relevance,
            changed,
            current: None,
        }
    }

    pub fn push(&mut self, row: JoinRow) -> Option<AggregateRow> {
        if let Some(film) = self.current.as_mut() {
            if film.id == row.film_work_id {
                film.absorb(row, self.relevance, self.changed);
                return None;
            }
        }

        let mut next = FilmAccumulator::new(&row);
        next.absorb(row, self.relevance, self.changed);
        self.current
            .replace(next)
            .map(|done| done.finish(self.relevance))
    }

    pub fn finish(self) -> Option<AggregateRow> {
        let relevance = self.relevance;
        self.current.map(|film| film.finish(relevance))
    }
}

/// Film-work ids in, pages of at most `fetch_size` aggregates out
///
/// Each emitted page is ordered by `(relevance, id)`.
pub struct AggregateAssembler<'a, D> {
    session: &'a dyn SourceSession,
    pivot: PivotConfig,
    fetch_size: usize,
    downstream: D,
    stats: &'a RunStats,
}

impl<'a, D> AggregateAssembler<'a, D>
where
    D: Stage<Vec<AggregateRow>>,
{
    pub fn new(
        session: &'a dyn SourceSession,
        pivot: PivotConfig,
        fetch_size: usize,
        downstream: D,
        stats: &'a RunStats,
    ) -> Self {
        Self {
            session,
            pivot,
            fetch_size: fetch_size.max(1),
            downstream,
            stats,
        }
    }

    async fn emit(&mut self, mut page: Vec<AggregateRow>) -> Result<()> {
        if page.is_empty() {
            return Ok(());
        }
        page.sort_by(|a, b| (a.modified, a.id).cmp(&(b.modified, b.id)));
        RunStats::add(&self.stats.rows_assembled, page.len());
        self.downstream.accept(page).await
    }
}

#[async_trait]
impl<'a, D> Stage<IdBatch> for AggregateAssembler<'a, D>
where
    D: Stage<Vec<AggregateRow>>,
{
    async fn accept(&mut self, batch: IdBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut cursor = self.session.join_rows(&batch.ids).await?;
        let mut folder = RowFolder::new(self.pivot.relevance(), &batch.changed);
        let mut ready = Vec::with_capacity(self.fetch_size);
        let (mut join_rows, mut assembled) = (0usize, 0usize);

        loop {
            let page = cursor.next_page().await?;
            if page.is_empty() {
                break;
            }
            join_rows += page.len();
            for row in page {
                ready.extend(folder.push(row));
                if ready.len() >= self.fetch_size {
                    assembled += ready.len();
                    self.emit(std::mem::take(&mut ready)).await?;
                }
            }
        }
        ready.extend(folder.finish());
        assembled += ready.len();
        self.emit(ready).await?;

        info!(
            "Assembler {}: {} ids, {} join rows → {} film works",
            self.pivot.name,
            batch.len(),
            join_rows,
            assembled
        );
        Ok(())
    }

    async fn seal(&mut self, through: Checkpoint) -> Result<()> {
        self.downstream.seal(through).await
    }
}
