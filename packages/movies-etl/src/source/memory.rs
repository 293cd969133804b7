//! In-memory catalogue
//!
//! Holds the same five tables as the `content` schema and answers the same
//! queries as [`super::PostgresSource`]. A session works on a snapshot taken
//! at `open`, like a repeatable-read transaction does. Used by tests and for
//! local dry runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use etl_state::Checkpoint;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use uuid::Uuid;

use super::{BoxCursor, PageCursor, SessionEnd, Source, SourceSession};
use crate::error::{EtlError, Result};
use crate::model::{ChangedRow, GenrePart, JoinRow, PersonPart};
use crate::pivot::{JoinHop, SourceTable};

/// `content.film_work` row
#[derive(Debug, Clone, PartialEq)]
pub struct FilmWorkRecord {
    pub id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub modified: DateTime<Utc>,
}

impl FilmWorkRecord {
    pub fn new(id: Uuid, title: &str, modified: DateTime<Utc>) -> Self {
        Self {
            id,
            title: Some(title.to_string()),
            description: None,
            rating: None,
            modified,
        }
    }

    pub fn rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn untitled(mut self) -> Self {
        self.title = None;
        self
    }
}

#[derive(Debug, Clone)]
struct NamedRecord {
    name: String,
    modified: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
struct Catalog {
    film_works: BTreeMap<Uuid, FilmWorkRecord>,
    persons: BTreeMap<Uuid, NamedRecord>,
    genres: BTreeMap<Uuid, NamedRecord>,
    /// (film_work_id, person_id, role)
    person_film_work: Vec<(Uuid, Uuid, String)>,
    /// (film_work_id, genre_id)
    genre_film_work: Vec<(Uuid, Uuid)>,
}

#[derive(Debug, Default)]
struct SessionStats {
    opened: AtomicUsize,
    committed: AtomicUsize,
    rolled_back: AtomicUsize,
}

#[derive(Default)]
pub struct MemorySource {
    catalog: RwLock<Catalog>,
    stats: Arc<SessionStats>,
    failing_opens: AtomicU32,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a film work
    pub fn upsert_film_work(&self, film: FilmWorkRecord) {
        self.catalog.write().film_works.insert(film.id, film);
    }

    /// Insert or replace a person
    pub fn upsert_person(&self, id: Uuid, full_name: &str, modified: DateTime<Utc>) {
        self.catalog.write().persons.insert(
            id,
            NamedRecord {
                name: full_name.to_string(),
                modified,
            },
        );
    }

    /// Insert or replace a genre
    pub fn upsert_genre(&self, id: Uuid, name: &str, modified: DateTime<Utc>) {
        self.catalog.write().genres.insert(
            id,
            NamedRecord {
                name: name.to_string(),
                modified,
            },
        );
    }

    /// Credit `person_id` on `film_work_id`; the person row need not exist
    pub fn link_person(&self, film_work_id: Uuid, person_id: Uuid, role: &str) {
        self.catalog
            .write()
            .person_film_work
            .push((film_work_id, person_id, role.to_string()));
    }

    /// Tag `film_work_id` with `genre_id`; dangling film ids are allowed
    pub fn link_genre(&self, film_work_id: Uuid, genre_id: Uuid) {
        self.catalog
            .write()
            .genre_film_work
            .push((film_work_id, genre_id));
    }

    /// Make the next `count` calls to `open` fail with a database error
    pub fn fail_next_opens(&self, count: u32) {
        self.failing_opens.store(count, Ordering::SeqCst);
    }

    pub fn sessions_opened(&self) -> usize {
        self.stats.opened.load(Ordering::SeqCst)
    }

    pub fn sessions_committed(&self) -> usize {
        self.stats.committed.load(Ordering::SeqCst)
    }

    pub fn sessions_rolled_back(&self) -> usize {
        self.stats.rolled_back.load(Ordering::SeqCst)
    }

    /// Sessions opened but not yet released
    pub fn sessions_open(&self) -> usize {
        self.sessions_opened() - self.sessions_committed() - self.sessions_rolled_back()
    }
}

#[async_trait]
impl Source for MemorySource {
    async fn open(&self, page_size: usize) -> Result<Box<dyn SourceSession>> {
        let failing = self
            .failing_opens
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(EtlError::Database(sqlx::Error::PoolTimedOut));
        }

        self.stats.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemorySession {
            snapshot: Arc::new(self.catalog.read().clone()),
            stats: Arc::clone(&self.stats),
            page_size: page_size.max(1),
        }))
    }
}

struct MemorySession {
    snapshot: Arc<Catalog>,
    stats: Arc<SessionStats>,
    page_size: usize,
}

impl MemorySession {
    fn cursor<T: Send + 'static>(&self, rows: Vec<T>) -> BoxCursor<T> {
        Box::new(MemoryCursor {
            rows: rows.into(),
            page_size: self.page_size,
        })
    }
}

#[async_trait]
impl SourceSession for MemorySession {
    async fn changed_since(
        &self,
        table: SourceTable,
        since: Checkpoint,
    ) -> Result<BoxCursor<ChangedRow>> {
        let catalog = &self.snapshot;
        let mut rows: Vec<ChangedRow> = match table {
            SourceTable::FilmWork => catalog
                .film_works
                .values()
                .map(|f| ChangedRow {
                    id: f.id,
                    modified: f.modified,
                })
                .collect(),
            SourceTable::Person => named_rows(&catalog.persons),
            SourceTable::Genre => named_rows(&catalog.genres),
        };
        rows.retain(|row| row.modified > since.as_datetime());
        rows.sort_by_key(|row| (row.modified, row.id));
        Ok(self.cursor(rows))
    }

    async fn resolve(&self, hop: JoinHop, ids: &[Uuid]) -> Result<BoxCursor<Uuid>> {
        let catalog = &self.snapshot;
        let wanted: BTreeSet<Uuid> = ids.iter().copied().collect();
        let reached: BTreeSet<Uuid> = match hop {
            JoinHop::PersonFilmWorks => catalog
                .person_film_work
                .iter()
                .filter(|(film, person, _)| {
                    wanted.contains(person) && catalog.film_works.contains_key(film)
                })
                .map(|(film, _, _)| *film)
                .collect(),
            JoinHop::GenreLinks => catalog
                .genre_film_work
                .iter()
                .filter(|(_, genre)| wanted.contains(genre))
                .map(|(film, _)| *film)
                .collect(),
            JoinHop::ExistingFilmWorks => wanted
                .into_iter()
                .filter(|id| catalog.film_works.contains_key(id))
                .collect(),
        };
        Ok(self.cursor(reached.into_iter().collect()))
    }

    async fn join_rows(&self, film_work_ids: &[Uuid]) -> Result<BoxCursor<JoinRow>> {
        let catalog = &self.snapshot;
        let wanted: BTreeSet<Uuid> = film_work_ids.iter().copied().collect();
        let mut rows = Vec::new();

        for film in wanted.iter().filter_map(|id| catalog.film_works.get(id)) {
            let mut persons: Vec<Option<PersonPart>> = catalog
                .person_film_work
                .iter()
                .filter(|(film_id, _, _)| *film_id == film.id)
                .map(|(_, person_id, role)| {
                    let person = catalog.persons.get(person_id);
                    Some(PersonPart {
                        id: person.map(|_| *person_id),
                        name: person.map(|p| p.name.clone()),
                        role: Some(role.clone()),
                        modified: person.map(|p| p.modified),
                    })
                })
                .collect();
            if persons.is_empty() {
                persons.push(None);
            }

            let mut genres: Vec<Option<GenrePart>> = catalog
                .genre_film_work
                .iter()
                .filter(|(film_id, _)| *film_id == film.id)
                .filter_map(|(_, genre_id)| {
                    catalog.genres.get(genre_id).map(|g| {
                        Some(GenrePart {
                            id: *genre_id,
                            name: g.name.clone(),
                            modified: g.modified,
                        })
                    })
                })
                .collect();
            if genres.is_empty() {
                genres.push(None);
            }

            for person in &persons {
                for genre in &genres {
                    rows.push(JoinRow {
                        film_work_id: film.id,
                        title: film.title.clone(),
                        description: film.description.clone(),
                        rating: film.rating,
                        modified: film.modified,
                        genre: genre.clone(),
                        person: person.clone(),
                    });
                }
            }
        }

        Ok(self.cursor(rows))
    }

    async fn release(self: Box<Self>, end: SessionEnd) -> Result<()> {
        match end {
            SessionEnd::Commit => self.stats.committed.fetch_add(1, Ordering::SeqCst),
            SessionEnd::Rollback => self.stats.rolled_back.fetch_add(1, Ordering::SeqCst),
        };
        Ok(())
    }
}

fn named_rows(table: &BTreeMap<Uuid, NamedRecord>) -> Vec<ChangedRow> {
    table
        .iter()
        .map(|(id, record)| ChangedRow {
            id: *id,
            modified: record.modified,
        })
        .collect()
}

struct MemoryCursor<T> {
    rows: VecDeque<T>,
    page_size: usize,
}

#[async_trait]
impl<T: Send + 'static> PageCursor<T> for MemoryCursor<T> {
    async fn next_page(&mut self) -> Result<Vec<T>> {
        let take = self.page_size.min(self.rows.len());
        Ok(self.rows.drain(..take).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    async fn drain<T: Send + 'static>(mut cursor: BoxCursor<T>) -> Vec<Vec<T>> {
        let mut pages = Vec::new();
        loop {
            let page = cursor.next_page().await.unwrap();
            if page.is_empty() {
                return pages;
            }
            pages.push(page);
        }
    }

    #[tokio::test]
    async fn test_changed_since_is_strict_and_ordered() {
        let source = MemorySource::new();
        let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        source.upsert_person(a, "A", at(30));
        source.upsert_person(b, "B", at(10));
        source.upsert_person(c, "C", at(20));

        let session = source.open(2).await.unwrap();
        let cursor = session
            .changed_since(SourceTable::Person, Checkpoint::new(at(10)))
            .await
            .unwrap();
        let pages = drain(cursor).await;

        let ids: Vec<_> = pages.concat().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![c, a]);
        session.release(SessionEnd::Commit).await.unwrap();
    }

    #[tokio::test]
    async fn test_pages_respect_page_size() {
        let source = MemorySource::new();
        for i in 0..5 {
            source.upsert_genre(Uuid::new_v4(), "g", at(i));
        }
        let session = source.open(2).await.unwrap();
        let cursor = session
            .changed_since(SourceTable::Genre, Checkpoint::floor())
            .await
            .unwrap();
        let sizes: Vec<_> = drain(cursor).await.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        session.release(SessionEnd::Commit).await.unwrap();
    }

    #[tokio::test]
    async fn test_genre_hops_drop_dangling_links() {
        let source = MemorySource::new();
        let (film, ghost, genre) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        source.upsert_film_work(FilmWorkRecord::new(film, "Dune", at(0)));
        source.upsert_genre(genre, "Sci-Fi", at(1));
        source.link_genre(film, genre);
        source.link_genre(ghost, genre);

        let session = source.open(10).await.unwrap();
        let linked = drain(session.resolve(JoinHop::GenreLinks, &[genre]).await.unwrap())
            .await
            .concat();
        assert_eq!(linked.len(), 2);

        let existing = drain(
            session
                .resolve(JoinHop::ExistingFilmWorks, &linked)
                .await
                .unwrap(),
        )
        .await
        .concat();
        assert_eq!(existing, vec![film]);
        session.release(SessionEnd::Commit).await.unwrap();
    }

    #[tokio::test]
    async fn test_join_rows_fan_out() {
        let source = MemorySource::new();
        let film = Uuid::new_v4();
        let (p1, p2, g1, g2) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        source.upsert_film_work(FilmWorkRecord::new(film, "Dune", at(0)));
        source.upsert_person(p1, "X", at(0));
        source.upsert_person(p2, "Y", at(0));
        source.upsert_genre(g1, "Sci-Fi", at(0));
        source.upsert_genre(g2, "Drama", at(0));
        source.link_person(film, p1, "actor");
        source.link_person(film, p2, "writer");
        source.link_genre(film, g1);
        source.link_genre(film, g2);

        let session = source.open(100).await.unwrap();
        let rows = drain(session.join_rows(&[film]).await.unwrap())
            .await
            .concat();
        assert_eq!(rows.len(), 4);
        session.release(SessionEnd::Commit).await.unwrap();
    }

    #[tokio::test]
    async fn test_session_sees_snapshot() {
        let source = MemorySource::new();
        let session = source.open(10).await.unwrap();
        source.upsert_film_work(FilmWorkRecord::new(Uuid::new_v4(), "Late", at(5)));

        let rows = drain(
            session
                .changed_since(SourceTable::FilmWork, Checkpoint::floor())
                .await
                .unwrap(),
        )
        .await;
        assert!(rows.is_empty());
        session.release(SessionEnd::Rollback).await.unwrap();
        assert_eq!(source.sessions_rolled_back(), 1);
        assert_eq!(source.sessions_open(), 0);
    }

    #[tokio::test]
    async fn test_injected_open_failure() {
        let source = MemorySource::new();
        source.fail_next_opens(1);
        let err = source.open(10).await.err().unwrap();
        assert!(err.is_transient());
        assert!(source.open(10).await.is_ok());
        assert_eq!(source.sessions_opened(), 1);
    }
}
