//! Rows read from the catalogue and the documents written to the index

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Person reference inside a film-work document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PersonRef {
    pub id: Uuid,
    pub name: String,
}

/// Role of a person in a film work, as stored in `person_film_work.role`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersonRole {
    Director,
    Actor,
    Writer,
}

impl PersonRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonRole::Director => "director",
            PersonRole::Actor => "actor",
            PersonRole::Writer => "writer",
        }
    }

    /// Unknown roles (producer, composer, ...) are not indexed
    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "director" => Some(PersonRole::Director),
            "actor" => Some(PersonRole::Actor),
            "writer" => Some(PersonRole::Writer),
            _ => None,
        }
    }
}

/// One `id, modified` row of a changed-since scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangedRow {
    pub id: Uuid,
    pub modified: DateTime<Utc>,
}

/// Pivot rows of one changed-since page, `id → modified`
pub type ChangedSet = BTreeMap<Uuid, DateTime<Utc>>;

/// Film-work ids resolved from one changed-since page
///
/// `changed` is shared by every batch resolved from the same page. Only the
/// pivot rows it lists count toward an aggregate's relevance.
#[derive(Debug, Clone, PartialEq)]
pub struct IdBatch {
    pub ids: Vec<Uuid>,
    pub changed: Arc<ChangedSet>,
}

impl IdBatch {
    pub fn new(ids: Vec<Uuid>, changed: Arc<ChangedSet>) -> Self {
        Self { ids, changed }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Genre side of a join row
#[derive(Debug, Clone, PartialEq)]
pub struct GenrePart {
    pub id: Uuid,
    pub name: String,
    pub modified: DateTime<Utc>,
}

/// Person side of a join row
///
/// `id` is optional: a credit may name someone who has no person record,
/// in which case the name is indexed but no `{id, name}` entry is built.
#[derive(Debug, Clone, PartialEq)]
pub struct PersonPart {
    pub id: Option<Uuid>,
    pub name: Option<String>,
    pub role: Option<String>,
    pub modified: Option<DateTime<Utc>>,
}

/// One flat row of `film_work ⟕ person_film_work ⟕ person ⟕ genre_film_work ⟕ genre`
#[derive(Debug, Clone, PartialEq)]
pub struct JoinRow {
    pub film_work_id: Uuid,
    pub title: Option<String>,
    pub description: Option<String>,
    pub rating: Option<f64>,
    pub modified: DateTime<Utc>,
    pub genre: Option<GenrePart>,
    pub person: Option<PersonPart>,
}

/// Film work assembled from all its join rows, before normalization
///
/// Lists are already deduplicated and sorted. `title` stays optional so that
/// the transform stage decides what a missing title means.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateRow {
    pub id: Uuid,
    pub imdb_rating: Option<f64>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub genre: Vec<String>,
    pub director: Vec<String>,
    pub actors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub actors: Vec<PersonRef>,
    pub writers: Vec<PersonRef>,
    /// Relevance timestamp under the active pivot
    pub modified: DateTime<Utc>,
}

/// Document stored in the search index, keyed by `id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilmWork {
    pub id: Uuid,
    pub imdb_rating: Option<f64>,
    pub genre: Vec<String>,
    pub title: String,
    pub description: Option<String>,
    pub director: Vec<String>,
    pub actors_names: Vec<String>,
    pub writers_names: Vec<String>,
    pub actors: Vec<PersonRef>,
    pub writers: Vec<PersonRef>,
    /// Relevance under the active pivot; never sent to the index
    #[serde(skip, default = "Utc::now")]
    pub modified: DateTime<Utc>,
}
