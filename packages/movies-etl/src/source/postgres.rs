//! PostgreSQL source
//!
//! One connection per session, one read-only repeatable-read transaction, and
//! named server-side cursors (`DECLARE ... NO SCROLL CURSOR` / `FETCH FORWARD`)
//! so the changed-since scan, the hop resolution and the join fetch can stay
//! open at the same time on the same connection.

use async_trait::async_trait;
use etl_state::Checkpoint;
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{Connection, Row};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{BoxCursor, PageCursor, SessionEnd, Source, SourceSession};
use crate::config::PostgresSettings;
use crate::error::Result;
use crate::model::{ChangedRow, GenrePart, JoinRow, PersonPart};
use crate::pivot::{JoinHop, SourceTable};

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

const JOIN_ROWS_BY_FILM_WORK_IDS: &str = r#"
    SELECT fw.id AS film_work_id, fw.title, fw.description, fw.rating, fw.modified,
           g.id AS genre_id, g.name AS genre_name, g.modified AS genre_modified,
           p.id AS person_id, p.full_name AS person_name, pfw.role,
           p.modified AS person_modified
    FROM content.film_work fw
    LEFT JOIN content.person_film_work pfw ON pfw.film_work_id = fw.id
    LEFT JOIN content.person p ON p.id = pfw.person_id
    LEFT JOIN content.genre_film_work gfw ON gfw.film_work_id = fw.id
    LEFT JOIN content.genre g ON g.id = gfw.genre_id
    WHERE fw.id = ANY($1)
    ORDER BY fw.id"#;

fn changed_since_sql(table: SourceTable) -> String {
    format!(
        "SELECT id, modified FROM content.{} WHERE modified > $1 ORDER BY modified, id",
        table.as_str()
    )
}

fn hop_sql(hop: JoinHop) -> &'static str {
    match hop {
        JoinHop::PersonFilmWorks => {
            "SELECT DISTINCT fw.id FROM content.film_work fw \
             JOIN content.person_film_work pfw ON pfw.film_work_id = fw.id \
             WHERE pfw.person_id = ANY($1)"
        }
        JoinHop::GenreLinks => {
            "SELECT DISTINCT gfw.film_work_id FROM content.genre_film_work gfw \
             WHERE gfw.genre_id = ANY($1)"
        }
        JoinHop::ExistingFilmWorks => {
            "SELECT DISTINCT fw.id FROM content.film_work fw WHERE fw.id = ANY($1)"
        }
    }
}

pub struct PostgresSource {
    url: String,
}

impl PostgresSource {
    pub fn new(settings: &PostgresSettings) -> Self {
        Self {
            url: settings.url(),
        }
    }

    pub fn from_url(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait]
impl Source for PostgresSource {
    async fn open(&self, page_size: usize) -> Result<Box<dyn SourceSession>> {
        let mut conn = PgConnection::connect(&self.url).await?;
        sqlx::query("BEGIN ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut conn)
            .await?;

        Ok(Box::new(PostgresSession {
            conn: Arc::new(Mutex::new(conn)),
            page_size: page_size.max(1),
            cursor_seq: AtomicU32::new(0),
        }))
    }
}

pub struct PostgresSession {
    conn: Arc<Mutex<PgConnection>>,
    page_size: usize,
    cursor_seq: AtomicU32,
}

impl PostgresSession {
    async fn declare<T, F>(
        &self,
        sql: &str,
        bind: F,
        decode: fn(&PgRow) -> Result<T>,
    ) -> Result<BoxCursor<T>>
    where
        T: Send + 'static,
        F: for<'q> FnOnce(PgQuery<'q>) -> PgQuery<'q>,
    {
        let name = format!("etl_cursor_{}", self.cursor_seq.fetch_add(1, Ordering::Relaxed));
        let declare = format!("DECLARE {} NO SCROLL CURSOR FOR {}", name, sql);

        {
            let mut conn = self.conn.lock().await;
            bind(sqlx::query(&declare).persistent(false))
                .execute(&mut *conn)
                .await?;
        }
        debug!("Declared cursor {}", name);

        Ok(Box::new(PgCursor {
            conn: Arc::clone(&self.conn),
            fetch: format!("FETCH FORWARD {} FROM {}", self.page_size, name),
            close: format!("CLOSE {}", name),
            page_size: self.page_size,
            decode,
            exhausted: false,
        }))
    }
}

#[async_trait]
impl SourceSession for PostgresSession {
    async fn changed_since(
        &self,
        table: SourceTable,
        since: Checkpoint,
    ) -> Result<BoxCursor<ChangedRow>> {
        let sql = changed_since_sql(table);
        self.declare(&sql, |q| q.bind(since.as_datetime()), decode_changed_row)
            .await
    }

    async fn resolve(&self, hop: JoinHop, ids: &[Uuid]) -> Result<BoxCursor<Uuid>> {
        let ids = ids.to_vec();
        self.declare(hop_sql(hop), move |q| q.bind(ids), decode_id)
            .await
    }

    async fn join_rows(&self, film_work_ids: &[Uuid]) -> Result<BoxCursor<JoinRow>> {
        let ids = film_work_ids.to_vec();
        self.declare(JOIN_ROWS_BY_FILM_WORK_IDS, move |q| q.bind(ids), decode_join_row)
            .await
    }

    async fn release(self: Box<Self>, end: SessionEnd) -> Result<()> {
        let statement = match end {
            SessionEnd::Commit => "COMMIT",
            SessionEnd::Rollback => "ROLLBACK",
        };
        {
            let mut conn = self.conn.lock().await;
            sqlx::query(statement).execute(&mut *conn).await?;
        }

        match Arc::try_unwrap(self.conn) {
            Ok(conn) => conn.into_inner().close().await?,
            // A cursor outlived the run; the connection closes when it drops.
            Err(_) => warn!("Source connection still referenced at release"),
        }
        Ok(())
    }
}

struct PgCursor<T> {
    conn: Arc<Mutex<PgConnection>>,
    fetch: String,
    close: String,
    page_size: usize,
    decode: fn(&PgRow) -> Result<T>,
    exhausted: bool,
}

#[async_trait]
impl<T: Send + 'static> PageCursor<T> for PgCursor<T> {
    async fn next_page(&mut self) -> Result<Vec<T>> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.lock().await;
        let rows = sqlx::query(&self.fetch)
            .persistent(false)
            .fetch_all(&mut *conn)
            .await?;

        if rows.len() < self.page_size {
            sqlx::query(&self.close)
                .persistent(false)
                .execute(&mut *conn)
                .await?;
            self.exhausted = true;
        }

        rows.iter().map(self.decode).collect()
    }
}

fn decode_changed_row(row: &PgRow) -> Result<ChangedRow> {
    Ok(ChangedRow {
        id: row.try_get("id")?,
        modified: row.try_get("modified")?,
    })
}

fn decode_id(row: &PgRow) -> Result<Uuid> {
    Ok(row.try_get(0)?)
}

fn decode_join_row(row: &PgRow) -> Result<JoinRow> {
    let genre = match row.try_get::<Option<Uuid>, _>("genre_id")? {
        Some(id) => Some(GenrePart {
            id,
            name: row.try_get("genre_name")?,
            modified: row.try_get("genre_modified")?,
        }),
        None => None,
    };

    let person_id: Option<Uuid> = row.try_get("person_id")?;
    let role: Option<String> = row.try_get("role")?;
    let person = if person_id.is_some() || role.is_some() {
        Some(PersonPart {
            id: person_id,
            name: row.try_get("person_name")?,
            role,
            modified: row.try_get("person_modified")?,
        })
    } else {
        None
    };

    Ok(JoinRow {
        film_work_id: row.try_get("film_work_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        rating: row.try_get("rating")?,
        modified: row.try_get("modified")?,
        genre,
        person,
    })
}
