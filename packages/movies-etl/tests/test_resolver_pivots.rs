//! Multi-hop resolution for the related pivots

mod common;

use async_trait::async_trait;
use common::{at, id, Harness, GENRE_KEY};
use etl_state::{Checkpoint, WatermarkStore};
use movies_etl::{
    FilmWorkRecord, IdBatch, MultiHopResolver, PivotConfig, Result, RunStats, SessionEnd, Source,
    Stage,
};
use parking_lot::Mutex;
use uuid::Uuid;

struct Collect<'a> {
    seen: &'a Mutex<Vec<Vec<Uuid>>>,
}

#[async_trait]
impl<'a> Stage<IdBatch> for Collect<'a> {
    async fn accept(&mut self, batch: IdBatch) -> Result<()> {
        self.seen.lock().push(batch.ids);
        Ok(())
    }
}

async fn resolved_ids(h: &Harness, pivot: PivotConfig) -> Vec<Uuid> {
    let seen = Mutex::new(Vec::new());
    let stats = RunStats::default();
    let session = h.source.open(100).await.unwrap();
    {
        let mut resolver =
            MultiHopResolver::new(session.as_ref(), pivot, Collect { seen: &seen }, &stats);
        resolver.accept(Checkpoint::floor()).await.unwrap();
    }
    session.release(SessionEnd::Commit).await.unwrap();
    seen.into_inner().concat()
}

/// Genres P and Q both changed; R1 and R2 are each reached through both,
/// and P also has a link to a film work that does not exist
fn genre_fixture() -> (Harness, Uuid, Uuid) {
    let h = Harness::new();
    let (r1, r2, unrelated, p, q) = (id(1), id(2), id(3), id(0x9e), id(0x9f));
    h.source
        .upsert_film_work(FilmWorkRecord::new(r1, "dune", at(1)));
    h.source
        .upsert_film_work(FilmWorkRecord::new(r2, "arrival", at(2)));
    h.source
        .upsert_film_work(FilmWorkRecord::new(unrelated, "heat", at(3)));
    h.source.upsert_genre(p, "Sci-Fi", at(10));
    h.source.upsert_genre(q, "Drama", at(11));
    for film in [r1, r2] {
        h.source.link_genre(film, p);
        h.source.link_genre(film, q);
    }
    h.source.link_genre(id(0xdead), p);
    (h, r1, r2)
}

#[tokio::test]
async fn test_genre_pivot_yields_each_film_once() {
    let (h, r1, r2) = genre_fixture();

    let ids = resolved_ids(&h, PivotConfig::GENRE).await;

    assert_eq!(ids, vec![r1, r2]);
}

#[tokio::test]
async fn test_genre_run_indexes_each_film_once() {
    let (h, r1, r2) = genre_fixture();

    let report = h.runner(100, 1).run(&PivotConfig::GENRE).await.unwrap();

    assert_eq!(report.changed_rows, 2);
    assert_eq!(report.ids_resolved, 2);
    assert_eq!(
        h.index.bulk_calls(),
        vec![vec![r1.to_string(), r2.to_string()]]
    );
    assert_eq!(
        h.watermarks.get(GENRE_KEY).await.unwrap(),
        Some(Checkpoint::new(at(11)))
    );
    let doc = h.index.document(&r1.to_string()).unwrap();
    assert_eq!(doc["genre"], serde_json::json!(["Drama", "Sci-Fi"]));
}

#[tokio::test]
async fn test_person_pivot_yields_each_film_once() {
    let h = Harness::new();
    let (r1, r2, person) = (id(1), id(2), id(0x77));
    h.source
        .upsert_film_work(FilmWorkRecord::new(r1, "dune", at(1)));
    h.source
        .upsert_film_work(FilmWorkRecord::new(r2, "arrival", at(2)));
    h.source.upsert_person(person, "Villeneuve", at(5));
    h.source.link_person(r1, person, "director");
    h.source.link_person(r1, person, "writer");
    h.source.link_person(r2, person, "director");

    let ids = resolved_ids(&h, PivotConfig::PERSON).await;

    assert_eq!(ids, vec![r1, r2]);
}

#[tokio::test]
async fn test_orphan_pivot_rows_are_not_errors() {
    let h = Harness::new();
    h.source.upsert_person(id(0x77), "Nobody", at(5));
    h.source.upsert_genre(id(0x9e), "Empty", at(6));

    let runner = h.runner(100, 1);
    let person = runner.run(&PivotConfig::PERSON).await.unwrap();
    let genre = runner.run(&PivotConfig::GENRE).await.unwrap();

    assert_eq!(person.changed_rows, 1);
    assert_eq!(person.ids_resolved, 0);
    assert_eq!(genre.ids_resolved, 0);
    assert!(h.index.bulk_calls().is_empty());
}
