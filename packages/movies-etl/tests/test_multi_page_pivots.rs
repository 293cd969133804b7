//! Related pivots spanning several scan pages, failing part-way through
//!
//! A film reached from an early page may also be linked to pivot rows
//! changed much later. Neither that link nor a failed later batch may push
//! the watermark past changes that were not delivered.

mod common;

use common::{at, id, Harness, GENRE_KEY, PERSON_KEY};
use etl_state::{Checkpoint, WatermarkStore};
use movies_etl::{FilmWorkRecord, PivotConfig};
use uuid::Uuid;

/// Films F, G and H, all older than any pivot change
fn films(h: &Harness) -> (Uuid, Uuid, Uuid) {
    let (f, g, hh) = (id(0xf), id(0x6), id(0x8));
    for (film, title) in [(f, "dune"), (g, "arrival"), (hh, "heat")] {
        h.source
            .upsert_film_work(FilmWorkRecord::new(film, title, at(0)));
    }
    (f, g, hh)
}

fn assert_indexed(h: &Harness, ids: &[Uuid]) {
    for film in ids {
        assert!(
            h.index.document(&film.to_string()).is_some(),
            "film {} missing from the index",
            film
        );
    }
}

#[tokio::test]
async fn test_person_pivot_recovers_every_film_after_mid_run_failure() {
    let h = Harness::new();
    let (f, g, hh) = films(&h);
    let (p1, p2, p3, p4) = (id(0xa1), id(0xa2), id(0xa3), id(0xa4));
    h.source.upsert_person(p1, "A", at(1));
    h.source.upsert_person(p2, "B", at(2));
    h.source.upsert_person(p3, "C", at(100));
    h.source.upsert_person(p4, "D", at(50));
    h.source.link_person(f, p1, "actor");
    h.source.link_person(f, p3, "actor");
    h.source.link_person(g, p2, "writer");
    h.source.link_person(hh, p4, "director");

    // Pages: [p1@1, p2@2], [p4@50, p3@100]; the second page fails on H
    h.index.reject_ids([hh.to_string()]);
    let runner = h.runner(2, 1);
    assert!(runner.run(&PivotConfig::PERSON).await.is_err());
    assert_eq!(
        h.watermarks.get(PERSON_KEY).await.unwrap(),
        Some(Checkpoint::new(at(2)))
    );

    h.index.clear_rejections();
    let report = runner.run(&PivotConfig::PERSON).await.unwrap();

    assert_eq!(report.checkpoint_before, Checkpoint::new(at(2)));
    assert_eq!(report.changed_rows, 2);
    assert_eq!(report.checkpoint_after, Checkpoint::new(at(100)));
    assert_indexed(&h, &[f, g, hh]);
}

#[tokio::test]
async fn test_genre_pivot_recovers_every_film_after_mid_run_failure() {
    let h = Harness::new();
    let (f, g, hh) = films(&h);
    let (g1, g2, g3, g4) = (id(0xb1), id(0xb2), id(0xb3), id(0xb4));
    h.source.upsert_genre(g1, "Sci-Fi", at(1));
    h.source.upsert_genre(g2, "Drama", at(2));
    h.source.upsert_genre(g3, "Noir", at(100));
    h.source.upsert_genre(g4, "Crime", at(50));
    h.source.link_genre(f, g1);
    h.source.link_genre(f, g3);
    h.source.link_genre(g, g2);
    h.source.link_genre(hh, g4);

    h.index.reject_ids([hh.to_string()]);
    let runner = h.runner(2, 1);
    assert!(runner.run(&PivotConfig::GENRE).await.is_err());
    assert_eq!(
        h.watermarks.get(GENRE_KEY).await.unwrap(),
        Some(Checkpoint::new(at(2)))
    );

    h.index.clear_rejections();
    let report = runner.run(&PivotConfig::GENRE).await.unwrap();

    assert_eq!(report.changed_rows, 2);
    assert_eq!(report.checkpoint_after, Checkpoint::new(at(100)));
    assert_indexed(&h, &[f, g, hh]);
    let doc = h.index.document(&hh.to_string()).unwrap();
    assert_eq!(doc["genre"], serde_json::json!(["Crime"]));
}

#[tokio::test]
async fn test_page_split_into_several_batches_is_committed_whole() {
    let h = Harness::new();
    let person = id(0xa1);
    let credited: Vec<Uuid> = (1..=3).map(id).collect();
    for film in &credited {
        h.source
            .upsert_film_work(FilmWorkRecord::new(*film, "film", at(0)));
        h.source.link_person(*film, person, "actor");
    }
    h.source.upsert_person(person, "A", at(5));

    // One changed row reaching three films: batches [1, 2] and [3]
    h.index.reject_ids([id(3).to_string()]);
    let runner = h.runner(2, 1);
    assert!(runner.run(&PivotConfig::PERSON).await.is_err());
    assert_eq!(h.index.bulk_calls().len(), 2);
    assert_eq!(h.watermarks.get(PERSON_KEY).await.unwrap(), None);

    h.index.clear_rejections();
    let report = runner.run(&PivotConfig::PERSON).await.unwrap();

    assert_eq!(report.checkpoint_after, Checkpoint::new(at(5)));
    assert_eq!(report.batches_written, 2);
    assert_indexed(&h, &credited);
}

#[tokio::test]
async fn test_later_link_does_not_advance_watermark() {
    let h = Harness::new();
    let (f, _, _) = films(&h);
    let (early, late) = (id(0xa1), id(0xa2));
    h.source.upsert_person(early, "A", at(1));
    h.source.upsert_person(late, "B", at(100));
    h.source.link_person(f, early, "actor");
    h.source.link_person(f, late, "actor");

    // One person per page: F is written twice, sealed at each page
    let report = h.runner(1, 1).run(&PivotConfig::PERSON).await.unwrap();

    assert_eq!(report.changed_rows, 2);
    assert_eq!(report.batches_written, 2);
    assert_eq!(
        h.watermarks.history(PERSON_KEY),
        vec![Checkpoint::new(at(1)), Checkpoint::new(at(100))]
    );
}
