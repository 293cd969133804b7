//! Shared fixtures for the integration tests
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use etl_state::InMemoryWatermarkStore;
use movies_etl::{InMemoryIndex, MemorySource, PipelineRunner, RetryPolicy};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub const FILM_KEY: &str = "last_film_work_modified";
pub const PERSON_KEY: &str = "last_person_modified";
pub const GENRE_KEY: &str = "last_genre_modified";

/// Deterministic id, readable in assertion output
pub fn id(n: u128) -> Uuid {
    Uuid::from_u128(n)
}

/// `2024-01-01T00:00:00Z` plus `secs`
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        max_elapsed: Duration::from_secs(10),
        initial_delay: Duration::from_millis(1),
        multiplier: 2.0,
        max_delay: Duration::from_millis(5),
    }
}

pub struct Harness {
    pub source: Arc<MemorySource>,
    pub index: Arc<InMemoryIndex>,
    pub watermarks: Arc<InMemoryWatermarkStore>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            source: Arc::new(MemorySource::new()),
            index: Arc::new(InMemoryIndex::new()),
            watermarks: Arc::new(InMemoryWatermarkStore::new()),
        }
    }

    pub fn runner(&self, fetch_size: usize, max_attempts: u32) -> PipelineRunner {
        PipelineRunner::new(
            self.source.clone(),
            self.index.clone(),
            self.watermarks.clone(),
        )
        .with_fetch_size(fetch_size)
        .with_retry(fast_retry(max_attempts))
    }
}
