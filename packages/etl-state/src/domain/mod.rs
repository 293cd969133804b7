//! Domain layer for watermark persistence
//!
//! # Domain Models
//!
//! - `Checkpoint`: last-processed relevance timestamp of one pivot
//!
//! # Port Trait
//!
//! - `WatermarkStore`: durable `key → Checkpoint` map
//!
//! # Examples
//!
//! ```rust,ignore
//! use etl_state::{Checkpoint, WatermarkStore};
//!
//! async fn example(store: impl WatermarkStore) -> etl_state::Result<()> {
//!     let since = store.get_or_floor("last_film_work_modified").await?;
//!     // ... sync everything modified after `since` ...
//!     store.set("last_film_work_modified", Checkpoint::now()).await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StorageError;
use crate::Result;

// ═══════════════════════════════════════════════════════════════════════════
// Domain Models
// ═══════════════════════════════════════════════════════════════════════════

/// Checkpoint of one change stream
///
/// Totally ordered; persisted as an RFC 3339 string.
///
/// ```rust
/// use etl_state::Checkpoint;
///
/// let a: Checkpoint = "2021-06-16T20:14:09Z".parse().unwrap();
/// assert!(Checkpoint::floor() < a);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint(DateTime<Utc>);

impl Checkpoint {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Lower bound used when no checkpoint has been stored yet.
    ///
    /// `0001-01-01T00:00:00Z`: below any real `modified` value and still
    /// representable as a Postgres `timestamptz`.
    pub fn floor() -> Self {
        Self(
            Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
        )
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for Checkpoint {
    fn from(at: DateTime<Utc>) -> Self {
        Self(at)
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

impl FromStr for Checkpoint {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        DateTime::parse_from_rfc3339(s)
            .map(|at| Self(at.with_timezone(&Utc)))
            .map_err(|e| {
                StorageError::serialization(format!("Invalid checkpoint '{}': {}", s, e))
                    .with_source(e)
            })
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Port Trait
// ═══════════════════════════════════════════════════════════════════════════

/// Durable `key → Checkpoint` map
///
/// # Contract
///
/// - `get` of an absent key (or of a store that was never written) is
///   `Ok(None)`, not an error
/// - `set` is durable before it returns and never drops other keys
/// - Only one process writes a given store at a time
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    /// Stored checkpoint for `key`, if any
    async fn get(&self, key: &str) -> Result<Option<Checkpoint>>;

    /// Replace the checkpoint for `key`
    async fn set(&self, key: &str, checkpoint: Checkpoint) -> Result<()>;

    /// Stored checkpoint for `key`, or [`Checkpoint::floor`] when absent
    async fn get_or_floor(&self, key: &str) -> Result<Checkpoint> {
        Ok(self.get(key).await?.unwrap_or_else(Checkpoint::floor))
    }
}
