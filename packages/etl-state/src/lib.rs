//! Watermark persistence for incremental synchronization
//!
//! Each change stream remembers the last relevance timestamp it has fully
//! delivered. The next poll resumes strictly after that value.
//!
//! ## Core Principles
//!
//! 1. **Absent is not an error**: a store that was never written answers
//!    `None`; callers fall back to [`Checkpoint::floor`]
//! 2. **Durable set**: `set` returns only after the value is on stable storage
//! 3. **Whole-map writes**: updating one key never loses another
//!
//! ## Usage
//!
//! ```rust,ignore
//! use etl_state::{JsonFileWatermarkStore, WatermarkStore};
//!
//! let store = JsonFileWatermarkStore::new("state/watermarks.json");
//! let since = store.get_or_floor("last_person_modified").await?;
//! ```

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use error::{ErrorKind, Result, StorageError};

pub use domain::{Checkpoint, WatermarkStore};
#[cfg(feature = "json-file")]
pub use infrastructure::JsonFileWatermarkStore;
pub use infrastructure::InMemoryWatermarkStore;
