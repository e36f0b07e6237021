//! Query engine and snapshot cache.
//!
//! [`IndexCache`] keeps the most recently published table version in memory
//! with bounded staleness. [`QueryEngine`] answers catalog and search
//! operations from whatever snapshot the cache hands out: filter, sort by
//! (datetime desc, id, collection) and paginate with opaque cursors.

pub mod cache;
pub mod cursor;
pub mod engine;
pub mod error;
pub mod filter;
pub mod snapshot;

pub use cache::{CacheEntry, CacheStatus, IndexCache, DEFAULT_RELOAD_TIMEOUT, DEFAULT_TTL};
pub use cursor::{compare_rows, Cursor};
pub use engine::{QueryEngine, Versioned};
pub use error::{QueryError, Result};
pub use filter::{QueryLimits, SearchFilter, SearchRequest, DEFAULT_LIMIT, MAX_LIMIT};
pub use snapshot::{IndexSnapshot, Page};
