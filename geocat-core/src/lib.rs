//! Core types for the geocat catalog index.
//!
//! Everything the scanner produces and the query engine consumes lives here:
//! source documents, the flattened row tables, bounding boxes, datetime
//! ranges, version identifiers and the clock abstraction used for cache
//! freshness.

pub mod bbox;
pub mod clock;
pub mod datetime;
pub mod document;
pub mod error;
pub mod model;
pub mod version;

pub use bbox::{BBox, NativeBBox};
pub use clock::{Clock, ManualClock, SystemClock};
pub use datetime::{parse_instant, DatetimeRange};
pub use document::{CatalogDoc, CollectionDoc, Document, ItemDoc};
pub use error::{CoreError, Result};
pub use model::{
    AssetRef, CatalogMeta, CollectionRow, IndexTables, ItemRow, NativeExtent, TemporalExtent,
};
pub use version::VersionId;
