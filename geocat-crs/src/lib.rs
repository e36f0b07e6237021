//! Coordinate reference system registry.
//!
//! A [`CrsRegistry`] is loaded once at startup from a TOML table (the
//! built-in one ships inside the crate) and is immutable afterwards, so
//! transforms can be called from any number of request tasks concurrently.
//!
//! ```ignore
//! let registry = CrsRegistry::builtin()?;
//! let (lon, lat) = registry.to_global(6677, -10_000.0, 25_000.0)?;
//! let epsg = registry.parse_crs("http://www.opengis.net/def/crs/EPSG/0/6677")?;
//! ```

pub mod error;
pub mod registry;
pub mod tmerc;

pub use error::{CrsError, Result};
pub use registry::{CrsDef, CrsKind, CrsRegistry, GLOBAL_EPSG};
pub use tmerc::{Ellipsoid, TransverseMercator, WebMercator};
