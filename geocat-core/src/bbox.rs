//! Axis-aligned bounding boxes.
//!
//! [`BBox`] is the 2D footprint used for every spatial comparison. It is
//! always expressed in a single CRS (the global one for stored rows).
//! [`NativeBBox`] is the 3D extent a document declares in its native CRS; it
//! is carried through to responses verbatim and never used for filtering.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 2D bounding box `[min_x, min_y, max_x, max_y]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    /// Build a bbox, rejecting non-finite values and inverted axes.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Result<Self> {
        let values = [min_x, min_y, max_x, max_y];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::invalid_bbox(format!(
                "values must be finite numbers, got {values:?}"
            )));
        }
        if min_x > max_x || min_y > max_y {
            return Err(CoreError::invalid_bbox(format!(
                "min must not exceed max, got {values:?}"
            )));
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// Build from 4 values (2D) or 6 values (3D, z is dropped).
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        match values {
            [min_x, min_y, max_x, max_y] => Self::new(*min_x, *min_y, *max_x, *max_y),
            [min_x, min_y, _min_z, max_x, max_y, _max_z] => {
                Self::new(*min_x, *min_y, *max_x, *max_y)
            }
            other => Err(CoreError::invalid_bbox(format!(
                "expected 4 or 6 values, got {}",
                other.len()
            ))),
        }
    }

    /// Smallest bbox enclosing all given points.
    pub fn enclosing(points: impl IntoIterator<Item = (f64, f64)>) -> Result<Self> {
        let mut iter = points.into_iter();
        let (x0, y0) = iter
            .next()
            .ok_or_else(|| CoreError::invalid_bbox("no points to enclose"))?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (x0, y0, x0, y0);
        for (x, y) in iter {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Self::new(min_x, min_y, max_x, max_y)
    }

    /// Closed-interval intersection test; touching edges intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    pub fn union(&self, other: &BBox) -> BBox {
        BBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    /// The four corners, counter-clockwise from the lower-left.
    pub fn corners(&self) -> [(f64, f64); 4] {
        [
            (self.min_x, self.min_y),
            (self.max_x, self.min_y),
            (self.max_x, self.max_y),
            (self.min_x, self.max_y),
        ]
    }

    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }
}

impl fmt::Display for BBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.min_x, self.min_y, self.max_x, self.max_y
        )
    }
}

/// Parses the comma-separated query-string form, `"minx,miny,maxx,maxy"` or
/// the 6-value 3D form.
impl FromStr for BBox {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let values = s
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .map_err(|_| CoreError::invalid_bbox(format!("'{}' is not a number", part.trim())))
            })
            .collect::<Result<Vec<f64>>>()?;
        Self::from_slice(&values)
    }
}

/// 3D extent in a native CRS, stored as `[minx, miny, minz, maxx, maxy, maxz]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NativeBBox(pub [f64; 6]);

impl NativeBBox {
    /// Accepts the 6-value 3D form, or a 4-value 2D form padded with z = 0.
    pub fn from_slice(values: &[f64]) -> Result<Self> {
        let full = match values {
            [a, b, c, d, e, f] => [*a, *b, *c, *d, *e, *f],
            [a, b, d, e] => [*a, *b, 0.0, *d, *e, 0.0],
            other => {
                return Err(CoreError::invalid_bbox(format!(
                    "native bbox needs 6 values, got {}",
                    other.len()
                )))
            }
        };
        if full.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::invalid_bbox("native bbox values must be finite"));
        }
        if full[0] > full[3] || full[1] > full[4] || full[2] > full[5] {
            return Err(CoreError::invalid_bbox(format!(
                "native bbox min must not exceed max, got {full:?}"
            )));
        }
        Ok(Self(full))
    }

    /// The 2D footprint, in the same native CRS.
    pub fn footprint(&self) -> BBox {
        let [min_x, min_y, _, max_x, max_y, _] = self.0;
        BBox {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn to_array(&self) -> [f64; 6] {
        self.0
    }
}
