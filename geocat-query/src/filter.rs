//! Search request validation.
//!
//! [`SearchRequest`] carries parameters exactly as the client sent them, from
//! either a query string (everything is a string) or a JSON body (arrays and
//! numbers). [`SearchRequest::validate`] turns them into a [`SearchFilter`]
//! or rejects them with [`QueryError::InvalidInput`] before the index is
//! touched.

use crate::cursor::Cursor;
use crate::error::{QueryError, Result};
use geocat_core::{BBox, DatetimeRange, ItemRow};
use geocat_crs::CrsRegistry;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

pub const DEFAULT_LIMIT: usize = 10;
pub const MAX_LIMIT: usize = 100;

/// Page size bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub default_limit: usize,
    pub max_limit: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: MAX_LIMIT,
        }
    }
}

/// Raw search parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub collections: Option<Value>,
    #[serde(default)]
    pub ids: Option<Value>,
    #[serde(default)]
    pub bbox: Option<Value>,
    #[serde(default, alias = "bbox-crs")]
    pub bbox_crs: Option<Value>,
    #[serde(default)]
    pub datetime: Option<Value>,
    #[serde(default)]
    pub limit: Option<Value>,
    #[serde(default, alias = "token")]
    pub cursor: Option<Value>,
}

impl SearchRequest {
    /// Build from query-string pairs. Unknown keys are ignored.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut request = Self::default();
        for (key, value) in pairs {
            let value = Some(Value::String(value.into()));
            match key.as_ref() {
                "collections" => request.collections = value,
                "ids" => request.ids = value,
                "bbox" => request.bbox = value,
                "bbox_crs" | "bbox-crs" => request.bbox_crs = value,
                "datetime" => request.datetime = value,
                "limit" => request.limit = value,
                "cursor" | "token" => request.cursor = value,
                _ => {}
            }
        }
        request
    }

    /// Validate against the registry and page bounds.
    pub fn validate(&self, registry: &CrsRegistry, limits: &QueryLimits) -> Result<SearchFilter> {
        let collections = string_set("collections", self.collections.as_ref())?;
        let ids = string_set("ids", self.ids.as_ref())?;

        let crs = match &self.bbox_crs {
            None | Some(Value::Null) => registry.global_epsg(),
            Some(Value::String(s)) => registry.parse_crs(s)?,
            Some(Value::Number(n)) => registry.parse_crs(&n.to_string())?,
            Some(other) => {
                return Err(QueryError::invalid(format!(
                    "bbox_crs must be a string, got {other}"
                )))
            }
        };
        let bbox = match parse_bbox(self.bbox.as_ref())? {
            Some(bbox) => Some(registry.bbox_to_global(crs, &bbox)?),
            None => None,
        };

        let datetime = match &self.datetime {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(DatetimeRange::parse(s)?),
            Some(other) => {
                return Err(QueryError::invalid(format!(
                    "datetime must be a string, got {other}"
                )))
            }
        };

        let limit = parse_limit(self.limit.as_ref(), limits)?;

        let cursor = match &self.cursor {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.trim().is_empty() => None,
            Some(Value::String(s)) => Some(Cursor::decode(s)?),
            Some(_) => return Err(QueryError::invalid("malformed cursor")),
        };

        Ok(SearchFilter {
            collections,
            ids,
            bbox,
            datetime,
            limit,
            cursor,
        })
    }
}

/// A validated search. The bbox is already in the global reference system.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchFilter {
    pub collections: Option<HashSet<String>>,
    pub ids: Option<HashSet<String>>,
    pub bbox: Option<BBox>,
    pub datetime: Option<DatetimeRange>,
    pub limit: usize,
    pub cursor: Option<Cursor>,
}

impl Default for SearchFilter {
    fn default() -> Self {
        Self {
            collections: None,
            ids: None,
            bbox: None,
            datetime: None,
            limit: DEFAULT_LIMIT,
            cursor: None,
        }
    }
}

impl SearchFilter {
    /// Whether `row` passes every filter (the cursor is applied separately).
    pub fn matches(&self, row: &ItemRow) -> bool {
        if let Some(collections) = &self.collections {
            if !collections.contains(&row.collection) {
                return false;
            }
        }
        if let Some(ids) = &self.ids {
            if !ids.contains(&row.id) {
                return false;
            }
        }
        if let Some(bbox) = &self.bbox {
            if !bbox.intersects(&row.bbox) {
                return false;
            }
        }
        if let Some(range) = &self.datetime {
            // Timestamp-less rows never match a range.
            match &row.datetime {
                Some(t) if range.contains(t) => {}
                _ => return false,
            }
        }
        true
    }
}

/// Comma-separated string or array of strings; empty means "no filter".
fn string_set(name: &str, value: Option<&Value>) -> Result<Option<HashSet<String>>> {
    let values: Vec<String> = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| QueryError::invalid(format!("{name} must contain strings")))
            })
            .collect::<Result<_>>()?,
        Some(other) => {
            return Err(QueryError::invalid(format!(
                "{name} must be a list of strings, got {other}"
            )))
        }
    };
    Ok(if values.is_empty() {
        None
    } else {
        Some(values.into_iter().collect())
    })
}

fn parse_bbox(value: Option<&Value>) -> Result<Option<BBox>> {
    let numbers: Vec<f64> = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => return Ok(None),
        Some(Value::String(s)) => s
            .split(',')
            .map(|part| {
                part.trim()
                    .parse::<f64>()
                    .map_err(|_| QueryError::invalid(format!("bbox value '{part}' is not a number")))
            })
            .collect::<Result<_>>()?,
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_f64()
                    .ok_or_else(|| QueryError::invalid("bbox must contain only numbers"))
            })
            .collect::<Result<_>>()?,
        Some(other) => {
            return Err(QueryError::invalid(format!(
                "bbox must be an array of numbers, got {other}"
            )))
        }
    };
    Ok(Some(BBox::from_slice(&numbers)?))
}

fn parse_limit(value: Option<&Value>, limits: &QueryLimits) -> Result<usize> {
    let raw: i64 = match value {
        None | Some(Value::Null) => return Ok(limits.default_limit),
        Some(Value::Number(n)) => n
            .as_i64()
            .ok_or_else(|| QueryError::invalid(format!("limit must be an integer, got {n}")))?,
        Some(Value::String(s)) => s
            .trim()
            .parse()
            .map_err(|_| QueryError::invalid(format!("limit must be an integer, got '{s}'")))?,
        Some(other) => {
            return Err(QueryError::invalid(format!(
                "limit must be an integer, got {other}"
            )))
        }
    };
    if raw < 1 || raw as u64 > limits.max_limit as u64 {
        return Err(QueryError::invalid(format!(
            "limit must be between 1 and {}, got {raw}",
            limits.max_limit
        )));
    }
    Ok(raw as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> CrsRegistry {
        CrsRegistry::builtin().unwrap()
    }

    fn validate(request: SearchRequest) -> Result<SearchFilter> {
        request.validate(&registry(), &QueryLimits::default())
    }

    #[test]
    fn test_defaults() {
        let filter = validate(SearchRequest::default()).unwrap();
        assert_eq!(filter, SearchFilter::default());
    }

    #[test]
    fn test_query_string_form() {
        let request = SearchRequest::from_query_pairs([
            ("collections", "fuji, shizuoka"),
            ("bbox", "138.71,35.36,138.72,35.37"),
            ("datetime", "2024-01-01/.."),
            ("limit", "25"),
            ("ignored", "x"),
        ]);
        let filter = validate(request).unwrap();
        assert_eq!(filter.collections.unwrap().len(), 2);
        assert_eq!(filter.limit, 25);
        assert!(filter.datetime.unwrap().end.is_none());
        let bbox = filter.bbox.unwrap();
        assert!((bbox.min_x - 138.71).abs() < 1e-12);
    }

    #[test]
    fn test_json_body_form() {
        let request: SearchRequest = serde_json::from_value(json!({
            "collections": ["fuji"],
            "ids": [],
            "bbox": [138.71, 35.36, 0.0, 138.72, 35.37, 100.0],
            "limit": 5,
            "filter": {"op": "ignored"}
        }))
        .unwrap();
        let filter = validate(request).unwrap();
        assert!(filter.ids.is_none());
        assert_eq!(filter.limit, 5);
        assert!((filter.bbox.unwrap().max_y - 35.37).abs() < 1e-12);
    }

    #[test]
    fn test_projected_bbox_is_transformed() {
        let request: SearchRequest = serde_json::from_value(json!({
            "bbox": [-1000.0, -1000.0, 1000.0, 1000.0],
            "bbox_crs": "EPSG:6677"
        }))
        .unwrap();
        let bbox = validate(request).unwrap().bbox.unwrap();
        // Zone IX origin is 36N 139°50'E.
        assert!(bbox.contains_point(139.0 + 50.0 / 60.0, 36.0));
        assert!(bbox.max_x - bbox.min_x < 0.05);
    }

    #[test]
    fn test_invalid_inputs() {
        let cases = [
            json!({"limit": 0}),
            json!({"limit": 101}),
            json!({"limit": "ten"}),
            json!({"bbox": [1.0, 2.0, 3.0]}),
            json!({"bbox": [3.0, 0.0, 1.0, 1.0]}),
            json!({"bbox": "a,b,c,d"}),
            json!({"bbox": [0.0, 0.0, 1.0, 1.0], "bbox_crs": "EPSG:9999"}),
            json!({"bbox": [0.0, 0.0, 1.0, 1.0], "bbox_crs": "not a crs"}),
            json!({"datetime": "2024-13-45"}),
            json!({"datetime": "../.."}),
            json!({"collections": [1, 2]}),
            json!({"cursor": "@@@"}),
        ];
        for case in cases {
            let request: SearchRequest = serde_json::from_value(case.clone()).unwrap();
            assert!(
                matches!(validate(request), Err(QueryError::InvalidInput(_))),
                "{case} should be rejected"
            );
        }
    }
}
