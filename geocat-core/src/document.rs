//! Source metadata documents and their conversion to rows.
//!
//! Documents are dispatched on their `type` member: `Catalog`, `Collection`
//! and `Feature` (an item). JSON with any other type is not a catalog
//! document and is ignored by the scanner rather than reported.

use crate::bbox::{BBox, NativeBBox};
use crate::datetime::parse_instant;
use crate::error::{CoreError, Result};
use crate::model::{AssetRef, CatalogMeta, CollectionRow, ItemRow, NativeExtent, TemporalExtent};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A parsed catalog, collection or item document
#[derive(Debug, Clone)]
pub enum Document {
    Catalog(CatalogDoc),
    Collection(CollectionDoc),
    Item(ItemDoc),
}

impl Document {
    /// Parse raw bytes. `Ok(None)` means valid JSON that is not a catalog
    /// document.
    pub fn from_slice(bytes: &[u8]) -> Result<Option<Self>> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| CoreError::invalid_document(format!("not valid JSON: {e}")))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Option<Self>> {
        let kind = value.get("type").and_then(Value::as_str).map(str::to_owned);
        let doc = match kind.as_deref() {
            Some("Catalog") => Document::Catalog(decode(value, "catalog")?),
            Some("Collection") => Document::Collection(decode(value, "collection")?),
            Some("Feature") => Document::Item(decode(value, "item")?),
            _ => return Ok(None),
        };
        Ok(Some(doc))
    }
}

fn decode<T: for<'de> Deserialize<'de>>(value: Value, what: &str) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| CoreError::invalid_document(format!("malformed {what} document: {e}")))
}

fn require_id(id: Option<String>, what: &str) -> Result<String> {
    match id {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(CoreError::invalid_document(format!("{what} has no id"))),
    }
}

/// Root catalog document
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogDoc {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl CatalogDoc {
    pub fn into_meta(self) -> Result<CatalogMeta> {
        Ok(CatalogMeta {
            id: require_id(self.id, "catalog")?,
            title: self.title,
            description: self.description,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum BboxValue {
    Nested(Vec<Vec<f64>>),
    Flat(Vec<f64>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum IntervalValue {
    Nested(Vec<Vec<Option<String>>>),
    Flat(Vec<Option<String>>),
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SpatialDoc {
    #[serde(default)]
    bbox: Option<BboxValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TemporalDoc {
    #[serde(default)]
    interval: Option<IntervalValue>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ExtentDoc {
    #[serde(default)]
    spatial: Option<SpatialDoc>,
    #[serde(default)]
    temporal: Option<TemporalDoc>,
}

/// Collection document
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionDoc {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub license: Option<String>,
    #[serde(default)]
    extent: Option<ExtentDoc>,
    #[serde(default)]
    keywords: Option<Value>,
    #[serde(default)]
    providers: Option<Value>,
    #[serde(default)]
    summaries: Option<Value>,
}

impl CollectionDoc {
    pub fn into_row(self) -> Result<CollectionRow> {
        let id = require_id(self.id, "collection")?;
        let extent = self.extent.unwrap_or_default();

        let spatial = match extent.spatial.and_then(|s| s.bbox) {
            None => None,
            Some(BboxValue::Flat(values)) => Some(BBox::from_slice(&values)?),
            Some(BboxValue::Nested(list)) => match list.first() {
                Some(values) => Some(BBox::from_slice(values)?),
                None => None,
            },
        };

        let interval = match extent.temporal.and_then(|t| t.interval) {
            None => None,
            Some(IntervalValue::Flat(pair)) => Some(pair),
            Some(IntervalValue::Nested(list)) => list.into_iter().next(),
        };
        let temporal = match interval {
            None => TemporalExtent::default(),
            Some(pair) => TemporalExtent {
                start: optional_instant(pair.first())?,
                end: optional_instant(pair.get(1))?,
            },
        };

        let mut extra = Map::new();
        for (key, value) in [
            ("keywords", self.keywords),
            ("providers", self.providers),
            ("summaries", self.summaries),
        ] {
            if let Some(v) = value {
                extra.insert(key.to_string(), v);
            }
        }

        Ok(CollectionRow {
            id,
            title: self.title,
            description: self.description,
            license: self.license,
            spatial,
            temporal,
            extra,
        })
    }
}

fn optional_instant(value: Option<&Option<String>>) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(Some(s)) => parse_instant(s).map(Some),
        _ => Ok(None),
    }
}

/// Item (GeoJSON Feature) document
#[derive(Debug, Clone, Deserialize)]
pub struct ItemDoc {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default)]
    pub bbox: Option<Vec<f64>>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub assets: BTreeMap<String, AssetRef>,
}

impl ItemDoc {
    /// Flatten into a row. `inferred_collection` is used when the document
    /// does not name its collection.
    pub fn into_row(self, inferred_collection: Option<&str>) -> Result<ItemRow> {
        let id = require_id(self.id, "item")?;
        let collection = match (self.collection, inferred_collection) {
            (Some(c), _) if !c.trim().is_empty() => c,
            (_, Some(c)) => c.to_string(),
            _ => {
                return Err(CoreError::invalid_document(format!(
                    "item '{id}' has no collection"
                )))
            }
        };

        let bbox = match self.bbox {
            Some(values) => BBox::from_slice(&values)
                .map_err(|e| CoreError::invalid_document(format!("item '{id}': {e}")))?,
            None => {
                return Err(CoreError::invalid_document(format!(
                    "item '{id}' has no bbox"
                )))
            }
        };

        let native = native_extent(&self.properties)
            .map_err(|e| CoreError::invalid_document(format!("item '{id}': {e}")))?;
        let datetime = item_datetime(&self.properties)
            .map_err(|e| CoreError::invalid_document(format!("item '{id}': {e}")))?;

        Ok(ItemRow {
            id,
            collection,
            bbox,
            native,
            datetime,
            properties: self.properties,
            assets: self.assets,
        })
    }
}

/// `proj:epsg` (or `proj:code` = `EPSG:<n>`) and `proj:bbox` must appear
/// together.
fn native_extent(properties: &Map<String, Value>) -> Result<Option<NativeExtent>> {
    let epsg = match properties.get("proj:epsg") {
        None | Some(Value::Null) => match properties.get("proj:code").and_then(Value::as_str) {
            Some(code) => Some(
                code.strip_prefix("EPSG:")
                    .and_then(|n| n.parse::<u32>().ok())
                    .ok_or_else(|| {
                        CoreError::invalid_document(format!("unrecognised proj:code '{code}'"))
                    })?,
            ),
            None => None,
        },
        Some(v) => Some(
            v.as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    CoreError::invalid_document(format!("proj:epsg must be an integer, got {v}"))
                })?,
        ),
    };

    let bbox = match properties.get("proj:bbox") {
        None | Some(Value::Null) => None,
        Some(Value::Array(values)) => {
            let numbers = values
                .iter()
                .map(|v| {
                    v.as_f64().ok_or_else(|| {
                        CoreError::invalid_document("proj:bbox must contain only numbers")
                    })
                })
                .collect::<Result<Vec<f64>>>()?;
            Some(NativeBBox::from_slice(&numbers)?)
        }
        Some(other) => {
            return Err(CoreError::invalid_document(format!(
                "proj:bbox must be an array, got {other}"
            )))
        }
    };

    match (epsg, bbox) {
        (Some(epsg), Some(bbox)) => Ok(Some(NativeExtent { epsg, bbox })),
        (None, None) => Ok(None),
        (Some(epsg), None) => Err(CoreError::invalid_document(format!(
            "native CRS EPSG:{epsg} declared without proj:bbox"
        ))),
        (None, Some(_)) => Err(CoreError::invalid_document(
            "proj:bbox given without a native CRS",
        )),
    }
}

/// `datetime`, falling back to `start_datetime` when `datetime` is null.
fn item_datetime(properties: &Map<String, Value>) -> Result<Option<DateTime<Utc>>> {
    for key in ["datetime", "start_datetime"] {
        match properties.get(key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) => return parse_instant(s).map(Some),
            Some(other) => {
                return Err(CoreError::invalid_datetime(format!(
                    "{key} must be a string, got {other}"
                )))
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item_json() -> Value {
        json!({
            "type": "Feature",
            "stac_version": "1.1.0",
            "id": "08OE5427",
            "collection": "fuji",
            "bbox": [138.70, 35.35, 138.75, 35.40],
            "geometry": null,
            "properties": {
                "datetime": "2024-01-01T00:00:00Z",
                "title": "Fuji tile",
                "pc:count": 120000,
                "pc:type": "lidar",
                "pc:encoding": "copc",
                "proj:epsg": 6676,
                "proj:bbox": [-5000.0, -3000.0, 10.0, -4000.0, -2000.0, 50.0]
            },
            "assets": {
                "data": {"href": "https://example.org/08OE5427.copc.laz", "type": "application/vnd.laszip+copc"}
            }
        })
    }

    #[test]
    fn test_dispatch_on_type() {
        let doc = Document::from_value(item_json()).unwrap();
        assert!(matches!(doc, Some(Document::Item(_))));

        let col = Document::from_value(json!({"type": "Collection", "id": "fuji"})).unwrap();
        assert!(matches!(col, Some(Document::Collection(_))));

        let other = Document::from_value(json!({"type": "FeatureCollection"})).unwrap();
        assert!(other.is_none());

        assert!(Document::from_slice(b"{not json").is_err());
    }

    #[test]
    fn test_item_into_row() {
        let Some(Document::Item(doc)) = Document::from_value(item_json()).unwrap() else {
            panic!("expected item");
        };
        let row = doc.into_row(None).unwrap();
        assert_eq!(row.id, "08OE5427");
        assert_eq!(row.collection, "fuji");
        assert_eq!(row.bbox.to_array(), [138.70, 35.35, 138.75, 35.40]);
        let native = row.native.unwrap();
        assert_eq!(native.epsg, 6676);
        assert_eq!(native.bbox.to_array()[5], 50.0);
        assert_eq!(row.datetime.unwrap().to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(row.title(), Some("Fuji tile"));
        assert_eq!(row.properties["pc:count"], json!(120000));
        assert_eq!(
            row.assets["data"].media_type.as_deref(),
            Some("application/vnd.laszip+copc")
        );
    }

    #[test]
    fn test_item_collection_inference() {
        let mut v = item_json();
        v.as_object_mut().unwrap().remove("collection");
        let doc: ItemDoc = serde_json::from_value(v).unwrap();
        assert!(doc.clone().into_row(None).is_err());
        assert_eq!(doc.into_row(Some("inferred")).unwrap().collection, "inferred");
    }

    #[test]
    fn test_item_validation_errors() {
        let mut no_bbox = item_json();
        no_bbox.as_object_mut().unwrap().remove("bbox");
        let doc: ItemDoc = serde_json::from_value(no_bbox).unwrap();
        assert!(doc.into_row(None).is_err());

        let mut epsg_only = item_json();
        epsg_only["properties"]
            .as_object_mut()
            .unwrap()
            .remove("proj:bbox");
        let doc: ItemDoc = serde_json::from_value(epsg_only).unwrap();
        assert!(doc.into_row(None).is_err());

        let mut bad_date = item_json();
        bad_date["properties"]["datetime"] = json!("not a date");
        let doc: ItemDoc = serde_json::from_value(bad_date).unwrap();
        assert!(doc.into_row(None).is_err());

        let mut no_id = item_json();
        no_id["id"] = json!("");
        let doc: ItemDoc = serde_json::from_value(no_id).unwrap();
        assert!(doc.into_row(None).is_err());
    }

    #[test]
    fn test_item_without_native_or_datetime() {
        let mut v = item_json();
        let props = v["properties"].as_object_mut().unwrap();
        props.remove("proj:epsg");
        props.remove("proj:bbox");
        props.insert("datetime".into(), Value::Null);
        let doc: ItemDoc = serde_json::from_value(v).unwrap();
        let row = doc.into_row(None).unwrap();
        assert!(row.native.is_none());
        assert!(row.datetime.is_none());
    }

    #[test]
    fn test_proj_code_form() {
        let mut v = item_json();
        let props = v["properties"].as_object_mut().unwrap();
        props.remove("proj:epsg");
        props.insert("proj:code".into(), json!("EPSG:6677"));
        let doc: ItemDoc = serde_json::from_value(v).unwrap();
        assert_eq!(doc.into_row(None).unwrap().native.unwrap().epsg, 6677);
    }

    #[test]
    fn test_collection_into_row() {
        let v = json!({
            "type": "Collection",
            "id": "fuji",
            "title": "Mt. Fuji",
            "description": "Point clouds around Mt. Fuji",
            "license": "CC-BY-4.0",
            "keywords": ["lidar"],
            "extent": {
                "spatial": {"bbox": [[138.5, 35.2, 138.9, 35.5]]},
                "temporal": {"interval": [["2023-01-01T00:00:00Z", null]]}
            }
        });
        let Some(Document::Collection(doc)) = Document::from_value(v).unwrap() else {
            panic!("expected collection");
        };
        let row = doc.into_row().unwrap();
        assert_eq!(row.id, "fuji");
        assert_eq!(row.spatial.unwrap().to_array(), [138.5, 35.2, 138.9, 35.5]);
        assert!(row.temporal.start.is_some());
        assert!(row.temporal.end.is_none());
        assert_eq!(row.extra["keywords"], json!(["lidar"]));
    }

    #[test]
    fn test_collection_flat_bbox() {
        let v = json!({
            "type": "Collection",
            "id": "flat",
            "extent": {"spatial": {"bbox": [1.0, 2.0, 3.0, 4.0]}}
        });
        let Some(Document::Collection(doc)) = Document::from_value(v).unwrap() else {
            panic!("expected collection");
        };
        assert_eq!(doc.into_row().unwrap().spatial.unwrap().to_array(), [1.0, 2.0, 3.0, 4.0]);
    }
}
