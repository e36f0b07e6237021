//! STAC response documents.
//!
//! Rows are stored flattened; these functions turn them back into STAC API
//! JSON with links rooted at the request's base URL.

use chrono::SecondsFormat;
use geocat_core::{BBox, CatalogMeta, CollectionRow, ItemRow};
use geocat_crs::CrsRegistry;
use serde_json::{json, Map, Value};

pub const STAC_VERSION: &str = "1.0.0";

pub const CONFORMANCE_CLASSES: &[&str] = &[
    "https://api.stacspec.org/v1.0.0/core",
    "https://api.stacspec.org/v1.0.0/collections",
    "https://api.stacspec.org/v1.0.0/ogcapi-features",
    "https://api.stacspec.org/v1.0.0/item-search",
    "http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/core",
    "http://www.opengis.net/spec/ogcapi-features-1/1.0/conf/geojson",
    "http://www.opengis.net/spec/ogcapi-features-2/1.0/conf/crs",
];

const GEOJSON: &str = "application/geo+json";
const JSON: &str = "application/json";

pub fn link(rel: &str, href: impl Into<String>, media_type: &str) -> Value {
    json!({"rel": rel, "href": href.into(), "type": media_type})
}

fn rfc3339(t: &chrono::DateTime<chrono::Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn polygon(bbox: &BBox) -> Value {
    let [w, s, e, n] = bbox.to_array();
    json!({
        "type": "Polygon",
        "coordinates": [[[w, s], [e, s], [e, n], [w, n], [w, s]]]
    })
}

/// Landing page
pub fn landing(
    base: &str,
    catalog: Option<&CatalogMeta>,
    fallback_title: &str,
    fallback_description: &str,
    collections: &[CollectionRow],
) -> Value {
    let id = catalog.map_or("geocat", |c| c.id.as_str());
    let title = catalog
        .and_then(|c| c.title.as_deref())
        .unwrap_or(fallback_title);
    let description = catalog
        .and_then(|c| c.description.as_deref())
        .unwrap_or(fallback_description);

    let mut links = vec![
        link("self", format!("{base}/"), JSON),
        link("root", format!("{base}/"), JSON),
        link("conformance", format!("{base}/conformance"), JSON),
        link("data", format!("{base}/collections"), JSON),
        link("search", format!("{base}/search"), GEOJSON),
        link("http://www.opengis.net/def/rel/ogc/1.0/queryables", format!("{base}/queryables"), "application/schema+json"),
    ];
    let mut search_post = link("search", format!("{base}/search"), GEOJSON);
    search_post["method"] = json!("POST");
    links.push(search_post);
    for collection in collections {
        let mut child = link("child", format!("{base}/collections/{}", collection.id), JSON);
        if let Some(title) = &collection.title {
            child["title"] = json!(title);
        }
        links.push(child);
    }

    json!({
        "type": "Catalog",
        "stac_version": STAC_VERSION,
        "id": id,
        "title": title,
        "description": description,
        "conformsTo": CONFORMANCE_CLASSES,
        "links": links,
    })
}

pub fn conformance() -> Value {
    json!({ "conformsTo": CONFORMANCE_CLASSES })
}

/// JSON schema of the fields `/search` filters on
pub fn queryables(base: &str, registry: &CrsRegistry) -> Value {
    let crs: Vec<Value> = registry
        .supported()
        .map(|def| json!({"epsg": def.epsg, "name": def.name, "uri": def.uri()}))
        .collect();
    json!({
        "$schema": "https://json-schema.org/draft/2019-09/schema",
        "$id": format!("{base}/queryables"),
        "type": "object",
        "title": "Queryables",
        "properties": {
            "id": {"title": "Item ID", "type": "string"},
            "collection": {"title": "Collection ID", "type": "string"},
            "datetime": {"title": "Acquisition time", "type": "string", "format": "date-time"},
            "bbox": {
                "title": "Bounding box",
                "type": "array",
                "minItems": 4,
                "maxItems": 6,
                "items": {"type": "number"}
            },
            "bbox_crs": {
                "title": "Bounding box CRS",
                "type": "string",
                "enum": crs.iter().map(|c| c["uri"].clone()).collect::<Vec<_>>(),
                "default": format!("http://www.opengis.net/def/crs/EPSG/0/{}", registry.global_epsg()),
            },
        },
        "additionalProperties": false,
        "crs": crs,
    })
}

pub fn collection(base: &str, row: &CollectionRow) -> Value {
    // Unknown document fields first, so the indexed ones win.
    let mut doc: Map<String, Value> = row.extra.clone();
    doc.insert("type".into(), json!("Collection"));
    doc.insert("stac_version".into(), json!(STAC_VERSION));
    doc.insert("id".into(), json!(row.id));
    if let Some(title) = &row.title {
        doc.insert("title".into(), json!(title));
    }
    doc.insert(
        "description".into(),
        json!(row.description.as_deref().unwrap_or(row.title.as_deref().unwrap_or(&row.id))),
    );
    doc.insert(
        "license".into(),
        json!(row.license.as_deref().unwrap_or("proprietary")),
    );

    let spatial = row
        .spatial
        .map(|b| b.to_array().to_vec())
        .unwrap_or_else(|| vec![-180.0, -90.0, 180.0, 90.0]);
    doc.insert(
        "extent".into(),
        json!({
            "spatial": {"bbox": [spatial]},
            "temporal": {"interval": [[
                row.temporal.start.as_ref().map(rfc3339),
                row.temporal.end.as_ref().map(rfc3339),
            ]]}
        }),
    );

    let href = format!("{base}/collections/{}", row.id);
    doc.insert(
        "links".into(),
        json!([
            link("self", href.clone(), JSON),
            link("root", format!("{base}/"), JSON),
            link("parent", format!("{base}/"), JSON),
            link("items", format!("{href}/items"), GEOJSON),
        ]),
    );
    Value::Object(doc)
}

pub fn collections(base: &str, rows: &[CollectionRow]) -> Value {
    json!({
        "collections": rows.iter().map(|row| collection(base, row)).collect::<Vec<_>>(),
        "links": [
            link("self", format!("{base}/collections"), JSON),
            link("root", format!("{base}/"), JSON),
        ],
    })
}

pub fn item(base: &str, row: &ItemRow) -> Value {
    let mut properties = row.properties.clone();
    properties.insert(
        "datetime".into(),
        row.datetime.as_ref().map(rfc3339).map_or(Value::Null, Value::String),
    );
    if let Some(native) = &row.native {
        properties.insert("proj:epsg".into(), json!(native.epsg));
        properties.insert("proj:bbox".into(), json!(native.bbox.to_array()));
    }

    let collection_href = format!("{base}/collections/{}", row.collection);
    json!({
        "type": "Feature",
        "stac_version": STAC_VERSION,
        "id": row.id,
        "collection": row.collection,
        "bbox": row.bbox.to_array(),
        "geometry": polygon(&row.bbox),
        "properties": properties,
        "assets": row.assets,
        "links": [
            link("self", format!("{collection_href}/items/{}", row.id), GEOJSON),
            link("parent", collection_href.clone(), JSON),
            link("collection", collection_href, JSON),
            link("root", format!("{base}/"), JSON),
        ],
    })
}

/// A page of items. `next` is the link to the following page, if any.
pub fn item_collection(
    base: &str,
    self_href: String,
    rows: &[ItemRow],
    matched: usize,
    next: Option<Value>,
) -> Value {
    let mut links = vec![
        link("self", self_href, GEOJSON),
        link("root", format!("{base}/"), JSON),
    ];
    links.extend(next);
    json!({
        "type": "FeatureCollection",
        "features": rows.iter().map(|row| item(base, row)).collect::<Vec<_>>(),
        "numberMatched": matched,
        "numberReturned": rows.len(),
        "links": links,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use geocat_core::{NativeBBox, NativeExtent, TemporalExtent};

    fn row() -> ItemRow {
        ItemRow {
            id: "tile-1".into(),
            collection: "fuji".into(),
            bbox: BBox::new(138.70, 35.35, 138.75, 35.40).unwrap(),
            native: Some(NativeExtent {
                epsg: 6676,
                bbox: NativeBBox([-1000.0, -2000.0, 0.0, 1000.0, 2000.0, 3776.0]),
            }),
            datetime: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            properties: json!({"pc:count": 10}).as_object().unwrap().clone(),
            assets: Default::default(),
        }
    }

    #[test]
    fn test_item_carries_native_extent() {
        let doc = item("http://localhost:8080", &row());
        assert_eq!(doc["properties"]["proj:epsg"], 6676);
        assert_eq!(doc["properties"]["proj:bbox"][5], 3776.0);
        assert_eq!(doc["properties"]["datetime"], "2024-01-01T00:00:00Z");
        assert_eq!(doc["properties"]["pc:count"], 10);
        assert_eq!(doc["bbox"][0], 138.70);
        assert_eq!(
            doc["links"][0]["href"],
            "http://localhost:8080/collections/fuji/items/tile-1"
        );
    }

    #[test]
    fn test_collection_defaults() {
        let row = CollectionRow {
            id: "fuji".into(),
            title: None,
            description: None,
            license: None,
            spatial: None,
            temporal: TemporalExtent::default(),
            extra: json!({"keywords": ["lidar"], "id": "ignored"})
                .as_object()
                .unwrap()
                .clone(),
        };
        let doc = collection("http://h", &row);
        assert_eq!(doc["id"], "fuji");
        assert_eq!(doc["license"], "proprietary");
        assert_eq!(doc["keywords"][0], "lidar");
        assert_eq!(doc["extent"]["temporal"]["interval"][0][0], Value::Null);
        assert_eq!(doc["extent"]["spatial"]["bbox"][0][2], 180.0);
    }

    #[test]
    fn test_item_collection_counts() {
        let page = item_collection("http://h", "http://h/search".into(), &[row()], 7, None);
        assert_eq!(page["numberMatched"], 7);
        assert_eq!(page["numberReturned"], 1);
        assert_eq!(page["links"].as_array().unwrap().len(), 2);
    }
}
