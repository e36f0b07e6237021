//! Flattened index tables.
//!
//! An [`IndexTables`] value is one complete table version: the catalog
//! metadata, one [`CollectionRow`] per collection document and one [`ItemRow`]
//! per item document. Rows are immutable; a changed document produces a new
//! row in the next version.

use crate::bbox::{BBox, NativeBBox};
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};

/// Asset reference carried into item responses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRef {
    pub href: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

/// Native-CRS extent as declared by the source document
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NativeExtent {
    pub epsg: u32,
    pub bbox: NativeBBox,
}

/// One indexed item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRow {
    pub id: String,
    pub collection: String,
    /// Footprint in the global reference system
    pub bbox: BBox,
    pub native: Option<NativeExtent>,
    pub datetime: Option<DateTime<Utc>>,
    /// Response-relevant properties, verbatim from the document
    pub properties: Map<String, Value>,
    pub assets: BTreeMap<String, AssetRef>,
}

impl ItemRow {
    pub fn title(&self) -> Option<&str> {
        self.properties.get("title").and_then(Value::as_str)
    }
}

/// Collection temporal interval; either side may be open
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TemporalExtent {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// One indexed collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRow {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub license: Option<String>,
    pub spatial: Option<BBox>,
    pub temporal: TemporalExtent,
    /// Remaining response fields (keywords, providers, summaries)
    pub extra: Map<String, Value>,
}

/// Root catalog metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogMeta {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
}

/// A complete table version
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexTables {
    pub catalog: Option<CatalogMeta>,
    pub collections: Vec<CollectionRow>,
    pub items: Vec<ItemRow>,
}

impl IndexTables {
    pub fn is_empty(&self) -> bool {
        self.collections.is_empty() && self.items.is_empty()
    }

    /// Put rows into their canonical order: collections by id, items by
    /// (collection, id).
    pub fn normalize(&mut self) {
        self.collections.sort_by(|a, b| a.id.cmp(&b.id));
        self.items.sort_by(|a, b| {
            a.collection
                .cmp(&b.collection)
                .then_with(|| a.id.cmp(&b.id))
        });
    }

    /// Check the table-level invariants: unique collection ids, item ids
    /// unique per collection, every item referencing an existing collection.
    pub fn validate(&self) -> Result<()> {
        let mut collections = HashSet::with_capacity(self.collections.len());
        for c in &self.collections {
            if !collections.insert(c.id.as_str()) {
                return Err(CoreError::integrity(format!(
                    "duplicate collection id '{}'",
                    c.id
                )));
            }
        }

        let mut items = HashSet::with_capacity(self.items.len());
        for item in &self.items {
            if !collections.contains(item.collection.as_str()) {
                return Err(CoreError::integrity(format!(
                    "item '{}' references unknown collection '{}'",
                    item.id, item.collection
                )));
            }
            if !items.insert((item.collection.as_str(), item.id.as_str())) {
                return Err(CoreError::integrity(format!(
                    "duplicate item id '{}' in collection '{}'",
                    item.id, item.collection
                )));
            }
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_rows::{collection, item};
    use super::*;

    #[test]
    fn test_validate_ok() {
        let tables = IndexTables {
            catalog: None,
            collections: vec![collection("a"), collection("b")],
            items: vec![item("a", "1"), item("b", "1")],
        };
        assert!(tables.validate().is_ok());
    }

    #[test]
    fn test_validate_dangling_reference() {
        let tables = IndexTables {
            catalog: None,
            collections: vec![collection("a")],
            items: vec![item("missing", "1")],
        };
        assert!(matches!(tables.validate(), Err(CoreError::Integrity(_))));
    }

    #[test]
    fn test_validate_duplicates() {
        let dup_items = IndexTables {
            catalog: None,
            collections: vec![collection("a")],
            items: vec![item("a", "1"), item("a", "1")],
        };
        assert!(dup_items.validate().is_err());

        let dup_collections = IndexTables {
            catalog: None,
            collections: vec![collection("a"), collection("a")],
            items: vec![],
        };
        assert!(dup_collections.validate().is_err());
    }

    #[test]
    fn test_normalize_orders_rows() {
        let mut tables = IndexTables {
            catalog: None,
            collections: vec![collection("b"), collection("a")],
            items: vec![item("b", "1"), item("a", "2"), item("a", "1")],
        };
        tables.normalize();
        let ids: Vec<_> = tables.collections.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        let keys: Vec<_> = tables
            .items
            .iter()
            .map(|i| (i.collection.as_str(), i.id.as_str()))
            .collect();
        assert_eq!(keys, [("a", "1"), ("a", "2"), ("b", "1")]);
    }
}
