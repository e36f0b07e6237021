//! An immutable, query-ready view of one table version.
//!
//! Lookup maps and the result order are computed once when a version is
//! loaded; every query afterwards is a read-only walk over shared data.

use crate::cursor::{compare_rows, Cursor};
use crate::filter::SearchFilter;
use crate::error::{QueryError, Result};
use chrono::{DateTime, Utc};
use geocat_core::{CatalogMeta, CollectionRow, IndexTables, ItemRow, VersionId};
use geocat_store::StoredVersion;
use std::cmp::Ordering;
use std::collections::HashMap;

/// One page of results
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub items: Vec<ItemRow>,
    /// Rows matching the filter across all pages
    pub matched: usize,
    pub next_cursor: Option<Cursor>,
}

#[derive(Debug)]
pub struct IndexSnapshot {
    version: VersionId,
    created_at: DateTime<Utc>,
    document_errors: usize,
    catalog: Option<CatalogMeta>,
    collections: Vec<CollectionRow>,
    items: Vec<ItemRow>,
    collection_index: HashMap<String, usize>,
    item_index: HashMap<(String, String), usize>,
    /// Item positions in result order
    order: Vec<usize>,
}

impl IndexSnapshot {
    pub fn from_stored(stored: StoredVersion) -> Self {
        let manifest = stored.manifest;
        Self::build(
            manifest.version,
            manifest.created_at,
            manifest.document_errors,
            stored.tables,
        )
    }

    pub fn build(
        version: VersionId,
        created_at: DateTime<Utc>,
        document_errors: usize,
        tables: IndexTables,
    ) -> Self {
        let IndexTables {
            catalog,
            collections,
            items,
        } = tables;

        let collection_index = collections
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        let item_index = items
            .iter()
            .enumerate()
            .map(|(i, row)| ((row.collection.clone(), row.id.clone()), i))
            .collect();
        let mut order: Vec<usize> = (0..items.len()).collect();
        order.sort_by(|&a, &b| compare_rows(&items[a], &items[b]));

        Self {
            version,
            created_at,
            document_errors,
            catalog,
            collections,
            items,
            collection_index,
            item_index,
            order,
        }
    }

    pub fn version(&self) -> VersionId {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn document_errors(&self) -> usize {
        self.document_errors
    }

    pub fn catalog(&self) -> Option<&CatalogMeta> {
        self.catalog.as_ref()
    }

    pub fn collections(&self) -> &[CollectionRow] {
        &self.collections
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    pub fn collection(&self, id: &str) -> Result<&CollectionRow> {
        self.collection_index
            .get(id)
            .map(|&i| &self.collections[i])
            .ok_or_else(|| QueryError::not_found(format!("collection '{id}'")))
    }

    pub fn item(&self, collection: &str, id: &str) -> Result<&ItemRow> {
        self.collection(collection)?;
        self.item_index
            .get(&(collection.to_string(), id.to_string()))
            .map(|&i| &self.items[i])
            .ok_or_else(|| {
                QueryError::not_found(format!("item '{id}' in collection '{collection}'"))
            })
    }

    /// Filter, sort and paginate.
    pub fn search(&self, filter: &SearchFilter) -> Page {
        // Rows at or before the cursor were returned on earlier pages.
        let start = match &filter.cursor {
            Some(cursor) => self
                .order
                .partition_point(|&i| cursor.cmp_row(&self.items[i]) != Ordering::Less),
            None => 0,
        };

        let mut items = Vec::with_capacity(filter.limit.min(self.items.len()));
        let mut matched = 0usize;
        let mut has_more = false;
        for (pos, &i) in self.order.iter().enumerate() {
            let row = &self.items[i];
            if !filter.matches(row) {
                continue;
            }
            matched += 1;
            if pos < start {
                continue;
            }
            if items.len() < filter.limit {
                items.push(row.clone());
            } else {
                has_more = true;
            }
        }

        let next_cursor = if has_more {
            items.last().map(Cursor::after)
        } else {
            None
        };
        Page {
            items,
            matched,
            next_cursor,
        }
    }
}
