//! Catalog and search operations over the cached snapshot.

use crate::cache::{CacheEntry, IndexCache};
use crate::error::Result;
use crate::filter::{QueryLimits, SearchRequest};
use crate::snapshot::Page;
use geocat_core::{CollectionRow, ItemRow, VersionId};
use geocat_crs::CrsRegistry;
use serde_json::Value;
use std::sync::Arc;

/// Result of a read, tagged with the version it was answered from
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    pub version: VersionId,
    pub value: T,
}

/// Read-only query operations.
///
/// Every call takes the current cache entry once and answers entirely from
/// that snapshot, so a reload that lands mid-request is never observed.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    cache: IndexCache,
    registry: Arc<CrsRegistry>,
    limits: QueryLimits,
}

impl QueryEngine {
    pub fn new(cache: IndexCache, registry: Arc<CrsRegistry>, limits: QueryLimits) -> Self {
        Self {
            cache,
            registry,
            limits,
        }
    }

    pub fn cache(&self) -> &IndexCache {
        &self.cache
    }

    pub fn registry(&self) -> &Arc<CrsRegistry> {
        &self.registry
    }

    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    /// The snapshot a request should be answered from
    pub async fn snapshot(&self) -> Result<Arc<CacheEntry>> {
        self.cache.get().await
    }

    pub async fn list_collections(&self) -> Result<Versioned<Vec<CollectionRow>>> {
        let entry = self.snapshot().await?;
        Ok(Versioned {
            version: entry.version,
            value: entry.snapshot.collections().to_vec(),
        })
    }

    pub async fn get_collection(&self, id: &str) -> Result<Versioned<CollectionRow>> {
        let entry = self.snapshot().await?;
        let collection = entry.snapshot.collection(id)?.clone();
        Ok(Versioned {
            version: entry.version,
            value: collection,
        })
    }

    /// Items of one collection. Accepts the same parameters as
    /// [`search`](Self::search); any `collections` member is replaced by
    /// `collection_id`.
    pub async fn list_items(
        &self,
        collection_id: &str,
        request: &SearchRequest,
    ) -> Result<Versioned<Page>> {
        let mut request = request.clone();
        request.collections = Some(Value::Array(vec![Value::String(
            collection_id.to_string(),
        )]));
        let filter = request.validate(&self.registry, &self.limits)?;

        let entry = self.snapshot().await?;
        entry.snapshot.collection(collection_id)?;
        Ok(Versioned {
            version: entry.version,
            value: entry.snapshot.search(&filter),
        })
    }

    pub async fn get_item(&self, collection_id: &str, item_id: &str) -> Result<Versioned<ItemRow>> {
        let entry = self.snapshot().await?;
        let item = entry.snapshot.item(collection_id, item_id)?.clone();
        Ok(Versioned {
            version: entry.version,
            value: item,
        })
    }

    /// Validate first, so bad input is rejected even when no snapshot is
    /// loaded.
    pub async fn search(&self, request: &SearchRequest) -> Result<Versioned<Page>> {
        let filter = request.validate(&self.registry, &self.limits)?;
        let entry = self.snapshot().await?;
        Ok(Versioned {
            version: entry.version,
            value: entry.snapshot.search(&filter),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::QueryError;
    use chrono::{TimeZone, Utc};
    use geocat_core::{BBox, IndexTables, NativeBBox, NativeExtent, TemporalExtent};
    use geocat_store::{IndexStore, MemoryIndexStore, PublishStats};
    use serde_json::json;

    fn collection(id: &str) -> CollectionRow {
        CollectionRow {
            id: id.into(),
            title: Some(id.to_uppercase()),
            description: None,
            license: None,
            spatial: None,
            temporal: TemporalExtent::default(),
            extra: Default::default(),
        }
    }

    fn item(collection: &str, id: &str, day: u32) -> ItemRow {
        ItemRow {
            id: id.into(),
            collection: collection.into(),
            bbox: BBox::new(138.70, 35.35, 138.75, 35.40).unwrap(),
            native: Some(NativeExtent {
                epsg: 6676,
                bbox: NativeBBox([-5000.0, -3000.0, 10.0, -4000.0, -2000.0, 50.0]),
            }),
            datetime: Some(Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).unwrap()),
            properties: Default::default(),
            assets: Default::default(),
        }
    }

    async fn engine() -> QueryEngine {
        let store = MemoryIndexStore::new();
        let tables = IndexTables {
            catalog: None,
            collections: vec![collection("fuji"), collection("izu")],
            items: (1..=15)
                .map(|d| item("fuji", &format!("f{d:02}"), d))
                .chain([item("izu", "i01", 20)])
                .collect(),
        };
        store
            .publish(VersionId::generate(), &tables, PublishStats::default())
            .await
            .unwrap();
        let cache = IndexCache::new(Arc::new(store));
        QueryEngine::new(
            cache,
            Arc::new(CrsRegistry::builtin().unwrap()),
            QueryLimits::default(),
        )
    }

    #[tokio::test]
    async fn test_collections() {
        let engine = engine().await;
        assert_eq!(engine.list_collections().await.unwrap().value.len(), 2);
        assert_eq!(
            engine.get_collection("izu").await.unwrap().value.title.as_deref(),
            Some("IZU")
        );
        assert!(matches!(
            engine.get_collection("nope").await,
            Err(QueryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_items_pages_one_collection() {
        let engine = engine().await;
        let first = engine
            .list_items("fuji", &SearchRequest::default())
            .await
            .unwrap()
            .value;
        assert_eq!(first.items.len(), 10);
        assert_eq!(first.matched, 15);
        assert_eq!(first.items[0].id, "f15");

        let request = SearchRequest::from_query_pairs([(
            "cursor",
            first.next_cursor.unwrap().encode(),
        )]);
        let second = engine.list_items("fuji", &request).await.unwrap().value;
        assert_eq!(second.items.len(), 5);
        assert!(second.next_cursor.is_none());
        assert!(second.items.iter().all(|i| i.collection == "fuji"));

        assert!(matches!(
            engine.list_items("nope", &SearchRequest::default()).await,
            Err(QueryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_get_item_keeps_native_extent_verbatim() {
        let engine = engine().await;
        let item = engine.get_item("fuji", "f03").await.unwrap().value;
        let native = item.native.unwrap();
        assert_eq!(native.epsg, 6676);
        assert_eq!(native.bbox.0[0], -5000.0);

        assert!(matches!(
            engine.get_item("izu", "f03").await,
            Err(QueryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_search_across_collections() {
        let engine = engine().await;
        let request: SearchRequest = serde_json::from_value(json!({
            "collections": ["izu", "fuji"],
            "datetime": "2024-01-10/2024-01-31",
            "limit": 3
        }))
        .unwrap();
        let page = engine.search(&request).await.unwrap().value;
        assert_eq!(page.matched, 7);
        let ids: Vec<&str> = page.items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["i01", "f15", "f14"]);
    }

    #[tokio::test]
    async fn test_invalid_search_rejected_before_loading() {
        let engine = QueryEngine::new(
            IndexCache::new(Arc::new(MemoryIndexStore::new())),
            Arc::new(CrsRegistry::builtin().unwrap()),
            QueryLimits::default(),
        );
        let request: SearchRequest = serde_json::from_value(json!({"limit": 1000})).unwrap();
        assert!(matches!(
            engine.search(&request).await,
            Err(QueryError::InvalidInput(_))
        ));
        assert!(matches!(
            engine.search(&SearchRequest::default()).await,
            Err(QueryError::Unavailable(_))
        ));
    }
}
