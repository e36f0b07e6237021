//! Versioned storage for geocat index tables.
//!
//! A publish writes a complete table version under a fresh [`VersionId`]
//! and only then swaps the current-version pointer, so readers never observe
//! a partially written version. Superseded versions are removed by
//! [`collect_garbage`] according to a [`RetentionPolicy`].
//!
//! [`VersionId`]: geocat_core::VersionId

pub mod codec;
pub mod error;
pub mod file;
pub mod manifest;
pub mod memory;
pub mod retention;
pub mod store;

pub use error::{Result, StoreError};
pub use file::FileIndexStore;
pub use manifest::{CurrentPointer, FileEntry, PublishStats, StoredVersion, VersionManifest};
pub use memory::MemoryIndexStore;
pub use retention::{collect_garbage, GcReport, RetentionPolicy};
pub use store::IndexStore;

#[cfg(test)]
pub(crate) mod test_support {
    use geocat_core::{BBox, CatalogMeta, CollectionRow, IndexTables, ItemRow, TemporalExtent};
    use std::collections::BTreeMap;

    pub fn sample_tables(items: usize) -> IndexTables {
        let collection = CollectionRow {
            id: "fuji".into(),
            title: Some("Mt. Fuji".into()),
            description: None,
            license: None,
            spatial: Some(BBox::new(138.5, 35.2, 138.9, 35.5).unwrap()),
            temporal: TemporalExtent::default(),
            extra: Default::default(),
        };
        let items = (0..items)
            .map(|i| ItemRow {
                id: format!("tile-{i:03}"),
                collection: "fuji".into(),
                bbox: BBox::new(138.7, 35.3, 138.8, 35.4).unwrap(),
                native: None,
                datetime: None,
                properties: Default::default(),
                assets: BTreeMap::new(),
            })
            .collect();
        IndexTables {
            catalog: Some(CatalogMeta {
                id: "catalog".into(),
                title: None,
                description: None,
            }),
            collections: vec![collection],
            items,
        }
    }
}
