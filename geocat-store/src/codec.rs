//! Column file encoding.
//!
//! Each table is stored struct-of-arrays: one vector per column, serialized
//! with postcard and compressed with zstd. Free-form JSON (item properties,
//! assets, collection extras) is kept as JSON text inside its column since
//! postcard is not self-describing.
//!
//! File layout (13-byte header):
//! - 4 bytes magic (`GCIT` items, `GCCO` collections)
//! - 1 byte format version
//! - 4 bytes uncompressed payload length (big-endian)
//! - 4 bytes compressed payload length (big-endian)
//! - zstd(postcard(columns))

use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use geocat_core::{
    AssetRef, BBox, CollectionRow, ItemRow, NativeBBox, NativeExtent, TemporalExtent,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const ITEMS_MAGIC: &[u8; 4] = b"GCIT";
const COLLECTIONS_MAGIC: &[u8; 4] = b"GCCO";
const FORMAT_VERSION: u8 = 1;
const HEADER_LEN: usize = 13;
const ZSTD_LEVEL: i32 = 3;

/// Upper bound on a decompressed column payload
const MAX_DECOMPRESSED: usize = 1 << 30;

/// Timestamp as (seconds, nanoseconds) since the Unix epoch
type Instant = (i64, u32);

#[derive(Debug, Default, Serialize, Deserialize)]
struct ItemColumns {
    id: Vec<String>,
    collection: Vec<String>,
    bbox: Vec<[f64; 4]>,
    native_epsg: Vec<Option<u32>>,
    native_bbox: Vec<Option<[f64; 6]>>,
    datetime: Vec<Option<Instant>>,
    properties: Vec<String>,
    assets: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CollectionColumns {
    id: Vec<String>,
    title: Vec<Option<String>>,
    description: Vec<Option<String>>,
    license: Vec<Option<String>>,
    spatial: Vec<Option<[f64; 4]>>,
    temporal_start: Vec<Option<Instant>>,
    temporal_end: Vec<Option<Instant>>,
    extra: Vec<String>,
}

fn to_instant(t: &DateTime<Utc>) -> Instant {
    (t.timestamp(), t.timestamp_subsec_nanos())
}

fn from_instant(i: Option<Instant>) -> Result<Option<DateTime<Utc>>> {
    match i {
        None => Ok(None),
        Some((secs, nanos)) => DateTime::from_timestamp(secs, nanos)
            .map(Some)
            .ok_or_else(|| StoreError::corrupt(format!("timestamp out of range: {secs}.{nanos}"))),
    }
}

fn bbox_from(values: [f64; 4]) -> Result<BBox> {
    BBox::from_slice(&values).map_err(|e| StoreError::corrupt(e.to_string()))
}

pub fn encode_items(rows: &[ItemRow]) -> Result<Vec<u8>> {
    let mut cols = ItemColumns::default();
    for row in rows {
        cols.id.push(row.id.clone());
        cols.collection.push(row.collection.clone());
        cols.bbox.push(row.bbox.to_array());
        cols.native_epsg.push(row.native.map(|n| n.epsg));
        cols.native_bbox.push(row.native.map(|n| n.bbox.to_array()));
        cols.datetime.push(row.datetime.as_ref().map(to_instant));
        cols.properties.push(serde_json::to_string(&row.properties)?);
        cols.assets.push(serde_json::to_string(&row.assets)?);
    }
    write_frame(ITEMS_MAGIC, &postcard::to_allocvec(&cols)?)
}

pub fn decode_items(data: &[u8]) -> Result<Vec<ItemRow>> {
    let payload = read_frame(ITEMS_MAGIC, data)?;
    let cols: ItemColumns = postcard::from_bytes(&payload)?;

    let n = cols.id.len();
    let lengths = [
        cols.collection.len(),
        cols.bbox.len(),
        cols.native_epsg.len(),
        cols.native_bbox.len(),
        cols.datetime.len(),
        cols.properties.len(),
        cols.assets.len(),
    ];
    if lengths.iter().any(|&l| l != n) {
        return Err(StoreError::corrupt(format!(
            "item columns have mismatched lengths: {n} ids vs {lengths:?}"
        )));
    }

    let mut rows = Vec::with_capacity(n);
    let columns = cols
        .id
        .into_iter()
        .zip(cols.collection)
        .zip(cols.bbox)
        .zip(cols.native_epsg.into_iter().zip(cols.native_bbox))
        .zip(cols.datetime)
        .zip(cols.properties.iter().zip(cols.assets.iter()));
    for (((((id, collection), bbox), native), datetime), (props, assets)) in columns {
        let native = match native {
            (Some(epsg), Some(b)) => Some(NativeExtent {
                epsg,
                bbox: NativeBBox::from_slice(&b).map_err(|e| StoreError::corrupt(e.to_string()))?,
            }),
            (None, None) => None,
            _ => {
                return Err(StoreError::corrupt(format!(
                    "item '{id}' has a native CRS without a native bbox or vice versa"
                )))
            }
        };
        let properties: Map<String, Value> = serde_json::from_str(props)?;
        let assets: BTreeMap<String, AssetRef> = serde_json::from_str(assets)?;
        rows.push(ItemRow {
            bbox: bbox_from(bbox)?,
            datetime: from_instant(datetime)?,
            id,
            collection,
            native,
            properties,
            assets,
        });
    }
    Ok(rows)
}

pub fn encode_collections(rows: &[CollectionRow]) -> Result<Vec<u8>> {
    let mut cols = CollectionColumns::default();
    for row in rows {
        cols.id.push(row.id.clone());
        cols.title.push(row.title.clone());
        cols.description.push(row.description.clone());
        cols.license.push(row.license.clone());
        cols.spatial.push(row.spatial.map(|b| b.to_array()));
        cols.temporal_start.push(row.temporal.start.as_ref().map(to_instant));
        cols.temporal_end.push(row.temporal.end.as_ref().map(to_instant));
        cols.extra.push(serde_json::to_string(&row.extra)?);
    }
    write_frame(COLLECTIONS_MAGIC, &postcard::to_allocvec(&cols)?)
}

pub fn decode_collections(data: &[u8]) -> Result<Vec<CollectionRow>> {
    let payload = read_frame(COLLECTIONS_MAGIC, data)?;
    let cols: CollectionColumns = postcard::from_bytes(&payload)?;

    let n = cols.id.len();
    let lengths = [
        cols.title.len(),
        cols.description.len(),
        cols.license.len(),
        cols.spatial.len(),
        cols.temporal_start.len(),
        cols.temporal_end.len(),
        cols.extra.len(),
    ];
    if lengths.iter().any(|&l| l != n) {
        return Err(StoreError::corrupt(format!(
            "collection columns have mismatched lengths: {n} ids vs {lengths:?}"
        )));
    }

    let mut rows = Vec::with_capacity(n);
    let columns = cols
        .id
        .into_iter()
        .zip(cols.title)
        .zip(cols.description)
        .zip(cols.license)
        .zip(cols.spatial)
        .zip(cols.temporal_start.into_iter().zip(cols.temporal_end))
        .zip(cols.extra);
    for ((((((id, title), description), license), spatial), (start, end)), extra) in columns {
        rows.push(CollectionRow {
            id,
            title,
            description,
            license,
            spatial: spatial.map(bbox_from).transpose()?,
            temporal: TemporalExtent {
                start: from_instant(start)?,
                end: from_instant(end)?,
            },
            extra: serde_json::from_str(&extra)?,
        });
    }
    Ok(rows)
}

fn write_frame(magic: &[u8; 4], payload: &[u8]) -> Result<Vec<u8>> {
    let compressed = zstd::encode_all(payload, ZSTD_LEVEL)?;
    let uncompressed_len = u32::try_from(payload.len())
        .map_err(|_| StoreError::codec("column payload exceeds 4 GiB"))?;
    let compressed_len = u32::try_from(compressed.len())
        .map_err(|_| StoreError::codec("compressed payload exceeds 4 GiB"))?;

    let mut data = Vec::with_capacity(HEADER_LEN + compressed.len());
    data.extend_from_slice(magic);
    data.push(FORMAT_VERSION);
    data.extend_from_slice(&uncompressed_len.to_be_bytes());
    data.extend_from_slice(&compressed_len.to_be_bytes());
    data.extend_from_slice(&compressed);
    Ok(data)
}

fn read_frame(magic: &[u8; 4], data: &[u8]) -> Result<Vec<u8>> {
    if data.len() < HEADER_LEN {
        return Err(StoreError::corrupt("column file too short for header"));
    }
    if &data[0..4] != magic {
        return Err(StoreError::corrupt("invalid magic bytes"));
    }
    if data[4] != FORMAT_VERSION {
        return Err(StoreError::corrupt(format!(
            "unsupported column format version {} (expected {FORMAT_VERSION})",
            data[4]
        )));
    }

    let uncompressed_len = be_u32(&data[5..9]) as usize;
    let compressed_len = be_u32(&data[9..13]) as usize;
    if data.len() < HEADER_LEN + compressed_len {
        return Err(StoreError::corrupt("column file truncated"));
    }
    if uncompressed_len > MAX_DECOMPRESSED {
        return Err(StoreError::corrupt(format!(
            "declared size {uncompressed_len} exceeds maximum {MAX_DECOMPRESSED}"
        )));
    }

    let compressed = &data[HEADER_LEN..HEADER_LEN + compressed_len];
    let payload = zstd::bulk::decompress(compressed, uncompressed_len)?;
    if payload.len() != uncompressed_len {
        return Err(StoreError::corrupt(format!(
            "decompressed size {} does not match header ({uncompressed_len})",
            payload.len()
        )));
    }
    Ok(payload)
}

fn be_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_be_bytes(buf)
}
