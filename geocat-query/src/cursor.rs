//! Opaque pagination cursors.
//!
//! A cursor is the sort key of the last row of a page, serialised as JSON
//! and encoded as URL-safe base64 without padding. Clients must treat it as
//! opaque.

use crate::error::{QueryError, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use geocat_core::ItemRow;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Resume point: the (timestamp, id, collection) of the last returned row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "t")]
    pub datetime: Option<DateTime<Utc>>,
    pub id: String,
    #[serde(rename = "c")]
    pub collection: String,
}

impl Cursor {
    pub fn after(row: &ItemRow) -> Self {
        Self {
            datetime: row.datetime,
            id: row.id.clone(),
            collection: row.collection.clone(),
        }
    }

    pub fn encode(&self) -> String {
        // Serialising plain strings and timestamps cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| QueryError::invalid("malformed cursor"))?;
        serde_json::from_slice(&bytes).map_err(|_| QueryError::invalid("malformed cursor"))
    }

    /// Position of `row` relative to this cursor in result order.
    pub fn cmp_row(&self, row: &ItemRow) -> Ordering {
        compare_keys(
            (self.datetime.as_ref(), &self.id, &self.collection),
            (row.datetime.as_ref(), &row.id, &row.collection),
        )
    }
}

/// Result order: timestamp descending with timestamp-less rows last, then id
/// ascending, then collection ascending.
pub fn compare_rows(a: &ItemRow, b: &ItemRow) -> Ordering {
    compare_keys(
        (a.datetime.as_ref(), &a.id, &a.collection),
        (b.datetime.as_ref(), &b.id, &b.collection),
    )
}

fn compare_keys(
    a: (Option<&DateTime<Utc>>, &String, &String),
    b: (Option<&DateTime<Utc>>, &String, &String),
) -> Ordering {
    let by_time = match (a.0, b.0) {
        (Some(x), Some(y)) => y.cmp(x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    by_time.then_with(|| a.1.cmp(b.1)).then_with(|| a.2.cmp(b.2))
}
