//! Opaque cursor pagination for list endpoints.
//!
//! spec.md §6: "Pagination: `last_batch_id` / `last_job_id` opaque cursors;
//! page size fixed at 50." Unlike the teacher's Relay-style first/after
//! connections, list endpoints here only ever page forward by the id of the
//! last item seen, so the cursor is a single integer rather than a UUID.

use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Fixed page size for all list endpoints (spec.md §6).
pub const PAGE_SIZE: i64 = 50;

/// Encode an id as an opaque pagination cursor.
pub fn encode_cursor(id: i64) -> String {
    URL_SAFE_NO_PAD.encode(id.to_be_bytes())
}

/// Decode a pagination cursor back into an id. Returns
/// [`crate::error::AppError::Validation`]-worthy `Err` on malformed input;
/// callers map it at the API boundary.
pub fn decode_cursor(cursor: &str) -> Result<i64> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .context("invalid cursor: not valid base64")?;
    let arr: [u8; 8] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("invalid cursor: wrong length"))?;
    Ok(i64::from_be_bytes(arr))
}

/// A page of results plus the cursor to request the next page, if any.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<String>,
}

/// Trim a `limit + 1`-sized fetch down to `limit` items and compute the
/// cursor for the next page from the id of the last retained item.
///
/// Database queries should over-fetch by one row so `has_more` can be
/// determined without a second COUNT query.
pub fn trim_page<T>(mut results: Vec<T>, limit: i64, id_of: impl Fn(&T) -> i64) -> Page<T> {
    let has_more = results.len() as i64 > limit;
    if has_more {
        results.truncate(limit as usize);
    }
    let next_cursor = if has_more {
        results.last().map(|item| encode_cursor(id_of(item)))
    } else {
        None
    };
    Page {
        items: results,
        next_cursor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_round_trips() {
        let encoded = encode_cursor(42);
        assert_eq!(decode_cursor(&encoded).unwrap(), 42);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_cursor("not-base64!!!").is_err());
    }

    #[test]
    fn trim_page_detects_more() {
        let items: Vec<i64> = (1..=(PAGE_SIZE + 1)).collect();
        let page = trim_page(items, PAGE_SIZE, |id| *id);
        assert_eq!(page.items.len(), PAGE_SIZE as usize);
        assert!(page.next_cursor.is_some());
        assert_eq!(decode_cursor(page.next_cursor.as_ref().unwrap()).unwrap(), PAGE_SIZE);
    }

    #[test]
    fn trim_page_no_more() {
        let items: Vec<i64> = (1..=10).collect();
        let page = trim_page(items, PAGE_SIZE, |id| *id);
        assert_eq!(page.items.len(), 10);
        assert!(page.next_cursor.is_none());
    }
}
