// Common types and utilities shared across the batch core.

pub mod backoff;
pub mod ids;
pub mod pagination;
pub mod query;

pub use backoff::{retry_transaction, retry_with_backoff, BackoffPolicy};
pub use ids::{AttemptId, BatchId, JobId};
pub use pagination::{decode_cursor, encode_cursor, trim_page, Page, PAGE_SIZE};
pub use query::{
    parse_query, validate_keywords, QueryTerm, TermTarget, BATCH_STATE_KEYWORDS,
    JOB_STATE_KEYWORDS,
};
