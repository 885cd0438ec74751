//! Service layer for the archiver.
//!
//! - Record fetching (`HttpFetcher`) behind the `RecordSource` seam

mod fetcher;

pub use fetcher::{HttpFetcher, RecordSource, classify_status, parse_response};
