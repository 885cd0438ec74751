//! Utility functions and helpers.

pub mod http;
pub mod signal;

use chrono::{NaiveDate, Utc};

/// Current UTC calendar date, used as the daily bucket.
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}
