// src/models/mod.rs

//! Domain models for the archiver.

mod bucket;
mod config;
mod record;

// Re-export all public types
pub use bucket::{Bucket, FALLBACK_BUCKET};
pub use config::{
    ApiConfig, Config, LoggingConfig, RetryConfig, RunConfig, StorageConfig, env,
};
pub use record::Record;
