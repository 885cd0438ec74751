// src/services/fetcher.rs

//! Random-definition fetcher.
//!
//! One GET per call. The response is mapped to records and every failure is
//! classified so the retry policy can tell a flaky network from a broken
//! payload.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::{ApiConfig, Record};
use crate::utils::http::create_async_client;

/// A source of candidate records.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Perform one remote call and return every valid record in the response.
    async fn fetch_batch(&self) -> Result<Vec<Record>>;

    /// Perform one remote call and return the first valid record.
    async fn fetch_one(&self) -> Result<Record> {
        self.fetch_batch()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::malformed("response contained no entries"))
    }
}

/// HTTP implementation of [`RecordSource`].
pub struct HttpFetcher {
    client: Client,
    endpoint: String,
}

impl HttpFetcher {
    /// Create a fetcher for the configured endpoint.
    pub fn new(config: &ApiConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
            endpoint: config.endpoint.clone(),
        })
    }

    /// Endpoint this fetcher calls.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl RecordSource for HttpFetcher {
    async fn fetch_batch(&self) -> Result<Vec<Record>> {
        log::debug!("GET {}", self.endpoint);
        let response = self
            .client
            .get(&self.endpoint)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status));
        }

        let body = response.bytes().await.map_err(classify_request_error)?;
        parse_response(&body)
    }
}

/// Map a non-2xx status to the error taxonomy.
pub fn classify_status(status: StatusCode) -> AppError {
    if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        AppError::transient(format!("HTTP {status}"))
    } else {
        AppError::fatal(Some(status.as_u16()), format!("HTTP {status}"))
    }
}

/// Map a transport-level reqwest error to the error taxonomy.
fn classify_request_error(e: reqwest::Error) -> AppError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        AppError::transient(describe_request_error(&e))
    } else if e.is_decode() {
        AppError::malformed(describe_request_error(&e))
    } else {
        AppError::fatal(e.status().map(|s| s.as_u16()), describe_request_error(&e))
    }
}

/// `"<cause>: <error>: <source>: ..."`, so logs tell a refused connection
/// from a timeout.
fn describe_request_error(e: &reqwest::Error) -> String {
    let cause = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_body() {
        "body"
    } else if e.is_decode() {
        "decode"
    } else if e.is_request() {
        "request"
    } else {
        "other"
    };

    let mut message = format!("{cause}: {e}");
    let mut source = std::error::Error::source(e);
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// Wire shape of one definition entry. Extra upstream fields are ignored.
#[derive(Debug, Deserialize)]
struct RawEntry {
    defid: Option<u64>,
    word: Option<String>,
    definition: Option<String>,
    example: Option<String>,
    written_on: Option<String>,
}

impl TryFrom<RawEntry> for Record {
    type Error = AppError;

    fn try_from(raw: RawEntry) -> Result<Self> {
        let id = raw.defid.ok_or_else(|| AppError::malformed("missing defid"))?;
        let term = required(raw.word, "word", id)?.trim().to_string();
        if term.is_empty() {
            return Err(AppError::malformed(format!("empty word for defid {id}")));
        }
        let body = required(raw.definition, "definition", id)?.trim().to_string();
        let usage_example = required(raw.example, "example", id)?.trim().to_string();
        let written_on = required(raw.written_on, "written_on", id)?;
        let submitted_at = DateTime::parse_from_rfc3339(written_on.trim())
            .map_err(|e| {
                AppError::malformed(format!("bad written_on {written_on:?} for defid {id}: {e}"))
            })?
            .with_timezone(&Utc);

        Ok(Record {
            id,
            term,
            body,
            usage_example,
            submitted_at,
        })
    }
}

fn required(value: Option<String>, field: &str, id: u64) -> Result<String> {
    value.ok_or_else(|| AppError::malformed(format!("missing {field} for defid {id}")))
}

fn parse_entry(value: Value) -> Result<Record> {
    let raw: RawEntry = serde_json::from_value(value)
        .map_err(|e| AppError::malformed(format!("unexpected entry shape: {e}")))?;
    Record::try_from(raw)
}

/// Parse a response body into records.
///
/// Accepts `{"list": [entry, ...]}` or a single bare entry. Invalid entries
/// inside a list are skipped; the response is malformed only when nothing
/// valid remains.
pub fn parse_response(body: &[u8]) -> Result<Vec<Record>> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::malformed(format!("response is not JSON: {e}")))?;

    let entries = match value {
        Value::Object(mut map) if map.contains_key("list") => match map.remove("list") {
            Some(Value::Array(items)) => items,
            _ => return Err(AppError::malformed("`list` is not an array")),
        },
        entry @ Value::Object(_) => vec![entry],
        _ => return Err(AppError::malformed("response is not a JSON object")),
    };

    let total = entries.len();
    let mut records = Vec::with_capacity(total);
    let mut last_error = None;
    for entry in entries {
        match parse_entry(entry) {
            Ok(record) => records.push(record),
            Err(e) => {
                log::warn!("Skipping entry: {}", e);
                last_error = Some(e);
            }
        }
    }

    if records.is_empty() {
        return Err(last_error
            .unwrap_or_else(|| AppError::malformed("response contained no entries")));
    }
    if records.len() < total {
        log::info!("Parsed {}/{} entries", records.len(), total);
    }
    Ok(records)
}
