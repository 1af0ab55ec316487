//! Error types for range parsing and aggregation queries.

use thiserror::Error;

/// A range token that cannot be turned into a query window.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidRangeError {
    #[error("range token is empty")]
    Empty,
    #[error("unrecognized range token '{0}': not a month, year or duration")]
    Unrecognized(String),
}

/// Failure talking to the time-series backend or decoding its response.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("request to backend failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed backend response: {0}")]
    Csv(#[from] csv::Error),
    #[error("backend rejected query: {0}")]
    Query(String),
}

/// An aggregation query that could not be completed.
///
/// Carries the rendered window and filter so the log line alone is enough to
/// reproduce the failing query.
#[derive(Debug, Error)]
#[error("aggregation query failed for range ({window}) with filter [{filter}]: {source}")]
pub struct QueryExecutionError {
    pub window: String,
    pub filter: String,
    #[source]
    pub source: BackendError,
}
