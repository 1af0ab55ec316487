//! InfluxDB v2 backend over the HTTP query API.
//!
//! Queries are posted to `/api/v2/query` with the `datatype` annotation
//! enabled so that numeric columns come back typed. The annotated CSV reply
//! may hold several tables, each introduced by its own annotation and header
//! rows.

use crate::backend::{BackendRow, FieldValue, TimeSeriesBackend};
use crate::config::InfluxSettings;
use crate::error::BackendError;
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::json;
use tracing::debug;

/// Columns added by the query engine that carry no sensor data.
const BOOKKEEPING_COLUMNS: [&str; 3] = ["", "result", "table"];

pub struct InfluxBackend {
    client: reqwest::Client,
    query_url: String,
    org: String,
    token: String,
}

impl InfluxBackend {
    pub fn new(settings: &InfluxSettings) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout())
            .build()?;

        Ok(Self {
            client,
            query_url: format!("{}/api/v2/query", settings.host.trim_end_matches('/')),
            org: settings.org.clone(),
            token: settings.token.clone(),
        })
    }
}

#[async_trait]
impl TimeSeriesBackend for InfluxBackend {
    async fn execute(&self, query: &str) -> Result<Vec<BackendRow>, BackendError> {
        let body = json!({
            "query": query,
            "type": "flux",
            "dialect": {
                "header": true,
                "annotations": ["datatype"],
                "delimiter": ",",
                "commentPrefix": "#",
            },
        });

        let response = self
            .client
            .post(&self.query_url)
            .query(&[("org", self.org.as_str())])
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(ACCEPT, "application/csv")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(BackendError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        debug!(bytes = text.len(), "received query response");
        decode_annotated_csv(&text)
    }
}

/// Decodes an annotated CSV response into rows.
///
/// Columns without a `#datatype` annotation are typed by inspection.
pub fn decode_annotated_csv(text: &str) -> Result<Vec<BackendRow>, BackendError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut datatypes: Vec<String> = Vec::new();
    let mut header: Option<Vec<String>> = None;
    let mut rows = Vec::new();

    for record in reader.records() {
        let record = record?;
        if record.iter().all(str::is_empty) {
            continue;
        }
        let first = record.get(0).unwrap_or("");

        if first == "#datatype" {
            datatypes = record.iter().map(str::to_string).collect();
            header = None;
            continue;
        }
        if first.starts_with('#') {
            continue;
        }

        let columns = match &header {
            Some(columns) => columns,
            None => {
                header = Some(record.iter().map(str::to_string).collect());
                continue;
            }
        };

        if let Some(index) = columns.iter().position(|c| c == "error") {
            let message = record.get(index).unwrap_or("unknown error");
            return Err(BackendError::Query(message.to_string()));
        }

        let mut row = BackendRow::new();
        for (index, (column, raw)) in columns.iter().zip(record.iter()).enumerate() {
            if BOOKKEEPING_COLUMNS.contains(&column.as_str()) {
                continue;
            }
            let value = match datatypes.get(index) {
                Some(datatype) => decode_typed(datatype, raw),
                None => decode_untyped(raw),
            };
            row.insert(column.clone(), value);
        }
        rows.push(row);
    }

    Ok(rows)
}

fn decode_typed(datatype: &str, raw: &str) -> FieldValue {
    if raw.is_empty() {
        return FieldValue::Null;
    }
    match datatype {
        "double" => raw
            .parse()
            .map(FieldValue::Float)
            .unwrap_or_else(|_| FieldValue::Text(raw.to_string())),
        "long" => raw
            .parse()
            .map(FieldValue::Integer)
            .unwrap_or_else(|_| FieldValue::Text(raw.to_string())),
        "unsignedLong" => raw
            .parse()
            .map(FieldValue::Unsigned)
            .unwrap_or_else(|_| FieldValue::Text(raw.to_string())),
        "boolean" => FieldValue::Boolean(raw == "true"),
        _ => FieldValue::Text(raw.to_string()),
    }
}

fn decode_untyped(raw: &str) -> FieldValue {
    if raw.is_empty() {
        FieldValue::Null
    } else if let Ok(v) = raw.parse::<i64>() {
        FieldValue::Integer(v)
    } else if let Ok(v) = raw.parse::<f64>() {
        FieldValue::Float(v)
    } else {
        FieldValue::Text(raw.to_string())
    }
}
