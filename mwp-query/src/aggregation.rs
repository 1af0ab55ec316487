//! Grouped sensor aggregation.
//!
//! The [`Aggregator`] renders one composite query per window, runs it on a
//! [`TimeSeriesBackend`] and normalizes the pivoted rows into
//! [`AggregatedRecord`]s. Decoding is deliberately forgiving: a missing
//! metric reads as `0.0`, integers widen to floats and any other value type
//! is logged and read as `0.0`. Only rows without a controller or zone
//! identifier are dropped.

use crate::backend::{BackendRow, FieldValue, TimeSeriesBackend};
use crate::config::InfluxSettings;
use crate::error::QueryExecutionError;
use crate::query::{columns, AggregationQuery, ControllerFilter, SensorFields};
use crate::range::QueryWindow;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Aggregates of one (controller, zone) pair over a window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedRecord {
    pub controller: String,
    pub zone: String,
    /// Sum of flow readings
    pub total_flow: f64,
    /// Sum of valve-open seconds
    pub total_runtime_seconds: f64,
    pub avg_pressure: f64,
    pub avg_temperature: f64,
    pub avg_current: f64,
}

/// Runs aggregation queries for a fixed bucket and measurement.
pub struct Aggregator {
    backend: Arc<dyn TimeSeriesBackend>,
    bucket: String,
    measurement: String,
    timezone: Option<String>,
    fields: SensorFields,
}

impl Aggregator {
    pub fn new(backend: Arc<dyn TimeSeriesBackend>, settings: &InfluxSettings) -> Self {
        Self {
            backend,
            bucket: settings.bucket.clone(),
            measurement: settings.measurement.clone(),
            timezone: settings.timezone.clone(),
            fields: settings.fields.clone(),
        }
    }

    /// Renders the query that [`Aggregator::query`] would send.
    pub fn build_query(&self, window: &QueryWindow, filter: &ControllerFilter) -> String {
        AggregationQuery {
            bucket: &self.bucket,
            measurement: &self.measurement,
            timezone: self.timezone.as_deref(),
            fields: &self.fields,
            window,
            filter,
        }
        .to_flux()
    }

    /// Queries the backend and returns one record per (controller, zone) pair
    /// present in the result. Order is unspecified.
    pub async fn query(
        &self,
        window: &QueryWindow,
        filter: &ControllerFilter,
    ) -> Result<Vec<AggregatedRecord>, QueryExecutionError> {
        let flux = self.build_query(window, filter);
        debug!(%window, %filter, "executing aggregation query:\n{}", flux);

        let rows = self
            .backend
            .execute(&flux)
            .await
            .map_err(|source| QueryExecutionError {
                window: window.to_string(),
                filter: filter.to_string(),
                source,
            })?;

        let records: Vec<AggregatedRecord> = rows
            .iter()
            .filter_map(|row| decode_record(row, &self.fields))
            .collect();

        info!(
            %window,
            rows = rows.len(),
            records = records.len(),
            "aggregation query complete"
        );
        Ok(records)
    }
}

/// Normalizes one pivoted backend row.
///
/// Returns `None` when the row lacks a controller or zone identifier.
pub fn decode_record(row: &BackendRow, fields: &SensorFields) -> Option<AggregatedRecord> {
    let controller = identifier(row, &fields.controller_tag)?;
    let zone = identifier(row, &fields.zone_tag)?;

    let metric = |column: &str| -> f64 {
        match row.get(column) {
            None | Some(FieldValue::Null) => 0.0,
            Some(value) => value.as_f64().unwrap_or_else(|| {
                warn!(
                    controller = %controller,
                    zone = %zone,
                    column,
                    value = ?value,
                    kind = value.type_name(),
                    "non-numeric aggregate, reading as 0.0"
                );
                0.0
            }),
        }
    };

    Some(AggregatedRecord {
        total_flow: metric(columns::TOTAL_FLOW),
        total_runtime_seconds: metric(columns::TOTAL_SECONDS),
        avg_pressure: metric(columns::AVG_PRESSURE),
        avg_temperature: metric(columns::AVG_TEMPERATURE),
        avg_current: metric(columns::AVG_CURRENT),
        controller,
        zone,
    })
}

fn identifier(row: &BackendRow, column: &str) -> Option<String> {
    let id = match row.get(column) {
        Some(FieldValue::Text(s)) if !s.is_empty() => s.clone(),
        Some(FieldValue::Integer(v)) => v.to_string(),
        Some(FieldValue::Unsigned(v)) => v.to_string(),
        other => {
            warn!(column, value = ?other, "result row without usable identifier, skipping");
            return None;
        }
    };
    Some(id)
}
