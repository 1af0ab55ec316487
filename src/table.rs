//! In-memory summary table: controller → zone → metrics.
//!
//! The key set is fixed when the table is built from the configured layout.
//! Aggregation results can only fill existing entries; a record naming an
//! unknown (controller, zone) pair is ignored.
//!
//! The table sits behind a [`RwLock`] held only for the in-memory steps of a
//! cycle. Backend round-trips happen outside the lock, so snapshot readers
//! never wait on the network.

use crate::config::TotalSpec;
use mwp_query::AggregatedRecord;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Metrics of one zone for the most recent cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ZoneMetrics {
    #[serde(rename = "totalFlow")]
    pub total_flow: f64,
    #[serde(rename = "totalSeconds")]
    pub total_runtime_seconds: f64,
    #[serde(rename = "avgPSI")]
    pub avg_pressure: f64,
    #[serde(rename = "avgTempF")]
    pub avg_temperature: f64,
    #[serde(rename = "avgAmps")]
    pub avg_current: f64,
    /// Flow per minute of runtime
    #[serde(rename = "gpm")]
    pub derived_rate: f64,
    #[serde(rename = "updatedInLastQuery")]
    pub updated_this_cycle: bool,
}

impl ZoneMetrics {
    fn from_record(record: &AggregatedRecord) -> Self {
        Self {
            total_flow: record.total_flow,
            total_runtime_seconds: record.total_runtime_seconds,
            avg_pressure: record.avg_pressure,
            avg_temperature: record.avg_temperature,
            avg_current: record.avg_current,
            derived_rate: derived_rate(record.total_flow, record.total_runtime_seconds),
            updated_this_cycle: true,
        }
    }
}

/// `flow / (seconds / 60)`, or `0` when there was no runtime.
pub fn derived_rate(total_flow: f64, total_runtime_seconds: f64) -> f64 {
    if total_runtime_seconds > 0.0 {
        total_flow / (total_runtime_seconds / 60.0)
    } else {
        0.0
    }
}

pub type ZoneTable = BTreeMap<String, BTreeMap<String, ZoneMetrics>>;

/// Consistent copy of the table plus derived totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSnapshot {
    #[serde(flatten)]
    pub totals: BTreeMap<String, f64>,
    pub details: ZoneTable,
}

impl TableSnapshot {
    fn capture(details: &ZoneTable, totals: &[TotalSpec]) -> Self {
        let totals = totals
            .iter()
            .map(|spec| {
                let sum: f64 = details
                    .iter()
                    .flat_map(|(controller, zones)| {
                        zones
                            .iter()
                            .filter(move |(zone, _)| spec.covers(controller, zone))
                            .map(|(_, metrics)| metrics.total_flow)
                    })
                    .sum();
                (spec.name.clone(), sum)
            })
            .collect();

        Self {
            totals,
            details: details.clone(),
        }
    }

    pub fn total(&self, name: &str) -> f64 {
        self.totals.get(name).copied().unwrap_or(0.0)
    }
}

/// Shared handle to the summary table.
#[derive(Debug, Clone)]
pub struct SummaryTable {
    inner: Arc<RwLock<ZoneTable>>,
}

impl SummaryTable {
    /// Builds the table with every configured pair zeroed.
    pub fn initialize<I, C, Z>(keys: I) -> Self
    where
        I: IntoIterator<Item = (C, Z)>,
        C: Into<String>,
        Z: Into<String>,
    {
        let mut table = ZoneTable::new();
        for (controller, zone) in keys {
            table
                .entry(controller.into())
                .or_default()
                .insert(zone.into(), ZoneMetrics::default());
        }
        Self {
            inner: Arc::new(RwLock::new(table)),
        }
    }

    /// Zeroes every entry and clears its updated flag.
    pub async fn reset_cycle(&self) {
        let mut table = self.inner.write().await;
        reset(&mut table);
    }

    /// Overwrites the entry named by the record. Returns `false` when the pair
    /// is not configured, leaving the table untouched.
    pub async fn apply_record(&self, record: &AggregatedRecord) -> bool {
        let mut table = self.inner.write().await;
        apply(&mut table, record)
    }

    pub async fn snapshot(&self, totals: &[TotalSpec]) -> TableSnapshot {
        let table = self.inner.read().await;
        TableSnapshot::capture(&table, totals)
    }

    /// Runs the in-memory half of a cycle under one write lock: reset, apply
    /// every record, then capture the snapshot.
    pub async fn apply_cycle(
        &self,
        records: &[AggregatedRecord],
        totals: &[TotalSpec],
    ) -> TableSnapshot {
        let mut table = self.inner.write().await;
        reset(&mut table);
        let applied = records.iter().filter(|r| apply(&mut table, r)).count();
        if applied < records.len() {
            debug!(
                ignored = records.len() - applied,
                "records for unconfigured controller/zone pairs ignored"
            );
        }
        TableSnapshot::capture(&table, totals)
    }

    /// Number of configured (controller, zone) pairs.
    pub async fn len(&self) -> usize {
        self.inner.read().await.values().map(BTreeMap::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn reset(table: &mut ZoneTable) {
    for metrics in table.values_mut().flat_map(BTreeMap::values_mut) {
        *metrics = ZoneMetrics::default();
    }
}

fn apply(table: &mut ZoneTable, record: &AggregatedRecord) -> bool {
    match table
        .get_mut(&record.controller)
        .and_then(|zones| zones.get_mut(&record.zone))
    {
        Some(entry) => {
            *entry = ZoneMetrics::from_record(record);
            true
        }
        None => false,
    }
}
