//! One aggregation cycle: query, reset and apply, snapshot, publish.

use crate::config::TotalSpec;
use crate::error::PublishError;
use crate::publisher::{CycleReport, Publisher};
use crate::table::{SummaryTable, TableSnapshot};
use chrono::Utc;
use futures::future::join_all;
use mwp_query::{Aggregator, ControllerFilter, InvalidRangeError, QueryExecutionError, RangeToken};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

/// Upper bound on a single publisher's delivery when none is configured.
pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(2);

/// Why a cycle was abandoned. The table is unchanged in both cases.
#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    InvalidRange(#[from] InvalidRangeError),
    #[error(transparent)]
    Query(#[from] QueryExecutionError),
}

/// Runs cycles against a shared table and fans the result out to publishers.
pub struct CycleRunner {
    aggregator: Aggregator,
    filter: ControllerFilter,
    table: SummaryTable,
    totals: Vec<TotalSpec>,
    publishers: Vec<Arc<dyn Publisher>>,
    publish_timeout: Duration,
}

impl CycleRunner {
    pub fn new(
        aggregator: Aggregator,
        filter: ControllerFilter,
        table: SummaryTable,
        totals: Vec<TotalSpec>,
    ) -> Self {
        Self {
            aggregator,
            filter,
            table,
            totals,
            publishers: Vec::new(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    /// Bounds how long a cycle waits on each publisher.
    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publishers.push(publisher);
        self
    }

    pub fn table(&self) -> &SummaryTable {
        &self.table
    }

    pub fn totals(&self) -> &[TotalSpec] {
        &self.totals
    }

    /// Runs one cycle for `range`.
    ///
    /// The backend is queried before the table is touched, so a failed query
    /// leaves the previous cycle's values readable. On success the table is
    /// reset and refilled under a single lock and the snapshot is published.
    /// Errors are logged here; callers only need the result for control flow.
    pub async fn run(&self, range: &RangeToken) -> Result<TableSnapshot, CycleError> {
        let result = self.execute(range).await;
        if let Err(e) = &result {
            error!(range = %range, "cycle abandoned: {}", e);
        }
        result
    }

    async fn execute(&self, range: &RangeToken) -> Result<TableSnapshot, CycleError> {
        let window = range.resolve(Utc::now())?;
        let records = self.aggregator.query(&window, &self.filter).await?;

        let snapshot = self.table.apply_cycle(&records, &self.totals).await;
        info!(
            range = %range,
            records = records.len(),
            totals = ?snapshot.totals,
            "cycle applied"
        );

        let report = CycleReport {
            range: range.to_string(),
            window: window.to_string(),
            completed_at: Utc::now(),
            snapshot,
        };
        self.publish(&report).await;

        Ok(report.snapshot)
    }

    /// Delivers to every publisher concurrently. A publisher that has not
    /// finished within the timeout is abandoned for this cycle.
    async fn publish(&self, report: &CycleReport) {
        let timeout = self.publish_timeout;
        let results = join_all(self.publishers.iter().map(|p| async move {
            tokio::time::timeout(timeout, p.publish(report))
                .await
                .unwrap_or_else(|_| Err(PublishError::Timeout(timeout)))
        }))
        .await;
        for (publisher, result) in self.publishers.iter().zip(results) {
            if let Err(e) = result {
                warn!(publisher = publisher.name(), "publish failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use mockall::mock;
    use mwp_query::{BackendError, BackendRow, InfluxSettings, TimeSeriesBackend};

    mock! {
        pub Backend {}
        #[async_trait]
        impl TimeSeriesBackend for Backend {
            async fn execute(&self, query: &str) -> Result<Vec<BackendRow>, BackendError>;
        }
    }

    fn runner(backend: MockBackend) -> CycleRunner {
        let settings = InfluxSettings {
            token: "token".to_string(),
            org: "mwp".to_string(),
            bucket: "sensors".to_string(),
            ..Default::default()
        };
        CycleRunner::new(
            Aggregator::new(Arc::new(backend), &settings),
            ControllerFilter::all(),
            SummaryTable::initialize(vec![("1", "1")]),
            Vec::new(),
        )
    }

    #[tokio::test]
    async fn test_unresolvable_range_is_reported_without_querying() {
        let mut backend = MockBackend::new();
        backend.expect_execute().never();
        let cycles = runner(backend);
        let before = cycles.table().snapshot(&[]).await;

        let result = cycles.run(&RangeToken::Year(300_000)).await;

        assert!(matches!(result, Err(CycleError::InvalidRange(_))));
        assert_eq!(cycles.table().snapshot(&[]).await, before);
    }

    #[tokio::test]
    async fn test_backend_failure_is_reported() {
        let mut backend = MockBackend::new();
        backend
            .expect_execute()
            .times(1)
            .returning(|_| Err(BackendError::Query("bucket unavailable".to_string())));
        let cycles = runner(backend);

        let result = cycles.run(&RangeToken::parse("24h").unwrap()).await;

        assert!(matches!(result, Err(CycleError::Query(_))));
    }
}
