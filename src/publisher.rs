use crate::error::PublishError;
use crate::table::TableSnapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// The outcome of one completed cycle, handed to every publisher.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Range token the cycle ran for, as the client would write it
    pub range: String,
    /// Rendered query window
    pub window: String,
    pub completed_at: DateTime<Utc>,
    pub snapshot: TableSnapshot,
}

/// Destination for cycle reports. Delivery is best effort: errors are
/// logged by the caller and never undo the table update.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    async fn publish(&self, report: &CycleReport) -> Result<(), PublishError>;
}
