//! JSON and fixed-width text reports of the summary table.

use crate::error::PublishError;
use crate::publisher::{CycleReport, Publisher};
use crate::table::TableSnapshot;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::info;

const INITIAL_STEM: &str = "watertable_initial";
const LATEST_STEM: &str = "watertable_latest";

/// Writes report files into one output directory, creating it on demand.
#[derive(Debug, Clone)]
pub struct ReportWriter {
    dir: PathBuf,
}

impl ReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Writes the zeroed table before the first query runs.
    pub async fn write_initial(
        &self,
        range: &str,
        snapshot: &TableSnapshot,
    ) -> Result<(), PublishError> {
        self.write_pair(INITIAL_STEM, range, snapshot).await
    }

    async fn write_pair(
        &self,
        stem: &str,
        range: &str,
        snapshot: &TableSnapshot,
    ) -> Result<(), PublishError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| PublishError::Io {
                path: self.dir.clone(),
                source,
            })?;

        let json = serde_json::to_string_pretty(snapshot)?;
        let json_path = self.dir.join(format!("{}.json", stem));
        write_file(&json_path, json).await?;

        let text_path = self.dir.join(format!("{}_report.txt", stem));
        write_file(&text_path, render_text_report(range, snapshot)).await?;

        info!(json = %json_path.display(), text = %text_path.display(), "reports written");
        Ok(())
    }
}

async fn write_file(path: &Path, contents: String) -> Result<(), PublishError> {
    tokio::fs::write(path, contents)
        .await
        .map_err(|source| PublishError::Io {
            path: path.to_path_buf(),
            source,
        })
}

#[async_trait]
impl Publisher for ReportWriter {
    fn name(&self) -> &'static str {
        "report-files"
    }

    async fn publish(&self, report: &CycleReport) -> Result<(), PublishError> {
        self.write_pair(LATEST_STEM, &report.range, &report.snapshot)
            .await
    }
}

/// Renders the human-readable report: totals, then one row per entry.
pub fn render_text_report(range: &str, snapshot: &TableSnapshot) -> String {
    let mut report = String::new();

    report.push_str(&format!("Range: {}\n", range));
    for (name, value) in &snapshot.totals {
        report.push_str(&format!("Summary - {}: {:.2}\n", name, value));
    }
    report.push('\n');
    report.push_str(&"=".repeat(80));
    report.push_str("\n\n");

    let header = format!(
        "{:<12} {:<6} {:<10} {:<12} {:<8} {:<10} {:<10} {:<8} {:<8}",
        "Controller", "Zone", "TotalFlow", "TotalMinutes", "AvgPSI", "AvgTempF", "AvgAmps", "GPM",
        "Updated"
    );
    report.push_str(&header);
    report.push('\n');
    report.push_str(&"-".repeat(header.len()));
    report.push('\n');

    let mut controllers: Vec<_> = snapshot.details.iter().collect();
    controllers.sort_by(|a, b| numeric_order(a.0, b.0));

    for (controller, zones) in controllers {
        let mut zones: Vec<_> = zones.iter().collect();
        zones.sort_by(|a, b| numeric_order(a.0, b.0));

        for (zone, m) in zones {
            report.push_str(&format!(
                "{:<12} {:<6} {:<10.2} {:<12.2} {:<8.2} {:<10.2} {:<10.3} {:<8.2} {:<8}\n",
                controller,
                zone,
                m.total_flow,
                m.total_runtime_seconds / 60.0,
                m.avg_pressure,
                m.avg_temperature,
                m.avg_current,
                m.derived_rate,
                m.updated_this_cycle
            ));
        }
    }

    report
}

/// Numeric identifiers sort by value ahead of anything non-numeric.
fn numeric_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}
