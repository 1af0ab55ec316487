/*!
# mwp-query: range tokens and grouped sensor aggregation

This crate turns client supplied range tokens into query windows and runs the
composite aggregation query that summarizes irrigation sensor readings per
(controller, zone).

## Key Pieces

- [`range`]: classification of range tokens (`live`, `2023`, `June`, `24h`,
  pre-formed `start: …, stop: …`) into [`QueryWindow`]s
- [`query`]: Flux rendering of the sum/mean/pivot query
- [`backend`]: the [`TimeSeriesBackend`] seam and untyped result rows
- [`influx`]: InfluxDB v2 HTTP implementation of the backend
- [`aggregation`]: the [`Aggregator`] that ties the above together

## Usage

```rust,no_run
use mwp_query::{Aggregator, ControllerFilter, InfluxBackend, InfluxSettings, RangeToken};
use std::sync::Arc;

# async fn run(settings: InfluxSettings) -> Result<(), Box<dyn std::error::Error>> {
let backend = Arc::new(InfluxBackend::new(&settings)?);
let aggregator = Aggregator::new(backend, &settings);

let window = RangeToken::parse("June")?.resolve(chrono::Utc::now())?;
let records = aggregator.query(&window, &ControllerFilter::all()).await?;
println!("{} zones reported", records.len());
# Ok(())
# }
```
*/

pub mod aggregation;
pub mod backend;
pub mod config;
pub mod error;
pub mod influx;
pub mod query;
pub mod range;

pub use aggregation::{AggregatedRecord, Aggregator};
pub use backend::{BackendRow, FieldValue, TimeSeriesBackend};
pub use config::InfluxSettings;
pub use error::{BackendError, InvalidRangeError, QueryExecutionError};
pub use influx::InfluxBackend;
pub use query::{ControllerFilter, SensorFields};
pub use range::{resolve_window, AbsoluteWindow, QueryWindow, RangeToken, LIVE_KEYWORDS};
