//! Controller behaviour against mocked backend and publisher, on a paused
//! clock so session timing is exact.

use crate::config::{LiveConfig, TotalSpec};
use crate::controller::{ControlHandle, ModeController, ModeState};
use crate::cycle::CycleRunner;
use crate::error::PublishError;
use crate::publisher::{CycleReport, Publisher};
use crate::table::SummaryTable;
use async_trait::async_trait;
use mockall::mock;
use mwp_query::{
    Aggregator, BackendError, BackendRow, ControllerFilter, FieldValue, InfluxSettings, RangeToken,
    TimeSeriesBackend,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;

mock! {
    pub Backend {}
    #[async_trait]
    impl TimeSeriesBackend for Backend {
        async fn execute(&self, query: &str) -> Result<Vec<BackendRow>, BackendError>;
    }
}

mock! {
    pub Publisher {}
    #[async_trait]
    impl Publisher for Publisher {
        fn name(&self) -> &'static str;
        async fn publish(&self, report: &CycleReport) -> Result<(), PublishError>;
    }
}

/// Never finishes a delivery.
struct StalledPublisher;

#[async_trait]
impl Publisher for StalledPublisher {
    fn name(&self) -> &'static str {
        "stalled"
    }

    async fn publish(&self, _report: &CycleReport) -> Result<(), PublishError> {
        sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

const LIVE: &str = "start: -1m";
const DAY: &str = "start: -24h";
const WEEK: &str = "start: -7d";

/// The `range(...)` argument of a rendered query.
fn range_of(flux: &str) -> String {
    flux.lines()
        .find_map(|line| {
            line.trim()
                .strip_prefix("|> range(")
                .and_then(|rest| rest.strip_suffix(')'))
        })
        .unwrap_or_default()
        .to_string()
}

fn sample_rows() -> Vec<BackendRow> {
    let row: BackendRow = [
        ("Controller", FieldValue::Text("1".to_string())),
        ("Zone", FieldValue::Text("1".to_string())),
        ("totalFlow", FieldValue::Float(12.0)),
        ("totalSeconds", FieldValue::Float(360.0)),
        ("avgPSI", FieldValue::Float(41.5)),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    vec![row]
}

struct Harness {
    handle: ControlHandle,
    task: JoinHandle<()>,
    table: SummaryTable,
    queries: Arc<Mutex<Vec<String>>>,
    published: Arc<Mutex<Vec<String>>>,
}

impl Harness {
    /// Spawns a controller whose backend fails any query over `failing`.
    fn start(steady: &str, failing: Option<&'static str>) -> Self {
        Self::start_with(steady, failing, None)
    }

    /// As [`Harness::start`], with an extra publisher next to the recording one.
    fn start_with(
        steady: &str,
        failing: Option<&'static str>,
        extra: Option<Arc<dyn Publisher>>,
    ) -> Self {
        let queries = Arc::new(Mutex::new(Vec::new()));
        let published = Arc::new(Mutex::new(Vec::new()));

        let mut backend = MockBackend::new();
        let log = queries.clone();
        backend.expect_execute().returning(move |flux| {
            let range = range_of(flux);
            let fail = failing.map_or(false, |f| range == f);
            log.lock().unwrap().push(range);
            if fail {
                Err(BackendError::Query("bucket unavailable".to_string()))
            } else {
                Ok(sample_rows())
            }
        });

        let mut publisher = MockPublisher::new();
        publisher.expect_name().return_const("mock");
        let sink = published.clone();
        publisher.expect_publish().returning(move |report| {
            sink.lock().unwrap().push(report.range.clone());
            Ok(())
        });

        let settings = InfluxSettings {
            token: "token".to_string(),
            org: "mwp".to_string(),
            bucket: "sensors".to_string(),
            ..Default::default()
        };
        let table = SummaryTable::initialize(vec![("1", "1"), ("1", "2")]);
        let totals = vec![TotalSpec {
            name: "totalIrrigationGallons".to_string(),
            controllers: vec!["1".to_string()],
            zones: vec![],
        }];
        let mut cycles = CycleRunner::new(
            Aggregator::new(Arc::new(backend), &settings),
            ControllerFilter::all(),
            table.clone(),
            totals,
        )
        .with_publisher(Arc::new(publisher));
        if let Some(extra) = extra {
            cycles = cycles.with_publisher(extra);
        }

        let (controller, handle) = ModeController::new(
            cycles,
            LiveConfig::default(),
            RangeToken::parse(steady).unwrap(),
        );
        let task = tokio::spawn(controller.run());

        Self {
            handle,
            task,
            table,
            queries,
            published,
        }
    }

    fn count(&self, range: &str) -> usize {
        self.queries
            .lock()
            .unwrap()
            .iter()
            .filter(|q| q.as_str() == range)
            .count()
    }

    fn last_query(&self) -> String {
        self.queries.lock().unwrap().last().cloned().unwrap_or_default()
    }

    fn published(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }

    fn steady(&self, raw: &str) -> ModeState {
        ModeState::Idle {
            steady: RangeToken::parse(raw).unwrap(),
        }
    }
}

/// Lets every ready task run without moving the clock meaningfully.
async fn settle() {
    sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_startup_cycle_uses_steady_range() {
    let h = Harness::start("24h", None);
    settle().await;

    assert_eq!(h.count(DAY), 1);
    assert_eq!(h.published(), vec!["24h".to_string()]);
    assert_eq!(h.handle.mode(), h.steady("24h"));

    let snapshot = h.table.snapshot(&[]).await;
    assert_eq!(snapshot.details["1"]["1"].total_flow, 12.0);
    assert_eq!(snapshot.details["1"]["1"].derived_rate, 2.0);
    assert!(!snapshot.details["1"]["2"].updated_this_cycle);
}

#[tokio::test(start_paused = true)]
async fn test_live_session_expires_back_to_steady_range() {
    let h = Harness::start("24h", None);
    settle().await;

    // Session starts at t=1ms: ticks at 1.001s, 2.001s, ..., expiry at 60.001s
    h.handle.request(RangeToken::Live);
    sleep(Duration::from_millis(59_500)).await;

    assert!(h.handle.mode().is_live());
    assert_eq!(h.count(DAY), 1);
    assert_eq!(h.count(LIVE), 60);

    sleep(Duration::from_secs(1)).await;

    assert_eq!(h.handle.mode(), h.steady("24h"));
    assert_eq!(h.count(DAY), 2);
    assert_eq!(h.count(LIVE), 60);
    assert_eq!(h.last_query(), DAY);

    sleep(Duration::from_secs(30)).await;

    assert_eq!(h.count(DAY), 2);
    assert_eq!(h.count(LIVE), 60);
    assert_eq!(h.published().last().map(String::as_str), Some("24h"));
}

#[tokio::test(start_paused = true)]
async fn test_second_live_request_restarts_session() {
    let h = Harness::start("24h", None);
    settle().await;

    h.handle.request(RangeToken::Live);
    sleep(Duration::from_millis(30_500)).await;
    assert_eq!(h.count(LIVE), 31);

    // Second session from t=30.501s: one immediate cycle, then one per second
    h.handle.submit("NOW").unwrap();
    sleep(Duration::from_millis(9_750)).await;
    assert_eq!(h.count(LIVE), 41);

    sleep(Duration::from_secs(30)).await;
    assert!(matches!(h.handle.mode(), ModeState::Live { session: 2, .. }));
    assert_eq!(h.count(LIVE), 71);
    assert_eq!(h.count(DAY), 1);

    // Expiry at 90.501s, 60s after the second request
    sleep(Duration::from_secs(21)).await;
    assert_eq!(h.handle.mode(), h.steady("24h"));
    assert_eq!(h.count(LIVE), 91);
    assert_eq!(h.count(DAY), 2);

    sleep(Duration::from_secs(60)).await;
    assert_eq!(h.count(LIVE), 91);
    assert_eq!(h.count(DAY), 2);
}

#[tokio::test(start_paused = true)]
async fn test_steady_request_cancels_live_session() {
    let h = Harness::start("24h", None);
    settle().await;

    h.handle.request(RangeToken::Live);
    sleep(Duration::from_secs(5)).await;
    h.handle.submit("-7d").unwrap();
    settle().await;

    assert_eq!(h.handle.mode(), h.steady("7d"));
    assert_eq!(h.count(WEEK), 1);
    let live = h.count(LIVE);

    sleep(Duration::from_secs(120)).await;

    assert_eq!(h.count(LIVE), live);
    assert_eq!(h.count(WEEK), 1);
    assert_eq!(h.count(DAY), 1);
}

#[tokio::test(start_paused = true)]
async fn test_expiry_reverts_to_latest_steady_range() {
    let h = Harness::start("24h", None);
    settle().await;

    h.handle.submit("2023").unwrap();
    settle().await;
    h.handle.submit("live").unwrap();
    sleep(Duration::from_secs(61)).await;

    assert_eq!(h.handle.mode(), h.steady("2023"));
    let year = "start: 2023-01-01T00:00:00Z, stop: 2024-01-01T00:00:00Z";
    assert_eq!(h.count(year), 2);
    assert_eq!(h.last_query(), year);
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_requests_keeps_only_latest() {
    let h = Harness::start("24h", None);
    settle().await;

    h.handle.submit("7d").unwrap();
    h.handle.submit("live").unwrap();
    h.handle.submit("2023").unwrap();
    settle().await;

    assert_eq!(h.handle.mode(), h.steady("2023"));
    assert_eq!(h.count(WEEK), 0);
    assert_eq!(h.count(LIVE), 0);
    assert_eq!(h.queries.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_query_keeps_previous_table() {
    let h = Harness::start("24h", Some(WEEK));
    settle().await;
    let before = h.table.snapshot(&[]).await;

    h.handle.submit("7d").unwrap();
    settle().await;

    assert_eq!(h.count(WEEK), 1);
    assert_eq!(h.table.snapshot(&[]).await, before);
    assert_eq!(h.published(), vec!["24h".to_string()]);
    assert_eq!(h.handle.mode(), h.steady("7d"));

    // the controller keeps serving requests after the failure
    h.handle.request(RangeToken::Live);
    settle().await;
    assert!(h.handle.mode().is_live());
    assert_eq!(h.count(LIVE), 1);
    assert_eq!(h.published().last().map(String::as_str), Some("live"));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_token_is_rejected_before_controller() {
    let h = Harness::start("24h", None);
    settle().await;

    assert!(h.handle.submit("fortnight").is_err());
    assert!(h.handle.submit("").is_err());
    settle().await;

    assert_eq!(h.queries.lock().unwrap().len(), 1);
    assert_eq!(h.handle.mode(), h.steady("24h"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_controller() {
    let h = Harness::start("24h", None);
    settle().await;

    h.handle.request(RangeToken::Live);
    settle().await;
    h.handle.shutdown();
    h.handle.request(RangeToken::parse("June").unwrap());
    h.task.await.unwrap();

    assert_eq!(h.handle.mode(), ModeState::Stopped);
    let issued = h.queries.lock().unwrap().len();
    sleep(Duration::from_secs(90)).await;
    assert_eq!(h.queries.lock().unwrap().len(), issued);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_publisher_does_not_block_control_loop() {
    // Every cycle waits out the 2s publish timeout on the stalled publisher
    let h = Harness::start_with("24h", None, Some(Arc::new(StalledPublisher)));
    settle().await;

    h.handle.request(RangeToken::Live);
    sleep(Duration::from_secs(3)).await;

    assert!(h.handle.mode().is_live());
    assert_eq!(h.count(LIVE), 1);
    assert_eq!(h.published(), vec!["24h".to_string(), "live".to_string()]);

    sleep(Duration::from_secs(70)).await;

    assert_eq!(h.handle.mode(), h.steady("24h"));
    assert_eq!(h.count(DAY), 2);
    let live = h.count(LIVE);
    assert!((29..=31).contains(&live), "{}", live);
    assert_eq!(h.published().last().map(String::as_str), Some("24h"));
}
