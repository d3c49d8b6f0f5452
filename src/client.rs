//! Fetching snapshots from the prediction backend.
//!
//! Requests are blocking `ureq` calls; [`ViewLoader`] moves them onto the
//! blocking pool and drops responses that a view switch or a newer refresh
//! has overtaken.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, info};

use crate::config::Config;
use crate::error::FetchError;
use crate::ingest::{self, Ingested};
use crate::models::{ApiStats, CourseRecord, OngoingCourse};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SnapshotKind {
    Historical,
    Ongoing,
}

impl SnapshotKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SnapshotKind::Historical => "historical",
            SnapshotKind::Ongoing => "ongoing",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Snapshot {
    Historical(Ingested<CourseRecord>),
    Ongoing(Ingested<OngoingCourse>),
}

/// Anything that can produce a snapshot of one view.
pub trait SnapshotSource: Send + Sync + 'static {
    fn fetch(&self, kind: SnapshotKind) -> Result<Snapshot, FetchError>;
}

pub struct ApiClient {
    base_url: String,
    agent: ureq::Agent,
}

impl ApiClient {
    pub fn new(config: &Config) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            agent,
        }
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn fetch_stats(&self, kind: SnapshotKind) -> Result<ApiStats, FetchError> {
        let url = self.endpoint("/api/stats");
        let body = self.get_json(&url, &[("type", kind.as_str())])?;
        serde_json::from_value(body).map_err(|e| FetchError::Decode {
            url,
            message: e.to_string(),
        })
    }

    pub fn fetch_historical(&self) -> Result<Ingested<CourseRecord>, FetchError> {
        let url = self.endpoint("/api/historical-data");
        let values = self.get_array(&url)?;
        Ok(ingest::ingest_historical(&values))
    }

    pub fn fetch_ongoing(&self) -> Result<Ingested<OngoingCourse>, FetchError> {
        let url = self.endpoint("/api/ongoing-prediction");
        let values = self.get_array(&url)?;
        Ok(ingest::ingest_ongoing(&values))
    }

    fn get_array(&self, url: &str) -> Result<Vec<Value>, FetchError> {
        match self.get_json(url, &[])? {
            Value::Array(values) => Ok(values),
            other => Err(FetchError::Decode {
                url: url.to_string(),
                message: format!("expected a JSON array, got {}", json_kind(&other)),
            }),
        }
    }

    fn get_json(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, FetchError> {
        debug!(url, "requesting snapshot");
        let mut request = self.agent.get(url);
        for (name, value) in query {
            request = request.query(name, value);
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(status, _)) => {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status,
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(FetchError::Transport {
                    url: url.to_string(),
                    message: transport.to_string(),
                })
            }
        };

        response.into_json::<Value>().map_err(|e| FetchError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

impl SnapshotSource for ApiClient {
    fn fetch(&self, kind: SnapshotKind) -> Result<Snapshot, FetchError> {
        match kind {
            SnapshotKind::Historical => self.fetch_historical().map(Snapshot::Historical),
            SnapshotKind::Ongoing => self.fetch_ongoing().map(Snapshot::Ongoing),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Request numbering for one dashboard.
///
/// Switching to another view supersedes every request issued for the
/// previous one. Refreshes of the same view never supersede each other; a
/// response is only dropped when a newer one has already been shown.
#[derive(Debug, Default)]
pub struct RequestSequence {
    state: Mutex<SequenceState>,
}

#[derive(Debug, Default)]
struct SequenceState {
    issued: u64,
    applied: u64,
    view: Option<SnapshotKind>,
    /// First ticket issued for the current view.
    view_since: u64,
}

impl SequenceState {
    fn admits(&self, ticket: Ticket) -> bool {
        ticket.0 >= self.view_since && ticket.0 > self.applied
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

impl RequestSequence {
    pub fn begin(&self, kind: SnapshotKind) -> Ticket {
        let mut state = self.lock();
        state.issued += 1;
        if state.view != Some(kind) {
            state.view = Some(kind);
            state.view_since = state.issued;
        }
        Ticket(state.issued)
    }

    /// Whether a response for `ticket` may still be shown.
    pub fn is_current(&self, ticket: Ticket) -> bool {
        self.lock().admits(ticket)
    }

    /// Marks `ticket` as shown if it is still current. Older responses that
    /// arrive afterwards are no longer current.
    pub fn apply(&self, ticket: Ticket) -> bool {
        let mut state = self.lock();
        let admitted = state.admits(ticket);
        if admitted {
            state.applied = ticket.0;
        }
        admitted
    }

    fn lock(&self) -> MutexGuard<'_, SequenceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Loaded<T> {
    Current(T),
    /// A view switch or a newer response overtook this one.
    Superseded,
}

pub struct ViewLoader<S> {
    source: Arc<S>,
    sequence: Arc<RequestSequence>,
}

impl<S> Clone for ViewLoader<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            sequence: Arc::clone(&self.sequence),
        }
    }
}

impl<S: SnapshotSource> ViewLoader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source: Arc::new(source),
            sequence: Arc::new(RequestSequence::default()),
        }
    }

    /// Fetches one view. Results of superseded requests, errors included,
    /// are discarded so they cannot overwrite a newer view. Errors do not
    /// count as shown, so a slower successful refresh can still land.
    pub async fn load(&self, kind: SnapshotKind) -> Result<Loaded<Snapshot>, FetchError> {
        let ticket = self.sequence.begin(kind);
        let source = Arc::clone(&self.source);

        let result = tokio::task::spawn_blocking(move || source.fetch(kind))
            .await
            .map_err(|e| FetchError::Aborted(e.to_string()))?;

        let current = match &result {
            Ok(_) => self.sequence.apply(ticket),
            Err(_) => self.sequence.is_current(ticket),
        };
        if !current {
            info!(view = kind.as_str(), ?ticket, "discarding superseded response");
            return Ok(Loaded::Superseded);
        }
        result.map(Loaded::Current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    /// Serves a single canned HTTP response on a local port.
    fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();

        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            while reader.read_line(&mut line).unwrap() > 0 {
                if line == "\r\n" {
                    break;
                }
                line.clear();
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).unwrap();
        });

        format!("http://{address}")
    }

    fn client_for(api_url: String) -> ApiClient {
        ApiClient::new(&Config {
            api_url,
            timeout: Duration::from_secs(5),
            database_url: None,
        })
    }

    #[test]
    fn empty_array_is_not_an_error() {
        let client = client_for(serve_once("200 OK", "[]"));
        let ingested = client.fetch_ongoing().unwrap();
        assert!(ingested.records.is_empty());
        assert!(ingested.rejected.is_empty());
    }

    #[test]
    fn non_success_status_is_reported() {
        let client = client_for(serve_once("503 Service Unavailable", "{}"));
        match client.fetch_historical() {
            Err(FetchError::Status { status, .. }) => assert_eq!(status, 503),
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_body_is_a_decode_error() {
        let client = client_for(serve_once("200 OK", "{\"critical\": 1"));
        let result = client.fetch_stats(SnapshotKind::Historical);
        assert!(matches!(result, Err(FetchError::Decode { .. })));

        let client = client_for(serve_once("200 OK", "{\"message\": \"ok\"}"));
        let error = client.fetch_historical().unwrap_err();
        assert!(matches!(error, FetchError::Decode { .. }));
        assert!(!error.is_retryable());
    }

    #[test]
    fn decodes_stats_payload() {
        let client = client_for(serve_once(
            "200 OK",
            r#"{"critical": 3, "critical_percentage": 30.0, "acceptable": 5, "acceptable_percentage": 50.0, "excellent": 2, "excellent_percentage": 20.0, "total": 10}"#,
        ));
        let stats = client.fetch_stats(SnapshotKind::Ongoing).unwrap();
        assert_eq!(stats.critical, 3);
        assert_eq!(stats.total, 10);
        assert_eq!(stats.acceptable_percentage, 50.0);
    }

    #[test]
    fn unreachable_backend_is_a_transport_error() {
        let address = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };
        let client = client_for(format!("http://{address}"));
        let error = client.fetch_ongoing().unwrap_err();
        assert!(matches!(error, FetchError::Transport { .. }));
        assert!(error.is_retryable());
    }

    #[test]
    fn switching_views_supersedes_earlier_tickets() {
        let sequence = RequestSequence::default();
        let first = sequence.begin(SnapshotKind::Historical);
        assert!(sequence.is_current(first));

        let second = sequence.begin(SnapshotKind::Ongoing);
        assert!(second > first);
        assert!(!sequence.is_current(first));
        assert!(sequence.is_current(second));
    }

    #[test]
    fn same_view_refreshes_stay_current_until_a_newer_one_is_applied() {
        let sequence = RequestSequence::default();
        let first = sequence.begin(SnapshotKind::Ongoing);
        let second = sequence.begin(SnapshotKind::Ongoing);
        let third = sequence.begin(SnapshotKind::Ongoing);
        assert!(sequence.is_current(first));

        assert!(sequence.apply(second));
        assert!(!sequence.apply(first));
        assert!(sequence.apply(third));
        assert!(!sequence.apply(third));
    }

    /// Historical snapshots arrive slowly, ongoing ones immediately.
    struct SlowHistorical;

    impl SnapshotSource for SlowHistorical {
        fn fetch(&self, kind: SnapshotKind) -> Result<Snapshot, FetchError> {
            match kind {
                SnapshotKind::Historical => {
                    thread::sleep(Duration::from_millis(200));
                    Ok(Snapshot::Historical(ingest::ingest_historical(&[])))
                }
                SnapshotKind::Ongoing => Ok(Snapshot::Ongoing(ingest::ingest_ongoing(&[]))),
            }
        }
    }

    #[tokio::test]
    async fn slow_stale_response_is_discarded() {
        let loader = ViewLoader::new(SlowHistorical);

        let (stale, fresh) = tokio::join!(
            loader.load(SnapshotKind::Historical),
            loader.load(SnapshotKind::Ongoing)
        );

        assert_eq!(stale.unwrap(), Loaded::Superseded);
        assert!(matches!(
            fresh.unwrap(),
            Loaded::Current(Snapshot::Ongoing(_))
        ));
    }

    /// Every fetch takes a fixed time; `fail` turns results into errors.
    struct FixedLatency {
        latency: Duration,
        fail: bool,
    }

    impl SnapshotSource for FixedLatency {
        fn fetch(&self, _kind: SnapshotKind) -> Result<Snapshot, FetchError> {
            thread::sleep(self.latency);
            if self.fail {
                return Err(FetchError::Transport {
                    url: "http://backend".to_string(),
                    message: "timed out".to_string(),
                });
            }
            Ok(Snapshot::Ongoing(ingest::ingest_ongoing(&[])))
        }
    }

    async fn refresh_every(
        loader: &ViewLoader<FixedLatency>,
        period: Duration,
        ticks: usize,
    ) -> Vec<Result<Loaded<Snapshot>, FetchError>> {
        let mut ticker = tokio::time::interval(period);
        let mut handles = Vec::new();
        for _ in 0..ticks {
            ticker.tick().await;
            let loader = loader.clone();
            handles.push(tokio::spawn(async move {
                loader.load(SnapshotKind::Ongoing).await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        results
    }

    #[tokio::test]
    async fn refreshes_slower_than_the_interval_still_land() {
        let loader = ViewLoader::new(FixedLatency {
            latency: Duration::from_millis(120),
            fail: false,
        });

        let results = refresh_every(&loader, Duration::from_millis(50), 10).await;
        let current = results
            .iter()
            .filter(|result| matches!(result, Ok(Loaded::Current(_))))
            .count();
        assert!(current > 0);
        assert!(matches!(results.last(), Some(Ok(Loaded::Current(_)))));
    }

    #[tokio::test]
    async fn slow_refresh_errors_are_reported() {
        let loader = ViewLoader::new(FixedLatency {
            latency: Duration::from_millis(120),
            fail: true,
        });

        let results = refresh_every(&loader, Duration::from_millis(50), 5).await;
        assert!(results
            .iter()
            .all(|result| matches!(result, Err(FetchError::Transport { .. }))));
    }

    #[tokio::test]
    async fn sequential_loads_are_current() {
        let loader = ViewLoader::new(SlowHistorical);
        let first = loader.load(SnapshotKind::Ongoing).await.unwrap();
        let second = loader.load(SnapshotKind::Historical).await.unwrap();
        assert!(matches!(first, Loaded::Current(_)));
        assert!(matches!(second, Loaded::Current(Snapshot::Historical(_))));
    }
}
