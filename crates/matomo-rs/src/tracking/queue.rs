//! Bounded-concurrency, retrying delivery of tracking payloads.
//!
//! [`DispatchQueue::enqueue`] waits for one of `concurrency` permits, then
//! runs the delivery loop for its payload. Permits are handed out in FIFO
//! order, and a task keeps its permit across retries and backoff sleeps, so
//! with `concurrency == 1` payloads are delivered strictly one after the
//! other.
//!
//! Per-task states:
//!
//! ```text
//! Pending → InFlight → Succeeded
//!              ↓  ↑
//!       RetryScheduled
//!              ↓
//!       ExhaustedFailure
//! ```

use super::payload::TrackingPayload;
use crate::api::client::parse_body;
use crate::api::retry::{RetryPolicy, is_delivery_failure};
use crate::api::transport::{Transport, join_url};
use crate::config::{ConfigError, DispatchConfig, parse_base_url};
use crate::error::{MatomoError, MatomoResult};
use reqwest::Url;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle state of one queued tracking call.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    InFlight,
    RetryScheduled,
    Succeeded,
    ExhaustedFailure,
}

impl TaskState {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::InFlight => "in_flight",
            TaskState::RetryScheduled => "retry_scheduled",
            TaskState::Succeeded => "succeeded",
            TaskState::ExhaustedFailure => "exhausted_failure",
        }
    }

    /// `Succeeded` and `ExhaustedFailure` have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Succeeded | TaskState::ExhaustedFailure)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a delivered tracking call.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Delivery attempts made, including the successful one.
    pub attempts: u32,
}

/// Point-in-time queue occupancy.
#[derive(Serialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Tasks waiting for a permit.
    pub waiting: usize,
    /// Tasks holding a permit (sending or waiting to retry).
    pub in_flight: usize,
}

struct Inner {
    transport: Arc<dyn Transport>,
    track_url: Url,
    permits: Semaphore,
    concurrency: usize,
    retry: RetryPolicy,
    waiting: AtomicUsize,
    in_flight: AtomicUsize,
    next_task: AtomicU64,
}

/// FIFO dispatch queue for tracking payloads. Cheap to clone; clones share
/// the same permits and counters.
#[derive(Clone)]
pub struct DispatchQueue {
    inner: Arc<Inner>,
}

impl fmt::Debug for DispatchQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchQueue")
            .field("track_url", &self.inner.track_url.as_str())
            .field("concurrency", &self.inner.concurrency)
            .field("retry", &self.inner.retry)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Decrements a gauge when dropped, so cancelled tasks leave the counters
/// consistent.
struct GaugeGuard<'a>(&'a AtomicUsize);

impl<'a> GaugeGuard<'a> {
    fn enter(gauge: &'a AtomicUsize) -> Self {
        gauge.fetch_add(1, Ordering::SeqCst);
        Self(gauge)
    }
}

impl Drop for GaugeGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl DispatchQueue {
    /// Create a queue posting to `config.track_path` under `base_url`.
    /// A concurrency of 0 is treated as 1.
    pub fn new(
        base_url: &str,
        config: &DispatchConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ConfigError> {
        let base = parse_base_url(base_url)?;
        let concurrency = config.concurrency.max(1);
        Ok(Self {
            inner: Arc::new(Inner {
                transport,
                track_url: join_url(&base, &config.track_path)?,
                permits: Semaphore::new(concurrency),
                concurrency,
                retry: config.retry.clone(),
                waiting: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                next_task: AtomicU64::new(1),
            }),
        })
    }

    pub fn track_url(&self) -> &Url {
        &self.inner.track_url
    }

    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.inner.retry
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            waiting: self.inner.waiting.load(Ordering::SeqCst),
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
        }
    }

    /// Queue `payload` and wait for its terminal state.
    ///
    /// Resolves once the payload was delivered, or with `dispatch_exhausted`
    /// wrapping the last delivery error after every retry failed.
    pub async fn enqueue(&self, payload: TrackingPayload) -> MatomoResult<DispatchOutcome> {
        let task = self.inner.next_task.fetch_add(1, Ordering::SeqCst);
        trace!(task, site_id = payload.site_id(), state = %TaskState::Pending, "Tracking call queued");

        let permit = {
            let _waiting = GaugeGuard::enter(&self.inner.waiting);
            self.inner
                .permits
                .acquire()
                .await
                .map_err(|e| MatomoError::transport("dispatch queue is closed").with_cause(e))?
        };
        let _in_flight = GaugeGuard::enter(&self.inner.in_flight);

        let result = self.deliver(task, &payload).await;
        drop(permit);
        result
    }

    async fn deliver(&self, task: u64, payload: &TrackingPayload) -> MatomoResult<DispatchOutcome> {
        let retry = &self.inner.retry;
        let mut attempt: u32 = 0;

        loop {
            trace!(task, attempt, state = %TaskState::InFlight, "Sending tracking call");

            let err = match self.send_once(payload).await {
                Ok(()) => {
                    info!(
                        task,
                        site_id = payload.site_id(),
                        attempts = attempt + 1,
                        state = %TaskState::Succeeded,
                        "Tracking call delivered"
                    );
                    return Ok(DispatchOutcome {
                        attempts: attempt + 1,
                    });
                }
                Err(e) => e,
            };

            if retry.should_retry(attempt, &err) {
                let delay = retry.delay_for_attempt(attempt);
                warn!(
                    task,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    state = %TaskState::RetryScheduled,
                    "Tracking call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            error!(
                task,
                site_id = payload.site_id(),
                attempts = attempt + 1,
                error = %err,
                state = %TaskState::ExhaustedFailure,
                "Tracking call failed"
            );
            return Err(if is_delivery_failure(&err) {
                MatomoError::dispatch_exhausted(attempt + 1, err)
            } else {
                err
            });
        }
    }

    /// One delivery attempt. Any non-2xx status is a delivery failure.
    async fn send_once(&self, payload: &TrackingPayload) -> MatomoResult<()> {
        let raw = self
            .inner
            .transport
            .post_form(&self.inner.track_url, payload.fields())
            .await?;

        if raw.is_success() {
            debug!("tracking HTTP {} ({} bytes)", raw.status, raw.body.len());
            return Ok(());
        }

        let details = parse_body(&raw.body);
        let mut err = MatomoError::transport(format!("Matomo tracking HTTP error: {}", raw.status))
            .with_status(raw.status);
        if !details.is_null() {
            err = err.with_details(details);
        }
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::transport::{RawResponse, TransportFuture};
    use crate::error::ErrorKind;
    use crate::tracking::payload::{TrackingDefaults, VisitContext};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::time::Instant;

    /// Transport that logs start/end of each POST and answers with scripted
    /// statuses after a fixed latency. Unscripted calls succeed.
    struct RecordingTransport {
        statuses: Mutex<VecDeque<u16>>,
        latency: Duration,
        log: Mutex<Vec<(String, &'static str, Instant)>>,
    }

    impl RecordingTransport {
        fn new(statuses: &[u16], latency: Duration) -> Arc<Self> {
            Arc::new(Self {
                statuses: Mutex::new(statuses.iter().copied().collect()),
                latency,
                log: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<(String, &'static str)> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .map(|(site, what, _)| (site.clone(), *what))
                .collect()
        }

        fn starts(&self) -> Vec<Instant> {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, what, _)| *what == "start")
                .map(|(_, _, at)| *at)
                .collect()
        }

        fn record(&self, form: &[(String, String)], what: &'static str) {
            let site = form
                .iter()
                .find(|(k, _)| k == "idsite")
                .map(|(_, v)| v.clone())
                .unwrap_or_default();
            self.log.lock().unwrap().push((site, what, Instant::now()));
        }
    }

    impl Transport for RecordingTransport {
        fn get<'a>(&'a self, _url: &'a Url, _query: &'a [(String, String)]) -> TransportFuture<'a> {
            Box::pin(async { Err(MatomoError::transport("GET not expected")) })
        }

        fn post_form<'a>(&'a self, _url: &'a Url, form: &'a [(String, String)]) -> TransportFuture<'a> {
            Box::pin(async move {
                self.record(form, "start");
                if !self.latency.is_zero() {
                    tokio::time::sleep(self.latency).await;
                }
                let status = self.statuses.lock().unwrap().pop_front().unwrap_or(204);
                self.record(form, "end");
                Ok(RawResponse::new(status, ""))
            })
        }
    }

    fn queue(transport: Arc<RecordingTransport>, config: DispatchConfig) -> DispatchQueue {
        DispatchQueue::new("https://matomo.example.com/", &config, transport).unwrap()
    }

    fn payload(site_id: u32) -> TrackingPayload {
        let defaults = TrackingDefaults::new("tok");
        TrackingPayload::base(&defaults, &VisitContext::default().with_site(site_id)).unwrap()
    }

    fn ev(site: &str, what: &'static str) -> (String, &'static str) {
        (site.to_string(), what)
    }

    #[test]
    fn terminal_states() {
        assert!(TaskState::Succeeded.is_terminal());
        assert!(TaskState::ExhaustedFailure.is_terminal());
        assert!(!TaskState::RetryScheduled.is_terminal());
        assert_eq!(TaskState::InFlight.to_string(), "in_flight");
    }

    #[test]
    fn track_url_is_joined_onto_base() {
        let q = queue(RecordingTransport::new(&[], Duration::ZERO), DispatchConfig::default());
        assert_eq!(q.track_url().as_str(), "https://matomo.example.com/matomo.php");
        assert_eq!(q.concurrency(), 1);

        let zero = queue(
            RecordingTransport::new(&[], Duration::ZERO),
            DispatchConfig::default().with_concurrency(0),
        );
        assert_eq!(zero.concurrency(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt_with_linear_backoff() {
        let transport = RecordingTransport::new(&[500, 502, 204], Duration::ZERO);
        let q = queue(transport.clone(), DispatchConfig::default());

        let outcome = q.enqueue(payload(1)).await.unwrap();
        assert_eq!(outcome.attempts, 3);

        let starts = transport.starts();
        assert_eq!(starts.len(), 3);
        assert_eq!(starts[1] - starts[0], Duration::from_millis(300));
        assert_eq!(starts[2] - starts[1], Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_retries_plus_one() {
        let transport = RecordingTransport::new(&[500, 500, 500, 500], Duration::ZERO);
        let q = queue(transport.clone(), DispatchConfig::default());

        let err = q.enqueue(payload(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DispatchExhausted);
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.details().unwrap()["attempts"], 3);
        assert_eq!(err.inner().map(MatomoError::kind), Some(ErrorKind::TransportError));
        assert_eq!(transport.starts().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_retries_means_one_attempt() {
        let transport = RecordingTransport::new(&[503], Duration::ZERO);
        let config = DispatchConfig::default().with_retry(RetryPolicy::with_retries(0));
        let q = queue(transport.clone(), config);

        let err = q.enqueue(payload(1)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DispatchExhausted);
        assert_eq!(err.details().unwrap()["attempts"], 1);
        assert_eq!(transport.starts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn single_permit_runs_tasks_back_to_back() {
        // First payload fails once, so it retries while still holding the permit.
        let transport = RecordingTransport::new(&[500, 204, 204], Duration::from_millis(50));
        let q = queue(transport.clone(), DispatchConfig::default());

        let (a, b) = tokio::join!(q.enqueue(payload(1)), q.enqueue(payload(2)));
        assert_eq!(a.unwrap().attempts, 2);
        assert_eq!(b.unwrap().attempts, 1);

        assert_eq!(
            transport.events(),
            vec![
                ev("1", "start"),
                ev("1", "end"),
                ev("1", "start"),
                ev("1", "end"),
                ev("2", "start"),
                ev("2", "end"),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wider_queue_overlaps_deliveries() {
        let transport = RecordingTransport::new(&[], Duration::from_millis(50));
        let q = queue(transport.clone(), DispatchConfig::default().with_concurrency(2));

        let (a, b) = tokio::join!(q.enqueue(payload(1)), q.enqueue(payload(2)));
        assert!(a.is_ok() && b.is_ok());

        let events = transport.events();
        assert_eq!(events[0].1, "start");
        assert_eq!(events[1].1, "start");
    }

    #[tokio::test(start_paused = true)]
    async fn stats_track_waiting_and_in_flight() {
        let transport = RecordingTransport::new(&[], Duration::from_millis(100));
        let q = queue(transport, DispatchConfig::default());

        let first = tokio::spawn({
            let q = q.clone();
            async move { q.enqueue(payload(1)).await }
        });
        let second = tokio::spawn({
            let q = q.clone();
            async move { q.enqueue(payload(2)).await }
        });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(q.stats(), DispatchStats { waiting: 1, in_flight: 1 });

        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(q.stats(), DispatchStats::default());
    }
}
