//! HTTP service exposing term scans as Server-Sent Event streams.
//!
//! This module defines [`ScanService`], the state behind every route. A search
//! request is validated synchronously, then handed to a [`ScanSession`] running
//! on its own task; the response body is the receiving half of the session's
//! event channel, rendered as named SSE events.
//!
//! ## Responsibilities
//!
//! - Validate `GET /api/search` requests and reject them during shutdown.
//! - Spawn one scan per request, each watching the service's shutdown token
//!   so that scans outliving the drain end with an `error` event.
//! - Track in-flight scans so shutdown can drain them.
//! - Record per-scan telemetry once a scan ends.

use crate::server::{
    config::ServerConfig,
    telemetry::{
        decrement_scans_inflight, increment_files_scanned, increment_matches_counted,
        increment_requests, increment_scan_errors, increment_scans_inflight,
        record_scan_duration,
    },
};
use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use core::time::Duration;
use futures::{Stream, StreamExt};
use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use serde::Deserialize;
use std::{sync::Arc, time::Instant};
use tally_core::{Error, ScanEvent, ScanOutcome, ScanRequest, ScanSession};
use tokio::{
    sync::mpsc,
    time::{sleep, timeout},
};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::Instrument;

/// How often shutdown polls the in-flight count while draining.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound on the wait for interrupted scans to unwind after the drain.
const UNWIND_TIMEOUT: Duration = Duration::from_secs(1);

/// Query string of `GET /api/search`.
#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub term: Option<String>,
}

/// Shared state of the HTTP service.
///
/// Cloning is cheap; every clone observes the same shutdown state and
/// in-flight count.
#[derive(Clone)]
pub struct ScanService {
    config: Arc<ServerConfig>,
    shutdown_token: CancellationToken,
    shutting_down: Arc<AtomicBool>,
    inflight: Arc<AtomicUsize>,
}

impl ScanService {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            shutdown_token: CancellationToken::new(),
            shutting_down: Arc::new(AtomicBool::new(false)),
            inflight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Builds the application router with CORS and HTTP tracing layers.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/api/search", get(search))
            .route("/healthz", get(healthz))
            .with_state(self.clone())
            .layer(TraceLayer::new_for_http())
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    /// Validates `params` and starts a scan, returning the receiving half of
    /// its event channel.
    ///
    /// # Errors
    ///
    /// - [`Error::ServiceShutdown`] once [`shutdown`](Self::shutdown) began.
    /// - [`Error::InvalidRequest`] for a missing, empty or malformed term.
    pub fn start_scan(&self, params: SearchParams) -> Result<mpsc::Receiver<ScanEvent>, Error> {
        let guard = InflightGuard::acquire(&self.inflight);
        if self.is_shutting_down() {
            increment_scan_errors("shutdown");
            return Err(Error::ServiceShutdown);
        }

        let term = params.term.unwrap_or_default();
        let request = ScanRequest::new(&term, &self.config.data_dir).inspect_err(|e| {
            increment_scan_errors("invalid");
            tracing::debug!("Rejected search: {}", e);
        })?;

        increment_requests();

        let session = ScanSession::new(
            request,
            self.config.scan_options.clone(),
            CancellationToken::new(),
        )
        .with_shutdown(self.shutdown_token.clone());
        let (tx, rx) = mpsc::channel(self.config.stream_buffer_size);

        let span = tracing::info_span!("scan", term = %session.request().term());
        let start = Instant::now();
        let fut = async move {
            let _guard = guard;
            let outcome = session.run(tx).await;
            record_outcome(&outcome, start.elapsed());
        };
        tokio::spawn(fut.instrument(span));

        Ok(rx)
    }

    /// Gracefully shuts the service down.
    ///
    /// - Refuses new scans.
    /// - Waits up to the configured timeout for in-flight scans to finish.
    /// - Cancels the shutdown token, which stops every remaining scan at its
    ///   next chunk boundary and closes its stream with an `error` event.
    pub async fn shutdown(&self) {
        // === Phase 0: Stop accepting new scans ===
        tracing::info!("Refusing new scans");
        self.shutting_down.store(true, Ordering::Release);

        // === Phase 1: Wait for in-flight scans to drain ===
        tracing::info!("Draining in-flight scans ({} active)", self.inflight());
        match timeout(self.config.shutdown_timeout, self.wait_for_idle()).await {
            Ok(()) => tracing::debug!("All in-flight scans drained"),
            Err(_) => tracing::warn!(
                "Graceful drain timed out ({} scans still active)",
                self.inflight()
            ),
        }

        // === Phase 2: Cancel whatever is left ===
        tracing::debug!("Cancelling remaining scans via shutdown token");
        self.shutdown_token.cancel();

        if timeout(UNWIND_TIMEOUT, self.wait_for_idle()).await.is_err() {
            tracing::warn!("{} scans did not unwind after cancellation", self.inflight());
        }

        tracing::info!("Scan service shutdown complete");
    }

    async fn wait_for_idle(&self) {
        while self.inflight() > 0 {
            sleep(DRAIN_POLL_INTERVAL).await;
        }
    }
}

/// Counts one in-flight scan for as long as it is held.
struct InflightGuard {
    inflight: Arc<AtomicUsize>,
}

impl InflightGuard {
    fn acquire(inflight: &Arc<AtomicUsize>) -> Self {
        inflight.fetch_add(1, Ordering::AcqRel);
        increment_scans_inflight();
        Self {
            inflight: Arc::clone(inflight),
        }
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.inflight.fetch_sub(1, Ordering::AcqRel);
        decrement_scans_inflight();
    }
}

fn record_outcome(outcome: &ScanOutcome, elapsed: Duration) {
    record_scan_duration(elapsed.as_secs_f64() * 1000.0);

    match outcome {
        ScanOutcome::Completed { count, files } => {
            increment_files_scanned(*files);
            increment_matches_counted(*count);
            tracing::info!(
                "Scan completed: {} matches in {} files ({:?})",
                count,
                files,
                elapsed
            );
        }
        ScanOutcome::Cancelled {
            count,
            files_processed,
        } => {
            increment_scan_errors("cancelled");
            tracing::info!(
                "Scan cancelled after {} files ({} matches so far)",
                files_processed,
                count
            );
        }
        ScanOutcome::Failed(Error::ServiceShutdown) => {
            increment_scan_errors("shutdown");
            tracing::info!("Scan interrupted by shutdown");
        }
        ScanOutcome::Failed(err) => {
            increment_scan_errors("failed");
            tracing::warn!("Scan failed: {}", err);
        }
    }
}

/// Renders one scan event as a named SSE event with a JSON payload.
fn to_sse(event: ScanEvent) -> Result<Event, axum::Error> {
    Event::default().event(event.name()).json_data(&event)
}

/// `GET /api/search?term=<term>`
///
/// Responds with a `text/event-stream` of `started`, `progress`, and exactly
/// one of `done` or `error`. Dropping the response cancels the scan.
async fn search(
    State(service): State<ScanService>,
    Query(params): Query<SearchParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, Error> {
    let rx = service.start_scan(params)?;
    let stream = ReceiverStream::new(rx).map(to_sse);
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// `GET /healthz`
async fn healthz(State(service): State<ScanService>) -> impl IntoResponse {
    if service.is_shutting_down() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
    } else {
        (StatusCode::OK, "ok")
    }
}
