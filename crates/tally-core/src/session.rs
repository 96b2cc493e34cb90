//! Binding of one scan to one client connection.

use crate::{
    FilePattern, ProgressChannel, ScanEvent, ScanOrchestrator, ScanOutcome, ScanProgress,
    ScanRequest,
};
use core::time::Duration;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default wall-clock interval between `progress` events.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of bytes read from a data file at a time.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Tunables shared by every scan of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    pub progress_interval: Duration,
    pub chunk_size: usize,
    pub pattern: FilePattern,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            chunk_size: DEFAULT_CHUNK_SIZE,
            pattern: FilePattern::default(),
        }
    }
}

impl ScanOptions {
    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Sets the read chunk size. Zero is raised to one byte.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = if chunk_size == 0 { 1 } else { chunk_size };
        self
    }

    #[must_use]
    pub fn with_pattern(mut self, pattern: FilePattern) -> Self {
        self.pattern = pattern;
        self
    }
}

/// One scan request bound to one event channel.
///
/// The session owns the scan's [`ScanProgress`] and its cancellation token.
/// Cancelling the token (directly, through a parent token, or by the client
/// dropping the event receiver) stops the scan at the next chunk boundary
/// and suppresses every further event.
///
/// A separate shutdown token, set with [`ScanSession::with_shutdown`], also
/// stops the scan but closes the stream with a final `error` event.
pub struct ScanSession {
    request: ScanRequest,
    options: ScanOptions,
    progress: Arc<ScanProgress>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
}

impl ScanSession {
    pub fn new(request: ScanRequest, options: ScanOptions, cancel: CancellationToken) -> Self {
        Self {
            request,
            options,
            progress: Arc::new(ScanProgress::new()),
            cancel,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stops the scan with an `error` event once `shutdown` is cancelled.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub const fn request(&self) -> &ScanRequest {
        &self.request
    }

    /// Shared handle to the live counters of this session.
    pub fn progress(&self) -> Arc<ScanProgress> {
        Arc::clone(&self.progress)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the scan, writing its events to `events`.
    ///
    /// Returns once a terminal event has been written, or once the scan
    /// observed cancellation. In both cases every sender clone held by the
    /// session has been dropped, so the receiver sees the end of the stream.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip_all, fields(term = %self.request.term()))
    )]
    pub async fn run(self, events: mpsc::Sender<ScanEvent>) -> ScanOutcome {
        let channel = ProgressChannel::new(
            events,
            Arc::clone(&self.progress),
            self.cancel.clone(),
            self.options.progress_interval,
        );

        let orchestrator = ScanOrchestrator::new(
            self.request,
            self.options,
            self.progress,
            self.cancel,
            self.shutdown,
        );
        orchestrator.run(channel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_chunk_size_is_raised() {
        let options = ScanOptions::default().with_chunk_size(0);
        assert_eq!(options.chunk_size, 1);
    }

    #[test]
    fn defaults() {
        let options = ScanOptions::default();
        assert_eq!(options.progress_interval, Duration::from_secs(5));
        assert_eq!(options.chunk_size, 64 * 1024);
        assert_eq!(options.pattern, FilePattern::new("F", "txt"));
    }

    #[tokio::test]
    async fn parent_cancellation_reaches_the_session() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("F1.txt"), "banana").unwrap();

        let shutdown = CancellationToken::new();
        let request = ScanRequest::new("banana", dir.path()).unwrap();
        let session = ScanSession::new(request, ScanOptions::default(), shutdown.child_token());
        let token = session.cancellation_token();

        shutdown.cancel();
        assert!(token.is_cancelled());

        let (tx, mut rx) = mpsc::channel(8);
        let outcome = session.run(tx).await;
        assert!(matches!(outcome, ScanOutcome::Cancelled { .. }));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn shutdown_ends_the_session_with_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("F1.txt"), "banana").unwrap();

        let shutdown = CancellationToken::new();
        let request = ScanRequest::new("banana", dir.path()).unwrap();
        let session = ScanSession::new(request, ScanOptions::default(), CancellationToken::new())
            .with_shutdown(shutdown.clone());
        let token = session.cancellation_token();

        shutdown.cancel();
        assert!(!token.is_cancelled());

        let (tx, mut rx) = mpsc::channel(8);
        let outcome = session.run(tx).await;
        assert!(matches!(
            outcome,
            ScanOutcome::Failed(crate::Error::ServiceShutdown)
        ));
        assert_eq!(rx.recv().await, Some(ScanEvent::started("banana", 1)));
        assert_eq!(
            rx.recv().await,
            Some(ScanEvent::error("Service is shutting down"))
        );
        assert_eq!(rx.recv().await, None);
    }
}
