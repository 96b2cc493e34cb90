//! Sequencing of one scan across all data files.

use crate::{
    Error, FileScan, ProgressChannel, ScanOptions, ScanProgress, ScanRequest, enumerate_files,
    scan_file,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a scan ended.
#[derive(Debug)]
pub enum ScanOutcome {
    /// Every file was read and `done` was delivered.
    Completed { count: u64, files: u64 },
    /// The client disconnected. No terminal event was written.
    Cancelled { count: u64, files_processed: u64 },
    /// Enumeration or a file read failed, or the service shut down mid-scan;
    /// an `error` event was emitted if the client was still there to receive
    /// it.
    Failed(Error),
}

/// Drives the token scanner over every enumerated file of one request.
///
/// Files are processed strictly in enumeration order, one at a time. Match
/// counts are added to the shared [`ScanProgress`] as each chunk is
/// processed; `files_processed` moves once per file, after it ends.
///
/// Two signals stop a scan early. `cancel` means the client is gone and
/// nothing more is written. `shutdown` means the service is going away while
/// the client is still listening, so the stream is closed with an `error`.
pub struct ScanOrchestrator {
    request: ScanRequest,
    options: ScanOptions,
    progress: Arc<ScanProgress>,
    cancel: CancellationToken,
    shutdown: CancellationToken,
}

impl ScanOrchestrator {
    pub const fn new(
        request: ScanRequest,
        options: ScanOptions,
        progress: Arc<ScanProgress>,
        cancel: CancellationToken,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            request,
            options,
            progress,
            cancel,
            shutdown,
        }
    }

    /// Runs the scan to completion, cancellation, or failure, writing its
    /// lifecycle events to `channel`.
    ///
    /// - Enumeration failure: a single `error` event.
    /// - Otherwise `started`, then the files in order; a read failure ends the
    ///   scan with one `error` event and no partial result.
    /// - On success, a final `progress` snapshot and `done`.
    /// - Once cancelled, nothing further is written and no new file is opened.
    /// - On shutdown, the current file is abandoned and one `error` event
    ///   closes the stream.
    pub async fn run(&self, mut channel: ProgressChannel) -> ScanOutcome {
        let term = self.request.term();
        let directory = self.request.directory();

        let files = match enumerate_files(directory, &self.options.pattern).await {
            Ok(files) => files,
            Err(err) => return self.fail(channel, err).await,
        };

        let total = files.len() as u64;
        self.progress.set_total_files(total);

        #[cfg(feature = "tracing")]
        tracing::info!("Scanning {} files in {:?}", total, directory);

        if channel.started(term, total).await.is_err() {
            return self.cancelled(channel).await;
        }

        for file in &files {
            if self.cancel.is_cancelled() {
                return self.cancelled(channel).await;
            }
            if self.shutdown.is_cancelled() {
                return self.fail(channel, Error::ServiceShutdown).await;
            }

            let progress = &self.progress;
            let scan = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => {
                    return self.fail(channel, Error::ServiceShutdown).await;
                }
                scan = scan_file(
                    file,
                    term,
                    self.options.chunk_size,
                    &self.cancel,
                    |matches| progress.add_matches(matches),
                ) => scan,
            };

            match scan {
                Ok(FileScan::Complete { count: _count }) => {
                    self.progress.file_completed();
                    #[cfg(feature = "tracing")]
                    tracing::debug!("Finished {:?} with {} matches", file.path, _count);
                }
                Ok(FileScan::Cancelled { .. }) => {
                    self.progress.file_completed();
                    return self.cancelled(channel).await;
                }
                Err(err) => return self.fail(channel, err).await,
            }
        }

        let snapshot = self.progress.snapshot();
        match channel.finish().await {
            Ok(()) => ScanOutcome::Completed {
                count: snapshot.match_count,
                files: snapshot.files_processed,
            },
            Err(_) => ScanOutcome::Cancelled {
                count: snapshot.match_count,
                files_processed: snapshot.files_processed,
            },
        }
    }

    async fn fail(&self, channel: ProgressChannel, err: Error) -> ScanOutcome {
        #[cfg(feature = "tracing")]
        tracing::warn!("Scan failed: {}", err);

        if let Err(_e) = channel.fail(&err).await {
            #[cfg(feature = "tracing")]
            tracing::debug!("Error event not delivered: {}", _e);
        }
        ScanOutcome::Failed(err)
    }

    async fn cancelled(&self, channel: ProgressChannel) -> ScanOutcome {
        self.cancel.cancel();
        channel.close().await;

        let snapshot = self.progress.snapshot();

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Scan cancelled after {} of {} files",
            snapshot.files_processed,
            snapshot.total_files
        );

        ScanOutcome::Cancelled {
            count: snapshot.match_count,
            files_processed: snapshot.files_processed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ScanEvent;
    use core::time::Duration;
    use std::fs;
    use tokio::sync::mpsc;

    fn orchestrator(
        directory: &std::path::Path,
        term: &str,
    ) -> (ScanOrchestrator, Arc<ScanProgress>, CancellationToken) {
        orchestrator_with_shutdown(directory, term, CancellationToken::new())
    }

    fn orchestrator_with_shutdown(
        directory: &std::path::Path,
        term: &str,
        shutdown: CancellationToken,
    ) -> (ScanOrchestrator, Arc<ScanProgress>, CancellationToken) {
        let request = ScanRequest::new(term, directory).unwrap();
        let options = ScanOptions::default()
            .with_chunk_size(3)
            .with_progress_interval(Duration::from_secs(60));
        let progress = Arc::new(ScanProgress::new());
        let cancel = CancellationToken::new();
        let orchestrator = ScanOrchestrator::new(
            request,
            options,
            Arc::clone(&progress),
            cancel.clone(),
            shutdown,
        );
        (orchestrator, progress, cancel)
    }

    fn open(
        progress: &Arc<ScanProgress>,
        cancel: &CancellationToken,
    ) -> (ProgressChannel, mpsc::Receiver<ScanEvent>) {
        let (tx, rx) = mpsc::channel(64);
        let channel = ProgressChannel::new(
            tx,
            Arc::clone(progress),
            cancel.clone(),
            Duration::from_secs(60),
        );
        (channel, rx)
    }

    async fn drain(mut rx: mpsc::Receiver<ScanEvent>) -> Vec<ScanEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn empty_file_still_counts_as_processed() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("F1.txt"), "").unwrap();
        fs::write(dir.path().join("F2.txt"), "banana").unwrap();

        let (orchestrator, progress, cancel) = orchestrator(dir.path(), "banana");
        let (channel, rx) = open(&progress, &cancel);

        let outcome = orchestrator.run(channel).await;
        assert!(matches!(outcome, ScanOutcome::Completed { count: 1, files: 2 }));

        let events = drain(rx).await;
        assert_eq!(events.first(), Some(&ScanEvent::started("banana", 2)));
        assert_eq!(events.last(), Some(&ScanEvent::done(1)));
    }

    #[tokio::test]
    async fn missing_directory_ends_with_one_error_event() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("F1.txt"), "banana").unwrap();
        let (orchestrator, progress, cancel) = orchestrator(dir.path(), "banana");
        let (channel, rx) = open(&progress, &cancel);

        fs::remove_dir_all(dir.path()).unwrap();
        let outcome = orchestrator.run(channel).await;
        assert!(matches!(
            outcome,
            ScanOutcome::Failed(Error::DirectoryNotFound { .. })
        ));

        let events = drain(rx).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].name(), "error");
    }

    #[tokio::test]
    async fn cancelled_before_start_opens_no_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("F1.txt"), "banana").unwrap();

        let (orchestrator, progress, cancel) = orchestrator(dir.path(), "banana");
        let (channel, rx) = open(&progress, &cancel);
        drop(rx);

        let outcome = orchestrator.run(channel).await;
        assert!(matches!(
            outcome,
            ScanOutcome::Cancelled {
                count: 0,
                files_processed: 0
            }
        ));
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn shutdown_closes_the_stream_with_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("F1.txt"), "banana,kiwi").unwrap();
        fs::write(dir.path().join("F2.txt"), "banana").unwrap();

        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let (orchestrator, progress, cancel) =
            orchestrator_with_shutdown(dir.path(), "banana", shutdown);
        let (channel, rx) = open(&progress, &cancel);

        let outcome = orchestrator.run(channel).await;
        assert!(matches!(
            outcome,
            ScanOutcome::Failed(Error::ServiceShutdown)
        ));
        assert!(!cancel.is_cancelled());
        assert_eq!(progress.snapshot().files_processed, 0);

        let events = drain(rx).await;
        assert_eq!(
            events,
            vec![
                ScanEvent::started("banana", 2),
                ScanEvent::error(Error::ServiceShutdown.to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn shutdown_mid_file_abandons_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("F1.txt"), "banana,".repeat(4096)).unwrap();
        fs::write(dir.path().join("F2.txt"), "banana").unwrap();

        let shutdown = CancellationToken::new();
        let (orchestrator, progress, cancel) =
            orchestrator_with_shutdown(dir.path(), "banana", shutdown.clone());
        let (channel, mut rx) = open(&progress, &cancel);

        let scan = tokio::spawn(async move { orchestrator.run(channel).await });
        assert_eq!(rx.recv().await, Some(ScanEvent::started("banana", 2)));
        shutdown.cancel();

        let outcome = scan.await.unwrap();
        assert!(matches!(
            outcome,
            ScanOutcome::Failed(Error::ServiceShutdown)
        ));
        assert!(progress.snapshot().files_processed < 2);

        let events = drain(rx).await;
        assert_eq!(
            events.last(),
            Some(&ScanEvent::error(Error::ServiceShutdown.to_string()))
        );
        assert!(events.iter().all(|e| e.name() != "done"));
        assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    }
}
