//! One-way event channel from a scan to its client.
//!
//! [`ProgressChannel`] wraps the sending half of a bounded
//! [`mpsc`](tokio::sync::mpsc) channel. The receiving half belongs to the
//! transport (an SSE response body in the server); when the client goes away
//! the transport drops it, and the channel turns that into cancellation of the
//! scan.
//!
//! After `started`, a ticker task publishes a `progress` snapshot every
//! `interval` of wall-clock time, independent of how fast files are read. The
//! ticker is stopped and joined before any terminal event is written, so a
//! `progress` can never follow `done` or `error` and two writers never race for
//! the final slot.

use crate::{Error, Result, ScanEvent, ScanProgress};
use core::time::Duration;
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;

/// Smallest accepted progress interval.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Sending side of a scan's event stream.
///
/// Every write first checks that the channel is still open; once the client
/// has disconnected or the scan was cancelled, nothing else is written.
pub struct ProgressChannel {
    tx: mpsc::Sender<ScanEvent>,
    progress: Arc<ScanProgress>,
    cancel: CancellationToken,
    interval: Duration,
    ticker: Option<Ticker>,
}

struct Ticker {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProgressChannel {
    /// Wraps `tx`. `cancel` is the scan's cancellation token: it is set when
    /// the receiving side is found closed, and it silences the channel.
    pub fn new(
        tx: mpsc::Sender<ScanEvent>,
        progress: Arc<ScanProgress>,
        cancel: CancellationToken,
        interval: Duration,
    ) -> Self {
        Self {
            tx,
            progress,
            cancel,
            interval: interval.max(MIN_INTERVAL),
            ticker: None,
        }
    }

    /// `true` while the client is connected and the scan is not cancelled.
    pub fn is_open(&self) -> bool {
        !self.cancel.is_cancelled() && !self.tx.is_closed()
    }

    /// Emits `started` and starts the periodic progress ticker.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientDisconnected`] if the channel is no longer open.
    pub async fn started(&mut self, term: &str, total_files: u64) -> Result<()> {
        self.send(ScanEvent::started(term, total_files)).await?;
        self.spawn_ticker();
        Ok(())
    }

    /// Stops the ticker, then emits a final `progress` snapshot followed by
    /// `done` carrying the final count. Consumes the channel, which closes the
    /// stream once the last event is delivered.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientDisconnected`] if the client is already gone.
    pub async fn finish(mut self) -> Result<()> {
        self.stop_ticker().await;
        let snapshot = self.progress.snapshot();
        self.send(ScanEvent::progress(snapshot)).await?;
        self.send(ScanEvent::done(snapshot.match_count)).await
    }

    /// Stops the ticker and emits a single `error` event describing `err`.
    ///
    /// `err` must be one of the failures that end a stream with an `error`
    /// event (see [`Error::is_terminal_event`]).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientDisconnected`] if the client is already gone.
    pub async fn fail(mut self, err: &Error) -> Result<()> {
        debug_assert!(err.is_terminal_event(), "not a terminal event: {err}");
        self.stop_ticker().await;
        self.send(ScanEvent::error(err.to_string())).await
    }

    /// Stops the ticker without writing anything. Used after cancellation.
    pub async fn close(mut self) {
        self.stop_ticker().await;
    }

    async fn send(&self, event: ScanEvent) -> Result<()> {
        if !self.is_open() {
            self.cancel.cancel();
            return Err(Error::ClientDisconnected);
        }

        self.tx.send(event).await.map_err(|_| {
            #[cfg(feature = "tracing")]
            tracing::debug!("Event receiver dropped, cancelling scan");
            self.cancel.cancel();
            Error::ClientDisconnected
        })
    }

    fn spawn_ticker(&mut self) {
        if self.ticker.is_some() {
            return;
        }

        // A child token so that cancelling the scan also stops the ticker.
        let stop = self.cancel.child_token();
        let handle = tokio::spawn(run_ticker(
            self.tx.clone(),
            Arc::clone(&self.progress),
            self.cancel.clone(),
            stop.clone(),
            self.interval,
        ));
        self.ticker = Some(Ticker { stop, handle });
    }

    async fn stop_ticker(&mut self) {
        let Some(ticker) = self.ticker.take() else {
            return;
        };
        ticker.stop.cancel();
        if let Err(_e) = ticker.handle.await {
            #[cfg(feature = "tracing")]
            tracing::error!("Progress ticker failed: {_e}");
        }
    }
}

impl Drop for ProgressChannel {
    fn drop(&mut self) {
        if let Some(ticker) = &self.ticker {
            ticker.stop.cancel();
        }
    }
}

/// Publishes a progress snapshot every `period` until stopped.
///
/// Also watches the receiving side: if the client disconnects the scan is
/// cancelled right away instead of at the next write.
async fn run_ticker(
    tx: mpsc::Sender<ScanEvent>,
    progress: Arc<ScanProgress>,
    cancel: CancellationToken,
    stop: CancellationToken,
    period: Duration,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = stop.cancelled() => break,
            () = tx.closed() => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Client disconnected, cancelling scan");
                cancel.cancel();
                break;
            }
            _ = ticker.tick() => {
                let event = ScanEvent::progress(progress.snapshot());
                tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    sent = tx.send(event) => {
                        if sent.is_err() {
                            cancel.cancel();
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProgressSnapshot;

    const PERIOD: Duration = Duration::from_secs(5);

    type Harness = (
        ProgressChannel,
        mpsc::Receiver<ScanEvent>,
        Arc<ScanProgress>,
        CancellationToken,
    );

    fn channel(capacity: usize) -> Harness {
        let (tx, rx) = mpsc::channel(capacity);
        let progress = Arc::new(ScanProgress::new());
        let cancel = CancellationToken::new();
        let channel = ProgressChannel::new(tx, Arc::clone(&progress), cancel.clone(), PERIOD);
        (channel, rx, progress, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_wall_clock_interval() {
        let (mut channel, mut rx, progress, _cancel) = channel(8);
        progress.set_total_files(2);

        channel.started("banana", 2).await.unwrap();
        assert_eq!(rx.recv().await, Some(ScanEvent::started("banana", 2)));

        progress.add_matches(3);
        let started = Instant::now();
        assert_eq!(
            rx.recv().await,
            Some(ScanEvent::progress(ProgressSnapshot {
                match_count: 3,
                files_processed: 0,
                total_files: 2,
            }))
        );
        assert!(started.elapsed() >= PERIOD);

        progress.add_matches(1);
        progress.file_completed();
        assert_eq!(
            rx.recv().await,
            Some(ScanEvent::progress(ProgressSnapshot {
                match_count: 4,
                files_processed: 1,
                total_files: 2,
            }))
        );

        progress.file_completed();
        channel.finish().await.unwrap();

        let final_snapshot = ProgressSnapshot {
            match_count: 4,
            files_processed: 2,
            total_files: 2,
        };
        assert_eq!(rx.recv().await, Some(ScanEvent::progress(final_snapshot)));
        assert_eq!(rx.recv().await, Some(ScanEvent::done(4)));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn no_progress_after_terminal_event() {
        let (mut channel, mut rx, _progress, _cancel) = channel(8);
        channel.started("banana", 0).await.unwrap();

        let err = Error::ScanIo {
            path: "F1.txt".into(),
            source: std::io::Error::other("boom"),
        };
        channel.fail(&err).await.unwrap();

        // Let several intervals pass; the ticker must already be gone.
        tokio::time::sleep(PERIOD * 3).await;

        assert_eq!(rx.recv().await, Some(ScanEvent::started("banana", 0)));
        assert_eq!(rx.recv().await, Some(ScanEvent::error(err.to_string())));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_the_scan_and_silences_writes() {
        let (mut channel, mut rx, _progress, cancel) = channel(8);
        channel.started("banana", 1).await.unwrap();
        assert!(rx.recv().await.is_some());

        drop(rx);
        tokio::time::timeout(PERIOD, cancel.cancelled())
            .await
            .expect("ticker should notice the disconnect");

        assert!(!channel.is_open());
        assert!(matches!(
            channel.finish().await,
            Err(Error::ClientDisconnected)
        ));
    }

    #[tokio::test]
    async fn send_after_disconnect_without_ticker_is_refused() {
        let (mut channel, rx, _progress, cancel) = channel(1);
        drop(rx);

        assert!(matches!(
            channel.started("banana", 1).await,
            Err(Error::ClientDisconnected)
        ));
        assert!(cancel.is_cancelled());
        channel.close().await;
    }

    #[tokio::test]
    async fn cancelled_channel_writes_nothing() {
        let (mut channel, mut rx, _progress, cancel) = channel(8);
        cancel.cancel();

        assert!(channel.started("banana", 1).await.is_err());
        channel.close().await;
        assert_eq!(rx.recv().await, None);
    }
}
