//! Shared progress record for one scan.
//!
//! The orchestrator is the only writer. The progress ticker and the terminal
//! emitter read it through [`ScanProgress::snapshot`]. Fields are atomics so
//! the record can be shared across tasks on a multi-threaded runtime without
//! a lock; every counter only ever grows during a scan.

use portable_atomic::{AtomicU64, Ordering};

/// Live counters of a running scan.
#[derive(Debug, Default)]
pub struct ScanProgress {
    match_count: AtomicU64,
    files_processed: AtomicU64,
    total_files: AtomicU64,
}

/// A point-in-time copy of [`ScanProgress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub match_count: u64,
    pub files_processed: u64,
    pub total_files: u64,
}

impl ScanProgress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the size of the enumeration. Called once, before any file is
    /// processed.
    pub fn set_total_files(&self, total: u64) {
        self.total_files.store(total, Ordering::Release);
    }

    /// Adds matches found in the chunk that was just processed.
    pub fn add_matches(&self, matches: u64) {
        self.match_count.fetch_add(matches, Ordering::AcqRel);
    }

    /// Marks one more file as done, whether it finished or was cancelled.
    pub fn file_completed(&self) {
        self.files_processed.fetch_add(1, Ordering::AcqRel);
    }

    pub fn match_count(&self) -> u64 {
        self.match_count.load(Ordering::Acquire)
    }

    /// Reads a snapshot.
    ///
    /// `total_files` is read last: it is written before any file is counted,
    /// so `files_processed <= total_files` holds for every snapshot.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let match_count = self.match_count.load(Ordering::Acquire);
        let files_processed = self.files_processed.load(Ordering::Acquire);
        let total_files = self.total_files.load(Ordering::Acquire);
        ProgressSnapshot {
            match_count,
            files_processed,
            total_files,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn snapshot_reflects_updates() {
        let progress = ScanProgress::new();
        assert_eq!(progress.snapshot(), ProgressSnapshot::default());

        progress.set_total_files(3);
        progress.add_matches(4);
        progress.add_matches(1);
        progress.file_completed();

        assert_eq!(
            progress.snapshot(),
            ProgressSnapshot {
                match_count: 5,
                files_processed: 1,
                total_files: 3,
            }
        );
        assert_eq!(progress.match_count(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_see_counts_go_backwards() {
        let progress = Arc::new(ScanProgress::new());
        progress.set_total_files(1_000);

        let writer = {
            let progress = Arc::clone(&progress);
            tokio::spawn(async move {
                for _ in 0..1_000 {
                    progress.add_matches(3);
                    progress.file_completed();
                    tokio::task::yield_now().await;
                }
            })
        };

        let mut last = ProgressSnapshot::default();
        while !writer.is_finished() {
            let snapshot = progress.snapshot();
            assert!(snapshot.match_count >= last.match_count);
            assert!(snapshot.files_processed >= last.files_processed);
            assert!(snapshot.files_processed <= snapshot.total_files);
            last = snapshot;
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        assert_eq!(progress.snapshot().match_count, 3_000);
        assert_eq!(progress.snapshot().files_processed, 1_000);
    }
}
