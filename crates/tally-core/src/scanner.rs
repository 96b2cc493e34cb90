//! Token counting over a chunked byte stream.
//!
//! A data file is a sequence of tokens separated by [`DELIMITER`], with no
//! delimiter after the last token. Files are read in fixed-size chunks, so a
//! token can straddle any number of chunk boundaries. [`TokenCounter`] keeps
//! the trailing, possibly incomplete token of each chunk (the carryover) and
//! completes it with the next chunk.
//!
//! [`scan_stream`] drives a counter from any stream of byte chunks and checks
//! for cancellation at every chunk boundary. [`scan_file`] does the same for a
//! file on disk. In both cases the stream is owned by the call and dropped on
//! every exit path, which closes the underlying file.

use crate::{Error, FileHandle, Result};
use futures::{Stream, StreamExt};
use std::{io, path::Path};
use tokio_util::{io::ReaderStream, sync::CancellationToken};

/// Token separator in data files.
pub const DELIMITER: u8 = b',';

/// Carryover size below which the counter never compacts.
const COMPACT_THRESHOLD: usize = 4 * 1024;

/// Carryover state machine counting exact matches of one term.
///
/// Splitting the same input at different chunk boundaries always yields the
/// same final count.
///
/// Memory stays bounded however long a token is. Once the carryover outgrows
/// its limit it is compacted: leading whitespace is dropped, a token already
/// longer than the term is marked as spilled and skipped up to the next
/// delimiter, and a whitespace run longer than the term is shortened to one
/// that still can't be part of a match.
#[derive(Debug, Clone)]
pub struct TokenCounter {
    term: String,
    carryover: Vec<u8>,
    spilled: bool,
    count: u64,
}

impl TokenCounter {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            carryover: Vec::new(),
            spilled: false,
            count: 0,
        }
    }

    /// Consumes one chunk and returns the number of matches it completed.
    ///
    /// Every delimiter-terminated token (including the carryover from the
    /// previous chunk) is compared; the bytes after the last delimiter become
    /// the new carryover.
    pub fn feed(&mut self, chunk: &[u8]) -> u64 {
        let Some(last) = chunk.iter().rposition(|&b| b == DELIMITER) else {
            if !self.spilled {
                self.carryover.extend_from_slice(chunk);
                self.compact();
            }
            return 0;
        };

        let mut found = 0;
        let mut tokens = chunk[..last].split(|&b| b == DELIMITER);

        if let Some(first) = tokens.next() {
            if self.spilled {
                self.spilled = false;
            } else if self.carryover.is_empty() {
                found += u64::from(is_match(&self.term, first));
            } else {
                self.carryover.extend_from_slice(first);
                found += u64::from(is_match(&self.term, &self.carryover));
            }
        }
        for token in tokens {
            found += u64::from(is_match(&self.term, token));
        }

        self.carryover.clear();
        self.carryover.extend_from_slice(&chunk[last + 1..]);
        self.compact();
        self.count += found;
        found
    }

    /// Evaluates the carryover as the final token of the stream and returns
    /// `1` if it matched.
    ///
    /// Must only be called after the stream has ended. The counter is left
    /// empty, so a second call returns `0`.
    pub fn finish(&mut self) -> u64 {
        let found = if self.spilled {
            0
        } else {
            u64::from(is_match(&self.term, &self.carryover))
        };
        self.spilled = false;
        self.carryover.clear();
        self.count += found;
        found
    }

    /// Total matches counted so far.
    pub const fn count(&self) -> u64 {
        self.count
    }

    /// Bytes currently held back waiting for the rest of their token.
    ///
    /// After compaction this is an equivalent stand-in for the token so far,
    /// not necessarily the bytes that were read.
    pub fn pending(&self) -> &[u8] {
        &self.carryover
    }

    fn limit(&self) -> usize {
        (2 * self.term.len() + 8).max(COMPACT_THRESHOLD)
    }

    /// Shrinks an oversized carryover without changing whether its token can
    /// still match.
    fn compact(&mut self) {
        let limit = self.limit();
        if self.carryover.len() <= limit {
            return;
        }

        // A multi-byte character may be cut at the end; keep those bytes raw.
        let (text, partial) = match core::str::from_utf8(&self.carryover) {
            Ok(text) => (text, &[][..]),
            Err(e) if e.error_len().is_none() => {
                let (valid, partial) = self.carryover.split_at(e.valid_up_to());
                (core::str::from_utf8(valid).unwrap_or_default(), partial)
            }
            Err(_) => {
                self.spill(limit);
                return;
            }
        };

        let content = text.trim_start();
        let word = content.trim_end();
        if word.len() > self.term.len() {
            self.spill(limit);
            return;
        }

        let gap = content.len() - word.len();
        let mut compacted = Vec::with_capacity(word.len() + self.term.len() + 1 + partial.len());
        compacted.extend_from_slice(word.as_bytes());
        if gap > self.term.len() {
            compacted.resize(word.len() + self.term.len() + 1, b' ');
        } else {
            compacted.extend_from_slice(&content.as_bytes()[word.len()..]);
        }
        compacted.extend_from_slice(partial);
        self.carryover = compacted;
    }

    /// Marks the current token as unable to match and drops its bytes.
    fn spill(&mut self, limit: usize) {
        self.spilled = true;
        self.carryover.clear();
        self.carryover.shrink_to(limit);
    }
}

/// Compares a raw token to the term after trimming surrounding whitespace.
/// Empty tokens and tokens that are not valid UTF-8 never match.
fn is_match(term: &str, token: &[u8]) -> bool {
    match core::str::from_utf8(token) {
        Ok(token) => {
            let token = token.trim();
            !token.is_empty() && token == term
        }
        Err(_) => false,
    }
}

/// How the scan of a single file ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileScan {
    /// The stream reached its end and the final token was evaluated.
    Complete { count: u64 },
    /// Cancellation was observed at a chunk boundary. The carryover was
    /// discarded, so `count` only covers fully delimited tokens.
    Cancelled { count: u64 },
}

impl FileScan {
    pub const fn count(&self) -> u64 {
        match self {
            Self::Complete { count } | Self::Cancelled { count } => *count,
        }
    }
}

/// Counts `term` in a stream of byte chunks.
///
/// `on_matches` is called after each chunk that completed at least one match,
/// with the number of new matches, so callers can publish counts before the
/// stream ends. `cancel` is checked before every chunk is pulled; once it is
/// set the stream is dropped and `Ok(FileScan::Cancelled)` is returned.
///
/// # Errors
///
/// A read failure is returned as [`Error::ScanIo`] tagged with `path`.
pub async fn scan_stream<S, B, F>(
    path: &Path,
    stream: S,
    term: &str,
    cancel: &CancellationToken,
    mut on_matches: F,
) -> Result<FileScan>
where
    S: Stream<Item = io::Result<B>>,
    B: AsRef<[u8]>,
    F: FnMut(u64),
{
    let mut counter = TokenCounter::new(term);
    let mut stream = core::pin::pin!(stream);

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Scan of {:?} cancelled after {} matches", path, counter.count());
                return Ok(FileScan::Cancelled { count: counter.count() });
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                let found = counter.feed(chunk.as_ref());
                if found > 0 {
                    on_matches(found);
                }
            }
            Some(Err(source)) => {
                return Err(Error::ScanIo {
                    path: path.to_path_buf(),
                    source,
                });
            }
            None => break,
        }
    }

    let found = counter.finish();
    if found > 0 {
        on_matches(found);
    }
    Ok(FileScan::Complete {
        count: counter.count(),
    })
}

/// Opens `file` and counts `term` in it, reading `chunk_size` bytes at a time.
///
/// # Errors
///
/// Failing to open or read the file is returned as [`Error::ScanIo`].
pub async fn scan_file<F>(
    file: &FileHandle,
    term: &str,
    chunk_size: usize,
    cancel: &CancellationToken,
    on_matches: F,
) -> Result<FileScan>
where
    F: FnMut(u64),
{
    let handle = tokio::fs::File::open(&file.path)
        .await
        .map_err(|source| Error::ScanIo {
            path: file.path.clone(),
            source,
        })?;

    let chunks = ReaderStream::with_capacity(handle, chunk_size);
    scan_stream(&file.path, chunks, term, cancel, on_matches).await
}
