#![doc = include_str!("../README.md")]

mod channel;
mod common;
mod enumerate;
mod orchestrator;
mod progress;
mod scanner;
mod session;

pub use channel::ProgressChannel;
pub use common::*;
pub use enumerate::{FilePattern, enumerate_files};
pub use orchestrator::{ScanOrchestrator, ScanOutcome};
pub use progress::{ProgressSnapshot, ScanProgress};
pub use scanner::{DELIMITER, FileScan, TokenCounter, scan_file, scan_stream};
pub use session::{DEFAULT_CHUNK_SIZE, DEFAULT_PROGRESS_INTERVAL, ScanOptions, ScanSession};
