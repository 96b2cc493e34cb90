use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;
use tally_core::{FilePattern, ScanOptions};

/// Runtime configuration for the `tally-server` binary.
///
/// All values are parsed from CLI arguments or environment variables (a `.env`
/// file is loaded first), and are fixed for the lifetime of the process.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "tally-server",
    version,
    about = "Streams live term counts over a directory of data files"
)]
pub struct CliArgs {
    /// Directory holding the data files.
    ///
    /// Environment variable: `DATA_DIR`
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Wall-clock interval between `progress` events, in milliseconds.
    ///
    /// Progress is published on this cadence regardless of how fast files are
    /// read, so a slow disk still produces regular updates.
    ///
    /// Environment variable: `PROGRESS_INTERVAL_MS`
    #[arg(long, env = "PROGRESS_INTERVAL_MS", default_value_t = 5000)]
    pub progress_interval_ms: u64,

    /// Number of bytes read from a data file at a time.
    ///
    /// Cancellation is observed between chunks, so this also bounds how much
    /// is read after a client disconnects.
    ///
    /// Environment variable: `READ_CHUNK_BYTES`
    #[arg(long, env = "READ_CHUNK_BYTES", default_value_t = 64 * 1024)]
    pub read_chunk_bytes: usize,

    /// Capacity of the event buffer between a scan and its SSE response.
    ///
    /// Environment variable: `STREAM_BUFFER_SIZE`
    #[arg(long, env = "STREAM_BUFFER_SIZE", default_value_t = 16)]
    pub stream_buffer_size: usize,

    /// Name prefix of data files (`F` matches `F1.txt`, `F2.txt`, ...).
    ///
    /// Environment variable: `FILE_PREFIX`
    #[arg(long, env = "FILE_PREFIX", default_value = "F")]
    pub file_prefix: String,

    /// Extension of data files, without the leading dot.
    ///
    /// Environment variable: `FILE_EXTENSION`
    #[arg(long, env = "FILE_EXTENSION", default_value = "txt")]
    pub file_extension: String,

    /// Seconds to wait for in-flight scans to finish on shutdown before they
    /// are cancelled.
    ///
    /// Environment variable: `SHUTDOWN_TIMEOUT`
    #[arg(long, env = "SHUTDOWN_TIMEOUT", default_value_t = 3)]
    pub shutdown_timeout: u64,

    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:3000"))]
    pub server_addr: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub scan_options: ScanOptions,
    pub stream_buffer_size: usize,
    pub shutdown_timeout: Duration,
    pub server_addr: String,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.progress_interval_ms == 0 {
            bail!("PROGRESS_INTERVAL_MS must be greater than 0");
        }

        if args.read_chunk_bytes == 0 {
            bail!("READ_CHUNK_BYTES must be greater than 0");
        }

        if args.stream_buffer_size == 0 {
            bail!("STREAM_BUFFER_SIZE must be greater than 0");
        }

        if args.file_prefix.is_empty() {
            bail!("FILE_PREFIX must not be empty");
        }

        if args.file_extension.contains(['/', '\\']) {
            bail!(
                "FILE_EXTENSION ({}) must not contain a path separator",
                args.file_extension
            );
        }

        let scan_options = ScanOptions::default()
            .with_progress_interval(Duration::from_millis(args.progress_interval_ms))
            .with_chunk_size(args.read_chunk_bytes)
            .with_pattern(FilePattern::new(args.file_prefix, args.file_extension));

        Ok(Self {
            data_dir: args.data_dir,
            scan_options,
            stream_buffer_size: args.stream_buffer_size,
            shutdown_timeout: Duration::from_secs(args.shutdown_timeout),
            server_addr: args.server_addr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ServerConfig> {
        let argv = std::iter::once("tally-server").chain(args.iter().copied());
        let args = CliArgs::try_parse_from(argv)?;
        ServerConfig::try_from(args)
    }

    #[test]
    fn defaults() {
        let config = parse(&[]).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("data"));
        assert_eq!(config.scan_options, ScanOptions::default());
        assert_eq!(config.stream_buffer_size, 16);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(3));
        assert_eq!(config.server_addr, "0.0.0.0:3000");
    }

    #[test]
    fn flags_override_defaults() {
        let config = parse(&[
            "--data-dir",
            "/srv/orders",
            "--progress-interval-ms",
            "250",
            "--read-chunk-bytes",
            "4096",
            "--file-prefix",
            "part-",
            "--file-extension",
            ".csv",
        ])
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/srv/orders"));
        assert_eq!(
            config.scan_options.progress_interval,
            Duration::from_millis(250)
        );
        assert_eq!(config.scan_options.chunk_size, 4096);
        assert_eq!(config.scan_options.pattern, FilePattern::new("part-", "csv"));
    }

    #[test]
    fn rejects_zero_values() {
        assert!(parse(&["--progress-interval-ms", "0"]).is_err());
        assert!(parse(&["--read-chunk-bytes", "0"]).is_err());
        assert!(parse(&["--stream-buffer-size", "0"]).is_err());
    }

    #[test]
    fn rejects_bad_patterns() {
        assert!(parse(&["--file-prefix", ""]).is_err());
        assert!(parse(&["--file-extension", "txt/../x"]).is_err());
    }
}
