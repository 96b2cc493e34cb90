//! Error types for the scan engine.
//!
//! This module defines the central `Error` enum, which captures every failure
//! a scan can run into between request validation and the final event. It
//! implements [`IntoResponse`] so that synchronous rejections (invalid term,
//! shutdown in progress) map onto HTTP status codes without any glue in the
//! server.
//!
//! ## Error Cases
//! - `DirectoryNotFound`: The data directory is absent or unreadable.
//! - `ScanIo`: Reading one data file failed mid-stream.
//! - `InvalidRequest`: The client request was malformed (e.g. empty term).
//! - `ClientDisconnected`: The event channel was closed by the client.
//! - `ServiceShutdown`: The service is shutting down. New requests are refused
//!   with it, and scans still running when the drain period ends are closed
//!   with it.
//!
//! `DirectoryNotFound`, `ScanIo` and `ServiceShutdown` reach a client as an
//! `error` event. `InvalidRequest` is rejected before a stream is opened, and
//! `ClientDisconnected` has no one left to tell.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::{io, path::PathBuf};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the scan engine.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The data directory could not be listed.
    #[error("Data directory not found: {}", path.display())]
    DirectoryNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A data file could not be opened or read.
    #[error("Failed to read {}: {source}", path.display())]
    ScanIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The client request was invalid.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The client went away before the scan finished.
    #[error("Client disconnected")]
    ClientDisconnected,

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,
}

impl Error {
    /// Returns `true` for failures that end a scan with an `error` event.
    pub const fn is_terminal_event(&self) -> bool {
        matches!(
            self,
            Self::DirectoryNotFound { .. } | Self::ScanIo { .. } | Self::ServiceShutdown
        )
    }

    const fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Self::ServiceShutdown => StatusCode::SERVICE_UNAVAILABLE,
            Self::DirectoryNotFound { .. } | Self::ScanIo { .. } | Self::ClientDisconnected => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        (self.status(), body).into_response()
    }
}
