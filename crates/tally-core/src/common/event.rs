//! Lifecycle and progress events pushed to the client.
//!
//! Each event has a name (the SSE `event:` field) and a small JSON payload
//! (the SSE `data:` field). A well-formed stream is one `started`, zero or
//! more `progress`, then exactly one of `done` or `error`.

use crate::ProgressSnapshot;
use serde::Serialize;

/// A single event on the progress channel.
///
/// Serializes to its payload only; the variant is carried by [`Self::name`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ScanEvent {
    Started(Started),
    Progress(Progress),
    Done(Done),
    Error(Failure),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Started {
    pub term: String,
    pub total_files: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub count: u64,
    pub processed_files: u64,
    pub total_files: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Done {
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub message: String,
}

impl ScanEvent {
    pub fn started(term: impl Into<String>, total_files: u64) -> Self {
        Self::Started(Started {
            term: term.into(),
            total_files,
        })
    }

    pub const fn progress(snapshot: ProgressSnapshot) -> Self {
        Self::Progress(Progress {
            count: snapshot.match_count,
            processed_files: snapshot.files_processed,
            total_files: snapshot.total_files,
        })
    }

    pub const fn done(count: u64) -> Self {
        Self::Done(Done { count })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(Failure {
            message: message.into(),
        })
    }

    /// The wire name of this event.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Started(_) => "started",
            Self::Progress(_) => "progress",
            Self::Done(_) => "done",
            Self::Error(_) => "error",
        }
    }

    /// `true` for `done` and `error`, after which nothing else is sent.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Error(_))
    }

    /// The JSON payload of this event.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
