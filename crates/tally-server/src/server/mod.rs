//! Server-side components of the `tally` search service.
//!
//! ## Submodules
//!
//! - [`config`] - CLI and environment configuration.
//! - [`service`] - HTTP routes, scan spawning and shutdown coordination.
//! - [`telemetry`] - Console logging plus optional OpenTelemetry export.

pub mod config;
pub mod service;
pub mod telemetry;
