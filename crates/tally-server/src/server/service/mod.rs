//! HTTP routes and scan lifecycle management.
//!
//! ## Structure
//!
//! - [`handler`] - Route handlers and the shared [`handler::ScanService`]
//!   state, including graceful shutdown.

pub mod handler;
