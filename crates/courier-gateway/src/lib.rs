//! # Courier Gateway
//!
//! HTTP API over the dispatch engine: schedule, cancel, inspect, and
//! immediate sends.

pub mod routes;
pub mod server;

pub use server::{AppState, build_router, start};
