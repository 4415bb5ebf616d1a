//! The vigil core server: probe session management over persistent
//! WebSockets, metric ingestion into the time-series store, threshold
//! alert evaluation, notification fan-out, and retention sweeping.

pub mod alerting;
pub mod api;
pub mod config;
pub mod convert;
pub mod ingest;
pub mod session;
pub mod state;
pub mod ws;
