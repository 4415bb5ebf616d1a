//! Storage layer for the vigil server.
//!
//! Time-series samples live in daily-partitioned SQLite databases with WAL
//! mode ([`tsdb::Tsdb`]); configuration rows, host snapshots, alert history
//! and audit results live in a single relational database
//! ([`meta::MetaStore`]). Both stores are opaque to the rest of the system.

pub mod error;
pub mod meta;
pub mod partition;
pub mod tsdb;

#[cfg(test)]
mod tests;

pub use error::StoreError;
pub use meta::MetaStore;
pub use tsdb::{Aggregation, RangeQuery, SeriesPoint, SweepOutcome, Tsdb};
