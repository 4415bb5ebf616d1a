//! Shared domain types for the vigil monitoring server.
//!
//! `types` holds the canonical sample and alert records, `proto` the JSON
//! wire protocol spoken by probes, and `id` the snowflake generator used
//! for rule and audit row ids.

pub mod id;
pub mod proto;
pub mod types;
