//! Threshold alert evaluation with duration hysteresis.
//!
//! The [`evaluator::Evaluator`] owns a per-(probe, rule, kind) state table
//! and turns a stream of scalar observations into firing/resolve decisions.
//! It performs no I/O itself: the driving task persists records, reports
//! the assigned record id back via [`evaluator::Evaluator::mark_firing`],
//! and delivers notifications.

pub mod evaluator;

#[cfg(test)]
mod tests;

pub use evaluator::{Decision, Evaluator, Observation, StateKey};
