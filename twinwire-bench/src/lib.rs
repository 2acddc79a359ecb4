//! # twinwire Bench
//!
//! Fixtures and measurement helpers shared by the twinwire benchmarks.

pub mod fixtures;
pub mod throughput;
