//! # Workflows Module
//!
//! High-level entry points that drive a [`Campaign`](crate::engine::scheduler::Campaign)
//! end to end.
//!
//! - **Recommend** ([`recommend`]) - One live round: ingest the labels measured so far,
//!   exclude variants still in the lab, and return the next batch.
//! - **Benchmark** ([`benchmark`]) - Replays a fully labeled dataset round by round,
//!   revealing ground truth as variants are selected, and records how fast each
//!   configuration finds high-fitness variants.

pub mod benchmark;
pub mod recommend;
