//! # evoloop Core Library
//!
//! An active-learning selection engine for directed protein evolution. Given a wild-type
//! sequence and a small, growing set of measured variant fitness scores, the library
//! recommends which untested variants to measure next.
//!
//! ## Architectural Philosophy
//!
//! The library follows a strict three-layer architecture:
//!
//! - **[`core`]: The Foundation.** Stateless data models (`Sequence`, `Variant`,
//!   `MutantUniverse`), deterministic mutant-space enumeration, CSV I/O and small
//!   statistics helpers.
//!
//! - **[`engine`]: The Logic Core.** The stateful layer: the persistent
//!   `RepresentationCache`, the batching `EmbeddingProvider`, surrogate model training
//!   with cross-validation, acquisition policies and the `Campaign` round state machine.
//!
//! - **[`workflows`]: The Public API.** Complete procedures built on the engine: running
//!   a live recommendation round and replaying fully labeled datasets to benchmark
//!   model and policy combinations.

pub mod core;
pub mod engine;
pub mod workflows;
