//! # Engine Module
//!
//! The active-learning machinery of evoloop: everything between a mutant universe and a
//! batch of recommended variants.
//!
//! ## Architecture
//!
//! - **Representation Cache** ([`cache`]) - Content-addressed embedding store with an
//!   in-memory tier and an optional SQLite tier
//! - **Embedding Provider** ([`embedding`]) - Batched, cancellable inference against a
//!   pluggable [`embedding::backend::InferenceBackend`], deduplicated through the cache
//! - **Surrogate Models** ([`surrogate`]) - Ridge regression and random forests with
//!   k-fold cross-validated hyperparameter selection
//! - **Acquisition** ([`acquisition`]) - Exploit, upper-confidence-bound, and diversity
//!   constrained batch selection
//! - **Scheduler** ([`scheduler`], [`state`]) - The campaign state machine that alternates
//!   between awaiting labels and running selection rounds
//! - **Configuration** ([`config`]), **Progress** ([`progress`]) and **Errors** ([`error`])

pub mod acquisition;
pub mod cache;
pub mod config;
pub mod embedding;
pub mod error;
pub mod progress;
pub mod scheduler;
pub mod state;
pub mod surrogate;
