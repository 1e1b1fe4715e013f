//! Bundled inference backends.
//!
//! Language-model backends live outside this crate and plug in through
//! [`InferenceBackend`](super::backend::InferenceBackend).

mod onehot;
mod table;

pub use onehot::OneHotBackend;
pub use table::TableBackend;
