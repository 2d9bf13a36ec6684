//! # Lyra
//!
//! A hybrid structured and similarity query layer over document stores.
//!
//! ## Features
//!
//! - Chainable, immutable queries with find, sort, limit and distinct
//! - `like` clauses ranking or gating results by vector similarity
//! - Listeners that keep model outputs up to date as documents change
//! - Vector indexes maintained from listener outputs, searched by cosine
//! - Named encoders for non-native payloads
//! - Pluggable storage backends
// Core modules
mod data;
pub mod datalayer;
pub mod encoding;
pub mod error;
pub mod listener;
pub mod model;
pub mod query;
pub mod storage;
pub mod util;
pub mod vector;

// Re-exports for the public API
pub use data::{DataValue, Document, EncodedPayload, ID_FIELD};
pub use datalayer::{
    Component, ComponentKind, Datalayer, DatalayerConfig, Refresh, RefreshHandle,
    VectorIndexEntry,
};
pub use encoding::{BytesEncoder, Encoder, EncoderRegistry, JsonEncoder, VectorEncoder};
pub use error::{ErrorKind, LyraError, Result};
pub use listener::{DocumentFailure, Listener, RunReport};
pub use model::{FnTransform, Model, Precomputed, Transform};
pub use query::cursor::{Cursor, QueryResult, RefreshStatus, WriteOutcome};
pub use query::filter::Filter;
pub use query::{Collection, Query, QueryOp, SortDirection};
pub use storage::{Backend, MemoryBackend};
pub use vector::{SimilarityHit, VectorIndex};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
