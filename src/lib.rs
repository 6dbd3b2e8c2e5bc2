//! Storage core for the stock analyst research agent.
//!
//! Two independent leaf components:
//!
//! - [`ResultStore`]: analysis results keyed by `"{TICKER}:{session}"`, safe
//!   for concurrent use, optionally snapshotted to a JSON file.
//! - [`VectorStore`]: embeddings on a remote vector database, with an exact
//!   in-process index taking over while the remote is unconfigured or failing.
//!
//! Both are built once at startup and shared by handle (`Arc`).

pub mod config;
pub mod error;
pub mod results;
pub mod vectors;

pub use config::{AppConfig, ResultStoreConfig, VectorStoreConfig};
pub use error::{Result, StoreError};
pub use results::{Listing, ResultRecord, ResultStore, ResultValue, result_key};
pub use vectors::{
    BackendState, MetadataFilter, MetadataValue, ScoredRecord, VectorRecord, VectorStore,
    VectorStoreOptions, VectorStoreStats,
};
