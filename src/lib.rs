//! Faceted site search with a resumable bulk reindexer
//!
//! - [`search`]: filter configuration resolution, query compilation, backends
//!   (Elasticsearch over HTTP, embedded Tantivy) and result projection
//! - [`indexing`]: the bulk reindex job and its scheduling host
//! - [`api`]: the HTTP read API

pub mod api;
pub mod config;
pub mod error;
pub mod indexing;
pub mod metrics;
pub mod search;

pub use config::Config;
pub use error::{AppError, Result};
