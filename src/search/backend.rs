//! Search backend abstraction
//!
//! The compiler and projector are backend-neutral; a [`SearchBackend`] executes
//! compiled queries and document writes against a named index.

use crate::search::document::IndexableDocument;
use crate::search::error::SearchResult;
use crate::search::query::CompiledQuery;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Field name -> highlighted fragments
pub type HighlightMap = BTreeMap<String, Vec<String>>;

/// A hit as returned by the backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawHit {
    pub id: String,
    pub source: Map<String, Value>,
    #[serde(default)]
    pub highlight: HighlightMap,
}

/// One page of hits plus the total match count
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchHits {
    pub total: u64,
    pub hits: Vec<RawHit>,
}

/// An item-level bulk failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkItemError {
    pub id: String,
    pub status: u16,
    pub reason: String,
}

/// Result of a bulk upsert
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkResponse {
    /// Backend-reported flag: true when any item failed
    pub errors: bool,
    /// Number of items in the request
    pub items: usize,
    pub failures: Vec<BulkItemError>,
}

impl BulkResponse {
    pub fn success(items: usize) -> Self {
        Self {
            errors: false,
            items,
            failures: Vec::new(),
        }
    }

    /// Human-readable detail for the first failed item
    pub fn failure_detail(&self) -> Option<String> {
        if !self.errors {
            return None;
        }
        Some(match self.failures.first() {
            Some(failure) => format!(
                "document {} failed with status {}: {}",
                failure.id, failure.status, failure.reason
            ),
            None => "bulk request reported errors".to_string(),
        })
    }
}

/// Executes queries and writes against a named index.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    /// Index the backend reads from and writes to
    fn index_name(&self) -> &str;

    /// Run a compiled query
    async fn search(&self, query: &CompiledQuery) -> SearchResult<SearchHits>;

    /// Create-or-replace many documents in one call.
    ///
    /// Item-level failures are reported in the response, not as an `Err`.
    async fn bulk_upsert(&self, documents: &[IndexableDocument]) -> SearchResult<BulkResponse>;

    /// Create-or-replace a single document
    async fn put_document(&self, document: &IndexableDocument) -> SearchResult<()>;

    /// Delete a document; deleting a missing document succeeds
    async fn delete_document(&self, id: &str) -> SearchResult<()>;
}
