//! Search service: resolve, compile, execute and project

use crate::metrics::{SEARCH_DURATION_SECONDS, SEARCH_REQUESTS_TOTAL};
use crate::search::backend::SearchBackend;
use crate::search::config::SearchSettings;
use crate::search::document::{ContentRecord, DocumentBatcher};
use crate::search::error::{SearchError, SearchResult};
use crate::search::extension::Extensions;
use crate::search::projector::{ProjectedResults, ResultProjector, SearchResultItem};
use crate::search::query::{CompiledQuery, QueryCompiler, SearchRequest};
use crate::search::resolver::{FilterConfigResolver, ResolvedConfig};
use chrono::Utc;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Metadata of a successful search response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub count: u64,
}

/// Public search response shape
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SearchResponse {
    Results {
        results: Vec<SearchResultItem>,
        meta: ResponseMeta,
    },
    Error {
        error: bool,
        /// Raw backend detail, only outside live environments
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
}

impl SearchResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, SearchResponse::Error { .. })
    }

    pub fn results(&self) -> &[SearchResultItem] {
        match self {
            SearchResponse::Results { results, .. } => results,
            SearchResponse::Error { .. } => &[],
        }
    }
}

impl From<ProjectedResults> for SearchResponse {
    fn from(projected: ProjectedResults) -> Self {
        SearchResponse::Results {
            results: projected.items,
            meta: ResponseMeta {
                count: projected.total_count,
            },
        }
    }
}

/// Main search service
#[derive(Clone)]
pub struct SearchService {
    backend: Arc<dyn SearchBackend>,
    resolver: FilterConfigResolver,
    compiler: QueryCompiler,
    projector: ResultProjector,
    batcher: DocumentBatcher,
    extensions: Extensions,
    resolved: Cache<String, Arc<ResolvedConfig>>,
    default_locale: Option<String>,
    expose_error_detail: bool,
}

impl SearchService {
    /// Create a new search service
    pub fn new(
        backend: Arc<dyn SearchBackend>,
        resolver: FilterConfigResolver,
        settings: SearchSettings,
    ) -> Self {
        let resolved = Cache::builder()
            .max_capacity(256)
            .time_to_live(Duration::from_secs(settings.resolved_cache_ttl_secs.max(1)))
            .build();

        Self {
            backend,
            resolver,
            projector: ResultProjector::new(&settings),
            default_locale: settings.locale.clone(),
            compiler: QueryCompiler::new(settings),
            batcher: DocumentBatcher::new(1),
            extensions: Extensions::default(),
            resolved,
            expose_error_detail: false,
        }
    }

    /// Register extension collaborators for queries, results and documents
    pub fn with_extensions(mut self, extensions: Extensions) -> Self {
        self.projector = self.projector.with_extensions(extensions.clone());
        self.batcher = self.batcher.with_extensions(extensions.clone());
        self.extensions = extensions;
        self
    }

    /// Batcher used for single-record indexing
    pub fn with_batcher(mut self, batcher: DocumentBatcher) -> Self {
        self.batcher = batcher.with_extensions(self.extensions.clone());
        self
    }

    /// Include raw backend error detail in error responses
    pub fn with_error_detail(mut self, expose: bool) -> Self {
        self.expose_error_detail = expose;
        self
    }

    pub fn backend(&self) -> &Arc<dyn SearchBackend> {
        &self.backend
    }

    pub fn settings(&self) -> &SearchSettings {
        self.compiler.settings()
    }

    /// Resolved filter configuration for a context, cached per context name
    pub async fn resolved_config(&self, context: Option<&str>) -> Arc<ResolvedConfig> {
        let key = context.map(str::trim).unwrap_or_default().to_string();
        let resolver = self.resolver.clone();
        let lookup = key.clone();
        self.resolved
            .get_with(key, async move {
                debug!(context = %lookup, "Resolving filter configuration");
                Arc::new(resolver.resolve(Some(lookup.as_str())))
            })
            .await
    }

    /// Drop cached resolved configurations
    pub fn invalidate_resolved(&self) {
        self.resolved.invalidate_all();
    }

    /// Compile a request against its resolved configuration
    pub async fn compile(&self, request: &SearchRequest) -> CompiledQuery {
        let config = self.resolved_config(request.search_context.as_deref()).await;
        self.compile_with(&config, request)
    }

    fn compile_with(&self, config: &ResolvedConfig, request: &SearchRequest) -> CompiledQuery {
        let mut request = request.clone();
        if request.locale.is_none() {
            request.locale = self.default_locale.clone();
        }

        let mut query = self.compiler.compile(config, &request);
        self.extensions.adjust_query(&request, &mut query);
        query
    }

    /// Run a search, propagating backend failures
    pub async fn execute(&self, request: &SearchRequest) -> SearchResult<ProjectedResults> {
        let config = self.resolved_config(request.search_context.as_deref()).await;

        if !config.allow_empty_keyword && is_blank(request) {
            debug!("Empty keyword not allowed, skipping backend call");
            SEARCH_REQUESTS_TOTAL.with_label_values(&["skipped"]).inc();
            return Ok(ProjectedResults::default());
        }

        let query = self.compile_with(&config, request);
        let started = Instant::now();
        let hits = self.backend.search(&query).await;
        SEARCH_DURATION_SECONDS
            .with_label_values(&[self.backend.name()])
            .observe(started.elapsed().as_secs_f64());

        let hits = hits?;
        SEARCH_REQUESTS_TOTAL.with_label_values(&["ok"]).inc();
        Ok(self
            .projector
            .project_dated(&hits.hits, hits.total, &config.date.field))
    }

    /// Run a search, converting failures into the safe error shape
    pub async fn search(&self, request: &SearchRequest) -> SearchResponse {
        match self.execute(request).await {
            Ok(projected) => projected.into(),
            Err(e) => {
                SEARCH_REQUESTS_TOTAL.with_label_values(&["error"]).inc();
                error!(
                    backend = self.backend.name(),
                    index = self.backend.index_name(),
                    error = %e,
                    "Search request failed"
                );
                SearchResponse::Error {
                    error: true,
                    detail: self.expose_error_detail.then(|| e.to_string()),
                }
            }
        }
    }

    /// Index or remove a single record depending on its indexability.
    ///
    /// Returns the document id when the record was indexed.
    pub async fn index_record(&self, record: &ContentRecord) -> SearchResult<Option<String>> {
        let id = record.document_id().ok_or_else(|| {
            SearchError::IndexingFailed(format!(
                "{} #{} has no GUID",
                record.class, record.id
            ))
        })?;

        match self.batcher.document(record, Utc::now()) {
            Some(document) => {
                self.backend.put_document(&document).await?;
                info!(document_id = %id, "Indexed record");
                Ok(Some(id))
            }
            None => {
                self.backend.delete_document(&id).await?;
                debug!(document_id = %id, "Record not indexable, removed from index");
                Ok(None)
            }
        }
    }

    /// Remove a record's document from the index
    pub async fn remove_record(&self, record: &ContentRecord) -> SearchResult<()> {
        match record.document_id() {
            Some(id) => {
                self.backend.delete_document(&id).await?;
                info!(document_id = %id, "Removed record from index");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn is_blank(request: &SearchRequest) -> bool {
    request.keyword.trim().is_empty()
        && request
            .selected_filters
            .values()
            .flatten()
            .all(|value| value.trim().is_empty())
}
