//! Faceted site search
//!
//! A search request flows through four stages:
//!
//! ```text
//! FilterConfigResolver ──▶ QueryCompiler ──▶ SearchBackend ──▶ ResultProjector
//!  (base < context        (CompiledQuery)    (Elasticsearch    (SearchResultItem,
//!   < presets)                                or Tantivy)       summary fallback)
//! ```
//!
//! Compilation and projection are pure and safe to call concurrently. The
//! backend is the only I/O boundary; [`SearchService`] converts its failures
//! into the public `{error: true}` shape.
//!
//! # Example
//!
//! ```no_run
//! use site_search::search::{
//!     EmbeddedBackend, EmbeddedSettings, FilterConfigResolver, FilterFile, NoTags,
//!     SearchRequest, SearchService, SearchSettings,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = Arc::new(EmbeddedBackend::new(&EmbeddedSettings::default())?);
//!     let resolver = FilterConfigResolver::new(FilterFile::default(), Arc::new(NoTags));
//!     let service = SearchService::new(backend, resolver, SearchSettings::default());
//!
//!     let response = service.search(&SearchRequest::new("rubbish collection")).await;
//!     println!("{}", serde_json::to_string(&response)?);
//!     Ok(())
//! }
//! ```

mod backend;
mod config;
mod document;
mod elastic;
mod embedded;
mod error;
mod extension;
mod projector;
mod query;
mod resolver;
mod service;
pub mod text;

pub use backend::{BulkItemError, BulkResponse, HighlightMap, RawHit, SearchBackend, SearchHits};
pub use config::{
    ChoiceOption, ContextOverride, DateFilterConfig, DateFilterOverride, FilterFieldConfig,
    FilterFieldOverride, FilterFile, OptionSpec, SearchPageConfig, SearchSettings,
    SearchSettingsBuilder,
};
pub use document::{ContentRecord, DocumentBatcher, IndexableDocument, ATTACHMENT_FIELD};
pub use elastic::{decode_cloud_id, ElasticBackend, ElasticSettings, ATTACHMENT_PIPELINE};
pub use embedded::{build_schema, EmbeddedBackend, EmbeddedSettings};
pub use error::{SearchError, SearchResult};
pub use extension::{DocumentHook, Extensions, QueryHook, ResultEnricher};
pub use projector::{ProjectedResults, ResultProjector, SearchResultItem, DEFAULT_TYPE_LABEL};
pub use query::{
    dedup_search_fields, normalize_date, CompiledQuery, Fuzziness, MustMatch, QueryCompiler,
    RangeBounds, SearchRequest, SortClause, SortDirection, CANONICAL_DATE_FORMAT,
};
pub use resolver::{
    merge_context, resolve, FilterConfigResolver, NoTags, ResolvedConfig, ResolvedFilter,
    ResolvedOption, TagProvider,
};
pub use service::{ResponseMeta, SearchResponse, SearchService};
