//! In-process Tantivy backend
//!
//! Implements the same contract as the HTTP backend against a local index, for
//! development and tests. Keyword matching sums boosted fuzzy term matches over
//! the configured text fields; term filters apply to the keyword fields listed
//! in [`KEYWORD_FIELDS`]. An include filter on any other field matches nothing.

use crate::search::backend::{BulkResponse, HighlightMap, RawHit, SearchBackend, SearchHits};
use crate::search::document::{IndexableDocument, ATTACHMENT_FIELD};
use crate::search::error::{SearchError, SearchResult};
use crate::search::query::{CompiledQuery, MustMatch, SortDirection};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{
    AllQuery, BooleanQuery, BoostQuery, EmptyQuery, FuzzyTermQuery, Occur, Query, RangeQuery,
    TermQuery,
};
use tantivy::schema::{
    Field, IndexRecordOption, Schema, Value as StoredValue, FAST, INDEXED, STORED, STRING, TEXT,
};
use tantivy::snippet::SnippetGenerator;
use tantivy::{DocAddress, Index, IndexReader, IndexWriter, Order, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Full-text fields
pub const TEXT_FIELDS: &[&str] = &["title", "content", "keywords"];

/// Exact-match fields usable in term filters
pub const KEYWORD_FIELDS: &[&str] = &["type", "tags", "locale"];

/// Date fields usable for ranges and sorting
pub const DATE_FIELDS: &[&str] = &["last_edited", "sort_date"];

const ID_FIELD: &str = "id";
const SOURCE_FIELD: &str = "source";

/// Embedded index settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedSettings {
    /// Index directory; an in-memory index is used when unset
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_index_name")]
    pub index: String,

    /// Writer memory budget in bytes
    #[serde(default = "default_writer_heap_size")]
    pub writer_heap_size: usize,
}

impl Default for EmbeddedSettings {
    fn default() -> Self {
        Self {
            path: None,
            index: default_index_name(),
            writer_heap_size: default_writer_heap_size(),
        }
    }
}

/// [`SearchBackend`] backed by a local Tantivy index
pub struct EmbeddedBackend {
    index: Index,
    schema: Schema,
    writer: RwLock<IndexWriter>,
    reader: IndexReader,
    name: String,
}

impl EmbeddedBackend {
    /// Open or create the index described by `settings`
    pub fn new(settings: &EmbeddedSettings) -> SearchResult<Self> {
        let schema = build_schema();

        let index = match &settings.path {
            Some(path) => open_or_create(path, &schema)?,
            None => Index::create_in_ram(schema.clone()),
        };

        let writer = index
            .writer(settings.writer_heap_size)
            .map_err(|e| SearchError::IndexInitFailed(format!("Failed to create writer: {}", e)))?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| SearchError::IndexInitFailed(format!("Failed to create reader: {}", e)))?;

        Ok(Self {
            index,
            schema,
            writer: RwLock::new(writer),
            reader,
            name: settings.index.clone(),
        })
    }

    /// Number of searchable documents
    pub fn num_docs(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    fn field(&self, name: &str) -> Option<Field> {
        self.schema.get_field(name).ok()
    }

    fn to_tantivy_doc(&self, document: &IndexableDocument) -> SearchResult<TantivyDocument> {
        let mut doc = TantivyDocument::new();

        if let Some(field) = self.field(ID_FIELD) {
            doc.add_text(field, &document.id);
        }

        for name in TEXT_FIELDS.iter().chain(KEYWORD_FIELDS) {
            let Some(field) = self.field(name) else {
                continue;
            };
            match document.payload.get(*name) {
                Some(Value::String(text)) if !text.is_empty() => doc.add_text(field, text),
                Some(Value::Array(values)) => {
                    for value in values.iter().filter_map(Value::as_str) {
                        doc.add_text(field, value);
                    }
                }
                _ => {}
            }
        }

        for name in DATE_FIELDS {
            let (Some(field), Some(timestamp)) = (
                self.field(name),
                document
                    .payload
                    .get(*name)
                    .and_then(Value::as_str)
                    .and_then(parse_timestamp),
            ) else {
                continue;
            };
            doc.add_date(field, tantivy::DateTime::from_timestamp_secs(timestamp));
        }

        if let Some(field) = self.field(SOURCE_FIELD) {
            let source = serde_json::to_string(&document.payload).map_err(|e| {
                SearchError::IndexingFailed(format!("Failed to encode {}: {}", document.id, e))
            })?;
            doc.add_text(field, &source);
        }

        Ok(doc)
    }

    fn build_query(&self, query: &CompiledQuery) -> Box<dyn Query> {
        let mut clauses: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        if let Some(must_match) = &query.must_match {
            clauses.push((Occur::Must, self.keyword_query(must_match)));
        }

        for (field_name, values) in &query.filter_terms {
            clauses.push((Occur::Must, self.terms_query(field_name, values)));
        }

        for (field_name, bounds) in &query.ranges {
            if !DATE_FIELDS.contains(&field_name.as_str()) {
                warn!(field = %field_name, "Range on unsupported field ignored");
                continue;
            }
            let lower = bound(bounds.from.as_deref());
            let upper = bound(bounds.to.as_deref());
            clauses.push((
                Occur::Must,
                Box::new(RangeQuery::new_date_bounds(field_name.clone(), lower, upper)),
            ));
        }

        if let Some(locale) = &query.locale_scope {
            clauses.push((Occur::Must, self.terms_query("locale", &[locale.clone()])));
        }

        for (field_name, values) in &query.exclude_terms {
            let Some(field) = self.keyword_field(field_name) else {
                continue;
            };
            for value in values {
                clauses.push((
                    Occur::MustNot,
                    Box::new(TermQuery::new(
                        Term::from_field_text(field, value),
                        IndexRecordOption::Basic,
                    )),
                ));
            }
        }

        if !clauses.iter().any(|(occur, _)| *occur == Occur::Must) {
            clauses.push((Occur::Must, Box::new(AllQuery)));
        }

        Box::new(BooleanQuery::new(clauses))
    }

    fn keyword_query(&self, must_match: &MustMatch) -> Box<dyn Query> {
        let terms = tokenize(&must_match.text);
        let mut should: Vec<(Occur, Box<dyn Query>)> = Vec::new();

        for spec in &must_match.fields {
            let (name, boost) = parse_boost(spec);
            let Some(field) = self.text_field(name) else {
                continue;
            };
            for term in &terms {
                let fuzzy = FuzzyTermQuery::new(
                    Term::from_field_text(field, term),
                    must_match.fuzziness.max_edits(term),
                    true,
                );
                should.push((Occur::Should, Box::new(BoostQuery::new(Box::new(fuzzy), boost))));
            }
        }

        if should.is_empty() {
            Box::new(EmptyQuery)
        } else {
            Box::new(BooleanQuery::new(should))
        }
    }

    fn terms_query(&self, field_name: &str, values: &[String]) -> Box<dyn Query> {
        let Some(field) = self.keyword_field(field_name) else {
            debug!(field = %field_name, "Filter on unsupported field matches nothing");
            return Box::new(EmptyQuery);
        };

        let should: Vec<(Occur, Box<dyn Query>)> = values
            .iter()
            .map(|value| {
                let term = TermQuery::new(
                    Term::from_field_text(field, value),
                    IndexRecordOption::Basic,
                );
                (Occur::Should, Box::new(term) as Box<dyn Query>)
            })
            .collect();
        Box::new(BooleanQuery::new(should))
    }

    fn text_field(&self, name: &str) -> Option<Field> {
        TEXT_FIELDS
            .contains(&name)
            .then(|| self.field(name))
            .flatten()
    }

    fn keyword_field(&self, name: &str) -> Option<Field> {
        KEYWORD_FIELDS
            .contains(&name)
            .then(|| self.field(name))
            .flatten()
    }

    fn highlights(
        &self,
        searcher: &tantivy::Searcher,
        query: &CompiledQuery,
        addresses: &[DocAddress],
        docs: &[TantivyDocument],
    ) -> SearchResult<Vec<HighlightMap>> {
        let mut maps = vec![HighlightMap::new(); addresses.len()];
        let Some(must_match) = &query.must_match else {
            return Ok(maps);
        };
        let terms = tokenize(&must_match.text);

        for field_name in &query.highlight_fields {
            let Some(field) = self.text_field(field_name) else {
                continue;
            };
            let term_queries: Vec<(Occur, Box<dyn Query>)> = terms
                .iter()
                .map(|term| {
                    let query = TermQuery::new(
                        Term::from_field_text(field, term),
                        IndexRecordOption::WithFreqsAndPositions,
                    );
                    (Occur::Should, Box::new(query) as Box<dyn Query>)
                })
                .collect();
            if term_queries.is_empty() {
                continue;
            }

            let mut generator =
                SnippetGenerator::create(searcher, &BooleanQuery::new(term_queries), field)?;
            generator.set_max_num_chars(query.fragment_size.max(1));

            for (map, doc) in maps.iter_mut().zip(docs) {
                let snippet = generator.snippet_from_doc(doc);
                if !snippet.is_empty() {
                    map.insert(field_name.clone(), vec![snippet.to_html()]);
                }
            }
        }

        Ok(maps)
    }

    fn stored_source(&self, doc: &TantivyDocument) -> Map<String, Value> {
        let mut source = self
            .field(SOURCE_FIELD)
            .and_then(|field| doc.get_first(field))
            .and_then(|value| value.as_str())
            .and_then(|json| serde_json::from_str::<Map<String, Value>>(json).ok())
            .unwrap_or_default();
        source.remove(ATTACHMENT_FIELD);
        source
    }

    fn stored_id(&self, doc: &TantivyDocument) -> String {
        self.field(ID_FIELD)
            .and_then(|field| doc.get_first(field))
            .and_then(|value| value.as_str())
            .map(str::to_string)
            .unwrap_or_default()
    }
}

#[async_trait]
impl SearchBackend for EmbeddedBackend {
    fn name(&self) -> &'static str {
        "embedded"
    }

    fn index_name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &CompiledQuery) -> SearchResult<SearchHits> {
        let tantivy_query = self.build_query(query);
        let searcher = self.reader.searcher();

        let total = searcher
            .search(&*tantivy_query, &Count)
            .map_err(|e| SearchError::Backend(format!("Count failed: {}", e)))? as u64;

        if query.size == 0 {
            return Ok(SearchHits {
                total,
                hits: Vec::new(),
            });
        }

        let collector = TopDocs::with_limit(query.size).and_offset(query.offset);
        let sort = query
            .sort
            .first()
            .filter(|clause| DATE_FIELDS.contains(&clause.field.as_str()));

        let addresses: Vec<DocAddress> = match sort {
            Some(clause) => {
                let order = match clause.direction {
                    SortDirection::Asc => Order::Asc,
                    SortDirection::Desc => Order::Desc,
                };
                searcher
                    .search(
                        &*tantivy_query,
                        &collector.order_by_fast_field::<tantivy::DateTime>(&clause.field, order),
                    )
                    .map_err(|e| SearchError::Backend(format!("Search failed: {}", e)))?
                    .into_iter()
                    .map(|(_, address)| address)
                    .collect()
            }
            None => searcher
                .search(&*tantivy_query, &collector)
                .map_err(|e| SearchError::Backend(format!("Search failed: {}", e)))?
                .into_iter()
                .map(|(_, address)| address)
                .collect(),
        };

        let docs = addresses
            .iter()
            .map(|address| searcher.doc::<TantivyDocument>(*address))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| SearchError::Backend(format!("Failed to retrieve doc: {}", e)))?;

        let highlights = self.highlights(&searcher, query, &addresses, &docs)?;

        let hits = docs
            .iter()
            .zip(highlights)
            .map(|(doc, highlight)| RawHit {
                id: self.stored_id(doc),
                source: self.stored_source(doc),
                highlight,
            })
            .collect();

        Ok(SearchHits { total, hits })
    }

    async fn bulk_upsert(&self, documents: &[IndexableDocument]) -> SearchResult<BulkResponse> {
        let id_field = self
            .field(ID_FIELD)
            .ok_or_else(|| SearchError::IndexingFailed("Schema has no id field".to_string()))?;

        let mut writer = self.writer.write().await;
        for document in documents {
            let doc = self.to_tantivy_doc(document)?;
            writer.delete_term(Term::from_field_text(id_field, &document.id));
            writer.add_document(doc).map_err(|e| {
                SearchError::IndexingFailed(format!("Failed to add {}: {}", document.id, e))
            })?;
        }
        writer
            .commit()
            .map_err(|e| SearchError::IndexingFailed(format!("Failed to commit batch: {}", e)))?;
        self.reader.reload()?;

        Ok(BulkResponse::success(documents.len()))
    }

    async fn put_document(&self, document: &IndexableDocument) -> SearchResult<()> {
        self.bulk_upsert(std::slice::from_ref(document)).await?;
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> SearchResult<()> {
        let id_field = self
            .field(ID_FIELD)
            .ok_or_else(|| SearchError::DeletionFailed("Schema has no id field".to_string()))?;

        let mut writer = self.writer.write().await;
        writer.delete_term(Term::from_field_text(id_field, id));
        writer.commit().map_err(|e| {
            SearchError::DeletionFailed(format!("Failed to commit deletion: {}", e))
        })?;
        self.reader.reload()?;
        Ok(())
    }
}

/// Schema of the embedded index
pub fn build_schema() -> Schema {
    let mut schema_builder = Schema::builder();

    schema_builder.add_text_field(ID_FIELD, STRING | STORED);

    for name in TEXT_FIELDS {
        schema_builder.add_text_field(name, TEXT | STORED);
    }

    for name in KEYWORD_FIELDS {
        schema_builder.add_text_field(name, STRING | STORED);
    }

    for name in DATE_FIELDS {
        schema_builder.add_date_field(name, INDEXED | STORED | FAST);
    }

    // Full payload, returned as the hit source
    schema_builder.add_text_field(SOURCE_FIELD, STORED);

    schema_builder.build()
}

fn open_or_create(path: &Path, schema: &Schema) -> SearchResult<Index> {
    std::fs::create_dir_all(path).map_err(|e| {
        SearchError::IndexInitFailed(format!("Failed to create index directory: {}", e))
    })?;

    if path.join("meta.json").exists() {
        Index::open_in_dir(path).map_err(|e| {
            SearchError::IndexInitFailed(format!("Failed to open existing index: {}", e))
        })
    } else {
        Index::create_in_dir(path, schema.clone()).map_err(|e| {
            SearchError::IndexInitFailed(format!("Failed to create new index: {}", e))
        })
    }
}

/// Lowercased alphanumeric tokens, matching the default tokenizer
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn parse_boost(spec: &str) -> (&str, f32) {
    match spec.split_once('^') {
        Some((name, boost)) => (name.trim(), boost.trim().parse().unwrap_or(1.0)),
        None => (spec.trim(), 1.0),
    }
}

fn parse_timestamp(raw: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|datetime| datetime.timestamp())
}

fn bound(raw: Option<&str>) -> Bound<tantivy::DateTime> {
    match raw.and_then(parse_timestamp) {
        Some(timestamp) => Bound::Included(tantivy::DateTime::from_timestamp_secs(timestamp)),
        None => Bound::Unbounded,
    }
}

fn default_index_name() -> String {
    "site-search".to_string()
}

fn default_writer_heap_size() -> usize {
    50_000_000
}
