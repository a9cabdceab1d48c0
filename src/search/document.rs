//! Content records and indexable documents

use crate::search::extension::Extensions;
use crate::search::query::CANONICAL_DATE_FORMAT;
use crate::search::text::html_to_plain;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

/// Field carrying base64 file content for the ingest pipeline
pub const ATTACHMENT_FIELD: &str = "attachment";

/// Stage query strings stripped from indexed URLs
const STAGE_SUFFIXES: &[&str] = &["?stage=Stage", "?stage=Live"];

/// A content record as yielded by a record source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// Content class (page type)
    pub class: String,

    /// Record id, unique within its class
    pub id: u64,

    /// Stable identifier; assigned before first indexing when absent
    #[serde(default)]
    pub guid: Option<String>,

    #[serde(default)]
    pub locale: Option<String>,

    #[serde(default = "default_true")]
    pub show_in_search: bool,

    #[serde(default)]
    pub disable_indexing: bool,

    pub title: String,

    /// HTML body
    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub keywords: Option<String>,

    #[serde(default)]
    pub url: String,

    pub last_edited: DateTime<Utc>,

    /// Date used for sorting when it differs from the edit date
    #[serde(default)]
    pub sort_date: Option<DateTime<Utc>>,

    #[serde(default)]
    pub thumbnail_url: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Base64 encoded file content
    #[serde(default)]
    pub attachment: Option<String>,

    /// Additional fields copied verbatim into the payload
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentRecord {
    pub fn new(class: impl Into<String>, id: u64, title: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            id,
            guid: None,
            locale: None,
            show_in_search: true,
            disable_indexing: false,
            title: title.into(),
            content: String::new(),
            keywords: None,
            url: String::new(),
            last_edited: Utc::now(),
            sort_date: None,
            thumbnail_url: None,
            tags: Vec::new(),
            attachment: None,
            extra: Map::new(),
        }
    }

    /// Record-level indexability
    pub fn is_indexable(&self) -> bool {
        self.show_in_search && !self.disable_indexing
    }

    /// Locale-qualified document id: `{guid}-{locale}`, or `{guid}` without a locale
    pub fn document_id(&self) -> Option<String> {
        let guid = self.guid.as_deref().filter(|g| !g.is_empty())?;
        Some(match self.locale.as_deref().filter(|l| !l.is_empty()) {
            Some(locale) => format!("{}-{}", guid, locale),
            None => guid.to_string(),
        })
    }

    /// Build the search payload for this record
    pub fn search_data(&self, indexed_at: DateTime<Utc>) -> Map<String, Value> {
        let mut payload = self.extra.clone();

        let core = json!({
            "object_id": self.id,
            "title": self.title,
            "content": html_to_plain(&self.content),
            "keywords": self.keywords.clone().unwrap_or_default(),
            "type": self.class,
            "thumbnail_url": self.thumbnail_url.clone().unwrap_or_default(),
            "sort_date": format_date(self.sort_date.unwrap_or(self.last_edited)),
            "last_edited": format_date(self.last_edited),
            "last_indexed": format_date(indexed_at),
            "url": strip_stage(&self.url),
            "tags": self.tags,
        });
        if let Value::Object(core) = core {
            payload.extend(core);
        }

        if let Some(locale) = &self.locale {
            payload.insert("locale".to_string(), json!(locale));
        }
        if let Some(attachment) = &self.attachment {
            payload.insert(ATTACHMENT_FIELD.to_string(), json!(attachment));
        }

        payload
    }
}

/// A document ready for bulk upsert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexableDocument {
    pub id: String,
    pub payload: Map<String, Value>,
}

impl IndexableDocument {
    pub fn has_attachment(&self) -> bool {
        self.payload.contains_key(ATTACHMENT_FIELD)
    }
}

/// Assembles indexable records into bounded batches
#[derive(Debug, Clone)]
pub struct DocumentBatcher {
    limit: usize,
    disabled_classes: HashSet<String>,
    extensions: Extensions,
}

impl DocumentBatcher {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            disabled_classes: HashSet::new(),
            extensions: Extensions::default(),
        }
    }

    /// Run the registered document hooks on every payload
    pub fn with_extensions(mut self, extensions: Extensions) -> Self {
        self.extensions = extensions;
        self
    }

    /// Exclude a whole content class from indexing
    pub fn with_disabled_class(mut self, class: impl Into<String>) -> Self {
        self.disabled_classes.insert(class.into());
        self
    }

    pub fn with_disabled_classes<I, S>(mut self, classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled_classes
            .extend(classes.into_iter().map(Into::into));
        self
    }

    /// Maximum records fetched per batch
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn is_indexable(&self, record: &ContentRecord) -> bool {
        record.is_indexable() && !self.disabled_classes.contains(&record.class)
    }

    /// Produce the document for an indexable record that already carries a GUID
    pub fn document(
        &self,
        record: &ContentRecord,
        indexed_at: DateTime<Utc>,
    ) -> Option<IndexableDocument> {
        if !self.is_indexable(record) {
            return None;
        }
        let id = record.document_id()?;
        let mut payload = record.search_data(indexed_at);
        self.extensions.update_search_data(record, &mut payload);
        Some(IndexableDocument { id, payload })
    }

    /// Convert a batch of records, returning the documents and the number skipped
    pub fn batch(
        &self,
        records: &[ContentRecord],
        indexed_at: DateTime<Utc>,
    ) -> (Vec<IndexableDocument>, usize) {
        let documents: Vec<_> = records
            .iter()
            .take(self.limit)
            .filter_map(|record| self.document(record, indexed_at))
            .collect();
        let considered = records.len().min(self.limit);
        let skipped = considered - documents.len();
        (documents, skipped)
    }
}

fn strip_stage(url: &str) -> String {
    STAGE_SUFFIXES
        .iter()
        .fold(url.to_string(), |url, suffix| url.replace(suffix, ""))
}

fn format_date(date: DateTime<Utc>) -> String {
    date.format(CANONICAL_DATE_FORMAT).to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record() -> ContentRecord {
        let mut record = ContentRecord::new("NewsArticle", 7, "Water restrictions lifted");
        record.guid = Some("a1b2".to_string());
        record.content = "<p>Restrictions&nbsp;end <b>today</b></p>".to_string();
        record.url = "/news/water?stage=Stage".to_string();
        record.last_edited = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        record
    }

    #[test]
    fn test_document_id_is_locale_qualified() {
        let mut record = record();
        assert_eq!(record.document_id().as_deref(), Some("a1b2"));

        record.locale = Some("en_NZ".to_string());
        assert_eq!(record.document_id().as_deref(), Some("a1b2-en_NZ"));

        record.guid = None;
        assert!(record.document_id().is_none());
    }

    #[test]
    fn test_search_data_payload() {
        let mut record = record();
        record.locale = Some("en_NZ".to_string());
        record
            .extra
            .insert("region".to_string(), json!("Wellington"));

        let now = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let payload = record.search_data(now);

        assert_eq!(payload["object_id"], 7);
        assert_eq!(payload["content"], "Restrictions end today");
        assert_eq!(payload["type"], "NewsArticle");
        assert_eq!(payload["url"], "/news/water");
        assert_eq!(payload["last_edited"], "2024-03-01T09:30:00Z");
        assert_eq!(payload["sort_date"], "2024-03-01T09:30:00Z");
        assert_eq!(payload["last_indexed"], "2024-03-02T00:00:00Z");
        assert_eq!(payload["locale"], "en_NZ");
        assert_eq!(payload["region"], "Wellington");
        assert!(!payload.contains_key(ATTACHMENT_FIELD));
    }

    #[test]
    fn test_extra_fields_do_not_override_core_fields() {
        let mut record = record();
        record.extra.insert("title".to_string(), json!("Spoofed"));
        let payload = record.search_data(Utc::now());
        assert_eq!(payload["title"], "Water restrictions lifted");
    }

    #[test]
    fn test_batcher_skips_non_indexable_records() {
        let hidden = ContentRecord {
            show_in_search: false,
            ..record()
        };
        let disabled = ContentRecord {
            disable_indexing: true,
            ..record()
        };
        let mut error_page = record();
        error_page.class = "ErrorPage".to_string();

        let batcher = DocumentBatcher::new(500).with_disabled_class("ErrorPage");
        let (documents, skipped) =
            batcher.batch(&[hidden, record(), disabled, error_page], Utc::now());

        assert_eq!(documents.len(), 1);
        assert_eq!(skipped, 3);
        assert_eq!(documents[0].id, "a1b2");
    }

    #[test]
    fn test_batcher_respects_limit() {
        let batcher = DocumentBatcher::new(2);
        let records = vec![record(), record(), record()];
        let (documents, skipped) = batcher.batch(&records, Utc::now());
        assert_eq!(documents.len(), 2);
        assert_eq!(skipped, 0);
    }

    #[test]
    fn test_attachment_detection() {
        let mut record = record();
        record.attachment = Some("JVBERi0xLjQK".to_string());
        let document = DocumentBatcher::new(10)
            .document(&record, Utc::now())
            .unwrap();
        assert!(document.has_attachment());
    }
}
