//! Projection of raw backend hits into display-ready results

use crate::search::backend::{HighlightMap, RawHit};
use crate::search::config::SearchSettings;
use crate::search::extension::Extensions;
use crate::search::text::{strip_control_whitespace, summarize};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Type label for content without a configured mapping
pub const DEFAULT_TYPE_LABEL: &str = "page";

/// A single display-ready result row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultItem {
    pub title: String,
    pub url: String,
    /// Highlighted fragment or plain-text excerpt
    pub summary: String,
    pub date: String,
    pub thumbnail_url: String,
    #[serde(rename = "type")]
    pub result_type: String,
    /// Fields added by result enrichers
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Projected page of results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectedResults {
    pub items: Vec<SearchResultItem>,
    pub total_count: u64,
}

/// Maps raw hits to [`SearchResultItem`]s
#[derive(Debug, Clone)]
pub struct ResultProjector {
    highlight_fields: Vec<String>,
    content_field: String,
    date_field: String,
    summary_length: usize,
    type_labels: BTreeMap<String, String>,
    extensions: Extensions,
}

impl ResultProjector {
    pub fn new(settings: &SearchSettings) -> Self {
        Self {
            highlight_fields: settings.highlight_fields.clone(),
            content_field: settings.content_field.clone(),
            date_field: settings.date_field.clone(),
            summary_length: settings.summary_length,
            type_labels: settings.type_labels.clone(),
            extensions: Extensions::default(),
        }
    }

    pub fn with_extensions(mut self, extensions: Extensions) -> Self {
        self.extensions = extensions;
        self
    }

    pub fn project(&self, hits: &[RawHit], total_count: u64) -> ProjectedResults {
        self.project_dated(hits, total_count, &self.date_field)
    }

    /// Project reading each result's date from `date_field`, as resolved for
    /// the request's search context. An empty name falls back to the default.
    pub fn project_dated(
        &self,
        hits: &[RawHit],
        total_count: u64,
        date_field: &str,
    ) -> ProjectedResults {
        let date_field = if date_field.trim().is_empty() {
            self.date_field.as_str()
        } else {
            date_field
        };
        ProjectedResults {
            items: hits
                .iter()
                .map(|hit| self.project_hit_dated(hit, date_field))
                .collect(),
            total_count,
        }
    }

    pub fn project_hit(&self, hit: &RawHit) -> SearchResultItem {
        self.project_hit_dated(hit, &self.date_field)
    }

    fn project_hit_dated(&self, hit: &RawHit, date_field: &str) -> SearchResultItem {
        let source = &hit.source;

        let summary = match self.first_fragment(&hit.highlight) {
            Some(fragment) => strip_control_whitespace(fragment),
            None => summarize(&text(source, &self.content_field), self.summary_length),
        };

        let backend_type = text(source, "type");
        let result_type = self
            .type_labels
            .get(&backend_type)
            .cloned()
            .unwrap_or_else(|| DEFAULT_TYPE_LABEL.to_string());

        let mut item = SearchResultItem {
            title: text(source, "title"),
            url: text(source, "url"),
            summary,
            date: text(source, date_field),
            thumbnail_url: text(source, "thumbnail_url"),
            result_type,
            extra: Map::new(),
        };

        self.extensions
            .enrich_result(source, &mut item, &hit.highlight);
        item
    }

    fn first_fragment<'a>(&self, highlight: &'a HighlightMap) -> Option<&'a str> {
        self.highlight_fields
            .iter()
            .filter_map(|field| highlight.get(field))
            .flat_map(|fragments| fragments.iter())
            .map(String::as_str)
            .find(|fragment| !fragment.trim().is_empty())
    }
}

/// String value of a source field; missing or non-string values become empty
fn text(source: &Map<String, Value>, field: &str) -> String {
    match source.get(field) {
        Some(Value::String(value)) => value.clone(),
        Some(Value::Number(value)) => value.to_string(),
        _ => String::new(),
    }
}
