//! Search requests and query compilation
//!
//! [`QueryCompiler::compile`] turns a resolved filter configuration plus a
//! user request into a backend-neutral [`CompiledQuery`]. The compiler is total:
//! every missing or malformed input has a fallback, so it never fails.
//! [`CompiledQuery::to_request_body`] renders the Elasticsearch-style JSON body.

use crate::search::config::SearchSettings;
use crate::search::resolver::ResolvedConfig;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

/// Canonical timestamp format for range bounds
pub const CANONICAL_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Locale field used for locale scoping
pub const LOCALE_FIELD: &str = "locale";

/// Source fields never returned with hits
const EXCLUDED_SOURCE_FIELDS: &[&str] = &["attachment"];

/// Sort direction
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum SortDirection {
    Asc,
    Desc,
}

/// A user search request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Free-form keyword text
    pub keyword: String,

    /// Filter name -> raw option values
    pub selected_filters: BTreeMap<String, Vec<String>>,

    /// Explicit sort direction on the date field
    pub sort_direction: Option<SortDirection>,

    pub date_from: Option<String>,
    pub date_to: Option<String>,

    /// Requested page size; non-positive falls back to the default
    pub size: Option<i64>,

    /// Requested offset; negative falls back to zero
    pub offset: Option<i64>,

    /// Named search context
    pub search_context: Option<String>,

    /// Current locale when the site is localized
    pub locale: Option<String>,
}

impl SearchRequest {
    /// Create a new request for a keyword
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            ..Default::default()
        }
    }

    /// Select a filter value (multi-valued)
    pub fn with_filter(mut self, filter: impl Into<String>, value: impl Into<String>) -> Self {
        self.selected_filters
            .entry(filter.into())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_sort(mut self, direction: SortDirection) -> Self {
        self.sort_direction = Some(direction);
        self
    }

    pub fn with_date_range(mut self, from: Option<&str>, to: Option<&str>) -> Self {
        self.date_from = from.map(str::to_string);
        self.date_to = to.map(str::to_string);
        self
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.search_context = Some(context.into());
        self
    }

    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Build a request from URL query pairs.
    ///
    /// Recognised keys are `q`, `sort`, `dateFrom`, `dateTo`, `size`, `offset`,
    /// `context` and `locale`; every other key is a filter name and may repeat
    /// (a trailing `[]` is ignored). Unparseable values are dropped.
    pub fn from_query_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut request = Self::default();

        for (key, value) in pairs {
            let value: String = value.into();
            match key.as_ref() {
                "q" => request.keyword = value,
                "sort" => request.sort_direction = SortDirection::from_str(value.trim()).ok(),
                "dateFrom" => request.date_from = Some(value).filter(|v| !v.trim().is_empty()),
                "dateTo" => request.date_to = Some(value).filter(|v| !v.trim().is_empty()),
                "size" => request.size = value.trim().parse().ok(),
                "offset" => request.offset = value.trim().parse().ok(),
                "context" => request.search_context = Some(value).filter(|v| !v.trim().is_empty()),
                "locale" => request.locale = Some(value).filter(|v| !v.trim().is_empty()),
                other => {
                    let name = other.trim_end_matches("[]");
                    if !name.is_empty() && !value.trim().is_empty() {
                        request
                            .selected_filters
                            .entry(name.to_string())
                            .or_default()
                            .push(value);
                    }
                }
            }
        }

        request
    }
}

/// Scaled edit-distance tolerance (`AUTO:low,high`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fuzziness {
    pub low: usize,
    pub high: usize,
}

impl Default for Fuzziness {
    fn default() -> Self {
        Self { low: 3, high: 6 }
    }
}

impl Fuzziness {
    /// Allowed edits for a term: 0 below `low` chars, 1 below `high`, 2 otherwise
    pub fn max_edits(&self, term: &str) -> u8 {
        let len = term.chars().count();
        if len < self.low {
            0
        } else if len < self.high {
            1
        } else {
            2
        }
    }

    pub fn as_backend_value(&self) -> String {
        format!("AUTO:{},{}", self.low, self.high)
    }
}

/// Multi-field keyword match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MustMatch {
    pub text: String,
    /// Field names, possibly carrying `^boost`
    pub fields: Vec<String>,
    pub fuzziness: Fuzziness,
}

/// Inclusive range bounds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeBounds {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortClause {
    pub field: String,
    pub direction: SortDirection,
}

/// Backend-neutral query description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledQuery {
    pub must_match: Option<MustMatch>,
    pub filter_terms: BTreeMap<String, Vec<String>>,
    pub exclude_terms: BTreeMap<String, Vec<String>>,
    pub ranges: BTreeMap<String, RangeBounds>,
    pub sort: Vec<SortClause>,
    pub size: usize,
    pub offset: usize,
    pub highlight_fields: Vec<String>,
    pub fragment_size: usize,
    pub locale_scope: Option<String>,
}

impl CompiledQuery {
    /// Render the Elasticsearch request body
    pub fn to_request_body(&self) -> Value {
        let mut must = Vec::new();
        let mut filter = Vec::new();
        let mut must_not = Vec::new();

        if let Some(must_match) = &self.must_match {
            must.push(json!({
                "multi_match": {
                    "query": must_match.text,
                    "type": "most_fields",
                    "fuzziness": must_match.fuzziness.as_backend_value(),
                    "fields": must_match.fields,
                }
            }));
        }

        for (field, values) in &self.filter_terms {
            filter.push(json!({ "terms": { field.as_str(): values } }));
        }

        for (field, bounds) in &self.ranges {
            let mut range = Map::new();
            if let Some(from) = &bounds.from {
                range.insert("gte".to_string(), json!(from));
            }
            if let Some(to) = &bounds.to {
                range.insert("lte".to_string(), json!(to));
            }
            filter.push(json!({ "range": { field.as_str(): range } }));
        }

        if let Some(locale) = &self.locale_scope {
            filter.push(json!({ "term": { LOCALE_FIELD: locale } }));
        }

        for (field, values) in &self.exclude_terms {
            must_not.push(json!({ "terms": { field.as_str(): values } }));
        }

        let mut bool_query = Map::new();
        for (occur, clauses) in [("must", must), ("filter", filter), ("must_not", must_not)] {
            if !clauses.is_empty() {
                bool_query.insert(occur.to_string(), Value::Array(clauses));
            }
        }

        let query = if bool_query.is_empty() {
            json!({ "match_all": {} })
        } else {
            json!({ "bool": bool_query })
        };

        let mut body = json!({
            "_source": { "excludes": EXCLUDED_SOURCE_FIELDS },
            "query": query,
            "size": self.size,
            "from": self.offset,
        });

        if !self.sort.is_empty() {
            body["sort"] = Value::Array(
                self.sort
                    .iter()
                    .map(|s| json!({ s.field.as_str(): { "order": s.direction.to_string() } }))
                    .collect(),
            );
        }

        if !self.highlight_fields.is_empty() {
            let fields: Map<String, Value> = self
                .highlight_fields
                .iter()
                .map(|f| (f.clone(), json!({ "type": "unified" })))
                .collect();
            body["highlight"] = json!({
                "fragment_size": self.fragment_size,
                "fields": fields,
            });
        }

        body
    }
}

/// Compiles search requests against the engine settings
#[derive(Debug, Clone)]
pub struct QueryCompiler {
    settings: SearchSettings,
}

impl QueryCompiler {
    pub fn new(settings: SearchSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Compile a request. Never fails.
    pub fn compile(&self, config: &ResolvedConfig, request: &SearchRequest) -> CompiledQuery {
        let keyword = request.keyword.trim();
        let date_field = if config.date.field.is_empty() {
            self.settings.date_field.clone()
        } else {
            config.date.field.clone()
        };

        let must_match = (!keyword.is_empty()).then(|| MustMatch {
            text: keyword.to_string(),
            fields: dedup_search_fields(&self.settings.search_fields),
            fuzziness: Fuzziness::default(),
        });

        let (filter_terms, exclude_terms) = accumulate_filters(config, request);

        let sort = match request.sort_direction {
            Some(direction) => vec![SortClause {
                field: date_field.clone(),
                direction,
            }],
            None if keyword.is_empty() => vec![SortClause {
                field: date_field.clone(),
                direction: SortDirection::Desc,
            }],
            None => Vec::new(),
        };

        let mut ranges = BTreeMap::new();
        let bounds = RangeBounds {
            from: request
                .date_from
                .as_deref()
                .and_then(|d| normalize_date(d, false)),
            to: request
                .date_to
                .as_deref()
                .and_then(|d| normalize_date(d, true)),
        };
        if bounds.from.is_some() || bounds.to.is_some() {
            ranges.insert(date_field, bounds);
        }

        let size = match request.size {
            Some(size) if size > 0 => (size as usize).min(self.settings.max_page_size),
            _ => self.settings.default_page_size,
        };
        let offset = match request.offset {
            Some(offset) if offset > 0 => offset as usize,
            _ => 0,
        };

        CompiledQuery {
            must_match,
            filter_terms,
            exclude_terms,
            ranges,
            sort,
            size,
            offset,
            highlight_fields: self.settings.highlight_fields.clone(),
            fragment_size: self.settings.fragment_size,
            locale_scope: request
                .locale
                .clone()
                .filter(|locale| !locale.trim().is_empty()),
        }
    }
}

/// Collapse duplicate field names, ignoring `^boost` suffixes; first occurrence wins.
pub fn dedup_search_fields(fields: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    fields
        .iter()
        .filter(|field| {
            let name = field.split('^').next().unwrap_or_default().trim();
            !name.is_empty() && seen.insert(name.to_string())
        })
        .cloned()
        .collect()
}

/// Normalize `YYYY-MM-DD` or RFC 3339 input to the canonical UTC format.
///
/// Date-only upper bounds are widened to the last second of the day.
pub fn normalize_date(raw: &str, end_of_day: bool) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(datetime) = DateTime::parse_from_rfc3339(raw) {
        return Some(
            datetime
                .with_timezone(&Utc)
                .format(CANONICAL_DATE_FORMAT)
                .to_string(),
        );
    }

    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let datetime = if end_of_day {
        date.and_hms_opt(23, 59, 59)?
    } else {
        date.and_hms_opt(0, 0, 0)?
    };
    Some(datetime.and_utc().format(CANONICAL_DATE_FORMAT).to_string())
}

type TermSets = BTreeMap<String, Vec<String>>;

fn accumulate_filters(config: &ResolvedConfig, request: &SearchRequest) -> (TermSets, TermSets) {
    let mut selections = request.selected_filters.clone();
    for (filter, value) in &config.presets {
        selections.insert(filter.clone(), vec![value.clone()]);
    }

    let mut include: TermSets = BTreeMap::new();
    let mut exclude: TermSets = BTreeMap::new();

    for (name, values) in &selections {
        let Some(filter) = config.filter(name) else {
            tracing::debug!(filter = %name, "Ignoring unknown filter");
            continue;
        };

        for raw in values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
            match filter.option(raw) {
                Some(option) => {
                    push_unique(&mut include, &filter.field, &option.include_values);
                    push_unique(&mut exclude, &filter.field, &option.exclude_values);
                }
                None => push_unique(&mut include, &filter.field, &[raw.to_string()]),
            }
        }
    }

    // An explicit include on a field always wins over excludes on that field.
    for (field, excluded) in exclude.iter_mut() {
        if let Some(included) = include.get(field) {
            excluded.retain(|value| !included.contains(value));
            if !included.is_empty() {
                excluded.clear();
            }
        }
    }

    include.retain(|_, values| !values.is_empty());
    exclude.retain(|_, values| !values.is_empty());

    (include, exclude)
}

fn push_unique(target: &mut TermSets, field: &str, values: &[String]) {
    if values.is_empty() {
        return;
    }
    let entry = target.entry(field.to_string()).or_default();
    for value in values {
        if !entry.contains(value) {
            entry.push(value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::config::{FilterFieldConfig, OptionSpec, SearchPageConfig};
    use crate::search::resolver::{resolve, NoTags};

    fn resolved() -> ResolvedConfig {
        let mut type_filter = FilterFieldConfig {
            field: "type".to_string(),
            ..Default::default()
        };
        type_filter
            .options
            .insert("news".to_string(), OptionSpec::include("News", vec!["NewsArticle"]));
        type_filter
            .options
            .insert("events".to_string(), OptionSpec::include("Events", vec!["Event"]));
        type_filter.options.insert(
            "content".to_string(),
            OptionSpec::exclude("Content", vec!["NewsArticle", "Event"]),
        );

        let mut page = SearchPageConfig::default();
        page.filters.insert("type".to_string(), type_filter);
        resolve(&page, None, &NoTags)
    }

    fn compiler() -> QueryCompiler {
        QueryCompiler::new(SearchSettings {
            search_fields: vec![
                "title^3".to_string(),
                "content".to_string(),
                "title^5".to_string(),
                "keywords^2".to_string(),
                "content".to_string(),
            ],
            ..Default::default()
        })
    }

    #[test]
    fn test_duplicate_search_fields_collapse() {
        let query = compiler().compile(&resolved(), &SearchRequest::new("water"));
        let fields = query.must_match.unwrap().fields;
        assert_eq!(fields, vec!["title^3", "content", "keywords^2"]);
    }

    #[test]
    fn test_fuzziness_scales_with_term_length() {
        let fuzziness = Fuzziness::default();
        assert_eq!(fuzziness.max_edits("ab"), 0);
        assert_eq!(fuzziness.max_edits("park"), 1);
        assert_eq!(fuzziness.max_edits("regional"), 2);
        assert_eq!(fuzziness.as_backend_value(), "AUTO:3,6");
    }

    #[test]
    fn test_include_wins_over_exclude_on_same_field() {
        let request = SearchRequest::new("")
            .with_filter("type", "news")
            .with_filter("type", "content");
        let query = compiler().compile(&resolved(), &request);

        assert_eq!(query.filter_terms["type"], vec!["NewsArticle"]);
        assert!(!query.exclude_terms.contains_key("type"));

        let body = query.to_request_body();
        assert!(body["query"]["bool"].get("must_not").is_none());
        assert!(body["query"]["bool"]["filter"].is_array());
    }

    #[test]
    fn test_exclude_only_option() {
        let request = SearchRequest::new("").with_filter("type", "content");
        let query = compiler().compile(&resolved(), &request);

        assert!(query.filter_terms.is_empty());
        assert_eq!(query.exclude_terms["type"], vec!["NewsArticle", "Event"]);
    }

    #[test]
    fn test_unknown_option_is_literal_include() {
        let request = SearchRequest::new("").with_filter("type", "ParkPage");
        let query = compiler().compile(&resolved(), &request);
        assert_eq!(query.filter_terms["type"], vec!["ParkPage"]);
    }

    #[test]
    fn test_unknown_filter_is_ignored() {
        let request = SearchRequest::new("").with_filter("colour", "red");
        let query = compiler().compile(&resolved(), &request);
        assert!(query.filter_terms.is_empty());
    }

    #[test]
    fn test_default_sort_without_keyword() {
        let query = compiler().compile(&resolved(), &SearchRequest::new(""));
        assert_eq!(
            query.sort,
            vec![SortClause {
                field: "last_edited".to_string(),
                direction: SortDirection::Desc
            }]
        );
        assert_eq!(
            query.to_request_body()["sort"],
            json!([{ "last_edited": { "order": "desc" } }])
        );
    }

    #[test]
    fn test_keyword_without_sort_uses_relevance() {
        let query = compiler().compile(&resolved(), &SearchRequest::new("water"));
        assert!(query.sort.is_empty());
        assert!(query.to_request_body().get("sort").is_none());
    }

    #[test]
    fn test_explicit_sort_kept() {
        let request = SearchRequest::new("water").with_sort(SortDirection::Asc);
        let query = compiler().compile(&resolved(), &request);
        assert_eq!(query.sort[0].direction, SortDirection::Asc);
    }

    #[test]
    fn test_pagination_defaults() {
        let compiler = compiler();
        let config = resolved();

        assert_eq!(compiler.compile(&config, &SearchRequest::new("")).size, 50);
        assert_eq!(
            compiler.compile(&config, &SearchRequest::new("").with_size(0)).size,
            50
        );
        assert_eq!(
            compiler.compile(&config, &SearchRequest::new("").with_size(-4)).size,
            50
        );
        assert_eq!(
            compiler.compile(&config, &SearchRequest::new("").with_size(10)).size,
            10
        );
        assert_eq!(
            compiler
                .compile(&config, &SearchRequest::new("").with_offset(-1))
                .offset,
            0
        );
    }

    #[test]
    fn test_date_range_normalized_and_inclusive() {
        let request =
            SearchRequest::new("").with_date_range(Some("2024-01-01"), Some("2024-02-29"));
        let query = compiler().compile(&resolved(), &request);
        let bounds = &query.ranges["last_edited"];

        assert_eq!(bounds.from.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(bounds.to.as_deref(), Some("2024-02-29T23:59:59Z"));

        let body = query.to_request_body();
        let range = &body["query"]["bool"]["filter"][0]["range"]["last_edited"];
        assert_eq!(range["gte"], "2024-01-01T00:00:00Z");
        assert_eq!(range["lte"], "2024-02-29T23:59:59Z");
    }

    #[test]
    fn test_invalid_date_dropped() {
        let request = SearchRequest::new("").with_date_range(Some("yesterday"), None);
        let query = compiler().compile(&resolved(), &request);
        assert!(query.ranges.is_empty());
    }

    #[test]
    fn test_locale_scope_is_additive() {
        let request = SearchRequest::new("")
            .with_filter("type", "news")
            .with_locale("mi_NZ");
        let query = compiler().compile(&resolved(), &request);
        let filters = query.to_request_body()["query"]["bool"]["filter"].clone();

        assert_eq!(filters.as_array().unwrap().len(), 2);
        assert_eq!(filters[1], json!({ "term": { "locale": "mi_NZ" } }));
    }

    #[test]
    fn test_highlight_omitted_without_fields() {
        let compiler = QueryCompiler::new(SearchSettings {
            highlight_fields: Vec::new(),
            ..Default::default()
        });
        let body = compiler
            .compile(&resolved(), &SearchRequest::new("x"))
            .to_request_body();
        assert!(body.get("highlight").is_none());

        let body = QueryCompiler::new(SearchSettings::default())
            .compile(&resolved(), &SearchRequest::new("x"))
            .to_request_body();
        assert_eq!(body["highlight"]["fragment_size"], 150);
        assert!(body["highlight"]["fields"]["content"].is_object());
    }

    #[test]
    fn test_from_query_pairs() {
        let request = SearchRequest::from_query_pairs(vec![
            ("q", "events"),
            ("type", "news"),
            ("type[]", "events"),
            ("sort", "ASC"),
            ("dateFrom", "2024-01-01"),
            ("size", "abc"),
            ("offset", "20"),
        ]);

        assert_eq!(request.keyword, "events");
        assert_eq!(request.selected_filters["type"], vec!["news", "events"]);
        assert_eq!(request.sort_direction, Some(SortDirection::Asc));
        assert_eq!(request.date_from.as_deref(), Some("2024-01-01"));
        assert_eq!(request.size, None);
        assert_eq!(request.offset, Some(20));
    }

    #[test]
    fn test_empty_query_renders_match_all() {
        let compiler = QueryCompiler::new(SearchSettings::default());
        let mut query = compiler.compile(&resolved(), &SearchRequest::new(""));
        query.ranges.clear();
        assert_eq!(query.to_request_body()["query"], json!({ "match_all": {} }));
    }
}
