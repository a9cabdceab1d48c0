//! Search settings and the filter/facet configuration schema
//!
//! Two kinds of configuration live here:
//!
//! - [`SearchSettings`]: engine-side knobs (which fields are matched and
//!   highlighted, the date field, page sizes, summary length). Loaded from the
//!   application config.
//! - [`SearchPageConfig`] and [`ContextOverride`]: the declarative filter
//!   configuration shown to users, loaded from a YAML file. The field names
//!   follow the external JSON schema consumed by the front end.

use crate::search::error::{SearchError, SearchResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use validator::Validate;

/// Engine-side search settings
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SearchSettings {
    /// Fields matched by the keyword query, with optional `^boost` suffix
    #[serde(default = "default_search_fields")]
    pub search_fields: Vec<String>,

    /// Fields for which highlight fragments are requested
    #[serde(default = "default_highlight_fields")]
    pub highlight_fields: Vec<String>,

    /// Date field used for default sort and date ranges
    #[serde(default = "default_date_field")]
    pub date_field: String,

    /// Plain-text field used for summaries when no highlight is available
    #[serde(default = "default_content_field")]
    pub content_field: String,

    /// Page size when the request has none (or a non-positive one)
    #[serde(default = "default_page_size")]
    #[validate(range(min = 1))]
    pub default_page_size: usize,

    /// Upper bound for requested page sizes
    #[serde(default = "default_max_page_size")]
    #[validate(range(min = 1))]
    pub max_page_size: usize,

    /// Highlight fragment size in characters
    #[serde(default = "default_fragment_size")]
    pub fragment_size: usize,

    /// Target length of the plain-text summary fallback
    #[serde(default = "default_summary_length")]
    #[validate(range(min = 1))]
    pub summary_length: usize,

    /// Backend `type` value -> front-end type label
    #[serde(default)]
    pub type_labels: BTreeMap<String, String>,

    /// Locale used to scope queries when the site is localized
    #[serde(default)]
    pub locale: Option<String>,

    /// YAML file holding the filter configuration and search contexts
    #[serde(default)]
    pub filters_path: Option<PathBuf>,

    /// How long resolved filter configurations are cached
    #[serde(default = "default_resolved_cache_ttl")]
    pub resolved_cache_ttl_secs: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            search_fields: default_search_fields(),
            highlight_fields: default_highlight_fields(),
            date_field: default_date_field(),
            content_field: default_content_field(),
            default_page_size: default_page_size(),
            max_page_size: default_max_page_size(),
            fragment_size: default_fragment_size(),
            summary_length: default_summary_length(),
            type_labels: BTreeMap::new(),
            locale: None,
            filters_path: None,
            resolved_cache_ttl_secs: default_resolved_cache_ttl(),
        }
    }
}

/// Builder for SearchSettings
pub struct SearchSettingsBuilder {
    settings: SearchSettings,
}

impl SearchSettingsBuilder {
    pub fn new() -> Self {
        Self {
            settings: SearchSettings::default(),
        }
    }

    pub fn search_fields(mut self, fields: Vec<impl Into<String>>) -> Self {
        self.settings.search_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn highlight_fields(mut self, fields: Vec<impl Into<String>>) -> Self {
        self.settings.highlight_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn date_field(mut self, field: impl Into<String>) -> Self {
        self.settings.date_field = field.into();
        self
    }

    pub fn default_page_size(mut self, size: usize) -> Self {
        self.settings.default_page_size = size;
        self
    }

    pub fn summary_length(mut self, length: usize) -> Self {
        self.settings.summary_length = length;
        self
    }

    pub fn type_label(mut self, backend_type: impl Into<String>, label: impl Into<String>) -> Self {
        self.settings
            .type_labels
            .insert(backend_type.into(), label.into());
        self
    }

    pub fn locale(mut self, locale: impl Into<String>) -> Self {
        self.settings.locale = Some(locale.into());
        self
    }

    pub fn build(self) -> SearchSettings {
        self.settings
    }
}

impl Default for SearchSettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Values an option contributes when selected
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionSpec {
    /// Display name
    #[serde(default)]
    pub name: String,

    /// Values added to the include set of the filter's field
    #[serde(default, rename = "filter")]
    pub include_values: Vec<String>,

    /// Values added to the exclude set of the filter's field
    #[serde(default, rename = "filter:not")]
    pub exclude_values: Vec<String>,
}

impl OptionSpec {
    pub fn include(name: impl Into<String>, values: Vec<impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            include_values: values.into_iter().map(Into::into).collect(),
            exclude_values: Vec::new(),
        }
    }

    pub fn exclude(name: impl Into<String>, values: Vec<impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            include_values: Vec::new(),
            exclude_values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// One user-selectable filter dimension
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterFieldConfig {
    /// Backend field the filter applies to
    #[serde(default)]
    pub field: String,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub icon_class: Option<String>,

    #[serde(default)]
    pub placeholder: Option<String>,

    #[serde(default = "default_columns")]
    pub columns: u32,

    #[serde(default)]
    pub show_inline: bool,

    #[serde(default)]
    pub default: Option<String>,

    /// Static options keyed by option value
    #[serde(default)]
    pub options: BTreeMap<String, OptionSpec>,

    /// Tag source used to generate one option per distinct tag
    #[serde(default, rename = "tag")]
    pub tag_source: Option<String>,
}

/// A `{name, value}` choice rendered by the front end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub name: String,
    pub value: String,
}

/// Date sort/range control
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateFilterConfig {
    #[serde(default = "default_date_field")]
    pub field: String,

    #[serde(default)]
    pub placeholder: Option<String>,

    #[serde(default = "default_date_options")]
    pub options: Vec<ChoiceOption>,
}

impl Default for DateFilterConfig {
    fn default() -> Self {
        Self {
            field: default_date_field(),
            placeholder: None,
            options: default_date_options(),
        }
    }
}

/// Base filter/facet configuration of a search page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPageConfig {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub placeholder: Option<String>,

    #[serde(default = "default_heading_level")]
    pub heading_level: u8,

    #[serde(default)]
    pub filters: BTreeMap<String, FilterFieldConfig>,

    #[serde(default)]
    pub date: DateFilterConfig,

    #[serde(default = "default_true")]
    pub allow_empty_keyword: bool,

    #[serde(default)]
    pub secondary_search: bool,
}

impl Default for SearchPageConfig {
    fn default() -> Self {
        Self {
            labels: BTreeMap::new(),
            placeholder: None,
            heading_level: default_heading_level(),
            filters: BTreeMap::new(),
            date: DateFilterConfig::default(),
            allow_empty_keyword: true,
            secondary_search: false,
        }
    }
}

/// Partial override of a filter; `None` keeps the base value
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterFieldOverride {
    pub field: Option<String>,
    pub label: Option<String>,
    pub icon_class: Option<String>,
    pub placeholder: Option<String>,
    pub columns: Option<u32>,
    pub show_inline: Option<bool>,
    pub default: Option<String>,
    #[serde(default)]
    pub options: BTreeMap<String, OptionSpec>,
    #[serde(rename = "tag")]
    pub tag_source: Option<String>,
}

/// Partial override of the date control
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateFilterOverride {
    pub field: Option<String>,
    pub placeholder: Option<String>,
    pub options: Option<Vec<ChoiceOption>>,
}

/// Named per-search-context override
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextOverride {
    #[serde(default)]
    pub name: String,

    /// Filter name -> forced option value
    #[serde(default)]
    pub presets: BTreeMap<String, String>,

    #[serde(default)]
    pub filters: BTreeMap<String, FilterFieldOverride>,

    #[serde(default)]
    pub date: Option<DateFilterOverride>,
}

/// Contents of the filter configuration file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterFile {
    #[serde(flatten)]
    pub page: SearchPageConfig,

    #[serde(default)]
    pub contexts: BTreeMap<String, ContextOverride>,
}

impl FilterFile {
    /// Parse the YAML filter configuration
    pub fn from_yaml_str(yaml: &str) -> SearchResult<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| SearchError::Configuration(format!("Invalid filter configuration: {}", e)))
    }

    /// Load the filter configuration, falling back to an empty one when no path is set
    pub fn load(path: Option<&Path>) -> SearchResult<Self> {
        match path {
            Some(path) => {
                let yaml = std::fs::read_to_string(path).map_err(|e| {
                    SearchError::Configuration(format!(
                        "Failed to read filter configuration {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                Self::from_yaml_str(&yaml)
            }
            None => Ok(Self::default()),
        }
    }
}

fn default_search_fields() -> Vec<String> {
    vec![
        "title^3".to_string(),
        "keywords^2".to_string(),
        "content".to_string(),
    ]
}

fn default_highlight_fields() -> Vec<String> {
    vec!["content".to_string()]
}

fn default_date_field() -> String {
    "last_edited".to_string()
}

fn default_content_field() -> String {
    "content".to_string()
}

fn default_page_size() -> usize {
    50
}

fn default_max_page_size() -> usize {
    1000
}

fn default_fragment_size() -> usize {
    150
}

fn default_summary_length() -> usize {
    80
}

fn default_resolved_cache_ttl() -> u64 {
    60
}

fn default_columns() -> u32 {
    1
}

fn default_heading_level() -> u8 {
    2
}

fn default_true() -> bool {
    true
}

fn default_date_options() -> Vec<ChoiceOption> {
    [
        ("Most recent first", "desc"),
        ("Oldest first", "asc"),
        ("Select dates", "range"),
    ]
    .into_iter()
    .map(|(name, value)| ChoiceOption {
        name: name.to_string(),
        value: value.to_string(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const FILTERS_YAML: &str = r#"
labels:
  filtersHint: Refine your search results below.
filters:
  type:
    field: type
    placeholder: Type of content
    options:
      news:
        name: News
        filter: [NewsArticle]
      content:
        name: Content
        "filter:not": [NewsArticle, Event]
  topic:
    field: tags
    tag: topics
contexts:
  newsroom:
    name: newsroom
    presets:
      type: news
"#;

    #[test]
    fn test_filter_file_parsing() {
        let file = FilterFile::from_yaml_str(FILTERS_YAML).unwrap();

        let type_filter = &file.page.filters["type"];
        assert_eq!(type_filter.field, "type");
        assert_eq!(type_filter.options["news"].include_values, vec!["NewsArticle"]);
        assert_eq!(type_filter.options["content"].exclude_values.len(), 2);
        assert_eq!(file.page.filters["topic"].tag_source.as_deref(), Some("topics"));
        assert_eq!(file.contexts["newsroom"].presets["type"], "news");
        assert!(file.page.allow_empty_keyword);
    }

    #[test]
    fn test_settings_builder() {
        let settings = SearchSettingsBuilder::new()
            .search_fields(vec!["title", "content"])
            .default_page_size(20)
            .type_label("NewsArticle", "news")
            .build();

        assert_eq!(settings.search_fields.len(), 2);
        assert_eq!(settings.default_page_size, 20);
        assert_eq!(settings.type_labels["NewsArticle"], "news");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_missing_filter_file_path_gives_empty_config() {
        let file = FilterFile::load(None).unwrap();
        assert!(file.page.filters.is_empty());
        assert!(file.contexts.is_empty());
    }
}
