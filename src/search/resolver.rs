//! Filter configuration resolution
//!
//! Precedence, lowest to highest: base page config < context override < presets.
//! A preset forces a filter's selected value and hides that filter from the
//! user-facing list; the filter stays resolvable so the preset value can still
//! be compiled into the query.

use crate::search::config::{
    ContextOverride, DateFilterConfig, FilterFieldConfig, FilterFieldOverride, FilterFile,
    OptionSpec, SearchPageConfig,
};
use crate::search::text::slugify;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Lists distinct tag values for tag-sourced filters
pub trait TagProvider: Send + Sync {
    fn distinct_tags(&self, source: &str) -> Vec<String>;
}

/// Tag provider with no tags at all
pub struct NoTags;

impl TagProvider for NoTags {
    fn distinct_tags(&self, _source: &str) -> Vec<String> {
        Vec::new()
    }
}

impl TagProvider for BTreeMap<String, Vec<String>> {
    fn distinct_tags(&self, source: &str) -> Vec<String> {
        self.get(source).cloned().unwrap_or_default()
    }
}

/// A selectable option after resolution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedOption {
    pub name: String,
    pub value: String,
    #[serde(skip)]
    pub include_values: Vec<String>,
    #[serde(skip)]
    pub exclude_values: Vec<String>,
}

/// A filter after merging, preset handling and option generation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedFilter {
    pub name: String,
    #[serde(skip)]
    pub field: String,
    pub label: Option<String>,
    pub icon_class: Option<String>,
    pub placeholder: Option<String>,
    pub columns: u32,
    pub show_inline: bool,
    pub default: Option<String>,
    pub options: Vec<ResolvedOption>,
    #[serde(skip)]
    pub tag_source: Option<String>,
}

impl ResolvedFilter {
    pub fn option(&self, value: &str) -> Option<&ResolvedOption> {
        self.options.iter().find(|o| o.value == value)
    }
}

/// Filter configuration ready for query compilation and front-end rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    pub context: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub placeholder: Option<String>,
    pub heading_level: u8,
    /// User-facing filters
    pub filters: Vec<ResolvedFilter>,
    /// Filters hidden by presets, still used for compilation
    #[serde(skip)]
    pub preset_filters: Vec<ResolvedFilter>,
    pub presets: BTreeMap<String, String>,
    pub date: DateFilterConfig,
    pub allow_empty_keyword: bool,
    pub secondary_search: bool,
}

impl ResolvedConfig {
    /// Find a filter by name, including preset-hidden ones
    pub fn filter(&self, name: &str) -> Option<&ResolvedFilter> {
        self.filters
            .iter()
            .chain(self.preset_filters.iter())
            .find(|f| f.name == name)
    }
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        resolve(&SearchPageConfig::default(), None, &NoTags)
    }
}

/// Resolves named search contexts against a loaded filter file
#[derive(Clone)]
pub struct FilterConfigResolver {
    file: Arc<FilterFile>,
    tags: Arc<dyn TagProvider>,
}

impl FilterConfigResolver {
    pub fn new(file: FilterFile, tags: Arc<dyn TagProvider>) -> Self {
        Self {
            file: Arc::new(file),
            tags,
        }
    }

    /// Resolve for an optional context name.
    ///
    /// Unknown or blank context names resolve to the base configuration.
    pub fn resolve(&self, context: Option<&str>) -> ResolvedConfig {
        let context_override = context
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .and_then(|name| {
                let found = self.file.contexts.get(name);
                if found.is_none() {
                    debug!(context = name, "Unknown search context, using base configuration");
                }
                found
            });

        resolve(&self.file.page, context_override, self.tags.as_ref())
    }
}

/// Resolve a base configuration with an optional context override.
pub fn resolve(
    base: &SearchPageConfig,
    context: Option<&ContextOverride>,
    tags: &dyn TagProvider,
) -> ResolvedConfig {
    let merged = match context {
        Some(context) => merge_context(base, context),
        None => base.clone(),
    };
    let presets = context.map(|c| c.presets.clone()).unwrap_or_default();

    let mut filters = Vec::new();
    let mut preset_filters = Vec::new();

    for (name, config) in &merged.filters {
        let Some(filter) = resolve_filter(name, config, tags) else {
            debug!(filter = %name, "Dropping filter without options or tag source");
            continue;
        };

        if presets.contains_key(name) {
            preset_filters.push(filter);
        } else {
            filters.push(filter);
        }
    }

    ResolvedConfig {
        context: context
            .map(|c| c.name.clone())
            .filter(|name| !name.is_empty()),
        labels: merged.labels,
        placeholder: merged.placeholder,
        heading_level: merged.heading_level,
        filters,
        preset_filters,
        presets,
        date: merged.date,
        allow_empty_keyword: merged.allow_empty_keyword,
        secondary_search: merged.secondary_search,
    }
}

/// Deep-merge a context override into the base configuration; context values win per key.
pub fn merge_context(base: &SearchPageConfig, context: &ContextOverride) -> SearchPageConfig {
    let mut merged = base.clone();

    for (name, filter_override) in &context.filters {
        let filter = merged.filters.entry(name.clone()).or_default();
        merge_filter(filter, filter_override);
    }

    if let Some(date) = &context.date {
        if let Some(field) = &date.field {
            merged.date.field = field.clone();
        }
        if let Some(placeholder) = &date.placeholder {
            merged.date.placeholder = Some(placeholder.clone());
        }
        if let Some(options) = &date.options {
            merged.date.options = options.clone();
        }
    }

    merged
}

fn merge_filter(filter: &mut FilterFieldConfig, over: &FilterFieldOverride) {
    if let Some(field) = &over.field {
        filter.field = field.clone();
    }
    if let Some(label) = &over.label {
        filter.label = Some(label.clone());
    }
    if let Some(icon_class) = &over.icon_class {
        filter.icon_class = Some(icon_class.clone());
    }
    if let Some(placeholder) = &over.placeholder {
        filter.placeholder = Some(placeholder.clone());
    }
    if let Some(columns) = over.columns {
        filter.columns = columns;
    }
    if let Some(show_inline) = over.show_inline {
        filter.show_inline = show_inline;
    }
    if let Some(default) = &over.default {
        filter.default = Some(default.clone());
    }
    if let Some(tag_source) = &over.tag_source {
        filter.tag_source = Some(tag_source.clone());
    }
    for (value, option) in &over.options {
        filter.options.insert(value.clone(), option.clone());
    }
}

fn resolve_filter(
    name: &str,
    config: &FilterFieldConfig,
    tags: &dyn TagProvider,
) -> Option<ResolvedFilter> {
    let mut options = Vec::new();
    let mut seen = HashSet::new();

    if let Some(source) = &config.tag_source {
        let mut seen_tags = HashSet::new();
        for tag in tags.distinct_tags(source) {
            if !seen_tags.insert(tag.clone()) {
                continue;
            }
            let value = unique_slug(&tag, &mut seen);
            options.push(ResolvedOption {
                name: tag.clone(),
                value,
                include_values: vec![tag],
                exclude_values: Vec::new(),
            });
        }
    }

    for (value, spec) in &config.options {
        if !seen.insert(value.clone()) {
            continue;
        }
        options.push(static_option(value, spec));
    }

    if options.is_empty() && config.tag_source.is_none() {
        return None;
    }

    Some(ResolvedFilter {
        name: name.to_string(),
        field: if config.field.is_empty() {
            name.to_string()
        } else {
            config.field.clone()
        },
        label: config.label.clone(),
        icon_class: config.icon_class.clone(),
        placeholder: config.placeholder.clone(),
        columns: config.columns,
        show_inline: config.show_inline,
        default: config.default.clone(),
        options,
        tag_source: config.tag_source.clone(),
    })
}

/// Slug for a tag that no earlier option uses; collisions get a numeric suffix.
fn unique_slug(tag: &str, seen: &mut HashSet<String>) -> String {
    let mut base = slugify(tag);
    if base.is_empty() {
        base = "tag".to_string();
    }

    let mut value = base.clone();
    let mut n = 2;
    while !seen.insert(value.clone()) {
        value = format!("{}-{}", base, n);
        n += 1;
    }
    value
}

fn static_option(value: &str, spec: &OptionSpec) -> ResolvedOption {
    ResolvedOption {
        name: if spec.name.is_empty() {
            value.to_string()
        } else {
            spec.name.clone()
        },
        value: value.to_string(),
        include_values: spec.include_values.clone(),
        exclude_values: spec.exclude_values.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::config::DateFilterOverride;

    fn base_config() -> SearchPageConfig {
        let mut type_filter = FilterFieldConfig {
            field: "type".to_string(),
            placeholder: Some("Type of content".to_string()),
            ..Default::default()
        };
        type_filter
            .options
            .insert("news".to_string(), OptionSpec::include("News", vec!["NewsArticle"]));
        type_filter.options.insert(
            "content".to_string(),
            OptionSpec::exclude("Content", vec!["NewsArticle", "Event"]),
        );

        let topic_filter = FilterFieldConfig {
            field: "tags".to_string(),
            tag_source: Some("topics".to_string()),
            ..Default::default()
        };

        let empty_filter = FilterFieldConfig {
            field: "region".to_string(),
            ..Default::default()
        };

        let mut config = SearchPageConfig::default();
        config.filters.insert("type".to_string(), type_filter);
        config.filters.insert("topic".to_string(), topic_filter);
        config.filters.insert("region".to_string(), empty_filter);
        config
    }

    fn tags() -> BTreeMap<String, Vec<String>> {
        let mut tags = BTreeMap::new();
        tags.insert(
            "topics".to_string(),
            vec!["Water Quality".to_string(), "Parks & Trails".to_string()],
        );
        tags
    }

    #[test]
    fn test_filter_without_options_or_tag_source_is_dropped() {
        let resolved = resolve(&base_config(), None, &tags());
        assert!(resolved.filter("region").is_none());
        assert!(resolved.filter("type").is_some());
    }

    #[test]
    fn test_tag_options_use_slug_values() {
        let resolved = resolve(&base_config(), None, &tags());
        let topic = resolved.filter("topic").unwrap();
        let values: Vec<_> = topic.options.iter().map(|o| o.value.as_str()).collect();
        assert_eq!(values, vec!["water-quality", "parks-trails"]);
        assert_eq!(topic.options[0].include_values, vec!["Water Quality"]);
    }

    #[test]
    fn test_every_distinct_tag_gets_an_option() {
        let tags = BTreeMap::from([(
            "topics".to_string(),
            vec![
                "Café".to_string(),
                "Caf".to_string(),
                "日本".to_string(),
                "Māori".to_string(),
                "caf".to_string(),
                "!!!".to_string(),
                "Caf".to_string(),
            ],
        )]);

        let resolved = resolve(&base_config(), None, &tags);
        let topic = resolved.filter("topic").unwrap();
        let options: Vec<_> = topic
            .options
            .iter()
            .map(|o| (o.name.as_str(), o.value.as_str()))
            .collect();

        assert_eq!(
            options,
            vec![
                ("Café", "café"),
                ("Caf", "caf"),
                ("日本", "日本"),
                ("Māori", "māori"),
                ("caf", "caf-2"),
                ("!!!", "tag"),
            ]
        );
        assert_eq!(topic.option("caf-2").unwrap().include_values, vec!["caf"]);
    }

    #[test]
    fn test_tag_filter_kept_without_tags() {
        let resolved = resolve(&base_config(), None, &NoTags);
        let topic = resolved.filter("topic").unwrap();
        assert!(topic.options.is_empty());
    }

    #[test]
    fn test_context_override_wins_per_key() {
        let mut context = ContextOverride {
            name: "newsroom".to_string(),
            ..Default::default()
        };
        context.filters.insert(
            "type".to_string(),
            FilterFieldOverride {
                placeholder: Some("Kind".to_string()),
                options: BTreeMap::from([(
                    "news".to_string(),
                    OptionSpec::include("Media releases", vec!["MediaRelease"]),
                )]),
                ..Default::default()
            },
        );
        context.date = Some(DateFilterOverride {
            field: Some("published".to_string()),
            ..Default::default()
        });

        let resolved = resolve(&base_config(), Some(&context), &NoTags);
        let type_filter = resolved.filter("type").unwrap();

        assert_eq!(type_filter.placeholder.as_deref(), Some("Kind"));
        assert_eq!(type_filter.field, "type");
        assert_eq!(
            type_filter.option("news").unwrap().include_values,
            vec!["MediaRelease"]
        );
        assert!(type_filter.option("content").is_some());
        assert_eq!(resolved.date.field, "published");
        assert_eq!(resolved.context.as_deref(), Some("newsroom"));
    }

    #[test]
    fn test_presets_hide_filter_but_keep_it_resolvable() {
        let context = ContextOverride {
            name: "newsroom".to_string(),
            presets: BTreeMap::from([("type".to_string(), "news".to_string())]),
            ..Default::default()
        };

        let resolved = resolve(&base_config(), Some(&context), &NoTags);

        assert!(resolved.filters.iter().all(|f| f.name != "type"));
        assert!(resolved.filter("type").is_some());
        assert_eq!(resolved.presets["type"], "news");
    }

    #[test]
    fn test_unknown_or_blank_context_falls_back_to_base() {
        let file = FilterFile {
            page: base_config(),
            contexts: BTreeMap::from([(
                "newsroom".to_string(),
                ContextOverride {
                    name: "newsroom".to_string(),
                    presets: BTreeMap::from([("type".to_string(), "news".to_string())]),
                    ..Default::default()
                },
            )]),
        };
        let resolver = FilterConfigResolver::new(file, Arc::new(NoTags));

        let base = resolver.resolve(None);
        assert_eq!(resolver.resolve(Some("missing")), base);
        assert_eq!(resolver.resolve(Some("  ")), base);
        assert!(resolver.resolve(Some("newsroom")).presets.contains_key("type"));
    }
}
