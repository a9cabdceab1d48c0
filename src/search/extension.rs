//! Extension points
//!
//! Callers register zero or more collaborators per point. Each list runs in
//! ascending `priority()` order (lower runs first; ties keep registration order).

use crate::search::backend::HighlightMap;
use crate::search::document::ContentRecord;
use crate::search::projector::SearchResultItem;
use crate::search::query::{CompiledQuery, SearchRequest};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Adjusts a compiled query before it is sent to the backend
pub trait QueryHook: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn adjust(&self, request: &SearchRequest, query: &mut CompiledQuery);

    fn priority(&self) -> u32 {
        100
    }
}

/// Enriches or overrides a projected result row
pub trait ResultEnricher: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn enrich(
        &self,
        source: &Map<String, Value>,
        item: &mut SearchResultItem,
        highlight: &HighlightMap,
    );

    fn priority(&self) -> u32 {
        100
    }
}

/// Adds or rewrites fields of a record's search payload at indexing time
pub trait DocumentHook: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn update_search_data(&self, record: &ContentRecord, payload: &mut Map<String, Value>);

    fn priority(&self) -> u32 {
        100
    }
}

/// Registered extension collaborators
#[derive(Clone, Default)]
pub struct Extensions {
    query_hooks: Vec<Arc<dyn QueryHook>>,
    result_enrichers: Vec<Arc<dyn ResultEnricher>>,
    document_hooks: Vec<Arc<dyn DocumentHook>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_query_hook(&mut self, hook: Arc<dyn QueryHook>) {
        self.query_hooks.push(hook);
        self.query_hooks.sort_by_key(|h| h.priority());
    }

    pub fn register_result_enricher(&mut self, enricher: Arc<dyn ResultEnricher>) {
        self.result_enrichers.push(enricher);
        self.result_enrichers.sort_by_key(|e| e.priority());
    }

    pub fn register_document_hook(&mut self, hook: Arc<dyn DocumentHook>) {
        self.document_hooks.push(hook);
        self.document_hooks.sort_by_key(|h| h.priority());
    }

    pub fn with_result_enricher(mut self, enricher: Arc<dyn ResultEnricher>) -> Self {
        self.register_result_enricher(enricher);
        self
    }

    pub fn with_query_hook(mut self, hook: Arc<dyn QueryHook>) -> Self {
        self.register_query_hook(hook);
        self
    }

    pub fn with_document_hook(mut self, hook: Arc<dyn DocumentHook>) -> Self {
        self.register_document_hook(hook);
        self
    }

    pub fn adjust_query(&self, request: &SearchRequest, query: &mut CompiledQuery) {
        for hook in &self.query_hooks {
            hook.adjust(request, query);
        }
    }

    pub fn enrich_result(
        &self,
        source: &Map<String, Value>,
        item: &mut SearchResultItem,
        highlight: &HighlightMap,
    ) {
        for enricher in &self.result_enrichers {
            enricher.enrich(source, item, highlight);
        }
    }

    pub fn update_search_data(&self, record: &ContentRecord, payload: &mut Map<String, Value>) {
        for hook in &self.document_hooks {
            hook.update_search_data(record, payload);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.query_hooks.is_empty()
            && self.result_enrichers.is_empty()
            && self.document_hooks.is_empty()
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = |hooks: Vec<&str>| hooks.join(",");
        f.debug_struct("Extensions")
            .field(
                "query_hooks",
                &names(self.query_hooks.iter().map(|h| h.name()).collect()),
            )
            .field(
                "result_enrichers",
                &names(self.result_enrichers.iter().map(|e| e.name()).collect()),
            )
            .field(
                "document_hooks",
                &names(self.document_hooks.iter().map(|h| h.name()).collect()),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Tagger {
        name: &'static str,
        priority: u32,
    }

    impl ResultEnricher for Tagger {
        fn name(&self) -> &str {
            self.name
        }

        fn enrich(&self, _source: &Map<String, Value>, item: &mut SearchResultItem, _: &HighlightMap) {
            item.title.push_str(self.name);
        }

        fn priority(&self) -> u32 {
            self.priority
        }
    }

    #[test]
    fn test_enrichers_run_in_priority_order() {
        let extensions = Extensions::new()
            .with_result_enricher(Arc::new(Tagger { name: "b", priority: 50 }))
            .with_result_enricher(Arc::new(Tagger { name: "c", priority: 100 }))
            .with_result_enricher(Arc::new(Tagger { name: "a", priority: 10 }));

        let mut item = SearchResultItem::default();
        extensions.enrich_result(&Map::new(), &mut item, &HighlightMap::new());
        assert_eq!(item.title, "abc");
    }

    struct Region;

    impl DocumentHook for Region {
        fn name(&self) -> &str {
            "region"
        }

        fn update_search_data(&self, record: &ContentRecord, payload: &mut Map<String, Value>) {
            payload.insert("region".to_string(), json!(record.class.to_lowercase()));
        }
    }

    #[test]
    fn test_document_hook_updates_payload() {
        let extensions = Extensions::new().with_document_hook(Arc::new(Region));
        let record = ContentRecord::new("Park", 1, "Botanic Garden");
        let mut payload = Map::new();
        extensions.update_search_data(&record, &mut payload);
        assert_eq!(payload["region"], "park");
        assert!(!extensions.is_empty());
    }
}
