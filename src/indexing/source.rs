//! Record sources enumerated by the reindex job

use crate::indexing::error::{IndexingError, IndexingResult};
use crate::search::{ContentRecord, TagProvider};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Supplies content records grouped by class and locale.
///
/// Implementations must page in a stable order: `fetch` with the same
/// offset and limit returns the same records as long as the underlying
/// data is unchanged.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Content classes to index, in indexing order
    async fn content_classes(&self) -> IndexingResult<Vec<String>>;

    /// Number of records of `class`, restricted to `locale` when given
    async fn count(&self, class: &str, locale: Option<&str>) -> IndexingResult<usize>;

    /// A page of records of `class`, restricted to `locale` when given
    async fn fetch(
        &self,
        class: &str,
        locale: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> IndexingResult<Vec<ContentRecord>>;

    /// Give `record` a new stable identifier and persist it
    async fn assign_guid(&self, record: &mut ContentRecord) -> IndexingResult<String>;
}

/// Record source backed by an in-memory list, optionally loaded from JSON
#[derive(Clone, Default)]
pub struct StaticRecordSource {
    records: Arc<RwLock<Vec<ContentRecord>>>,
}

impl StaticRecordSource {
    pub fn new(records: Vec<ContentRecord>) -> Self {
        let source = Self::default();
        source.replace(records);
        source
    }

    /// Load records from a JSON array file
    pub async fn load(path: impl AsRef<Path>) -> IndexingResult<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            IndexingError::Source(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let records: Vec<ContentRecord> = serde_json::from_str(&raw)?;
        info!(path = %path.display(), records = records.len(), "Loaded content records");
        Ok(Self::new(records))
    }

    /// Replace all records
    pub fn replace(&self, mut records: Vec<ContentRecord>) {
        records.sort_by(|a, b| {
            (&a.class, a.id, &a.locale).cmp(&(&b.class, b.id, &b.locale))
        });
        *self.records.write() = records;
    }

    /// Insert or replace one record, keyed by class, id and locale
    pub fn upsert(&self, record: ContentRecord) {
        let mut records = self.records.write();
        match records.iter_mut().find(|r| same_record(r, &record)) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
        records.sort_by(|a, b| {
            (&a.class, a.id, &a.locale).cmp(&(&b.class, b.id, &b.locale))
        });
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    /// Snapshot of all records
    pub fn records(&self) -> Vec<ContentRecord> {
        self.records.read().clone()
    }
}

#[async_trait]
impl RecordSource for StaticRecordSource {
    async fn content_classes(&self) -> IndexingResult<Vec<String>> {
        let classes: BTreeSet<String> = self
            .records
            .read()
            .iter()
            .map(|r| r.class.clone())
            .collect();
        Ok(classes.into_iter().collect())
    }

    async fn count(&self, class: &str, locale: Option<&str>) -> IndexingResult<usize> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| in_group(r, class, locale))
            .count())
    }

    async fn fetch(
        &self,
        class: &str,
        locale: Option<&str>,
        offset: usize,
        limit: usize,
    ) -> IndexingResult<Vec<ContentRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| in_group(r, class, locale))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn assign_guid(&self, record: &mut ContentRecord) -> IndexingResult<String> {
        let guid = Uuid::new_v4().to_string();
        record.guid = Some(guid.clone());

        // The GUID identifies the record across locales
        let mut records = self.records.write();
        for stored in records
            .iter_mut()
            .filter(|r| r.class == record.class && r.id == record.id && r.guid.is_none())
        {
            stored.guid = Some(guid.clone());
        }
        Ok(guid)
    }
}

/// Tags come from the record's `tags` list when `source` is "tags", otherwise
/// from the extra field named `source`, which may hold a string or an array.
impl TagProvider for StaticRecordSource {
    fn distinct_tags(&self, source: &str) -> Vec<String> {
        let records = self.records.read();
        let tags: BTreeSet<String> = records
            .iter()
            .flat_map(|r| record_tags(r, source))
            .filter(|tag| !tag.trim().is_empty())
            .collect();
        tags.into_iter().collect()
    }
}

fn record_tags(record: &ContentRecord, source: &str) -> Vec<String> {
    if source == "tags" {
        return record.tags.clone();
    }
    match record.extra.get(source) {
        Some(Value::String(tag)) => vec![tag.clone()],
        Some(Value::Array(values)) => values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn in_group(record: &ContentRecord, class: &str, locale: Option<&str>) -> bool {
    record.class == class && locale.map_or(true, |l| record.locale.as_deref() == Some(l))
}

fn same_record(a: &ContentRecord, b: &ContentRecord) -> bool {
    a.class == b.class && a.id == b.id && a.locale == b.locale
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(class: &str, id: u64, locale: Option<&str>) -> ContentRecord {
        let mut record = ContentRecord::new(class, id, format!("{} {}", class, id));
        record.locale = locale.map(str::to_string);
        record
    }

    #[tokio::test]
    async fn test_stable_paging_order() {
        let source = StaticRecordSource::new(vec![
            record("Page", 3, None),
            record("NewsArticle", 2, None),
            record("Page", 1, None),
            record("Page", 2, None),
        ]);

        assert_eq!(
            source.content_classes().await.unwrap(),
            vec!["NewsArticle".to_string(), "Page".to_string()]
        );
        assert_eq!(source.count("Page", None).await.unwrap(), 3);

        let page: Vec<u64> = source
            .fetch("Page", None, 1, 5)
            .await
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(page, vec![2, 3]);
    }

    #[tokio::test]
    async fn test_locale_groups() {
        let source = StaticRecordSource::new(vec![
            record("Page", 1, Some("en_NZ")),
            record("Page", 1, Some("mi_NZ")),
            record("Page", 2, Some("en_NZ")),
        ]);

        assert_eq!(source.count("Page", Some("en_NZ")).await.unwrap(), 2);
        assert_eq!(source.count("Page", Some("mi_NZ")).await.unwrap(), 1);
        assert_eq!(source.count("Page", None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_assign_guid_is_persisted_for_all_locales() {
        let source = StaticRecordSource::new(vec![
            record("Page", 1, Some("en_NZ")),
            record("Page", 1, Some("mi_NZ")),
        ]);

        let mut first = source.fetch("Page", Some("en_NZ"), 0, 1).await.unwrap().remove(0);
        let guid = source.assign_guid(&mut first).await.unwrap();
        assert_eq!(first.guid.as_deref(), Some(guid.as_str()));

        let stored = source.records();
        assert!(stored.iter().all(|r| r.guid.as_deref() == Some(guid.as_str())));
    }

    #[tokio::test]
    async fn test_load_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.json");
        std::fs::write(
            &path,
            r#"[{"class": "Page", "id": 1, "title": "Home", "last_edited": "2024-01-01T00:00:00Z"}]"#,
        )
        .unwrap();

        let source = StaticRecordSource::load(&path).await.unwrap();
        assert_eq!(source.len(), 1);
        assert!(source.records()[0].show_in_search);
    }

    #[test]
    fn test_distinct_tags() {
        let mut a = record("Page", 1, None);
        a.tags = vec!["parks".to_string(), "events".to_string()];
        let mut b = record("Page", 2, None);
        b.tags = vec!["parks".to_string()];

        let source = StaticRecordSource::new(vec![a, b]);
        assert_eq!(source.distinct_tags("tags"), vec!["events", "parks"]);
    }

    #[test]
    fn test_tag_filters_read_their_own_source() {
        use crate::search::{FilterConfigResolver, FilterFile};

        let mut a = record("Page", 1, None);
        a.tags = vec!["parks".to_string()];
        a.extra
            .insert("suburb".to_string(), Value::String("Te Aro".to_string()));
        let mut b = record("Page", 2, None);
        b.tags = vec!["events".to_string()];
        b.extra.insert(
            "suburb".to_string(),
            serde_json::json!(["Kelburn", "Te Aro", 7]),
        );

        let source = StaticRecordSource::new(vec![a, b]);
        assert_eq!(source.distinct_tags("suburb"), vec!["Kelburn", "Te Aro"]);
        assert!(source.distinct_tags("missing").is_empty());

        let yaml = r#"
filters:
  topic:
    field: tags
    tag: tags
  suburb:
    field: suburb
    tag: suburb
"#;
        let resolver =
            FilterConfigResolver::new(FilterFile::from_yaml_str(yaml).unwrap(), Arc::new(source));
        let config = resolver.resolve(None);

        let values = |name: &str| -> Vec<String> {
            config
                .filter(name)
                .unwrap()
                .options
                .iter()
                .map(|o| o.value.clone())
                .collect()
        };
        assert_eq!(values("topic"), vec!["events", "parks"]);
        assert_eq!(values("suburb"), vec!["kelburn", "te-aro"]);
    }
}
