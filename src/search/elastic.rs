//! Elasticsearch backend over HTTP

use crate::search::backend::{
    BulkItemError, BulkResponse, HighlightMap, RawHit, SearchBackend, SearchHits,
};
use crate::search::document::IndexableDocument;
use crate::search::error::{SearchError, SearchResult};
use crate::search::query::CompiledQuery;
use async_trait::async_trait;
use base64ct::{Base64, Encoding};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, warn};

/// Ingest pipeline applied when documents carry file attachments
pub const ATTACHMENT_PIPELINE: &str = "attachment";

/// Connection settings for the HTTP backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElasticSettings {
    /// Explicit endpoint, e.g. `http://localhost:9200`
    #[serde(default)]
    pub url: Option<String>,

    /// Elastic Cloud id; used when no explicit URL is set
    #[serde(default)]
    pub cloud_id: Option<String>,

    #[serde(default)]
    pub index: Option<String>,

    #[serde(default)]
    pub api_id: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl ElasticSettings {
    /// Fill unset values from the `ELASTIC_*` environment variables
    pub fn with_env_fallback(mut self) -> Self {
        fn env(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.trim().is_empty())
        }

        self.url = self.url.or_else(|| env("ELASTIC_URL"));
        self.cloud_id = self.cloud_id.or_else(|| env("ELASTIC_CLOUD_ID"));
        self.index = self.index.or_else(|| env("ELASTIC_INDEX"));
        self.api_id = self.api_id.or_else(|| env("ELASTIC_API_ID"));
        self.api_key = self.api_key.or_else(|| env("ELASTIC_API_KEY"));
        self.username = self.username.or_else(|| env("ELASTIC_USERNAME"));
        self.password = self.password.or_else(|| env("ELASTIC_PASSWORD"));
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout_secs();
        }
        self
    }
}

#[derive(Debug, Clone)]
enum Credentials {
    ApiKey(String),
    Basic { username: String, password: String },
}

/// [`SearchBackend`] talking to an Elasticsearch cluster
#[derive(Clone)]
pub struct ElasticBackend {
    client: Client,
    endpoint: String,
    index: String,
    credentials: Credentials,
}

impl ElasticBackend {
    /// Build a backend, failing on missing endpoint, index or credentials
    pub fn new(settings: &ElasticSettings) -> SearchResult<Self> {
        let endpoint = match (&settings.url, &settings.cloud_id) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, Some(cloud_id)) => decode_cloud_id(cloud_id)?,
            (None, None) => {
                return Err(SearchError::Configuration(
                    "Either a backend URL or ELASTIC_CLOUD_ID must be set".to_string(),
                ))
            }
        };

        let index = settings
            .index
            .clone()
            .filter(|index| !index.trim().is_empty())
            .ok_or_else(|| {
                SearchError::Configuration("ELASTIC_INDEX must be set".to_string())
            })?;

        let credentials = match (
            &settings.api_id,
            &settings.api_key,
            &settings.username,
            &settings.password,
        ) {
            (Some(id), Some(key), _, _) => {
                Credentials::ApiKey(Base64::encode_string(format!("{}:{}", id, key).as_bytes()))
            }
            (_, _, Some(username), Some(password)) => Credentials::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            _ => {
                return Err(SearchError::Configuration(
                    "Set ELASTIC_API_ID and ELASTIC_API_KEY, or ELASTIC_USERNAME and ELASTIC_PASSWORD"
                        .to_string(),
                ))
            }
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .map_err(|e| {
                SearchError::Configuration(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            endpoint,
            index,
            credentials,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Credentials::ApiKey(encoded) => {
                request.header("Authorization", format!("ApiKey {}", encoded))
            }
            Credentials::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        }
    }

    fn doc_url(&self, id: &str) -> String {
        format!("{}/{}/_doc/{}", self.endpoint, self.index, id)
    }
}

#[async_trait]
impl SearchBackend for ElasticBackend {
    fn name(&self) -> &'static str {
        "elasticsearch"
    }

    fn index_name(&self) -> &str {
        &self.index
    }

    async fn search(&self, query: &CompiledQuery) -> SearchResult<SearchHits> {
        let url = format!("{}/{}/_search", self.endpoint, self.index);
        let body = query.to_request_body();
        debug!(url = %url, "Executing search request");

        let response = self
            .authorize(self.client.post(&url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SearchError::Backend(format!(
                "Search returned status {}: {}",
                status, text
            )));
        }

        let parsed: SearchResponseBody = serde_json::from_str(&text)
            .map_err(|e| SearchError::Backend(format!("Malformed search response: {}", e)))?;

        Ok(SearchHits {
            total: parsed.hits.total.value(),
            hits: parsed
                .hits
                .hits
                .into_iter()
                .map(|hit| RawHit {
                    id: hit.id,
                    source: hit.source,
                    highlight: hit.highlight,
                })
                .collect(),
        })
    }

    async fn bulk_upsert(&self, documents: &[IndexableDocument]) -> SearchResult<BulkResponse> {
        if documents.is_empty() {
            return Ok(BulkResponse::success(0));
        }

        let mut url = format!("{}/_bulk", self.endpoint);
        if documents.iter().any(IndexableDocument::has_attachment) {
            url.push_str(&format!("?pipeline={}", ATTACHMENT_PIPELINE));
        }

        let body = bulk_body(&self.index, documents)?;
        let response = self
            .authorize(self.client.post(&url))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SearchError::Backend(format!(
                "Bulk request returned status {}: {}",
                status, text
            )));
        }

        let parsed: BulkResponseBody = serde_json::from_str(&text)
            .map_err(|e| SearchError::Backend(format!("Malformed bulk response: {}", e)))?;

        let failures: Vec<BulkItemError> = parsed
            .items
            .iter()
            .filter_map(|item| item.values().next())
            .filter_map(|result| {
                result.error.as_ref().map(|error| BulkItemError {
                    id: result.id.clone().unwrap_or_default(),
                    status: result.status,
                    reason: error.describe(),
                })
            })
            .collect();

        if parsed.errors {
            warn!(
                index = %self.index,
                failed = failures.len(),
                "Bulk request reported item failures"
            );
        }

        Ok(BulkResponse {
            errors: parsed.errors,
            items: documents.len(),
            failures,
        })
    }

    async fn put_document(&self, document: &IndexableDocument) -> SearchResult<()> {
        let mut url = self.doc_url(&document.id);
        if document.has_attachment() {
            url.push_str(&format!("?pipeline={}", ATTACHMENT_PIPELINE));
        }

        let response = self
            .authorize(self.client.put(&url))
            .json(&document.payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SearchError::IndexingFailed(format!(
                "Indexing {} returned status {}: {}",
                document.id, status, text
            )));
        }
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> SearchResult<()> {
        let response = self
            .authorize(self.client.delete(self.doc_url(id)))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        Err(SearchError::DeletionFailed(format!(
            "Deleting {} returned status {}: {}",
            id, status, text
        )))
    }
}

/// Decode an Elastic Cloud id (`name:base64(host$es_uuid$kibana_uuid)`) into an HTTPS endpoint
pub fn decode_cloud_id(cloud_id: &str) -> SearchResult<String> {
    let invalid = |reason: &str| SearchError::Configuration(format!("Invalid cloud id: {}", reason));

    let encoded = match cloud_id.split_once(':') {
        Some((_, encoded)) => encoded,
        None => cloud_id,
    };
    let decoded = Base64::decode_vec(encoded.trim()).map_err(|_| invalid("not base64"))?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid("not utf-8"))?;

    let mut parts = decoded.split('$');
    let host = parts.next().filter(|h| !h.is_empty()).ok_or_else(|| invalid("missing host"))?;
    let es_uuid = parts
        .next()
        .filter(|u| !u.is_empty())
        .ok_or_else(|| invalid("missing cluster id"))?;

    let (host, port) = match host.split_once(':') {
        Some((host, port)) => (host, port),
        None => (host, "443"),
    };

    Ok(format!("https://{}.{}:{}", es_uuid, host, port))
}

fn bulk_body(index: &str, documents: &[IndexableDocument]) -> SearchResult<String> {
    let mut body = String::new();
    for document in documents {
        let action = serde_json::json!({ "index": { "_index": index, "_id": document.id } });
        body.push_str(&action.to_string());
        body.push('\n');
        let source = serde_json::to_string(&document.payload).map_err(|e| {
            SearchError::IndexingFailed(format!("Failed to encode {}: {}", document.id, e))
        })?;
        body.push_str(&source);
        body.push('\n');
    }
    Ok(body)
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize)]
struct SearchResponseBody {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    total: TotalHits,
    #[serde(default)]
    hits: Vec<HitBody>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Count(u64),
    Object { value: u64 },
}

impl Default for TotalHits {
    fn default() -> Self {
        TotalHits::Count(0)
    }
}

impl TotalHits {
    fn value(&self) -> u64 {
        match self {
            TotalHits::Count(value) | TotalHits::Object { value } => *value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct HitBody {
    #[serde(rename = "_id", default)]
    id: String,
    #[serde(rename = "_source", default)]
    source: Map<String, Value>,
    #[serde(default)]
    highlight: HighlightMap,
}

#[derive(Debug, Deserialize)]
struct BulkResponseBody {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<std::collections::BTreeMap<String, BulkItemResult>>,
}

#[derive(Debug, Deserialize)]
struct BulkItemResult {
    #[serde(rename = "_id", default)]
    id: Option<String>,
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<BulkErrorBody>,
}

#[derive(Debug, Deserialize)]
struct BulkErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    reason: String,
}

impl BulkErrorBody {
    fn describe(&self) -> String {
        match (self.kind.is_empty(), self.reason.is_empty()) {
            (false, false) => format!("{}: {}", self.kind, self.reason),
            (false, true) => self.kind.clone(),
            _ => self.reason.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> ElasticSettings {
        ElasticSettings {
            url: Some("http://localhost:9200/".to_string()),
            index: Some("site".to_string()),
            api_id: Some("id".to_string()),
            api_key: Some("key".to_string()),
            timeout_secs: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_cloud_id() {
        let encoded = Base64::encode_string(b"eu-west-1.aws.found.io$abc123$kib456");
        let endpoint = decode_cloud_id(&format!("my-deployment:{}", encoded)).unwrap();
        assert_eq!(endpoint, "https://abc123.eu-west-1.aws.found.io:443");

        let encoded = Base64::encode_string(b"example.com:9243$cluster$kibana");
        let endpoint = decode_cloud_id(&format!("name:{}", encoded)).unwrap();
        assert_eq!(endpoint, "https://cluster.example.com:9243");
    }

    #[test]
    fn test_invalid_cloud_id() {
        assert!(matches!(
            decode_cloud_id("name:%%%"),
            Err(SearchError::Configuration(_))
        ));
        let encoded = Base64::encode_string(b"hostonly");
        assert!(decode_cloud_id(&encoded).is_err());
    }

    #[test]
    fn test_backend_construction() {
        let backend = ElasticBackend::new(&settings()).unwrap();
        assert_eq!(backend.endpoint(), "http://localhost:9200");
        assert_eq!(backend.index_name(), "site");
    }

    #[test]
    fn test_missing_index_is_configuration_error() {
        let settings = ElasticSettings {
            index: None,
            ..settings()
        };
        assert!(matches!(
            ElasticBackend::new(&settings),
            Err(SearchError::Configuration(_))
        ));
    }

    #[test]
    fn test_missing_credentials_is_configuration_error() {
        let settings = ElasticSettings {
            api_id: None,
            api_key: None,
            ..settings()
        };
        assert!(matches!(
            ElasticBackend::new(&settings),
            Err(SearchError::Configuration(_))
        ));

        let settings = ElasticSettings {
            username: Some("elastic".to_string()),
            password: Some("changeme".to_string()),
            ..settings
        };
        assert!(ElasticBackend::new(&settings).is_ok());
    }

    #[test]
    fn test_bulk_body_is_ndjson_pairs() {
        let mut payload = Map::new();
        payload.insert("title".to_string(), Value::String("Hello".to_string()));
        let documents = vec![IndexableDocument {
            id: "g1-en_NZ".to_string(),
            payload,
        }];

        let body = bulk_body("site", &documents).unwrap();
        let lines: Vec<_> = body.lines().collect();

        assert_eq!(lines.len(), 2);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_index"], "site");
        assert_eq!(action["index"]["_id"], "g1-en_NZ");
        let source: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(source["title"], "Hello");
        assert!(body.ends_with('\n'));
    }
}
