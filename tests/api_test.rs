//! HTTP API tests driven through the router without binding a socket

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use serde_json::Value;
use site_search::{
    api::{build_router, AppState},
    indexing::{JobHost, MemoryStateStore, ReindexJob, StaticRecordSource},
    search::*,
};
use std::sync::Arc;
use tower::ServiceExt;

const FILTERS: &str = r#"
filters:
  type:
    field: type
    options:
      news:
        name: News
        filter: [NewsArticle]
contexts:
  newsroom:
    name: newsroom
    presets:
      type: news
"#;

fn record(id: u64, title: &str) -> ContentRecord {
    let mut record = ContentRecord::new("NewsArticle", id, title);
    record.guid = Some(format!("guid-{}", id));
    record.content = format!("<p>{} in the park.</p>", title);
    record.url = format!("/news/{}", id);
    record
}

fn backend() -> Arc<dyn SearchBackend> {
    Arc::new(EmbeddedBackend::new(&EmbeddedSettings::default()).unwrap())
}

fn service(backend: Arc<dyn SearchBackend>) -> Arc<SearchService> {
    let filters = FilterFile::from_yaml_str(FILTERS).unwrap();
    Arc::new(SearchService::new(
        backend,
        FilterConfigResolver::new(filters, Arc::new(NoTags)),
        SearchSettingsBuilder::new()
            .type_label("NewsArticle", "news")
            .build(),
    ))
}

async fn get(app: Router, uri: &str) -> (StatusCode, header::HeaderMap, Vec<u8>) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body.to_vec())
}

fn json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    let app = build_router(AppState::new(service(backend())));

    let (status, _, body) = get(app.clone(), "/health").await;
    assert_eq!(status, StatusCode::OK);

    let body = json(&body);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["backend"], "embedded");

    let (status, _, _) = get(app, "/health/live").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_search_returns_results_with_no_cache_header() {
    let backend = backend();
    let service = service(backend.clone());
    service.index_record(&record(1, "Summer events")).await.unwrap();
    service.index_record(&record(2, "Winter lights")).await.unwrap();

    let app = build_router(AppState::new(service));
    let (status, headers, body) = get(app, "/search?q=summer&type=news").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get(header::CACHE_CONTROL).unwrap(),
        "no-cache, no-store, must-revalidate"
    );

    let body = json(&body);
    assert_eq!(body["meta"]["count"], 1);
    assert_eq!(body["results"][0]["title"], "Summer events");
    assert_eq!(body["results"][0]["url"], "/news/1");
}

#[tokio::test]
async fn test_search_on_empty_index() {
    let app = build_router(AppState::new(service(backend())));

    let (status, _, body) = get(app, "/search").await;
    assert_eq!(status, StatusCode::OK);

    let body = json(&body);
    assert_eq!(body["meta"]["count"], 0);
    assert!(body["results"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_search_config_for_context() {
    let app = build_router(AppState::new(service(backend())));

    let (status, headers, body) = get(app, "/search/config?context=newsroom").await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers.get(header::CACHE_CONTROL).is_some());

    let body = json(&body);
    assert_eq!(body["context"], "newsroom");
    assert_eq!(body["presets"]["type"], "news");
    assert!(body["filters"]
        .as_array()
        .unwrap()
        .iter()
        .all(|f| f["name"] != "type"));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let state = AppState::new(service(backend()));

    let (status, _, body) = get(build_router(state.clone()), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(String::from_utf8(body).is_ok());

    let (status, _, _) = get(build_router(state.with_metrics(false)), "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reindex_status_without_host_is_not_found() {
    let app = build_router(AppState::new(service(backend())));

    let (status, _, _) = get(app, "/reindex/status").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reindex_status_reports_progress() {
    let backend = backend();
    let source = StaticRecordSource::new(vec![record(1, "Summer events")]);
    let job = ReindexJob::new(Arc::new(source), backend.clone(), DocumentBatcher::new(500));
    let host = Arc::new(JobHost::new(job, Arc::new(MemoryStateStore::new())));
    let state = AppState::new(service(backend)).with_reindex(host.clone());

    let (status, _, body) = get(build_router(state.clone()), "/reindex/status").await;
    assert_eq!(status, StatusCode::OK);
    let body = json(&body);
    assert_eq!(body["title"], "Bulk Search Index");
    assert!(body["status"].is_null());

    host.tick(Utc::now()).await.unwrap();

    let (status, _, body) = get(build_router(state), "/reindex/status").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json(&body)["nextStart"].is_string());
}
