//! Integration tests for the search client.
//!
//! These tests run the client against a mock HTTP server.

use std::time::{Duration, Instant};

use booru_sync::client::{
    Filters, RemoteServiceError, SearchBackend, SearchClient, SearchClientConfig, SearchParams,
    SortDirection, SortField,
};
use serde_json::json;
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, max_connections: usize) -> SearchClient {
    SearchClient::new(SearchClientConfig {
        base_url: server.uri(),
        max_connections,
        ..SearchClientConfig::default()
    })
    .expect("client should build")
}

fn image_json(id: u64, base: &str) -> serde_json::Value {
    json!({
        "id": id,
        "format": "png",
        "tags": ["safe", "oc:hardy"],
        "representations": { "full": format!("{base}/img/{id}.png") },
        "created_at": "2020-01-01T00:00:00Z",
        "score": 12,
        "width": 800,
        "height": 600
    })
}

#[tokio::test]
async fn test_search_sends_query_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/images"))
        .and(query_param("q", "oc:hardy, safe"))
        .and(query_param("sf", "created_at"))
        .and(query_param("sd", "desc"))
        .and(query_param("filter_id", "56027"))
        .and(query_param("per_page", "20"))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "images": [image_json(7, &server.uri())],
            "total": 41
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 5);
    let params = SearchParams {
        per_page: 20,
        filter_id: Some(Filters::EVERYTHING),
        ..SearchParams::default()
    };
    let batch = client.search("oc:hardy, safe", &params, 3).await.unwrap();

    assert_eq!(batch.total, 41);
    assert_eq!(batch.records.len(), 1);
    assert_eq!(batch.records[0].id, 7);
    assert_eq!(batch.records[0].score, 12);
}

#[tokio::test]
async fn test_search_uses_client_filter_when_params_have_none() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/images"))
        .and(query_param("filter_id", "100073"))
        .and(query_param("sf", "score"))
        .and(query_param("sd", "asc"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "images": [], "total": 0 })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, 5);
    let params = SearchParams {
        sort_field: SortField::Score,
        sort_direction: SortDirection::Asc,
        ..SearchParams::default()
    };
    let batch = client.search("anything", &params, 1).await.unwrap();

    assert!(batch.records.is_empty());
    assert_eq!(batch.total, 0);
}

#[tokio::test]
async fn test_search_non_success_status_is_http_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/images"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let err = client_for(&server, 5)
        .search("q", &SearchParams::default(), 1)
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteServiceError::HttpStatus { status: 503, .. }));
    assert_eq!(err.status(), Some(503));
}

#[tokio::test]
async fn test_search_malformed_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search/images"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server, 5)
        .search("q", &SearchParams::default(), 1)
        .await
        .unwrap_err();

    assert!(matches!(err, RemoteServiceError::Decode { .. }), "{err}");
}

#[tokio::test]
async fn test_featured_returns_wrapped_image() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/images/featured"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "image": image_json(1_234, &server.uri()) })),
        )
        .mount(&server)
        .await;

    let record = client_for(&server, 5).featured().await.unwrap();

    assert_eq!(record.id, 1_234);
    assert_eq!(record.tag_text(), "safe,oc:hardy");
    assert!(record.representation("full").unwrap().ends_with("/img/1234.png"));
}

#[tokio::test]
async fn test_download_to_streams_body_to_file() {
    let server = MockServer::start().await;
    let body = vec![0x89_u8; 64 * 1024];
    Mock::given(method("GET"))
        .and(path("/img/1.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("1.png");

    let written = client_for(&server, 5)
        .download_to(&format!("{}/img/1.png", server.uri()), &dest)
        .await
        .unwrap();

    assert_eq!(written, body.len() as u64);
    assert_eq!(std::fs::read(&dest).unwrap(), body);
}

#[tokio::test]
async fn test_download_to_error_status_leaves_no_file() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/img/2.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let temp = TempDir::new().unwrap();
    let dest = temp.path().join("2.png");

    let err = client_for(&server, 5)
        .download_to(&format!("{}/img/2.png", server.uri()), &dest)
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(404));
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_concurrent_requests_respect_connection_limit() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/images/featured"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "image": image_json(1, &server.uri()) }))
                .set_delay(Duration::from_millis(200)),
        )
        .mount(&server)
        .await;
    let client = client_for(&server, 2);

    let started = Instant::now();
    let results = futures_util::future::join_all((0..6).map(|_| client.featured())).await;
    let elapsed = started.elapsed();

    assert!(results.iter().all(Result::is_ok));
    // Six requests through two slots need at least three sequential rounds.
    assert!(
        elapsed >= Duration::from_millis(600),
        "requests overlapped beyond the limit: {elapsed:?}"
    );
}
