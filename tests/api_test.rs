mod server;

use auditly::crawler::{CrawlerConfig, CrawlerService};
use auditly::live::LiveTimings;
use auditly::models::Project;
use auditly::pubsub::{Broker, Message, crawl_topic};
use auditly::server::{AppState, USER_HEADER, create_router};
use auditly::store::MemoryStore;
use reqwest::StatusCode;
use server::{get_basic_auth_server_url, get_single_page_server_url, get_slow_server_url, spawn};
use std::sync::Arc;
use std::time::Duration;

async fn api(site_url: &str, public_url: Option<&str>) -> (String, Arc<CrawlerService>) {
    api_with_project(
        Project {
            id: 1,
            owner_id: 10,
            url: site_url.to_string(),
            basic_auth: false,
            auth_user: None,
            auth_pass: None,
        },
        public_url,
    )
    .await
}

async fn api_with_project(
    project: Project,
    public_url: Option<&str>,
) -> (String, Arc<CrawlerService>) {
    let store = Arc::new(MemoryStore::with_projects([project]));
    let crawler = Arc::new(CrawlerService::new(
        CrawlerConfig::default(),
        Arc::new(Broker::new()),
        store.clone(),
    ));

    let state = AppState {
        crawler: crawler.clone(),
        projects: store,
        public_url: public_url.map(|url| url.to_string()),
        timings: LiveTimings::default(),
    };

    (spawn(create_router(state)).await, crawler)
}

#[tokio::test]
async fn test_health() {
    let (api_url, _) = api("http://127.0.0.1:9/", None).await;

    let response = reqwest::get(format!("{}/health", api_url)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_start_crawl_requires_owner() {
    let site_url = get_single_page_server_url().await;
    let (api_url, _) = api(&site_url, None).await;
    let client = reqwest::Client::new();
    let url = format!("{}/projects/1/crawl", api_url);

    let response = client.post(&url).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = client.post(&url).header(USER_HEADER, "11").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .post(format!("{}/projects/2/crawl", api_url))
        .header(USER_HEADER, "10")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_and_stop_crawl() {
    let site_url = get_slow_server_url(Duration::from_millis(300)).await;
    let (api_url, crawler) = api(&site_url, None).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{}/projects/1/crawl", api_url))
        .header(USER_HEADER, "10")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["project_id"], 1);
    assert_eq!(body["crawl_id"], 1);
    assert!(crawler.is_running(1));

    let response = client
        .post(format!("{}/projects/1/crawl", api_url))
        .header(USER_HEADER, "10")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    let response = client
        .post(format!("{}/projects/1/crawl/stop", api_url))
        .header(USER_HEADER, "10")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["stopped"], true);

    for _ in 0..50 {
        if !crawler.is_running(1) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(!crawler.is_running(1));
}

#[tokio::test]
async fn test_invalid_project_url_is_bad_request() {
    let (api_url, _) = api("ftp://example.com/", None).await;

    let response = reqwest::Client::new()
        .post(format!("{}/projects/1/crawl", api_url))
        .header(USER_HEADER, "10")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("ftp://example.com/"));
}

#[tokio::test]
async fn test_live_endpoint_rejects_plain_requests() {
    let (api_url, _) = api("http://127.0.0.1:9/", None).await;

    let response = reqwest::Client::new()
        .get(format!("{}/projects/1/crawl/ws", api_url))
        .header(USER_HEADER, "10")
        .send()
        .await
        .unwrap();

    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn test_live_endpoint_checks_origin() {
    let (api_url, _) = api("http://127.0.0.1:9/", Some("http://audit.example.com")).await;

    let response = reqwest::Client::new()
        .get(format!("{}/projects/1/crawl/ws", api_url))
        .header(USER_HEADER, "10")
        .header("connection", "upgrade")
        .header("upgrade", "websocket")
        .header("sec-websocket-version", "13")
        .header("sec-websocket-key", "dGhlIHNhbXBsZSBub25jZQ==")
        .header("origin", "http://evil.example.com")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_start_crawl_with_credentials() {
    let site_url = get_basic_auth_server_url().await;
    let (api_url, crawler) = api_with_project(
        Project {
            id: 1,
            owner_id: 10,
            url: site_url,
            basic_auth: true,
            auth_user: None,
            auth_pass: None,
        },
        None,
    )
    .await;
    let client = reqwest::Client::new();
    let url = format!("{}/projects/1/crawl", api_url);

    let response = client.post(&url).header(USER_HEADER, "10").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = client
        .post(&url)
        .header(USER_HEADER, "10")
        .body("{ not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!crawler.is_running(1));

    let mut subscription = crawler.broker().subscribe(&crawl_topic(1));
    let response = client
        .post(&url)
        .header(USER_HEADER, "10")
        .json(&serde_json::json!({ "username": "admin", "password": "secret" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    let first = tokio::time::timeout(Duration::from_secs(10), subscription.recv())
        .await
        .unwrap()
        .unwrap();
    match first {
        Message::PageReport(page) => assert_eq!(page.status_code, 200),
        other => panic!("expected a page report, got {:?}", other),
    }
}
