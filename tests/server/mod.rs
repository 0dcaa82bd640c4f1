use axum::{
    Router,
    http::{HeaderMap, StatusCode, header},
    response::{Html, IntoResponse},
    routing::get,
};
use std::time::Duration;
use tokio::net::TcpListener;

/// `admin:secret`
#[allow(dead_code)]
pub const BASIC_AUTH_HEADER: &str = "Basic YWRtaW46c2VjcmV0";

const HOME: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <title>Fixture home page for the audit</title>
  <meta name="description" content="A fixture page used by the integration tests to exercise the crawler and every issue reporter.">
</head>
<body>
  <h1>Home</h1>
  <p>Welcome to the fixture site.</p>
  <a href="/about">About</a>
  <a href="old-page">Old page</a>
  <a href="/missing">Missing</a>
  <a href="/under_score">Underscore</a>
  <a href="https://example.org/">External</a>
  <a href="/about#team">Team</a>
  <img src="/logo.png">
</body>
</html>"#;

const ABOUT: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <title>About the fixture site and its authors</title>
</head>
<body>
  <h1>About</h1>
  <a href="/">Home</a>
</body>
</html>"#;

const PLAIN: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><title>Plain page without any links at all</title></head>
<body><h1>Plain</h1><p>Nothing to follow here.</p></body>
</html>"#;

/// Serves the router on an ephemeral port and returns its base URL
pub async fn spawn(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test server");
    let addr = listener.local_addr().expect("No address bound");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            eprintln!("Test server error: {}", e);
        }
    });

    format!("http://{}", addr)
}

/// A small site with a redirect, a broken link, an image and a URL with an
/// underscore
#[allow(dead_code)]
pub async fn get_test_server_url() -> String {
    let app = Router::new()
        .route("/", get(|| async { Html(HOME) }))
        .route("/about", get(|| async { Html(ABOUT) }))
        .route(
            "/old-page",
            get(|| async { (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, "/about")]) }),
        )
        .route(
            "/missing",
            get(|| async { (StatusCode::NOT_FOUND, Html("<html><body>Not Found</body></html>")) }),
        )
        .route("/under_score", get(|| async { Html(PLAIN) }))
        .route(
            "/logo.png",
            get(|| async { ([(header::CONTENT_TYPE, "image/png")], vec![0x89u8, b'P', b'N', b'G']) }),
        );

    spawn(app).await
}

/// One page without outbound links
#[allow(dead_code)]
pub async fn get_single_page_server_url() -> String {
    spawn(Router::new().route("/", get(|| async { Html(PLAIN) }))).await
}

/// A page that only answers after a delay
#[allow(dead_code)]
pub async fn get_slow_server_url(delay: Duration) -> String {
    let app = Router::new().route(
        "/",
        get(move || async move {
            tokio::time::sleep(delay).await;
            Html(PLAIN)
        }),
    );

    spawn(app).await
}

/// A page behind HTTP basic authentication
#[allow(dead_code)]
pub async fn get_basic_auth_server_url() -> String {
    let app = Router::new().route(
        "/",
        get(|headers: HeaderMap| async move {
            let authorized = headers
                .get(header::AUTHORIZATION)
                .and_then(|value| value.to_str().ok())
                == Some(BASIC_AUTH_HEADER);

            if authorized {
                Html(PLAIN).into_response()
            } else {
                StatusCode::UNAUTHORIZED.into_response()
            }
        }),
    );

    spawn(app).await
}
