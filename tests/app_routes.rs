use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use http_body_util::BodyExt as _;
use serde_json::{Value, json};
use tower::ServiceExt as _;

use datasetify::app::{AppState, router};
use datasetify::config::Config;

const BOUNDARY: &str = "datasetify-test-boundary";

fn app(out: &Path, configure: impl FnOnce(&mut Config)) -> axum::Router {
    let mut config = Config {
        output_dir: out.join("datasets"),
        upload_dir: out.join("uploads"),
        ..Config::default()
    };
    configure(&mut config);
    router(AppState::from_config(Arc::new(config)).expect("build app state"))
}

fn multipart(parts: &[(&str, &str, &str)]) -> Body {
    let mut body = String::new();
    for (name, file_name, contents) in parts {
        body.push_str(&format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{file_name}\"\r\nContent-Type: application/octet-stream\r\n\r\n{contents}\r\n"
        ));
    }
    body.push_str(&format!("--{BOUNDARY}--\r\n"));
    Body::from(body)
}

fn multipart_request(uri: &str, parts: &[(&str, &str, &str)]) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(multipart(parts))
        .expect("build multipart request")
}

fn json_request(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("build json request")
}

async fn send(app: axum::Router, request: Request<Body>) -> anyhow::Result<(StatusCode, Value)> {
    let response = app.oneshot(request).await?;
    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
    };
    Ok((status, body))
}

fn files_in(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|entries| entries.count()).unwrap_or(0)
}

#[tokio::test]
async fn healthz_is_ok() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let request = Request::builder().uri("/healthz").body(Body::empty())?;
    let (status, body) = send(app(temp.path(), |_| {}), request).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok\n".to_string()));
    Ok(())
}

#[tokio::test]
async fn missing_url_is_rejected_with_detail() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let (status, body) = send(app(temp.path(), |_| {}), json_request("/web-scrape", "{}")).await?;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body, json!({ "detail": "url is required" }));
    Ok(())
}

#[tokio::test]
async fn malformed_json_is_rejected_with_detail() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let (status, body) =
        send(app(temp.path(), |_| {}), json_request("/web-links", "{not json")).await?;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    let detail = body["detail"].as_str().unwrap_or_default();
    assert!(detail.starts_with("invalid request body"), "{detail}");
    Ok(())
}

#[tokio::test]
async fn extract_data_saves_dataset_and_returns_summary() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let request = multipart_request(
        "/extract-data",
        &[
            ("files", "notes.txt", "hello\tworld"),
            ("files", "data.json", r#"{"k": [1, 2]}"#),
        ],
    );
    let (status, body) = send(app(temp.path(), |_| {}), request).await?;
    assert_eq!(status, StatusCode::OK, "{body}");

    let file_name = body["file_name"].as_str().unwrap_or_default();
    assert!(file_name.starts_with("dataset_") && file_name.ends_with(".json"));
    assert!(body["token_size"].as_u64().unwrap_or_default() > 0);
    assert!(body["message"].is_string());

    let saved = std::fs::read_to_string(temp.path().join("datasets").join(file_name))?;
    let saved: Value = serde_json::from_str(&saved)?;
    assert_eq!(saved, json!([{ "data": "helloworld" }, { "k": [1, 2] }]));
    assert_eq!(files_in(&temp.path().join("uploads")), 2);
    Ok(())
}

#[tokio::test]
async fn upload_returns_dataset_without_saving() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let request = multipart_request("/upload", &[("files", "readme.md", "# Title")]);
    let (status, body) = send(app(temp.path(), |_| {}), request).await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["dataset"], json!([{ "data": "# Title" }]));
    assert!(body["token_size"].as_u64().unwrap_or_default() > 0);
    assert_eq!(files_in(&temp.path().join("datasets")), 0);
    Ok(())
}

#[tokio::test]
async fn empty_file_name_is_rejected() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let request = multipart_request("/extract-data", &[("files", "", "data")]);
    let (status, body) = send(app(temp.path(), |_| {}), request).await?;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body, json!({ "detail": "No file selected for uploading" }));
    Ok(())
}

#[tokio::test]
async fn oversized_file_is_rejected_and_removed() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let request = multipart_request(
        "/extract-data",
        &[
            ("files", "small.txt", "ok"),
            ("files", "big.txt", "this body is longer than sixteen bytes"),
        ],
    );
    let (status, body) = send(app(temp.path(), |c| c.max_file_size = 16), request).await?;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body, json!({ "detail": "File size limit exceeded: > big.txt" }));
    assert_eq!(files_in(&temp.path().join("uploads")), 0);
    assert_eq!(files_in(&temp.path().join("datasets")), 0);
    Ok(())
}

#[tokio::test]
async fn over_budget_files_are_rejected_with_token_size() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let request = multipart_request(
        "/extract-data",
        &[("files", "long.txt", "a sentence that is clearly longer than three tokens")],
    );
    let (status, body) = send(app(temp.path(), |c| c.max_token_size = 3), request).await?;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    let detail = body["detail"].as_str().unwrap_or_default();
    assert!(detail.starts_with("Token size: "), "{detail}");
    assert!(detail.contains("Max token limit exceeded"), "{detail}");
    assert_eq!(files_in(&temp.path().join("datasets")), 0);
    Ok(())
}

#[tokio::test]
async fn requests_over_the_rate_limit_get_429() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let app = app(temp.path(), |c| c.rate_limit_per_minute = 2);

    for _ in 0..2 {
        let (status, _) = send(app.clone(), json_request("/web-scrape", "{}")).await?;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    }
    let (status, body) = send(app.clone(), json_request("/web-scrape", "{}")).await?;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body, json!({ "error": "Too many requests. Try again later." }));

    let request = Request::builder().uri("/healthz").body(Body::empty())?;
    let (status, _) = send(app, request).await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn cors_preflight_allows_configured_origin() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/web-scrape")
        .header(header::ORIGIN, "http://localhost:3000")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())?;
    let response = app(temp.path(), |_| {}).oneshot(request).await?;

    let headers = response.headers();
    assert_eq!(
        headers
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .and_then(|v| v.to_str().ok()),
        Some("http://localhost:3000")
    );
    assert_eq!(
        headers
            .get(header::ACCESS_CONTROL_ALLOW_CREDENTIALS)
            .and_then(|v| v.to_str().ok()),
        Some("true")
    );
    Ok(())
}
