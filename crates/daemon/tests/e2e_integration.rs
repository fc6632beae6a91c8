//! End-to-end integration tests for the Bindle daemon.
//!
//! These tests run the real router on a local port and verify complete flows:
//! - Single and batch uploads through multipart forms
//! - Policy rejections and their status codes
//! - Inline views and forced downloads
//! - Graceful shutdown

use std::path::{Path, PathBuf};

use daemon::config::Config;
use daemon::serve_on;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// A daemon running on an ephemeral port.
struct TestServer {
    base_url: String,
    upload_dir: PathBuf,
    shutdown: Option<oneshot::Sender<()>>,
    handle: JoinHandle<anyhow::Result<()>>,
    _temp_dir: TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn stop(mut self) -> anyhow::Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        self.handle.await?
    }
}

/// Create a test configuration with a temporary upload directory.
fn create_test_config() -> (Config, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let upload_dir = temp_dir.path().join("uploads");
    std::fs::create_dir(&upload_dir).unwrap();

    let mut config = Config::default();
    config.server.bind = "127.0.0.1:0".to_string();
    config.uploads.destination_dir = upload_dir.clone();
    config.uploads.max_size = 1000;
    config.downloads.root = upload_dir;
    (config, temp_dir)
}

async fn start_server(config: Config, temp_dir: TempDir) -> TestServer {
    config.validate().unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let upload_dir = config.uploads.destination_dir.clone();
    let (tx, rx) = oneshot::channel::<()>();

    let handle = tokio::spawn(async move {
        serve_on(listener, &config, async move {
            let _ = rx.await;
        })
        .await
    });

    TestServer {
        base_url: format!("http://{}", addr),
        upload_dir,
        shutdown: Some(tx),
        handle,
        _temp_dir: temp_dir,
    }
}

async fn start_default_server() -> TestServer {
    let (config, temp_dir) = create_test_config();
    start_server(config, temp_dir).await
}

fn file_part(name: &str, data: &[u8]) -> Part {
    Part::bytes(data.to_vec()).file_name(name.to_string())
}

fn entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

// =============================================================================
// Upload Tests
// =============================================================================

#[tokio::test]
async fn test_single_upload_created() {
    let server = start_default_server().await;
    let client = reqwest::Client::new();

    let form = Form::new().part("file", file_part("My Photo.PNG", &[1u8; 500]));
    let response = client
        .post(server.url("/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let saved: serde_json::Value = response.json().await.unwrap();
    let saved_name = saved["saved_name"].as_str().unwrap().to_string();

    assert_eq!(saved["original_name"], "My Photo.PNG");
    assert_eq!(saved["size"], 500);
    assert!(saved_name.starts_with("upload_"));
    assert!(saved_name.ends_with(".png"));
    assert_eq!(entries(&server.upload_dir), vec![saved_name]);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_disallowed_extension_rejected() {
    let server = start_default_server().await;
    let client = reqwest::Client::new();

    let form = Form::new().part("file", file_part("virus.exe", b"MZ"));
    let response = client
        .post(server.url("/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(entries(&server.upload_dir).is_empty());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_oversize_file_rejected() {
    let server = start_default_server().await;
    let client = reqwest::Client::new();

    let form = Form::new().part("file", file_part("big.png", &[0u8; 1001]));
    let response = client
        .post(server.url("/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(entries(&server.upload_dir).is_empty());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_request_body_limit() {
    let (mut config, temp_dir) = create_test_config();
    config.uploads.max_size = 256;
    config.server.max_request_bytes = 512;
    let server = start_server(config, temp_dir).await;
    let client = reqwest::Client::new();

    let form = Form::new()
        .part("files", file_part("a.png", &[0u8; 200]))
        .part("files", file_part("b.png", &[0u8; 200]))
        .part("files", file_part("c.png", &[0u8; 200]));
    let response = client
        .post(server.url("/upload-multiple"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(entries(&server.upload_dir).is_empty());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_missing_file_field() {
    let server = start_default_server().await;
    let client = reqwest::Client::new();

    let form = Form::new()
        .text("file", "not a file")
        .part("avatar", file_part("a.png", b"png"));
    let response = client
        .post(server.url("/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(entries(&server.upload_dir).is_empty());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_multiple_upload_created() {
    let server = start_default_server().await;
    let client = reqwest::Client::new();

    let form = Form::new()
        .part("files", file_part("one.png", b"first"))
        .text("caption", "holiday")
        .part("files", file_part("two.pdf", b"second"));
    let response = client
        .post(server.url("/upload-multiple"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let saved: Vec<serde_json::Value> = response.json().await.unwrap();

    assert_eq!(saved.len(), 2);
    assert_eq!(saved[0]["original_name"], "one.png");
    assert_eq!(saved[1]["original_name"], "two.pdf");
    for file in &saved {
        assert!(file["saved_name"].as_str().unwrap().starts_with("multi_"));
    }
    assert_eq!(entries(&server.upload_dir).len(), 2);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_multiple_upload_is_all_or_nothing() {
    let server = start_default_server().await;
    let client = reqwest::Client::new();

    let form = Form::new()
        .part("files", file_part("one.png", b"first"))
        .part("files", file_part("two.png", b"second"))
        .part("files", file_part("three.exe", b"third"));
    let response = client
        .post(server.url("/upload-multiple"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(entries(&server.upload_dir).is_empty());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_uploads() {
    let server = start_default_server().await;
    let client = reqwest::Client::new();

    let mut handles = Vec::new();
    for i in 0..10 {
        let client = client.clone();
        let url = server.url("/upload");
        handles.push(tokio::spawn(async move {
            let form = Form::new().part("file", file_part("same.png", format!("{i}").as_bytes()));
            client.post(url).multipart(form).send().await.unwrap().status()
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), StatusCode::CREATED);
    }
    assert_eq!(entries(&server.upload_dir).len(), 10);

    server.stop().await.unwrap();
}

// =============================================================================
// Download Tests
// =============================================================================

#[tokio::test]
async fn test_upload_then_download_with_suggested_name() {
    let server = start_default_server().await;
    let client = reqwest::Client::new();
    let content = b"%PDF-1.4 test document".to_vec();

    let form = Form::new().part("file", file_part("test-document.pdf", &content));
    let saved: serde_json::Value = client
        .post(server.url("/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let saved_name = saved["saved_name"].as_str().unwrap();

    let response = client
        .get(server.url(&format!("/download/{saved_name}?as=report.pdf")))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(
        headers.get("content-disposition").unwrap(),
        "attachment; filename=\"report.pdf\""
    );
    assert_eq!(headers.get("x-download-type").unwrap(), "attachment");
    assert_eq!(headers.get("content-type").unwrap(), "application/pdf");
    assert_eq!(response.bytes().await.unwrap().to_vec(), content);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_view_inline() {
    let server = start_default_server().await;
    std::fs::write(server.upload_dir.join("pixel.png"), b"png-bytes").unwrap();

    let response = reqwest::get(server.url("/files/pixel.png")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-disposition").unwrap(),
        "inline; filename=\"pixel.png\""
    );
    assert_eq!(response.headers().get("content-type").unwrap(), "image/png");
    assert!(response.headers().get("x-download-type").is_none());
    assert_eq!(response.text().await.unwrap(), "png-bytes");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_head_request_has_headers_only() {
    let server = start_default_server().await;
    std::fs::write(server.upload_dir.join("notes.pdf"), [0u8; 42]).unwrap();

    let response = reqwest::Client::new()
        .head(server.url("/download/notes.pdf"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("content-length").unwrap(), "42");
    assert!(response.bytes().await.unwrap().is_empty());

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_download_missing_file() {
    let server = start_default_server().await;

    let response = reqwest::get(server.url("/download/does-not-exist.pdf"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_download_traversal_forbidden() {
    let server = start_default_server().await;
    let secret = server.upload_dir.parent().unwrap().join("secret.txt");
    std::fs::write(&secret, b"top secret").unwrap();

    let response = reqwest::get(server.url("/download/..%2Fsecret.txt"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(!response.text().await.unwrap().contains("top secret"));

    server.stop().await.unwrap();
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[tokio::test]
async fn test_graceful_shutdown() {
    let server = start_default_server().await;
    let url = server.url("/files/none");

    server.stop().await.unwrap();

    assert!(reqwest::get(url).await.is_err());
}
