//! HTTP surface tests: a real server on an ephemeral port, fake renderer and
//! model behind it.

#![cfg(feature = "server")]

mod common;

use common::{converter, fake_pdf, test_config, zip_entries, FakeClient};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use sheet2md::server::serve_on;
use sheet2md::ServerConfig;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A running server plus the directory it may read from.
struct TestApp {
    address: String,
    client: reqwest::Client,
    input_root: TempDir,
    _server: JoinHandle<()>,
}

impl TestApp {
    async fn spawn() -> Self {
        let input_root = tempfile::tempdir().unwrap();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = format!("http://{}", listener.local_addr().unwrap());

        let conv = converter(Arc::new(FakeClient::new()), test_config().build().unwrap());
        let config = ServerConfig {
            input_root: input_root.path().to_path_buf(),
            ..ServerConfig::default()
        };
        let server = tokio::spawn(async move {
            serve_on(listener, conv, &config).await.unwrap();
        });

        Self {
            address,
            client: reqwest::Client::new(),
            input_root,
            _server: server,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    fn root(&self) -> &Path {
        self.input_root.path()
    }
}

fn pdf_part(name: &str, pages: u32, tag: u32) -> Part {
    Part::bytes(fake_pdf(pages, tag))
        .file_name(name.to_string())
        .mime_str("application/pdf")
        .unwrap()
}

#[tokio::test]
async fn index_and_health() {
    let app = TestApp::spawn().await;

    let index = app.client.get(app.url("/")).send().await.unwrap();
    assert_eq!(index.status(), StatusCode::OK);
    let html = index.text().await.unwrap();
    assert!(html.contains("/convert_single/"));
    assert!(html.contains("/convert_multiple/"));

    let health = app.client.get(app.url("/health")).send().await.unwrap();
    assert_eq!(health.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn convert_single_returns_plain_text() {
    let app = TestApp::spawn().await;
    let form = Form::new().part("file", pdf_part("hero.pdf", 2, 1));

    let res = app
        .client
        .post(app.url("/convert_single/"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let content_type = res.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"));
    assert_eq!(res.text().await.unwrap(), "PAGE0\n---\nPAGE1\n---\n");
}

#[tokio::test]
async fn convert_single_without_file_is_bad_request() {
    let app = TestApp::spawn().await;
    let form = Form::new().text("note", "no file here");

    let res = app
        .client
        .post(app.url("/convert_single/"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "No file uploaded");
}

#[tokio::test]
async fn convert_multiple_returns_zip_of_texts() {
    let app = TestApp::spawn().await;
    let form = Form::new()
        .part("files", pdf_part("A.pdf", 2, 1))
        .part("files", pdf_part("B.pdf", 1, 2));

    let res = app
        .client
        .post(app.url("/convert_multiple/"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "application/zip");
    let archive = res.bytes().await.unwrap();
    assert_eq!(
        zip_entries(&archive),
        vec![
            ("A.txt".to_string(), "PAGE0\n---\nPAGE1\n---\n".to_string()),
            ("B.txt".to_string(), "PAGE0\n---\n".to_string()),
        ]
    );
}

#[tokio::test]
async fn convert_directory_zips_pdfs_under_root() {
    let app = TestApp::spawn().await;
    let sheets = app.root().join("sheets");
    std::fs::create_dir(&sheets).unwrap();
    std::fs::write(sheets.join("rogue.pdf"), fake_pdf(1, 1)).unwrap();
    std::fs::write(sheets.join("wizard.pdf"), fake_pdf(2, 2)).unwrap();

    let res = app
        .client
        .get(app.url("/convert_directory/sheets"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let names: Vec<String> = zip_entries(&res.bytes().await.unwrap())
        .into_iter()
        .map(|(n, _)| n)
        .collect();
    assert_eq!(names, vec!["rogue.txt", "wizard.txt"]);
}

#[tokio::test]
async fn convert_directory_rejects_traversal() {
    let app = TestApp::spawn().await;

    let res = app
        .client
        .get(app.url("/convert_directory/..%2Fetc"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Invalid input directory"));
}

#[tokio::test]
async fn convert_directory_missing_is_not_found() {
    let app = TestApp::spawn().await;

    let res = app
        .client
        .get(app.url("/convert_directory/nope"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}
