//! Shared helpers: spawn the app on a random port against a tempdir-backed
//! SQLite database and content store, build test archives in memory.

use std::io::{Cursor, Write};
use std::sync::Arc;

use tempfile::TempDir;
use zip::write::FileOptions;

use lms_runtime::config::Config;
use lms_runtime::state::AppState;
use lms_runtime::storage::FsStore;
use lms_runtime::{create_router, db};

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
    /// Owns the database file and content root for this app's lifetime.
    pub dir: TempDir,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Absolute filesystem path of a content-store key, for asserting what
    /// extraction actually wrote.
    pub fn content_path(&self, key: &str) -> std::path::PathBuf {
        let mut path = self.dir.path().join("content");
        for seg in key.split('/').filter(|s| !s.is_empty()) {
            path.push(seg);
        }
        path
    }
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(customize: impl FnOnce(&mut Config)) -> TestApp {
    let dir = tempfile::tempdir().expect("failed to create tempdir");
    let db_url = format!("sqlite://{}", dir.path().join("lms.db").display());

    let pool = db::connect(&db_url).await.expect("failed to open database");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("failed to migrate database");

    let mut config = Config::from_env();
    config.database_url = db_url;
    config.content_root = dir.path().join("content").display().to_string();
    customize(&mut config);

    let state = AppState {
        pool,
        store: Arc::new(FsStore::new(dir.path().join("content"))),
        config: Arc::new(config),
    };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind random port");
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestApp {
        address: format!("http://127.0.0.1:{port}"),
        client: reqwest::Client::new(),
        dir,
    }
}

pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = FileOptions::default().compression_method(zip::CompressionMethod::Stored);
        for (name, data) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

pub fn scorm_zip() -> Vec<u8> {
    let manifest = br#"<?xml version="1.0"?>
<manifest identifier="course" xmlns="http://www.imsproject.org/xsd/imscp_rootv1p1p2">
  <metadata>
    <schema>ADL SCORM</schema>
    <schemaversion>1.2</schemaversion>
  </metadata>
  <organizations default="org1">
    <organization identifier="org1">
      <title>Integration Course</title>
    </organization>
  </organizations>
  <resources>
    <resource identifier="res1" type="webcontent" href="index.html">
      <file href="index.html"/>
    </resource>
  </resources>
</manifest>"#;
    build_zip(&[
        ("imsmanifest.xml", manifest.as_slice()),
        ("index.html", b"<html><body>sco</body></html>".as_slice()),
    ])
}

pub fn h5p_zip() -> Vec<u8> {
    build_zip(&[
        (
            "h5p.json",
            br#"{"title": "Integration Quiz", "mainLibrary": "H5P.QuestionSet"}"#.as_slice(),
        ),
        ("content/content.json", br#"{"questions": []}"#.as_slice()),
        ("H5P.QuestionSet-1.17/library.js", b"// lib".as_slice()),
    ])
}

/// Multipart form for a package upload.
pub fn upload_form(title: &str, filename: &str, bytes: Vec<u8>) -> reqwest::multipart::Form {
    reqwest::multipart::Form::new()
        .text("title", title.to_string())
        .part(
            "file",
            reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string()),
        )
}

pub trait Authed {
    fn as_learner(self, user_id: i64) -> Self;
    fn as_editor(self, user_id: i64) -> Self;
}

impl Authed for reqwest::RequestBuilder {
    fn as_learner(self, user_id: i64) -> Self {
        self.header("X-User-Id", user_id.to_string())
            .header("X-User-Name", format!("Learner {user_id}"))
    }

    fn as_editor(self, user_id: i64) -> Self {
        self.as_learner(user_id).header("X-User-Editor", "1")
    }
}

/// xAPI statement body with the given verb.
pub fn xapi_statement(verb_iri: &str, display: &str) -> serde_json::Value {
    serde_json::json!({
        "actor": {"name": "learner", "mbox": "mailto:learner@example.com"},
        "verb": {"id": verb_iri, "display": {"en-US": display}},
        "object": {"id": "http://example.com/activity"}
    })
}
