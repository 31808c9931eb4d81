use super::*;
use serial_test::serial;
use std::io::Write;
use tempfile::TempDir;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, header, method, path},
};

fn zip_with(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, zip::write::FileOptions::default())
            .expect("should start zip entry");
        writer
            .write_all(content.as_bytes())
            .expect("should write zip entry");
    }
    writer.finish().expect("should finish zip").into_inner()
}

fn sample_pdf(dir: &TempDir) -> std::path::PathBuf {
    let path = dir.path().join("report.pdf");
    fs::write(&path, b"%PDF-1.4 not really a pdf").expect("should write file");
    path
}

fn parser_for(server: &MockServer, max_polls: u32) -> RemotePdfParser {
    RemotePdfParser::new(&format!("{}/api/v4", server.uri()), "test-key".to_string())
        .expect("valid parser")
        .with_polling(Duration::from_millis(1), max_polls)
        .with_timeout(Duration::from_secs(5))
}

/// Mounts the upload-URL and upload endpoints for batch `b-1`
async fn mount_upload(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/v4/file-urls/batch"))
        .and(header("Authorization", "Bearer test-key"))
        .and(body_partial_json(serde_json::json!({
            "files": [{"name": "report.pdf"}],
            "model_version": "vlm"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0,
            "msg": "ok",
            "data": {
                "batch_id": "b-1",
                "file_urls": [format!("{}/upload/report.pdf", server.uri())]
            }
        })))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/upload/report.pdf"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(server)
        .await;
}

fn batch_state(state: &str, extra: serde_json::Value) -> ResponseTemplate {
    let mut entry = serde_json::json!({"file_name": "report.pdf", "state": state});
    if let (Some(entry), Some(extra)) = (entry.as_object_mut(), extra.as_object()) {
        entry.extend(extra.clone());
    }
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "code": 0,
        "data": {"batch_id": "b-1", "extract_result": [entry]}
    }))
}

#[test]
fn archive_prefers_markdown() {
    let bytes = zip_with(&[
        ("notes.txt", "plain"),
        ("images/figure.png", "binary"),
        ("full.md", "# Title"),
        ("second.md", "other"),
    ]);
    assert_eq!(text_from_archive(&bytes).expect("should read"), "# Title");

    let bytes = zip_with(&[("layout.json", "{}"), ("content.TXT", "plain text")]);
    assert_eq!(text_from_archive(&bytes).expect("should read"), "plain text");

    let bytes = zip_with(&[("layout.json", "{}")]);
    assert!(text_from_archive(&bytes).is_err());

    assert!(text_from_archive(b"not a zip").is_err());
}

#[test]
#[serial]
fn missing_api_key_is_a_configuration_error() {
    let config = ParserConfig {
        api_key_env: "KNOWLEDGE_RAG_TEST_MISSING_PARSER_KEY".to_string(),
        ..ParserConfig::default()
    };
    // SAFETY: serialised with other environment-mutating tests
    unsafe { std::env::remove_var("KNOWLEDGE_RAG_TEST_MISSING_PARSER_KEY") };

    assert!(matches!(
        RemotePdfParser::from_config(&config),
        Err(RagError::Config(_))
    ));
}

#[tokio::test]
async fn job_completes_after_polling() {
    let server = MockServer::start().await;
    mount_upload(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/v4/extract-results/batch/b-1"))
        .respond_with(batch_state("running", serde_json::json!({})))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v4/extract-results/batch/b-1"))
        .respond_with(batch_state(
            "done",
            serde_json::json!({"full_zip_url": format!("{}/results/b-1.zip", server.uri())}),
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/results/b-1.zip"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(zip_with(&[("b-1/full.md", "Extracted **markdown**")])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("should create temp dir");
    let text = parser_for(&server, 10)
        .parse(&sample_pdf(&dir))
        .expect("job should succeed");

    assert_eq!(text, "Extracted **markdown**");
}

#[tokio::test]
async fn failed_job_reports_error_message() {
    let server = MockServer::start().await;
    mount_upload(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/v4/extract-results/batch/b-1"))
        .respond_with(batch_state(
            "failed",
            serde_json::json!({"err_msg": "file is encrypted"}),
        ))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("should create temp dir");
    let result = parser_for(&server, 10).parse(&sample_pdf(&dir));

    match result {
        Err(RagError::Parse(message)) => assert!(message.contains("file is encrypted")),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[tokio::test]
async fn polling_gives_up_after_max_polls() {
    let server = MockServer::start().await;
    mount_upload(&server).await;

    Mock::given(method("GET"))
        .and(path("/api/v4/extract-results/batch/b-1"))
        .respond_with(batch_state("pending", serde_json::json!({})))
        .expect(3)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("should create temp dir");
    let result = parser_for(&server, 3).parse(&sample_pdf(&dir));

    match result {
        Err(RagError::Parse(message)) => assert!(message.contains("after 3 polls")),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[tokio::test]
async fn rejected_upload_request_stops_the_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v4/file-urls/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": -60001,
            "msg": "quota exceeded"
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("should create temp dir");
    let result = parser_for(&server, 3).parse(&sample_pdf(&dir));

    match result {
        Err(RagError::Parse(message)) => assert!(message.contains("quota exceeded")),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_upload_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v4/file-urls/batch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "code": 0,
            "data": {
                "batch_id": "b-1",
                "file_urls": [format!("{}/upload/report.pdf", server.uri())]
            }
        })))
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/upload/report.pdf"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let dir = TempDir::new().expect("should create temp dir");
    let result = parser_for(&server, 3).parse(&sample_pdf(&dir));

    match result {
        Err(RagError::Parse(message)) => assert!(message.contains("HTTP 403")),
        other => panic!("expected parse error, got {other:?}"),
    }
}
