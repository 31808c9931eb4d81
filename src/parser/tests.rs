use super::*;
use serial_test::serial;
use std::time::Duration;
use tempfile::TempDir;

fn write(dir: &TempDir, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).expect("should write file");
    path
}

fn local_parser() -> DocumentParser {
    DocumentParser::new(PdfParser::Local(LocalPdfParser))
}

fn unreachable_remote(local_fallback: bool) -> DocumentParser {
    let remote = RemotePdfParser::new("http://127.0.0.1:1/api/v4", "key".to_string())
        .expect("valid parser")
        .with_timeout(Duration::from_secs(2));
    DocumentParser::new(PdfParser::Remote {
        remote,
        local_fallback,
    })
}

#[test]
fn extension_is_case_insensitive() {
    assert_eq!(file_extension(Path::new("a/Report.PDF")).as_deref(), Some("pdf"));
    assert_eq!(file_extension(Path::new("notes")), None);

    let parser = local_parser();
    assert!(parser.supports(Path::new("NOTES.TXT")));
    assert!(parser.supports(Path::new("paper.pdf")));
    assert!(!parser.supports(Path::new("table.csv")));
}

#[test]
fn text_is_trimmed() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write(&dir, "UPPER.TXT", "\n\n  Beam current drifts.  \n".as_bytes());

    assert_eq!(
        local_parser().parse(&path).as_deref(),
        Some("Beam current drifts.")
    );
}

#[test]
fn invalid_utf8_is_decoded_lossily() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write(&dir, "legacy.txt", b"caf\xe9 au lait");

    let text = local_parser().parse(&path).expect("text should be recovered");
    assert!(text.starts_with("caf"));
    assert!(text.ends_with("au lait"));
    assert!(text.contains('\u{FFFD}'));
}

#[test]
fn blank_unsupported_and_missing_files_give_none() {
    let dir = TempDir::new().expect("should create temp dir");
    let parser = local_parser();

    let blank = write(&dir, "blank.txt", b"  \n\t \n");
    assert_eq!(parser.parse(&blank), None);

    let csv = write(&dir, "table.csv", b"a,b\n1,2\n");
    assert_eq!(parser.parse(&csv), None);

    assert_eq!(parser.parse(&dir.path().join("absent.txt")), None);
}

#[test]
fn broken_pdf_gives_none() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write(&dir, "broken.pdf", b"definitely not a pdf");

    assert_eq!(local_parser().parse(&path), None);
}

#[test]
fn remote_failure_falls_back_to_local_extraction() {
    let dir = TempDir::new().expect("should create temp dir");
    let path = write(&dir, "broken.pdf", b"definitely not a pdf");

    let with_fallback = unreachable_remote(true);
    match with_fallback.pdf_parser().parse(&path) {
        Err(RagError::Parse(message)) => {
            assert!(message.contains("Failed to extract text"), "{message}");
        }
        other => panic!("expected local extraction error, got {other:?}"),
    }

    let without_fallback = unreachable_remote(false);
    match without_fallback.pdf_parser().parse(&path) {
        Err(RagError::Parse(message)) => {
            assert!(message.contains("Remote parsing"), "{message}");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
    assert_eq!(without_fallback.parse(&path), None);
}

#[test]
#[serial]
fn backend_selection_follows_config_and_key() {
    let key_var = "KNOWLEDGE_RAG_TEST_PARSER_KEY";
    let config = |pdf_backend| ParserConfig {
        pdf_backend,
        api_key_env: key_var.to_string(),
        ..ParserConfig::default()
    };

    // SAFETY: serialised with other environment-mutating tests
    unsafe { std::env::remove_var(key_var) };
    assert!(
        !PdfParser::from_config(&config(PdfBackend::Local))
            .expect("local needs no key")
            .is_remote()
    );
    assert!(
        !PdfParser::from_config(&config(PdfBackend::Auto))
            .expect("auto without key is local")
            .is_remote()
    );
    assert!(matches!(
        DocumentParser::from_config(&config(PdfBackend::Remote)),
        Err(RagError::Config(_))
    ));

    // SAFETY: serialised with other environment-mutating tests
    unsafe { std::env::set_var(key_var, "secret") };
    assert!(
        PdfParser::from_config(&config(PdfBackend::Auto))
            .expect("auto with key is remote")
            .is_remote()
    );
    assert!(
        PdfParser::from_config(&config(PdfBackend::Remote))
            .expect("remote with key")
            .is_remote()
    );

    // SAFETY: serialised with other environment-mutating tests
    unsafe { std::env::remove_var(key_var) };
}
