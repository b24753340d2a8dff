//! End-to-end tests driving the compiled `docsync` binary against a
//! temporary configuration with the offline hash embedder.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn build_pptx(slides: &[(&str, &str)]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default();
        writer.start_file("ppt/presentation.xml", options).unwrap();
        writer.write_all(b"<p:presentation/>").unwrap();
        for (i, (title, body)) in slides.iter().enumerate() {
            writer
                .start_file(format!("ppt/slides/slide{}.xml", i + 1), options)
                .unwrap();
            let xml = format!(
                "<p:sld><p:cSld><p:spTree>\
                 <a:p><a:r><a:t>{}</a:t></a:r></a:p>\
                 <a:p><a:r><a:t>{}</a:t></a:r></a:p>\
                 </p:spTree></p:cSld></p:sld>",
                title, body
            );
            writer.write_all(xml.as_bytes()).unwrap();
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let files_dir = root.join("files");
    fs::create_dir_all(files_dir.join("finance")).unwrap();

    fs::write(
        files_dir.join("finance").join("quarterly.pptx"),
        build_pptx(&[
            ("Quarterly revenue", "Revenue grew in every region"),
            ("Outlook", "Hiring plan for next quarter"),
        ]),
    )
    .unwrap();
    fs::write(
        files_dir.join("onboarding.pptx"),
        build_pptx(&[("Welcome", "Laptop setup and accounts")]),
    )
    .unwrap();

    let config_content = format!(
        r#"[db]
path = "{root}/data/state.sqlite"

[sync]
batch_size = 10
max_concurrent_transfers = 2
staging_dir = "{root}/data/staging"
render_dir = "{root}/data/rendered"

[sync.retry]
max_attempts = 2
backoff_floor_secs = 0.01
backoff_ceiling_secs = 0.02

[connectors.filesystem]
root = "{root}/files"
include_globs = ["**/*.pptx"]

[embedding]
provider = "hash"
dims = 64

[index]
path = "{root}/data/index.sqlite"

[logging]
level = "warn"
"#,
        root = root.display()
    );

    let config_path = config_dir.join("docsync.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_docsync(config_path: &Path, args: &[&str]) -> (String, String, Option<i32>) {
    let output = Command::new(env!("CARGO_BIN_EXE_docsync"))
        .arg("--config")
        .arg(config_path)
        .args(args)
        .output()
        .expect("failed to run docsync binary");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code(),
    )
}

fn sync(config_path: &Path, extra: &[&str]) -> (String, String, Option<i32>) {
    let mut args = vec!["sync", "filesystem", "--progress", "off"];
    args.extend_from_slice(extra);
    run_docsync(config_path, &args)
}

#[test]
fn test_init_creates_databases() {
    let (tmp, config) = setup_test_env();

    let (stdout, stderr, code) = run_docsync(&config, &["init"]);
    assert_eq!(code, Some(0), "init failed: {}", stderr);
    assert!(stdout.contains("initialized"));
    assert!(tmp.path().join("data/state.sqlite").exists());
    assert!(tmp.path().join("data/index.sqlite").exists());

    // Idempotent
    let (_, _, code) = run_docsync(&config, &["init"]);
    assert_eq!(code, Some(0));
}

#[test]
fn test_sync_then_incremental_noop() {
    let (_tmp, config) = setup_test_env();
    run_docsync(&config, &["init"]);

    let (stdout, stderr, code) = sync(&config, &[]);
    assert_eq!(code, Some(0), "sync failed: {}", stderr);
    assert!(stdout.contains("discovered: 2"), "{}", stdout);
    assert!(stdout.contains("processed:  2"), "{}", stdout);
    assert!(stdout.contains("failed:     0"), "{}", stdout);
    assert_eq!(stdout.lines().last(), Some("ok"), "{}", stdout);

    let (stdout, _, code) = sync(&config, &[]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("processed:  0"), "{}", stdout);
    assert!(stdout.contains("skipped:    2"), "{}", stdout);

    let (stdout, _, code) = sync(&config, &["--full"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("processed:  2"), "{}", stdout);
}

#[test]
fn test_changed_file_is_reprocessed() {
    let (tmp, config) = setup_test_env();
    sync(&config, &[]);

    fs::write(
        tmp.path().join("files/onboarding.pptx"),
        build_pptx(&[("Welcome", "Laptop setup"), ("Benefits", "Health plan")]),
    )
    .unwrap();

    let (stdout, _, code) = sync(&config, &[]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("processed:  1"), "{}", stdout);
    assert!(stdout.contains("skipped:    1"), "{}", stdout);
}

#[test]
fn test_stats_and_items() {
    let (_tmp, config) = setup_test_env();
    sync(&config, &[]);

    let (stdout, _, code) = run_docsync(&config, &["stats"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("Items:       2"), "{}", stdout);
    assert!(stdout.contains("Units:       3"), "{}", stdout);
    assert!(stdout.contains("2 document(s), 3 unit(s)"), "{}", stdout);

    let (stdout, _, code) = run_docsync(&config, &["items", "--status", "success"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("quarterly.pptx"));
    assert!(stdout.contains("onboarding.pptx"));
    assert!(stdout.contains("2 item(s)"));

    let (stdout, _, _) = run_docsync(&config, &["items", "--status", "failed"]);
    assert!(stdout.contains("No items."));

    let (_, stderr, code) = run_docsync(&config, &["items", "--status", "done"]);
    assert_ne!(code, Some(0));
    assert!(stderr.contains("unknown item status"), "{}", stderr);
}

#[test]
fn test_broken_document_fails_run_and_can_be_reset() {
    let (tmp, config) = setup_test_env();
    fs::write(tmp.path().join("files/broken.pptx"), b"not a zip archive").unwrap();

    let (stdout, _, code) = sync(&config, &[]);
    assert_eq!(code, Some(1));
    assert!(stdout.contains("processed:  2"), "{}", stdout);
    assert!(stdout.contains("failed:     1"), "{}", stdout);
    assert_eq!(stdout.lines().last(), Some("completed with failures"), "{}", stdout);

    let (stdout, _, _) = run_docsync(&config, &["items", "--status", "failed"]);
    let row = stdout
        .lines()
        .find(|line| line.contains("broken.pptx"))
        .expect("failed item listed");
    let identity = row.split_whitespace().next().unwrap().to_string();
    assert_eq!(identity.len(), 16);
    assert!(stdout.contains("error: extract failed"), "{}", stdout);

    let (stdout, _, code) = run_docsync(&config, &["log", &identity]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("[failed]"));
    assert!(stdout.contains("transfer"));
    assert!(stdout.contains("outcome"));

    let (stdout, _, code) = run_docsync(&config, &["reset-failed"]);
    assert_eq!(code, Some(0));
    assert!(stdout.contains("1 failed item(s) reset to pending"));

    let (stdout, _, _) = run_docsync(&config, &["items", "--status", "pending"]);
    assert!(stdout.contains("broken.pptx"));
}

#[test]
fn test_search_finds_relevant_slide() {
    let (_tmp, config) = setup_test_env();
    sync(&config, &[]);

    let (stdout, stderr, code) =
        run_docsync(&config, &["search", "quarterly revenue", "--top-k", "1"]);
    assert_eq!(code, Some(0), "search failed: {}", stderr);
    assert!(stdout.starts_with("1. ["), "{}", stdout);
    assert!(stdout.contains("quarterly.pptx / unit 1"), "{}", stdout);
    assert!(!stdout.contains("2. ["));

    let (stdout, _, _) = run_docsync(&config, &["search", "   "]);
    assert!(stdout.contains("No results."));
}

#[test]
fn test_unknown_connector_is_an_error() {
    let (_tmp, config) = setup_test_env();
    let (_, stderr, code) = run_docsync(&config, &["sync", "git", "--progress", "off"]);
    assert_ne!(code, Some(0));
    assert!(stderr.contains("Unknown connector"), "{}", stderr);
}

#[test]
fn test_missing_config_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, code) = run_docsync(&tmp.path().join("nope.toml"), &["stats"]);
    assert_ne!(code, Some(0));
    assert!(stderr.contains("Failed to read config file"), "{}", stderr);
}
