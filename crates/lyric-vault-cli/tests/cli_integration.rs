use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use image::{Rgb, RgbImage};
use serde_json::Value;
use tempfile::TempDir;

fn temp_data_dir() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("failed to create temp dir: {err}"))
}

fn run_lv<I, S>(data_dir: &Path, args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_lv"))
        .arg("--data-dir")
        .arg(data_dir)
        .args(args)
        .env_remove("LYRIC_VAULT_DATA_DIR")
        .env_remove("LYRIC_VAULT_STORE")
        .env_remove("LYRIC_VAULT_KEY_FILE")
        .env_remove("LYRIC_VAULT_THUMBNAIL_ROOT")
        .env_remove("RUST_LOG")
        .output()
        .unwrap_or_else(|err| panic!("failed to execute lv binary: {err}"))
}

fn parse_stdout(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn run_json<I, S>(data_dir: &Path, args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_lv(data_dir, args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "lv command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }
    parse_stdout(&output)
}

/// Run a command expected to fail and return the error object.
fn run_error<I, S>(data_dir: &Path, args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_lv(data_dir, args);
    assert_eq!(output.status.code(), Some(1), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let payload = parse_stdout(&output);
    assert_eq!(as_str(&payload, "contract_version"), "cli.v1");
    payload
        .get("error")
        .cloned()
        .unwrap_or_else(|| panic!("missing error object in payload: {payload}"))
}

fn as_u64(value: &Value, key: &str) -> u64 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn artefacts(value: &Value) -> &Vec<Value> {
    value
        .get("artefacts")
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing artefacts array in payload: {value}"))
}

fn init_vault(data_dir: &Path) {
    let keygen = run_json(data_dir, ["keygen"]);
    assert_eq!(as_str(&keygen, "status"), "created");
}

fn create(data_dir: &Path, title: &str, content: &str, user: &str, role: &str) -> u64 {
    let created = run_json(
        data_dir,
        ["create", "--title", title, "--content", content, "--user", user, "--role", role],
    );
    as_u64(&created, "id")
}

#[test]
fn create_then_read_round_trips_through_the_store_file() {
    let dir = temp_data_dir();
    init_vault(dir.path());

    assert_eq!(create(dir.path(), "Test Song", "La la la", "user1", "user"), 1);

    let read = run_json(dir.path(), ["read", "--user", "user1", "--role", "user"]);
    assert_eq!(as_str(&read, "contract_version"), "cli.v1");
    assert_eq!(as_u64(&read, "count"), 1);
    let first = &artefacts(&read)[0];
    assert_eq!(as_u64(first, "id"), 1);
    assert_eq!(as_str(first, "title"), "Test Song");
    assert_eq!(as_str(first, "content"), "La la la");
    assert_eq!(as_str(first, "created_by"), "user1");

    let store = fs::read_to_string(dir.path().join("lyrics.jsonl"))
        .unwrap_or_else(|err| panic!("failed to read store file: {err}"));
    assert!(store.starts_with(r#"{"format":"lyric-vault.v1","next_id":2}"#), "{store}");
    assert!(!store.contains("La la la"), "plaintext leaked into store:\n{store}");
}

#[test]
fn ownership_and_admin_rules_apply_across_invocations() {
    let dir = temp_data_dir();
    init_vault(dir.path());
    let id = create(dir.path(), "Test Song", "La la la", "user1", "user").to_string();

    let denied = run_error(
        dir.path(),
        [
            "update", "--id", &id, "--title", "Hijack", "--content", "Mine", "--user", "user2",
            "--role", "user",
        ],
    );
    assert_eq!(as_str(&denied, "code"), "unauthorized");
    assert_eq!(as_str(&denied, "message"), "user2 is not authorized to update artefact 1");

    let updated = run_json(
        dir.path(),
        [
            "update", "--id", &id, "--title", "Test Song 2", "--content", "Na na na", "--user",
            "user1", "--role", "user",
        ],
    );
    assert_eq!(as_str(&updated, "title"), "Test Song 2");
    assert!(updated.get("modified_at").is_some());
    assert!(updated.get("content").is_none());

    let deleted = run_json(dir.path(), ["delete", "--id", &id, "--user", "admin", "--role", "admin"]);
    assert_eq!(as_u64(&deleted, "deleted"), 1);

    let read = run_json(dir.path(), ["read", "--user", "user1", "--role", "user"]);
    assert_eq!(as_u64(&read, "count"), 0);
}

#[test]
fn ids_keep_counting_after_deletes() {
    let dir = temp_data_dir();
    init_vault(dir.path());
    for title in ["One", "Two", "Three"] {
        create(dir.path(), title, "Words", "user1", "user");
    }
    run_json(dir.path(), ["delete", "--id", "2", "--user", "user1", "--role", "user"]);

    assert_eq!(create(dir.path(), "Four", "Words", "user1", "user"), 4);
}

#[test]
fn domain_errors_are_reported_as_json_with_codes() {
    let dir = temp_data_dir();
    init_vault(dir.path());

    let invalid = run_error(
        dir.path(),
        ["create", "--title", "bad$char", "--content", "x", "--user", "user1", "--role", "user"],
    );
    assert_eq!(as_str(&invalid, "code"), "invalid_input");

    let unknown = run_error(dir.path(), ["read", "--user", "user1", "--role", "guest"]);
    assert_eq!(as_str(&unknown, "code"), "unknown_role");
    assert_eq!(as_str(&unknown, "message"), "unknown role: guest");

    let missing = run_error(dir.path(), ["delete", "--id", "9", "--user", "admin", "--role", "admin"]);
    assert_eq!(as_str(&missing, "code"), "not_found");
}

#[test]
fn missing_key_file_is_a_key_material_error() {
    let dir = temp_data_dir();
    let err = run_error(dir.path(), ["read", "--user", "user1", "--role", "user"]);
    assert_eq!(as_str(&err, "code"), "key_material_error");
}

#[test]
fn keygen_refuses_to_overwrite_without_force() {
    let dir = temp_data_dir();
    init_vault(dir.path());
    let key_path = dir.path().join("secret.key");
    let original = fs::read_to_string(&key_path)
        .unwrap_or_else(|err| panic!("failed to read key file: {err}"));
    assert_eq!(original.trim().len(), 64);

    let err = run_error(dir.path(), ["keygen"]);
    assert_eq!(as_str(&err, "code"), "key_material_error");
    let unchanged = fs::read_to_string(&key_path)
        .unwrap_or_else(|err| panic!("failed to read key file: {err}"));
    assert_eq!(unchanged, original);

    run_json(dir.path(), ["keygen", "--force"]);
    let replaced = fs::read_to_string(&key_path)
        .unwrap_or_else(|err| panic!("failed to read key file: {err}"));
    assert_ne!(replaced, original);
}

#[test]
fn tampered_store_fails_read_and_shows_in_verify() {
    let dir = temp_data_dir();
    init_vault(dir.path());
    create(dir.path(), "Good", "Words", "user1", "user");
    create(dir.path(), "Bad", "Words", "user1", "user");

    let clean = run_json(dir.path(), ["verify", "--user", "admin", "--role", "admin"]);
    assert_eq!(clean.get("clean"), Some(&Value::Bool(true)));
    assert_eq!(as_u64(&clean, "checked"), 2);

    let store_path = dir.path().join("lyrics.jsonl");
    let body = fs::read_to_string(&store_path)
        .unwrap_or_else(|err| panic!("failed to read store file: {err}"));
    let mut lines = body.lines().map(str::to_string).collect::<Vec<_>>();
    let mut record: Value = serde_json::from_str(&lines[2])
        .unwrap_or_else(|err| panic!("failed to parse record line: {err}"));
    record["checksum"] = Value::String("0".repeat(64));
    lines[2] = record.to_string();
    fs::write(&store_path, lines.join("\n") + "\n")
        .unwrap_or_else(|err| panic!("failed to write store file: {err}"));

    let err = run_error(dir.path(), ["read", "--user", "user1", "--role", "user"]);
    assert_eq!(as_str(&err, "code"), "decryption_error");
    assert_eq!(as_str(&err, "message"), "decryption failed for artefact 2: checksum mismatch");

    let report = run_json(dir.path(), ["verify", "--user", "admin", "--role", "admin"]);
    assert_eq!(report.get("clean"), Some(&Value::Bool(false)));
    assert_eq!(report["checksum_mismatches"], serde_json::json!([2]));
    assert_eq!(report["undecryptable"], serde_json::json!([]));
}

#[test]
fn create_with_thumbnail_writes_bounded_png() {
    let dir = temp_data_dir();
    init_vault(dir.path());
    let image_path = dir.path().join("cover.png");
    RgbImage::from_pixel(256, 512, Rgb([10, 20, 30]))
        .save(&image_path)
        .unwrap_or_else(|err| panic!("failed to write fixture image: {err}"));
    let image_arg = image_path.to_string_lossy().to_string();

    let created = run_json(
        dir.path(),
        [
            "create-with-thumbnail", "--title", "Sample Song", "--content", "Lyrics of the song",
            "--image", &image_arg, "--category", "lyrics", "--user", "admin", "--role", "admin",
        ],
    );
    assert_eq!(as_u64(&created, "id"), 1);
    let thumbnail = PathBuf::from(as_str(&created, "thumbnail"));
    assert_eq!(thumbnail, dir.path().join("thumbnails").join("lyrics").join("1.png"));
    let dimensions = image::image_dimensions(&thumbnail)
        .unwrap_or_else(|err| panic!("failed to read thumbnail: {err}"));
    assert_eq!(dimensions, (64, 128));
}

#[test]
fn failed_thumbnail_leaves_no_artefact() {
    let dir = temp_data_dir();
    init_vault(dir.path());
    let missing = dir.path().join("missing.png").to_string_lossy().to_string();

    let err = run_error(
        dir.path(),
        [
            "create-with-thumbnail", "--title", "Sample Song", "--content", "Lyrics", "--image",
            &missing, "--category", "lyrics", "--user", "user1", "--role", "user",
        ],
    );
    assert_eq!(as_str(&err, "code"), "thumbnail_error");

    let read = run_json(dir.path(), ["read", "--user", "user1", "--role", "user"]);
    assert_eq!(as_u64(&read, "count"), 0);
    assert_eq!(create(dir.path(), "Next", "Words", "user1", "user"), 2);
}

#[test]
fn path_overrides_take_precedence_over_data_dir() {
    let dir = temp_data_dir();
    let key_file = dir.path().join("keys").join("vault.key");
    let store = dir.path().join("custom.jsonl");
    let key_arg = key_file.to_string_lossy().to_string();
    let store_arg = store.to_string_lossy().to_string();

    run_json(dir.path(), ["--key-file", &key_arg, "keygen"]);
    run_json(
        dir.path(),
        [
            "--key-file", &key_arg, "--store", &store_arg, "create", "--title", "Song",
            "--content", "Words", "--user", "user1", "--role", "user",
        ],
    );

    assert!(key_file.exists());
    assert!(store.exists());
    assert!(!dir.path().join("lyrics.jsonl").exists());
    assert!(!dir.path().join("secret.key").exists());
}
