use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_daemon() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_schoolhubd");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn schoolhubd");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

#[test]
fn bundle_export_import_round_trip_carries_the_data() {
    let workspace = temp_dir("schoolhub-bundle-src");
    let second_workspace = temp_dir("schoolhub-bundle-dst");
    let bundle_path = temp_dir("schoolhub-bundle-out").join("school.shbundle");

    let (_child, mut stdin, mut reader) = spawn_daemon();

    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_id = request_ok(
        &mut stdin,
        &mut reader,
        "c",
        "classes.create",
        json!({ "name": "1A" }),
    );
    let class_id = class_id
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    request_ok(
        &mut stdin,
        &mut reader,
        "s",
        "students.create",
        json!({
            "classId": class_id,
            "admissionNo": "BK-001",
            "firstName": "Noor",
            "lastName": "Aziz",
        }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "ex",
        "workspace.exportBundle",
        json!({ "outPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        exported.get("bundleFormat").and_then(|v| v.as_str()),
        Some("schoolhub-workspace-v1")
    );
    let sha = exported
        .get("dbSha256")
        .and_then(|v| v.as_str())
        .expect("dbSha256");
    assert_eq!(sha.len(), 64);
    assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(bundle_path.is_file());

    // Import into a fresh workspace and find the same records.
    request_ok(
        &mut stdin,
        &mut reader,
        "ws2",
        "workspace.select",
        json!({ "path": second_workspace.to_string_lossy() }),
    );
    let empty = request_ok(&mut stdin, &mut reader, "l0", "students.list", json!({}));
    assert_eq!(empty.get("totalCount").and_then(|v| v.as_u64()), Some(0));

    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "im",
        "workspace.importBundle",
        json!({ "inPath": bundle_path.to_string_lossy() }),
    );
    assert_eq!(
        imported.get("bundleFormatDetected").and_then(|v| v.as_str()),
        Some("schoolhub-workspace-v1")
    );
    assert_eq!(
        imported.get("checksumVerified").and_then(|v| v.as_bool()),
        Some(true)
    );

    let listing = request_ok(&mut stdin, &mut reader, "l1", "students.list", json!({}));
    assert_eq!(listing.get("totalCount").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(
        listing["students"][0].get("admissionNo").and_then(|v| v.as_str()),
        Some("BK-001")
    );
}

#[test]
fn bare_sqlite_files_import_as_legacy_backups() {
    let workspace = temp_dir("schoolhub-bundle-legacy-src");
    let second_workspace = temp_dir("schoolhub-bundle-legacy-dst");

    let (_child, mut stdin, mut reader) = spawn_daemon();

    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "c",
        "classes.create",
        json!({ "name": "1B" }),
    );

    // Hand the raw database over as a legacy backup.
    request_ok(
        &mut stdin,
        &mut reader,
        "ws2",
        "workspace.select",
        json!({ "path": second_workspace.to_string_lossy() }),
    );
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "im",
        "workspace.importBundle",
        json!({ "inPath": workspace.join("school.sqlite3").to_string_lossy() }),
    );
    assert_eq!(
        imported.get("bundleFormatDetected").and_then(|v| v.as_str()),
        Some("legacy-sqlite3")
    );

    let classes = request_ok(&mut stdin, &mut reader, "cl", "classes.list", json!({}));
    assert_eq!(classes["classes"].as_array().expect("classes").len(), 1);
}
