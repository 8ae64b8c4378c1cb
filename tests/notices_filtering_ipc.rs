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

fn seed_notices(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>) {
    // 13 notices: 7 for everyone, 4 for teachers, 2 for parents.
    for i in 0..7 {
        request_ok(
            stdin,
            reader,
            &format!("n{}", i),
            "notices.create",
            json!({
                "title": format!("General bulletin {:02}", i),
                "body": "School-wide announcement",
                "target": "all",
                "priority": if i == 0 { "urgent" } else { "normal" },
                "publishDate": format!("2026-03-{:02}", i + 1),
            }),
        );
    }
    for i in 0..4 {
        request_ok(
            stdin,
            reader,
            &format!("t{}", i),
            "notices.create",
            json!({
                "title": format!("Staff meeting {:02}", i),
                "body": "Agenda attached",
                "target": "teachers",
                "priority": "high",
                "publishDate": format!("2026-03-{:02}", i + 10),
            }),
        );
    }
    for i in 0..2 {
        request_ok(
            stdin,
            reader,
            &format!("p{}", i),
            "notices.create",
            json!({
                "title": format!("Fee reminder {:02}", i),
                "body": "Term fees are due",
                "target": "parents",
                "priority": "normal",
                "publishDate": format!("2026-03-{:02}", i + 20),
            }),
        );
    }
}

#[test]
fn notices_list_filters_and_paginates() {
    let workspace = temp_dir("schoolhub-notices");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_notices(&mut stdin, &mut reader);

    let page1 = request_ok(&mut stdin, &mut reader, "l1", "notices.list", json!({}));
    assert_eq!(page1.get("totalCount").and_then(|v| v.as_u64()), Some(13));
    assert_eq!(page1.get("totalPages").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(page1["notices"].as_array().expect("notices").len(), 10);

    let page2 = request_ok(
        &mut stdin,
        &mut reader,
        "l2",
        "notices.list",
        json!({ "page": 2 }),
    );
    assert_eq!(page2["notices"].as_array().expect("notices").len(), 3);

    // A page past the end clamps to the last valid page, never an empty one.
    let clamped = request_ok(
        &mut stdin,
        &mut reader,
        "l9",
        "notices.list",
        json!({ "page": 9 }),
    );
    assert_eq!(clamped.get("page").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(clamped["notices"], page2["notices"]);

    // Equality filters AND together.
    let teachers_high = request_ok(
        &mut stdin,
        &mut reader,
        "f1",
        "notices.list",
        json!({ "target": "teachers", "priority": "high" }),
    );
    assert_eq!(
        teachers_high.get("totalCount").and_then(|v| v.as_u64()),
        Some(4)
    );
    let teachers_urgent = request_ok(
        &mut stdin,
        &mut reader,
        "f2",
        "notices.list",
        json!({ "target": "teachers", "priority": "urgent" }),
    );
    assert_eq!(
        teachers_urgent.get("totalCount").and_then(|v| v.as_u64()),
        Some(0)
    );
    assert_eq!(
        teachers_urgent.get("page").and_then(|v| v.as_u64()),
        Some(1)
    );

    // "all" is the no-constraint sentinel, not a target match.
    let explicit_all = request_ok(
        &mut stdin,
        &mut reader,
        "f3",
        "notices.list",
        json!({ "target": "all" }),
    );
    assert_eq!(
        explicit_all.get("totalCount").and_then(|v| v.as_u64()),
        Some(13)
    );

    // Case-insensitive substring search over title and body.
    let search = request_ok(
        &mut stdin,
        &mut reader,
        "s1",
        "notices.list",
        json!({ "search": "FEES ARE DUE" }),
    );
    assert_eq!(search.get("totalCount").and_then(|v| v.as_u64()), Some(2));
}

#[test]
fn notice_visibility_follows_the_signed_in_role() {
    let workspace = temp_dir("schoolhub-notices-role");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    seed_notices(&mut stdin, &mut reader);

    request_ok(
        &mut stdin,
        &mut reader,
        "li",
        "session.login",
        json!({ "role": "teacher", "profileId": "t-1", "displayName": "Ms. Frizzle" }),
    );
    let listing = request_ok(&mut stdin, &mut reader, "l1", "notices.list", json!({}));
    // 7 school-wide + 4 teacher notices; parent notices are out of reach.
    assert_eq!(listing.get("totalCount").and_then(|v| v.as_u64()), Some(11));

    request_ok(&mut stdin, &mut reader, "lo", "session.logout", json!({}));
    let listing = request_ok(&mut stdin, &mut reader, "l2", "notices.list", json!({}));
    assert_eq!(listing.get("totalCount").and_then(|v| v.as_u64()), Some(13));
}

#[test]
fn notice_update_and_delete_round_trip() {
    let workspace = temp_dir("schoolhub-notices-crud");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "c",
        "notices.create",
        json!({ "title": "Sports day", "body": "Bring water", "publishDate": "2026-05-01" }),
    );
    let notice_id = created
        .get("noticeId")
        .and_then(|v| v.as_str())
        .expect("noticeId");

    request_ok(
        &mut stdin,
        &mut reader,
        "u",
        "notices.update",
        json!({ "noticeId": notice_id, "priority": "urgent", "target": "students" }),
    );
    let listing = request_ok(
        &mut stdin,
        &mut reader,
        "l",
        "notices.list",
        json!({ "priority": "urgent" }),
    );
    assert_eq!(listing.get("totalCount").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(
        listing["notices"][0].get("target").and_then(|v| v.as_str()),
        Some("students")
    );

    request_ok(
        &mut stdin,
        &mut reader,
        "d",
        "notices.delete",
        json!({ "noticeId": notice_id }),
    );
    let listing = request_ok(&mut stdin, &mut reader, "l2", "notices.list", json!({}));
    assert_eq!(listing.get("totalCount").and_then(|v| v.as_u64()), Some(0));
}
