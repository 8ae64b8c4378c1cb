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

fn request(
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
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
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

struct Setup {
    class_b: String,
    student_ids: Vec<String>,
}

fn setup(stdin: &mut ChildStdin, reader: &mut BufReader<ChildStdout>, workspace: &PathBuf) -> Setup {
    request_ok(
        stdin,
        reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let class_a = request_ok(stdin, reader, "ca", "classes.create", json!({ "name": "5A" }));
    let class_a = class_a
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();
    let class_b = request_ok(stdin, reader, "cb", "classes.create", json!({ "name": "6A" }));
    let class_b = class_b
        .get("classId")
        .and_then(|v| v.as_str())
        .expect("classId")
        .to_string();

    let mut student_ids = Vec::new();
    for i in 0..5 {
        let res = request_ok(
            stdin,
            reader,
            &format!("s{}", i),
            "students.create",
            json!({
                "classId": class_a,
                "admissionNo": format!("N-{:03}", i),
                "firstName": "Kid",
                "lastName": format!("Delta{:02}", i),
            }),
        );
        student_ids.push(
            res.get("studentId")
                .and_then(|v| v.as_str())
                .expect("studentId")
                .to_string(),
        );
    }
    Setup {
        class_b,
        student_ids,
    }
}

#[test]
fn bulk_status_updates_every_selected_record_then_clears_selection() {
    let workspace = temp_dir("schoolhub-bulk-status");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _setup = setup(&mut stdin, &mut reader, &workspace);

    request_ok(&mut stdin, &mut reader, "open", "students.pageOpen", json!({}));
    request_ok(&mut stdin, &mut reader, "sv", "students.selectVisible", json!({}));

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "bs",
        "students.bulkStatus",
        json!({ "status": "Inactive" }),
    );
    assert_eq!(view.get("updatedCount").and_then(|v| v.as_u64()), Some(5));
    assert_eq!(view["selectedIds"].as_array().expect("selectedIds").len(), 0);
    for item in view["items"].as_array().expect("items") {
        assert_eq!(item.get("status").and_then(|v| v.as_str()), Some("Inactive"));
    }

    // The selection is required; an empty one is rejected up front.
    let resp = request(
        &mut stdin,
        &mut reader,
        "bs2",
        "students.bulkStatus",
        json!({ "status": "Active" }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp["error"].get("code").and_then(|v| v.as_str()),
        Some("bad_params")
    );
}

#[test]
fn bulk_status_partial_failure_reports_coarse_error_and_still_refreshes() {
    let workspace = temp_dir("schoolhub-bulk-partial");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let s = setup(&mut stdin, &mut reader, &workspace);

    request_ok(&mut stdin, &mut reader, "open", "students.pageOpen", json!({}));
    request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "students.toggleSelect",
        json!({ "studentId": s.student_ids[0] }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "t2",
        "students.toggleSelect",
        json!({ "studentId": s.student_ids[1] }),
    );

    // One selected record vanishes out from under the bulk update.
    request_ok(
        &mut stdin,
        &mut reader,
        "del",
        "students.delete",
        json!({ "studentId": s.student_ids[0] }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "bs",
        "students.bulkStatus",
        json!({ "status": "Inactive" }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp["error"].get("code").and_then(|v| v.as_str()),
        Some("bulk_partial_failure")
    );
    assert_eq!(resp["error"]["details"]["failed"], json!(1));
    assert_eq!(resp["error"]["details"]["attempted"], json!(2));

    // The page was re-fetched and the selection cleared regardless.
    let view = request_ok(&mut stdin, &mut reader, "rf", "students.refresh", json!({}));
    assert_eq!(view.get("totalCount").and_then(|v| v.as_u64()), Some(4));
    assert_eq!(view["selectedIds"].as_array().expect("selectedIds").len(), 0);
    let survivor = view["items"]
        .as_array()
        .expect("items")
        .iter()
        .find(|r| r.get("id").and_then(|v| v.as_str()) == Some(s.student_ids[1].as_str()))
        .expect("survivor present");
    assert_eq!(
        survivor.get("status").and_then(|v| v.as_str()),
        Some("Inactive")
    );
}

#[test]
fn promote_moves_the_selection_in_one_batched_call() {
    let workspace = temp_dir("schoolhub-promote");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let s = setup(&mut stdin, &mut reader, &workspace);

    let section = request_ok(
        &mut stdin,
        &mut reader,
        "sec",
        "sections.create",
        json!({ "classId": s.class_b, "name": "Blue" }),
    );
    let section_id = section
        .get("sectionId")
        .and_then(|v| v.as_str())
        .expect("sectionId");

    request_ok(&mut stdin, &mut reader, "open", "students.pageOpen", json!({}));
    request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "students.toggleSelect",
        json!({ "studentId": s.student_ids[0] }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "t2",
        "students.toggleSelect",
        json!({ "studentId": s.student_ids[1] }),
    );

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "pr",
        "students.promote",
        json!({ "classId": s.class_b, "sectionId": section_id }),
    );
    assert_eq!(view.get("movedCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(view["selectedIds"].as_array().expect("selectedIds").len(), 0);

    let moved: Vec<&serde_json::Value> = view["items"]
        .as_array()
        .expect("items")
        .iter()
        .filter(|r| r.get("classId").and_then(|v| v.as_str()) == Some(s.class_b.as_str()))
        .collect();
    assert_eq!(moved.len(), 2);
    for r in moved {
        assert_eq!(r.get("className").and_then(|v| v.as_str()), Some("6A"));
        assert_eq!(r.get("sectionName").and_then(|v| v.as_str()), Some("Blue"));
    }

    // Promoting into an unknown class is rejected before any move.
    request_ok(
        &mut stdin,
        &mut reader,
        "t3",
        "students.toggleSelect",
        json!({ "studentId": s.student_ids[2] }),
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "pr2",
        "students.promote",
        json!({ "classId": "nope" }),
    );
    assert_eq!(resp.get("ok").and_then(|v| v.as_bool()), Some(false));
    assert_eq!(
        resp["error"].get("code").and_then(|v| v.as_str()),
        Some("not_found")
    );
}

#[test]
fn export_writes_one_csv_for_the_whole_selection() {
    let workspace = temp_dir("schoolhub-export");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let _s = setup(&mut stdin, &mut reader, &workspace);

    request_ok(&mut stdin, &mut reader, "open", "students.pageOpen", json!({}));
    request_ok(&mut stdin, &mut reader, "sv", "students.selectVisible", json!({}));

    let view = request_ok(&mut stdin, &mut reader, "ex", "students.export", json!({}));
    assert_eq!(view.get("rowCount").and_then(|v| v.as_u64()), Some(5));
    assert_eq!(view["selectedIds"].as_array().expect("selectedIds").len(), 0);

    let path = view.get("path").and_then(|v| v.as_str()).expect("path");
    let text = std::fs::read_to_string(path).expect("read export file");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 6);
    assert_eq!(
        lines[0],
        "admission_no,first_name,last_name,class,section,status,email,phone"
    );
    assert!(lines[1].contains("Delta00"));
}

#[test]
fn bulk_delete_removes_selected_records_and_their_rows() {
    let workspace = temp_dir("schoolhub-bulk-delete");
    let (_child, mut stdin, mut reader) = spawn_daemon();
    let s = setup(&mut stdin, &mut reader, &workspace);

    request_ok(&mut stdin, &mut reader, "open", "students.pageOpen", json!({}));
    request_ok(
        &mut stdin,
        &mut reader,
        "t1",
        "students.toggleSelect",
        json!({ "studentId": s.student_ids[0] }),
    );
    request_ok(
        &mut stdin,
        &mut reader,
        "t2",
        "students.toggleSelect",
        json!({ "studentId": s.student_ids[1] }),
    );

    let view = request_ok(&mut stdin, &mut reader, "bd", "students.bulkDelete", json!({}));
    assert_eq!(view.get("deletedCount").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(view.get("totalCount").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(view["selectedIds"].as_array().expect("selectedIds").len(), 0);

    let listing = request_ok(&mut stdin, &mut reader, "ls", "students.list", json!({}));
    assert_eq!(listing.get("totalCount").and_then(|v| v.as_u64()), Some(3));
}
