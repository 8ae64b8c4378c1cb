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

fn create_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    class_id: &str,
    admission_no: &str,
    first: &str,
    last: &str,
) -> String {
    let res = request_ok(
        stdin,
        reader,
        admission_no,
        "students.create",
        json!({
            "classId": class_id,
            "admissionNo": admission_no,
            "firstName": first,
            "lastName": last,
        }),
    );
    res.get("studentId")
        .and_then(|v| v.as_str())
        .expect("studentId")
        .to_string()
}

#[test]
fn roster_page_filters_paginates_and_scopes_selection() {
    let workspace = temp_dir("schoolhub-roster");
    let (_child, mut stdin, mut reader) = spawn_daemon();

    request_ok(
        &mut stdin,
        &mut reader,
        "ws",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let class_a = request_ok(
        &mut stdin,
        &mut reader,
        "ca",
        "classes.create",
        json!({ "name": "7A" }),
    );
    let class_a = class_a.get("classId").and_then(|v| v.as_str()).expect("classId");
    let class_b = request_ok(
        &mut stdin,
        &mut reader,
        "cb",
        "classes.create",
        json!({ "name": "7B" }),
    );
    let class_b = class_b.get("classId").and_then(|v| v.as_str()).expect("classId");

    // 12 students in 7A, 4 in 7B: 16 total, 2 pages at size 10.
    for i in 0..12 {
        create_student(
            &mut stdin,
            &mut reader,
            class_a,
            &format!("A-{:03}", i),
            "Student",
            &format!("Alpha{:02}", i),
        );
    }
    create_student(&mut stdin, &mut reader, class_b, "B-001", "Maria", "Lopez");
    create_student(&mut stdin, &mut reader, class_b, "B-002", "Mark", "Twain");
    create_student(&mut stdin, &mut reader, class_b, "B-003", "Sarah", "Lin");
    create_student(&mut stdin, &mut reader, class_b, "B-004", "Pat", "Quinn");

    let view = request_ok(&mut stdin, &mut reader, "open", "students.pageOpen", json!({}));
    assert_eq!(view.get("totalCount").and_then(|v| v.as_u64()), Some(16));
    assert_eq!(view.get("totalPages").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(view.get("page").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(view["items"].as_array().expect("items").len(), 10);

    // Page 2 holds the remaining 6 records.
    let view = request_ok(
        &mut stdin,
        &mut reader,
        "p2",
        "students.setPage",
        json!({ "page": 2 }),
    );
    assert_eq!(view["items"].as_array().expect("items").len(), 6);

    // Filtering down to 7B resets the page and shrinks the window to 4.
    let view = request_ok(
        &mut stdin,
        &mut reader,
        "fb",
        "students.setFilter",
        json!({ "name": "classId", "value": class_b }),
    );
    assert_eq!(view.get("page").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(view.get("totalPages").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(view.get("totalCount").and_then(|v| v.as_u64()), Some(4));

    // Case-insensitive substring search over the remaining records.
    let view = request_ok(
        &mut stdin,
        &mut reader,
        "se",
        "students.setSearch",
        json!({ "query": "MAR" }),
    );
    let names: Vec<&str> = view["items"]
        .as_array()
        .expect("items")
        .iter()
        .map(|r| r.get("name").and_then(|v| v.as_str()).expect("name"))
        .collect();
    assert_eq!(names, vec!["Maria Lopez", "Mark Twain"]);
    assert_eq!(view.get("totalCount").and_then(|v| v.as_u64()), Some(2));

    // Clear search and filter, then select-all on page 1 only.
    request_ok(
        &mut stdin,
        &mut reader,
        "se2",
        "students.setSearch",
        json!({ "query": "" }),
    );
    let view = request_ok(
        &mut stdin,
        &mut reader,
        "fall",
        "students.setFilter",
        json!({ "name": "classId", "value": "all" }),
    );
    assert_eq!(view.get("totalCount").and_then(|v| v.as_u64()), Some(16));

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "sv",
        "students.selectVisible",
        json!({}),
    );
    let selected = view["selectedIds"].as_array().expect("selectedIds");
    assert_eq!(selected.len(), 10);
    assert_eq!(view.get("allVisibleSelected").and_then(|v| v.as_bool()), Some(true));

    // Page 2 identifiers stayed unselected, so its checkbox is off.
    let view = request_ok(
        &mut stdin,
        &mut reader,
        "pg2",
        "students.setPage",
        json!({ "page": 2 }),
    );
    assert_eq!(
        view.get("allVisibleSelected").and_then(|v| v.as_bool()),
        Some(false)
    );
    let page2_ids: Vec<&str> = view["items"]
        .as_array()
        .expect("items")
        .iter()
        .map(|r| r.get("id").and_then(|v| v.as_str()).expect("id"))
        .collect();
    let selected: Vec<&str> = view["selectedIds"]
        .as_array()
        .expect("selectedIds")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    for id in page2_ids {
        assert!(!selected.contains(&id));
    }

    // Toggle removes a single id.
    let first_selected = selected[0].to_string();
    let view = request_ok(
        &mut stdin,
        &mut reader,
        "tg",
        "students.toggleSelect",
        json!({ "studentId": first_selected }),
    );
    assert_eq!(view["selectedIds"].as_array().expect("selectedIds").len(), 9);

    // Refresh keeps page, filters, and the surviving selection.
    let view = request_ok(&mut stdin, &mut reader, "rf", "students.refresh", json!({}));
    assert_eq!(view.get("page").and_then(|v| v.as_u64()), Some(2));
    assert_eq!(view["selectedIds"].as_array().expect("selectedIds").len(), 9);
    assert_eq!(view.get("totalCount").and_then(|v| v.as_u64()), Some(16));

    // A second identical refresh changes nothing.
    let again = request_ok(&mut stdin, &mut reader, "rf2", "students.refresh", json!({}));
    assert_eq!(again["items"], view["items"]);
}

#[test]
fn page_open_applies_initial_filters_and_clamps_page() {
    let workspace = temp_dir("schoolhub-roster-open");
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
        json!({ "name": "8C" }),
    );
    let class_id = class_id.get("classId").and_then(|v| v.as_str()).expect("classId");
    for i in 0..3 {
        create_student(
            &mut stdin,
            &mut reader,
            class_id,
            &format!("C-{:03}", i),
            "Kid",
            &format!("Gamma{}", i),
        );
    }

    let view = request_ok(
        &mut stdin,
        &mut reader,
        "open",
        "students.pageOpen",
        json!({ "classId": class_id, "status": "Active" }),
    );
    assert_eq!(view.get("totalCount").and_then(|v| v.as_u64()), Some(3));
    assert_eq!(view["filters"]["status"], json!("Active"));

    // Requesting a page past the end clamps to the last valid page.
    let view = request_ok(
        &mut stdin,
        &mut reader,
        "pg",
        "students.setPage",
        json!({ "page": 9 }),
    );
    assert_eq!(view.get("page").and_then(|v| v.as_u64()), Some(1));
    assert_eq!(view["items"].as_array().expect("items").len(), 3);
}
