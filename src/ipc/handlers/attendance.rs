use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_date, get_optional_str, get_page, get_required_date, get_required_str,
    get_string_array, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::listview::{page_slice, page_window, PAGE_SIZE};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;

const STATUSES: &[&str] = &["present", "absent", "late", "excused"];

#[derive(Debug, Clone)]
struct BasicStudent {
    id: String,
    display_name: String,
    active: bool,
}

fn parse_status(raw: &str) -> Result<String, HandlerErr> {
    let t = raw.trim().to_lowercase();
    if STATUSES.contains(&t.as_str()) {
        Ok(t)
    } else {
        Err(HandlerErr::bad_params(format!(
            "status must be one of {}",
            STATUSES.join(", ")
        )))
    }
}

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn list_students_for_class(
    conn: &Connection,
    class_id: &str,
) -> Result<Vec<BasicStudent>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT id, last_name, first_name, status
             FROM students
             WHERE class_id = ?
             ORDER BY last_name, first_name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([class_id], |r| {
        let last: String = r.get(1)?;
        let first: String = r.get(2)?;
        let status: String = r.get(3)?;
        Ok(BasicStudent {
            id: r.get(0)?,
            display_name: format!("{}, {}", last, first),
            active: status == "Active",
        })
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn attendance_day_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_required_date(params, "date")?;

    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }
    let students = list_students_for_class(conn, &class_id)?;

    let mut by_student: HashMap<String, (String, Option<String>)> = HashMap::new();
    let mut stmt = conn
        .prepare(
            "SELECT student_id, status, remark
             FROM attendance_days
             WHERE class_id = ? AND date = ?",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map((&class_id, &date), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    for (student_id, status, remark) in rows {
        by_student.insert(student_id, (status, remark));
    }

    let students_json: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "displayName": s.display_name,
                "active": s.active,
            })
        })
        .collect();
    // Unmarked students surface with a null status, not a default.
    let rows_json: Vec<serde_json::Value> = students
        .iter()
        .map(|s| {
            let (status, remark) = match by_student.get(&s.id) {
                Some((st, rm)) => (Some(st.clone()), rm.clone()),
                None => (None, None),
            };
            json!({
                "studentId": s.id,
                "status": status,
                "remark": remark,
            })
        })
        .collect();

    Ok(json!({
        "classId": class_id,
        "date": date,
        "students": students_json,
        "rows": rows_json,
    }))
}

fn attendance_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let student_id = get_required_str(params, "studentId")?;
    let date = get_required_date(params, "date")?;
    let status = parse_status(&get_required_str(params, "status")?)?;
    let remark = get_optional_str(params, "remark");

    let student_in_class = conn
        .query_row(
            "SELECT 1 FROM students WHERE class_id = ? AND id = ?",
            (&class_id, &student_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .is_some();
    if !student_in_class {
        return Err(HandlerErr::not_found("student not found"));
    }

    conn.execute(
        "INSERT INTO attendance_days(class_id, student_id, date, status, remark)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, date) DO UPDATE SET
           class_id = excluded.class_id,
           status = excluded.status,
           remark = excluded.remark",
        (&class_id, &student_id, &date, &status, &remark),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e).with_table("attendance_days"))?;

    Ok(json!({ "ok": true }))
}

fn attendance_bulk_mark(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let date = get_required_date(params, "date")?;
    let status = parse_status(&get_required_str(params, "status")?)?;
    let student_ids = get_string_array(params, "studentIds")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    let mut marked = 0usize;
    for student_id in &student_ids {
        let exists = tx
            .query_row(
                "SELECT 1 FROM students WHERE class_id = ? AND id = ?",
                (&class_id, student_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()
            .map_err(|e| HandlerErr::db("db_query_failed", e))?
            .is_some();
        if !exists {
            continue;
        }
        tx.execute(
            "INSERT INTO attendance_days(class_id, student_id, date, status, remark)
             VALUES(?, ?, ?, ?, NULL)
             ON CONFLICT(student_id, date) DO UPDATE SET
               class_id = excluded.class_id,
               status = excluded.status",
            (&class_id, student_id, &date, &status),
        )
        .map_err(|e| HandlerErr::db("db_update_failed", e).with_table("attendance_days"))?;
        marked += 1;
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "markedCount": marked }))
}

fn attendance_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_optional_str(params, "classId");
    let student_id = get_optional_str(params, "studentId");
    if class_id.is_none() && student_id.is_none() {
        return Err(HandlerErr::bad_params("missing classId or studentId"));
    }
    let from = get_optional_date(params, "from")?;
    let to = get_optional_date(params, "to")?;
    let status = match get_optional_str(params, "status") {
        Some(raw) => Some(parse_status(&raw)?),
        None => None,
    };

    // The date range is a dedicated filter, not part of the generic
    // equality set; dates compare lexically in YYYY-MM-DD form.
    let mut sql = String::from(
        "SELECT a.class_id, a.student_id, s.last_name, s.first_name, a.date, a.status, a.remark
         FROM attendance_days a
         JOIN students s ON s.id = a.student_id
         WHERE 1=1",
    );
    let mut binds: Vec<String> = Vec::new();
    if let Some(cid) = class_id {
        sql.push_str(" AND a.class_id = ?");
        binds.push(cid);
    }
    if let Some(sid) = student_id {
        sql.push_str(" AND a.student_id = ?");
        binds.push(sid);
    }
    if let Some(f) = from {
        sql.push_str(" AND a.date >= ?");
        binds.push(f);
    }
    if let Some(t) = to {
        sql.push_str(" AND a.date <= ?");
        binds.push(t);
    }
    if let Some(st) = status {
        sql.push_str(" AND a.status = ?");
        binds.push(st);
    }
    sql.push_str(" ORDER BY a.date DESC, s.last_name, s.first_name");

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let rows = stmt
        .query_map(rusqlite::params_from_iter(binds.iter()), |r| {
            let last: String = r.get(2)?;
            let first: String = r.get(3)?;
            Ok(json!({
                "classId": r.get::<_, String>(0)?,
                "studentId": r.get::<_, String>(1)?,
                "studentName": format!("{}, {}", last, first),
                "date": r.get::<_, String>(4)?,
                "status": r.get::<_, String>(5)?,
                "remark": r.get::<_, Option<String>>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;

    let window = page_window(rows.len(), PAGE_SIZE, get_page(params));
    Ok(json!({
        "entries": page_slice(&rows, &window),
        "page": window.page,
        "totalPages": window.total_pages,
        "totalCount": window.total_count,
    }))
}

fn with_conn(
    state: &mut AppState,
    req: &Request,
    f: fn(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.dayOpen" => Some(with_conn(state, req, attendance_day_open)),
        "attendance.mark" => Some(with_conn(state, req, attendance_mark)),
        "attendance.bulkMark" => Some(with_conn(state, req, attendance_bulk_mark)),
        "attendance.list" => Some(with_conn(state, req, attendance_list)),
        _ => None,
    }
}
