use crate::export::{export_students_csv, StudentExportRow};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_date, get_optional_str, get_page, get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::listview::{paginate, FilterSet, ListController};
use crate::session::{scope_of, Scope, SessionContext};
use chrono::Utc;
use rusqlite::{params_from_iter, Connection, OptionalExtension, ToSql};
use serde_json::json;
use uuid::Uuid;

/// Fields the roster search box matches against.
const SEARCH_FIELDS: &[&str] = &["name", "admissionNo", "email", "phone"];

const FILTER_NAMES: &[&str] = &["classId", "sectionId", "status"];

fn now_stamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

fn parse_status(raw: &str) -> Result<String, HandlerErr> {
    match raw.trim() {
        "Active" => Ok("Active".to_string()),
        "Inactive" => Ok("Inactive".to_string()),
        other => Err(HandlerErr::bad_params(format!(
            "status must be Active or Inactive, got {}",
            other
        ))),
    }
}

fn fetch_roster(
    conn: &Connection,
    session: Option<&SessionContext>,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let base = "SELECT s.id, s.admission_no, s.first_name, s.last_name, s.email, s.phone,
                       s.status, s.admission_date, s.updated_at,
                       s.class_id, c.name AS class_name,
                       s.section_id, sec.name AS section_name,
                       s.parent_id, p.first_name AS parent_first, p.last_name AS parent_last
                FROM students s
                JOIN classes c ON c.id = s.class_id
                LEFT JOIN sections sec ON sec.id = s.section_id
                LEFT JOIN parents p ON p.id = s.parent_id";
    let order = " ORDER BY s.last_name, s.first_name, s.id";

    let (where_clause, binds): (&str, Vec<String>) = match scope_of(session) {
        Scope::All => ("", Vec::new()),
        Scope::TeacherOf(tid) => (" WHERE c.teacher_id = ?", vec![tid]),
        Scope::ParentOf(pid) => (" WHERE s.parent_id = ?", vec![pid]),
        Scope::StudentSelf(sid) => (" WHERE s.id = ?", vec![sid]),
    };
    let sql = format!("{}{}{}", base, where_clause, order);

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map(params_from_iter(binds.iter()), |r| {
        let first_name: String = r.get(2)?;
        let last_name: String = r.get(3)?;
        let parent_first: Option<String> = r.get(14)?;
        let parent_last: Option<String> = r.get(15)?;
        let parent_name = match (parent_first, parent_last) {
            (Some(f), Some(l)) => Some(format!("{} {}", f, l)),
            _ => None,
        };
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "admissionNo": r.get::<_, String>(1)?,
            "name": format!("{} {}", first_name, last_name),
            "firstName": first_name,
            "lastName": last_name,
            "email": r.get::<_, Option<String>>(4)?,
            "phone": r.get::<_, Option<String>>(5)?,
            "status": r.get::<_, String>(6)?,
            "admissionDate": r.get::<_, Option<String>>(7)?,
            "updatedAt": r.get::<_, Option<String>>(8)?,
            "classId": r.get::<_, String>(9)?,
            "className": r.get::<_, String>(10)?,
            "sectionId": r.get::<_, Option<String>>(11)?,
            "sectionName": r.get::<_, Option<String>>(12)?,
            "parentId": r.get::<_, Option<String>>(13)?,
            "parentName": parent_name,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn view_json(ctrl: &ListController) -> serde_json::Value {
    let window = ctrl.window();
    json!({
        "items": ctrl.visible(),
        "page": window.page,
        "totalPages": window.total_pages,
        "totalCount": window.total_count,
        "selectedIds": ctrl.selected_ids(),
        "allVisibleSelected": ctrl.all_visible_selected(),
        "filters": {
            "classId": ctrl.filter_value("classId"),
            "sectionId": ctrl.filter_value("sectionId"),
            "status": ctrl.filter_value("status"),
        },
        "search": ctrl.search_query(),
    })
}

fn handle_page_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let records = {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        match fetch_roster(conn, state.session.as_ref()) {
            Ok(r) => r,
            Err(e) => return e.response(&req.id),
        }
    };

    let mut ctrl = ListController::new(SEARCH_FIELDS);
    ctrl.set_records(records);
    for name in FILTER_NAMES {
        if let Some(value) = get_optional_str(&req.params, name) {
            ctrl.set_filter(name, &value);
        }
    }
    if let Some(query) = get_optional_str(&req.params, "search") {
        ctrl.set_search(&query);
    }

    let view = view_json(&ctrl);
    state.roster = Some(ctrl);
    ok(&req.id, view)
}

fn handle_refresh(state: &mut AppState, req: &Request) -> serde_json::Value {
    let records = {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        match fetch_roster(conn, state.session.as_ref()) {
            Ok(r) => r,
            Err(e) => return e.response(&req.id),
        }
    };
    let Some(ctrl) = state.roster.as_mut() else {
        return err(&req.id, "no_roster", "open the students page first", None);
    };
    ctrl.set_records(records);
    ok(&req.id, view_json(ctrl))
}

fn handle_set_filter(state: &mut AppState, req: &Request) -> serde_json::Value {
    let name = match get_required_str(&req.params, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if !FILTER_NAMES.contains(&name.as_str()) {
        return err(
            &req.id,
            "bad_params",
            format!("unknown filter: {}", name),
            None,
        );
    }
    let Some(value) = req.params.get("value").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing value", None);
    };
    let Some(ctrl) = state.roster.as_mut() else {
        return err(&req.id, "no_roster", "open the students page first", None);
    };
    ctrl.set_filter(&name, value);
    ok(&req.id, view_json(ctrl))
}

fn handle_set_search(state: &mut AppState, req: &Request) -> serde_json::Value {
    let query = req
        .params
        .get("query")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    let Some(ctrl) = state.roster.as_mut() else {
        return err(&req.id, "no_roster", "open the students page first", None);
    };
    ctrl.set_search(query);
    ok(&req.id, view_json(ctrl))
}

fn handle_set_page(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(page) = req.params.get("page").and_then(|v| v.as_u64()) else {
        return err(&req.id, "bad_params", "missing page", None);
    };
    let Some(ctrl) = state.roster.as_mut() else {
        return err(&req.id, "no_roster", "open the students page first", None);
    };
    ctrl.set_page(page as usize);
    ok(&req.id, view_json(ctrl))
}

fn handle_toggle_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let student_id = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(ctrl) = state.roster.as_mut() else {
        return err(&req.id, "no_roster", "open the students page first", None);
    };
    ctrl.toggle_select(&student_id);
    ok(&req.id, view_json(ctrl))
}

fn handle_select_visible(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(ctrl) = state.roster.as_mut() else {
        return err(&req.id, "no_roster", "open the students page first", None);
    };
    ctrl.select_visible();
    ok(&req.id, view_json(ctrl))
}

fn handle_clear_selection(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(ctrl) = state.roster.as_mut() else {
        return err(&req.id, "no_roster", "open the students page first", None);
    };
    ctrl.clear_selection();
    ok(&req.id, view_json(ctrl))
}

fn selected_ids_or_err(state: &AppState) -> Result<Vec<String>, HandlerErr> {
    let Some(ctrl) = state.roster.as_ref() else {
        return Err(HandlerErr::new(
            "no_roster",
            "open the students page first",
        ));
    };
    let ids = ctrl.selected_ids();
    if ids.is_empty() {
        return Err(HandlerErr::bad_params("selection is empty"));
    }
    Ok(ids)
}

/// Re-fetch the roster into the page controller and drop the selection.
/// Runs after every bulk action, success or partial failure alike.
fn finish_bulk(state: &mut AppState, req: &Request) -> Result<(), serde_json::Value> {
    let records = {
        let Some(conn) = state.db.as_ref() else {
            return Err(err(&req.id, "no_workspace", "select a workspace first", None));
        };
        fetch_roster(conn, state.session.as_ref()).map_err(|e| e.response(&req.id))?
    };
    let Some(ctrl) = state.roster.as_mut() else {
        return Err(err(&req.id, "no_roster", "open the students page first", None));
    };
    ctrl.set_records(records);
    ctrl.clear_selection();
    Ok(())
}

fn handle_bulk_status(state: &mut AppState, req: &Request) -> serde_json::Value {
    let status = match get_required_str(&req.params, "status").and_then(|s| parse_status(&s)) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let ids = match selected_ids_or_err(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // One update per selected record; a single failure must not block the
    // rest, so no surrounding transaction.
    let mut failed = 0usize;
    {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        let stamp = now_stamp();
        for id in &ids {
            match conn.execute(
                "UPDATE students SET status = ?, updated_at = ? WHERE id = ?",
                (&status, &stamp, id),
            ) {
                Ok(1) => {}
                Ok(_) | Err(_) => failed += 1,
            }
        }
    }

    if let Err(resp) = finish_bulk(state, req) {
        return resp;
    }
    if failed > 0 {
        return err(
            &req.id,
            "bulk_partial_failure",
            format!("failed to update {} of {} students", failed, ids.len()),
            Some(json!({ "attempted": ids.len(), "failed": failed })),
        );
    }
    let Some(ctrl) = state.roster.as_ref() else {
        return err(&req.id, "no_roster", "open the students page first", None);
    };
    let mut result = view_json(ctrl);
    result["updatedCount"] = json!(ids.len());
    ok(&req.id, result)
}

fn delete_student_rows(conn: &Connection, student_id: &str) -> Result<usize, rusqlite::Error> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM grades WHERE student_id = ?", [student_id])?;
    tx.execute(
        "DELETE FROM attendance_days WHERE student_id = ?",
        [student_id],
    )?;
    tx.execute("DELETE FROM fees WHERE student_id = ?", [student_id])?;
    let n = tx.execute("DELETE FROM students WHERE id = ?", [student_id])?;
    tx.commit()?;
    Ok(n)
}

fn handle_bulk_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ids = match selected_ids_or_err(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let mut failed = 0usize;
    {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        for id in &ids {
            match delete_student_rows(conn, id) {
                Ok(1) => {}
                Ok(_) | Err(_) => failed += 1,
            }
        }
    }

    if let Err(resp) = finish_bulk(state, req) {
        return resp;
    }
    if failed > 0 {
        return err(
            &req.id,
            "bulk_partial_failure",
            format!("failed to delete {} of {} students", failed, ids.len()),
            Some(json!({ "attempted": ids.len(), "failed": failed })),
        );
    }
    let Some(ctrl) = state.roster.as_ref() else {
        return err(&req.id, "no_roster", "open the students page first", None);
    };
    let mut result = view_json(ctrl);
    result["deletedCount"] = json!(ids.len());
    ok(&req.id, result)
}

fn handle_export(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ids = match selected_ids_or_err(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    // Export is one batched call over the whole selection.
    let rows = {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT s.admission_no, s.first_name, s.last_name, c.name, sec.name,
                    s.status, s.email, s.phone
             FROM students s
             JOIN classes c ON c.id = s.class_id
             LEFT JOIN sections sec ON sec.id = s.section_id
             WHERE s.id IN ({})
             ORDER BY s.last_name, s.first_name",
            placeholders
        );
        let mut stmt = match conn.prepare(&sql) {
            Ok(s) => s,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), |r| {
                Ok(StudentExportRow {
                    admission_no: r.get(0)?,
                    first_name: r.get(1)?,
                    last_name: r.get(2)?,
                    class_name: r.get(3)?,
                    section_name: r.get(4)?,
                    status: r.get(5)?,
                    email: r.get(6)?,
                    phone: r.get(7)?,
                })
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>());
        match rows {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    };

    let summary = match export_students_csv(&workspace, &rows) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "export_failed", format!("{e:#}"), None),
    };

    if let Err(resp) = finish_bulk(state, req) {
        return resp;
    }
    let Some(ctrl) = state.roster.as_ref() else {
        return err(&req.id, "no_roster", "open the students page first", None);
    };
    let mut result = view_json(ctrl);
    result["path"] = json!(summary.path.to_string_lossy());
    result["rowCount"] = json!(summary.row_count);
    ok(&req.id, result)
}

fn handle_promote(state: &mut AppState, req: &Request) -> serde_json::Value {
    let class_id = match get_required_str(&req.params, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let section_id = get_optional_str(&req.params, "sectionId");
    let ids = match selected_ids_or_err(state) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    // Promotion is one batched call moving the whole selection. Target
    // validation happens before any mutation.
    let exec_result = {
        let Some(conn) = state.db.as_ref() else {
            return err(&req.id, "no_workspace", "select a workspace first", None);
        };
        if let Err(e) = require_class(conn, &class_id) {
            return e.response(&req.id);
        }
        if let Some(sec) = section_id.as_deref() {
            if let Err(e) = require_section_in_class(conn, sec, &class_id) {
                return e.response(&req.id);
            }
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "UPDATE students SET class_id = ?, section_id = ?, updated_at = ? WHERE id IN ({})",
            placeholders
        );
        let stamp = now_stamp();
        let mut binds: Vec<&dyn ToSql> = vec![&class_id, &section_id, &stamp];
        for id in &ids {
            binds.push(id);
        }
        conn.execute(&sql, params_from_iter(binds))
    };

    // Refresh runs whether or not the update failed, so the page always
    // reflects the true stored state.
    if let Err(resp) = finish_bulk(state, req) {
        return resp;
    }
    let moved = match exec_result {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    let Some(ctrl) = state.roster.as_ref() else {
        return err(&req.id, "no_roster", "open the students page first", None);
    };
    let mut result = view_json(ctrl);
    result["movedCount"] = json!(moved);
    ok(&req.id, result)
}

fn require_class(conn: &Connection, class_id: &str) -> Result<(), HandlerErr> {
    let exists = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .is_some();
    if exists {
        Ok(())
    } else {
        Err(HandlerErr::not_found("class not found"))
    }
}

fn require_section_in_class(
    conn: &Connection,
    section_id: &str,
    class_id: &str,
) -> Result<(), HandlerErr> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM sections WHERE id = ? AND class_id = ?",
            (section_id, class_id),
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .is_some();
    if exists {
        Ok(())
    } else {
        Err(HandlerErr::not_found("section not found in class"))
    }
}

fn require_parent(conn: &Connection, parent_id: &str) -> Result<(), HandlerErr> {
    let exists = conn
        .query_row("SELECT 1 FROM parents WHERE id = ?", [parent_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?
        .is_some();
    if exists {
        Ok(())
    } else {
        Err(HandlerErr::not_found("parent not found"))
    }
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let records = match fetch_roster(conn, state.session.as_ref()) {
        Ok(r) => r,
        Err(e) => return e.response(&req.id),
    };

    let filtered = FilterSet::new()
        .equals("classId", get_optional_str(&req.params, "classId").as_deref())
        .equals(
            "sectionId",
            get_optional_str(&req.params, "sectionId").as_deref(),
        )
        .equals("status", get_optional_str(&req.params, "status").as_deref())
        .search(
            get_optional_str(&req.params, "search").as_deref(),
            SEARCH_FIELDS,
        )
        .apply(&records);

    let paged = paginate(filtered, get_page(&req.params));
    ok(
        &req.id,
        json!({
            "students": paged.items,
            "page": paged.page,
            "totalPages": paged.total_pages,
            "totalCount": paged.total_count,
        }),
    )
}

fn handle_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let params = &req.params;

    let class_id = match get_required_str(params, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let admission_no = match get_required_str(params, "admissionNo") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    if admission_no.is_empty() {
        return err(&req.id, "bad_params", "admissionNo must not be empty", None);
    }
    let first_name = match get_required_str(params, "firstName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    let last_name = match get_required_str(params, "lastName") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    if first_name.is_empty() || last_name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let section_id = get_optional_str(params, "sectionId");
    let parent_id = get_optional_str(params, "parentId");
    let email = get_optional_str(params, "email");
    let phone = get_optional_str(params, "phone");
    let status = match get_optional_str(params, "status") {
        Some(raw) => match parse_status(&raw) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        },
        None => "Active".to_string(),
    };
    let admission_date = match get_optional_date(params, "admissionDate") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    if let Err(e) = require_class(conn, &class_id) {
        return e.response(&req.id);
    }
    if let Some(sec) = section_id.as_deref() {
        if let Err(e) = require_section_in_class(conn, sec, &class_id) {
            return e.response(&req.id);
        }
    }
    if let Some(pid) = parent_id.as_deref() {
        if let Err(e) = require_parent(conn, pid) {
            return e.response(&req.id);
        }
    }

    let student_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO students(id, class_id, section_id, parent_id, admission_no,
                              first_name, last_name, email, phone, status,
                              admission_date, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &section_id,
            &parent_id,
            &admission_no,
            &first_name,
            &last_name,
            &email,
            &phone,
            &status,
            &admission_date,
            &now_stamp(),
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(
        &req.id,
        json!({ "studentId": student_id, "admissionNo": admission_no }),
    )
}

fn handle_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let params = &req.params;
    let student_id = match get_required_str(params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let existing = conn
        .query_row(
            "SELECT class_id, section_id, parent_id, admission_no, first_name, last_name,
                    email, phone, status, admission_date
             FROM students WHERE id = ?",
            [&student_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, Option<String>>(6)?,
                    r.get::<_, Option<String>>(7)?,
                    r.get::<_, String>(8)?,
                    r.get::<_, Option<String>>(9)?,
                ))
            },
        )
        .optional();
    let existing = match existing {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "student not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let (
        mut class_id,
        mut section_id,
        mut parent_id,
        mut admission_no,
        mut first_name,
        mut last_name,
        mut email,
        mut phone,
        mut status,
        mut admission_date,
    ) = existing;

    if let Some(v) = get_optional_str(params, "classId") {
        // Moving class drops a section that no longer applies.
        if v != class_id {
            section_id = None;
        }
        class_id = v;
    }
    if params.get("sectionId").is_some() {
        section_id = get_optional_str(params, "sectionId");
    }
    if params.get("parentId").is_some() {
        parent_id = get_optional_str(params, "parentId");
    }
    if let Some(v) = get_optional_str(params, "admissionNo") {
        admission_no = v;
    }
    if let Some(v) = get_optional_str(params, "firstName") {
        first_name = v;
    }
    if let Some(v) = get_optional_str(params, "lastName") {
        last_name = v;
    }
    if params.get("email").is_some() {
        email = get_optional_str(params, "email");
    }
    if params.get("phone").is_some() {
        phone = get_optional_str(params, "phone");
    }
    if let Some(raw) = get_optional_str(params, "status") {
        status = match parse_status(&raw) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
    }
    if params.get("admissionDate").is_some() {
        admission_date = match get_optional_date(params, "admissionDate") {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
    }

    if let Err(e) = require_class(conn, &class_id) {
        return e.response(&req.id);
    }
    if let Some(sec) = section_id.as_deref() {
        if let Err(e) = require_section_in_class(conn, sec, &class_id) {
            return e.response(&req.id);
        }
    }
    if let Some(pid) = parent_id.as_deref() {
        if let Err(e) = require_parent(conn, pid) {
            return e.response(&req.id);
        }
    }

    if let Err(e) = conn.execute(
        "UPDATE students
         SET class_id = ?, section_id = ?, parent_id = ?, admission_no = ?,
             first_name = ?, last_name = ?, email = ?, phone = ?, status = ?,
             admission_date = ?, updated_at = ?
         WHERE id = ?",
        (
            &class_id,
            &section_id,
            &parent_id,
            &admission_no,
            &first_name,
            &last_name,
            &email,
            &phone,
            &status,
            &admission_date,
            &now_stamp(),
            &student_id,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        );
    }

    ok(&req.id, json!({ "studentId": student_id }))
}

fn handle_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let student_id = match get_required_str(&req.params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match delete_student_rows(conn, &student_id) {
        Ok(0) => err(&req.id, "not_found", "student not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "students" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.pageOpen" => Some(handle_page_open(state, req)),
        "students.refresh" => Some(handle_refresh(state, req)),
        "students.setFilter" => Some(handle_set_filter(state, req)),
        "students.setSearch" => Some(handle_set_search(state, req)),
        "students.setPage" => Some(handle_set_page(state, req)),
        "students.toggleSelect" => Some(handle_toggle_select(state, req)),
        "students.selectVisible" => Some(handle_select_visible(state, req)),
        "students.clearSelection" => Some(handle_clear_selection(state, req)),
        "students.bulkStatus" => Some(handle_bulk_status(state, req)),
        "students.bulkDelete" => Some(handle_bulk_delete(state, req)),
        "students.export" => Some(handle_export(state, req)),
        "students.promote" => Some(handle_promote(state, req)),
        "students.list" => Some(handle_list(state, req)),
        "students.create" => Some(handle_create(state, req)),
        "students.update" => Some(handle_update(state, req)),
        "students.delete" => Some(handle_delete(state, req)),
        _ => None,
    }
}
