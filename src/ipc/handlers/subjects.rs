use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_page, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::listview::{paginate, FilterSet};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn fetch_subjects(conn: &Connection) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT sub.id, sub.name, sub.code, sub.class_id, c.name,
                    (SELECT COUNT(*) FROM grades g WHERE g.subject_id = sub.id) AS grade_count
             FROM subjects sub
             LEFT JOIN classes c ON c.id = sub.class_id
             ORDER BY sub.name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([], |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "name": r.get::<_, String>(1)?,
            "code": r.get::<_, Option<String>>(2)?,
            "classId": r.get::<_, Option<String>>(3)?,
            "className": r.get::<_, Option<String>>(4)?,
            "gradeCount": r.get::<_, i64>(5)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn subjects_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let records = fetch_subjects(conn)?;
    let filtered = FilterSet::new()
        .equals("classId", get_optional_str(params, "classId").as_deref())
        .search(
            get_optional_str(params, "search").as_deref(),
            &["name", "code"],
        )
        .apply(&records);
    let paged = paginate(filtered, get_page(params));
    Ok(json!({
        "subjects": paged.items,
        "page": paged.page,
        "totalPages": paged.total_pages,
        "totalCount": paged.total_count,
    }))
}

fn subjects_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let code = get_optional_str(params, "code");
    let class_id = get_optional_str(params, "classId");
    if let Some(cid) = class_id.as_deref() {
        let exists = conn
            .query_row("SELECT 1 FROM classes WHERE id = ?", [cid], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
            .map_err(|e| HandlerErr::db("db_query_failed", e))?
            .is_some();
        if !exists {
            return Err(HandlerErr::not_found("class not found"));
        }
    }

    let subject_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO subjects(id, class_id, name, code) VALUES(?, ?, ?, ?)",
        (&subject_id, &class_id, &name, &code),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_table("subjects"))?;

    Ok(json!({ "subjectId": subject_id, "name": name }))
}

fn subjects_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;

    let existing = conn
        .query_row(
            "SELECT name, code, class_id FROM subjects WHERE id = ?",
            [&subject_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, Option<String>>(1)?,
                    r.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((mut name, mut code, mut class_id)) = existing else {
        return Err(HandlerErr::not_found("subject not found"));
    };

    if let Some(v) = get_optional_str(params, "name") {
        name = v;
    }
    if params.get("code").is_some() {
        code = get_optional_str(params, "code");
    }
    if params.get("classId").is_some() {
        class_id = get_optional_str(params, "classId");
        if let Some(cid) = class_id.as_deref() {
            let exists = conn
                .query_row("SELECT 1 FROM classes WHERE id = ?", [cid], |r| {
                    r.get::<_, i64>(0)
                })
                .optional()
                .map_err(|e| HandlerErr::db("db_query_failed", e))?
                .is_some();
            if !exists {
                return Err(HandlerErr::not_found("class not found"));
            }
        }
    }

    conn.execute(
        "UPDATE subjects SET name = ?, code = ?, class_id = ? WHERE id = ?",
        (&name, &code, &class_id, &subject_id),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e).with_table("subjects"))?;

    Ok(json!({ "subjectId": subject_id }))
}

fn subjects_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let subject_id = get_required_str(params, "subjectId")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute("DELETE FROM grades WHERE subject_id = ?", [&subject_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e).with_table("grades"))?;
    tx.execute(
        "UPDATE materials SET subject_id = NULL WHERE subject_id = ?",
        [&subject_id],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    let n = tx
        .execute("DELETE FROM subjects WHERE id = ?", [&subject_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e).with_table("subjects"))?;
    if n == 0 {
        let _ = tx.rollback();
        return Err(HandlerErr::not_found("subject not found"));
    }
    tx.commit()
        .map_err(|e| HandlerErr::db("db_commit_failed", e))?;

    Ok(json!({ "ok": true }))
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
        "subjects.list" => Some(with_conn(state, req, subjects_list)),
        "subjects.create" => Some(with_conn(state, req, subjects_create)),
        "subjects.update" => Some(with_conn(state, req, subjects_update)),
        "subjects.delete" => Some(with_conn(state, req, subjects_delete)),
        _ => None,
    }
}
