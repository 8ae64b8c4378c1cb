use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_date, get_optional_str, get_page, get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::listview::{paginate, FilterSet};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const SEARCH_FIELDS: &[&str] = &["name", "email", "phone"];

fn fetch_teachers(conn: &Connection) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT t.id, t.first_name, t.last_name, t.email, t.phone, t.status, t.hired_date,
                    (SELECT COUNT(*) FROM classes c WHERE c.teacher_id = t.id) AS class_count
             FROM teachers t
             ORDER BY t.last_name, t.first_name",
        )
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map([], |r| {
        let first: String = r.get(1)?;
        let last: String = r.get(2)?;
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "name": format!("{} {}", first, last),
            "firstName": first,
            "lastName": last,
            "email": r.get::<_, Option<String>>(3)?,
            "phone": r.get::<_, Option<String>>(4)?,
            "status": r.get::<_, String>(5)?,
            "hiredDate": r.get::<_, Option<String>>(6)?,
            "classCount": r.get::<_, i64>(7)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn teachers_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let records = fetch_teachers(conn)?;
    let filtered = FilterSet::new()
        .equals("status", get_optional_str(params, "status").as_deref())
        .search(get_optional_str(params, "search").as_deref(), SEARCH_FIELDS)
        .apply(&records);
    let paged = paginate(filtered, get_page(params));
    Ok(json!({
        "teachers": paged.items,
        "page": paged.page,
        "totalPages": paged.total_pages,
        "totalCount": paged.total_count,
    }))
}

fn teachers_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let first_name = get_required_str(params, "firstName")?.trim().to_string();
    let last_name = get_required_str(params, "lastName")?.trim().to_string();
    if first_name.is_empty() || last_name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let email = get_optional_str(params, "email");
    let phone = get_optional_str(params, "phone");
    let status = match get_optional_str(params, "status") {
        Some(s) if s == "Active" || s == "Inactive" => s,
        Some(other) => {
            return Err(HandlerErr::bad_params(format!(
                "status must be Active or Inactive, got {}",
                other
            )))
        }
        None => "Active".to_string(),
    };
    let hired_date = get_optional_date(params, "hiredDate")?;

    let teacher_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO teachers(id, first_name, last_name, email, phone, status, hired_date)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &teacher_id,
            &first_name,
            &last_name,
            &email,
            &phone,
            &status,
            &hired_date,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_table("teachers"))?;

    Ok(json!({ "teacherId": teacher_id }))
}

fn teachers_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;

    let existing = conn
        .query_row(
            "SELECT first_name, last_name, email, phone, status, hired_date
             FROM teachers WHERE id = ?",
            [&teacher_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, Option<String>>(5)?,
                ))
            },
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((mut first_name, mut last_name, mut email, mut phone, mut status, mut hired_date)) =
        existing
    else {
        return Err(HandlerErr::not_found("teacher not found"));
    };

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
    if let Some(v) = get_optional_str(params, "status") {
        if v != "Active" && v != "Inactive" {
            return Err(HandlerErr::bad_params(format!(
                "status must be Active or Inactive, got {}",
                v
            )));
        }
        status = v;
    }
    if params.get("hiredDate").is_some() {
        hired_date = get_optional_date(params, "hiredDate")?;
    }

    conn.execute(
        "UPDATE teachers
         SET first_name = ?, last_name = ?, email = ?, phone = ?, status = ?, hired_date = ?
         WHERE id = ?",
        (
            &first_name,
            &last_name,
            &email,
            &phone,
            &status,
            &hired_date,
            &teacher_id,
        ),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e).with_table("teachers"))?;

    Ok(json!({ "teacherId": teacher_id }))
}

fn teachers_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let teacher_id = get_required_str(params, "teacherId")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    // Classes survive a departing teacher; the assignment is just cleared.
    tx.execute(
        "UPDATE classes SET teacher_id = NULL WHERE teacher_id = ?",
        [&teacher_id],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    let n = tx
        .execute("DELETE FROM teachers WHERE id = ?", [&teacher_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e).with_table("teachers"))?;
    if n == 0 {
        let _ = tx.rollback();
        return Err(HandlerErr::not_found("teacher not found"));
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
        "teachers.list" => Some(with_conn(state, req, teachers_list)),
        "teachers.create" => Some(with_conn(state, req, teachers_create)),
        "teachers.update" => Some(with_conn(state, req, teachers_update)),
        "teachers.delete" => Some(with_conn(state, req, teachers_delete)),
        _ => None,
    }
}
