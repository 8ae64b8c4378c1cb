use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_page, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::listview::{paginate, FilterSet};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const SEARCH_FIELDS: &[&str] = &["name", "email", "phone"];

fn fetch_parents(conn: &Connection) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.first_name, p.last_name, p.email, p.phone, p.occupation,
                    (SELECT COUNT(*) FROM students s WHERE s.parent_id = p.id) AS child_count
             FROM parents p
             ORDER BY p.last_name, p.first_name",
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
            "occupation": r.get::<_, Option<String>>(5)?,
            "childCount": r.get::<_, i64>(6)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn parents_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let records = fetch_parents(conn)?;
    let filtered = FilterSet::new()
        .search(get_optional_str(params, "search").as_deref(), SEARCH_FIELDS)
        .apply(&records);
    let paged = paginate(filtered, get_page(params));
    Ok(json!({
        "parents": paged.items,
        "page": paged.page,
        "totalPages": paged.total_pages,
        "totalCount": paged.total_count,
    }))
}

fn parents_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let first_name = get_required_str(params, "firstName")?.trim().to_string();
    let last_name = get_required_str(params, "lastName")?.trim().to_string();
    if first_name.is_empty() || last_name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let email = get_optional_str(params, "email");
    let phone = get_optional_str(params, "phone");
    let occupation = get_optional_str(params, "occupation");

    let parent_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO parents(id, first_name, last_name, email, phone, occupation)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &parent_id,
            &first_name,
            &last_name,
            &email,
            &phone,
            &occupation,
        ),
    )
    .map_err(|e| HandlerErr::db("db_insert_failed", e).with_table("parents"))?;

    Ok(json!({ "parentId": parent_id }))
}

fn parents_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let parent_id = get_required_str(params, "parentId")?;

    let existing = conn
        .query_row(
            "SELECT first_name, last_name, email, phone, occupation FROM parents WHERE id = ?",
            [&parent_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                    r.get::<_, Option<String>>(3)?,
                    r.get::<_, Option<String>>(4)?,
                ))
            },
        )
        .optional()
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    let Some((mut first_name, mut last_name, mut email, mut phone, mut occupation)) = existing
    else {
        return Err(HandlerErr::not_found("parent not found"));
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
    if params.get("occupation").is_some() {
        occupation = get_optional_str(params, "occupation");
    }

    conn.execute(
        "UPDATE parents
         SET first_name = ?, last_name = ?, email = ?, phone = ?, occupation = ?
         WHERE id = ?",
        (
            &first_name,
            &last_name,
            &email,
            &phone,
            &occupation,
            &parent_id,
        ),
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e).with_table("parents"))?;

    Ok(json!({ "parentId": parent_id }))
}

fn parents_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let parent_id = get_required_str(params, "parentId")?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db("db_tx_failed", e))?;
    tx.execute(
        "UPDATE students SET parent_id = NULL WHERE parent_id = ?",
        [&parent_id],
    )
    .map_err(|e| HandlerErr::db("db_update_failed", e))?;
    let n = tx
        .execute("DELETE FROM parents WHERE id = ?", [&parent_id])
        .map_err(|e| HandlerErr::db("db_delete_failed", e).with_table("parents"))?;
    if n == 0 {
        let _ = tx.rollback();
        return Err(HandlerErr::not_found("parent not found"));
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
        "parents.list" => Some(with_conn(state, req, parents_list)),
        "parents.create" => Some(with_conn(state, req, parents_create)),
        "parents.update" => Some(with_conn(state, req, parents_update)),
        "parents.delete" => Some(with_conn(state, req, parents_delete)),
        _ => None,
    }
}
