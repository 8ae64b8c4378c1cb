use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_date, get_optional_str, get_page, get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::listview::{paginate, FilterSet};
use crate::session::{Role, SessionContext};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const TARGETS: &[&str] = &["all", "students", "teachers", "parents"];
const PRIORITIES: &[&str] = &["normal", "high", "urgent"];

fn parse_target(raw: &str) -> Result<String, HandlerErr> {
    let t = raw.trim().to_lowercase();
    if TARGETS.contains(&t.as_str()) {
        Ok(t)
    } else {
        Err(HandlerErr::bad_params(format!(
            "target must be one of {}",
            TARGETS.join(", ")
        )))
    }
}

fn parse_priority(raw: &str) -> Result<String, HandlerErr> {
    let t = raw.trim().to_lowercase();
    if PRIORITIES.contains(&t.as_str()) {
        Ok(t)
    } else {
        Err(HandlerErr::bad_params(format!(
            "priority must be one of {}",
            PRIORITIES.join(", ")
        )))
    }
}

/// Which notice audiences a signed-in role can read. Admin reads all.
fn visible_targets(session: Option<&SessionContext>) -> Option<&'static str> {
    match session.map(|s| s.role) {
        Some(Role::Teacher) => Some("teachers"),
        Some(Role::Student) => Some("students"),
        Some(Role::Parent) => Some("parents"),
        Some(Role::Admin) | None => None,
    }
}

fn fetch_notices(
    conn: &Connection,
    session: Option<&SessionContext>,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let base = "SELECT id, title, body, target, priority, publish_date, author FROM notices";
    let order = " ORDER BY publish_date DESC, title";
    let (where_clause, binds): (&str, Vec<String>) = match visible_targets(session) {
        Some(audience) => (
            " WHERE target = 'all' OR target = ?",
            vec![audience.to_string()],
        ),
        None => ("", Vec::new()),
    };
    let sql = format!("{}{}{}", base, where_clause, order);

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map(rusqlite::params_from_iter(binds.iter()), |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "title": r.get::<_, String>(1)?,
            "body": r.get::<_, String>(2)?,
            "target": r.get::<_, String>(3)?,
            "priority": r.get::<_, String>(4)?,
            "publishDate": r.get::<_, String>(5)?,
            "author": r.get::<_, Option<String>>(6)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn handle_notices_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let records = match fetch_notices(conn, state.session.as_ref()) {
        Ok(r) => r,
        Err(e) => return e.response(&req.id),
    };

    let filtered = FilterSet::new()
        .equals("target", get_optional_str(&req.params, "target").as_deref())
        .equals(
            "priority",
            get_optional_str(&req.params, "priority").as_deref(),
        )
        .search(
            get_optional_str(&req.params, "search").as_deref(),
            &["title", "body"],
        )
        .apply(&records);

    let paged = paginate(filtered, get_page(&req.params));
    ok(
        &req.id,
        json!({
            "notices": paged.items,
            "page": paged.page,
            "totalPages": paged.total_pages,
            "totalCount": paged.total_count,
        }),
    )
}

fn handle_notices_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let params = &req.params;

    let title = match get_required_str(params, "title") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }
    let body = match get_required_str(params, "body") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let target = match get_optional_str(params, "target") {
        Some(raw) => match parse_target(&raw) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        },
        None => "all".to_string(),
    };
    let priority = match get_optional_str(params, "priority") {
        Some(raw) => match parse_priority(&raw) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        },
        None => "normal".to_string(),
    };
    let publish_date = match get_optional_date(params, "publishDate") {
        Ok(Some(d)) => d,
        Ok(None) => Utc::now().format("%Y-%m-%d").to_string(),
        Err(e) => return e.response(&req.id),
    };
    let author = state
        .session
        .as_ref()
        .map(|s| s.display_name.clone())
        .filter(|s| !s.is_empty());

    let notice_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO notices(id, title, body, target, priority, publish_date, author)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &notice_id,
            &title,
            &body,
            &target,
            &priority,
            &publish_date,
            &author,
        ),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "notices" })),
        );
    }

    ok(&req.id, json!({ "noticeId": notice_id }))
}

fn handle_notices_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let params = &req.params;
    let notice_id = match get_required_str(params, "noticeId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let existing = conn
        .query_row(
            "SELECT title, body, target, priority, publish_date FROM notices WHERE id = ?",
            [&notice_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ))
            },
        )
        .optional();
    let existing = match existing {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "notice not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let (mut title, mut body, mut target, mut priority, mut publish_date) = existing;

    if let Some(v) = get_optional_str(params, "title") {
        title = v;
    }
    if let Some(v) = get_optional_str(params, "body") {
        body = v;
    }
    if let Some(raw) = get_optional_str(params, "target") {
        target = match parse_target(&raw) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
    }
    if let Some(raw) = get_optional_str(params, "priority") {
        priority = match parse_priority(&raw) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };
    }
    if params.get("publishDate").is_some() {
        match get_optional_date(params, "publishDate") {
            Ok(Some(d)) => publish_date = d,
            Ok(None) => {}
            Err(e) => return e.response(&req.id),
        }
    }

    if let Err(e) = conn.execute(
        "UPDATE notices SET title = ?, body = ?, target = ?, priority = ?, publish_date = ?
         WHERE id = ?",
        (&title, &body, &target, &priority, &publish_date, &notice_id),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "notices" })),
        );
    }

    ok(&req.id, json!({ "noticeId": notice_id }))
}

fn handle_notices_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let notice_id = match get_required_str(&req.params, "noticeId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match conn.execute("DELETE FROM notices WHERE id = ?", [&notice_id]) {
        Ok(0) => err(&req.id, "not_found", "notice not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "notices" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notices.list" => Some(handle_notices_list(state, req)),
        "notices.create" => Some(handle_notices_create(state, req)),
        "notices.update" => Some(handle_notices_update(state, req)),
        "notices.delete" => Some(handle_notices_delete(state, req)),
        _ => None,
    }
}
