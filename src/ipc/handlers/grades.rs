use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_optional_str, get_page, get_required_f64, get_required_i64, get_required_str, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::listview::{paginate, FilterSet};
use crate::session::{scope_of, Scope, SessionContext};
use chrono::Utc;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn fetch_grades(
    conn: &Connection,
    session: Option<&SessionContext>,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let base = "SELECT g.id, g.student_id, s.first_name, s.last_name, s.class_id,
                       g.subject_id, sub.name, g.term, g.exam, g.score, g.out_of, g.recorded_at
                FROM grades g
                JOIN students s ON s.id = g.student_id
                JOIN subjects sub ON sub.id = g.subject_id
                JOIN classes c ON c.id = s.class_id";
    let order = " ORDER BY s.last_name, s.first_name, sub.name, g.term, g.exam";
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
        let first: String = r.get(2)?;
        let last: String = r.get(3)?;
        let score: f64 = r.get(9)?;
        let out_of: f64 = r.get(10)?;
        let percent = if out_of > 0.0 {
            100.0 * score / out_of
        } else {
            0.0
        };
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "studentId": r.get::<_, String>(1)?,
            "studentName": format!("{} {}", first, last),
            "classId": r.get::<_, String>(4)?,
            "subjectId": r.get::<_, String>(5)?,
            "subjectName": r.get::<_, String>(6)?,
            "term": r.get::<_, i64>(7)?,
            "exam": r.get::<_, String>(8)?,
            "score": score,
            "outOf": out_of,
            "percent": percent,
            "recordedAt": r.get::<_, Option<String>>(11)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let records = match fetch_grades(conn, state.session.as_ref()) {
        Ok(r) => r,
        Err(e) => return e.response(&req.id),
    };

    let term = req
        .params
        .get("term")
        .and_then(|v| v.as_i64())
        .map(|v| v.to_string());
    let filtered = FilterSet::new()
        .equals("classId", get_optional_str(&req.params, "classId").as_deref())
        .equals(
            "subjectId",
            get_optional_str(&req.params, "subjectId").as_deref(),
        )
        .equals(
            "studentId",
            get_optional_str(&req.params, "studentId").as_deref(),
        )
        .equals("term", term.as_deref())
        .equals("exam", get_optional_str(&req.params, "exam").as_deref())
        .search(
            get_optional_str(&req.params, "search").as_deref(),
            &["studentName", "subjectName", "exam"],
        )
        .apply(&records);

    let paged = paginate(filtered, get_page(&req.params));
    ok(
        &req.id,
        json!({
            "grades": paged.items,
            "page": paged.page,
            "totalPages": paged.total_pages,
            "totalCount": paged.total_count,
        }),
    )
}

fn handle_grades_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let params = &req.params;

    let student_id = match get_required_str(params, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let subject_id = match get_required_str(params, "subjectId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let term = match get_required_i64(params, "term") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let exam = match get_required_str(params, "exam") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    if exam.is_empty() {
        return err(&req.id, "bad_params", "exam must not be empty", None);
    }
    let score = match get_required_f64(params, "score") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let out_of = match get_required_f64(params, "outOf") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    if out_of <= 0.0 {
        return err(&req.id, "bad_params", "outOf must be positive", None);
    }
    if score < 0.0 || score > out_of {
        return err(
            &req.id,
            "bad_params",
            format!("score must be between 0 and {}", out_of),
            None,
        );
    }

    let student_exists = match conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
    {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !student_exists {
        return err(&req.id, "not_found", "student not found", None);
    }
    let subject_exists = match conn
        .query_row("SELECT 1 FROM subjects WHERE id = ?", [&subject_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
    {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !subject_exists {
        return err(&req.id, "not_found", "subject not found", None);
    }

    let grade_id = Uuid::new_v4().to_string();
    let recorded_at = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO grades(id, student_id, subject_id, term, exam, score, out_of, recorded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, subject_id, term, exam) DO UPDATE SET
           score = excluded.score,
           out_of = excluded.out_of,
           recorded_at = excluded.recorded_at",
        (
            &grade_id,
            &student_id,
            &subject_id,
            term,
            &exam,
            score,
            out_of,
            &recorded_at,
        ),
    ) {
        return err(
            &req.id,
            "db_update_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        );
    }

    ok(
        &req.id,
        json!({
            "studentId": student_id,
            "subjectId": subject_id,
            "term": term,
            "exam": exam,
        }),
    )
}

fn handle_grades_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let grade_id = match get_required_str(&req.params, "gradeId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match conn.execute("DELETE FROM grades WHERE id = ?", [&grade_id]) {
        Ok(0) => err(&req.id, "not_found", "grade not found", None),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "grades" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.upsert" => Some(handle_grades_upsert(state, req)),
        "grades.delete" => Some(handle_grades_delete(state, req)),
        _ => None,
    }
}
