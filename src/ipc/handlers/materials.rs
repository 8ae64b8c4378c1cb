use crate::bundle::sha256_hex;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_page, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::listview::{paginate, FilterSet};
use crate::session::{scope_of, Scope, SessionContext};
use chrono::Utc;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use std::path::{Path, PathBuf};
use uuid::Uuid;

fn fetch_materials(
    conn: &Connection,
    session: Option<&SessionContext>,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let base = "SELECT m.id, m.class_id, c.name, m.subject_id, sub.name, m.title, m.description,
                       m.file_name, m.size_bytes, m.checksum, m.uploaded_by, m.uploaded_at
                FROM materials m
                JOIN classes c ON c.id = m.class_id
                LEFT JOIN subjects sub ON sub.id = m.subject_id";
    let order = " ORDER BY m.uploaded_at DESC, m.title";
    let (where_clause, binds): (&str, Vec<String>) = match scope_of(session) {
        Scope::All => ("", Vec::new()),
        Scope::TeacherOf(tid) => (" WHERE c.teacher_id = ?", vec![tid]),
        Scope::StudentSelf(sid) => (
            " WHERE m.class_id IN (SELECT class_id FROM students WHERE id = ?)",
            vec![sid],
        ),
        Scope::ParentOf(pid) => (
            " WHERE m.class_id IN (SELECT class_id FROM students WHERE parent_id = ?)",
            vec![pid],
        ),
    };
    let sql = format!("{}{}{}", base, where_clause, order);

    let mut stmt = conn
        .prepare(&sql)
        .map_err(|e| HandlerErr::db("db_query_failed", e))?;
    stmt.query_map(params_from_iter(binds.iter()), |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "classId": r.get::<_, String>(1)?,
            "className": r.get::<_, String>(2)?,
            "subjectId": r.get::<_, Option<String>>(3)?,
            "subjectName": r.get::<_, Option<String>>(4)?,
            "title": r.get::<_, String>(5)?,
            "description": r.get::<_, Option<String>>(6)?,
            "fileName": r.get::<_, String>(7)?,
            "sizeBytes": r.get::<_, i64>(8)?,
            "checksum": r.get::<_, String>(9)?,
            "uploadedBy": r.get::<_, Option<String>>(10)?,
            "uploadedAt": r.get::<_, Option<String>>(11)?,
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(|e| HandlerErr::db("db_query_failed", e))
}

fn handle_materials_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let records = match fetch_materials(conn, state.session.as_ref()) {
        Ok(r) => r,
        Err(e) => return e.response(&req.id),
    };

    let filtered = FilterSet::new()
        .equals("classId", get_optional_str(&req.params, "classId").as_deref())
        .equals(
            "subjectId",
            get_optional_str(&req.params, "subjectId").as_deref(),
        )
        .search(
            get_optional_str(&req.params, "search").as_deref(),
            &["title", "description", "fileName"],
        )
        .apply(&records);

    let paged = paginate(filtered, get_page(&req.params));
    ok(
        &req.id,
        json!({
            "materials": paged.items,
            "page": paged.page,
            "totalPages": paged.total_pages,
            "totalCount": paged.total_count,
        }),
    )
}

fn store_material_file(
    workspace: &Path,
    material_id: &str,
    source_path: &Path,
) -> Result<(String, PathBuf, i64, String), HandlerErr> {
    let file_name = source_path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.to_string())
        .ok_or_else(|| HandlerErr::bad_params("sourcePath has no file name"))?;

    let bytes = std::fs::read(source_path).map_err(|e| {
        HandlerErr::new(
            "file_read_failed",
            format!("failed to read {}: {}", source_path.to_string_lossy(), e),
        )
    })?;
    let checksum = sha256_hex(&bytes);

    let dir = workspace.join("materials");
    std::fs::create_dir_all(&dir).map_err(|e| {
        HandlerErr::new(
            "file_write_failed",
            format!("failed to create {}: {}", dir.to_string_lossy(), e),
        )
    })?;
    let stored = dir.join(format!("{}-{}", material_id, file_name));
    std::fs::write(&stored, &bytes).map_err(|e| {
        HandlerErr::new(
            "file_write_failed",
            format!("failed to write {}: {}", stored.to_string_lossy(), e),
        )
    })?;

    Ok((file_name, stored, bytes.len() as i64, checksum))
}

fn handle_materials_register(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let params = &req.params;

    let class_id = match get_required_str(params, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let title = match get_required_str(params, "title") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    if title.is_empty() {
        return err(&req.id, "bad_params", "title must not be empty", None);
    }
    let source_path = match get_required_str(params, "sourcePath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e.response(&req.id),
    };
    let subject_id = get_optional_str(params, "subjectId");
    let description = get_optional_str(params, "description");

    let class_exists = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
    {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !class_exists {
        return err(&req.id, "not_found", "class not found", None);
    }
    if let Some(sid) = subject_id.as_deref() {
        let exists = match conn
            .query_row("SELECT 1 FROM subjects WHERE id = ?", [sid], |r| {
                r.get::<_, i64>(0)
            })
            .optional()
        {
            Ok(v) => v.is_some(),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if !exists {
            return err(&req.id, "not_found", "subject not found", None);
        }
    }

    let material_id = Uuid::new_v4().to_string();
    let (file_name, stored_path, size_bytes, checksum) =
        match store_material_file(&workspace, &material_id, &source_path) {
            Ok(v) => v,
            Err(e) => return e.response(&req.id),
        };

    let uploaded_by = state
        .session
        .as_ref()
        .map(|s| s.display_name.clone())
        .filter(|s| !s.is_empty());
    let uploaded_at = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

    if let Err(e) = conn.execute(
        "INSERT INTO materials(id, class_id, subject_id, title, description, file_name,
                               stored_path, size_bytes, checksum, uploaded_by, uploaded_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &material_id,
            &class_id,
            &subject_id,
            &title,
            &description,
            &file_name,
            &stored_path.to_string_lossy().to_string(),
            size_bytes,
            &checksum,
            &uploaded_by,
            &uploaded_at,
        ),
    ) {
        // Registration failed after the copy; drop the orphaned file.
        let _ = std::fs::remove_file(&stored_path);
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "materials" })),
        );
    }

    ok(
        &req.id,
        json!({
            "materialId": material_id,
            "fileName": file_name,
            "sizeBytes": size_bytes,
            "checksum": checksum,
        }),
    )
}

fn handle_materials_download(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let material_id = match get_required_str(&req.params, "materialId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let row: Option<(String, String, String)> = match conn
        .query_row(
            "SELECT stored_path, file_name, checksum FROM materials WHERE id = ?",
            [&material_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some((stored_path, file_name, checksum)) = row else {
        return err(&req.id, "not_found", "material not found", None);
    };
    if !Path::new(&stored_path).is_file() {
        return err(
            &req.id,
            "file_missing",
            format!("stored file missing: {}", stored_path),
            None,
        );
    }

    ok(
        &req.id,
        json!({
            "path": stored_path,
            "fileName": file_name,
            "checksum": checksum,
        }),
    )
}

fn handle_materials_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let material_id = match get_required_str(&req.params, "materialId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    let stored_path: Option<String> = match conn
        .query_row(
            "SELECT stored_path FROM materials WHERE id = ?",
            [&material_id],
            |r| r.get(0),
        )
        .optional()
    {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let Some(stored_path) = stored_path else {
        return err(&req.id, "not_found", "material not found", None);
    };

    if let Err(e) = conn.execute("DELETE FROM materials WHERE id = ?", [&material_id]) {
        return err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "materials" })),
        );
    }
    // The row is authoritative; a missing file is not an error here.
    let _ = std::fs::remove_file(&stored_path);

    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "materials.list" => Some(handle_materials_list(state, req)),
        "materials.register" => Some(handle_materials_register(state, req)),
        "materials.download" => Some(handle_materials_download(state, req)),
        "materials.delete" => Some(handle_materials_delete(state, req)),
        _ => None,
    }
}
