use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::get_required_str;
use crate::ipc::types::{AppState, Request};
use crate::session::{Role, SessionContext};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = json!({
        "version": env!("CARGO_PKG_VERSION"),
        "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
        "session": state.session.as_ref().map(|s| s.to_json()),
    });
    ok(&req.id, result)
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match req.params.get("path").and_then(|v| v.as_str()) {
        Some(p) => PathBuf::from(p),
        None => return err(&req.id, "bad_params", "missing params.path", None),
    };

    match db::open_db(&path) {
        Ok(conn) => {
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            // Page state belongs to the previous workspace.
            state.roster = None;
            ok(
                &req.id,
                json!({ "workspacePath": path.to_string_lossy() }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_session_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let role_raw = match get_required_str(&req.params, "role") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let Some(role) = Role::parse(&role_raw) else {
        return err(
            &req.id,
            "bad_params",
            format!("unknown role: {}", role_raw),
            None,
        );
    };
    let profile_id = match get_required_str(&req.params, "profileId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let display_name = req
        .params
        .get("displayName")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let session = SessionContext {
        role,
        profile_id,
        display_name,
    };
    let result = session.to_json();
    state.session = Some(session);
    // A role change invalidates any scoped page state.
    state.roster = None;
    ok(&req.id, result)
}

fn handle_session_current(state: &mut AppState, req: &Request) -> serde_json::Value {
    let session = state
        .session
        .as_ref()
        .map(|s| s.to_json())
        .unwrap_or(serde_json::Value::Null);
    ok(&req.id, json!({ "session": session }))
}

fn handle_session_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.session = None;
    state.roster = None;
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "session.login" => Some(handle_session_login(state, req)),
        "session.current" => Some(handle_session_current(state, req)),
        "session.logout" => Some(handle_session_logout(state, req)),
        "workspace.exportBundle" | "workspace.importBundle" => {
            Some(handle_bundle(state, req))
        }
        _ => None,
    }
}

fn handle_bundle(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    match req.method.as_str() {
        "workspace.exportBundle" => {
            let out_path = match get_required_str(&req.params, "outPath") {
                Ok(v) => PathBuf::from(v),
                Err(e) => return e.response(&req.id),
            };
            match crate::bundle::export_workspace_bundle(&workspace, &out_path) {
                Ok(summary) => ok(
                    &req.id,
                    json!({
                        "outPath": out_path.to_string_lossy(),
                        "bundleFormat": summary.bundle_format,
                        "entryCount": summary.entry_count,
                        "dbSha256": summary.db_sha256,
                    }),
                ),
                Err(e) => err(&req.id, "bundle_failed", format!("{e:#}"), None),
            }
        }
        "workspace.importBundle" => {
            let in_path = match get_required_str(&req.params, "inPath") {
                Ok(v) => PathBuf::from(v),
                Err(e) => return e.response(&req.id),
            };
            // Release the connection before the database file is replaced.
            state.db = None;
            state.roster = None;
            match crate::bundle::import_workspace_bundle(&in_path, &workspace) {
                Ok(summary) => match db::open_db(&workspace) {
                    Ok(conn) => {
                        state.db = Some(conn);
                        ok(
                            &req.id,
                            json!({
                                "bundleFormatDetected": summary.bundle_format_detected,
                                "checksumVerified": summary.checksum_verified,
                            }),
                        )
                    }
                    Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
                },
                Err(e) => err(&req.id, "bundle_failed", format!("{e:#}"), None),
            }
        }
        _ => err(&req.id, "not_implemented", "unknown bundle method", None),
    }
}
