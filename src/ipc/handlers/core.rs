use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{required_str, workspace};
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "classTable": state.db.as_ref().map(|ws| ws.class_table.clone()),
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(ws) => {
            log::info!(
                "workspace opened at {}, class table resolved to {}",
                path.display(),
                ws.class_table
            );
            let class_table = ws.class_table.clone();
            state.workspace = Some(path.clone());
            state.db = Some(ws);
            ok(
                &req.id,
                json!({
                    "workspacePath": path.to_string_lossy(),
                    "classTable": class_table,
                }),
            )
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let key = match required_str(req, "key") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match db::settings_get(&ws.conn, &key) {
        Ok(value) => ok(&req.id, json!({ "key": key, "value": value })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_settings_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let key = match required_str(req, "key") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let value = match required_str(req, "value") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match db::settings_set(&ws.conn, &key, &value) {
        Ok(()) => ok(&req.id, json!({ "key": key, "value": value })),
        Err(e) => err(&req.id, "db_update_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.set" => Some(handle_settings_set(state, req)),
        _ => None,
    }
}
