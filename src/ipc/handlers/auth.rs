use rusqlite::OptionalExtension;

use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{required_str, workspace, TeacherRow};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// Email-lookup login. No credential check beyond membership in the
/// teachers table; the daemon keeps no session, callers hold the returned
/// teacher and pass its id to later requests.
fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v.trim().to_lowercase(),
        Err(e) => return e.response(&req.id),
    };
    if email.is_empty() {
        return err(&req.id, "bad_params", "email must not be empty", None);
    }

    let row = ws
        .conn
        .query_row(
            "SELECT id, email, name, role FROM teachers WHERE lower(email) = ?",
            [&email],
            |r| {
                Ok(TeacherRow {
                    id: r.get(0)?,
                    email: r.get(1)?,
                    name: r.get(2)?,
                    role: r.get(3)?,
                })
            },
        )
        .optional();

    match row {
        Ok(Some(teacher)) => {
            log::info!("login ok for teacher {}", teacher.id);
            ok(&req.id, json!({ "teacher": teacher.to_json() }))
        }
        Ok(None) => err(
            &req.id,
            "not_found",
            "email not found, check the address",
            None,
        ),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.login" => Some(handle_login(state, req)),
        _ => None,
    }
}
