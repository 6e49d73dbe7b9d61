use chrono::Duration;
use serde_json::json;
use uuid::Uuid;

use crate::calendar::{self, EventRequest};
use crate::ipc::error::ok;
use crate::ipc::helpers::{
    load_class, load_class_by_public_id, load_classes, load_teacher, optional_str, parse_instant,
    required_str, to_rfc3339, workspace, ClassRow, HandlerErr,
};
use crate::ipc::types::{AppState, Request};

use super::calendar::calendar_endpoint;

fn handle_classes_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let teacher_id = optional_str(req, "teacherId");
    match load_classes(ws, teacher_id.as_deref()) {
        Ok(classes) => ok(
            &req.id,
            json!({ "classes": classes.iter().map(ClassRow::to_json).collect::<Vec<_>>() }),
        ),
        Err(e) => e.response(&req.id),
    }
}

fn handle_classes_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let teacher_id = match required_str(req, "teacherId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let teacher = match load_teacher(ws, &teacher_id) {
        Ok(t) => t,
        Err(e) => return e.response(&req.id),
    };
    let date_time = optional_str(req, "dateTime");
    let instant = match date_time.as_deref() {
        Some(raw) => match parse_instant("dateTime", raw) {
            Ok(dt) => Some(dt),
            Err(e) => return e.response(&req.id),
        },
        None => None,
    };
    let level = optional_str(req, "level");
    let note = optional_str(req, "note");
    let mut url = optional_str(req, "url");

    // No meeting link given: try the calendar, but a scheduled class must
    // never fail because the calendar is down.
    if url.is_none() {
        if let (Some(start), Some(endpoint)) = (instant, calendar_endpoint(ws)) {
            let event = EventRequest {
                summary: level.clone().unwrap_or_else(|| "Class".to_string()),
                description: note.clone(),
                start_time: to_rfc3339(start),
                end_time: to_rfc3339(start + Duration::minutes(60)),
                teacher_email: Some(teacher.email.clone()),
            };
            match calendar::create_event(&endpoint, &event) {
                Ok(created) => url = created.meet_link,
                Err(e) => log::warn!("calendar event creation failed, class gets no url: {}", e),
            }
        }
    }

    let row = ClassRow {
        id: Uuid::new_v4().to_string(),
        public_id: Some(Uuid::new_v4().to_string()[..8].to_string()),
        date_time,
        level,
        note,
        url,
        teacher_id: Some(teacher_id.clone()),
        created_at: Some(to_rfc3339(chrono::Utc::now())),
        created_by: Some(teacher_id),
    };
    let inserted = ws.conn.execute(
        &format!(
            "INSERT INTO {}(id, public_id, date_time, level, note, url, teacher_id, created_at, created_by)
             VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ws.class_table
        ),
        (
            &row.id,
            &row.public_id,
            &row.date_time,
            &row.level,
            &row.note,
            &row.url,
            &row.teacher_id,
            &row.created_at,
            &row.created_by,
        ),
    );
    match inserted {
        Ok(_) => ok(&req.id, json!({ "class": row.to_json() })),
        Err(e) => HandlerErr::new("db_insert_failed", e.to_string()).response(&req.id),
    }
}

/// Short shareable link lookup: by public id first, then by the full class
/// id for older links minted before public ids existed.
fn handle_classes_resolve(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let public_id = match required_str(req, "publicId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let found = match load_class_by_public_id(ws, &public_id) {
        Ok(Some(row)) => Some(row),
        Ok(None) => match load_class(ws, &public_id) {
            Ok(row) => row,
            Err(e) => return e.response(&req.id),
        },
        Err(e) => return e.response(&req.id),
    };
    match found {
        Some(row) => ok(&req.id, json!({ "class": row.to_json() })),
        None => HandlerErr::new("not_found", "class link not found").response(&req.id),
    }
}

fn handle_classes_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let mut row = match load_class(ws, &class_id) {
        Ok(Some(row)) => row,
        Ok(None) => return HandlerErr::new("not_found", "class not found").response(&req.id),
        Err(e) => return e.response(&req.id),
    };
    let Some(patch) = req.params.get("patch") else {
        return HandlerErr::bad_params("missing patch").response(&req.id);
    };

    if let Some(v) = patch.get("dateTime") {
        row.date_time = match v.as_str() {
            Some(raw) => match parse_instant("dateTime", raw) {
                Ok(_) => Some(raw.to_string()),
                Err(e) => return e.response(&req.id),
            },
            None if v.is_null() => None,
            None => return HandlerErr::bad_params("dateTime must be a string or null").response(&req.id),
        };
    }
    for (key, slot) in [
        ("level", &mut row.level),
        ("note", &mut row.note),
        ("url", &mut row.url),
        ("teacherId", &mut row.teacher_id),
    ] {
        if let Some(v) = patch.get(key) {
            *slot = match v.as_str() {
                Some(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
                Some(_) => None,
                None if v.is_null() => None,
                None => {
                    return HandlerErr::bad_params(format!("{} must be a string or null", key))
                        .response(&req.id)
                }
            };
        }
    }

    let updated = ws.conn.execute(
        &format!(
            "UPDATE {} SET date_time = ?, level = ?, note = ?, url = ?, teacher_id = ? WHERE id = ?",
            ws.class_table
        ),
        (
            &row.date_time,
            &row.level,
            &row.note,
            &row.url,
            &row.teacher_id,
            &class_id,
        ),
    );
    match updated {
        Ok(_) => ok(&req.id, json!({ "class": row.to_json() })),
        Err(e) => HandlerErr::new("db_update_failed", e.to_string()).response(&req.id),
    }
}

fn handle_classes_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match load_class(ws, &class_id) {
        Ok(Some(_)) => {}
        Ok(None) => return HandlerErr::new("not_found", "class not found").response(&req.id),
        Err(e) => return e.response(&req.id),
    }

    let tx = match ws.conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return HandlerErr::new("db_tx_failed", e.to_string()).response(&req.id),
    };
    // Attendance first, then the class itself.
    if let Err(e) = tx.execute("DELETE FROM attendance WHERE class_id = ?", [&class_id]) {
        let _ = tx.rollback();
        return HandlerErr::new("db_delete_failed", e.to_string()).response(&req.id);
    }
    if let Err(e) = tx.execute(
        &format!("DELETE FROM {} WHERE id = ?", ws.class_table),
        [&class_id],
    ) {
        let _ = tx.rollback();
        return HandlerErr::new("db_delete_failed", e.to_string()).response(&req.id);
    }
    if let Err(e) = tx.commit() {
        return HandlerErr::new("db_commit_failed", e.to_string()).response(&req.id);
    }
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_classes_list(state, req)),
        "classes.create" => Some(handle_classes_create(state, req)),
        "classes.resolve" => Some(handle_classes_resolve(state, req)),
        "classes.update" => Some(handle_classes_update(state, req)),
        "classes.delete" => Some(handle_classes_delete(state, req)),
        _ => None,
    }
}
