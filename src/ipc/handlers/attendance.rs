use std::collections::HashMap;

use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::ok;
use crate::ipc::helpers::{
    load_attendance_for_class, load_class, optional_str, required_str, to_rfc3339, workspace,
    AttendanceRow, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::store::is_conflict;

use super::students::StudentRow;

fn handle_attendance_list(state: &mut AppState, req: &Request) -> serde_json::Value {
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
    let records = match load_attendance_for_class(ws, &class_id) {
        Ok(rows) => rows,
        Err(e) => return e.response(&req.id),
    };

    let mut students: HashMap<String, StudentRow> = HashMap::new();
    let lookup = ws.conn.prepare(
        "SELECT s.id, s.name, s.email, s.weekly_classes
         FROM students s JOIN attendance a ON a.student_id = s.id
         WHERE a.class_id = ?",
    );
    let mut stmt = match lookup {
        Ok(s) => s,
        Err(e) => return HandlerErr::db(e).response(&req.id),
    };
    let rows = stmt.query_map([&class_id], |r| {
        Ok(StudentRow {
            id: r.get(0)?,
            name: r.get(1)?,
            email: r.get(2)?,
            weekly_classes: r.get(3)?,
        })
    });
    match rows.and_then(|it| it.collect::<Result<Vec<_>, _>>()) {
        Ok(list) => {
            for s in list {
                students.insert(s.id.clone(), s);
            }
        }
        Err(e) => return HandlerErr::db(e).response(&req.id),
    }

    let records: Vec<_> = records
        .iter()
        .map(|rec| {
            let mut v = rec.to_json();
            v["student"] = students
                .get(&rec.student_id)
                .map(StudentRow::to_json)
                .unwrap_or(serde_json::Value::Null);
            v
        })
        .collect();
    ok(&req.id, json!({ "records": records }))
}

fn find_record(
    ws: &crate::db::Workspace,
    class_id: &str,
    student_id: &str,
) -> Result<Option<AttendanceRow>, HandlerErr> {
    ws.conn
        .query_row(
            "SELECT id, class_id, student_id, note, created_at
             FROM attendance WHERE class_id = ? AND student_id = ?",
            [class_id, student_id],
            |r| {
                Ok(AttendanceRow {
                    id: r.get(0)?,
                    class_id: r.get(1)?,
                    student_id: r.get(2)?,
                    note: r.get(3)?,
                    created_at: r.get(4)?,
                })
            },
        )
        .optional()
        .map_err(HandlerErr::db)
}

fn handle_attendance_add(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match load_class(ws, &class_id) {
        Ok(Some(_)) => {}
        Ok(None) => return HandlerErr::new("not_found", "class not found").response(&req.id),
        Err(e) => return e.response(&req.id),
    }
    let student_exists: Result<Option<i64>, _> = ws
        .conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional();
    match student_exists {
        Ok(Some(_)) => {}
        Ok(None) => return HandlerErr::new("not_found", "student not found").response(&req.id),
        Err(e) => return HandlerErr::db(e).response(&req.id),
    }

    let record = AttendanceRow {
        id: Uuid::new_v4().to_string(),
        class_id: class_id.clone(),
        student_id: student_id.clone(),
        note: optional_str(req, "note"),
        created_at: to_rfc3339(chrono::Utc::now()),
    };
    let inserted = ws.conn.execute(
        "INSERT INTO attendance(id, class_id, student_id, note, created_at)
         VALUES(?, ?, ?, ?, ?)",
        (
            &record.id,
            &record.class_id,
            &record.student_id,
            &record.note,
            &record.created_at,
        ),
    );
    match inserted {
        Ok(_) => ok(
            &req.id,
            json!({ "record": record.to_json(), "alreadyPresent": false }),
        ),
        // Taking attendance twice for the same student is a no-op, not an
        // error: hand back the record that is already there.
        Err(e) if is_conflict(&e) => match find_record(ws, &class_id, &student_id) {
            Ok(Some(existing)) => ok(
                &req.id,
                json!({ "record": existing.to_json(), "alreadyPresent": true }),
            ),
            Ok(None) => HandlerErr::new("conflict", "attendance record already exists")
                .response(&req.id),
            Err(e) => e.response(&req.id),
        },
        Err(e) => HandlerErr::new("db_insert_failed", e.to_string()).response(&req.id),
    }
}

fn handle_attendance_remove(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let attendance_id = match required_str(req, "attendanceId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match ws
        .conn
        .execute("DELETE FROM attendance WHERE id = ?", [&attendance_id])
    {
        Ok(0) => HandlerErr::new("not_found", "attendance record not found").response(&req.id),
        Ok(_) => ok(&req.id, json!({ "ok": true })),
        Err(e) => HandlerErr::new("db_delete_failed", e.to_string()).response(&req.id),
    }
}

fn handle_attendance_set_note(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let attendance_id = match required_str(req, "attendanceId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let note = match req.params.get("note") {
        None => return HandlerErr::bad_params("missing note").response(&req.id),
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_str() {
            Some(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(_) => None,
            None => return HandlerErr::bad_params("note must be a string or null").response(&req.id),
        },
    };
    match ws.conn.execute(
        "UPDATE attendance SET note = ? WHERE id = ?",
        (&note, &attendance_id),
    ) {
        Ok(0) => HandlerErr::new("not_found", "attendance record not found").response(&req.id),
        Ok(_) => ok(&req.id, json!({ "id": attendance_id, "note": note })),
        Err(e) => HandlerErr::new("db_update_failed", e.to_string()).response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "attendance.list" => Some(handle_attendance_list(state, req)),
        "attendance.add" => Some(handle_attendance_add(state, req)),
        "attendance.remove" => Some(handle_attendance_remove(state, req)),
        "attendance.setNote" => Some(handle_attendance_set_note(state, req)),
        _ => None,
    }
}
