use rusqlite::OptionalExtension;
use serde_json::json;
use uuid::Uuid;

use crate::db::Workspace;
use crate::ipc::error::ok;
use crate::ipc::helpers::{optional_str, required_str, workspace, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::store::is_conflict;

#[derive(Debug, Clone)]
pub struct StudentRow {
    pub id: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub weekly_classes: Option<i64>,
}

impl StudentRow {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "name": self.name,
            "email": self.email,
            "weeklyClasses": self.weekly_classes,
        })
    }
}

fn student_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<StudentRow> {
    Ok(StudentRow {
        id: r.get(0)?,
        name: r.get(1)?,
        email: r.get(2)?,
        weekly_classes: r.get(3)?,
    })
}

const STUDENT_COLUMNS: &str = "id, name, email, weekly_classes";

pub fn find_student_by_email(
    ws: &Workspace,
    email: &str,
) -> Result<Option<StudentRow>, HandlerErr> {
    ws.conn
        .query_row(
            &format!(
                "SELECT {} FROM students WHERE lower(email) = ?",
                STUDENT_COLUMNS
            ),
            [&email.to_lowercase()],
            student_row,
        )
        .optional()
        .map_err(HandlerErr::db)
}

fn find_student_by_id(ws: &Workspace, id: &str) -> Result<Option<StudentRow>, HandlerErr> {
    ws.conn
        .query_row(
            &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS),
            [id],
            student_row,
        )
        .optional()
        .map_err(HandlerErr::db)
}

/// Tri-state quota field: absent (`Ok(None)`), explicit null
/// (`Ok(Some(None))` = unlimited), or a non-negative integer.
fn weekly_classes_param(req: &Request) -> Result<Option<Option<i64>>, HandlerErr> {
    let Some(raw) = req.params.get("weeklyClasses") else {
        return Ok(None);
    };
    if raw.is_null() {
        return Ok(Some(None));
    }
    let n = raw
        .as_i64()
        .filter(|n| *n >= 0)
        .ok_or_else(|| HandlerErr::bad_params("weeklyClasses must be a non-negative integer or null"))?;
    Ok(Some(Some(n)))
}

/// Idempotent upsert keyed by email: updates name (and quota when given)
/// for an existing student, inserts otherwise. Shared with webhook ingest.
pub fn upsert_student_by_email(
    ws: &Workspace,
    email: &str,
    name: Option<&str>,
    weekly_classes: Option<Option<i64>>,
) -> Result<(StudentRow, bool), HandlerErr> {
    let email = email.trim().to_lowercase();
    if email.is_empty() {
        return Err(HandlerErr::bad_params("email must not be empty"));
    }

    if let Some(existing) = find_student_by_email(ws, &email)? {
        let new_name = name
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or(existing.name.clone());
        let new_quota = weekly_classes.unwrap_or(existing.weekly_classes);
        ws.conn
            .execute(
                "UPDATE students SET name = ?, weekly_classes = ? WHERE id = ?",
                (&new_name, &new_quota, &existing.id),
            )
            .map_err(HandlerErr::db)?;
        return Ok((
            StudentRow {
                name: new_name,
                weekly_classes: new_quota,
                ..existing
            },
            false,
        ));
    }

    let row = StudentRow {
        id: Uuid::new_v4().to_string(),
        name: name
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        email: Some(email),
        weekly_classes: weekly_classes.flatten(),
    };
    ws.conn
        .execute(
            "INSERT INTO students(id, name, email, weekly_classes) VALUES(?, ?, ?, ?)",
            (&row.id, &row.name, &row.email, &row.weekly_classes),
        )
        .map_err(HandlerErr::db)?;
    Ok((row, true))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };

    let search = optional_str(req, "search").map(|s| s.to_lowercase());
    let mut sql = format!("SELECT {} FROM students", STUDENT_COLUMNS);
    if search.is_some() {
        sql.push_str(
            " WHERE (name IS NOT NULL AND lower(name) LIKE ?)
               OR (email IS NOT NULL AND lower(email) LIKE ?)",
        );
    }
    sql.push_str(" ORDER BY name IS NULL, name, email");

    let mut stmt = match ws.conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return HandlerErr::db(e).response(&req.id),
    };
    let rows = match search {
        Some(term) => {
            let pattern = format!("%{}%", term);
            stmt.query_map([&pattern, &pattern], student_row)
        }
        None => stmt.query_map([], student_row),
    };
    match rows.and_then(|it| it.collect::<Result<Vec<_>, _>>()) {
        Ok(students) => ok(
            &req.id,
            json!({ "students": students.iter().map(StudentRow::to_json).collect::<Vec<_>>() }),
        ),
        Err(e) => HandlerErr::db(e).response(&req.id),
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    if name.is_empty() {
        return HandlerErr::bad_params("name must not be empty").response(&req.id);
    }
    let email = optional_str(req, "email").map(|e| e.to_lowercase());
    let weekly_classes = match weekly_classes_param(req) {
        Ok(v) => v.flatten(),
        Err(e) => return e.response(&req.id),
    };

    let name_taken: Result<Option<i64>, _> = ws
        .conn
        .query_row("SELECT 1 FROM students WHERE name = ?", [&name], |r| {
            r.get(0)
        })
        .optional();
    match name_taken {
        Ok(Some(_)) => {
            return HandlerErr::new("conflict", "a student with this name already exists")
                .response(&req.id)
        }
        Ok(None) => {}
        Err(e) => return HandlerErr::db(e).response(&req.id),
    }

    let student_id = Uuid::new_v4().to_string();
    let inserted = ws.conn.execute(
        "INSERT INTO students(id, name, email, weekly_classes) VALUES(?, ?, ?, ?)",
        (&student_id, &name, &email, &weekly_classes),
    );
    match inserted {
        Ok(_) => ok(
            &req.id,
            json!({
                "student": StudentRow {
                    id: student_id,
                    name: Some(name),
                    email,
                    weekly_classes,
                }
                .to_json()
            }),
        ),
        Err(e) if is_conflict(&e) => {
            HandlerErr::new("conflict", "a student with this email already exists")
                .response(&req.id)
        }
        Err(e) => HandlerErr::db(e).response(&req.id),
    }
}

fn handle_students_upsert(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let weekly_classes = match weekly_classes_param(req) {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };

    match upsert_student_by_email(ws, &email, Some(&name), weekly_classes) {
        Ok((student, created)) => ok(
            &req.id,
            json!({ "student": student.to_json(), "created": created }),
        ),
        Err(e) => e.response(&req.id),
    }
}

fn handle_students_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let existing = match find_student_by_id(ws, &student_id) {
        Ok(Some(row)) => row,
        Ok(None) => return HandlerErr::new("not_found", "student not found").response(&req.id),
        Err(e) => return e.response(&req.id),
    };

    let Some(patch) = req.params.get("patch") else {
        return HandlerErr::bad_params("missing patch").response(&req.id);
    };

    let name = match patch.get("name") {
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_str() {
            Some(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Some(_) => None,
            None => return HandlerErr::bad_params("name must be a string").response(&req.id),
        },
        None => existing.name.clone(),
    };
    let email = match patch.get("email") {
        Some(v) => match v.as_str().map(str::trim) {
            Some(s) if !s.is_empty() => Some(s.to_lowercase()),
            _ => return HandlerErr::bad_params("email is required").response(&req.id),
        },
        None => existing.email.clone(),
    };
    let weekly_classes = match patch.get("weeklyClasses") {
        None => existing.weekly_classes,
        Some(v) if v.is_null() => None,
        Some(v) => match v.as_i64().filter(|n| *n >= 0) {
            Some(n) => Some(n),
            None => {
                return HandlerErr::bad_params(
                    "weeklyClasses must be a non-negative integer or null",
                )
                .response(&req.id)
            }
        },
    };

    let updated = ws.conn.execute(
        "UPDATE students SET name = ?, email = ?, weekly_classes = ? WHERE id = ?",
        (&name, &email, &weekly_classes, &student_id),
    );
    match updated {
        Ok(_) => ok(
            &req.id,
            json!({
                "student": StudentRow { id: student_id, name, email, weekly_classes }.to_json()
            }),
        ),
        Err(e) if is_conflict(&e) => {
            HandlerErr::new("conflict", "a student with this email already exists")
                .response(&req.id)
        }
        Err(e) => HandlerErr::db(e).response(&req.id),
    }
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let student_id = match required_str(req, "studentId") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    match find_student_by_id(ws, &student_id) {
        Ok(Some(_)) => {}
        Ok(None) => return HandlerErr::new("not_found", "student not found").response(&req.id),
        Err(e) => return e.response(&req.id),
    }

    let tx = match ws.conn.unchecked_transaction() {
        Ok(t) => t,
        Err(e) => return HandlerErr::new("db_tx_failed", e.to_string()).response(&req.id),
    };
    // The student's attendance goes with them.
    if let Err(e) = tx.execute("DELETE FROM attendance WHERE student_id = ?", [&student_id]) {
        let _ = tx.rollback();
        return HandlerErr::new("db_delete_failed", e.to_string()).response(&req.id);
    }
    if let Err(e) = tx.execute("DELETE FROM students WHERE id = ?", [&student_id]) {
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
        "students.list" => Some(handle_students_list(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.upsert" => Some(handle_students_upsert(state, req)),
        "students.update" => Some(handle_students_update(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        _ => None,
    }
}
