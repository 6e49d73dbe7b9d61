use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params_from_iter, OptionalExtension};
use serde_json::json;

use crate::aggregate::ClassSnapshot;
use crate::db::Workspace;
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use crate::store::StoreError;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        HandlerErr::new("bad_params", message)
    }

    pub fn db(e: rusqlite::Error) -> Self {
        HandlerErr::new("db_query_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

impl From<StoreError> for HandlerErr {
    fn from(e: StoreError) -> Self {
        HandlerErr::new(e.code(), e.message())
    }
}

pub fn workspace<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a Workspace, serde_json::Value> {
    state
        .db
        .as_ref()
        .ok_or_else(|| err(&req.id, "no_workspace", "select a workspace first", None))
}

pub fn required_str(req: &Request, key: &str) -> Result<String, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Absent and explicit-null both read as None; strings come back trimmed.
pub fn optional_str(req: &Request, key: &str) -> Option<String> {
    req.params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

pub fn parse_instant(key: &str, raw: &str) -> Result<DateTime<Utc>, HandlerErr> {
    raw.parse::<DateTime<Utc>>()
        .map_err(|_| HandlerErr::bad_params(format!("{} must be an ISO-8601 instant", key)))
}

pub fn optional_instant(req: &Request, key: &str) -> Result<Option<DateTime<Utc>>, HandlerErr> {
    match optional_str(req, key) {
        Some(raw) => parse_instant(key, &raw).map(Some),
        None => Ok(None),
    }
}

pub fn to_rfc3339(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone)]
pub struct TeacherRow {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub role: Option<String>,
}

impl TeacherRow {
    pub fn is_manager(&self) -> bool {
        self.role.as_deref() == Some("Manager")
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "email": self.email,
            "name": self.name,
            "role": self.role,
        })
    }
}

pub fn load_teacher(ws: &Workspace, teacher_id: &str) -> Result<TeacherRow, HandlerErr> {
    ws.conn
        .query_row(
            "SELECT id, email, name, role FROM teachers WHERE id = ?",
            [teacher_id],
            |r| {
                Ok(TeacherRow {
                    id: r.get(0)?,
                    email: r.get(1)?,
                    name: r.get(2)?,
                    role: r.get(3)?,
                })
            },
        )
        .optional()
        .map_err(HandlerErr::db)?
        .ok_or_else(|| HandlerErr::new("not_found", "teacher not found"))
}

#[derive(Debug, Clone)]
pub struct ClassRow {
    pub id: String,
    pub public_id: Option<String>,
    pub date_time: Option<String>,
    pub level: Option<String>,
    pub note: Option<String>,
    pub url: Option<String>,
    pub teacher_id: Option<String>,
    pub created_at: Option<String>,
    pub created_by: Option<String>,
}

impl ClassRow {
    /// Unparseable timestamps degrade to "unscheduled" rather than failing
    /// a whole view.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        self.date_time
            .as_deref()
            .and_then(|s| s.parse::<DateTime<Utc>>().ok())
    }

    pub fn snapshot(&self) -> ClassSnapshot {
        ClassSnapshot {
            id: self.id.clone(),
            date_time: self.instant(),
            level: self.level.clone(),
            teacher_id: self.teacher_id.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "publicId": self.public_id,
            "dateTime": self.date_time,
            "level": self.level,
            "note": self.note,
            "url": self.url,
            "teacherId": self.teacher_id,
            "createdAt": self.created_at,
            "createdBy": self.created_by,
        })
    }
}

fn class_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<ClassRow> {
    Ok(ClassRow {
        id: r.get(0)?,
        public_id: r.get(1)?,
        date_time: r.get(2)?,
        level: r.get(3)?,
        note: r.get(4)?,
        url: r.get(5)?,
        teacher_id: r.get(6)?,
        created_at: r.get(7)?,
        created_by: r.get(8)?,
    })
}

const CLASS_COLUMNS: &str =
    "id, public_id, date_time, level, note, url, teacher_id, created_at, created_by";

pub fn load_class(ws: &Workspace, class_id: &str) -> Result<Option<ClassRow>, HandlerErr> {
    ws.conn
        .query_row(
            &format!(
                "SELECT {} FROM {} WHERE id = ?",
                CLASS_COLUMNS, ws.class_table
            ),
            [class_id],
            class_row,
        )
        .optional()
        .map_err(HandlerErr::db)
}

pub fn load_class_by_public_id(
    ws: &Workspace,
    public_id: &str,
) -> Result<Option<ClassRow>, HandlerErr> {
    ws.conn
        .query_row(
            &format!(
                "SELECT {} FROM {} WHERE public_id = ?",
                CLASS_COLUMNS, ws.class_table
            ),
            [public_id],
            class_row,
        )
        .optional()
        .map_err(HandlerErr::db)
}

/// All classes, or one teacher's. Managers see everything.
pub fn load_classes(
    ws: &Workspace,
    teacher_id: Option<&str>,
) -> Result<Vec<ClassRow>, HandlerErr> {
    let mut sql = format!("SELECT {} FROM {}", CLASS_COLUMNS, ws.class_table);
    if teacher_id.is_some() {
        sql.push_str(" WHERE teacher_id = ?");
    }
    sql.push_str(" ORDER BY date_time");
    let mut stmt = ws.conn.prepare(&sql).map_err(HandlerErr::db)?;
    let rows = match teacher_id {
        Some(tid) => stmt.query_map([tid], class_row),
        None => stmt.query_map([], class_row),
    };
    rows.and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)
}

pub fn visible_classes(ws: &Workspace, viewer: &TeacherRow) -> Result<Vec<ClassRow>, HandlerErr> {
    if viewer.is_manager() {
        load_classes(ws, None)
    } else {
        load_classes(ws, Some(&viewer.id))
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceRow {
    pub id: String,
    pub class_id: String,
    pub student_id: String,
    pub note: Option<String>,
    pub created_at: String,
}

impl AttendanceRow {
    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "classId": self.class_id,
            "studentId": self.student_id,
            "note": self.note,
            "createdAt": self.created_at,
        })
    }
}

fn attendance_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRow> {
    Ok(AttendanceRow {
        id: r.get(0)?,
        class_id: r.get(1)?,
        student_id: r.get(2)?,
        note: r.get(3)?,
        created_at: r.get(4)?,
    })
}

pub fn load_attendance_for_class(
    ws: &Workspace,
    class_id: &str,
) -> Result<Vec<AttendanceRow>, HandlerErr> {
    let mut stmt = ws
        .conn
        .prepare(
            "SELECT id, class_id, student_id, note, created_at
             FROM attendance WHERE class_id = ? ORDER BY created_at",
        )
        .map_err(HandlerErr::db)?;
    stmt.query_map([class_id], attendance_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)
}

pub fn load_attendance_for_classes(
    ws: &Workspace,
    class_ids: &[String],
) -> Result<Vec<AttendanceRow>, HandlerErr> {
    if class_ids.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = vec!["?"; class_ids.len()].join(", ");
    let mut stmt = ws
        .conn
        .prepare(&format!(
            "SELECT id, class_id, student_id, note, created_at
             FROM attendance WHERE class_id IN ({}) ORDER BY created_at",
            placeholders
        ))
        .map_err(HandlerErr::db)?;
    stmt.query_map(params_from_iter(class_ids.iter()), attendance_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db)
}
