use rusqlite::Connection;
use std::path::Path;

use crate::store::{classify, StoreError};

/// Backing table names observed across environments for the class-session
/// entity. Probed in this order; see `resolve_class_table`.
pub const CANDIDATE_CLASS_TABLES: [&str; 5] =
    ["classes", "class", "sessions", "lessons", "academic_classes"];

pub const SETTING_CLASS_TABLE: &str = "class_table";
pub const SETTING_CALENDAR_ENDPOINT: &str = "calendar.endpoint";
pub const SETTING_QUOTA_ENFORCE: &str = "quota.enforce";

pub struct Workspace {
    pub conn: Connection,
    /// Resolved once at open; every later query uses this name.
    pub class_table: String,
}

pub fn open_db(workspace: &Path) -> anyhow::Result<Workspace> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("liveclass.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            name TEXT,
            role TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT,
            email TEXT UNIQUE,
            weekly_classes INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            class_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            note TEXT,
            created_at TEXT NOT NULL,
            UNIQUE(class_id, student_id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_class ON attendance(class_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS webhook_inbounds(
            id TEXT PRIMARY KEY,
            payload TEXT NOT NULL,
            received_at TEXT NOT NULL
        )",
        [],
    )?;

    let class_table = match resolve_class_table(&conn)? {
        Some(name) => name,
        None => {
            create_class_table(&conn)?;
            "classes".to_string()
        }
    };
    settings_set(&conn, SETTING_CLASS_TABLE, &class_table)?;

    Ok(Workspace { conn, class_table })
}

/// Probes the candidate names in fixed order. A missing relation moves on
/// to the next candidate; any other error aborts and surfaces. The first
/// candidate that reads successfully wins, zero rows included. Returns
/// None when no candidate exists.
pub fn resolve_class_table(conn: &Connection) -> Result<Option<String>, StoreError> {
    for name in CANDIDATE_CLASS_TABLES {
        let probe = format!("SELECT COUNT(*) FROM {}", name);
        match conn.query_row(&probe, [], |r| r.get::<_, i64>(0)) {
            Ok(_) => return Ok(Some(name.to_string())),
            Err(e) => match classify(e) {
                StoreError::MissingRelation(_) => continue,
                other => return Err(other),
            },
        }
    }
    Ok(None)
}

fn create_class_table(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS classes(
            id TEXT PRIMARY KEY,
            public_id TEXT,
            date_time TEXT,
            level TEXT,
            note TEXT,
            url TEXT,
            teacher_id TEXT,
            created_at TEXT NOT NULL,
            created_by TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_classes_teacher ON classes(teacher_id)",
        [],
    )?;
    Ok(())
}

pub fn settings_get(conn: &Connection, key: &str) -> anyhow::Result<Option<String>> {
    use rusqlite::OptionalExtension;
    let v = conn
        .query_row("SELECT value FROM settings WHERE key = ?", [key], |r| {
            r.get::<_, String>(0)
        })
        .optional()?;
    Ok(v)
}

pub fn settings_set(conn: &Connection, key: &str, value: &str) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        (key, value),
    )?;
    Ok(())
}
