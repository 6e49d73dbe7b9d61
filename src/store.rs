use rusqlite::ErrorCode;

/// Classified store failure. The rest of the daemon matches on this instead
/// of inspecting driver error strings at call sites.
#[derive(Debug)]
pub enum StoreError {
    /// The referenced table/relation does not exist in this workspace.
    MissingRelation(String),
    /// A uniqueness constraint rejected the write (e.g. duplicate
    /// attendance for the same class/student pair).
    Conflict(String),
    Other(rusqlite::Error),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::MissingRelation(_) => "missing_relation",
            StoreError::Conflict(_) => "conflict",
            StoreError::Other(_) => "db_error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            StoreError::MissingRelation(t) => format!("no such table: {}", t),
            StoreError::Conflict(m) => m.clone(),
            StoreError::Other(e) => e.to_string(),
        }
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for StoreError {}

fn missing_table_name(text: &str) -> Option<String> {
    let rest = text.split("no such table: ").nth(1)?;
    let name: String = rest
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// The single translation point from the SQLite driver's error shapes.
/// SQLite has no dedicated result code for a missing table (it is a generic
/// SQLITE_ERROR at prepare time), so the message check lives here and
/// nowhere else.
pub fn classify(e: rusqlite::Error) -> StoreError {
    if let rusqlite::Error::SqliteFailure(f, msg) = &e {
        if f.code == ErrorCode::ConstraintViolation {
            return StoreError::Conflict(msg.clone().unwrap_or_default());
        }
    }
    if let Some(table) = missing_table_name(&e.to_string()) {
        return StoreError::MissingRelation(table);
    }
    StoreError::Other(e)
}

pub fn is_conflict(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation
    )
}
