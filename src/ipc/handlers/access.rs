use serde_json::json;

use crate::db::{self, SETTING_QUOTA_ENFORCE};
use crate::ipc::error::ok;
use crate::ipc::helpers::{optional_instant, required_str, to_rfc3339, workspace, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::week::{in_window, week_bounds, WeekPolicy};

use super::students::find_student_by_email;

fn quota_enforced(ws: &crate::db::Workspace) -> bool {
    matches!(
        db::settings_get(&ws.conn, SETTING_QUOTA_ENFORCE)
            .ok()
            .flatten()
            .as_deref(),
        Some("true") | Some("1") | Some("on")
    )
}

/// Weekly-quota check. The week runs Monday through Saturday here; a class
/// on Sunday is billed to the week before. This is looser than the
/// dashboard's Monday-to-Sunday week and kept separate on purpose.
fn handle_access_check(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let email = match required_str(req, "email") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let reference = match optional_instant(req, "reference") {
        Ok(v) => v.unwrap_or_else(chrono::Utc::now),
        Err(e) => return e.response(&req.id),
    };

    let student = match find_student_by_email(ws, &email) {
        Ok(Some(s)) => s,
        Ok(None) => return HandlerErr::new("not_found", "student not found").response(&req.id),
        Err(e) => return e.response(&req.id),
    };

    let (start, end) = week_bounds(reference, 0, WeekPolicy::QuotaWeek);
    let dates = ws
        .conn
        .prepare(&format!(
            "SELECT c.date_time FROM attendance a
             JOIN {} c ON c.id = a.class_id
             WHERE a.student_id = ?",
            ws.class_table
        ))
        .and_then(|mut stmt| {
            stmt.query_map([&student.id], |r| r.get::<_, Option<String>>(0))
                .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        });
    let dates = match dates {
        Ok(d) => d,
        Err(e) => return HandlerErr::db(e).response(&req.id),
    };
    let attended = dates
        .iter()
        .filter_map(|raw| raw.as_deref())
        .filter_map(|raw| raw.parse::<chrono::DateTime<chrono::Utc>>().ok())
        .filter(|dt| in_window(*dt, start, end))
        .count() as i64;

    let limit = student.weekly_classes;
    let at_limit = limit.map(|n| attended >= n).unwrap_or(false);
    let enforced = quota_enforced(ws);
    ok(
        &req.id,
        json!({
            "student": student.to_json(),
            "weeklyLimit": limit,
            "attendedThisWeek": attended,
            "atLimit": at_limit,
            "allowed": !(enforced && at_limit),
            "enforced": enforced,
            "weekStart": to_rfc3339(start),
            "weekEnd": to_rfc3339(end),
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "access.check" => Some(handle_access_check(state, req)),
        _ => None,
    }
}
