use serde_json::json;

use crate::calendar::{create_event, CalendarEvent, EventRequest};
use crate::db::{self, Workspace, SETTING_CALENDAR_ENDPOINT};
use crate::ipc::error::ok;
use crate::ipc::helpers::{optional_str, parse_instant, required_str, workspace, HandlerErr};
use crate::ipc::types::{AppState, Request};

/// Workspace setting first, environment second.
pub fn calendar_endpoint(ws: &Workspace) -> Option<String> {
    db::settings_get(&ws.conn, SETTING_CALENDAR_ENDPOINT)
        .ok()
        .flatten()
        .or_else(|| std::env::var("LIVECLASS_CALENDAR_ENDPOINT").ok())
        .filter(|s| !s.trim().is_empty())
}

fn event_json(event: &CalendarEvent) -> serde_json::Value {
    json!({
        "id": event.id,
        "summary": event.summary,
        "start": event.start,
        "end": event.end,
        "meetLink": event.meet_link,
        "htmlLink": event.html_link,
    })
}

fn handle_create_event(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let summary = match required_str(req, "summary") {
        Ok(v) => v.trim().to_string(),
        Err(e) => return e.response(&req.id),
    };
    if summary.is_empty() {
        return HandlerErr::bad_params("summary must not be empty").response(&req.id);
    }
    let start_time = match required_str(req, "startTime") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let end_time = match required_str(req, "endTime") {
        Ok(v) => v,
        Err(e) => return e.response(&req.id),
    };
    let start = match parse_instant("startTime", &start_time) {
        Ok(dt) => dt,
        Err(e) => return e.response(&req.id),
    };
    let end = match parse_instant("endTime", &end_time) {
        Ok(dt) => dt,
        Err(e) => return e.response(&req.id),
    };
    if end <= start {
        return HandlerErr::bad_params("endTime must be after startTime").response(&req.id);
    }

    let Some(endpoint) = calendar_endpoint(ws) else {
        return HandlerErr::new("no_calendar_endpoint", "no calendar endpoint configured")
            .response(&req.id);
    };

    let event = EventRequest {
        summary,
        description: optional_str(req, "description"),
        start_time,
        end_time,
        teacher_email: optional_str(req, "teacherEmail"),
    };
    match create_event(&endpoint, &event) {
        Ok(created) => {
            log::info!("calendar event {} created", created.id);
            ok(&req.id, json!({ "event": event_json(&created) }))
        }
        Err(e) => HandlerErr::new("calendar_failed", e.to_string()).response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "calendar.createEvent" => Some(handle_create_event(state, req)),
        _ => None,
    }
}
