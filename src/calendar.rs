use serde_json::{json, Value};
use std::time::Duration;

/// Outbound request to the calendar-event endpoint. The endpoint owns
/// authentication and conference-link generation; we only speak its JSON
/// contract.
#[derive(Debug, Clone)]
pub struct EventRequest {
    pub summary: String,
    pub description: Option<String>,
    pub start_time: String,
    pub end_time: String,
    pub teacher_email: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CalendarEvent {
    pub id: String,
    pub summary: Option<String>,
    pub start: Value,
    pub end: Value,
    pub meet_link: Option<String>,
    pub html_link: Option<String>,
}

#[derive(Debug)]
pub enum CalendarError {
    Http(reqwest::Error),
    /// The endpoint answered but reported failure.
    Rejected(String),
    Malformed(String),
}

impl std::fmt::Display for CalendarError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CalendarError::Http(e) => write!(f, "calendar endpoint unreachable: {}", e),
            CalendarError::Rejected(m) => write!(f, "calendar endpoint rejected event: {}", m),
            CalendarError::Malformed(m) => write!(f, "calendar response malformed: {}", m),
        }
    }
}

impl std::error::Error for CalendarError {}

pub fn build_request_body(req: &EventRequest) -> Value {
    let mut body = json!({
        "summary": req.summary,
        "description": req.description.clone().unwrap_or_default(),
        "startTime": req.start_time,
        "endTime": req.end_time,
    });
    if let Some(email) = &req.teacher_email {
        body["teacherEmail"] = json!(email);
    }
    body
}

pub fn parse_response(body: &Value) -> Result<CalendarEvent, CalendarError> {
    if body.get("success").and_then(|v| v.as_bool()) != Some(true) {
        let msg = body
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("endpoint did not report success")
            .to_string();
        return Err(CalendarError::Rejected(msg));
    }
    let event = body
        .get("event")
        .ok_or_else(|| CalendarError::Malformed("missing event object".to_string()))?;
    let id = event
        .get("id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| CalendarError::Malformed("missing event.id".to_string()))?
        .to_string();
    Ok(CalendarEvent {
        id,
        summary: event.get("summary").and_then(|v| v.as_str()).map(String::from),
        start: event.get("start").cloned().unwrap_or(Value::Null),
        end: event.get("end").cloned().unwrap_or(Value::Null),
        meet_link: event.get("meetLink").and_then(|v| v.as_str()).map(String::from),
        html_link: event.get("htmlLink").and_then(|v| v.as_str()).map(String::from),
    })
}

/// One blocking POST; callers decide whether failure is fatal (the
/// `calendar.createEvent` method) or best-effort (class creation).
pub fn create_event(endpoint: &str, req: &EventRequest) -> Result<CalendarEvent, CalendarError> {
    let client = reqwest::blocking::Client::builder()
        .timeout(Duration::from_secs(15))
        .build()
        .map_err(CalendarError::Http)?;
    let body: Value = client
        .post(endpoint)
        .json(&build_request_body(req))
        .send()
        .map_err(CalendarError::Http)?
        .json()
        .map_err(CalendarError::Http)?;
    parse_response(&body)
}
