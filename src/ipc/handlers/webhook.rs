use serde_json::json;
use uuid::Uuid;

use crate::ipc::error::ok;
use crate::ipc::helpers::{to_rfc3339, workspace, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::webhook::extract_contact;

use super::students::upsert_student_by_email;

/// Inbound webhook: the payload is stored no matter what, and contact
/// extraction is best-effort. A payload we cannot read is still a success.
fn handle_webhook_ingest(state: &mut AppState, req: &Request) -> serde_json::Value {
    let ws = match workspace(state, req) {
        Ok(ws) => ws,
        Err(resp) => return resp,
    };
    let Some(payload) = req.params.get("payload") else {
        return HandlerErr::bad_params("missing payload").response(&req.id);
    };
    if !payload.is_object() {
        return HandlerErr::bad_params("payload must be an object").response(&req.id);
    }

    let inbound_id = Uuid::new_v4().to_string();
    let stored = ws.conn.execute(
        "INSERT INTO webhook_inbounds(id, payload, received_at) VALUES(?, ?, ?)",
        (
            &inbound_id,
            payload.to_string(),
            to_rfc3339(chrono::Utc::now()),
        ),
    );
    if let Err(e) = stored {
        return HandlerErr::new("db_insert_failed", e.to_string()).response(&req.id);
    }

    let Some(contact) = extract_contact(payload) else {
        log::warn!("webhook {} stored but no contact found in payload", inbound_id);
        return ok(
            &req.id,
            json!({ "inboundId": inbound_id, "student": null, "created": false }),
        );
    };

    match upsert_student_by_email(ws, &contact.email, contact.name.as_deref(), None) {
        Ok((student, created)) => {
            log::info!(
                "webhook {} upserted student {} (created: {})",
                inbound_id,
                student.id,
                created
            );
            ok(
                &req.id,
                json!({
                    "inboundId": inbound_id,
                    "student": student.to_json(),
                    "created": created,
                }),
            )
        }
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "webhook.ingest" => Some(handle_webhook_ingest(state, req)),
        _ => None,
    }
}
