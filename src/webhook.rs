use serde_json::Value;

/// What an inbound marketing-platform payload yields once a strategy
/// recognises its shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContact {
    pub email: String,
    pub name: Option<String>,
}

type Extractor = fn(&Value) -> Option<ExtractedContact>;

/// Vendor payloads arrive in several shapes depending on the event type and
/// platform version. Each strategy is a pure probe; the first one that
/// finds an email wins.
const EXTRACTORS: &[Extractor] = &[
    extract_customer_object,
    extract_member_object,
    extract_flat_fields,
    extract_data_envelope,
];

pub fn extract_contact(payload: &Value) -> Option<ExtractedContact> {
    EXTRACTORS.iter().find_map(|f| f(payload))
}

fn non_empty_str(v: Option<&Value>) -> Option<&str> {
    v.and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn contact_from(obj: &Value) -> Option<ExtractedContact> {
    let email = non_empty_str(obj.get("email"))?.to_lowercase();
    let name = non_empty_str(obj.get("name"))
        .map(str::to_string)
        .or_else(|| {
            let first = non_empty_str(obj.get("first_name"))?;
            match non_empty_str(obj.get("last_name")) {
                Some(last) => Some(format!("{} {}", first, last)),
                None => Some(first.to_string()),
            }
        });
    Some(ExtractedContact { email, name })
}

/// `{ "customer": { "email": ..., "name"/"first_name"+"last_name": ... } }`
fn extract_customer_object(payload: &Value) -> Option<ExtractedContact> {
    contact_from(payload.get("customer")?)
}

/// `{ "member": { "email": ... } }`
fn extract_member_object(payload: &Value) -> Option<ExtractedContact> {
    contact_from(payload.get("member")?)
}

/// `{ "email": ..., "name": ... }` at the top level.
fn extract_flat_fields(payload: &Value) -> Option<ExtractedContact> {
    contact_from(payload)
}

/// `{ "data": {...} }` or `{ "payload": {...} }` envelopes, one level deep.
fn extract_data_envelope(payload: &Value) -> Option<ExtractedContact> {
    for key in ["data", "payload"] {
        if let Some(inner) = payload.get(key) {
            if let Some(c) = contact_from(inner) {
                return Some(c);
            }
        }
    }
    None
}
