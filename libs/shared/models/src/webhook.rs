use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::ids::{BusinessId, PractitionerId, ServiceId};

/// Nested data objects used in webhook responses. The voice agent reads these
/// structured fields; `message` carries the spoken text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationData {
    pub id: BusinessId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PractitionerData {
    pub id: PractitionerId,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceData {
    pub id: ServiceId,
    pub name: String,
    pub duration_minutes: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSlotData {
    pub date: String,
    pub time: String,
    pub display: String,
}

/// Build a success envelope: `{success, sessionId, message, ...extra}`.
pub fn voice_success(session_id: &str, message: &str, extra: Value) -> Value {
    let mut body = Map::new();
    body.insert("success".to_string(), json!(true));
    body.insert("sessionId".to_string(), json!(session_id));
    body.insert("message".to_string(), json!(message));
    if let Value::Object(fields) = extra {
        for (key, value) in fields {
            body.insert(key, value);
        }
    }
    Value::Object(body)
}

/// Build an error envelope with a stable error code and voice-ready message.
pub fn voice_error(code: &str, message: &str, session_id: &str) -> Value {
    json!({
        "success": false,
        "sessionId": session_id,
        "message": message,
        "error": code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_merges_extra_fields() {
        let body = voice_success(
            "session_1",
            "I'll book you at City Clinic",
            json!({"resolved": true, "confidence": 0.9}),
        );
        assert_eq!(body["success"], json!(true));
        assert_eq!(body["sessionId"], json!("session_1"));
        assert_eq!(body["resolved"], json!(true));
        assert_eq!(body["confidence"], json!(0.9));
    }

    #[test]
    fn error_envelope_carries_code() {
        let body = voice_error("slot_taken", "That time was just taken.", "s1");
        assert_eq!(body["success"], json!(false));
        assert_eq!(body["error"], json!("slot_taken"));
    }
}
