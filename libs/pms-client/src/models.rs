use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// PMS ids arrive as large JSON numbers on some shards and strings on others.
pub fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    match value {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PmsPhoneNumber {
    pub number: String,
    #[serde(default)]
    pub phone_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PmsPatient {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone_numbers: Vec<PmsPhoneNumber>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPmsPatient {
    pub first_name: String,
    pub last_name: String,
    pub phone_numbers: Vec<NewPmsPhoneNumber>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPmsPhoneNumber {
    pub number: String,
    pub phone_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AvailableTime {
    /// UTC start of the offered slot, as returned by the PMS.
    pub appointment_start: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewPmsAppointment {
    #[serde(rename = "appointment_start")]
    pub starts_at: String,
    #[serde(rename = "appointment_end")]
    pub ends_at: String,
    pub patient_id: String,
    pub practitioner_id: String,
    pub appointment_type_id: String,
    pub business_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PmsAppointment {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    pub appointment_start: String,
    #[serde(default)]
    pub appointment_end: Option<String>,
    #[serde(default)]
    pub cancelled_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PageLinks {
    #[serde(default)]
    pub next: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patient_ids_accept_numbers_and_strings() {
        let numeric: PmsPatient = serde_json::from_str(
            r#"{"id": 1717010852512540252, "first_name": "Test", "last_name": "Patient"}"#,
        )
        .unwrap();
        assert_eq!(numeric.id, "1717010852512540252");

        let stringy: PmsPatient = serde_json::from_str(
            r#"{"id": "42", "first_name": "Test", "last_name": "Patient"}"#,
        )
        .unwrap();
        assert_eq!(stringy.id, "42");
    }
}
