use serde::{Deserialize, Serialize};

use shared_models::webhook::LocationData;

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationResolverRequest {
    #[serde(rename = "locationQuery")]
    pub location_query: String,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "dialedNumber")]
    pub dialed_number: String,
    #[serde(rename = "callerPhone", alias = "systemCallerID", default)]
    pub caller_phone: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationConfirmerRequest {
    #[serde(rename = "userResponse")]
    pub user_response: String,
    #[serde(default)]
    pub options: Vec<LocationData>,
    #[serde(rename = "sessionId")]
    pub session_id: String,
    #[serde(rename = "dialedNumber")]
    pub dialed_number: String,
}

/// Internal outcome of a resolution pass; handlers turn this into the webhook
/// envelope and voice message.
#[derive(Debug, Clone, Serialize)]
pub enum ResolutionOutcome {
    Resolved {
        location: LocationData,
        confidence: f64,
    },
    NeedsConfirmation {
        best: LocationData,
        second: Option<LocationData>,
        confidence: f64,
    },
    NeedsClarification {
        options: Vec<LocationData>,
    },
    NoLocations,
}
