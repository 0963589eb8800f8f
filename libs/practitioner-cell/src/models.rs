use serde::Deserialize;

fn default_session() -> String {
    String::new()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PractitionerServicesRequest {
    pub practitioner: String,
    #[serde(rename = "dialedNumber")]
    pub dialed_number: String,
    #[serde(rename = "sessionId", default = "default_session")]
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PractitionerInfoRequest {
    pub practitioner: String,
    #[serde(rename = "dialedNumber")]
    pub dialed_number: String,
    #[serde(rename = "sessionId", default = "default_session")]
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocationPractitionersRequest {
    pub business_id: String,
    #[serde(rename = "dialedNumber")]
    pub dialed_number: String,
    #[serde(rename = "sessionId", default = "default_session")]
    pub session_id: String,
}
