use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Distinct ID types per entity kind so a practitioner id can never be passed
/// where a business id is expected.
macro_rules! string_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(raw: String) -> Self {
                Self(raw)
            }
        }

        impl From<&str> for $name {
            fn from(raw: &str) -> Self {
                Self(raw.to_string())
            }
        }
    };
}

string_id!(
    /// PMS business id (a physical clinic location).
    BusinessId
);
string_id!(PractitionerId);
string_id!(
    /// PMS appointment type id (a bookable service).
    ServiceId
);
string_id!(PatientId);
string_id!(AppointmentId);
string_id!(
    /// Voice call session id; scopes rejected slots and booking context.
    SessionId
);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClinicId(pub Uuid);

impl ClinicId {
    pub fn new(raw: Uuid) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ClinicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_ids_serialize_transparently() {
        let id = PractitionerId::new("1717010852512540252");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"1717010852512540252\"");
        let back: PractitionerId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
