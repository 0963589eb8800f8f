use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{
    AppointmentId, BusinessId, ClinicId, PatientId, PractitionerId, ServiceId,
};

/// A clinic tenant: one dialed number, one PMS credential set, one timezone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clinic {
    pub clinic_id: ClinicId,
    pub clinic_name: String,
    pub dialed_number: String,
    pub pms_api_key: String,
    pub pms_shard: String,
    pub contact_email: String,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Business {
    pub business_id: BusinessId,
    pub clinic_id: ClinicId,
    pub business_name: String,
    pub is_primary: bool,
    #[serde(default)]
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Practitioner {
    pub practitioner_id: PractitionerId,
    pub clinic_id: ClinicId,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub title: Option<String>,
    pub active: bool,
}

impl Practitioner {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub service_id: ServiceId,
    pub clinic_id: ClinicId,
    pub name: String,
    pub duration_minutes: i32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

/// Locally stored working hours. The PMS does not expose these; they drive
/// schedule-aware pruning in the availability engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PractitionerSchedule {
    pub practitioner_id: PractitionerId,
    pub business_id: BusinessId,
    /// 0 = Monday .. 6 = Sunday.
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    #[serde(default)]
    pub effective_from: Option<NaiveDate>,
    #[serde(default)]
    pub effective_to: Option<NaiveDate>,
}

impl PractitionerSchedule {
    /// Whether this schedule row covers the given civil date.
    pub fn covers(&self, date: NaiveDate, weekday_index: u8) -> bool {
        if self.day_of_week != weekday_index {
            return false;
        }
        if let Some(from) = self.effective_from {
            if date < from {
                return false;
            }
        }
        if let Some(to) = self.effective_to {
            if date > to {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Patient {
    pub patient_id: PatientId,
    pub clinic_id: ClinicId,
    pub first_name: String,
    pub last_name: String,
    pub phone_normalized: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Booked,
    Confirmed,
    Cancelled,
    Completed,
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppointmentStatus::Booked => write!(f, "booked"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Completed => write!(f, "completed"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub appointment_id: AppointmentId,
    pub clinic_id: ClinicId,
    pub patient_id: PatientId,
    pub practitioner_id: PractitionerId,
    pub service_id: ServiceId,
    pub business_id: BusinessId,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: AppointmentStatus,
}
