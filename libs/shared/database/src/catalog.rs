use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::clinic::{
    Appointment, AppointmentStatus, Business, Clinic, Patient, Practitioner,
    PractitionerSchedule, Service,
};
use shared_models::ids::{AppointmentId, BusinessId, ClinicId, PractitionerId};

use crate::store::StoreClient;

pub async fn get_all_clinics(store: &StoreClient) -> Result<Vec<Clinic>> {
    let rows: Vec<Clinic> = store.request(Method::GET, "/rest/v1/clinics", None).await?;
    Ok(rows)
}

/// Look up the clinic tenant for an inbound call by the number that was dialed.
pub async fn get_clinic_by_dialed_number(
    store: &StoreClient,
    dialed_number: &str,
) -> Result<Option<Clinic>> {
    let path = format!(
        "/rest/v1/clinics?dialed_number=eq.{}&limit=1",
        urlencoding::encode(dialed_number)
    );
    let rows: Vec<Clinic> = store.request(Method::GET, &path, None).await?;
    Ok(rows.into_iter().next())
}

fn parse_business_row(row: &Value) -> Result<Business> {
    let aliases = row
        .get("location_aliases")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("alias").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let clinic_id = row
        .get("clinic_id")
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| anyhow!("business row missing clinic_id"))?;

    Ok(Business {
        business_id: BusinessId::new(
            row.get("business_id")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow!("business row missing business_id"))?,
        ),
        clinic_id: ClinicId(clinic_id),
        business_name: row
            .get("business_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        is_primary: row.get("is_primary").and_then(Value::as_bool).unwrap_or(false),
        aliases,
    })
}

/// All locations for a clinic with their aliases, primary first.
pub async fn get_locations(store: &StoreClient, clinic_id: ClinicId) -> Result<Vec<Business>> {
    let path = format!(
        "/rest/v1/businesses?clinic_id=eq.{}&select=business_id,clinic_id,business_name,is_primary,location_aliases(alias)&order=is_primary.desc,business_name.asc",
        clinic_id
    );
    let rows: Vec<Value> = store.request(Method::GET, &path, None).await?;
    rows.iter().map(parse_business_row).collect()
}

pub async fn get_business(
    store: &StoreClient,
    clinic_id: ClinicId,
    business_id: &BusinessId,
) -> Result<Option<Business>> {
    let path = format!(
        "/rest/v1/businesses?clinic_id=eq.{}&business_id=eq.{}&select=business_id,clinic_id,business_name,is_primary,location_aliases(alias)&limit=1",
        clinic_id, business_id
    );
    let rows: Vec<Value> = store.request(Method::GET, &path, None).await?;
    rows.first().map(parse_business_row).transpose()
}

pub async fn get_practitioners(
    store: &StoreClient,
    clinic_id: ClinicId,
) -> Result<Vec<Practitioner>> {
    let path = format!(
        "/rest/v1/practitioners?clinic_id=eq.{}&active=eq.true&order=last_name.asc",
        clinic_id
    );
    let rows: Vec<Practitioner> = store.request(Method::GET, &path, None).await?;
    Ok(rows)
}

/// Practitioners assigned to a location.
pub async fn get_business_practitioners(
    store: &StoreClient,
    business_id: &BusinessId,
) -> Result<Vec<Practitioner>> {
    let path = format!(
        "/rest/v1/practitioner_businesses?business_id=eq.{}&select=practitioners(*)",
        business_id
    );
    let rows: Vec<Value> = store.request(Method::GET, &path, None).await?;
    let mut practitioners = Vec::new();
    for row in rows {
        if let Some(embedded) = row.get("practitioners") {
            let practitioner: Practitioner = serde_json::from_value(embedded.clone())?;
            if practitioner.active {
                practitioners.push(practitioner);
            }
        }
    }
    Ok(practitioners)
}

/// Location ids where a practitioner works.
pub async fn get_practitioner_businesses(
    store: &StoreClient,
    practitioner_id: &PractitionerId,
) -> Result<Vec<BusinessId>> {
    let path = format!(
        "/rest/v1/practitioner_businesses?practitioner_id=eq.{}&select=business_id",
        practitioner_id
    );
    let rows: Vec<Value> = store.request(Method::GET, &path, None).await?;
    Ok(rows
        .iter()
        .filter_map(|row| row.get("business_id").and_then(Value::as_str))
        .map(BusinessId::new)
        .collect())
}

/// Services a practitioner offers.
pub async fn get_practitioner_services(
    store: &StoreClient,
    practitioner_id: &PractitionerId,
) -> Result<Vec<Service>> {
    let path = format!(
        "/rest/v1/practitioner_appointment_types?practitioner_id=eq.{}&select=appointment_types(*)",
        practitioner_id
    );
    let rows: Vec<Value> = store.request(Method::GET, &path, None).await?;
    let mut services = Vec::new();
    for row in rows {
        if let Some(embedded) = row.get("appointment_types") {
            let service: Service = serde_json::from_value(embedded.clone())?;
            if service.active {
                services.push(service);
            }
        }
    }
    Ok(services)
}

pub async fn get_clinic_services(store: &StoreClient, clinic_id: ClinicId) -> Result<Vec<Service>> {
    let path = format!(
        "/rest/v1/appointment_types?clinic_id=eq.{}&active=eq.true&order=name.asc",
        clinic_id
    );
    let rows: Vec<Service> = store.request(Method::GET, &path, None).await?;
    Ok(rows)
}

/// Locally stored working hours for a practitioner across all locations.
pub async fn get_practitioner_schedules(
    store: &StoreClient,
    practitioner_id: &PractitionerId,
) -> Result<Vec<PractitionerSchedule>> {
    let path = format!(
        "/rest/v1/practitioner_schedules?practitioner_id=eq.{}",
        practitioner_id
    );
    let rows: Vec<PractitionerSchedule> = store.request(Method::GET, &path, None).await?;
    Ok(rows)
}

// === Patients ===

pub async fn find_patient_by_phone(
    store: &StoreClient,
    clinic_id: ClinicId,
    phone_normalized: &str,
) -> Result<Option<Patient>> {
    let path = format!(
        "/rest/v1/patients?clinic_id=eq.{}&phone_normalized=eq.{}&limit=1",
        clinic_id,
        urlencoding::encode(phone_normalized)
    );
    let rows: Vec<Patient> = store.request(Method::GET, &path, None).await?;
    Ok(rows.into_iter().next())
}

pub async fn save_patient(store: &StoreClient, patient: &Patient) -> Result<()> {
    store
        .upsert(
            "patients",
            "clinic_id,phone_normalized",
            serde_json::to_value(patient)?,
        )
        .await?;
    Ok(())
}

// === Appointments ===

pub async fn save_appointment(store: &StoreClient, appointment: &Appointment) -> Result<()> {
    store
        .insert("appointments", serde_json::to_value(appointment)?)
        .await?;
    Ok(())
}

pub async fn update_appointment_status(
    store: &StoreClient,
    appointment_id: &AppointmentId,
    status: AppointmentStatus,
) -> Result<()> {
    let path = format!("/rest/v1/appointments?appointment_id=eq.{}", appointment_id);
    let _: Vec<Value> = store
        .request(
            Method::PATCH,
            &path,
            Some(json!({ "status": status.to_string() })),
        )
        .await?;
    Ok(())
}

pub async fn find_appointment_by_id(
    store: &StoreClient,
    clinic_id: ClinicId,
    appointment_id: &AppointmentId,
) -> Result<Option<Appointment>> {
    let path = format!(
        "/rest/v1/appointments?clinic_id=eq.{}&appointment_id=eq.{}&limit=1",
        clinic_id, appointment_id
    );
    let rows: Vec<Appointment> = store.request(Method::GET, &path, None).await?;
    Ok(rows.into_iter().next())
}

/// The booked appointment occupying (practitioner, start), if any. Feeds the
/// duplicate-booking check in the coordinator.
pub async fn find_appointment_at(
    store: &StoreClient,
    clinic_id: ClinicId,
    practitioner_id: &PractitionerId,
    starts_at: DateTime<Utc>,
) -> Result<Option<Appointment>> {
    let date_str = starts_at.to_rfc3339();
    let path = format!(
        "/rest/v1/appointments?clinic_id=eq.{}&practitioner_id=eq.{}&starts_at=eq.{}&status=eq.booked&limit=1",
        clinic_id,
        practitioner_id,
        urlencoding::encode(&date_str)
    );
    let rows: Vec<Appointment> = store.request(Method::GET, &path, None).await?;
    Ok(rows.into_iter().next())
}

/// Near-term booked appointments for a caller, soonest first. Used to
/// disambiguate cancellations when no appointment id was given.
pub async fn find_upcoming_appointments_by_phone(
    store: &StoreClient,
    clinic_id: ClinicId,
    phone_normalized: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Appointment>> {
    let date_str = now.to_rfc3339();
    let from = urlencoding::encode(&date_str);
    let path = format!(
        "/rest/v1/appointments?clinic_id=eq.{}&status=eq.booked&starts_at=gte.{}&select=*,patients!inner(phone_normalized)&patients.phone_normalized=eq.{}&order=starts_at.asc",
        clinic_id,
        from,
        urlencoding::encode(phone_normalized)
    );
    let rows: Vec<Appointment> = store.request(Method::GET, &path, None).await?;
    Ok(rows)
}

/// Appointment history grouped by location for a returning caller; feeds the
/// preferred-location boost in the resolver.
pub async fn most_visited_business(
    store: &StoreClient,
    clinic_id: ClinicId,
    phone_normalized: &str,
) -> Result<Option<(BusinessId, String)>> {
    let path = format!(
        "/rest/v1/appointments?clinic_id=eq.{}&status=in.(booked,completed)&select=business_id,businesses(business_name),patients!inner(phone_normalized)&patients.phone_normalized=eq.{}",
        clinic_id,
        urlencoding::encode(phone_normalized)
    );
    let rows: Vec<Value> = store.request(Method::GET, &path, None).await?;

    let mut counts: std::collections::HashMap<String, (usize, String)> =
        std::collections::HashMap::new();
    for row in &rows {
        if let Some(business_id) = row.get("business_id").and_then(Value::as_str) {
            let name = row
                .get("businesses")
                .and_then(|b| b.get("business_name"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let entry = counts.entry(business_id.to_string()).or_insert((0, name));
            entry.0 += 1;
        }
    }

    Ok(counts
        .into_iter()
        .max_by_key(|(_, (count, _))| *count)
        .map(|(id, (_, name))| (BusinessId::new(id), name)))
}

// === Voice booking log ===

/// Append a voice-booking log row. Failures are logged and swallowed; the log
/// must never fail a booking that the PMS accepted.
pub async fn log_voice_booking(store: &StoreClient, row: Value) {
    if let Err(e) = store.insert("voice_bookings", row).await {
        tracing::error!("failed to write voice booking log: {}", e);
    }
}
