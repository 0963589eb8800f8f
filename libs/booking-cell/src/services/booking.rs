use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::{error, info, warn};

use availability_cell::models::SearchCriteria;
use availability_cell::services::engine::fetch_span;
use cache_cell::{
    AvailabilityCache, BookingContext, BookingContextCache, PreferredLocation, SessionState,
};
use pms_client::models::NewPmsAppointment;
use pms_client::{PmsClient, PmsError};
use practitioner_cell::services::practitioners::{
    resolve_practitioner, PractitionerResolveError,
};
use serde_json::json;
use shared_database::{catalog, CoreContext};
use shared_models::clinic::{Appointment, AppointmentStatus, Clinic, Service};
use shared_models::ids::{
    AppointmentId, BusinessId, ClinicId, PatientId, PractitionerId, ServiceId, SessionId,
};
use shared_utils::dates::{parse_date_request, parse_time_request};
use shared_utils::phone::{is_valid_au_mobile, mask_phone, normalize_phone};
use shared_utils::text::normalize_for_matching;
use shared_utils::time::{combine_date_time_local, get_clinic_timezone, utc_to_local};

use crate::models::{BookingError, BookingRequest};
use crate::services::locks::{BookingLockService, LockAttempt};
use crate::services::patients::find_or_create_patient;

/// A confirmed booking, ready for the response envelope.
#[derive(Debug, Clone)]
pub struct BookingSuccess {
    pub appointment_id: AppointmentId,
    pub confirmation_number: String,
    pub practitioner_id: PractitionerId,
    pub practitioner_name: String,
    pub service_id: ServiceId,
    pub service_name: String,
    pub business_id: BusinessId,
    pub business_name: String,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub patient_name: String,
}

#[derive(Debug, Clone)]
pub struct CancelSuccess {
    pub appointment: Appointment,
    /// True when the appointment was already cancelled and this call was a
    /// no-op.
    pub already_cancelled: bool,
}

/// Everything validated and resolved, before any lock or PMS write.
struct PreparedBooking {
    phone: String,
    first_name: String,
    last_name: String,
    criteria: SearchCriteria,
    starts_at: DateTime<Utc>,
    ends_at: DateTime<Utc>,
    local_date: NaiveDate,
}

/// Coordinates create, cancel and reschedule against the PMS with the booking
/// lock, authoritative precheck and cache invalidation the protocol requires.
pub struct BookingCoordinator {
    ctx: CoreContext,
}

impl BookingCoordinator {
    pub fn new(ctx: CoreContext) -> Self {
        Self { ctx }
    }

    // === Create ===

    pub async fn book(
        &self,
        clinic: &Clinic,
        request: &BookingRequest,
    ) -> Result<BookingSuccess, BookingError> {
        let prepared = self.prepare(clinic, request).await?;
        let session_id = SessionId::new(request.session_id.clone());
        let pms = self.ctx.pms_for(clinic).await;

        let patient = find_or_create_patient(
            &self.ctx,
            clinic,
            &pms,
            &prepared.phone,
            &prepared.first_name,
            &prepared.last_name,
        )
        .await?;

        // Local conflict check before touching the PMS: the same caller
        // re-booking is a duplicate, anyone else means the slot is gone.
        match catalog::find_appointment_at(
            &self.ctx.store,
            clinic.clinic_id,
            &prepared.criteria.practitioner_id,
            prepared.starts_at,
        )
        .await
        {
            Ok(Some(existing)) => {
                if existing.patient_id.as_str() == patient.patient_id {
                    return Err(BookingError::DuplicateBooking);
                }
                return Err(BookingError::SlotTaken);
            }
            Ok(None) => {}
            Err(e) => return Err(BookingError::Database(e.to_string())),
        }

        let locks = BookingLockService::new(self.ctx.clone());
        match locks
            .acquire(&prepared.criteria.practitioner_id, prepared.starts_at, &session_id)
            .await
        {
            Ok(LockAttempt::Acquired) => {}
            Ok(LockAttempt::HeldElsewhere) => return Err(BookingError::SlotTaken),
            Err(e) => return Err(BookingError::Database(e.to_string())),
        }

        let outcome = self
            .finalize_booking(clinic, &pms, &prepared, &patient.patient_id, &session_id)
            .await;

        // The lock is released on every exit path; expiry mops up crashes.
        locks
            .release(&prepared.criteria.practitioner_id, prepared.starts_at, &session_id)
            .await;

        let patient_name = format!("{} {}", prepared.first_name, prepared.last_name)
            .trim()
            .to_string();
        outcome.map(|appointment_id| {
            let confirmation_number = confirmation_number(&appointment_id);
            BookingSuccess {
                appointment_id,
                confirmation_number,
                practitioner_id: prepared.criteria.practitioner_id.clone(),
                practitioner_name: prepared.criteria.practitioner_name.clone(),
                service_id: prepared.criteria.service_id.clone(),
                service_name: prepared.criteria.service_name.clone(),
                business_id: prepared.criteria.business_id.clone(),
                business_name: prepared.criteria.business_name.clone(),
                starts_at: prepared.starts_at,
                ends_at: prepared.ends_at,
                patient_name,
            }
        })
    }

    /// Validate the payload and resolve every entity it names.
    async fn prepare(
        &self,
        clinic: &Clinic,
        request: &BookingRequest,
    ) -> Result<PreparedBooking, BookingError> {
        let phone = request
            .booking_phone()
            .ok_or_else(|| BookingError::MissingInformation("phone number".to_string()))?
            .to_string();
        if !is_valid_au_mobile(&phone) {
            return Err(BookingError::InvalidPhoneNumber);
        }

        let (first_name, last_name) = request
            .patient_name_parts()
            .ok_or_else(|| BookingError::MissingInformation("name".to_string()))?;

        let practitioner_query = request
            .practitioner
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| BookingError::MissingInformation("practitioner".to_string()))?;
        let service_query = request
            .appointment_type
            .as_deref()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| BookingError::MissingInformation("appointment type".to_string()))?;

        let business_id = request
            .business_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .map(BusinessId::new)
            .ok_or(BookingError::LocationRequired)?;
        let business = catalog::get_business(&self.ctx.store, clinic.clinic_id, &business_id)
            .await
            .map_err(|e| BookingError::Database(e.to_string()))?
            .ok_or(BookingError::InvalidBusinessId)?;

        let tz = get_clinic_timezone(clinic, &self.ctx.config.default_timezone);
        let today = utc_to_local(self.ctx.now(), tz).date_naive();

        let date_raw = request
            .appointment_date
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .ok_or_else(|| BookingError::MissingInformation("date".to_string()))?;
        let local_date =
            parse_date_request(date_raw, today).map_err(|_| BookingError::InvalidDate)?;

        let time_raw = request
            .appointment_time
            .as_deref()
            .filter(|raw| !raw.trim().is_empty())
            .ok_or_else(|| BookingError::MissingInformation("time".to_string()))?;
        let (hour, minute) = parse_time_request(time_raw).ok_or(BookingError::InvalidTime)?;

        let starts_at = combine_date_time_local(local_date, hour, minute, tz)
            .map_err(|_| BookingError::InvalidTime)?;
        if starts_at <= self.ctx.now() {
            return Err(BookingError::InvalidTime);
        }

        let practitioner = resolve_practitioner(&self.ctx, clinic, practitioner_query)
            .await
            .map_err(|e| match e {
                PractitionerResolveError::NotFound(q) => BookingError::PractitionerNotFound(q),
                PractitionerResolveError::ClarificationNeeded(options) => {
                    BookingError::PractitionerClarification(options)
                }
                PractitionerResolveError::Lookup(e) => BookingError::Database(e.to_string()),
            })?;

        let assigned =
            catalog::get_practitioner_businesses(&self.ctx.store, &practitioner.practitioner_id)
                .await
                .map_err(|e| BookingError::Database(e.to_string()))?;
        if !assigned.contains(&business.business_id) {
            return Err(BookingError::PractitionerLocationMismatch);
        }

        let service =
            self.strict_service(&practitioner.practitioner_id, service_query).await?;
        let ends_at = starts_at + Duration::minutes(service.duration_minutes as i64);

        Ok(PreparedBooking {
            phone,
            first_name,
            last_name,
            criteria: SearchCriteria {
                practitioner_id: practitioner.practitioner_id.clone(),
                practitioner_name: practitioner.full_name(),
                business_id: business.business_id.clone(),
                business_name: business.business_name.clone(),
                service_id: service.service_id.clone(),
                service_name: service.name.clone(),
                duration_minutes: service.duration_minutes,
            },
            starts_at,
            ends_at,
            local_date,
        })
    }

    /// Service resolution for bookings is strict: exact case-folded name only.
    /// A fuzzy fallback here is how the wrong treatment gets booked.
    async fn strict_service(
        &self,
        practitioner_id: &PractitionerId,
        query: &str,
    ) -> Result<Service, BookingError> {
        let services = catalog::get_practitioner_services(&self.ctx.store, practitioner_id)
            .await
            .map_err(|e| BookingError::Database(e.to_string()))?;
        let wanted = normalize_for_matching(query);
        services
            .into_iter()
            .find(|service| normalize_for_matching(&service.name) == wanted)
            .ok_or_else(|| BookingError::ServiceNotFound(query.to_string()))
    }

    /// Under the lock: authoritative precheck, the one-shot PMS create, then
    /// local persistence and cache staleness as one logical unit.
    async fn finalize_booking(
        &self,
        clinic: &Clinic,
        pms: &PmsClient,
        prepared: &PreparedBooking,
        patient_id: &str,
        session_id: &SessionId,
    ) -> Result<AppointmentId, BookingError> {
        let criteria = &prepared.criteria;
        let cache = AvailabilityCache::new(self.ctx.store.clone(), self.ctx.clock.clone());
        let tz = get_clinic_timezone(clinic, &self.ctx.config.default_timezone);

        // Cache says the slot is offered, or the PMS gets the final word.
        let cached = cache
            .get(&criteria.practitioner_id, &criteria.business_id, prepared.local_date)
            .await;
        let offered_in_cache = cached
            .as_ref()
            .map(|slots| slots.contains(&prepared.starts_at))
            .unwrap_or(false);

        if !offered_in_cache {
            let per_day = fetch_span(
                pms,
                criteria,
                prepared.local_date,
                prepared.local_date,
                tz,
            )
            .await
            .map_err(map_pms_read_error)?;
            let fresh: Vec<DateTime<Utc>> = per_day
                .into_iter()
                .flat_map(|(_, starts)| starts)
                .collect();
            cache
                .set(
                    clinic.clinic_id,
                    &criteria.practitioner_id,
                    &criteria.business_id,
                    prepared.local_date,
                    fresh.clone(),
                )
                .await;
            if !fresh.contains(&prepared.starts_at) {
                info!(
                    "precheck: {} at {} is not offered for {}",
                    prepared.starts_at, criteria.business_name, criteria.practitioner_name
                );
                return Err(BookingError::TimeNotAvailable);
            }
        }

        // The PMS create is not idempotent; it runs exactly once.
        let new_appointment = NewPmsAppointment {
            starts_at: prepared.starts_at.to_rfc3339(),
            ends_at: prepared.ends_at.to_rfc3339(),
            patient_id: patient_id.to_string(),
            practitioner_id: criteria.practitioner_id.to_string(),
            appointment_type_id: criteria.service_id.to_string(),
            business_id: criteria.business_id.to_string(),
            notes: None,
        };

        match pms.create_appointment(&new_appointment).await {
            Ok(created) => {
                let appointment_id = AppointmentId::new(created.id);
                self.persist_booking(clinic, prepared, patient_id, &appointment_id, session_id)
                    .await;
                Ok(appointment_id)
            }
            Err(PmsError::SlotTaken) => {
                // Someone beat us between precheck and create. Make sure the
                // slot is not re-offered.
                let local = utc_to_local(prepared.starts_at, tz);
                let sessions = SessionState::new(self.ctx.store.clone(), self.ctx.clock.clone());
                sessions
                    .record_failed_attempt(
                        &criteria.practitioner_id,
                        &criteria.business_id,
                        prepared.local_date,
                        &local.format("%H:%M").to_string(),
                    )
                    .await;
                cache
                    .invalidate_key(
                        &criteria.practitioner_id,
                        &criteria.business_id,
                        prepared.local_date,
                    )
                    .await;
                self.log_booking(clinic.clinic_id, session_id, None, prepared, "failed", Some("slot_taken"))
                    .await;
                Err(BookingError::SlotTaken)
            }
            Err(PmsError::OutsideBusinessHours) => {
                self.log_booking(clinic.clinic_id, session_id, None, prepared, "failed", Some("outside_business_hours"))
                    .await;
                Err(BookingError::OutsideBusinessHours)
            }
            Err(PmsError::RateLimited) => Err(BookingError::RateLimited),
            Err(PmsError::Transient(e)) => Err(BookingError::Network(e)),
            Err(e) => Err(BookingError::Upstream(e.to_string())),
        }
    }

    /// Local persistence + cache staleness + booking log, one logical unit.
    /// The PMS accepted the booking, so failures here are logged loudly but
    /// never turn the caller's confirmed appointment into an error.
    async fn persist_booking(
        &self,
        clinic: &Clinic,
        prepared: &PreparedBooking,
        patient_id: &str,
        appointment_id: &AppointmentId,
        session_id: &SessionId,
    ) {
        let criteria = &prepared.criteria;
        let appointment = Appointment {
            appointment_id: appointment_id.clone(),
            clinic_id: clinic.clinic_id,
            patient_id: PatientId::new(patient_id),
            practitioner_id: criteria.practitioner_id.clone(),
            service_id: criteria.service_id.clone(),
            business_id: criteria.business_id.clone(),
            starts_at: prepared.starts_at,
            ends_at: prepared.ends_at,
            status: AppointmentStatus::Booked,
        };
        if let Err(e) = catalog::save_appointment(&self.ctx.store, &appointment).await {
            error!(
                "PMS booking {} succeeded but local persistence failed: {}",
                appointment_id, e
            );
        }

        let cache = AvailabilityCache::new(self.ctx.store.clone(), self.ctx.clock.clone());
        cache
            .invalidate_key(&criteria.practitioner_id, &criteria.business_id, prepared.local_date)
            .await;

        let sessions = SessionState::new(self.ctx.store.clone(), self.ctx.clock.clone());
        sessions.clear_session(session_id).await;

        self.remember_preferences(clinic, prepared).await;
        self.log_booking(
            clinic.clinic_id,
            session_id,
            Some(appointment_id),
            prepared,
            "completed",
            None,
        )
        .await;

        info!(
            "booked {} with {} at {} on {}",
            appointment_id, criteria.practitioner_name, criteria.business_name, prepared.starts_at
        );
    }

    /// Opportunistic booking-context update for the next call.
    async fn remember_preferences(&self, clinic: &Clinic, prepared: &PreparedBooking) {
        let phone_normalized = normalize_phone(&prepared.phone);
        if phone_normalized.is_empty() {
            return;
        }
        let contexts = BookingContextCache::new(self.ctx.store.clone(), self.ctx.clock.clone());
        let mut context = contexts.get(&phone_normalized).await.unwrap_or_else(BookingContext::default);
        context.preferred_location = Some(PreferredLocation {
            business_id: prepared.criteria.business_id.clone(),
            business_name: prepared.criteria.business_name.clone(),
        });
        context.last_practitioner = Some(prepared.criteria.practitioner_name.clone());
        context.last_service = Some(prepared.criteria.service_name.clone());
        contexts.set(&phone_normalized, clinic.clinic_id, &context).await;
    }

    async fn log_booking(
        &self,
        clinic_id: ClinicId,
        session_id: &SessionId,
        appointment_id: Option<&AppointmentId>,
        prepared: &PreparedBooking,
        status: &str,
        error_code: Option<&str>,
    ) {
        catalog::log_voice_booking(
            &self.ctx.store,
            json!({
                "clinic_id": clinic_id,
                "session_id": session_id,
                "appointment_id": appointment_id,
                "practitioner_id": prepared.criteria.practitioner_id,
                "business_id": prepared.criteria.business_id,
                "service_id": prepared.criteria.service_id,
                "caller_phone": mask_phone(&normalize_phone(&prepared.phone)),
                "starts_at": prepared.starts_at,
                "status": status,
                "error_code": error_code,
                "created_at": self.ctx.now(),
            }),
        )
        .await;
    }

    // === Cancel ===

    pub async fn cancel(
        &self,
        clinic: &Clinic,
        request: &BookingRequest,
    ) -> Result<CancelSuccess, BookingError> {
        let appointment = self.identify_appointment(clinic, request).await?;

        if appointment.status == AppointmentStatus::Cancelled {
            return Ok(CancelSuccess {
                appointment,
                already_cancelled: true,
            });
        }

        let pms = self.ctx.pms_for(clinic).await;
        pms.cancel_appointment(appointment.appointment_id.as_str())
            .await
            .map_err(|e| match e {
                PmsError::RateLimited => BookingError::RateLimited,
                PmsError::Transient(msg) => BookingError::Network(msg),
                other => BookingError::Upstream(other.to_string()),
            })?;

        if let Err(e) = catalog::update_appointment_status(
            &self.ctx.store,
            &appointment.appointment_id,
            AppointmentStatus::Cancelled,
        )
        .await
        {
            error!(
                "PMS cancel {} succeeded but local status update failed: {}",
                appointment.appointment_id, e
            );
        }

        let tz = get_clinic_timezone(clinic, &self.ctx.config.default_timezone);
        let local_date = utc_to_local(appointment.starts_at, tz).date_naive();
        let cache = AvailabilityCache::new(self.ctx.store.clone(), self.ctx.clock.clone());
        cache
            .invalidate_key(&appointment.practitioner_id, &appointment.business_id, local_date)
            .await;

        catalog::log_voice_booking(
            &self.ctx.store,
            json!({
                "clinic_id": clinic.clinic_id,
                "session_id": request.session_id,
                "appointment_id": appointment.appointment_id,
                "practitioner_id": appointment.practitioner_id,
                "business_id": appointment.business_id,
                "service_id": appointment.service_id,
                "starts_at": appointment.starts_at,
                "status": "cancelled",
                "created_at": self.ctx.now(),
            }),
        )
        .await;

        info!("cancelled appointment {}", appointment.appointment_id);
        Ok(CancelSuccess {
            appointment,
            already_cancelled: false,
        })
    }

    /// Find the appointment a caller is talking about: explicit id first,
    /// otherwise their near-term bookings disambiguated by whatever details
    /// they gave (practitioner, service, date or time words).
    async fn identify_appointment(
        &self,
        clinic: &Clinic,
        request: &BookingRequest,
    ) -> Result<Appointment, BookingError> {
        if let Some(id) = request
            .appointment_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
        {
            return catalog::find_appointment_by_id(
                &self.ctx.store,
                clinic.clinic_id,
                &AppointmentId::new(id),
            )
            .await
            .map_err(|e| BookingError::Database(e.to_string()))?
            .ok_or(BookingError::AppointmentNotFound);
        }

        let phone = request
            .booking_phone()
            .ok_or_else(|| BookingError::MissingInformation("phone number".to_string()))?;
        let phone_normalized = normalize_phone(phone);

        let upcoming = catalog::find_upcoming_appointments_by_phone(
            &self.ctx.store,
            clinic.clinic_id,
            &phone_normalized,
            self.ctx.now(),
        )
        .await
        .map_err(|e| BookingError::Database(e.to_string()))?;

        if upcoming.is_empty() {
            return Err(BookingError::AppointmentNotFound);
        }
        if upcoming.len() == 1 {
            return Ok(upcoming.into_iter().next().expect("len checked"));
        }

        let details = request
            .current_appointment_details
            .as_deref()
            .or(request.notes.as_deref())
            .map(normalize_for_matching)
            .unwrap_or_default();
        if details.is_empty() {
            // Soonest first; without details the next appointment is meant.
            return Ok(upcoming.into_iter().next().expect("non-empty"));
        }

        let practitioners = catalog::get_practitioners(&self.ctx.store, clinic.clinic_id)
            .await
            .unwrap_or_default();
        let services = catalog::get_clinic_services(&self.ctx.store, clinic.clinic_id)
            .await
            .unwrap_or_default();
        let tz = get_clinic_timezone(clinic, &self.ctx.config.default_timezone);

        let scored = upcoming.into_iter().max_by_key(|appointment| {
            let mut score = 0usize;
            if let Some(practitioner) = practitioners
                .iter()
                .find(|p| p.practitioner_id == appointment.practitioner_id)
            {
                let name = normalize_for_matching(&practitioner.full_name());
                if name.split(' ').any(|token| details.contains(token)) {
                    score += 2;
                }
            }
            if let Some(service) = services
                .iter()
                .find(|s| s.service_id == appointment.service_id)
            {
                if details.contains(&normalize_for_matching(&service.name)) {
                    score += 2;
                }
            }
            let local = utc_to_local(appointment.starts_at, tz);
            let weekday = normalize_for_matching(&local.format("%A").to_string());
            if details.contains(&weekday) {
                score += 1;
            }
            let hour = local.format("%-I").to_string();
            if details.split(' ').any(|token| token == hour) {
                score += 1;
            }
            score
        });

        scored.ok_or(BookingError::AppointmentNotFound)
    }

    // === Reschedule ===

    /// Create-new-then-cancel-old. If the new booking fails nothing changes;
    /// the old appointment is only cancelled once the new one exists.
    pub async fn reschedule(
        &self,
        clinic: &Clinic,
        request: &BookingRequest,
    ) -> Result<BookingSuccess, BookingError> {
        let existing = self.identify_appointment(clinic, request).await?;

        let practitioners = catalog::get_practitioners(&self.ctx.store, clinic.clinic_id)
            .await
            .map_err(|e| BookingError::Database(e.to_string()))?;
        let services = catalog::get_clinic_services(&self.ctx.store, clinic.clinic_id)
            .await
            .map_err(|e| BookingError::Database(e.to_string()))?;

        let old_practitioner_name = practitioners
            .iter()
            .find(|p| p.practitioner_id == existing.practitioner_id)
            .map(|p| p.full_name());
        let old_service_name = services
            .iter()
            .find(|s| s.service_id == existing.service_id)
            .map(|s| s.name.clone());

        let mut new_request = request.clone();
        new_request.practitioner = request
            .new_practitioner
            .clone()
            .or(request.practitioner.clone())
            .or(old_practitioner_name);
        new_request.appointment_type = request
            .new_appointment_type
            .clone()
            .or(request.appointment_type.clone())
            .or(old_service_name);
        new_request.appointment_date = request.new_date.clone().or(request.appointment_date.clone());
        new_request.appointment_time = request.new_time.clone().or(request.appointment_time.clone());
        if new_request.business_id.is_none() {
            new_request.business_id = Some(existing.business_id.to_string());
        }
        if new_request.patient_name.is_none() {
            if let Ok(Some(patient)) = catalog::find_patient_by_phone(
                &self.ctx.store,
                clinic.clinic_id,
                &normalize_phone(new_request.booking_phone().unwrap_or_default()),
            )
            .await
            {
                new_request.patient_name =
                    Some(format!("{} {}", patient.first_name, patient.last_name));
            }
        }

        let booked = self.book(clinic, &new_request).await?;

        // New slot secured; retire the old one.
        let mut cancel_request = request.clone();
        cancel_request.appointment_id = Some(existing.appointment_id.to_string());
        if let Err(e) = self.cancel(clinic, &cancel_request).await {
            warn!(
                "reschedule booked {} but cancelling {} failed: {}",
                booked.appointment_id, existing.appointment_id, e
            );
        }

        Ok(booked)
    }
}

fn map_pms_read_error(e: PmsError) -> BookingError {
    match e {
        PmsError::RateLimited => BookingError::RateLimited,
        PmsError::Transient(msg) => BookingError::Network(msg),
        other => BookingError::Upstream(other.to_string()),
    }
}

fn confirmation_number(appointment_id: &AppointmentId) -> String {
    let raw = appointment_id.as_str();
    let tail: String = raw
        .chars()
        .rev()
        .take(6)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("VB{}", tail.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirmation_numbers_use_the_id_tail() {
        assert_eq!(
            confirmation_number(&AppointmentId::new("1717010852512540252")),
            "VB540252"
        );
        assert_eq!(confirmation_number(&AppointmentId::new("42")), "VB42");
    }
}
