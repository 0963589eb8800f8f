use tracing::info;

use cache_cell::{CachedPatient, PatientCache};
use pms_client::models::{NewPmsPatient, NewPmsPhoneNumber};
use pms_client::PmsClient;
use shared_database::{catalog, CoreContext};
use shared_models::clinic::Clinic;
use shared_utils::phone::{mask_phone, normalize_phone};

use crate::models::BookingError;

/// Resolve the patient for a booking: patient cache, then local store, then
/// PMS search by phone, then PMS create. Every hit back-fills the cache so
/// the next call is one read.
pub async fn find_or_create_patient(
    ctx: &CoreContext,
    clinic: &Clinic,
    pms: &PmsClient,
    phone: &str,
    first_name: &str,
    last_name: &str,
) -> Result<CachedPatient, BookingError> {
    let phone_normalized = normalize_phone(phone);
    let cache = PatientCache::new(ctx.store.clone(), ctx.clock.clone());

    if let Some(cached) = cache.get(&phone_normalized, clinic.clinic_id).await {
        return Ok(cached);
    }

    if let Ok(Some(patient)) =
        catalog::find_patient_by_phone(&ctx.store, clinic.clinic_id, &phone_normalized).await
    {
        let cached = CachedPatient {
            patient_id: patient.patient_id.to_string(),
            first_name: patient.first_name,
            last_name: patient.last_name,
            phone_normalized: phone_normalized.clone(),
            email: patient.email,
        };
        cache.set(&phone_normalized, clinic.clinic_id, &cached).await;
        return Ok(cached);
    }

    // Patient lookup reads are safe to retry; creation is not.
    match pms.find_patient(phone).await {
        Ok(Some(remote)) => {
            info!("found existing PMS patient for {}", mask_phone(&phone_normalized));
            let cached = CachedPatient {
                patient_id: remote.id,
                first_name: remote.first_name,
                last_name: remote.last_name,
                phone_normalized: phone_normalized.clone(),
                email: remote.email,
            };
            cache.set(&phone_normalized, clinic.clinic_id, &cached).await;
            return Ok(cached);
        }
        Ok(None) => {}
        Err(e) => return Err(BookingError::Upstream(e.to_string())),
    }

    let new_patient = NewPmsPatient {
        first_name: first_name.to_string(),
        last_name: last_name.to_string(),
        phone_numbers: vec![NewPmsPhoneNumber {
            number: phone.to_string(),
            phone_type: "Mobile".to_string(),
        }],
        email: None,
    };

    let created = pms
        .create_patient(&new_patient)
        .await
        .map_err(|e| BookingError::Upstream(e.to_string()))?;
    info!("created PMS patient {} for {}", created.id, mask_phone(&phone_normalized));

    let cached = CachedPatient {
        patient_id: created.id,
        first_name: created.first_name,
        last_name: created.last_name,
        phone_normalized: phone_normalized.clone(),
        email: created.email,
    };
    cache.set(&phone_normalized, clinic.clinic_id, &cached).await;
    Ok(cached)
}
