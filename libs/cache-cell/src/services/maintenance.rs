use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Method;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use pms_client::PmsClient;
use shared_database::{catalog, CoreContext};
use shared_models::clinic::Clinic;
use shared_models::ids::{BusinessId, PractitionerId};
use shared_utils::time::{get_clinic_timezone, parse_pms_time, utc_to_local};

use crate::services::availability::AvailabilityCache;

/// Background cache maintenance: periodically refreshes recently queried
/// availability for active clinics and deletes dead entries. Spawned once
/// from the API binary.
pub async fn run_maintenance_loop(ctx: CoreContext) {
    let interval = Duration::from_secs(ctx.config.cache_refresh_interval_secs);
    info!("cache maintenance loop started (interval {:?})", interval);
    loop {
        if let Err(e) = maintenance_tick(&ctx).await {
            error!("cache maintenance tick failed: {}", e);
        }
        tokio::time::sleep(interval).await;
    }
}

async fn maintenance_tick(ctx: &CoreContext) -> anyhow::Result<()> {
    cleanup_expired(ctx).await;

    let clinics = catalog::get_all_clinics(&ctx.store).await?;
    for clinic in clinics {
        if let Err(e) = sync_clinic(ctx, &clinic).await {
            warn!("incremental sync failed for clinic {}: {}", clinic.clinic_id, e);
        }
    }
    Ok(())
}

/// Delete stale entries older than 24 h, expired entries older than 1 h, and
/// expired session/suppression rows.
async fn cleanup_expired(ctx: &CoreContext) {
    let now = ctx.now();
    let stale_cutoff = (now - ChronoDuration::hours(24)).to_rfc3339();
    let expired_cutoff = (now - ChronoDuration::hours(1)).to_rfc3339();
    let now_str = now.to_rfc3339();

    let deletions = [
        format!(
            "/rest/v1/availability_cache?is_stale=eq.true&cached_at=lt.{}",
            urlencoding::encode(&stale_cutoff)
        ),
        format!(
            "/rest/v1/availability_cache?expires_at=lt.{}",
            urlencoding::encode(&expired_cutoff)
        ),
        format!(
            "/rest/v1/session_rejected_slots?expires_at=lt.{}",
            urlencoding::encode(&now_str)
        ),
        format!(
            "/rest/v1/failed_booking_attempts?expires_at=lt.{}",
            urlencoding::encode(&now_str)
        ),
        format!(
            "/rest/v1/booking_locks?expires_at=lt.{}",
            urlencoding::encode(&now_str)
        ),
        format!(
            "/rest/v1/service_match_cache?expires_at=lt.{}&usage_count=lt.3",
            urlencoding::encode(&now_str)
        ),
    ];

    for path in deletions {
        let result: Result<Vec<Value>, _> = ctx.store.request(Method::DELETE, &path, None).await;
        if let Err(e) = result {
            warn!("cache cleanup delete failed: {}", e);
        }
    }
}

/// Pull appointments changed in the PMS since the last cache write and bring
/// the affected availability entries up to date.
async fn sync_clinic(ctx: &CoreContext, clinic: &Clinic) -> anyhow::Result<()> {
    let cache = AvailabilityCache::new(ctx.store.clone(), ctx.clock.clone());

    let since = match cache.last_cached_at(clinic.clinic_id).await {
        // Small overlap so nothing is missed between ticks.
        Some(last) => last - ChronoDuration::minutes(5),
        None => ctx.now() - ChronoDuration::days(7),
    };
    let since_str = since.format("%Y-%m-%dT%H:%M:%SZ").to_string();

    let pms = ctx.pms_for(clinic).await;
    let updated = pms.get_updated_appointments(&since_str).await?;
    if updated.is_empty() {
        return Ok(());
    }
    info!(
        "clinic {}: {} appointments changed since {}",
        clinic.clinic_id,
        updated.len(),
        since_str
    );

    for appointment in &updated {
        if let Err(e) = process_appointment_update(ctx, clinic, &pms, &cache, appointment).await {
            warn!("error processing appointment update: {}", e);
        }
    }
    Ok(())
}

fn id_from_link(appointment: &Value, relation: &str) -> Option<String> {
    appointment
        .get(relation)?
        .get("links")?
        .get("self")?
        .as_str()?
        .rsplit('/')
        .next()
        .map(str::to_string)
}

async fn process_appointment_update(
    ctx: &CoreContext,
    clinic: &Clinic,
    pms: &PmsClient,
    cache: &AvailabilityCache,
    appointment: &Value,
) -> anyhow::Result<()> {
    let practitioner_id = match id_from_link(appointment, "practitioner") {
        Some(id) => PractitionerId::new(id),
        None => {
            debug!("appointment update missing practitioner link, skipping");
            return Ok(());
        }
    };
    let business_id = match id_from_link(appointment, "business") {
        Some(id) => BusinessId::new(id),
        None => {
            debug!("appointment update missing business link, skipping");
            return Ok(());
        }
    };
    let starts_at: DateTime<Utc> = match appointment
        .get("appointment_start")
        .and_then(Value::as_str)
        .and_then(|raw| parse_pms_time(raw).ok())
    {
        Some(instant) => instant,
        None => return Ok(()),
    };
    // Cache keys use the clinic-local civil date.
    let tz = get_clinic_timezone(clinic, &ctx.config.default_timezone);
    let date = utc_to_local(starts_at, tz).date_naive();

    let removed = appointment.get("cancelled_at").map(|v| !v.is_null()).unwrap_or(false)
        || appointment.get("deleted_at").map(|v| !v.is_null()).unwrap_or(false);

    if removed {
        cache.invalidate_key(&practitioner_id, &business_id, date).await;
        return Ok(());
    }

    // Refresh the day that gained an appointment.
    let services = catalog::get_practitioner_services(&ctx.store, &practitioner_id).await?;
    let Some(service) = services.first() else {
        debug!("no appointment types for practitioner {}, skipping refresh", practitioner_id);
        return Ok(());
    };

    let slots = pms
        .get_available_times(
            business_id.as_str(),
            practitioner_id.as_str(),
            service.service_id.as_str(),
            date,
            date,
        )
        .await?;

    let mut starts = Vec::new();
    for slot in &slots {
        if let Ok(instant) = parse_pms_time(&slot.appointment_start) {
            starts.push(instant);
        }
    }
    cache
        .set(clinic.clinic_id, &practitioner_id, &business_id, date, starts)
        .await;

    Ok(())
}
