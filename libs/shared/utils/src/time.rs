use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;
use tracing::warn;

use shared_models::clinic::Clinic;

pub const DEFAULT_TIMEZONE: &str = "Australia/Sydney";

#[derive(Error, Debug, PartialEq)]
pub enum TimeError {
    #[error("malformed time value: {0}")]
    Malformed(String),

    #[error("time does not exist in the target timezone")]
    InvalidTime,
}

/// Parse an IANA timezone name, falling back to the configured default.
pub fn parse_timezone(name: &str) -> Option<Tz> {
    name.trim().parse::<Tz>().ok()
}

/// Timezone for a clinic, with a warn-and-default fallback. Immutable for the
/// duration of a call.
pub fn get_clinic_timezone(clinic: &Clinic, default_timezone: &str) -> Tz {
    if let Some(name) = clinic.timezone.as_deref() {
        if let Some(tz) = parse_timezone(name) {
            return tz;
        }
        warn!(
            clinic_id = %clinic.clinic_id,
            timezone = name,
            "clinic has invalid timezone, falling back to default"
        );
    } else {
        warn!(clinic_id = %clinic.clinic_id, "clinic has no timezone, falling back to default");
    }
    parse_timezone(default_timezone).unwrap_or(chrono_tz::Australia::Sydney)
}

/// Interpret a raw timestamp string as UTC. Aware instants are converted;
/// naive instants are assumed to be in `default_tz`.
pub fn ensure_utc(raw: &str, default_tz: Tz) -> Result<DateTime<Utc>, TimeError> {
    if let Ok(aware) = DateTime::parse_from_rfc3339(raw) {
        return Ok(aware.with_timezone(&Utc));
    }
    let naive = parse_naive(raw)?;
    warn!("converting naive timestamp {} to UTC (assuming {})", raw, default_tz);
    local_to_utc(naive, default_tz)
}

/// Parse a timestamp from the PMS into UTC. Accepts the `Z` suffix or a
/// numeric offset; naive values are treated as already-UTC.
pub fn parse_pms_time(raw: &str) -> Result<DateTime<Utc>, TimeError> {
    if raw.is_empty() {
        return Err(TimeError::Malformed("empty time string".to_string()));
    }
    if let Ok(aware) = DateTime::parse_from_rfc3339(raw) {
        return Ok(aware.with_timezone(&Utc));
    }
    let naive = parse_naive(raw)?;
    warn!("PMS returned naive timestamp: {}", raw);
    Ok(naive.and_utc())
}

fn parse_naive(raw: &str) -> Result<NaiveDateTime, TimeError> {
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|_| TimeError::Malformed(raw.to_string()))
}

/// Convert a clinic-local civil datetime to UTC. Ambiguous times (DST fold)
/// resolve to the earlier offset.
pub fn local_to_utc(local: NaiveDateTime, tz: Tz) -> Result<DateTime<Utc>, TimeError> {
    tz.from_local_datetime(&local)
        .earliest()
        .map(|aware| aware.with_timezone(&Utc))
        .ok_or(TimeError::InvalidTime)
}

pub fn utc_to_local(utc: DateTime<Utc>, tz: Tz) -> DateTime<Tz> {
    utc.with_timezone(&tz)
}

/// Build a UTC instant from clinic-local civil components. DST-gap times fail;
/// DST-fold times resolve to the earlier offset.
pub fn combine_date_time_local(
    date: NaiveDate,
    hour: u32,
    minute: u32,
    tz: Tz,
) -> Result<DateTime<Utc>, TimeError> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| TimeError::Malformed(format!("{}:{}", hour, minute)))?;
    local_to_utc(date.and_time(time), tz)
}

/// `h:mm AM/PM` without a leading zero, in the clinic's local time.
pub fn format_for_voice(utc: DateTime<Utc>, tz: Tz) -> String {
    let formatted = utc_to_local(utc, tz).format("%I:%M %p").to_string();
    formatted.trim_start_matches('0').to_string()
}

/// Day-of-week phrasing for TTS, e.g. "Wednesday, July 16".
pub fn format_date_for_voice(utc: DateTime<Utc>, tz: Tz) -> String {
    let local = utc_to_local(utc, tz);
    let formatted = local.format("%A, %B %d").to_string();
    // Strip the day-number padding ("July 05" reads badly over voice).
    match formatted.rsplit_once(' ') {
        Some((head, day)) => format!("{} {}", head, day.trim_start_matches('0')),
        None => formatted,
    }
}
