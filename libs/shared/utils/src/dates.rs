use chrono::{Datelike, Duration, NaiveDate, Weekday};
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum DateParseError {
    #[error("unrecognized date: {0}")]
    Unrecognized(String),
}

/// Parse a spoken date request against a fixed grammar:
/// - literal `YYYY-MM-DD`
/// - `today`, `tomorrow`
/// - a weekday name, resolving to the next occurrence strictly in the future
/// - `next <weekday>`, resolving to the occurrence at least 7 days away
///
/// Anything else is rejected; callers surface `invalid_date`.
pub fn parse_date_request(raw: &str, today: NaiveDate) -> Result<NaiveDate, DateParseError> {
    let normalized = raw.trim().to_lowercase();

    if let Ok(date) = NaiveDate::parse_from_str(&normalized, "%Y-%m-%d") {
        return Ok(date);
    }

    match normalized.as_str() {
        "today" => return Ok(today),
        "tomorrow" => return Ok(today + Duration::days(1)),
        _ => {}
    }

    if let Some(rest) = normalized.strip_prefix("next ") {
        if let Some(weekday) = parse_weekday(rest.trim()) {
            let ahead = days_until(today, weekday);
            let ahead = if ahead == 0 { 7 } else { ahead };
            let ahead = if ahead < 7 { ahead + 7 } else { ahead };
            return Ok(today + Duration::days(ahead));
        }
    }

    if let Some(weekday) = parse_weekday(&normalized) {
        let ahead = days_until(today, weekday);
        let ahead = if ahead == 0 { 7 } else { ahead };
        return Ok(today + Duration::days(ahead));
    }

    Err(DateParseError::Unrecognized(raw.to_string()))
}

fn parse_weekday(name: &str) -> Option<Weekday> {
    match name {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

fn days_until(today: NaiveDate, target: Weekday) -> i64 {
    let current = today.weekday().num_days_from_monday() as i64;
    let wanted = target.num_days_from_monday() as i64;
    (wanted - current).rem_euclid(7)
}

/// Parse a spoken or typed time like "10:30am", "2pm", "14:00" into
/// (hour, minute). Returns None when no time can be extracted.
pub fn parse_time_request(raw: &str) -> Option<(u32, u32)> {
    let normalized = raw.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }

    let (body, meridiem) = if let Some(stripped) = normalized.strip_suffix("pm") {
        (stripped.trim().to_string(), Some("pm"))
    } else if let Some(stripped) = normalized.strip_suffix("am") {
        (stripped.trim().to_string(), Some("am"))
    } else {
        (normalized.clone(), None)
    };

    let (hour_raw, minute_raw) = match body.split_once(':') {
        Some((h, m)) => (h.trim().to_string(), m.trim().to_string()),
        None => (body.trim().to_string(), "0".to_string()),
    };

    let mut hour: u32 = hour_raw.parse().ok()?;
    let minute: u32 = minute_raw.parse().ok()?;
    if minute > 59 {
        return None;
    }

    match meridiem {
        Some("pm") if hour < 12 => hour += 12,
        Some("am") if hour == 12 => hour = 0,
        _ => {}
    }

    if hour > 23 {
        return None;
    }
    Some((hour, minute))
}
