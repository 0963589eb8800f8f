use chrono::{NaiveDate, TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{method, path, path_regex, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use availability_cell::services::engine::AvailabilityEngine;
use shared_config::AppConfig;
use shared_database::{catalog, Clock, CoreContext};
use shared_models::clinic::Clinic;
use shared_models::ids::{BusinessId, SessionId};

const CLINIC_ID: &str = "9da34639-5ea8-4c1b-b29b-82f1ece91518";
const PRACTITIONER_ID: &str = "1702030405060708090";
const BUSINESS_ID: &str = "1717010852512540252";
const SERVICE_ID: &str = "1606050403020100000";

fn test_config(server_url: String) -> AppConfig {
    AppConfig {
        store_url: server_url.clone(),
        store_service_key: "service-key".to_string(),
        webhook_api_key: String::new(),
        default_timezone: "Australia/Sydney".to_string(),
        // Full URL routes every PMS shard at the mock server.
        pms_host: server_url,
        pms_max_concurrent_calls: 6,
        pms_rate_limit_per_minute: 199,
        pms_max_retries: 0,
        pms_timeout_secs: 5,
        request_deadline_secs: 10,
        cache_refresh_interval_secs: 300,
    }
}

/// Wednesday 2025-07-16 10:00 in Sydney.
fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 16, 0, 0, 0).unwrap()
}

fn ctx_for(server: &MockServer) -> CoreContext {
    CoreContext::new(test_config(server.uri())).with_clock(Clock::Fixed(fixed_now()))
}

async fn mount_catalog(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/rest/v1/clinics"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "clinic_id": CLINIC_ID,
            "clinic_name": "Test Clinic",
            "dialed_number": "0478621276",
            "pms_api_key": "key",
            "pms_shard": "au1",
            "contact_email": "clinic@example.com",
            "timezone": "Australia/Sydney"
        }])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/practitioners"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "practitioner_id": PRACTITIONER_ID,
            "clinic_id": CLINIC_ID,
            "first_name": "Brendan",
            "last_name": "Smith",
            "title": "Mr",
            "active": true
        }])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/practitioner_appointment_types"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "appointment_types": {
                "service_id": SERVICE_ID,
                "clinic_id": CLINIC_ID,
                "name": "Massage",
                "duration_minutes": 60,
                "active": true
            }
        }])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/practitioner_businesses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "business_id": BUSINESS_ID
        }])))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/businesses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "business_id": BUSINESS_ID,
            "clinic_id": CLINIC_ID,
            "business_name": "City Clinic",
            "is_primary": true,
            "location_aliases": []
        }])))
        .mount(server)
        .await;
}

/// Working hours every day of the week at the one location.
async fn mount_full_week_schedule(server: &MockServer) {
    let rows: Vec<serde_json::Value> = (0..7)
        .map(|day| {
            json!({
                "practitioner_id": PRACTITIONER_ID,
                "business_id": BUSINESS_ID,
                "day_of_week": day,
                "start_time": "09:00:00",
                "end_time": "17:00:00",
                "effective_from": null,
                "effective_to": null
            })
        })
        .collect();
    Mock::given(method("GET"))
        .and(path("/rest/v1/practitioner_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(server)
        .await;
}

async fn clinic(ctx: &CoreContext) -> Clinic {
    catalog::get_clinic_by_dialed_number(&ctx.store, "0478621276")
        .await
        .unwrap()
        .unwrap()
}

fn pms_times_path() -> String {
    format!(
        "/v1/businesses/{}/practitioners/{}/appointment_types/{}/available_times",
        BUSINESS_ID, PRACTITIONER_ID, SERVICE_ID
    )
}

#[tokio::test]
async fn find_next_reports_day_six_with_a_single_span_call() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    mount_full_week_schedule(&server).await;

    // Day 6 (2025-07-22) 09:00 Sydney = 2025-07-21T23:00:00Z. Only one span
    // call is expected: the second span must never be requested.
    Mock::given(method("GET"))
        .and(path(pms_times_path()))
        .and(query_param("from", "2025-07-16"))
        .and(query_param("to", "2025-07-22"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "available_times": [
                {"appointment_start": "2025-07-21T23:00:00Z"}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(pms_times_path()))
        .and(query_param("from", "2025-07-23"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"available_times": []})))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = ctx_for(&server);
    let clinic = clinic(&ctx).await;
    let engine = AvailabilityEngine::new(ctx);

    let criteria = engine
        .criteria_for_practitioner(&clinic, "Brendan Smith", Some("Massage"), None)
        .await
        .unwrap();
    let session = SessionId::new("session_scan");
    let outcome = engine
        .find_next(&clinic, &criteria, 14, &session)
        .await
        .unwrap();

    assert!(!outcome.partial);
    assert_eq!(outcome.slots.len(), 1);
    assert_eq!(
        outcome.slots[0].starts_at,
        Utc.with_ymd_and_hms(2025, 7, 21, 23, 0, 0).unwrap()
    );
    assert_eq!(
        outcome.slots[0].date,
        NaiveDate::from_ymd_opt(2025, 7, 22).unwrap()
    );
}

#[tokio::test]
async fn schedule_pruned_days_cost_no_pms_calls() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;

    // Never works at this business: schedule rows exist, all for another one.
    let rows: Vec<serde_json::Value> = (0..7)
        .map(|day| {
            json!({
                "practitioner_id": PRACTITIONER_ID,
                "business_id": "some-other-business",
                "day_of_week": day,
                "start_time": "09:00:00",
                "end_time": "17:00:00",
                "effective_from": null,
                "effective_to": null
            })
        })
        .collect();
    Mock::given(method("GET"))
        .and(path("/rest/v1/practitioner_schedules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rows))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/v1/businesses/.*/available_times$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"available_times": []})))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = ctx_for(&server);
    let clinic = clinic(&ctx).await;
    let engine = AvailabilityEngine::new(ctx);

    let criteria = engine
        .criteria_for_practitioner(&clinic, "Brendan Smith", Some("Massage"), None)
        .await
        .unwrap();
    let session = SessionId::new("session_pruned");
    let outcome = engine
        .find_next(&clinic, &criteria, 14, &session)
        .await
        .unwrap();

    assert!(outcome.slots.is_empty());
    assert_eq!(outcome.filtered_out, 0);
}

#[tokio::test]
async fn rejected_slots_are_never_reoffered() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    mount_full_week_schedule(&server).await;

    // Two slots on the requested day: 10:00 and 11:00 Sydney.
    Mock::given(method("GET"))
        .and(path(pms_times_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "available_times": [
                {"appointment_start": "2025-07-17T00:00:00Z"},
                {"appointment_start": "2025-07-17T01:00:00Z"}
            ]
        })))
        .mount(&server)
        .await;

    // The session has already declined both.
    Mock::given(method("GET"))
        .and(path("/rest/v1/session_rejected_slots"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"slot_key": format!("{}:{}:2025-07-17:10:00", PRACTITIONER_ID, BUSINESS_ID)},
            {"slot_key": format!("{}:{}:2025-07-17:11:00", PRACTITIONER_ID, BUSINESS_ID)}
        ])))
        .mount(&server)
        .await;

    let ctx = ctx_for(&server);
    let clinic = clinic(&ctx).await;
    let engine = AvailabilityEngine::new(ctx);

    let criteria = engine
        .criteria_for_practitioner(&clinic, "Brendan Smith", Some("Massage"), None)
        .await
        .unwrap();
    let session = SessionId::new("session_rejecting");
    let date = NaiveDate::from_ymd_opt(2025, 7, 17).unwrap();
    let outcome = engine
        .slots_for_date(&clinic, &criteria[0], date, &session)
        .await
        .unwrap();

    // Both suppressed: no availability, and the emptiness is attributable to
    // filtering rather than an empty diary.
    assert!(outcome.slots.is_empty());
    assert_eq!(outcome.filtered_out, 2);
}

#[tokio::test]
async fn failed_booking_attempts_suppress_single_slots() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    mount_full_week_schedule(&server).await;

    Mock::given(method("GET"))
        .and(path(pms_times_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "available_times": [
                {"appointment_start": "2025-07-17T00:00:00Z"},
                {"appointment_start": "2025-07-17T01:00:00Z"}
            ]
        })))
        .mount(&server)
        .await;

    // A booking for 10:00 just failed on the PMS side.
    Mock::given(method("GET"))
        .and(path("/rest/v1/failed_booking_attempts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"date": "2025-07-17", "time_hhmm": "10:00"}
        ])))
        .mount(&server)
        .await;

    let ctx = ctx_for(&server);
    let clinic = clinic(&ctx).await;
    let engine = AvailabilityEngine::new(ctx);

    let criteria = engine
        .criteria_for_practitioner(&clinic, "Brendan Smith", Some("Massage"), None)
        .await
        .unwrap();
    let session = SessionId::new("session_failed");
    let date = NaiveDate::from_ymd_opt(2025, 7, 17).unwrap();
    let outcome = engine
        .slots_for_date(&clinic, &criteria[0], date, &session)
        .await
        .unwrap();

    assert_eq!(outcome.slots.len(), 1);
    assert_eq!(
        outcome.slots[0].starts_at,
        Utc.with_ymd_and_hms(2025, 7, 17, 1, 0, 0).unwrap()
    );
    assert_eq!(outcome.filtered_out, 1);
}

#[tokio::test]
async fn zero_max_days_returns_empty_without_pms_calls() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    mount_full_week_schedule(&server).await;

    Mock::given(method("GET"))
        .and(path_regex(r"^/v1/.*$"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"available_times": []})))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = ctx_for(&server);
    let clinic = clinic(&ctx).await;
    let engine = AvailabilityEngine::new(ctx);

    let criteria = engine
        .criteria_for_practitioner(&clinic, "Brendan Smith", Some("Massage"), None)
        .await
        .unwrap();
    let session = SessionId::new("session_zero");
    let outcome = engine
        .find_next(&clinic, &criteria, 0, &session)
        .await
        .unwrap();
    assert!(outcome.slots.is_empty());
}

#[tokio::test]
async fn location_mismatch_is_rejected_before_any_scan() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;

    let ctx = ctx_for(&server);
    let clinic = clinic(&ctx).await;
    let engine = AvailabilityEngine::new(ctx);

    let elsewhere = BusinessId::new("not-their-location");
    let result = engine
        .criteria_for_practitioner(&clinic, "Brendan Smith", Some("Massage"), Some(&elsewhere))
        .await;
    assert!(matches!(
        result,
        Err(availability_cell::services::engine::EngineError::PractitionerLocationMismatch)
    ));
}
