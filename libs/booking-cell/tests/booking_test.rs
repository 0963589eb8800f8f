use chrono::{TimeZone, Utc};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use booking_cell::models::{BookingError, BookingRequest};
use booking_cell::services::booking::BookingCoordinator;
use shared_config::AppConfig;
use shared_database::{catalog, Clock, CoreContext};
use shared_models::clinic::Clinic;

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
        pms_host: server_url,
        pms_max_concurrent_calls: 6,
        pms_rate_limit_per_minute: 199,
        pms_max_retries: 0,
        pms_timeout_secs: 5,
        request_deadline_secs: 10,
        cache_refresh_interval_secs: 300,
    }
}

/// 2025-07-15 in Sydney; the booking target of 2025-07-16 10:00 is upcoming.
fn fixed_now() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 7, 15, 0, 0, 0).unwrap()
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

    Mock::given(method("GET"))
        .and(path("/rest/v1/appointment_types"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "service_id": SERVICE_ID,
            "clinic_id": CLINIC_ID,
            "name": "Massage",
            "duration_minutes": 60,
            "active": true
        }])))
        .mount(server)
        .await;

    // No local patient and no existing appointment at the slot.
    Mock::given(method("GET"))
        .and(path("/rest/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

async fn mount_pms_patient_creation(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v1/patients"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"patients": []})))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/patients"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 555001,
            "first_name": "Test",
            "last_name": "Patient",
            "phone_numbers": [{"number": "0478621276"}]
        })))
        .mount(server)
        .await;
}

fn pms_times_path() -> String {
    format!(
        "/v1/businesses/{}/practitioners/{}/appointment_types/{}/available_times",
        BUSINESS_ID, PRACTITIONER_ID, SERVICE_ID
    )
}

/// The slot being booked: 10:00 Sydney on 2025-07-16 = midnight UTC.
async fn mount_precheck_offering_ten_am(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(pms_times_path()))
        .and(query_param("from", "2025-07-16"))
        .and(query_param("to", "2025-07-16"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "available_times": [
                {"appointment_start": "2025-07-16T00:00:00Z"},
                {"appointment_start": "2025-07-16T01:00:00Z"}
            ]
        })))
        .mount(server)
        .await;
}

async fn mount_lock_grant(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/rest/v1/booking_locks"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{}])))
        .mount(server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/booking_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(server)
        .await;
}

fn booking_request() -> BookingRequest {
    serde_json::from_value(json!({
        "action": "book",
        "sessionId": "session_book_1",
        "dialedNumber": "0478621276",
        "callerPhone": "0478621276",
        "patientName": "Test Patient",
        "practitioner": "Brendan Smith",
        "appointmentType": "Massage",
        "appointmentDate": "2025-07-16",
        "appointmentTime": "10:00",
        "business_id": BUSINESS_ID
    }))
    .unwrap()
}

async fn clinic(ctx: &CoreContext) -> Clinic {
    catalog::get_clinic_by_dialed_number(&ctx.store, "0478621276")
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn happy_path_booking_returns_confirmation() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    mount_pms_patient_creation(&server).await;
    mount_precheck_offering_ten_am(&server).await;
    mount_lock_grant(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/appointments"))
        .and(body_partial_json(json!({
            "appointment_start": "2025-07-16T00:00:00+00:00",
            "practitioner_id": PRACTITIONER_ID,
            "business_id": BUSINESS_ID
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 99887766,
            "appointment_start": "2025-07-16T00:00:00Z",
            "appointment_end": "2025-07-16T01:00:00Z"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{}])))
        .mount(&server)
        .await;

    let ctx = ctx_for(&server);
    let clinic = clinic(&ctx).await;
    let coordinator = BookingCoordinator::new(ctx);

    let booked = coordinator.book(&clinic, &booking_request()).await.unwrap();

    assert_eq!(booked.appointment_id.as_str(), "99887766");
    assert_eq!(booked.confirmation_number, "VB887766");
    assert_eq!(booked.practitioner_name, "Brendan Smith");
    assert_eq!(booked.service_name, "Massage");
    assert_eq!(booked.business_name, "City Clinic");
    assert_eq!(booked.patient_name, "Test Patient");
    assert_eq!(
        booked.starts_at,
        Utc.with_ymd_and_hms(2025, 7, 16, 0, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn contended_lock_fails_with_slot_taken_before_pms_create() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    mount_pms_patient_creation(&server).await;

    // Another session holds the lock: unique violation on insert.
    Mock::given(method("POST"))
        .and(path("/rest/v1/booking_locks"))
        .respond_with(ResponseTemplate::new(409).set_body_string("duplicate key value"))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/rest/v1/booking_locks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = ctx_for(&server);
    let clinic = clinic(&ctx).await;
    let coordinator = BookingCoordinator::new(ctx);

    let result = coordinator.book(&clinic, &booking_request()).await;
    assert!(matches!(result, Err(BookingError::SlotTaken)));
}

#[tokio::test]
async fn precheck_rejects_unoffered_times_without_booking() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    mount_pms_patient_creation(&server).await;
    mount_lock_grant(&server).await;

    // The diary only offers 11:00; the caller wants 10:00.
    Mock::given(method("GET"))
        .and(path(pms_times_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "available_times": [
                {"appointment_start": "2025-07-16T01:00:00Z"}
            ]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = ctx_for(&server);
    let clinic = clinic(&ctx).await;
    let coordinator = BookingCoordinator::new(ctx);

    let result = coordinator.book(&clinic, &booking_request()).await;
    assert!(matches!(result, Err(BookingError::TimeNotAvailable)));
}

#[tokio::test]
async fn pms_conflict_records_failed_attempt_and_releases_lock() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    mount_pms_patient_creation(&server).await;
    mount_precheck_offering_ten_am(&server).await;
    mount_lock_grant(&server).await;

    Mock::given(method("POST"))
        .and(path("/v1/appointments"))
        .respond_with(ResponseTemplate::new(422).set_body_string("Appointment is already booked"))
        .expect(1)
        .mount(&server)
        .await;
    // The failed attempt is recorded so the slot stops being offered.
    Mock::given(method("POST"))
        .and(path("/rest/v1/failed_booking_attempts"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!([{}])))
        .expect(1)
        .mount(&server)
        .await;
    // And the availability entry is marked stale.
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/availability_cache"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = ctx_for(&server);
    let clinic = clinic(&ctx).await;
    let coordinator = BookingCoordinator::new(ctx);

    let result = coordinator.book(&clinic, &booking_request()).await;
    assert!(matches!(result, Err(BookingError::SlotTaken)));
}

#[tokio::test]
async fn invalid_phone_is_rejected_locally() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;

    let ctx = ctx_for(&server);
    let clinic = clinic(&ctx).await;
    let coordinator = BookingCoordinator::new(ctx);

    let mut request = booking_request();
    request.caller_phone = Some("0298765432".to_string()); // landline
    let result = coordinator.book(&clinic, &request).await;
    assert!(matches!(result, Err(BookingError::InvalidPhoneNumber)));
}

#[tokio::test]
async fn past_times_are_rejected() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;

    let ctx = ctx_for(&server);
    let clinic = clinic(&ctx).await;
    let coordinator = BookingCoordinator::new(ctx);

    let mut request = booking_request();
    request.appointment_date = Some("2025-07-10".to_string());
    let result = coordinator.book(&clinic, &request).await;
    assert!(matches!(result, Err(BookingError::InvalidTime)));
}

#[tokio::test]
async fn service_resolution_is_strict_for_bookings() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;

    let ctx = ctx_for(&server);
    let clinic = clinic(&ctx).await;
    let coordinator = BookingCoordinator::new(ctx);

    // "Massag" would fuzzy-match, but bookings demand the exact name.
    let mut request = booking_request();
    request.appointment_type = Some("Massag".to_string());
    let result = coordinator.book(&clinic, &request).await;
    assert!(matches!(result, Err(BookingError::ServiceNotFound(_))));
}

#[tokio::test]
async fn cancelling_an_already_cancelled_appointment_is_a_no_op_success() {
    // Dedicated mocks: the appointment lookup must return a cancelled row.
    let server2 = MockServer::start().await;
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
        .mount(&server2)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "appointment_id": "77001",
            "clinic_id": CLINIC_ID,
            "patient_id": "555001",
            "practitioner_id": PRACTITIONER_ID,
            "service_id": SERVICE_ID,
            "business_id": BUSINESS_ID,
            "starts_at": "2025-07-16T00:00:00Z",
            "ends_at": "2025-07-16T01:00:00Z",
            "status": "cancelled"
        }])))
        .mount(&server2)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/appointments/77001"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server2)
        .await;

    let ctx = ctx_for(&server2);
    let clinic = clinic(&ctx).await;
    let coordinator = BookingCoordinator::new(ctx);

    let request: BookingRequest = serde_json::from_value(json!({
        "action": "cancel",
        "sessionId": "session_cancel",
        "dialedNumber": "0478621276",
        "callerPhone": "0478621276",
        "appointmentId": "77001"
    }))
    .unwrap();

    let cancelled = coordinator.cancel(&clinic, &request).await.unwrap();
    assert!(cancelled.already_cancelled);
    assert_eq!(cancelled.appointment.appointment_id.as_str(), "77001");
}

#[tokio::test]
async fn failed_reschedule_leaves_the_old_appointment_untouched() {
    let server = MockServer::start().await;
    mount_catalog(&server).await;
    mount_pms_patient_creation(&server).await;
    mount_lock_grant(&server).await;

    // The appointment being moved, found by its id. Higher priority than the
    // generic appointments mock, which answers the conflict-check read with [].
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .and(query_param("appointment_id", "eq.77003"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "appointment_id": "77003",
            "clinic_id": CLINIC_ID,
            "patient_id": "555001",
            "practitioner_id": PRACTITIONER_ID,
            "service_id": SERVICE_ID,
            "business_id": BUSINESS_ID,
            "starts_at": "2025-07-16T00:00:00Z",
            "ends_at": "2025-07-16T01:00:00Z",
            "status": "booked"
        }])))
        .with_priority(1)
        .mount(&server)
        .await;

    // The requested new time (11:00) is already gone: the diary only offers
    // 12:00, so the precheck fails before any PMS write.
    Mock::given(method("GET"))
        .and(path(pms_times_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "available_times": [
                {"appointment_start": "2025-07-16T02:00:00Z"}
            ]
        })))
        .mount(&server)
        .await;

    // Neither a new booking nor a cancellation of the old one may happen.
    Mock::given(method("POST"))
        .and(path("/v1/appointments"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/appointments/77003"))
        .respond_with(ResponseTemplate::new(204))
        .expect(0)
        .mount(&server)
        .await;

    let ctx = ctx_for(&server);
    let clinic = clinic(&ctx).await;
    let coordinator = BookingCoordinator::new(ctx);

    let request: BookingRequest = serde_json::from_value(json!({
        "action": "reschedule",
        "sessionId": "session_reschedule",
        "dialedNumber": "0478621276",
        "callerPhone": "0478621276",
        "patientName": "Test Patient",
        "appointmentId": "77003",
        "newDate": "2025-07-16",
        "newTime": "11:00"
    }))
    .unwrap();

    let result = coordinator.reschedule(&clinic, &request).await;
    assert!(matches!(result, Err(BookingError::TimeNotAvailable)));
}

#[tokio::test]
async fn cancel_marks_local_state_and_availability_stale() {
    let server = MockServer::start().await;
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
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "appointment_id": "77002",
            "clinic_id": CLINIC_ID,
            "patient_id": "555001",
            "practitioner_id": PRACTITIONER_ID,
            "service_id": SERVICE_ID,
            "business_id": BUSINESS_ID,
            "starts_at": "2025-07-16T00:00:00Z",
            "ends_at": "2025-07-16T01:00:00Z",
            "status": "booked"
        }])))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/v1/appointments/77002"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/appointments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{}])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/availability_cache"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let ctx = ctx_for(&server);
    let clinic = clinic(&ctx).await;
    let coordinator = BookingCoordinator::new(ctx);

    let request: BookingRequest = serde_json::from_value(json!({
        "action": "cancel",
        "sessionId": "session_cancel2",
        "dialedNumber": "0478621276",
        "callerPhone": "0478621276",
        "appointmentId": "77002"
    }))
    .unwrap();

    let cancelled = coordinator.cancel(&clinic, &request).await.unwrap();
    assert!(!cancelled.already_cancelled);
}
