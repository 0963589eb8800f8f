use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use practitioner_cell::services::practitioners::{
    resolve_practitioner, PractitionerResolveError,
};
use shared_config::AppConfig;
use shared_database::{catalog, CoreContext};
use shared_models::clinic::Clinic;

const CLINIC_ID: &str = "9da34639-5ea8-4c1b-b29b-82f1ece91518";

fn test_config(store_url: String) -> AppConfig {
    AppConfig {
        store_url,
        store_service_key: "service-key".to_string(),
        webhook_api_key: String::new(),
        default_timezone: "Australia/Sydney".to_string(),
        pms_host: "cliniko.com".to_string(),
        pms_max_concurrent_calls: 6,
        pms_rate_limit_per_minute: 59,
        pms_max_retries: 1,
        pms_timeout_secs: 5,
        request_deadline_secs: 25,
        cache_refresh_interval_secs: 300,
    }
}

async fn mount_roster(server: &MockServer) {
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
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "practitioner_id": "p1",
                "clinic_id": CLINIC_ID,
                "first_name": "Brendan",
                "last_name": "Smith",
                "title": "Mr",
                "active": true
            },
            {
                "practitioner_id": "p2",
                "clinic_id": CLINIC_ID,
                "first_name": "Alice",
                "last_name": "Wong",
                "title": null,
                "active": true
            }
        ])))
        .mount(server)
        .await;
}

async fn clinic(ctx: &CoreContext) -> Clinic {
    catalog::get_clinic_by_dialed_number(&ctx.store, "0478621276")
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn full_names_resolve_exactly() {
    let server = MockServer::start().await;
    mount_roster(&server).await;

    let ctx = CoreContext::new(test_config(server.uri()));
    let clinic = clinic(&ctx).await;

    let practitioner = resolve_practitioner(&ctx, &clinic, "Brendan Smith")
        .await
        .unwrap();
    assert_eq!(practitioner.practitioner_id.as_str(), "p1");
}

#[tokio::test]
async fn first_names_resolve_when_unambiguous() {
    let server = MockServer::start().await;
    mount_roster(&server).await;

    let ctx = CoreContext::new(test_config(server.uri()));
    let clinic = clinic(&ctx).await;

    let practitioner = resolve_practitioner(&ctx, &clinic, "alice").await.unwrap();
    assert_eq!(practitioner.practitioner_id.as_str(), "p2");
}

#[tokio::test]
async fn unknown_names_are_not_found() {
    let server = MockServer::start().await;
    mount_roster(&server).await;

    let ctx = CoreContext::new(test_config(server.uri()));
    let clinic = clinic(&ctx).await;

    let result = resolve_practitioner(&ctx, &clinic, "Doctor Nobody").await;
    assert!(matches!(result, Err(PractitionerResolveError::NotFound(_))));
}
