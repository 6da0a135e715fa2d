use std::time::Duration;

use chrono::{TimeZone, Utc};
use httpmock::prelude::*;
use serde_json::json;
use usage_aggregator::error::MeteringError;
use usage_aggregator::models::{Account, UsageCounters, UsageWindow};
use usage_aggregator::{CloudflareMeter, Credential, MeterSettings, UsageMeter};

fn meter(server: &MockServer) -> CloudflareMeter {
    CloudflareMeter::new(MeterSettings {
        base_url: server.base_url(),
        timeout: Duration::from_secs(5),
    })
    .unwrap()
}

fn window() -> UsageWindow {
    UsageWindow::today_until(Utc.with_ymd_and_hms(2024, 6, 2, 8, 15, 30).unwrap())
}

#[tokio::test]
async fn list_accounts_follows_pagination() {
    let server = MockServer::start_async().await;

    let first_page = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/accounts")
                .query_param("page", "1")
                .query_param("per_page", "50")
                .header("authorization", "Bearer tok-a");
            then.status(200).json_body(json!({
                "success": true,
                "result": [
                    { "id": "acc-1", "name": "Primary" },
                    { "id": "acc-2", "name": null }
                ],
                "result_info": { "page": 1, "total_pages": 2 }
            }));
        })
        .await;
    let second_page = server
        .mock_async(|when, then| {
            when.method(GET).path("/accounts").query_param("page", "2");
            then.status(200).json_body(json!({
                "success": true,
                "result": [{ "id": "acc-3", "name": "Third" }],
                "result_info": { "page": 2, "total_pages": 2 }
            }));
        })
        .await;

    let accounts = meter(&server)
        .list_accounts(&Credential::api_token("tok-a"))
        .await
        .expect("listing should succeed");

    assert_eq!(
        accounts,
        vec![
            Account::new("acc-1", Some("Primary".into())),
            Account::new("acc-2", None),
            Account::new("acc-3", Some("Third".into())),
        ]
    );
    assert_eq!(accounts[1].name, "unknown account");
    first_page.assert_async().await;
    second_page.assert_async().await;
}

#[tokio::test]
async fn list_accounts_without_result_is_empty() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/accounts");
            then.status(200).json_body(json!({ "success": true, "result": [] }));
        })
        .await;

    let accounts = meter(&server)
        .list_accounts(&Credential::api_token("tok"))
        .await
        .unwrap();
    assert!(accounts.is_empty());
}

#[tokio::test]
async fn list_accounts_surfaces_http_status() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/accounts");
            then.status(403).json_body(json!({ "success": false }));
        })
        .await;

    let err = meter(&server)
        .list_accounts(&Credential::api_token("expired"))
        .await
        .expect_err("403 should fail the listing");
    assert!(matches!(
        err,
        MeteringError::Status {
            endpoint: "accounts",
            status: 403
        }
    ));
    mock.assert_async().await;
}

#[tokio::test]
async fn list_accounts_reports_api_rejection() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/accounts");
            then.status(200).json_body(json!({
                "success": false,
                "errors": [{ "code": 9109, "message": "Invalid access token" }],
                "result": null
            }));
        })
        .await;

    let err = meter(&server)
        .list_accounts(&Credential::api_token("bad"))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "metering api error: Invalid access token");
}

#[tokio::test]
async fn global_key_credentials_use_auth_headers() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/accounts")
                .header("x-auth-email", "ops@example.com")
                .header("x-auth-key", "global-key");
            then.status(200).json_body(json!({
                "success": true,
                "result": [{ "id": "acc-1", "name": "Ops" }]
            }));
        })
        .await;

    let accounts = meter(&server)
        .list_accounts(&Credential::global_key("ops@example.com", "global-key"))
        .await
        .unwrap();
    assert_eq!(accounts.len(), 1);
    mock.assert_async().await;
}

#[tokio::test]
async fn query_usage_sums_request_groups_over_window() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/graphql")
                .header("authorization", "Bearer tok-a")
                .body_contains("\"AccountID\":\"acc-1\"")
                .body_contains("\"datetime_geq\":\"2024-06-02T00:00:00.000Z\"")
                .body_contains("\"datetime_leq\":\"2024-06-02T08:15:30.000Z\"")
                .body_contains("getBillingMetrics");
            then.status(200).json_body(json!({
                "data": { "viewer": { "accounts": [{
                    "pagesFunctionsInvocationsAdaptiveGroups": [
                        { "sum": { "requests": 400 } },
                        { "sum": { "requests": 100 } }
                    ],
                    "workersInvocationsAdaptive": [
                        { "sum": { "requests": 2500 } },
                        { "sum": null }
                    ]
                }]}},
                "errors": null
            }));
        })
        .await;

    let counters = meter(&server)
        .query_usage(&Credential::api_token("tok-a"), "acc-1", &window())
        .await
        .unwrap();
    assert_eq!(
        counters,
        UsageCounters {
            pages: 500,
            workers: 2500
        }
    );
    mock.assert_async().await;
}

#[tokio::test]
async fn query_usage_without_data_is_zero() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/graphql");
            then.status(200)
                .json_body(json!({ "data": { "viewer": { "accounts": [] } } }));
        })
        .await;

    let counters = meter(&server)
        .query_usage(&Credential::api_token("tok"), "acc-1", &window())
        .await
        .unwrap();
    assert_eq!(counters, UsageCounters::default());
}

#[tokio::test]
async fn query_usage_reports_graphql_errors() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/graphql");
            then.status(200).json_body(json!({
                "data": null,
                "errors": [{ "message": "does not have access to the path" }]
            }));
        })
        .await;

    let err = meter(&server)
        .query_usage(&Credential::api_token("tok"), "acc-1", &window())
        .await
        .unwrap_err();
    assert!(matches!(err, MeteringError::Api(ref message) if message.contains("access")));
}

#[tokio::test]
async fn query_usage_surfaces_http_status() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(POST).path("/graphql");
            then.status(500);
        })
        .await;

    let err = meter(&server)
        .query_usage(&Credential::api_token("tok"), "acc-1", &window())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "graphql returned status 500");
}

#[tokio::test]
async fn list_accounts_skips_entries_without_id() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/accounts");
            then.status(200).json_body(json!({
                "success": true,
                "result": [
                    { "name": "Orphan" },
                    { "id": null, "name": "Null id" },
                    { "id": "acc-1", "name": "Kept" }
                ],
                "result_info": { "page": 1, "total_pages": 1 }
            }));
        })
        .await;

    let accounts = meter(&server)
        .list_accounts(&Credential::api_token("tok"))
        .await
        .expect("entries without id should not fail the listing");
    assert_eq!(accounts, vec![Account::new("acc-1", Some("Kept".into()))]);
}
