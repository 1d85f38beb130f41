// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! End-to-end sync tests against a mock WHOOP API.
//!
//! The full stack is exercised: credential vault, paginated client with its
//! call guards, mapper, orchestrator, in-memory storage, and HTTP routes.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::time::Duration;
use tower::ServiceExt;
use whoop_sync::config::Config;
use whoop_sync::db::RecordStore;
use whoop_sync::models::ResourceStream;
use whoop_sync::services::{RunState, TokenResponse};
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

mod common;

fn config_for(server: &MockServer) -> Config {
    Config {
        api_base_url: server.uri(),
        oauth_base_url: format!("{}/oauth/oauth2", server.uri()),
        ..Config::test_default()
    }
}

fn grant(access: &str) -> TokenResponse {
    TokenResponse {
        access_token: access.to_string(),
        refresh_token: Some("refresh-1".to_string()),
        expires_in: 3600,
        scope: Some("offline read:cycles".to_string()),
        token_type: Some("bearer".to_string()),
    }
}

fn empty_page() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "records": [], "next_token": null }))
}

async fn mount_empty_streams(server: &MockServer, paths: &[&str]) {
    for p in paths {
        Mock::given(method("GET"))
            .and(path(*p))
            .respond_with(empty_page())
            .mount(server)
            .await;
    }
}

fn cycle(id: i64, updated: &str, start: Option<&str>) -> serde_json::Value {
    let mut raw = json!({
        "id": id,
        "user_id": 10129,
        "created_at": "2024-01-15T09:00:00.000Z",
        "updated_at": updated,
        "score_state": "SCORED",
        "score": { "strain": 11.5, "kilojoule": 9000.0, "average_heart_rate": 70, "max_heart_rate": 160 }
    });
    if let Some(start) = start {
        raw["start"] = json!(start);
    }
    raw
}

#[tokio::test]
async fn test_full_sync_saves_valid_records_and_skips_invalid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/cycle"))
        .and(header("Authorization", "Bearer access-1"))
        .and(query_param("start", "1970-01-01T00:00:00.000Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [
                cycle(1, "2024-01-15T11:00:00.000Z", Some("2024-01-15T01:00:00.000Z")),
                cycle(2, "2024-01-15T12:00:00.000Z", None),
                cycle(3, "2024-01-15T12:30:00.000Z", Some("2024-01-15T02:00:00.000Z"))
            ],
            "next_token": null
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_empty_streams(&server, &["/v1/recovery", "/v1/activity/sleep", "/v1/activity/workout"]).await;

    let (app, state, db) = common::create_test_app_with(config_for(&server));
    state.vault.store_grant(grant("access-1")).await.unwrap();

    let report = state.orchestrator.run_all().await.unwrap();
    assert_eq!(report.status, RunState::Completed);

    let cycles = report.stream(ResourceStream::Cycles).unwrap();
    assert_eq!((cycles.fetched, cycles.saved, cycles.skipped), (3, 2, 1));
    assert_eq!(db.count(ResourceStream::Cycles), 2);
    assert_eq!(
        db.find_latest_updated_at(ResourceStream::Cycles).await.unwrap(),
        Some(Utc.with_ymd_and_hms(2024, 1, 15, 12, 30, 0).unwrap())
    );

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/cycles")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = common::body_json(response).await;
    assert_eq!(body["records"][0]["id"], "3");
    assert_eq!(body["records"][0]["strain"], 11.5);
    assert_eq!(body["records"][1]["id"], "1");
}

#[tokio::test]
async fn test_second_run_fetches_from_watermark() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/cycle"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [cycle(1, "2024-01-15T10:00:00.000Z", Some("2024-01-15T01:00:00.000Z"))],
            "next_token": null
        })))
        .mount(&server)
        .await;
    mount_empty_streams(&server, &["/v1/recovery", "/v1/activity/sleep", "/v1/activity/workout"]).await;

    let (_, state, db) = common::create_test_app_with(config_for(&server));
    state.vault.store_grant(grant("access-1")).await.unwrap();
    state.orchestrator.run_all().await.unwrap();

    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/v1/cycle"))
        .and(query_param("start", "2024-01-15T10:00:00.000Z"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "records": [cycle(1, "2024-01-15T10:00:00.000Z", Some("2024-01-15T01:00:00.000Z"))],
            "next_token": null
        })))
        .expect(1)
        .mount(&server)
        .await;
    mount_empty_streams(&server, &["/v1/recovery", "/v1/activity/sleep", "/v1/activity/workout"]).await;

    let report = state.orchestrator.run_all().await.unwrap();
    assert_eq!(report.stream(ResourceStream::Cycles).unwrap().saved, 1);
    assert_eq!(db.count(ResourceStream::Cycles), 1);
}

#[tokio::test]
async fn test_missing_credential_fails_every_stream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(empty_page())
        .expect(0)
        .mount(&server)
        .await;

    let (_, state, _) = common::create_test_app_with(config_for(&server));
    let report = state.orchestrator.run_all().await.unwrap();

    assert_eq!(report.status, RunState::PartiallyFailed);
    assert_eq!(report.streams.len(), 4);
    for stream in &report.streams {
        assert!(stream.error.as_deref().unwrap().contains("no credential stored"));
    }
}

#[tokio::test]
async fn test_sync_routes_trigger_and_report() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(empty_page().set_delay(Duration::from_millis(200)))
        .mount(&server)
        .await;

    let (app, state, _) = common::create_test_app_with(config_for(&server));
    state.vault.store_grant(grant("access-1")).await.unwrap();

    let status = common::body_json(
        app.clone()
            .oneshot(Request::builder().uri("/sync/status").body(Body::empty()).unwrap())
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status["state"], "idle");
    assert!(status["last_report"].is_null());

    let post = || {
        Request::builder()
            .method("POST")
            .uri("/sync")
            .body(Body::empty())
            .unwrap()
    };

    let response = app.clone().oneshot(post()).await.unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);

    while !state.orchestrator.is_running().await {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    let response = app.clone().oneshot(post()).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);

    while state.orchestrator.is_running().await {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let status = common::body_json(
        app.oneshot(Request::builder().uri("/sync/status").body(Body::empty()).unwrap())
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(status["state"], "completed");
    assert_eq!(status["last_report"]["streams"].as_array().unwrap().len(), 4);
    assert_eq!(status["last_report"]["streams"][0]["stream"], "cycles");
}
