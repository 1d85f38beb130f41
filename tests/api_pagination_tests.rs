// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Read API pagination tests.
//!
//! These tests verify that:
//! 1. `limit` and `offset` are validated
//! 2. Unknown streams are 404s
//! 3. Records come back newest first and page correctly

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{TimeZone, Utc};
use tower::ServiceExt;
use whoop_sync::db::RecordStore;
use whoop_sync::models::{DomainRecord, ScoreState, Workout};

mod common;

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn workout(id: &str, updated_hour: u32) -> DomainRecord {
    DomainRecord::Workout(Workout {
        id: id.to_string(),
        user_id: 9012,
        created_at: None,
        updated_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, updated_hour, 0, 0).unwrap()),
        start: Some(Utc.with_ymd_and_hms(2024, 3, 1, 6, 0, 0).unwrap()),
        end: None,
        timezone_offset: Some("-08:00".to_string()),
        sport_id: Some(1),
        score_state: ScoreState::Scored,
        strain: Some(8.2),
        average_heart_rate: Some(123),
        max_heart_rate: Some(146),
        kilojoule: None,
        percent_recorded: Some(100.0),
        distance_meter: None,
        altitude_gain_meter: None,
        altitude_change_meter: None,
        zone_zero_milli: None,
        zone_one_milli: None,
        zone_two_milli: None,
        zone_three_milli: None,
        zone_four_milli: None,
        zone_five_milli: None,
    })
}

#[tokio::test]
async fn test_limit_out_of_range_rejected() {
    for uri in [
        "/api/cycles?limit=0",
        "/api/cycles?limit=101",
        "/api/cycles?limit=-1",
        "/api/cycles?limit=ten",
        "/api/cycles?offset=-5",
    ] {
        let (app, _, _) = common::create_test_app();
        let response = app.oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
    }
}

#[tokio::test]
async fn test_unknown_stream_not_found() {
    let (app, _, _) = common::create_test_app();
    let response = app.oneshot(get("/api/heart_rate")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let body = common::body_json(response).await;
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_default_page_of_empty_stream() {
    let (app, _, _) = common::create_test_app();
    let response = app.oneshot(get("/api/sleeps")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = common::body_json(response).await;
    assert_eq!(body["stream"], "sleeps");
    assert_eq!(body["limit"], 50);
    assert_eq!(body["offset"], 0);
    assert_eq!(body["records"], serde_json::json!([]));
}

#[tokio::test]
async fn test_records_paged_newest_first() {
    let (app, _, db) = common::create_test_app();
    for (id, hour) in [("w1", 7), ("w2", 9), ("w3", 8)] {
        db.upsert(&workout(id, hour)).await.unwrap();
    }

    let response = app
        .clone()
        .oneshot(get("/api/workouts?limit=2"))
        .await
        .unwrap();
    let body = common::body_json(response).await;
    let ids: Vec<&str> = body["records"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["w2", "w3"]);
    assert_eq!(body["records"][0]["updated_at"], "2024-03-01T09:00:00.000Z");
    assert_eq!(body["records"][0]["score_state"], "SCORED");

    let response = app
        .oneshot(get("/api/workouts?limit=2&offset=2"))
        .await
        .unwrap();
    let body = common::body_json(response).await;
    assert_eq!(body["records"].as_array().unwrap().len(), 1);
    assert_eq!(body["records"][0]["id"], "w1");
}

#[tokio::test]
async fn test_health() {
    let (app, _, _) = common::create_test_app();
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = common::body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert!(body["build_id"].is_string());
}
