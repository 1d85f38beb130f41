// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Read API over synced records.

use axum::{
    extract::{rejection::QueryRejection, Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::{DomainRecord, ResourceStream};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/{stream}", get(list_records))
}

const DEFAULT_LIMIT: u32 = 50;
const MAX_LIMIT: u32 = 100;

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default = "default_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
}

fn default_limit() -> u32 {
    DEFAULT_LIMIT
}

#[derive(Serialize)]
struct ListResponse {
    stream: ResourceStream,
    limit: u32,
    offset: u32,
    records: Vec<DomainRecord>,
}

/// List stored records for one stream, most recently updated first.
async fn list_records(
    State(state): State<Arc<AppState>>,
    Path(stream): Path<String>,
    query: std::result::Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ListResponse>> {
    let stream: ResourceStream = stream
        .parse()
        .map_err(|_| AppError::NotFound(format!("Resource stream '{}'", stream)))?;

    let Query(params) = query.map_err(|e| AppError::BadRequest(e.body_text()))?;
    if !(1..=MAX_LIMIT).contains(&params.limit) {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {MAX_LIMIT}"
        )));
    }

    tracing::debug!(stream = %stream, limit = params.limit, offset = params.offset, "Listing records");

    let records = state
        .records
        .list(stream, params.limit, params.offset)
        .await?;

    Ok(Json(ListResponse {
        stream,
        limit: params.limit,
        offset: params.offset,
        records,
    }))
}
