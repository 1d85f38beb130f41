// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! WHOOP developer API client.
//!
//! Follows cursor pagination to exhaustion for one resource stream. Every
//! page request goes through, outermost first: circuit breaker, retry with
//! backoff, one forced token refresh on 401/403, rate limiter, HTTP.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use super::resilience::{
    BreakerError, BreakerState, CircuitBreaker, RateLimiter, RetryPolicy, Transient,
};
use super::vault::VaultError;
use crate::config::{Config, StreamPaths};
use crate::models::ResourceStream;
use crate::time_utils::format_utc_millis;

/// `start` bound sent when a stream has never been synced.
const EPOCH_START: &str = "1970-01-01T00:00:00.000Z";

/// Longest error body kept for diagnostics.
const MAX_ERROR_BODY: usize = 200;

/// Source of bearer tokens for outbound calls.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// A token valid for at least the refresh margin.
    async fn access_token(&self) -> Result<String, VaultError>;

    /// A new token after the API rejected `rejected`.
    async fn force_refresh(&self, rejected: &str) -> Result<String, VaultError>;
}

/// Raw records fetched for one stream.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub records: Vec<Value>,
    /// The circuit breaker was open; no data this run.
    pub degraded: bool,
}

/// Anything that can fetch a stream's records updated since a watermark.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn fetch_since(
        &self,
        stream: ResourceStream,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, ApiError>;
}

/// Errors from the WHOOP API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("WHOOP API rejected credentials (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("WHOOP API rate limit exceeded")]
    RateLimited { retry_after: Option<Duration> },

    #[error("WHOOP API server error (HTTP {status})")]
    Server { status: u16 },

    #[error("WHOOP API client error (HTTP {status}): {body}")]
    Client { status: u16, body: String },

    #[error("WHOOP API request timed out")]
    Timeout,

    #[error("WHOOP API connection failed: {0}")]
    Connection(String),

    #[error("invalid WHOOP API response: {0}")]
    Decode(String),

    #[error(transparent)]
    Credential(#[from] VaultError),
}

impl Transient for ApiError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::RateLimited { .. }
                | ApiError::Server { .. }
                | ApiError::Timeout
                | ApiError::Connection(_)
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Decode(e.without_url().to_string())
        } else {
            ApiError::Connection(e.without_url().to_string())
        }
    }
}

/// One page of a collection response.
#[derive(Debug, Deserialize)]
struct Page {
    #[serde(default)]
    records: Vec<Value>,
    #[serde(default)]
    next_token: Option<String>,
}

/// Paginated, rate-limited, retrying WHOOP API client.
pub struct WhoopClient {
    http: reqwest::Client,
    base_url: String,
    paths: StreamPaths,
    page_limit: u32,
    tokens: Arc<dyn AccessTokenProvider>,
    limiter: RateLimiter,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl WhoopClient {
    pub fn new(config: &Config, tokens: Arc<dyn AccessTokenProvider>) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            paths: config.stream_paths.clone(),
            page_limit: config.page_limit,
            tokens,
            limiter: RateLimiter::per_minute(config.rate_limit_per_minute),
            retry: RetryPolicy::new(&config.retry),
            breaker: CircuitBreaker::new("whoop-api", config.breaker.clone()),
        })
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Fetch one page through the retry policy.
    async fn fetch_page(
        &self,
        stream: ResourceStream,
        url: &str,
        start: &str,
        cursor: Option<&str>,
    ) -> Result<Page, ApiError> {
        self.retry
            .run(stream.as_str(), || self.fetch_page_authenticated(url, start, cursor))
            .await
    }

    /// One attempt, with a single forced refresh if the token is rejected.
    async fn fetch_page_authenticated(
        &self,
        url: &str,
        start: &str,
        cursor: Option<&str>,
    ) -> Result<Page, ApiError> {
        let token = self.tokens.access_token().await?;
        match self.send(url, start, cursor, &token).await {
            Err(ApiError::Unauthorized { status }) => {
                tracing::warn!(status, "Access token rejected, refreshing and retrying once");
                let token = self.tokens.force_refresh(&token).await?;
                self.send(url, start, cursor, &token).await
            }
            other => other,
        }
    }

    async fn send(
        &self,
        url: &str,
        start: &str,
        cursor: Option<&str>,
        token: &str,
    ) -> Result<Page, ApiError> {
        self.limiter.acquire().await;

        let limit = self.page_limit.to_string();
        let mut query = vec![("limit", limit.as_str()), ("start", start)];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor));
        }

        let response = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<Page>()
                .await
                .map_err(|e| ApiError::Decode(e.without_url().to_string()));
        }

        let status_code = status.as_u16();
        match status_code {
            401 | 403 => Err(ApiError::Unauthorized {
                status: status_code,
            }),
            429 => {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(ApiError::RateLimited { retry_after })
            }
            _ if status.is_server_error() => Err(ApiError::Server {
                status: status_code,
            }),
            _ => {
                let body: String = response
                    .text()
                    .await
                    .unwrap_or_default()
                    .chars()
                    .take(MAX_ERROR_BODY)
                    .collect();
                Err(ApiError::Client {
                    status: status_code,
                    body,
                })
            }
        }
    }
}

#[async_trait]
impl RecordSource for WhoopClient {
    async fn fetch_since(
        &self,
        stream: ResourceStream,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, ApiError> {
        let url = format!("{}{}", self.base_url, self.paths.path_for(stream));
        let start = since.map_or_else(|| EPOCH_START.to_string(), format_utc_millis);

        let mut records = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0u32;

        loop {
            let result = self
                .breaker
                .call(
                    || self.fetch_page(stream, &url, &start, cursor.as_deref()),
                    |e: &ApiError| e.is_transient(),
                )
                .await;

            let page = match result {
                Ok(page) => page,
                Err(BreakerError::Open) => {
                    tracing::warn!(
                        stream = %stream,
                        pages,
                        "Circuit breaker open, skipping stream this run"
                    );
                    return Ok(FetchOutcome {
                        records: Vec::new(),
                        degraded: true,
                    });
                }
                Err(BreakerError::Inner(e)) => return Err(e),
            };

            pages += 1;
            records.extend(page.records);

            match page.next_token.filter(|t| !t.is_empty()) {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    return Err(ApiError::Decode(format!(
                        "pagination cursor did not advance after page {pages}"
                    )));
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(stream = %stream, pages, records = records.len(), start = %start, "Fetched stream");
        Ok(FetchOutcome {
            records,
            degraded: false,
        })
    }
}
