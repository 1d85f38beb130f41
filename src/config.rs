// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Secrets (OAuth client secret, token encryption key) are injected as
//! environment variables by the deployment. Parsing is done over a key lookup
//! so tests never have to touch the process environment.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use std::time::Duration;

use crate::models::ResourceStream;

/// Key used only when `APP_ENV` is `development` or `demo`.
const DEV_ENCRYPTION_KEY: [u8; 32] = *b"dev-only-key-do-not-use-in-prod!";

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
    Demo,
}

impl Environment {
    /// Development and demo deployments may fall back to insecure defaults.
    pub fn allows_insecure_defaults(&self) -> bool {
        matches!(self, Environment::Development | Environment::Demo)
    }
}

/// Where synced records and the credential are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Firestore,
    Memory,
}

/// Per-stream API paths, relative to the API base URL.
#[derive(Debug, Clone)]
pub struct StreamPaths {
    pub cycles: String,
    pub recoveries: String,
    pub sleeps: String,
    pub workouts: String,
}

impl StreamPaths {
    pub fn path_for(&self, stream: ResourceStream) -> &str {
        match stream {
            ResourceStream::Cycles => &self.cycles,
            ResourceStream::Recoveries => &self.recoveries,
            ResourceStream::Sleeps => &self.sleeps,
            ResourceStream::Workouts => &self.workouts,
        }
    }
}

impl Default for StreamPaths {
    fn default() -> Self {
        Self {
            cycles: "/v1/cycle".to_string(),
            recoveries: "/v1/recovery".to_string(),
            sleeps: "/v1/activity/sleep".to_string(),
            workouts: "/v1/activity/workout".to_string(),
        }
    }
}

/// Retry policy settings.
#[derive(Debug, Clone)]
pub struct RetrySettings {
    /// Total attempts, including the first call
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

/// Circuit breaker settings.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Number of most recent calls considered
    pub window_size: usize,
    /// Calls required in the window before the failure rate is evaluated
    pub minimum_calls: usize,
    /// Failure ratio (0.0..=1.0) at which the breaker opens
    pub failure_rate_threshold: f64,
    pub cooldown: Duration,
}

/// Application configuration, loaded once at startup.
#[derive(Clone)]
pub struct Config {
    pub environment: Environment,
    /// Server port
    pub port: u16,
    /// Externally visible base URL of this service (OAuth redirect target)
    pub public_url: String,
    /// GCP project ID (Firestore)
    pub gcp_project_id: String,
    pub storage_backend: StorageBackend,

    // --- WHOOP API ---
    pub whoop_client_id: String,
    pub whoop_client_secret: String,
    pub api_base_url: String,
    pub oauth_base_url: String,
    pub stream_paths: StreamPaths,
    pub page_limit: u32,
    pub request_timeout: Duration,

    // --- Resilience ---
    pub rate_limit_per_minute: u32,
    pub retry: RetrySettings,
    pub breaker: BreakerSettings,

    // --- Credentials ---
    /// AES-256-GCM key for credential secrets (raw bytes)
    pub encryption_key: [u8; 32],
    pub token_refresh_margin: Duration,

    // --- Scheduling ---
    pub sync_interval: Duration,
    pub sync_run_timeout: Duration,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("environment", &self.environment)
            .field("port", &self.port)
            .field("public_url", &self.public_url)
            .field("storage_backend", &self.storage_backend)
            .field("api_base_url", &self.api_base_url)
            .field("whoop_client_id", &self.whoop_client_id)
            .field("whoop_client_secret", &"[REDACTED]")
            .field("encryption_key", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let environment = match get("APP_ENV").as_deref() {
            None | Some("production") | Some("prod") => Environment::Production,
            Some("development") | Some("dev") => Environment::Development,
            Some("demo") => Environment::Demo,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "APP_ENV",
                    reason: format!("unknown environment '{other}'"),
                })
            }
        };

        let encryption_key = match get("TOKEN_ENCRYPTION_KEY") {
            Some(encoded) => decode_key(&encoded)?,
            None if environment.allows_insecure_defaults() => {
                tracing::warn!("TOKEN_ENCRYPTION_KEY not set, using development key");
                DEV_ENCRYPTION_KEY
            }
            None => return Err(ConfigError::Missing("TOKEN_ENCRYPTION_KEY")),
        };

        let storage_backend = match get("STORAGE_BACKEND").as_deref() {
            None | Some("firestore") => StorageBackend::Firestore,
            Some("memory") if environment.allows_insecure_defaults() => StorageBackend::Memory,
            Some("memory") => {
                return Err(ConfigError::Invalid {
                    key: "STORAGE_BACKEND",
                    reason: "memory storage is only allowed in development or demo".to_string(),
                })
            }
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "STORAGE_BACKEND",
                    reason: format!("unknown backend '{other}'"),
                })
            }
        };

        let defaults = StreamPaths::default();
        let failure_rate_threshold: f64 = parse_or(&get, "BREAKER_FAILURE_RATE", 0.5)?;
        if !(0.0..=1.0).contains(&failure_rate_threshold) || failure_rate_threshold == 0.0 {
            return Err(ConfigError::Invalid {
                key: "BREAKER_FAILURE_RATE",
                reason: "must be in (0.0, 1.0]".to_string(),
            });
        }

        let config = Self {
            environment,
            port: parse_or(&get, "PORT", 8080)?,
            public_url: get("PUBLIC_URL").unwrap_or_else(|| "http://localhost:8080".to_string()),
            gcp_project_id: get("GCP_PROJECT_ID").unwrap_or_else(|| "local-dev".to_string()),
            storage_backend,

            whoop_client_id: get("WHOOP_CLIENT_ID")
                .ok_or(ConfigError::Missing("WHOOP_CLIENT_ID"))?,
            whoop_client_secret: get("WHOOP_CLIENT_SECRET")
                .ok_or(ConfigError::Missing("WHOOP_CLIENT_SECRET"))?,
            api_base_url: get("WHOOP_API_BASE_URL")
                .unwrap_or_else(|| "https://api.prod.whoop.com/developer".to_string()),
            oauth_base_url: get("WHOOP_OAUTH_BASE_URL")
                .unwrap_or_else(|| "https://api.prod.whoop.com/oauth/oauth2".to_string()),
            stream_paths: StreamPaths {
                cycles: get("WHOOP_CYCLE_PATH").unwrap_or(defaults.cycles),
                recoveries: get("WHOOP_RECOVERY_PATH").unwrap_or(defaults.recoveries),
                sleeps: get("WHOOP_SLEEP_PATH").unwrap_or(defaults.sleeps),
                workouts: get("WHOOP_WORKOUT_PATH").unwrap_or(defaults.workouts),
            },
            page_limit: parse_or(&get, "WHOOP_PAGE_LIMIT", 25)?,
            request_timeout: Duration::from_secs(parse_or(&get, "WHOOP_REQUEST_TIMEOUT_SECS", 30)?),

            rate_limit_per_minute: parse_or(&get, "RATE_LIMIT_PER_MINUTE", 100)?,
            retry: RetrySettings {
                max_attempts: parse_or(&get, "RETRY_MAX_ATTEMPTS", 3)?,
                base_delay: Duration::from_millis(parse_or(&get, "RETRY_BASE_DELAY_MS", 500)?),
                max_delay: Duration::from_millis(parse_or(&get, "RETRY_MAX_DELAY_MS", 30_000)?),
            },
            breaker: BreakerSettings {
                window_size: parse_or(&get, "BREAKER_WINDOW_SIZE", 10)?,
                minimum_calls: parse_or(&get, "BREAKER_MINIMUM_CALLS", 5)?,
                failure_rate_threshold,
                cooldown: Duration::from_secs(parse_or(&get, "BREAKER_COOLDOWN_SECS", 60)?),
            },

            encryption_key,
            token_refresh_margin: Duration::from_secs(parse_or(
                &get,
                "TOKEN_REFRESH_MARGIN_SECS",
                60,
            )?),

            sync_interval: Duration::from_secs(parse_or(&get, "SYNC_INTERVAL_SECS", 3600)?),
            sync_run_timeout: Duration::from_secs(parse_or(&get, "SYNC_RUN_TIMEOUT_SECS", 900)?),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("WHOOP_PAGE_LIMIT", self.page_limit as u64),
            ("RATE_LIMIT_PER_MINUTE", self.rate_limit_per_minute as u64),
            ("RETRY_MAX_ATTEMPTS", self.retry.max_attempts as u64),
            ("BREAKER_WINDOW_SIZE", self.breaker.window_size as u64),
            ("BREAKER_MINIMUM_CALLS", self.breaker.minimum_calls as u64),
            ("SYNC_INTERVAL_SECS", self.sync_interval.as_secs()),
            ("SYNC_RUN_TIMEOUT_SECS", self.sync_run_timeout.as_secs()),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.breaker.minimum_calls > self.breaker.window_size {
            return Err(ConfigError::Invalid {
                key: "BREAKER_MINIMUM_CALLS",
                reason: "must not exceed BREAKER_WINDOW_SIZE".to_string(),
            });
        }
        Ok(())
    }

    /// Config for tests: development mode, in-memory storage, fast resilience.
    pub fn test_default() -> Self {
        Self {
            environment: Environment::Development,
            port: 8080,
            public_url: "http://localhost:8080".to_string(),
            gcp_project_id: "test-project".to_string(),
            storage_backend: StorageBackend::Memory,
            whoop_client_id: "test_client_id".to_string(),
            whoop_client_secret: "test_secret".to_string(),
            api_base_url: "http://127.0.0.1:9".to_string(),
            oauth_base_url: "http://127.0.0.1:9/oauth/oauth2".to_string(),
            stream_paths: StreamPaths::default(),
            page_limit: 25,
            request_timeout: Duration::from_secs(5),
            rate_limit_per_minute: 6000,
            retry: RetrySettings {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
            },
            breaker: BreakerSettings {
                window_size: 10,
                minimum_calls: 5,
                failure_rate_threshold: 0.5,
                cooldown: Duration::from_secs(60),
            },
            encryption_key: [7u8; 32],
            token_refresh_margin: Duration::from_secs(60),
            sync_interval: Duration::from_secs(3600),
            sync_run_timeout: Duration::from_secs(60),
        }
    }
}

/// Parse an optional value, falling back to `default` only when it is absent.
fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
            key,
            reason: format!("cannot parse '{raw}'"),
        }),
        None => Ok(default),
    }
}

fn decode_key(encoded: &str) -> Result<[u8; 32], ConfigError> {
    let bytes = BASE64.decode(encoded).map_err(|_| ConfigError::Invalid {
        key: "TOKEN_ENCRYPTION_KEY",
        reason: "not valid base64".to_string(),
    })?;
    bytes.try_into().map_err(|bytes: Vec<u8>| ConfigError::Invalid {
        key: "TOKEN_ENCRYPTION_KEY",
        reason: format!("expected 32 bytes, got {}", bytes.len()),
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}
