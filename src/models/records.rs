// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Flattened WHOOP records as stored locally.
//!
//! Every record carries the remote natural identifier (never generated here),
//! the owning user, and the remote `created_at`/`updated_at` instants. Nested
//! `score` objects from the wire format are flattened onto the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::time_utils::rfc3339_millis_opt;

/// One of the four independently synced resource streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStream {
    Cycles,
    Recoveries,
    Sleeps,
    Workouts,
}

impl ResourceStream {
    /// All streams, in the order a sync run processes them.
    pub const ALL: [ResourceStream; 4] = [
        ResourceStream::Cycles,
        ResourceStream::Recoveries,
        ResourceStream::Sleeps,
        ResourceStream::Workouts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceStream::Cycles => "cycles",
            ResourceStream::Recoveries => "recoveries",
            ResourceStream::Sleeps => "sleeps",
            ResourceStream::Workouts => "workouts",
        }
    }
}

impl fmt::Display for ResourceStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceStream {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceStream::ALL
            .into_iter()
            .find(|stream| stream.as_str() == s)
            .ok_or_else(|| format!("unknown resource stream: {s}"))
    }
}

/// Scoring state reported by WHOOP for a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScoreState {
    #[default]
    PendingScore,
    Scored,
    Unscorable,
}

impl ScoreState {
    /// Map the wire value; anything unrecognized is treated as pending.
    pub fn from_wire(raw: Option<&str>) -> Self {
        match raw {
            Some("SCORED") => ScoreState::Scored,
            Some("UNSCORABLE") => ScoreState::Unscorable,
            _ => ScoreState::PendingScore,
        }
    }
}

/// A physiological cycle (roughly one day, sleep onset to sleep onset).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    pub id: String,
    pub user_id: i64,
    #[serde(default, with = "rfc3339_millis_opt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "rfc3339_millis_opt")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "rfc3339_millis_opt")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, with = "rfc3339_millis_opt")]
    pub end: Option<DateTime<Utc>>,
    pub timezone_offset: Option<String>,
    #[serde(default)]
    pub score_state: ScoreState,
    pub strain: Option<f64>,
    pub kilojoule: Option<f64>,
    pub average_heart_rate: Option<i64>,
    pub max_heart_rate: Option<i64>,
}

/// Recovery, keyed by the cycle it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recovery {
    pub cycle_id: String,
    pub sleep_id: Option<String>,
    pub user_id: i64,
    #[serde(default, with = "rfc3339_millis_opt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "rfc3339_millis_opt")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub score_state: ScoreState,
    pub user_calibrating: Option<bool>,
    pub recovery_score: Option<f64>,
    pub resting_heart_rate: Option<f64>,
    pub hrv_rmssd_milli: Option<f64>,
    pub spo2_percentage: Option<f64>,
    pub skin_temp_celsius: Option<f64>,
}

/// A sleep or nap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sleep {
    pub id: String,
    pub user_id: i64,
    #[serde(default, with = "rfc3339_millis_opt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "rfc3339_millis_opt")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "rfc3339_millis_opt")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, with = "rfc3339_millis_opt")]
    pub end: Option<DateTime<Utc>>,
    pub timezone_offset: Option<String>,
    pub nap: Option<bool>,
    #[serde(default)]
    pub score_state: ScoreState,
    // score.stage_summary
    pub total_in_bed_time_milli: Option<i64>,
    pub total_awake_time_milli: Option<i64>,
    pub total_no_data_time_milli: Option<i64>,
    pub total_light_sleep_time_milli: Option<i64>,
    pub total_slow_wave_sleep_time_milli: Option<i64>,
    pub total_rem_sleep_time_milli: Option<i64>,
    pub sleep_cycle_count: Option<i64>,
    pub disturbance_count: Option<i64>,
    // score.sleep_needed
    pub baseline_milli: Option<i64>,
    pub need_from_sleep_debt_milli: Option<i64>,
    pub need_from_recent_strain_milli: Option<i64>,
    pub need_from_recent_nap_milli: Option<i64>,
    pub respiratory_rate: Option<f64>,
    pub sleep_performance_percentage: Option<f64>,
    pub sleep_consistency_percentage: Option<f64>,
    pub sleep_efficiency_percentage: Option<f64>,
}

/// A workout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    pub id: String,
    pub user_id: i64,
    #[serde(default, with = "rfc3339_millis_opt")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, with = "rfc3339_millis_opt")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "rfc3339_millis_opt")]
    pub start: Option<DateTime<Utc>>,
    #[serde(default, with = "rfc3339_millis_opt")]
    pub end: Option<DateTime<Utc>>,
    pub timezone_offset: Option<String>,
    pub sport_id: Option<i64>,
    #[serde(default)]
    pub score_state: ScoreState,
    pub strain: Option<f64>,
    pub average_heart_rate: Option<i64>,
    pub max_heart_rate: Option<i64>,
    pub kilojoule: Option<f64>,
    pub percent_recorded: Option<f64>,
    pub distance_meter: Option<f64>,
    pub altitude_gain_meter: Option<f64>,
    pub altitude_change_meter: Option<f64>,
    // score.zone_duration
    pub zone_zero_milli: Option<i64>,
    pub zone_one_milli: Option<i64>,
    pub zone_two_milli: Option<i64>,
    pub zone_three_milli: Option<i64>,
    pub zone_four_milli: Option<i64>,
    pub zone_five_milli: Option<i64>,
}

/// Any stored record, tagged by its stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DomainRecord {
    Cycle(Cycle),
    Recovery(Recovery),
    Sleep(Sleep),
    Workout(Workout),
}

impl DomainRecord {
    /// Natural identifier assigned by WHOOP.
    pub fn id(&self) -> &str {
        match self {
            DomainRecord::Cycle(r) => &r.id,
            DomainRecord::Recovery(r) => &r.cycle_id,
            DomainRecord::Sleep(r) => &r.id,
            DomainRecord::Workout(r) => &r.id,
        }
    }

    pub fn stream(&self) -> ResourceStream {
        match self {
            DomainRecord::Cycle(_) => ResourceStream::Cycles,
            DomainRecord::Recovery(_) => ResourceStream::Recoveries,
            DomainRecord::Sleep(_) => ResourceStream::Sleeps,
            DomainRecord::Workout(_) => ResourceStream::Workouts,
        }
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        match self {
            DomainRecord::Cycle(r) => r.updated_at,
            DomainRecord::Recovery(r) => r.updated_at,
            DomainRecord::Sleep(r) => r.updated_at,
            DomainRecord::Workout(r) => r.updated_at,
        }
    }
}
