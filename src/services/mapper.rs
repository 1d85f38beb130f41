// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Conversion of raw WHOOP JSON records into flat domain records.
//!
//! Required fields (natural ID, user ID, anchor timestamp) must be present and
//! well formed or the record is rejected with a [`MappingError`]. Every other
//! field is optional: if it is absent or has the wrong type it becomes `None`.
//! Nested objects such as `score` and `score.stage_summary` are flattened onto
//! the record.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::models::{
    Cycle, DomainRecord, Recovery, ResourceStream, ScoreState, Sleep, Workout,
};
use crate::time_utils::parse_utc;

/// Used in errors when the record has no usable identifier.
const UNKNOWN_ID: &str = "unknown";

/// Validation failure for a single record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MappingError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("record {record_id}: missing required field `{field}`")]
    MissingField {
        field: &'static str,
        record_id: String,
    },

    #[error("record {record_id}: invalid required field `{field}`")]
    InvalidField {
        field: &'static str,
        record_id: String,
    },
}

/// Map one raw record from `stream`.
pub fn map_record(stream: ResourceStream, raw: &Value) -> Result<DomainRecord, MappingError> {
    let obj = raw.as_object().ok_or(MappingError::NotAnObject)?;
    match stream {
        ResourceStream::Cycles => map_cycle(obj).map(DomainRecord::Cycle),
        ResourceStream::Recoveries => map_recovery(obj).map(DomainRecord::Recovery),
        ResourceStream::Sleeps => map_sleep(obj).map(DomainRecord::Sleep),
        ResourceStream::Workouts => map_workout(obj).map(DomainRecord::Workout),
    }
}

fn map_cycle(obj: &Map<String, Value>) -> Result<Cycle, MappingError> {
    let required = Required::new(obj, "id");
    let fields = Fields(Some(obj));
    let score = fields.nested("score");

    Ok(Cycle {
        id: required.id("id")?,
        user_id: required.user_id()?,
        start: Some(required.timestamp("start")?),
        end: fields.timestamp("end"),
        timezone_offset: fields.string("timezone_offset"),
        created_at: fields.timestamp("created_at"),
        updated_at: fields.timestamp("updated_at"),
        score_state: fields.score_state(),
        strain: score.f64("strain"),
        kilojoule: score.f64("kilojoule"),
        average_heart_rate: score.i64("average_heart_rate"),
        max_heart_rate: score.i64("max_heart_rate"),
    })
}

fn map_recovery(obj: &Map<String, Value>) -> Result<Recovery, MappingError> {
    let required = Required::new(obj, "cycle_id");
    let fields = Fields(Some(obj));
    let score = fields.nested("score");

    Ok(Recovery {
        cycle_id: required.id("cycle_id")?,
        user_id: required.user_id()?,
        created_at: Some(required.timestamp("created_at")?),
        sleep_id: fields.natural_id("sleep_id"),
        updated_at: fields.timestamp("updated_at"),
        score_state: fields.score_state(),
        user_calibrating: score.bool("user_calibrating"),
        recovery_score: score.f64("recovery_score"),
        resting_heart_rate: score.f64("resting_heart_rate"),
        hrv_rmssd_milli: score.f64("hrv_rmssd_milli"),
        spo2_percentage: score.f64("spo2_percentage"),
        skin_temp_celsius: score.f64("skin_temp_celsius"),
    })
}

fn map_sleep(obj: &Map<String, Value>) -> Result<Sleep, MappingError> {
    let required = Required::new(obj, "id");
    let fields = Fields(Some(obj));
    let score = fields.nested("score");
    let stages = score.nested("stage_summary");
    let need = score.nested("sleep_needed");

    Ok(Sleep {
        id: required.id("id")?,
        user_id: required.user_id()?,
        start: Some(required.timestamp("start")?),
        end: fields.timestamp("end"),
        timezone_offset: fields.string("timezone_offset"),
        nap: fields.bool("nap"),
        created_at: fields.timestamp("created_at"),
        updated_at: fields.timestamp("updated_at"),
        score_state: fields.score_state(),
        total_in_bed_time_milli: stages.i64("total_in_bed_time_milli"),
        total_awake_time_milli: stages.i64("total_awake_time_milli"),
        total_no_data_time_milli: stages.i64("total_no_data_time_milli"),
        total_light_sleep_time_milli: stages.i64("total_light_sleep_time_milli"),
        total_slow_wave_sleep_time_milli: stages.i64("total_slow_wave_sleep_time_milli"),
        total_rem_sleep_time_milli: stages.i64("total_rem_sleep_time_milli"),
        sleep_cycle_count: stages.i64("sleep_cycle_count"),
        disturbance_count: stages.i64("disturbance_count"),
        baseline_milli: need.i64("baseline_milli"),
        need_from_sleep_debt_milli: need.i64("need_from_sleep_debt_milli"),
        need_from_recent_strain_milli: need.i64("need_from_recent_strain_milli"),
        need_from_recent_nap_milli: need.i64("need_from_recent_nap_milli"),
        respiratory_rate: score.f64("respiratory_rate"),
        sleep_performance_percentage: score.f64("sleep_performance_percentage"),
        sleep_consistency_percentage: score.f64("sleep_consistency_percentage"),
        sleep_efficiency_percentage: score.f64("sleep_efficiency_percentage"),
    })
}

fn map_workout(obj: &Map<String, Value>) -> Result<Workout, MappingError> {
    let required = Required::new(obj, "id");
    let fields = Fields(Some(obj));
    let score = fields.nested("score");
    let zones = score.nested("zone_duration");

    Ok(Workout {
        id: required.id("id")?,
        user_id: required.user_id()?,
        start: Some(required.timestamp("start")?),
        end: fields.timestamp("end"),
        timezone_offset: fields.string("timezone_offset"),
        sport_id: fields.i64("sport_id"),
        created_at: fields.timestamp("created_at"),
        updated_at: fields.timestamp("updated_at"),
        score_state: fields.score_state(),
        strain: score.f64("strain"),
        average_heart_rate: score.i64("average_heart_rate"),
        max_heart_rate: score.i64("max_heart_rate"),
        kilojoule: score.f64("kilojoule"),
        percent_recorded: score.f64("percent_recorded"),
        distance_meter: score.f64("distance_meter"),
        altitude_gain_meter: score.f64("altitude_gain_meter"),
        altitude_change_meter: score.f64("altitude_change_meter"),
        zone_zero_milli: zones.i64("zone_zero_milli"),
        zone_one_milli: zones.i64("zone_one_milli"),
        zone_two_milli: zones.i64("zone_two_milli"),
        zone_three_milli: zones.i64("zone_three_milli"),
        zone_four_milli: zones.i64("zone_four_milli"),
        zone_five_milli: zones.i64("zone_five_milli"),
    })
}

/// Strict extraction of required fields, reporting the record's ID on failure.
struct Required<'a> {
    obj: &'a Map<String, Value>,
    record_id: String,
}

impl<'a> Required<'a> {
    fn new(obj: &'a Map<String, Value>, id_field: &str) -> Self {
        let record_id = obj
            .get(id_field)
            .and_then(natural_id)
            .unwrap_or_else(|| UNKNOWN_ID.to_string());
        Self { obj, record_id }
    }

    fn get(&self, field: &'static str) -> Result<&'a Value, MappingError> {
        match self.obj.get(field) {
            None | Some(Value::Null) => Err(MappingError::MissingField {
                field,
                record_id: self.record_id.clone(),
            }),
            Some(value) => Ok(value),
        }
    }

    fn invalid(&self, field: &'static str) -> MappingError {
        MappingError::InvalidField {
            field,
            record_id: self.record_id.clone(),
        }
    }

    fn id(&self, field: &'static str) -> Result<String, MappingError> {
        natural_id(self.get(field)?).ok_or_else(|| self.invalid(field))
    }

    fn user_id(&self) -> Result<i64, MappingError> {
        let value = self.get("user_id")?;
        value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .ok_or_else(|| self.invalid("user_id"))
    }

    fn timestamp(&self, field: &'static str) -> Result<DateTime<Utc>, MappingError> {
        self.get(field)?
            .as_str()
            .and_then(parse_utc)
            .ok_or_else(|| self.invalid(field))
    }
}

/// Lenient extraction from an object that may itself be absent.
#[derive(Clone, Copy)]
struct Fields<'a>(Option<&'a Map<String, Value>>);

impl<'a> Fields<'a> {
    fn value(&self, key: &str) -> Option<&'a Value> {
        self.0.and_then(|obj| obj.get(key))
    }

    fn nested(&self, key: &str) -> Fields<'a> {
        Fields(self.value(key).and_then(Value::as_object))
    }

    fn f64(&self, key: &str) -> Option<f64> {
        self.value(key).and_then(Value::as_f64)
    }

    fn i64(&self, key: &str) -> Option<i64> {
        self.value(key).and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
        })
    }

    fn bool(&self, key: &str) -> Option<bool> {
        self.value(key).and_then(Value::as_bool)
    }

    fn string(&self, key: &str) -> Option<String> {
        self.value(key).and_then(Value::as_str).map(str::to_string)
    }

    fn natural_id(&self, key: &str) -> Option<String> {
        self.value(key).and_then(natural_id)
    }

    fn timestamp(&self, key: &str) -> Option<DateTime<Utc>> {
        self.value(key).and_then(Value::as_str).and_then(parse_utc)
    }

    fn score_state(&self) -> ScoreState {
        ScoreState::from_wire(self.value("score_state").and_then(Value::as_str))
    }
}

/// WHOOP IDs are integers for cycles and UUID strings for newer resources.
fn natural_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn cycle_json() -> Value {
        json!({
            "id": 93845,
            "user_id": 10129,
            "created_at": "2022-04-24T11:25:44.774Z",
            "updated_at": "2022-04-24T14:25:44.774Z",
            "start": "2022-04-24T02:25:44.774Z",
            "end": "2022-04-24T10:25:44.774Z",
            "timezone_offset": "-05:00",
            "score_state": "SCORED",
            "score": {
                "strain": 5.2951527,
                "kilojoule": 8288.297,
                "average_heart_rate": 68,
                "max_heart_rate": 141
            }
        })
    }

    #[test]
    fn test_cycle_flattens_score() {
        let DomainRecord::Cycle(cycle) = map_record(ResourceStream::Cycles, &cycle_json()).unwrap()
        else {
            panic!("expected a cycle");
        };

        assert_eq!(cycle.id, "93845");
        assert_eq!(cycle.user_id, 10129);
        assert_eq!(cycle.score_state, ScoreState::Scored);
        assert_eq!(cycle.strain, Some(5.2951527));
        assert_eq!(cycle.max_heart_rate, Some(141));
        assert_eq!(
            cycle.updated_at,
            Some(Utc.with_ymd_and_hms(2022, 4, 24, 14, 25, 44).unwrap() + chrono::Duration::milliseconds(774))
        );
    }

    #[test]
    fn test_missing_start_names_field_and_id() {
        let mut raw = cycle_json();
        raw.as_object_mut().unwrap().remove("start");

        assert_eq!(
            map_record(ResourceStream::Cycles, &raw),
            Err(MappingError::MissingField {
                field: "start",
                record_id: "93845".to_string()
            })
        );
    }

    #[test]
    fn test_missing_id_reports_unknown() {
        let raw = json!({ "user_id": 1, "start": "2024-01-01T00:00:00Z" });
        assert_eq!(
            map_record(ResourceStream::Workouts, &raw),
            Err(MappingError::MissingField {
                field: "id",
                record_id: "unknown".to_string()
            })
        );
    }

    #[test]
    fn test_wrong_typed_required_field_rejected() {
        let mut raw = cycle_json();
        raw["user_id"] = json!({ "nested": true });
        assert!(matches!(
            map_record(ResourceStream::Cycles, &raw),
            Err(MappingError::InvalidField { field: "user_id", .. })
        ));

        let mut raw = cycle_json();
        raw["start"] = json!("yesterday");
        assert!(matches!(
            map_record(ResourceStream::Cycles, &raw),
            Err(MappingError::InvalidField { field: "start", .. })
        ));

        let mut raw = cycle_json();
        raw["start"] = json!("2022-04-24T02:25:44.774+02:00");
        assert!(matches!(
            map_record(ResourceStream::Cycles, &raw),
            Err(MappingError::InvalidField { field: "start", .. })
        ));
    }

    #[test]
    fn test_malformed_optional_fields_become_none() {
        let raw = json!({
            "id": "ecfc6a15-4661-442f-a9a4-f160dd7afae8",
            "user_id": "10129",
            "start": "2022-04-24T00:25:44.774Z",
            "end": "not a time",
            "updated_at": 17,
            "nap": "no",
            "score_state": "WHATEVER",
            "score": {
                "respiratory_rate": "fast",
                "stage_summary": "oops",
                "sleep_needed": { "baseline_milli": 27395716 }
            }
        });

        let DomainRecord::Sleep(sleep) = map_record(ResourceStream::Sleeps, &raw).unwrap() else {
            panic!("expected a sleep");
        };
        assert_eq!(sleep.user_id, 10129);
        assert_eq!(
            sleep.start,
            Some(Utc.with_ymd_and_hms(2022, 4, 24, 0, 25, 44).unwrap() + chrono::Duration::milliseconds(774))
        );
        assert_eq!(sleep.end, None);
        assert_eq!(sleep.updated_at, None);
        assert_eq!(sleep.nap, None);
        assert_eq!(sleep.score_state, ScoreState::PendingScore);
        assert_eq!(sleep.respiratory_rate, None);
        assert_eq!(sleep.total_in_bed_time_milli, None);
        assert_eq!(sleep.baseline_milli, Some(27395716));
    }

    #[test]
    fn test_recovery_keyed_by_cycle() {
        let raw = json!({
            "cycle_id": 93845,
            "sleep_id": "ecfc6a15-4661-442f-a9a4-f160dd7afae8",
            "user_id": 10129,
            "created_at": "2022-04-24T11:25:44.774Z",
            "updated_at": "2022-04-24T14:25:44.774Z",
            "score_state": "SCORED",
            "score": {
                "user_calibrating": false,
                "recovery_score": 44,
                "resting_heart_rate": 64,
                "hrv_rmssd_milli": 31.813562
            }
        });

        let record = map_record(ResourceStream::Recoveries, &raw).unwrap();
        assert_eq!(record.id(), "93845");
        let DomainRecord::Recovery(recovery) = record else {
            panic!("expected a recovery");
        };
        assert_eq!(recovery.recovery_score, Some(44.0));
        assert_eq!(recovery.user_calibrating, Some(false));
        assert_eq!(recovery.spo2_percentage, None);
    }

    #[test]
    fn test_recovery_requires_created_at() {
        let raw = json!({ "cycle_id": 1, "user_id": 2 });
        assert_eq!(
            map_record(ResourceStream::Recoveries, &raw),
            Err(MappingError::MissingField {
                field: "created_at",
                record_id: "1".to_string()
            })
        );
    }

    #[test]
    fn test_workout_zone_durations() {
        let raw = json!({
            "id": 1043,
            "user_id": 9012,
            "start": "2022-04-24T02:25:44.774Z",
            "sport_id": 1,
            "score": {
                "strain": 8.2463,
                "distance_meter": 1772.77,
                "zone_duration": {
                    "zone_zero_milli": 13458,
                    "zone_five_milli": 0.0
                }
            }
        });

        let DomainRecord::Workout(workout) = map_record(ResourceStream::Workouts, &raw).unwrap()
        else {
            panic!("expected a workout");
        };
        assert_eq!(workout.sport_id, Some(1));
        assert_eq!(workout.zone_zero_milli, Some(13458));
        assert_eq!(workout.zone_five_milli, Some(0));
        assert_eq!(workout.zone_one_milli, None);
        assert_eq!(workout.score_state, ScoreState::PendingScore);
    }

    #[test]
    fn test_non_object_rejected() {
        assert_eq!(
            map_record(ResourceStream::Cycles, &json!([1, 2])),
            Err(MappingError::NotAnObject)
        );
    }
}
