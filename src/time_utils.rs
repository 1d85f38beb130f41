// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Shared helpers for date/time formatting.
//!
//! Stored timestamps are always written with millisecond precision and a `Z`
//! suffix. Every stored value has the same width, so lexical ordering in the
//! database matches chronological ordering (the watermark query relies on it).

use chrono::{DateTime, SecondsFormat, Utc};

/// Format a UTC timestamp as RFC3339 using a `Z` suffix.
pub fn format_utc_rfc3339(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Format a UTC timestamp for storage (fixed-width, millisecond precision).
pub fn format_utc_millis(date: DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC3339 UTC timestamp. Only the `Z` designator is accepted.
pub fn parse_utc(raw: &str) -> Option<DateTime<Utc>> {
    if !raw.ends_with('Z') {
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Serde adapter for `DateTime<Utc>` fields in stored documents.
pub mod rfc3339_millis {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_utc_millis(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_utc(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}")))
    }
}

/// Serde adapter for `Option<DateTime<Utc>>` fields in stored documents.
pub mod rfc3339_millis_opt {
    use chrono::{DateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
        match date {
            Some(date) => s.serialize_some(&super::format_utc_millis(*date)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
        match Option::<String>::deserialize(d)? {
            Some(raw) => super::parse_utc(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {raw}"))),
            None => Ok(None),
        }
    }
}
