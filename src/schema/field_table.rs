//! Versioned field table
//!
//! For every `FieldId` this table lists the source keys accepted for it, in
//! priority order, together with the unit each key reports in and the unit
//! rule that brings values into the canonical unit. The table is the stable
//! input contract of the normalizer: bump `FIELD_TABLE_VERSION` whenever an
//! alias, pattern or rule changes.

use crate::types::FieldId;

/// Current field table version
pub const FIELD_TABLE_VERSION: &str = "trends.field_table.v1";

/// Structural fallback search depth (record top level is depth 1)
pub const MAX_FALLBACK_DEPTH: usize = 3;

/// Raw magnitude at which an unlabelled distance is read as meters
pub const METERS_THRESHOLD: f64 = 1000.0;

/// Raw magnitude at which an unlabelled duration is read as seconds
pub const SECONDS_THRESHOLD: f64 = 1000.0;

/// Unit a particular source key reports in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceUnit {
    /// Already in the canonical unit
    Canonical,
    /// Distance in meters
    Meters,
    /// Duration in seconds
    Seconds,
    /// Unlabelled; the unit rule's magnitude heuristic decides
    Inferred,
}

/// Conversion into the canonical unit of a field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnitRule {
    /// Plain number, no conversion
    Plain,
    /// Kilometers; meters converted, unlabelled values at or above the threshold read as meters
    MetersToKm { threshold: f64 },
    /// Minutes; seconds converted, unlabelled values at or above the threshold read as seconds
    SecondsToMinutes { threshold: f64 },
    /// Minutes since midnight, parsed from clock strings or timestamps
    ClockTime,
}

impl UnitRule {
    /// Convert a raw magnitude reported in `unit` into the canonical unit
    pub fn apply(&self, raw: f64, unit: SourceUnit) -> f64 {
        match (*self, unit) {
            (UnitRule::MetersToKm { .. }, SourceUnit::Meters) => raw / 1000.0,
            (UnitRule::MetersToKm { threshold }, SourceUnit::Inferred) if raw >= threshold => {
                raw / 1000.0
            }
            (UnitRule::SecondsToMinutes { .. }, SourceUnit::Seconds) => raw / 60.0,
            (UnitRule::SecondsToMinutes { threshold }, SourceUnit::Inferred)
                if raw >= threshold =>
            {
                raw / 60.0
            }
            _ => raw,
        }
    }
}

/// Accepted source key for a field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyAlias {
    pub key: &'static str,
    pub unit: SourceUnit,
}

const fn alias(key: &'static str, unit: SourceUnit) -> KeyAlias {
    KeyAlias { key, unit }
}

/// Table entry for one field
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    pub id: FieldId,
    /// Candidate keys, tried in order at the record's top level
    pub aliases: &'static [KeyAlias],
    /// Substrings matched against folded key names by the structural fallback
    pub patterns: &'static [&'static str],
    pub unit: UnitRule,
}

use SourceUnit::{Canonical, Inferred, Meters, Seconds};

const STEP_COUNT: FieldSpec = FieldSpec {
    id: FieldId::StepCount,
    aliases: &[
        alias("steps", Canonical),
        alias("step_count", Canonical),
        alias("stepCount", Canonical),
        alias("totalSteps", Canonical),
        alias("total_steps", Canonical),
    ],
    patterns: &["step"],
    unit: UnitRule::Plain,
};

const DISTANCE_KM: FieldSpec = FieldSpec {
    id: FieldId::DistanceKm,
    aliases: &[
        alias("distance_km", Canonical),
        alias("distanceKm", Canonical),
        alias("distance_meters", Meters),
        alias("totalDistanceMeters", Meters),
        alias("distanceInMeters", Meters),
        alias("distance", Inferred),
        alias("total_distance", Inferred),
    ],
    patterns: &["distance"],
    unit: UnitRule::MetersToKm {
        threshold: METERS_THRESHOLD,
    },
};

const DURATION_MIN: FieldSpec = FieldSpec {
    id: FieldId::DurationMin,
    aliases: &[
        alias("duration_min", Canonical),
        alias("duration_minutes", Canonical),
        alias("durationMinutes", Canonical),
        alias("moving_time", Seconds),
        alias("elapsed_time", Seconds),
        alias("duration_sec", Seconds),
        alias("durationInSeconds", Seconds),
        alias("duration", Inferred),
    ],
    patterns: &["duration", "movingtime", "elapsedtime"],
    unit: UnitRule::SecondsToMinutes {
        threshold: SECONDS_THRESHOLD,
    },
};

const ACTIVE_CALORIES: FieldSpec = FieldSpec {
    id: FieldId::ActiveCalories,
    aliases: &[
        alias("active_calories", Canonical),
        alias("activeCalories", Canonical),
        alias("activeKilocalories", Canonical),
        alias("calories", Canonical),
        alias("kcal", Canonical),
    ],
    patterns: &["calorie", "kcal"],
    unit: UnitRule::Plain,
};

const SLEEP_DURATION_MIN: FieldSpec = FieldSpec {
    id: FieldId::SleepDurationMin,
    aliases: &[
        alias("sleep_duration_min", Canonical),
        alias("sleep_minutes", Canonical),
        alias("total_sleep_minutes", Canonical),
        alias("sleepTimeSeconds", Seconds),
        alias("total_sleep_seconds", Seconds),
        alias("sleep_duration", Inferred),
        alias("total_sleep_duration", Inferred),
    ],
    patterns: &["sleepduration", "totalsleep", "sleeptime"],
    unit: UnitRule::SecondsToMinutes {
        threshold: SECONDS_THRESHOLD,
    },
};

const RESTING_HEART_RATE: FieldSpec = FieldSpec {
    id: FieldId::RestingHeartRate,
    aliases: &[
        alias("resting_hr", Canonical),
        alias("resting_heart_rate", Canonical),
        alias("restingHeartRate", Canonical),
        alias("rhr", Canonical),
    ],
    patterns: &["restinghr", "restingheartrate"],
    unit: UnitRule::Plain,
};

const SLEEP_ONSET: FieldSpec = FieldSpec {
    id: FieldId::SleepOnset,
    aliases: &[
        alias("sleep_onset", Canonical),
        alias("bedtime", Canonical),
        alias("bedtime_start", Canonical),
        alias("sleep_start", Canonical),
        alias("sleepStartTimestampGmt", Canonical),
    ],
    patterns: &["sleeponset", "bedtimestart", "sleepstart"],
    unit: UnitRule::ClockTime,
};

const WAKE_TIME: FieldSpec = FieldSpec {
    id: FieldId::WakeTime,
    aliases: &[
        alias("wake_time", Canonical),
        alias("wakeTime", Canonical),
        alias("bedtime_end", Canonical),
        alias("sleep_end", Canonical),
        alias("sleepEndTimestampGmt", Canonical),
    ],
    patterns: &["waketime", "wakeup", "bedtimeend", "sleepend"],
    unit: UnitRule::ClockTime,
};

/// The full field table
pub const FIELD_TABLE: [FieldSpec; 8] = [
    STEP_COUNT,
    DISTANCE_KM,
    DURATION_MIN,
    ACTIVE_CALORIES,
    SLEEP_DURATION_MIN,
    RESTING_HEART_RATE,
    SLEEP_ONSET,
    WAKE_TIME,
];

impl FieldId {
    /// Table entry for this field
    pub fn spec(&self) -> &'static FieldSpec {
        match self {
            FieldId::StepCount => &STEP_COUNT,
            FieldId::DistanceKm => &DISTANCE_KM,
            FieldId::DurationMin => &DURATION_MIN,
            FieldId::ActiveCalories => &ACTIVE_CALORIES,
            FieldId::SleepDurationMin => &SLEEP_DURATION_MIN,
            FieldId::RestingHeartRate => &RESTING_HEART_RATE,
            FieldId::SleepOnset => &SLEEP_ONSET,
            FieldId::WakeTime => &WAKE_TIME,
        }
    }
}

/// Fold a key name for pattern matching: lowercase, separators removed
pub fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}
