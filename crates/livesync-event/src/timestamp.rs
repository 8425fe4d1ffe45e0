//! Timestamp normalization
//!
//! Every supported encoding collapses into a [`CanonicalTimestamp`], an
//! integer count of milliseconds since the Unix epoch.
//!
//! # Dispatch order (first match wins)
//! 1. null / absent → now
//! 2. structured `{seconds, nanoseconds}` (also `_seconds`, `_nanoseconds`)
//! 3. text parseable as a date/time
//! 4. number: below [`SECONDS_THRESHOLD`] in magnitude is seconds, else ms
//! 5. native instant ([`DateTime<Utc>`], [`SystemTime`])
//! 6. anything else → now
//!
//! Normalization never fails.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Numbers with a smaller magnitude are read as epoch seconds
pub const SECONDS_THRESHOLD: i64 = 100_000_000_000;

/// Milliseconds since the Unix epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalTimestamp(i64);

impl CanonicalTimestamp {
    /// Create from milliseconds
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Current wall-clock time
    #[must_use]
    pub fn now() -> Self {
        Self(SystemClock.now_millis())
    }

    /// Milliseconds since epoch
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Convert to a UTC date-time, if representable
    #[must_use]
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.0).single()
    }
}

impl fmt::Display for CanonicalTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => write!(f, "{}", dt.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)),
            None => write!(f, "{}ms", self.0),
        }
    }
}

impl From<DateTime<Utc>> for CanonicalTimestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp_millis())
    }
}

impl From<SystemTime> for CanonicalTimestamp {
    fn from(t: SystemTime) -> Self {
        Self(system_time_millis(t))
    }
}

/// Source of "now"
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since epoch
    fn now_millis(&self) -> i64;
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now_millis(&self) -> i64 {
        (**self).now_millis()
    }
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        system_time_millis(SystemTime::now())
    }
}

/// Clock pinned to one instant
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub i64);

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.0
    }
}

#[allow(clippy::cast_possible_truncation)]
fn system_time_millis(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(e) => -(e.duration().as_millis() as i64),
    }
}

/// Any value the normalizer accepts
#[derive(Debug, Clone, Copy)]
pub enum TimestampInput<'a> {
    /// Field missing entirely
    Absent,
    /// Dynamic payload value
    Json(&'a Value),
    /// Native UTC instant
    Instant(DateTime<Utc>),
    /// Native system time
    System(SystemTime),
}

impl<'a> From<&'a Value> for TimestampInput<'a> {
    fn from(v: &'a Value) -> Self {
        Self::Json(v)
    }
}

impl<'a> From<Option<&'a Value>> for TimestampInput<'a> {
    fn from(v: Option<&'a Value>) -> Self {
        v.map_or(Self::Absent, Self::Json)
    }
}

impl From<DateTime<Utc>> for TimestampInput<'_> {
    fn from(dt: DateTime<Utc>) -> Self {
        Self::Instant(dt)
    }
}

impl From<SystemTime> for TimestampInput<'_> {
    fn from(t: SystemTime) -> Self {
        Self::System(t)
    }
}

/// Normalizer with an injectable clock
#[derive(Debug, Clone, Copy, Default)]
pub struct TimestampNormalizer<C: Clock = SystemClock> {
    clock: C,
}

impl TimestampNormalizer<SystemClock> {
    /// Normalizer backed by the wall clock
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self { clock: SystemClock }
    }
}

impl<C: Clock> TimestampNormalizer<C> {
    /// Normalizer backed by a custom clock
    #[inline]
    #[must_use]
    pub fn with_clock(clock: C) -> Self {
        Self { clock }
    }

    /// Normalize any supported encoding
    #[must_use]
    pub fn normalize<'a>(&self, input: impl Into<TimestampInput<'a>>) -> CanonicalTimestamp {
        let millis = match input.into() {
            TimestampInput::Absent => None,
            TimestampInput::Json(value) => from_json(value),
            TimestampInput::Instant(dt) => Some(dt.timestamp_millis()),
            TimestampInput::System(t) => Some(system_time_millis(t)),
        };

        CanonicalTimestamp(millis.unwrap_or_else(|| self.clock.now_millis()))
    }
}

/// Normalize a dynamic value against the wall clock
#[must_use]
pub fn normalize(value: &Value) -> CanonicalTimestamp {
    TimestampNormalizer::new().normalize(value)
}

fn from_json(value: &Value) -> Option<i64> {
    match value {
        Value::Null => None,
        Value::Object(map) => {
            let seconds = map.get("seconds").or_else(|| map.get("_seconds"))?;
            let seconds = number_of(seconds)?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(number_of)
                .unwrap_or(0.0);
            Some(float_millis(seconds * 1000.0 + (nanos / 1_000_000.0).trunc()))
        }
        Value::String(text) => parse_text(text),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(if i.abs() < SECONDS_THRESHOLD {
                    i.saturating_mul(1000)
                } else {
                    i
                })
            } else {
                let f = n.as_f64()?;
                #[allow(clippy::cast_precision_loss)]
                let threshold = SECONDS_THRESHOLD as f64;
                Some(if f.abs() < threshold {
                    float_millis(f * 1000.0)
                } else {
                    float_millis(f)
                })
            }
        }
        Value::Bool(_) | Value::Array(_) => None,
    }
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn float_millis(f: f64) -> i64 {
    f.round() as i64
}

const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

fn parse_text(text: &str) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }

    // postgres text output, e.g. "2023-11-14 22:13:20.5+00"
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.timestamp_millis());
    }

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}

/// Serde adapter for fields that may hold any timestamp encoding
///
/// ```rust,ignore
/// #[derive(Deserialize, Serialize)]
/// struct Report {
///     #[serde(default = "CanonicalTimestamp::now", with = "livesync_event::timestamp::any_encoding")]
///     created_at: CanonicalTimestamp,
/// }
/// ```
pub mod any_encoding {
    use super::{normalize, CanonicalTimestamp, Deserialize, Deserializer, Serializer, Value};
    use serde::ser::SerializeStruct;

    /// Serialize as `{seconds, nanoseconds}`
    ///
    /// Reads back exactly through [`deserialize`]; bare numbers below
    /// [`SECONDS_THRESHOLD`](super::SECONDS_THRESHOLD) would be taken as seconds.
    ///
    /// # Errors
    /// Propagates serializer errors
    pub fn serialize<S: Serializer>(ts: &CanonicalTimestamp, s: S) -> Result<S::Ok, S::Error> {
        let millis = ts.as_millis();
        let mut state = s.serialize_struct("Timestamp", 2)?;
        state.serialize_field("seconds", &millis.div_euclid(1000))?;
        state.serialize_field("nanoseconds", &(millis.rem_euclid(1000) * 1_000_000))?;
        state.end()
    }

    /// Deserialize from any supported encoding
    ///
    /// # Errors
    /// Only fails if the input is not valid for the deserializer itself
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<CanonicalTimestamp, D::Error> {
        let value = Value::deserialize(d)?;
        Ok(normalize(&value))
    }
}
