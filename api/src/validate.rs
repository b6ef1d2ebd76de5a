//! Request-body and query-string validation.
//!
//! Everything submitted by a client passes through here before it reaches a
//! store. Text-encoded numbers are coerced so that stored records and the
//! representations echoed back always carry real numeric types.

use chrono::{DateTime, FixedOffset, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};

use crate::errors::{Error, Result};
use crate::model::GeoLocation;

/// Parses a request body as JSON. An empty or unparsable body is a client
/// error, never a fault.
pub fn parse_body(body: &[u8]) -> Result<Value> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(Error::MalformedRequestBody("request body is empty".to_string()));
    }
    serde_json::from_slice(body).map_err(|e| Error::MalformedRequestBody(e.to_string()))
}

/// Splits a body that may hold either one object or a list of objects.
pub fn one_or_many(value: Value) -> (Vec<Value>, bool) {
    match value {
        Value::Array(items) => (items, true),
        other => (vec![other], false),
    }
}

/// Typed, coercing view over the fields of one JSON object.
pub struct Fields<'a> {
    prefix: String,
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    pub fn new(value: &'a Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self {
                prefix: String::new(),
                map,
            }),
            _ => Err(Error::MalformedRequestBody(
                "expected a JSON object".to_string(),
            )),
        }
    }

    fn path(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    fn get(&self, name: &str) -> Option<&'a Value> {
        self.map.get(name).filter(|v| !v.is_null())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn string(&self, name: &str) -> Result<Option<String>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(_) => Err(Error::validation(self.path(name), "expected a string")),
        }
    }

    /// A required string with `minLength: 1`.
    pub fn required_string(&self, name: &str) -> Result<String> {
        let value = self
            .string(name)?
            .ok_or_else(|| Error::validation(self.path(name), "is required"))?;
        if value.trim().is_empty() {
            return Err(Error::validation(self.path(name), "must not be empty"));
        }
        Ok(value)
    }

    pub fn uri(&self, name: &str) -> Result<Option<String>> {
        match self.string(name)? {
            None => Ok(None),
            Some(s) if s.is_empty() => Ok(None),
            Some(s) if looks_like_uri(&s) => Ok(Some(s)),
            Some(_) => Err(Error::validation(self.path(name), "expected a URI")),
        }
    }

    pub fn number(&self, name: &str) -> Result<Option<f64>> {
        let parsed = match self.get(name) {
            None => return Ok(None),
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
            Some(_) => None,
        };
        match parsed {
            Some(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(Error::validation(self.path(name), "expected a number")),
        }
    }

    pub fn required_number(&self, name: &str) -> Result<f64> {
        self.number(name)?
            .ok_or_else(|| Error::validation(self.path(name), "is required"))
    }

    pub fn boolean(&self, name: &str) -> Result<Option<bool>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Some(true)),
                "false" => Ok(Some(false)),
                _ => Err(Error::validation(self.path(name), "expected a boolean")),
            },
            Some(_) => Err(Error::validation(self.path(name), "expected a boolean")),
        }
    }

    pub fn object(&self, name: &str) -> Result<Option<Fields<'a>>> {
        match self.get(name) {
            None => Ok(None),
            Some(Value::Object(map)) => Ok(Some(Fields {
                prefix: format!("{}.", self.path(name)),
                map,
            })),
            Some(_) => Err(Error::validation(self.path(name), "expected an object")),
        }
    }

    pub fn geo_location(&self) -> Result<Option<GeoLocation>> {
        let Some(geo) = self.object("geoLocation")? else {
            return Ok(None);
        };
        // An edit form with no location filled in submits `{}`.
        if geo.map.values().all(Value::is_null) {
            return Ok(None);
        }
        Ok(Some(GeoLocation {
            latitude: geo.required_number("latitude")?,
            longitude: geo.required_number("longitude")?,
            elevation: geo.number("elevation")?,
        }))
    }

    pub fn timestamp(&self, name: &str, tz: Tz) -> Result<Option<DateTime<Utc>>> {
        match self.string(name)? {
            None => Ok(None),
            Some(raw) => parse_timestamp(&raw, tz)
                .map(Some)
                .map_err(|e| match e {
                    Error::ValidationFailed { reason, .. } => Error::validation(self.path(name), reason),
                    other => other,
                }),
        }
    }
}

fn looks_like_uri(s: &str) -> bool {
    match s.split_once("://") {
        Some((scheme, rest)) => {
            !scheme.is_empty()
                && !rest.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

/// Parses an ISO-8601 timestamp. Timestamps with an offset are taken as-is;
/// naive ones are interpreted in `tz` and must map to exactly one instant.
pub fn parse_timestamp(raw: &str, tz: Tz) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = raw.parse::<DateTime<FixedOffset>>() {
        return Ok(dt.with_timezone(&Utc));
    }
    let naive = raw
        .parse::<NaiveDateTime>()
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|_| Error::validation("timestamp", format!("'{}' is not an ISO-8601 timestamp", raw)))?;

    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Ok(dt.with_timezone(&Utc)),
        LocalResult::Ambiguous(_, _) => Err(Error::AmbiguousTimestamp(format!(
            "'{}' occurs twice in {}; include a UTC offset",
            raw,
            tz.name()
        ))),
        LocalResult::None => Err(Error::validation(
            "timestamp",
            format!("'{}' does not exist in {}", raw, tz.name()),
        )),
    }
}

/// Parses a `timestamp__gte` / `timestamp__lt` filter: epoch seconds or RFC 3339.
pub fn parse_range_param(name: &str, raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(secs) = raw.parse::<f64>() {
        if !secs.is_finite() {
            return Err(Error::query(name, format!("'{}' is not a finite number", raw)));
        }
        let whole = secs.floor();
        let nanos = (((secs - whole) * 1e9).round() as u32).min(999_999_999);
        return DateTime::from_timestamp(whole as i64, nanos)
            .ok_or_else(|| Error::query(name, format!("'{}' is out of range", raw)));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::query(name, format!("'{}' is not a timestamp", raw)))
}
