use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type Id = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elevation: Option<f64>,
}

/// A physical installation; the root of the site → device → sensor hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub id: Id,
    pub name: String,
    pub geo_location: Option<GeoLocation>,
    pub raw_zmq_stream: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSite {
    pub name: String,
    pub geo_location: Option<GeoLocation>,
    pub raw_zmq_stream: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: Id,
    pub site_id: Id,
    pub name: String,
    pub active: bool,
    pub description: Option<String>,
    pub building: Option<String>,
    pub floor: Option<String>,
    pub room: Option<String>,
    pub geo_location: Option<GeoLocation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewDevice {
    pub site_id: Id,
    pub name: String,
    pub active: bool,
    pub description: Option<String>,
    pub building: Option<String>,
    pub floor: Option<String>,
    pub room: Option<String>,
    pub geo_location: Option<GeoLocation>,
}

/// Sensor variant, chosen once by the `sensor-type` discriminator at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorType {
    Scalar,
    Presence,
}

impl SensorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorType::Scalar => "scalar",
            SensorType::Presence => "presence",
        }
    }

    /// Value of the `dataType` property for this variant.
    pub fn data_type(&self) -> &'static str {
        match self {
            SensorType::Scalar => "float",
            SensorType::Presence => "presence",
        }
    }
}

impl FromStr for SensorType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scalar" => Ok(SensorType::Scalar),
            "presence" => Ok(SensorType::Presence),
            other => Err(format!(
                "unknown sensor type '{}', expected 'scalar' or 'presence'",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sensor {
    pub id: Id,
    pub device_id: Id,
    pub sensor_type: SensorType,
    pub metric: String,
    pub unit: String,
    pub active: bool,
    pub value: Option<f64>,
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSensor {
    pub device_id: Id,
    pub sensor_type: SensorType,
    pub metric: String,
    pub unit: String,
    pub active: bool,
}

/// One reading, tagged with the full hierarchy it belongs to. Write-once.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalarDataPoint {
    pub site_id: Id,
    pub device_id: Id,
    pub sensor_id: Id,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Width of a standing rollup series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AggWindow {
    Hour,
    Day,
    Week,
}

impl AggWindow {
    pub fn token(&self) -> &'static str {
        match self {
            AggWindow::Hour => "1h",
            AggWindow::Day => "1d",
            AggWindow::Week => "1w",
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            AggWindow::Hour => 3_600,
            AggWindow::Day => 86_400,
            AggWindow::Week => 604_800,
        }
    }

    /// Start of the bucket containing `ts`, aligned to whole windows since the epoch.
    pub fn bucket_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp().div_euclid(self.seconds()) * self.seconds();
        DateTime::from_timestamp(secs, 0).unwrap_or(ts)
    }
}

impl FromStr for AggWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(AggWindow::Hour),
            "1d" => Ok(AggWindow::Day),
            "1w" => Ok(AggWindow::Week),
            other => Err(format!("'{}' is not one of 1h, 1d, 1w", other)),
        }
    }
}

impl fmt::Display for AggWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateBucket {
    pub sensor_id: Id,
    pub window: AggWindow,
    pub timestamp: DateTime<Utc>,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: u64,
    pub sum: f64,
}

/// The entity a metadata record hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OwnerRef {
    Site(Id),
    Device(Id),
    Sensor(Id),
}

impl OwnerRef {
    pub fn kind(&self) -> &'static str {
        match self {
            OwnerRef::Site(_) => "site",
            OwnerRef::Device(_) => "device",
            OwnerRef::Sensor(_) => "sensor",
        }
    }

    pub fn id(&self) -> Id {
        match *self {
            OwnerRef::Site(id) | OwnerRef::Device(id) | OwnerRef::Sensor(id) => id,
        }
    }

    pub fn from_parts(kind: &str, id: Id) -> Option<Self> {
        match kind {
            "site" => Some(OwnerRef::Site(id)),
            "device" => Some(OwnerRef::Device(id)),
            "sensor" => Some(OwnerRef::Sensor(id)),
            _ => None,
        }
    }
}

/// Append-only key/value annotation. There is no update path for it.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub id: Id,
    pub owner: OwnerRef,
    pub key: String,
    pub value: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewMetadata {
    pub owner: OwnerRef,
    pub key: String,
    pub value: String,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_bucket_start_aligns_to_epoch_multiples() {
        let ts = Utc.with_ymd_and_hms(2013, 1, 1, 5, 42, 17).unwrap();
        assert_eq!(
            AggWindow::Hour.bucket_start(ts),
            Utc.with_ymd_and_hms(2013, 1, 1, 5, 0, 0).unwrap()
        );
        assert_eq!(
            AggWindow::Day.bucket_start(ts),
            Utc.with_ymd_and_hms(2013, 1, 1, 0, 0, 0).unwrap()
        );
        // 1970-01-01 was a Thursday, so weekly buckets start on Thursdays
        assert_eq!(
            AggWindow::Week.bucket_start(ts),
            Utc.with_ymd_and_hms(2012, 12, 27, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_agg_window_tokens() {
        assert_eq!("1d".parse::<AggWindow>(), Ok(AggWindow::Day));
        assert!("1s".parse::<AggWindow>().is_err());
        assert!("".parse::<AggWindow>().is_err());
    }

    #[test]
    fn test_sensor_type_data_types() {
        assert_eq!(SensorType::Scalar.data_type(), "float");
        assert_eq!(
            "presence".parse::<SensorType>().unwrap().data_type(),
            "presence"
        );
        assert!("thermal".parse::<SensorType>().is_err());
    }
}
