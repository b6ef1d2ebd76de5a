//! Change frames as published by the API: `<topic> <json>`.

use serde_json::Value;

/// Which stream a frame arrived on, taken from its `site-`, `device-` or
/// `sensor-` topic prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Site(i64),
    Device(i64),
    Sensor(i64),
}

impl Stream {
    pub fn parse(topic: &str) -> Option<Self> {
        let (kind, id) = topic.rsplit_once('-')?;
        let id = id.parse().ok()?;
        match kind {
            "site" => Some(Stream::Site(id)),
            "device" => Some(Stream::Device(id)),
            "sensor" => Some(Stream::Sensor(id)),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Stream::Site(_) => "site",
            Stream::Device(_) => "device",
            Stream::Sensor(_) => "sensor",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub stream: Stream,
    pub payload: Value,
}

impl ChangeEvent {
    pub fn parse(frame: &[u8]) -> Option<Self> {
        let frame = std::str::from_utf8(frame).ok()?;
        let (topic, json) = frame.split_once(' ')?;
        Some(Self {
            stream: Stream::parse(topic)?,
            payload: serde_json::from_str(json).ok()?,
        })
    }

    /// The changed resource's own URL, if the payload is a HAL document.
    pub fn href(&self) -> Option<&str> {
        self.payload["_links"]["self"]["href"].as_str()
    }

    /// For reading frames, the value carried.
    pub fn value(&self) -> Option<f64> {
        self.payload.get("value").and_then(Value::as_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reading_frame() {
        let frame = br#"sensor-7 {"_links":{"self":{"href":"http://h/scalar_data/?sensor_id=7"}},"value":23.0}"#;
        let event = ChangeEvent::parse(frame).unwrap();
        assert_eq!(event.stream, Stream::Sensor(7));
        assert_eq!(event.value(), Some(23.0));
        assert_eq!(event.href(), Some("http://h/scalar_data/?sensor_id=7"));
    }

    #[test]
    fn test_rejects_malformed_frames() {
        assert!(ChangeEvent::parse(b"site-1").is_none());
        assert!(ChangeEvent::parse(b"site-x {}").is_none());
        assert!(ChangeEvent::parse(b"room-1 {}").is_none());
        assert!(ChangeEvent::parse(b"site-1 not-json").is_none());
    }

    #[test]
    fn test_stream_kind() {
        assert_eq!(Stream::parse("device-12"), Some(Stream::Device(12)));
        assert_eq!(Stream::Device(12).kind(), "device");
    }
}
