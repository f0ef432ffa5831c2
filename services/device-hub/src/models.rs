use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::HubError;

/// Query parameters supplied on the `/device` upgrade request.
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeParams {
    pub device_id: Option<String>,
    pub device_type: Option<String>,
}

/// A device report: always a JSON object, stored verbatim.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceData(Map<String, Value>);

impl DeviceData {
    pub fn parse(raw: &str) -> Result<Self, HubError> {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::try_from(value),
            Err(err) => Err(HubError::MalformedFrame(err.to_string())),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl TryFrom<Value> for DeviceData {
    type Error = HubError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(HubError::MalformedFrame(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl From<Map<String, Value>> for DeviceData {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Last known state of one device.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeviceState {
    pub device_id: String,
    pub device_type: String,
    pub last_seen: DateTime<Utc>,
    pub data: DeviceData,
}

/// Message pushed to a device. `type` is the discriminator every shape carries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl OutboundMessage {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn wallpaper_update(url: impl Into<String>) -> Self {
        Self::new("wallpaper_update").with_field("url", url.into())
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.kind.trim().is_empty() {
            return Err("type must be a non-empty string");
        }
        if self.fields.contains_key("type") {
            return Err("type must not be repeated");
        }
        Ok(())
    }
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct DeviceStatus {
    pub device_id: String,
    pub device_type: String,
    pub last_seen: DateTime<Utc>,
    pub connected: bool,
    pub data: DeviceData,
}

#[derive(Serialize)]
pub struct DeviceListResponse {
    pub devices: Vec<DeviceStatus>,
    pub connected: usize,
}

#[derive(Deserialize)]
pub struct ChatRequest {
    pub data: Option<String>,
}

#[derive(Serialize)]
pub struct ChatResponse {
    pub data: String,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn device_data_accepts_only_objects() {
        let data = DeviceData::parse(r#"{"battery": 80, "new_wallpaper": "a.png"}"#).unwrap();
        assert_eq!(data.get_str("new_wallpaper"), Some("a.png"));
        assert_eq!(data.len(), 2);

        assert!(matches!(
            DeviceData::parse("[1, 2]"),
            Err(HubError::MalformedFrame(_))
        ));
        assert!(matches!(
            DeviceData::parse("{not json"),
            Err(HubError::MalformedFrame(_))
        ));
        let err = DeviceData::parse("42").unwrap_err();
        assert_eq!(err.to_string(), "malformed frame: expected a JSON object, got a number");
    }

    #[test]
    fn outbound_message_serializes_with_type_discriminator() {
        let message = OutboundMessage::wallpaper_update("http://x/y.png");
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"type": "wallpaper_update", "url": "http://x/y.png"})
        );
    }

    #[test]
    fn outbound_message_from_json_keeps_extra_fields() {
        let message: OutboundMessage =
            serde_json::from_value(json!({"type": "reboot", "delay": 5})).unwrap();
        assert_eq!(message.kind, "reboot");
        assert_eq!(message.fields.get("delay"), Some(&json!(5)));
        assert!(message.validate().is_ok());

        assert!(OutboundMessage::new("  ").validate().is_err());
        assert!(serde_json::from_value::<OutboundMessage>(json!({"url": "x"})).is_err());
    }
}
