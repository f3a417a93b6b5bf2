//! Accessor helpers over loosely-typed inbound envelopes.
//!
//! Devices and clients are not authenticated and their JSON is not
//! schema-checked by the transport layer, so inbound frames are carried as
//! `serde_json::Value` rather than deserialized straight into Rust structs.
//! Pipelines must go through these helpers instead of indexing the value
//! directly, so that a missing or wrongly-typed field is always a `None`
//! rather than a panic.

use serde_json::{Map, Value};

/// A parsed JSON object with typed field accessors.
///
/// Wraps the `Map` backing a JSON object (never an array/scalar at the top
/// level — callers construct this only after confirming the frame decoded
/// to an object).
#[derive(Debug, Clone)]
pub struct Envelope {
    fields: Map<String, Value>,
}

impl Envelope {
    /// Parses a raw WebSocket text frame into an envelope, if it is a JSON object.
    pub fn parse(text: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(text).ok()? {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self { fields }),
            _ => None,
        }
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }

    pub fn as_value(&self) -> Value {
        Value::Object(self.fields.clone())
    }

    /// The `type` discriminator, if present and a string.
    pub fn message_type(&self) -> Option<&str> {
        self.str_field("type")
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }

    pub fn u64_field(&self, key: &str) -> Option<u64> {
        self.fields.get(key).and_then(Value::as_u64)
    }

    pub fn i64_field(&self, key: &str) -> Option<i64> {
        self.fields.get(key).and_then(Value::as_i64)
    }

    pub fn f64_field(&self, key: &str) -> Option<f64> {
        self.fields.get(key).and_then(Value::as_f64)
    }

    pub fn object_field(&self, key: &str) -> Option<&Map<String, Value>> {
        self.fields.get(key).and_then(Value::as_object)
    }

    pub fn has_field(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.remove(key)
    }
}

/// Validates a `telemetry` envelope per the wire contract: `type == "telemetry"`,
/// `subtype`/`sequence`/`timestamp` all present, and — if `data.gps` exists —
/// that it is an object carrying both `latitude` and `longitude`.
pub fn is_valid_telemetry(env: &Envelope) -> bool {
    if env.message_type() != Some("telemetry") {
        return false;
    }
    if !env.has_field("subtype") || !env.has_field("sequence") || !env.has_field("timestamp") {
        return false;
    }
    if let Some(data) = env.object_field("data") {
        if let Some(gps) = data.get("gps") {
            let Some(gps) = gps.as_object() else {
                return false;
            };
            if !gps.contains_key("latitude") || !gps.contains_key("longitude") {
                return false;
            }
        }
    }
    true
}

/// Validates a `webrtc` envelope per-subtype: `offer`/`answer` require `sdp`,
/// `ice_candidate` requires `candidate`; other subtypes have no extra
/// requirement beyond carrying a non-empty `subtype`.
pub fn is_valid_webrtc(env: &Envelope) -> bool {
    if env.message_type() != Some("webrtc") {
        return false;
    }
    let Some(subtype) = env.str_field("subtype") else {
        return false;
    };
    match subtype {
        "offer" | "answer" => env.has_field("sdp"),
        "ice_candidate" => env.has_field("candidate"),
        _ => true,
    }
}

/// Best-effort detection of the legacy GPS-only encoder shim: a message with
/// no `type` field but a `position` object carrying `latitude`/`longitude`,
/// or one of the bare top-level keys `gps`/`location`/`coordinates`/
/// `latitude`/`longitude`.
pub fn looks_like_legacy_telemetry(env: &Envelope) -> bool {
    if env.has_field("type") {
        return false;
    }
    if let Some(position) = env.object_field("position") {
        if position.contains_key("latitude") && position.contains_key("longitude") {
            return true;
        }
    }
    ["gps", "location", "coordinates", "latitude", "longitude"]
        .iter()
        .any(|key| env.has_field(key))
}

/// Synthesizes a standard `telemetry`/`sensor_data` envelope from the legacy
/// `position`-shaped encoding. Only called after [`looks_like_legacy_telemetry`]
/// has confirmed the `position` variant applies.
pub fn synthesize_legacy_position_telemetry(env: &Envelope, now_millis: i64) -> Envelope {
    let position = env
        .object_field("position")
        .expect("caller checked looks_like_legacy_telemetry");
    let mut data = Map::new();
    let mut gps = Map::new();
    if let Some(lat) = position.get("latitude") {
        gps.insert("latitude".to_owned(), lat.clone());
    }
    if let Some(lon) = position.get("longitude") {
        gps.insert("longitude".to_owned(), lon.clone());
    }
    data.insert("gps".to_owned(), Value::Object(gps));

    if let Some(navigation) = env.object_field("navigation") {
        if let Some(heading) = navigation.get("heading") {
            data.insert("heading".to_owned(), heading.clone());
        }
        if let Some(speed) = navigation.get("speed") {
            data.insert("speed".to_owned(), speed.clone());
        }
    }
    if let Some(status) = env.object_field("status") {
        if let Some(battery) = status.get("battery") {
            data.insert("battery".to_owned(), battery.clone());
        }
    }

    let mut fields = Map::new();
    fields.insert("type".to_owned(), Value::String("telemetry".to_owned()));
    fields.insert(
        "subtype".to_owned(),
        Value::String("sensor_data".to_owned()),
    );
    fields.insert(
        "sequence".to_owned(),
        env.get("sequence").cloned().unwrap_or(Value::from(0)),
    );
    fields.insert(
        "timestamp".to_owned(),
        env.get("timestamp").cloned().unwrap_or(Value::from(now_millis)),
    );
    fields.insert("data".to_owned(), Value::Object(data));
    Envelope { fields }
}

/// The fallback for a `type`-less message carrying a bare GPS-ish key
/// (`gps`/`location`/`coordinates`/`latitude`/`longitude`) directly at the
/// top level rather than nested under `position`: stamp `type`/`subtype` in
/// place and let the telemetry pipeline take it from there.
pub fn stamp_as_sensor_data(mut env: Envelope) -> Envelope {
    env.insert("type", Value::String("telemetry".to_owned()));
    env.insert("subtype", Value::String("sensor_data".to_owned()));
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_object_and_rejects_non_object() {
        assert!(Envelope::parse(r#"{"type":"ping"}"#).is_some());
        assert!(Envelope::parse(r#"[1,2,3]"#).is_none());
        assert!(Envelope::parse(r#"not json"#).is_none());
    }

    #[test]
    fn validates_telemetry_required_fields() {
        let ok = Envelope::parse(r#"{"type":"telemetry","subtype":"sensor_data","sequence":1,"timestamp":1000}"#).unwrap();
        assert!(is_valid_telemetry(&ok));

        let missing_seq = Envelope::parse(r#"{"type":"telemetry","subtype":"sensor_data","timestamp":1000}"#).unwrap();
        assert!(!is_valid_telemetry(&missing_seq));

        let wrong_type = Envelope::parse(r#"{"type":"command","subtype":"sensor_data","sequence":1,"timestamp":1000}"#).unwrap();
        assert!(!is_valid_telemetry(&wrong_type));
    }

    #[test]
    fn validates_gps_shape_when_present() {
        let good = Envelope::parse(
            r#"{"type":"telemetry","subtype":"sensor_data","sequence":1,"timestamp":1000,"data":{"gps":{"latitude":1.0,"longitude":2.0}}}"#,
        )
        .unwrap();
        assert!(is_valid_telemetry(&good));

        let bad = Envelope::parse(
            r#"{"type":"telemetry","subtype":"sensor_data","sequence":1,"timestamp":1000,"data":{"gps":{"latitude":1.0}}}"#,
        )
        .unwrap();
        assert!(!is_valid_telemetry(&bad));
    }

    #[test]
    fn webrtc_offer_requires_sdp() {
        let missing = Envelope::parse(r#"{"type":"webrtc","subtype":"offer"}"#).unwrap();
        assert!(!is_valid_webrtc(&missing));

        let present = Envelope::parse(r#"{"type":"webrtc","subtype":"offer","sdp":"v=0"}"#).unwrap();
        assert!(is_valid_webrtc(&present));
    }

    #[test]
    fn detects_legacy_position_shim() {
        let env = Envelope::parse(
            r#"{"position":{"latitude":1.0,"longitude":2.0},"navigation":{"heading":90,"speed":3},"status":{"battery":80}}"#,
        )
        .unwrap();
        assert!(looks_like_legacy_telemetry(&env));

        let synthesized = synthesize_legacy_position_telemetry(&env, 5000);
        assert_eq!(synthesized.message_type(), Some("telemetry"));
        assert_eq!(synthesized.str_field("subtype"), Some("sensor_data"));
        let data = synthesized.object_field("data").unwrap();
        assert_eq!(data.get("heading").unwrap().as_i64(), Some(90));
        assert_eq!(data.get("battery").unwrap().as_i64(), Some(80));
    }

    #[test]
    fn bare_gps_keys_trigger_shim_without_position_wrapper() {
        let env = Envelope::parse(r#"{"latitude":1.0,"longitude":2.0}"#).unwrap();
        assert!(looks_like_legacy_telemetry(&env));
    }

    #[test]
    fn typed_message_is_not_treated_as_legacy() {
        let env = Envelope::parse(r#"{"type":"ping"}"#).unwrap();
        assert!(!looks_like_legacy_telemetry(&env));
    }
}
