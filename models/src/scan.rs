//! Decoded scan payloads.
//!
//! A code presented at the gate is either a bare serial number (the sticker
//! printed on a laptop) or the JSON envelope a student shows from their
//! phone:
//!
//! ```json
//! {"sn": ["SN1", "SN2"], "registrationNumber": "CS/042/2023"}
//! ```
//!
//! `reg` and `registrationNo` are accepted as deprecated spellings of
//! `registrationNumber`; new envelopes are always written with the canonical
//! key.

use crate::device::DeviceRecord;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

pub const REGISTRATION_KEY: &str = "registrationNumber";
pub const DEPRECATED_REGISTRATION_KEYS: [&str; 2] = ["reg", "registrationNo"];

/// Identifiers extracted from a decoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScanCandidates {
    /// Never empty.
    pub serial_numbers: Vec<String>,
    pub registration_number: Option<String>,
}

impl ScanCandidates {
    /// Best-effort interpretation of decoded text. Malformed envelopes are not
    /// an error: anything that does not yield serial numbers is treated as a
    /// single serial number.
    pub fn interpret(raw: &str) -> Self {
        let envelope = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(object)) => Some(object),
            _ => None,
        };

        let (serial_numbers, registration_number) = match envelope {
            Some(object) => (
                object.get("sn").map(serials_from).unwrap_or_default(),
                registration_from(&object),
            ),
            None => (Vec::new(), None),
        };

        let serial_numbers = if serial_numbers.is_empty() {
            vec![raw.to_owned()]
        } else {
            serial_numbers
        };

        Self {
            serial_numbers,
            registration_number,
        }
    }
}

fn serials_from(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(serial_from).collect(),
        other => serial_from(other).into_iter().collect(),
    }
}

fn serial_from(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn registration_from(object: &Map<String, Value>) -> Option<String> {
    std::iter::once(REGISTRATION_KEY)
        .chain(DEPRECATED_REGISTRATION_KEYS)
        .filter_map(|key| object.get(key))
        .find_map(|value| match value {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        })
}

/// The envelope a student presents at the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ScanEnvelope {
    pub sn: Vec<String>,
    #[serde(
        rename = "registrationNumber",
        skip_serializing_if = "Option::is_none"
    )]
    pub registration_number: Option<String>,
}

impl ScanEnvelope {
    pub fn for_owner(registration_number: Option<String>, devices: &[DeviceRecord]) -> Self {
        Self {
            sn: devices.iter().map(|d| d.serial_number.clone()).collect(),
            registration_number,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// What a student shows at the gate: the encoded envelope for all their devices.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct GateCode {
    pub payload: String,
    pub device_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScanRequest {
    /// Decoded text exactly as the reader produced it.
    pub payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ScanResolution {
    pub candidates: ScanCandidates,
    /// Empty when nothing matched.
    pub devices: Vec<DeviceRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("5CD1234XYZ")]
    #[case("")]
    #[case("12345678")]
    #[case("[\"A\",\"B\"]")]
    #[case("{not json")]
    fn test_bare_text_is_single_serial(#[case] raw: &str) {
        let candidates = ScanCandidates::interpret(raw);
        assert_eq!(candidates.serial_numbers, vec![raw.to_owned()]);
        assert_eq!(candidates.registration_number, None);
    }

    #[test]
    fn test_envelope_with_serial_list() {
        let candidates =
            ScanCandidates::interpret(r#"{"sn":["A","B"],"registrationNumber":"R1"}"#);
        assert_eq!(candidates.serial_numbers, vec!["A", "B"]);
        assert_eq!(candidates.registration_number.as_deref(), Some("R1"));
    }

    #[test]
    fn test_envelope_scalar_serial_is_wrapped() {
        let candidates = ScanCandidates::interpret(r#"{"sn":"A"}"#);
        assert_eq!(candidates.serial_numbers, vec!["A"]);
        assert_eq!(candidates.registration_number, None);
    }

    #[rstest]
    #[case(r#"{"sn":["A"],"reg":"R2"}"#)]
    #[case(r#"{"sn":["A"],"registrationNo":"R2"}"#)]
    #[case(r#"{"sn":["A"],"registrationNumber":"","reg":"R2"}"#)]
    fn test_deprecated_registration_keys(#[case] raw: &str) {
        let candidates = ScanCandidates::interpret(raw);
        assert_eq!(candidates.registration_number.as_deref(), Some("R2"));
    }

    #[test]
    fn test_canonical_key_wins() {
        let candidates =
            ScanCandidates::interpret(r#"{"sn":["A"],"reg":"OLD","registrationNumber":"NEW"}"#);
        assert_eq!(candidates.registration_number.as_deref(), Some("NEW"));
    }

    #[test]
    fn test_envelope_without_serials_falls_back_to_raw_text() {
        let raw = r#"{"sn":[],"registrationNumber":"R3"}"#;
        let candidates = ScanCandidates::interpret(raw);
        assert_eq!(candidates.serial_numbers, vec![raw.to_owned()]);
        assert_eq!(candidates.registration_number.as_deref(), Some("R3"));
    }

    #[test]
    fn test_numeric_serials_are_kept_as_text() {
        let candidates = ScanCandidates::interpret(r#"{"sn":[1234, "B", null, true]}"#);
        assert_eq!(candidates.serial_numbers, vec!["1234", "B"]);
    }

    #[test]
    fn test_envelope_encodes_canonical_key() {
        let envelope = ScanEnvelope {
            sn: vec!["A".into(), "B".into()],
            registration_number: Some("R1".into()),
        };
        let encoded = envelope.encode().unwrap();
        let candidates = ScanCandidates::interpret(&encoded);
        assert!(encoded.contains("\"registrationNumber\":\"R1\""));
        assert_eq!(candidates.serial_numbers, envelope.sn);
    }
}
