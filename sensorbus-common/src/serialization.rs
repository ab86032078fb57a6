//! Payload encoding for published telemetry.
//!
//! Telemetry points go out as JSON or CBOR, chosen per bridge. Subscribers
//! tell the two apart from the first byte, since every JSON payload the
//! bridges publish is an object.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{Error, Result};

/// Wire format of telemetry payloads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Json,

    /// Compact binary, for slow uplinks from the bus site.
    Cbor,
}

impl Format {
    /// Guess the format of a received payload.
    pub fn detect(payload: &[u8]) -> Format {
        match payload.first() {
            Some(b'{' | b'[') => Format::Json,
            _ => Format::Cbor,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Format::Json => f.write_str("json"),
            Format::Cbor => f.write_str("cbor"),
        }
    }
}

/// Encode `value` as a `format` payload.
pub fn encode<T: Serialize>(value: &T, format: Format) -> Result<Vec<u8>> {
    let encoded: std::result::Result<Vec<u8>, String> = match format {
        Format::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
        Format::Cbor => {
            let mut buf = Vec::new();
            ciborium::into_writer(value, &mut buf)
                .map(|()| buf)
                .map_err(|e| e.to_string())
        }
    };
    encoded.map_err(|message| Error::Encode { format, message })
}

/// Decode a `format` payload.
pub fn decode<T: DeserializeOwned>(payload: &[u8], format: Format) -> Result<T> {
    let decoded: std::result::Result<T, String> = match format {
        Format::Json => serde_json::from_slice(payload).map_err(|e| e.to_string()),
        Format::Cbor => ciborium::from_reader(payload).map_err(|e| e.to_string()),
    };
    decoded.map_err(|message| Error::Decode { format, message })
}

/// Decode a payload of either format.
pub fn decode_auto<T: DeserializeOwned>(payload: &[u8]) -> Result<T> {
    decode(payload, Format::detect(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Protocol, Quality, TelemetryPoint, TelemetryValue};

    fn accumulator_point() -> TelemetryPoint {
        TelemetryPoint::new(
            "flow1",
            Protocol::Modbus,
            "pos_flow_acc",
            TelemetryValue::Gauge(12345.0),
        )
        .with_quality(Quality::Cached)
        .with_label("unit", "m3")
    }

    #[test]
    fn test_cbor_preserves_cached_point() {
        let encoded = encode(&accumulator_point(), Format::Cbor).unwrap();
        let decoded: TelemetryPoint = decode(&encoded, Format::Cbor).unwrap();

        assert_eq!(decoded.source, "flow1");
        assert_eq!(decoded.metric, "pos_flow_acc");
        assert_eq!(decoded.value, TelemetryValue::Gauge(12345.0));
        assert_eq!(decoded.quality, Quality::Cached);
        assert_eq!(decoded.labels.get("unit"), Some(&"m3".to_string()));
    }

    #[test]
    fn test_cbor_is_smaller() {
        let point = accumulator_point();
        let json = encode(&point, Format::Json).unwrap();
        let cbor = encode(&point, Format::Cbor).unwrap();
        assert!(cbor.len() < json.len(), "CBOR should be smaller than JSON");
    }

    #[test]
    fn test_detect() {
        let point = accumulator_point();
        assert_eq!(Format::detect(&encode(&point, Format::Json).unwrap()), Format::Json);
        assert_eq!(Format::detect(&encode(&point, Format::Cbor).unwrap()), Format::Cbor);
        assert_eq!(Format::detect(b"[1, 2, 3]"), Format::Json);
        assert_eq!(Format::detect(b""), Format::Cbor);
    }

    #[test]
    fn test_decode_auto_either_format() {
        let point = accumulator_point();
        for format in [Format::Json, Format::Cbor] {
            let decoded: TelemetryPoint = decode_auto(&encode(&point, format).unwrap()).unwrap();
            assert_eq!(decoded.metric, point.metric);
        }
    }

    #[test]
    fn test_decode_error_names_format() {
        let err = decode::<TelemetryPoint>(b"{\"source\":", Format::Json).unwrap_err();
        assert!(matches!(err, Error::Decode { format: Format::Json, .. }));
        assert!(err.to_string().starts_with("Failed to decode json payload"));
    }
}
