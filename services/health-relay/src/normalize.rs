use std::collections::HashMap;

use serde_json::value::RawValue;
use thiserror::Error;

use crate::types::Reading;

#[derive(Error, Debug, PartialEq)]
pub enum NormalizeError {
    #[error("undecodable payload ({len} bytes): {reason}")]
    Decode { len: usize, reason: String },
    #[error("invalid field `{field}`: {reason}")]
    Validation { field: &'static str, reason: String },
}

/// Parse a raw device payload into a [`Reading`].
///
/// `heart_rate`, `temp` and `humidity` are rounded to one decimal place,
/// half away from zero. `SpO2` is passed through as coerced. Any field that
/// is missing or not a finite number, before or after rounding, rejects the
/// whole payload.
pub fn normalize(raw: &[u8]) -> Result<Reading, NormalizeError> {
    // top level must be a JSON object; field values stay unparsed so an
    // out-of-range number is reported against its field
    let payload: HashMap<String, Box<RawValue>> =
        serde_json::from_slice(raw).map_err(|e| NormalizeError::Decode {
            len: raw.len(),
            reason: e.to_string(),
        })?;
    let field = |name: &str| payload.get(name).map(|v| v.get());

    let heart_rate = coerce("heart_rate", field("heart_rate"))?;
    let spo2 = coerce("SpO2", field("SpO2"))?;
    let temperature = coerce("temp", field("temp"))?;
    let humidity = coerce("humidity", field("humidity"))?;

    Ok(Reading {
        heart_rate: round_tenth("heart_rate", heart_rate)?,
        spo2,
        temperature: round_tenth("temp", temperature)?,
        humidity: round_tenth("humidity", humidity)?,
    })
}

fn coerce(field: &'static str, raw: Option<&str>) -> Result<f64, NormalizeError> {
    let invalid = |reason: String| NormalizeError::Validation { field, reason };
    let text = raw.map(str::trim).unwrap_or("null");
    let number = match text.as_bytes().first() {
        _ if text == "null" => return Err(invalid("missing".into())),
        _ if text == "true" || text == "false" => return Err(invalid("unexpected boolean".into())),
        Some(b'[') => return Err(invalid("unexpected array".into())),
        Some(b'{') => return Err(invalid("unexpected object".into())),
        Some(b'"') => {
            let s: String = serde_json::from_str(text).map_err(|e| invalid(e.to_string()))?;
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Err(invalid("empty string".into()));
            }
            trimmed
                .parse::<f64>()
                .map_err(|_| invalid(format!("{s:?} is not numeric")))?
        }
        // JSON number grammar is a subset of what f64 parsing accepts
        _ => text
            .parse::<f64>()
            .map_err(|_| invalid(format!("{text} is not numeric")))?,
    };
    if !number.is_finite() {
        return Err(invalid(format!("{text} is out of range")));
    }
    Ok(number)
}

fn round_tenth(field: &'static str, v: f64) -> Result<f64, NormalizeError> {
    let rounded = (v * 10.0).round() / 10.0;
    if !rounded.is_finite() {
        return Err(NormalizeError::Validation {
            field,
            reason: format!("{v} is out of range"),
        });
    }
    Ok(rounded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_scenario_payload() {
        let raw = br#"{"heart_rate": 72.34, "SpO2": 98, "temp": 36.55, "humidity": 55.02}"#;
        let reading = normalize(raw).unwrap();
        assert_eq!(
            reading,
            Reading {
                heart_rate: 72.3,
                spo2: 98.0,
                temperature: 36.6,
                humidity: 55.0,
            }
        );
    }

    #[test]
    fn half_tenths_round_away_from_zero() {
        let raw = br#"{"heart_rate": 80.05, "SpO2": 97.55, "temp": 36.45, "humidity": -12.25}"#;
        let reading = normalize(raw).unwrap();
        assert_eq!(reading.heart_rate, 80.1);
        assert_eq!(reading.temperature, 36.5);
        assert_eq!(reading.humidity, -12.3);
        // SpO2 is never rounded
        assert_eq!(reading.spo2, 97.55);
    }

    #[test]
    fn string_values_coerce_like_numbers() {
        let as_numbers =
            normalize(br#"{"heart_rate": 72.34, "SpO2": 98, "temp": 36.55, "humidity": 55.02}"#);
        let as_strings = normalize(
            br#"{"heart_rate": "72.34", "SpO2": " 98 ", "temp": "36.55", "humidity": "55.02"}"#,
        );
        assert_eq!(as_numbers, as_strings);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let raw = br#"{"heart_rate": 60, "SpO2": 99, "temp": 36, "humidity": 40, "rssi": -70}"#;
        assert!(normalize(raw).is_ok());
    }

    #[test]
    fn missing_field_names_the_field() {
        let raw = br#"{"heart_rate": 72.34, "SpO2": 98, "temp": 36.55}"#;
        match normalize(raw) {
            Err(NormalizeError::Validation { field, .. }) => assert_eq!(field, "humidity"),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn null_and_non_numeric_fields_are_rejected() {
        let cases: [(&[u8], &str); 5] = [
            (br#"{"heart_rate": null, "SpO2": 98, "temp": 36, "humidity": 50}"#, "heart_rate"),
            (br#"{"heart_rate": 70, "SpO2": "n/a", "temp": 36, "humidity": 50}"#, "SpO2"),
            (br#"{"heart_rate": 70, "SpO2": 98, "temp": true, "humidity": 50}"#, "temp"),
            (br#"{"heart_rate": 70, "SpO2": 98, "temp": 36, "humidity": ""}"#, "humidity"),
            (br#"{"heart_rate": "NaN", "SpO2": 98, "temp": 36, "humidity": 50}"#, "heart_rate"),
        ];
        for (raw, expected) in cases {
            match normalize(raw) {
                Err(NormalizeError::Validation { field, .. }) => assert_eq!(field, expected),
                other => panic!("expected validation error for {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn infinite_strings_are_rejected() {
        let raw = br#"{"heart_rate": 70, "SpO2": 98, "temp": "inf", "humidity": 50}"#;
        assert!(matches!(
            normalize(raw),
            Err(NormalizeError::Validation { field: "temp", .. })
        ));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let raw = b"{\"heart_rate\": 72,";
        match normalize(raw) {
            Err(NormalizeError::Decode { len, .. }) => assert_eq!(len, raw.len()),
            other => panic!("expected decode error, got {other:?}"),
        }
    }

    #[test]
    fn non_object_payload_is_a_decode_error() {
        assert!(matches!(
            normalize(b"[72, 98, 36, 55]"),
            Err(NormalizeError::Decode { .. })
        ));
        assert!(matches!(normalize(b""), Err(NormalizeError::Decode { .. })));
    }

    #[test]
    fn huge_values_overflowing_on_rounding_are_rejected() {
        let cases: [(&[u8], &str); 3] = [
            (br#"{"heart_rate": 1e308, "SpO2": 98, "temp": 36.5, "humidity": 50}"#, "heart_rate"),
            (br#"{"heart_rate": 70, "SpO2": 98, "temp": "1e308", "humidity": 50}"#, "temp"),
            (br#"{"heart_rate": 70, "SpO2": 98, "temp": 36.5, "humidity": -1e308}"#, "humidity"),
        ];
        for (raw, expected) in cases {
            match normalize(raw) {
                Err(NormalizeError::Validation { field, reason }) => {
                    assert_eq!(field, expected);
                    assert!(reason.contains("out of range"), "{reason}");
                }
                other => panic!("expected validation error for {expected}, got {other:?}"),
            }
        }
    }

    #[test]
    fn unrounded_spo2_keeps_large_finite_values() {
        let raw = br#"{"heart_rate": 70, "SpO2": 1e308, "temp": 36.5, "humidity": 50}"#;
        assert_eq!(normalize(raw).unwrap().spo2, 1e308);
    }

    #[test]
    fn number_beyond_f64_range_names_its_field() {
        let raw = br#"{"heart_rate": 1e400, "SpO2": 98, "temp": 36.5, "humidity": 50}"#;
        match normalize(raw) {
            Err(NormalizeError::Validation { field, reason }) => {
                assert_eq!(field, "heart_rate");
                assert!(reason.contains("1e400"), "{reason}");
            }
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn nested_values_are_rejected() {
        let raw = br#"{"heart_rate": [72], "SpO2": 98, "temp": 36.5, "humidity": 50}"#;
        assert!(matches!(
            normalize(raw),
            Err(NormalizeError::Validation { field: "heart_rate", .. })
        ));
    }
}
