//! Lenient numeric deserializers.
//!
//! The exchange encodes prices and sizes as JSON strings in some payloads
//! and as plain numbers in others. Use with `#[serde(deserialize_with)]`.

use serde::de::{self, Deserializer};
use serde::Deserialize;

#[derive(Deserialize)]
#[serde(untagged)]
enum NumberOrString {
    Int(i64),
    Float(f64),
    Str(String),
}

/// Accept `1.5`, `"1.5"` or `2`.
pub fn f64_lenient<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Int(v) => Ok(v as f64),
        NumberOrString::Float(v) => Ok(v),
        NumberOrString::Str(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|e| de::Error::custom(format!("invalid number {s:?}: {e}"))),
    }
}

/// Accept `1700000000000` or `"1700000000000"`. Fractional values are truncated.
pub fn i64_lenient<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match NumberOrString::deserialize(deserializer)? {
        NumberOrString::Int(v) => Ok(v),
        NumberOrString::Float(v) if v.is_finite() => Ok(v as i64),
        NumberOrString::Float(v) => Err(de::Error::custom(format!("invalid timestamp {v}"))),
        NumberOrString::Str(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| de::Error::custom(format!("invalid integer {s:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Sample {
        #[serde(deserialize_with = "f64_lenient")]
        px: f64,
        #[serde(deserialize_with = "i64_lenient")]
        t: i64,
    }

    #[test]
    fn test_accepts_strings_and_numbers() {
        let a: Sample = serde_json::from_str(r#"{"px": "8.51", "t": "1700000000000"}"#).unwrap();
        let b: Sample = serde_json::from_str(r#"{"px": 8.51, "t": 1700000000000}"#).unwrap();
        assert_eq!(a.px, b.px);
        assert_eq!(a.t, b.t);

        let c: Sample = serde_json::from_str(r#"{"px": 9, "t": 1.0}"#).unwrap();
        assert_eq!(c.px, 9.0);
        assert_eq!(c.t, 1);
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(serde_json::from_str::<Sample>(r#"{"px": "abc", "t": 1}"#).is_err());
        assert!(serde_json::from_str::<Sample>(r#"{"px": 1, "t": "soon"}"#).is_err());
    }
}
