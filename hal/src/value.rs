//! Sensor values as the host reports them

use serde::{Deserialize, Serialize};
use std::fmt;

/// Runtime value of a host sensor variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SensorValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl SensorValue {
    /// Truthiness as used by tamper rules and the arming side.
    ///
    /// Numbers are true when non-zero, text when it reads as a true literal.
    pub fn is_truthy(&self) -> bool {
        match self {
            SensorValue::Bool(b) => *b,
            SensorValue::Number(n) => *n != 0.0,
            SensorValue::Text(s) => parse_truthy(s),
        }
    }

    /// Coerce to a float, `None` for text that is not numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SensorValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            SensorValue::Number(n) => Some(*n),
            SensorValue::Text(s) => s.trim().parse::<f64>().ok(),
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            SensorValue::Bool(_) => "bool",
            SensorValue::Number(_) => "number",
            SensorValue::Text(_) => "string",
        }
    }

    /// Parse a loosely typed literal, e.g. from a command line
    pub fn parse_literal(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => return SensorValue::Bool(true),
            "false" => return SensorValue::Bool(false),
            _ => {}
        }
        match trimmed.parse::<f64>() {
            Ok(n) => SensorValue::Number(n),
            Err(_) => SensorValue::Text(trimmed.to_string()),
        }
    }

    /// JSON form used for `value_raw` in payloads
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            SensorValue::Bool(b) => serde_json::Value::Bool(*b),
            SensorValue::Number(n) => {
                if n.fract() == 0.0 && n.abs() < i64::MAX as f64 {
                    serde_json::Value::from(*n as i64)
                } else {
                    serde_json::Number::from_f64(*n)
                        .map(serde_json::Value::Number)
                        .unwrap_or(serde_json::Value::Null)
                }
            }
            SensorValue::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// Literals that count as `true`
pub fn parse_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "on" | "yes"
    )
}

impl fmt::Display for SensorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SensorValue::Bool(true) => write!(f, "true"),
            SensorValue::Bool(false) => write!(f, "false"),
            SensorValue::Number(n) => write!(f, "{}", n),
            SensorValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for SensorValue {
    fn from(val: bool) -> Self {
        SensorValue::Bool(val)
    }
}

impl From<f64> for SensorValue {
    fn from(val: f64) -> Self {
        SensorValue::Number(val)
    }
}

impl From<i64> for SensorValue {
    fn from(val: i64) -> Self {
        SensorValue::Number(val as f64)
    }
}

impl From<&str> for SensorValue {
    fn from(val: &str) -> Self {
        SensorValue::Text(val.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(SensorValue::Bool(true).is_truthy());
        assert!(SensorValue::Number(1.0).is_truthy());
        assert!(!SensorValue::Number(0.0).is_truthy());
        assert!(SensorValue::from("TRUE").is_truthy());
        assert!(SensorValue::from("1").is_truthy());
        assert!(!SensorValue::from("open").is_truthy());
    }

    #[test]
    fn untagged_decoding() {
        let values: Vec<SensorValue> = serde_json::from_str(r#"[true, 3, 2.5, "x"]"#).unwrap();
        assert_eq!(
            values,
            vec![
                SensorValue::Bool(true),
                SensorValue::Number(3.0),
                SensorValue::Number(2.5),
                SensorValue::Text("x".to_string()),
            ]
        );
    }

    #[test]
    fn literal_parsing() {
        assert_eq!(SensorValue::parse_literal("False"), SensorValue::Bool(false));
        assert_eq!(SensorValue::parse_literal(" 21.5 "), SensorValue::Number(21.5));
        assert_eq!(SensorValue::parse_literal("armed"), SensorValue::from("armed"));
    }

    #[test]
    fn json_keeps_integers_integral() {
        assert_eq!(SensorValue::Number(4.0).to_json(), serde_json::json!(4));
        assert_eq!(SensorValue::Number(4.5).to_json(), serde_json::json!(4.5));
    }
}
