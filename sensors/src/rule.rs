//! Rule evaluation
//!
//! A rule compares a sensor's current value with a configured literal. The
//! literal is coerced to the runtime type of the sensor value: booleans by
//! truthiness, numbers as floats, everything else as text.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use vigil_hal::{SensorId, SensorValue};

/// Comparison operator
///
/// Parsed leniently from configuration; anything unrecognised becomes
/// [`Operator::Unknown`], which never matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Unknown(String),
}

impl Operator {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "=" | "==" | "eq" => Operator::Eq,
            "!=" | "<>" | "≠" | "ne" => Operator::Ne,
            ">" | "gt" => Operator::Gt,
            "<" | "lt" => Operator::Lt,
            ">=" | "≥" | "ge" => Operator::Ge,
            "<=" | "≤" | "le" => Operator::Le,
            _ => Operator::Unknown(raw.to_string()),
        }
    }

    pub fn symbol(&self) -> &str {
        match self {
            Operator::Eq => "=",
            Operator::Ne => "!=",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Ge => ">=",
            Operator::Le => "<=",
            Operator::Unknown(raw) => raw,
        }
    }

    fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Operator::Eq => ordering == Ordering::Equal,
            Operator::Ne => ordering != Ordering::Equal,
            Operator::Gt => ordering == Ordering::Greater,
            Operator::Lt => ordering == Ordering::Less,
            Operator::Ge => ordering != Ordering::Less,
            Operator::Le => ordering != Ordering::Greater,
            Operator::Unknown(_) => false,
        }
    }
}

impl From<String> for Operator {
    fn from(raw: String) -> Self {
        Operator::parse(&raw)
    }
}

impl From<Operator> for String {
    fn from(op: Operator) -> Self {
        op.symbol().to_string()
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Compare a current value against a target literal.
///
/// Never fails: incomparable values (NaN, non-numeric text against a numeric
/// sensor) and unknown operators simply do not match.
pub fn evaluate(current: &SensorValue, operator: &Operator, target: &SensorValue) -> bool {
    let ordering = match current {
        SensorValue::Bool(value) => Some(value.cmp(&target.is_truthy())),
        SensorValue::Number(value) => target.as_f64().and_then(|t| value.partial_cmp(&t)),
        SensorValue::Text(value) => Some(value.as_str().cmp(target.to_string().as_str())),
    };

    ordering.map(|o| operator.accepts(o)).unwrap_or(false)
}

/// Sensor rule bound to an alarm class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorRule {
    #[serde(alias = "VariableID", alias = "variable_id")]
    pub sensor_id: SensorId,
    #[serde(alias = "Operator", default = "default_operator")]
    pub operator: Operator,
    #[serde(alias = "ComparisonValue", alias = "Value")]
    pub value: SensorValue,
    #[serde(alias = "ClassID")]
    pub class_id: String,
}

fn default_operator() -> Operator {
    Operator::Eq
}

impl SensorRule {
    pub fn new(sensor_id: SensorId, operator: Operator, value: SensorValue, class_id: &str) -> Self {
        Self {
            sensor_id,
            operator,
            value,
            class_id: class_id.to_string(),
        }
    }

    pub fn matches(&self, current: &SensorValue) -> bool {
        evaluate(current, &self.operator, &self.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_targets_coerce_consistently() {
        let current = SensorValue::Bool(true);
        for target in [SensorValue::from("1"), SensorValue::from(1i64), SensorValue::from("true")] {
            assert!(evaluate(&current, &Operator::Eq, &target), "{:?}", target);
            assert!(!evaluate(&current, &Operator::Ne, &target), "{:?}", target);
        }
        assert!(evaluate(&SensorValue::Bool(false), &Operator::Eq, &SensorValue::from("0")));
        assert!(evaluate(&SensorValue::Bool(false), &Operator::Eq, &SensorValue::from("false")));
    }

    #[test]
    fn numeric_targets_parse_as_float() {
        let current = SensorValue::Number(21.5);
        assert!(evaluate(&current, &Operator::Gt, &SensorValue::from("20")));
        assert!(evaluate(&current, &Operator::Le, &SensorValue::Number(21.5)));
        assert!(evaluate(&current, &Operator::Ge, &SensorValue::Number(21.5)));
        assert!(!evaluate(&current, &Operator::Lt, &SensorValue::from("21.5")));
        assert!(!evaluate(&current, &Operator::Eq, &SensorValue::from("warm")));
        assert!(!evaluate(&current, &Operator::Ne, &SensorValue::from("warm")));
    }

    #[test]
    fn text_compares_as_string() {
        let current = SensorValue::from("open");
        assert!(evaluate(&current, &Operator::Eq, &SensorValue::from("open")));
        assert!(evaluate(&current, &Operator::Ne, &SensorValue::from("closed")));
        assert!(evaluate(&current, &Operator::Gt, &SensorValue::from("closed")));
    }

    #[test]
    fn unknown_operator_never_matches() {
        let op = Operator::parse("~=");
        assert_eq!(op, Operator::Unknown("~=".to_string()));
        assert!(!evaluate(&SensorValue::Bool(true), &op, &SensorValue::Bool(true)));
    }

    #[test]
    fn operators_parse_from_symbols_and_names() {
        assert_eq!(Operator::parse("=="), Operator::Eq);
        assert_eq!(Operator::parse("<>"), Operator::Ne);
        assert_eq!(Operator::parse("GE"), Operator::Ge);
        assert_eq!(Operator::parse("<="), Operator::Le);
    }

    #[test]
    fn rules_decode_from_exported_field_names() {
        let rule: SensorRule = serde_json::from_str(
            r#"{"VariableID": 12345, "Operator": ">", "ComparisonValue": 30, "ClassID": "c1"}"#,
        )
        .unwrap();
        assert_eq!(rule.sensor_id, 12345);
        assert_eq!(rule.operator, Operator::Gt);
        assert!(rule.matches(&SensorValue::Number(31.0)));
    }
}
