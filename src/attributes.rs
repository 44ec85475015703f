//! Free-form annotation attributes.
//!
//! Stored as a JSON object in `annotations.attributes`. Values are limited to
//! strings, numbers, booleans, null and nested objects; arrays are rejected.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute document attached to an annotation.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Text(String),
    Map(Attributes),
}

impl AttributeValue {
    /// Interpret a command-line literal: `true`/`false`, `null`, an integer,
    /// a finite float, or otherwise plain text.
    pub fn from_literal(raw: &str) -> Self {
        match raw {
            "null" => AttributeValue::Null,
            "true" => AttributeValue::Bool(true),
            "false" => AttributeValue::Bool(false),
            _ => {
                if let Ok(n) = raw.parse::<i64>() {
                    return AttributeValue::Integer(n);
                }
                match raw.parse::<f64>() {
                    Ok(n) if n.is_finite() => AttributeValue::Number(n),
                    _ => AttributeValue::Text(raw.to_string()),
                }
            }
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Null => write!(f, "null"),
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Integer(n) => write!(f, "{n}"),
            AttributeValue::Number(n) => write!(f, "{n}"),
            AttributeValue::Text(s) => write!(f, "{s}"),
            AttributeValue::Map(map) => {
                let json = serde_json::to_string(map).map_err(|_| fmt::Error)?;
                write!(f, "{json}")
            }
        }
    }
}

/// Parse a `key=value` pair as given on the command line.
pub fn parse_pair(raw: &str) -> Result<(String, AttributeValue)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| StoreError::InvalidAttribute(format!("expected key=value, got `{raw}`")))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(StoreError::InvalidAttribute(format!(
            "empty key in `{raw}`"
        )));
    }
    Ok((key.to_string(), AttributeValue::from_literal(value.trim())))
}

/// Serialize attributes for the `attributes` column.
pub fn to_column(attributes: &Attributes) -> Result<String> {
    Ok(serde_json::to_string(attributes)?)
}

/// Parse the `attributes` column.
pub fn from_column(raw: &str) -> Result<Attributes> {
    Ok(serde_json::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_literal() {
        assert_eq!(AttributeValue::from_literal("true"), AttributeValue::Bool(true));
        assert_eq!(AttributeValue::from_literal("null"), AttributeValue::Null);
        assert_eq!(AttributeValue::from_literal("2.5"), AttributeValue::Number(2.5));
        assert_eq!(AttributeValue::from_literal("3"), AttributeValue::Integer(3));
        assert_eq!(AttributeValue::from_literal("-12"), AttributeValue::Integer(-12));
        assert_eq!(
            AttributeValue::from_literal("walking"),
            AttributeValue::Text("walking".to_string())
        );
        assert_eq!(
            AttributeValue::from_literal("NaN"),
            AttributeValue::Text("NaN".to_string())
        );
    }

    #[test]
    fn test_parse_pair() {
        let (key, value) = parse_pair("phone_usage=texting").unwrap();
        assert_eq!(key, "phone_usage");
        assert_eq!(value.as_str(), Some("texting"));

        assert!(parse_pair("no-separator").is_err());
        assert!(parse_pair("=value").is_err());
    }

    #[test]
    fn test_nested_document() {
        let raw = r#"{"ppe":{"helmet":true,"vest":null},"score":0.75,"activity":"welding"}"#;
        let attrs = from_column(raw).unwrap();

        assert_eq!(attrs["score"], AttributeValue::Number(0.75));
        match &attrs["ppe"] {
            AttributeValue::Map(inner) => {
                assert_eq!(inner["helmet"], AttributeValue::Bool(true));
                assert_eq!(inner["vest"], AttributeValue::Null);
            }
            other => panic!("expected nested map, got {other:?}"),
        }

        let again = from_column(&to_column(&attrs).unwrap()).unwrap();
        assert_eq!(again, attrs);
    }

    #[test]
    fn test_integers_keep_precision() {
        let attrs = from_column(r#"{"cvat_id":9007199254740993,"frames":3,"score":0.5}"#).unwrap();
        assert_eq!(attrs["cvat_id"], AttributeValue::Integer(9_007_199_254_740_993));
        assert_eq!(attrs["frames"], AttributeValue::Integer(3));
        assert_eq!(attrs["score"], AttributeValue::Number(0.5));

        assert_eq!(
            to_column(&attrs).unwrap(),
            r#"{"cvat_id":9007199254740993,"frames":3,"score":0.5}"#
        );
        assert_eq!(AttributeValue::Integer(3).to_string(), "3");
    }

    #[test]
    fn test_arrays_rejected() {
        assert!(from_column(r#"{"tags":["a","b"]}"#).is_err());
    }

    #[test]
    fn test_display() {
        let mut inner = Attributes::new();
        inner.insert("a".to_string(), AttributeValue::Number(1.0));
        assert_eq!(AttributeValue::Map(inner).to_string(), r#"{"a":1.0}"#);
        assert_eq!(AttributeValue::Bool(false).to_string(), "false");
    }
}
