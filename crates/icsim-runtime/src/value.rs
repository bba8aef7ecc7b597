//! Tag values as they travel through stores and registers.

use std::fmt;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Value held by a tag.
///
/// Stores keep whatever was written; numeric consumers go through
/// [`TagValue::as_f64`]. Serializes as a plain JSON scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Number(f64),
    Text(SmolStr),
}

impl TagValue {
    pub const ZERO: Self = Self::Number(0.0);

    /// Numeric interpretation, accepting text that parses as a real number.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Text(text) => text.trim().parse::<f64>().ok(),
        }
    }

    /// Truthiness as used by control logic: non-zero numbers are on.
    #[must_use]
    pub fn is_on(&self) -> bool {
        self.as_f64().is_some_and(|value| value != 0.0)
    }
}

impl Default for TagValue {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(text) => f.write_str(text),
        }
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<i64> for TagValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        Self::Number(value as f64)
    }
}

impl From<i32> for TagValue {
    fn from(value: i32) -> Self {
        Self::Number(f64::from(value))
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        Self::Number(if value { 1.0 } else { 0.0 })
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        Self::Text(SmolStr::new(value))
    }
}

impl From<SmolStr> for TagValue {
    fn from(value: SmolStr) -> Self {
        Self::Text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_text_is_readable_as_number() {
        assert_eq!(TagValue::from("2.5").as_f64(), Some(2.5));
        assert_eq!(TagValue::from(" -4 ").as_f64(), Some(-4.0));
        assert_eq!(TagValue::from("ready").as_f64(), None);
    }

    #[test]
    fn json_encoding_is_a_plain_scalar() {
        let number = serde_json::to_string(&TagValue::from(3)).unwrap();
        assert_eq!(number, "3.0");
        let text = serde_json::to_string(&TagValue::from("OK")).unwrap();
        assert_eq!(text, "\"OK\"");
        let back: TagValue = serde_json::from_str("7").unwrap();
        assert_eq!(back, TagValue::Number(7.0));
    }
}
