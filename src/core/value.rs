// Copyright 2025 Lodestone Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Scalar value type for Lodestone - typed per-document values
//!
//! This module provides the tagged `ScalarValue` enum produced by
//! per-segment evaluators and accumulators, together with the explicit
//! cross-type conversion table the evaluator framework relies on:
//!
//! - narrower numerics from f64 by truncation
//! - boolean from numeric via "nonzero"
//! - string from numeric via canonical formatting

use std::fmt;
use std::sync::Arc;

/// A typed per-document value
///
/// `Absent` is the missing/null signal: a document that has no value for
/// the evaluated expression. Text and bytes payloads use `Arc` for cheap
/// cloning during bulk scans.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    /// No value for this document
    Absent,

    /// Boolean value
    Bool(bool),

    /// 64-bit signed integer
    Int(i64),

    /// 64-bit floating point
    Float(f64),

    /// UTF-8 text (Arc for cheap cloning)
    Str(Arc<str>),

    /// Raw bytes (Arc for cheap cloning)
    Bytes(Arc<[u8]>),
}

impl ScalarValue {
    /// Create a text value
    pub fn str(value: impl Into<String>) -> Self {
        ScalarValue::Str(Arc::from(value.into().as_str()))
    }

    /// Create a bytes value
    pub fn bytes(value: impl Into<Vec<u8>>) -> Self {
        ScalarValue::Bytes(Arc::from(value.into().as_slice()))
    }

    /// Returns true if this value is present
    pub fn exists(&self) -> bool {
        !matches!(self, ScalarValue::Absent)
    }

    // =========================================================================
    // Conversion table
    // =========================================================================

    /// Convert to f64. Absent and non-numeric bytes convert to 0.0,
    /// booleans to 1.0/0.0, strings by parsing (unparseable -> 0.0).
    pub fn as_f64(&self) -> f64 {
        match self {
            ScalarValue::Absent => 0.0,
            ScalarValue::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            ScalarValue::Int(v) => *v as f64,
            ScalarValue::Float(v) => *v,
            ScalarValue::Str(s) => s.parse::<f64>().unwrap_or(0.0),
            ScalarValue::Bytes(_) => 0.0,
        }
    }

    /// Convert to i64 by truncation of the f64 conversion, except integers
    /// and strings holding exact integers, which convert losslessly.
    pub fn as_i64(&self) -> i64 {
        match self {
            ScalarValue::Int(v) => *v,
            ScalarValue::Str(s) => s
                .parse::<i64>()
                .unwrap_or_else(|_| s.parse::<f64>().unwrap_or(0.0) as i64),
            other => other.as_f64() as i64,
        }
    }

    /// Convert to i32 by truncation
    pub fn as_i32(&self) -> i32 {
        self.as_i64() as i32
    }

    /// Convert to f32 by truncation
    pub fn as_f32(&self) -> f32 {
        self.as_f64() as f32
    }

    /// Convert to boolean: numerics via "nonzero", strings and bytes via
    /// "nonempty", Absent is false.
    pub fn as_bool(&self) -> bool {
        match self {
            ScalarValue::Absent => false,
            ScalarValue::Bool(b) => *b,
            ScalarValue::Int(v) => *v != 0,
            ScalarValue::Float(v) => *v != 0.0,
            ScalarValue::Str(s) => !s.is_empty(),
            ScalarValue::Bytes(b) => !b.is_empty(),
        }
    }

    /// Convert to a canonical string. Floats use `format_double`, Absent
    /// converts to the empty string, bytes decode lossily.
    pub fn as_string(&self) -> String {
        match self {
            ScalarValue::Absent => String::new(),
            ScalarValue::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            ScalarValue::Int(v) => v.to_string(),
            ScalarValue::Float(v) => format_double(*v),
            ScalarValue::Str(s) => s.to_string(),
            ScalarValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }

    /// Convert to a JSON value for response assembly. Absent and NaN map
    /// to JSON null (JSON numbers cannot carry NaN).
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ScalarValue::Absent => serde_json::Value::Null,
            ScalarValue::Bool(b) => serde_json::Value::Bool(*b),
            ScalarValue::Int(v) => serde_json::Value::from(*v),
            ScalarValue::Float(v) => {
                serde_json::Number::from_f64(*v).map_or(serde_json::Value::Null, Into::into)
            }
            ScalarValue::Str(s) => serde_json::Value::from(s.as_ref()),
            ScalarValue::Bytes(b) => serde_json::Value::from(String::from_utf8_lossy(b).as_ref()),
        }
    }
}

impl Default for ScalarValue {
    fn default() -> Self {
        ScalarValue::Absent
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

/// Canonical f64 formatting: integral finite values keep one fractional
/// digit ("3.0"), everything else uses the shortest round-trip form.
pub fn format_double(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_numeric_conversions() {
        assert_eq!(ScalarValue::Float(3.9).as_i64(), 3);
        assert_eq!(ScalarValue::Float(-3.9).as_i64(), -3);
        assert_eq!(ScalarValue::Float(3.9).as_i32(), 3);
        assert_eq!(ScalarValue::Int(7).as_f64(), 7.0);
        assert_eq!(ScalarValue::Int(7).as_f32(), 7.0_f32);
        assert_eq!(ScalarValue::Absent.as_f64(), 0.0);
        assert_eq!(ScalarValue::Absent.as_i64(), 0);
    }

    #[test]
    fn test_bool_conversions() {
        assert!(ScalarValue::Int(-2).as_bool());
        assert!(!ScalarValue::Int(0).as_bool());
        assert!(ScalarValue::Float(0.5).as_bool());
        assert!(!ScalarValue::Float(0.0).as_bool());
        assert!(ScalarValue::str("x").as_bool());
        assert!(!ScalarValue::str("").as_bool());
        assert!(!ScalarValue::Absent.as_bool());
        assert_eq!(ScalarValue::Bool(true).as_f64(), 1.0);
        assert_eq!(ScalarValue::Bool(false).as_i64(), 0);
    }

    #[test]
    fn test_string_conversions() {
        assert_eq!(ScalarValue::Int(42).as_string(), "42");
        assert_eq!(ScalarValue::Float(3.0).as_string(), "3.0");
        assert_eq!(ScalarValue::Float(2.5).as_string(), "2.5");
        assert_eq!(ScalarValue::Bool(true).as_string(), "true");
        assert_eq!(ScalarValue::Absent.as_string(), "");
        assert_eq!(ScalarValue::str("12.5").as_f64(), 12.5);
        assert_eq!(ScalarValue::str("12").as_i64(), 12);
        assert_eq!(ScalarValue::str("12.9").as_i64(), 12);
        assert_eq!(ScalarValue::str("junk").as_f64(), 0.0);
    }

    #[test]
    fn test_format_double() {
        assert_eq!(format_double(3.0), "3.0");
        assert_eq!(format_double(-9.0), "-9.0");
        assert_eq!(format_double(0.5), "0.5");
        assert_eq!(format_double(f64::NAN), "NaN");
        assert_eq!(format_double(f64::INFINITY), "inf");
    }

    #[test]
    fn test_to_json() {
        assert_eq!(ScalarValue::Absent.to_json(), serde_json::Value::Null);
        assert_eq!(
            ScalarValue::Float(f64::NAN).to_json(),
            serde_json::Value::Null
        );
        assert_eq!(ScalarValue::Int(3).to_json(), serde_json::json!(3));
        assert_eq!(ScalarValue::str("a").to_json(), serde_json::json!("a"));
    }

    #[test]
    fn test_exists() {
        assert!(!ScalarValue::Absent.exists());
        assert!(ScalarValue::Int(0).exists());
        assert!(ScalarValue::Float(f64::NAN).exists());
    }
}
