/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2025 ByteDance and/or its affiliates.
 */

use std::fmt::{self, Write};

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Float(f64),
    String(String),
}

impl FieldValue {
    /// NaN and the infinities are the only values a metric refuses to carry.
    pub fn is_finite(&self) -> bool {
        match self {
            FieldValue::Float(f) => f.is_finite(),
            _ => true,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Uint(u) => Some(*u as f64),
            FieldValue::Float(f) => Some(*f),
            FieldValue::Bool(_) | FieldValue::String(_) => None,
        }
    }

    pub fn display_line_protocol(&self) -> DisplayLineProtocolValue<'_> {
        DisplayLineProtocolValue(self)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(v as i64)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Uint(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Uint(v as u64)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

pub struct DisplayLineProtocolValue<'a>(&'a FieldValue);

impl fmt::Display for DisplayLineProtocolValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            FieldValue::Bool(b) => {
                if *b {
                    f.write_str("true")
                } else {
                    f.write_str("false")
                }
            }
            FieldValue::Int(i) => {
                f.write_str(itoa::Buffer::new().format(*i))?;
                f.write_char('i')
            }
            FieldValue::Uint(u) => {
                f.write_str(itoa::Buffer::new().format(*u))?;
                f.write_char('u')
            }
            // shortest round trip form, integral values carry no fraction
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::String(s) => {
                f.write_char('"')?;
                for c in s.chars() {
                    if matches!(c, '"' | '\\') {
                        f.write_char('\\')?;
                    }
                    f.write_char(c)?;
                }
                f.write_char('"')
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_protocol() {
        let v = FieldValue::Uint(10);
        assert_eq!(v.display_line_protocol().to_string(), "10u");

        let v = FieldValue::Int(-10);
        assert_eq!(v.display_line_protocol().to_string(), "-10i");

        let v = FieldValue::Float(101.0);
        assert_eq!(v.display_line_protocol().to_string(), "101");

        let v = FieldValue::Float(0.5);
        assert_eq!(v.display_line_protocol().to_string(), "0.5");

        let v = FieldValue::Bool(true);
        assert_eq!(v.display_line_protocol().to_string(), "true");

        let v = FieldValue::from("say \"hi\"");
        assert_eq!(v.display_line_protocol().to_string(), r#""say \"hi\"""#);
    }

    #[test]
    fn finite() {
        assert!(FieldValue::Float(1.0).is_finite());
        assert!(!FieldValue::Float(f64::NAN).is_finite());
        assert!(!FieldValue::Float(f64::NEG_INFINITY).is_finite());
        assert!(FieldValue::Int(i64::MAX).is_finite());
    }
}
