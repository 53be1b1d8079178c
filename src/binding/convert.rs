//! Conversions between wire text and typed values.

use crate::error::{AppResult, LabError};
use crate::value::{format_float, EnumDescriptor, Value};
use std::fmt;
use std::sync::Arc;

/// Converts a stripped wire response into a value.
pub type ReadConverter = Arc<dyn Fn(&str) -> AppResult<Value> + Send + Sync>;

/// Converts a value into the text appended to a setting command.
pub type WriteConverter = Arc<dyn Fn(&Value) -> AppResult<String> + Send + Sync>;

/// Semantic type of a remote property, which selects its default converters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SemanticType {
    /// Response text as received (only surrounding whitespace removed).
    #[default]
    Raw,
    /// Text with double quotes removed, for quoted SCPI string responses.
    Text,
    /// Integer-boolean convention: `"1"` / `"0"`.
    Bool,
    /// Integer.
    Int,
    /// Floating point number.
    Float,
    /// Member of a closed enumeration.
    Enum(EnumDescriptor),
}

impl SemanticType {
    /// Default read conversion.
    pub fn read(&self, text: &str) -> AppResult<Value> {
        match self {
            SemanticType::Raw => Ok(Value::Text(text.to_string())),
            SemanticType::Text => Ok(Value::Text(unquote(text))),
            SemanticType::Bool => parse_int_bool(text).map(Value::Bool),
            SemanticType::Int => parse_int(text).map(Value::Int),
            SemanticType::Float => parse_float(text).map(Value::Float),
            SemanticType::Enum(descriptor) => descriptor.from_wire(text).map(Value::Enum),
        }
    }

    /// Default write conversion.
    pub fn write(&self, value: &Value) -> AppResult<String> {
        match self {
            SemanticType::Raw | SemanticType::Text => Ok(value.to_command_text()),
            SemanticType::Bool => value
                .as_bool()
                .map(|b| if b { "1" } else { "0" }.to_string())
                .ok_or_else(|| LabError::conversion(value.to_string(), "bool")),
            SemanticType::Int => value
                .as_i64()
                .map(|v| v.to_string())
                .ok_or_else(|| LabError::conversion(value.to_string(), "int")),
            SemanticType::Float => value
                .as_f64()
                .map(format_float)
                .ok_or_else(|| LabError::conversion(value.to_string(), "float")),
            SemanticType::Enum(descriptor) => enum_wire(descriptor, value),
        }
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            SemanticType::Raw => "raw",
            SemanticType::Text => "text",
            SemanticType::Bool => "bool",
            SemanticType::Int => "int",
            SemanticType::Float => "float",
            SemanticType::Enum(d) => d.type_name,
        }
    }
}

impl fmt::Display for SemanticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

fn enum_wire(descriptor: &EnumDescriptor, value: &Value) -> AppResult<String> {
    let unknown = || LabError::UnknownEnumValue {
        type_name: descriptor.type_name.to_string(),
        wire: value.to_string(),
    };
    match value {
        Value::Enum(member) if descriptor.contains(member) => Ok(member.wire.clone()),
        Value::Text(name) => descriptor
            .by_name(name)
            .or_else(|| descriptor.from_wire(name).ok())
            .map(|member| member.wire)
            .ok_or_else(unknown),
        _ => Err(unknown()),
    }
}

/// Removes double quotes from a response (SCPI string responses are quoted).
pub fn unquote(text: &str) -> String {
    text.replace('"', "")
}

/// Integer-boolean convention: any non-zero integer is true.
pub fn parse_int_bool(text: &str) -> AppResult<bool> {
    parse_int(text)
        .map(|v| v != 0)
        .map_err(|_| LabError::conversion(text, "bool"))
}

/// Parse an integer, accepting float notation with no fractional part (`"1.0E+03"`).
pub fn parse_int(text: &str) -> AppResult<i64> {
    let trimmed = text.trim();
    if let Ok(v) = trimmed.parse::<i64>() {
        return Ok(v);
    }
    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 => Ok(f as i64),
        _ => Err(LabError::conversion(text, "int")),
    }
}

/// Parse a floating point response.
pub fn parse_float(text: &str) -> AppResult<f64> {
    let trimmed = text.trim();
    trimmed
        .strip_prefix('+')
        .unwrap_or(trimmed)
        .parse::<f64>()
        .map_err(|_| LabError::conversion(text, "float"))
}

/// Round to `digits` decimal places (negative digits round to tens, hundreds, ...).
pub fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10f64.powi(digits);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SettingEnum;

    crate::setting_enum! {
        enum Detector {
            Normal => "NORM",
            Average => "AVER",
        }
    }

    #[test]
    fn bool_uses_integer_convention() {
        let t = SemanticType::Bool;
        assert_eq!(t.write(&Value::Bool(true)).unwrap(), "1");
        assert_eq!(t.write(&Value::Bool(false)).unwrap(), "0");
        assert_eq!(t.read("1").unwrap(), Value::Bool(true));
        assert_eq!(t.read("0").unwrap(), Value::Bool(false));
        assert!(t.read("maybe").is_err());
    }

    #[test]
    fn numbers_parse_scpi_notation() {
        assert_eq!(parse_float("+1.55000000E+03").unwrap(), 1550.0);
        assert_eq!(parse_int("2.048E+03").unwrap(), 2048);
        assert!(parse_int("2.5").is_err());
    }

    #[test]
    fn text_strips_quotes_raw_does_not() {
        assert_eq!(
            SemanticType::Text.read("\"W\"").unwrap(),
            Value::Text("W".into())
        );
        assert_eq!(
            SemanticType::Raw.read("\"W\"").unwrap(),
            Value::Text("\"W\"".into())
        );
    }

    #[test]
    fn enums_read_and_write_wire_strings() {
        let t = SemanticType::Enum(Detector::DESCRIPTOR);
        assert_eq!(t.read("AVER").unwrap(), Detector::Average.to_value());
        assert_eq!(t.write(&Detector::Normal.to_value()).unwrap(), "NORM");
        assert_eq!(t.write(&Value::from("Average")).unwrap(), "AVER");
        assert!(matches!(
            t.read("SAMP"),
            Err(LabError::UnknownEnumValue { .. })
        ));
        assert!(t.write(&Value::Int(3)).is_err());
    }

    #[test]
    fn rounding() {
        assert_eq!(round_to(1.23456, 2), 1.23);
        assert_eq!(round_to(1234.0, -2), 1200.0);
    }
}
