//! Per-device command options.
//!
//! A device keeps one [`CommandOptions`] record per binding, keyed by the binding's
//! [`BindingId`](super::BindingId). Two properties that send the same wire command
//! are therefore configured independently.

use super::convert::round_to;
use crate::error::{AppResult, LabError};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Options applied on top of a binding's default conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandOptions {
    /// Values are divided by this before writing and multiplied by it after reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_multiplier: Option<f64>,
    /// Decimal places to round to after reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_on_read_digits: Option<i32>,
    /// Decimal places to round to before writing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_on_write_digits: Option<i32>,
    /// Refuse writes to this binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_write: Option<bool>,
}

/// Names one field of [`CommandOptions`], for removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionKey {
    /// `value_multiplier`
    ValueMultiplier,
    /// `round_on_read_digits`
    RoundOnReadDigits,
    /// `round_on_write_digits`
    RoundOnWriteDigits,
    /// `disable_write`
    DisableWrite,
}

impl CommandOptions {
    /// Empty option record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the value multiplier.
    pub fn with_value_multiplier(mut self, multiplier: f64) -> Self {
        self.value_multiplier = Some(multiplier);
        self
    }

    /// Round read values to `digits` decimals.
    pub fn with_round_on_read(mut self, digits: i32) -> Self {
        self.round_on_read_digits = Some(digits);
        self
    }

    /// Round written values to `digits` decimals.
    pub fn with_round_on_write(mut self, digits: i32) -> Self {
        self.round_on_write_digits = Some(digits);
        self
    }

    /// Disable writes.
    pub fn with_write_disabled(mut self) -> Self {
        self.disable_write = Some(true);
        self
    }

    /// Returns true if no option is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Whether writes are refused.
    pub fn write_disabled(&self) -> bool {
        self.disable_write.unwrap_or(false)
    }

    /// Overwrite every field that `other` sets.
    pub fn merge(&mut self, other: &CommandOptions) {
        if other.value_multiplier.is_some() {
            self.value_multiplier = other.value_multiplier;
        }
        if other.round_on_read_digits.is_some() {
            self.round_on_read_digits = other.round_on_read_digits;
        }
        if other.round_on_write_digits.is_some() {
            self.round_on_write_digits = other.round_on_write_digits;
        }
        if other.disable_write.is_some() {
            self.disable_write = other.disable_write;
        }
    }

    /// Clear the named fields.
    pub fn remove(&mut self, keys: &[OptionKey]) {
        for key in keys {
            match key {
                OptionKey::ValueMultiplier => self.value_multiplier = None,
                OptionKey::RoundOnReadDigits => self.round_on_read_digits = None,
                OptionKey::RoundOnWriteDigits => self.round_on_write_digits = None,
                OptionKey::DisableWrite => self.disable_write = None,
            }
        }
    }

    /// Transform a freshly read value: multiply, then round.
    pub fn apply_read(&self, value: Value) -> AppResult<Value> {
        if self.value_multiplier.is_none() && self.round_on_read_digits.is_none() {
            return Ok(value);
        }
        let mut x = value
            .as_f64()
            .ok_or_else(|| LabError::conversion(value.to_string(), "number for command option"))?;
        if let Some(multiplier) = self.value_multiplier {
            x *= multiplier;
        }
        if let Some(digits) = self.round_on_read_digits {
            x = round_to(x, digits);
        }
        Ok(match value {
            Value::Int(_) if self.value_multiplier.is_none() => Value::Int(x as i64),
            _ => Value::Float(x),
        })
    }

    /// Transform a value about to be written: divide, then round.
    pub fn apply_write(&self, value: Value) -> AppResult<Value> {
        if self.value_multiplier.is_none() && self.round_on_write_digits.is_none() {
            return Ok(value);
        }
        let mut x = value
            .as_f64()
            .ok_or_else(|| LabError::conversion(value.to_string(), "number for command option"))?;
        if let Some(multiplier) = self.value_multiplier {
            x /= multiplier;
        }
        if let Some(digits) = self.round_on_write_digits {
            x = round_to(x, digits);
        }
        Ok(match value {
            Value::Int(_) if self.value_multiplier.is_none() => Value::Int(x as i64),
            _ => Value::Float(x),
        })
    }

    /// Parse an option table from settings (e.g. a `[devices.x.command_options.power]` table).
    pub fn from_value(value: &Value) -> AppResult<Self> {
        let map = value.as_map().ok_or_else(|| {
            LabError::Configuration(format!("command options must be a table, got {value}"))
        })?;
        let mut options = CommandOptions::new();
        for (key, v) in map {
            let bad = || LabError::Configuration(format!("invalid value {v} for command option '{key}'"));
            match key.as_str() {
                "value_multiplier" => options.value_multiplier = Some(v.as_f64().ok_or_else(bad)?),
                "round_on_read_digits" => {
                    options.round_on_read_digits = Some(v.as_i64().ok_or_else(bad)? as i32)
                }
                "round_on_write_digits" => {
                    options.round_on_write_digits = Some(v.as_i64().ok_or_else(bad)? as i32)
                }
                "disable_write" => options.disable_write = Some(v.as_bool().ok_or_else(bad)?),
                other => {
                    return Err(LabError::Configuration(format!(
                        "unknown command option '{other}'"
                    )))
                }
            }
        }
        Ok(options)
    }
}
