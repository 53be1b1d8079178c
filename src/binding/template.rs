//! Command templates with named placeholders.
//!
//! A template such as `ch{channel}:scale` is resolved against the owning device's
//! query parameters (and, for actions, call arguments) every time it is used.
//! Placeholders may carry a format spec after a colon:
//!
//! | Spec | Meaning | Example |
//! |------|---------|---------|
//! | `.3f` | fixed decimals | `{freq:.3f}` → `1550.000` |
//! | `d`, `03d` | integer, optionally zero padded | `{n:02d}` → `07` |
//! | `x`, `X` | hexadecimal | `{mask:X}` → `3C` |

use crate::error::{AppResult, LabError};
use crate::value::{Settings, Value};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Cached regex for placeholder interpolation (compiled once).
/// Matches `{name}` and `{name:spec}`.
static PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)(?::([^{}]*))?\}").expect("Invalid placeholder regex")
});

/// A command string with named placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    raw: String,
    placeholders: Vec<String>,
}

impl CommandTemplate {
    /// Parse a template.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let mut placeholders = Vec::new();
        for cap in PLACEHOLDER_REGEX.captures_iter(&raw) {
            let name = cap[1].to_string();
            if !placeholders.contains(&name) {
                placeholders.push(name);
            }
        }
        Self { raw, placeholders }
    }

    /// The template text as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Names of the placeholders, in order of first appearance.
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Returns true if the template needs no parameters.
    pub fn is_literal(&self) -> bool {
        self.placeholders.is_empty()
    }

    /// Substitute every placeholder from `params`.
    ///
    /// Fails with [`LabError::Binding`] naming the first placeholder that has no value.
    pub fn resolve(&self, params: &Settings) -> AppResult<String> {
        if self.is_literal() {
            return Ok(self.raw.clone());
        }

        let mut out = String::with_capacity(self.raw.len() + 8);
        let mut last = 0;
        for cap in PLACEHOLDER_REGEX.captures_iter(&self.raw) {
            let Some(whole) = cap.get(0) else { continue };
            let name = &cap[1];
            let value = params.get(name).ok_or_else(|| LabError::Binding {
                template: self.raw.clone(),
                placeholder: name.to_string(),
            })?;
            out.push_str(&self.raw[last..whole.start()]);
            match cap.get(2) {
                Some(spec) => out.push_str(&format_with_spec(value, spec.as_str(), &self.raw)?),
                None => out.push_str(&value.to_command_text()),
            }
            last = whole.end();
        }
        out.push_str(&self.raw[last..]);
        Ok(out)
    }
}

impl fmt::Display for CommandTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<&str> for CommandTemplate {
    fn from(raw: &str) -> Self {
        CommandTemplate::new(raw)
    }
}

fn format_with_spec(value: &Value, spec: &str, template: &str) -> AppResult<String> {
    let bad_value = || LabError::conversion(value.to_string(), "number for format spec");
    match spec {
        "" => Ok(value.to_command_text()),
        s if s.starts_with('.') && s.ends_with('f') => {
            let precision = s[1..s.len() - 1]
                .parse::<usize>()
                .map_err(|_| bad_spec(spec, template))?;
            let v = value.as_f64().ok_or_else(bad_value)?;
            Ok(format!("{v:.precision$}"))
        }
        s if s.ends_with('d') || s.ends_with('x') || s.ends_with('X') => {
            let width_str = &s[..s.len() - 1];
            let digits = width_str.trim_start_matches('0');
            let width = if digits.is_empty() {
                0
            } else {
                digits
                    .parse::<usize>()
                    .map_err(|_| bad_spec(spec, template))?
            };
            let v = value
                .as_i64()
                .or_else(|| value.as_f64().map(|f| f.round() as i64))
                .ok_or_else(bad_value)?;
            Ok(match s.chars().last() {
                Some('x') => format!("{v:0width$x}"),
                Some('X') => format!("{v:0width$X}"),
                _ => format!("{v:0width$}"),
            })
        }
        _ => Err(bad_spec(spec, template)),
    }
}

fn bad_spec(spec: &str, template: &str) -> LabError {
    LabError::Configuration(format!(
        "unsupported format spec '{spec}' in command '{template}'"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, Value)]) -> Settings {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn literal_templates_need_nothing() {
        let t = CommandTemplate::new("initiate:immediate");
        assert!(t.is_literal());
        assert_eq!(t.resolve(&Settings::new()).unwrap(), "initiate:immediate");
    }

    #[test]
    fn placeholders_are_substituted() {
        let t = CommandTemplate::new("save:waveform ch{channel_id},\"{file_name}\"");
        assert_eq!(t.placeholders(), &["channel_id".to_string(), "file_name".to_string()]);
        let resolved = t
            .resolve(&params(&[
                ("channel_id", Value::Int(2)),
                ("file_name", Value::from("trace.isf")),
            ]))
            .unwrap();
        assert_eq!(resolved, "save:waveform ch2,\"trace.isf\"");
    }

    #[test]
    fn missing_placeholder_is_binding_error() {
        let t = CommandTemplate::new("ch{channel}:offset");
        match t.resolve(&Settings::new()) {
            Err(LabError::Binding { placeholder, .. }) => assert_eq!(placeholder, "channel"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn format_specs() {
        let p = params(&[("f", Value::Float(1550.0)), ("n", Value::Int(7))]);
        assert_eq!(
            CommandTemplate::new("wav {f:.3f}").resolve(&p).unwrap(),
            "wav 1550.000"
        );
        assert_eq!(
            CommandTemplate::new("slot {n:02d}").resolve(&p).unwrap(),
            "slot 07"
        );
        assert_eq!(CommandTemplate::new("m {n:X}").resolve(&p).unwrap(), "m 7");
        assert!(CommandTemplate::new("bad {n:q}").resolve(&p).is_err());
    }

    #[test]
    fn enums_use_wire_text() {
        crate::setting_enum! {
            enum Coupling {
                Ac => "AC",
                Dc => "DC",
            }
        }
        let p = params(&[("c", Value::from(Coupling::Dc))]);
        assert_eq!(
            CommandTemplate::new("ch1:coupling {c}").resolve(&p).unwrap(),
            "ch1:coupling DC"
        );
    }
}
