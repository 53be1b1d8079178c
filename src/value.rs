//! Dynamic values shared by command bindings, device settings and metadata.
//!
//! Instrument settings arrive as TOML, property reads produce typed values and
//! measurement metadata nests arbitrarily, so all three use the same [`Value`] tree.
//! Closed enumerations of instrument settings are declared with [`setting_enum!`],
//! which pairs every member with the string the instrument uses on the wire.

use crate::error::{AppResult, LabError};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Free-form, ordered mapping of metadata keys to values.
pub type Metadata = IndexMap<String, Value>;

/// Ordered mapping of device settings (defaults merged with overrides).
pub type Settings = IndexMap<String, Value>;

/// A dynamically typed value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    /// Absent value.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// Text.
    Text(String),
    /// Member of a closed setting enumeration.
    Enum(EnumValue),
    /// Ordered list.
    List(Vec<Value>),
    /// Ordered nested mapping.
    Map(IndexMap<String, Value>),
}

/// Member of a closed enumeration, carried without its Rust type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumValue {
    /// Name of the enumeration type, e.g. `DetectorMode`.
    pub type_name: String,
    /// Symbolic member name, e.g. `Average`.
    pub member: String,
    /// String the instrument uses for this member, e.g. `AVER`.
    pub wire: String,
}

impl EnumValue {
    /// `"<Type>.<Member>"`, the form used when enums are stringified for storage.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.type_name, self.member)
    }
}

impl Value {
    /// Numeric view of the value (integers widen to float).
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Integer view; floats are accepted only if they have no fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    /// Boolean view.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(v) => Some(*v != 0),
            _ => None,
        }
    }

    /// Text view.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Enum view.
    pub fn as_enum(&self) -> Option<&EnumValue> {
        match self {
            Value::Enum(e) => Some(e),
            _ => None,
        }
    }

    /// Nested map view.
    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Short type label used in conversion errors.
    pub fn type_label(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Enum(_) => "enum",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Text inserted into a command string for this value.
    ///
    /// Enum members contribute their wire string, floats always keep a decimal point.
    pub fn to_command_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => if *b { "1" } else { "0" }.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format_float(*v),
            Value::Text(s) => s.clone(),
            Value::Enum(e) => e.wire.clone(),
            Value::List(items) => items
                .iter()
                .map(Value::to_command_text)
                .collect::<Vec<_>>()
                .join(","),
            Value::Map(_) => self.to_string(),
        }
    }

    /// Replace every enum member in the tree with `"<Type>.<Member>"` text.
    pub fn stringify_enums(self) -> Value {
        match self {
            Value::Enum(e) => Value::Text(e.qualified_name()),
            Value::List(items) => {
                Value::List(items.into_iter().map(Value::stringify_enums).collect())
            }
            Value::Map(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, v.stringify_enums()))
                    .collect(),
            ),
            other => other,
        }
    }

    /// Turn `"<Type>.<Member>"` text back into enum members for the given descriptors.
    pub fn restore_enums(self, descriptors: &[EnumDescriptor]) -> Value {
        match self {
            Value::Text(text) => {
                let restored = text.split_once('.').and_then(|(type_name, member)| {
                    descriptors
                        .iter()
                        .find(|d| d.type_name == type_name)
                        .and_then(|d| d.by_name(member))
                });
                restored.map(Value::Enum).unwrap_or(Value::Text(text))
            }
            Value::List(items) => Value::List(
                items
                    .into_iter()
                    .map(|v| v.restore_enums(descriptors))
                    .collect(),
            ),
            Value::Map(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, v.restore_enums(descriptors)))
                    .collect(),
            ),
            other => other,
        }
    }
}

/// Format a float so it always reads back as a float (`5.0`, not `5`).
pub fn format_float(v: f64) -> String {
    format!("{v:?}")
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{}", format_float(*v)),
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Enum(e) => write!(f, "{}", e.qualified_name()),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<EnumValue> for Value {
    fn from(v: EnumValue) -> Self {
        Value::Enum(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

impl From<Vec<f64>> for Value {
    fn from(v: Vec<f64>) -> Self {
        Value::List(v.into_iter().map(Value::Float).collect())
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(v: IndexMap<String, Value>) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<toml::Value> for Value {
    fn from(v: toml::Value) -> Self {
        match v {
            toml::Value::String(s) => Value::Text(s),
            toml::Value::Integer(i) => Value::Int(i),
            toml::Value::Float(f) => Value::Float(f),
            toml::Value::Boolean(b) => Value::Bool(b),
            toml::Value::Datetime(d) => Value::Text(d.to_string()),
            toml::Value::Array(items) => Value::List(items.into_iter().map(Value::from).collect()),
            toml::Value::Table(table) => Value::Map(
                table
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl TryFrom<Value> for f64 {
    type Error = LabError;

    fn try_from(v: Value) -> AppResult<Self> {
        v.as_f64()
            .ok_or_else(|| LabError::conversion(v.to_string(), "float"))
    }
}

impl TryFrom<Value> for i64 {
    type Error = LabError;

    fn try_from(v: Value) -> AppResult<Self> {
        v.as_i64()
            .ok_or_else(|| LabError::conversion(v.to_string(), "int"))
    }
}

impl TryFrom<Value> for bool {
    type Error = LabError;

    fn try_from(v: Value) -> AppResult<Self> {
        v.as_bool()
            .ok_or_else(|| LabError::conversion(v.to_string(), "bool"))
    }
}

impl TryFrom<Value> for String {
    type Error = LabError;

    fn try_from(v: Value) -> AppResult<Self> {
        match v {
            Value::Text(s) => Ok(s),
            other => Err(LabError::conversion(other.to_string(), "text")),
        }
    }
}

// =============================================================================
// Setting enumerations
// =============================================================================

/// Runtime description of a closed setting enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumDescriptor {
    /// Name of the enumeration type.
    pub type_name: &'static str,
    /// `(member name, wire string)` pairs in declaration order.
    pub members: &'static [(&'static str, &'static str)],
}

impl EnumDescriptor {
    /// Match a wire response to a member. Exact matches win over case-insensitive ones.
    pub fn from_wire(&self, wire: &str) -> AppResult<EnumValue> {
        let wire = wire.trim();
        self.members
            .iter()
            .find(|(_, w)| *w == wire)
            .or_else(|| self.members.iter().find(|(_, w)| w.eq_ignore_ascii_case(wire)))
            .map(|(name, w)| self.make(name, w))
            .ok_or_else(|| LabError::UnknownEnumValue {
                type_name: self.type_name.to_string(),
                wire: wire.to_string(),
            })
    }

    /// Look up a member by its symbolic name.
    pub fn by_name(&self, name: &str) -> Option<EnumValue> {
        self.members
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(n, w)| self.make(n, w))
    }

    /// Returns true if `value` is a member of this enumeration.
    pub fn contains(&self, value: &EnumValue) -> bool {
        value.type_name == self.type_name && self.by_name(&value.member).is_some()
    }

    fn make(&self, name: &str, wire: &str) -> EnumValue {
        EnumValue {
            type_name: self.type_name.to_string(),
            member: name.to_string(),
            wire: wire.to_string(),
        }
    }
}

/// A Rust enum whose members map to instrument wire strings.
///
/// Implemented by [`setting_enum!`]; implement by hand only for unusual cases.
pub trait SettingEnum: Copy + Sized + 'static {
    /// Runtime descriptor of the enumeration.
    const DESCRIPTOR: EnumDescriptor;
    /// All members in declaration order.
    const MEMBERS: &'static [Self];

    /// Symbolic member name.
    fn name(self) -> &'static str;

    /// Wire string understood by the instrument.
    fn wire(self) -> &'static str;

    /// Parse a wire response.
    fn from_wire(wire: &str) -> AppResult<Self> {
        let member = Self::DESCRIPTOR.from_wire(wire)?;
        Self::from_name(&member.member).ok_or_else(|| LabError::UnknownEnumValue {
            type_name: Self::DESCRIPTOR.type_name.to_string(),
            wire: wire.to_string(),
        })
    }

    /// Look up a member by its symbolic name.
    fn from_name(name: &str) -> Option<Self> {
        Self::MEMBERS.iter().copied().find(|m| m.name() == name)
    }

    /// Type-erased form of this member.
    fn to_value(self) -> Value {
        Value::Enum(EnumValue {
            type_name: Self::DESCRIPTOR.type_name.to_string(),
            member: self.name().to_string(),
            wire: self.wire().to_string(),
        })
    }

    /// Recover a member from a [`Value`] (an enum of this type, a member name or a wire string).
    fn from_value(value: &Value) -> AppResult<Self> {
        match value {
            Value::Enum(e) if e.type_name == Self::DESCRIPTOR.type_name => Self::from_name(&e.member)
                .ok_or_else(|| LabError::UnknownEnumValue {
                    type_name: e.type_name.clone(),
                    wire: e.wire.clone(),
                }),
            Value::Text(s) => Self::from_name(s).map_or_else(|| Self::from_wire(s), Ok),
            other => Err(LabError::conversion(
                other.to_string(),
                Self::DESCRIPTOR.type_name,
            )),
        }
    }
}

/// Declare a closed setting enumeration together with its wire strings.
///
/// ```
/// labframe::setting_enum! {
///     /// Detector modes of a spectrum analyzer.
///     pub enum DetectorMode {
///         Normal => "NORM",
///         Average => "AVER",
///     }
/// }
///
/// use labframe::value::SettingEnum;
/// assert_eq!(DetectorMode::from_wire("AVER").unwrap(), DetectorMode::Average);
/// assert_eq!(DetectorMode::Normal.wire(), "NORM");
/// ```
#[macro_export]
macro_rules! setting_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident => $wire:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant
            ),+
        }

        impl $crate::value::SettingEnum for $name {
            const DESCRIPTOR: $crate::value::EnumDescriptor = $crate::value::EnumDescriptor {
                type_name: stringify!($name),
                members: &[$((stringify!($variant), $wire)),+],
            };
            const MEMBERS: &'static [Self] = &[$($name::$variant),+];

            fn name(self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),+
                }
            }

            fn wire(self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl From<$name> for $crate::value::Value {
            fn from(member: $name) -> Self {
                $crate::value::SettingEnum::to_value(member)
            }
        }

        impl TryFrom<$crate::value::Value> for $name {
            type Error = $crate::error::LabError;

            fn try_from(value: $crate::value::Value) -> ::std::result::Result<Self, Self::Error> {
                <$name as $crate::value::SettingEnum>::from_value(&value)
            }
        }
    };
}
