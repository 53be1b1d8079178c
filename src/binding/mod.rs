//! Command binding layer.
//!
//! Instrument drivers are catalogs of textual commands. This module turns each
//! command into a typed binding object:
//!
//! - [`RemoteProperty`]: readable (and optionally writable) setting with converters,
//!   access guard and read-on-write draining
//! - [`RemoteAction`]: command fired on invocation, optionally waiting for the
//!   instrument to signal completion
//!
//! Every binding receives a [`BindingId`] when it is created. Devices key their
//! per-instance [`CommandOptions`] by that id, never by command text.

pub mod action;
pub mod convert;
pub mod guard;
pub mod options;
pub mod property;
pub mod template;

pub use action::{ActionMode, ActionOutput, CallArgs, RemoteAction, WAIT_BEFORE_TOKEN};
pub use convert::{ReadConverter, SemanticType, WriteConverter};
pub use guard::AccessGuard;
pub use options::{CommandOptions, OptionKey};
pub use property::RemoteProperty;
pub use template::CommandTemplate;

use crate::error::LabError;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_BINDING_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, comparable handle identifying one binding object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindingId(u64);

impl BindingId {
    /// Allocate a fresh id.
    pub(crate) fn next() -> Self {
        BindingId(NEXT_BINDING_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BindingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "binding#{}", self.0)
    }
}

/// Something a command option can be aimed at.
///
/// Names are resolved against the device's driver. A [`Value`] is never a valid
/// target: it is almost always the result of reading a property where the
/// property itself was meant.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandTarget {
    /// Binding name on the driver.
    Name(String),
    /// Binding handle.
    Binding(BindingId),
    /// A plain value (rejected with guidance).
    Value(Value),
}

impl CommandTarget {
    /// Guidance error for a value passed where a binding was expected.
    pub(crate) fn not_a_binding(value: &Value) -> LabError {
        LabError::NotABinding(value.to_string())
    }
}

impl From<&str> for CommandTarget {
    fn from(name: &str) -> Self {
        CommandTarget::Name(name.to_string())
    }
}

impl From<String> for CommandTarget {
    fn from(name: String) -> Self {
        CommandTarget::Name(name)
    }
}

impl From<BindingId> for CommandTarget {
    fn from(id: BindingId) -> Self {
        CommandTarget::Binding(id)
    }
}

impl From<&RemoteProperty> for CommandTarget {
    fn from(property: &RemoteProperty) -> Self {
        CommandTarget::Binding(property.id())
    }
}

impl From<&Arc<RemoteProperty>> for CommandTarget {
    fn from(property: &Arc<RemoteProperty>) -> Self {
        CommandTarget::Binding(property.id())
    }
}

impl From<&RemoteAction> for CommandTarget {
    fn from(action: &RemoteAction) -> Self {
        CommandTarget::Binding(action.id())
    }
}

impl From<&Arc<RemoteAction>> for CommandTarget {
    fn from(action: &Arc<RemoteAction>) -> Self {
        CommandTarget::Binding(action.id())
    }
}

impl From<Value> for CommandTarget {
    fn from(value: Value) -> Self {
        CommandTarget::Value(value)
    }
}

impl From<f64> for CommandTarget {
    fn from(value: f64) -> Self {
        CommandTarget::Value(Value::Float(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_per_binding() {
        let a = RemoteProperty::float("a", "volt");
        let b = RemoteProperty::float("b", "volt");
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn targets_from_bindings_carry_their_id() {
        let p = RemoteProperty::float("a", "volt");
        assert_eq!(CommandTarget::from(&p), CommandTarget::Binding(p.id()));
        assert_eq!(CommandTarget::from("a"), CommandTarget::Name("a".into()));
    }

    #[test]
    fn value_targets_produce_guidance() {
        let err = CommandTarget::not_a_binding(&Value::Float(1550.0));
        assert!(err.to_string().contains("Hint"));
    }
}
