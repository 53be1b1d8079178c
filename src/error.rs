//! Custom error types for the toolkit.
//!
//! This module defines the primary error type, `LabError`, used across the crate.
//! Using the `thiserror` crate, it provides one consistent place for every failure
//! that can surface to calling code, from instrument command bindings to data
//! containers and archive files.
//!
//! ## Error Hierarchy
//!
//! `LabError` consolidates these groups:
//!
//! - **Binding layer**: `Binding` (a command placeholder cannot be resolved),
//!   `ReadOnly` / `WriteDisabled` (a write where none is allowed), `State` (an access
//!   guard rejected the instrument's current mode), `UnknownEnumValue` (a wire response
//!   matches no member of a closed enumeration), `CommandLookup` and `NotABinding`
//!   (a command option was aimed at something that is not a binding).
//! - **Devices and registry**: `UnknownDevice`, `UnknownDriver`, `UntrustedDriver`,
//!   `InvalidName`, `AlreadyConnected`, `Closed`.
//! - **Synchronisation**: `Timeout` for a completion wait that exceeded its ceiling.
//! - **Data**: `Index` (malformed multi-axis index expression), `Shape`, `Archive`,
//!   `Fit`, `Unsupported`.
//! - **Wrapped sources**: `Transport`, `Io`, `Encoding` and `Config` are created from
//!   their underlying errors with `#[from]`, so `?` works throughout.
//!
//! Nothing is swallowed: every variant is returned to the caller unchanged. The only
//! local recovery anywhere in the crate is the retry on [`TransportError::Timeout`]
//! inside the completion-wait loop.

use crate::transport::TransportError;
use std::time::Duration;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, LabError>;

#[allow(missing_docs)]
#[derive(Error, Debug)]
pub enum LabError {
    #[error("Cannot resolve placeholder '{placeholder}' in command '{template}'")]
    Binding {
        template: String,
        placeholder: String,
    },

    #[error("Property '{0}' is read-only")]
    ReadOnly(String),

    #[error("Writing to '{0}' has been disabled by a command option")]
    WriteDisabled(String),

    #[error("Instrument state error: {0}")]
    State(String),

    #[error("Response '{wire}' does not match any member of {type_name}")]
    UnknownEnumValue { type_name: String, wire: String },

    #[error("Command '{0}' cannot be found")]
    CommandLookup(String),

    #[error(
        "Invalid command object '{0}'. Hint: don't supply the value read from a property; \
         supply either the binding's name (e.g. \"wavelength\") or its BindingId"
    )]
    NotABinding(String),

    #[error("Device '{0}' is not configured")]
    UnknownDevice(String),

    #[error("Driver '{0}' is not registered")]
    UnknownDriver(String),

    #[error("Driver '{driver}' is not in an allow-listed driver module (resolved module: '{module}')")]
    UntrustedDriver { driver: String, module: String },

    #[error("Invalid name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Device {0} already connected")]
    AlreadyConnected(String),

    #[error("Device {0} is closed")]
    Closed(String),

    #[error("Exceeded the maximum waiting time of {waited:?} for '{command}'")]
    Timeout { command: String, waited: Duration },

    #[error("Index error: {0}")]
    Index(String),

    #[error("Shape error: {0}")]
    Shape(String),

    #[error("Cannot convert '{text}' to {target}")]
    Conversion { text: String, target: &'static str },

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Fit error: {0}")]
    Fit(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive encoding error: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),
}

impl LabError {
    /// Shorthand for a [`LabError::Conversion`] failure.
    pub fn conversion(text: impl Into<String>, target: &'static str) -> Self {
        LabError::Conversion {
            text: text.into(),
            target,
        }
    }

    /// Returns true if this error came from a transport read that timed out.
    pub fn is_transport_timeout(&self) -> bool {
        matches!(self, LabError::Transport(TransportError::Timeout(_)))
    }
}

impl From<ndarray::ShapeError> for LabError {
    fn from(err: ndarray::ShapeError) -> Self {
        LabError::Shape(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_error_names_template_and_placeholder() {
        let err = LabError::Binding {
            template: "ch{channel}:scale".into(),
            placeholder: "channel".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ch{channel}:scale"));
        assert!(msg.contains("'channel'"));
    }

    #[test]
    fn guidance_error_explains_what_to_pass() {
        let msg = LabError::NotABinding("1550.0".into()).to_string();
        assert!(msg.contains("Hint"));
        assert!(msg.contains("BindingId"));
    }

    #[test]
    fn transport_timeout_is_recognised() {
        let err: LabError = TransportError::Timeout(Duration::from_millis(5)).into();
        assert!(err.is_transport_timeout());

        let err: LabError = TransportError::Closed.into();
        assert!(!err.is_transport_timeout());
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.lfa");
        let err: LabError = io.into();
        assert!(matches!(err, LabError::Io(_)));
    }
}
