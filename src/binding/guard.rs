//! Access guards: preconditions checked before a binding talks to the instrument.

use crate::device::Device;
use crate::error::{AppResult, LabError};
use crate::value::SettingEnum;
use std::fmt;
use std::sync::Arc;

type GuardFn = dyn Fn(&mut Device) -> AppResult<()> + Send + Sync;

/// A check run before every read, write or invocation of a binding.
///
/// Guards fail with [`LabError::State`] when the instrument is in a mode where the
/// binding makes no sense (e.g. a spectrum-analyzer setting while in IQ mode).
#[derive(Clone)]
pub struct AccessGuard {
    description: String,
    check: Arc<GuardFn>,
}

impl AccessGuard {
    /// Wrap an arbitrary check.
    pub fn new<F>(description: impl Into<String>, check: F) -> Self
    where
        F: Fn(&mut Device) -> AppResult<()> + Send + Sync + 'static,
    {
        Self {
            description: description.into(),
            check: Arc::new(check),
        }
    }

    /// Require that the enum-valued property `property` currently reads `expected`.
    pub fn require_enum<E>(property: &str, expected: E, message: &str) -> Self
    where
        E: SettingEnum + PartialEq + Send + Sync,
    {
        let property = property.to_string();
        let message = message.to_string();
        Self::new(
            format!("{property} == {}", expected.name()),
            move |device: &mut Device| {
                let current = E::from_value(&device.read(&property)?)?;
                if current == expected {
                    Ok(())
                } else {
                    Err(LabError::State(message.clone()))
                }
            },
        )
    }

    /// Run the check.
    pub fn check(&self, device: &mut Device) -> AppResult<()> {
        (self.check)(device)
    }

    /// What the guard requires.
    pub fn description(&self) -> &str {
        &self.description
    }
}

impl fmt::Debug for AccessGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessGuard")
            .field("description", &self.description)
            .finish()
    }
}
