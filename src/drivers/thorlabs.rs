//! Thorlabs PM100D / PM200D optical power meters.

use super::scpi;
use crate::binding::{CallArgs, RemoteAction, RemoteProperty};
use crate::device::{Device, DriverDescriptor};
use crate::error::{AppResult, LabError};
use once_cell::sync::Lazy;
use std::sync::Arc;

static PM100D: Lazy<Arc<DriverDescriptor>> = Lazy::new(|| {
    DriverDescriptor::builder("Pm100d")
        .extends(&scpi::descriptor())
        .metadata_fields(["wavelength", "average_count"])
        .property(RemoteProperty::int("average_count", "sense:average:count"))
        .property(RemoteProperty::float("wavelength", "sense:correction:wavelength"))
        .property(RemoteProperty::bool("auto_range", "sense:power:range:auto"))
        .property(RemoteProperty::float("power", "read").read_only())
        .action(RemoteAction::new("adjust_zero", "sense:correction:collect:zero:initiate"))
        .action(RemoteAction::new("configure_power", "configure:power"))
        .build()
});

/// Driver descriptor, registered as `thorlabs.Pm100d`.
pub fn descriptor() -> Arc<DriverDescriptor> {
    Arc::clone(&PM100D)
}

/// Typed view of a device built from the PM100D driver.
pub struct Pm100d<'a> {
    device: &'a mut Device,
}

impl<'a> Pm100d<'a> {
    /// Wrap `device`, which must use this driver or one extending it.
    pub fn new(device: &'a mut Device) -> AppResult<Self> {
        if !device.driver().is_a("Pm100d") {
            return Err(LabError::Configuration(format!(
                "device '{}' uses driver '{}', not Pm100d",
                device.id(),
                device.driver().name()
            )));
        }
        Ok(Self { device })
    }

    /// Current power reading (W).
    pub fn power(&mut self) -> AppResult<f64> {
        self.device.get("power")
    }

    /// Correction wavelength (nm).
    pub fn wavelength(&mut self) -> AppResult<f64> {
        self.device.get("wavelength")
    }

    /// Set the correction wavelength (nm).
    pub fn set_wavelength(&mut self, nm: f64) -> AppResult<()> {
        self.device.write("wavelength", nm)
    }

    /// Number of averages per reading.
    pub fn average_count(&mut self) -> AppResult<i64> {
        self.device.get("average_count")
    }

    /// Set the number of averages per reading.
    pub fn set_average_count(&mut self, count: i64) -> AppResult<()> {
        self.device.write("average_count", count)
    }

    /// Whether auto ranging is on.
    pub fn auto_range(&mut self) -> AppResult<bool> {
        self.device.get("auto_range")
    }

    /// Switch auto ranging.
    pub fn set_auto_range(&mut self, enabled: bool) -> AppResult<()> {
        self.device.write("auto_range", enabled)
    }

    /// Zero the detector offset.
    pub fn adjust_zero(&mut self) -> AppResult<()> {
        self.device.call("adjust_zero", CallArgs::new()).map(|_| ())
    }

    /// Set up a power measurement.
    pub fn configure_power(&mut self) -> AppResult<()> {
        self.device.call("configure_power", CallArgs::new()).map(|_| ())
    }

    /// The wrapped device.
    pub fn device(&mut self) -> &mut Device {
        self.device
    }
}
