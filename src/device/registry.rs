//! Device registry: lazy construction from configuration and a per-id cache.
//!
//! Configuration names a driver for every device id, either
//!
//! - a plain name registered ahead of time with [`DeviceRegistry::register_driver_class`], or
//! - a dotted path `module.Driver` whose module is a built-in driver module
//!   (`scpi`, `thorlabs`, `keysight`) or lies under an allow-listed prefix added
//!   with [`DeviceRegistry::register_driver_module`].
//!
//! Dotted paths are only ever looked up in the registry's catalog; there is no
//! dynamic loading.

use super::{Device, DriverDescriptor};
use crate::config::LabConfig;
use crate::drivers;
use crate::error::{AppResult, LabError};
use crate::transport::{AddressTransportFactory, TransportFactory};
use crate::value::{Settings, Value};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Reference to a driver, as found in configuration.
#[derive(Clone)]
pub enum DriverRef {
    /// Registered class name or dotted path.
    Name(String),
    /// Descriptor supplied directly.
    Descriptor(Arc<DriverDescriptor>),
}

impl fmt::Debug for DriverRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverRef::Name(name) => f.debug_tuple("Name").field(name).finish(),
            DriverRef::Descriptor(d) => f.debug_tuple("Descriptor").field(&d.name()).finish(),
        }
    }
}

impl fmt::Display for DriverRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverRef::Name(name) => f.write_str(name),
            DriverRef::Descriptor(d) => f.write_str(d.name()),
        }
    }
}

impl From<&str> for DriverRef {
    fn from(name: &str) -> Self {
        DriverRef::Name(name.to_string())
    }
}

impl From<String> for DriverRef {
    fn from(name: String) -> Self {
        DriverRef::Name(name)
    }
}

impl From<Arc<DriverDescriptor>> for DriverRef {
    fn from(descriptor: Arc<DriverDescriptor>) -> Self {
        DriverRef::Descriptor(descriptor)
    }
}

/// Configured device.
#[derive(Debug, Clone)]
struct DeviceEntry {
    driver: DriverRef,
    settings: Settings,
}

/// Information about a configured device (returned by list operations).
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// Device id.
    pub id: String,
    /// Driver reference as configured.
    pub driver: String,
    /// Whether the registry holds a live connection.
    pub connected: bool,
    /// Resolved driver name, or why resolution failed.
    pub resolution: Result<String, String>,
}

/// Registry of configured devices and live connections.
pub struct DeviceRegistry {
    devices: IndexMap<String, DeviceEntry>,
    driver_modules: Vec<String>,
    driver_classes: IndexMap<String, Arc<DriverDescriptor>>,
    catalog: IndexMap<String, Arc<DriverDescriptor>>,
    connected: IndexMap<String, Device>,
    factory: Box<dyn TransportFactory>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    /// Registry with the built-in driver catalog and address-based transports.
    pub fn new() -> Self {
        Self {
            devices: IndexMap::new(),
            driver_modules: Vec::new(),
            driver_classes: IndexMap::new(),
            catalog: drivers::builtin_catalog(),
            connected: IndexMap::new(),
            factory: Box::new(AddressTransportFactory),
        }
    }

    /// Open transports with `factory` instead of from the `address` setting.
    pub fn with_transport_factory(mut self, factory: impl TransportFactory + 'static) -> Self {
        self.factory = Box::new(factory);
        self
    }

    /// Registry populated from configuration.
    pub fn from_config(config: &LabConfig) -> AppResult<Self> {
        let mut registry = Self::new();
        for module in &config.drivers.modules {
            registry.register_driver_module(module);
        }
        for (id, device) in &config.devices {
            let settings = match Value::from(toml::Value::Table(device.settings.clone())) {
                Value::Map(map) => map,
                _ => Settings::new(),
            };
            registry.register_device(id, device.driver.as_str(), settings)?;
        }
        info!(devices = registry.devices.len(), "device registry loaded");
        Ok(registry)
    }

    /// Configure a device. Ids may not contain `.`.
    pub fn register_device(
        &mut self,
        id: &str,
        driver: impl Into<DriverRef>,
        settings: Settings,
    ) -> AppResult<()> {
        if id.contains('.') {
            return Err(LabError::InvalidName {
                name: id.to_string(),
                reason: "device ids cannot contain a '.'".into(),
            });
        }
        let driver = driver.into();
        debug!(device = %id, %driver, "register device");
        self.devices
            .insert(id.to_string(), DeviceEntry { driver, settings });
        Ok(())
    }

    /// Trust dotted driver paths under `module`.
    pub fn register_driver_module(&mut self, module: &str) {
        if !self.driver_modules.iter().any(|m| m == module) {
            self.driver_modules.push(module.to_string());
        }
    }

    /// Register a driver under a plain name. Names may not contain `.`.
    pub fn register_driver_class(
        &mut self,
        name: &str,
        descriptor: Arc<DriverDescriptor>,
    ) -> AppResult<()> {
        if name.contains('.') {
            return Err(LabError::InvalidName {
                name: name.to_string(),
                reason: "directly registered driver names cannot contain a '.'".into(),
            });
        }
        self.driver_classes.insert(name.to_string(), descriptor);
        Ok(())
    }

    /// Make a driver available under a dotted path (`my.lab.drivers.Laser`).
    ///
    /// The path is only resolvable if its module is trusted.
    pub fn register_driver_path(&mut self, path: &str, descriptor: Arc<DriverDescriptor>) {
        self.catalog.insert(path.to_string(), descriptor);
    }

    fn module_is_trusted(&self, module: &str) -> bool {
        drivers::BUILTIN_MODULES
            .iter()
            .copied()
            .chain(self.driver_modules.iter().map(String::as_str))
            .any(|trusted| module == trusted || module.starts_with(&format!("{trusted}.")))
    }

    /// Resolve a driver name to its descriptor.
    pub fn resolve_driver(&self, name: &str) -> AppResult<Arc<DriverDescriptor>> {
        if let Some(descriptor) = self.driver_classes.get(name) {
            return Ok(Arc::clone(descriptor));
        }
        let Some((module, _)) = name.rsplit_once('.') else {
            return Err(LabError::UnknownDriver(format!(
                "{name} (not registered directly; driver paths must include their module)"
            )));
        };
        if !self.module_is_trusted(module) {
            return Err(LabError::UntrustedDriver {
                driver: name.to_string(),
                module: module.to_string(),
            });
        }
        debug!(driver = %name, %module, "resolve driver path");
        self.catalog
            .get(name)
            .cloned()
            .ok_or_else(|| LabError::UnknownDriver(name.to_string()))
    }

    fn resolve_ref(&self, driver: &DriverRef) -> AppResult<Arc<DriverDescriptor>> {
        match driver {
            DriverRef::Name(name) => self.resolve_driver(name),
            DriverRef::Descriptor(descriptor) => Ok(Arc::clone(descriptor)),
        }
    }

    /// Connected device `id`, connecting it first if needed.
    pub fn get_device(&mut self, id: &str) -> AppResult<&mut Device> {
        self.get_device_with(id, None, Settings::new())
    }

    /// Like [`get_device`](Self::get_device), with a driver override and extra
    /// settings. Both only apply when a new connection is made.
    pub fn get_device_with(
        &mut self,
        id: &str,
        driver: Option<DriverRef>,
        overrides: Settings,
    ) -> AppResult<&mut Device> {
        if !self.connected.contains_key(id) {
            let device = self.connect(id, driver, overrides)?;
            self.connected.insert(id.to_string(), device);
        }
        self.connected
            .get_mut(id)
            .ok_or_else(|| LabError::UnknownDevice(id.to_string()))
    }

    fn connect(
        &self,
        id: &str,
        driver: Option<DriverRef>,
        overrides: Settings,
    ) -> AppResult<Device> {
        let entry = self
            .devices
            .get(id)
            .ok_or_else(|| LabError::UnknownDevice(id.to_string()))?;
        let driver = driver.unwrap_or_else(|| entry.driver.clone());
        let descriptor = self.resolve_ref(&driver)?;

        let mut settings = entry.settings.clone();
        for (k, v) in overrides {
            settings.insert(k, v);
        }
        debug!(device = %id, driver = %descriptor.name(), "connecting device");
        Device::connect(id, descriptor, settings, self.factory.as_ref())
    }

    /// Close and forget the live connection of `id`. Returns false if none existed.
    pub fn disconnect(&mut self, id: &str) -> AppResult<bool> {
        match self.connected.shift_remove(id) {
            Some(mut device) => {
                device.close()?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every live connection.
    pub fn disconnect_all(&mut self) -> AppResult<()> {
        for (_, mut device) in self.connected.drain(..) {
            device.close()?;
        }
        Ok(())
    }

    /// Whether `id` is configured.
    pub fn contains(&self, id: &str) -> bool {
        self.devices.contains_key(id)
    }

    /// Whether the registry holds a live connection for `id`.
    pub fn is_connected(&self, id: &str) -> bool {
        self.connected.contains_key(id)
    }

    /// Configured devices, in registration order.
    pub fn list_devices(&self) -> Vec<DeviceInfo> {
        self.devices
            .iter()
            .map(|(id, entry)| DeviceInfo {
                id: id.clone(),
                driver: entry.driver.to_string(),
                connected: self.connected.contains_key(id),
                resolution: self
                    .resolve_ref(&entry.driver)
                    .map(|d| d.name().to_string())
                    .map_err(|e| e.to_string()),
            })
            .collect()
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.devices.keys().collect::<Vec<_>>())
            .field("driver_modules", &self.driver_modules)
            .field("driver_classes", &self.driver_classes.keys().collect::<Vec<_>>())
            .field("connected", &self.connected.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn custom() -> Arc<DriverDescriptor> {
        DriverDescriptor::builder("Custom").build()
    }

    #[test]
    fn registered_classes_resolve_first() {
        let mut registry = DeviceRegistry::new();
        registry.register_driver_class("Custom", custom()).unwrap();
        assert_eq!(registry.resolve_driver("Custom").unwrap().name(), "Custom");
    }

    #[test]
    fn names_without_module_are_unknown() {
        let registry = DeviceRegistry::new();
        assert!(matches!(
            registry.resolve_driver("Custom"),
            Err(LabError::UnknownDriver(_))
        ));
    }

    #[test]
    fn builtin_paths_resolve() {
        let registry = DeviceRegistry::new();
        assert_eq!(
            registry.resolve_driver("thorlabs.Pm100d").unwrap().name(),
            "Pm100d"
        );
        assert!(matches!(
            registry.resolve_driver("thorlabs.Nope"),
            Err(LabError::UnknownDriver(_))
        ));
    }

    #[test]
    fn untrusted_modules_are_refused() {
        let mut registry = DeviceRegistry::new();
        registry.register_driver_path("mylab.drivers.Laser", custom());
        assert!(matches!(
            registry.resolve_driver("mylab.drivers.Laser"),
            Err(LabError::UntrustedDriver { .. })
        ));

        registry.register_driver_module("mylab");
        assert!(registry.resolve_driver("mylab.drivers.Laser").is_ok());
        // Prefix match is per module segment.
        registry.register_driver_path("mylabx.Laser", custom());
        assert!(matches!(
            registry.resolve_driver("mylabx.Laser"),
            Err(LabError::UntrustedDriver { .. })
        ));
    }

    #[test]
    fn dotted_names_are_rejected() {
        let mut registry = DeviceRegistry::new();
        assert!(matches!(
            registry.register_device("a.b", "thorlabs.Pm100d", Settings::new()),
            Err(LabError::InvalidName { .. })
        ));
        assert!(matches!(
            registry.register_driver_class("a.b", custom()),
            Err(LabError::InvalidName { .. })
        ));
    }

    #[test]
    fn unknown_device_id() {
        let mut registry = DeviceRegistry::new();
        assert!(matches!(
            registry.get_device("ghost"),
            Err(LabError::UnknownDevice(_))
        ));
    }
}
