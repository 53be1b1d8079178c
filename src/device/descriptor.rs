//! Driver descriptors: the static catalog a device is built from.
//!
//! A driver is composed explicitly. [`DriverBuilder::extends`] copies everything a
//! parent driver declares (default settings, metadata fields, bindings, getters and
//! connect hooks) and the child then adds to it. Nothing is discovered at runtime.

use super::Device;
use crate::binding::{BindingId, RemoteAction, RemoteProperty};
use crate::error::AppResult;
use crate::value::{Settings, Value};
use indexmap::IndexMap;
use std::fmt;
use std::sync::Arc;

/// Computes one metadata field from a live device.
pub type MetadataGetter = Arc<dyn Fn(&mut Device) -> AppResult<Value> + Send + Sync>;

/// Runs once after a device of this driver has been constructed.
pub type ConnectHook = Arc<dyn Fn(&mut Device) -> AppResult<()> + Send + Sync>;

/// Static description of an instrument driver.
#[derive(Clone)]
pub struct DriverDescriptor {
    name: String,
    lineage: Vec<String>,
    default_settings: Settings,
    metadata_fields: Vec<String>,
    properties: IndexMap<String, Arc<RemoteProperty>>,
    actions: IndexMap<String, Arc<RemoteAction>>,
    metadata_getters: IndexMap<String, MetadataGetter>,
    on_connect: Vec<ConnectHook>,
}

impl DriverDescriptor {
    /// Start declaring a driver named `name`.
    pub fn builder(name: impl Into<String>) -> DriverBuilder {
        let name = name.into();
        DriverBuilder {
            inner: DriverDescriptor {
                lineage: vec![name.clone()],
                name,
                default_settings: Settings::new(),
                metadata_fields: Vec::new(),
                properties: IndexMap::new(),
                actions: IndexMap::new(),
                metadata_getters: IndexMap::new(),
                on_connect: Vec::new(),
            },
        }
    }

    /// Driver name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Driver names from the root ancestor to this driver.
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    /// Returns true if this driver is `name` or extends it.
    pub fn is_a(&self, name: &str) -> bool {
        self.lineage.iter().any(|n| n == name)
    }

    /// Default settings, parents first.
    pub fn default_settings(&self) -> &Settings {
        &self.default_settings
    }

    /// Metadata field names in first-seen order, without duplicates.
    pub fn metadata_fields(&self) -> &[String] {
        &self.metadata_fields
    }

    /// Remote property declared under `name`.
    pub fn property(&self, name: &str) -> Option<&Arc<RemoteProperty>> {
        self.properties.get(name)
    }

    /// Remote action declared under `name`.
    pub fn action(&self, name: &str) -> Option<&Arc<RemoteAction>> {
        self.actions.get(name)
    }

    /// All properties in declaration order.
    pub fn properties(&self) -> impl Iterator<Item = &Arc<RemoteProperty>> {
        self.properties.values()
    }

    /// All actions in declaration order.
    pub fn actions(&self) -> impl Iterator<Item = &Arc<RemoteAction>> {
        self.actions.values()
    }

    /// Custom getter registered for a metadata field.
    pub fn metadata_getter(&self, field: &str) -> Option<&MetadataGetter> {
        self.metadata_getters.get(field)
    }

    pub(crate) fn connect_hooks(&self) -> &[ConnectHook] {
        &self.on_connect
    }

    /// Resolve a binding name to its id (properties first, then actions).
    pub fn binding_id(&self, name: &str) -> Option<BindingId> {
        self.properties
            .get(name)
            .map(|p| p.id())
            .or_else(|| self.actions.get(name).map(|a| a.id()))
    }

    /// Returns true if `id` belongs to a binding of this driver.
    pub fn owns_binding(&self, id: BindingId) -> bool {
        self.properties.values().any(|p| p.id() == id) || self.actions.values().any(|a| a.id() == id)
    }

    /// Name of the binding with handle `id`.
    pub fn binding_name(&self, id: BindingId) -> Option<&str> {
        self.properties
            .values()
            .find(|p| p.id() == id)
            .map(|p| p.name())
            .or_else(|| self.actions.values().find(|a| a.id() == id).map(|a| a.name()))
    }
}

impl fmt::Debug for DriverDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverDescriptor")
            .field("name", &self.name)
            .field("lineage", &self.lineage)
            .field("default_settings", &self.default_settings)
            .field("metadata_fields", &self.metadata_fields)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .field("actions", &self.actions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder for [`DriverDescriptor`].
///
/// # Example
///
/// ```
/// use labframe::binding::RemoteProperty;
/// use labframe::device::DriverDescriptor;
///
/// let base = DriverDescriptor::builder("Laser")
///     .metadata_fields(["wavelength"])
///     .property(RemoteProperty::float("wavelength", "wavelength"))
///     .build();
/// let tunable = DriverDescriptor::builder("TunableLaser")
///     .extends(&base)
///     .metadata_fields(["sweep_speed", "wavelength"])
///     .property(RemoteProperty::float("sweep_speed", "sweep:speed"))
///     .build();
///
/// assert_eq!(tunable.metadata_fields(), ["wavelength", "sweep_speed"]);
/// assert!(tunable.is_a("Laser"));
/// ```
pub struct DriverBuilder {
    inner: DriverDescriptor,
}

impl DriverBuilder {
    /// Inherit everything `parent` declares.
    ///
    /// Call before adding this driver's own entries: a child can add fields and
    /// override defaults or bindings by name, but parent metadata fields keep their
    /// position.
    pub fn extends(mut self, parent: &DriverDescriptor) -> Self {
        let own = self.inner.name.clone();
        self.inner.lineage = parent.lineage.clone();
        self.inner.lineage.push(own);
        for (k, v) in &parent.default_settings {
            self.inner.default_settings.insert(k.clone(), v.clone());
        }
        for field in &parent.metadata_fields {
            self.push_field(field);
        }
        for (k, v) in &parent.properties {
            self.inner.properties.insert(k.clone(), Arc::clone(v));
        }
        for (k, v) in &parent.actions {
            self.inner.actions.insert(k.clone(), Arc::clone(v));
        }
        for (k, v) in &parent.metadata_getters {
            self.inner.metadata_getters.insert(k.clone(), Arc::clone(v));
        }
        self.inner.on_connect.extend(parent.on_connect.iter().cloned());
        self
    }

    /// Add or override one default setting.
    pub fn default_setting(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.inner.default_settings.insert(key.to_string(), value.into());
        self
    }

    /// Append metadata fields; names already present are skipped.
    pub fn metadata_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for field in fields {
            self.push_field(field.as_ref());
        }
        self
    }

    fn push_field(&mut self, field: &str) {
        if !self.inner.metadata_fields.iter().any(|f| f == field) {
            self.inner.metadata_fields.push(field.to_string());
        }
    }

    /// Declare a remote property under its own name.
    pub fn property(mut self, property: RemoteProperty) -> Self {
        self.inner
            .properties
            .insert(property.name().to_string(), Arc::new(property));
        self
    }

    /// Declare a remote action under its own name.
    pub fn action(mut self, action: RemoteAction) -> Self {
        self.inner
            .actions
            .insert(action.name().to_string(), Arc::new(action));
        self
    }

    /// Compute metadata field `field` with a custom getter instead of a property read.
    pub fn metadata_getter<F>(mut self, field: &str, getter: F) -> Self
    where
        F: Fn(&mut Device) -> AppResult<Value> + Send + Sync + 'static,
    {
        self.inner
            .metadata_getters
            .insert(field.to_string(), Arc::new(getter));
        self
    }

    /// Run `hook` after construction, e.g. to put the instrument in a known state.
    pub fn on_connect<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut Device) -> AppResult<()> + Send + Sync + 'static,
    {
        self.inner.on_connect.push(Arc::new(hook));
        self
    }

    /// Finish the descriptor.
    pub fn build(self) -> Arc<DriverDescriptor> {
        Arc::new(self.inner)
    }
}
