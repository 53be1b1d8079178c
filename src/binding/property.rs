//! Remote properties: typed, readable (and optionally writable) instrument settings.

use super::convert::{ReadConverter, SemanticType, WriteConverter};
use super::guard::AccessGuard;
use super::template::CommandTemplate;
use super::BindingId;
use crate::device::Device;
use crate::error::{AppResult, LabError};
use crate::value::{EnumDescriptor, SettingEnum, Value};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// A remote property bound to one command template.
///
/// Created once per driver and shared by every device of that driver; the
/// [`BindingId`] assigned at creation keys per-device command options.
///
/// # Example
///
/// ```
/// use labframe::binding::{RemoteProperty, SemanticType};
///
/// let wavelength = RemoteProperty::new("wavelength", "sense:correction:wavelength", SemanticType::Float);
/// let power = RemoteProperty::new("power", "read", SemanticType::Float).read_only();
/// assert!(power.is_read_only());
/// assert_ne!(wavelength.id(), power.id());
/// ```
#[derive(Clone)]
pub struct RemoteProperty {
    id: BindingId,
    name: String,
    template: CommandTemplate,
    kind: SemanticType,
    read_suffix: String,
    set_delimiter: String,
    read_only: bool,
    read_on_write: bool,
    guard: Option<AccessGuard>,
    read_converter: Option<ReadConverter>,
    write_converter: Option<WriteConverter>,
}

impl RemoteProperty {
    /// New property using the default converters of `kind`.
    pub fn new(name: impl Into<String>, template: impl Into<String>, kind: SemanticType) -> Self {
        Self {
            id: BindingId::next(),
            name: name.into(),
            template: CommandTemplate::new(template),
            kind,
            read_suffix: "?".to_string(),
            set_delimiter: " ".to_string(),
            read_only: false,
            read_on_write: false,
            guard: None,
            read_converter: None,
            write_converter: None,
        }
    }

    /// Float property.
    pub fn float(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(name, template, SemanticType::Float)
    }

    /// Integer property.
    pub fn int(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(name, template, SemanticType::Int)
    }

    /// Boolean property using the `1`/`0` convention.
    pub fn bool(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(name, template, SemanticType::Bool)
    }

    /// Quoted-text property.
    pub fn text(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(name, template, SemanticType::Text)
    }

    /// Property holding a member of the setting enumeration `E`.
    pub fn enumeration<E: SettingEnum>(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self::new(name, template, SemanticType::Enum(E::DESCRIPTOR))
    }

    /// Refuse writes.
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Drain the response some instruments send after every setting command.
    pub fn read_on_write(mut self) -> Self {
        self.read_on_write = true;
        self
    }

    /// Check `guard` before every access.
    pub fn with_guard(mut self, guard: AccessGuard) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Suffix appended to the command for reads (default `?`).
    pub fn with_read_suffix(mut self, suffix: &str) -> Self {
        self.read_suffix = suffix.to_string();
        self
    }

    /// Text between command and value for writes (default a single space).
    pub fn with_delimiter(mut self, delimiter: &str) -> Self {
        self.set_delimiter = delimiter.to_string();
        self
    }

    /// Replace the default read conversion.
    pub fn with_read_converter<F>(mut self, convert: F) -> Self
    where
        F: Fn(&str) -> AppResult<Value> + Send + Sync + 'static,
    {
        self.read_converter = Some(Arc::new(convert));
        self
    }

    /// Replace the default write conversion.
    pub fn with_write_converter<F>(mut self, convert: F) -> Self
    where
        F: Fn(&Value) -> AppResult<String> + Send + Sync + 'static,
    {
        self.write_converter = Some(Arc::new(convert));
        self
    }

    /// Opaque identity of this binding.
    pub fn id(&self) -> BindingId {
        self.id
    }

    /// Attribute name on the driver.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Command template.
    pub fn template(&self) -> &CommandTemplate {
        &self.template
    }

    /// Semantic type selecting the default converters.
    pub fn kind(&self) -> SemanticType {
        self.kind
    }

    /// Enumeration descriptor, for enum-typed properties.
    pub fn enum_descriptor(&self) -> Option<EnumDescriptor> {
        match self.kind {
            SemanticType::Enum(d) => Some(d),
            _ => None,
        }
    }

    /// Whether writes are refused.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Read the current value from the instrument.
    ///
    /// Order: access guard, template resolution, query, read conversion, then the
    /// device's command options for this binding (multiply, then round).
    pub fn read(&self, device: &mut Device) -> AppResult<Value> {
        if let Some(guard) = &self.guard {
            guard.check(device)?;
        }
        let command = self.template.resolve(device.query_params())?;
        let response = device.query(&format!("{command}{}", self.read_suffix))?;
        let response = response.trim();

        let value = match &self.read_converter {
            Some(convert) => convert(response)?,
            None => self.kind.read(response)?,
        };
        let value = match device.command_options(self.id) {
            Some(options) => options.apply_read(value)?,
            None => value,
        };
        trace!(device = %device.id(), property = %self.name, %value, "read property");
        Ok(value)
    }

    /// Write a new value to the instrument.
    ///
    /// Order: read-only check, access guard, template resolution, command options
    /// (`disable_write`, then divide and round), write conversion, send. A
    /// read-on-write property then drains one response.
    pub fn write(&self, device: &mut Device, value: Value) -> AppResult<()> {
        if self.read_only {
            return Err(LabError::ReadOnly(self.name.clone()));
        }
        if let Some(guard) = &self.guard {
            guard.check(device)?;
        }
        let command = self.template.resolve(device.query_params())?;

        let value = match device.command_options(self.id) {
            Some(options) if options.write_disabled() => {
                return Err(LabError::WriteDisabled(self.name.clone()))
            }
            Some(options) => options.apply_write(value)?,
            None => value,
        };
        let wire = match &self.write_converter {
            Some(convert) => convert(&value)?,
            None => self.kind.write(&value)?,
        };

        let line = format!("{command}{}{wire}", self.set_delimiter);
        if self.read_on_write {
            let discarded = device.query(&line)?;
            trace!(device = %device.id(), property = %self.name, response = %discarded, "discarded write response");
        } else {
            device.write_command(&line)?;
        }
        Ok(())
    }
}

impl fmt::Debug for RemoteProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteProperty")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("template", &self.template.as_str())
            .field("kind", &self.kind)
            .field("read_only", &self.read_only)
            .field("guard", &self.guard)
            .finish()
    }
}
