//! Devices: one live session with one physical instrument.
//!
//! A [`Device`] owns its transport, its merged settings, the metadata registry
//! assembled from its driver and the command options configured for it. Bindings
//! declared on the [`DriverDescriptor`] are reached by name through [`Device::read`],
//! [`Device::write`] and [`Device::call`].
//!
//! # Lifecycle
//!
//! 1. Defaults of the driver (and its ancestors) are merged with caller settings
//! 2. The id is claimed; a second live device with the same id is refused unless
//!    `error_on_double_connect = false`
//! 3. The transport is opened, metadata getters are registered, configured
//!    command options are applied and connect hooks run
//! 4. [`Device::close`] (or drop) releases the transport and the id

pub mod descriptor;
pub mod registry;

pub use descriptor::{ConnectHook, DriverBuilder, DriverDescriptor, MetadataGetter};
pub use registry::{DeviceInfo, DeviceRegistry, DriverRef};

use crate::binding::{
    ActionOutput, BindingId, CallArgs, CommandOptions, CommandTarget, OptionKey, RemoteAction,
    RemoteProperty,
};
use crate::error::{AppResult, LabError};
use crate::transport::{ByteOrder, NumericType, Transport, TransportError, TransportFactory};
use crate::value::{Metadata, Settings, Value};
use indexmap::IndexMap;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// Completion-query token appended by [`Device::wait_until_done`].
pub const COMPLETION_QUERY: &str = "*OPC?";

/// Setting that controls the double-connect check.
pub const DOUBLE_CONNECT_SETTING: &str = "error_on_double_connect";

/// Setting holding per-binding command options.
pub const COMMAND_OPTIONS_SETTING: &str = "command_options";

// Live device ids and how many sessions hold each.
static LIVE_IDS: Lazy<Mutex<HashMap<String, usize>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn claim_id(id: &str, strict: bool) -> AppResult<()> {
    let mut live = LIVE_IDS.lock().unwrap_or_else(PoisonError::into_inner);
    let count = live.entry(id.to_string()).or_insert(0);
    if strict && *count > 0 {
        return Err(LabError::AlreadyConnected(id.to_string()));
    }
    *count += 1;
    Ok(())
}

fn release_id(id: &str) {
    let mut live = LIVE_IDS.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(count) = live.get_mut(id) {
        *count -= 1;
        if *count == 0 {
            live.remove(id);
        }
    }
}

/// Returns true if a device with this id currently holds an open transport.
pub fn is_connected(id: &str) -> bool {
    LIVE_IDS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .contains_key(id)
}

/// Merge driver defaults with caller settings; caller settings win.
pub fn merge_settings(driver: &DriverDescriptor, overrides: Settings) -> Settings {
    let mut settings = driver.default_settings().clone();
    for (k, v) in overrides {
        settings.insert(k, v);
    }
    settings
}

/// A connected instrument.
pub struct Device {
    id: String,
    driver: Arc<DriverDescriptor>,
    transport: Option<Box<dyn Transport>>,
    settings: Settings,
    metadata_registry: IndexMap<String, MetadataGetter>,
    command_options: HashMap<BindingId, CommandOptions>,
    query_params: Settings,
}

impl Device {
    /// Open a transport through `factory` and construct the device.
    pub fn connect(
        id: &str,
        driver: Arc<DriverDescriptor>,
        overrides: Settings,
        factory: &dyn TransportFactory,
    ) -> AppResult<Self> {
        let settings = merge_settings(&driver, overrides);
        if double_connect_strict(&settings) && is_connected(id) {
            return Err(LabError::AlreadyConnected(id.to_string()));
        }
        let transport = factory.open(id, &settings)?;
        Self::assemble(id, driver, settings, transport)
    }

    /// Construct the device around an already open transport.
    pub fn with_transport(
        id: &str,
        driver: Arc<DriverDescriptor>,
        overrides: Settings,
        transport: Box<dyn Transport>,
    ) -> AppResult<Self> {
        let settings = merge_settings(&driver, overrides);
        Self::assemble(id, driver, settings, transport)
    }

    fn assemble(
        id: &str,
        driver: Arc<DriverDescriptor>,
        settings: Settings,
        mut transport: Box<dyn Transport>,
    ) -> AppResult<Self> {
        if let Err(err) = claim_id(id, double_connect_strict(&settings)) {
            if let Err(close_err) = transport.close() {
                warn!(device = %id, error = %close_err, "failed to close refused transport");
            }
            return Err(err);
        }
        let description = transport.describe();

        // From here on, dropping `device` closes the transport and releases the id.
        let mut device = Device {
            id: id.to_string(),
            driver,
            transport: Some(transport),
            settings,
            metadata_registry: IndexMap::new(),
            command_options: HashMap::new(),
            query_params: Settings::new(),
        };
        device.register_driver_metadata()?;
        device.apply_configured_options()?;
        let hooks = device.driver.connect_hooks().to_vec();
        for hook in hooks {
            hook(&mut device)?;
        }
        info!(device = %device.id, driver = %device.driver.name(), transport = %description, "device connected");
        Ok(device)
    }

    fn register_driver_metadata(&mut self) -> AppResult<()> {
        let driver = Arc::clone(&self.driver);
        for field in driver.metadata_fields() {
            let getter: MetadataGetter = if let Some(getter) = driver.metadata_getter(field) {
                Arc::clone(getter)
            } else if driver.property(field).is_some() {
                let name = field.clone();
                Arc::new(move |device: &mut Device| device.read(&name))
            } else if self.settings.contains_key(field) {
                let name = field.clone();
                Arc::new(move |device: &mut Device| {
                    Ok(device.settings.get(&name).cloned().unwrap_or_default())
                })
            } else {
                return Err(LabError::Configuration(format!(
                    "metadata field '{field}' of driver '{}' has no getter, property or setting",
                    driver.name()
                )));
            };
            self.register_metadata(field, getter);
        }
        Ok(())
    }

    fn apply_configured_options(&mut self) -> AppResult<()> {
        let Some(table) = self.settings.get(COMMAND_OPTIONS_SETTING).cloned() else {
            return Ok(());
        };
        let table = table.as_map().cloned().ok_or_else(|| {
            LabError::Configuration(format!(
                "'{COMMAND_OPTIONS_SETTING}' of device '{}' must be a table keyed by binding name",
                self.id
            ))
        })?;
        for (name, options) in table {
            let options = CommandOptions::from_value(&options)?;
            self.set_command_option(name.as_str(), options)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Process-unique device id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Driver this device was built from.
    pub fn driver(&self) -> &Arc<DriverDescriptor> {
        &self.driver
    }

    /// Merged settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// One setting.
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    /// Whether the transport is still open.
    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    /// Values available to command placeholders.
    pub fn query_params(&self) -> &Settings {
        &self.query_params
    }

    /// Set a placeholder value for subsequent commands.
    pub fn set_query_param(&mut self, key: &str, value: impl Into<Value>) {
        self.query_params.insert(key.to_string(), value.into());
    }

    /// Run `f` with extra placeholder values, restoring the previous ones afterwards.
    ///
    /// ```
    /// # use labframe::binding::RemoteProperty;
    /// # use labframe::device::{Device, DriverDescriptor};
    /// # use labframe::transport::MockTransport;
    /// # use labframe::value::Settings;
    /// let driver = DriverDescriptor::builder("Scope")
    ///     .property(RemoteProperty::float("scale", "ch{channel}:scale"))
    ///     .build();
    /// let mock = MockTransport::new();
    /// mock.handle().set_value("ch2:scale", "0.5");
    /// let mut scope = Device::with_transport("doc_scope", driver, Settings::new(), Box::new(mock)).unwrap();
    ///
    /// let scale = scope
    ///     .with_query_params([("channel".to_string(), 2.into())].into_iter().collect(), |dev| dev.get::<f64>("scale"))
    ///     .unwrap();
    /// assert_eq!(scale, 0.5);
    /// assert!(scope.query_params().is_empty());
    /// ```
    pub fn with_query_params<R>(
        &mut self,
        params: Settings,
        f: impl FnOnce(&mut Device) -> AppResult<R>,
    ) -> AppResult<R> {
        let saved = self.query_params.clone();
        for (k, v) in params {
            self.query_params.insert(k, v);
        }
        let result = f(self);
        self.query_params = saved;
        result
    }

    // -------------------------------------------------------------------------
    // Bindings
    // -------------------------------------------------------------------------

    /// Property declared under `name`.
    pub fn property(&self, name: &str) -> AppResult<Arc<RemoteProperty>> {
        self.driver
            .property(name)
            .cloned()
            .ok_or_else(|| LabError::CommandLookup(name.to_string()))
    }

    /// Action declared under `name`.
    pub fn action(&self, name: &str) -> AppResult<Arc<RemoteAction>> {
        self.driver
            .action(name)
            .cloned()
            .ok_or_else(|| LabError::CommandLookup(name.to_string()))
    }

    /// Read property `name`.
    pub fn read(&mut self, name: &str) -> AppResult<Value> {
        let property = self.property(name)?;
        property.read(self)
    }

    /// Read property `name` as a concrete type.
    pub fn get<T>(&mut self, name: &str) -> AppResult<T>
    where
        T: TryFrom<Value, Error = LabError>,
    {
        T::try_from(self.read(name)?)
    }

    /// Write property `name`.
    pub fn write(&mut self, name: &str, value: impl Into<Value>) -> AppResult<()> {
        let property = self.property(name)?;
        property.write(self, value.into())
    }

    /// Invoke action `name`.
    pub fn call(&mut self, name: &str, args: CallArgs) -> AppResult<ActionOutput> {
        let action = self.action(name)?;
        action.invoke(self, args)
    }

    // -------------------------------------------------------------------------
    // Command options
    // -------------------------------------------------------------------------

    fn resolve_target(&self, target: CommandTarget) -> AppResult<BindingId> {
        match target {
            CommandTarget::Name(name) => self
                .driver
                .binding_id(&name)
                .ok_or(LabError::CommandLookup(name)),
            CommandTarget::Binding(id) if self.driver.owns_binding(id) => Ok(id),
            CommandTarget::Binding(id) => Err(LabError::CommandLookup(id.to_string())),
            CommandTarget::Value(value) => Err(CommandTarget::not_a_binding(&value)),
        }
    }

    /// Options configured for the binding with handle `id`.
    pub fn command_options(&self, id: BindingId) -> Option<&CommandOptions> {
        self.command_options.get(&id)
    }

    /// Options configured for `target`.
    pub fn command_option(&self, target: impl Into<CommandTarget>) -> AppResult<Option<&CommandOptions>> {
        let id = self.resolve_target(target.into())?;
        Ok(self.command_options.get(&id))
    }

    /// Attach options to a binding, merging with what is already set.
    pub fn set_command_option(
        &mut self,
        target: impl Into<CommandTarget>,
        options: CommandOptions,
    ) -> AppResult<()> {
        let id = self.resolve_target(target.into())?;
        debug!(device = %self.id, binding = ?self.driver.binding_name(id), ?options, "set command option");
        self.command_options.entry(id).or_default().merge(&options);
        Ok(())
    }

    /// Remove named options from a binding.
    pub fn remove_command_option(
        &mut self,
        target: impl Into<CommandTarget>,
        keys: &[OptionKey],
    ) -> AppResult<()> {
        let id = self.resolve_target(target.into())?;
        if let Some(options) = self.command_options.get_mut(&id) {
            options.remove(keys);
            if options.is_empty() {
                self.command_options.remove(&id);
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Metadata
    // -------------------------------------------------------------------------

    /// Register a metadata getter. Returns false (and keeps the existing getter) if
    /// `field` is already registered.
    pub fn register_metadata(&mut self, field: &str, getter: MetadataGetter) -> bool {
        if self.metadata_registry.contains_key(field) {
            return false;
        }
        self.metadata_registry.insert(field.to_string(), getter);
        true
    }

    /// Registered metadata field names, in registration order.
    pub fn metadata_fields(&self) -> Vec<&str> {
        self.metadata_registry.keys().map(String::as_str).collect()
    }

    /// Evaluate every metadata getter.
    ///
    /// Enum members are stored by their symbolic name.
    pub fn collect_metadata(&mut self) -> AppResult<Metadata> {
        let getters: Vec<(String, MetadataGetter)> = self
            .metadata_registry
            .iter()
            .map(|(k, g)| (k.clone(), Arc::clone(g)))
            .collect();
        let mut metadata = Metadata::new();
        for (field, getter) in getters {
            let value = match getter(self)? {
                Value::Enum(member) => Value::Text(member.member),
                other => other,
            };
            metadata.insert(field, value);
        }
        Ok(metadata)
    }

    // -------------------------------------------------------------------------
    // Raw exchanges
    // -------------------------------------------------------------------------

    fn transport_mut(&mut self) -> AppResult<&mut dyn Transport> {
        match self.transport.as_deref_mut() {
            Some(transport) => Ok(transport),
            None => Err(LabError::Closed(self.id.clone())),
        }
    }

    /// Send one command.
    pub fn write_command(&mut self, command: &str) -> AppResult<()> {
        trace!(device = %self.id, %command, "write");
        self.transport_mut()?.write(command)?;
        Ok(())
    }

    /// Read one response.
    pub fn read_response(&mut self) -> AppResult<String> {
        let response = self.transport_mut()?.read()?;
        trace!(device = %self.id, %response, "read");
        Ok(response)
    }

    /// Send a command and read its response.
    pub fn query(&mut self, command: &str) -> AppResult<String> {
        trace!(device = %self.id, %command, "query");
        let response = self.transport_mut()?.query(command)?;
        trace!(device = %self.id, %response, "response");
        Ok(response)
    }

    /// Send a command and read back a binary block.
    pub fn query_block(&mut self, command: &str) -> AppResult<Vec<u8>> {
        trace!(device = %self.id, %command, "block query");
        let payload = self.transport_mut()?.query_block(command)?;
        trace!(device = %self.id, bytes = payload.len(), "block received");
        Ok(payload)
    }

    /// Send a command and decode the binary block it returns.
    pub fn query_binary(
        &mut self,
        command: &str,
        kind: NumericType,
        order: ByteOrder,
    ) -> AppResult<Vec<f64>> {
        trace!(device = %self.id, %command, ?kind, ?order, "binary query");
        Ok(self.transport_mut()?.query_binary(command, kind, order)?)
    }

    /// Instrument status byte.
    pub fn status_byte(&mut self) -> AppResult<u8> {
        Ok(self.transport_mut()?.status_byte()?)
    }

    /// `*IDN?` response.
    pub fn identify(&mut self) -> AppResult<String> {
        Ok(self.query("*IDN?")?.trim().to_string())
    }

    /// Block until the instrument reports completion.
    ///
    /// Sends `command;*OPC?` (or just `*OPC?`), then reads until a response arrives.
    /// A transport read timeout is retried; any other error is returned. With
    /// `max_wait` set, waiting longer than that fails with [`LabError::Timeout`].
    pub fn wait_until_done(
        &mut self,
        command: Option<&str>,
        max_wait: Option<Duration>,
    ) -> AppResult<String> {
        let full = match command {
            Some(command) => format!("{command};{COMPLETION_QUERY}"),
            None => COMPLETION_QUERY.to_string(),
        };
        self.write_command(&full)?;

        let started = Instant::now();
        loop {
            match self.transport_mut()?.read() {
                Ok(response) => {
                    trace!(device = %self.id, %response, elapsed = ?started.elapsed(), "operation complete");
                    return Ok(response.trim().to_string());
                }
                Err(TransportError::Timeout(_)) => {
                    let waited = started.elapsed();
                    if max_wait.is_some_and(|max| waited >= max) {
                        return Err(LabError::Timeout {
                            command: full,
                            waited,
                        });
                    }
                    debug!(device = %self.id, waited_ms = waited.as_millis() as u64, "still waiting for completion");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Close the transport and release the id. Repeated calls are no-ops.
    pub fn close(&mut self) -> AppResult<()> {
        if let Some(mut transport) = self.transport.take() {
            release_id(&self.id);
            info!(device = %self.id, "device closed");
            transport.close()?;
        }
        Ok(())
    }
}

fn double_connect_strict(settings: &Settings) -> bool {
    settings
        .get(DOUBLE_CONNECT_SETTING)
        .and_then(Value::as_bool)
        .unwrap_or(true)
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(device = %self.id, error = %err, "error while closing device");
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("driver", &self.driver.name())
            .field("open", &self.is_open())
            .field("settings", &self.settings)
            .field("query_params", &self.query_params)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::{RemoteAction, RemoteProperty};
    use crate::transport::{MockHandle, MockTransport};
    use tracing_test::traced_test;

    fn driver() -> Arc<DriverDescriptor> {
        DriverDescriptor::builder("Meter")
            .default_setting("timeout_ms", 500)
            .metadata_fields(["wavelength", "timeout_ms"])
            .property(RemoteProperty::float("wavelength", "sense:correction:wavelength"))
            .property(RemoteProperty::float("power", "read").read_only())
            .action(RemoteAction::new("zero", "sense:correction:collect:zero"))
            .build()
    }

    fn open(id: &str) -> (Device, MockHandle) {
        let mock = MockTransport::new();
        let handle = mock.handle();
        let device = Device::with_transport(id, driver(), Settings::new(), Box::new(mock)).unwrap();
        (device, handle)
    }

    #[test]
    fn settings_merge_defaults_with_overrides() {
        let mut overrides = Settings::new();
        overrides.insert("timeout_ms".into(), Value::Int(100));
        overrides.insert("address".into(), Value::from("mock://"));
        let merged = merge_settings(&driver(), overrides);
        assert_eq!(merged["timeout_ms"], Value::Int(100));
        assert_eq!(merged["address"], Value::from("mock://"));
    }

    #[test]
    fn second_live_device_with_same_id_is_refused() {
        let (_first, _) = open("device_unit_double");
        let err = Device::with_transport(
            "device_unit_double",
            driver(),
            Settings::new(),
            Box::new(MockTransport::new()),
        )
        .unwrap_err();
        assert!(matches!(err, LabError::AlreadyConnected(_)));

        let mut relaxed = Settings::new();
        relaxed.insert(DOUBLE_CONNECT_SETTING.into(), Value::Bool(false));
        let second =
            Device::with_transport("device_unit_double", driver(), relaxed, Box::new(MockTransport::new()));
        assert!(second.is_ok());
    }

    #[test]
    fn close_releases_the_id() {
        let (mut device, handle) = open("device_unit_close");
        assert!(is_connected("device_unit_close"));
        device.close().unwrap();
        device.close().unwrap();
        assert_eq!(handle.close_count(), 1);
        assert!(!is_connected("device_unit_close"));
        assert!(matches!(device.read("wavelength"), Err(LabError::Closed(_))));
    }

    #[test]
    fn metadata_reads_properties_and_settings() {
        let (mut device, handle) = open("device_unit_metadata");
        handle.set_value("sense:correction:wavelength", "1550.0");
        let metadata = device.collect_metadata().unwrap();
        assert_eq!(metadata["wavelength"], Value::Float(1550.0));
        assert_eq!(metadata["timeout_ms"], Value::Int(500));
        assert_eq!(device.metadata_fields(), ["wavelength", "timeout_ms"]);
    }

    #[test]
    fn metadata_registration_is_deduplicated() {
        let (mut device, _) = open("device_unit_register");
        let added = device.register_metadata("operator", Arc::new(|_: &mut Device| Ok(Value::from("ana"))));
        let again = device.register_metadata("operator", Arc::new(|_: &mut Device| Ok(Value::from("bo"))));
        assert!(added);
        assert!(!again);
        assert_eq!(device.collect_metadata().unwrap()["operator"], Value::from("ana"));
    }

    #[test]
    fn unknown_metadata_source_is_rejected() {
        let driver = DriverDescriptor::builder("Broken")
            .metadata_fields(["nowhere"])
            .build();
        let err = Device::with_transport("device_unit_broken", driver, Settings::new(), Box::new(MockTransport::new()))
            .unwrap_err();
        assert!(matches!(err, LabError::Configuration(_)));
        assert!(!is_connected("device_unit_broken"));
    }

    #[test]
    fn command_option_targets() {
        let (mut device, _) = open("device_unit_targets");
        let power = device.property("power").unwrap();
        device
            .set_command_option(&power, CommandOptions::new().with_value_multiplier(1e3))
            .unwrap();
        assert_eq!(
            device.command_options(power.id()).unwrap().value_multiplier,
            Some(1e3)
        );
        assert!(matches!(
            device.set_command_option("no_such", CommandOptions::new()),
            Err(LabError::CommandLookup(_))
        ));
        assert!(matches!(
            device.set_command_option(Value::Float(3.0), CommandOptions::new()),
            Err(LabError::NotABinding(_))
        ));
        let stranger = RemoteProperty::float("stranger", "x");
        assert!(matches!(
            device.set_command_option(&stranger, CommandOptions::new()),
            Err(LabError::CommandLookup(_))
        ));

        device
            .remove_command_option("power", &[OptionKey::ValueMultiplier])
            .unwrap();
        assert!(device.command_options(power.id()).is_none());
    }

    #[test]
    fn command_options_from_settings() {
        let mut table = IndexMap::new();
        let mut power = IndexMap::new();
        power.insert("value_multiplier".to_string(), Value::Float(1e3));
        table.insert("power".to_string(), Value::Map(power));
        let mut settings = Settings::new();
        settings.insert(COMMAND_OPTIONS_SETTING.into(), Value::Map(table));

        let mock = MockTransport::new();
        mock.handle().set_value("read", "0.002");
        let mut device =
            Device::with_transport("device_unit_configured", driver(), settings, Box::new(mock)).unwrap();
        assert_eq!(device.get::<f64>("power").unwrap(), 2.0);
    }

    #[test]
    fn wait_returns_completion_code() {
        let (mut device, handle) = open("device_unit_wait");
        let code = device.wait_until_done(Some("init"), None).unwrap();
        assert_eq!(code, "1");
        assert_eq!(handle.writes(), ["init;*OPC?"]);
    }

    #[test]
    #[traced_test]
    fn wait_retries_on_read_timeouts() {
        let (mut device, handle) = open("device_unit_wait_retry");
        handle.delay_replies(3);
        let code = device.wait_until_done(None, Some(Duration::from_secs(5))).unwrap();
        assert_eq!(code, "1");
        assert!(logs_contain("still waiting for completion"));
    }

    #[test]
    fn wait_gives_up_after_max_wait() {
        let (mut device, handle) = open("device_unit_wait_timeout");
        handle.always_timeout(true);
        let started = Instant::now();
        let err = device
            .wait_until_done(Some("init"), Some(Duration::from_millis(10)))
            .unwrap_err();
        assert!(matches!(err, LabError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn other_read_errors_are_not_retried() {
        let (mut device, handle) = open("device_unit_wait_fail");
        device.write_command("noop").unwrap();
        handle.trigger_failure();
        let err = device.wait_until_done(None, None).unwrap_err();
        assert!(matches!(err, LabError::Transport(_)));
    }
}
