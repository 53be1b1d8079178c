//! Integration tests for building devices from configuration
//!
//! A transport factory hands out mock transports and keeps their handles so the
//! tests can script the simulated instruments.

use labframe::binding::CommandOptions;
use labframe::config::LabConfig;
use labframe::drivers::thorlabs::Pm100d;
use labframe::transport::{MockHandle, MockTransport, Transport};
use labframe::{AppResult, DeviceRegistry, LabError, Settings, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const LAB: &str = r#"
computer_name = "optics-1"

[devices.meter_reg]
driver = "thorlabs.Pm100d"
address = "mock://meter"

[devices.meter_reg.command_options.wavelength]
value_multiplier = 1e9

[devices.esa_reg]
driver = "keysight.KeysightEsa"
address = "mock://esa"
timeout_ms = 50

[devices.laser_reg]
driver = "mylab.lasers.Toptica"
address = "mock://laser"
"#;

/// Configuration with device ids suffixed by `tag`; ids are process-wide.
fn lab(tag: &str) -> LabConfig {
    LabConfig::from_toml_str(&LAB.replace("_reg", &format!("_{tag}"))).unwrap()
}

type Handles = Arc<Mutex<HashMap<String, MockHandle>>>;

fn mock_registry(config: &LabConfig) -> (DeviceRegistry, Handles) {
    let handles: Handles = Arc::default();
    let shared = Arc::clone(&handles);
    let registry = DeviceRegistry::from_config(config)
        .unwrap()
        .with_transport_factory(move |id: &str, _settings: &Settings| -> AppResult<Box<dyn Transport>> {
            let mock = MockTransport::new();
            let handle = mock.handle();
            handle.set_value("sense:correction:wavelength", "1.55e-6");
            handle.set_value("sense:average:count", "4");
            shared.lock().unwrap().insert(id.to_string(), handle);
            Ok(Box::new(mock))
        });
    (registry, handles)
}

#[test]
fn test_devices_are_listed_with_their_resolution() {
    let config = lab("list");
    let (registry, _) = mock_registry(&config);

    let listed = registry.list_devices();
    assert_eq!(
        listed.iter().map(|d| d.id.as_str()).collect::<Vec<_>>(),
        ["meter_list", "esa_list", "laser_list"]
    );
    assert_eq!(listed[0].resolution, Ok("Pm100d".to_string()));
    assert_eq!(listed[1].resolution, Ok("KeysightEsa".to_string()));
    assert!(listed[2].resolution.is_err());
    assert!(listed.iter().all(|d| !d.connected));
}

#[test]
fn test_connect_lazily_and_apply_configured_options() {
    let config = lab("lazy");
    let (mut registry, handles) = mock_registry(&config);

    let device = registry.get_device("meter_lazy").unwrap();
    assert_eq!(device.setting("timeout_ms"), Some(&Value::Int(2000)));
    let mut meter = Pm100d::new(device).unwrap();
    // 1.55e-6 m read back in nm
    assert!((meter.wavelength().unwrap() - 1550.0).abs() < 1e-9);
    meter.set_wavelength(780.0).unwrap();

    let handle = handles.lock().unwrap()["meter_lazy"].clone();
    let written = handle.writes();
    let last = written
        .iter()
        .rev()
        .find(|w| w.starts_with("sense:correction:wavelength "))
        .unwrap();
    let sent: f64 = last.rsplit(' ').next().unwrap().parse().unwrap();
    assert!((sent - 7.8e-7).abs() < 1e-18);

    assert!(registry.is_connected("meter_lazy"));
    // Cached: no second transport
    registry.get_device("meter_lazy").unwrap();
    assert_eq!(handles.lock().unwrap().len(), 1);
}

#[test]
fn test_driver_settings_merge_with_configuration() {
    let config = lab("merge");
    let (mut registry, _) = mock_registry(&config);

    let esa = registry.get_device("esa_merge").unwrap();
    assert_eq!(esa.setting("timeout_ms"), Some(&Value::Int(50)));
    assert_eq!(esa.setting("terminator"), Some(&Value::from("\n")));
    assert_eq!(esa.driver().lineage().first().map(String::as_str), Some("ScpiInstrument"));
}

#[test]
fn test_untrusted_driver_module_is_refused_until_allowed() {
    let mut config = lab("trust");
    let (mut registry, _) = mock_registry(&config);
    assert!(matches!(
        registry.get_device("laser_trust"),
        Err(LabError::UntrustedDriver { .. })
    ));

    config.drivers.modules.push("mylab".into());
    let (registry, _) = mock_registry(&config);
    // Trusted now, but nothing registered under that path.
    assert!(matches!(
        registry.resolve_driver("mylab.lasers.Toptica"),
        Err(LabError::UnknownDriver(_))
    ));
}

#[test]
fn test_disconnect_closes_the_transport() {
    let config = lab("close");
    let (mut registry, handles) = mock_registry(&config);

    registry.get_device("meter_close").unwrap();
    let handle = handles.lock().unwrap()["meter_close"].clone();
    assert!(registry.disconnect("meter_close").unwrap());
    assert!(handle.is_closed());
    assert!(!registry.disconnect("meter_close").unwrap());
    assert!(!labframe::device::is_connected("meter_close"));
}

#[test]
fn test_write_disabled_option_at_runtime() {
    let config = lab("wd");
    let (mut registry, _) = mock_registry(&config);

    let device = registry.get_device("meter_wd").unwrap();
    device
        .set_command_option("average_count", CommandOptions::new().with_write_disabled())
        .unwrap();
    assert!(matches!(
        device.write("average_count", 8),
        Err(LabError::WriteDisabled(_))
    ));
    assert_eq!(device.get::<i64>("average_count").unwrap(), 4);
}
