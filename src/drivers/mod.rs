//! Built-in instrument drivers.
//!
//! Each driver module exposes a `descriptor()` and, where useful, a typed view
//! over a [`Device`](crate::device::Device) built from it. Drivers are found by
//! the registry under `<module>.<DriverName>`.

pub mod keysight;
pub mod scpi;
pub mod thorlabs;

use crate::device::DriverDescriptor;
use indexmap::IndexMap;
use std::sync::Arc;

/// Driver modules trusted without explicit registration.
pub const BUILTIN_MODULES: &[&str] = &["scpi", "thorlabs", "keysight"];

/// Every built-in driver keyed by its dotted path.
pub fn builtin_catalog() -> IndexMap<String, Arc<DriverDescriptor>> {
    [
        ("scpi", scpi::descriptor()),
        ("thorlabs", thorlabs::descriptor()),
        ("keysight", keysight::descriptor()),
    ]
    .into_iter()
    .map(|(module, driver)| (format!("{module}.{}", driver.name()), driver))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_covers_every_builtin_module() {
        let catalog = builtin_catalog();
        assert_eq!(
            catalog.keys().collect::<Vec<_>>(),
            ["scpi.ScpiInstrument", "thorlabs.Pm100d", "keysight.KeysightEsa"]
        );
        for path in catalog.keys() {
            let module = path.split('.').next().unwrap_or_default();
            assert!(BUILTIN_MODULES.contains(&module));
        }
    }
}
