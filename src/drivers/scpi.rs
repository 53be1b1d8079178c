//! IEEE 488.2 common commands shared by every SCPI instrument.

use crate::binding::{CallArgs, RemoteAction, RemoteProperty};
use crate::device::{Device, DriverDescriptor};
use crate::error::AppResult;
use once_cell::sync::Lazy;
use std::fmt;
use std::sync::Arc;

static SCPI_INSTRUMENT: Lazy<Arc<DriverDescriptor>> = Lazy::new(|| {
    DriverDescriptor::builder("ScpiInstrument")
        .default_setting("terminator", "\n")
        .default_setting("timeout_ms", 2000)
        .property(RemoteProperty::int("status_register", "*ESR").read_only())
        .action(RemoteAction::new("clear_status", "*CLS"))
        .build()
});

/// Base driver: `clear_status` (`*CLS`) and the read-only `status_register` (`*ESR?`).
pub fn descriptor() -> Arc<DriverDescriptor> {
    Arc::clone(&SCPI_INSTRUMENT)
}

/// Decoded standard event status register (`*ESR?`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventStatusRegister(pub u8);

impl EventStatusRegister {
    /// Operation complete.
    pub const OPC: u8 = 0;
    /// Request control.
    pub const RQC: u8 = 1;
    /// Query error.
    pub const QYE: u8 = 2;
    /// Device-dependent error.
    pub const DDE: u8 = 3;
    /// Execution error.
    pub const EXE: u8 = 4;
    /// Command error.
    pub const CME: u8 = 5;
    /// User request.
    pub const URQ: u8 = 6;
    /// Power on.
    pub const PON: u8 = 7;
    /// Bits that indicate an error (QYE, DDE, EXE, CME).
    pub const ERROR_MASK: u8 = 0b0011_1100;

    const NAMES: [&'static str; 8] = ["OPC", "RQC", "QYE", "DDE", "EXE", "CME", "URQ", "PON"];

    /// Whether bit `bit` is set.
    pub fn bit(self, bit: u8) -> bool {
        self.0 & (1 << bit) != 0
    }

    /// Any of the error bits set.
    pub fn is_error(self) -> bool {
        self.0 & Self::ERROR_MASK != 0
    }

    /// Command error bit.
    pub fn command_error(self) -> bool {
        self.bit(Self::CME)
    }

    /// Execution error bit.
    pub fn execution_error(self) -> bool {
        self.bit(Self::EXE)
    }

    /// Device-dependent error bit.
    pub fn device_error(self) -> bool {
        self.bit(Self::DDE)
    }

    /// Query error bit.
    pub fn query_error(self) -> bool {
        self.bit(Self::QYE)
    }
}

impl From<i64> for EventStatusRegister {
    fn from(value: i64) -> Self {
        Self((value & 0xff) as u8)
    }
}

impl fmt::Display for EventStatusRegister {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let set: Vec<&str> = (0..8)
            .filter(|&b| self.bit(b))
            .map(|b| Self::NAMES[b as usize])
            .collect();
        write!(f, "ESR {:#010b} [{}]", self.0, set.join(", "))
    }
}

/// Read and decode the event status register (reading clears it on the instrument).
pub fn status_register(device: &mut Device) -> AppResult<EventStatusRegister> {
    device.get::<i64>("status_register").map(EventStatusRegister::from)
}

/// Clear the status registers and error queue.
pub fn clear_status(device: &mut Device) -> AppResult<()> {
    device.call("clear_status", CallArgs::new()).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use crate::value::Settings;

    #[test]
    fn error_bits() {
        let esr = EventStatusRegister(0b0010_0001);
        assert!(esr.bit(EventStatusRegister::OPC));
        assert!(esr.command_error());
        assert!(!esr.execution_error());
        assert!(esr.is_error());
        assert!(!EventStatusRegister(0b1000_0001).is_error());
        assert_eq!(esr.to_string(), "ESR 0b00100001 [OPC, CME]");
    }

    #[test]
    fn status_register_is_queried_and_decoded() {
        let mock = MockTransport::new();
        let handle = mock.handle();
        handle.set_value("*ESR", "16");
        let mut device =
            Device::with_transport("scpi_unit_esr", descriptor(), Settings::new(), Box::new(mock))
                .unwrap();
        let esr = status_register(&mut device).unwrap();
        assert!(esr.execution_error());

        clear_status(&mut device).unwrap();
        assert!(handle.writes().iter().any(|w| w == "*CLS"));
        assert!(device.write("status_register", 0).is_err());
    }
}
