//! Instrument transports.
//!
//! A [`Transport`] is a synchronous request/response channel to exactly one
//! instrument. The binding layer and [`Device`](crate::device::Device) depend only on
//! this narrow contract, so drivers never see sockets or serial ports directly.
//!
//! Implementations provided here:
//! - [`MockTransport`]: simulated instrument for tests and dry runs
//! - [`StreamTransport`]: line-oriented transport over any `Read + Write` stream
//!   (TCP sockets, and serial ports with the `instrument_serial` feature)
//!
//! [`TransportFactory`] opens the right transport for a device from its settings.

pub mod block;
pub mod mock;
pub mod stream;

pub use block::{ByteOrder, NumericType};
pub use mock::{MockHandle, MockTransport};
pub use stream::StreamTransport;

use crate::error::{AppResult, LabError};
use crate::value::Settings;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by a transport.
///
/// `Timeout` is kept distinct from every other failure: the completion-wait loop
/// retries on it and on nothing else.
#[derive(Error, Debug)]
pub enum TransportError {
    /// A read did not complete within the transport's own read timeout.
    #[error("Read timed out after {0:?}")]
    Timeout(Duration),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The instrument answered with something that violates the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The transport has been closed.
    #[error("Transport is closed")]
    Closed,
}

/// Synchronous request/response channel to a single instrument.
pub trait Transport: Send {
    /// Send one command.
    fn write(&mut self, command: &str) -> Result<(), TransportError>;

    /// Read one response, without its terminator.
    fn read(&mut self) -> Result<String, TransportError>;

    /// Write a command and read its response.
    fn query(&mut self, command: &str) -> Result<String, TransportError> {
        self.write(command)?;
        self.read()
    }

    /// Write a command and read back a definite-length binary block payload.
    fn query_block(&mut self, command: &str) -> Result<Vec<u8>, TransportError>;

    /// Write a command and decode the binary block it returns into numbers.
    fn query_binary(
        &mut self,
        command: &str,
        kind: NumericType,
        order: ByteOrder,
    ) -> Result<Vec<f64>, TransportError> {
        let payload = self.query_block(command)?;
        block::decode_values(&payload, kind, order)
    }

    /// Read the instrument's status byte.
    fn status_byte(&mut self) -> Result<u8, TransportError> {
        let response = self.query("*STB?")?;
        let trimmed = response.trim();
        trimmed
            .parse::<u8>()
            .map_err(|_| TransportError::Protocol(format!("invalid status byte '{trimmed}'")))
    }

    /// Release the underlying connection. Must tolerate repeated calls.
    fn close(&mut self) -> Result<(), TransportError>;

    /// Human-readable description (address, port, ...).
    fn describe(&self) -> String;
}

/// Opens transports for devices.
pub trait TransportFactory: Send + Sync {
    /// Open a transport for `device_id` using its merged settings.
    fn open(&self, device_id: &str, settings: &Settings) -> AppResult<Box<dyn Transport>>;
}

impl<F> TransportFactory for F
where
    F: Fn(&str, &Settings) -> AppResult<Box<dyn Transport>> + Send + Sync,
{
    fn open(&self, device_id: &str, settings: &Settings) -> AppResult<Box<dyn Transport>> {
        self(device_id, settings)
    }
}

/// Default transport selection from the `address` setting.
///
/// | Address | Transport |
/// |---------|-----------|
/// | `mock://...` | [`MockTransport`] |
/// | `tcp://host:port` | [`StreamTransport`] over a TCP socket |
/// | `serial://<port>` | [`StreamTransport`] over a serial port (`instrument_serial`) |
///
/// Optional settings: `timeout_ms` (read timeout), `terminator`, `baud_rate`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AddressTransportFactory;

/// Read timeout used when a device does not configure `timeout_ms`.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2000);

impl TransportFactory for AddressTransportFactory {
    fn open(&self, device_id: &str, settings: &Settings) -> AppResult<Box<dyn Transport>> {
        let address = settings
            .get("address")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                LabError::Configuration(format!("device '{device_id}' has no 'address' setting"))
            })?;

        let timeout = settings
            .get("timeout_ms")
            .and_then(|v| v.as_i64())
            .map(|ms| Duration::from_millis(ms.max(1) as u64))
            .unwrap_or(DEFAULT_READ_TIMEOUT);
        let terminator = settings
            .get("terminator")
            .and_then(|v| v.as_str())
            .unwrap_or("\n")
            .to_string();

        if address.starts_with("mock://") {
            return Ok(Box::new(MockTransport::new().with_read_timeout(timeout)));
        }

        if let Some(host) = address.strip_prefix("tcp://") {
            let transport = stream::connect_tcp(host, timeout)?.with_terminator(&terminator);
            return Ok(Box::new(transport));
        }

        if let Some(port) = address.strip_prefix("serial://") {
            let baud_rate = settings
                .get("baud_rate")
                .and_then(|v| v.as_i64())
                .unwrap_or(9600) as u32;
            return open_serial_transport(port, baud_rate, timeout, &terminator);
        }

        Err(LabError::Configuration(format!(
            "device '{device_id}': unsupported address '{address}'"
        )))
    }
}

#[cfg(feature = "instrument_serial")]
fn open_serial_transport(
    port: &str,
    baud_rate: u32,
    timeout: Duration,
    terminator: &str,
) -> AppResult<Box<dyn Transport>> {
    let transport = stream::open_serial(port, baud_rate, timeout)?.with_terminator(terminator);
    Ok(Box::new(transport))
}

#[cfg(not(feature = "instrument_serial"))]
fn open_serial_transport(
    _port: &str,
    _baud_rate: u32,
    _timeout: Duration,
    _terminator: &str,
) -> AppResult<Box<dyn Transport>> {
    Err(LabError::FeatureNotEnabled("instrument_serial".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    fn settings(address: &str) -> Settings {
        let mut s = Settings::new();
        s.insert("address".into(), Value::from(address));
        s
    }

    #[test]
    fn mock_address_opens_mock_transport() {
        let mut transport = AddressTransportFactory
            .open("dev", &settings("mock://bench"))
            .unwrap();
        assert!(transport.describe().starts_with("MockTransport"));
        transport.close().unwrap();
    }

    #[test]
    fn missing_address_is_a_configuration_error() {
        let err = AddressTransportFactory
            .open("dev", &Settings::new())
            .err()
            .unwrap();
        assert!(matches!(err, LabError::Configuration(_)));
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let err = AddressTransportFactory
            .open("dev", &settings("gpib://7"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("gpib://7"));
    }

    #[cfg(not(feature = "instrument_serial"))]
    #[test]
    fn serial_requires_feature() {
        let err = AddressTransportFactory
            .open("dev", &settings("serial:///dev/ttyUSB0"))
            .err()
            .unwrap();
        assert!(matches!(err, LabError::FeatureNotEnabled(_)));
    }

    #[test]
    fn closures_are_factories() {
        let factory = |_: &str, _: &Settings| -> AppResult<Box<dyn Transport>> {
            Ok(Box::new(MockTransport::new()))
        };
        assert!(factory.open("x", &Settings::new()).is_ok());
    }
}
