//! # labframe
//!
//! Instrument control and data handling for a measurement lab.
//!
//! ## Crate Structure
//!
//! - **`transport`**: the byte-level channel to an instrument (`Transport`), with
//!   TCP, serial and simulated implementations and IEEE 488.2 binary block decoding.
//! - **`binding`**: declarative command bindings. A `RemoteProperty` maps a named
//!   setting to a SCPI command pair; a `RemoteAction` maps a named operation to a
//!   command template. Conversions, access guards and per-command options live here.
//! - **`device`**: `Device` (a connected instrument and its bindings), the driver
//!   descriptors that describe a model, and the `DeviceRegistry` that builds devices
//!   from configuration.
//! - **`drivers`**: built-in drivers (common SCPI, Thorlabs power meters, Keysight
//!   signal analyzers).
//! - **`data`**: `NumericalData`, an n-dimensional container with axis coordinates,
//!   axis names and metadata, plus indexing, stacking and a binary archive format.
//! - **`fit`**: least-squares fits of 1-D containers with guessed starting values.
//! - **`plot`**: conversion of containers into line and mesh plot data for a
//!   pluggable backend.
//! - **`value`**: the dynamically typed `Value` and closed setting enumerations.
//! - **`config`**, **`logging`**, **`error`**: configuration loading, log setup and
//!   the crate-wide `LabError`.

pub mod binding;
pub mod config;
pub mod data;
pub mod device;
pub mod drivers;
pub mod error;
pub mod fit;
pub mod logging;
pub mod plot;
pub mod transport;
pub mod value;

pub use data::NumericalData;
pub use device::{Device, DeviceRegistry, DriverDescriptor};
pub use error::{AppResult, LabError};
pub use value::{Metadata, Settings, Value};
