//! Keysight X-series signal analyzers (N9000 family) in spectrum and IQ mode.
//!
//! Frequency-domain settings only apply in spectrum analyzer mode and the IQ
//! settings only in IQ analyzer mode; the bindings are guarded accordingly.

use super::scpi;
use crate::binding::{AccessGuard, CallArgs, RemoteAction, RemoteProperty};
use crate::data::NumericalData;
use crate::device::{Device, DriverDescriptor};
use crate::error::{AppResult, LabError};
use crate::setting_enum;
use crate::transport::{ByteOrder, NumericType};
use crate::value::{Metadata, Value};
use num_complex::Complex64;
use once_cell::sync::Lazy;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

setting_enum! {
    /// Sweep triggering.
    pub enum RunMode {
        Continuous => "1",
        Single => "0",
    }
}

setting_enum! {
    /// Measurement application.
    pub enum InstrumentMode {
        SpectrumAnalyzer => "SA",
        IqAnalyzer => "BASIC",
    }
}

setting_enum! {
    /// Trace detector.
    pub enum DetectorMode {
        Normal => "NORM",
        Average => "AVER",
        PositivePeak => "POS",
        Sample => "SAMP",
        NegativePeak => "NEG",
        QuasiPeak => "QPE",
        EmiAverage => "EAV",
        RmsAverage => "RAV",
    }
}

setting_enum! {
    /// Amplitude unit of the y axis.
    pub enum YUnit {
        Dbm => "DBM",
        Dbmv => "DBMV",
        Dbma => "DBMA",
        V => "V",
        W => "W",
        A => "A",
        Dbuv => "DBUV",
        Dbua => "DBUA",
        Dbpw => "DBPW",
        Dbuvm => "DBUVM",
        Dbuam => "DBUAM",
        Dbpt => "DBPT",
        Dbg => "DBG",
    }
}

setting_enum! {
    /// Y axis scaling.
    pub enum ScaleType {
        Log => "LOG",
        Linear => "LIN",
    }
}

setting_enum! {
    /// Averaging applied to the trace.
    pub enum TraceAverageMode {
        Rms => "RMS",
        LogPower => "LOG",
        Voltage => "SCAL",
    }
}

/// Settings recorded with every acquired trace.
pub const METADATA_FIELDS: &[&str] = &[
    "center_frequency",
    "span",
    "start_frequency",
    "stop_frequency",
    "rbw",
    "vbw",
    "detector",
    "sweep_time",
    "trace_points",
    "trace_averaging",
    "trace_average_count",
    "trace_average_mode",
    "y_unit",
];

fn spectrum_mode() -> AccessGuard {
    AccessGuard::require_enum(
        "instrument_mode",
        InstrumentMode::SpectrumAnalyzer,
        "Instrument is not in spectrum analyzer mode",
    )
}

fn iq_mode() -> AccessGuard {
    AccessGuard::require_enum(
        "instrument_mode",
        InstrumentMode::IqAnalyzer,
        "Instrument is not in IQ analyzer mode",
    )
}

static KEYSIGHT_ESA: Lazy<Arc<DriverDescriptor>> = Lazy::new(|| {
    let sa = |p: RemoteProperty| p.with_guard(spectrum_mode());
    let iq = |p: RemoteProperty| p.with_guard(iq_mode());

    DriverDescriptor::builder("KeysightEsa")
        .extends(&scpi::descriptor())
        .default_setting("timeout_ms", 10_000)
        .metadata_fields(METADATA_FIELDS.iter().copied())
        .property(RemoteProperty::enumeration::<InstrumentMode>("instrument_mode", "inst:sel"))
        .property(RemoteProperty::enumeration::<RunMode>("run_mode", "initiate:continuous"))
        .property(RemoteProperty::float("center_frequency", "sense:freq:center"))
        .property(sa(RemoteProperty::float("span", "sense:freq:span")))
        .property(sa(RemoteProperty::float("start_frequency", "sense:freq:start")))
        .property(sa(RemoteProperty::float("stop_frequency", "sense:freq:stop")))
        .property(sa(RemoteProperty::float("rbw", "sense:band")))
        .property(sa(RemoteProperty::float("vbw", "sense:band:video")))
        .property(sa(RemoteProperty::bool("auto_vbw", "sense:band:video:auto")))
        .property(sa(RemoteProperty::enumeration::<DetectorMode>("detector", "sense:detector:trace")))
        .property(sa(RemoteProperty::float("sweep_time", "sense:sweep:time")))
        .property(sa(RemoteProperty::int("trace_points", "sense:sweep:points")))
        .property(sa(RemoteProperty::int("trace_average_count", "sense:average:count")))
        .property(sa(RemoteProperty::bool("trace_averaging", "sense:average:state")))
        .property(sa(RemoteProperty::enumeration::<TraceAverageMode>(
            "trace_average_mode",
            "sense:average:type",
        )))
        .property(sa(RemoteProperty::bool("auto_trace_average_mode", "sense:average:type:auto")))
        .property(sa(RemoteProperty::enumeration::<YUnit>("y_unit", "unit:power")))
        .property(sa(RemoteProperty::enumeration::<ScaleType>(
            "y_scale",
            "display:window:trace:y:spacing",
        )))
        .property(iq(RemoteProperty::float("iq_bw", "waveform:dif:bandwidth")))
        .property(iq(RemoteProperty::float("iq_acquisition_time", "sense:waveform:sweep:time")))
        .action(RemoteAction::new("start_trace", "initiate:immediate"))
        .action(RemoteAction::new("configure_iq_waveform", "configure:waveform"))
        .build()
});

/// Driver descriptor, registered as `keysight.KeysightEsa`.
pub fn descriptor() -> Arc<DriverDescriptor> {
    Arc::clone(&KEYSIGHT_ESA)
}

/// How a trace is fetched.
#[derive(Debug, Clone)]
pub struct TraceOptions {
    /// Trace number (1 to 6).
    pub trace_num: u8,
    /// Attach [`METADATA_FIELDS`] to the result.
    pub collect_metadata: bool,
    /// Convert dBm to power spectral density in W/Hz.
    pub psd: bool,
    /// Start a fresh single sweep first.
    pub restart: bool,
    /// Wait for the sweep to finish before fetching.
    pub wait: bool,
    /// Ceiling on the wait; unbounded when absent.
    pub max_wait: Option<Duration>,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            trace_num: 1,
            collect_metadata: true,
            psd: false,
            restart: true,
            wait: true,
            max_wait: None,
        }
    }
}

/// How an IQ waveform is fetched.
#[derive(Debug, Clone)]
pub struct IqOptions {
    /// Start a fresh single acquisition first.
    pub restart: bool,
    /// Wait for the acquisition to finish before fetching.
    pub wait: bool,
    /// Ceiling on the wait; unbounded when absent.
    pub max_wait: Option<Duration>,
}

impl Default for IqOptions {
    fn default() -> Self {
        Self {
            restart: true,
            wait: true,
            max_wait: None,
        }
    }
}

/// Resolution or video bandwidth choice for [`KeysightEsa::measure_spectrum`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Bandwidth {
    /// Leave the instrument setting alone.
    Unchanged,
    /// Span divided by the number of points.
    #[default]
    Auto,
    /// Explicit value (Hz).
    Hz(f64),
}

/// Parameters of a one-shot spectrum measurement.
#[derive(Debug, Clone)]
pub struct SpectrumRequest {
    /// Center frequency (Hz).
    pub center: f64,
    /// Span (Hz).
    pub span: f64,
    /// Number of trace points.
    pub points: i64,
    /// Number of traces averaged.
    pub averages: i64,
    /// Resolution bandwidth.
    pub rbw: Bandwidth,
    /// Video bandwidth.
    pub vbw: Bandwidth,
    /// Averaging type.
    pub average_mode: TraceAverageMode,
    /// Trace detector.
    pub detector: DetectorMode,
}

impl SpectrumRequest {
    /// Request around `center` with the usual averaging defaults.
    pub fn new(center: f64, span: f64, points: i64) -> Self {
        Self {
            center,
            span,
            points,
            averages: 100,
            rbw: Bandwidth::Auto,
            vbw: Bandwidth::Auto,
            average_mode: TraceAverageMode::Rms,
            detector: DetectorMode::Average,
        }
    }
}

/// Raw pieces of an IQ acquisition.
struct IqCapture {
    i: Vec<f64>,
    q: Vec<f64>,
    envelope: Vec<f64>,
    time: Vec<f64>,
    metadata: Metadata,
}

fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Typed view of a device built from the Keysight driver.
pub struct KeysightEsa<'a> {
    device: &'a mut Device,
}

impl<'a> KeysightEsa<'a> {
    /// Wrap `device`, which must use this driver or one extending it.
    pub fn new(device: &'a mut Device) -> AppResult<Self> {
        if !device.driver().is_a("KeysightEsa") {
            return Err(LabError::Configuration(format!(
                "device '{}' uses driver '{}', not KeysightEsa",
                device.id(),
                device.driver().name()
            )));
        }
        Ok(Self { device })
    }

    /// The wrapped device.
    pub fn device(&mut self) -> &mut Device {
        self.device
    }

    /// Active measurement application.
    pub fn instrument_mode(&mut self) -> AppResult<InstrumentMode> {
        self.device.get("instrument_mode")
    }

    /// Switch the measurement application.
    pub fn set_instrument_mode(&mut self, mode: InstrumentMode) -> AppResult<()> {
        self.device.write("instrument_mode", mode)
    }

    /// Sweep triggering.
    pub fn run_mode(&mut self) -> AppResult<RunMode> {
        self.device.get("run_mode")
    }

    /// Set sweep triggering.
    pub fn set_run_mode(&mut self, mode: RunMode) -> AppResult<()> {
        self.device.write("run_mode", mode)
    }

    /// Center frequency (Hz).
    pub fn center_frequency(&mut self) -> AppResult<f64> {
        self.device.get("center_frequency")
    }

    /// Set the center frequency (Hz).
    pub fn set_center_frequency(&mut self, hz: f64) -> AppResult<()> {
        self.device.write("center_frequency", hz)
    }

    /// Span (Hz); zero means a time-domain sweep.
    pub fn span(&mut self) -> AppResult<f64> {
        self.device.get("span")
    }

    /// Set the span (Hz).
    pub fn set_span(&mut self, hz: f64) -> AppResult<()> {
        self.device.write("span", hz)
    }

    /// Resolution bandwidth (Hz).
    pub fn rbw(&mut self) -> AppResult<f64> {
        self.device.get("rbw")
    }

    /// Set the resolution bandwidth (Hz).
    pub fn set_rbw(&mut self, hz: f64) -> AppResult<()> {
        self.device.write("rbw", hz)
    }

    /// Video bandwidth (Hz).
    pub fn vbw(&mut self) -> AppResult<f64> {
        self.device.get("vbw")
    }

    /// Set the video bandwidth (Hz).
    pub fn set_vbw(&mut self, hz: f64) -> AppResult<()> {
        self.device.write("vbw", hz)
    }

    /// Trace detector.
    pub fn detector(&mut self) -> AppResult<DetectorMode> {
        self.device.get("detector")
    }

    /// Set the trace detector.
    pub fn set_detector(&mut self, mode: DetectorMode) -> AppResult<()> {
        self.device.write("detector", mode)
    }

    /// Number of points per trace.
    pub fn trace_points(&mut self) -> AppResult<i64> {
        self.device.get("trace_points")
    }

    /// Set the number of points per trace.
    pub fn set_trace_points(&mut self, points: i64) -> AppResult<()> {
        self.device.write("trace_points", points)
    }

    /// Amplitude unit.
    pub fn y_unit(&mut self) -> AppResult<YUnit> {
        self.device.get("y_unit")
    }

    /// Set the amplitude unit.
    pub fn set_y_unit(&mut self, unit: YUnit) -> AppResult<()> {
        self.device.write("y_unit", unit)
    }

    /// IQ analysis bandwidth (Hz).
    pub fn iq_bw(&mut self) -> AppResult<f64> {
        self.device.get("iq_bw")
    }

    /// Set the IQ analysis bandwidth (Hz).
    pub fn set_iq_bw(&mut self, hz: f64) -> AppResult<()> {
        self.device.write("iq_bw", hz)
    }

    /// IQ acquisition time (s).
    pub fn iq_acquisition_time(&mut self) -> AppResult<f64> {
        self.device.get("iq_acquisition_time")
    }

    /// Set the IQ acquisition time (s).
    pub fn set_iq_acquisition_time(&mut self, seconds: f64) -> AppResult<()> {
        self.device.write("iq_acquisition_time", seconds)
    }

    /// Select big-endian 64-bit float trace transfers.
    pub fn initialize_trace_transfer(&mut self) -> AppResult<()> {
        self.device.write_command("format:data real,64")?;
        self.device.write_command("format:border norm")
    }

    /// Stop continuous sweeping and trigger one sweep.
    pub fn start_single_trace(&mut self) -> AppResult<()> {
        self.set_run_mode(RunMode::Single)?;
        self.device.call("start_trace", CallArgs::new()).map(|_| ())
    }

    fn prepare(&mut self, restart: bool, wait: bool, max_wait: Option<Duration>) -> AppResult<()> {
        if restart {
            self.start_single_trace()?;
        }
        if wait {
            self.device.wait_until_done(None, max_wait)?;
        }
        Ok(())
    }

    /// Fetch a trace as a 1-D container over frequency (or time at zero span).
    pub fn acquire_trace(&mut self, options: &TraceOptions) -> AppResult<NumericalData> {
        self.initialize_trace_transfer()?;
        self.prepare(options.restart, options.wait, options.max_wait)?;

        let raw = self.device.query_binary(
            &format!("trace:data? trace{}", options.trace_num),
            NumericType::F64,
            ByteOrder::Big,
        )?;
        let mut metadata = if options.collect_metadata {
            self.device.collect_metadata()?
        } else {
            Metadata::new()
        };

        let expected = self.trace_points()?;
        if usize::try_from(expected).ok() != Some(raw.len()) {
            warn!(device = %self.device.id(), expected, received = raw.len(), "trace length differs from trace_points");
        }

        let span = self.span()?;
        let (x, name) = if span == 0.0 {
            let sweep_time: f64 = self.device.get("sweep_time")?;
            metadata.insert("x_unit".into(), "s".into());
            (linspace(0.0, sweep_time, raw.len()), "time")
        } else {
            let start: f64 = self.device.get("start_frequency")?;
            let stop: f64 = self.device.get("stop_frequency")?;
            metadata.insert("x_unit".into(), "Hz".into());
            (linspace(start, stop, raw.len()), "frequency")
        };
        metadata.insert("x_label".into(), name.into());
        metadata.insert("y_label".into(), "signal".into());

        let values = if options.psd {
            let rbw = self.rbw()?;
            metadata.insert("y_unit".into(), "W/Hz".into());
            raw.iter().map(|dbm| 1e-3 * 10f64.powf(dbm / 10.0) / rbw).collect()
        } else {
            metadata.insert("y_unit".into(), "dBm".into());
            raw
        };
        debug!(device = %self.device.id(), points = values.len(), psd = options.psd, "trace acquired");

        Ok(NumericalData::from_vec(values)
            .with_x_axis(x)?
            .with_axis_names([name])
            .with_metadata(metadata))
    }

    /// Switch to IQ analyzer mode and set up the waveform measurement.
    pub fn enable_iq_waveform_mode(&mut self) -> AppResult<()> {
        self.set_instrument_mode(InstrumentMode::IqAnalyzer)?;
        self.device.call("configure_iq_waveform", CallArgs::new()).map(|_| ())
    }

    fn capture_iq(&mut self, options: &IqOptions) -> AppResult<IqCapture> {
        self.initialize_trace_transfer()?;
        self.prepare(options.restart, options.wait, options.max_wait)?;

        let raw = self.device.query_binary("fetch:waveform0?", NumericType::F64, ByteOrder::Big)?;
        if raw.len() % 2 != 0 {
            return Err(LabError::Shape(format!(
                "interleaved IQ data has odd length {}",
                raw.len()
            )));
        }
        let envelope = self.device.query_binary("fetch:waveform2?", NumericType::F64, ByteOrder::Big)?;
        let statistics = self.device.query_binary("fetch:waveform1?", NumericType::F64, ByteOrder::Big)?;

        let i: Vec<f64> = raw.iter().step_by(2).copied().collect();
        let q: Vec<f64> = raw.iter().skip(1).step_by(2).copied().collect();
        let acquisition_time = self.iq_acquisition_time()?;
        let time = linspace(0.0, acquisition_time, i.len());

        let mut metadata = Metadata::new();
        metadata.insert("center_frequency".into(), self.center_frequency()?.into());
        metadata.insert("iq_bw".into(), self.iq_bw()?.into());
        metadata.insert("envelope_data".into(), Value::from(envelope.clone()));
        metadata.insert("statistics_data".into(), Value::from(statistics));
        metadata.insert("raw_data".into(), Value::from(raw));
        debug!(device = %self.device.id(), samples = i.len(), "IQ waveform acquired");

        Ok(IqCapture {
            i,
            q,
            envelope,
            time,
            metadata,
        })
    }

    /// Fetch an IQ waveform as columns `i`, `q` and `log_envelope` over time.
    pub fn acquire_iq_waveform(&mut self, options: &IqOptions) -> AppResult<NumericalData> {
        let capture = self.capture_iq(options)?;
        Ok(NumericalData::from_columns(&[capture.i, capture.q, capture.envelope])?
            .with_x_axis(capture.time)?
            .with_y_axis(["i", "q", "log_envelope"])?
            .with_axis_names(["time", "quadrature"])
            .with_metadata(capture.metadata))
    }

    /// Fetch an IQ waveform as complex samples `i + jq` over time.
    pub fn acquire_iq_complex(&mut self, options: &IqOptions) -> AppResult<NumericalData<Complex64>> {
        let capture = self.capture_iq(options)?;
        Ok(NumericalData::from_quadratures(&capture.i, &capture.q)?
            .with_x_axis(capture.time)?
            .with_axis_names(["time"])
            .with_metadata(capture.metadata))
    }

    /// Configure a spectrum measurement, run it and fetch the trace.
    pub fn measure_spectrum(&mut self, request: &SpectrumRequest) -> AppResult<NumericalData> {
        self.set_center_frequency(request.center)?;
        self.set_span(request.span)?;
        self.set_trace_points(request.points)?;

        let per_point = request.span / request.points.max(1) as f64;
        match request.rbw {
            Bandwidth::Unchanged => {}
            Bandwidth::Auto => self.set_rbw(per_point)?,
            Bandwidth::Hz(hz) => self.set_rbw(hz)?,
        }
        match request.vbw {
            Bandwidth::Unchanged => {}
            Bandwidth::Auto => self.set_vbw(per_point)?,
            Bandwidth::Hz(hz) => self.set_vbw(hz)?,
        }

        self.device.write("trace_average_count", request.averages)?;
        self.device.write("trace_averaging", request.averages > 1)?;
        self.device.write("trace_average_mode", request.average_mode)?;
        self.set_detector(request.detector)?;

        self.acquire_trace(&TraceOptions::default())
    }
}
