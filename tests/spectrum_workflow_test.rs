//! End-to-end: acquire a trace from a simulated analyzer, fit the peak,
//! archive the result and prepare it for plotting.

use labframe::data::NumericalData;
use labframe::drivers::keysight::{self, KeysightEsa, TraceOptions};
use labframe::fit::{FitModel, Lorentzian};
use labframe::plot::{PlotData, PlotOptions};
use labframe::transport::MockTransport;
use labframe::{Device, Settings, Value};

const POINTS: usize = 401;
const START: f64 = 9.99e9;
const STOP: f64 = 10.01e9;

fn simulated_analyzer(id: &str) -> Device {
    let mock = MockTransport::new();
    let handle = mock.handle();
    for (command, value) in [
        ("inst:sel", "SA"),
        ("initiate:continuous", "1"),
        ("sense:freq:center", "1e10"),
        ("sense:freq:span", "2e7"),
        ("sense:freq:start", "9.99e9"),
        ("sense:freq:stop", "1.001e10"),
        ("sense:band", "50000"),
        ("sense:band:video", "50000"),
        ("sense:detector:trace", "AVER"),
        ("sense:sweep:time", "0.05"),
        ("sense:average:state", "1"),
        ("sense:average:count", "10"),
        ("sense:average:type", "RMS"),
        ("unit:power", "DBM"),
    ] {
        handle.set_value(command, value);
    }
    handle.set_value("sense:sweep:points", &POINTS.to_string());

    let step = (STOP - START) / (POINTS - 1) as f64;
    let trace: Vec<f64> = (0..POINTS)
        .map(|i| Lorentzian.eval(START + step * i as f64, &[8e6, 1.2e6, 10.0025e9, -80.0]))
        .collect();
    handle.set_f64_block("trace:data? trace1", &trace);

    Device::with_transport(id, keysight::descriptor(), Settings::new(), Box::new(mock)).unwrap()
}

#[test]
fn test_trace_fit_archive_plot() {
    let mut device = simulated_analyzer("workflow_esa");
    let trace = KeysightEsa::new(&mut device)
        .unwrap()
        .acquire_trace(&TraceOptions::default())
        .unwrap();
    assert_eq!(trace.shape(), &[POINTS]);
    assert_eq!(trace.metadata["trace_average_count"], Value::Int(10));
    assert_eq!(trace.metadata["trace_average_mode"], Value::from("Rms"));

    // Fit in MHz offsets to keep the parameters well scaled.
    let x: Vec<f64> = trace
        .x_axis()
        .unwrap()
        .to_numeric()
        .unwrap()
        .iter()
        .map(|f| (f - 1e10) / 1e6)
        .collect();
    let scaled = NumericalData::from_vec(trace.samples().iter().copied().collect())
        .with_x_axis(x)
        .unwrap();
    let fit = scaled.fit(Lorentzian).unwrap();
    assert!(fit.diagnostics().converged);
    assert!((fit.param("center").unwrap() - 2.5).abs() < 1e-3);
    assert!((fit.param("linewidth").unwrap() - 1.2).abs() < 1e-3);
    assert!((fit.param("offset").unwrap() + 80.0).abs() < 1e-3);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.lfarc");
    trace.save(&path).unwrap();
    let summary = labframe::data::inspect(&path).unwrap();
    assert_eq!(summary.shape, vec![POINTS]);
    assert_eq!(summary.metadata["detector"], Value::from("Average"));

    let loaded = NumericalData::load(&path).unwrap();
    assert_eq!(loaded, trace);

    match loaded.plot_data(&PlotOptions::default()).unwrap() {
        PlotData::Line(line) => {
            assert_eq!(line.x_label.as_deref(), Some("frequency (Hz)"));
            assert_eq!(line.y_label.as_deref(), Some("signal (dBm)"));
            assert_eq!(line.series[0].points.len(), POINTS);
            assert_eq!(line.series[0].points[0][0], START);
        }
        other => panic!("expected a line plot, got {other:?}"),
    }
}
