//! Integration tests for building, slicing and archiving measurement grids
//!
//! A power sweep is assembled from individual traces, indexed back down and
//! written to disk with its metadata.

use labframe::data::{AxisValue, NumericalData, ReducedAxis, StackItem, StackOptions, INDIVIDUAL_METADATA_KEY};
use labframe::drivers::keysight::DetectorMode;
use labframe::sel;
use labframe::value::{SettingEnum, Value};
use labframe::LabError;

fn trace(power: f64) -> NumericalData {
    let x = vec![1.0e9, 1.1e9, 1.2e9, 1.3e9];
    let mut data = NumericalData::from_vec(x.iter().map(|f| power * f / 1e9).collect())
        .with_x_axis(x)
        .unwrap()
        .with_axis_names(["frequency"]);
    data.insert_metadata("power", power);
    data.insert_metadata("detector", DetectorMode::Average);
    data
}

fn power_sweep() -> NumericalData {
    let traces: Vec<NumericalData> = [0.5, 1.0, 2.0].into_iter().map(trace).collect();
    let items: Vec<StackItem<f64>> = traces.iter().map(StackItem::from).collect();
    NumericalData::stack(
        &items,
        StackOptions::default()
            .with_new_axis(vec![0.5, 1.0, 2.0], "power")
            .retain_individual_metadata(),
    )
    .unwrap()
}

#[test]
fn test_stack_then_index_back_to_a_trace() {
    let sweep = power_sweep();
    assert_eq!(sweep.shape(), &[4, 3]);
    assert_eq!(sweep.axis_name(1), Some("power"));
    let individual = sweep.metadata[INDIVIDUAL_METADATA_KEY].as_map().unwrap();
    assert_eq!(individual.len(), 3);
    assert_eq!(individual["2"].as_map().unwrap()["power"], Value::Float(2.0));

    let middle = sweep.iloc(&sel![.., 1]).unwrap();
    assert_eq!(middle.shape(), &[4]);
    assert_eq!(middle.samples(), trace(1.0).samples());
    assert_eq!(
        middle.reduced_axes(),
        &[ReducedAxis {
            name: Some("power".into()),
            position: 1,
            index: 1,
            value: Some(AxisValue::Number(1.0)),
        }]
    );

    let last_two = sweep.iloc(&sel![-2.., vec![0, 2]]).unwrap();
    assert_eq!(last_two.shape(), &[2, 2]);
    assert_eq!(last_two.samples()[[1, 1]], 2.0 * 1.3);

    assert!(matches!(sweep.iloc(&sel![0, 0, 0]), Err(LabError::Index(_))));
}

#[test]
fn test_archive_round_trip_restores_enums_on_request() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sweep.lfarc");

    let slice = power_sweep().iloc(&sel![.., -1]).unwrap();
    slice.save(&path).unwrap();

    let plain = NumericalData::<f64>::load(&path).unwrap();
    assert_eq!(plain.metadata["detector"], Value::from("DetectorMode.Average"));
    assert_eq!(plain.reduced_axes(), slice.reduced_axes());
    assert_eq!(plain.samples(), slice.samples());

    let typed = NumericalData::load_with_enums(&path, &[DetectorMode::DESCRIPTOR]).unwrap();
    assert_eq!(typed, slice);
}

#[test]
fn test_loading_garbage_is_an_archive_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("not-an-archive.lfarc");
    std::fs::write(&path, b"plain text").unwrap();
    assert!(matches!(NumericalData::<f64>::load(&path), Err(LabError::Archive(_))));
}
