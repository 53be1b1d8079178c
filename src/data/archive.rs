//! Single-file archive for containers.
//!
//! An archive is a short magic header followed by a bincode-encoded map of named
//! slots:
//!
//! | slot | content |
//! |---|---|
//! | `samples` | dtype, shape and flattened sample components (row-major) |
//! | `axis_count` | number of entries in the axis list |
//! | `axis_0`, `axis_1`, ... | coordinates of each axis, or nothing for an unlabeled axis |
//! | `axes_data` | axis names and the reduced-axis log |
//! | `metadata` | metadata, with enum members stored as `"<Type>.<Member>"` |
//! | `saved_at` | UTC timestamp of the save |
//!
//! Enum members do not survive a round trip unless the loader is handed their
//! descriptors ([`NumericalData::load_with_enums`]).

use super::container::{Coordinates, NumericalData, ReducedAxis, Sample};
use crate::error::{AppResult, LabError};
use crate::value::{EnumDescriptor, Metadata, Value};
use chrono::{DateTime, Utc};
use ndarray::{Array1, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::debug;

/// First bytes of every archive.
pub const MAGIC: &[u8; 8] = b"LFARC\x00\x01\x00";

const SAMPLES: &str = "samples";
const AXIS_COUNT: &str = "axis_count";
const AXES_DATA: &str = "axes_data";
const METADATA: &str = "metadata";
const SAVED_AT: &str = "saved_at";

fn axis_slot(i: usize) -> String {
    format!("axis_{i}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Slot {
    Samples {
        dtype: String,
        shape: Vec<u64>,
        components: Vec<f64>,
    },
    Count(u64),
    Axis(Option<AxisSlot>),
    AxesData {
        axis_names: Vec<Option<String>>,
        reduced_axes: Vec<ReducedAxis>,
    },
    Metadata(Metadata),
    Timestamp(DateTime<Utc>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum AxisSlot {
    Numeric(Vec<f64>),
    Labels(Vec<String>),
}

impl From<&Coordinates> for AxisSlot {
    fn from(coords: &Coordinates) -> Self {
        match coords {
            Coordinates::Numeric(a) => AxisSlot::Numeric(a.to_vec()),
            Coordinates::Labels(l) => AxisSlot::Labels(l.clone()),
        }
    }
}

impl From<AxisSlot> for Coordinates {
    fn from(slot: AxisSlot) -> Self {
        match slot {
            AxisSlot::Numeric(v) => Coordinates::Numeric(Array1::from(v)),
            AxisSlot::Labels(l) => Coordinates::Labels(l),
        }
    }
}

type Slots = BTreeMap<String, Slot>;

fn write_slots<W: Write>(mut writer: W, slots: &Slots) -> AppResult<()> {
    writer.write_all(MAGIC)?;
    bincode::serialize_into(&mut writer, slots)?;
    writer.flush()?;
    Ok(())
}

fn read_slots<R: Read>(mut reader: R) -> AppResult<Slots> {
    let mut magic = [0u8; 8];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(LabError::Archive("not a labframe archive".into()));
    }
    Ok(bincode::deserialize_from(reader)?)
}

fn missing(slot: &str) -> LabError {
    LabError::Archive(format!("missing or malformed slot '{slot}'"))
}

fn stringify_metadata(metadata: &Metadata) -> Metadata {
    metadata
        .iter()
        .map(|(k, v)| (k.clone(), v.clone().stringify_enums()))
        .collect()
}

impl<A: Sample> NumericalData<A> {
    /// Write the container to `path`, replacing any existing file.
    pub fn save(&self, path: impl AsRef<Path>) -> AppResult<()> {
        let path = path.as_ref();
        let file = File::create(path)?;
        self.to_writer(BufWriter::new(file))?;
        debug!(path = %path.display(), shape = ?self.shape(), "saved container");
        Ok(())
    }

    /// Write the archive to any byte sink.
    pub fn to_writer<W: Write>(&self, writer: W) -> AppResult<()> {
        let mut components = Vec::with_capacity(self.size() * A::COMPONENTS);
        for &sample in self.samples().iter() {
            sample.push_components(&mut components);
        }

        let mut slots = Slots::new();
        slots.insert(
            SAMPLES.into(),
            Slot::Samples {
                dtype: A::DTYPE.to_string(),
                shape: self.shape().iter().map(|&d| d as u64).collect(),
                components,
            },
        );
        slots.insert(AXIS_COUNT.into(), Slot::Count(self.axes().len() as u64));
        for (i, axis) in self.axes().iter().enumerate() {
            slots.insert(axis_slot(i), Slot::Axis(axis.as_ref().map(AxisSlot::from)));
        }
        slots.insert(
            AXES_DATA.into(),
            Slot::AxesData {
                axis_names: self.axis_names().to_vec(),
                reduced_axes: self.reduced_axes().to_vec(),
            },
        );
        slots.insert(METADATA.into(), Slot::Metadata(stringify_metadata(&self.metadata)));
        slots.insert(SAVED_AT.into(), Slot::Timestamp(Utc::now()));

        write_slots(writer, &slots)
    }

    /// Read a container from `path`.
    ///
    /// Fails with [`LabError::Archive`] if the stored sample type is not `A`.
    pub fn load(path: impl AsRef<Path>) -> AppResult<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(BufReader::new(file))
    }

    /// Read a container and turn stored enum strings back into enum members.
    pub fn load_with_enums(path: impl AsRef<Path>, enums: &[EnumDescriptor]) -> AppResult<Self> {
        let mut data = Self::load(path)?;
        data.metadata = std::mem::take(&mut data.metadata)
            .into_iter()
            .map(|(k, v)| (k, v.restore_enums(enums)))
            .collect();
        Ok(data)
    }

    /// Read a container from any byte source.
    pub fn from_reader<R: Read>(reader: R) -> AppResult<Self> {
        let mut slots = read_slots(reader)?;

        let Some(Slot::Samples {
            dtype,
            shape,
            components,
        }) = slots.remove(SAMPLES)
        else {
            return Err(missing(SAMPLES));
        };
        if dtype != A::DTYPE {
            return Err(LabError::Archive(format!(
                "archive holds {dtype} samples, expected {}",
                A::DTYPE
            )));
        }
        let shape: Vec<usize> = shape.into_iter().map(|d| d as usize).collect();
        let values: Vec<A> = components
            .chunks_exact(A::COMPONENTS)
            .map(A::from_components)
            .collect();
        let samples = ArrayD::from_shape_vec(IxDyn(&shape), values)
            .map_err(|e| LabError::Archive(format!("sample grid does not match its shape: {e}")))?;

        let Some(Slot::Count(count)) = slots.remove(AXIS_COUNT) else {
            return Err(missing(AXIS_COUNT));
        };
        let mut axes = Vec::with_capacity(count as usize);
        for i in 0..count as usize {
            let name = axis_slot(i);
            let Some(Slot::Axis(axis)) = slots.remove(&name) else {
                return Err(missing(&name));
            };
            axes.push(axis.map(Coordinates::from));
        }

        let Some(Slot::AxesData {
            axis_names,
            reduced_axes,
        }) = slots.remove(AXES_DATA)
        else {
            return Err(missing(AXES_DATA));
        };
        let metadata = match slots.remove(METADATA) {
            Some(Slot::Metadata(m)) => m,
            None => Metadata::new(),
            Some(_) => return Err(missing(METADATA)),
        };

        NumericalData::from_parts(samples, axes, axis_names, reduced_axes, metadata)
    }
}

/// Description of an archive, readable without knowing its sample type.
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveSummary {
    /// Stored sample type.
    pub dtype: String,
    /// Grid shape.
    pub shape: Vec<usize>,
    /// One line per axis slot (`"numeric, 501 points, 1e9 .. 2e9"`, `"labels [i, q]"`, `"none"`).
    pub axes: Vec<String>,
    /// Axis names.
    pub axis_names: Vec<Option<String>>,
    /// Reduced-axis log.
    pub reduced_axes: Vec<ReducedAxis>,
    /// Stored metadata (enums as text).
    pub metadata: Metadata,
    /// When the archive was written.
    pub saved_at: Option<DateTime<Utc>>,
}

/// Summarize the archive at `path`.
pub fn inspect(path: impl AsRef<Path>) -> AppResult<ArchiveSummary> {
    let file = File::open(path.as_ref())?;
    let mut slots = read_slots(BufReader::new(file))?;

    let Some(Slot::Samples { dtype, shape, .. }) = slots.remove(SAMPLES) else {
        return Err(missing(SAMPLES));
    };
    let count = match slots.get(AXIS_COUNT) {
        Some(Slot::Count(n)) => *n as usize,
        _ => return Err(missing(AXIS_COUNT)),
    };
    let axes = (0..count)
        .map(|i| match slots.get(&axis_slot(i)) {
            Some(Slot::Axis(Some(AxisSlot::Numeric(v)))) => match (v.first(), v.last()) {
                (Some(first), Some(last)) => {
                    format!("numeric, {} points, {first:?} .. {last:?}", v.len())
                }
                _ => "numeric, empty".to_string(),
            },
            Some(Slot::Axis(Some(AxisSlot::Labels(l)))) => format!("labels [{}]", l.join(", ")),
            _ => "none".to_string(),
        })
        .collect();
    let (axis_names, reduced_axes) = match slots.remove(AXES_DATA) {
        Some(Slot::AxesData {
            axis_names,
            reduced_axes,
        }) => (axis_names, reduced_axes),
        _ => (Vec::new(), Vec::new()),
    };
    let metadata = match slots.remove(METADATA) {
        Some(Slot::Metadata(m)) => m,
        _ => Metadata::new(),
    };
    let saved_at = match slots.remove(SAVED_AT) {
        Some(Slot::Timestamp(t)) => Some(t),
        _ => None,
    };

    Ok(ArchiveSummary {
        dtype,
        shape: shape.into_iter().map(|d| d as usize).collect(),
        axes,
        axis_names,
        reduced_axes,
        metadata,
        saved_at,
    })
}

impl fmt::Display for ArchiveSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "dtype:  {}", self.dtype)?;
        writeln!(f, "rank:   {}", self.shape.len())?;
        writeln!(f, "shape:  {:?}", self.shape)?;
        if let Some(t) = self.saved_at {
            writeln!(f, "saved:  {}", t.to_rfc3339())?;
        }
        writeln!(f, "axes:")?;
        for (i, axis) in self.axes.iter().enumerate() {
            let name = self
                .axis_names
                .get(i)
                .and_then(|n| n.as_deref())
                .unwrap_or("-");
            writeln!(f, "  [{i}] {name}: {axis}")?;
        }
        if !self.reduced_axes.is_empty() {
            writeln!(f, "reduced axes:")?;
            for r in &self.reduced_axes {
                let value = r.value.as_ref().map_or("-".to_string(), |v| v.to_string());
                writeln!(
                    f,
                    "  {} (position {}, index {}) = {value}",
                    r.name.as_deref().unwrap_or("-"),
                    r.position,
                    r.index
                )?;
            }
        }
        writeln!(f, "metadata:")?;
        for (k, v) in &self.metadata {
            writeln!(f, "  {k} = {v}")?;
        }
        Ok(())
    }
}

/// Returns true if `value` or anything nested in it is an enum member.
pub fn contains_enums(value: &Value) -> bool {
    match value {
        Value::Enum(_) => true,
        Value::List(items) => items.iter().any(contains_enums),
        Value::Map(map) => map.values().any(contains_enums),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::EnumValue;
    use num_complex::Complex64;

    fn round_trip<A: Sample>(data: &NumericalData<A>) -> NumericalData<A> {
        let mut buf = Vec::new();
        data.to_writer(&mut buf).unwrap();
        NumericalData::from_reader(buf.as_slice()).unwrap()
    }

    #[test]
    fn complex_samples_survive() {
        let data = NumericalData::from_quadratures(&[1.0, -2.0], &[0.5, 3.0]).unwrap();
        let back = round_trip(&data);
        assert_eq!(back.samples()[[1]], Complex64::new(-2.0, 3.0));
    }

    #[test]
    fn wrong_dtype_is_rejected() {
        let data = NumericalData::from_vec(vec![1.0, 2.0]);
        let mut buf = Vec::new();
        data.to_writer(&mut buf).unwrap();
        let err = NumericalData::<Complex64>::from_reader(buf.as_slice()).unwrap_err();
        assert!(matches!(err, LabError::Archive(_)));
    }

    #[test]
    fn garbage_is_rejected() {
        let err = NumericalData::<f64>::from_reader(&b"definitely not an archive"[..]).unwrap_err();
        assert!(matches!(err, LabError::Archive(_)));
    }

    #[test]
    fn enums_are_stringified() {
        let mut data = NumericalData::from_vec(vec![0.0]);
        let detector = Value::Enum(EnumValue {
            type_name: "DetectorMode".into(),
            member: "Average".into(),
            wire: "AVER".into(),
        });
        data.insert_metadata("detector", detector.clone());
        assert!(contains_enums(&data.metadata["detector"]));

        let back = round_trip(&data);
        assert_eq!(back.metadata["detector"], Value::from("DetectorMode.Average"));
    }

    #[test]
    fn sparse_axis_lists_survive() {
        let data = NumericalData::from_shape_vec(&[2, 2], vec![1.0, 2.0, 3.0, 4.0])
            .unwrap()
            .with_y_axis(["a", "b"])
            .unwrap();
        let back = round_trip(&data);
        assert_eq!(back.axes(), data.axes());
        assert!(back.x_axis().is_none());
    }
}
