//! The labeled N-dimensional container.

use crate::error::{AppResult, LabError};
use crate::value::{Metadata, Value};
use ndarray::{Array1, ArrayD, IxDyn};
use num_complex::Complex64;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Element type of a container grid.
pub trait Sample: Copy + PartialEq + Default + fmt::Debug + Send + Sync + 'static {
    /// Name recorded in archives.
    const DTYPE: &'static str;
    /// Number of `f64` components per sample.
    const COMPONENTS: usize;

    /// Append the components of this sample to `out`.
    fn push_components(self, out: &mut Vec<f64>);

    /// Rebuild a sample from exactly [`COMPONENTS`](Self::COMPONENTS) values.
    fn from_components(parts: &[f64]) -> Self;

    /// Real part.
    fn re(self) -> f64;

    /// Imaginary part (zero for real samples).
    fn im(self) -> f64;

    /// `scale * (self - offset)`.
    fn affine(self, scale: f64, offset: f64) -> Self;

    /// Whether samples carry an imaginary part.
    fn is_complex() -> bool {
        Self::COMPONENTS == 2
    }
}

impl Sample for f64 {
    const DTYPE: &'static str = "float64";
    const COMPONENTS: usize = 1;

    fn push_components(self, out: &mut Vec<f64>) {
        out.push(self);
    }

    fn from_components(parts: &[f64]) -> Self {
        parts[0]
    }

    fn re(self) -> f64 {
        self
    }

    fn im(self) -> f64 {
        0.0
    }

    fn affine(self, scale: f64, offset: f64) -> Self {
        scale * (self - offset)
    }
}

impl Sample for Complex64 {
    const DTYPE: &'static str = "complex128";
    const COMPONENTS: usize = 2;

    fn push_components(self, out: &mut Vec<f64>) {
        out.push(self.re);
        out.push(self.im);
    }

    fn from_components(parts: &[f64]) -> Self {
        Complex64::new(parts[0], parts[1])
    }

    fn re(self) -> f64 {
        self.re
    }

    fn im(self) -> f64 {
        self.im
    }

    fn affine(self, scale: f64, offset: f64) -> Self {
        (self - offset) * scale
    }
}

/// One coordinate of an axis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AxisValue {
    /// Numeric coordinate.
    Number(f64),
    /// Text label.
    Label(String),
}

impl fmt::Display for AxisValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisValue::Number(v) => write!(f, "{v}"),
            AxisValue::Label(s) => f.write_str(s),
        }
    }
}

/// Coordinates along one axis.
#[derive(Debug, Clone, PartialEq)]
pub enum Coordinates {
    /// Numeric coordinates (frequencies, times, ...).
    Numeric(Array1<f64>),
    /// Text labels (e.g. `["i", "q", "log_envelope"]`).
    Labels(Vec<String>),
}

impl Coordinates {
    /// Evenly spaced coordinates from `start` to `stop` inclusive.
    pub fn linspace(start: f64, stop: f64, n: usize) -> Self {
        Coordinates::Numeric(Array1::linspace(start, stop, n))
    }

    /// Number of coordinates.
    pub fn len(&self) -> usize {
        match self {
            Coordinates::Numeric(a) => a.len(),
            Coordinates::Labels(l) => l.len(),
        }
    }

    /// Returns true if the axis has no coordinates.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Coordinate at position `i`.
    pub fn get(&self, i: usize) -> Option<AxisValue> {
        match self {
            Coordinates::Numeric(a) => a.get(i).copied().map(AxisValue::Number),
            Coordinates::Labels(l) => l.get(i).cloned().map(AxisValue::Label),
        }
    }

    /// Numeric view, if the axis is numeric.
    pub fn as_numeric(&self) -> Option<&Array1<f64>> {
        match self {
            Coordinates::Numeric(a) => Some(a),
            Coordinates::Labels(_) => None,
        }
    }

    /// Labels, if the axis is textual.
    pub fn labels(&self) -> Option<&[String]> {
        match self {
            Coordinates::Labels(l) => Some(l),
            Coordinates::Numeric(_) => None,
        }
    }

    /// Coordinates at the given positions (bounds already checked).
    pub(crate) fn select(&self, indices: &[usize]) -> Coordinates {
        match self {
            Coordinates::Numeric(a) => Coordinates::Numeric(indices.iter().map(|&i| a[i]).collect()),
            Coordinates::Labels(l) => Coordinates::Labels(indices.iter().map(|&i| l[i].clone()).collect()),
        }
    }

    /// Numeric version of this axis: labels are parsed, failing if any label is not a number.
    pub fn to_numeric(&self) -> Option<Array1<f64>> {
        match self {
            Coordinates::Numeric(a) => Some(a.clone()),
            Coordinates::Labels(l) => l
                .iter()
                .map(|s| s.trim().parse::<f64>().ok())
                .collect::<Option<Vec<f64>>>()
                .map(Array1::from),
        }
    }

    /// Numeric if every label parses as a number, unchanged otherwise.
    pub fn into_numeric_if_possible(self) -> Coordinates {
        match self.to_numeric() {
            Some(values) => Coordinates::Numeric(values),
            None => self,
        }
    }
}

impl From<Array1<f64>> for Coordinates {
    fn from(values: Array1<f64>) -> Self {
        Coordinates::Numeric(values)
    }
}

impl From<Vec<f64>> for Coordinates {
    fn from(values: Vec<f64>) -> Self {
        Coordinates::Numeric(Array1::from(values))
    }
}

impl From<&[f64]> for Coordinates {
    fn from(values: &[f64]) -> Self {
        Coordinates::Numeric(Array1::from(values.to_vec()))
    }
}

impl From<Vec<String>> for Coordinates {
    fn from(labels: Vec<String>) -> Self {
        Coordinates::Labels(labels)
    }
}

impl From<Vec<&str>> for Coordinates {
    fn from(labels: Vec<&str>) -> Self {
        Coordinates::Labels(labels.into_iter().map(str::to_string).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Coordinates {
    fn from(labels: [&str; N]) -> Self {
        Coordinates::Labels(labels.iter().map(|s| s.to_string()).collect())
    }
}

/// Axis removed from an ancestor container by scalar indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReducedAxis {
    /// Axis name, if it had one.
    pub name: Option<String>,
    /// Position of the axis in the container that was indexed.
    pub position: usize,
    /// Index used, as given (may be negative).
    pub index: isize,
    /// Coordinate at that index, if the axis had coordinates.
    pub value: Option<AxisValue>,
}

/// N-dimensional samples with per-axis coordinates, names, provenance and metadata.
///
/// Axis 0 is the x axis, axis 1 the y axis and so on. The axis and name lists may
/// be shorter than the rank; missing entries are unlabeled axes.
///
/// # Example
///
/// ```
/// use labframe::data::{Coordinates, NumericalData};
///
/// let trace = NumericalData::from_vec(vec![1.0, 4.0, 9.0])
///     .with_x_axis(vec![0.0, 1.0, 2.0])
///     .unwrap()
///     .with_axis_names(["time"]);
/// assert_eq!(trace.rank(), 1);
/// assert_eq!(trace.x_axis(), Some(&Coordinates::from(vec![0.0, 1.0, 2.0])));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct NumericalData<A: Sample = f64> {
    samples: ArrayD<A>,
    axes: Vec<Option<Coordinates>>,
    axis_names: Vec<Option<String>>,
    reduced_axes: Vec<ReducedAxis>,
    /// Free-form metadata (instrument settings, labels, units, ...).
    pub metadata: Metadata,
}

impl<A: Sample> NumericalData<A> {
    /// Container around a grid, without axes or metadata.
    pub fn new(samples: ArrayD<A>) -> Self {
        Self {
            samples,
            axes: Vec::new(),
            axis_names: Vec::new(),
            reduced_axes: Vec::new(),
            metadata: Metadata::new(),
        }
    }

    /// One-dimensional container.
    pub fn from_vec(values: Vec<A>) -> Self {
        Self::new(Array1::from(values).into_dyn())
    }

    /// Container of the given shape from row-major values.
    pub fn from_shape_vec(shape: &[usize], values: Vec<A>) -> AppResult<Self> {
        Ok(Self::new(ArrayD::from_shape_vec(IxDyn(shape), values)?))
    }

    /// Container around the transpose of `samples` (axis order reversed).
    pub fn from_transposed(samples: ArrayD<A>) -> Self {
        Self::new(samples.reversed_axes())
    }

    /// Container whose columns are `columns`: shape `[n, columns.len()]`.
    pub fn from_columns(columns: &[Vec<A>]) -> AppResult<Self> {
        let n = columns.first().map_or(0, Vec::len);
        if let Some(bad) = columns.iter().find(|c| c.len() != n) {
            return Err(LabError::Shape(format!(
                "columns must have equal length ({} != {n})",
                bad.len()
            )));
        }
        let rows: Vec<A> = columns.iter().flat_map(|c| c.iter().copied()).collect();
        let grid = ArrayD::from_shape_vec(IxDyn(&[columns.len(), n]), rows)?;
        Ok(Self::from_transposed(grid))
    }

    /// Assemble a container from all of its parts, validating axis lengths.
    pub fn from_parts(
        samples: ArrayD<A>,
        axes: Vec<Option<Coordinates>>,
        axis_names: Vec<Option<String>>,
        reduced_axes: Vec<ReducedAxis>,
        metadata: Metadata,
    ) -> AppResult<Self> {
        let data = Self {
            samples,
            axes,
            axis_names,
            reduced_axes,
            metadata,
        };
        data.validate()?;
        Ok(data)
    }

    fn validate(&self) -> AppResult<()> {
        let rank = self.rank();
        if self.axes.len() > rank {
            return Err(LabError::Shape(format!(
                "{} axes given for a rank-{rank} grid",
                self.axes.len()
            )));
        }
        if self.axis_names.len() > rank {
            return Err(LabError::Shape(format!(
                "{} axis names given for a rank-{rank} grid",
                self.axis_names.len()
            )));
        }
        for (i, axis) in self.axes.iter().enumerate() {
            if let Some(coords) = axis {
                check_axis_len(i, coords, self.samples.shape()[i])?;
            }
        }
        Ok(())
    }

    /// Set the coordinates of axis `index`, padding the axis list with unlabeled axes.
    pub fn set_axis(&mut self, index: usize, coords: impl Into<Coordinates>) -> AppResult<()> {
        let coords = coords.into();
        let Some(&dim) = self.samples.shape().get(index) else {
            return Err(LabError::Index(format!(
                "axis {index} does not exist in a rank-{} grid",
                self.rank()
            )));
        };
        check_axis_len(index, &coords, dim)?;
        if self.axes.len() <= index {
            self.axes.resize(index + 1, None);
        }
        self.axes[index] = Some(coords);
        Ok(())
    }

    /// Builder form of [`set_axis`](Self::set_axis).
    pub fn with_axis(mut self, index: usize, coords: impl Into<Coordinates>) -> AppResult<Self> {
        self.set_axis(index, coords)?;
        Ok(self)
    }

    /// Set axis 0.
    pub fn with_x_axis(self, coords: impl Into<Coordinates>) -> AppResult<Self> {
        self.with_axis(0, coords)
    }

    /// Set axis 1.
    pub fn with_y_axis(self, coords: impl Into<Coordinates>) -> AppResult<Self> {
        self.with_axis(1, coords)
    }

    /// Set axis 2.
    pub fn with_z_axis(self, coords: impl Into<Coordinates>) -> AppResult<Self> {
        self.with_axis(2, coords)
    }

    /// Name the axes in order. Extra names beyond the rank are ignored.
    pub fn with_axis_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rank = self.rank();
        self.axis_names = names.into_iter().take(rank).map(|s| Some(s.into())).collect();
        self
    }

    /// Replace the metadata.
    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Insert one metadata entry.
    pub fn insert_metadata(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }

    /// The sample grid.
    pub fn samples(&self) -> &ArrayD<A> {
        &self.samples
    }

    /// Mutable sample grid (shape cannot change).
    pub fn samples_mut(&mut self) -> ndarray::ArrayViewMutD<'_, A> {
        self.samples.view_mut()
    }

    /// Take the grid.
    pub fn into_samples(self) -> ArrayD<A> {
        self.samples
    }

    /// Axis coordinate list (may be shorter than the rank).
    pub fn axes(&self) -> &[Option<Coordinates>] {
        &self.axes
    }

    /// Coordinates of axis `index`.
    pub fn axis(&self, index: usize) -> Option<&Coordinates> {
        self.axes.get(index).and_then(Option::as_ref)
    }

    /// Coordinates of axis 0.
    pub fn x_axis(&self) -> Option<&Coordinates> {
        self.axis(0)
    }

    /// Coordinates of axis 1.
    pub fn y_axis(&self) -> Option<&Coordinates> {
        self.axis(1)
    }

    /// Coordinates of axis 2.
    pub fn z_axis(&self) -> Option<&Coordinates> {
        self.axis(2)
    }

    /// Axis name list (may be shorter than the rank).
    pub fn axis_names(&self) -> &[Option<String>] {
        &self.axis_names
    }

    /// Name of axis `index`.
    pub fn axis_name(&self, index: usize) -> Option<&str> {
        self.axis_names.get(index).and_then(|n| n.as_deref())
    }

    /// Axes removed by scalar indexing, oldest first.
    pub fn reduced_axes(&self) -> &[ReducedAxis] {
        &self.reduced_axes
    }

    /// Grid shape.
    pub fn shape(&self) -> &[usize] {
        self.samples.shape()
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.samples.ndim()
    }

    /// Length of the first axis (0 for a scalar container).
    pub fn len(&self) -> usize {
        self.shape().first().copied().unwrap_or(0)
    }

    /// Returns true if the grid holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Total number of samples.
    pub fn size(&self) -> usize {
        self.samples.len()
    }

    /// Sample type name (`float64` or `complex128`).
    pub fn dtype(&self) -> &'static str {
        A::DTYPE
    }

    /// Single sample of a rank-0 container.
    pub fn scalar(&self) -> Option<A> {
        (self.rank() == 0).then(|| self.samples.iter().next().copied()).flatten()
    }
}

fn check_axis_len(index: usize, coords: &Coordinates, dim: usize) -> AppResult<()> {
    if coords.len() != dim {
        return Err(LabError::Shape(format!(
            "axis {index} has {} coordinates but the grid dimension is {dim}",
            coords.len()
        )));
    }
    Ok(())
}

impl NumericalData<Complex64> {
    /// Complex container from separate real and imaginary parts.
    pub fn from_quadratures(i: &[f64], q: &[f64]) -> AppResult<Self> {
        if i.len() != q.len() {
            return Err(LabError::Shape(format!(
                "quadratures differ in length ({} != {})",
                i.len(),
                q.len()
            )));
        }
        let values = i
            .iter()
            .zip(q)
            .map(|(&re, &im)| Complex64::new(re, im))
            .collect();
        Ok(Self::from_vec(values))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn axis_lengths_are_checked() {
        let mut data = NumericalData::from_vec(vec![1.0, 2.0, 3.0]);
        assert!(matches!(
            data.set_axis(0, vec![0.0, 1.0]),
            Err(LabError::Shape(_))
        ));
        assert!(matches!(
            data.set_axis(1, vec![0.0, 1.0, 2.0]),
            Err(LabError::Index(_))
        ));
        data.set_axis(0, vec![0.0, 1.0, 2.0]).unwrap();
        assert_eq!(data.axes().len(), 1);
    }

    #[test]
    fn set_axis_pads_with_unlabeled_axes() {
        let data = NumericalData::new(array![[1.0, 2.0], [3.0, 4.0]].into_dyn())
            .with_y_axis(vec![10.0, 20.0])
            .unwrap();
        assert_eq!(data.axes().len(), 2);
        assert!(data.x_axis().is_none());
        assert_eq!(data.y_axis().unwrap().get(1), Some(AxisValue::Number(20.0)));
    }

    #[test]
    fn columns_are_transposed_into_place() {
        let data = NumericalData::from_columns(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        assert_eq!(data.shape(), &[3, 2]);
        assert_eq!(data.samples()[[2, 1]], 6.0);
        assert_eq!(data.samples()[[0, 1]], 4.0);
    }

    #[test]
    fn delegation_surface() {
        let data = NumericalData::from_shape_vec(&[2, 3], vec![0.0; 6]).unwrap();
        assert_eq!(data.rank(), 2);
        assert_eq!(data.len(), 2);
        assert_eq!(data.size(), 6);
        assert_eq!(data.dtype(), "float64");
        assert!(!data.is_empty());
    }

    #[test]
    fn complex_containers() {
        let data = NumericalData::from_quadratures(&[1.0, 0.0], &[0.0, 1.0]).unwrap();
        assert_eq!(data.dtype(), "complex128");
        assert_eq!(data.samples()[[1]], Complex64::new(0.0, 1.0));
        assert!(NumericalData::from_quadratures(&[1.0], &[]).is_err());
    }

    #[test]
    fn labels_convert_to_numbers_when_possible() {
        let numeric = Coordinates::from(vec!["6", "7", "8.5"]).into_numeric_if_possible();
        assert_eq!(numeric, Coordinates::from(vec![6.0, 7.0, 8.5]));
        let labels = Coordinates::from(["i", "q"]).into_numeric_if_possible();
        assert_eq!(labels.labels().unwrap(), ["i", "q"]);
    }

    #[test]
    fn from_parts_validates() {
        let grid = ArrayD::<f64>::zeros(IxDyn(&[2]));
        let err = NumericalData::from_parts(
            grid,
            vec![None, None],
            vec![],
            vec![],
            Metadata::new(),
        )
        .unwrap_err();
        assert!(matches!(err, LabError::Shape(_)));
    }
}
