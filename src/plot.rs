//! Renderer-independent plot preparation.
//!
//! Containers turn themselves into [`PlotData`]: point series for one-dimensional
//! data, a color mesh for two-dimensional data. Drawing is left to a
//! [`PlotBackend`] (an egui widget, an SVG writer, a test recorder).

use crate::data::{NumericalData, Sample};
use crate::error::{AppResult, LabError};
use crate::value::Metadata;
use ndarray::{Array2, Ix2};

/// `scaling * (value - offset)` applied to one plot axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisTransform {
    /// Multiplier applied after the offset.
    pub scaling: f64,
    /// Subtracted before scaling.
    pub offset: f64,
}

impl Default for AxisTransform {
    fn default() -> Self {
        Self {
            scaling: 1.0,
            offset: 0.0,
        }
    }
}

impl AxisTransform {
    /// Transform with the given scaling and offset.
    pub fn new(scaling: f64, offset: f64) -> Self {
        Self { scaling, offset }
    }

    fn apply(&self, v: f64) -> f64 {
        self.scaling * (v - self.offset)
    }
}

/// How to prepare a container for plotting.
#[derive(Debug, Clone)]
pub struct PlotOptions {
    /// Transform of the x coordinates.
    pub x: AxisTransform,
    /// Transform of the y coordinates (1-D: the samples).
    pub y: AxisTransform,
    /// Transform of the samples of 2-D data.
    pub z: AxisTransform,
    /// Explicit x label.
    pub x_label: Option<String>,
    /// Explicit y label.
    pub y_label: Option<String>,
    /// Explicit color-scale label.
    pub z_label: Option<String>,
    /// Fill missing labels from `*_label` / `*_unit` metadata.
    pub auto_label: bool,
    /// Convert 2-D center coordinates to cell corners.
    pub fix_mesh: bool,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            x: AxisTransform::default(),
            y: AxisTransform::default(),
            z: AxisTransform::default(),
            x_label: None,
            y_label: None,
            z_label: None,
            auto_label: true,
            fix_mesh: true,
        }
    }
}

/// Named sequence of `[x, y]` points.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    /// Series name (`"re"` / `"im"` for complex data).
    pub name: String,
    /// Points in axis order.
    pub points: Vec<[f64; 2]>,
}

/// Line plot of one-dimensional data.
#[derive(Debug, Clone, PartialEq)]
pub struct Line1d {
    /// One series for real data, two for complex data.
    pub series: Vec<Series>,
    /// X axis label.
    pub x_label: Option<String>,
    /// Y axis label.
    pub y_label: Option<String>,
}

/// Color mesh of two-dimensional data.
#[derive(Debug, Clone, PartialEq)]
pub struct Mesh2d {
    /// X coordinates: cell corners (`n + 1`) if corrected, centers otherwise.
    pub x: Vec<f64>,
    /// Y coordinates, as for `x`.
    pub y: Vec<f64>,
    /// Values with rows along y and columns along x.
    pub z: Array2<f64>,
    /// Whether `x` and `y` hold corners.
    pub corners: bool,
    /// X axis label.
    pub x_label: Option<String>,
    /// Y axis label.
    pub y_label: Option<String>,
    /// Color-scale label.
    pub z_label: Option<String>,
}

/// Prepared plot.
#[derive(Debug, Clone, PartialEq)]
pub enum PlotData {
    /// Line plot.
    Line(Line1d),
    /// Color mesh.
    Mesh(Mesh2d),
}

/// Something that can draw prepared plots.
pub trait PlotBackend {
    /// Draw a line plot.
    fn draw_line(&mut self, line: &Line1d) -> AppResult<()>;

    /// Draw a color mesh.
    fn draw_mesh(&mut self, mesh: &Mesh2d) -> AppResult<()>;
}

/// Cell corners for center coordinates: midpoints, plus one half-step beyond each end.
pub fn mesh_corners(centers: &[f64]) -> Vec<f64> {
    match centers {
        [] => Vec::new(),
        [c] => vec![c - 0.5, c + 0.5],
        _ => {
            let n = centers.len();
            let mut corners = Vec::with_capacity(n + 1);
            corners.push(1.5 * centers[0] - 0.5 * centers[1]);
            corners.extend(centers.windows(2).map(|w| (w[0] + w[1]) / 2.0));
            corners.push(1.5 * centers[n - 1] - 0.5 * centers[n - 2]);
            corners
        }
    }
}

fn auto_label(metadata: &Metadata, axis: &str) -> Option<String> {
    let text = |key: String| {
        metadata
            .get(&key)
            .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
    };
    let label = text(format!("{axis}_label"))?;
    Some(match text(format!("{axis}_unit")) {
        Some(unit) => format!("{label} ({unit})"),
        None => label,
    })
}

impl<A: Sample> NumericalData<A> {
    fn label(&self, explicit: &Option<String>, auto: bool, axis: &str) -> Option<String> {
        explicit
            .clone()
            .or_else(|| auto.then(|| auto_label(&self.metadata, axis)).flatten())
    }

    /// Coordinates of axis `index` for plotting; label and missing axes plot against positions.
    fn plot_coordinates(&self, index: usize, transform: AxisTransform) -> Vec<f64> {
        let n = self.shape()[index];
        match self.axis(index).and_then(|c| c.as_numeric()) {
            Some(values) => values.iter().map(|&v| transform.apply(v)).collect(),
            None => (0..n).map(|i| transform.apply(i as f64)).collect(),
        }
    }

    /// Prepare this container for plotting.
    ///
    /// Fails with [`LabError::Unsupported`] for ranks other than 1 and 2, and for
    /// complex two-dimensional data.
    pub fn plot_data(&self, options: &PlotOptions) -> AppResult<PlotData> {
        match self.rank() {
            1 => Ok(PlotData::Line(self.line_data(options))),
            2 => self.mesh_data(options).map(PlotData::Mesh),
            rank => Err(LabError::Unsupported(format!(
                "no plotting method available for {rank}-dimensional data"
            ))),
        }
    }

    /// Prepare and draw.
    pub fn plot(&self, backend: &mut dyn PlotBackend, options: &PlotOptions) -> AppResult<()> {
        match self.plot_data(options)? {
            PlotData::Line(line) => backend.draw_line(&line),
            PlotData::Mesh(mesh) => backend.draw_mesh(&mesh),
        }
    }

    fn line_data(&self, options: &PlotOptions) -> Line1d {
        let x = self.plot_coordinates(0, options.x);
        let values: Vec<A> = self
            .samples()
            .iter()
            .map(|&s| s.affine(options.y.scaling, options.y.offset))
            .collect();
        let series = |name: &str, part: fn(A) -> f64| Series {
            name: name.to_string(),
            points: x.iter().zip(&values).map(|(&x, &v)| [x, part(v)]).collect(),
        };
        let series = if A::is_complex() {
            vec![series("re", A::re), series("im", A::im)]
        } else {
            vec![series("data", A::re)]
        };
        Line1d {
            series,
            x_label: self.label(&options.x_label, options.auto_label, "x"),
            y_label: self.label(&options.y_label, options.auto_label, "y"),
        }
    }

    fn mesh_data(&self, options: &PlotOptions) -> AppResult<Mesh2d> {
        if A::is_complex() {
            return Err(LabError::Unsupported(
                "2-dimensional plots of complex data; plot the quadratures separately".into(),
            ));
        }
        let grid = self.samples().view().into_dimensionality::<Ix2>()?;
        let z = grid
            .t()
            .mapv(|s| s.affine(options.z.scaling, options.z.offset).re());
        let mut x = self.plot_coordinates(0, options.x);
        let mut y = self.plot_coordinates(1, options.y);
        if options.fix_mesh {
            x = mesh_corners(&x);
            y = mesh_corners(&y);
        }
        Ok(Mesh2d {
            x,
            y,
            z,
            corners: options.fix_mesh,
            x_label: self.label(&options.x_label, options.auto_label, "x"),
            y_label: self.label(&options.y_label, options.auto_label, "y"),
            z_label: self.label(&options.z_label, options.auto_label, "z"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::NumericalData;

    #[derive(Default)]
    struct Recorder {
        lines: usize,
        meshes: usize,
    }

    impl PlotBackend for Recorder {
        fn draw_line(&mut self, _line: &Line1d) -> AppResult<()> {
            self.lines += 1;
            Ok(())
        }

        fn draw_mesh(&mut self, _mesh: &Mesh2d) -> AppResult<()> {
            self.meshes += 1;
            Ok(())
        }
    }

    #[test]
    fn corners_bracket_the_centers() {
        assert_eq!(mesh_corners(&[0.0, 1.0, 2.0]), vec![-0.5, 0.5, 1.5, 2.5]);
        assert_eq!(mesh_corners(&[3.0]), vec![2.5, 3.5]);
        assert!(mesh_corners(&[]).is_empty());
    }

    #[test]
    fn line_with_labels_and_scaling() {
        let mut data = NumericalData::from_vec(vec![1.0, 2.0])
            .with_x_axis(vec![1e9, 2e9])
            .unwrap();
        data.insert_metadata("x_label", "frequency");
        data.insert_metadata("x_unit", "Hz");
        data.insert_metadata("y_label", "signal");
        let options = PlotOptions {
            x: AxisTransform::new(1e-9, 0.0),
            ..PlotOptions::default()
        };
        let PlotData::Line(line) = data.plot_data(&options).unwrap() else {
            panic!("expected a line plot");
        };
        assert_eq!(line.series[0].points, vec![[1.0, 1.0], [2.0, 2.0]]);
        assert_eq!(line.x_label.as_deref(), Some("frequency (Hz)"));
        assert_eq!(line.y_label.as_deref(), Some("signal"));

        let quiet = PlotOptions {
            auto_label: false,
            ..PlotOptions::default()
        };
        let PlotData::Line(line) = data.plot_data(&quiet).unwrap() else {
            panic!("expected a line plot");
        };
        assert!(line.x_label.is_none());
    }

    #[test]
    fn complex_lines_split_into_quadratures() {
        let data = NumericalData::from_quadratures(&[1.0, 2.0], &[3.0, 4.0]).unwrap();
        let PlotData::Line(line) = data.plot_data(&PlotOptions::default()).unwrap() else {
            panic!("expected a line plot");
        };
        assert_eq!(line.series.len(), 2);
        assert_eq!(line.series[1].points, vec![[0.0, 3.0], [1.0, 4.0]]);
    }

    #[test]
    fn meshes_are_transposed() {
        let data = NumericalData::from_shape_vec(&[2, 3], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])
            .unwrap()
            .with_x_axis(vec![0.0, 1.0])
            .unwrap();
        let mut backend = Recorder::default();
        data.plot(&mut backend, &PlotOptions::default()).unwrap();
        assert_eq!(backend.meshes, 1);

        let PlotData::Mesh(mesh) = data.plot_data(&PlotOptions::default()).unwrap() else {
            panic!("expected a mesh");
        };
        assert_eq!(mesh.z.shape(), &[3, 2]);
        assert_eq!(mesh.z[[2, 1]], 5.0);
        assert_eq!(mesh.x, vec![-0.5, 0.5, 1.5]);
        assert_eq!(mesh.y.len(), 4);
    }

    #[test]
    fn higher_ranks_are_unsupported() {
        let data = NumericalData::from_shape_vec(&[1, 1, 1], vec![0.0]).unwrap();
        assert!(matches!(
            data.plot_data(&PlotOptions::default()),
            Err(LabError::Unsupported(_))
        ));
        let complex = NumericalData::<num_complex::Complex64>::new(
            ndarray::ArrayD::zeros(ndarray::IxDyn(&[2, 2])),
        );
        assert!(complex.plot_data(&PlotOptions::default()).is_err());
    }
}
