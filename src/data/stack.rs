//! Stacking containers (or bare grids) along a new axis.

use super::container::{Coordinates, NumericalData, Sample};
use crate::error::{AppResult, LabError};
use crate::value::{Metadata, Value};
use ndarray::{ArrayD, ArrayViewD, Axis};

/// Metadata key under which per-input metadata is kept when requested.
pub const INDIVIDUAL_METADATA_KEY: &str = "_individual_metadata";

/// One input to [`NumericalData::stack`].
#[derive(Debug, Clone)]
pub enum StackItem<'a, A: Sample> {
    /// A container; its grid is stacked and its axes and metadata may be used.
    Data(&'a NumericalData<A>),
    /// A bare grid.
    Grid(ArrayViewD<'a, A>),
}

impl<'a, A: Sample> StackItem<'a, A> {
    fn view(&self) -> ArrayViewD<'a, A> {
        match self {
            StackItem::Data(d) => d.samples().view(),
            StackItem::Grid(g) => g.clone(),
        }
    }
}

impl<'a, A: Sample> From<&'a NumericalData<A>> for StackItem<'a, A> {
    fn from(data: &'a NumericalData<A>) -> Self {
        StackItem::Data(data)
    }
}

impl<'a, A: Sample> From<&'a ArrayD<A>> for StackItem<'a, A> {
    fn from(grid: &'a ArrayD<A>) -> Self {
        StackItem::Grid(grid.view())
    }
}

impl<'a, A: Sample> From<ArrayViewD<'a, A>> for StackItem<'a, A> {
    fn from(grid: ArrayViewD<'a, A>) -> Self {
        StackItem::Grid(grid)
    }
}

/// Options for [`NumericalData::stack`].
#[derive(Debug, Clone)]
pub struct StackOptions {
    /// Position of the new axis; negative values count from the end of the result.
    pub axis: isize,
    /// Coordinates of the new axis.
    pub new_axis: Option<Coordinates>,
    /// Name of the new axis.
    pub new_axis_name: Option<String>,
    /// Keep each container's metadata under [`INDIVIDUAL_METADATA_KEY`], keyed by
    /// input position; bare grids have no entry.
    pub retain_individual_metadata: bool,
    /// Turn a label axis into numbers when every label parses.
    pub convert_axis: bool,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            axis: -1,
            new_axis: None,
            new_axis_name: None,
            retain_individual_metadata: false,
            convert_axis: true,
        }
    }
}

impl StackOptions {
    /// Stack along `axis`.
    pub fn along(axis: isize) -> Self {
        Self {
            axis,
            ..Self::default()
        }
    }

    /// Coordinates and name of the new axis.
    pub fn with_new_axis(mut self, coords: impl Into<Coordinates>, name: impl Into<String>) -> Self {
        self.new_axis = Some(coords.into());
        self.new_axis_name = Some(name.into());
        self
    }

    /// Keep per-input metadata.
    pub fn retain_individual_metadata(mut self) -> Self {
        self.retain_individual_metadata = true;
        self
    }

    /// Keep label axes as labels.
    pub fn keep_labels(mut self) -> Self {
        self.convert_axis = false;
        self
    }
}

impl<A: Sample> NumericalData<A> {
    /// Stack same-shaped inputs into a container one rank higher.
    ///
    /// Axes, names and metadata come from the first container among the inputs;
    /// the new axis is inserted at `options.axis`. The result has an empty
    /// reduced-axis log.
    ///
    /// ```
    /// use labframe::data::{NumericalData, StackItem, StackOptions};
    ///
    /// let a = NumericalData::from_vec(vec![1.0, 2.0]).with_axis_names(["freq"]);
    /// let b = NumericalData::from_vec(vec![3.0, 4.0]);
    /// let items: Vec<StackItem<f64>> = vec![(&a).into(), (&b).into()];
    /// let stacked = NumericalData::stack(&items, StackOptions::along(0)
    ///     .with_new_axis(vec![10.0, 20.0], "power")).unwrap();
    ///
    /// assert_eq!(stacked.shape(), &[2, 2]);
    /// assert_eq!(stacked.axis_name(0), Some("power"));
    /// assert_eq!(stacked.axis_name(1), Some("freq"));
    /// ```
    pub fn stack(items: &[StackItem<'_, A>], options: StackOptions) -> AppResult<NumericalData<A>> {
        let Some(first) = items.first() else {
            return Err(LabError::Shape("nothing to stack".into()));
        };
        let rank = first.view().ndim();
        let position = new_axis_position(options.axis, rank)?;

        let views: Vec<ArrayViewD<'_, A>> = items.iter().map(StackItem::view).collect();
        let samples = ndarray::stack(Axis(position), &views)?;

        let base = items.iter().find_map(|item| match item {
            StackItem::Data(d) => Some(*d),
            StackItem::Grid(_) => None,
        });

        let mut metadata = base.map(|d| d.metadata.clone()).unwrap_or_default();
        if options.retain_individual_metadata {
            let individual: Metadata = items
                .iter()
                .enumerate()
                .filter_map(|(i, item)| match item {
                    StackItem::Data(d) => Some((i.to_string(), Value::Map(d.metadata.clone()))),
                    StackItem::Grid(_) => None,
                })
                .collect();
            metadata.insert(INDIVIDUAL_METADATA_KEY.to_string(), Value::Map(individual));
        }

        let mut axes: Vec<Option<Coordinates>> = base.map(|d| d.axes().to_vec()).unwrap_or_default();
        let mut names: Vec<Option<String>> =
            base.map(|d| d.axis_names().to_vec()).unwrap_or_default();
        axes.resize(rank, None);
        names.resize(rank, None);

        let new_axis = options.new_axis.map(|coords| {
            if options.convert_axis {
                coords.into_numeric_if_possible()
            } else {
                coords
            }
        });
        axes.insert(position, new_axis);
        names.insert(position, options.new_axis_name);

        NumericalData::from_parts(samples, axes, names, Vec::new(), metadata)
    }
}

/// Insert position of the new axis in a result of rank `rank + 1`.
fn new_axis_position(axis: isize, rank: usize) -> AppResult<usize> {
    let result_rank = rank as isize + 1;
    let position = if axis < 0 { result_rank + axis } else { axis };
    if position < 0 || position >= result_rank {
        return Err(LabError::Index(format!(
            "axis {axis} is out of bounds for a stacked result of rank {result_rank}"
        )));
    }
    Ok(position as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn negative_axes_count_from_the_result() {
        assert_eq!(new_axis_position(-1, 2).unwrap(), 2);
        assert_eq!(new_axis_position(-3, 2).unwrap(), 0);
        assert_eq!(new_axis_position(1, 1).unwrap(), 1);
        assert!(new_axis_position(2, 1).is_err());
        assert!(new_axis_position(-3, 1).is_err());
    }

    #[test]
    fn grids_and_containers_mix() {
        let a = NumericalData::from_vec(vec![1.0, 2.0, 3.0])
            .with_x_axis(vec![0.0, 1.0, 2.0])
            .unwrap();
        let grid = array![4.0, 5.0, 6.0].into_dyn();
        let items = vec![StackItem::from(&grid), StackItem::from(&a)];
        let stacked = NumericalData::stack(&items, StackOptions::default()).unwrap();
        assert_eq!(stacked.shape(), &[3, 2]);
        assert_eq!(stacked.samples()[[0, 0]], 4.0);
        assert_eq!(stacked.samples()[[2, 1]], 3.0);
        assert_eq!(stacked.x_axis(), a.x_axis());
        assert!(stacked.y_axis().is_none());
    }

    #[test]
    fn label_axis_converted_unless_suppressed() {
        let a = NumericalData::from_vec(vec![1.0]);
        let b = NumericalData::from_vec(vec![2.0]);
        let items = vec![StackItem::from(&a), StackItem::from(&b)];

        let converted = NumericalData::stack(
            &items,
            StackOptions::along(0).with_new_axis(vec!["1.5", "2.5"], "power"),
        )
        .unwrap();
        assert_eq!(converted.x_axis(), Some(&Coordinates::from(vec![1.5, 2.5])));

        let kept = NumericalData::stack(
            &items,
            StackOptions::along(0)
                .with_new_axis(vec!["1.5", "2.5"], "power")
                .keep_labels(),
        )
        .unwrap();
        assert!(kept.x_axis().unwrap().labels().is_some());
    }

    #[test]
    fn individual_metadata_is_retained_on_request() {
        let mut a = NumericalData::from_vec(vec![1.0]);
        a.insert_metadata("run", 1);
        let mut b = NumericalData::from_vec(vec![2.0]);
        b.insert_metadata("run", 2);
        let items = vec![StackItem::from(&a), StackItem::from(&b)];

        let plain = NumericalData::stack(&items, StackOptions::default()).unwrap();
        assert_eq!(plain.metadata["run"], Value::Int(1));
        assert!(!plain.metadata.contains_key(INDIVIDUAL_METADATA_KEY));

        let kept = NumericalData::stack(&items, StackOptions::default().retain_individual_metadata())
            .unwrap();
        let individual = kept.metadata[INDIVIDUAL_METADATA_KEY].as_map().unwrap();
        assert_eq!(individual["1"].as_map().unwrap()["run"], Value::Int(2));
    }

    #[test]
    fn individual_metadata_skips_bare_grids() {
        let mut a = NumericalData::from_vec(vec![1.0]);
        a.insert_metadata("run", 1);
        let grid = ndarray::arr1(&[5.0]).into_dyn();
        let items = vec![StackItem::from(&grid), StackItem::from(&a)];

        let kept = NumericalData::stack(&items, StackOptions::default().retain_individual_metadata())
            .unwrap();
        let individual = kept.metadata[INDIVIDUAL_METADATA_KEY].as_map().unwrap();
        assert_eq!(individual.len(), 1);
        assert!(!individual.contains_key("0"));
        assert_eq!(individual["1"].as_map().unwrap()["run"], Value::Int(1));
    }

    #[test]
    fn mismatched_shapes_fail() {
        let a = NumericalData::from_vec(vec![1.0, 2.0]);
        let b = NumericalData::from_vec(vec![1.0]);
        let items = vec![StackItem::from(&a), StackItem::from(&b)];
        assert!(matches!(
            NumericalData::stack(&items, StackOptions::default()),
            Err(LabError::Shape(_))
        ));
        assert!(NumericalData::<f64>::stack(&[], StackOptions::default()).is_err());
    }
}
