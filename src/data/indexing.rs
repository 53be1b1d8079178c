//! Position-based multi-axis indexing.
//!
//! Selectors follow NumPy conventions: a bare integer removes its axis (and logs it
//! in [`ReducedAxis`] entries), slices and index lists keep it, and one ellipsis
//! stands for as many full slices as needed. Index lists on several axes select
//! orthogonally (outer product), not pointwise.

use super::container::{NumericalData, ReducedAxis, Sample};
use crate::error::{AppResult, LabError};
use ndarray::Axis;
use std::fmt;
use std::ops::{Range, RangeFrom, RangeFull, RangeTo};

/// Marker for the ellipsis selector, for use with [`sel!`](crate::sel).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ellipsis;

/// Selector for one axis of an index expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// Single position; removes the axis.
    Index(isize),
    /// Slice with optional bounds and step; keeps the axis.
    Slice {
        /// First position (default: start of the axis).
        start: Option<isize>,
        /// One past the last position (default: end of the axis).
        stop: Option<isize>,
        /// Step, non-zero.
        step: isize,
    },
    /// Explicit positions; keeps the axis.
    Indices(Vec<isize>),
    /// Expands to full slices over the remaining axes.
    Ellipsis,
}

impl Selector {
    /// The whole axis.
    pub fn full() -> Self {
        Selector::Slice {
            start: None,
            stop: None,
            step: 1,
        }
    }

    /// Slice with an explicit step.
    pub fn slice(start: Option<isize>, stop: Option<isize>, step: isize) -> Self {
        Selector::Slice { start, stop, step }
    }

    /// Positions along an axis of length `len`, bounds-checked.
    fn positions(&self, len: usize) -> AppResult<Vec<usize>> {
        match self {
            Selector::Index(i) => Ok(vec![normalize_index(*i, len)?]),
            Selector::Indices(list) => list.iter().map(|&i| normalize_index(i, len)).collect(),
            Selector::Slice { start, stop, step } => slice_positions(*start, *stop, *step, len),
            Selector::Ellipsis => Ok((0..len).collect()),
        }
    }

    fn is_full(&self) -> bool {
        matches!(self, Selector::Slice { start: None, stop: None, step: 1 })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let opt = |v: &Option<isize>| v.map(|v| v.to_string()).unwrap_or_default();
        match self {
            Selector::Index(i) => write!(f, "{i}"),
            Selector::Slice { start, stop, step: 1 } => write!(f, "{}:{}", opt(start), opt(stop)),
            Selector::Slice { start, stop, step } => {
                write!(f, "{}:{}:{step}", opt(start), opt(stop))
            }
            Selector::Indices(list) => write!(f, "{list:?}"),
            Selector::Ellipsis => f.write_str("..."),
        }
    }
}

fn normalize_index(i: isize, len: usize) -> AppResult<usize> {
    let len_i = len as isize;
    let resolved = if i < 0 { i + len_i } else { i };
    if resolved < 0 || resolved >= len_i {
        return Err(LabError::Index(format!(
            "index {i} is out of bounds for an axis of length {len}"
        )));
    }
    Ok(resolved as usize)
}

fn slice_positions(
    start: Option<isize>,
    stop: Option<isize>,
    step: isize,
    len: usize,
) -> AppResult<Vec<usize>> {
    if step == 0 {
        return Err(LabError::Index("slice step cannot be zero".into()));
    }
    let n = len as isize;
    let resolve = |v: isize| if v < 0 { v + n } else { v };
    let mut positions = Vec::new();
    if step > 0 {
        let start = start.map_or(0, resolve).clamp(0, n);
        let stop = stop.map_or(n, resolve).clamp(0, n);
        let mut i = start;
        while i < stop {
            positions.push(i as usize);
            i += step;
        }
    } else {
        let start = start.map_or(n - 1, resolve).clamp(-1, n - 1);
        let stop = stop.map_or(-1, resolve).clamp(-1, n - 1);
        let mut i = start;
        while i > stop {
            positions.push(i as usize);
            i += step;
        }
    }
    Ok(positions)
}

impl From<isize> for Selector {
    fn from(i: isize) -> Self {
        Selector::Index(i)
    }
}

impl From<i32> for Selector {
    fn from(i: i32) -> Self {
        Selector::Index(i as isize)
    }
}

impl From<usize> for Selector {
    fn from(i: usize) -> Self {
        Selector::Index(i as isize)
    }
}

impl From<Range<isize>> for Selector {
    fn from(r: Range<isize>) -> Self {
        Selector::slice(Some(r.start), Some(r.end), 1)
    }
}

impl From<Range<i32>> for Selector {
    fn from(r: Range<i32>) -> Self {
        Selector::slice(Some(r.start as isize), Some(r.end as isize), 1)
    }
}

impl From<RangeFrom<i32>> for Selector {
    fn from(r: RangeFrom<i32>) -> Self {
        Selector::slice(Some(r.start as isize), None, 1)
    }
}

impl From<RangeTo<i32>> for Selector {
    fn from(r: RangeTo<i32>) -> Self {
        Selector::slice(None, Some(r.end as isize), 1)
    }
}

impl From<RangeFull> for Selector {
    fn from(_: RangeFull) -> Self {
        Selector::full()
    }
}

impl From<Vec<isize>> for Selector {
    fn from(list: Vec<isize>) -> Self {
        Selector::Indices(list)
    }
}

impl From<Vec<i32>> for Selector {
    fn from(list: Vec<i32>) -> Self {
        Selector::Indices(list.into_iter().map(|i| i as isize).collect())
    }
}

impl From<Ellipsis> for Selector {
    fn from(_: Ellipsis) -> Self {
        Selector::Ellipsis
    }
}

/// Build a selector list: `sel![0, .., 1..3, Ellipsis]`.
#[macro_export]
macro_rules! sel {
    ($($item:expr),* $(,)?) => {
        vec![$($crate::data::Selector::from($item)),*]
    };
}

/// Expand an index expression to exactly one selector per axis.
pub fn normalize_selectors(selectors: &[Selector], rank: usize) -> AppResult<Vec<Selector>> {
    let mut list = selectors.to_vec();
    let ellipses = list.iter().filter(|s| **s == Selector::Ellipsis).count();
    if list.len() < rank && ellipses == 0 {
        list.push(Selector::Ellipsis);
    }
    match ellipses {
        0 | 1 => {}
        _ => {
            return Err(LabError::Index(format!(
                "multiple ellipses in index expression [{}]",
                join(selectors)
            )))
        }
    }
    if let Some(at) = list.iter().position(|s| *s == Selector::Ellipsis) {
        let fill = (rank + 1).checked_sub(list.len()).ok_or_else(|| {
            LabError::Index(format!(
                "too many indices in [{}] for a rank-{rank} grid",
                join(selectors)
            ))
        })?;
        list.splice(at..=at, std::iter::repeat(Selector::full()).take(fill));
    }
    if list.len() != rank {
        return Err(LabError::Index(format!(
            "incorrect number of indices in [{}], expected {rank}",
            join(selectors)
        )));
    }
    Ok(list)
}

fn join(selectors: &[Selector]) -> String {
    selectors
        .iter()
        .map(Selector::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl<A: Sample> NumericalData<A> {
    /// Select by position.
    ///
    /// The child container carries the selected samples and coordinates, the
    /// parent's reduced-axis log plus one entry per integer selector, and a copy of
    /// the parent's metadata.
    ///
    /// ```
    /// use labframe::data::{Ellipsis, NumericalData};
    /// use labframe::sel;
    ///
    /// let grid = NumericalData::from_shape_vec(&[3, 2], vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0])
    ///     .unwrap()
    ///     .with_y_axis(vec![20.0, 30.0])
    ///     .unwrap()
    ///     .with_axis_names(["time", "wavelength"]);
    ///
    /// let column = grid.iloc(&sel![Ellipsis, 1]).unwrap();
    /// assert_eq!(column.shape(), &[3]);
    /// assert_eq!(column.reduced_axes()[0].name.as_deref(), Some("wavelength"));
    /// ```
    pub fn iloc(&self, selectors: &[Selector]) -> AppResult<NumericalData<A>> {
        let rank = self.rank();
        let selectors = normalize_selectors(selectors, rank)?;

        let mut grid = self.samples().clone();
        let mut axes = Vec::new();
        let mut names = Vec::new();
        let mut reduced = self.reduced_axes().to_vec();
        let mut scalar_axes = Vec::new();

        for (k, selector) in selectors.iter().enumerate() {
            let len = self.shape()[k];
            let positions = selector.positions(len)?;
            if !selector.is_full() {
                grid = grid.select(Axis(k), &positions);
            }
            let coords = self.axis(k);
            match selector {
                Selector::Index(i) => {
                    scalar_axes.push(k);
                    reduced.push(ReducedAxis {
                        name: self.axis_name(k).map(str::to_string),
                        position: k,
                        index: *i,
                        value: coords.and_then(|c| c.get(positions[0])),
                    });
                }
                _ => {
                    if k < self.axes().len() {
                        axes.push(coords.map(|c| c.select(&positions)));
                    }
                    if k < self.axis_names().len() {
                        names.push(self.axis_names()[k].clone());
                    }
                }
            }
        }
        for &k in scalar_axes.iter().rev() {
            grid = grid.index_axis_move(Axis(k), 0);
        }

        // Keep the axis list no longer than needed when trailing kept axes were unlabeled.
        let kept_rank = grid.ndim();
        axes.truncate(kept_rank);
        names.truncate(kept_rank);

        NumericalData::from_parts(grid, axes, names, reduced, self.metadata.clone())
    }
}
