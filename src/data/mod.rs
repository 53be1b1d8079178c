//! Labeled N-dimensional measurement data.
//!
//! [`NumericalData`] wraps an `ndarray` grid together with per-axis coordinates,
//! axis names, the log of axes removed by scalar indexing, and free-form metadata.
//! Submodules add position-based indexing ([`NumericalData::iloc`]), stacking
//! ([`NumericalData::stack`]) and single-file persistence ([`NumericalData::save`]).

pub mod archive;
pub mod container;
pub mod indexing;
pub mod stack;

pub use archive::{inspect, ArchiveSummary};
pub use container::{AxisValue, Coordinates, NumericalData, ReducedAxis, Sample};
pub use indexing::{Ellipsis, Selector};
pub use stack::{StackItem, StackOptions, INDIVIDUAL_METADATA_KEY};
