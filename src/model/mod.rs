//! Data model for bounding-box annotations.

mod labels;
mod region;

pub use labels::LabelSet;
pub use region::{Region, RegionParseError};
