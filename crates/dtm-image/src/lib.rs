#![deny(missing_docs)]
//! Single channel grids for intensity images and terrain models

/// Grid representation for intensity images and elevation maps.
pub mod grid;

/// Error types for the image module.
pub mod error;

/// Decoding images from files and memory into intensity grids.
pub mod io;

pub use crate::error::ImageError;
pub use crate::grid::{DepthGrid, Grid, ImageSize, IntensityGrid};
