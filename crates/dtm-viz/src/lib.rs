#![deny(missing_docs)]
//! # DTM Viz
//!
//! Rendering of elevation grids as colormapped figures with a colour bar.

/// Colormaps and value normalization.
pub mod colormap;

/// Drawing primitives on RGB images.
pub mod draw;

/// Error types for the viz module.
pub mod error;

/// Heightmap figures.
pub mod figure;

mod font;

pub use crate::error::VizError;
pub use crate::figure::{render_heightmap, FigureConfig, Heightmap, PlotArea};
