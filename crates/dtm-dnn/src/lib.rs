#![deny(missing_docs)]
//! # DTM DNN
//!
//! This module contains the depth estimation network and the predictor that
//! turns an intensity grid into an elevation grid.

/// Loading of trained weights.
pub mod checkpoint;

/// Error type for the dnn module.
pub mod error;

/// The GLPDepth network.
pub mod glpdepth;

/// Depth predictors.
pub mod predictor;

pub use crate::error::DnnError;
pub use crate::predictor::{DepthPredictor, GlpDepthPredictor, GlpDepthPredictorBuilder};
