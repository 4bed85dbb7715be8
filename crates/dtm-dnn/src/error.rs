use std::path::PathBuf;

/// An error type for the dnn module.
#[derive(thiserror::Error, Debug)]
pub enum DnnError {
    /// The weights file does not exist.
    #[error("Weights file does not exist: {0}")]
    WeightsNotFound(PathBuf),

    /// A checkpoint key cannot be mapped to a parameter name.
    #[error("Invalid checkpoint key {0:?}")]
    InvalidCheckpointKey(String),

    /// The network returned a tensor of an unexpected shape.
    #[error("Expected a depth map of {expected_rows}x{expected_cols}, got shape {actual:?}")]
    OutputShape {
        /// Expected number of rows.
        expected_rows: usize,
        /// Expected number of columns.
        expected_cols: usize,
        /// The dimensions of the returned tensor.
        actual: Vec<usize>,
    },

    /// Tensor error.
    #[error("Tensor error")]
    Candle(#[from] candle_core::Error),

    /// Image error.
    #[error("Image error")]
    Image(#[from] dtm_image::ImageError),
}
