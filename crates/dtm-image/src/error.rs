use crate::grid::ImageSize;

/// An error type for the image module.
#[derive(thiserror::Error, Debug)]
pub enum ImageError {
    /// Error when the file does not exist.
    #[error("File does not exist: {0}")]
    FileDoesNotExist(std::path::PathBuf),

    /// Error to read the file.
    #[error("Failed to manipulate the file. {0}")]
    Io(#[from] std::io::Error),

    /// Error to decode the image.
    #[error("Failed to decode the image. {0}")]
    Decode(#[from] image::ImageError),

    /// Error when the data length does not match the grid size.
    #[error("Data length ({0}) does not match the grid size ({1})")]
    InvalidShape(usize, usize),

    /// Error when an image or grid does not have the expected size.
    #[error("Expected a grid of {expected} but got {actual}")]
    ShapeMismatch {
        /// The size required by the caller.
        expected: ImageSize,
        /// The size that was provided.
        actual: ImageSize,
    },
}
