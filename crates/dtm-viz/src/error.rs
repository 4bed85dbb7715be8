/// An error type for the viz module.
#[derive(thiserror::Error, Debug)]
pub enum VizError {
    /// The figure is too small to hold the plot and the colour bar.
    #[error("Invalid figure size {width}x{height}, the minimum is {min_width}x{min_height}")]
    InvalidFigureSize {
        /// Requested width.
        width: u32,
        /// Requested height.
        height: u32,
        /// Smallest supported width.
        min_width: u32,
        /// Smallest supported height.
        min_height: u32,
    },

    /// Error encoding or writing the figure.
    #[error("Failed to encode the figure. {0}")]
    Encode(#[from] image::ImageError),

    /// Error writing the figure to disk.
    #[error("Failed to write the figure. {0}")]
    Io(#[from] std::io::Error),
}
