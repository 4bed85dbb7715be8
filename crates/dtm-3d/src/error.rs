use dtm_image::ImageSize;

/// An error type for the 3d module.
#[derive(thiserror::Error, Debug)]
pub enum Geometry3dError {
    /// Error when the input grids do not have the expected size.
    #[error("Expected grids of {expected} but got {actual}")]
    ShapeMismatch {
        /// The size required by the caller.
        expected: ImageSize,
        /// The size that was provided.
        actual: ImageSize,
    },

    /// Error when a depth cell is NaN or infinite.
    #[error("Depth value at row {row}, column {col} is not finite")]
    NonFiniteDepth {
        /// Row of the offending cell.
        row: usize,
        /// Column of the offending cell.
        col: usize,
    },

    /// Error when an operation needs normals and the point cloud has none.
    #[error("The point cloud has no normals")]
    MissingNormals,

    /// Error when a parameter is out of its valid range.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Error to build the solver thread pool.
    #[error("Failed to build the thread pool. {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}
