use serde::{Deserialize, Serialize};

use crate::error::ImageError;

/// Grid size in pixels
///
/// A struct to represent the size of an image or grid in pixels.
///
/// # Examples
///
/// ```
/// use dtm_image::ImageSize;
///
/// let size = ImageSize {
///   width: 10,
///   height: 20,
/// };
///
/// assert_eq!(size.width, 10);
/// assert_eq!(size.height, 20);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    /// Width of the grid in pixels
    pub width: usize,
    /// Height of the grid in pixels
    pub height: usize,
}

impl ImageSize {
    /// The number of cells in a grid of this size.
    #[inline]
    pub fn area(&self) -> usize {
        self.width * self.height
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        ImageSize {
            width: 512,
            height: 512,
        }
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<[usize; 2]> for ImageSize {
    fn from(size: [usize; 2]) -> Self {
        ImageSize {
            width: size[0],
            height: size[1],
        }
    }
}

impl From<ImageSize> for [u32; 2] {
    fn from(size: ImageSize) -> Self {
        [size.width as u32, size.height as u32]
    }
}

/// A single channel grid stored in row-major order.
///
/// The grid is used both for normalized image intensities and for elevation
/// values predicted by the depth network. Cell `(row, col)` lives at
/// `row * width + col` in the underlying buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct Grid<T> {
    size: ImageSize,
    data: Vec<T>,
}

/// Normalized image brightness in `[0, 1]`.
pub type IntensityGrid = Grid<f32>;

/// Elevation values, same size as the [`IntensityGrid`] they were predicted from.
pub type DepthGrid = Grid<f32>;

impl<T> Grid<T> {
    /// Create a new grid from row-major data.
    ///
    /// # Arguments
    ///
    /// * `size` - The size of the grid in pixels.
    /// * `data` - The cell values in row-major order.
    ///
    /// # Errors
    ///
    /// If the length of the data does not match the grid size, an error is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use dtm_image::{Grid, ImageSize};
    ///
    /// let grid = Grid::new(ImageSize { width: 2, height: 3 }, vec![0u8; 6]).unwrap();
    /// assert_eq!(grid.width(), 2);
    /// assert_eq!(grid.height(), 3);
    /// ```
    pub fn new(size: ImageSize, data: Vec<T>) -> Result<Self, ImageError> {
        if data.len() != size.area() {
            return Err(ImageError::InvalidShape(data.len(), size.area()));
        }
        Ok(Self { size, data })
    }

    /// Create a new grid filled with the result of `f(row, col)`.
    pub fn from_fn(size: ImageSize, mut f: impl FnMut(usize, usize) -> T) -> Self {
        let mut data = Vec::with_capacity(size.area());
        for row in 0..size.height {
            for col in 0..size.width {
                data.push(f(row, col));
            }
        }
        Self { size, data }
    }

    /// The size of the grid.
    #[inline]
    pub fn size(&self) -> ImageSize {
        self.size
    }

    /// The number of columns.
    #[inline]
    pub fn width(&self) -> usize {
        self.size.width
    }

    /// The number of rows.
    #[inline]
    pub fn height(&self) -> usize {
        self.size.height
    }

    /// The number of cells.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the grid has no cells.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The cells in row-major order.
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Consume the grid and return the row-major buffer.
    pub fn into_vec(self) -> Vec<T> {
        self.data
    }

    /// Get a reference to the cell at `(row, col)`.
    pub fn get(&self, row: usize, col: usize) -> Option<&T> {
        if row >= self.size.height || col >= self.size.width {
            return None;
        }
        self.data.get(row * self.size.width + col)
    }

    /// Iterate over the rows of the grid.
    pub fn rows(&self) -> std::slice::ChunksExact<'_, T> {
        self.data.chunks_exact(self.size.width.max(1))
    }

    /// Check the grid against an expected size.
    ///
    /// # Errors
    ///
    /// Returns [`ImageError::ShapeMismatch`] when the sizes differ.
    pub fn ensure_size(&self, expected: ImageSize) -> Result<(), ImageError> {
        if self.size != expected {
            return Err(ImageError::ShapeMismatch {
                expected,
                actual: self.size,
            });
        }
        Ok(())
    }
}

impl<T: Clone> Grid<T> {
    /// Create a new grid with every cell set to `val`.
    pub fn from_size_val(size: ImageSize, val: T) -> Self {
        Self {
            size,
            data: vec![val; size.area()],
        }
    }
}

impl Grid<f32> {
    /// The smallest and the largest value of the grid, ignoring NaNs.
    ///
    /// Returns `None` for an empty grid or a grid containing only NaNs.
    pub fn min_max(&self) -> Option<(f32, f32)> {
        self.data
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .fold(None, |acc, v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    }

    /// The largest value of the grid, ignoring NaNs.
    pub fn max_value(&self) -> Option<f32> {
        self.min_max().map(|(_, hi)| hi)
    }

    /// Flip the grid so that each cell becomes `max - value`.
    ///
    /// The network predicts depth below the camera; inverting it against its
    /// own maximum turns it into an elevation where higher means taller. The
    /// result is always non-negative with a minimum of zero.
    pub fn invert_from_max(&self) -> Grid<f32> {
        let max = self.max_value().unwrap_or(0.0);
        Grid {
            size: self.size,
            data: self.data.iter().map(|v| max - v).collect(),
        }
    }
}
