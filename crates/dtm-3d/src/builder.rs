use dtm_image::{DepthGrid, ImageSize, IntensityGrid};

use crate::{error::Geometry3dError, pointcloud::PointCloud};

/// Build a colored point cloud from an elevation grid and the image it was predicted from.
///
/// Each cell `(i, j)` becomes the point `(|j - mirror_width|, i, depth[i][j])`
/// colored with the gray value `intensity[i][j]`. Points are emitted in
/// row-major order so the output always has `height * width` entries.
///
/// # Arguments
///
/// * `depth` - The elevation grid, higher values are higher terrain.
/// * `intensity` - The normalized intensity grid of the same size.
/// * `mirror_width` - The column the x axis is mirrored around.
///
/// # Returns
///
/// A point cloud with points and colors, without normals.
///
/// # Errors
///
/// * [`Geometry3dError::ShapeMismatch`] if the grids have different sizes.
/// * [`Geometry3dError::NonFiniteDepth`] if a depth cell is NaN or infinite.
///
/// Example:
///
/// ```
/// use dtm_3d::builder::build_point_cloud;
/// use dtm_image::Grid;
///
/// let depth = Grid::from_size_val([2, 2].into(), 1.0f32);
/// let intensity = Grid::from_size_val([2, 2].into(), 0.5f32);
/// let cloud = build_point_cloud(&depth, &intensity, 2).unwrap();
/// assert_eq!(cloud.len(), 4);
/// assert_eq!(cloud.points()[0], [2.0, 0.0, 1.0]);
/// ```
pub fn build_point_cloud(
    depth: &DepthGrid,
    intensity: &IntensityGrid,
    mirror_width: usize,
) -> Result<PointCloud, Geometry3dError> {
    if depth.size() != intensity.size() {
        return Err(Geometry3dError::ShapeMismatch {
            expected: depth.size(),
            actual: intensity.size(),
        });
    }

    let ImageSize { width, height } = depth.size();
    let mut points = Vec::with_capacity(width * height);
    let mut colors = Vec::with_capacity(width * height);

    let rows = depth.rows().zip(intensity.rows());
    for (i, (depth_row, intensity_row)) in rows.enumerate() {
        for (j, (&z, &v)) in depth_row.iter().zip(intensity_row.iter()).enumerate() {
            if !z.is_finite() {
                return Err(Geometry3dError::NonFiniteDepth { row: i, col: j });
            }
            let x = (j as f64 - mirror_width as f64).abs();
            points.push([x, i as f64, z as f64]);
            colors.push([v as f64; 3]);
        }
    }

    log::debug!("Built point cloud with {} points", points.len());

    Ok(PointCloud::new(points, Some(colors), None))
}

/// Same as [`build_point_cloud`] but also checks the grids against a required size.
///
/// # Errors
///
/// [`Geometry3dError::ShapeMismatch`] if either grid differs from `expected`.
pub fn build_point_cloud_checked(
    depth: &DepthGrid,
    intensity: &IntensityGrid,
    expected: ImageSize,
    mirror_width: usize,
) -> Result<PointCloud, Geometry3dError> {
    for actual in [depth.size(), intensity.size()] {
        if actual != expected {
            return Err(Geometry3dError::ShapeMismatch { expected, actual });
        }
    }
    build_point_cloud(depth, intensity, mirror_width)
}
