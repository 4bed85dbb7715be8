use glam::DVec3;

/// A point cloud with points, colors, and normals.
///
/// Colors are stored as floating point RGB in `[0, 1]`. Colors and normals,
/// when present, correspond positionally to the points.
#[derive(Debug, Clone, Default)]
pub struct PointCloud {
    // The points in the point cloud.
    points: Vec<[f64; 3]>,
    // The colors of the points.
    colors: Option<Vec<[f64; 3]>>,
    // The normals of the points.
    normals: Option<Vec<[f64; 3]>>,
}

impl PointCloud {
    /// Create a new point cloud from points, colors (optional), and normals (optional).
    pub fn new(
        points: Vec<[f64; 3]>,
        colors: Option<Vec<[f64; 3]>>,
        normals: Option<Vec<[f64; 3]>>,
    ) -> Self {
        Self {
            points,
            colors,
            normals,
        }
    }

    /// Get the number of points in the point cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Get as reference the points in the point cloud.
    pub fn points(&self) -> &[[f64; 3]] {
        &self.points
    }

    /// Get as reference the colors of the points in the point cloud.
    pub fn colors(&self) -> Option<&[[f64; 3]]> {
        self.colors.as_deref()
    }

    /// Get as reference the normals of the points in the point cloud.
    pub fn normals(&self) -> Option<&[[f64; 3]]> {
        self.normals.as_deref()
    }

    /// Get as mutable reference the normals of the points in the point cloud.
    pub fn normals_mut(&mut self) -> Option<&mut [[f64; 3]]> {
        self.normals.as_deref_mut()
    }

    /// Replace the normals of the point cloud.
    ///
    /// PRECONDITION: `normals.len() == self.len()`.
    pub fn set_normals(&mut self, normals: Vec<[f64; 3]>) {
        debug_assert_eq!(normals.len(), self.points.len());
        self.normals = Some(normals);
    }

    /// Check if the point cloud has normals.
    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    /// Get the minimum bound of the point cloud.
    pub fn get_min_bound(&self) -> DVec3 {
        self.points
            .iter()
            .map(|p| DVec3::from_array(*p))
            .reduce(DVec3::min)
            .unwrap_or(DVec3::ZERO)
    }

    /// Get the maximum bound of the point cloud.
    pub fn get_max_bound(&self) -> DVec3 {
        self.points
            .iter()
            .map(|p| DVec3::from_array(*p))
            .reduce(DVec3::max)
            .unwrap_or(DVec3::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointcloud() {
        let pointcloud = PointCloud::new(
            vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            Some(vec![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]),
            Some(vec![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0]]),
        );

        assert_eq!(pointcloud.len(), 2);
        assert_eq!(pointcloud.points().len(), 2);
        assert!(pointcloud.has_normals());

        if let Some(colors) = pointcloud.colors() {
            assert_eq!(colors.len(), 2);
        }
        if let Some(normals) = pointcloud.normals() {
            assert_eq!(normals.len(), 2);
        }

        if let Some(p1) = pointcloud.points().last() {
            assert_eq!(p1, &[1.0, 0.0, 0.0]);
        }
    }

    #[test]
    fn test_pointcloud_bounds() {
        let pointcloud = PointCloud::new(
            vec![[0.0, 5.0, -1.0], [2.0, -3.0, 4.0], [1.0, 1.0, 1.0]],
            None,
            None,
        );
        assert_eq!(pointcloud.get_min_bound(), DVec3::new(0.0, -3.0, -1.0));
        assert_eq!(pointcloud.get_max_bound(), DVec3::new(2.0, 5.0, 4.0));
        assert!(!pointcloud.has_normals());
    }

    #[test]
    fn test_pointcloud_empty_bounds() {
        let pointcloud = PointCloud::default();
        assert!(pointcloud.is_empty());
        assert_eq!(pointcloud.get_min_bound(), DVec3::ZERO);
        assert_eq!(pointcloud.get_max_bound(), DVec3::ZERO);
    }
}
