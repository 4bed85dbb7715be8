use serde::{Deserialize, Serialize};

use crate::{
    error::Geometry3dError,
    mesh::TriangleMesh,
    normals::{estimate_normals, orient_normals_to_align_with_direction, NormalParams},
    pointcloud::PointCloud,
    poisson::{poisson_reconstruction, PoissonParams},
};

/// Trait for the geometry capabilities used to turn a point cloud into a clean mesh.
///
/// The reconstruction pipeline only talks to this trait so the order of the
/// steps and their parameters can be checked with a substitute backend.
pub trait GeometryBackend: Send + Sync {
    /// Estimate oriented normals for every point of the cloud.
    ///
    /// # Arguments
    /// - `pointcloud` – The point cloud, its normals are replaced.
    /// - `direction` – Every normal ends up with a non-negative dot product with it.
    fn estimate_normals(
        &self,
        pointcloud: &mut PointCloud,
        direction: &[f64; 3],
    ) -> Result<(), Geometry3dError>;

    /// Reconstruct a surface from an oriented point cloud.
    ///
    /// Returns the mesh and a per-vertex density.
    fn reconstruct_surface(
        &self,
        pointcloud: PointCloud,
    ) -> Result<(TriangleMesh, Vec<f64>), Geometry3dError>;

    /// Run the mesh hygiene steps on a mesh.
    fn clean(&self, mesh: &mut TriangleMesh);
}

/// The default backend: k-nearest neighbour normals and Poisson reconstruction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoissonBackend {
    /// Parameters for normal estimation.
    pub normals: NormalParams,
    /// Parameters for the surface reconstruction.
    pub poisson: PoissonParams,
}

impl PoissonBackend {
    /// Create a new backend from normal estimation and reconstruction parameters.
    pub fn new(normals: NormalParams, poisson: PoissonParams) -> Self {
        Self { normals, poisson }
    }
}

impl GeometryBackend for PoissonBackend {
    fn estimate_normals(
        &self,
        pointcloud: &mut PointCloud,
        direction: &[f64; 3],
    ) -> Result<(), Geometry3dError> {
        estimate_normals(pointcloud, &self.normals)?;
        orient_normals_to_align_with_direction(pointcloud, direction)
    }

    fn reconstruct_surface(
        &self,
        pointcloud: PointCloud,
    ) -> Result<(TriangleMesh, Vec<f64>), Geometry3dError> {
        poisson_reconstruction(pointcloud, &self.poisson)
    }

    fn clean(&self, mesh: &mut TriangleMesh) {
        mesh.clean();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg;

    #[test]
    fn test_poisson_backend_roundtrip() -> Result<(), Geometry3dError> {
        let mut points = Vec::new();
        for i in 0..16 {
            for j in 0..16 {
                points.push([j as f64, i as f64, 3.0 + 0.1 * (i + j) as f64]);
            }
        }
        let mut cloud = PointCloud::new(points, Some(vec![[0.5; 3]; 256]), None);

        let backend = PoissonBackend::new(
            NormalParams::default(),
            PoissonParams {
                depth: 4,
                ..Default::default()
            },
        );
        backend.estimate_normals(&mut cloud, &[0.0, 0.0, 1.0])?;
        let normals = cloud.normals().ok_or(Geometry3dError::MissingNormals)?;
        assert!(normals.iter().all(|n| n[2] > 0.0));
        assert!(normals
            .iter()
            .all(|n| (linalg::norm3(n) - 1.0).abs() < 1e-9));

        let (mut mesh, densities) = backend.reconstruct_surface(cloud)?;
        assert_eq!(densities.len(), mesh.num_vertices());
        assert!(mesh.num_triangles() > 0);

        backend.clean(&mut mesh);
        let cleaned = mesh.clone();
        backend.clean(&mut mesh);
        assert_eq!(mesh, cleaned);
        Ok(())
    }

    #[test]
    fn test_backend_serde_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let backend: PoissonBackend = serde_json::from_str(r#"{"poisson": {"depth": 5}}"#)?;
        assert_eq!(backend.normals.knn, 30);
        assert_eq!(backend.poisson.depth, 5);
        assert_eq!(backend.poisson.num_threads, 1);
        Ok(())
    }
}
