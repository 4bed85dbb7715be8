use std::num::NonZeroUsize;

use kiddo::immutable::float::kdtree::ImmutableKdTree;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{error::Geometry3dError, linalg, pointcloud::PointCloud};

/// Parameters for normal estimation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalParams {
    /// The number of nearest neighbours, the query point included, used to fit a plane.
    pub knn: usize,
}

impl Default for NormalParams {
    fn default() -> Self {
        Self { knn: 30 }
    }
}

/// Estimate a unit normal for every point of the cloud.
///
/// The normal of a point is the direction of least variance of its `knn`
/// nearest neighbours. Neighbourhoods with fewer than three points or with no
/// well defined plane get a zero normal. The sign of each normal is arbitrary,
/// use [`orient_normals_to_align_with_direction`] to make it consistent.
///
/// # Arguments
///
/// * `pointcloud` - The point cloud, its normals are replaced.
/// * `params` - The neighbourhood size.
///
/// # Errors
///
/// [`Geometry3dError::InvalidParameter`] if `knn` is zero.
pub fn estimate_normals(
    pointcloud: &mut PointCloud,
    params: &NormalParams,
) -> Result<(), Geometry3dError> {
    let knn = NonZeroUsize::new(params.knn)
        .ok_or_else(|| Geometry3dError::InvalidParameter("knn must be positive".into()))?;

    if pointcloud.is_empty() {
        pointcloud.set_normals(Vec::new());
        return Ok(());
    }

    let points = pointcloud.points();
    let kdtree: ImmutableKdTree<f64, u32, 3, 32> = ImmutableKdTree::new_from_slice(points);

    let normals = points
        .par_iter()
        .map(|p| {
            let neighbours = kdtree
                .nearest_n::<kiddo::SquaredEuclidean>(p, knn)
                .iter()
                .map(|nn| points[nn.item as usize])
                .collect::<Vec<_>>();

            if neighbours.len() < 3 {
                return [0.0; 3];
            }

            linalg::smallest_eigenvector3(&linalg::covariance3(&neighbours))
        })
        .collect::<Vec<_>>();

    log::debug!(
        "Estimated {} normals from {} neighbours each",
        normals.len(),
        params.knn
    );

    pointcloud.set_normals(normals);

    Ok(())
}

/// Flip every normal pointing away from a reference direction.
///
/// After the call `dot(normal, direction) >= 0` holds for every normal.
/// Zero normals are left untouched.
///
/// # Errors
///
/// [`Geometry3dError::MissingNormals`] if the cloud has no normals.
pub fn orient_normals_to_align_with_direction(
    pointcloud: &mut PointCloud,
    direction: &[f64; 3],
) -> Result<(), Geometry3dError> {
    let normals = pointcloud
        .normals_mut()
        .ok_or(Geometry3dError::MissingNormals)?;

    let mut flipped = 0;
    for n in normals.iter_mut() {
        if linalg::dot_product3(n, direction) < 0.0 {
            *n = [-n[0], -n[1], -n[2]];
            flipped += 1;
        }
    }

    log::debug!("Flipped {flipped} normals");

    Ok(())
}
