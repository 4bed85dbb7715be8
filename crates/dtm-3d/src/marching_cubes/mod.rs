use std::collections::HashMap;

use crate::error::Geometry3dError;

mod tables;

use tables::{EDGE_TABLE, TRIANGLE_TABLE};

// corner offsets of a cell, counter clockwise at z and then at z + 1
const CORNERS: [[usize; 3]; 8] = [
    [0, 0, 0],
    [1, 0, 0],
    [1, 1, 0],
    [0, 1, 0],
    [0, 0, 1],
    [1, 0, 1],
    [1, 1, 1],
    [0, 1, 1],
];

// the pair of corners joined by each cell edge
const EDGES: [[usize; 2]; 12] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [3, 0],
    [4, 5],
    [5, 6],
    [6, 7],
    [7, 4],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
];

/// A triangulated iso-surface in grid coordinates.
///
/// A vertex `[x, y, z]` is a continuous position where integer coordinates
/// are grid nodes. Vertices are shared between the triangles that cut the
/// same grid edge.
#[derive(Debug, Clone, Default)]
pub struct IsoSurface {
    /// The vertices in grid coordinates.
    pub vertices: Vec<[f64; 3]>,
    /// The triangles as indices into `vertices`.
    pub triangles: Vec<[usize; 3]>,
}

/// Extract the iso-surface of a dense scalar field.
///
/// The field is sampled at the nodes of a `dims[0] x dims[1] x dims[2]` grid
/// and stored with x varying fastest, so node `(x, y, z)` lives at
/// `x + dims[0] * (y + dims[1] * z)`. The triangles are wound so that their
/// normals point towards increasing field values.
///
/// # Arguments
///
/// * `values` - The field values.
/// * `dims` - The number of nodes along each axis.
/// * `iso` - The iso-value of the surface.
///
/// # Returns
///
/// The extracted surface. It is empty if the field never crosses `iso`.
///
/// # Errors
///
/// [`Geometry3dError::InvalidParameter`] if `values` does not match `dims`.
pub fn marching_cubes(
    values: &[f64],
    dims: [usize; 3],
    iso: f64,
) -> Result<IsoSurface, Geometry3dError> {
    let [nx, ny, nz] = dims;
    if values.len() != nx * ny * nz {
        return Err(Geometry3dError::InvalidParameter(format!(
            "expected {} field values, got {}",
            nx * ny * nz,
            values.len()
        )));
    }

    let mut surface = IsoSurface::default();
    if nx < 2 || ny < 2 || nz < 2 {
        return Ok(surface);
    }

    let node = |x: usize, y: usize, z: usize| x + nx * (y + ny * z);

    // grid edge (lower node, axis) -> vertex index
    let mut edge_vertices: HashMap<(usize, usize), usize> = HashMap::new();

    for z in 0..nz - 1 {
        for y in 0..ny - 1 {
            for x in 0..nx - 1 {
                let corners = CORNERS.map(|[dx, dy, dz]| [x + dx, y + dy, z + dz]);
                let corner_values = corners.map(|[cx, cy, cz]| values[node(cx, cy, cz)]);

                let mut cube_index = 0usize;
                for (bit, v) in corner_values.iter().enumerate() {
                    if *v < iso {
                        cube_index |= 1 << bit;
                    }
                }

                let edge_mask = EDGE_TABLE[cube_index];
                if edge_mask == 0 {
                    continue;
                }

                let mut cell_vertices = [usize::MAX; 12];
                for (e, [a, b]) in EDGES.iter().enumerate() {
                    if edge_mask & (1 << e) == 0 {
                        continue;
                    }

                    let (pa, pb) = (corners[*a], corners[*b]);
                    let lower = if node(pa[0], pa[1], pa[2]) < node(pb[0], pb[1], pb[2]) {
                        pa
                    } else {
                        pb
                    };
                    let axis = (0..3).find(|&i| pa[i] != pb[i]).unwrap_or(0);
                    let key = (node(lower[0], lower[1], lower[2]), axis);

                    let next_index = surface.vertices.len();
                    let index = *edge_vertices.entry(key).or_insert_with(|| {
                        surface.vertices.push(interpolate(
                            &pa,
                            &pb,
                            corner_values[*a],
                            corner_values[*b],
                            iso,
                        ));
                        next_index
                    });
                    cell_vertices[e] = index;
                }

                for tri in TRIANGLE_TABLE[cube_index].chunks_exact(3) {
                    if tri[0] < 0 {
                        break;
                    }
                    let [i0, i1, i2] = [tri[0], tri[1], tri[2]].map(|e| cell_vertices[e as usize]);
                    // the table winds towards the low side of the field
                    surface.triangles.push([i0, i2, i1]);
                }
            }
        }
    }

    log::debug!(
        "Extracted iso-surface with {} vertices and {} triangles",
        surface.vertices.len(),
        surface.triangles.len()
    );

    Ok(surface)
}

fn interpolate(pa: &[usize; 3], pb: &[usize; 3], va: f64, vb: f64, iso: f64) -> [f64; 3] {
    let denom = vb - va;
    let t = if denom.abs() < 1e-12 {
        0.5
    } else {
        ((iso - va) / denom).clamp(0.0, 1.0)
    };
    [
        pa[0] as f64 + t * (pb[0] as f64 - pa[0] as f64),
        pa[1] as f64 + t * (pb[1] as f64 - pa[1] as f64),
        pa[2] as f64 + t * (pb[2] as f64 - pa[2] as f64),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg;
    use approx::assert_relative_eq;

    fn field(dims: [usize; 3], f: impl Fn(f64, f64, f64) -> f64) -> Vec<f64> {
        let mut values = Vec::with_capacity(dims[0] * dims[1] * dims[2]);
        for z in 0..dims[2] {
            for y in 0..dims[1] {
                for x in 0..dims[0] {
                    values.push(f(x as f64, y as f64, z as f64));
                }
            }
        }
        values
    }

    #[test]
    fn test_marching_cubes_plane() -> Result<(), Geometry3dError> {
        let dims = [4, 4, 5];
        let values = field(dims, |_, _, z| z - 2.3);
        let surface = marching_cubes(&values, dims, 0.0)?;

        // one shared vertex per vertical grid edge, two triangles per cell
        assert_eq!(surface.vertices.len(), 16);
        assert_eq!(surface.triangles.len(), 18);
        for v in &surface.vertices {
            assert_relative_eq!(v[2], 2.3, epsilon = 1e-12);
        }

        for t in &surface.triangles {
            let [a, b, c] = t.map(|i| surface.vertices[i]);
            let n = linalg::triangle_normal(&a, &b, &c);
            assert!(n[2] > 0.0);
        }
        Ok(())
    }

    #[test]
    fn test_marching_cubes_sphere() -> Result<(), Geometry3dError> {
        let dims = [20, 20, 20];
        let center = [9.5, 9.5, 9.5];
        let values = field(dims, |x, y, z| {
            linalg::norm3(&linalg::sub_vec3(&[x, y, z], &center))
        });
        let surface = marching_cubes(&values, dims, 6.0)?;
        assert!(!surface.triangles.is_empty());

        for v in &surface.vertices {
            let r = linalg::norm3(&linalg::sub_vec3(v, &center));
            assert!((r - 6.0).abs() < 0.2, "radius {r}");
        }

        // normals point outwards, towards larger distances
        let mut outward_count = 0;
        for t in &surface.triangles {
            let [a, b, c] = t.map(|i| surface.vertices[i]);
            let n = linalg::triangle_normal(&a, &b, &c);
            let centroid = [
                (a[0] + b[0] + c[0]) / 3.0,
                (a[1] + b[1] + c[1]) / 3.0,
                (a[2] + b[2] + c[2]) / 3.0,
            ];
            let outward = linalg::sub_vec3(&centroid, &center);
            if linalg::dot_product3(&n, &outward) > 0.0 {
                outward_count += 1;
            }
        }
        assert!(outward_count * 100 >= surface.triangles.len() * 99);
        Ok(())
    }

    #[test]
    fn test_marching_cubes_no_crossing() -> Result<(), Geometry3dError> {
        let dims = [3, 3, 3];
        let surface = marching_cubes(&vec![1.0; 27], dims, 0.5)?;
        assert!(surface.vertices.is_empty());
        assert!(surface.triangles.is_empty());
        Ok(())
    }

    #[test]
    fn test_marching_cubes_bad_length() {
        let res = marching_cubes(&[0.0; 7], [2, 2, 2], 0.5);
        assert!(matches!(res, Err(Geometry3dError::InvalidParameter(_))));
    }
}
