use kiddo::immutable::float::kdtree::ImmutableKdTree;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    error::Geometry3dError, linalg, marching_cubes::marching_cubes, mesh::TriangleMesh,
    pointcloud::PointCloud,
};

// the coarsest level of the cascadic solve
const MIN_DEPTH: usize = 2;

/// Parameters for Poisson surface reconstruction.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoissonParams {
    /// The finest grid has `2^depth` cells per axis.
    pub depth: usize,
    /// The ratio between the side of the reconstruction cube and the largest extent of the cloud.
    pub scale: f64,
    /// The number of threads of the solver, `1` makes the solve deterministic.
    pub num_threads: usize,
    /// The maximum number of conjugate gradient iterations per level.
    pub max_iterations: usize,
    /// The relative residual at which the conjugate gradient stops.
    pub tolerance: f64,
}

impl Default for PoissonParams {
    fn default() -> Self {
        Self {
            depth: 7,
            scale: 1.1,
            num_threads: 1,
            max_iterations: 200,
            tolerance: 1e-6,
        }
    }
}

impl PoissonParams {
    fn validate(&self) -> Result<(), Geometry3dError> {
        if !(1..=10).contains(&self.depth) {
            return Err(Geometry3dError::InvalidParameter(format!(
                "depth must be in [1, 10], got {}",
                self.depth
            )));
        }
        if !self.scale.is_finite() || self.scale < 1.0 {
            return Err(Geometry3dError::InvalidParameter(format!(
                "scale must be at least 1.0, got {}",
                self.scale
            )));
        }
        if self.num_threads == 0 {
            return Err(Geometry3dError::InvalidParameter(
                "num_threads must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

// A cube of (res + 1)^3 nodes covering the reconstruction domain.
#[derive(Debug, Clone, Copy)]
struct Lattice {
    res: usize,
    origin: [f64; 3],
    spacing: f64,
}

impl Lattice {
    fn nodes_per_axis(&self) -> usize {
        self.res + 1
    }

    fn num_nodes(&self) -> usize {
        self.nodes_per_axis().pow(3)
    }

    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        let n = self.nodes_per_axis();
        x + n * (y + n * z)
    }

    fn to_grid(&self, p: &[f64; 3]) -> [f64; 3] {
        std::array::from_fn(|i| (p[i] - self.origin[i]) / self.spacing)
    }

    fn to_world(&self, g: &[f64; 3]) -> [f64; 3] {
        std::array::from_fn(|i| self.origin[i] + g[i] * self.spacing)
    }

    // the nodes of the cell containing `g` and their trilinear weights
    fn stencil(&self, g: &[f64; 3]) -> [(usize, f64); 8] {
        let max = self.res as f64;
        let g = g.map(|v| v.clamp(0.0, max));
        let base = g.map(|v| (v.floor() as usize).min(self.res - 1));
        let frac: [f64; 3] = std::array::from_fn(|i| g[i] - base[i] as f64);

        std::array::from_fn(|k| {
            let (dx, dy, dz) = (k & 1, (k >> 1) & 1, (k >> 2) & 1);
            let w = (if dx == 1 { frac[0] } else { 1.0 - frac[0] })
                * (if dy == 1 { frac[1] } else { 1.0 - frac[1] })
                * (if dz == 1 { frac[2] } else { 1.0 - frac[2] });
            (self.index(base[0] + dx, base[1] + dy, base[2] + dz), w)
        })
    }

    fn sample(&self, field: &[f64], g: &[f64; 3]) -> f64 {
        self.stencil(g).iter().map(|&(i, w)| w * field[i]).sum()
    }
}

/// Reconstruct a surface from an oriented point cloud.
///
/// The oriented normals are splatted into a vector field whose divergence
/// drives a Poisson equation for an indicator function. The equation is solved
/// on a dense grid with conjugate gradients, from a coarse grid up to
/// `2^depth` cells per axis, and the surface is extracted at the mean value
/// of the indicator at the input points.
///
/// # Arguments
///
/// * `pointcloud` - The points with oriented normals, and optionally colors.
/// * `params` - The reconstruction parameters.
///
/// # Returns
///
/// The mesh and, for each vertex, the local sampling density of the input.
/// Vertices far from the input get a density close to zero. An empty mesh is
/// returned when the input is empty or has only zero normals.
///
/// # Errors
///
/// * [`Geometry3dError::MissingNormals`] if the cloud has no normals.
/// * [`Geometry3dError::InvalidParameter`] if the parameters are out of range.
/// * [`Geometry3dError::ThreadPool`] if the solver threads cannot be created.
pub fn poisson_reconstruction(
    pointcloud: PointCloud,
    params: &PoissonParams,
) -> Result<(TriangleMesh, Vec<f64>), Geometry3dError> {
    params.validate()?;

    let normals = pointcloud.normals().ok_or(Geometry3dError::MissingNormals)?;
    let points = pointcloud.points();

    if points.is_empty() || normals.iter().all(|n| linalg::norm3(n) == 0.0) {
        log::warn!("Nothing to reconstruct, returning an empty mesh");
        return Ok((TriangleMesh::default(), Vec::new()));
    }

    let (min, max) = (pointcloud.get_min_bound(), pointcloud.get_max_bound());
    let extent = (max - min).max_element();
    if extent <= 0.0 {
        log::warn!("The point cloud has no extent, returning an empty mesh");
        return Ok((TriangleMesh::default(), Vec::new()));
    }

    let side = extent * params.scale;
    let center = (min + max) * 0.5;
    let origin = [
        center.x - 0.5 * side,
        center.y - 0.5 * side,
        center.z - 0.5 * side,
    ];

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(params.num_threads)
        .build()?;

    let (lattice, chi) = pool.install(|| {
        let mut solution: Option<(Lattice, Vec<f64>)> = None;
        for depth in MIN_DEPTH.min(params.depth)..=params.depth {
            let res = 1usize << depth;
            let lattice = Lattice {
                res,
                origin,
                spacing: side / res as f64,
            };
            let rhs = divergence_rhs(&lattice, points, normals);
            let guess = match &solution {
                Some((coarse, chi)) => prolongate(coarse, chi, &lattice),
                None => vec![0.0; lattice.num_nodes()],
            };
            let (chi, iterations) =
                conjugate_gradient(&lattice, &rhs, guess, params.max_iterations, params.tolerance);
            log::debug!("Poisson level {depth} converged in {iterations} iterations");
            solution = Some((lattice, chi));
        }
        solution
    })
    .ok_or_else(|| Geometry3dError::InvalidParameter("no level was solved".to_string()))?;

    // the surface passes through the samples on average
    let iso = points
        .iter()
        .map(|p| lattice.sample(&chi, &lattice.to_grid(p)))
        .sum::<f64>()
        / points.len() as f64;

    let n = lattice.nodes_per_axis();
    let surface = marching_cubes(&chi, [n, n, n], iso)?;

    let (weights, color_sums) = splat_samples(&lattice, points, pointcloud.colors());

    let densities = surface
        .vertices
        .iter()
        .map(|g| lattice.sample(&weights, g))
        .collect::<Vec<_>>();

    let vertex_colors = match pointcloud.colors() {
        Some(colors) => interpolate_colors(&lattice, &surface.vertices, &weights, &color_sums, points, colors),
        None => Vec::new(),
    };

    let vertices = surface
        .vertices
        .iter()
        .map(|g| lattice.to_world(g))
        .collect::<Vec<_>>();

    log::info!(
        "Poisson reconstruction produced {} vertices and {} triangles",
        vertices.len(),
        surface.triangles.len()
    );

    let mesh = TriangleMesh::new(vertices, surface.triangles).with_vertex_colors(vertex_colors);

    Ok((mesh, densities))
}

// -h^2 times the divergence of the splatted normal field, with zero mean
fn divergence_rhs(lattice: &Lattice, points: &[[f64; 3]], normals: &[[f64; 3]]) -> Vec<f64> {
    let num_nodes = lattice.num_nodes();
    let n = lattice.nodes_per_axis();
    let h = lattice.spacing;

    // normals per unit volume
    let inv_volume = 1.0 / (h * h * h);
    let mut field = [vec![0.0; num_nodes], vec![0.0; num_nodes], vec![0.0; num_nodes]];
    for (p, normal) in points.iter().zip(normals) {
        for (i, w) in lattice.stencil(&lattice.to_grid(p)) {
            for axis in 0..3 {
                field[axis][i] += w * normal[axis] * inv_volume;
            }
        }
    }

    let strides = [1, n, n * n];
    let mut rhs = (0..num_nodes)
        .into_par_iter()
        .map(|i| {
            let coords = [i % n, (i / n) % n, i / (n * n)];
            let mut div = 0.0;
            for axis in 0..3 {
                let c = coords[axis];
                let fwd = if c + 1 < n { field[axis][i + strides[axis]] } else { 0.0 };
                let bwd = if c > 0 { field[axis][i - strides[axis]] } else { 0.0 };
                div += (fwd - bwd) / (2.0 * h);
            }
            -h * h * div
        })
        .collect::<Vec<_>>();

    // the neumann problem is only solvable for a zero mean right hand side
    let mean = rhs.iter().sum::<f64>() / num_nodes as f64;
    rhs.iter_mut().for_each(|v| *v -= mean);

    rhs
}

// the negative graph laplacian of the lattice, symmetric positive semi-definite
fn apply_operator(lattice: &Lattice, x: &[f64], out: &mut [f64]) {
    let n = lattice.nodes_per_axis();
    out.par_chunks_mut(n * n).enumerate().for_each(|(z, plane)| {
        for y in 0..n {
            for xi in 0..n {
                let i = lattice.index(xi, y, z);
                let center = x[i];
                let mut acc = 0.0;
                if xi > 0 {
                    acc += center - x[i - 1];
                }
                if xi + 1 < n {
                    acc += center - x[i + 1];
                }
                if y > 0 {
                    acc += center - x[i - n];
                }
                if y + 1 < n {
                    acc += center - x[i + n];
                }
                if z > 0 {
                    acc += center - x[i - n * n];
                }
                if z + 1 < n {
                    acc += center - x[i + n * n];
                }
                plane[xi + n * y] = acc;
            }
        }
    });
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.par_iter().zip(b.par_iter()).map(|(x, y)| x * y).sum()
}

// x <- x + alpha * p, r <- r - alpha * q
fn axpy_pair(alpha: f64, p: &[f64], q: &[f64], x: &mut [f64], r: &mut [f64]) {
    x.par_iter_mut()
        .zip(r.par_iter_mut())
        .zip(p.par_iter().zip(q.par_iter()))
        .for_each(|((xi, ri), (pi, qi))| {
            *xi += alpha * pi;
            *ri -= alpha * qi;
        });
}

fn conjugate_gradient(
    lattice: &Lattice,
    rhs: &[f64],
    mut x: Vec<f64>,
    max_iterations: usize,
    tolerance: f64,
) -> (Vec<f64>, usize) {
    let num_nodes = rhs.len();
    let rhs_norm = dot(rhs, rhs).sqrt();
    if rhs_norm == 0.0 {
        return (vec![0.0; num_nodes], 0);
    }

    let mut q = vec![0.0; num_nodes];
    apply_operator(lattice, &x, &mut q);
    let mut r = rhs
        .par_iter()
        .zip(q.par_iter())
        .map(|(b, ax)| b - ax)
        .collect::<Vec<_>>();
    let mut p = r.clone();
    let mut rr = dot(&r, &r);

    let mut iterations = 0;
    while iterations < max_iterations && rr.sqrt() > tolerance * rhs_norm {
        apply_operator(lattice, &p, &mut q);
        let pq = dot(&p, &q);
        if pq <= 0.0 {
            break;
        }
        let alpha = rr / pq;
        axpy_pair(alpha, &p, &q, &mut x, &mut r);

        let rr_next = dot(&r, &r);
        let beta = rr_next / rr;
        p.par_iter_mut()
            .zip(r.par_iter())
            .for_each(|(pi, ri)| *pi = ri + beta * *pi);
        rr = rr_next;
        iterations += 1;
    }

    (x, iterations)
}

// trilinear interpolation of a coarse solution onto a finer lattice
fn prolongate(coarse: &Lattice, chi: &[f64], fine: &Lattice) -> Vec<f64> {
    let n = fine.nodes_per_axis();
    (0..fine.num_nodes())
        .into_par_iter()
        .map(|i| {
            let node = [i % n, (i / n) % n, i / (n * n)].map(|c| c as f64);
            let world = fine.to_world(&node);
            coarse.sample(chi, &coarse.to_grid(&world))
        })
        .collect()
}

// trilinear sample weights and weighted color sums per node
fn splat_samples(
    lattice: &Lattice,
    points: &[[f64; 3]],
    colors: Option<&[[f64; 3]]>,
) -> (Vec<f64>, Vec<[f64; 3]>) {
    let num_nodes = lattice.num_nodes();
    let mut weights = vec![0.0; num_nodes];
    let mut color_sums = match colors {
        Some(_) => vec![[0.0; 3]; num_nodes],
        None => Vec::new(),
    };

    for (k, p) in points.iter().enumerate() {
        for (i, w) in lattice.stencil(&lattice.to_grid(p)) {
            weights[i] += w;
            if let Some(colors) = colors {
                for c in 0..3 {
                    color_sums[i][c] += w * colors[k][c];
                }
            }
        }
    }

    (weights, color_sums)
}

// colors from the splatted samples, or from the closest point where there are none
fn interpolate_colors(
    lattice: &Lattice,
    vertices: &[[f64; 3]],
    weights: &[f64],
    color_sums: &[[f64; 3]],
    points: &[[f64; 3]],
    colors: &[[f64; 3]],
) -> Vec<[f64; 3]> {
    let kdtree: ImmutableKdTree<f64, u32, 3, 32> = ImmutableKdTree::new_from_slice(points);

    vertices
        .par_iter()
        .map(|g| {
            let mut weight = 0.0;
            let mut color = [0.0; 3];
            for (i, w) in lattice.stencil(g) {
                weight += w * weights[i];
                for c in 0..3 {
                    color[c] += w * color_sums[i][c];
                }
            }
            if weight > 1e-6 {
                color.map(|c| (c / weight).clamp(0.0, 1.0))
            } else {
                let nn = kdtree.nearest_one::<kiddo::SquaredEuclidean>(&lattice.to_world(g));
                colors[nn.item as usize]
            }
        })
        .collect()
}
