/// Compute the dot product of two 3d vectors.
#[inline]
pub fn dot_product3(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Compute the cross product of two 3d vectors.
#[inline]
pub fn cross_vec3(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

/// Subtract two 3d vectors, `a - b`.
#[inline]
pub fn sub_vec3(a: &[f64; 3], b: &[f64; 3]) -> [f64; 3] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

/// Compute the euclidean norm of a 3d vector.
#[inline]
pub fn norm3(a: &[f64; 3]) -> f64 {
    dot_product3(a, a).sqrt()
}

/// Normalize a 3d vector. Vectors with a norm below `1e-12` are returned unchanged.
#[inline]
pub fn normalize3(a: &[f64; 3]) -> [f64; 3] {
    let n = norm3(a);
    if n < 1e-12 {
        return *a;
    }
    [a[0] / n, a[1] / n, a[2] / n]
}

/// Compute the area-scaled normal of a triangle, `(b - a) x (c - a)`.
///
/// The norm of the result is twice the area of the triangle.
#[inline]
pub fn triangle_normal(a: &[f64; 3], b: &[f64; 3], c: &[f64; 3]) -> [f64; 3] {
    cross_vec3(&sub_vec3(b, a), &sub_vec3(c, a))
}

/// Compute the area of a triangle.
#[inline]
pub fn triangle_area(a: &[f64; 3], b: &[f64; 3], c: &[f64; 3]) -> f64 {
    0.5 * norm3(&triangle_normal(a, b, c))
}

/// Compute the covariance matrix of a set of points.
///
/// # Arguments
///
/// * `points` - The points of the neighbourhood.
///
/// # Returns
///
/// The 3x3 covariance matrix in row-major order, or zeros for an empty set.
pub fn covariance3(points: &[[f64; 3]]) -> [[f64; 3]; 3] {
    let mut cov = [[0.0; 3]; 3];
    if points.is_empty() {
        return cov;
    }

    let n = points.len() as f64;
    let mut mean = [0.0; 3];
    for p in points {
        for (m, v) in mean.iter_mut().zip(p) {
            *m += v;
        }
    }
    mean.iter_mut().for_each(|m| *m /= n);

    for p in points {
        let d = sub_vec3(p, &mean);
        for i in 0..3 {
            for j in i..3 {
                cov[i][j] += d[i] * d[j];
            }
        }
    }

    for i in 0..3 {
        for j in i..3 {
            cov[i][j] /= n;
            cov[j][i] = cov[i][j];
        }
    }

    cov
}

/// Find the direction of least variance of a symmetric positive semi-definite matrix.
///
/// The result is the unit eigenvector of the smallest eigenvalue, computed as
/// the last right singular vector of the matrix.
///
/// # Arguments
///
/// * `mat` - A symmetric 3x3 matrix in row-major order.
///
/// # Returns
///
/// A unit vector, or `[0, 0, 0]` if the matrix is not finite.
pub fn smallest_eigenvector3(mat: &[[f64; 3]; 3]) -> [f64; 3] {
    if mat.iter().flatten().any(|v| !v.is_finite()) {
        return [0.0; 3];
    }

    let a = faer::mat![
        [mat[0][0], mat[0][1], mat[0][2]],
        [mat[1][0], mat[1][1], mat[1][2]],
        [mat[2][0], mat[2][1], mat[2][2]],
    ];

    // singular values are sorted in non-increasing order
    let svd = a.svd();
    let v = svd.v().col(2);

    normalize3(&[v[0], v[1], v[2]])
}
