use glam::{DMat3, DVec3};

/// Compute the rotation matrix from XYZ Euler angles.
///
/// The result is `R = Rx(a) * Ry(b) * Rz(c)`, so a point is first rotated
/// about z, then y, then x.
///
/// # Arguments
///
/// * `angles` - The angles `[a, b, c]` in radians about the x, y and z axes.
///
/// # Returns
///
/// The rotation matrix in row-major order.
///
/// Example:
///
/// ```
/// use dtm_3d::transforms::rotation_matrix_from_xyz;
///
/// let rotation = rotation_matrix_from_xyz([std::f64::consts::PI, 0.0, 0.0]);
/// assert!((rotation[1][1] + 1.0).abs() < 1e-12);
/// assert!((rotation[2][2] + 1.0).abs() < 1e-12);
/// ```
pub fn rotation_matrix_from_xyz(angles: [f64; 3]) -> [[f64; 3]; 3] {
    let rotation = DMat3::from_rotation_x(angles[0])
        * DMat3::from_rotation_y(angles[1])
        * DMat3::from_rotation_z(angles[2]);
    dmat3_to_array33(&rotation)
}

/// Rotate a set of points in place about a center.
///
/// Each point becomes `R * (p - center) + center`.
///
/// # Arguments
///
/// * `points` - The points to rotate.
/// * `rotation` - A row-major rotation matrix.
/// * `center` - The pivot of the rotation.
pub fn rotate_points(points: &mut [[f64; 3]], rotation: &[[f64; 3]; 3], center: &[f64; 3]) {
    let r = array33_to_dmat3(rotation);
    let c = DVec3::from_array(*center);
    for p in points.iter_mut() {
        *p = (r * (DVec3::from_array(*p) - c) + c).to_array();
    }
}

/// Rotate a set of directions in place, renormalizing non-zero results.
pub fn rotate_directions(directions: &mut [[f64; 3]], rotation: &[[f64; 3]; 3]) {
    let r = array33_to_dmat3(rotation);
    for d in directions.iter_mut() {
        let v = r * DVec3::from_array(*d);
        *d = v.try_normalize().unwrap_or(v).to_array();
    }
}

// glam stores matrices column-major, the public api is row-major
fn array33_to_dmat3(m: &[[f64; 3]; 3]) -> DMat3 {
    DMat3::from_cols_array_2d(m).transpose()
}

fn dmat3_to_array33(m: &DMat3) -> [[f64; 3]; 3] {
    m.transpose().to_cols_array_2d()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    #[test]
    fn test_rotation_identity() {
        let rotation = rotation_matrix_from_xyz([0.0, 0.0, 0.0]);
        assert_eq!(rotation, [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]);
    }

    #[test]
    fn test_rotation_pi_about_x() {
        let rotation = rotation_matrix_from_xyz([PI, 0.0, 0.0]);
        let expected = [[1.0, 0.0, 0.0], [0.0, -1.0, 0.0], [0.0, 0.0, -1.0]];
        for i in 0..3 {
            for j in 0..3 {
                assert_relative_eq!(rotation[i][j], expected[i][j], epsilon = 1e-12);
            }
        }

        let mut points = vec![[1.0, 2.0, 3.0]];
        rotate_points(&mut points, &rotation, &[0.0, 0.0, 0.0]);
        assert_relative_eq!(points[0][0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(points[0][1], -2.0, epsilon = 1e-12);
        assert_relative_eq!(points[0][2], -3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_order_xyz() {
        // Rx(pi/2) * Rz(pi/2) applied to the x axis: z first sends x to y, then x sends y to z
        let rotation = rotation_matrix_from_xyz([FRAC_PI_2, 0.0, FRAC_PI_2]);
        let mut points = vec![[1.0, 0.0, 0.0]];
        rotate_points(&mut points, &rotation, &[0.0, 0.0, 0.0]);
        assert_relative_eq!(points[0][0], 0.0, epsilon = 1e-12);
        assert_relative_eq!(points[0][1], 0.0, epsilon = 1e-12);
        assert_relative_eq!(points[0][2], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotate_about_center() {
        let rotation = rotation_matrix_from_xyz([0.0, 0.0, FRAC_PI_2]);
        let mut points = vec![[2.0, 1.0, 0.0]];
        rotate_points(&mut points, &rotation, &[1.0, 1.0, 0.0]);
        assert_relative_eq!(points[0][0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(points[0][1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rotate_directions_keeps_zero() {
        let rotation = rotation_matrix_from_xyz([PI, 0.0, 0.0]);
        let mut dirs = vec![[0.0, 0.0, 1.0], [0.0, 0.0, 0.0]];
        rotate_directions(&mut dirs, &rotation);
        assert_relative_eq!(dirs[0][2], -1.0, epsilon = 1e-12);
        assert_eq!(dirs[1], [0.0, 0.0, 0.0]);
    }
}
