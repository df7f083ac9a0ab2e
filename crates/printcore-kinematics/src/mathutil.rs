//! Small fixed-size vector and matrix helpers.

pub type Vector3d = [f64; 3];
pub type Matrix3x3d = [[f64; 3]; 3];

/// Determinants below this are treated as singular.
const SINGULAR_EPSILON: f64 = 1e-12;

pub fn vector_cross(v1: Vector3d, v2: Vector3d) -> Vector3d {
    [
        v1[1] * v2[2] - v1[2] * v2[1],
        v1[2] * v2[0] - v1[0] * v2[2],
        v1[0] * v2[1] - v1[1] * v2[0],
    ]
}

pub fn vector_dot(v1: Vector3d, v2: Vector3d) -> f64 {
    v1[0] * v2[0] + v1[1] * v2[1] + v1[2] * v2[2]
}

pub fn vector_mag_sq(v: Vector3d) -> f64 {
    vector_dot(v, v)
}

pub fn vector_add(v1: Vector3d, v2: Vector3d) -> Vector3d {
    [v1[0] + v2[0], v1[1] + v2[1], v1[2] + v2[2]]
}

pub fn vector_sub(v1: Vector3d, v2: Vector3d) -> Vector3d {
    [v1[0] - v2[0], v1[1] - v2[1], v1[2] - v2[2]]
}

pub fn vector_mul_scalar(v: Vector3d, s: f64) -> Vector3d {
    [v[0] * s, v[1] * s, v[2] * s]
}

/// Unit vector in the direction of `v`, `None` for a zero vector.
pub fn vector_normalize(v: Vector3d) -> Option<Vector3d> {
    let mag = vector_mag_sq(v).sqrt();
    if mag < SINGULAR_EPSILON {
        return None;
    }
    Some(vector_mul_scalar(v, 1.0 / mag))
}

pub fn matrix_determinant(a: Matrix3x3d) -> f64 {
    vector_dot(a[0], vector_cross(a[1], a[2]))
}

/// Inverse of a 3x3 matrix, `None` when singular.
pub fn matrix_inverse(a: Matrix3x3d) -> Option<Matrix3x3d> {
    let det = matrix_determinant(a);
    if det.abs() < SINGULAR_EPSILON {
        return None;
    }
    let inv_det = 1.0 / det;

    let c0 = vector_mul_scalar(vector_cross(a[1], a[2]), inv_det);
    let c1 = vector_mul_scalar(vector_cross(a[2], a[0]), inv_det);
    let c2 = vector_mul_scalar(vector_cross(a[0], a[1]), inv_det);

    // The cross products are the columns of the inverse.
    Some([
        [c0[0], c1[0], c2[0]],
        [c0[1], c1[1], c2[1]],
        [c0[2], c1[2], c2[2]],
    ])
}

pub fn matrix_transpose(a: Matrix3x3d) -> Matrix3x3d {
    [
        [a[0][0], a[1][0], a[2][0]],
        [a[0][1], a[1][1], a[2][1]],
        [a[0][2], a[1][2], a[2][2]],
    ]
}

pub fn matrix_mul_vector(a: Matrix3x3d, v: Vector3d) -> Vector3d {
    [vector_dot(a[0], v), vector_dot(a[1], v), vector_dot(a[2], v)]
}

pub fn matrix_identity() -> Matrix3x3d {
    [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]]
}

/// Linear interpolation, exact at both ends.
pub fn lerp(a: f64, b: f64, t: f64) -> f64 {
    if t == 0.0 {
        a
    } else if t == 1.0 {
        b
    } else {
        a + (b - a) * t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f64 = 1e-9;

    fn assert_vec_equals(v1: Vector3d, v2: Vector3d, msg: &str) {
        assert!(
            (v1[0] - v2[0]).abs() < EPSILON
                && (v1[1] - v2[1]).abs() < EPSILON
                && (v1[2] - v2[2]).abs() < EPSILON,
            "{} expected {:?}, got {:?}",
            msg,
            v2,
            v1
        );
    }

    #[test]
    fn test_vector_cross() {
        assert_vec_equals(
            vector_cross([1.0, 0.0, 0.0], [0.0, 1.0, 0.0]),
            [0.0, 0.0, 1.0],
            "unit vectors",
        );
        assert_vec_equals(
            vector_cross([1.0, 2.0, 3.0], [4.0, 5.0, 6.0]),
            [-3.0, 6.0, -3.0],
            "general vectors",
        );
    }

    #[test]
    fn test_vector_normalize() {
        assert_vec_equals(
            vector_normalize([3.0, 0.0, 4.0]).unwrap(),
            [0.6, 0.0, 0.8],
            "normalize",
        );
        assert!(vector_normalize([0.0, 0.0, 0.0]).is_none());
    }

    #[test]
    fn test_matrix_inverse() {
        let m = [[2.0, 0.0, 1.0], [1.0, 3.0, 0.0], [0.0, 1.0, 4.0]];
        let inv = matrix_inverse(m).unwrap();
        for (i, row) in m.iter().enumerate() {
            for j in 0..3 {
                let value: f64 = (0..3).map(|k| row[k] * inv[k][j]).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((value - expected).abs() < EPSILON, "m * inv at ({i},{j})");
            }
        }
    }

    #[test]
    fn test_singular_matrix_has_no_inverse() {
        let m = [[1.0, 2.0, 3.0], [2.0, 4.0, 6.0], [0.0, 1.0, 1.0]];
        assert!(matrix_inverse(m).is_none());
    }

    #[test]
    fn test_transpose_and_multiply() {
        let m = [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]];
        let t = matrix_transpose(m);
        assert_eq!(t[0], [1.0, 4.0, 7.0]);
        assert_vec_equals(matrix_mul_vector(m, [1.0, 0.0, 0.0]), [1.0, 4.0, 7.0], "column 0");
    }

    #[test]
    fn test_lerp_endpoints_exact() {
        assert_eq!(lerp(0.1, 0.7, 0.0), 0.1);
        assert_eq!(lerp(0.1, 0.7, 1.0), 0.7);
        assert!((lerp(0.0, 1.0, 0.25) - 0.25).abs() < EPSILON);
    }
}
