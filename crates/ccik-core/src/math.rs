//! Vector, quaternion and dense-matrix helpers shared by the graph and the
//! solver.

use nalgebra::linalg::Cholesky;
use nalgebra::{DMatrix, Isometry3, Quaternion, Translation3, UnitQuaternion, Vector3};

use crate::types::Dof;

// ---------------------------------------------------------------------------
// DOF transforms
// ---------------------------------------------------------------------------

/// Transform produced by a single channel at the given value.
pub fn dof_transform(dof: Dof, value: f64) -> Isometry3<f64> {
    if dof.is_translation() {
        Isometry3::from_parts(
            Translation3::from(dof.axis().into_inner() * value),
            UnitQuaternion::identity(),
        )
    } else {
        Isometry3::from_parts(
            Translation3::identity(),
            UnitQuaternion::from_axis_angle(&dof.axis(), value),
        )
    }
}

/// Compose the transforms of the active channels in declaration order.
pub fn compose_dof_transform(active: &[Dof], values: &[f64; 6]) -> Isometry3<f64> {
    active
        .iter()
        .fold(Isometry3::identity(), |acc, &dof| {
            acc * dof_transform(dof, values[dof.index()])
        })
}

// ---------------------------------------------------------------------------
// Quaternions
// ---------------------------------------------------------------------------

/// Angular distance between two rotations, in radians.
///
/// Shortest arc: always in `[0, pi]`, and zero for `q` and `-q`.
pub fn quaternion_distance(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>) -> f64 {
    let dot = a.coords.dot(&b.coords).abs().min(1.0);
    2.0 * dot.acos()
}

/// Component-wise `a - b` after flipping `b` into `a`'s hemisphere.
///
/// Zero exactly when both quaternions describe the same rotation.
pub fn quaternion_difference(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>) -> Quaternion<f64> {
    let b = if a.coords.dot(&b.coords) < 0.0 {
        -b.into_inner()
    } else {
        b.into_inner()
    };
    a.into_inner() - b
}

/// Rotation taking `b` onto `a`, expressed in the world frame as axis * angle.
pub fn rotation_error_vector(a: &UnitQuaternion<f64>, b: &UnitQuaternion<f64>) -> Vector3<f64> {
    (a * b.inverse()).scaled_axis()
}

/// Scale `v` down so its norm does not exceed `max`.
pub fn clamp_norm(v: Vector3<f64>, max: f64) -> Vector3<f64> {
    let norm = v.norm();
    if norm > max && norm > 0.0 {
        v * (max / norm)
    } else {
        v
    }
}

// ---------------------------------------------------------------------------
// Dense solves
// ---------------------------------------------------------------------------

/// Relative singular value below which a Jacobian direction counts as null.
const NULL_SPACE_TOLERANCE: f64 = 1e-6;

/// Solve `a * x = b` for symmetric positive-definite `a`, in place.
///
/// `a` is overwritten by its Cholesky factor and `b` by the solution. Only
/// the lower triangle of `a` is read. Returns `false` without touching `b`
/// if `a` is not positive definite; `a` is then zeroed.
pub fn solve_spd_in_place(a: &mut DMatrix<f64>, b: &mut DMatrix<f64>) -> bool {
    let n = a.nrows();
    if n == 0 {
        return true;
    }

    let owned = std::mem::replace(a, DMatrix::zeros(0, 0));
    let Some(cholesky) = Cholesky::new(owned) else {
        *a = DMatrix::zeros(n, n);
        return false;
    };
    cholesky.solve_mut(b);
    *a = cholesky.unpack_dirty();
    true
}

/// Remove from `v` every component `jacobian` can see, leaving its
/// projection onto the (numerical) null space of `jacobian`.
///
/// `v` holds one entry per column of `jacobian`.
pub fn project_to_null_space(jacobian: &DMatrix<f64>, v: &mut [f64]) {
    debug_assert_eq!(jacobian.ncols(), v.len());
    if jacobian.nrows() == 0 || v.is_empty() {
        return;
    }

    let svd = jacobian.clone().svd(false, true);
    let Some(v_t) = svd.v_t else {
        v.fill(0.0);
        return;
    };
    let largest = svd.singular_values.iter().copied().fold(0.0, f64::max);
    let tolerance = largest * NULL_SPACE_TOLERANCE;

    for (i, &sigma) in svd.singular_values.iter().enumerate() {
        if sigma <= tolerance {
            continue;
        }
        let along: f64 = v.iter().enumerate().map(|(k, x)| v_t[(i, k)] * x).sum();
        for (k, x) in v.iter_mut().enumerate() {
            *x -= along * v_t[(i, k)];
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
