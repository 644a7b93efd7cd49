//! Rotation matrix to unit quaternion conversion.
//!
//! Branches on the largest of the trace and the three diagonal terms
//! (Shepperd's method), so the square root is always taken of a quantity
//! >= 1 and the division never goes through a near-zero denominator. The
//! sign of the result is left as computed: q and -q are the same rotation.

use nalgebra::{Matrix3, Quaternion, UnitQuaternion};

/// Which term dominated the conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DominantTerm {
    Trace,
    X,
    Y,
    Z,
}

/// The branch `rotation_to_quaternion` takes for `r`.
pub fn dominant_term(r: &Matrix3<f64>) -> DominantTerm {
    let trace = r.trace();
    let (r00, r11, r22) = (r[(0, 0)], r[(1, 1)], r[(2, 2)]);
    if trace > 0.0 {
        DominantTerm::Trace
    } else if r00 > r11 && r00 > r22 {
        DominantTerm::X
    } else if r11 > r22 {
        DominantTerm::Y
    } else {
        DominantTerm::Z
    }
}

/// Unit quaternion for the rotation matrix `r`.
///
/// `r` is expected to be orthonormal; small deviations are absorbed by the
/// final normalization.
pub fn rotation_to_quaternion(r: &Matrix3<f64>) -> UnitQuaternion<f64> {
    let (w, x, y, z) = match dominant_term(r) {
        DominantTerm::Trace => {
            let s = (r.trace() + 1.0).sqrt() * 2.0; // s = 4w
            (
                0.25 * s,
                (r[(2, 1)] - r[(1, 2)]) / s,
                (r[(0, 2)] - r[(2, 0)]) / s,
                (r[(1, 0)] - r[(0, 1)]) / s,
            )
        }
        DominantTerm::X => {
            let s = (1.0 + r[(0, 0)] - r[(1, 1)] - r[(2, 2)]).sqrt() * 2.0; // s = 4x
            (
                (r[(2, 1)] - r[(1, 2)]) / s,
                0.25 * s,
                (r[(0, 1)] + r[(1, 0)]) / s,
                (r[(0, 2)] + r[(2, 0)]) / s,
            )
        }
        DominantTerm::Y => {
            let s = (1.0 + r[(1, 1)] - r[(0, 0)] - r[(2, 2)]).sqrt() * 2.0; // s = 4y
            (
                (r[(0, 2)] - r[(2, 0)]) / s,
                (r[(0, 1)] + r[(1, 0)]) / s,
                0.25 * s,
                (r[(1, 2)] + r[(2, 1)]) / s,
            )
        }
        DominantTerm::Z => {
            let s = (1.0 + r[(2, 2)] - r[(0, 0)] - r[(1, 1)]).sqrt() * 2.0; // s = 4z
            (
                (r[(1, 0)] - r[(0, 1)]) / s,
                (r[(0, 2)] + r[(2, 0)]) / s,
                (r[(1, 2)] + r[(2, 1)]) / s,
                0.25 * s,
            )
        }
    };

    UnitQuaternion::new_normalize(Quaternion::new(w, x, y, z))
}
