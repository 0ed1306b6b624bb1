//! Internal coordinates from Cartesian positions.

use std::f64::consts::{PI, TAU};

use lin_alg::f64::{Vec3, calc_dihedral_angle_v2};

/// Valence angle at `center`, between the bonds to `a` and `b`. Radians, in [0, π].
pub fn valence_angle(a: Vec3, center: Vec3, b: Vec3) -> f64 {
    let u = a - center;
    let v = b - center;

    let denom = u.magnitude() * v.magnitude();
    if denom < 1e-12 {
        return 0.;
    }

    (u.dot(v) / denom).clamp(-1., 1.).acos()
}

/// Dihedral angle of the chain p0-p1-p2-p3, around the p1-p2 bond. Radians, in (-π, π], positive
/// for clockwise rotation of p0-p1 onto p2-p3 when viewed along p1 → p2.
pub fn dihedral_angle(p0: Vec3, p1: Vec3, p2: Vec3, p3: Vec3) -> f64 {
    // `lin_alg` measures the opposite rotation, in [0, τ].
    let phi = TAU - calc_dihedral_angle_v2(&(p0, p1, p2, p3));
    if phi > PI { phi - TAU } else { phi }
}
