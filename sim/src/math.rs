//! Small vector helpers shared by the stages.

use glam::{Quat, Vec3};

/// Rotate `current` toward `target` by at most `max_radians`.
///
/// Both inputs are treated as directions; the result has unit length.
/// Opposite vectors rotate around the world up axis.
pub fn rotate_towards(current: Vec3, target: Vec3, max_radians: f32) -> Vec3 {
    let from = current.normalize_or_zero();
    let to = target.normalize_or_zero();
    if from == Vec3::ZERO {
        return to;
    }
    if to == Vec3::ZERO {
        return from;
    }

    let angle = from.angle_between(to);
    if angle <= max_radians {
        return to;
    }

    let axis = from.cross(to);
    let axis = if axis.length_squared() < 1e-8 {
        Vec3::Y
    } else {
        axis.normalize()
    };
    (Quat::from_axis_angle(axis, max_radians) * from).normalize()
}

/// Horizontal distance, ignoring height.
#[inline]
pub fn distance_xz(a: Vec3, b: Vec3) -> f32 {
    let dx = a.x - b.x;
    let dz = a.z - b.z;
    (dx * dx + dz * dz).sqrt()
}

/// Copy of `v` with the vertical component dropped.
#[inline]
pub fn flatten(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

#[inline]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Cheap deterministic value in [-1, 1] for a (seed, salt) pair.
pub fn scatter(seed: u64, salt: u64) -> f32 {
    let mut x = seed
        .wrapping_mul(0x9E37_79B9_7F4A_7C15)
        .wrapping_add(salt.wrapping_mul(0xBF58_476D_1CE4_E5B9));
    x ^= x >> 31;
    x = x.wrapping_mul(0x94D0_49BB_1331_11EB);
    x ^= x >> 29;
    ((x >> 40) as f32 / (1u64 << 23) as f32) - 1.0
}
