//! Conversions between physical (world) coordinates and voxel indices.
//!
//! All functions are pure. NaN or infinite inputs are not validated; the
//! float-to-integer conversion saturates, and callers clamp the result.

/// A point in physical space, (x, y, z).
pub type WorldPoint = [f64; 3];

/// Nearest voxel index of `world` along one axis.
#[inline]
pub fn world_to_index(world: f64, origin: f64, spacing: f64) -> i64 {
    ((world - origin) / spacing).round() as i64
}

/// Physical position of voxel `index` along one axis.
#[inline]
pub fn index_to_world(index: i64, origin: f64, spacing: f64) -> f64 {
    origin + index as f64 * spacing
}

/// Clamps `index` into `[min, max]` inclusive.
#[inline]
pub fn clamp_index(index: i64, min: i64, max: i64) -> i64 {
    index.max(min).min(max)
}

/// Maps a world point to unclamped (x, y, z) voxel indices.
pub fn world_to_indices(point: WorldPoint, origin: [f64; 3], spacing: [f64; 3]) -> [i64; 3] {
    std::array::from_fn(|i| world_to_index(point[i], origin[i], spacing[i]))
}

/// Maps (x, y, z) voxel indices to a world point.
pub fn indices_to_world(indices: [i64; 3], origin: [f64; 3], spacing: [f64; 3]) -> WorldPoint {
    std::array::from_fn(|i| index_to_world(indices[i], origin[i], spacing[i]))
}

/// Euclidean distance between two world points.
pub fn distance(a: WorldPoint, b: WorldPoint) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(p, q)| (p - q) * (p - q))
        .sum::<f64>()
        .sqrt()
}
