//! Morton encoding (Z-order curve) for deterministic spatial ordering

use crate::core::types::IVec3;

/// Spread bits of a 21-bit integer into every third bit of a 64-bit integer
fn spread_bits(x: u32) -> u64 {
    let mut x = x as u64 & 0x1fffff; // 21 bits max
    x = (x | (x << 32)) & 0x1f00000000ffff;
    x = (x | (x << 16)) & 0x1f0000ff0000ff;
    x = (x | (x << 8)) & 0x100f00f00f00f00f;
    x = (x | (x << 4)) & 0x10c30c30c30c30c3;
    x = (x | (x << 2)) & 0x1249249249249249;
    x
}

/// Encode 3D coordinates into Morton code (Z-order curve)
/// Each coordinate can be up to 21 bits (0..2097151)
pub fn encode_morton_3d(x: u32, y: u32, z: u32) -> u64 {
    spread_bits(x) | (spread_bits(y) << 1) | (spread_bits(z) << 2)
}

/// Morton code of a grid position.
///
/// Coordinates are biased by 2^20 so slightly negative positions (mesher
/// margins, neighbours of border chunks) still sort next to their neighbours.
pub fn morton_key(p: IVec3) -> u64 {
    const BIAS: i64 = 1 << 20;
    let bias = |v: i32| (v as i64 + BIAS).clamp(0, 0x1fffff) as u32;
    encode_morton_3d(bias(p.x), bias(p.y), bias(p.z))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        // Morton codes should interleave bits
        assert_eq!(encode_morton_3d(0, 0, 0), 0);
        assert_eq!(encode_morton_3d(1, 0, 0), 1);
        assert_eq!(encode_morton_3d(0, 1, 0), 2);
        assert_eq!(encode_morton_3d(0, 0, 1), 4);
        assert_eq!(encode_morton_3d(1, 1, 1), 7);
    }

    #[test]
    fn test_morton_key_preserves_local_order() {
        let a = morton_key(IVec3::new(0, 0, 0));
        let b = morton_key(IVec3::new(1, 0, 0));
        let c = morton_key(IVec3::new(-1, 0, 0));
        assert!(c < a && a < b);
        assert_ne!(morton_key(IVec3::new(3, 5, 7)), morton_key(IVec3::new(7, 5, 3)));
    }
}
