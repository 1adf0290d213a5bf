//! 30 bit morton codes used to sort lights by spatial locality.

use glam::{UVec3, Vec3};
use lightgrid_types::{Aabb, LightsData};

/// Bits per axis.
pub const MORTON_AXIS_BITS: u32 = 10;
/// Bits of a full code.
pub const MORTON_KEY_BITS: u32 = 3 * MORTON_AXIS_BITS;

const AXIS_MAX: u32 = (1 << MORTON_AXIS_BITS) - 1;

/// Spreads the low 10 bits of `v` so there are two zero bits between each.
fn expand_bits(v: u32) -> u32 {
    let mut x = v & AXIS_MAX;
    x = (x | (x << 16)) & 0x0300_00FF;
    x = (x | (x << 8)) & 0x0300_F00F;
    x = (x | (x << 4)) & 0x030C_30C3;
    x = (x | (x << 2)) & 0x0924_9249;
    x
}

/// Interleaves three 10 bit coordinates, x in the lowest bit.
pub fn encode(cell: UVec3) -> u32 {
    expand_bits(cell.x) | (expand_bits(cell.y) << 1) | (expand_bits(cell.z) << 2)
}

/// Cell of `position` once the bounds of all lights are split in 1024 cells
/// per axis.
pub fn quantize(position: Vec3, lights: &LightsData) -> UVec3 {
    let normalized = ((position - lights.aabb.min3()) * lights.inv_range.truncate()).clamp(Vec3::ZERO, Vec3::ONE);
    (normalized * AXIS_MAX as f32).as_uvec3()
}

pub fn light_code(light_aabb: &Aabb, lights: &LightsData) -> u32 {
    encode(quantize(light_aabb.center(), lights))
}

#[cfg(test)]
mod tests {
    use glam::{UVec4, Vec4};

    use super::*;

    #[test]
    fn interleaving() {
        assert_eq!(encode(UVec3::ZERO), 0);
        assert_eq!(encode(UVec3::X), 0b001);
        assert_eq!(encode(UVec3::Y), 0b010);
        assert_eq!(encode(UVec3::Z), 0b100);
        assert_eq!(encode(UVec3::new(2, 0, 0)), 0b1000);
        assert_eq!(encode(UVec3::splat(AXIS_MAX)), (1 << MORTON_KEY_BITS) - 1);
    }

    #[test]
    fn quantization_clamps() {
        let lights = LightsData {
            aabb: Aabb::from_min_max(Vec3::splat(-1.0), Vec3::splat(1.0)),
            inv_range: Vec4::new(0.5, 0.5, 0.5, 0.0),
            slice_range: UVec4::ZERO,
        };
        assert_eq!(quantize(Vec3::splat(-1.0), &lights), UVec3::ZERO);
        assert_eq!(quantize(Vec3::splat(1.0), &lights), UVec3::splat(AXIS_MAX));
        assert_eq!(quantize(Vec3::splat(7.0), &lights), UVec3::splat(AXIS_MAX));
        assert_eq!(quantize(Vec3::ZERO, &lights), UVec3::splat(511));
    }
}
