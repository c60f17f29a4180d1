//! Compressed 8-wide node and triangle records.
//!
//! Node layout, 80 bytes (five `vec4` words on the device):
//!
//! | word | contents |
//! |------|----------|
//! | 0 | origin xyz, then bytes `e.x e.y e.z imask` |
//! | 1 | child node base, triangle base, 8 metadata bytes |
//! | 2 | quantized x: lo[0..4], lo[4..8], hi[0..4], hi[4..8] |
//! | 3 | quantized y, same order |
//! | 4 | quantized z, same order |
//!
//! Child `c` spans `origin + q * 2^(e - 127)` per axis. A metadata byte holds a
//! unary hit mask in its top three bits and a bit index in its low five: inner
//! children use `24 + slot`, leaves the offset of their first triangle.

use bytemuck::{Pod, Zeroable};
use glam::{UVec3, Vec3};

#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct Bvh8Node {
    pub origin: [f32; 3],
    /// Biased power-of-two exponents per axis, then the inner-child mask.
    pub exponents_imask: [u8; 4],
    pub child_base: u32,
    pub triangle_base: u32,
    pub meta: [u8; 8],
    pub q_lo_x: [u8; 8],
    pub q_hi_x: [u8; 8],
    pub q_lo_y: [u8; 8],
    pub q_hi_y: [u8; 8],
    pub q_lo_z: [u8; 8],
    pub q_hi_z: [u8; 8],
}

impl Bvh8Node {
    pub fn origin(&self) -> Vec3 {
        Vec3::from_array(self.origin)
    }

    pub fn exponents(&self) -> UVec3 {
        UVec3::new(
            self.exponents_imask[0] as u32,
            self.exponents_imask[1] as u32,
            self.exponents_imask[2] as u32,
        )
    }

    /// Quantization step per axis.
    pub fn scale(&self) -> Vec3 {
        let e = self.exponents();
        Vec3::new(
            f32::from_bits(e.x << 23),
            f32::from_bits(e.y << 23),
            f32::from_bits(e.z << 23),
        )
    }

    pub fn imask(&self) -> u8 {
        self.exponents_imask[3]
    }

    /// Metadata bytes of four children packed little-endian, as the device reads them.
    pub fn meta4(&self, half: usize) -> u32 {
        let b = &self.meta[half * 4..half * 4 + 4];
        u32::from_le_bytes([b[0], b[1], b[2], b[3]])
    }

    pub fn is_inner(&self, slot: usize) -> bool {
        self.imask() & (1 << slot) != 0
    }

    /// Dequantized bounds of a child slot.
    pub fn child_bounds(&self, slot: usize) -> (Vec3, Vec3) {
        let scale = self.scale();
        let origin = self.origin();
        let lo = Vec3::new(
            self.q_lo_x[slot] as f32,
            self.q_lo_y[slot] as f32,
            self.q_lo_z[slot] as f32,
        );
        let hi = Vec3::new(
            self.q_hi_x[slot] as f32,
            self.q_hi_y[slot] as f32,
            self.q_hi_z[slot] as f32,
        );
        (origin + lo * scale, origin + hi * scale)
    }

    /// Triangle offset and count of a leaf slot, `None` for empty or inner slots.
    pub fn leaf_range(&self, slot: usize) -> Option<(u32, u32)> {
        let meta = self.meta[slot];
        if meta == 0 || self.is_inner(slot) {
            return None;
        }
        let count = (meta >> 5).count_ones();
        Some(((meta & 0x1f) as u32, count))
    }
}

/// Triangle stored as a vertex and two edges, ready for Moller-Trumbore.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BvhTriangle {
    pub vertex0: [f32; 4],
    pub edge1: [f32; 4],
    pub edge2: [f32; 4],
}

impl BvhTriangle {
    pub fn new(v0: Vec3, v1: Vec3, v2: Vec3) -> Self {
        Self {
            vertex0: v0.extend(0.0).to_array(),
            edge1: (v1 - v0).extend(0.0).to_array(),
            edge2: (v2 - v0).extend(0.0).to_array(),
        }
    }

    pub fn vertex0(&self) -> Vec3 {
        Vec3::from_slice(&self.vertex0[..3])
    }

    pub fn edge1(&self) -> Vec3 {
        Vec3::from_slice(&self.edge1[..3])
    }

    pub fn edge2(&self) -> Vec3 {
        Vec3::from_slice(&self.edge2[..3])
    }

    /// Unnormalized geometric normal, `edge1 x edge2`.
    pub fn geometric_normal(&self) -> Vec3 {
        self.edge1().cross(self.edge2())
    }
}
