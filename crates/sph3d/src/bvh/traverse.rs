//! Octant-ordered traversal of a compressed 8-wide BVH.
//!
//! Pending work is kept as node groups: a base index plus a 32-bit mask whose
//! top byte marks hit inner children (by permuted slot) and whose low byte
//! carries the node's inner mask, or whose low 24 bits mark hit triangles.
//! Children are popped highest bit first; for inner children the bit index is
//! the slot XOR the inverse ray octant, so the order follows the ray direction.

use glam::Vec3;

use super::node::Bvh8Node;
use super::ray::{intersect_triangle, Intersection, Ray};
use super::CompressedBvh;
use crate::constants::{PRIVATE_STACK_SIZE, SHARED_STACK_SIZE};

/// Reciprocal used for a zero direction component. Large enough that a slab
/// the ray runs parallel to is either always or never entered.
const PARALLEL_RECIPROCAL: f32 = 1.0e12;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NodeGroup {
    pub base: u32,
    pub mask: u32,
}

/// Group stack split into a ring of shared slots holding the newest entries
/// and a private array the oldest entries spill into.
///
/// Once both are full, an entry that would spill is dropped instead and
/// traversal silently skips that subtree.
#[derive(Clone, Debug, Default)]
pub struct TraversalStack {
    shared: [NodeGroup; SHARED_STACK_SIZE],
    shared_head: usize,
    shared_len: usize,
    private: [NodeGroup; PRIVATE_STACK_SIZE],
    private_len: usize,
}

impl TraversalStack {
    pub fn push(&mut self, group: NodeGroup) {
        if self.shared_len == SHARED_STACK_SIZE {
            let oldest = self.shared[self.shared_head];
            if self.private_len < PRIVATE_STACK_SIZE {
                self.private[self.private_len] = oldest;
                self.private_len += 1;
            }
            self.shared_head = (self.shared_head + 1) % SHARED_STACK_SIZE;
            self.shared_len -= 1;
        }
        self.shared[(self.shared_head + self.shared_len) % SHARED_STACK_SIZE] = group;
        self.shared_len += 1;
    }

    pub fn pop(&mut self) -> Option<NodeGroup> {
        if self.shared_len > 0 {
            self.shared_len -= 1;
            Some(self.shared[(self.shared_head + self.shared_len) % SHARED_STACK_SIZE])
        } else if self.private_len > 0 {
            self.private_len -= 1;
            Some(self.private[self.private_len])
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.shared_len + self.private_len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-ray constants shared by every node test.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PreparedRay {
    pub ray: Ray,
    inv_direction: Vec3,
    negative: [bool; 3],
    /// Inverse octant replicated into all four bytes.
    pub oct_inv4: u32,
}

impl PreparedRay {
    pub fn new(ray: Ray) -> Self {
        let d = ray.direction;
        let negative = [d.x < 0.0, d.y < 0.0, d.z < 0.0];
        let reciprocal = |c: f32, neg: bool| {
            if c.abs() > 1.0 / PARALLEL_RECIPROCAL {
                1.0 / c
            } else if neg {
                -PARALLEL_RECIPROCAL
            } else {
                PARALLEL_RECIPROCAL
            }
        };
        let inv_direction = Vec3::new(
            reciprocal(d.x, negative[0]),
            reciprocal(d.y, negative[1]),
            reciprocal(d.z, negative[2]),
        );
        let oct_inv = (if negative[0] { 0 } else { 4 })
            | (if negative[1] { 0 } else { 2 })
            | (if negative[2] { 0 } else { 1 });
        Self {
            ray,
            inv_direction,
            negative,
            oct_inv4: oct_inv * 0x0101_0101,
        }
    }
}

#[inline]
fn extract_byte(word: u32, index: usize) -> u32 {
    (word >> (index * 8)) & 0xff
}

/// Spread the top bit of every byte across that byte.
#[inline]
fn sign_extend_s8x4(word: u32) -> u32 {
    ((word >> 7) & 0x0101_0101) * 0xff
}

/// Slab-test all eight children, returning hit bits: inner children in the top
/// byte, triangles of hit leaves in the low 24 bits.
pub(crate) fn intersect_children(node: &Bvh8Node, prepared: &PreparedRay, tmax: f32) -> u32 {
    let adjusted_inv = node.scale() * prepared.inv_direction;
    let adjusted_origin = (node.origin() - prepared.ray.origin) * prepared.inv_direction;
    let [neg_x, neg_y, neg_z] = prepared.negative;
    let near_far = |lo: u8, hi: u8, neg: bool| if neg { (hi, lo) } else { (lo, hi) };

    let mut hit_mask = 0;
    for half in 0..2 {
        let meta4 = node.meta4(half);
        let is_inner4 = (meta4 & (meta4 << 1)) & 0x1010_1010;
        let inner_mask4 = sign_extend_s8x4(is_inner4 << 3);
        let bit_index4 = (meta4 ^ (prepared.oct_inv4 & inner_mask4)) & 0x1f1f_1f1f;
        let child_bits4 = (meta4 >> 5) & 0x0707_0707;

        for j in 0..4 {
            let c = half * 4 + j;
            let (near_x, far_x) = near_far(node.q_lo_x[c], node.q_hi_x[c], neg_x);
            let (near_y, far_y) = near_far(node.q_lo_y[c], node.q_hi_y[c], neg_y);
            let (near_z, far_z) = near_far(node.q_lo_z[c], node.q_hi_z[c], neg_z);
            let near = Vec3::new(near_x as f32, near_y as f32, near_z as f32) * adjusted_inv
                + adjusted_origin;
            let far = Vec3::new(far_x as f32, far_y as f32, far_z as f32) * adjusted_inv
                + adjusted_origin;
            let t_enter = near.max_element().max(prepared.ray.tmin);
            let t_exit = far.min_element().min(tmax);
            if t_enter <= t_exit {
                hit_mask |= extract_byte(child_bits4, j) << extract_byte(bit_index4, j);
            }
        }
    }
    hit_mask
}

/// Nearest triangle hit along `ray`, or `None`.
pub fn traverse(bvh: &CompressedBvh, ray: Ray) -> Option<Intersection> {
    let prepared = PreparedRay::new(ray);
    let oct_inv = prepared.oct_inv4 & 0xff;
    let mut tmax = ray.tmax;
    let mut nearest = None;
    let mut stack = TraversalStack::default();

    // The root is addressed as hit inner child 7 of a virtual parent at index 0.
    let mut current = NodeGroup {
        base: 0,
        mask: 0x8000_0000,
    };
    loop {
        let mut triangles = NodeGroup::default();

        if current.mask & 0xff00_0000 != 0 {
            let hits_imask = current.mask;
            let child_bit = 31 - hits_imask.leading_zeros();
            current.mask &= !(1 << child_bit);
            if current.mask & 0xff00_0000 != 0 {
                stack.push(current);
            }

            let slot = (child_bit - 24) ^ oct_inv;
            let relative = (hits_imask & !(0xffff_ffffu32 << slot)).count_ones();
            let node_index = (current.base + relative) as usize;
            let Some(node) = bvh.nodes.get(node_index) else {
                break;
            };

            let hits = intersect_children(node, &prepared, tmax);
            current = NodeGroup {
                base: node.child_base,
                mask: (hits & 0xff00_0000) | node.imask() as u32,
            };
            triangles = NodeGroup {
                base: node.triangle_base,
                mask: hits & 0x00ff_ffff,
            };
        }

        while triangles.mask != 0 {
            let bit = triangles.mask.trailing_zeros();
            triangles.mask &= !(1 << bit);
            let index = triangles.base + bit;
            let Some(triangle) = bvh.triangles.get(index as usize) else {
                continue;
            };
            let candidate = Ray { tmax, ..ray };
            if let Some(hit) = intersect_triangle(&candidate, triangle) {
                tmax = hit.t;
                nearest = Some(Intersection {
                    triangle: index,
                    original_triangle: bvh.indices.get(index as usize).copied().unwrap_or(index),
                    t: hit.t,
                    u: hit.u,
                    v: hit.v,
                });
            }
        }

        if current.mask & 0xff00_0000 == 0 {
            match stack.pop() {
                Some(group) => current = group,
                None => break,
            }
        }
    }
    nearest
}
