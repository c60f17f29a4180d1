//! Read-only compressed wide BVH over a static triangle mesh.
//!
//! The structure is built elsewhere and consumed as three flat arrays: nodes,
//! a BVH-order to mesh-order triangle index map, and triangle records. This
//! module validates and queries them; [`pack`] can lay out small meshes.

pub mod node;
pub mod pack;
pub mod ray;
pub mod traverse;

pub use node::{Bvh8Node, BvhTriangle};
pub use ray::{intersect_triangle, Intersection, Ray, TriangleHit};
pub use traverse::{NodeGroup, TraversalStack};

use crate::error::BvhError;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompressedBvh {
    pub nodes: Vec<Bvh8Node>,
    pub indices: Vec<u32>,
    pub triangles: Vec<BvhTriangle>,
}

impl CompressedBvh {
    /// Wrap prebuilt arrays after checking every reference is in range.
    pub fn from_parts(
        nodes: Vec<Bvh8Node>,
        indices: Vec<u32>,
        triangles: Vec<BvhTriangle>,
    ) -> Result<Self, BvhError> {
        let bvh = Self {
            nodes,
            indices,
            triangles,
        };
        bvh.validate()?;
        Ok(bvh)
    }

    /// Decode a raw node buffer of packed 80-byte records.
    pub fn nodes_from_bytes(bytes: &[u8]) -> Result<Vec<Bvh8Node>, BvhError> {
        let size = std::mem::size_of::<Bvh8Node>();
        if bytes.len() % size != 0 {
            return Err(BvhError::Misaligned(bytes.len()));
        }
        Ok(bytes
            .chunks_exact(size)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    pub fn validate(&self) -> Result<(), BvhError> {
        if self.nodes.is_empty() {
            return Err(BvhError::Empty);
        }
        if self.indices.len() != self.triangles.len() {
            return Err(BvhError::IndexCountMismatch {
                indices: self.indices.len(),
                triangles: self.triangles.len(),
            });
        }
        for (index, node) in self.nodes.iter().enumerate() {
            let inner = node.imask().count_ones() as usize;
            if inner > 0 {
                let last = node.child_base as usize + inner - 1;
                if last >= self.nodes.len() {
                    return Err(BvhError::ChildOutOfRange {
                        node: index,
                        child: last,
                        count: self.nodes.len(),
                    });
                }
            }
            for slot in 0..8 {
                if let Some((offset, count)) = node.leaf_range(slot) {
                    let last = (node.triangle_base + offset + count) as usize;
                    if last > self.triangles.len() {
                        return Err(BvhError::TriangleOutOfRange {
                            node: index,
                            triangle: last - 1,
                            count: self.triangles.len(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Nearest hit within `(ray.tmin, ray.tmax)`.
    pub fn intersect(&self, ray: Ray) -> Option<Intersection> {
        traverse::traverse(self, ray)
    }

    /// Reference answer testing every triangle.
    pub fn intersect_brute_force(&self, ray: Ray) -> Option<Intersection> {
        let mut nearest: Option<Intersection> = None;
        let mut tmax = ray.tmax;
        for (index, triangle) in self.triangles.iter().enumerate() {
            if let Some(hit) = intersect_triangle(&Ray { tmax, ..ray }, triangle) {
                tmax = hit.t;
                nearest = Some(Intersection {
                    triangle: index as u32,
                    original_triangle: self.indices[index],
                    t: hit.t,
                    u: hit.u,
                    v: hit.v,
                });
            }
        }
        nearest
    }
}
