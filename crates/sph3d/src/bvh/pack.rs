//! Pack small meshes into the compressed node format.
//!
//! Only flat layouts are supported: one node whose children are leaves, or a
//! root with up to eight such nodes below it. Enough for collider boxes, ramps
//! and test fixtures; large meshes come from an external builder.

use glam::Vec3;

use super::node::{Bvh8Node, BvhTriangle};
use super::CompressedBvh;
use crate::error::BvhError;

/// Triangles per leaf (three unary hit bits).
const LEAF_SIZE: usize = 3;
/// Triangles addressable from one node (24 low hit-mask bits).
pub const MAX_NODE_TRIANGLES: usize = 8 * LEAF_SIZE;

/// Quantization headroom below the 255 byte range.
const QUANT_MAX: f32 = 254.0;
const QUANT_PAD: f32 = 1.0e-3;

#[derive(Clone, Copy, Debug)]
enum ChildKind {
    Inner,
    Leaf { offset: u32, count: u32 },
}

#[derive(Clone, Copy, Debug)]
struct ChildSpec {
    min: Vec3,
    max: Vec3,
    kind: ChildKind,
}

fn triangle_bounds(triangles: &[[Vec3; 3]]) -> (Vec3, Vec3) {
    triangles.iter().flatten().fold(
        (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
        |(lo, hi), &v| (lo.min(v), hi.max(v)),
    )
}

/// Smallest biased exponent whose step covers `extent` in `QUANT_MAX` steps.
fn quantization_exponent(extent: f32) -> u8 {
    let extent = extent.max(1.0e-6);
    let e = (extent / QUANT_MAX).log2().ceil() as i32;
    (e + 127).clamp(1, 254) as u8
}

fn encode_node(children: &[ChildSpec], child_base: u32, triangle_base: u32) -> Bvh8Node {
    let (min, max) = children.iter().fold(
        (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
        |(lo, hi), c| (lo.min(c.min), hi.max(c.max)),
    );
    let extent = max - min;
    let exponents = [
        quantization_exponent(extent.x),
        quantization_exponent(extent.y),
        quantization_exponent(extent.z),
    ];

    let mut node = Bvh8Node {
        origin: min.to_array(),
        exponents_imask: [exponents[0], exponents[1], exponents[2], 0],
        child_base,
        triangle_base,
        ..Default::default()
    };
    let scale = node.scale();

    for (slot, child) in children.iter().enumerate() {
        let lo = ((child.min - min) / scale - QUANT_PAD)
            .floor()
            .clamp(Vec3::ZERO, Vec3::splat(255.0));
        let hi = ((child.max - min) / scale + QUANT_PAD)
            .ceil()
            .clamp(Vec3::ZERO, Vec3::splat(255.0));
        node.q_lo_x[slot] = lo.x as u8;
        node.q_lo_y[slot] = lo.y as u8;
        node.q_lo_z[slot] = lo.z as u8;
        node.q_hi_x[slot] = hi.x as u8;
        node.q_hi_y[slot] = hi.y as u8;
        node.q_hi_z[slot] = hi.z as u8;

        node.meta[slot] = match child.kind {
            ChildKind::Inner => {
                node.exponents_imask[3] |= 1 << slot;
                0b0010_0000 | (24 + slot as u8)
            }
            ChildKind::Leaf { offset, count } => (((1u8 << count) - 1) << 5) | offset as u8,
        };
    }
    node
}

fn leaf_children(triangles: &[[Vec3; 3]]) -> Vec<ChildSpec> {
    triangles
        .chunks(LEAF_SIZE)
        .enumerate()
        .map(|(i, chunk)| {
            let (min, max) = triangle_bounds(chunk);
            ChildSpec {
                min,
                max,
                kind: ChildKind::Leaf {
                    offset: (i * LEAF_SIZE) as u32,
                    count: chunk.len() as u32,
                },
            }
        })
        .collect()
}

fn records(triangles: &[[Vec3; 3]]) -> Vec<BvhTriangle> {
    triangles
        .iter()
        .map(|[a, b, c]| BvhTriangle::new(*a, *b, *c))
        .collect()
}

impl CompressedBvh {
    /// Single node over at most 24 triangles, three per leaf.
    pub fn flat(triangles: &[[Vec3; 3]]) -> Result<Self, BvhError> {
        if triangles.is_empty() {
            return Err(BvhError::Empty);
        }
        if triangles.len() > MAX_NODE_TRIANGLES {
            return Err(BvhError::TooManyTriangles {
                count: triangles.len(),
                max: MAX_NODE_TRIANGLES,
            });
        }
        let node = encode_node(&leaf_children(triangles), 0, 0);
        Self::from_parts(
            vec![node],
            (0..triangles.len() as u32).collect(),
            records(triangles),
        )
    }

    /// Root with one inner child per group; each group becomes a flat node.
    pub fn two_level(groups: &[Vec<[Vec3; 3]>]) -> Result<Self, BvhError> {
        if groups.is_empty() || groups.iter().any(|g| g.is_empty()) {
            return Err(BvhError::Empty);
        }
        if groups.len() > 8 {
            return Err(BvhError::TooManyChildren(groups.len()));
        }

        let mut nodes = vec![Bvh8Node::default()];
        let mut triangles = Vec::new();
        let mut root_children = Vec::with_capacity(groups.len());
        for group in groups {
            if group.len() > MAX_NODE_TRIANGLES {
                return Err(BvhError::TooManyTriangles {
                    count: group.len(),
                    max: MAX_NODE_TRIANGLES,
                });
            }
            let base = triangles.len() as u32;
            nodes.push(encode_node(&leaf_children(group), 0, base));
            triangles.extend_from_slice(group);

            let (min, max) = triangle_bounds(group);
            root_children.push(ChildSpec {
                min,
                max,
                kind: ChildKind::Inner,
            });
        }
        nodes[0] = encode_node(&root_children, 1, 0);

        Self::from_parts(
            nodes,
            (0..triangles.len() as u32).collect(),
            records(&triangles),
        )
    }
}

/// Two upward-facing triangles spanning an axis-aligned rectangle at height `y`.
pub fn quad_xz(min: Vec3, max: Vec3, y: f32) -> [[Vec3; 3]; 2] {
    let a = Vec3::new(min.x, y, min.z);
    let b = Vec3::new(max.x, y, min.z);
    let c = Vec3::new(max.x, y, max.z);
    let d = Vec3::new(min.x, y, max.z);
    [[a, c, b], [a, d, c]]
}

/// Twelve outward-wound triangles of an axis-aligned box.
pub fn box_triangles(min: Vec3, max: Vec3) -> Vec<[Vec3; 3]> {
    let corner = |i: usize| {
        Vec3::new(
            if i & 1 != 0 { max.x } else { min.x },
            if i & 2 != 0 { max.y } else { min.y },
            if i & 4 != 0 { max.z } else { min.z },
        )
    };
    const FACES: [[usize; 4]; 6] = [
        [0, 4, 6, 2], // -x
        [1, 3, 7, 5], // +x
        [0, 1, 5, 4], // -y
        [2, 6, 7, 3], // +y
        [0, 2, 3, 1], // -z
        [4, 5, 7, 6], // +z
    ];
    FACES
        .iter()
        .flat_map(|f| {
            [
                [corner(f[0]), corner(f[1]), corner(f[2])],
                [corner(f[0]), corner(f[2]), corner(f[3])],
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bvh::Ray;

    #[test]
    fn test_quantized_children_contain_their_triangles() {
        let tris = box_triangles(Vec3::new(-0.3, 0.1, -0.2), Vec3::new(0.4, 0.9, 0.5));
        let bvh = CompressedBvh::flat(&tris).unwrap();
        let node = bvh.nodes[0];
        for slot in 0..4 {
            let (lo, hi) = node.child_bounds(slot);
            let (offset, count) = node.leaf_range(slot).unwrap();
            for tri in &tris[offset as usize..(offset + count) as usize] {
                for v in tri {
                    assert!(v.cmpge(lo - 1e-6).all() && v.cmple(hi + 1e-6).all());
                }
            }
        }
    }

    #[test]
    fn test_flat_rejects_too_many_triangles() {
        let tris = vec![[Vec3::ZERO, Vec3::X, Vec3::Y]; 25];
        assert!(matches!(
            CompressedBvh::flat(&tris),
            Err(BvhError::TooManyTriangles { count: 25, .. })
        ));
    }

    #[test]
    fn test_box_normals_point_outward() {
        let min = Vec3::splat(-1.0);
        let max = Vec3::splat(1.0);
        for tri in box_triangles(min, max) {
            let n = (tri[1] - tri[0]).cross(tri[2] - tri[0]);
            let centre = (tri[0] + tri[1] + tri[2]) / 3.0;
            assert!(n.dot(centre) > 0.0, "inward face {:?}", tri);
        }
    }

    #[test]
    fn test_quad_faces_up() {
        for tri in quad_xz(Vec3::splat(-1.0), Vec3::splat(1.0), 0.5) {
            let n = (tri[1] - tri[0]).cross(tri[2] - tri[0]);
            assert!(n.normalize().dot(Vec3::Y) > 0.999);
        }
    }

    #[test]
    fn test_two_level_matches_brute_force() {
        let groups = vec![
            box_triangles(Vec3::new(-1.0, 0.0, -1.0), Vec3::new(-0.5, 0.5, -0.5)),
            box_triangles(Vec3::new(0.5, 0.0, 0.5), Vec3::new(1.0, 0.5, 1.0)),
            quad_xz(Vec3::new(-2.0, 0.0, -2.0), Vec3::new(2.0, 0.0, 2.0), -0.1).to_vec(),
        ];
        let bvh = CompressedBvh::two_level(&groups).unwrap();
        assert_eq!(bvh.node_count(), 4);

        let mut checked = 0;
        for i in 0..9 {
            for j in 0..9 {
                let origin = Vec3::new(-1.2 + i as f32 * 0.3, 2.0, -1.2 + j as f32 * 0.3);
                for dir in [
                    Vec3::new(0.0, -1.0, 0.0),
                    Vec3::new(0.3, -1.0, 0.2).normalize(),
                    Vec3::new(-0.4, -1.0, -0.1).normalize(),
                ] {
                    let ray = Ray::new(origin, dir, 0.0, 10.0);
                    let fast = bvh.intersect(ray);
                    let slow = bvh.intersect_brute_force(ray);
                    match (fast, slow) {
                        (Some(a), Some(b)) => {
                            assert!((a.t - b.t).abs() < 1e-5, "t {} vs {}", a.t, b.t);
                            checked += 1;
                        }
                        (None, None) => {}
                        other => panic!("mismatch for {:?} {:?}: {:?}", origin, dir, other),
                    }
                }
            }
        }
        assert!(checked > 100);
    }
}
