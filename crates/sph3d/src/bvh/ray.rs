//! Rays, hits and the Moller-Trumbore triangle test.

use glam::Vec3;

use super::node::BvhTriangle;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    pub tmin: f32,
    pub tmax: f32,
}

impl Ray {
    pub fn new(origin: Vec3, direction: Vec3, tmin: f32, tmax: f32) -> Self {
        Self {
            origin,
            direction,
            tmin,
            tmax,
        }
    }
}

/// Parametric distance and barycentrics of a triangle hit.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriangleHit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
}

/// Nearest hit of a BVH query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intersection {
    /// Triangle in BVH order.
    pub triangle: u32,
    /// Triangle in the source mesh's order, via the index remap.
    pub original_triangle: u32,
    pub t: f32,
    pub u: f32,
    pub v: f32,
}

/// Hit strictly inside `(tmin, tmax)`, or `None`.
#[inline]
pub fn intersect_triangle(ray: &Ray, triangle: &BvhTriangle) -> Option<TriangleHit> {
    let edge1 = triangle.edge1();
    let edge2 = triangle.edge2();
    let h = ray.direction.cross(edge2);
    let a = edge1.dot(h);
    if a == 0.0 {
        return None;
    }
    let f = 1.0 / a;
    let s = ray.origin - triangle.vertex0();
    let u = f * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(edge1);
    let v = f * ray.direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = f * edge2.dot(q);
    (t > ray.tmin && t < ray.tmax).then_some(TriangleHit { t, u, v })
}
