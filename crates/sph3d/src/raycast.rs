//! Raycast queries against BVH-housed meshes.
//!
//! Two query shapes share the traversal:
//! - per particle: the motion vector of one step, accumulated over several
//!   meshes into a [`CollisionTarget`] that keeps the nearest hit;
//! - per pixel: camera rays into a [`DepthTarget`].
//!
//! Rays are transformed into mesh space with the inverse model matrix. The ray
//! parameter is unaffected by an affine transform, so hit distances stay in
//! world units.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, UVec2, Vec2, Vec3, Vec4, Vec4Swizzles};
use rayon::prelude::*;

use crate::bvh::{CompressedBvh, Ray};
use crate::constants::DEPTH_CLEAR;
use crate::params::SimParams;

// =============================================================================
// UNIFORMS
// =============================================================================

/// Placement of a mesh in the world.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct ModelTransform {
    pub model: [[f32; 4]; 4],
    /// Inverse transpose of `model`, for normals.
    pub normal: [[f32; 4]; 4],
    pub inverse: [[f32; 4]; 4],
}

impl ModelTransform {
    pub fn new(model: Mat4) -> Self {
        let inverse = model.inverse();
        Self {
            model: model.to_cols_array_2d(),
            normal: inverse.transpose().to_cols_array_2d(),
            inverse: inverse.to_cols_array_2d(),
        }
    }

    pub fn identity() -> Self {
        Self::new(Mat4::IDENTITY)
    }

    pub fn inverse(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.inverse)
    }

    pub fn normal_matrix(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.normal)
    }

    /// World-space ray expressed in mesh space.
    pub fn to_mesh_space(&self, origin: Vec3, direction: Vec3, tmin: f32, tmax: f32) -> Ray {
        let inverse = self.inverse();
        Ray::new(
            inverse.transform_point3(origin),
            inverse.transform_vector3(direction),
            tmin,
            tmax,
        )
    }
}

impl Default for ModelTransform {
    fn default() -> Self {
        Self::identity()
    }
}

/// Camera description for per-pixel depth rays.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct CameraRays {
    pub inv_projection: [[f32; 4]; 4],
    pub inv_view: [[f32; 4]; 4],
    /// Width, height, unused, unused.
    pub size: [u32; 4],
}

impl CameraRays {
    pub fn new(projection: Mat4, view: Mat4, width: u32, height: u32) -> Self {
        Self {
            inv_projection: projection.inverse().to_cols_array_2d(),
            inv_view: view.inverse().to_cols_array_2d(),
            size: [width, height, 0, 0],
        }
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.size[0], self.size[1])
    }

    /// World-space ray through the centre of pixel `(x, y)`, top row first.
    ///
    /// `tmin` / `tmax` are the distances from the eye to the near and far
    /// planes along the ray.
    pub fn pixel_ray(&self, x: u32, y: u32) -> (Vec3, Vec3, f32, f32) {
        let inv_projection = Mat4::from_cols_array_2d(&self.inv_projection);
        let inv_view = Mat4::from_cols_array_2d(&self.inv_view);
        let size = self.size().as_vec2();
        let uv = (Vec2::new(x as f32, y as f32) + 0.5) / size;
        let ndc = Vec2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);

        let unproject = |depth: f32| {
            let v: Vec4 = inv_projection * Vec4::new(ndc.x, ndc.y, depth, 1.0);
            v.xyz() / v.w
        };
        let near = unproject(0.0);
        let far = unproject(1.0);

        let origin = inv_view.transform_point3(Vec3::ZERO);
        let direction = inv_view.transform_vector3(near.normalize());
        (origin, direction, near.length(), far.length())
    }
}

// =============================================================================
// PACKED NORMALS
// =============================================================================

/// Pack a unit normal into three bytes, x lowest.
pub fn pack_normal(n: Vec3) -> u32 {
    let q = ((n.clamp(Vec3::NEG_ONE, Vec3::ONE) + 1.0) * 127.5).floor();
    let q = q.min(Vec3::splat(255.0)).as_uvec3();
    q.x | (q.y << 8) | (q.z << 16)
}

/// Inverse of [`pack_normal`], renormalized. Zero decodes to a valid direction.
pub fn unpack_normal(packed: u32) -> Vec3 {
    let byte = |shift: u32| ((packed >> shift) & 0xff) as f32;
    let n = (Vec3::new(byte(0), byte(8), byte(16)) + 0.5) / 127.5 - 1.0;
    n.try_normalize().unwrap_or(Vec3::Y)
}

// =============================================================================
// TARGETS
// =============================================================================

/// Nearest hit distance and packed normal per sorted particle.
#[derive(Clone, Debug, PartialEq)]
pub struct CollisionTarget {
    pub depth: Vec<f32>,
    pub normals: Vec<u32>,
}

impl CollisionTarget {
    pub fn new(num_particles: usize) -> Self {
        Self {
            depth: vec![DEPTH_CLEAR; num_particles],
            normals: vec![0; num_particles],
        }
    }

    /// Reset to "no hit" before the first mesh of a tick.
    pub fn clear(&mut self) {
        self.depth.fill(DEPTH_CLEAR);
        self.normals.fill(0);
    }

    pub fn has_hit(&self, index: usize) -> bool {
        self.depth[index] < DEPTH_CLEAR
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DepthTarget {
    pub width: u32,
    pub height: u32,
    pub depth: Vec<f32>,
}

impl DepthTarget {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            depth: vec![DEPTH_CLEAR; (width * height) as usize],
        }
    }

    pub fn clear(&mut self) {
        self.depth.fill(DEPTH_CLEAR);
    }

    pub fn at(&self, x: u32, y: u32) -> f32 {
        self.depth[(y * self.width + x) as usize]
    }
}

// =============================================================================
// QUERIES
// =============================================================================

/// Cast every sorted particle's next step against one mesh, keeping hits
/// nearer than what the target already holds.
pub fn collide_particles(
    bvh: &CompressedBvh,
    transform: &ModelTransform,
    params: &SimParams,
    positions: &[Vec4],
    next_velocities: &[Vec4],
    target: &mut CollisionTarget,
) {
    let dt = params.time_step;
    let normal_matrix = transform.normal_matrix();

    target
        .depth
        .par_iter_mut()
        .zip(target.normals.par_iter_mut())
        .enumerate()
        .for_each(|(i, (depth, normal))| {
            let step = next_velocities[i].truncate() * dt;
            let distance = step.length();
            let Some(direction) = step.try_normalize() else {
                return;
            };
            let tmax = (*depth).min(distance + params.ray_tolerance);
            let ray = transform.to_mesh_space(positions[i].truncate(), direction, 0.0, tmax);
            if let Some(hit) = bvh.intersect(ray) {
                let triangle = &bvh.triangles[hit.triangle as usize];
                let world_normal = normal_matrix
                    .transform_vector3(triangle.geometric_normal())
                    .try_normalize()
                    .unwrap_or(Vec3::Y);
                *depth = hit.t.max(0.0);
                *normal = pack_normal(world_normal);
            }
        });
}

/// Nearest-hit distance per pixel, min-combined with what the target holds.
pub fn render_depth(
    bvh: &CompressedBvh,
    transform: &ModelTransform,
    camera: &CameraRays,
    target: &mut DepthTarget,
) {
    let width = target.width;
    let height = target.height;
    if camera.size() != UVec2::new(width, height) {
        log::warn!(
            "camera size {:?} differs from depth target {}x{}",
            camera.size(),
            width,
            height
        );
    }
    target
        .depth
        .par_chunks_mut(width as usize)
        .enumerate()
        .take(height as usize)
        .for_each(|(y, row)| {
            for (x, depth) in row.iter_mut().enumerate() {
                let (origin, direction, tmin, tmax) = camera.pixel_ray(x as u32, y as u32);
                let ray = transform.to_mesh_space(origin, direction, tmin, tmax.min(*depth));
                if let Some(hit) = bvh.intersect(ray) {
                    *depth = hit.t;
                }
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_packing_is_close() {
        for n in [
            Vec3::X,
            Vec3::NEG_Y,
            Vec3::new(0.3, -0.5, 0.8).normalize(),
            Vec3::new(-0.7, 0.1, -0.7).normalize(),
        ] {
            let back = unpack_normal(pack_normal(n));
            assert!(back.dot(n) > 0.999, "{:?} -> {:?}", n, back);
        }
        assert!(pack_normal(Vec3::ONE) < 1 << 24);
    }

    #[test]
    fn test_camera_centre_ray_looks_forward() {
        let projection = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0);
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let camera = CameraRays::new(projection, view, 64, 64);
        let (origin, dir, tmin, tmax) = camera.pixel_ray(32, 32);
        assert!((origin - Vec3::new(0.0, 0.0, 5.0)).length() < 1e-4);
        assert!(dir.dot(Vec3::NEG_Z) > 0.999);
        assert!((tmin - 0.1).abs() < 1e-3);
        assert!(tmax > 99.0);
    }

    #[test]
    fn test_transform_round_trip() {
        let model = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            glam::Quat::from_rotation_y(0.7),
            Vec3::new(1.0, 2.0, 3.0),
        );
        let transform = ModelTransform::new(model);
        let ray = transform.to_mesh_space(Vec3::new(1.0, 4.0, 3.0), Vec3::NEG_Y, 0.0, 1.0);
        assert!((model.transform_point3(ray.origin) - Vec3::new(1.0, 4.0, 3.0)).length() < 1e-5);
        assert!((model.transform_vector3(ray.direction) - Vec3::NEG_Y).length() < 1e-5);
    }

    #[test]
    fn test_cleared_target_reports_no_hits() {
        let mut target = CollisionTarget::new(4);
        target.depth[2] = 0.5;
        target.clear();
        assert!((0..4).all(|i| !target.has_hit(i)));
    }
}
