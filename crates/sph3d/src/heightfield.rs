//! Top-down minimum-depth raster used as a terrain boundary.
//!
//! The raster covers the xz rectangle of `bounds_min..bounds_max`; a depth of
//! 0 maps to `bounds_min.y` and 1 to `bounds_max.y`. Row `j` runs along +z.

use glam::{Vec2, Vec3, Vec3Swizzles};

#[derive(Clone, Debug, PartialEq)]
pub struct HeightField {
    pub width: u32,
    pub height: u32,
    /// Normalized depths, row-major.
    pub depths: Vec<f32>,
    pub bounds_min: Vec3,
    pub bounds_max: Vec3,
}

impl HeightField {
    /// Raster filled by evaluating a world-space surface height at texel centres.
    pub fn from_fn(
        width: u32,
        height: u32,
        bounds_min: Vec3,
        bounds_max: Vec3,
        surface: impl Fn(Vec2) -> f32,
    ) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let span = bounds_max.y - bounds_min.y;
        let mut depths = Vec::with_capacity((width * height) as usize);
        for j in 0..height {
            for i in 0..width {
                let uv = Vec2::new((i as f32 + 0.5) / width as f32, (j as f32 + 0.5) / height as f32);
                let xz = bounds_min.xz() + uv * (bounds_max.xz() - bounds_min.xz());
                depths.push(((surface(xz) - bounds_min.y) / span).clamp(0.0, 1.0));
            }
        }
        Self {
            width,
            height,
            depths,
            bounds_min,
            bounds_max,
        }
    }

    /// Flat surface at world height `y`.
    pub fn flat(width: u32, height: u32, bounds_min: Vec3, bounds_max: Vec3, y: f32) -> Self {
        Self::from_fn(width, height, bounds_min, bounds_max, |_| y)
    }

    fn texel(&self, i: i32, j: i32) -> f32 {
        let i = i.clamp(0, self.width as i32 - 1) as usize;
        let j = j.clamp(0, self.height as i32 - 1) as usize;
        self.depths[j * self.width as usize + i]
    }

    /// Bilinear, clamp-to-edge sample of the normalized depth at a world xz.
    pub fn sample(&self, xz: Vec2) -> f32 {
        let uv = (xz - self.bounds_min.xz()) / (self.bounds_max.xz() - self.bounds_min.xz());
        let st = uv * Vec2::new(self.width as f32, self.height as f32) - 0.5;
        let base = st.floor();
        let f = st - base;
        let (i, j) = (base.x as i32, base.y as i32);
        let top = self.texel(i, j) * (1.0 - f.x) + self.texel(i + 1, j) * f.x;
        let bottom = self.texel(i, j + 1) * (1.0 - f.x) + self.texel(i + 1, j + 1) * f.x;
        top * (1.0 - f.y) + bottom * f.y
    }

    /// World-space surface point above or below `xz`.
    pub fn surface_point(&self, xz: Vec2) -> Vec3 {
        let y = self.sample(xz) * (self.bounds_max.y - self.bounds_min.y) + self.bounds_min.y;
        Vec3::new(xz.x, y, xz.y)
    }

    /// Surface normal from finite differences at spacing `r`, taking the smaller
    /// of the one-sided differences on each axis so a step edge does not tilt it.
    pub fn normal_at(&self, xz: Vec2, r: f32) -> Vec3 {
        let p = self.surface_point(xz);
        let right = self.surface_point(xz + Vec2::new(r, 0.0));
        let left = self.surface_point(xz - Vec2::new(r, 0.0));
        let back = self.surface_point(xz - Vec2::new(0.0, r));
        let front = self.surface_point(xz + Vec2::new(0.0, r));
        let dx = min_difference(p, right, left);
        let dz = min_difference(p, back, front);
        dx.cross(dz).try_normalize().unwrap_or(Vec3::Y)
    }
}

/// The shorter of `a - p` and `p - b`.
fn min_difference(p: Vec3, a: Vec3, b: Vec3) -> Vec3 {
    let forward = a - p;
    let backward = p - b;
    if forward.length_squared() < backward.length_squared() {
        forward
    } else {
        backward
    }
}
