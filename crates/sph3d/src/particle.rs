//! Render-order particle storage.
//!
//! Positions carry `w = 1` and velocities `w = 0` so both upload to the device
//! as `vec4<f32>` without repacking. Order is stable for the lifetime of a
//! simulation; sorting happens on separate arrays.

use glam::{Vec3, Vec4};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Particles {
    pub positions: Vec<Vec4>,
    pub velocities: Vec<Vec4>,
}

impl Particles {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            positions: Vec::with_capacity(capacity),
            velocities: Vec::with_capacity(capacity),
        }
    }

    pub fn from_positions(positions: impl IntoIterator<Item = Vec3>) -> Self {
        let positions: Vec<Vec4> = positions.into_iter().map(|p| p.extend(1.0)).collect();
        let velocities = vec![Vec4::ZERO; positions.len()];
        Self {
            positions,
            velocities,
        }
    }

    /// Pack `count` particles in layers of `columns x columns`, one diameter
    /// apart, starting at `origin` (the corner of the first particle's cell).
    pub fn block(count: usize, radius: f32, origin: Vec3, columns: usize) -> Self {
        let columns = columns.max(1);
        let spacing = 2.0 * radius;
        let layer = columns * columns;
        Self::from_positions((0..count).map(|i| {
            let y = i / layer;
            let x = (i % layer) % columns;
            let z = (i % layer) / columns;
            origin + (Vec3::new(x as f32, y as f32, z as f32) + 0.5) * spacing
        }))
    }

    /// Dense block filling the xz extent of a box, stacked upwards from `base_y`.
    pub fn dam_block(count: usize, radius: f32, global_min: Vec3, global_max: Vec3, base_y: f32) -> Self {
        let width = (global_max.x - global_min.x).min(global_max.z - global_min.z);
        let columns = (width / (2.0 * radius)).floor().max(1.0) as usize;
        Self::block(
            count,
            radius,
            Vec3::new(global_min.x, base_y, global_min.z),
            columns,
        )
    }

    pub fn push(&mut self, position: Vec3, velocity: Vec3) {
        self.positions.push(position.extend(1.0));
        self.velocities.push(velocity.extend(0.0));
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn position(&self, index: usize) -> Vec3 {
        self.positions[index].truncate()
    }

    pub fn velocity(&self, index: usize) -> Vec3 {
        self.velocities[index].truncate()
    }
}
