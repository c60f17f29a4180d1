//! Scatter particles into cell-sorted order.
//!
//! `dest = cell_start(hash) + index_in_cell` is a bijection onto `0..N` once
//! the counts have been scanned, so every sorted slot is written exactly once.
//! `original_index` is the inverse map used to write integration results back
//! to render order.

use glam::Vec4;

use crate::grid::HashGrid;
use crate::scan::cell_start;

/// Cell-sorted copies of the particle state, rebuilt every tick.
#[derive(Clone, Debug, Default)]
pub struct SortedParticles {
    pub positions: Vec<Vec4>,
    pub velocities: Vec<Vec4>,
    pub densities: Vec<f32>,
    /// Sorted slot to render-order index.
    pub original_index: Vec<u32>,
}

impl SortedParticles {
    pub fn new(num_particles: usize) -> Self {
        Self {
            positions: vec![Vec4::ZERO; num_particles],
            velocities: vec![Vec4::ZERO; num_particles],
            densities: vec![0.0; num_particles],
            original_index: vec![0; num_particles],
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Reorder `positions` / `velocities` using a built grid and its scanned counts.
    pub fn scatter(&mut self, positions: &[Vec4], velocities: &[Vec4], grid: &HashGrid, prefix: &[u32]) {
        for (index, (&hash, &slot)) in grid.hashes.iter().zip(&grid.index_in_cell).enumerate() {
            let dest = (cell_start(prefix, hash) + slot) as usize;
            self.positions[dest] = positions[index];
            self.velocities[dest] = velocities[index];
            self.original_index[dest] = index as u32;
        }
    }
}
