//! Uniform spatial hash grid.
//!
//! Each particle is mapped to a clamped integer cell, and claims a unique slot
//! within that cell by atomically incrementing the cell's counter. The counters
//! are cleared at the start of every build, so `index_in_cell` values of one
//! cell are exactly `0..count`.

use std::sync::atomic::{AtomicU32, Ordering};

use glam::{IVec3, Vec3, Vec4};
use rayon::prelude::*;

use crate::params::SimParams;

/// Cell mapping derived from a fixed-up parameter block.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridView {
    pub min: Vec3,
    pub cell_size: Vec3,
    pub div: IVec3,
}

impl GridView {
    pub fn from_params(params: &SimParams) -> Self {
        Self {
            min: params.grid_min(),
            cell_size: params.cell_size(),
            div: params.grid_div(),
        }
    }

    /// Integer cell of a position, clamped into `[0, div - 1]`.
    ///
    /// Positions outside the hashed bounds land in the nearest border cell.
    #[inline]
    pub fn cell_of(&self, position: Vec3) -> IVec3 {
        ((position - self.min) / self.cell_size)
            .floor()
            .as_ivec3()
            .clamp(IVec3::ZERO, self.div - IVec3::ONE)
    }

    /// Linear cell index, x fastest.
    #[inline]
    pub fn hash(&self, cell: IVec3) -> u32 {
        (cell.x + self.div.x * (cell.y + self.div.y * cell.z)) as u32
    }

    pub fn in_bounds(&self, cell: IVec3) -> bool {
        cell.cmpge(IVec3::ZERO).all() && cell.cmplt(self.div).all()
    }

    pub fn num_cells(&self) -> u32 {
        (self.div.x * self.div.y * self.div.z) as u32
    }

    /// In-bounds cells of the 3x3x3 block around `cell`, including itself.
    pub fn neighbourhood(&self, cell: IVec3) -> impl Iterator<Item = u32> + '_ {
        (-1..=1).flat_map(move |dz| {
            (-1..=1).flat_map(move |dy| {
                (-1..=1).filter_map(move |dx| {
                    let n = cell + IVec3::new(dx, dy, dz);
                    self.in_bounds(n).then(|| self.hash(n))
                })
            })
        })
    }
}

/// Per-particle cell assignment plus per-cell counters.
pub struct HashGrid {
    counts: Vec<AtomicU32>,
    pub hashes: Vec<u32>,
    pub index_in_cell: Vec<u32>,
}

impl HashGrid {
    /// Allocate counters for `capacity` cells and slots for `num_particles`.
    pub fn new(capacity: u32, num_particles: usize) -> Self {
        Self {
            counts: (0..capacity).map(|_| AtomicU32::new(0)).collect(),
            hashes: vec![0; num_particles],
            index_in_cell: vec![0; num_particles],
        }
    }

    pub fn capacity(&self) -> usize {
        self.counts.len()
    }

    fn clear_counts(&mut self) {
        self.counts
            .par_iter_mut()
            .for_each(|count| *count.get_mut() = 0);
    }

    /// Clear every counter, then hash all particles.
    ///
    /// The slot a particle receives inside its cell depends on scheduling; only
    /// the set of slots per cell is deterministic.
    pub fn build(&mut self, positions: &[Vec4], view: &GridView) {
        self.clear_counts();
        let counts = &self.counts;
        positions
            .par_iter()
            .zip(self.hashes.par_iter_mut())
            .zip(self.index_in_cell.par_iter_mut())
            .for_each(|((position, hash), slot)| {
                let cell = view.cell_of(position.truncate());
                *hash = view.hash(cell);
                *slot = counts[*hash as usize].fetch_add(1, Ordering::Relaxed);
            });
    }

    /// Snapshot of the counters, ready to be scanned in place.
    pub fn counts(&self) -> Vec<u32> {
        self.counts
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .collect()
    }
}
