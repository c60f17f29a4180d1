//! Tree reduction of particle extents.
//!
//! Every level folds blocks of 128 elements into one, so level sizes shrink as
//! `ceil(n / 128)` until a single element is left. The device runs one dispatch
//! per level; this is its CPU mirror.

use glam::{Vec3, Vec4};
use rayon::prelude::*;

use crate::constants::BLOCK_SIZE;

/// Element counts of every reduction level after the input, ending at 1.
pub fn reduction_levels(count: usize) -> Vec<usize> {
    let mut levels = Vec::new();
    let mut len = count;
    while len > 1 {
        len = len.div_ceil(BLOCK_SIZE as usize);
        levels.push(len);
    }
    levels
}

fn reduce_with(positions: &[Vec4], fold: impl Fn(Vec4, Vec4) -> Vec4 + Sync) -> Vec4 {
    let mut level: Vec<Vec4> = positions.to_vec();
    while level.len() > 1 {
        level = level
            .par_chunks(BLOCK_SIZE as usize)
            .map(|block| block[1..].iter().fold(block[0], |acc, &p| fold(acc, p)))
            .collect();
    }
    level.first().copied().unwrap_or(Vec4::ZERO)
}

/// Component-wise minimum and maximum of all positions.
///
/// Returns a zero-size box at the origin for an empty slice.
pub fn reduce_bounds(positions: &[Vec4]) -> (Vec3, Vec3) {
    let min = reduce_with(positions, Vec4::min);
    let max = reduce_with(positions, Vec4::max);
    (min.truncate(), max.truncate())
}
