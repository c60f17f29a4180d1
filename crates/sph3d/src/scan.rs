//! Multi-level block scan.
//!
//! CPU emulation of the device prefix sum, block for block:
//!
//! 1. Upward: each 128-element block is scanned inclusively by 64 lanes with a
//!    doubling pass. Block `b`'s total is written to `level[i + 1][b]` when that
//!    slot exists. The last level fits in one block and is scanned on its own.
//! 2. Downward: from the second-to-last level down, every element from the
//!    second block onwards adds the scanned total of all preceding blocks,
//!    `level[i + 1][block - 1]`.
//!
//! Both passes stop at the level's live length, carried in the `w` slot of its
//! upward dispatch entry. Nothing past it is read or written, so values left
//! from a larger grid on an earlier tick never feed back into the scan.
//!
//! The result is an inclusive scan. Cell `h` owns the sorted range
//! `[cell_start(h), prefix[h])`.

use crate::constants::{BLOCK_SIZE, WORKGROUP_SIZE};
use crate::params::{group_count, live_count, ScanDispatch, ScanLevels};

/// Level buffers for one scan, sized from a fixed capacity.
#[derive(Clone, Debug)]
pub struct BlockScan {
    levels: Vec<Vec<u32>>,
}

impl BlockScan {
    pub fn new(levels: &ScanLevels) -> Self {
        Self {
            levels: levels
                .sizes()
                .iter()
                .map(|&len| vec![0; len as usize])
                .collect(),
        }
    }

    pub fn with_capacity(capacity: u32) -> Self {
        Self::new(&ScanLevels::for_capacity(capacity))
    }

    /// Level 0: per-cell counts on input, inclusive prefix on output.
    pub fn data(&self) -> &[u32] {
        &self.levels[0]
    }

    pub fn data_mut(&mut self) -> &mut [u32] {
        &mut self.levels[0]
    }

    /// Scan the first live elements of level 0 using the given dispatch sizes.
    pub fn run(&mut self, dispatch: &ScanDispatch) {
        let last = self.levels.len() - 1;
        for level in 0..last {
            let (lower, upper) = self.levels.split_at_mut(level + 1);
            scan_blocks(
                &mut lower[level],
                Some(&mut upper[0]),
                group_count(&dispatch.up[level]),
                live_count(&dispatch.up[level]),
            );
        }
        if self.levels[last].len() > 1 {
            scan_blocks(
                &mut self.levels[last],
                None,
                group_count(&dispatch.up[last]),
                live_count(&dispatch.up[last]),
            );
        }
        for level in (0..last).rev() {
            let (lower, upper) = self.levels.split_at_mut(level + 1);
            add_block_offsets(
                &mut lower[level],
                &upper[0],
                group_count(&dispatch.down[level]),
                live_count(&dispatch.up[level]),
            );
        }
    }

    /// Scan `counts` from scratch; level buffers are resized to fit.
    pub fn scan(&mut self, counts: &[u32]) -> &[u32] {
        let capacity = counts.len().max(1) as u32;
        if self.levels[0].len() != capacity as usize {
            *self = Self::with_capacity(capacity);
        }
        self.levels[0][..counts.len()].copy_from_slice(counts);
        self.run(&ScanDispatch::for_count(counts.len() as u32));
        &self.levels[0][..counts.len()]
    }
}

/// Start of cell `hash`'s range in an inclusive prefix.
#[inline]
pub fn cell_start(prefix: &[u32], hash: u32) -> u32 {
    if hash == 0 {
        0
    } else {
        prefix[hash as usize - 1]
    }
}

/// One workgroup-emulating upward pass over `groups` blocks of the first `live`
/// elements. Only blocks followed by another live block publish their total.
fn scan_blocks(data: &mut [u32], mut block_sums: Option<&mut Vec<u32>>, groups: u32, live: u32) {
    let block = BLOCK_SIZE as usize;
    let lanes = WORKGROUP_SIZE as usize;
    let count = (live as usize).min(data.len());
    let mut shared = [0u32; BLOCK_SIZE as usize];

    for group in 0..groups as usize {
        let base = group * block;
        if base >= count {
            break;
        }
        let end = (base + block).min(count);
        shared.fill(0);
        shared[..end - base].copy_from_slice(&data[base..end]);

        // Lanes of one step write disjoint upper halves and read only the last
        // element of the matching lower half, so sequential order is exact.
        let mut half = 1;
        while half <= lanes {
            let size = 2 * half;
            for lane in 0..lanes {
                let segment = lane / half;
                let target = segment * size + half + lane % half;
                if base + target < count {
                    shared[target] += shared[segment * size + half - 1];
                }
            }
            half *= 2;
        }

        data[base..end].copy_from_slice(&shared[..end - base]);
        if let Some(sums) = block_sums.as_deref_mut() {
            if base + block < count && group < sums.len() {
                sums[group] = shared[block - 1];
            }
        }
    }
}

/// Downward pass: workgroup `g` covers 64-element chunk `g + 2` and adds the
/// scanned total of the blocks before it, up to the first `live` elements.
fn add_block_offsets(data: &mut [u32], block_sums: &[u32], groups: u32, live: u32) {
    let lanes = WORKGROUP_SIZE as usize;
    let count = (live as usize).min(data.len());
    for group in 0..groups as usize {
        let chunk = group + 2;
        let start = chunk * lanes;
        if start >= count {
            break;
        }
        let Some(&offset) = block_sums.get(group / 2) else {
            break;
        };
        let end = (start + lanes).min(count);
        for value in &mut data[start..end] {
            *value += offset;
        }
    }
}

/// Straightforward exclusive scan used as ground truth.
pub fn exclusive_scan(values: &[u32]) -> Vec<u32> {
    let mut acc = 0u32;
    values
        .iter()
        .map(|&v| {
            let start = acc;
            acc += v;
            start
        })
        .collect()
}
