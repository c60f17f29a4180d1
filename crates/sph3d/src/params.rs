//! The simulation parameter block shared with the device.
//!
//! `SimParams` is uploaded once per tick and then partially rewritten on the
//! device: the bounds reduction copies the particle extents into `grid_min` /
//! `grid_max`, and the fix-up kernel derives the grid division, cell size, live
//! cell count and the scan's indirect dispatch arguments from them.
//! [`SimParams::fix_up_grid`] is the CPU mirror of that kernel.
//!
//! The WGSL declaration in `sph_gpu`'s `common.wgsl` must match this layout.

use bytemuck::{Pod, Zeroable};
use glam::{IVec3, Vec3};

use crate::config::SphConfig;
use crate::constants::{BLOCK_SIZE, MAX_SCAN_LEVELS, WORKGROUP_SIZE};

/// Indirect dispatch arguments `(x, y, z)` padded to a `vec4<u32>`.
///
/// Indirect dispatch reads only the first three words. In the upward scan
/// table the fourth holds the level's live element count.
pub type DispatchArgs = [u32; 4];

const IDLE_DISPATCH: DispatchArgs = [0, 1, 1, 0];

/// Largest workgroup count of one dispatch dimension.
pub const MAX_DISPATCH_DIMENSION: u32 = 65_535;

/// Dispatch arguments covering `groups` workgroups, folded into a second
/// dimension once the first is full. Kernels flatten the workgroup id, so the
/// folded form may run up to one row of extra groups past `groups`.
pub fn dispatch_args(groups: u32) -> DispatchArgs {
    if groups <= MAX_DISPATCH_DIMENSION {
        [groups, 1, 1, 0]
    } else {
        [MAX_DISPATCH_DIMENSION, groups.div_ceil(MAX_DISPATCH_DIMENSION), 1, 0]
    }
}

/// Total workgroups launched by `args`.
pub fn group_count(args: &DispatchArgs) -> u32 {
    args[0] * args[1] * args[2]
}

/// Live element count of a scan level, from its upward dispatch entry.
#[inline]
pub fn live_count(args: &DispatchArgs) -> u32 {
    args[3]
}

// =============================================================================
// PARAMETER BLOCK
// =============================================================================

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct SimParams {
    pub global_min: [f32; 4],
    pub global_max: [f32; 4],
    pub grid_min: [f32; 4],
    pub grid_max: [f32; 4],
    pub grid_div: [i32; 4],
    pub cell_size: [f32; 4],

    pub num_particles: u32,
    pub particle_radius: f32,
    pub num_grid_cells: u32,
    pub grid_capacity: u32,

    pub smoothing_radius: f32,
    pub particle_mass: f32,
    pub time_step: f32,
    pub gas_constant: f32,

    pub viscosity: f32,
    pub gravity: f32,
    pub surface_tension: f32,
    pub surface_threshold: f32,

    pub rest_density: f32,
    pub wall_restitution: f32,
    pub free_fall_restitution: f32,
    pub collision_tolerance: f32,

    pub ray_tolerance: f32,
    pub grid_resolution: u32,
    pub _pad0: u32,
    pub _pad1: u32,

    /// Workgroups for the upward scan pass of each level.
    pub scan_up: [DispatchArgs; MAX_SCAN_LEVELS],
    /// Workgroups for the downward offset pass of each level.
    pub scan_down: [DispatchArgs; MAX_SCAN_LEVELS],
}

impl SimParams {
    /// Byte offset of `grid_min`, the destination of the min reduction.
    pub const GRID_MIN_OFFSET: u64 = std::mem::offset_of!(SimParams, grid_min) as u64;
    /// Byte offset of `grid_max`, the destination of the max reduction.
    pub const GRID_MAX_OFFSET: u64 = std::mem::offset_of!(SimParams, grid_max) as u64;
    pub const SCAN_UP_OFFSET: u64 = std::mem::offset_of!(SimParams, scan_up) as u64;
    pub const SCAN_DOWN_OFFSET: u64 = std::mem::offset_of!(SimParams, scan_down) as u64;

    pub fn new(config: &SphConfig, global_min: Vec3, global_max: Vec3) -> Self {
        let mut params = Self {
            num_particles: config.particle_count,
            particle_radius: config.particle_radius(),
            grid_capacity: config.grid_capacity(),
            smoothing_radius: config.smoothing_radius(),
            particle_mass: config.particle_mass(),
            time_step: config.time_step,
            gas_constant: config.gas_constant,
            viscosity: config.viscosity,
            gravity: config.gravity,
            surface_tension: config.surface_tension,
            surface_threshold: config.surface_threshold,
            rest_density: config.rest_density,
            wall_restitution: config.wall_restitution,
            free_fall_restitution: config.free_fall_restitution,
            collision_tolerance: config.collision_tolerance,
            ray_tolerance: config.ray_tolerance,
            grid_resolution: config.grid_resolution,
            ..Self::zeroed()
        };
        params.begin_frame(global_min, global_max);
        params
    }

    /// Host-side rewrite at the start of a tick.
    ///
    /// Grid bounds are reset to an inverted box; the bounds reduction fills them
    /// in before the fix-up runs.
    pub fn begin_frame(&mut self, global_min: Vec3, global_max: Vec3) {
        self.global_min = global_min.extend(0.0).to_array();
        self.global_max = global_max.extend(0.0).to_array();
        self.grid_min = [f32::MAX, f32::MAX, f32::MAX, 0.0];
        self.grid_max = [-f32::MAX, -f32::MAX, -f32::MAX, 0.0];
        self.scan_up = [IDLE_DISPATCH; MAX_SCAN_LEVELS];
        self.scan_down = [IDLE_DISPATCH; MAX_SCAN_LEVELS];
    }

    /// Store reduced particle extents as the raw grid bounds.
    pub fn set_particle_bounds(&mut self, min: Vec3, max: Vec3) {
        self.grid_min = min.extend(0.0).to_array();
        self.grid_max = max.extend(0.0).to_array();
    }

    /// Derive grid division, cell size and scan dispatch sizes from the raw
    /// particle extents in `grid_min` / `grid_max`.
    ///
    /// The upper bound is grown by one particle diameter. Cells are never smaller
    /// than the smoothing radius, so the 27-cell neighbourhood covers every pair
    /// within H, and the division is clamped to the grid resolution so the live
    /// cell count fits the count buffer. Afterwards
    /// `grid_max == grid_min + grid_div * cell_size` holds on every axis.
    pub fn fix_up_grid(&mut self) {
        let h = self.smoothing_radius;
        let resolution = self.grid_resolution as i32;

        let grid_min = self.grid_min();
        let raw_max = self.grid_max() + Vec3::splat(2.0 * self.particle_radius);
        let extent = (raw_max - grid_min).max(Vec3::splat(h));
        let div = (extent / h)
            .ceil()
            .as_ivec3()
            .clamp(IVec3::ONE, IVec3::splat(resolution));
        let cell_size = (extent / div.as_vec3()).max(Vec3::splat(h));

        self.grid_max = (grid_min + div.as_vec3() * cell_size).extend(0.0).to_array();
        self.grid_div = div.extend(0).to_array();
        self.cell_size = cell_size.extend(0.0).to_array();
        self.num_grid_cells = (div.x * div.y * div.z) as u32;

        let dispatch = ScanDispatch::for_count(self.num_grid_cells);
        self.scan_up = dispatch.up;
        self.scan_down = dispatch.down;
    }

    pub fn global_min(&self) -> Vec3 {
        Vec3::from_slice(&self.global_min[..3])
    }

    pub fn global_max(&self) -> Vec3 {
        Vec3::from_slice(&self.global_max[..3])
    }

    pub fn grid_min(&self) -> Vec3 {
        Vec3::from_slice(&self.grid_min[..3])
    }

    pub fn grid_max(&self) -> Vec3 {
        Vec3::from_slice(&self.grid_max[..3])
    }

    pub fn grid_div(&self) -> IVec3 {
        IVec3::from_slice(&self.grid_div[..3])
    }

    pub fn cell_size(&self) -> Vec3 {
        Vec3::from_slice(&self.cell_size[..3])
    }
}

// =============================================================================
// SCAN LEVELS
// =============================================================================

/// Buffer sizes of the multi-level scan for a fixed cell capacity.
///
/// Level 0 holds the per-cell counts. Each further level holds the block totals
/// of the previous one, except the last block's, which no later element needs:
/// `next = ceil(len / 128) - 1`. Levels stop once that reaches zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScanLevels {
    sizes: Vec<u32>,
}

impl ScanLevels {
    pub fn for_capacity(capacity: u32) -> Self {
        let mut sizes = vec![capacity.max(1)];
        let mut len = capacity.max(1);
        loop {
            let next = len.div_ceil(BLOCK_SIZE).saturating_sub(1);
            if next == 0 {
                break;
            }
            sizes.push(next);
            len = next;
        }
        Self { sizes }
    }

    pub fn sizes(&self) -> &[u32] {
        &self.sizes
    }

    pub fn len(&self) -> usize {
        self.sizes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sizes.is_empty()
    }
}

/// Per-level workgroup counts for scanning the first `count` elements. Each
/// `up` entry also carries the live length of its level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScanDispatch {
    pub up: [DispatchArgs; MAX_SCAN_LEVELS],
    pub down: [DispatchArgs; MAX_SCAN_LEVELS],
}

impl ScanDispatch {
    pub fn for_count(count: u32) -> Self {
        let mut up = [IDLE_DISPATCH; MAX_SCAN_LEVELS];
        let mut down = [IDLE_DISPATCH; MAX_SCAN_LEVELS];
        let mut live = count;
        for level in 0..MAX_SCAN_LEVELS {
            let groups = live.div_ceil(BLOCK_SIZE);
            up[level] = dispatch_args(groups);
            up[level][3] = live;
            // The first two 64-wide chunks form block 0, which needs no offset.
            down[level] = dispatch_args(live.div_ceil(WORKGROUP_SIZE).saturating_sub(2));
            live = groups.saturating_sub(1);
        }
        Self { up, down }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params_with_extents(min: Vec3, max: Vec3) -> SimParams {
        let config = SphConfig::default();
        let mut params = SimParams::new(&config, Vec3::new(-1.0, 0.0, -1.0), Vec3::new(1.0, 2.0, 1.0));
        params.set_particle_bounds(min, max);
        params.fix_up_grid();
        params
    }

    #[test]
    fn test_layout_matches_shader_struct() {
        assert_eq!(std::mem::size_of::<SimParams>(), 304);
        assert_eq!(SimParams::GRID_MIN_OFFSET, 32);
        assert_eq!(SimParams::GRID_MAX_OFFSET, 48);
        assert_eq!(SimParams::SCAN_UP_OFFSET, 176);
        assert_eq!(SimParams::SCAN_DOWN_OFFSET, 240);
    }

    #[test]
    fn test_scan_levels_for_default_capacity() {
        assert_eq!(ScanLevels::for_capacity(32768).sizes(), &[32768, 255, 1]);
        assert_eq!(ScanLevels::for_capacity(200_000).sizes(), &[200_000, 1562, 12]);
        assert_eq!(ScanLevels::for_capacity(128).sizes(), &[128]);
        assert_eq!(ScanLevels::for_capacity(129).sizes(), &[129, 1]);
        assert_eq!(ScanLevels::for_capacity(1).sizes(), &[1]);
    }

    #[test]
    fn test_scan_levels_fit_dispatch_table_at_max_resolution() {
        let max = crate::constants::MAX_GRID_RESOLUTION.pow(3);
        assert!(ScanLevels::for_capacity(max).len() <= MAX_SCAN_LEVELS);
    }

    #[test]
    fn test_scan_dispatch_sizes() {
        let dispatch = ScanDispatch::for_count(32768);
        assert_eq!(dispatch.up[0][0], 256);
        assert_eq!(dispatch.up[1][0], 2);
        assert_eq!(dispatch.up[2][0], 1);
        assert_eq!(dispatch.down[0][0], 510);
        assert_eq!(dispatch.down[1][0], 2);
        assert_eq!(dispatch.down[2][0], 0);
    }

    #[test]
    fn test_large_dispatch_folds_into_second_dimension() {
        assert_eq!(dispatch_args(0), [0, 1, 1, 0]);
        assert_eq!(dispatch_args(65_535), [65_535, 1, 1, 0]);
        let folded = dispatch_args(262_144);
        assert_eq!(folded, [65_535, 5, 1, 0]);
        assert!(group_count(&folded) >= 262_144);

        let dispatch = ScanDispatch::for_count(256 * 256 * 256);
        assert_eq!(group_count(&dispatch.up[0]), 65_535 * 3);
        assert_eq!(dispatch.up[1], [1024, 1, 1, 131_071]);
    }

    #[test]
    fn test_scan_dispatch_carries_live_lengths() {
        let dispatch = ScanDispatch::for_count(1000);
        let lives: Vec<u32> = dispatch.up.iter().map(live_count).collect();
        assert_eq!(lives, [1000, 7, 0, 0]);
        assert_eq!(dispatch.up[1][0], 1);
        assert_eq!(dispatch.up[2][0], 0);
    }

    #[test]
    fn test_fix_up_keeps_grid_max_on_cell_boundary() {
        let params = params_with_extents(Vec3::new(-0.9, 0.0, -0.7), Vec3::new(0.8, 1.3, 0.9));
        let expected = params.grid_min() + params.grid_div().as_vec3() * params.cell_size();
        assert!((params.grid_max() - expected).abs().max_element() < 1e-6);
        assert!(params.cell_size().min_element() >= params.smoothing_radius - 1e-6);
        assert_eq!(
            params.num_grid_cells as i32,
            params.grid_div().x * params.grid_div().y * params.grid_div().z
        );
    }

    #[test]
    fn test_fix_up_clamps_division_to_resolution() {
        // 20 m extent at H = 0.125 would need 160 cells per axis.
        let params = params_with_extents(Vec3::splat(-10.0), Vec3::splat(10.0));
        assert_eq!(params.grid_div(), IVec3::splat(32));
        assert!(params.num_grid_cells <= params.grid_capacity);
        assert!(params.cell_size().x > params.smoothing_radius);
    }

    #[test]
    fn test_fix_up_single_point_gets_one_cell() {
        let params = params_with_extents(Vec3::splat(0.5), Vec3::splat(0.5));
        assert_eq!(params.grid_div(), IVec3::ONE);
        assert_eq!(params.num_grid_cells, 1);
        assert_eq!(params.scan_up[0][0], 1);
        assert_eq!(params.scan_down[0][0], 0);
    }
}
