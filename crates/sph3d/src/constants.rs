//! Fixed constants shared by the CPU solver and the WGSL kernels.
//!
//! Anything tunable lives in [`crate::config::SphConfig`]. Values here describe
//! buffer layouts and workgroup shapes that the shaders are compiled against.

/// Gravity acceleration (m/s^2), applied along -Y.
pub const GRAVITY: f32 = 9.81;

/// Rest density of water (kg/m^3).
pub const REST_DENSITY: f32 = 1000.0;

/// Default particle count (2^15).
pub const DEFAULT_PARTICLE_COUNT: u32 = 1 << 15;

/// Default cube resolution of the cell-count buffer (32^3 cells).
pub const DEFAULT_GRID_RESOLUTION: u32 = 32;

/// Largest grid resolution whose scan fits in [`MAX_SCAN_LEVELS`] levels.
pub const MAX_GRID_RESOLUTION: u32 = 256;

// =============================================================================
// WORKGROUP SHAPES
// =============================================================================

/// Invocations per workgroup for every per-particle and per-cell kernel.
pub const WORKGROUP_SIZE: u32 = 64;

/// Elements folded by one workgroup in the scan and the bounds reduction.
/// Each invocation loads two elements.
pub const BLOCK_SIZE: u32 = 2 * WORKGROUP_SIZE;

/// Indirect dispatch slots reserved for scan levels in the parameter block.
/// Four levels cover 128^4 cells, far beyond any supported resolution.
pub const MAX_SCAN_LEVELS: usize = 4;

/// Side of the square pixel tile handled by one depth-raycast workgroup.
pub const DEPTH_TILE: u32 = 8;

// =============================================================================
// SOLVER
// =============================================================================

/// Divisor substituted for a zero pair distance in the pressure gradient.
pub const ZERO_DISTANCE_DIVISOR: f32 = 100_000.0;

// =============================================================================
// BVH TRAVERSAL
// =============================================================================

/// Node groups held in workgroup-shared memory per invocation.
pub const SHARED_STACK_SIZE: usize = 8;

/// Node groups held in invocation-private memory once the shared slots are full.
pub const PRIVATE_STACK_SIZE: usize = 24;

/// Total traversal depth before pushes are dropped.
pub const TRAVERSAL_STACK_SIZE: usize = SHARED_STACK_SIZE + PRIVATE_STACK_SIZE;

/// Depth value meaning "no hit yet" in collision and depth targets.
pub const DEPTH_CLEAR: f32 = f32::MAX;
