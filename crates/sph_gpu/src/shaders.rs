//! WGSL sources and their composition into shader modules.
//!
//! WGSL has no includes. Every module is `common.wgsl` (the parameter block and
//! indexing helpers) followed by the stage files it needs, concatenated here.

pub const COMMON: &str = include_str!("shaders/common.wgsl");
pub const BOUNDS: &str = include_str!("shaders/bounds.wgsl");
pub const FIX_UP_GRID: &str = include_str!("shaders/fix_up_grid.wgsl");
pub const CLEAR: &str = include_str!("shaders/clear.wgsl");
pub const HASH: &str = include_str!("shaders/hash.wgsl");
pub const PREFIX_SUM: &str = include_str!("shaders/prefix_sum.wgsl");
pub const SCATTER: &str = include_str!("shaders/scatter.wgsl");
pub const SPH_KERNELS: &str = include_str!("shaders/sph_kernels.wgsl");
pub const NEIGHBOURS: &str = include_str!("shaders/neighbours.wgsl");
pub const DENSITY: &str = include_str!("shaders/density.wgsl");
pub const SPH_FORCES: &str = include_str!("shaders/sph_forces.wgsl");
pub const BOUNDARY: &str = include_str!("shaders/boundary.wgsl");
pub const INTEGRATE: &str = include_str!("shaders/integrate.wgsl");
pub const HEIGHT_FIELD: &str = include_str!("shaders/height_field.wgsl");
pub const APPLY_FORCES: &str = include_str!("shaders/apply_forces.wgsl");
pub const NORMALS: &str = include_str!("shaders/normals.wgsl");
pub const RESOLVE_COLLISIONS: &str = include_str!("shaders/resolve_collisions.wgsl");
pub const CWBVH: &str = include_str!("shaders/cwbvh.wgsl");
pub const RAYCAST_COLLIDE: &str = include_str!("shaders/raycast_collide.wgsl");
pub const RAYCAST_DEPTH: &str = include_str!("shaders/raycast_depth.wgsl");

/// One composed shader module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Kernel {
    Bounds,
    FixUpGrid,
    Clear,
    Hash,
    PrefixSum,
    Scatter,
    Density,
    Integrate,
    IntegrateHeightField,
    ApplyForces,
    ResolveCollisions,
    RaycastCollide,
    RaycastDepth,
}

impl Kernel {
    pub const ALL: [Kernel; 13] = [
        Kernel::Bounds,
        Kernel::FixUpGrid,
        Kernel::Clear,
        Kernel::Hash,
        Kernel::PrefixSum,
        Kernel::Scatter,
        Kernel::Density,
        Kernel::Integrate,
        Kernel::IntegrateHeightField,
        Kernel::ApplyForces,
        Kernel::ResolveCollisions,
        Kernel::RaycastCollide,
        Kernel::RaycastDepth,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Kernel::Bounds => "SPH Bounds Reduction",
            Kernel::FixUpGrid => "SPH Grid Fix-up",
            Kernel::Clear => "SPH Clear",
            Kernel::Hash => "SPH Hash",
            Kernel::PrefixSum => "SPH Prefix Sum",
            Kernel::Scatter => "SPH Scatter",
            Kernel::Density => "SPH Density",
            Kernel::Integrate => "SPH Integrate",
            Kernel::IntegrateHeightField => "SPH Integrate Height Field",
            Kernel::ApplyForces => "SPH Apply Forces",
            Kernel::ResolveCollisions => "SPH Resolve Collisions",
            Kernel::RaycastCollide => "CWBVH Particle Raycast",
            Kernel::RaycastDepth => "CWBVH Depth Raycast",
        }
    }

    fn parts(self) -> &'static [&'static str] {
        match self {
            Kernel::Bounds => &[BOUNDS],
            Kernel::FixUpGrid => &[FIX_UP_GRID],
            Kernel::Clear => &[CLEAR],
            Kernel::Hash => &[HASH],
            Kernel::PrefixSum => &[PREFIX_SUM],
            Kernel::Scatter => &[SCATTER],
            Kernel::Density => &[SPH_KERNELS, NEIGHBOURS, DENSITY],
            Kernel::Integrate => &[SPH_KERNELS, NEIGHBOURS, SPH_FORCES, BOUNDARY, INTEGRATE],
            Kernel::IntegrateHeightField => &[
                SPH_KERNELS,
                NEIGHBOURS,
                SPH_FORCES,
                BOUNDARY,
                INTEGRATE,
                HEIGHT_FIELD,
            ],
            Kernel::ApplyForces => &[SPH_KERNELS, NEIGHBOURS, SPH_FORCES, APPLY_FORCES],
            Kernel::ResolveCollisions => &[BOUNDARY, NORMALS, RESOLVE_COLLISIONS],
            Kernel::RaycastCollide => &[CWBVH, NORMALS, RAYCAST_COLLIDE],
            Kernel::RaycastDepth => &[CWBVH, RAYCAST_DEPTH],
        }
    }

    /// Full WGSL source of the module.
    pub fn source(self) -> String {
        let parts = self.parts();
        let mut source = String::with_capacity(
            COMMON.len() + parts.iter().map(|p| p.len() + 1).sum::<usize>(),
        );
        source.push_str(COMMON);
        for part in parts {
            source.push('\n');
            source.push_str(part);
        }
        source
    }

    /// Entry points compiled from this module.
    pub fn entries(self) -> &'static [Entry] {
        match self {
            Kernel::Bounds => &[Entry::ReduceMin, Entry::ReduceMax],
            Kernel::FixUpGrid => &[Entry::FixUpGrid],
            Kernel::Clear => &[Entry::ClearCounts, Entry::ClearDepth],
            Kernel::Hash => &[Entry::HashParticles],
            Kernel::PrefixSum => &[Entry::ScanBlocks, Entry::AddBlockOffsets],
            Kernel::Scatter => &[Entry::Scatter],
            Kernel::Density => &[Entry::ComputeDensity],
            Kernel::Integrate => &[Entry::UpdatePositions, Entry::IntegrateFreeFall],
            Kernel::IntegrateHeightField => &[Entry::UpdatePositionsHeightField],
            Kernel::ApplyForces => &[Entry::ApplyForces],
            Kernel::ResolveCollisions => &[Entry::ResolveCollisions],
            Kernel::RaycastCollide => &[Entry::CollideParticles],
            Kernel::RaycastDepth => &[Entry::RenderDepth],
        }
    }
}

/// A compute entry point; the key of a cached pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Entry {
    ReduceMin,
    ReduceMax,
    FixUpGrid,
    ClearCounts,
    ClearDepth,
    HashParticles,
    ScanBlocks,
    AddBlockOffsets,
    Scatter,
    ComputeDensity,
    UpdatePositions,
    IntegrateFreeFall,
    UpdatePositionsHeightField,
    ApplyForces,
    ResolveCollisions,
    CollideParticles,
    RenderDepth,
}

impl Entry {
    pub fn kernel(self) -> Kernel {
        match self {
            Entry::ReduceMin | Entry::ReduceMax => Kernel::Bounds,
            Entry::FixUpGrid => Kernel::FixUpGrid,
            Entry::ClearCounts | Entry::ClearDepth => Kernel::Clear,
            Entry::HashParticles => Kernel::Hash,
            Entry::ScanBlocks | Entry::AddBlockOffsets => Kernel::PrefixSum,
            Entry::Scatter => Kernel::Scatter,
            Entry::ComputeDensity => Kernel::Density,
            Entry::UpdatePositions | Entry::IntegrateFreeFall => Kernel::Integrate,
            Entry::UpdatePositionsHeightField => Kernel::IntegrateHeightField,
            Entry::ApplyForces => Kernel::ApplyForces,
            Entry::ResolveCollisions => Kernel::ResolveCollisions,
            Entry::CollideParticles => Kernel::RaycastCollide,
            Entry::RenderDepth => Kernel::RaycastDepth,
        }
    }

    /// Function name in the WGSL source.
    pub fn name(self) -> &'static str {
        match self {
            Entry::ReduceMin => "reduce_min",
            Entry::ReduceMax => "reduce_max",
            Entry::FixUpGrid => "fix_up_grid",
            Entry::ClearCounts => "clear_counts",
            Entry::ClearDepth => "clear_depth",
            Entry::HashParticles => "hash_particles",
            Entry::ScanBlocks => "scan_blocks",
            Entry::AddBlockOffsets => "add_block_offsets",
            Entry::Scatter => "scatter",
            Entry::ComputeDensity => "compute_density",
            Entry::UpdatePositions => "update_positions",
            Entry::IntegrateFreeFall => "integrate_free_fall",
            Entry::UpdatePositionsHeightField => "update_positions_height_field",
            Entry::ApplyForces => "apply_forces",
            Entry::ResolveCollisions => "resolve_collisions",
            Entry::CollideParticles => "collide_particles",
            Entry::RenderDepth => "render_depth",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_entry_belongs_to_its_kernel() {
        for kernel in Kernel::ALL {
            for entry in kernel.entries() {
                assert_eq!(entry.kernel(), kernel, "{:?}", entry);
            }
        }
    }

    #[test]
    fn test_sources_start_with_common_block() {
        for kernel in Kernel::ALL {
            let source = kernel.source();
            assert!(source.starts_with(COMMON));
            for entry in kernel.entries() {
                assert!(source.contains(&format!("fn {}(", entry.name())));
            }
        }
    }
}
