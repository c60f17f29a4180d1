//! Grid-accelerated SPH fluid with compressed wide BVH collision.
//!
//! This crate is the CPU reference of a device-resident pipeline and owns every
//! data layout shared with the device. A tick runs:
//!
//! 1. bounds reduction over the render-order positions
//! 2. grid fix-up (division, cell size, scan dispatch sizes)
//! 3. clear counts, hash and count
//! 4. multi-level prefix sum
//! 5. scatter into cell-sorted order
//! 6. density
//! 7. forces and integration, or forces, mesh raycasts and collision resolve
//!
//! # Example
//!
//! ```
//! use sph3d::{SphConfig, SphSimulation};
//! use glam::Vec3;
//!
//! let config = SphConfig::with_particle_count(512);
//! let mut sim = SphSimulation::with_config(
//!     config,
//!     Vec3::new(-0.5, 0.0, -0.5),
//!     Vec3::new(0.5, 1.0, 0.5),
//! )
//! .unwrap();
//!
//! sim.update(None);
//! assert!(sim.frame_stats().all_finite);
//! ```

pub mod bounds;
pub mod bvh;
pub mod config;
pub mod constants;
pub mod error;
pub mod grid;
pub mod heightfield;
pub mod kernels;
pub mod params;
pub mod particle;
pub mod raycast;
pub mod scan;
pub mod solver;
pub mod sort;

pub use bvh::{CompressedBvh, Intersection, Ray};
pub use config::SphConfig;
pub use error::{BvhError, ConfigError, SphError};
pub use glam::{Vec3, Vec4};
pub use grid::{GridView, HashGrid};
pub use heightfield::HeightField;
pub use params::{ScanDispatch, ScanLevels, SimParams};
pub use particle::Particles;
pub use raycast::{CameraRays, CollisionTarget, DepthTarget, ModelTransform};
pub use sort::SortedParticles;

use scan::BlockScan;
use solver::Solver;

/// A BVH-housed mesh placed in the world.
#[derive(Clone, Copy, Debug)]
pub struct MeshCollider<'a> {
    pub bvh: &'a CompressedBvh,
    pub transform: ModelTransform,
}

/// Summary of particle heights, used by scenario tests and demos.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStats {
    pub mean_height: f32,
    pub min_height: f32,
    pub max_height: f32,
    /// Every position component is finite.
    pub all_finite: bool,
}

impl FrameStats {
    pub fn from_positions(positions: &[Vec4]) -> Self {
        if positions.is_empty() {
            return Self {
                all_finite: true,
                ..Default::default()
            };
        }
        let mut sum = 0.0f64;
        let mut min_height = f32::MAX;
        let mut max_height = f32::MIN;
        let mut all_finite = true;
        for p in positions {
            all_finite &= p.truncate().is_finite();
            sum += p.y as f64;
            min_height = min_height.min(p.y);
            max_height = max_height.max(p.y);
        }
        Self {
            mean_height: (sum / positions.len() as f64) as f32,
            min_height,
            max_height,
            all_finite,
        }
    }
}

/// CPU SPH simulation with a fixed particle count.
pub struct SphSimulation {
    pub config: SphConfig,
    /// Render-order particles; identity is stable across ticks.
    pub particles: Particles,
    params: SimParams,
    global_min: Vec3,
    global_max: Vec3,
    grid: HashGrid,
    scan: BlockScan,
    sorted: SortedParticles,
    collisions: CollisionTarget,
    pub frame: u32,
}

impl SphSimulation {
    /// Default configuration, particles packed from the floor of the box.
    pub fn new(global_min: Vec3, global_max: Vec3) -> Result<Self, SphError> {
        Self::with_config(SphConfig::default(), global_min, global_max)
    }

    pub fn with_config(
        config: SphConfig,
        global_min: Vec3,
        global_max: Vec3,
    ) -> Result<Self, SphError> {
        config.validate()?;
        if !global_min.cmplt(global_max).all() {
            return Err(ConfigError::EmptyBounds {
                min: global_min.to_array(),
                max: global_max.to_array(),
            }
            .into());
        }

        let n = config.particle_count as usize;
        let particles = Particles::dam_block(
            n,
            config.particle_radius(),
            global_min,
            global_max,
            global_min.y,
        );
        let params = SimParams::new(&config, global_min, global_max);
        log::info!(
            "SPH: {} particles, radius {:.4}, H {:.4}, mass {:.5}, grid capacity {}",
            n,
            params.particle_radius,
            params.smoothing_radius,
            params.particle_mass,
            params.grid_capacity
        );

        Ok(Self {
            grid: HashGrid::new(params.grid_capacity, n),
            scan: BlockScan::with_capacity(params.grid_capacity),
            sorted: SortedParticles::new(n),
            collisions: CollisionTarget::new(n),
            particles,
            params,
            global_min,
            global_max,
            config,
            frame: 0,
        })
    }

    /// Replace all particles. The count is fixed at construction.
    pub fn set_particles(&mut self, particles: Particles) -> Result<(), SphError> {
        let expected = self.config.particle_count as usize;
        if particles.len() != expected || particles.velocities.len() != expected {
            return Err(SphError::ParticleCount {
                expected,
                actual: particles.len(),
            });
        }
        self.particles = particles;
        Ok(())
    }

    pub fn set_global_bounds(&mut self, global_min: Vec3, global_max: Vec3) {
        self.global_min = global_min;
        self.global_max = global_max;
    }

    pub fn params(&self) -> &SimParams {
        &self.params
    }

    pub fn sorted(&self) -> &SortedParticles {
        &self.sorted
    }

    pub fn collision_target(&self) -> &CollisionTarget {
        &self.collisions
    }

    /// Inclusive per-cell prefix of the last build.
    pub fn cell_prefix(&self) -> &[u32] {
        self.scan.data()
    }

    /// Stages 1-6: bounds, grid, sort and density.
    fn prepare_frame(&mut self) {
        self.params.begin_frame(self.global_min, self.global_max);
        let (min, max) = bounds::reduce_bounds(&self.particles.positions);
        self.params.set_particle_bounds(min, max);
        self.params.fix_up_grid();

        let view = GridView::from_params(&self.params);
        self.grid.build(&self.particles.positions, &view);
        self.scan.data_mut().copy_from_slice(&self.grid.counts());
        let dispatch = ScanDispatch {
            up: self.params.scan_up,
            down: self.params.scan_down,
        };
        self.scan.run(&dispatch);
        self.sorted.scatter(
            &self.particles.positions,
            &self.particles.velocities,
            &self.grid,
            self.scan.data(),
        );

        Solver::new(&self.params, self.scan.data()).compute_densities(&mut self.sorted);

        log::debug!(
            "frame {}: grid {:?} ({} cells), bounds {:?}..{:?}",
            self.frame,
            self.params.grid_div(),
            self.params.num_grid_cells,
            self.params.grid_min(),
            self.params.grid_max()
        );
    }

    /// Advance one tick, colliding with the global box and, if given, a height field.
    pub fn update(&mut self, height_field: Option<&HeightField>) {
        self.prepare_frame();
        Solver::new(&self.params, self.scan.data()).update_positions(
            &self.sorted,
            &mut self.particles,
            height_field,
        );
        self.frame += 1;
    }

    /// Advance one tick, colliding with the global box and every mesh.
    pub fn update_with_colliders(&mut self, colliders: &[MeshCollider<'_>]) {
        self.prepare_frame();
        let next_velocities =
            Solver::new(&self.params, self.scan.data()).apply_forces(&self.sorted);

        self.collisions.clear();
        for collider in colliders {
            raycast::collide_particles(
                collider.bvh,
                &collider.transform,
                &self.params,
                &self.sorted.positions,
                &next_velocities,
                &mut self.collisions,
            );
        }
        solver::resolve_collisions(
            &self.params,
            &self.sorted,
            &next_velocities,
            &self.collisions,
            &mut self.particles,
        );
        self.frame += 1;
    }

    /// Gravity-only tick; no neighbour search.
    pub fn step_free_fall(&mut self) {
        self.params.begin_frame(self.global_min, self.global_max);
        solver::integrate_free_fall(&self.params, &mut self.particles);
        self.frame += 1;
    }

    pub fn frame_stats(&self) -> FrameStats {
        FrameStats::from_positions(&self.particles.positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_sim() -> SphSimulation {
        SphSimulation::with_config(
            SphConfig::with_particle_count(300),
            Vec3::new(-0.25, 0.0, -0.25),
            Vec3::new(0.25, 1.0, 0.25),
        )
        .unwrap()
    }

    #[test]
    fn test_rejects_empty_bounds() {
        let result = SphSimulation::new(Vec3::ONE, Vec3::ZERO);
        assert!(matches!(
            result,
            Err(SphError::Config(ConfigError::EmptyBounds { .. }))
        ));
    }

    #[test]
    fn test_set_particles_checks_count() {
        let mut sim = small_sim();
        let wrong = Particles::from_positions([Vec3::ZERO]);
        assert!(matches!(
            sim.set_particles(wrong),
            Err(SphError::ParticleCount { expected: 300, actual: 1 })
        ));
    }

    #[test]
    fn test_update_keeps_sorted_index_a_permutation() {
        let mut sim = small_sim();
        sim.update(None);
        let mut seen = sim.sorted().original_index.clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..300).collect::<Vec<u32>>());
        assert_eq!(sim.frame, 1);
    }

    #[test]
    fn test_free_fall_moves_down() {
        let mut sim = small_sim();
        let mut particles = sim.particles.clone();
        for p in &mut particles.positions {
            p.y += 0.5;
        }
        sim.set_particles(particles).unwrap();
        let before = sim.frame_stats().mean_height;
        sim.step_free_fall();
        sim.step_free_fall();
        assert!(sim.frame_stats().mean_height < before);
    }

    #[test]
    fn test_frame_stats_detects_non_finite() {
        let stats = FrameStats::from_positions(&[
            Vec4::new(0.0, 1.0, 0.0, 1.0),
            Vec4::new(f32::NAN, 3.0, 0.0, 1.0),
        ]);
        assert!(!stats.all_finite);
        assert_eq!(stats.mean_height, 2.0);
        assert_eq!(stats.min_height, 1.0);
        assert_eq!(stats.max_height, 3.0);
    }
}
