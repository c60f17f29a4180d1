//! Frame orchestrator for the device-resident simulation.
//!
//! A tick is one host write of the parameter block followed by one command
//! buffer:
//!
//! 1. bounds reduction over the render-order positions, grid fix-up
//! 2. clear counts, hash and count
//! 3. prefix sum (indirect, sized by the fix-up)
//! 4. scatter, density
//! 5. update, or apply forces + mesh raycasts + resolve

use glam::{Vec3, Vec4};
use sph3d::{ConfigError, FrameStats, Particles, SimParams, SphConfig, SphError};
use wgpu::util::DeviceExt;

use crate::bounds::BoundsReduction;
use crate::bvh::GpuBvh;
use crate::heightfield::GpuHeightField;
use crate::prefix_sum::PrefixSum;
use crate::raycast::{CollisionBuffers, ParticleRaycaster};
use crate::readback::{read_buffer, read_vec4s};
use crate::scatter::{Scatter, SortedBuffers};
use crate::solver::{ParticleBuffers, SphSolver};
use crate::spatial_hash::SpatialHash;
use crate::{GpuContext, GpuError};

pub struct GpuSphSimulation {
    ctx: GpuContext,
    pub config: SphConfig,
    params: SimParams,
    global_min: Vec3,
    global_max: Vec3,

    params_buffer: wgpu::Buffer,
    /// Render order; identity is stable across ticks.
    positions: wgpu::Buffer,
    velocities: wgpu::Buffer,
    sorted: SortedBuffers,
    collisions: CollisionBuffers,

    bounds: BoundsReduction,
    hash: SpatialHash,
    prefix_sum: PrefixSum,
    scatter: Scatter,
    solver: SphSolver,
    raycaster: ParticleRaycaster,

    pub frame: u32,
}

impl GpuSphSimulation {
    /// Default configuration, particles packed from the floor of the box.
    pub fn new(ctx: &GpuContext, global_min: Vec3, global_max: Vec3) -> Result<Self, GpuError> {
        Self::with_config(ctx, SphConfig::default(), global_min, global_max)
    }

    pub fn with_config(
        ctx: &GpuContext,
        config: SphConfig,
        global_min: Vec3,
        global_max: Vec3,
    ) -> Result<Self, GpuError> {
        config.validate().map_err(SphError::from)?;
        if !global_min.cmplt(global_max).all() {
            return Err(SphError::from(ConfigError::EmptyBounds {
                min: global_min.to_array(),
                max: global_max.to_array(),
            })
            .into());
        }

        let n = config.particle_count;
        let device = &ctx.device;
        let params = SimParams::new(&config, global_min, global_max);
        let particles = Particles::dam_block(
            n as usize,
            config.particle_radius(),
            global_min,
            global_max,
            global_min.y,
        );

        let params_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("SPH Params"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::UNIFORM
                | wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
        });
        let particle_buffer = |label: &str, contents: &[Vec4]| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(contents),
                usage: wgpu::BufferUsages::STORAGE
                    | wgpu::BufferUsages::COPY_DST
                    | wgpu::BufferUsages::COPY_SRC,
            })
        };
        let positions = particle_buffer("SPH Positions", &particles.positions);
        let velocities = particle_buffer("SPH Velocities", &particles.velocities);

        let sorted = SortedBuffers::new(device, n);
        let collisions = CollisionBuffers::new(device, n);
        let prefix_sum = PrefixSum::new(ctx, &params_buffer, params.grid_capacity);
        let bounds = BoundsReduction::new(ctx, &positions, &params_buffer, n);
        let hash = SpatialHash::new(
            ctx,
            &params_buffer,
            &positions,
            prefix_sum.data(),
            n,
            params.grid_capacity,
        );
        let scatter = Scatter::new(
            ctx,
            &params_buffer,
            &positions,
            &velocities,
            &hash,
            prefix_sum.data(),
            &sorted,
            n,
        );
        let solver = SphSolver::new(
            ctx,
            ParticleBuffers {
                params: &params_buffer,
                positions: &positions,
                velocities: &velocities,
                prefix: prefix_sum.data(),
            },
            &sorted,
            &collisions,
            n,
        );
        let raycaster = ParticleRaycaster::new(ctx, &params_buffer, &sorted, &collisions, n);

        log::info!(
            "GPU SPH: {} particles, radius {:.4}, H {:.4}, mass {:.5}, grid capacity {} ({} scan levels, {} bounds levels)",
            n,
            params.particle_radius,
            params.smoothing_radius,
            params.particle_mass,
            params.grid_capacity,
            prefix_sum.level_sizes().len(),
            bounds.level_count()
        );

        Ok(Self {
            ctx: ctx.clone(),
            config,
            params,
            global_min,
            global_max,
            params_buffer,
            positions,
            velocities,
            sorted,
            collisions,
            bounds,
            hash,
            prefix_sum,
            scatter,
            solver,
            raycaster,
            frame: 0,
        })
    }

    pub fn num_particles(&self) -> u32 {
        self.config.particle_count
    }

    /// Replace all particles. The count is fixed at construction.
    pub fn upload_particles(&self, particles: &Particles) -> Result<(), GpuError> {
        let expected = self.num_particles() as usize;
        if particles.len() != expected || particles.velocities.len() != expected {
            return Err(SphError::ParticleCount {
                expected,
                actual: particles.len(),
            }
            .into());
        }
        let queue = &self.ctx.queue;
        queue.write_buffer(&self.positions, 0, bytemuck::cast_slice(&particles.positions));
        queue.write_buffer(&self.velocities, 0, bytemuck::cast_slice(&particles.velocities));
        Ok(())
    }

    pub fn set_global_bounds(&mut self, global_min: Vec3, global_max: Vec3) {
        self.global_min = global_min;
        self.global_max = global_max;
    }

    fn begin_tick(&mut self, label: &str) -> wgpu::CommandEncoder {
        self.params.begin_frame(self.global_min, self.global_max);
        self.ctx
            .queue
            .write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&self.params));
        self.ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    /// Bounds through density.
    fn encode_prepare(&self, encoder: &mut wgpu::CommandEncoder) {
        self.bounds.encode(encoder, &self.positions, &self.params_buffer);
        self.hash.encode(encoder);
        self.prefix_sum.encode(encoder, &self.params_buffer);
        self.scatter.encode(encoder);
        self.solver.encode_density(encoder);
    }

    fn submit(&mut self, encoder: wgpu::CommandEncoder) {
        self.ctx.queue.submit(std::iter::once(encoder.finish()));
        self.frame += 1;
    }

    /// Advance one tick, colliding with the global box and, if given, a height field.
    pub fn update(&mut self, height_field: Option<&GpuHeightField>) {
        let mut encoder = self.begin_tick("SPH Update Encoder");
        self.encode_prepare(&mut encoder);
        self.solver.encode_update(&mut encoder, height_field);
        log::debug!(
            "frame {}: update{}",
            self.frame,
            if height_field.is_some() { " with height field" } else { "" }
        );
        self.submit(encoder);
    }

    /// Advance one tick, colliding with the global box and every uploaded mesh.
    pub fn update_with_colliders(&mut self, colliders: &[&GpuBvh]) {
        let mut encoder = self.begin_tick("SPH Collider Update Encoder");
        self.encode_prepare(&mut encoder);
        self.solver.encode_apply_forces(&mut encoder);
        self.raycaster.encode(&mut encoder, colliders);
        self.solver.encode_resolve(&mut encoder);
        log::debug!(
            "frame {}: update with {} colliders ({} ready)",
            self.frame,
            colliders.len(),
            colliders.iter().filter(|c| c.is_ready()).count()
        );
        self.submit(encoder);
    }

    /// Gravity-only tick; no neighbour search.
    pub fn step_free_fall(&mut self) {
        let mut encoder = self.begin_tick("SPH Free Fall Encoder");
        self.solver.encode_free_fall(&mut encoder);
        self.submit(encoder);
    }

    pub fn context(&self) -> &GpuContext {
        &self.ctx
    }

    /// Render-order positions, for a renderer to bind.
    pub fn positions_buffer(&self) -> &wgpu::Buffer {
        &self.positions
    }

    pub fn velocities_buffer(&self) -> &wgpu::Buffer {
        &self.velocities
    }

    pub fn read_positions(&self) -> Result<Vec<Vec4>, GpuError> {
        read_vec4s(&self.ctx, &self.positions, self.num_particles() as usize)
    }

    pub fn read_velocities(&self) -> Result<Vec<Vec4>, GpuError> {
        read_vec4s(&self.ctx, &self.velocities, self.num_particles() as usize)
    }

    pub fn read_particles(&self) -> Result<Particles, GpuError> {
        Ok(Particles {
            positions: self.read_positions()?,
            velocities: self.read_velocities()?,
        })
    }

    pub fn read_sorted_positions(&self) -> Result<Vec<Vec4>, GpuError> {
        read_vec4s(&self.ctx, &self.sorted.positions, self.num_particles() as usize)
    }

    /// Sorted slot to render-order index of the last tick.
    pub fn read_sorted_index(&self) -> Result<Vec<u32>, GpuError> {
        read_buffer(&self.ctx, &self.sorted.original_index, self.num_particles() as usize)
    }

    /// Densities in sorted order.
    pub fn read_densities(&self) -> Result<Vec<f32>, GpuError> {
        read_buffer(&self.ctx, &self.sorted.densities, self.num_particles() as usize)
    }

    /// Inclusive per-cell prefix of the last tick.
    pub fn read_cell_prefix(&self) -> Result<Vec<u32>, GpuError> {
        read_buffer(
            &self.ctx,
            self.prefix_sum.data(),
            self.prefix_sum.capacity() as usize,
        )
    }

    pub fn read_collision_depth(&self) -> Result<Vec<f32>, GpuError> {
        read_buffer(&self.ctx, &self.collisions.depth, self.num_particles() as usize)
    }

    /// The parameter block as the device left it, including the fixed-up grid.
    pub fn read_params(&self) -> Result<SimParams, GpuError> {
        let params = read_buffer::<SimParams>(&self.ctx, &self.params_buffer, 1)?;
        Ok(params[0])
    }

    pub fn frame_stats(&self) -> Result<FrameStats, GpuError> {
        Ok(FrameStats::from_positions(&self.read_positions()?))
    }
}
