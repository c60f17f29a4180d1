//! Cell assignment and per-cell counting.
//!
//! The counters are level 0 of the prefix sum and must be cleared in the same
//! tick, immediately before hashing; stale counts would hand out slots past
//! the end of each cell.

use std::sync::Arc;

use sph3d::constants::WORKGROUP_SIZE;

use crate::pipeline::{dispatch, layouts};
use crate::{Entry, GpuContext};

pub struct SpatialHash {
    /// Cell hash per render-order particle.
    pub hashes: wgpu::Buffer,
    /// Slot claimed inside the cell.
    pub index_in_cell: wgpu::Buffer,
    num_particles: u32,
    capacity: u32,
    clear_pipeline: Arc<wgpu::ComputePipeline>,
    hash_pipeline: Arc<wgpu::ComputePipeline>,
    clear_bind_group: wgpu::BindGroup,
    hash_bind_group: wgpu::BindGroup,
}

impl SpatialHash {
    pub fn new(
        ctx: &GpuContext,
        params: &wgpu::Buffer,
        positions: &wgpu::Buffer,
        counts: &wgpu::Buffer,
        num_particles: u32,
        capacity: u32,
    ) -> Self {
        let device = &ctx.device;
        let particle_buffer = |label: &str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: num_particles as u64 * 4,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        let hashes = particle_buffer("Particle Hashes");
        let index_in_cell = particle_buffer("Particle Index In Cell");

        let clear_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Clear Counts Bind Group"),
            layout: &ctx.pipelines.layout(layouts::SINGLE_RW),
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: counts.as_entire_binding() }],
        });
        let hash_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Hash Bind Group"),
            layout: &ctx.pipelines.layout(layouts::HASH),
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: positions.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: hashes.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: index_in_cell.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: counts.as_entire_binding() },
            ],
        });

        Self {
            hashes,
            index_in_cell,
            num_particles,
            capacity,
            clear_pipeline: ctx.pipelines.pipeline(Entry::ClearCounts),
            hash_pipeline: ctx.pipelines.pipeline(Entry::HashParticles),
            clear_bind_group,
            hash_bind_group,
        }
    }

    /// Clear every counter of the capacity, then hash and count.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        dispatch(
            encoder,
            "Clear Counts",
            &self.clear_pipeline,
            &[&self.clear_bind_group],
            self.capacity.div_ceil(WORKGROUP_SIZE),
        );
        dispatch(
            encoder,
            "Hash Particles",
            &self.hash_pipeline,
            &[&self.hash_bind_group],
            self.num_particles.div_ceil(WORKGROUP_SIZE),
        );
    }
}
