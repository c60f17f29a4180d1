//! Reorder particles into cell-sorted arrays.

use std::sync::Arc;

use sph3d::constants::WORKGROUP_SIZE;

use crate::pipeline::{dispatch, layouts};
use crate::spatial_hash::SpatialHash;
use crate::{Entry, GpuContext};

/// Cell-sorted particle state, rebuilt every tick.
pub struct SortedBuffers {
    pub positions: wgpu::Buffer,
    pub velocities: wgpu::Buffer,
    pub densities: wgpu::Buffer,
    /// Velocity after forces, read by the mesh collision path.
    pub next_velocities: wgpu::Buffer,
    /// Sorted slot to render-order index.
    pub original_index: wgpu::Buffer,
}

impl SortedBuffers {
    pub fn new(device: &wgpu::Device, num_particles: u32) -> Self {
        let n = num_particles as u64;
        let buffer = |label: &str, size: u64| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        Self {
            positions: buffer("Sorted Positions", n * 16),
            velocities: buffer("Sorted Velocities", n * 16),
            densities: buffer("Sorted Densities", n * 4),
            next_velocities: buffer("Sorted Next Velocities", n * 16),
            original_index: buffer("Sorted Original Index", n * 4),
        }
    }
}

pub struct Scatter {
    num_particles: u32,
    pipeline: Arc<wgpu::ComputePipeline>,
    bind_group: wgpu::BindGroup,
}

impl Scatter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ctx: &GpuContext,
        params: &wgpu::Buffer,
        positions: &wgpu::Buffer,
        velocities: &wgpu::Buffer,
        hash: &SpatialHash,
        prefix: &wgpu::Buffer,
        sorted: &SortedBuffers,
        num_particles: u32,
    ) -> Self {
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Scatter Bind Group"),
            layout: &ctx.pipelines.layout(layouts::SCATTER),
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: positions.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: velocities.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: hash.hashes.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: hash.index_in_cell.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: prefix.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 6, resource: sorted.positions.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 7, resource: sorted.velocities.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 8, resource: sorted.original_index.as_entire_binding() },
            ],
        });
        Self {
            num_particles,
            pipeline: ctx.pipelines.pipeline(Entry::Scatter),
            bind_group,
        }
    }

    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder) {
        dispatch(
            encoder,
            "Scatter",
            &self.pipeline,
            &[&self.bind_group],
            self.num_particles.div_ceil(WORKGROUP_SIZE),
        );
    }
}
