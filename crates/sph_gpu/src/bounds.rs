//! Particle extents reduced on the device, then the grid fix-up.
//!
//! Min and max chains share the level buffers: the min result is copied into
//! the parameter block before the max chain overwrites them.

use std::sync::Arc;

use sph3d::bounds::reduction_levels;
use sph3d::SimParams;

use crate::pipeline::{dispatch, layouts};
use crate::{Entry, GpuContext};

const VEC4_SIZE: u64 = 16;

pub struct BoundsReduction {
    levels: Vec<wgpu::Buffer>,
    /// Level `i` reads level `i - 1` (or the positions) and writes level `i`.
    bind_groups: Vec<wgpu::BindGroup>,
    groups: Vec<u32>,
    min_pipeline: Arc<wgpu::ComputePipeline>,
    max_pipeline: Arc<wgpu::ComputePipeline>,
    fix_up_pipeline: Arc<wgpu::ComputePipeline>,
    fix_up_bind_group: wgpu::BindGroup,
}

impl BoundsReduction {
    pub fn new(
        ctx: &GpuContext,
        positions: &wgpu::Buffer,
        params: &wgpu::Buffer,
        num_particles: u32,
    ) -> Self {
        let device = &ctx.device;
        let layout = ctx.pipelines.layout(layouts::BOUNDS);
        let sizes = reduction_levels(num_particles as usize);

        let levels: Vec<wgpu::Buffer> = sizes
            .iter()
            .enumerate()
            .map(|(i, &len)| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("Bounds Level {}", i)),
                    size: len as u64 * VEC4_SIZE,
                    usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                    mapped_at_creation: false,
                })
            })
            .collect();

        let bind_groups = (0..levels.len())
            .map(|i| {
                let src = if i == 0 { positions } else { &levels[i - 1] };
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Bounds Bind Group"),
                    layout: &layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: src.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: levels[i].as_entire_binding() },
                    ],
                })
            })
            .collect();

        let fix_up_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Grid Fix-up Bind Group"),
            layout: &ctx.pipelines.layout(layouts::SINGLE_RW),
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() }],
        });

        Self {
            groups: sizes.iter().map(|&len| len as u32).collect(),
            levels,
            bind_groups,
            min_pipeline: ctx.pipelines.pipeline(Entry::ReduceMin),
            max_pipeline: ctx.pipelines.pipeline(Entry::ReduceMax),
            fix_up_pipeline: ctx.pipelines.pipeline(Entry::FixUpGrid),
            fix_up_bind_group,
        }
    }

    fn encode_chain(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pipeline: &wgpu::ComputePipeline,
        positions: &wgpu::Buffer,
        params: &wgpu::Buffer,
        offset: u64,
    ) {
        for (bind_group, &groups) in self.bind_groups.iter().zip(&self.groups) {
            dispatch(encoder, "Bounds Reduce", pipeline, &[bind_group], groups);
        }
        // A single particle is its own extent.
        let result = self.levels.last().unwrap_or(positions);
        encoder.copy_buffer_to_buffer(result, 0, params, offset, VEC4_SIZE);
    }

    /// Reduce the render-order positions into `grid_min` / `grid_max`, then fix
    /// up the grid and the scan dispatch table. `params` needs `COPY_DST`.
    pub fn encode(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        positions: &wgpu::Buffer,
        params: &wgpu::Buffer,
    ) {
        self.encode_chain(encoder, &self.min_pipeline, positions, params, SimParams::GRID_MIN_OFFSET);
        self.encode_chain(encoder, &self.max_pipeline, positions, params, SimParams::GRID_MAX_OFFSET);
        dispatch(encoder, "Grid Fix-up", &self.fix_up_pipeline, &[&self.fix_up_bind_group], 1);
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }
}
