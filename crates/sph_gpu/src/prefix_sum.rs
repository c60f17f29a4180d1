//! Multi-level inclusive scan over the cell counts.
//!
//! Level buffers are sized once from the cell capacity; how much of each level
//! is live depends on the grid the fix-up kernel chose, so every pass is an
//! indirect dispatch reading the `scan_up` / `scan_down` tables of the
//! parameter block. The `w` slot of each upward entry is the level's live
//! length, which both passes read from the bound parameter block.

use std::sync::Arc;

use sph3d::{ScanLevels, SimParams};
use wgpu::util::DeviceExt;

use crate::pipeline::{dispatch_indirect, layouts};
use crate::{Entry, GpuContext};

/// Size of one `vec4<u32>` dispatch slot.
const DISPATCH_SLOT: u64 = 16;

pub struct PrefixSum {
    levels: Vec<wgpu::Buffer>,
    sizes: Vec<u32>,
    /// `(level i, level i + 1)`; the last level pairs with a dummy sums buffer.
    bind_groups: Vec<wgpu::BindGroup>,
    _no_sums: wgpu::Buffer,
    _level_indices: Vec<wgpu::Buffer>,
    scan_pipeline: Arc<wgpu::ComputePipeline>,
    add_pipeline: Arc<wgpu::ComputePipeline>,
}

impl PrefixSum {
    /// `params` must be the buffer later passed to [`PrefixSum::encode`].
    pub fn new(ctx: &GpuContext, params: &wgpu::Buffer, capacity: u32) -> Self {
        let device = &ctx.device;
        let layout = ctx.pipelines.layout(layouts::PREFIX_SUM);
        let sizes = ScanLevels::for_capacity(capacity).sizes().to_vec();

        let levels: Vec<wgpu::Buffer> = sizes
            .iter()
            .enumerate()
            .map(|(i, &len)| {
                device.create_buffer(&wgpu::BufferDescriptor {
                    label: Some(&format!("Prefix Sum Level {}", i)),
                    size: len as u64 * 4,
                    usage: wgpu::BufferUsages::STORAGE
                        | wgpu::BufferUsages::COPY_SRC
                        | wgpu::BufferUsages::COPY_DST,
                    mapped_at_creation: false,
                })
            })
            .collect();

        let no_sums = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Prefix Sum Top"),
            size: 4,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });

        let level_indices: Vec<wgpu::Buffer> = (0..levels.len() as u32)
            .map(|i| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(&format!("Prefix Sum Level Index {}", i)),
                    contents: bytemuck::cast_slice(&[i, 0, 0, 0]),
                    usage: wgpu::BufferUsages::UNIFORM,
                })
            })
            .collect();

        let bind_groups = (0..levels.len())
            .map(|i| {
                let sums = levels.get(i + 1).unwrap_or(&no_sums);
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Prefix Sum Bind Group"),
                    layout: &layout,
                    entries: &[
                        wgpu::BindGroupEntry { binding: 0, resource: levels[i].as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 1, resource: sums.as_entire_binding() },
                        wgpu::BindGroupEntry { binding: 2, resource: params.as_entire_binding() },
                        wgpu::BindGroupEntry {
                            binding: 3,
                            resource: level_indices[i].as_entire_binding(),
                        },
                    ],
                })
            })
            .collect();

        Self {
            levels,
            sizes,
            bind_groups,
            _no_sums: no_sums,
            _level_indices: level_indices,
            scan_pipeline: ctx.pipelines.pipeline(Entry::ScanBlocks),
            add_pipeline: ctx.pipelines.pipeline(Entry::AddBlockOffsets),
        }
    }

    /// Level 0: cell counts on input, inclusive prefix on output.
    pub fn data(&self) -> &wgpu::Buffer {
        &self.levels[0]
    }

    pub fn capacity(&self) -> u32 {
        self.sizes[0]
    }

    pub fn level_sizes(&self) -> &[u32] {
        &self.sizes
    }

    /// Scan in place. `params` holds a [`SimParams`] whose dispatch tables
    /// were written by the fix-up kernel (or on the host); it is read both as
    /// indirect arguments and through the bind groups.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, params: &wgpu::Buffer) {
        let last = self.levels.len() - 1;
        for level in 0..last {
            dispatch_indirect(
                encoder,
                "Prefix Sum Up",
                &self.scan_pipeline,
                &[&self.bind_groups[level]],
                params,
                SimParams::SCAN_UP_OFFSET + DISPATCH_SLOT * level as u64,
            );
        }
        if self.sizes[last] > 1 {
            dispatch_indirect(
                encoder,
                "Prefix Sum Top",
                &self.scan_pipeline,
                &[&self.bind_groups[last]],
                params,
                SimParams::SCAN_UP_OFFSET + DISPATCH_SLOT * last as u64,
            );
        }
        for level in (0..last).rev() {
            dispatch_indirect(
                encoder,
                "Prefix Sum Down",
                &self.add_pipeline,
                &[&self.bind_groups[level]],
                params,
                SimParams::SCAN_DOWN_OFFSET + DISPATCH_SLOT * level as u64,
            );
        }
    }
}
