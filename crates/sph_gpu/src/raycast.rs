//! Raycast dispatches against uploaded BVHs.
//!
//! Both query shapes keep the nearest hit in a target cleared to `f32::MAX`
//! and run one dispatch per mesh, so several meshes accumulate into the same
//! target. Meshes that are not uploaded yet are skipped with a warning.

use std::sync::Arc;

use sph3d::constants::{DEPTH_TILE, WORKGROUP_SIZE};
use sph3d::{CameraRays, DepthTarget};
use wgpu::util::DeviceExt;

use crate::bvh::GpuBvh;
use crate::pipeline::{dispatch, layouts};
use crate::readback::read_buffer;
use crate::scatter::SortedBuffers;
use crate::{Entry, GpuContext, GpuError};

/// Nearest hit distance and packed normal per sorted particle.
pub struct CollisionBuffers {
    pub depth: wgpu::Buffer,
    pub normals: wgpu::Buffer,
}

impl CollisionBuffers {
    pub fn new(device: &wgpu::Device, num_particles: u32) -> Self {
        let buffer = |label: &str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: num_particles as u64 * 4,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
                mapped_at_creation: false,
            })
        };
        Self {
            depth: buffer("Collision Depth"),
            normals: buffer("Collision Normals"),
        }
    }
}

fn single_buffer_bind_group(
    ctx: &GpuContext,
    label: &str,
    buffer: &wgpu::Buffer,
) -> wgpu::BindGroup {
    ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some(label),
        layout: &ctx.pipelines.layout(layouts::SINGLE_RW),
        entries: &[wgpu::BindGroupEntry { binding: 0, resource: buffer.as_entire_binding() }],
    })
}

/// Per-particle motion rays for fluid-mesh collision.
pub struct ParticleRaycaster {
    num_particles: u32,
    clear_depth_bind_group: wgpu::BindGroup,
    clear_normals_bind_group: wgpu::BindGroup,
    collide_bind_group: wgpu::BindGroup,
    clear_depth_pipeline: Arc<wgpu::ComputePipeline>,
    clear_counts_pipeline: Arc<wgpu::ComputePipeline>,
    collide_pipeline: Arc<wgpu::ComputePipeline>,
}

impl ParticleRaycaster {
    pub fn new(
        ctx: &GpuContext,
        params: &wgpu::Buffer,
        sorted: &SortedBuffers,
        collisions: &CollisionBuffers,
        num_particles: u32,
    ) -> Self {
        let collide_bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Particle Raycast Bind Group"),
            layout: &ctx.pipelines.layout(layouts::COLLIDE),
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: sorted.positions.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: sorted.next_velocities.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: collisions.depth.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: collisions.normals.as_entire_binding() },
            ],
        });

        Self {
            num_particles,
            clear_depth_bind_group: single_buffer_bind_group(ctx, "Clear Collision Depth", &collisions.depth),
            clear_normals_bind_group: single_buffer_bind_group(ctx, "Clear Collision Normals", &collisions.normals),
            collide_bind_group,
            clear_depth_pipeline: ctx.pipelines.pipeline(Entry::ClearDepth),
            clear_counts_pipeline: ctx.pipelines.pipeline(Entry::ClearCounts),
            collide_pipeline: ctx.pipelines.pipeline(Entry::CollideParticles),
        }
    }

    /// Clear the target, then cast against every ready mesh in turn.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, bvhs: &[&GpuBvh]) {
        let groups = self.num_particles.div_ceil(WORKGROUP_SIZE);
        dispatch(
            encoder,
            "Clear Collision Depth",
            &self.clear_depth_pipeline,
            &[&self.clear_depth_bind_group],
            groups,
        );
        dispatch(
            encoder,
            "Clear Collision Normals",
            &self.clear_counts_pipeline,
            &[&self.clear_normals_bind_group],
            groups,
        );

        for bvh in bvhs {
            let Some(bvh_bind_group) = bvh.bind_group() else {
                log::warn!("skipping collider '{}': BVH not uploaded", bvh.label());
                continue;
            };
            dispatch(
                encoder,
                "Particle Raycast",
                &self.collide_pipeline,
                &[bvh_bind_group, &self.collide_bind_group],
                groups,
            );
        }
    }
}

/// Depth-only rendering of BVH-housed meshes, one ray per pixel.
pub struct DepthRaycaster {
    width: u32,
    height: u32,
    depth: wgpu::Buffer,
    camera: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    clear_bind_group: wgpu::BindGroup,
    clear_pipeline: Arc<wgpu::ComputePipeline>,
    render_pipeline: Arc<wgpu::ComputePipeline>,
}

impl DepthRaycaster {
    pub fn new(ctx: &GpuContext, width: u32, height: u32) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        let depth = ctx.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Raycast Depth"),
            size: (width * height) as u64 * 4,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let camera = ctx.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Raycast Camera"),
            contents: bytemuck::bytes_of(&CameraRays::new(
                glam::Mat4::IDENTITY,
                glam::Mat4::IDENTITY,
                width,
                height,
            )),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = ctx.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Depth Raycast Bind Group"),
            layout: &ctx.pipelines.layout(layouts::DEPTH),
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: camera.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: depth.as_entire_binding() },
            ],
        });

        Self {
            width,
            height,
            clear_bind_group: single_buffer_bind_group(ctx, "Clear Raycast Depth", &depth),
            depth,
            camera,
            bind_group,
            clear_pipeline: ctx.pipelines.pipeline(Entry::ClearDepth),
            render_pipeline: ctx.pipelines.pipeline(Entry::RenderDepth),
        }
    }

    /// Clear and render every ready mesh, then submit.
    pub fn render(&self, ctx: &GpuContext, bvhs: &[&GpuBvh], camera: &CameraRays) {
        let mut camera = *camera;
        if camera.size[..2] != [self.width, self.height] {
            log::warn!(
                "camera size {:?} differs from depth target {}x{}",
                &camera.size[..2],
                self.width,
                self.height
            );
            camera.size = [self.width, self.height, 0, 0];
        }
        ctx.queue
            .write_buffer(&self.camera, 0, bytemuck::bytes_of(&camera));

        let mut encoder = ctx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Depth Raycast Encoder"),
            });
        dispatch(
            &mut encoder,
            "Clear Raycast Depth",
            &self.clear_pipeline,
            &[&self.clear_bind_group],
            (self.width * self.height).div_ceil(WORKGROUP_SIZE),
        );
        for bvh in bvhs {
            let Some(bvh_bind_group) = bvh.bind_group() else {
                log::warn!("skipping mesh '{}': BVH not uploaded", bvh.label());
                continue;
            };
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Depth Raycast"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.render_pipeline);
            pass.set_bind_group(0, bvh_bind_group, &[]);
            pass.set_bind_group(1, &self.bind_group, &[]);
            pass.dispatch_workgroups(
                self.width.div_ceil(DEPTH_TILE),
                self.height.div_ceil(DEPTH_TILE),
                1,
            );
        }
        ctx.queue.submit(std::iter::once(encoder.finish()));
    }

    pub fn read_depth(&self, ctx: &GpuContext) -> Result<DepthTarget, GpuError> {
        let depth = read_buffer::<f32>(ctx, &self.depth, (self.width * self.height) as usize)?;
        Ok(DepthTarget {
            width: self.width,
            height: self.height,
            depth,
        })
    }

    /// Nearest-hit distance per pixel, row-major, for a renderer to consume.
    pub fn depth_buffer(&self) -> &wgpu::Buffer {
        &self.depth
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
