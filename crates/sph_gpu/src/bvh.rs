//! Device copy of a compressed BVH and its placement.
//!
//! A `GpuBvh` can exist before its mesh has been built: it stays not-ready
//! until [`GpuBvh::upload`] runs, and raycasters skip it until then.

use std::sync::OnceLock;

use sph3d::bvh::BvhTriangle;
use sph3d::{CompressedBvh, ModelTransform};
use wgpu::util::DeviceExt;

use crate::pipeline::layouts;
use crate::{GpuContext, GpuError};

struct BvhResources {
    _nodes: wgpu::Buffer,
    _indices: wgpu::Buffer,
    _triangles: wgpu::Buffer,
    transform: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    node_count: usize,
    triangle_count: usize,
}

pub struct GpuBvh {
    label: String,
    resources: OnceLock<BvhResources>,
}

impl GpuBvh {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            resources: OnceLock::new(),
        }
    }

    /// Validated upload in one step.
    pub fn from_bvh(
        ctx: &GpuContext,
        label: impl Into<String>,
        bvh: &CompressedBvh,
        transform: &ModelTransform,
    ) -> Result<Self, GpuError> {
        let gpu = Self::new(label);
        gpu.upload(ctx, bvh, transform)?;
        Ok(gpu)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_ready(&self) -> bool {
        self.resources.get().is_some()
    }

    /// Copy the three arrays to the device. A BVH is immutable once uploaded.
    pub fn upload(
        &self,
        ctx: &GpuContext,
        bvh: &CompressedBvh,
        transform: &ModelTransform,
    ) -> Result<(), GpuError> {
        if self.is_ready() {
            return Err(GpuError::BvhAlreadyLoaded);
        }
        bvh.validate()?;

        let device = &ctx.device;
        let storage = |label: &str, contents: &[u8]| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents,
                usage: wgpu::BufferUsages::STORAGE,
            })
        };
        // Bindings cannot be empty; a zero triangle never hits.
        let indices: &[u32] = if bvh.indices.is_empty() { &[0] } else { &bvh.indices };
        let padding = [BvhTriangle::default()];
        let triangles: &[BvhTriangle] = if bvh.triangles.is_empty() {
            &padding
        } else {
            &bvh.triangles
        };

        let nodes = storage(&format!("{} Nodes", self.label), bytemuck::cast_slice(&bvh.nodes));
        let indices = storage(&format!("{} Indices", self.label), bytemuck::cast_slice(indices));
        let triangles = storage(&format!("{} Triangles", self.label), bytemuck::cast_slice(triangles));
        let transform = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{} Transform", self.label)),
            contents: bytemuck::bytes_of(transform),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(&format!("{} Bind Group", self.label)),
            layout: &ctx.pipelines.layout(layouts::BVH),
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: nodes.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: indices.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: triangles.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: transform.as_entire_binding() },
            ],
        });

        log::info!(
            "BVH '{}': {} nodes, {} triangles",
            self.label,
            bvh.node_count(),
            bvh.triangle_count()
        );
        self.resources
            .set(BvhResources {
                _nodes: nodes,
                _indices: indices,
                _triangles: triangles,
                transform,
                bind_group,
                node_count: bvh.node_count(),
                triangle_count: bvh.triangle_count(),
            })
            .map_err(|_| GpuError::BvhAlreadyLoaded)
    }

    /// Move the mesh. Takes effect for work submitted afterwards.
    pub fn set_transform(&self, ctx: &GpuContext, transform: &ModelTransform) -> Result<(), GpuError> {
        let resources = self.resources.get().ok_or(GpuError::BvhNotReady)?;
        ctx.queue
            .write_buffer(&resources.transform, 0, bytemuck::bytes_of(transform));
        Ok(())
    }

    pub fn node_count(&self) -> Option<usize> {
        self.resources.get().map(|r| r.node_count)
    }

    pub fn triangle_count(&self) -> Option<usize> {
        self.resources.get().map(|r| r.triangle_count)
    }

    pub(crate) fn bind_group(&self) -> Option<&wgpu::BindGroup> {
        self.resources.get().map(|r| &r.bind_group)
    }
}
