//! Density, forces, integration and collision resolve.
//!
//! All stages read the cell-sorted arrays; the ones that move particles write
//! through `original_index` back into the render-order buffers.

use std::sync::Arc;

use sph3d::constants::WORKGROUP_SIZE;

use crate::heightfield::GpuHeightField;
use crate::pipeline::{dispatch, layouts};
use crate::raycast::CollisionBuffers;
use crate::scatter::SortedBuffers;
use crate::{Entry, GpuContext};

/// Render-order particle state the solver writes back to.
pub struct ParticleBuffers<'a> {
    pub params: &'a wgpu::Buffer,
    pub positions: &'a wgpu::Buffer,
    pub velocities: &'a wgpu::Buffer,
    pub prefix: &'a wgpu::Buffer,
}

pub struct SphSolver {
    num_particles: u32,
    density_bind_group: wgpu::BindGroup,
    integrate_bind_group: wgpu::BindGroup,
    forces_bind_group: wgpu::BindGroup,
    resolve_bind_group: wgpu::BindGroup,
    density_pipeline: Arc<wgpu::ComputePipeline>,
    update_pipeline: Arc<wgpu::ComputePipeline>,
    update_height_field_pipeline: Arc<wgpu::ComputePipeline>,
    free_fall_pipeline: Arc<wgpu::ComputePipeline>,
    forces_pipeline: Arc<wgpu::ComputePipeline>,
    resolve_pipeline: Arc<wgpu::ComputePipeline>,
}

impl SphSolver {
    pub fn new(
        ctx: &GpuContext,
        particles: ParticleBuffers<'_>,
        sorted: &SortedBuffers,
        collisions: &CollisionBuffers,
        num_particles: u32,
    ) -> Self {
        let device = &ctx.device;
        let pipelines = &ctx.pipelines;
        let ParticleBuffers {
            params,
            positions,
            velocities,
            prefix,
        } = particles;

        let density_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Density Bind Group"),
            layout: &pipelines.layout(layouts::DENSITY),
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: sorted.positions.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: prefix.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: sorted.densities.as_entire_binding() },
            ],
        });

        let integrate_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Integrate Bind Group"),
            layout: &pipelines.layout(layouts::INTEGRATE),
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: sorted.positions.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: sorted.velocities.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: sorted.densities.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: prefix.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: sorted.original_index.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 6, resource: positions.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 7, resource: velocities.as_entire_binding() },
            ],
        });

        let forces_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Apply Forces Bind Group"),
            layout: &pipelines.layout(layouts::APPLY_FORCES),
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: sorted.positions.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: sorted.velocities.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: sorted.densities.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: prefix.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: sorted.next_velocities.as_entire_binding() },
            ],
        });

        let resolve_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Resolve Collisions Bind Group"),
            layout: &pipelines.layout(layouts::RESOLVE),
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: params.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: sorted.positions.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: sorted.next_velocities.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: collisions.depth.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 4, resource: collisions.normals.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 5, resource: sorted.original_index.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 6, resource: positions.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 7, resource: velocities.as_entire_binding() },
            ],
        });

        Self {
            num_particles,
            density_bind_group,
            integrate_bind_group,
            forces_bind_group,
            resolve_bind_group,
            density_pipeline: pipelines.pipeline(Entry::ComputeDensity),
            update_pipeline: pipelines.pipeline(Entry::UpdatePositions),
            update_height_field_pipeline: pipelines.pipeline(Entry::UpdatePositionsHeightField),
            free_fall_pipeline: pipelines.pipeline(Entry::IntegrateFreeFall),
            forces_pipeline: pipelines.pipeline(Entry::ApplyForces),
            resolve_pipeline: pipelines.pipeline(Entry::ResolveCollisions),
        }
    }

    fn groups(&self) -> u32 {
        self.num_particles.div_ceil(WORKGROUP_SIZE)
    }

    pub fn encode_density(&self, encoder: &mut wgpu::CommandEncoder) {
        dispatch(
            encoder,
            "SPH Density",
            &self.density_pipeline,
            &[&self.density_bind_group],
            self.groups(),
        );
    }

    /// Forces and integration with the box boundary, plus the terrain if given.
    pub fn encode_update(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        height_field: Option<&GpuHeightField>,
    ) {
        match height_field {
            Some(height_field) => dispatch(
                encoder,
                "SPH Update Height Field",
                &self.update_height_field_pipeline,
                &[&self.integrate_bind_group, height_field.bind_group()],
                self.groups(),
            ),
            None => dispatch(
                encoder,
                "SPH Update",
                &self.update_pipeline,
                &[&self.integrate_bind_group],
                self.groups(),
            ),
        }
    }

    pub fn encode_free_fall(&self, encoder: &mut wgpu::CommandEncoder) {
        dispatch(
            encoder,
            "SPH Free Fall",
            &self.free_fall_pipeline,
            &[&self.integrate_bind_group],
            self.groups(),
        );
    }

    /// Next velocity per sorted particle, without moving anything.
    pub fn encode_apply_forces(&self, encoder: &mut wgpu::CommandEncoder) {
        dispatch(
            encoder,
            "SPH Apply Forces",
            &self.forces_pipeline,
            &[&self.forces_bind_group],
            self.groups(),
        );
    }

    pub fn encode_resolve(&self, encoder: &mut wgpu::CommandEncoder) {
        dispatch(
            encoder,
            "SPH Resolve Collisions",
            &self.resolve_pipeline,
            &[&self.resolve_bind_group],
            self.groups(),
        );
    }
}
