//! Compute pipeline construction and the per-context pipeline cache.
//!
//! ```ignore
//! let pipeline = PipelineBuilder::new(device, &module)
//!     .label("SPH Density")
//!     .bind_group_layouts(&[&layout])
//!     .entry_point("compute_density")
//!     .build();
//! ```
//!
//! Bind group layouts are described as static binding lists ([`layouts`]) and
//! deduplicated by content, so kernels that bind the same shape of resources
//! share one `BindGroupLayout` and accept each other's bind groups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::shaders::{Entry, Kernel};

/// One binding slot, in binding-index order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Binding {
    Uniform,
    Storage { read_only: bool },
    /// Unfilterable 2D float texture read with `textureLoad`.
    HeightTexture,
}

/// Binding lists of every bind group used by the kernels.
pub mod layouts {
    use super::Binding;

    const U: Binding = Binding::Uniform;
    const RO: Binding = Binding::Storage { read_only: true };
    const RW: Binding = Binding::Storage { read_only: false };

    /// src, dst
    pub const BOUNDS: &[Binding] = &[RO, RW];
    /// A single read-write array: params for the fix-up, or a buffer to clear.
    pub const SINGLE_RW: &[Binding] = &[RW];
    /// params, positions, hashes, index_in_cell, counts
    pub const HASH: &[Binding] = &[U, RO, RW, RW, RW];
    /// data, block_sums, params, level index
    pub const PREFIX_SUM: &[Binding] = &[RW, RW, U, U];
    pub const SCATTER: &[Binding] = &[U, RO, RO, RO, RO, RO, RW, RW, RW];
    pub const DENSITY: &[Binding] = &[U, RO, RO, RW];
    pub const INTEGRATE: &[Binding] = &[U, RO, RO, RO, RO, RO, RW, RW];
    pub const HEIGHT_FIELD: &[Binding] = &[Binding::HeightTexture, U];
    pub const APPLY_FORCES: &[Binding] = &[U, RO, RO, RO, RO, RW];
    pub const RESOLVE: &[Binding] = &[U, RO, RO, RO, RO, RO, RW, RW];
    /// nodes, indices, triangles, transform
    pub const BVH: &[Binding] = &[RO, RO, RO, U];
    pub const COLLIDE: &[Binding] = &[U, RO, RO, RW, RW];
    pub const DEPTH: &[Binding] = &[U, RW];
}

/// Bind group layouts of a module, by group index.
pub fn kernel_layouts(kernel: Kernel) -> &'static [&'static [Binding]] {
    match kernel {
        Kernel::Bounds => &[layouts::BOUNDS],
        Kernel::FixUpGrid | Kernel::Clear => &[layouts::SINGLE_RW],
        Kernel::Hash => &[layouts::HASH],
        Kernel::PrefixSum => &[layouts::PREFIX_SUM],
        Kernel::Scatter => &[layouts::SCATTER],
        Kernel::Density => &[layouts::DENSITY],
        Kernel::Integrate => &[layouts::INTEGRATE],
        Kernel::IntegrateHeightField => &[layouts::INTEGRATE, layouts::HEIGHT_FIELD],
        Kernel::ApplyForces => &[layouts::APPLY_FORCES],
        Kernel::ResolveCollisions => &[layouts::RESOLVE],
        Kernel::RaycastCollide => &[layouts::BVH, layouts::COLLIDE],
        Kernel::RaycastDepth => &[layouts::BVH, layouts::DEPTH],
    }
}

fn layout_entries(bindings: &[Binding]) -> Vec<wgpu::BindGroupLayoutEntry> {
    bindings
        .iter()
        .enumerate()
        .map(|(binding, kind)| wgpu::BindGroupLayoutEntry {
            binding: binding as u32,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: match kind {
                Binding::Uniform => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                Binding::Storage { read_only } => wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage {
                        read_only: *read_only,
                    },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                Binding::HeightTexture => wgpu::BindingType::Texture {
                    sample_type: wgpu::TextureSampleType::Float { filterable: false },
                    view_dimension: wgpu::TextureViewDimension::D2,
                    multisampled: false,
                },
            },
            count: None,
        })
        .collect()
}

/// Builder for a compute pipeline over an existing module and layouts.
pub struct PipelineBuilder<'a> {
    device: &'a wgpu::Device,
    module: &'a wgpu::ShaderModule,
    label: Option<&'a str>,
    entry_point: &'a str,
    bind_group_layouts: Vec<&'a wgpu::BindGroupLayout>,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(device: &'a wgpu::Device, module: &'a wgpu::ShaderModule) -> Self {
        Self {
            device,
            module,
            label: None,
            entry_point: "main",
            bind_group_layouts: Vec::new(),
        }
    }

    pub fn label(mut self, label: &'a str) -> Self {
        self.label = Some(label);
        self
    }

    pub fn entry_point(mut self, entry_point: &'a str) -> Self {
        self.entry_point = entry_point;
        self
    }

    /// Append the layout of the next bind group index.
    pub fn bind_group_layout(mut self, layout: &'a wgpu::BindGroupLayout) -> Self {
        self.bind_group_layouts.push(layout);
        self
    }

    pub fn bind_group_layouts(mut self, layouts: &[&'a wgpu::BindGroupLayout]) -> Self {
        self.bind_group_layouts.extend_from_slice(layouts);
        self
    }

    pub fn build(self) -> wgpu::ComputePipeline {
        let pipeline_layout = self
            .device
            .create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: self.label,
                bind_group_layouts: &self.bind_group_layouts,
                push_constant_ranges: &[],
            });

        self.device
            .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: self.label,
                layout: Some(&pipeline_layout),
                module: self.module,
                entry_point: Some(self.entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
    }
}

/// Build-once cache of shader modules, bind group layouts and pipelines.
///
/// Owned by a [`crate::GpuContext`]; every simulation on that context shares it.
pub struct PipelineCache {
    device: Arc<wgpu::Device>,
    layouts: Mutex<HashMap<&'static [Binding], Arc<wgpu::BindGroupLayout>>>,
    modules: Mutex<HashMap<Kernel, Arc<wgpu::ShaderModule>>>,
    pipelines: Mutex<HashMap<Entry, Arc<wgpu::ComputePipeline>>>,
}

impl PipelineCache {
    pub fn new(device: Arc<wgpu::Device>) -> Self {
        Self {
            device,
            layouts: Mutex::new(HashMap::new()),
            modules: Mutex::new(HashMap::new()),
            pipelines: Mutex::new(HashMap::new()),
        }
    }

    pub fn layout(&self, bindings: &'static [Binding]) -> Arc<wgpu::BindGroupLayout> {
        let mut layouts = self.layouts.lock().unwrap_or_else(PoisonError::into_inner);
        layouts
            .entry(bindings)
            .or_insert_with(|| {
                Arc::new(
                    self.device
                        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                            label: Some("SPH Bind Group Layout"),
                            entries: &layout_entries(bindings),
                        }),
                )
            })
            .clone()
    }

    pub fn module(&self, kernel: Kernel) -> Arc<wgpu::ShaderModule> {
        let mut modules = self.modules.lock().unwrap_or_else(PoisonError::into_inner);
        modules
            .entry(kernel)
            .or_insert_with(|| {
                log::debug!("compiling {}", kernel.label());
                Arc::new(
                    self.device
                        .create_shader_module(wgpu::ShaderModuleDescriptor {
                            label: Some(kernel.label()),
                            source: wgpu::ShaderSource::Wgsl(kernel.source().into()),
                        }),
                )
            })
            .clone()
    }

    pub fn pipeline(&self, entry: Entry) -> Arc<wgpu::ComputePipeline> {
        if let Some(pipeline) = self
            .pipelines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&entry)
        {
            return pipeline.clone();
        }

        let kernel = entry.kernel();
        let module = self.module(kernel);
        let layouts: Vec<_> = kernel_layouts(kernel)
            .iter()
            .map(|&bindings| self.layout(bindings))
            .collect();
        let layout_refs: Vec<&wgpu::BindGroupLayout> = layouts.iter().map(|l| l.as_ref()).collect();

        let pipeline = Arc::new(
            PipelineBuilder::new(&self.device, &module)
                .label(kernel.label())
                .entry_point(entry.name())
                .bind_group_layouts(&layout_refs)
                .build(),
        );
        self.pipelines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(entry)
            .or_insert(pipeline)
            .clone()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// One compute pass running `pipeline` over `groups` workgroups, folded into a
/// second dimension past the per-dimension limit.
pub(crate) fn dispatch(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_groups: &[&wgpu::BindGroup],
    groups: u32,
) {
    let [x, y, z, _] = sph3d::params::dispatch_args(groups);
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    for (index, bind_group) in bind_groups.iter().enumerate() {
        pass.set_bind_group(index as u32, *bind_group, &[]);
    }
    pass.dispatch_workgroups(x, y, z);
}

/// As [`dispatch`], with the workgroup counts read from `indirect` at `offset`.
pub(crate) fn dispatch_indirect(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::ComputePipeline,
    bind_groups: &[&wgpu::BindGroup],
    indirect: &wgpu::Buffer,
    offset: u64,
) {
    let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
        label: Some(label),
        timestamp_writes: None,
    });
    pass.set_pipeline(pipeline);
    for (index, bind_group) in bind_groups.iter().enumerate() {
        pass.set_bind_group(index as u32, *bind_group, &[]);
    }
    pass.dispatch_workgroups_indirect(indirect, offset);
}
