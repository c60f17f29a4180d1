//! Height field raster as an `R32Float` texture plus its world rectangle.

use bytemuck::{Pod, Zeroable};
use sph3d::HeightField;
use wgpu::util::DeviceExt;

use crate::pipeline::layouts;
use crate::{GpuContext, GpuError};

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct HeightRect {
    bounds_min: [f32; 4],
    bounds_max: [f32; 4],
}

impl HeightRect {
    fn of(field: &HeightField) -> Self {
        Self {
            bounds_min: field.bounds_min.extend(0.0).to_array(),
            bounds_max: field.bounds_max.extend(0.0).to_array(),
        }
    }
}

pub struct GpuHeightField {
    texture: wgpu::Texture,
    rect: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    width: u32,
    height: u32,
}

impl GpuHeightField {
    pub fn new(ctx: &GpuContext, field: &HeightField) -> Self {
        let device = &ctx.device;
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Height Field"),
            size: wgpu::Extent3d {
                width: field.width,
                height: field.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let rect = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Height Field Rect"),
            contents: bytemuck::bytes_of(&HeightRect::of(field)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Height Field Bind Group"),
            layout: &ctx.pipelines.layout(layouts::HEIGHT_FIELD),
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(&view) },
                wgpu::BindGroupEntry { binding: 1, resource: rect.as_entire_binding() },
            ],
        });

        let gpu = Self {
            texture,
            rect,
            bind_group,
            width: field.width,
            height: field.height,
        };
        gpu.write_texels(ctx, field);
        gpu
    }

    fn write_texels(&self, ctx: &GpuContext, field: &HeightField) {
        ctx.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&field.depths),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(field.width * 4),
                rows_per_image: Some(field.height),
            },
            wgpu::Extent3d {
                width: field.width,
                height: field.height,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Replace depths and rectangle. The raster size is fixed at creation.
    pub fn update(&self, ctx: &GpuContext, field: &HeightField) -> Result<(), GpuError> {
        if (field.width, field.height) != (self.width, self.height) {
            return Err(GpuError::HeightFieldSize {
                expected: (self.width, self.height),
                actual: (field.width, field.height),
            });
        }
        self.write_texels(ctx, field);
        ctx.queue
            .write_buffer(&self.rect, 0, bytemuck::bytes_of(&HeightRect::of(field)));
        Ok(())
    }

    pub fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
