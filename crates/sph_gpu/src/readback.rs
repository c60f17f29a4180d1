//! Blocking buffer readback for tests, demos and diagnostics.

use bytemuck::Pod;
use glam::Vec4;

use crate::{await_buffer_map, GpuContext, GpuError};

/// Copy the first `count` elements of `buffer` to the host.
///
/// `buffer` needs `COPY_SRC`. Waits for all submitted work first. Read `T`s
/// with at most 8-byte alignment: mapped ranges are not guaranteed more.
pub fn read_buffer<T: Pod>(
    ctx: &GpuContext,
    buffer: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<T>, GpuError> {
    let byte_size = (count * std::mem::size_of::<T>()) as u64;
    if byte_size == 0 {
        return Ok(Vec::new());
    }

    let staging = ctx.device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging"),
        size: byte_size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = ctx
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
    encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, byte_size);
    ctx.queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    ctx.device.poll(wgpu::Maintain::Wait);
    await_buffer_map(rx)?;

    let data = slice.get_mapped_range();
    let values = bytemuck::cast_slice::<u8, T>(&data).to_vec();
    drop(data);
    staging.unmap();
    Ok(values)
}

/// Read `vec4<f32>` elements as glam vectors.
pub fn read_vec4s(
    ctx: &GpuContext,
    buffer: &wgpu::Buffer,
    count: usize,
) -> Result<Vec<Vec4>, GpuError> {
    Ok(read_buffer::<[f32; 4]>(ctx, buffer, count)?
        .into_iter()
        .map(Vec4::from_array)
        .collect())
}
