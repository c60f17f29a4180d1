//! Device-resident SPH fluid on wgpu.
//!
//! Every stage of [`sph3d`] runs here as WGSL compute: bounds reduction, grid
//! fix-up, hashing, the multi-level scan (indirect dispatch sizes written by the
//! device itself), scatter, density, integration and CWBVH mesh raycasts. The
//! host only writes the parameter block at the start of a tick and submits one
//! command buffer.

pub mod bounds;
pub mod bvh;
pub mod heightfield;
pub mod pipeline;
pub mod prefix_sum;
pub mod raycast;
pub mod readback;
pub mod scatter;
pub mod shaders;
pub mod simulation;
pub mod solver;
pub mod spatial_hash;

pub use bvh::GpuBvh;
pub use heightfield::GpuHeightField;
pub use pipeline::{PipelineBuilder, PipelineCache};
pub use raycast::{DepthRaycaster, ParticleRaycaster};
pub use shaders::{Entry, Kernel};
pub use simulation::GpuSphSimulation;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use sph3d::{BvhError, SphError};

/// Global flag indicating GPU device was lost
static GPU_DEVICE_LOST: AtomicBool = AtomicBool::new(false);

/// Check if the GPU device has been lost
pub fn is_device_lost() -> bool {
    GPU_DEVICE_LOST.load(Ordering::SeqCst)
}

/// Reset the device lost flag (call after recreating device)
pub fn reset_device_lost() {
    GPU_DEVICE_LOST.store(false, Ordering::SeqCst);
}

#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    #[error("GPU device lost")]
    DeviceLost,
    #[error("buffer map failed: {0:?}")]
    BufferMapFailed(wgpu::BufferAsyncError),
    #[error("buffer map channel disconnected")]
    ChannelDisconnected,
    #[error("no suitable GPU adapter")]
    NoAdapter,
    #[error("device request failed: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("BVH has not been uploaded")]
    BvhNotReady,
    #[error("BVH is already uploaded")]
    BvhAlreadyLoaded,
    #[error("height field is {actual:?}, texture is {expected:?}")]
    HeightFieldSize { expected: (u32, u32), actual: (u32, u32) },
    #[error(transparent)]
    Bvh(#[from] BvhError),
    #[error(transparent)]
    Sph(#[from] SphError),
}

/// Wait for a buffer map operation to complete, returning Result instead of panicking.
pub fn await_buffer_map(
    rx: std::sync::mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>,
) -> Result<(), GpuError> {
    if is_device_lost() {
        return Err(GpuError::DeviceLost);
    }
    match rx.recv() {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            log::error!("Buffer map failed: {:?}", e);
            Err(GpuError::BufferMapFailed(e))
        }
        Err(_) => {
            log::error!("Buffer map channel disconnected - possible device lost");
            GPU_DEVICE_LOST.store(true, Ordering::SeqCst);
            Err(GpuError::ChannelDisconnected)
        }
    }
}

/// Device, queue and the pipeline cache shared by every simulation on them.
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub pipelines: Arc<PipelineCache>,
    pub adapter_info: wgpu::AdapterInfo,
}

impl GpuContext {
    /// Compute-only context without a surface. Blocks on adapter and device.
    pub fn new_headless() -> Result<Self, GpuError> {
        pollster::block_on(Self::request(wgpu::PowerPreference::HighPerformance))
    }

    pub async fn request(power_preference: wgpu::PowerPreference) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or(GpuError::NoAdapter)?;

        let adapter_info = adapter.get_info();
        log::info!("Using GPU: {:?}", adapter_info);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("SPH Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("GPU uncaptured error: {:?}", error);
            if matches!(error, wgpu::Error::OutOfMemory { .. }) {
                GPU_DEVICE_LOST.store(true, Ordering::SeqCst);
            }
        }));
        reset_device_lost();

        let device = Arc::new(device);
        Ok(Self {
            pipelines: Arc::new(PipelineCache::new(device.clone())),
            device,
            queue: Arc::new(queue),
            adapter_info,
        })
    }

    /// Block until all submitted work has finished.
    pub fn wait_idle(&self) {
        self.device.poll(wgpu::Maintain::Wait);
    }
}
