//! GPU context acquisition.
//!
//! Each engine instance owns its own instance/adapter/device/queue; there is
//! no process-wide context. Construction is the one fallible initialization
//! path: failure to find an adapter or create a device surfaces as
//! `RasterError::Init`.

use crate::error::{RasterError, RasterResult};

pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter: wgpu::Adapter,
}

impl GpuContext {
    /// Acquire an adapter and device suitable for headless rendering.
    pub fn new() -> RasterResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| RasterError::init("no suitable GPU adapter found"))?;

        let info = adapter.get_info();
        log::info!(
            "texraster adapter: {} ({:?})",
            info.name,
            info.backend
        );

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                label: Some("texraster-device"),
            },
            None,
        ))
        .map_err(|e| RasterError::init(format!("request_device failed: {e}")))?;

        Ok(Self {
            device,
            queue,
            adapter,
        })
    }
}

/// Align to WebGPU's required bytes-per-row for texture-buffer copies.
#[inline]
pub fn align_copy_bpr(unpadded: u32) -> u32 {
    let a = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    ((unpadded + a - 1) / a) * a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_bpr_alignment_is_256() {
        assert_eq!(align_copy_bpr(1), 256);
        assert_eq!(align_copy_bpr(256), 256);
        assert_eq!(align_copy_bpr(257), 512);
        assert_eq!(align_copy_bpr(100 * 16), 1792);
    }
}
