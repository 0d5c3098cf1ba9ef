//! Offscreen render target: fixed-size color+mask and interpolant
//! attachments plus a depth buffer, with padded readback into tight CPU
//! arrays.
//!
//! The target is sized at construction and never resizes; a new engine
//! instance is the way to change output dimensions.

use crate::error::{RasterError, RasterResult};
use crate::gpu::align_copy_bpr;

/// Color + validity attachment: RGB in .rgb, mask bit in .a.
pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
/// Float interpolant attachment (.xyz used).
pub const INTERPOLANT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const BYTES_PER_PIXEL: u32 = 16; // four f32 channels

pub struct RenderTarget {
    width: u32,
    height: u32,
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    interpolant: wgpu::Texture,
    interpolant_view: wgpu::TextureView,
    depth_view: wgpu::TextureView,
    readback: wgpu::Buffer,
}

impl RenderTarget {
    pub fn new(device: &wgpu::Device, width: u32, height: u32) -> RasterResult<Self> {
        if width == 0 || height == 0 {
            return Err(RasterError::init(format!(
                "render target dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let max_dim = device.limits().max_texture_dimension_2d;
        if width > max_dim || height > max_dim {
            return Err(RasterError::init(format!(
                "render target {width}x{height} exceeds device limit {max_dim}"
            )));
        }

        let color = create_attachment(device, "texraster-color", width, height, COLOR_FORMAT);
        let interpolant =
            create_attachment(device, "texraster-interpolant", width, height, INTERPOLANT_FORMAT);
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("texraster-depth"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let interpolant_view = interpolant.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = depth.create_view(&wgpu::TextureViewDescriptor::default());

        // One reusable buffer, large enough for a padded copy of either
        // attachment.
        let padded_bpr = align_copy_bpr(width * BYTES_PER_PIXEL);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("texraster-readback"),
            size: padded_bpr as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Ok(Self {
            width,
            height,
            color,
            color_view,
            interpolant,
            interpolant_view,
            depth_view,
            readback,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn color_view(&self) -> &wgpu::TextureView {
        &self.color_view
    }

    pub fn interpolant_view(&self) -> &wgpu::TextureView {
        &self.interpolant_view
    }

    pub fn depth_view(&self) -> &wgpu::TextureView {
        &self.depth_view
    }

    /// Read the color+mask attachment back as tight (H * W * 4) floats,
    /// rows top-first.
    pub fn read_color(&self, device: &wgpu::Device, queue: &wgpu::Queue) -> RasterResult<Vec<f32>> {
        self.read_attachment(device, queue, &self.color)
    }

    /// Read the interpolant attachment back as tight (H * W * 4) floats,
    /// rows top-first.
    pub fn read_interpolant(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> RasterResult<Vec<f32>> {
        self.read_attachment(device, queue, &self.interpolant)
    }

    fn read_attachment(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        texture: &wgpu::Texture,
    ) -> RasterResult<Vec<f32>> {
        let row_bytes = self.width * BYTES_PER_PIXEL;
        let padded_bpr = align_copy_bpr(row_bytes);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("texraster-readback-encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &self.readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bpr),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        queue.submit([encoder.finish()]);

        let slice = self.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| RasterError::readback("map_async callback dropped"))?
            .map_err(|e| RasterError::readback(format!("buffer mapping failed: {e}")))?;

        let data = slice.get_mapped_range();

        // Unpad each row into a tightly-packed output.
        let mut out = vec![0f32; (self.width * self.height * 4) as usize];
        let floats_per_row = (self.width * 4) as usize;
        let src_stride = padded_bpr as usize;
        let dst_stride = row_bytes as usize;
        {
            let out_bytes: &mut [u8] = bytemuck::cast_slice_mut(&mut out);
            for y in 0..(self.height as usize) {
                let src_off = y * src_stride;
                let dst_off = y * dst_stride;
                out_bytes[dst_off..dst_off + dst_stride]
                    .copy_from_slice(&data[src_off..src_off + dst_stride]);
            }
        }
        debug_assert_eq!(out.len(), floats_per_row * self.height as usize);

        drop(data);
        self.readback.unmap();
        Ok(out)
    }
}

fn create_attachment(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        view_formats: &[],
    })
}
