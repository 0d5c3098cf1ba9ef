//! Per-render mesh marshaling: shape validation, interleaved vertex packing,
//! and texture upload with vertical-axis reconciliation.
//!
//! Nothing here persists across render calls; buffers are rebuilt from the
//! caller's arrays each time, and validation always runs before any GPU
//! work is issued.

use bytemuck::{Pod, Zeroable};
use ndarray::{ArrayView2, ArrayView3};
use wgpu::util::DeviceExt;

use crate::error::{RasterError, RasterResult};

/// Upload format for the mesh texture: float RGB expanded to RGBA so the
/// original [0, 1] values survive readback-precision comparisons exactly.
const MESH_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba32Float;

/// Interleaved per-vertex layout consumed by every program.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct GpuVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub tcoord: [f32; 2],
    pub interpolant: [f32; 3],
}

impl GpuVertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x2,
        3 => Float32x3,
    ];

    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<GpuVertex>() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Borrowed views over one render call's mesh inputs.
pub struct MeshData<'a> {
    pub points: ArrayView2<'a, f32>,
    pub trilist: ArrayView2<'a, u32>,
    pub tcoords: ArrayView2<'a, f32>,
    pub texture: ArrayView3<'a, f32>,
    pub normals: Option<ArrayView2<'a, f32>>,
    pub interpolant: Option<ArrayView2<'a, f32>>,
}

impl MeshData<'_> {
    /// Validate every input shape and all triangle indices. Runs before any
    /// GPU state is touched.
    pub fn validate(&self) -> RasterResult<()> {
        let n = self.points.dim().0;
        check_2d("points", self.points, 3)?;
        check_2d("trilist", self.trilist, 3)?;
        check_2d("tcoords", self.tcoords, 2)?;
        if self.tcoords.dim().0 != n {
            return Err(RasterError::shape(
                "tcoords",
                format!("({n}, 2)"),
                format!("({}, 2)", self.tcoords.dim().0),
            ));
        }
        if let Some(normals) = self.normals {
            check_2d("normals", normals, 3)?;
            if normals.dim().0 != n {
                return Err(RasterError::shape(
                    "normals",
                    format!("({n}, 3)"),
                    format!("({}, 3)", normals.dim().0),
                ));
            }
        }
        if let Some(interp) = self.interpolant {
            check_2d("interpolant", interp, 3)?;
            if interp.dim().0 != n {
                return Err(RasterError::shape(
                    "interpolant",
                    format!("({n}, 3)"),
                    format!("({}, 3)", interp.dim().0),
                ));
            }
        }
        for (t, tri) in self.trilist.rows().into_iter().enumerate() {
            for &idx in tri.iter() {
                if idx as usize >= n {
                    return Err(RasterError::shape(
                        "trilist",
                        format!("indices < {n}"),
                        format!("index {idx} in triangle {t}"),
                    ));
                }
            }
        }
        let (th, tw, tc) = self.texture.dim();
        if tc != 3 || th == 0 || tw == 0 {
            return Err(RasterError::shape(
                "texture",
                "(H, W, 3) with H, W >= 1",
                format!("({th}, {tw}, {tc})"),
            ));
        }
        Ok(())
    }

    /// Interleave the per-vertex streams. The interpolant defaults to the
    /// model-space points and normals default to zero; neither is ever
    /// transformed by the matrix pipeline.
    pub fn pack_vertices(&self) -> Vec<GpuVertex> {
        let n = self.points.dim().0;
        let mut verts = Vec::with_capacity(n);
        for i in 0..n {
            let position = [
                self.points[[i, 0]],
                self.points[[i, 1]],
                self.points[[i, 2]],
            ];
            let normal = match self.normals {
                Some(ns) => [ns[[i, 0]], ns[[i, 1]], ns[[i, 2]]],
                None => [0.0, 0.0, 0.0],
            };
            let tcoord = [self.tcoords[[i, 0]], self.tcoords[[i, 1]]];
            let interpolant = match self.interpolant {
                Some(fs) => [fs[[i, 0]], fs[[i, 1]], fs[[i, 2]]],
                None => position,
            };
            verts.push(GpuVertex {
                position,
                normal,
                tcoord,
                interpolant,
            });
        }
        verts
    }

    /// Upload the vertex and index streams.
    pub fn create_buffers(&self, device: &wgpu::Device) -> (wgpu::Buffer, wgpu::Buffer, u32) {
        let verts = self.pack_vertices();
        let indices: Vec<u32> = self.trilist.iter().copied().collect();

        let vbuf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("texraster-vertices"),
            contents: bytemuck::cast_slice(&verts),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let ibuf = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("texraster-indices"),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        (vbuf, ibuf, indices.len() as u32)
    }

    /// Texel stream for upload: rows flipped vertically so tcoord (0, 0)
    /// addresses the caller image's bottom-left texel, RGB expanded to RGBA.
    pub fn flipped_rgba_texels(&self) -> Vec<f32> {
        let (h, w, _) = self.texture.dim();
        let mut texels = Vec::with_capacity(h * w * 4);
        for y in (0..h).rev() {
            for x in 0..w {
                texels.push(self.texture[[y, x, 0]]);
                texels.push(self.texture[[y, x, 1]]);
                texels.push(self.texture[[y, x, 2]]);
                texels.push(1.0);
            }
        }
        texels
    }

    /// Create and fill the per-render texture.
    pub fn create_texture(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> (wgpu::Texture, wgpu::TextureView) {
        let (h, w, _) = self.texture.dim();
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("texraster-mesh-texture"),
            size: wgpu::Extent3d {
                width: w as u32,
                height: h as u32,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: MESH_TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let texels = self.flipped_rgba_texels();
        queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&texels),
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(w as u32 * 16),
                rows_per_image: Some(h as u32),
            },
            wgpu::Extent3d {
                width: w as u32,
                height: h as u32,
                depth_or_array_layers: 1,
            },
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        (texture, view)
    }
}

fn check_2d<T>(what: &str, view: ArrayView2<'_, T>, cols: usize) -> RasterResult<()> {
    if view.dim().1 != cols {
        return Err(RasterError::shape(
            what,
            format!("(N, {cols})"),
            format!("({}, {})", view.dim().0, view.dim().1),
        ));
    }
    Ok(())
}
