//! The offscreen rasterization engine.
//!
//! One `Rasterizer` owns one GPU context, one fixed-size render target, the
//! transform state, and the active shader program. `render` is a blocking
//! call: it marshals the caller's mesh arrays, issues a single draw, and
//! reads both attachments back.
//!
//! Coordinate conventions: clip position is `P * V * M * [x, y, z, 1]`;
//! tcoord (0, 0) addresses the bottom-left of the caller's texture image;
//! output images are top-left origin. The interpolant attribute is never
//! transformed by the matrix pipeline, so with the default interpolant the
//! second output holds model-space point coordinates.

use bytemuck::bytes_of;
use ndarray::{Array2, Array3, ArrayView2, ArrayView3};

use crate::error::{RasterError, RasterResult};
use crate::gpu::GpuContext;
use crate::mesh::MeshData;
use crate::shader::{
    ShaderProgram, ShaderSet, ShaderStage, UniformValue, DEFAULT_FRAGMENT_SHADER,
    DEFAULT_VERTEX_SHADER, TEXTURE_GROUP, TRANSFORMS_BLOCK_SIZE,
};
use crate::target::RenderTarget;
use crate::transforms::TransformSet;

/// The three per-pixel outputs of one render call, all top-left origin.
#[derive(Debug)]
pub struct RenderOutput {
    /// (H, W, 3) color image.
    pub rgb: Array3<f32>,
    /// (H, W, 3) interpolated float attribute.
    pub interpolant: Array3<f32>,
    /// (H, W) coverage mask: true iff a triangle covered the pixel.
    pub mask: Array2<bool>,
}

pub struct Rasterizer {
    gpu: GpuContext,
    target: RenderTarget,
    transforms: TransformSet,
    transforms_buffer: wgpu::Buffer,
    sampler: wgpu::Sampler,
    program: ShaderProgram,
    clear_color: [f32; 4],
}

impl Rasterizer {
    /// Create an engine with a fixed `width` x `height` offscreen target,
    /// identity transforms, and the built-in textured-mesh program.
    pub fn new(width: u32, height: u32) -> RasterResult<Self> {
        let gpu = GpuContext::new()?;
        let target = RenderTarget::new(&gpu.device, width, height)?;

        let transforms = TransformSet::identity();
        let transforms_buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("texraster-transforms"),
            size: TRANSFORMS_BLOCK_SIZE,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        // Nearest + clamp-to-edge: deterministic sampling that keeps
        // float32 textures legal without the float32-filterable feature.
        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("texraster-sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let program = ShaderProgram::link(
            &gpu.device,
            &transforms_buffer,
            DEFAULT_VERTEX_SHADER,
            DEFAULT_FRAGMENT_SHADER,
        )?;

        log::info!("rasterizer ready: {width}x{height} offscreen target");

        Ok(Self {
            gpu,
            target,
            transforms,
            transforms_buffer,
            sampler,
            program,
            clear_color: [1.0, 1.0, 1.0, 0.0],
        })
    }

    /// Like [`Rasterizer::new`], with caller-supplied transform matrices.
    pub fn with_matrices(
        width: u32,
        height: u32,
        model: Option<ArrayView2<'_, f32>>,
        view: Option<ArrayView2<'_, f32>>,
        projection: Option<ArrayView2<'_, f32>>,
    ) -> RasterResult<Self> {
        let mut engine = Self::new(width, height)?;
        if let Some(m) = model {
            engine.set_model_matrix(m)?;
        }
        if let Some(v) = view {
            engine.set_view_matrix(v)?;
        }
        if let Some(p) = projection {
            engine.set_projection_matrix(p)?;
        }
        Ok(engine)
    }

    pub fn width(&self) -> u32 {
        self.target.width()
    }

    pub fn height(&self) -> u32 {
        self.target.height()
    }

    pub fn model_matrix(&self) -> Array2<f32> {
        self.transforms.model_matrix()
    }

    pub fn view_matrix(&self) -> Array2<f32> {
        self.transforms.view_matrix()
    }

    pub fn projection_matrix(&self) -> Array2<f32> {
        self.transforms.projection_matrix()
    }

    pub fn set_model_matrix(&mut self, value: ArrayView2<'_, f32>) -> RasterResult<()> {
        self.transforms.set_model_matrix(value)
    }

    pub fn set_view_matrix(&mut self, value: ArrayView2<'_, f32>) -> RasterResult<()> {
        self.transforms.set_view_matrix(value)
    }

    pub fn set_projection_matrix(&mut self, value: ArrayView2<'_, f32>) -> RasterResult<()> {
        self.transforms.set_projection_matrix(value)
    }

    /// Clear color of the color+mask attachment. The alpha channel feeds the
    /// coverage mask, so a non-zero clear alpha makes every pixel read as
    /// covered.
    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    /// Compile and link a new shader set, replacing the active program.
    ///
    /// Omitted vertex/fragment stages fall back to the built-in textured-mesh
    /// stages. On failure the previous program stays active. With
    /// `carry_over_uniforms`, explicitly-set uniforms whose name and type
    /// survive into the new program keep their values; without it the engine
    /// resets to the default view (identity transforms, default uniforms).
    pub fn attach_shaders(&mut self, set: ShaderSet, carry_over_uniforms: bool) -> RasterResult<()> {
        if set.geometry.is_some() {
            return Err(RasterError::CompileLink {
                stage: ShaderStage::Geometry,
                log: "geometry shaders are not supported by this backend".into(),
            });
        }
        let vertex_src = set.vertex.as_deref().unwrap_or(DEFAULT_VERTEX_SHADER);
        let fragment_src = set.fragment.as_deref().unwrap_or(DEFAULT_FRAGMENT_SHADER);

        let mut program = ShaderProgram::link(
            &self.gpu.device,
            &self.transforms_buffer,
            vertex_src,
            fragment_src,
        )?;

        if carry_over_uniforms {
            program.carry_uniforms_from(&self.gpu.queue, &self.program);
        } else {
            self.transforms = TransformSet::identity();
        }
        self.program = program;
        log::info!(
            "attached shader program with {} active uniform(s)",
            self.program.active_uniform_names().len()
        );
        Ok(())
    }

    /// Names of the uniforms active under the current program.
    pub fn active_uniform_names(&self) -> Vec<String> {
        self.program.active_uniform_names()
    }

    /// Last explicitly-set value of an active uniform; `None` while it still
    /// holds its zero default.
    pub fn get_uniform(&self, name: &str) -> RasterResult<Option<UniformValue>> {
        self.program.get_uniform(name)
    }

    pub fn set_uniform(&mut self, name: &str, value: UniformValue) -> RasterResult<()> {
        self.program.set_uniform(&self.gpu.queue, name, value)
    }

    /// Rasterize one textured mesh and read back color, interpolant, and
    /// coverage mask.
    ///
    /// `interpolant` defaults to `points`, riding through the pipeline in
    /// model space. `normals` are passed to the program verbatim when given
    /// and zero otherwise; this layer never derives them from topology.
    pub fn render<'a>(
        &mut self,
        points: ArrayView2<'a, f32>,
        trilist: ArrayView2<'a, u32>,
        tcoords: ArrayView2<'a, f32>,
        texture: ArrayView3<'a, f32>,
        normals: Option<ArrayView2<'a, f32>>,
        interpolant: Option<ArrayView2<'a, f32>>,
    ) -> RasterResult<RenderOutput> {
        let mesh = MeshData {
            points,
            trilist,
            tcoords,
            texture,
            normals,
            interpolant,
        };
        mesh.validate()?;

        log::debug!(
            "render: {} vertices, {} triangles, {}x{} texture",
            points.dim().0,
            trilist.dim().0,
            texture.dim().1,
            texture.dim().0,
        );

        let device = &self.gpu.device;
        let queue = &self.gpu.queue;

        queue.write_buffer(
            &self.transforms_buffer,
            0,
            bytes_of(&self.transforms.to_raw()),
        );
        let (vbuf, ibuf, index_count) = mesh.create_buffers(device);
        let (_texture, texture_view) = mesh.create_texture(device, queue);
        let texture_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texraster-texture-group"),
            layout: self.program.texture_layout(),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&texture_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("texraster-render-encoder"),
        });
        {
            let [r, g, b, a] = self.clear_color;
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("texraster-render-pass"),
                color_attachments: &[
                    Some(wgpu::RenderPassColorAttachment {
                        view: self.target.color_view(),
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color {
                                r: r as f64,
                                g: g as f64,
                                b: b as f64,
                                a: a as f64,
                            }),
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                    Some(wgpu::RenderPassColorAttachment {
                        view: self.target.interpolant_view(),
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                ],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: self.target.depth_view(),
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(self.program.pipeline());
            self.program.bind(&mut pass);
            pass.set_bind_group(TEXTURE_GROUP, &texture_group, &[]);
            pass.set_vertex_buffer(0, vbuf.slice(..));
            pass.set_index_buffer(ibuf.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..index_count, 0, 0..1);
        }
        queue.submit([encoder.finish()]);
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(RasterError::device(format!("render failed: {err}")));
        }

        let color = self.target.read_color(device, queue)?;
        let interp = self.target.read_interpolant(device, queue)?;
        Ok(self.split_outputs(color, interp))
    }

    /// Split the two tight RGBA readbacks into the caller-facing arrays.
    fn split_outputs(&self, color: Vec<f32>, interp: Vec<f32>) -> RenderOutput {
        let (h, w) = (self.height() as usize, self.width() as usize);
        let mut rgb = Array3::<f32>::zeros((h, w, 3));
        let mut interpolant = Array3::<f32>::zeros((h, w, 3));
        let mut mask = Array2::<bool>::default((h, w));
        for y in 0..h {
            for x in 0..w {
                let o = (y * w + x) * 4;
                for c in 0..3 {
                    rgb[[y, x, c]] = color[o + c];
                    interpolant[[y, x, c]] = interp[o + c];
                }
                mask[[y, x]] = color[o + 3] != 0.0;
            }
        }
        RenderOutput {
            rgb,
            interpolant,
            mask,
        }
    }
}
