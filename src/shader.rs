//! Shader program management: WGSL compilation, validation, uniform
//! reflection, and typed get/set-by-name access.
//!
//! A program is built from a vertex and a fragment WGSL module, compiled
//! separately (mirroring per-stage compilation units) and linked into one
//! render pipeline. The binding interface is fixed by convention:
//!
//! - group 0, binding 0: `var<uniform>` transform block (engine-owned),
//! - group 1, binding 0/1: `texture_2d<f32>` + `sampler` (engine-owned),
//! - group 2: user uniforms, one `var<uniform>` global per binding.
//!
//! Every group-2 global that the stage entry point actually uses becomes an
//! *active uniform*, addressable by its WGSL name. Unused globals are ignored,
//! matching how a GL linker drops inactive uniforms.

use std::collections::BTreeMap;
use std::fmt;

use bytemuck::bytes_of;
use naga::valid::{Capabilities, ValidationFlags, Validator};

use crate::error::{RasterError, RasterResult};
use crate::mesh::GpuVertex;
use crate::target::{COLOR_FORMAT, DEPTH_FORMAT, INTERPOLANT_FORMAT};

/// Bind group reserved for the engine's transform block.
pub const TRANSFORMS_GROUP: u32 = 0;
/// Bind group reserved for the per-render texture and its sampler.
pub const TEXTURE_GROUP: u32 = 1;
/// Bind group holding user uniforms discovered by reflection.
pub const USER_UNIFORM_GROUP: u32 = 2;

/// Byte size of the transform uniform block (three mat4x4<f32>).
pub const TRANSFORMS_BLOCK_SIZE: u64 = 192;

/// Per-slot uniform buffer size. Large enough for the biggest supported
/// uniform type (mat4x4<f32>).
const UNIFORM_SLOT_SIZE: u64 = 64;

pub const DEFAULT_VERTEX_SHADER: &str = include_str!("shaders/mesh_vs.wgsl");
pub const DEFAULT_FRAGMENT_SHADER: &str = include_str!("shaders/mesh_fs.wgsl");

/// Identifies the shader stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Geometry,
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderStage::Vertex => write!(f, "vertex"),
            ShaderStage::Fragment => write!(f, "fragment"),
            ShaderStage::Geometry => write!(f, "geometry"),
        }
    }
}

/// A set of shader stage sources to attach. Omitted stages fall back to the
/// built-in textured-mesh program.
#[derive(Debug, Clone, Default)]
pub struct ShaderSet {
    pub vertex: Option<String>,
    pub fragment: Option<String>,
    pub geometry: Option<String>,
}

impl ShaderSet {
    pub fn vertex<S: Into<String>>(mut self, src: S) -> Self {
        self.vertex = Some(src.into());
        self
    }

    pub fn fragment<S: Into<String>>(mut self, src: S) -> Self {
        self.fragment = Some(src.into());
        self
    }

    pub fn geometry<S: Into<String>>(mut self, src: S) -> Self {
        self.geometry = Some(src.into());
        self
    }
}

/// Declared type of a reflected uniform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniformType {
    Float,
    Int,
    Uint,
    Vec2,
    Vec3,
    Vec4,
    Mat4,
}

impl fmt::Display for UniformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UniformType::Float => "f32",
            UniformType::Int => "i32",
            UniformType::Uint => "u32",
            UniformType::Vec2 => "vec2<f32>",
            UniformType::Vec3 => "vec3<f32>",
            UniformType::Vec4 => "vec4<f32>",
            UniformType::Mat4 => "mat4x4<f32>",
        };
        write!(f, "{name}")
    }
}

/// A typed uniform value. Matrices are row-major at this boundary, consistent
/// with the transform setters, and are transposed on upload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Float(f32),
    Int(i32),
    Uint(u32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Mat4([[f32; 4]; 4]),
}

impl UniformValue {
    pub fn ty(&self) -> UniformType {
        match self {
            UniformValue::Float(_) => UniformType::Float,
            UniformValue::Int(_) => UniformType::Int,
            UniformValue::Uint(_) => UniformType::Uint,
            UniformValue::Vec2(_) => UniformType::Vec2,
            UniformValue::Vec3(_) => UniformType::Vec3,
            UniformValue::Vec4(_) => UniformType::Vec4,
            UniformValue::Mat4(_) => UniformType::Mat4,
        }
    }

    fn to_bytes(self) -> Vec<u8> {
        match self {
            UniformValue::Float(v) => bytes_of(&v).to_vec(),
            UniformValue::Int(v) => bytes_of(&v).to_vec(),
            UniformValue::Uint(v) => bytes_of(&v).to_vec(),
            UniformValue::Vec2(v) => bytes_of(&v).to_vec(),
            UniformValue::Vec3(v) => bytes_of(&v).to_vec(),
            UniformValue::Vec4(v) => bytes_of(&v).to_vec(),
            UniformValue::Mat4(rows) => {
                // WGSL mat4x4<f32> is column-major in memory.
                let mut cols = [[0.0f32; 4]; 4];
                for (i, row) in rows.iter().enumerate() {
                    for (j, v) in row.iter().enumerate() {
                        cols[j][i] = *v;
                    }
                }
                bytes_of(&cols).to_vec()
            }
        }
    }
}

struct UniformSlot {
    binding: u32,
    ty: UniformType,
    value: Option<UniformValue>,
    buffer: wgpu::Buffer,
}

/// Result of reflecting one compiled stage.
#[derive(Debug)]
struct StageReflection {
    module: naga::Module,
    info: naga::valid::ModuleInfo,
    entry_point: String,
}

/// Reflected binding interface, merged across stages.
#[derive(Default)]
struct Interface {
    uniforms: BTreeMap<String, (u32, UniformType)>,
}

/// A linked shader program with its pipeline and reflected uniform set.
pub struct ShaderProgram {
    pipeline: wgpu::RenderPipeline,
    transforms_group: wgpu::BindGroup,
    texture_layout: wgpu::BindGroupLayout,
    uniform_group: wgpu::BindGroup,
    uniforms: BTreeMap<String, UniformSlot>,
}

impl ShaderProgram {
    /// Compile, reflect, and link a vertex/fragment source pair against the
    /// engine's fixed attachment formats and vertex layout.
    pub fn link(
        device: &wgpu::Device,
        transforms_buffer: &wgpu::Buffer,
        vertex_src: &str,
        fragment_src: &str,
    ) -> RasterResult<Self> {
        let vs = reflect_stage(ShaderStage::Vertex, vertex_src)?;
        let fs = reflect_stage(ShaderStage::Fragment, fragment_src)?;

        let mut interface = Interface::default();
        collect_interface(ShaderStage::Vertex, &vs, &mut interface)?;
        collect_interface(ShaderStage::Fragment, &fs, &mut interface)?;

        let vs_module = create_module(device, ShaderStage::Vertex, vertex_src)?;
        let fs_module = create_module(device, ShaderStage::Fragment, fragment_src)?;

        let transforms_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("texraster-transforms-layout"),
                entries: &[wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                }],
            });

        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texraster-texture-layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::NonFiltering),
                    count: None,
                },
            ],
        });

        let uniform_entries: Vec<wgpu::BindGroupLayoutEntry> = interface
            .uniforms
            .values()
            .map(|(binding, _)| wgpu::BindGroupLayoutEntry {
                binding: *binding,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect();
        let uniform_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("texraster-uniform-layout"),
            entries: &uniform_entries,
        });

        // One small buffer per uniform slot; set-by-name is a plain
        // write_buffer with no offset bookkeeping.
        let mut uniforms = BTreeMap::new();
        for (name, (binding, ty)) in &interface.uniforms {
            let buffer = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(&format!("texraster-uniform-{name}")),
                size: UNIFORM_SLOT_SIZE,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            uniforms.insert(
                name.clone(),
                UniformSlot {
                    binding: *binding,
                    ty: *ty,
                    value: None,
                    buffer,
                },
            );
        }

        let uniform_group_entries: Vec<wgpu::BindGroupEntry> = uniforms
            .values()
            .map(|slot| wgpu::BindGroupEntry {
                binding: slot.binding,
                resource: slot.buffer.as_entire_binding(),
            })
            .collect();
        let uniform_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texraster-uniform-group"),
            layout: &uniform_layout,
            entries: &uniform_group_entries,
        });

        let transforms_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("texraster-transforms-group"),
            layout: &transforms_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: transforms_buffer.as_entire_binding(),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("texraster-pipeline-layout"),
            bind_group_layouts: &[&transforms_layout, &texture_layout, &uniform_layout],
            push_constant_ranges: &[],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("texraster-pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &vs_module,
                entry_point: &vs.entry_point,
                buffers: &[GpuVertex::layout()],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Back),
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            fragment: Some(wgpu::FragmentState {
                module: &fs_module,
                entry_point: &fs.entry_point,
                targets: &[
                    Some(wgpu::ColorTargetState {
                        format: COLOR_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    }),
                    Some(wgpu::ColorTargetState {
                        format: INTERPOLANT_FORMAT,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    }),
                ],
            }),
            multiview: None,
        });
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(RasterError::CompileLink {
                stage: ShaderStage::Fragment,
                log: format!("pipeline link failed: {err}"),
            });
        }

        log::debug!(
            "linked shader program: vs={:?} fs={:?} uniforms={:?}",
            vs.entry_point,
            fs.entry_point,
            interface.uniforms.keys().collect::<Vec<_>>()
        );

        Ok(Self {
            pipeline,
            transforms_group,
            texture_layout,
            uniform_group,
            uniforms,
        })
    }

    pub fn pipeline(&self) -> &wgpu::RenderPipeline {
        &self.pipeline
    }

    /// Layout for the per-render texture bind group.
    pub fn texture_layout(&self) -> &wgpu::BindGroupLayout {
        &self.texture_layout
    }

    /// Set the engine-owned bind groups on a render pass. The texture group
    /// is per-render and bound by the caller.
    pub fn bind<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>) {
        pass.set_bind_group(TRANSFORMS_GROUP, &self.transforms_group, &[]);
        pass.set_bind_group(USER_UNIFORM_GROUP, &self.uniform_group, &[]);
    }

    pub fn active_uniform_names(&self) -> Vec<String> {
        self.uniforms.keys().cloned().collect()
    }

    /// Last explicitly-set value of a uniform, or `None` if it still holds
    /// its zero default.
    pub fn get_uniform(&self, name: &str) -> RasterResult<Option<UniformValue>> {
        let slot = self
            .uniforms
            .get(name)
            .ok_or_else(|| RasterError::UnknownUniform(name.to_string()))?;
        Ok(slot.value)
    }

    pub fn set_uniform(
        &mut self,
        queue: &wgpu::Queue,
        name: &str,
        value: UniformValue,
    ) -> RasterResult<()> {
        let slot = self
            .uniforms
            .get_mut(name)
            .ok_or_else(|| RasterError::UnknownUniform(name.to_string()))?;
        if value.ty() != slot.ty {
            return Err(RasterError::TypeMismatch {
                name: name.to_string(),
                expected: slot.ty.to_string(),
                got: value.ty().to_string(),
            });
        }
        queue.write_buffer(&slot.buffer, 0, &value.to_bytes());
        slot.value = Some(value);
        Ok(())
    }

    /// Re-apply every explicitly-set uniform of `old` whose name and type are
    /// also active under this program.
    pub fn carry_uniforms_from(&mut self, queue: &wgpu::Queue, old: &ShaderProgram) {
        let names: Vec<String> = self.uniforms.keys().cloned().collect();
        for name in names {
            let Some(old_slot) = old.uniforms.get(&name) else {
                continue;
            };
            let Some(value) = old_slot.value else {
                continue;
            };
            // Type changes across programs drop the old value.
            if self.uniforms[&name].ty == old_slot.ty {
                let _ = self.set_uniform(queue, &name, value);
            }
        }
    }
}

/// Parse and validate one WGSL stage, and locate its single entry point.
fn reflect_stage(stage: ShaderStage, source: &str) -> RasterResult<StageReflection> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| RasterError::CompileLink {
        stage,
        log: e.emit_to_string(source),
    })?;

    let info = Validator::new(ValidationFlags::all(), Capabilities::all())
        .validate(&module)
        .map_err(|e| RasterError::CompileLink {
            stage,
            log: e.as_inner().to_string(),
        })?;

    let wanted = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
        ShaderStage::Geometry => {
            return Err(RasterError::CompileLink {
                stage,
                log: "geometry shaders are not supported by this backend".into(),
            })
        }
    };

    let mut entry_points = module.entry_points.iter().filter(|ep| ep.stage == wanted);
    let entry_point = match (entry_points.next(), entry_points.next()) {
        (Some(ep), None) => ep.name.clone(),
        (None, _) => {
            return Err(RasterError::CompileLink {
                stage,
                log: format!("source declares no @{stage} entry point"),
            })
        }
        (Some(_), Some(_)) => {
            return Err(RasterError::CompileLink {
                stage,
                log: format!("source declares more than one @{stage} entry point"),
            })
        }
    };

    Ok(StageReflection {
        module,
        info,
        entry_point,
    })
}

/// Merge one stage's bindings into the program interface, enforcing the
/// group conventions.
fn collect_interface(
    stage: ShaderStage,
    refl: &StageReflection,
    interface: &mut Interface,
) -> RasterResult<()> {
    let wanted = match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
        ShaderStage::Geometry => unreachable!("rejected during reflection"),
    };
    let ep_index = refl
        .module
        .entry_points
        .iter()
        .position(|ep| ep.stage == wanted && ep.name == refl.entry_point)
        .expect("entry point located during reflection");
    let ep_info = refl.info.get_entry_point(ep_index);

    for (handle, var) in refl.module.global_variables.iter() {
        // Inactive globals do not become uniforms, matching GL linker
        // behavior for unused declarations.
        if ep_info[handle].is_empty() {
            continue;
        }
        let Some(binding) = &var.binding else {
            continue;
        };
        let ty = &refl.module.types[var.ty].inner;

        match binding.group {
            TRANSFORMS_GROUP => {
                if binding.binding != 0 || var.space != naga::AddressSpace::Uniform {
                    return Err(bad_binding(stage, binding, "group 0 holds only the transform block at binding 0"));
                }
                let span = ty.size(refl.module.to_ctx()) as u64;
                if span > TRANSFORMS_BLOCK_SIZE {
                    return Err(RasterError::CompileLink {
                        stage,
                        log: format!(
                            "transform block is {span} bytes; the engine provides {TRANSFORMS_BLOCK_SIZE} (three mat4x4<f32>)"
                        ),
                    });
                }
            }
            TEXTURE_GROUP => match (binding.binding, ty) {
                (0, naga::TypeInner::Image { dim, arrayed: false, class }) => {
                    let ok = *dim == naga::ImageDimension::D2
                        && matches!(
                            class,
                            naga::ImageClass::Sampled { kind: naga::ScalarKind::Float, multi: false }
                        );
                    if !ok {
                        return Err(bad_binding(stage, binding, "texture binding must be texture_2d<f32>"));
                    }
                }
                (1, naga::TypeInner::Sampler { comparison: false }) => {}
                _ => {
                    return Err(bad_binding(
                        stage,
                        binding,
                        "group 1 holds texture_2d<f32> at binding 0 and a sampler at binding 1",
                    ))
                }
            },
            USER_UNIFORM_GROUP => {
                if var.space != naga::AddressSpace::Uniform {
                    return Err(bad_binding(stage, binding, "group 2 bindings must be var<uniform>"));
                }
                let name = var.name.clone().ok_or_else(|| {
                    bad_binding(stage, binding, "group 2 uniforms must be named globals")
                })?;
                let uniform_ty = uniform_type_of(ty).ok_or_else(|| RasterError::CompileLink {
                    stage,
                    log: format!(
                        "uniform {name:?} has an unsupported type; supported: f32, i32, u32, vec2/3/4<f32>, mat4x4<f32>"
                    ),
                })?;
                match interface.uniforms.get(&name) {
                    Some((b, t)) if *b == binding.binding && *t == uniform_ty => {}
                    Some(_) => {
                        return Err(RasterError::CompileLink {
                            stage,
                            log: format!("uniform {name:?} is declared with conflicting binding or type across stages"),
                        })
                    }
                    None => {
                        if interface.uniforms.values().any(|(b, _)| *b == binding.binding) {
                            return Err(RasterError::CompileLink {
                                stage,
                                log: format!(
                                    "uniform {name:?} reuses @binding({}) already taken in group 2",
                                    binding.binding
                                ),
                            });
                        }
                        interface.uniforms.insert(name, (binding.binding, uniform_ty));
                    }
                }
            }
            group => {
                return Err(RasterError::CompileLink {
                    stage,
                    log: format!("binding group {group} is out of range; groups 0-2 are available"),
                })
            }
        }
    }
    Ok(())
}

fn bad_binding(stage: ShaderStage, binding: &naga::ResourceBinding, msg: &str) -> RasterError {
    RasterError::CompileLink {
        stage,
        log: format!(
            "invalid binding @group({}) @binding({}): {msg}",
            binding.group, binding.binding
        ),
    }
}

fn uniform_type_of(ty: &naga::TypeInner) -> Option<UniformType> {
    use naga::{ScalarKind, TypeInner, VectorSize};
    match ty {
        TypeInner::Scalar(s) if s.kind == ScalarKind::Float && s.width == 4 => {
            Some(UniformType::Float)
        }
        TypeInner::Scalar(s) if s.kind == ScalarKind::Sint && s.width == 4 => {
            Some(UniformType::Int)
        }
        TypeInner::Scalar(s) if s.kind == ScalarKind::Uint && s.width == 4 => {
            Some(UniformType::Uint)
        }
        TypeInner::Vector { size, scalar } if scalar.kind == ScalarKind::Float && scalar.width == 4 => {
            match size {
                VectorSize::Bi => Some(UniformType::Vec2),
                VectorSize::Tri => Some(UniformType::Vec3),
                VectorSize::Quad => Some(UniformType::Vec4),
            }
        }
        TypeInner::Matrix { columns: VectorSize::Quad, rows: VectorSize::Quad, scalar }
            if scalar.kind == ScalarKind::Float && scalar.width == 4 =>
        {
            Some(UniformType::Mat4)
        }
        _ => None,
    }
}

/// Create a wgpu shader module, converting validation failures into
/// `CompileLink` with the stage attached.
fn create_module(
    device: &wgpu::Device,
    stage: ShaderStage,
    source: &str,
) -> RasterResult<wgpu::ShaderModule> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(&format!("texraster-{stage}-shader")),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    if let Some(err) = pollster::block_on(device.pop_error_scope()) {
        return Err(RasterError::CompileLink {
            stage,
            log: err.to_string(),
        });
    }
    Ok(module)
}
