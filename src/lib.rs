//! Deterministic offscreen rasterization of textured triangle meshes.
//!
//! One [`Rasterizer`] owns an offscreen wgpu context and a fixed-size pair of
//! float attachments. Each [`Rasterizer::render`] call takes a mesh (points,
//! triangle connectivity, texture coordinates, a float RGB texture, optional
//! normals and per-vertex float interpolant) and returns a color image, an
//! interpolant image, and a per-pixel coverage mask as `ndarray` arrays.
//!
//! Shading is programmable: WGSL vertex/fragment sources attach at runtime,
//! and their `@group(2)` uniforms are discovered by reflection and exposed
//! through typed get/set-by-name access.
//!
//! ```no_run
//! use ndarray::{array, Array3};
//! use texraster::Rasterizer;
//!
//! let mut engine = Rasterizer::new(100, 100)?;
//! let points = array![[-1.0f32, -1.0, 0.0], [1.0, -1.0, 0.0], [1.0, 1.0, 0.0], [-1.0, 1.0, 0.0]];
//! let trilist = array![[0u32, 1, 2], [2, 3, 0]];
//! let tcoords = array![[0.0f32, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
//! let texture = Array3::<f32>::zeros((100, 100, 3));
//! let out = engine.render(
//!     points.view(),
//!     trilist.view(),
//!     tcoords.view(),
//!     texture.view(),
//!     None,
//!     None,
//! )?;
//! assert!(out.mask[[50, 50]]);
//! # Ok::<(), texraster::RasterError>(())
//! ```

pub mod engine;
pub mod error;
pub mod gpu;
pub mod mesh;
pub mod shader;
pub mod target;
pub mod transforms;

pub use engine::{RenderOutput, Rasterizer};
pub use error::{RasterError, RasterResult};
pub use shader::{ShaderSet, ShaderStage, UniformType, UniformValue};
