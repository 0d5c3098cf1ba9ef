//! Model/view/projection transform state.
//!
//! Matrices are row-major single-precision at the API boundary and are only
//! replaced wholesale through the setters; there is no element-level mutation
//! path, so the engine never observes a half-written matrix. Internally the
//! state is `glam::Mat4`, packed column-major for the WGSL uniform block.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use ndarray::{Array2, ArrayView2};

use crate::error::{RasterError, RasterResult};

/// GPU-side layout of the transform uniform block (group 0, binding 0).
/// Column-major, matching WGSL `mat4x4<f32>` memory layout.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub struct TransformsRaw {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

/// The three homogeneous transform matrices applied to vertex positions:
/// clip position is `P * V * M * [x, y, z, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TransformSet {
    model: Mat4,
    view: Mat4,
    projection: Mat4,
}

impl Default for TransformSet {
    fn default() -> Self {
        Self::identity()
    }
}

impl TransformSet {
    /// All three matrices set to identity.
    pub fn identity() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
        }
    }

    pub fn set_model_matrix(&mut self, value: ArrayView2<'_, f32>) -> RasterResult<()> {
        self.model = mat4_from_rows(value, "model matrix")?;
        Ok(())
    }

    pub fn set_view_matrix(&mut self, value: ArrayView2<'_, f32>) -> RasterResult<()> {
        self.view = mat4_from_rows(value, "view matrix")?;
        Ok(())
    }

    pub fn set_projection_matrix(&mut self, value: ArrayView2<'_, f32>) -> RasterResult<()> {
        self.projection = mat4_from_rows(value, "projection matrix")?;
        Ok(())
    }

    pub fn model_matrix(&self) -> Array2<f32> {
        mat4_to_rows(self.model)
    }

    pub fn view_matrix(&self) -> Array2<f32> {
        mat4_to_rows(self.view)
    }

    pub fn projection_matrix(&self) -> Array2<f32> {
        mat4_to_rows(self.projection)
    }

    /// Pack the current state for upload to the transform uniform block.
    pub fn to_raw(&self) -> TransformsRaw {
        TransformsRaw {
            model: self.model.to_cols_array_2d(),
            view: self.view.to_cols_array_2d(),
            projection: self.projection.to_cols_array_2d(),
        }
    }
}

/// Validate a (4, 4) row-major view and convert it to a `Mat4`.
fn mat4_from_rows(value: ArrayView2<'_, f32>, what: &str) -> RasterResult<Mat4> {
    if value.dim() != (4, 4) {
        return Err(RasterError::shape(
            what,
            "(4, 4)",
            format!("({}, {})", value.dim().0, value.dim().1),
        ));
    }
    let mut rows = [[0.0f32; 4]; 4];
    for (i, row) in value.rows().into_iter().enumerate() {
        for (j, v) in row.iter().enumerate() {
            rows[i][j] = *v;
        }
    }
    // glam stores column-major; our API boundary is row-major.
    Ok(Mat4::from_cols_array_2d(&rows).transpose())
}

fn mat4_to_rows(m: Mat4) -> Array2<f32> {
    let rows = m.transpose().to_cols_array_2d();
    let mut out = Array2::<f32>::zeros((4, 4));
    for i in 0..4 {
        for j in 0..4 {
            out[[i, j]] = rows[i][j];
        }
    }
    out
}
