//! Central error handling for the texraster engine.
//!
//! Provides a unified `RasterError` enum with consistent categorization:
//! recoverable input errors (shape, uniform access) are distinguished from
//! fatal context/GPU failures.

use crate::shader::ShaderStage;

/// Centralized error type for all engine operations.
#[derive(thiserror::Error, Debug)]
pub enum RasterError {
    /// An input array had the wrong dimensions. Recoverable: fix the input
    /// and retry; no GPU state was touched.
    #[error("Shape error: {what} expected {expected}, got {got}")]
    Shape {
        what: String,
        expected: String,
        got: String,
    },

    /// The offscreen context or its attachments could not be created. The
    /// engine instance is unusable.
    #[error("Initialization error: {0}")]
    Init(String),

    /// Shader source failed to parse or validate. The previously active
    /// program remains bound.
    #[error("Compile/link error in {stage} stage:\n{log}")]
    CompileLink { stage: ShaderStage, log: String },

    /// Uniform access against a name that is not active under the current
    /// program.
    #[error("Unknown uniform: {0:?} is not in the active uniform set")]
    UnknownUniform(String),

    /// Uniform value did not match the declared type of the uniform.
    #[error("Type mismatch for uniform {name:?}: expected {expected}, got {got}")]
    TypeMismatch {
        name: String,
        expected: String,
        got: String,
    },

    /// GPU-side failure during a render or upload. Fatal for the call.
    #[error("Device error: {0}")]
    Device(String),

    /// Failure while reading an attachment back to the CPU.
    #[error("Readback error: {0}")]
    Readback(String),
}

impl RasterError {
    pub fn shape<W, E, G>(what: W, expected: E, got: G) -> Self
    where
        W: ToString,
        E: ToString,
        G: ToString,
    {
        RasterError::Shape {
            what: what.to_string(),
            expected: expected.to_string(),
            got: got.to_string(),
        }
    }

    pub fn init<T: ToString>(msg: T) -> Self {
        RasterError::Init(msg.to_string())
    }

    pub fn device<T: ToString>(msg: T) -> Self {
        RasterError::Device(msg.to_string())
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        RasterError::Readback(msg.to_string())
    }
}

/// Result type alias for engine operations.
pub type RasterResult<T> = Result<T, RasterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_error_names_expected_and_got() {
        let err = RasterError::shape("points", "(N, 3)", "(7, 2)");
        let msg = err.to_string();
        assert!(msg.contains("points"));
        assert!(msg.contains("(N, 3)"));
        assert!(msg.contains("(7, 2)"));
    }

    #[test]
    fn unknown_uniform_names_the_offender() {
        let err = RasterError::UnknownUniform("light_dir".into());
        assert!(err.to_string().contains("light_dir"));
    }
}
