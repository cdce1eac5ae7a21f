use thiserror::Error;

/// Errors reported by layer construction, parameter setup and the forward pass.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConvError {
    #[error("invalid convolution shape: {0}")]
    InvalidShape(String),

    #[error("invalid calibration for channel {channel}: min {min} > max {max}")]
    InvalidCalibration { channel: usize, min: f32, max: f32 },

    #[error("{what}: expected {expected} values, got {actual}")]
    ParameterLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("forward called before set_params")]
    NotInitialized,

    #[error("buffer mismatch: {0}")]
    BufferMismatch(String),
}

pub type Result<T> = std::result::Result<T, ConvError>;
