use thiserror::Error;

/// Errors reported when a pipeline or projection is configured with invalid
/// parameters. These are raised before any work runs; geometric rejections
/// during detection are never reported as errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParameterError {
    #[error("steps per octave must be at least 1")]
    Steps,

    #[error("initial sigma must be greater than zero, got {0}")]
    InitialSigma(f32),

    #[error("descriptor width must be at least 1")]
    DescriptorWidth,

    #[error("max curvature ratio must be greater than zero, got {0}")]
    CurvatureRatio(f32),

    #[error("contrast threshold must not be negative, got {0}")]
    ContrastThreshold(f32),

    #[error("octave size bounds must satisfy 0 < min_size <= max_size, got {min}..{max}")]
    OctaveBounds { min: usize, max: usize },

    #[error("output resolution must be at least 1x1, got {0}x{1}")]
    Resolution(u32, u32),

    #[error("ray cast increment must be greater than zero, got {0}")]
    RayCastIncrement(f32),

    #[error("termination threshold out of range, 1 to 255 only")]
    Threshold,

    #[error("z scale must be greater than zero, got {0}")]
    ZScale(f32),

    #[error("rotation matrix is not invertible")]
    SingularRotation,
}

pub type Result<T> = std::result::Result<T, ParameterError>;
