use crate::coords::Region;
use crate::driver::DriverError;
use crate::restorable::ImageId;

/// Errors surfaced by [`Graphics`](crate::core::Graphics).
///
/// Contract violations (`Invalid*`, `UseAfterDispose`, `PixelLength`) are
/// reported immediately and leave all state untouched. `DriverFailure` aborts
/// the current frame. `RestorationFailure` is terminal for the context.
#[derive(Debug, thiserror::Error)]
pub enum GraphicsError {
    #[error("invalid image size {width}x{height}")]
    InvalidSize { width: i32, height: i32 },

    #[error("region {region:?} is invalid for a {width}x{height} image")]
    InvalidRegion { region: Region, width: i32, height: i32 },

    #[error("pixel buffer has {actual} bytes, region needs {expected}")]
    PixelLength { expected: usize, actual: usize },

    #[error("invalid draw source: {0}")]
    InvalidSource(String),

    #[error("invalid vertex data: {0}")]
    InvalidVertices(String),

    #[error("image of {width}x{height} exceeds the maximum texture size {max}")]
    ImageTooLarge { width: i32, height: i32, max: u32 },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("image {0:?} was used after dispose")]
    UseAfterDispose(ImageId),

    #[error("driver failure: {0}")]
    DriverFailure(#[from] DriverError),

    #[error("restoring after device loss failed: {0}")]
    RestorationFailure(String),

    #[error("graphics context is unusable after a failed restoration")]
    ContextFailed,
}

pub type Result<T, E = GraphicsError> = std::result::Result<T, E>;
