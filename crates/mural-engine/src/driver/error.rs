use crate::coords::Region;
use crate::render::ShaderId;

use super::TextureHandle;

/// Failure reported by a [`Driver`](super::Driver) call.
///
/// None of these are retried by the core: a failed flush aborts the frame and a
/// failed replay aborts restoration.
#[derive(Debug, Clone, Eq, PartialEq, thiserror::Error)]
pub enum DriverError {
    /// The device was lost; every texture created before the loss is gone.
    #[error("graphics device was lost")]
    DeviceLost,

    #[error("unknown texture {0:?}")]
    UnknownTexture(TextureHandle),

    #[error("shader {0:?} is not supported by this driver")]
    UnsupportedShader(ShaderId),

    #[error("region {region:?} is outside texture {texture:?}")]
    OutOfBounds { texture: TextureHandle, region: Region },

    #[error("driver rejected the call: {0}")]
    Rejected(String),
}
