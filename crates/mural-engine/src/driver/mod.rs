//! Driver adapter contract.
//!
//! The core never talks to a graphics API directly. Everything it needs from
//! the GPU goes through [`Driver`]:
//! - texture lifetime (create / delete)
//! - pixel transfer (upload / read back)
//! - one draw-triangles entry point
//! - a device-lost signal polled at frame boundaries
//!
//! [`SoftwareDriver`] is a deterministic CPU implementation used by tests and
//! headless tools.

mod error;
mod signal;
mod software;

pub use error::DriverError;
pub use signal::DeviceLostSignal;
pub use software::{DriverStats, SoftwareDriver};

use crate::coords::Region;
use crate::render::{BlendMode, FillRule, Shader, Vertex, SRC_IMAGE_COUNT};

/// Opaque driver texture handle.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub u64);

/// One draw-triangles call, in backing-texture texels.
#[derive(Debug, Clone, Copy)]
pub struct DrawCall<'a> {
    pub dst: TextureHandle,
    /// Source textures bound to the shader's slots; unused slots are `None`.
    pub sources: [Option<TextureHandle>; SRC_IMAGE_COUNT],
    /// Region of each source the shader may sample; sampling is clamped to it.
    ///
    /// Texture coordinates address source 0; slot `k` is sampled at the same
    /// offset relative to `src_regions[k]`.
    pub src_regions: [Region; SRC_IMAGE_COUNT],
    /// Scissor region inside `dst`; nothing outside it is touched.
    pub dst_region: Region,
    pub vertices: &'a [Vertex],
    pub indices: &'a [u32],
    pub blend: BlendMode,
    pub fill_rule: FillRule,
    pub shader: Shader,
}

/// Capability surface of a graphics backend.
///
/// Pixel buffers are tightly packed premultiplied RGBA8, row-major, covering
/// exactly the given region.
pub trait Driver {
    /// Creates a texture. Initial contents are unspecified.
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle, DriverError>;

    /// Deletes a texture. Deleting a texture lost with the device is a no-op.
    fn delete_texture(&mut self, texture: TextureHandle);

    fn upload_pixels(
        &mut self,
        texture: TextureHandle,
        region: Region,
        pixels: &[u8],
    ) -> Result<(), DriverError>;

    /// Synchronously reads back pixels. This stalls until the GPU is idle.
    fn read_pixels(&mut self, texture: TextureHandle, region: Region) -> Result<Vec<u8>, DriverError>;

    fn draw_triangles(&mut self, call: &DrawCall<'_>) -> Result<(), DriverError>;

    /// Signal raised (from any thread) when the device is lost.
    fn device_lost_signal(&self) -> DeviceLostSignal;

    /// Largest texture edge the backend accepts.
    fn max_texture_size(&self) -> u32 {
        8192
    }

    /// Whether this backend can lose its resources at all. Backends returning
    /// `false` skip restoration-log recording entirely.
    fn needs_restoring(&self) -> bool {
        true
    }
}
