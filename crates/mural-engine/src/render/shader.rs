use super::SRC_IMAGE_COUNT;

/// Compiled shader handle issued by the external shader component.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ShaderId(pub u32);

/// A bindable shader: its handle plus the number of source slots it reads.
///
/// The core never compiles shader source; it only binds handles and checks
/// that draw requests supply exactly `source_count` source images.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Shader {
    pub id: ShaderId,
    source_count: u8,
}

impl Shader {
    /// Outputs transparent black. Used with [`BlendMode::Clear`](super::BlendMode::Clear).
    pub const CLEAR: Shader = Shader { id: ShaderId(0), source_count: 0 };
    /// Outputs the interpolated vertex color scale.
    pub const FILL: Shader = Shader { id: ShaderId(1), source_count: 0 };
    /// Samples source 0 (nearest) and multiplies by the vertex color scale.
    pub const TEXTURE: Shader = Shader { id: ShaderId(2), source_count: 1 };

    /// First id available to externally compiled shaders.
    pub const FIRST_CUSTOM_ID: u32 = 16;

    /// Describes an externally compiled shader.
    ///
    /// # Panics
    /// Panics if `source_count` exceeds [`SRC_IMAGE_COUNT`].
    pub const fn custom(id: ShaderId, source_count: usize) -> Self {
        assert!(source_count <= SRC_IMAGE_COUNT, "shader source_count exceeds SRC_IMAGE_COUNT");
        Self { id, source_count: source_count as u8 }
    }

    #[inline]
    pub const fn source_count(self) -> usize {
        self.source_count as usize
    }

    #[inline]
    pub fn is_builtin(self) -> bool {
        self.id.0 < Self::FIRST_CUSTOM_ID
    }
}
