use crate::atlas::AtlasLimits;
use crate::error::{GraphicsError, Result};

/// Construction parameters for [`Graphics`](super::Graphics).
///
/// The defaults suit a typical 2D game: one 1024² atlas page holds hundreds of
/// sprites, anything 512 texels or larger gets its own texture.
#[derive(Debug, Clone)]
pub struct GraphicsConfig {
    /// Edge length of every atlas page. Must be a power of two.
    pub atlas_size: u32,

    /// Images whose padded width or height reaches this value get a dedicated
    /// texture instead of an atlas region.
    pub dedicated_threshold: u32,

    /// Transparent border kept around each atlas region.
    pub atlas_padding: u32,

    /// Logs holding more operations than this are replaced by a read-back
    /// snapshot at frame end. `None` disables compaction.
    pub compaction_threshold: Option<usize>,

    /// Upper bound on the vertex count of one merged draw call.
    pub max_batch_vertices: usize,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            atlas_size: 1024,
            dedicated_threshold: 512,
            atlas_padding: 1,
            compaction_threshold: Some(256),
            max_batch_vertices: 65536,
        }
    }
}

impl GraphicsConfig {
    /// Checks the configuration against itself and the driver's texture limit.
    pub fn validate(&self, max_texture_size: u32) -> Result<()> {
        let invalid = |msg: String| Err(GraphicsError::InvalidConfig(msg));

        if !self.atlas_size.is_power_of_two() {
            return invalid(format!("atlas_size {} is not a power of two", self.atlas_size));
        }
        if self.atlas_size > max_texture_size {
            return invalid(format!(
                "atlas_size {} exceeds the driver limit {max_texture_size}",
                self.atlas_size
            ));
        }
        if self.dedicated_threshold == 0 || self.dedicated_threshold > self.atlas_size {
            return invalid(format!(
                "dedicated_threshold {} must be in 1..={}",
                self.dedicated_threshold, self.atlas_size
            ));
        }
        if self.atlas_padding * 2 >= self.dedicated_threshold {
            return invalid(format!("atlas_padding {} leaves no room for images", self.atlas_padding));
        }
        if self.max_batch_vertices < 3 {
            return invalid("max_batch_vertices must allow one triangle".into());
        }
        if self.compaction_threshold == Some(0) {
            return invalid("compaction_threshold must be positive".into());
        }
        Ok(())
    }

    pub(crate) fn atlas_limits(&self, max_texture_size: u32) -> AtlasLimits {
        AtlasLimits {
            atlas_size: self.atlas_size,
            dedicated_threshold: self.dedicated_threshold,
            padding: self.atlas_padding,
            max_texture_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(GraphicsConfig::default().validate(4096).is_ok());
    }

    #[test]
    fn rejects_bad_values() {
        let bad = [
            GraphicsConfig { atlas_size: 1000, ..GraphicsConfig::default() },
            GraphicsConfig { atlas_size: 8192, ..GraphicsConfig::default() },
            GraphicsConfig { dedicated_threshold: 2048, ..GraphicsConfig::default() },
            GraphicsConfig { atlas_padding: 256, ..GraphicsConfig::default() },
            GraphicsConfig { max_batch_vertices: 2, ..GraphicsConfig::default() },
            GraphicsConfig { compaction_threshold: Some(0), ..GraphicsConfig::default() },
        ];
        for config in bad {
            assert!(
                matches!(config.validate(4096), Err(GraphicsError::InvalidConfig(_))),
                "{config:?} should be rejected"
            );
        }
    }
}
