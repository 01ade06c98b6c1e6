//! CPU reference driver.
//!
//! Deterministic and exact: nearest sampling, top-left fill convention, blending
//! in `f32` with round-to-nearest quantization. It also simulates device loss and
//! injected failures so restoration paths can be driven from tests.

mod raster;

use std::collections::HashMap;

use crate::coords::Region;

use super::{DeviceLostSignal, DrawCall, Driver, DriverError, TextureHandle};

/// Call counters since the driver was created.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct DriverStats {
    pub textures_created: u64,
    pub textures_deleted: u64,
    pub draw_calls: u64,
    pub uploads: u64,
    pub reads: u64,
}

pub(crate) struct SoftTexture {
    width: i32,
    height: i32,
    texels: Vec<[u8; 4]>,
}

impl SoftTexture {
    fn new(width: i32, height: i32) -> Self {
        // Real drivers give no guarantee here; garbage makes missing clears visible.
        Self {
            width,
            height,
            texels: vec![[0xCD, 0xCD, 0xCD, 0xFF]; (width * height) as usize],
        }
    }

    #[inline]
    fn bounds(&self) -> Region {
        Region::from_size(self.width, self.height)
    }

    #[inline]
    fn index(&self, x: i32, y: i32) -> usize {
        (y * self.width + x) as usize
    }
}

/// In-memory [`Driver`] implementation.
pub struct SoftwareDriver {
    textures: HashMap<TextureHandle, SoftTexture>,
    next_handle: u64,
    /// Handles below this were issued before the last device loss.
    lost_below: u64,
    signal: DeviceLostSignal,
    max_texture_size: u32,
    needs_restoring: bool,
    injected: Option<(u32, DriverError)>,
    stats: DriverStats,
}

impl Default for SoftwareDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareDriver {
    pub fn new() -> Self {
        Self {
            textures: HashMap::new(),
            next_handle: 1,
            lost_below: 0,
            signal: DeviceLostSignal::new(),
            max_texture_size: 4096,
            needs_restoring: true,
            injected: None,
            stats: DriverStats::default(),
        }
    }

    /// Simulates a backend that never loses resources.
    pub fn without_restoring(mut self) -> Self {
        self.needs_restoring = false;
        self
    }

    /// Drops every texture and raises the device-lost signal.
    pub fn lose_device(&mut self) {
        log::debug!("software driver: device lost ({} textures dropped)", self.textures.len());
        self.textures.clear();
        self.lost_below = self.next_handle;
        self.signal.raise();
    }

    /// Raises the device-lost signal while keeping texture contents readable,
    /// like backends that notify before releasing memory.
    pub fn signal_device_lost(&mut self) {
        self.signal.raise();
    }

    /// Makes the fallible call after `skip` successful ones fail with `error`.
    pub fn fail_after(&mut self, skip: u32, error: DriverError) {
        self.injected = Some((skip, error));
    }

    pub fn stats(&self) -> DriverStats {
        self.stats
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    fn check_injected(&mut self) -> Result<(), DriverError> {
        match self.injected.take() {
            Some((0, err)) => Err(err),
            Some((n, err)) => {
                self.injected = Some((n - 1, err));
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn missing(&self, texture: TextureHandle) -> DriverError {
        if texture.0 < self.lost_below {
            DriverError::DeviceLost
        } else {
            DriverError::UnknownTexture(texture)
        }
    }

    fn texture(&self, texture: TextureHandle) -> Result<&SoftTexture, DriverError> {
        self.textures.get(&texture).ok_or_else(|| self.missing(texture))
    }
}

impl Driver for SoftwareDriver {
    fn create_texture(&mut self, width: u32, height: u32) -> Result<TextureHandle, DriverError> {
        self.check_injected()?;
        if width == 0 || height == 0 || width > self.max_texture_size || height > self.max_texture_size {
            return Err(DriverError::Rejected(format!("texture size {width}x{height}")));
        }
        let handle = TextureHandle(self.next_handle);
        self.next_handle += 1;
        self.textures.insert(handle, SoftTexture::new(width as i32, height as i32));
        self.stats.textures_created += 1;
        Ok(handle)
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture).is_some() {
            self.stats.textures_deleted += 1;
        }
    }

    fn upload_pixels(
        &mut self,
        texture: TextureHandle,
        region: Region,
        pixels: &[u8],
    ) -> Result<(), DriverError> {
        self.check_injected()?;
        let missing = self.missing(texture);
        let tex = self.textures.get_mut(&texture).ok_or(missing)?;
        if region.is_empty() || !tex.bounds().contains(region) {
            return Err(DriverError::OutOfBounds { texture, region });
        }
        if pixels.len() != region.rgba_len() {
            return Err(DriverError::Rejected(format!(
                "upload of {} bytes into {region:?}",
                pixels.len()
            )));
        }

        let src: &[[u8; 4]] = bytemuck::cast_slice(pixels);
        let row = region.width as usize;
        for (j, line) in src.chunks_exact(row).enumerate() {
            let start = tex.index(region.x, region.y + j as i32);
            tex.texels[start..start + row].copy_from_slice(line);
        }
        self.stats.uploads += 1;
        Ok(())
    }

    fn read_pixels(&mut self, texture: TextureHandle, region: Region) -> Result<Vec<u8>, DriverError> {
        self.check_injected()?;
        let tex = self.texture(texture)?;
        if region.is_empty() || !tex.bounds().contains(region) {
            return Err(DriverError::OutOfBounds { texture, region });
        }

        let mut out = Vec::with_capacity(region.rgba_len());
        for y in region.y..region.max_y() {
            let start = tex.index(region.x, y);
            out.extend_from_slice(bytemuck::cast_slice(
                &tex.texels[start..start + region.width as usize],
            ));
        }
        self.stats.reads += 1;
        Ok(out)
    }

    fn draw_triangles(&mut self, call: &DrawCall<'_>) -> Result<(), DriverError> {
        self.check_injected()?;
        if call.sources.iter().flatten().any(|&s| s == call.dst) {
            return Err(DriverError::Rejected("destination bound as a source".into()));
        }
        if let Some(&bad) = call.indices.iter().find(|&&i| i as usize >= call.vertices.len()) {
            return Err(DriverError::Rejected(format!("index {bad} out of range")));
        }
        if call.indices.len() % 3 != 0 {
            return Err(DriverError::Rejected("index count is not a multiple of 3".into()));
        }

        // Take the destination out of the map so sources can be borrowed alongside it.
        let missing = self.missing(call.dst);
        let mut dst = self.textures.remove(&call.dst).ok_or(missing)?;
        let result = (|| {
            let mut sources = [None; crate::render::SRC_IMAGE_COUNT];
            for (slot, handle) in call.sources.iter().enumerate() {
                if let Some(h) = handle {
                    let tex = self.texture(*h)?;
                    if !tex.bounds().contains(call.src_regions[slot]) {
                        return Err(DriverError::OutOfBounds {
                            texture: *h,
                            region: call.src_regions[slot],
                        });
                    }
                    sources[slot] = Some(tex);
                }
            }
            raster::draw(&mut dst, &sources, call)
        })();
        self.textures.insert(call.dst, dst);
        result?;

        self.stats.draw_calls += 1;
        Ok(())
    }

    fn device_lost_signal(&self) -> DeviceLostSignal {
        self.signal.clone()
    }

    fn max_texture_size(&self) -> u32 {
        self.max_texture_size
    }

    fn needs_restoring(&self) -> bool {
        self.needs_restoring
    }
}
