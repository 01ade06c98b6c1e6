use crate::atlas::{AtlasAllocator, Placement};
use crate::command::{Command, CommandQueue, DrawTrianglesCommand, FlushStats};
use crate::coords::Region;
use crate::driver::{DeviceLostSignal, Driver, DriverError};
use crate::error::{GraphicsError, Result};
use crate::paint::pixels;
use crate::render::{BlendMode, FillRule, Shader, Vertex, SRC_IMAGE_COUNT};
use crate::restorable::{
    self, ContextState, DrawOperation, ImageId, ImageRecord, ImageTable, RestorationLog,
    RestoreReport,
};

use super::GraphicsConfig;

/// A draw-triangles request, in the destination image's coordinates.
///
/// Texture coordinates address source 0 in its own texels; the other slots are
/// sampled at the same offset.
#[derive(Debug, Clone, Copy)]
pub struct DrawTriangles<'a> {
    pub sources: [Option<ImageId>; SRC_IMAGE_COUNT],
    pub vertices: &'a [Vertex],
    pub indices: &'a [u32],
    pub blend: BlendMode,
    pub fill_rule: FillRule,
    pub shader: Shader,
    /// Clip region; `None` means the whole destination.
    pub dst_region: Option<Region>,
}

impl<'a> DrawTriangles<'a> {
    /// Source-over, no sources, no clip.
    pub fn new(shader: Shader, vertices: &'a [Vertex], indices: &'a [u32]) -> Self {
        Self {
            sources: [None; SRC_IMAGE_COUNT],
            vertices,
            indices,
            blend: BlendMode::SourceOver,
            fill_rule: FillRule::FillAll,
            shader,
            dst_region: None,
        }
    }

    /// Binds `image` to source slot `slot`.
    ///
    /// # Panics
    /// Panics if `slot >= SRC_IMAGE_COUNT`.
    pub fn with_source(mut self, slot: usize, image: ImageId) -> Self {
        self.sources[slot] = Some(image);
        self
    }

    pub fn with_blend(mut self, blend: BlendMode) -> Self {
        self.blend = blend;
        self
    }

    pub fn with_fill_rule(mut self, fill_rule: FillRule) -> Self {
        self.fill_rule = fill_rule;
        self
    }

    pub fn with_clip(mut self, region: Region) -> Self {
        self.dst_region = Some(region);
        self
    }
}

/// Summary of one [`Graphics::end_frame`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub frame: u64,
    /// Stats of the frame-end flush; zero when the frame ended in a restoration.
    pub flush: FlushStats,
    pub restored: Option<RestoreReport>,
    /// Stale images re-based on a read-back snapshot.
    pub resolved: usize,
    /// Long logs collapsed into a snapshot.
    pub compacted: usize,
}

/// Graphics context: the only entry point to images.
///
/// Owns the driver, the command queue, the atlas allocator and every image's
/// restoration log. Must stay on the rendering thread; device loss raised from
/// other threads is acted on in [`end_frame`](Self::end_frame).
///
/// Nothing reaches the driver until [`flush`](Self::flush),
/// [`read_pixels`](Self::read_pixels) or [`end_frame`](Self::end_frame).
pub struct Graphics<D: Driver> {
    driver: D,
    config: GraphicsConfig,
    queue: CommandQueue,
    atlas: AtlasAllocator,
    images: ImageTable,
    signal: DeviceLostSignal,
    state: ContextState,
    /// Whether logs are kept at all.
    recording: bool,
    frame: u64,
}

impl<D: Driver> Graphics<D> {
    pub fn new(driver: D, config: GraphicsConfig) -> Result<Self> {
        let max_texture_size = driver.max_texture_size();
        config.validate(max_texture_size)?;

        let recording = driver.needs_restoring();
        log::debug!(
            "graphics context: atlas {0}x{0}, dedicated at {1}, max texture {max_texture_size}, restoration {2}",
            config.atlas_size,
            config.dedicated_threshold,
            if recording { "on" } else { "off" }
        );

        Ok(Self {
            signal: driver.device_lost_signal(),
            queue: CommandQueue::new(config.max_batch_vertices),
            atlas: AtlasAllocator::new(config.atlas_limits(max_texture_size)),
            images: ImageTable::new(),
            state: ContextState::Live,
            recording,
            frame: 0,
            config,
            driver,
        })
    }

    // ── accessors ─────────────────────────────────────────────────────────

    #[inline]
    pub fn state(&self) -> ContextState {
        self.state
    }

    #[inline]
    pub fn config(&self) -> &GraphicsConfig {
        &self.config
    }

    #[inline]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Direct driver access, mainly for tests and diagnostics.
    #[inline]
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    #[inline]
    pub fn atlas(&self) -> &AtlasAllocator {
        &self.atlas
    }

    /// Entries waiting for the next flush.
    #[inline]
    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_size(&self, image: ImageId) -> Result<(i32, i32)> {
        let r = self.images.get(image)?;
        Ok((r.width, r.height))
    }

    pub fn is_screen(&self, image: ImageId) -> Result<bool> {
        Ok(self.images.get(image)?.screen)
    }

    /// Single color of every texel, when known without a read-back.
    pub fn uniform_color(&self, image: ImageId) -> Result<Option<[u8; 4]>> {
        Ok(self.images.get(image)?.uniform)
    }

    pub fn is_stale(&self, image: ImageId) -> Result<bool> {
        Ok(self.images.get(image)?.stale)
    }

    /// The image's restoration log; `None` for unrecorded images.
    pub fn restoration_log(&self, image: ImageId) -> Result<Option<&RestorationLog>> {
        Ok(self.images.get(image)?.log.as_ref())
    }

    /// Number of logged operations after the base; `None` for unrecorded images.
    pub fn log_len(&self, image: ImageId) -> Result<Option<usize>> {
        Ok(self.restoration_log(image)?.map(RestorationLog::len))
    }

    pub fn placement(&self, image: ImageId) -> Result<Placement> {
        self.images.get(image)?;
        self.atlas.placement(image).ok_or(GraphicsError::UseAfterDispose(image))
    }

    fn ensure_live(&self) -> Result<()> {
        match self.state {
            ContextState::Failed => Err(GraphicsError::ContextFailed),
            _ => Ok(()),
        }
    }

    fn bounds(record: &ImageRecord) -> Region {
        Region::from_size(record.width, record.height)
    }

    /// Physical texture and origin of a live image.
    fn target(&self, image: ImageId) -> Result<(crate::driver::TextureHandle, Region)> {
        self.atlas.resolve(image).ok_or(GraphicsError::UseAfterDispose(image))
    }

    // ── images ────────────────────────────────────────────────────────────

    /// Creates a transparent image.
    ///
    /// Screen images always get a texture of their own and are never recorded:
    /// after a device loss they come back cleared.
    pub fn create_image(&mut self, width: i32, height: i32, screen: bool) -> Result<ImageId> {
        self.ensure_live()?;
        if width <= 0 || height <= 0 {
            return Err(GraphicsError::InvalidSize { width, height });
        }

        let recorded = self.recording && !screen;
        let id = self.images.insert(ImageRecord::new(width, height, screen, recorded));
        if let Err(err) = self
            .atlas
            .allocate(&mut self.driver, &mut self.queue, id, width, height, screen)
        {
            // The handle never left this call, so it is still live.
            let removed = self.images.remove(id);
            debug_assert!(removed.is_ok());
            return Err(err);
        }

        log::trace!("created {id:?} ({width}x{height}{})", if screen { ", screen" } else { "" });
        Ok(id)
    }

    /// Disposes an image. Its region becomes reusable once queued work is done.
    pub fn dispose(&mut self, image: ImageId) -> Result<()> {
        self.ensure_live()?;
        self.images.get(image)?;
        self.preserve_dependents(image)?;
        self.images.remove(image)?;
        self.atlas.release(&mut self.queue, image);
        log::trace!("disposed {image:?}");
        Ok(())
    }

    // ── drawing ───────────────────────────────────────────────────────────

    /// Queues a draw into `dst` and records it in `dst`'s log.
    ///
    /// An empty index list or a clip region outside the image is a no-op.
    pub fn draw_triangles(&mut self, dst: ImageId, request: &DrawTriangles<'_>) -> Result<()> {
        self.ensure_live()?;
        let bounds = Self::bounds(self.images.get(dst)?);

        let mut source_size = None;
        let mut reads_screen = false;
        for (slot, source) in request.sources.iter().enumerate() {
            let expected = slot < request.shader.source_count();
            match source {
                Some(_) if !expected => {
                    return Err(GraphicsError::InvalidSource(format!(
                        "slot {slot} is bound but shader {:?} reads {} source(s)",
                        request.shader.id,
                        request.shader.source_count()
                    )));
                }
                None if expected => {
                    return Err(GraphicsError::InvalidSource(format!("slot {slot} is not bound")));
                }
                None => {}
                Some(image) => {
                    if *image == dst {
                        return Err(GraphicsError::InvalidSource(
                            "an image cannot be drawn onto itself".into(),
                        ));
                    }
                    let record = self.images.get(*image)?;
                    let size = (record.width, record.height);
                    if *source_size.get_or_insert(size) != size {
                        return Err(GraphicsError::InvalidSource(format!(
                            "source in slot {slot} is {}x{}, source 0 is {}x{}",
                            size.0,
                            size.1,
                            source_size.map_or(0, |s| s.0),
                            source_size.map_or(0, |s| s.1)
                        )));
                    }
                    reads_screen |= record.screen;
                }
            }
        }

        if request.indices.len() % 3 != 0 {
            return Err(GraphicsError::InvalidVertices(format!(
                "{} indices is not a whole number of triangles",
                request.indices.len()
            )));
        }
        if let Some(&bad) = request.indices.iter().find(|&&i| i as usize >= request.vertices.len()) {
            return Err(GraphicsError::InvalidVertices(format!(
                "index {bad} out of range for {} vertices",
                request.vertices.len()
            )));
        }
        if request
            .vertices
            .iter()
            .any(|v| !(v.position[0].is_finite() && v.position[1].is_finite()))
        {
            return Err(GraphicsError::InvalidVertices("non-finite vertex position".into()));
        }

        let Some(clip) = request.dst_region.unwrap_or(bounds).intersect(bounds) else {
            return Ok(());
        };
        if request.indices.is_empty() {
            return Ok(());
        }

        let dst_backing = self.atlas.placement(dst).map(|p| p.backing);
        let shares_backing = request
            .sources
            .iter()
            .flatten()
            .any(|s| self.atlas.placement(*s).map(|p| p.backing) == dst_backing);
        if shares_backing {
            self.atlas.isolate(&mut self.driver, &mut self.queue, dst)?;
        }
        self.preserve_dependents(dst)?;

        let op = DrawOperation {
            sources: request.sources,
            vertices: request.vertices.to_vec(),
            indices: request.indices.to_vec(),
            blend: request.blend,
            fill_rule: request.fill_rule,
            shader: request.shader,
            dst_region: clip,
        };
        let command = self
            .atlas
            .translate_draw(dst, &op)
            .ok_or(GraphicsError::UseAfterDispose(dst))?;
        self.queue.enqueue(Command::DrawTriangles(command));

        let record = self.images.get_mut(dst)?;
        record.uniform = None;
        if let Some(history) = record.log.as_mut() {
            // Screen contents are not recorded, so a draw from one can't be replayed.
            if reads_screen {
                record.stale = true;
            }
            history.record_draw(op);
        }
        Ok(())
    }

    /// Replaces the texels of `region` with `data` (premultiplied RGBA8).
    ///
    /// `data` must cover `region` exactly. The region is clipped to the image;
    /// a region with nothing left after clipping is an error.
    pub fn write_pixels(&mut self, image: ImageId, region: Region, data: &[u8]) -> Result<()> {
        self.ensure_live()?;
        let record = self.images.get(image)?;
        let bounds = Self::bounds(record);
        let invalid = GraphicsError::InvalidRegion {
            region,
            width: record.width,
            height: record.height,
        };

        if region.is_empty() {
            return Err(invalid);
        }
        if data.len() != region.rgba_len() {
            return Err(GraphicsError::PixelLength { expected: region.rgba_len(), actual: data.len() });
        }
        let Some(clipped) = region.intersect(bounds) else {
            return Err(invalid);
        };
        let data = if clipped == region {
            data.to_vec()
        } else {
            pixels::extract(data, region, clipped)
        };

        self.preserve_dependents(image)?;
        let (texture, rect) = self.target(image)?;
        self.queue.enqueue(Command::WritePixels {
            dst: texture,
            region: clipped.translate(rect.x, rect.y),
            pixels: data.clone(),
        });

        let record = self.images.get_mut(image)?;
        let patch = pixels::uniform(&data);
        record.uniform = match record.uniform {
            _ if clipped == bounds => patch,
            Some(current) if patch == Some(current) => Some(current),
            _ => None,
        };
        if let Some(history) = record.log.as_mut() {
            history.record_write(clipped, data);
        }
        Ok(())
    }

    /// Resets `region` to transparent black.
    ///
    /// A region with non-positive size is an error; a region entirely outside
    /// the image is ignored.
    pub fn clear_pixels(&mut self, image: ImageId, region: Region) -> Result<()> {
        self.ensure_live()?;
        let record = self.images.get(image)?;
        let bounds = Self::bounds(record);
        if region.is_empty() {
            return Err(GraphicsError::InvalidRegion {
                region,
                width: record.width,
                height: record.height,
            });
        }
        let Some(clipped) = region.intersect(bounds) else {
            return Ok(());
        };

        self.preserve_dependents(image)?;
        let (texture, rect) = self.target(image)?;
        self.queue.enqueue(Command::DrawTriangles(DrawTrianglesCommand::clear(
            texture,
            clipped.translate(rect.x, rect.y),
        )));

        let record = self.images.get_mut(image)?;
        record.uniform = match record.uniform {
            _ if clipped == bounds => Some([0; 4]),
            Some([0, 0, 0, 0]) => Some([0; 4]),
            _ => None,
        };
        if let Some(history) = record.log.as_mut() {
            history.record_clear(clipped);
        }
        Ok(())
    }

    /// Reads back `region` of an image as premultiplied RGBA8.
    ///
    /// Flushes all pending work first unless the image is known to be a single
    /// color.
    pub fn read_pixels(&mut self, image: ImageId, region: Region) -> Result<Vec<u8>> {
        self.ensure_live()?;
        let record = self.images.get(image)?;
        let bounds = Self::bounds(record);
        if region.is_empty() || !bounds.contains(region) {
            return Err(GraphicsError::InvalidRegion {
                region,
                width: record.width,
                height: record.height,
            });
        }
        if let Some(px) = record.uniform {
            return Ok(pixels::solid(region, px));
        }

        self.flush()?;
        let (texture, rect) = self.target(image)?;
        let data = self
            .driver
            .read_pixels(texture, region.translate(rect.x, rect.y))
            .inspect_err(|e| self.note_driver_error(e))?;

        if region == bounds {
            self.images.get_mut(image)?.uniform = pixels::uniform(&data);
        }
        Ok(data)
    }

    // ── frame lifecycle ───────────────────────────────────────────────────

    /// Executes all pending work now, then re-bases stale images on their
    /// freshly flushed contents.
    pub fn flush(&mut self) -> Result<FlushStats> {
        self.ensure_live()?;
        let stats = self
            .queue
            .flush(&mut self.driver)
            .inspect_err(|e| self.note_driver_error(e))?;
        self.rebase_logs(false)?;
        Ok(stats)
    }

    /// A device-lost error from a mid-frame call is remembered so the next
    /// frame boundary restores even if the driver never raised its signal.
    fn note_driver_error(&self, err: &DriverError) {
        if *err == DriverError::DeviceLost {
            self.signal.raise();
        }
    }

    /// Frame boundary: handles device loss, flushes, then re-bases stale and
    /// long logs on read-back snapshots.
    pub fn end_frame(&mut self) -> Result<FrameReport> {
        self.ensure_live()?;
        self.frame += 1;
        let mut report = FrameReport { frame: self.frame, ..FrameReport::default() };

        if self.signal.take() {
            report.restored = Some(self.restore()?);
        } else {
            match self.queue.flush(&mut self.driver) {
                Ok(stats) => report.flush = stats,
                Err(DriverError::DeviceLost) => {
                    self.signal.take();
                    report.restored = Some(self.restore()?);
                }
                Err(err) => return Err(GraphicsError::DriverFailure(err)),
            }
        }

        let (resolved, compacted) = self.rebase_logs(true)?;
        report.resolved = resolved;
        report.compacted = compacted;
        Ok(report)
    }

    fn restore(&mut self) -> Result<RestoreReport> {
        if !self.recording {
            self.state = ContextState::Failed;
            log::error!("device lost on a driver without restoration support");
            return Err(GraphicsError::RestorationFailure(
                "driver does not support restoring images".into(),
            ));
        }

        log::info!("device lost; restoring {} image(s)", self.images.len());
        self.state = ContextState::Restoring;
        match restorable::restore(&mut self.driver, &mut self.queue, &mut self.atlas, &mut self.images) {
            Ok(report) => {
                self.state = ContextState::Live;
                Ok(report)
            }
            Err(err) => {
                self.state = ContextState::Failed;
                self.queue.discard();
                log::error!("restoration failed: {err}");
                Err(match err {
                    GraphicsError::RestorationFailure(_) => err,
                    other => GraphicsError::RestorationFailure(other.to_string()),
                })
            }
        }
    }

    /// Replaces stale logs, and with `compact` logs over the compaction
    /// threshold, with a snapshot of the current contents. Expects an empty queue.
    fn rebase_logs(&mut self, compact: bool) -> Result<(usize, usize)> {
        let threshold = self.config.compaction_threshold.filter(|_| compact);
        let due: Vec<(ImageId, bool)> = self
            .images
            .iter()
            .filter_map(|(id, r)| {
                let history = r.log.as_ref()?;
                let long = threshold.is_some_and(|t| history.len() > t);
                (r.stale || long).then_some((id, r.stale))
            })
            .collect();

        let (mut resolved, mut compacted) = (0, 0);
        for (id, stale) in due {
            self.snapshot(id)?;
            if stale {
                resolved += 1;
            } else {
                compacted += 1;
            }
        }
        if resolved + compacted > 0 {
            log::debug!("re-based {resolved} stale and {compacted} long log(s) on snapshots");
        }
        Ok((resolved, compacted))
    }

    /// Re-bases every image that drew from `source` on a snapshot of its
    /// current contents. Runs before `source` changes, so replaying those logs
    /// never sees the new contents of `source`.
    fn preserve_dependents(&mut self, source: ImageId) -> Result<()> {
        let dependents = self.images.dependents_of(source);
        if dependents.is_empty() {
            return Ok(());
        }
        log::trace!("snapshotting {} dependent(s) of {source:?}", dependents.len());
        for id in dependents {
            self.snapshot(id)?;
        }
        Ok(())
    }

    /// Replaces an image's log with a snapshot of what it shows now.
    fn snapshot(&mut self, image: ImageId) -> Result<()> {
        let (uniform, bounds) = {
            let record = self.images.get(image)?;
            (record.uniform, Self::bounds(record))
        };
        let data = match uniform {
            Some(px) => pixels::solid(bounds, px),
            None => {
                let (texture, rect) = self.target(image)?;
                self.queue
                    .read_pixels(&mut self.driver, texture, rect)
                    .inspect_err(|e| self.note_driver_error(e))?
            }
        };

        let record = self.images.get_mut(image)?;
        record.stale = false;
        record.uniform = pixels::uniform(&data);
        if let Some(history) = record.log.as_mut() {
            history.reset_to_snapshot(data);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SoftwareDriver;
    use crate::paint::Color;
    use crate::render::{quad_vertices, QUAD_INDICES};
    use crate::restorable::BaseState;

    const RED: [u8; 4] = [255, 0, 0, 255];
    const GREEN: [u8; 4] = [0, 255, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn gfx() -> Graphics<SoftwareDriver> {
        Graphics::new(SoftwareDriver::new(), GraphicsConfig::default()).unwrap()
    }

    fn fill(g: &mut Graphics<SoftwareDriver>, dst: ImageId, rect: Region, color: Color) {
        let v = quad_vertices(rect, Region::default(), color);
        g.draw_triangles(dst, &DrawTriangles::new(Shader::FILL, &v, &QUAD_INDICES)).unwrap();
    }

    fn copy(g: &mut Graphics<SoftwareDriver>, dst: ImageId, at: Region, src: ImageId, from: Region, scale: Color) {
        let v = quad_vertices(at, from, scale);
        g.draw_triangles(dst, &DrawTriangles::new(Shader::TEXTURE, &v, &QUAD_INDICES).with_source(0, src))
            .unwrap();
    }

    fn pixel(g: &mut Graphics<SoftwareDriver>, image: ImageId, x: i32, y: i32) -> [u8; 4] {
        let px = g.read_pixels(image, Region::new(x, y, 1, 1)).unwrap();
        [px[0], px[1], px[2], px[3]]
    }

    fn all(g: &mut Graphics<SoftwareDriver>, image: ImageId) -> Vec<u8> {
        let (w, h) = g.image_size(image).unwrap();
        g.read_pixels(image, Region::from_size(w, h)).unwrap()
    }

    /// Reads an image straight from its backing texture, bypassing the
    /// uniform-color cache.
    fn texels(g: &mut Graphics<SoftwareDriver>, image: ImageId) -> Vec<u8> {
        g.flush().unwrap();
        let p = g.placement(image).unwrap();
        let texture = g.atlas().backing_texture(p.backing).unwrap();
        g.driver_mut().read_pixels(texture, p.region).unwrap()
    }

    fn gradient(w: i32, h: i32) -> Vec<u8> {
        (0..w * h)
            .flat_map(|i| {
                let v = (i * 7 % 256) as u8;
                [v, v / 2, 255 - v, 255]
            })
            .collect()
    }

    // ── scenarios ─────────────────────────────────────────────────────────

    #[test]
    fn red_rect_under_blue_quad() {
        let mut g = gfx();
        let img = g.create_image(100, 100, false).unwrap();
        let rect = Region::new(0, 0, 50, 50);
        g.write_pixels(img, rect, &pixels::solid(rect, RED)).unwrap();
        fill(&mut g, img, Region::from_min_max(25, 25, 75, 75), Color::from_premul(0.0, 0.0, 1.0, 1.0));
        g.flush().unwrap();

        assert_eq!(pixel(&mut g, img, 10, 10), RED);
        assert_eq!(pixel(&mut g, img, 60, 60), BLUE);
        assert_eq!(pixel(&mut g, img, 30, 30), BLUE);
        assert_eq!(pixel(&mut g, img, 90, 90), [0, 0, 0, 0]);
    }

    #[test]
    fn translucent_quad_blends_over_red() {
        let mut g = gfx();
        let img = g.create_image(100, 100, false).unwrap();
        let rect = Region::new(0, 0, 50, 50);
        g.write_pixels(img, rect, &pixels::solid(rect, RED)).unwrap();
        fill(&mut g, img, Region::from_min_max(25, 25, 75, 75), Color::from_premul(0.0, 0.0, 0.5, 0.5));
        g.flush().unwrap();

        assert_eq!(pixel(&mut g, img, 10, 10), RED);
        assert_eq!(pixel(&mut g, img, 30, 30), [128, 0, 128, 255]);
        assert_eq!(pixel(&mut g, img, 60, 60), [0, 0, 128, 128]);
    }

    #[test]
    fn dependent_images_survive_device_loss() {
        let mut g = gfx();
        let a = g.create_image(32, 32, false).unwrap();
        let b = g.create_image(32, 32, false).unwrap();

        fill(&mut g, a, Region::new(0, 0, 32, 32), Color::from_premul(0.2, 0.4, 0.0, 1.0));
        fill(&mut g, a, Region::new(4, 4, 10, 20), Color::from_premul(0.0, 0.0, 0.5, 0.5));
        fill(&mut g, a, Region::new(16, 2, 12, 12), Color::from_premul(1.0, 1.0, 1.0, 1.0));
        copy(&mut g, b, Region::new(0, 0, 16, 16), a, Region::new(8, 8, 16, 16), Color::WHITE);
        copy(&mut g, b, Region::new(10, 10, 20, 20), a, Region::new(0, 0, 20, 20), Color::from_premul(0.5, 0.5, 0.5, 0.5));

        let before = (all(&mut g, a), all(&mut g, b));
        g.end_frame().unwrap();

        g.driver_mut().lose_device();
        let report = g.end_frame().unwrap();
        let restored = report.restored.expect("restoration ran");
        assert_eq!(restored.images, 2);
        assert_eq!(restored.replayed_ops, 5);
        assert_eq!(g.state(), ContextState::Live);

        assert_eq!((all(&mut g, a), all(&mut g, b)), before);
    }

    #[test]
    fn restoration_is_idempotent() {
        let mut g = gfx();
        let a = g.create_image(20, 12, false).unwrap();
        let b = g.create_image(600, 40, false).unwrap();
        g.write_pixels(a, Region::new(2, 2, 10, 6), &gradient(10, 6)).unwrap();
        fill(&mut g, a, Region::new(6, 0, 8, 12), Color::from_premul(0.3, 0.0, 0.3, 0.6));
        copy(&mut g, b, Region::new(100, 10, 20, 12), a, Region::from_size(20, 12), Color::WHITE);
        g.clear_pixels(a, Region::new(0, 0, 3, 3)).unwrap();
        g.end_frame().unwrap();

        g.driver_mut().lose_device();
        g.end_frame().unwrap();
        let first = (all(&mut g, a), all(&mut g, b));

        g.driver_mut().lose_device();
        g.end_frame().unwrap();
        assert_eq!((all(&mut g, a), all(&mut g, b)), first);
    }

    #[test]
    fn every_operation_kind_round_trips() {
        let mut g = gfx();
        let img = g.create_image(40, 30, false).unwrap();
        let src = g.create_image(10, 10, false).unwrap();
        g.write_pixels(src, Region::from_size(10, 10), &gradient(10, 10)).unwrap();

        fill(&mut g, img, Region::new(0, 0, 40, 30), Color::from_premul(0.1, 0.2, 0.3, 1.0));
        copy(&mut g, img, Region::new(5, 5, 10, 10), src, Region::from_size(10, 10), Color::WHITE);
        g.write_pixels(img, Region::new(20, 3, 4, 4), &gradient(4, 4)).unwrap();
        g.clear_pixels(img, Region::new(30, 20, 5, 5)).unwrap();
        let v = [
            Vertex::new([0.0, 30.0], [0.0, 0.0], [0.0, 0.5, 0.0, 0.5]),
            Vertex::new([40.0, 30.0], [0.0, 0.0], [0.0, 0.5, 0.0, 0.5]),
            Vertex::new([20.0, 10.0], [0.0, 0.0], [0.0, 0.5, 0.0, 0.5]),
        ];
        g.draw_triangles(img, &DrawTriangles::new(Shader::FILL, &v, &[0, 1, 2]).with_clip(Region::new(0, 15, 40, 15)))
            .unwrap();

        let before = all(&mut g, img);
        g.driver_mut().lose_device();
        g.end_frame().unwrap();
        assert_eq!(all(&mut g, img), before);
    }

    #[test]
    fn later_opaque_draw_wins() {
        let mut g = gfx();
        let img = g.create_image(16, 16, false).unwrap();
        fill(&mut g, img, Region::new(2, 2, 8, 8), Color::from_premul(1.0, 0.0, 0.0, 1.0));
        fill(&mut g, img, Region::new(2, 2, 8, 8), Color::from_premul(0.0, 1.0, 0.0, 1.0));
        g.flush().unwrap();
        assert_eq!(pixel(&mut g, img, 5, 5), [0, 255, 0, 255]);
    }

    // ── atlas ─────────────────────────────────────────────────────────────

    #[test]
    fn atlas_regions_never_overlap() {
        let mut g = gfx();
        let mut ids = Vec::new();
        for i in 0..120 {
            ids.push(g.create_image(4 + (i * 37) % 120, 4 + (i * 53) % 90, false).unwrap());
        }
        for id in ids.iter().step_by(3) {
            g.dispose(*id).unwrap();
        }
        for i in 0..40 {
            ids.push(g.create_image(10 + (i * 11) % 60, 10 + (i * 29) % 60, false).unwrap());
        }

        let placements: Vec<Placement> = ids.iter().filter_map(|&id| g.placement(id).ok()).collect();
        for (i, p) in placements.iter().enumerate() {
            assert!(p.reserved.contains(p.region));
            for q in &placements[i + 1..] {
                if p.backing == q.backing {
                    assert!(!p.reserved.overlaps(q.reserved), "{p:?} overlaps {q:?}");
                }
            }
        }
    }

    #[test]
    fn defragmentation_preserves_pixels() {
        let config = GraphicsConfig {
            atlas_size: 64,
            dedicated_threshold: 48,
            ..GraphicsConfig::default()
        };
        let mut g = Graphics::new(SoftwareDriver::new(), config).unwrap();
        let ids: Vec<ImageId> = (0..8).map(|_| g.create_image(14, 28, false).unwrap()).collect();
        for (i, &id) in ids.iter().enumerate() {
            let mut data = gradient(14, 28);
            data[0] = i as u8;
            g.write_pixels(id, Region::from_size(14, 28), &data).unwrap();
        }
        g.end_frame().unwrap();
        for i in [0, 2, 5, 7] {
            g.dispose(ids[i]).unwrap();
        }

        let wide = g.create_image(30, 28, false).unwrap();
        assert_eq!(g.atlas().defragmentations(), 1);
        assert_eq!(g.atlas().page_count(), 1);

        for i in [1, 3, 4, 6] {
            let mut expected = gradient(14, 28);
            expected[0] = i as u8;
            assert_eq!(all(&mut g, ids[i]), expected);
        }

        let p = g.placement(wide).unwrap();
        let texture = g.atlas().backing_texture(p.backing).unwrap();
        let cleared = g.driver_mut().read_pixels(texture, p.reserved).unwrap();
        assert!(cleared.iter().all(|&b| b == 0));

        g.driver_mut().lose_device();
        g.end_frame().unwrap();
        let mut expected = gradient(14, 28);
        expected[0] = 3;
        assert_eq!(all(&mut g, ids[3]), expected);
    }

    #[test]
    fn compatible_draws_become_one_driver_call() {
        let mut g = gfx();
        let img = g.create_image(64, 64, false).unwrap();
        g.flush().unwrap();
        for i in 0..10 {
            fill(&mut g, img, Region::new(i * 6, 0, 5, 5), Color::WHITE);
        }
        let report = g.end_frame().unwrap();
        assert_eq!(report.flush.draw_calls, 1);
        assert_eq!(report.flush.merged_draws, 9);
    }

    // ── disposal ──────────────────────────────────────────────────────────

    #[test]
    fn disposed_image_is_rejected_and_region_reused() {
        let mut g = gfx();
        let a = g.create_image(20, 20, false).unwrap();
        let b = g.create_image(20, 20, false).unwrap();
        let region = g.placement(a).unwrap();
        g.dispose(a).unwrap();

        let v = quad_vertices(Region::from_size(4, 4), Region::from_size(4, 4), Color::WHITE);
        let draw_into = DrawTriangles::new(Shader::FILL, &v, &QUAD_INDICES);
        assert!(matches!(g.draw_triangles(a, &draw_into), Err(GraphicsError::UseAfterDispose(_))));
        let draw_from = DrawTriangles::new(Shader::TEXTURE, &v, &QUAD_INDICES).with_source(0, a);
        assert!(matches!(g.draw_triangles(b, &draw_from), Err(GraphicsError::UseAfterDispose(_))));
        assert!(matches!(g.dispose(a), Err(GraphicsError::UseAfterDispose(_))));

        let c = g.create_image(18, 18, false).unwrap();
        assert_eq!(g.placement(c).unwrap().reserved.x, region.reserved.x);
        assert_eq!(g.placement(c).unwrap().reserved.y, region.reserved.y);
    }

    #[test]
    fn disposing_a_source_snapshots_its_dependents() {
        let mut g = gfx();
        let a = g.create_image(8, 8, false).unwrap();
        let b = g.create_image(8, 8, false).unwrap();
        g.write_pixels(a, Region::from_size(8, 8), &gradient(8, 8)).unwrap();
        copy(&mut g, b, Region::from_size(8, 8), a, Region::from_size(8, 8), Color::WHITE);
        g.dispose(a).unwrap();

        assert!(!g.is_stale(b).unwrap());
        assert_eq!(g.log_len(b).unwrap(), Some(0));
        let base = g.restoration_log(b).unwrap().map(RestorationLog::base);
        assert!(matches!(base, Some(BaseState::Snapshot(_))));

        g.driver_mut().lose_device();
        g.end_frame().unwrap();
        assert_eq!(texels(&mut g, b), gradient(8, 8));
    }

    // ── stale images ──────────────────────────────────────────────────────

    #[test]
    fn modified_source_keeps_old_copy_after_restore() {
        let mut g = gfx();
        let a = g.create_image(8, 8, false).unwrap();
        let b = g.create_image(8, 8, false).unwrap();
        g.write_pixels(a, Region::from_size(8, 8), &gradient(8, 8)).unwrap();
        copy(&mut g, b, Region::from_size(8, 8), a, Region::from_size(8, 8), Color::WHITE);
        assert!(!g.is_stale(b).unwrap());

        g.clear_pixels(a, Region::from_size(8, 8)).unwrap();
        assert!(!g.is_stale(b).unwrap());
        assert_eq!(g.log_len(b).unwrap(), Some(0));

        // Lost with the clear still queued: nothing can be read back anymore.
        g.driver_mut().lose_device();
        let restored = g.end_frame().unwrap().restored.expect("restoration ran");
        assert_eq!(restored.snapshots, 0);
        assert_eq!(texels(&mut g, b), gradient(8, 8));
        assert_eq!(texels(&mut g, a), vec![0; 8 * 8 * 4]);
    }

    #[test]
    fn source_redrawn_mid_frame_survives_texture_loss() {
        let mut g = gfx();
        let a = g.create_image(8, 8, false).unwrap();
        let b = g.create_image(8, 8, false).unwrap();
        g.end_frame().unwrap();

        fill(&mut g, a, Region::from_size(8, 8), Color::from_premul(1.0, 0.0, 0.0, 1.0));
        copy(&mut g, b, Region::from_size(8, 8), a, Region::from_size(8, 8), Color::WHITE);
        fill(&mut g, a, Region::from_size(8, 8), Color::from_premul(0.0, 1.0, 0.0, 1.0));
        assert_eq!(pixel(&mut g, b, 4, 4), RED);

        g.driver_mut().lose_device();
        g.end_frame().unwrap();
        let full = Region::from_size(8, 8);
        assert_eq!(texels(&mut g, b), pixels::solid(full, RED));
        assert_eq!(texels(&mut g, a), pixels::solid(full, GREEN));
    }

    #[test]
    fn ping_pong_drawing_restores_after_texture_loss() {
        let mut g = gfx();
        let a = g.create_image(8, 8, false).unwrap();
        let b = g.create_image(8, 8, false).unwrap();
        g.write_pixels(a, Region::from_size(8, 8), &gradient(8, 8)).unwrap();
        copy(&mut g, b, Region::from_size(8, 8), a, Region::from_size(8, 8), Color::from_premul(0.5, 0.5, 0.5, 0.5));
        copy(&mut g, a, Region::new(0, 0, 4, 4), b, Region::new(4, 4, 4, 4), Color::WHITE);
        copy(&mut g, b, Region::new(4, 0, 4, 4), a, Region::new(0, 0, 4, 4), Color::WHITE);
        let before = (all(&mut g, a), all(&mut g, b));

        g.driver_mut().lose_device();
        let restored = g.end_frame().unwrap().restored.expect("restoration ran");
        assert_eq!(restored.cycle_breakers, 0);
        assert_eq!((texels(&mut g, a), texels(&mut g, b)), before);
    }

    #[test]
    fn drawing_from_screen_is_resolved_by_snapshot() {
        let mut g = gfx();
        let screen = g.create_image(16, 16, true).unwrap();
        let img = g.create_image(16, 16, false).unwrap();
        assert_eq!(g.log_len(screen).unwrap(), None);

        fill(&mut g, screen, Region::new(0, 0, 8, 16), Color::from_premul(0.0, 0.0, 1.0, 1.0));
        copy(&mut g, img, Region::from_size(16, 16), screen, Region::from_size(16, 16), Color::WHITE);
        assert!(g.is_stale(img).unwrap());
        g.flush().unwrap();
        assert!(!g.is_stale(img).unwrap());

        g.driver_mut().lose_device();
        g.end_frame().unwrap();
        assert_eq!(pixel(&mut g, img, 2, 2), BLUE);
        assert_eq!(pixel(&mut g, img, 12, 2), [0, 0, 0, 0]);
        assert_eq!(pixel(&mut g, screen, 2, 2), [0, 0, 0, 0]);
    }

    #[test]
    fn unresolved_screen_copy_fails_restoration() {
        let mut g = gfx();
        let screen = g.create_image(16, 16, true).unwrap();
        let img = g.create_image(16, 16, false).unwrap();
        fill(&mut g, screen, Region::from_size(16, 16), Color::from_premul(0.0, 0.0, 1.0, 1.0));
        copy(&mut g, img, Region::from_size(16, 16), screen, Region::from_size(16, 16), Color::WHITE);

        g.driver_mut().lose_device();
        assert!(matches!(g.end_frame(), Err(GraphicsError::RestorationFailure(_))));
        assert_eq!(g.state(), ContextState::Failed);
    }

    #[test]
    fn long_logs_are_compacted() {
        let config = GraphicsConfig { compaction_threshold: Some(4), ..GraphicsConfig::default() };
        let mut g = Graphics::new(SoftwareDriver::new(), config).unwrap();
        let img = g.create_image(32, 32, false).unwrap();
        for i in 0..6 {
            let c = Color::from_premul(0.1 * i as f32, 0.0, 0.5, 1.0);
            fill(&mut g, img, Region::new(i * 4, i * 2, 6, 6), c);
        }
        assert_eq!(g.log_len(img).unwrap(), Some(6));

        let report = g.end_frame().unwrap();
        assert_eq!(report.compacted, 1);
        assert_eq!(g.log_len(img).unwrap(), Some(0));

        let before = all(&mut g, img);
        g.driver_mut().lose_device();
        g.end_frame().unwrap();
        assert_eq!(all(&mut g, img), before);
    }

    // ── uniform fast path ─────────────────────────────────────────────────

    #[test]
    fn uniform_image_reads_without_driver() {
        let mut g = gfx();
        let img = g.create_image(10, 10, false).unwrap();
        g.write_pixels(img, Region::from_size(10, 10), &pixels::solid(Region::from_size(10, 10), RED))
            .unwrap();
        assert_eq!(g.uniform_color(img).unwrap(), Some(RED));

        let reads = g.driver().stats().reads;
        assert_eq!(pixel(&mut g, img, 4, 4), RED);
        assert_eq!(g.driver().stats().reads, reads);
        assert!(g.pending_commands() > 0);

        fill(&mut g, img, Region::new(0, 0, 2, 2), Color::WHITE);
        assert_eq!(g.uniform_color(img).unwrap(), None);
        assert_eq!(pixel(&mut g, img, 1, 1), [255; 4]);
        assert_eq!(g.driver().stats().reads, reads + 1);
    }

    // ── validation ────────────────────────────────────────────────────────

    #[test]
    fn invalid_requests_are_rejected() {
        let mut g = gfx();
        let img = g.create_image(10, 10, false).unwrap();
        let other = g.create_image(12, 12, false).unwrap();
        let third = g.create_image(10, 10, false).unwrap();

        assert!(matches!(g.create_image(0, 5, false), Err(GraphicsError::InvalidSize { .. })));
        assert!(matches!(g.create_image(5000, 5, false), Err(GraphicsError::ImageTooLarge { .. })));

        let r = Region::new(0, 0, 2, 2);
        assert!(matches!(g.write_pixels(img, r, &[0; 4]), Err(GraphicsError::PixelLength { expected: 16, actual: 4 })));
        assert!(matches!(
            g.write_pixels(img, Region::new(20, 20, 2, 2), &[0; 16]),
            Err(GraphicsError::InvalidRegion { .. })
        ));
        assert!(matches!(g.clear_pixels(img, Region::new(0, 0, 0, 4)), Err(GraphicsError::InvalidRegion { .. })));
        assert!(g.clear_pixels(img, Region::new(50, 50, 4, 4)).is_ok());
        assert!(matches!(g.read_pixels(img, Region::new(8, 8, 4, 4)), Err(GraphicsError::InvalidRegion { .. })));

        let v = quad_vertices(Region::from_size(4, 4), Region::from_size(4, 4), Color::WHITE);
        let self_draw = DrawTriangles::new(Shader::TEXTURE, &v, &QUAD_INDICES).with_source(0, img);
        assert!(matches!(g.draw_triangles(img, &self_draw), Err(GraphicsError::InvalidSource(_))));
        let missing = DrawTriangles::new(Shader::TEXTURE, &v, &QUAD_INDICES);
        assert!(matches!(g.draw_triangles(img, &missing), Err(GraphicsError::InvalidSource(_))));
        let two = Shader::custom(crate::render::ShaderId(20), 2);
        let mismatched = DrawTriangles::new(two, &v, &QUAD_INDICES).with_source(0, third).with_source(1, other);
        assert!(matches!(g.draw_triangles(img, &mismatched), Err(GraphicsError::InvalidSource(_))));
        let ragged = DrawTriangles::new(Shader::FILL, &v, &[0, 1]);
        assert!(matches!(g.draw_triangles(img, &ragged), Err(GraphicsError::InvalidVertices(_))));
        let out_of_range = DrawTriangles::new(Shader::FILL, &v, &[0, 1, 9]);
        assert!(matches!(g.draw_triangles(img, &out_of_range), Err(GraphicsError::InvalidVertices(_))));

        let before = g.pending_commands();
        let clipped_away = DrawTriangles::new(Shader::FILL, &v, &QUAD_INDICES).with_clip(Region::new(40, 40, 5, 5));
        g.draw_triangles(img, &clipped_away).unwrap();
        g.draw_triangles(img, &DrawTriangles::new(Shader::FILL, &v, &[])).unwrap();
        assert_eq!(g.pending_commands(), before);
        assert_eq!(g.log_len(img).unwrap(), Some(0));
    }

    #[test]
    fn far_regions_are_rejected_without_overflow() {
        let mut g = gfx();
        let img = g.create_image(8, 8, false).unwrap();
        let far = Region::new(i32::MAX - 5, 0, 10, 1);

        assert!(matches!(g.write_pixels(img, far, &[0; 40]), Err(GraphicsError::InvalidRegion { .. })));
        assert!(matches!(g.read_pixels(img, far), Err(GraphicsError::InvalidRegion { .. })));
        assert!(g.clear_pixels(img, far).is_ok());
        assert_eq!(g.log_len(img).unwrap(), Some(0));
    }

    #[test]
    fn far_tex_coords_are_clamped_at_flush() {
        let mut g = gfx();
        let src = g.create_image(8, 8, false).unwrap();
        let dst = g.create_image(8, 8, false).unwrap();
        g.write_pixels(src, Region::from_size(8, 8), &pixels::solid(Region::from_size(8, 8), RED))
            .unwrap();

        let mut v = quad_vertices(Region::from_size(8, 8), Region::from_size(8, 8), Color::WHITE);
        v[0].tex_coord = [-3.0e9, 0.0];
        g.draw_triangles(dst, &DrawTriangles::new(Shader::TEXTURE, &v, &QUAD_INDICES).with_source(0, src))
            .unwrap();
        g.flush().unwrap();
        assert_eq!(texels(&mut g, dst), pixels::solid(Region::from_size(8, 8), RED));
    }

    #[test]
    fn write_is_clipped_to_the_image() {
        let mut g = gfx();
        let img = g.create_image(4, 4, false).unwrap();
        let region = Region::new(-2, -2, 4, 4);
        let data = gradient(4, 4);
        g.write_pixels(img, region, &data).unwrap();

        let expected = pixels::extract(&data, region, Region::new(0, 0, 2, 2));
        assert_eq!(g.read_pixels(img, Region::new(0, 0, 2, 2)).unwrap(), expected);
    }

    // ── failures ──────────────────────────────────────────────────────────

    #[test]
    fn driver_failure_aborts_the_frame() {
        let mut g = gfx();
        let img = g.create_image(8, 8, false).unwrap();
        fill(&mut g, img, Region::from_size(8, 8), Color::WHITE);
        g.driver_mut().fail_after(0, DriverError::Rejected("out of memory".into()));

        assert!(matches!(g.end_frame(), Err(GraphicsError::DriverFailure(DriverError::Rejected(_)))));
        assert_eq!(g.state(), ContextState::Live);
        assert_eq!(g.pending_commands(), 0);
    }

    #[test]
    fn failed_restoration_is_terminal() {
        let mut g = gfx();
        let img = g.create_image(8, 8, false).unwrap();
        fill(&mut g, img, Region::from_size(8, 8), Color::WHITE);
        g.flush().unwrap();

        g.driver_mut().lose_device();
        g.driver_mut().fail_after(0, DriverError::Rejected("no memory".into()));
        assert!(matches!(g.end_frame(), Err(GraphicsError::RestorationFailure(_))));
        assert_eq!(g.state(), ContextState::Failed);
        assert!(matches!(g.create_image(4, 4, false), Err(GraphicsError::ContextFailed)));
        assert!(matches!(g.end_frame(), Err(GraphicsError::ContextFailed)));
    }

    #[test]
    fn unrestorable_driver_keeps_no_logs() {
        let mut g = Graphics::new(SoftwareDriver::new().without_restoring(), GraphicsConfig::default()).unwrap();
        let img = g.create_image(8, 8, false).unwrap();
        fill(&mut g, img, Region::from_size(8, 8), Color::WHITE);
        assert_eq!(g.log_len(img).unwrap(), None);
        g.end_frame().unwrap();

        g.driver_mut().lose_device();
        assert!(matches!(g.end_frame(), Err(GraphicsError::RestorationFailure(_))));
    }

    #[test]
    fn device_lost_during_flush_restores_at_frame_end() {
        let mut g = gfx();
        let img = g.create_image(8, 8, false).unwrap();
        fill(&mut g, img, Region::new(0, 0, 4, 8), Color::WHITE);
        g.flush().unwrap();
        fill(&mut g, img, Region::new(4, 0, 4, 8), Color::from_premul(0.0, 0.0, 1.0, 1.0));

        g.driver_mut().lose_device();
        // Consume the driver's own signal so only the flush error reports the loss.
        g.driver().device_lost_signal().take();
        assert!(matches!(g.flush(), Err(GraphicsError::DriverFailure(DriverError::DeviceLost))));

        let report = g.end_frame().unwrap();
        assert!(report.restored.is_some());
        assert_eq!(pixel(&mut g, img, 1, 1), [255; 4]);
        assert_eq!(pixel(&mut g, img, 6, 1), BLUE);
    }
}
