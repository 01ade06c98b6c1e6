use crate::coords::Region;
use crate::driver::{Driver, DriverError, TextureHandle};

use super::{Command, DrawTrianglesCommand};

/// Counters describing one flush.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct FlushStats {
    /// Entries executed.
    pub commands: usize,
    /// Driver draw calls issued.
    pub draw_calls: usize,
    /// Draw requests folded into an earlier entry instead of getting their own call.
    pub merged_draws: usize,
    pub vertices: usize,
    pub uploads: usize,
    pub deletions: usize,
}

/// FIFO of pending GPU operations.
///
/// Performance characteristics:
/// - `enqueue()` is O(1) amortized and never touches the driver
/// - consecutive compatible draws are merged on enqueue, so a flush issues one
///   driver call per merged run
///
/// Ordering: entries execute strictly in submission order. Writes and deletions
/// never merge, so they act as barriers between draw runs.
#[derive(Debug)]
pub struct CommandQueue {
    commands: Vec<Command>,
    max_batch_vertices: usize,
    merged: usize,
}

impl CommandQueue {
    pub fn new(max_batch_vertices: usize) -> Self {
        Self {
            commands: Vec::new(),
            max_batch_vertices: max_batch_vertices.max(3),
            merged: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Pending entries in execution order.
    #[inline]
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Appends a command, merging it into the previous draw when possible.
    pub fn enqueue(&mut self, command: Command) {
        match command {
            Command::DrawTriangles(draw) => self.enqueue_draw(draw),
            other => self.commands.push(other),
        }
    }

    fn enqueue_draw(&mut self, draw: DrawTrianglesCommand) {
        if draw.indices.is_empty() {
            return;
        }
        if let Some(Command::DrawTriangles(last)) = self.commands.last_mut() {
            if last.can_merge(&draw, self.max_batch_vertices) {
                last.merge(draw);
                self.merged += 1;
                return;
            }
        }
        self.commands.push(Command::DrawTriangles(draw));
    }

    /// Executes every pending entry in order and empties the queue.
    ///
    /// The first driver failure aborts the flush; the remaining entries are
    /// dropped and the error is returned. There is no partial recovery.
    pub fn flush<D: Driver + ?Sized>(&mut self, driver: &mut D) -> Result<FlushStats, DriverError> {
        let commands = std::mem::take(&mut self.commands);
        let mut stats = FlushStats {
            merged_draws: std::mem::take(&mut self.merged),
            ..FlushStats::default()
        };

        for command in commands {
            match &command {
                Command::DrawTriangles(draw) => {
                    driver.draw_triangles(&draw.as_call())?;
                    stats.draw_calls += 1;
                    stats.vertices += draw.vertices.len();
                }
                Command::WritePixels { dst, region, pixels } => {
                    driver.upload_pixels(*dst, *region, pixels)?;
                    stats.uploads += 1;
                }
                Command::DeleteTexture(texture) => {
                    driver.delete_texture(*texture);
                    stats.deletions += 1;
                }
            }
            stats.commands += 1;
        }

        if stats.commands > 0 {
            log::trace!(
                "flush: {} commands, {} draw calls ({} merged), {} vertices",
                stats.commands,
                stats.draw_calls,
                stats.merged_draws,
                stats.vertices
            );
        }
        Ok(stats)
    }

    /// Read-after-write barrier: flushes everything, then reads back.
    ///
    /// The whole queue is flushed rather than only entries targeting `texture`,
    /// because draws into it may sample textures written by earlier entries.
    pub fn read_pixels<D: Driver + ?Sized>(
        &mut self,
        driver: &mut D,
        texture: TextureHandle,
        region: Region,
    ) -> Result<Vec<u8>, DriverError> {
        self.flush(driver)?;
        driver.read_pixels(texture, region)
    }

    /// Drops all pending entries without executing them. Returns how many were dropped.
    pub fn discard(&mut self) -> usize {
        self.merged = 0;
        let n = self.commands.len();
        self.commands.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::SoftwareDriver;
    use crate::paint::Color;
    use crate::render::{quad_vertices, BlendMode, FillRule, Shader, QUAD_INDICES, SRC_IMAGE_COUNT};

    fn fill(dst: TextureHandle, rect: Region, color: Color, blend: BlendMode) -> Command {
        Command::DrawTriangles(DrawTrianglesCommand {
            dst,
            sources: [None; SRC_IMAGE_COUNT],
            src_regions: [Region::default(); SRC_IMAGE_COUNT],
            dst_region: Region::from_size(32, 32),
            vertices: quad_vertices(rect, Region::default(), color).to_vec(),
            indices: QUAD_INDICES.to_vec(),
            blend,
            fill_rule: FillRule::FillAll,
            shader: Shader::FILL,
        })
    }

    fn pixel(driver: &mut SoftwareDriver, t: TextureHandle, x: i32, y: i32) -> [u8; 4] {
        let px = driver.read_pixels(t, Region::new(x, y, 1, 1)).unwrap();
        [px[0], px[1], px[2], px[3]]
    }

    // ── enqueue ───────────────────────────────────────────────────────────

    #[test]
    fn enqueue_does_not_execute() {
        let mut driver = SoftwareDriver::new();
        let t = driver.create_texture(32, 32).unwrap();
        let mut q = CommandQueue::new(1024);
        q.enqueue(fill(t, Region::from_size(32, 32), Color::WHITE, BlendMode::Copy));
        assert_eq!(driver.stats().draw_calls, 0);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn compatible_draws_merge_into_one_call() {
        let mut driver = SoftwareDriver::new();
        let t = driver.create_texture(32, 32).unwrap();
        let mut q = CommandQueue::new(1024);
        for i in 0..4 {
            q.enqueue(fill(t, Region::new(i * 4, 0, 4, 4), Color::WHITE, BlendMode::SourceOver));
        }
        assert_eq!(q.len(), 1);

        let stats = q.flush(&mut driver).unwrap();
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.merged_draws, 3);
        assert_eq!(stats.vertices, 16);
        assert_eq!(pixel(&mut driver, t, 13, 2), [255, 255, 255, 255]);
    }

    #[test]
    fn different_blend_or_target_breaks_the_run() {
        let mut driver = SoftwareDriver::new();
        let a = driver.create_texture(32, 32).unwrap();
        let b = driver.create_texture(32, 32).unwrap();
        let mut q = CommandQueue::new(1024);
        q.enqueue(fill(a, Region::from_size(4, 4), Color::WHITE, BlendMode::SourceOver));
        q.enqueue(fill(a, Region::from_size(4, 4), Color::WHITE, BlendMode::Copy));
        q.enqueue(fill(b, Region::from_size(4, 4), Color::WHITE, BlendMode::Copy));
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn merge_respects_vertex_budget() {
        let mut q = CommandQueue::new(6);
        let t = TextureHandle(1);
        q.enqueue(fill(t, Region::from_size(4, 4), Color::WHITE, BlendMode::Copy));
        q.enqueue(fill(t, Region::from_size(4, 4), Color::WHITE, BlendMode::Copy));
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn writes_act_as_barriers() {
        let t = TextureHandle(1);
        let mut q = CommandQueue::new(1024);
        q.enqueue(fill(t, Region::from_size(4, 4), Color::WHITE, BlendMode::Copy));
        q.enqueue(Command::WritePixels { dst: t, region: Region::from_size(1, 1), pixels: vec![0; 4] });
        q.enqueue(fill(t, Region::from_size(4, 4), Color::WHITE, BlendMode::Copy));
        assert_eq!(q.len(), 3);
    }

    // ── flush ─────────────────────────────────────────────────────────────

    #[test]
    fn later_opaque_draw_wins() {
        let mut driver = SoftwareDriver::new();
        let t = driver.create_texture(32, 32).unwrap();
        let mut q = CommandQueue::new(1024);
        let red = Color::from_premul(1.0, 0.0, 0.0, 1.0);
        let green = Color::from_premul(0.0, 1.0, 0.0, 1.0);
        q.enqueue(fill(t, Region::from_size(8, 8), red, BlendMode::SourceOver));
        q.enqueue(fill(t, Region::from_size(8, 8), green, BlendMode::SourceOver));
        q.flush(&mut driver).unwrap();
        assert_eq!(pixel(&mut driver, t, 3, 3), [0, 255, 0, 255]);
    }

    #[test]
    fn read_pixels_flushes_first() {
        let mut driver = SoftwareDriver::new();
        let t = driver.create_texture(32, 32).unwrap();
        let mut q = CommandQueue::new(1024);
        q.enqueue(fill(t, Region::from_size(32, 32), Color::WHITE, BlendMode::Copy));
        let px = q.read_pixels(&mut driver, t, Region::new(5, 5, 1, 1)).unwrap();
        assert_eq!(px, vec![255; 4]);
        assert!(q.is_empty());
    }

    #[test]
    fn driver_failure_drops_the_rest() {
        let mut driver = SoftwareDriver::new();
        let t = driver.create_texture(32, 32).unwrap();
        let mut q = CommandQueue::new(1024);
        q.enqueue(fill(t, Region::from_size(4, 4), Color::WHITE, BlendMode::Copy));
        q.enqueue(Command::WritePixels { dst: t, region: Region::from_size(1, 1), pixels: vec![0; 4] });
        driver.fail_after(0, DriverError::Rejected("boom".into()));

        assert!(q.flush(&mut driver).is_err());
        assert!(q.is_empty());
        assert_eq!(driver.stats().uploads, 0);
    }

    #[test]
    fn deletion_runs_after_earlier_draws() {
        let mut driver = SoftwareDriver::new();
        let t = driver.create_texture(32, 32).unwrap();
        let mut q = CommandQueue::new(1024);
        q.enqueue(fill(t, Region::from_size(4, 4), Color::WHITE, BlendMode::Copy));
        q.enqueue(Command::DeleteTexture(t));
        let stats = q.flush(&mut driver).unwrap();
        assert_eq!((stats.draw_calls, stats.deletions), (1, 1));
        assert_eq!(driver.live_textures(), 0);
    }

    #[test]
    fn discard_drops_everything() {
        let mut q = CommandQueue::new(1024);
        q.enqueue(Command::DeleteTexture(TextureHandle(3)));
        assert_eq!(q.discard(), 1);
        assert!(q.is_empty());
    }
}
