use std::collections::BTreeSet;

use crate::coords::Region;
use crate::paint::pixels;
use crate::render::{vertex_bounds, BlendMode, FillRule, Shader, Vertex, SRC_IMAGE_COUNT};

use super::ImageId;

/// Starting point of a replay.
#[derive(Debug, Clone, PartialEq)]
pub enum BaseState {
    /// Fully transparent.
    Cleared,
    /// Full-image RGBA8 contents.
    Snapshot(Vec<u8>),
}

/// A recorded draw, in the destination image's logical coordinates.
///
/// Texture coordinates address source 0 in its own logical texels.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawOperation {
    pub sources: [Option<ImageId>; SRC_IMAGE_COUNT],
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub blend: BlendMode,
    pub fill_rule: FillRule,
    pub shader: Shader,
    /// Clip region, already intersected with the image bounds.
    pub dst_region: Region,
}

impl DrawOperation {
    /// Area the draw can modify.
    pub fn affected(&self) -> Option<Region> {
        vertex_bounds(&self.vertices)?.intersect(self.dst_region)
    }
}

/// One entry of a restoration log.
#[derive(Debug, Clone, PartialEq)]
pub enum LogOp {
    Draw(DrawOperation),
    WritePixels { region: Region, pixels: Vec<u8> },
    Clear { region: Region },
}

impl LogOp {
    pub fn affected(&self) -> Option<Region> {
        match self {
            LogOp::Draw(d) => d.affected(),
            LogOp::WritePixels { region, .. } | LogOp::Clear { region } => Some(*region),
        }
    }
}

/// What it takes to rebuild one image from nothing.
///
/// Invariant: replaying `base` then `ops` in order onto a cleared region
/// reproduces the image as of the last flush, provided every source referenced
/// by a draw is restored first and was not modified after that draw.
#[derive(Debug, Clone, PartialEq)]
pub struct RestorationLog {
    width: i32,
    height: i32,
    base: BaseState,
    ops: Vec<LogOp>,
}

impl RestorationLog {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            base: BaseState::Cleared,
            ops: Vec::new(),
        }
    }

    #[inline]
    pub fn base(&self) -> &BaseState {
        &self.base
    }

    #[inline]
    pub fn ops(&self) -> &[LogOp] {
        &self.ops
    }

    /// Number of recorded operations after the base.
    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[inline]
    fn bounds(&self) -> Region {
        Region::from_size(self.width, self.height)
    }

    pub fn has_draws(&self) -> bool {
        self.ops.iter().any(|op| matches!(op, LogOp::Draw(_)))
    }

    /// Images read by recorded draws, in id order.
    pub fn sources(&self) -> BTreeSet<ImageId> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                LogOp::Draw(d) => Some(d.sources.iter().flatten().copied()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn depends_on(&self, image: ImageId) -> bool {
        self.ops.iter().any(|op| match op {
            LogOp::Draw(d) => d.sources.contains(&Some(image)),
            _ => false,
        })
    }

    pub fn record_draw(&mut self, op: DrawOperation) {
        self.ops.push(LogOp::Draw(op));
    }

    /// Records a pixel write. `region` must lie inside the image and `pixels`
    /// must cover it exactly.
    pub fn record_write(&mut self, region: Region, data: Vec<u8>) {
        if region == self.bounds() {
            self.reset_to_snapshot(data);
            return;
        }
        if !self.has_draws() {
            let w = self.width;
            pixels::blit(self.materialize(), w, region, &data);
            return;
        }
        self.prune_covered(region);
        self.ops.push(LogOp::WritePixels { region, pixels: data });
    }

    /// Records a clear. `region` must lie inside the image.
    pub fn record_clear(&mut self, region: Region) {
        if region == self.bounds() {
            self.reset_cleared();
            return;
        }
        if !self.has_draws() {
            if self.base == BaseState::Cleared && self.ops.is_empty() {
                return;
            }
            let w = self.width;
            pixels::fill(self.materialize(), w, region, [0; 4]);
            return;
        }
        self.prune_covered(region);
        self.ops.push(LogOp::Clear { region });
    }

    /// Replaces the whole history with a full-image snapshot.
    pub fn reset_to_snapshot(&mut self, data: Vec<u8>) {
        debug_assert_eq!(data.len(), self.bounds().rgba_len());
        self.base = BaseState::Snapshot(data);
        self.ops.clear();
    }

    pub fn reset_cleared(&mut self) {
        self.base = BaseState::Cleared;
        self.ops.clear();
    }

    /// Drops operations whose entire effect is overwritten by `region`.
    fn prune_covered(&mut self, region: Region) {
        self.ops
            .retain(|op| op.affected().is_some_and(|a| !region.contains(a)));
    }

    /// Folds pixel-only ops into a snapshot base and returns its buffer.
    ///
    /// Only valid while the log holds no draws.
    fn materialize(&mut self) -> &mut Vec<u8> {
        debug_assert!(!self.has_draws());
        let width = self.width;
        let ops = std::mem::take(&mut self.ops);
        if self.base == BaseState::Cleared {
            self.base = BaseState::Snapshot(vec![0; self.bounds().rgba_len()]);
        }
        let BaseState::Snapshot(buf) = &mut self.base else {
            unreachable!("base was just made a snapshot");
        };
        for op in ops {
            match op {
                LogOp::WritePixels { region, pixels: data } => pixels::blit(buf, width, region, &data),
                LogOp::Clear { region } => pixels::fill(buf, width, region, [0; 4]),
                LogOp::Draw(_) => {}
            }
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paint::Color;
    use crate::render::{quad_vertices, QUAD_INDICES};

    fn id(index: u32) -> ImageId {
        ImageId { index, generation: 0 }
    }

    fn draw(rect: Region, source: Option<ImageId>) -> DrawOperation {
        let mut sources = [None; SRC_IMAGE_COUNT];
        sources[0] = source;
        DrawOperation {
            sources,
            vertices: quad_vertices(rect, Region::from_size(4, 4), Color::WHITE).to_vec(),
            indices: QUAD_INDICES.to_vec(),
            blend: BlendMode::SourceOver,
            fill_rule: FillRule::FillAll,
            shader: if source.is_some() { Shader::TEXTURE } else { Shader::FILL },
            dst_region: Region::from_size(10, 10),
        }
    }

    // ── writes ────────────────────────────────────────────────────────────

    #[test]
    fn full_write_becomes_the_base() {
        let mut log = RestorationLog::new(2, 2);
        log.record_draw(draw(Region::from_size(2, 2), None));
        log.record_write(Region::from_size(2, 2), vec![7; 16]);
        assert_eq!(log.base(), &BaseState::Snapshot(vec![7; 16]));
        assert!(log.is_empty());
    }

    #[test]
    fn partial_write_without_draws_folds_into_base() {
        let mut log = RestorationLog::new(2, 2);
        log.record_write(Region::new(1, 1, 1, 1), vec![9; 4]);
        let BaseState::Snapshot(buf) = log.base() else { panic!("expected snapshot") };
        assert_eq!(&buf[12..16], &[9; 4]);
        assert_eq!(&buf[0..4], &[0; 4]);
        assert!(log.is_empty());
    }

    #[test]
    fn write_prunes_draws_it_covers() {
        let mut log = RestorationLog::new(10, 10);
        log.record_draw(draw(Region::new(0, 0, 4, 4), Some(id(1))));
        log.record_draw(draw(Region::new(6, 6, 4, 4), Some(id(2))));
        log.record_write(Region::new(0, 0, 5, 5), vec![1; 100]);

        assert_eq!(log.len(), 2);
        assert!(!log.depends_on(id(1)));
        assert!(log.depends_on(id(2)));
    }

    // ── clears ────────────────────────────────────────────────────────────

    #[test]
    fn clear_on_cleared_log_is_free() {
        let mut log = RestorationLog::new(4, 4);
        log.record_clear(Region::new(1, 1, 2, 2));
        assert_eq!(log.base(), &BaseState::Cleared);
        assert!(log.is_empty());
    }

    #[test]
    fn clear_zeroes_snapshot_region() {
        let mut log = RestorationLog::new(2, 1);
        log.record_write(Region::from_size(2, 1), vec![5; 8]);
        log.record_clear(Region::new(1, 0, 1, 1));
        assert_eq!(log.base(), &BaseState::Snapshot(vec![5, 5, 5, 5, 0, 0, 0, 0]));
    }

    #[test]
    fn clear_after_draws_is_appended() {
        let mut log = RestorationLog::new(10, 10);
        log.record_draw(draw(Region::new(0, 0, 8, 8), None));
        log.record_clear(Region::new(0, 0, 2, 2));
        assert_eq!(log.len(), 2);
        assert!(matches!(log.ops()[1], LogOp::Clear { .. }));
    }

    #[test]
    fn full_clear_resets() {
        let mut log = RestorationLog::new(10, 10);
        log.record_draw(draw(Region::new(0, 0, 8, 8), Some(id(3))));
        log.record_clear(Region::from_size(10, 10));
        assert_eq!(log.base(), &BaseState::Cleared);
        assert!(log.sources().is_empty());
    }

    // ── dependencies ──────────────────────────────────────────────────────

    #[test]
    fn sources_are_deduplicated() {
        let mut log = RestorationLog::new(10, 10);
        log.record_draw(draw(Region::new(0, 0, 2, 2), Some(id(4))));
        log.record_draw(draw(Region::new(2, 2, 2, 2), Some(id(4))));
        log.record_draw(draw(Region::new(4, 4, 2, 2), Some(id(1))));
        assert_eq!(log.sources().into_iter().collect::<Vec<_>>(), vec![id(1), id(4)]);
    }
}
