use crate::coords::Region;
use crate::driver::{DrawCall, TextureHandle};
use crate::paint::Color;
use crate::render::{quad_vertices, BlendMode, FillRule, Shader, Vertex, QUAD_INDICES, SRC_IMAGE_COUNT};

/// A draw-triangles entry in backing-texture coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawTrianglesCommand {
    pub dst: TextureHandle,
    pub sources: [Option<TextureHandle>; SRC_IMAGE_COUNT],
    pub src_regions: [Region; SRC_IMAGE_COUNT],
    pub dst_region: Region,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub blend: BlendMode,
    pub fill_rule: FillRule,
    pub shader: Shader,
}

impl DrawTrianglesCommand {
    /// Resets `region` of `dst` to transparent black.
    pub fn clear(dst: TextureHandle, region: Region) -> Self {
        Self {
            dst,
            sources: [None; SRC_IMAGE_COUNT],
            src_regions: [Region::default(); SRC_IMAGE_COUNT],
            dst_region: region,
            vertices: quad_vertices(region, Region::default(), Color::TRANSPARENT).to_vec(),
            indices: QUAD_INDICES.to_vec(),
            blend: BlendMode::Clear,
            fill_rule: FillRule::FillAll,
            shader: Shader::CLEAR,
        }
    }

    /// Copies `src_rect` of `src` verbatim onto `dst_rect` of `dst` (same size).
    pub fn copy(dst: TextureHandle, dst_rect: Region, src: TextureHandle, src_rect: Region) -> Self {
        let mut sources = [None; SRC_IMAGE_COUNT];
        sources[0] = Some(src);
        let mut src_regions = [Region::default(); SRC_IMAGE_COUNT];
        src_regions[0] = src_rect;
        Self {
            dst,
            sources,
            src_regions,
            dst_region: dst_rect,
            vertices: quad_vertices(dst_rect, src_rect, Color::WHITE).to_vec(),
            indices: QUAD_INDICES.to_vec(),
            blend: BlendMode::Copy,
            fill_rule: FillRule::FillAll,
            shader: Shader::TEXTURE,
        }
    }

    /// Whether `next` can be appended to this command without changing the
    /// rendered result.
    ///
    /// Triangles inside one call are rasterized in index order, so combining two
    /// consecutive calls with identical state is equivalent to issuing both.
    /// Winding-rule fills are excluded: merging would pool their coverage.
    pub fn can_merge(&self, next: &DrawTrianglesCommand, max_vertices: usize) -> bool {
        self.dst == next.dst
            && self.sources == next.sources
            && self.src_regions == next.src_regions
            && self.dst_region == next.dst_region
            && self.blend == next.blend
            && self.shader == next.shader
            && self.fill_rule == FillRule::FillAll
            && next.fill_rule == FillRule::FillAll
            && !self.sources.contains(&Some(self.dst))
            && self.vertices.len() + next.vertices.len() <= max_vertices
    }

    /// Appends `next`'s geometry, rebasing its indices.
    pub fn merge(&mut self, next: DrawTrianglesCommand) {
        let base = self.vertices.len() as u32;
        self.vertices.extend_from_slice(&next.vertices);
        self.indices.extend(next.indices.iter().map(|i| i + base));
    }

    pub fn as_call(&self) -> DrawCall<'_> {
        DrawCall {
            dst: self.dst,
            sources: self.sources,
            src_regions: self.src_regions,
            dst_region: self.dst_region,
            vertices: &self.vertices,
            indices: &self.indices,
            blend: self.blend,
            fill_rule: self.fill_rule,
            shader: self.shader,
        }
    }
}

/// One pending GPU operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    DrawTriangles(DrawTrianglesCommand),
    WritePixels {
        dst: TextureHandle,
        region: Region,
        pixels: Vec<u8>,
    },
    /// Deferred so that entries queued earlier can still use the texture.
    DeleteTexture(TextureHandle),
}
