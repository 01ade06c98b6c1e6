use bytemuck::{Pod, Zeroable};

use crate::coords::Region;
use crate::paint::Color;

/// Number of source-texture slots a shader can bind.
pub const SRC_IMAGE_COUNT: usize = 4;

// ── vertex ────────────────────────────────────────────────────────────────

/// One vertex of a draw-triangles call.
///
/// - `position`: destination texels (top-left origin, +Y down)
/// - `tex_coord`: source texels of source slot 0
/// - `color_scale`: premultiplied multiplier applied to the shaded color
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
    pub color_scale: [f32; 4],
}

/// Attribute description drivers use to build their input layout.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct VertexAttribute {
    pub name: &'static str,
    pub location: u32,
    /// Byte offset inside [`Vertex`].
    pub offset: usize,
    /// Number of `f32` components.
    pub components: usize,
}

impl Vertex {
    pub const ATTRIBUTES: [VertexAttribute; 3] = [
        VertexAttribute { name: "position", location: 0, offset: 0, components: 2 },
        VertexAttribute { name: "tex_coord", location: 1, offset: 8, components: 2 },
        VertexAttribute { name: "color_scale", location: 2, offset: 16, components: 4 },
    ];

    pub const STRIDE: usize = std::mem::size_of::<Vertex>();

    #[inline]
    pub const fn new(position: [f32; 2], tex_coord: [f32; 2], color_scale: [f32; 4]) -> Self {
        Self { position, tex_coord, color_scale }
    }

    /// Raw bytes of a vertex slice, laid out per [`Vertex::ATTRIBUTES`].
    #[inline]
    pub fn as_bytes(vertices: &[Vertex]) -> &[u8] {
        bytemuck::cast_slice(vertices)
    }

    #[inline]
    pub(crate) fn translated(self, dx: f32, dy: f32, du: f32, dv: f32) -> Self {
        Self {
            position: [self.position[0] + dx, self.position[1] + dy],
            tex_coord: [self.tex_coord[0] + du, self.tex_coord[1] + dv],
            color_scale: self.color_scale,
        }
    }
}

// ── quads ─────────────────────────────────────────────────────────────────

pub const QUAD_INDICES: [u32; 6] = [0, 1, 2, 1, 3, 2];

/// Builds the four vertices of an axis-aligned quad.
///
/// `dst` is in destination texels, `src` in source texels (ignored by shaders
/// without sources). Vertex order is top-left, top-right, bottom-left,
/// bottom-right, to be used with [`QUAD_INDICES`].
pub fn quad_vertices(dst: Region, src: Region, color: Color) -> [Vertex; 4] {
    let (dx0, dy0, dx1, dy1) = (dst.x as f32, dst.y as f32, dst.max_x() as f32, dst.max_y() as f32);
    let (sx0, sy0, sx1, sy1) = (src.x as f32, src.y as f32, src.max_x() as f32, src.max_y() as f32);
    let c = color.to_array();
    [
        Vertex::new([dx0, dy0], [sx0, sy0], c),
        Vertex::new([dx1, dy0], [sx1, sy0], c),
        Vertex::new([dx0, dy1], [sx0, sy1], c),
        Vertex::new([dx1, dy1], [sx1, sy1], c),
    ]
}

/// Integer bounding box of the destination area touched by `vertices`.
///
/// Returns `None` for an empty vertex list.
pub(crate) fn vertex_bounds(vertices: &[Vertex]) -> Option<Region> {
    let first = vertices.first()?;
    let (mut x0, mut y0) = (first.position[0], first.position[1]);
    let (mut x1, mut y1) = (x0, y0);
    for v in &vertices[1..] {
        x0 = x0.min(v.position[0]);
        y0 = y0.min(v.position[1]);
        x1 = x1.max(v.position[0]);
        y1 = y1.max(v.position[1]);
    }
    if !(x0.is_finite() && y0.is_finite() && x1.is_finite() && y1.is_finite()) {
        return None;
    }
    // Clamping to ±2^29 keeps the width representable.
    const LIMIT: f32 = (1 << 29) as f32;
    let snap = |v: f32| v.clamp(-LIMIT, LIMIT) as i32;
    Some(Region::from_min_max(
        snap(x0.floor()),
        snap(y0.floor()),
        snap(x1.ceil()),
        snap(y1.ceil()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attribute_table_matches_struct_layout() {
        assert_eq!(Vertex::STRIDE, 32);
        let v = [Vertex::new([1.0, 2.0], [3.0, 4.0], [5.0, 6.0, 7.0, 8.0])];
        let bytes = Vertex::as_bytes(&v);
        for attr in Vertex::ATTRIBUTES {
            let first: f32 = bytemuck::pod_read_unaligned(&bytes[attr.offset..attr.offset + 4]);
            assert_eq!(first, (attr.offset / 4 + 1) as f32, "{}", attr.name);
        }
    }

    #[test]
    fn quad_covers_destination_region() {
        let q = quad_vertices(Region::new(2, 3, 4, 5), Region::from_size(1, 1), Color::WHITE);
        assert_eq!(vertex_bounds(&q), Some(Region::new(2, 3, 4, 5)));
    }

    #[test]
    fn bounds_round_outwards() {
        let v = [
            Vertex::new([0.5, 0.5], [0.0; 2], [1.0; 4]),
            Vertex::new([2.2, 3.7], [0.0; 2], [1.0; 4]),
        ];
        assert_eq!(vertex_bounds(&v), Some(Region::from_min_max(0, 0, 3, 4)));
        assert_eq!(vertex_bounds(&[]), None);
    }

    #[test]
    fn huge_positions_keep_a_representable_width() {
        let v = [
            Vertex::new([-1.0e12, 0.0], [0.0; 2], [1.0; 4]),
            Vertex::new([1.0e12, 8.0], [0.0; 2], [1.0; 4]),
        ];
        let bounds = vertex_bounds(&v).unwrap();
        assert!(bounds.contains(Region::from_size(100, 8)));
    }
}
