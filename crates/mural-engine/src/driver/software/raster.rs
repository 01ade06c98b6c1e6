use crate::coords::Region;
use crate::driver::{DrawCall, DriverError};
use crate::paint::Color;
use crate::render::{FillRule, Shader, Vertex, SRC_IMAGE_COUNT};

use super::SoftTexture;

type Sources<'a> = [Option<&'a SoftTexture>; SRC_IMAGE_COUNT];

/// Triangle with positive orientation and its attributes.
struct Tri {
    p: [[f32; 2]; 3],
    v: [Vertex; 3],
    area: f32,
    /// `+1` or `-1`: orientation of the triangle as submitted.
    winding: i32,
}

impl Tri {
    fn new(a: Vertex, b: Vertex, c: Vertex) -> Option<Self> {
        let area = edge(a.position, b.position, c.position);
        if area == 0.0 || !area.is_finite() {
            return None;
        }
        // Normalize orientation so the inside test is always `w >= 0`.
        let (v, winding) = if area > 0.0 { ([a, b, c], 1) } else { ([a, c, b], -1) };
        Some(Self {
            p: [v[0].position, v[1].position, v[2].position],
            v,
            area: area.abs(),
            winding,
        })
    }

    fn bounds(&self, clip: Region) -> Option<Region> {
        let xs = self.p.map(|p| p[0]);
        let ys = self.p.map(|p| p[1]);
        // Clip before forming a region so far-away vertices can't overflow its size.
        let x0 = (xs.iter().copied().fold(f32::INFINITY, f32::min).floor() as i32).max(clip.x);
        let y0 = (ys.iter().copied().fold(f32::INFINITY, f32::min).floor() as i32).max(clip.y);
        let x1 = (xs.iter().copied().fold(f32::NEG_INFINITY, f32::max).ceil() as i32).min(clip.max_x());
        let y1 = (ys.iter().copied().fold(f32::NEG_INFINITY, f32::max).ceil() as i32).min(clip.max_y());
        (x1 > x0 && y1 > y0).then(|| Region::from_min_max(x0, y0, x1, y1))
    }

    /// Barycentric weights of the texel center, or `None` if it is not covered.
    fn weights(&self, x: i32, y: i32) -> Option<[f32; 3]> {
        let c = [x as f32 + 0.5, y as f32 + 0.5];
        let [p0, p1, p2] = self.p;
        let w0 = edge(p1, p2, c);
        let w1 = edge(p2, p0, c);
        let w2 = edge(p0, p1, c);
        if inside(w0, p1, p2) && inside(w1, p2, p0) && inside(w2, p0, p1) {
            Some([w0 / self.area, w1 / self.area, w2 / self.area])
        } else {
            None
        }
    }

    /// Interpolates relative to vertex 0 so attributes equal at all three
    /// vertices come out exact.
    fn interpolate(&self, w: [f32; 3]) -> ([f32; 2], Color) {
        let [a, b, c] = &self.v;
        let lerp = |x: f32, y: f32, z: f32| x + (y - x) * w[1] + (z - x) * w[2];
        let tex = [
            lerp(a.tex_coord[0], b.tex_coord[0], c.tex_coord[0]),
            lerp(a.tex_coord[1], b.tex_coord[1], c.tex_coord[1]),
        ];
        let mut scale = [0.0f32; 4];
        for (i, s) in scale.iter_mut().enumerate() {
            *s = lerp(a.color_scale[i], b.color_scale[i], c.color_scale[i]);
        }
        (tex, Color::from_array(scale))
    }
}

#[inline]
fn edge(a: [f32; 2], b: [f32; 2], c: [f32; 2]) -> f32 {
    (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0])
}

/// Inside test with a tie-break so a texel on an edge shared by two triangles
/// is owned by exactly one of them.
#[inline]
fn inside(w: f32, a: [f32; 2], b: [f32; 2]) -> bool {
    w > 0.0 || (w == 0.0 && (b[1] < a[1] || (a[1] == b[1] && b[0] < a[0])))
}

/// Rasterizes one draw call into `dst`.
pub(super) fn draw(dst: &mut SoftTexture, sources: &Sources<'_>, call: &DrawCall<'_>) -> Result<(), DriverError> {
    let shader = call.shader;
    if !shader.is_builtin() || shader.id.0 > Shader::TEXTURE.id.0 {
        return Err(DriverError::UnsupportedShader(shader.id));
    }
    if sources[..shader.source_count()].iter().any(Option::is_none) {
        return Err(DriverError::Rejected(format!(
            "shader {:?} needs {} sources",
            shader.id,
            shader.source_count()
        )));
    }

    let Some(clip) = call.dst_region.intersect(dst.bounds()) else {
        return Ok(());
    };

    let tris: Vec<Tri> = call
        .indices
        .chunks_exact(3)
        .filter_map(|t| {
            Tri::new(
                call.vertices[t[0] as usize],
                call.vertices[t[1] as usize],
                call.vertices[t[2] as usize],
            )
        })
        .collect();

    match call.fill_rule {
        FillRule::FillAll => {
            for tri in &tris {
                let Some(area) = tri.bounds(clip) else { continue };
                for y in area.y..area.max_y() {
                    for x in area.x..area.max_x() {
                        if let Some(w) = tri.weights(x, y) {
                            shade_texel(dst, sources, call, tri, w, x, y);
                        }
                    }
                }
            }
        }
        rule => fill_path(dst, sources, call, &tris, clip, rule),
    }
    Ok(())
}

/// Winding-rule fill: one shading per covered texel, using the first triangle
/// that covers it.
fn fill_path(
    dst: &mut SoftTexture,
    sources: &Sources<'_>,
    call: &DrawCall<'_>,
    tris: &[Tri],
    clip: Region,
    rule: FillRule,
) {
    let Some(area) = tris
        .iter()
        .filter_map(|t| t.bounds(clip))
        .reduce(|a, b| Region::from_min_max(a.x.min(b.x), a.y.min(b.y), a.max_x().max(b.max_x()), a.max_y().max(b.max_y())))
    else {
        return;
    };

    let len = area.area() as usize;
    let mut winding = vec![0i32; len];
    let mut owner: Vec<Option<usize>> = vec![None; len];
    let at = |x: i32, y: i32| ((y - area.y) * area.width + (x - area.x)) as usize;

    for (ti, tri) in tris.iter().enumerate() {
        let Some(b) = tri.bounds(clip) else { continue };
        for y in b.y..b.max_y() {
            for x in b.x..b.max_x() {
                if tri.weights(x, y).is_some() {
                    let i = at(x, y);
                    winding[i] += tri.winding;
                    owner[i].get_or_insert(ti);
                }
            }
        }
    }

    for y in area.y..area.max_y() {
        for x in area.x..area.max_x() {
            let i = at(x, y);
            let Some(ti) = owner[i] else { continue };
            if !rule.covers(winding[i]) {
                continue;
            }
            let tri = &tris[ti];
            if let Some(w) = tri.weights(x, y) {
                shade_texel(dst, sources, call, tri, w, x, y);
            }
        }
    }
}

fn shade_texel(
    dst: &mut SoftTexture,
    sources: &Sources<'_>,
    call: &DrawCall<'_>,
    tri: &Tri,
    w: [f32; 3],
    x: i32,
    y: i32,
) {
    let (tex, scale) = tri.interpolate(w);
    let src = if call.shader == Shader::CLEAR {
        Color::TRANSPARENT
    } else if call.shader == Shader::FILL {
        scale.clamped()
    } else {
        sample(sources, call, 0, tex).scale(scale).clamped()
    };

    let i = dst.index(x, y);
    let out = call.blend.apply(src, Color::from_rgba8(dst.texels[i]));
    dst.texels[i] = out.to_rgba8();
}

/// Nearest sample of slot `slot`, clamped to its source region.
fn sample(sources: &Sources<'_>, call: &DrawCall<'_>, slot: usize, tex: [f32; 2]) -> Color {
    let Some(src) = sources[slot] else {
        return Color::TRANSPARENT;
    };
    let base = call.src_regions[0];
    let region = call.src_regions[slot];
    if region.is_empty() {
        return Color::TRANSPARENT;
    }
    // Offsets are taken in i64: coordinates far outside the source still clamp.
    let texel = |t: f32, base: i32, min: i32, max: i32| -> i32 {
        (t.floor() as i64 - base as i64 + min as i64).clamp(min as i64, max as i64 - 1) as i32
    };
    let x = texel(tex[0], base.x, region.x, region.max_x());
    let y = texel(tex[1], base.y, region.y, region.max_y());
    Color::from_rgba8(src.texels[src.index(x, y)])
}
