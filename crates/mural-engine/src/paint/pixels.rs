//! Helpers over tightly packed RGBA8 buffers.

use crate::coords::Region;

/// Copies `src` (covering `region`) into `dst`, a `dst_width`-wide buffer.
pub fn blit(dst: &mut [u8], dst_width: i32, region: Region, src: &[u8]) {
    let row = region.width as usize * 4;
    for (j, line) in src.chunks_exact(row).take(region.height as usize).enumerate() {
        let start = ((region.y as usize + j) * dst_width as usize + region.x as usize) * 4;
        dst[start..start + row].copy_from_slice(line);
    }
}

/// Sets every texel of `region` in a `width`-wide buffer to `px`.
pub fn fill(dst: &mut [u8], width: i32, region: Region, px: [u8; 4]) {
    for y in region.y..region.max_y() {
        let start = (y as usize * width as usize + region.x as usize) * 4;
        for texel in dst[start..start + region.width as usize * 4].chunks_exact_mut(4) {
            texel.copy_from_slice(&px);
        }
    }
}

/// Copies the texels of `sub` out of `src`, which covers `outer`.
///
/// `sub` must lie inside `outer`.
pub fn extract(src: &[u8], outer: Region, sub: Region) -> Vec<u8> {
    let mut out = Vec::with_capacity(sub.rgba_len());
    let row = sub.width as usize * 4;
    for y in sub.y..sub.max_y() {
        let start = (((y - outer.y) * outer.width + (sub.x - outer.x)) as usize) * 4;
        out.extend_from_slice(&src[start..start + row]);
    }
    out
}

/// Returns the single texel value of `pixels` if every texel is identical.
pub fn uniform(pixels: &[u8]) -> Option<[u8; 4]> {
    let texels: &[[u8; 4]] = bytemuck::try_cast_slice(pixels).ok()?;
    let first = *texels.first()?;
    texels.iter().all(|&t| t == first).then_some(first)
}

/// A buffer of `region`'s size filled with `px`.
pub fn solid(region: Region, px: [u8; 4]) -> Vec<u8> {
    px.repeat(region.area() as usize)
}
