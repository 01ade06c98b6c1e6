/// Axis-aligned rectangle in texels (top-left origin, +Y down).
///
/// Used both for logical image space and for physical backing-texture space;
/// callers are responsible for knowing which one a value lives in.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Region {
    #[inline]
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Region covering `[0, width) × [0, height)`.
    #[inline]
    pub const fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// Builds a region from min/max corners (max exclusive).
    #[inline]
    pub const fn from_min_max(x0: i32, y0: i32, x1: i32, y1: i32) -> Self {
        Self::new(x0, y0, x1 - x0, y1 - y0)
    }

    /// Right edge (exclusive), saturated at `i32::MAX`.
    #[inline]
    pub const fn max_x(self) -> i32 {
        self.x.saturating_add(self.width)
    }

    /// Bottom edge (exclusive), saturated at `i32::MAX`.
    #[inline]
    pub const fn max_y(self) -> i32 {
        self.y.saturating_add(self.height)
    }

    /// True when the width or height is non-positive.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Area in texels; zero for empty regions.
    #[inline]
    pub fn area(self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    /// Half-open containment: [min, max).
    #[inline]
    pub fn contains_point(self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.max_x() && y < self.max_y()
    }

    /// True when `other` lies entirely inside `self`. Empty regions are contained everywhere.
    #[inline]
    pub fn contains(self, other: Region) -> bool {
        other.is_empty()
            || (other.x >= self.x
                && other.y >= self.y
                && other.max_x() <= self.max_x()
                && other.max_y() <= self.max_y())
    }

    /// Overlap of two regions; `None` when they share no texel.
    #[inline]
    pub fn intersect(self, other: Region) -> Option<Region> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = self.max_x().min(other.max_x());
        let y1 = self.max_y().min(other.max_y());

        if x1 <= x0 || y1 <= y0 {
            None
        } else {
            Some(Region::from_min_max(x0, y0, x1, y1))
        }
    }

    #[inline]
    pub fn overlaps(self, other: Region) -> bool {
        self.intersect(other).is_some()
    }

    #[inline]
    pub const fn translate(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.width, self.height)
    }

    /// Grows the region by `pad` texels on every side.
    #[inline]
    pub const fn inflate(self, pad: i32) -> Self {
        Self::new(self.x - pad, self.y - pad, self.width + 2 * pad, self.height + 2 * pad)
    }

    /// Byte length of a tightly packed RGBA8 buffer covering this region.
    #[inline]
    pub fn rgba_len(self) -> usize {
        usize::try_from(self.area()).unwrap_or(usize::MAX).saturating_mul(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(x: i32, y: i32, w: i32, h: i32) -> Region {
        Region::new(x, y, w, h)
    }

    // ── containment ───────────────────────────────────────────────────────

    #[test]
    fn contains_point_is_half_open() {
        let region = r(0, 0, 10, 10);
        assert!(region.contains_point(0, 0));
        assert!(region.contains_point(9, 9));
        assert!(!region.contains_point(10, 9));
        assert!(!region.contains_point(-1, 0));
    }

    #[test]
    fn contains_region() {
        let outer = r(0, 0, 100, 100);
        assert!(outer.contains(r(10, 10, 20, 20)));
        assert!(outer.contains(outer));
        assert!(!outer.contains(r(90, 90, 20, 20)));
        assert!(outer.contains(r(500, 500, 0, 0)));
    }

    // ── intersect ─────────────────────────────────────────────────────────

    #[test]
    fn intersect_overlapping() {
        assert_eq!(r(0, 0, 10, 10).intersect(r(5, 5, 10, 10)), Some(r(5, 5, 5, 5)));
    }

    #[test]
    fn intersect_touching_edge_returns_none() {
        assert!(r(0, 0, 10, 10).intersect(r(10, 0, 10, 10)).is_none());
    }

    #[test]
    fn intersect_with_negative_origin_clips() {
        assert_eq!(r(-5, -5, 10, 10).intersect(r(0, 0, 100, 100)), Some(r(0, 0, 5, 5)));
    }

    // ── misc ──────────────────────────────────────────────────────────────

    #[test]
    fn empty_regions_have_no_area() {
        assert_eq!(r(0, 0, 0, 5).area(), 0);
        assert_eq!(r(0, 0, 5, -1).area(), 0);
        assert_eq!(r(0, 0, 3, 4).area(), 12);
        assert_eq!(r(0, 0, 3, 4).rgba_len(), 48);
    }

    #[test]
    fn far_regions_do_not_overflow() {
        let far = r(i32::MAX - 5, 0, 10, 1);
        assert_eq!(far.max_x(), i32::MAX);
        assert!(far.intersect(r(0, 0, 100, 100)).is_none());
        assert!(!r(0, 0, 100, 100).contains(far));
        assert_eq!(far.intersect(r(i32::MAX - 8, 0, 6, 1)), Some(r(i32::MAX - 5, 0, 3, 1)));
        let huge = r(0, 0, i32::MAX, i32::MAX).rgba_len() as u128;
        assert_eq!(huge, ((i32::MAX as u128).pow(2) * 4).min(usize::MAX as u128));
    }

    #[test]
    fn inflate_adds_padding_on_every_side() {
        assert_eq!(r(4, 4, 10, 6).inflate(1), r(3, 3, 12, 8));
    }
}
