use crate::coords::Region;

/// Horizontal run inside a shelf.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Segment {
    x: i32,
    width: i32,
    free: bool,
}

/// A row of the page. Every allocation in it starts at `y`.
#[derive(Debug, Clone)]
struct Shelf {
    y: i32,
    height: i32,
    /// Ordered by `x`, covering `[0, page width)` without gaps.
    segments: Vec<Segment>,
}

impl Shelf {
    fn new(y: i32, height: i32, width: i32) -> Self {
        Self {
            y,
            height,
            segments: vec![Segment { x: 0, width, free: true }],
        }
    }

    fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.free)
    }

    fn first_fit(&self, width: i32) -> Option<usize> {
        self.segments.iter().position(|s| s.free && s.width >= width)
    }

    fn take(&mut self, index: usize, width: i32) -> i32 {
        let seg = self.segments[index];
        self.segments[index] = Segment { x: seg.x, width, free: false };
        if seg.width > width {
            self.segments.insert(
                index + 1,
                Segment { x: seg.x + width, width: seg.width - width, free: true },
            );
        }
        seg.x
    }

    /// Frees the segment starting at `x` and coalesces it with free neighbours.
    fn release(&mut self, x: i32, width: i32) -> bool {
        let Some(i) = self
            .segments
            .iter()
            .position(|s| s.x == x && s.width == width && !s.free)
        else {
            return false;
        };
        self.segments[i].free = true;

        if i + 1 < self.segments.len() && self.segments[i + 1].free {
            self.segments[i].width += self.segments[i + 1].width;
            self.segments.remove(i + 1);
        }
        if i > 0 && self.segments[i - 1].free {
            self.segments[i - 1].width += self.segments[i].width;
            self.segments.remove(i);
        }
        true
    }
}

/// Shelf (row) rectangle packer for one atlas page.
///
/// Allocation picks the shelf that wastes the least height; a new shelf is
/// opened below the last one when no existing shelf fits well. Freed runs are
/// merged with adjacent free runs, and empty shelves at the bottom are dropped
/// so their height can be reused by taller requests.
#[derive(Debug, Clone)]
pub struct ShelfPacker {
    width: i32,
    height: i32,
    shelves: Vec<Shelf>,
    /// Top of the never-shelved space.
    next_y: i32,
    used_area: i64,
    allocations: usize,
}

impl ShelfPacker {
    pub fn new(width: i32, height: i32) -> Self {
        Self {
            width,
            height,
            shelves: Vec::new(),
            next_y: 0,
            used_area: 0,
            allocations: 0,
        }
    }

    #[inline]
    pub fn used_area(&self) -> i64 {
        self.used_area
    }

    /// Area not covered by any allocation (including fragmented space).
    #[inline]
    pub fn free_area(&self) -> i64 {
        self.width as i64 * self.height as i64 - self.used_area
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.allocations == 0
    }

    /// Reserves a `width × height` rectangle.
    pub fn allocate(&mut self, width: i32, height: i32) -> Option<Region> {
        if width <= 0 || height <= 0 || width > self.width || height > self.height {
            return None;
        }

        let best = self
            .shelves
            .iter()
            .enumerate()
            .filter(|(_, s)| s.height >= height)
            .filter_map(|(i, s)| s.first_fit(width).map(|seg| (i, seg, s.height - height)))
            .min_by_key(|&(i, _, waste)| (waste, i));

        let can_open = self.next_y + height <= self.height;
        let (shelf, seg) = match best {
            // A shelf more than twice as tall as the request is only used when
            // there is no room left for a fitted one.
            Some((i, seg, waste)) if waste <= height || !can_open => (i, seg),
            _ if can_open => {
                self.shelves.push(Shelf::new(self.next_y, height, self.width));
                self.next_y += height;
                (self.shelves.len() - 1, 0)
            }
            _ => return None,
        };

        let s = &mut self.shelves[shelf];
        let x = s.take(seg, width);
        self.used_area += width as i64 * height as i64;
        self.allocations += 1;
        Some(Region::new(x, s.y, width, height))
    }

    /// Returns a rectangle obtained from [`allocate`](Self::allocate).
    ///
    /// Returns `false` if the rectangle is not a live allocation.
    pub fn free(&mut self, region: Region) -> bool {
        let Some(shelf) = self
            .shelves
            .iter_mut()
            .find(|s| s.y == region.y && region.height <= s.height)
        else {
            return false;
        };
        if !shelf.release(region.x, region.width) {
            return false;
        }
        self.used_area -= region.area();
        self.allocations -= 1;

        while self.shelves.last().is_some_and(Shelf::is_empty) {
            if let Some(s) = self.shelves.pop() {
                self.next_y = s.y;
            }
        }
        true
    }
}
