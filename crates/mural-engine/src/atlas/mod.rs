//! Backing textures and atlas packing.
//!
//! Many small logical images share one GPU texture (an atlas page) so that draws
//! between them can be merged into a single driver call. Large images and
//! screen targets get their own power-of-two texture.

mod allocator;
mod shelf;

pub use allocator::{AtlasAllocator, AtlasLimits, BackingId, BackingKind, Placement};
pub use shelf::ShelfPacker;
