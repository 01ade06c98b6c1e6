//! Integer texel geometry.
//!
//! Canonical space:
//! - Texels
//! - Origin top-left
//! - +X right, +Y down
//!
//! The same type describes logical image space and backing-texture space.

mod region;

pub use region::Region;
